//! Bounded waits for observable conditions

use crate::config::PollPolicy;
use crate::error::{ClusterError, Result};
use std::future::Future;
use tracing::debug;

/// Evaluate `condition` up to `policy.attempts` times, sleeping
/// `policy.interval` between attempts.
///
/// Returns as soon as the condition holds, or `ClusterError::Timeout` naming
/// `what` once the attempts are exhausted.
pub async fn wait_for<F, Fut>(policy: PollPolicy, what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=policy.attempts {
        if condition().await {
            debug!("{} after {} attempt(s)", what, attempt);
            return Ok(());
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(ClusterError::timeout(what, policy.attempts))
}

/// Like [`wait_for`] for fallible probes; a probe error counts as "not yet"
pub async fn wait_for_ok<F, Fut>(policy: PollPolicy, what: &str, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    wait_for(policy, what, || {
        let fut = probe();
        async move {
            match fut.await {
                Ok(ready) => ready,
                Err(e) => {
                    debug!("Probe for {} failed: {}", what, e);
                    false
                }
            }
        }
    })
    .await
}
