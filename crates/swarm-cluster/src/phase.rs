//! Fan-out of per-instance work with a join-all barrier

use crate::error::{ClusterError, Result};
use crate::topology::Naming;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of every task spawned in one phase
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: String,
    /// Instances whose task succeeded, including no-ops
    pub successful: Vec<String>,
    /// Instances whose task succeeded and changed something
    pub changed: Vec<String>,
    pub failed: BTreeMap<String, String>,
    pub total_duration: Duration,
}

impl PhaseReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Record the outcome of work done outside the task group
    pub fn record(&mut self, instance: impl Into<String>, outcome: Result<bool>) {
        let instance = instance.into();
        match outcome {
            Ok(changed) => {
                if changed {
                    self.changed.push(instance.clone());
                }
                self.successful.push(instance);
            }
            Err(e) => {
                warn!("{} failed for {}: {}", self.phase, instance, e);
                self.failed.insert(instance, e.to_string());
            }
        }
    }

    /// Surface collected failures as one error, after every sibling finished.
    /// On success, returns the names of instances that changed, managers
    /// first and by ascending index.
    pub fn into_result(self, naming: &Naming) -> Result<Vec<String>> {
        if self.failed.is_empty() {
            let mut changed = self.changed;
            changed.sort_by_cached_key(|name| {
                let parsed = naming.parse(name);
                (parsed.is_none(), parsed, name.clone())
            });
            Ok(changed)
        } else {
            Err(ClusterError::phase_failed(self.phase, self.failed))
        }
    }
}

/// A group of concurrent per-instance tasks.
///
/// Each task resolves to whether it changed anything. Tasks are never
/// aborted: [`Phase::join`] waits for all of them, so a failing instance
/// cannot hide what happened to its siblings.
pub struct Phase {
    report: PhaseReport,
    tasks: JoinSet<(String, Result<bool>)>,
    started: Instant,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            report: PhaseReport {
                phase: name.into(),
                successful: Vec::new(),
                changed: Vec::new(),
                failed: BTreeMap::new(),
                total_duration: Duration::ZERO,
            },
            tasks: JoinSet::new(),
            started: Instant::now(),
        }
    }

    pub fn spawn<F>(&mut self, instance: impl Into<String>, work: F)
    where
        F: Future<Output = Result<bool>> + Send + 'static,
    {
        let instance = instance.into();
        debug!("{}: spawning {}", self.report.phase, instance);
        self.tasks.spawn(async move { (instance, work.await) });
    }

    /// Record an outcome obtained serially, before or after the fan-out
    pub fn record(&mut self, instance: impl Into<String>, outcome: Result<bool>) {
        self.report.record(instance, outcome);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Barrier: wait for every spawned task and aggregate the outcomes
    pub async fn join(mut self) -> PhaseReport {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((instance, outcome)) => self.report.record(instance, outcome),
                Err(join_error) => {
                    warn!("{} task did not complete: {}", self.report.phase, join_error);
                    let key = format!("task-{}", self.report.failed.len());
                    self.report
                        .failed
                        .insert(key, format!("Task join error: {}", join_error));
                }
            }
        }

        self.report.total_duration = self.started.elapsed();
        self.report
    }
}
