//! Bring up a small cluster, report its health, then scale it back down.
//!
//! Requires `docker-machine` and a working driver on the host.

use swarm_cluster::{DesiredTopology, SwarmCluster, SwarmConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let cluster = SwarmCluster::new(SwarmConfig::default())?;

    let report = cluster.reconciler.start(DesiredTopology::new(1, 2)?).await?;
    println!("created {:?}, joined {:?}", report.created, report.joined);

    for instance in cluster.services.health().await?.instances {
        println!("{:<4} {:<8} {:<10} {} record(s)", instance.name, instance.role, instance.power, instance.nodes.len());
    }

    cluster.reconciler.scale(DesiredTopology::new(1, 0)?).await?;
    println!("scaled down to {}", cluster.reconciler.current_topology().await?);
    Ok(())
}
