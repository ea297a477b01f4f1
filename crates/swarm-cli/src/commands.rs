//! Command handlers

use anyhow::{Context, Result};
use colored::Colorize;
use swarm_cluster::{
    DesiredTopology, HealthReport, ReconcileReport, ServiceRecord, ServiceSpec, SwarmCluster,
};
use swarm_machine::PowerState;
use tabled::{Table, Tabled};

use crate::cli::{Commands, ServiceCommands};

pub async fn handle_command(cluster: &SwarmCluster, command: Commands) -> Result<()> {
    match command {
        Commands::Start { counts } => handle_start(cluster, &counts).await,
        Commands::Stop => handle_stop(cluster).await,
        Commands::Scale { counts } => handle_scale(cluster, &counts).await,
        Commands::Delete => handle_delete(cluster).await,
        Commands::Vis => handle_vis(cluster).await,
        Commands::Service(service) => handle_service_command(cluster, service).await,
        Commands::Health => handle_health(cluster).await,
        Commands::Logs { service, tail } => handle_logs(cluster, &service, tail).await,
    }
}

async fn resolve_topology(cluster: &SwarmCluster, counts: &[u32]) -> Result<DesiredTopology> {
    let current = cluster
        .reconciler
        .current_topology()
        .await
        .context("Failed to list cluster instances")?;
    Ok(DesiredTopology::resolve(counts, current)?)
}

async fn handle_start(cluster: &SwarmCluster, counts: &[u32]) -> Result<()> {
    let desired = resolve_topology(cluster, counts).await?;
    println!("{}", format!("Starting cluster with {}...", desired).cyan());

    let report = cluster
        .reconciler
        .start(desired)
        .await
        .context("Failed to start cluster")?;
    print_report(&report);

    if desired.managers > 0 {
        println!("{}", "✓ Cluster is up".green());
        println!(
            "Point your docker client at the leader with:\n  eval $({} env {})",
            cluster.config.machine_binary,
            cluster.config.leader_name()
        );
    }
    Ok(())
}

async fn handle_stop(cluster: &SwarmCluster) -> Result<()> {
    println!("{}", "Stopping cluster...".cyan());
    let stopped = cluster.reconciler.stop().await.context("Failed to stop cluster")?;

    if stopped.is_empty() {
        println!("{}", "No running instances".yellow());
    } else {
        println!("{}", format!("✓ Stopped {}", stopped.join(", ")).green());
    }
    Ok(())
}

async fn handle_scale(cluster: &SwarmCluster, counts: &[u32]) -> Result<()> {
    let desired = resolve_topology(cluster, counts).await?;
    println!("{}", format!("Scaling cluster to {}...", desired).cyan());

    let report = cluster
        .reconciler
        .scale(desired)
        .await
        .context("Failed to scale cluster")?;
    print_report(&report);
    println!("{}", format!("✓ Cluster scaled to {}", desired).green());
    Ok(())
}

async fn handle_delete(cluster: &SwarmCluster) -> Result<()> {
    println!("{}", "Deleting cluster...".cyan());
    let report = cluster.reconciler.delete().await.context("Failed to delete cluster")?;

    if report.deleted.is_empty() {
        println!("{}", "No cluster instances to delete".yellow());
    } else {
        println!("{}", format!("✓ Deleted {}", report.deleted.join(", ")).green());
    }
    Ok(())
}

async fn handle_vis(cluster: &SwarmCluster) -> Result<()> {
    println!("{}", "Deploying visualizer...".cyan());
    let url = cluster
        .services
        .deploy_visualizer()
        .await
        .context("Failed to deploy visualizer")?;
    println!("{}", format!("✓ Visualizer available at {}", url).green());
    Ok(())
}

async fn handle_service_command(cluster: &SwarmCluster, command: ServiceCommands) -> Result<()> {
    let services = &cluster.services;
    match command {
        ServiceCommands::Ls => {
            let records = services.list_services().await.context("Failed to list services")?;
            display_services(&records);
        }
        ServiceCommands::Create {
            name,
            image,
            replicas,
            publish,
        } => {
            let spec = publish
                .into_iter()
                .fold(ServiceSpec::new(name.clone(), image).with_replicas(replicas), |spec, p| {
                    spec.with_publish(p)
                });
            services
                .create_service(&spec)
                .await
                .with_context(|| format!("Failed to create service {}", name))?;
            println!("{}", format!("✓ Service {} created", name).green());
        }
        ServiceCommands::Scale { name, replicas } => {
            services
                .scale_service(&name, replicas)
                .await
                .with_context(|| format!("Failed to scale service {}", name))?;
            println!("{}", format!("✓ Service {} scaled to {} replicas", name, replicas).green());
        }
        ServiceCommands::Rm { name } => {
            services
                .remove_service(&name)
                .await
                .with_context(|| format!("Failed to remove service {}", name))?;
            println!("{}", format!("✓ Service {} removed", name).green());
        }
    }
    Ok(())
}

async fn handle_health(cluster: &SwarmCluster) -> Result<()> {
    let report = cluster.services.health().await.context("Failed to check health")?;
    display_health(&report);
    Ok(())
}

async fn handle_logs(cluster: &SwarmCluster, service: &str, tail: u32) -> Result<()> {
    let logs = cluster
        .services
        .service_logs(service, tail)
        .await
        .with_context(|| format!("Failed to fetch logs for {}", service))?;
    println!("{}", logs);
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    if !report.mutated() {
        println!("Cluster already matches {}", report.desired);
        return;
    }
    if !report.created.is_empty() {
        println!("  Created: {}", report.created.join(", "));
    }
    if !report.deleted.is_empty() {
        println!("  Deleted: {}", report.deleted.join(", "));
    }
    if !report.started.is_empty() {
        println!("  Started: {}", report.started.join(", "));
    }
    if report.initialized {
        println!("  Initialized swarm on {}", report.diff.wanted.first().map(|i| i.as_str()).unwrap_or("-"));
    }
    if !report.joined.is_empty() {
        println!("  Joined: {}", report.joined.join(", "));
    }
}

#[derive(Tabled)]
pub struct HealthRow {
    #[tabled(rename = "Instance")]
    pub name: String,
    #[tabled(rename = "Role")]
    pub role: String,
    #[tabled(rename = "Power")]
    pub power: String,
    #[tabled(rename = "Address")]
    pub address: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Availability")]
    pub availability: String,
}

pub fn health_rows(report: &HealthReport) -> Vec<HealthRow> {
    report
        .instances
        .iter()
        .map(|instance| {
            let join = |values: Vec<String>| {
                if values.is_empty() {
                    "-".to_string()
                } else {
                    values.join(", ")
                }
            };
            HealthRow {
                name: instance.name.clone(),
                role: instance.role.to_string(),
                power: instance.power.to_string(),
                address: instance
                    .address
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                status: join(instance.nodes.iter().map(|n| n.status.to_string()).collect()),
                availability: join(instance.nodes.iter().map(|n| n.availability.to_string()).collect()),
            }
        })
        .collect()
}

fn display_health(report: &HealthReport) {
    if report.instances.is_empty() {
        println!("{}", "No cluster instances".yellow());
        return;
    }

    let mut rows = health_rows(report);
    for (row, instance) in rows.iter_mut().zip(&report.instances) {
        row.power = match instance.power {
            PowerState::Running => row.power.green().to_string(),
            PowerState::Stopped | PowerState::Absent => row.power.red().to_string(),
            PowerState::Transitional(_) => row.power.yellow().to_string(),
        };
    }
    println!("{}", Table::new(rows));

    if !report.control_plane_available {
        println!("{}", "Control plane unavailable; membership not shown".yellow());
    }
    let unhealthy = report.unhealthy();
    if unhealthy.is_empty() {
        println!("{}", "✓ All instances healthy".green());
    } else {
        let names: Vec<&str> = unhealthy.iter().map(|i| i.name.as_str()).collect();
        println!("{}", format!("✗ Unhealthy: {}", names.join(", ")).red());
    }
}

fn display_services(records: &[ServiceRecord]) {
    #[derive(Tabled)]
    struct ServiceRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Mode")]
        mode: String,
        #[tabled(rename = "Replicas")]
        replicas: String,
        #[tabled(rename = "Image")]
        image: String,
        #[tabled(rename = "Ports")]
        ports: String,
    }

    if records.is_empty() {
        println!("{}", "No services".yellow());
        return;
    }

    let rows: Vec<ServiceRow> = records
        .iter()
        .map(|s| ServiceRow {
            name: s.name.clone(),
            mode: s.mode.clone(),
            replicas: s.replicas.clone(),
            image: s.image.clone(),
            ports: s.ports.clone(),
        })
        .collect();
    println!("{}", Table::new(rows));
}
