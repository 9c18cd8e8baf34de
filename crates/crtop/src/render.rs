//! Periodic registry snapshot
//!
//! Reads the connector the way a terminal UI would on every frame and logs
//! a one-line summary of what it saw.

use crtop_lib::{Connector, Container, Entity};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Aggregate over one snapshot of visible containers
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Summary {
    pub visible: usize,
    pub running: usize,
    pub cpu_util: f64,
    pub mem_usage: u64,
    pub net_rx: u64,
    pub net_tx: u64,
}

impl Summary {
    pub fn from_containers(containers: &[Arc<Container>]) -> Self {
        let mut summary = Summary {
            visible: containers.len(),
            ..Summary::default()
        };
        for container in containers {
            if container.get_meta("state") == "running" {
                summary.running += 1;
            }
            let metrics = container.get_metrics();
            summary.cpu_util += metrics.cpu_util;
            summary.mem_usage += metrics.mem_usage;
            summary.net_rx += metrics.net_rx;
            summary.net_tx += metrics.net_tx;
        }
        summary
    }
}

/// Snapshot the registry every `period` until shutdown
pub async fn run(
    connector: Arc<dyn Connector>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = Summary::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let containers = connector.all_containers().await;
                let nodes = connector.all_nodes().await;
                let summary = Summary::from_containers(&containers);

                if summary.visible != last.visible || summary.running != last.running {
                    info!(
                        visible = summary.visible,
                        running = summary.running,
                        nodes = nodes.len(),
                        "Container set changed"
                    );
                }
                debug!(
                    cpu_util = summary.cpu_util,
                    mem_usage = summary.mem_usage,
                    net_rx = summary.net_rx,
                    net_tx = summary.net_tx,
                    "Rendered snapshot"
                );
                last = summary;
            }
            _ = shutdown.recv() => {
                info!("Shutting down render loop");
                break;
            }
        }
    }
}
