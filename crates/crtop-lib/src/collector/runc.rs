//! Collector for runc containers
//!
//! Polls the container's cgroup at a fixed interval and converts the raw
//! counters into [`Metrics`] snapshots. Network counters come from the
//! container init process's view of `/proc/<pid>/net/dev`.

use super::{cgroup_v1, cgroup_v2, Collector, LogCollector, NoopLogCollector, Poller, Sampler};
use crate::error::CollectorError;
use crate::models::Metrics;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::debug;

/// Raw cgroup counters read in one poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CgroupSample {
    /// Cumulative CPU time in nanoseconds
    pub cpu_usage_ns: u64,
    pub mem_usage: u64,
    /// `None` when the cgroup has no memory limit
    pub mem_limit: Option<u64>,
    pub mem_inactive_file: u64,
    pub io_read: u64,
    pub io_write: u64,
    pub pids: u64,
}

impl CgroupSample {
    /// Convert to a metrics snapshot
    ///
    /// Memory usage is the working set (usage minus inactive file pages).
    /// The limit is capped at host memory when both are known.
    pub fn to_metrics(&self, id: &str, cpu_util: f64, host_mem: u64, net: (u64, u64)) -> Metrics {
        let mem_usage = self.mem_usage.saturating_sub(self.mem_inactive_file);
        let mem_limit = match self.mem_limit {
            Some(limit) if host_mem > 0 => limit.min(host_mem),
            Some(limit) => limit,
            None => host_mem,
        };
        let mem_percent = if mem_limit > 0 {
            mem_usage as f64 / mem_limit as f64 * 100.0
        } else {
            0.0
        };

        Metrics {
            id: id.to_string(),
            cpu_util,
            net_rx: net.0,
            net_tx: net.1,
            mem_limit,
            mem_percent,
            mem_usage,
            io_read: self.io_read,
            io_write: self.io_write,
            pids: self.pids,
        }
    }
}

/// Location of a container's cgroup
#[derive(Debug, Clone, PartialEq)]
pub enum CgroupTarget {
    /// cgroup v2 unified directory
    Unified(PathBuf),
    /// cgroup v1 directory per controller name
    Legacy(HashMap<String, PathBuf>),
}

impl CgroupTarget {
    /// Directory whose presence signals the cgroup still exists
    pub fn primary_path(&self) -> Option<&Path> {
        match self {
            CgroupTarget::Unified(path) => Some(path),
            CgroupTarget::Legacy(paths) => paths
                .get("memory")
                .or_else(|| paths.get("cpuacct"))
                .or_else(|| paths.values().next())
                .map(PathBuf::as_path),
        }
    }

    pub async fn exists(&self) -> bool {
        match self.primary_path() {
            Some(path) => fs::metadata(path).await.is_ok(),
            None => false,
        }
    }

    pub async fn sample(&self) -> Result<CgroupSample> {
        match self {
            CgroupTarget::Unified(path) => cgroup_v2::read_sample(path).await,
            CgroupTarget::Legacy(paths) => cgroup_v1::read_sample(paths).await,
        }
    }

    pub async fn is_frozen(&self) -> bool {
        match self {
            CgroupTarget::Unified(path) => cgroup_v2::is_frozen(path).await,
            CgroupTarget::Legacy(paths) => cgroup_v1::is_frozen(paths).await,
        }
    }
}

/// Collector polling a runc container's cgroup
pub struct RuncCollector {
    target: CgroupTarget,
    net_dev: Option<PathBuf>,
    proc_root: PathBuf,
    poller: Poller,
}

impl RuncCollector {
    pub fn new(
        id: impl Into<String>,
        target: CgroupTarget,
        pid: Option<i32>,
        proc_root: impl Into<PathBuf>,
        period: Duration,
    ) -> Self {
        let proc_root = proc_root.into();
        Self {
            target,
            net_dev: pid.map(|pid| proc_root.join(pid.to_string()).join("net/dev")),
            proc_root,
            poller: Poller::new(id, period),
        }
    }
}

#[async_trait]
impl Collector for RuncCollector {
    async fn start(&self) -> Result<(), CollectorError> {
        if !self.target.exists().await {
            let path = self
                .target
                .primary_path()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            return Err(CollectorError::CgroupNotFound(path));
        }

        let sampler = RuncSampler {
            id: self.poller.id().to_string(),
            target: self.target.clone(),
            net_dev: self.net_dev.clone(),
            host_mem: host_mem_total(&self.proc_root).await,
            last_cpu: None,
        };
        self.poller.start(sampler)?;
        debug!(container_id = %self.poller.id(), "Started runc collector");
        Ok(())
    }

    async fn stop(&self) {
        self.poller.stop();
    }

    fn running(&self) -> bool {
        self.poller.running()
    }

    fn stream(&self) -> Option<mpsc::Receiver<Metrics>> {
        self.poller.stream()
    }

    fn logs(&self) -> Arc<dyn LogCollector> {
        Arc::new(NoopLogCollector)
    }
}

struct RuncSampler {
    id: String,
    target: CgroupTarget,
    net_dev: Option<PathBuf>,
    host_mem: u64,
    last_cpu: Option<(u64, Instant)>,
}

#[async_trait]
impl Sampler for RuncSampler {
    async fn sample(&mut self) -> Result<Option<Metrics>> {
        if !self.target.exists().await {
            return Ok(None);
        }

        let sample = self.target.sample().await?;
        let now = Instant::now();
        let cpu_util = match self.last_cpu {
            Some((prev_ns, at)) => cpu_percent(prev_ns, sample.cpu_usage_ns, now - at),
            None => 0.0,
        };
        self.last_cpu = Some((sample.cpu_usage_ns, now));

        let net = match &self.net_dev {
            Some(path) => fs::read_to_string(path)
                .await
                .map(|content| parse_net_dev(&content))
                .unwrap_or_default(),
            None => (0, 0),
        };

        Ok(Some(sample.to_metrics(&self.id, cpu_util, self.host_mem, net)))
    }
}

/// CPU time consumed over a wall-clock window, as a percentage of one core
pub fn cpu_percent(prev_ns: u64, current_ns: u64, elapsed: Duration) -> f64 {
    let wall_ns = elapsed.as_nanos() as f64;
    if wall_ns <= 0.0 {
        return 0.0;
    }
    current_ns.saturating_sub(prev_ns) as f64 / wall_ns * 100.0
}

/// Parse /proc/<pid>/net/dev contents
/// Returns (rx_bytes, tx_bytes) summed over every interface except loopback
pub fn parse_net_dev(content: &str) -> (u64, u64) {
    let mut rx = 0u64;
    let mut tx = 0u64;

    for line in content.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<u64> = counters
            .split_whitespace()
            .map(|field| field.parse().unwrap_or(0))
            .collect();
        if fields.len() >= 9 {
            rx += fields[0];
            tx += fields[8];
        }
    }

    (rx, tx)
}

/// Total host memory in bytes from /proc/meminfo, 0 when unknown
pub async fn host_mem_total(proc_root: &Path) -> u64 {
    let content = fs::read_to_string(proc_root.join("meminfo"))
        .await
        .unwrap_or_default();
    content
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_net_dev_skips_loopback() {
        let content = "Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:    5000      50    0    0    0     0          0         0     5000      50    0    0    0     0       0          0
  eth0:  123456     100    0    0    0     0          0         0    65432      80    0    0    0     0       0          0
  eth1:    1000      10    0    0    0     0          0         0      500       5    0    0    0     0       0          0";

        assert_eq!(parse_net_dev(content), (124456, 65932));
    }

    #[test]
    fn test_cpu_percent() {
        let pct = cpu_percent(1_000_000_000, 1_500_000_000, Duration::from_secs(1));
        assert!((pct - 50.0).abs() < f64::EPSILON);
        assert_eq!(cpu_percent(10, 5, Duration::from_secs(1)), 0.0);
        assert_eq!(cpu_percent(0, 5, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_sample_to_metrics_caps_limit_at_host_memory() {
        let sample = CgroupSample {
            cpu_usage_ns: 0,
            mem_usage: 300,
            mem_limit: Some(u64::MAX),
            mem_inactive_file: 100,
            io_read: 1,
            io_write: 2,
            pids: 3,
        };

        let metrics = sample.to_metrics("abc", 12.5, 1000, (7, 8));
        assert_eq!(metrics.id, "abc");
        assert_eq!(metrics.mem_usage, 200);
        assert_eq!(metrics.mem_limit, 1000);
        assert!((metrics.mem_percent - 20.0).abs() < f64::EPSILON);
        assert_eq!((metrics.net_rx, metrics.net_tx), (7, 8));
        assert_eq!(metrics.pids, 3);
    }

    #[tokio::test]
    async fn test_host_mem_total() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            dir.path().join("meminfo"),
            "MemTotal:       16304472 kB\nMemFree:         1000 kB\n",
        )
        .await
        .unwrap();

        assert_eq!(host_mem_total(dir.path()).await, 16304472 * 1024);
        assert_eq!(host_mem_total(Path::new("/nonexistent")).await, 0);
    }
}
