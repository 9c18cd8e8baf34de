//! cgroup v1 sampling (fallback)
//!
//! Reads a container's usage from the legacy per-controller hierarchy:
//! - cpuacct controller for CPU usage
//! - memory controller for usage, limit and inactive file pages
//! - blkio controller for block I/O
//! - pids controller for the task count

use super::cgroup_v2::parse_flat_keyed;
use super::runc::CgroupSample;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Parse blkio.throttle.io_service_bytes contents
/// Returns (read_bytes, write_bytes) summed across devices
pub fn parse_blkio_service_bytes(content: &str) -> (u64, u64) {
    let mut read = 0u64;
    let mut write = 0u64;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() == 3 {
            let value: u64 = parts[2].parse().unwrap_or(0);
            match parts[1] {
                "Read" => read += value,
                "Write" => write += value,
                _ => {}
            }
        }
    }

    (read, write)
}

async fn read_value(path: &Path) -> Result<u64> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    content
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Read one usage sample from per-controller cgroup v1 directories
pub async fn read_sample(paths: &HashMap<String, PathBuf>) -> Result<CgroupSample> {
    let mut sample = CgroupSample::default();

    if let Some(cpuacct) = paths.get("cpuacct") {
        sample.cpu_usage_ns = read_value(&cpuacct.join("cpuacct.usage")).await?;
    }

    if let Some(memory) = paths.get("memory") {
        sample.mem_usage = read_value(&memory.join("memory.usage_in_bytes"))
            .await
            .unwrap_or(0);
        sample.mem_limit = read_value(&memory.join("memory.limit_in_bytes")).await.ok();

        let memory_stat = fs::read_to_string(memory.join("memory.stat"))
            .await
            .unwrap_or_default();
        sample.mem_inactive_file = parse_flat_keyed(&memory_stat)
            .get("total_inactive_file")
            .copied()
            .unwrap_or(0);
    }

    if let Some(blkio) = paths.get("blkio") {
        let content = fs::read_to_string(blkio.join("blkio.throttle.io_service_bytes"))
            .await
            .unwrap_or_default();
        (sample.io_read, sample.io_write) = parse_blkio_service_bytes(&content);
    }

    if let Some(pids) = paths.get("pids") {
        sample.pids = read_value(&pids.join("pids.current")).await.unwrap_or(0);
    }

    Ok(sample)
}

/// Whether the freezer controller reports the cgroup as frozen
pub async fn is_frozen(paths: &HashMap<String, PathBuf>) -> bool {
    let Some(freezer) = paths.get("freezer") else {
        return false;
    };
    fs::read_to_string(freezer.join("freezer.state"))
        .await
        .map(|content| content.trim() == "FROZEN")
        .unwrap_or(false)
}

/// Detect which cgroup version is available on the system
pub async fn detect_cgroup_version(cgroup_root: &Path) -> CgroupVersion {
    // Check for cgroup v2 unified hierarchy
    let v2_controllers = cgroup_root.join("cgroup.controllers");
    if fs::metadata(&v2_controllers).await.is_ok() {
        return CgroupVersion::V2;
    }

    // Check for cgroup v1 controllers
    let v1_memory = cgroup_root.join("memory");
    let v1_cpuacct = cgroup_root.join("cpuacct");
    if fs::metadata(&v1_memory).await.is_ok() && fs::metadata(&v1_cpuacct).await.is_ok() {
        return CgroupVersion::V1;
    }

    CgroupVersion::Unknown
}

/// Cgroup version detected on the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
    Unknown,
}
