//! cgroup v2 sampling
//!
//! Reads a container's usage from the unified cgroup v2 hierarchy:
//! - cpu.stat for cumulative CPU time
//! - memory.current / memory.max / memory.stat for memory
//! - io.stat for block I/O
//! - pids.current for the task count

use super::runc::CgroupSample;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

/// Parse a flat-keyed cgroup file (`key value` per line)
pub fn parse_flat_keyed(content: &str) -> HashMap<String, u64> {
    let mut stats = HashMap::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            if let Ok(value) = parts[1].parse::<u64>() {
                stats.insert(parts[0].to_string(), value);
            }
        }
    }

    stats
}

/// Parse io.stat contents
/// Returns (read_bytes, write_bytes) summed across devices
pub fn parse_io_stat(content: &str) -> (u64, u64) {
    let mut read = 0u64;
    let mut write = 0u64;

    for line in content.lines() {
        for field in line.split_whitespace().skip(1) {
            if let Some((key, value)) = field.split_once('=') {
                let value: u64 = value.parse().unwrap_or(0);
                match key {
                    "rbytes" => read += value,
                    "wbytes" => write += value,
                    _ => {}
                }
            }
        }
    }

    (read, write)
}

/// Parse a single-value limit file where `max` means unlimited
pub fn parse_max(content: &str) -> Option<u64> {
    match content.trim() {
        "max" | "" => None,
        value => value.parse().ok(),
    }
}

/// Read a single value from a cgroup file
async fn read_cgroup_value(cgroup_path: &Path, filename: &str) -> Result<u64> {
    let file_path = cgroup_path.join(filename);
    let content = fs::read_to_string(&file_path)
        .await
        .with_context(|| format!("Failed to read {}", file_path.display()))?;

    content
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {} value", filename))
}

/// Read one usage sample from a cgroup v2 directory
pub async fn read_sample(cgroup_path: &Path) -> Result<CgroupSample> {
    let cpu_stat = fs::read_to_string(cgroup_path.join("cpu.stat"))
        .await
        .with_context(|| format!("Failed to read cpu.stat in {}", cgroup_path.display()))?;
    let cpu_usage_usec = parse_flat_keyed(&cpu_stat)
        .get("usage_usec")
        .copied()
        .unwrap_or(0);

    let mem_usage = read_cgroup_value(cgroup_path, "memory.current")
        .await
        .unwrap_or(0);

    let mem_limit = fs::read_to_string(cgroup_path.join("memory.max"))
        .await
        .ok()
        .and_then(|content| parse_max(&content));

    let memory_stat = fs::read_to_string(cgroup_path.join("memory.stat"))
        .await
        .unwrap_or_default();
    let mem_inactive_file = parse_flat_keyed(&memory_stat)
        .get("inactive_file")
        .copied()
        .unwrap_or(0);

    let io_stat = fs::read_to_string(cgroup_path.join("io.stat"))
        .await
        .unwrap_or_default();
    let (io_read, io_write) = parse_io_stat(&io_stat);

    let pids = read_cgroup_value(cgroup_path, "pids.current")
        .await
        .unwrap_or(0);

    Ok(CgroupSample {
        cpu_usage_ns: cpu_usage_usec.saturating_mul(1_000),
        mem_usage,
        mem_limit,
        mem_inactive_file,
        io_read,
        io_write,
        pids,
    })
}

/// Whether the cgroup is frozen (container paused)
pub async fn is_frozen(cgroup_path: &Path) -> bool {
    fs::read_to_string(cgroup_path.join("cgroup.freeze"))
        .await
        .map(|content| content.trim() == "1")
        .unwrap_or(false)
}
