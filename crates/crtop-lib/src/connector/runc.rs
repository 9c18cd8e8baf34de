//! runc backend
//!
//! Containers are the directories under the runc root, each holding the
//! `state.json` runc maintains. Status is derived from the init process and
//! the container cgroup; metrics come from polling that cgroup.

use super::{
    Connector, ConnectorConfig, ContainerRuntime, Manager, ReadOnlyManager, RuntimeConnector,
    RuntimeHandle,
};
use crate::collector::{
    detect_cgroup_version, CgroupTarget, CgroupVersion, Collector, RuncCollector,
};
use crate::error::{ConnectorError, RuntimeError};
use crate::health::HealthRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const STATE_FILE: &str = "state.json";
const EXEC_FIFO: &str = "exec.fifo";
const SYSTEMD_RUN_DIR: &str = "/run/systemd/system";

/// Controllers sampled when runc did not record per-controller paths
const V1_CONTROLLERS: &[&str] = &["cpuacct", "memory", "blkio", "pids", "freezer"];

/// runc backend settings, read from `RUNC_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct RuncOpts {
    /// runc state root
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Containers use systemd cgroup naming
    #[serde(default)]
    pub systemd_cgroup: bool,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from("/run/runc")
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

impl Default for RuncOpts {
    fn default() -> Self {
        Self {
            root: default_root(),
            systemd_cgroup: false,
            cgroup_root: default_cgroup_root(),
            proc_root: default_proc_root(),
        }
    }
}

impl RuncOpts {
    /// Load settings from the environment and validate them
    pub fn from_env() -> Result<Self, ConnectorError> {
        let opts: RuncOpts = config::Config::builder()
            .add_source(config::Environment::with_prefix("RUNC"))
            .build()?
            .try_deserialize()?;
        opts.validate()
    }

    /// Make the root absolute and check it is readable
    pub fn validate(mut self) -> Result<Self, ConnectorError> {
        if self.root.is_relative() {
            let cwd = std::env::current_dir().map_err(|source| ConnectorError::RootUnreadable {
                path: self.root.clone(),
                source,
            })?;
            self.root = cwd.join(&self.root);
        }

        std::fs::read_dir(&self.root).map_err(|source| ConnectorError::RootUnreadable {
            path: self.root.clone(),
            source,
        })?;

        if self.systemd_cgroup && !Path::new(SYSTEMD_RUN_DIR).is_dir() {
            return Err(ConnectorError::SystemdUnavailable);
        }
        Ok(self)
    }
}

/// The parts of runc's `state.json` the dashboard reads
#[derive(Debug, Clone, Deserialize)]
pub struct RuncState {
    pub id: String,
    #[serde(default)]
    pub init_process_pid: i32,
    #[serde(default)]
    pub init_process_start: u64,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub config: RuncConfig,
    #[serde(default)]
    pub cgroup_paths: HashMap<String, PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuncConfig {
    #[serde(default)]
    pub rootfs: String,
    #[serde(default)]
    pub cgroups: Option<RuncCgroups>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuncCgroups {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub scope_prefix: String,
}

impl RuncCgroups {
    /// Cgroup location relative to a hierarchy root
    fn relative_path(&self, id: &str, systemd: bool) -> PathBuf {
        // systemd form "slice:prefix:name"
        if let [slice, prefix, name] = self.path.splitn(3, ':').collect::<Vec<_>>()[..] {
            return systemd_scope(slice, prefix, name);
        }
        if systemd {
            let name = if self.name.is_empty() { id } else { &self.name };
            return systemd_scope(&self.parent, &self.scope_prefix, name);
        }
        if self.path.is_empty() {
            return PathBuf::from(id);
        }
        PathBuf::from(self.path.trim_start_matches('/'))
    }
}

fn systemd_scope(slice: &str, prefix: &str, name: &str) -> PathBuf {
    let slice = if slice.is_empty() { "system.slice" } else { slice };
    let prefix = if prefix.is_empty() { "runc" } else { prefix };
    PathBuf::from(slice).join(format!("{prefix}-{name}.scope"))
}

/// runc containers found under [`RuncOpts::root`]
pub struct RuncRuntime {
    opts: RuncOpts,
    stats_interval: Duration,
    cgroup_version: OnceCell<CgroupVersion>,
}

impl RuncRuntime {
    pub fn new(opts: RuncOpts, stats_interval: Duration) -> Self {
        Self {
            opts,
            stats_interval,
            cgroup_version: OnceCell::new(),
        }
    }

    pub fn opts(&self) -> &RuncOpts {
        &self.opts
    }

    async fn cgroup_version(&self) -> CgroupVersion {
        *self
            .cgroup_version
            .get_or_init(|| async {
                let version = detect_cgroup_version(&self.opts.cgroup_root).await;
                info!(
                    ?version,
                    cgroup_root = %self.opts.cgroup_root.display(),
                    "Detected cgroup version"
                );
                version
            })
            .await
    }

    fn cgroup_target(&self, state: &RuncState, version: CgroupVersion) -> CgroupTarget {
        let relative = state
            .config
            .cgroups
            .clone()
            .unwrap_or_default()
            .relative_path(&state.id, self.opts.systemd_cgroup);

        match version {
            CgroupVersion::V1 => {
                let recorded: HashMap<String, PathBuf> = state
                    .cgroup_paths
                    .iter()
                    .filter(|(controller, _)| !controller.is_empty())
                    .map(|(controller, path)| (controller.clone(), path.clone()))
                    .collect();
                if !recorded.is_empty() {
                    return CgroupTarget::Legacy(recorded);
                }
                CgroupTarget::Legacy(
                    V1_CONTROLLERS
                        .iter()
                        .map(|controller| {
                            let path = self.opts.cgroup_root.join(controller).join(&relative);
                            (controller.to_string(), path)
                        })
                        .collect(),
                )
            }
            CgroupVersion::V2 | CgroupVersion::Unknown => {
                let path = state
                    .cgroup_paths
                    .get("")
                    .cloned()
                    .unwrap_or_else(|| self.opts.cgroup_root.join(&relative));
                CgroupTarget::Unified(path)
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for RuncRuntime {
    type Handle = RuncHandle;

    fn name(&self) -> &'static str {
        "runc"
    }

    async fn list(&self) -> Result<Vec<String>, RuntimeError> {
        let io_err = |source| RuntimeError::Io {
            path: self.opts.root.clone(),
            source,
        };

        let mut entries = fs::read_dir(&self.opts.root).await.map_err(io_err)?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            if is_dir {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load(&self, id: &str) -> Result<RuncHandle, RuntimeError> {
        let state_dir = self.opts.root.join(id);
        let state_path = state_dir.join(STATE_FILE);

        let content = match fs::read(&state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RuntimeError::NotExists(id.to_string()))
            }
            Err(source) => {
                return Err(RuntimeError::Io {
                    path: state_path,
                    source,
                })
            }
        };
        let state: RuncState =
            serde_json::from_slice(&content).map_err(|source| RuntimeError::Parse {
                path: state_path,
                source,
            })?;

        let target = self.cgroup_target(&state, self.cgroup_version().await);
        Ok(RuncHandle {
            state: Arc::new(state),
            state_dir,
            target,
            proc_root: self.opts.proc_root.clone(),
        })
    }

    fn collector(&self, handle: &RuncHandle) -> Arc<dyn Collector> {
        Arc::new(RuncCollector::new(
            handle.id(),
            handle.target.clone(),
            handle.init_pid(),
            self.opts.proc_root.clone(),
            self.stats_interval,
        ))
    }

    fn manager(&self, _handle: &RuncHandle) -> Arc<dyn Manager> {
        Arc::new(ReadOnlyManager::new("runc"))
    }
}

/// One loaded runc container
#[derive(Debug, Clone)]
pub struct RuncHandle {
    state: Arc<RuncState>,
    state_dir: PathBuf,
    target: CgroupTarget,
    proc_root: PathBuf,
}

impl RuncHandle {
    pub fn state(&self) -> &RuncState {
        &self.state
    }

    pub fn cgroup(&self) -> &CgroupTarget {
        &self.target
    }

    fn init_pid(&self) -> Option<i32> {
        (self.state.init_process_pid > 0).then_some(self.state.init_process_pid)
    }

    /// Whether the recorded init process is still the one running
    async fn init_alive(&self) -> bool {
        let Some(pid) = self.init_pid() else {
            return false;
        };
        let stat_path = self.proc_root.join(pid.to_string()).join("stat");
        let Ok(stat) = fs::read_to_string(stat_path).await else {
            return false;
        };
        if self.state.init_process_start == 0 {
            return true;
        }
        parse_start_time(&stat) == Some(self.state.init_process_start)
    }
}

#[async_trait]
impl RuntimeHandle for RuncHandle {
    fn id(&self) -> &str {
        &self.state.id
    }

    async fn status(&self) -> Result<String, RuntimeError> {
        let status = if self.init_alive().await {
            if fs::metadata(self.state_dir.join(EXEC_FIFO)).await.is_ok() {
                "created"
            } else if self.target.is_frozen().await {
                "paused"
            } else {
                "running"
            }
        } else if self.target.exists().await {
            "stopped"
        } else {
            "destroyed"
        };
        debug!(id = %self.state.id, status, "Derived container status");
        Ok(status.to_string())
    }

    async fn created(&self) -> Result<DateTime<Utc>, RuntimeError> {
        Ok(self.state.created)
    }

    fn rootfs(&self) -> Option<String> {
        Some(self.state.config.rootfs.clone())
    }
}

/// Process start time (field 22 of /proc/<pid>/stat)
fn parse_start_time(stat: &str) -> Option<u64> {
    // the command name may itself contain spaces or parentheses
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(19)?.parse().ok()
}

pub(super) fn new_runc(
    config: &ConnectorConfig,
    health: &HealthRegistry,
) -> Result<Arc<dyn Connector>, ConnectorError> {
    let opts = RuncOpts::from_env()?;
    info!(root = %opts.root.display(), systemd_cgroup = opts.systemd_cgroup, "Using runc root");

    let connector = RuntimeConnector::new(
        RuncRuntime::new(opts, config.stats_interval()),
        config.clone(),
        health.clone(),
    );
    connector.start();
    Ok(connector)
}
