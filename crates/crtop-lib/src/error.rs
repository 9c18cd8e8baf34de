//! Error types shared by connectors, collectors and managers

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while constructing or selecting a connector
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid connector type \"{name}\"\nconnector must be one of:{valid}")]
    InvalidConnector { name: String, valid: String },

    #[error("runc root {} is not readable: {source}", .path.display())]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("systemd cgroup enabled, but systemd support for managing cgroups is not available")]
    SystemdUnavailable,

    #[error("invalid connector configuration: {0}")]
    Config(#[from] config::ConfigError),
}

/// Errors reported by a container runtime backend
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The entity is gone; callers drop it from their registry
    #[error("container {0} does not exist")]
    NotExists(String),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

impl RuntimeError {
    /// True for the "does not exist" class of errors
    pub fn is_not_exists(&self) -> bool {
        matches!(self, RuntimeError::NotExists(_))
    }
}

/// Errors reported when starting a metrics collector
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("cgroup not found at {}", .0.display())]
    CgroupNotFound(PathBuf),

    #[error("collector for {0} is already running")]
    AlreadyRunning(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors reported by container lifecycle managers
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("{action} is not supported by the {backend} backend")]
    Unsupported {
        action: &'static str,
        backend: &'static str,
    },

    #[error("container {0} not found")]
    NotFound(String),
}
