//! Dashboard configuration

use anyhow::Result;
use crtop_lib::entity::DisplayFilter;
use crtop_lib::ConnectorConfig;
use serde::Deserialize;

/// Process configuration, read from `CRTOP_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Backend key passed to the connector registry
    #[serde(default = "default_connector")]
    pub connector: String,

    /// API server port for health/metrics/snapshots
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Snapshot render interval in milliseconds
    #[serde(default = "default_render_interval")]
    pub render_interval_ms: u64,

    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,

    #[serde(default = "default_refresh_queue_size")]
    pub refresh_queue_size: usize,

    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,

    /// Only show containers whose name contains this substring
    #[serde(default)]
    pub filter: String,

    /// Show containers in every state rather than only running ones
    #[serde(default = "default_all_containers")]
    pub all_containers: bool,
}

fn default_connector() -> String {
    "runc".to_string()
}

fn default_api_port() -> u16 {
    9400
}

fn default_render_interval() -> u64 {
    1000
}

fn default_discovery_interval() -> u64 {
    5
}

fn default_refresh_queue_size() -> usize {
    60
}

fn default_stats_interval() -> u64 {
    1000
}

fn default_all_containers() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connector: default_connector(),
            api_port: default_api_port(),
            render_interval_ms: default_render_interval(),
            discovery_interval_secs: default_discovery_interval(),
            refresh_queue_size: default_refresh_queue_size(),
            stats_interval_ms: default_stats_interval(),
            filter: String::new(),
            all_containers: default_all_containers(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("CRTOP"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Settings handed to the connector
    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            discovery_interval_secs: self.discovery_interval_secs,
            refresh_queue_size: self.refresh_queue_size,
            stats_interval_ms: self.stats_interval_ms,
            filter: DisplayFilter {
                pattern: self.filter.clone(),
                show_all: self.all_containers,
            },
        }
    }
}
