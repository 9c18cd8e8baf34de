//! Live registry engine for container runtime dashboards
//!
//! This crate provides the core functionality for:
//! - Entities (containers, nodes, services, tasks) and their metadata
//! - Per-entity metrics collectors with start/stop control
//! - Backend connectors with discovery and refresh loops
//! - Health checks and observability

pub mod collector;
pub mod connector;
pub mod entity;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;

pub use connector::{by_name, enabled, Connector, ConnectorConfig};
pub use entity::{Container, Entity, Node, Service, Task};
pub use error::{CollectorError, ConnectorError, ManagerError, RuntimeError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{DashboardMetrics, StructuredLogger};
