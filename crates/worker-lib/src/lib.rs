//! Usage aggregation worker library
//!
//! This crate provides the core functionality for:
//! - Project discovery and usage submission against the billing service
//! - Querying the metrics store for project and instance usage
//! - Attributing raw samples to projects by instance name
//! - Driving the periodic collection cycles
//! - Health checks and observability

pub mod attribution;
pub mod billing;
pub mod collector;
pub mod health;
pub mod models;
pub mod observability;
pub mod prom;
pub mod window;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, WorkerMetrics};
