//! Shared configuration, error types, IDs, and observability primitives for graphex crates.
//!
//! Architecture role:
//! - defines the exchange configuration every worker of a query agrees on
//! - provides common [`GraphexError`] / [`Result`] contracts
//! - hosts metrics and optional exporter utilities
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]
//! - `metrics_exporter` (feature-gated)
//!
//! Feature flags:
//! - `profiling`: enables the per-worker `/metrics` HTTP endpoint.

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
#[cfg(feature = "profiling")]
pub mod metrics_exporter;

pub use config::ExchangeConfig;
pub use error::{GraphexError, Result};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
#[cfg(feature = "profiling")]
pub use metrics_exporter::MetricsEndpoint;
