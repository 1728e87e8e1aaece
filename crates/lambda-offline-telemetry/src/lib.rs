//! Observability for lambda-offline.
//!
//! This crate provides:
//! - Structured logging (JSON or pretty) with standard event names
//! - A Prometheus metrics registry and its text exposition
//!
//! ```ignore
//! use lambda_offline_telemetry::{LogFormat, Telemetry, TelemetryConfig};
//!
//! let telemetry = Telemetry::init(
//!     TelemetryConfig::new().with_log_level("debug").with_log_format(LogFormat::Pretty),
//! )?;
//! let metrics = telemetry.metrics_clone();
//! ```

pub mod config;
pub mod logging;
pub mod metrics;
pub mod prometheus;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::events;
pub use metrics::MetricsRegistry;
pub use prometheus::PROMETHEUS_CONTENT_TYPE;

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

/// Telemetry handle: configuration plus the shared metrics registry.
pub struct Telemetry {
    config: TelemetryConfig,
    metrics: Arc<MetricsRegistry>,
}

impl Telemetry {
    /// Install logging and create the metrics registry.
    pub fn init(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        logging::init_logging(&config)?;
        Ok(Self::init_without_logging(config))
    }

    /// Create the registry only; for tests and embedders that own logging.
    pub fn init_without_logging(config: TelemetryConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn metrics_clone(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    pub fn render_prometheus(&self) -> String {
        prometheus::render_metrics(&self.metrics)
    }
}
