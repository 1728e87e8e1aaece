//! Prometheus text exposition, served at `/__offline/metrics`.

use crate::MetricsRegistry;
use prometheus_client::encoding::text::encode;

/// Content-Type header value for Prometheus text format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render the registry in Prometheus text format.
pub fn render_metrics(registry: &MetricsRegistry) -> String {
    let mut buffer = String::new();
    encode(&mut buffer, &registry.registry).expect("encoding into a String cannot fail");
    buffer
}
