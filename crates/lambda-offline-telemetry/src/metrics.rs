//! Prometheus metrics registry.

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};

/// Duration histogram buckets in seconds, 1ms to 30s.
const DURATION_BUCKETS: [f64; 13] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub method: String,
    /// Route template, not the concrete path.
    pub path: String,
    pub status: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct InvocationLabels {
    pub function: String,
    /// `success`, `failure` or `timeout`.
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FunctionLabels {
    pub function: String,
}

/// Metrics registry holding all emulator metrics.
pub struct MetricsRegistry {
    pub registry: Registry,

    pub requests_total: Family<RequestLabels, Counter>,
    pub request_duration_seconds: Family<RequestLabels, Histogram>,

    pub invocations_total: Family<InvocationLabels, Counter>,
    pub invocation_duration_seconds: Family<FunctionLabels, Histogram>,
    pub double_completions_total: Family<FunctionLabels, Counter>,
    pub invocations_in_flight: Gauge,

    pub active_connections: Gauge,
    pub connections_total: Counter,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "lambda_offline_requests_total",
            "Total number of HTTP requests processed",
            requests_total.clone(),
        );

        let request_duration_seconds =
            Family::<RequestLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(DURATION_BUCKETS.iter().cloned())
            });
        registry.register(
            "lambda_offline_request_duration_seconds",
            "HTTP request duration in seconds",
            request_duration_seconds.clone(),
        );

        let invocations_total = Family::<InvocationLabels, Counter>::default();
        registry.register(
            "lambda_offline_invocations_total",
            "Total number of handler invocations by outcome",
            invocations_total.clone(),
        );

        let invocation_duration_seconds =
            Family::<FunctionLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(DURATION_BUCKETS.iter().cloned())
            });
        registry.register(
            "lambda_offline_invocation_duration_seconds",
            "Handler invocation duration in seconds",
            invocation_duration_seconds.clone(),
        );

        let double_completions_total = Family::<FunctionLabels, Counter>::default();
        registry.register(
            "lambda_offline_double_completions_total",
            "Completions signalled after an invocation was already terminal",
            double_completions_total.clone(),
        );

        let invocations_in_flight = Gauge::default();
        registry.register(
            "lambda_offline_invocations_in_flight",
            "Invocations that have not reached a terminal state",
            invocations_in_flight.clone(),
        );

        let active_connections = Gauge::default();
        registry.register(
            "lambda_offline_active_connections",
            "Number of currently open connections",
            active_connections.clone(),
        );

        let connections_total = Counter::default();
        registry.register(
            "lambda_offline_connections_total",
            "Total number of connections accepted",
            connections_total.clone(),
        );

        Self {
            registry,
            requests_total,
            request_duration_seconds,
            invocations_total,
            invocation_duration_seconds,
            double_completions_total,
            invocations_in_flight,
            active_connections,
            connections_total,
        }
    }

    /// Record a completed request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = RequestLabels {
            method: method.to_string(),
            path: path.to_string(),
            status,
        };
        self.requests_total.get_or_create(&labels).inc();
        self.request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a terminal invocation.
    pub fn record_invocation(&self, function: &str, outcome: &str, duration_secs: f64) {
        self.invocations_total
            .get_or_create(&InvocationLabels {
                function: function.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
        self.invocation_duration_seconds
            .get_or_create(&FunctionLabels {
                function: function.to_string(),
            })
            .observe(duration_secs);
    }

    pub fn record_double_completion(&self, function: &str) {
        self.double_completions_total
            .get_or_create(&FunctionLabels {
                function: function.to_string(),
            })
            .inc();
    }

    pub fn invocation_started(&self) {
        self.invocations_in_flight.inc();
    }

    pub fn invocation_finished(&self) {
        self.invocations_in_flight.dec();
    }

    pub fn connection_opened(&self) {
        self.active_connections.inc();
        self.connections_total.inc();
    }

    pub fn connection_closed(&self) {
        self.active_connections.dec();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_request_counts_per_label_set() {
        let metrics = MetricsRegistry::new();
        metrics.record_request("GET", "/hello", 200, 0.01);
        metrics.record_request("GET", "/hello", 200, 0.02);
        metrics.record_request("GET", "/hello", 503, 1.0);

        let ok = RequestLabels {
            method: "GET".into(),
            path: "/hello".into(),
            status: 200,
        };
        assert_eq!(metrics.requests_total.get_or_create(&ok).get(), 2);
    }

    #[test]
    fn invocation_outcomes() {
        let metrics = MetricsRegistry::new();
        metrics.record_invocation("hello", "success", 0.1);
        metrics.record_invocation("hello", "timeout", 1.0);
        metrics.record_double_completion("hello");

        let labels = InvocationLabels {
            function: "hello".into(),
            outcome: "timeout".into(),
        };
        assert_eq!(metrics.invocations_total.get_or_create(&labels).get(), 1);
        assert_eq!(
            metrics
                .double_completions_total
                .get_or_create(&FunctionLabels {
                    function: "hello".into()
                })
                .get(),
            1
        );
    }

    #[test]
    fn gauges_track_open_work() {
        let metrics = MetricsRegistry::new();
        metrics.invocation_started();
        metrics.invocation_started();
        metrics.invocation_finished();
        assert_eq!(metrics.invocations_in_flight.get(), 1);

        metrics.connection_opened();
        metrics.connection_closed();
        assert_eq!(metrics.active_connections.get(), 0);
        assert_eq!(metrics.connections_total.get(), 1);
    }
}
