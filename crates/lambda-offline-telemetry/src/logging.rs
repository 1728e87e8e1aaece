//! Structured logging.
//!
//! JSON lines (or pretty output) on stdout, filtered by `RUST_LOG` or the
//! configured level.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => init_json_logging(filter),
        LogFormat::Pretty => init_pretty_logging(filter),
    }
}

fn init_json_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

fn init_pretty_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Standard log event names.
pub mod events {
    /// The emulator is starting.
    pub const STARTUP: &str = "startup";

    /// An endpoint was added to the route table.
    pub const ROUTE_REGISTERED: &str = "route_registered";

    /// The listener is bound.
    pub const LISTENING: &str = "listening";

    /// A request produced its response.
    pub const REQUEST_COMPLETED: &str = "request_completed";

    /// An invocation hit its timeout.
    pub const INVOCATION_TIMED_OUT: &str = "invocation_timed_out";

    /// A handler completed an invocation that was already terminal.
    pub const DOUBLE_COMPLETION: &str = "double_completion";

    /// A handler failed, panicked, or could not be loaded.
    pub const HANDLER_FAILED: &str = "handler_failed";

    /// A mapping template failed to render.
    pub const TEMPLATE_ERROR: &str = "template_error";

    /// A response parameter that the emulator does not apply.
    pub const UNSUPPORTED_RESPONSE_PARAMETER: &str = "unsupported_response_parameter";

    /// The service configuration was rejected.
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
}

/// Helper macros for structured logging with standard fields.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_route_registered {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::ROUTE_REGISTERED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_request_completed {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::REQUEST_COMPLETED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_invocation_timed_out {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::INVOCATION_TIMED_OUT,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_double_completion {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::DOUBLE_COMPLETION,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_handler_failed {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::HANDLER_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_template_error {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::TEMPLATE_ERROR,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_unsupported_response_parameter {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::UNSUPPORTED_RESPONSE_PARAMETER,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_configuration_error {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::CONFIGURATION_ERROR,
            $($field)*
        )
    };
}
