use std::time::Duration;

use serde_json::Value;

use crate::error::HandlerError;

/// The single terminal result of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Success(Value),
    Failure(HandlerError),
    TimedOut,
}

impl InvocationOutcome {
    /// Label used in metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
            Self::TimedOut => "timeout",
        }
    }
}

impl From<Result<Value, HandlerError>> for InvocationOutcome {
    fn from(result: Result<Value, HandlerError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Failure(err),
        }
    }
}

/// Body of the 503 sent when an invocation times out.
pub fn timeout_message(function: &str, timeout: Duration) -> String {
    format!(
        "[offline] Your handler '{}' timed out after {}ms.",
        function,
        timeout.as_millis()
    )
}
