use serde_json::{json, Value};
use thiserror::Error;

/// A handler-reported failure: the payload of `fail`, or the error of a
/// deferred handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error_type}: {message}")]
pub struct HandlerError {
    pub message: String,
    pub error_type: String,
    pub stack_trace: Vec<String>,
}

impl HandlerError {
    /// A failure of type `Error`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "Error".to_string(),
            stack_trace: Vec::new(),
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: Vec<String>) -> Self {
        self.stack_trace = stack_trace;
        self
    }

    /// `{errorMessage, errorType, stackTrace}`.
    pub fn to_value(&self) -> Value {
        json!({
            "errorMessage": self.message,
            "errorType": self.error_type,
            "stackTrace": self.stack_trace,
        })
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// The handler for a function could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerLoadError {
    #[error("handler '{handler}' of function '{function}' is not registered")]
    NotRegistered { function: String, handler: String },

    #[error("function '{function}' uses the mock runtime but declares no mock behaviour")]
    MissingMock { function: String },

    #[error("function '{function}' uses unsupported runtime '{runtime}'")]
    UnsupportedRuntime { function: String, runtime: String },
}
