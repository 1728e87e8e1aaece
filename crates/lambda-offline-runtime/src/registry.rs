//! Function loading: handler references to handler code.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lambda_offline_config::{ConfigError, FunctionSpec, ServiceSpec};

use crate::error::HandlerLoadError;
use crate::handler::Handler;
use crate::mock::MockHandler;

/// Runtimes the emulator can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    /// Handlers registered in-process.
    Rust,
    /// Behaviour declared under `mock:` in the service file.
    Mock,
}

impl Runtime {
    pub fn parse(id: &str) -> Option<Self> {
        match id {
            "rust" | "provided" | "provided.al2" | "provided.al2023" => Some(Self::Rust),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    /// Whether `HandlerReturn::Deferred` counts as completion.
    pub fn supports_deferred(self) -> bool {
        matches!(self, Self::Rust)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Mock => "mock",
        }
    }
}

/// Reject functions whose runtime cannot be hosted.
pub fn validate_runtimes(service: &ServiceSpec) -> Result<(), ConfigError> {
    for function in &service.functions {
        if Runtime::parse(&function.runtime).is_none() {
            return Err(ConfigError::UnsupportedRuntime {
                function: function.name.clone(),
                runtime: function.runtime.clone(),
            });
        }
    }
    Ok(())
}

/// A handler ready to be called.
#[derive(Clone)]
pub struct LoadedHandler {
    pub runtime: Runtime,
    pub handler: Arc<dyn Handler>,
}

/// Handler references mapped to in-process handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut references: Vec<&String> = self.handlers.keys().collect();
        references.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &references)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a reference (the `handler:` value).
    pub fn register(&mut self, reference: impl Into<String>, handler: impl Handler + 'static) {
        self.handlers.insert(reference.into(), Arc::new(handler));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, reference: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.register(reference, handler);
        self
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.handlers.contains_key(reference)
    }

    /// Resolve the handler for a function.
    pub fn load(&self, function: &FunctionSpec) -> Result<LoadedHandler, HandlerLoadError> {
        let runtime =
            Runtime::parse(&function.runtime).ok_or_else(|| HandlerLoadError::UnsupportedRuntime {
                function: function.name.clone(),
                runtime: function.runtime.clone(),
            })?;

        let handler: Arc<dyn Handler> = match runtime {
            Runtime::Mock => {
                let mock = function
                    .mock
                    .clone()
                    .ok_or_else(|| HandlerLoadError::MissingMock {
                        function: function.name.clone(),
                    })?;
                Arc::new(MockHandler::new(mock))
            }
            Runtime::Rust => self
                .handlers
                .get(&function.handler)
                .cloned()
                .ok_or_else(|| HandlerLoadError::NotRegistered {
                    function: function.name.clone(),
                    handler: function.handler.clone(),
                })?,
        };

        Ok(LoadedHandler { runtime, handler })
    }
}
