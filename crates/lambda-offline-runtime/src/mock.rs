//! The `mock` runtime: canned behaviour declared in the service file.

use std::time::Duration;

use lambda_offline_config::MockConfig;
use serde_json::Value;

use crate::context::LambdaContext;
use crate::error::HandlerError;
use crate::handler::{Handler, HandlerReturn};

/// Completes through the context callbacks, optionally after a delay.
#[derive(Debug, Clone)]
pub struct MockHandler {
    config: MockConfig,
}

impl MockHandler {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    fn result(&self, event: Value) -> Result<Value, HandlerError> {
        if let Some(error) = &self.config.error {
            return Err(HandlerError::new(error.message.clone()).with_type(error.error_type.clone()));
        }
        if self.config.echo {
            return Ok(event);
        }
        Ok(self.config.result.clone().unwrap_or(Value::Null))
    }
}

impl Handler for MockHandler {
    fn call(&self, event: Value, context: LambdaContext) -> HandlerReturn {
        if self.config.hang {
            return HandlerReturn::Immediate;
        }

        let result = self.result(event);
        if self.config.delay_ms == 0 {
            context.done(result);
        } else {
            let delay = Duration::from_millis(self.config.delay_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                context.done(result);
            });
        }
        HandlerReturn::Immediate
    }
}
