//! The handler contract.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::context::LambdaContext;
use crate::error::HandlerError;

/// How a handler reports completion.
pub enum HandlerReturn {
    /// Completion arrives through the [`LambdaContext`] callbacks
    /// (`succeed`, `fail`, `done`), now or later.
    Immediate,
    /// Completion is the resolution of this future.
    Deferred(BoxFuture<'static, Result<Value, HandlerError>>),
}

impl HandlerReturn {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self::Deferred(future.boxed())
    }
}

impl std::fmt::Debug for HandlerReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Function code invoked with an event and a context.
pub trait Handler: Send + Sync {
    fn call(&self, event: Value, context: LambdaContext) -> HandlerReturn;
}

impl<F> Handler for F
where
    F: Fn(Value, LambdaContext) -> HandlerReturn + Send + Sync,
{
    fn call(&self, event: Value, context: LambdaContext) -> HandlerReturn {
        self(event, context)
    }
}

/// Adapt an async function into a deferred-completion handler.
pub fn async_handler<F, Fut>(f: F) -> impl Handler
where
    F: Fn(Value, LambdaContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    move |event: Value, context: LambdaContext| HandlerReturn::deferred(f(event, context))
}
