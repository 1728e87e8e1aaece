//! Function runtime for lambda-offline.
//!
//! Handlers are registered against the `handler` reference of a function
//! and complete exactly once, either through the [`LambdaContext`]
//! callbacks, by returning a deferred result, or by the timeout timer.

mod context;
mod error;
mod handler;
mod invoker;
mod mock;
mod outcome;
mod registry;

pub use context::{
    ContextOptions, CurrentRequest, InvocationContext, InvocationState, LambdaContext,
    OutcomeReceiver,
};
pub use error::{HandlerError, HandlerLoadError};
pub use handler::{async_handler, Handler, HandlerReturn};
pub use invoker::{Invoker, InvokerOptions, HANDLER_ASYNC_FAILURE, HANDLER_THROW};
pub use mock::MockHandler;
pub use outcome::{timeout_message, InvocationOutcome};
pub use registry::{validate_runtimes, HandlerRegistry, LoadedHandler, Runtime};
