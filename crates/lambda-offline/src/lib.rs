//! lambda-offline library.
//!
//! Emulates an API gateway in front of locally hosted functions. The
//! `lambda-offline` binary serves functions backed by the `mock` runtime;
//! programs embedding this library register native handlers and serve
//! them the same way:
//!
//! ```ignore
//! use std::sync::Arc;
//! use lambda_offline_lib::{server, Gateway, GatewayOptions, HandlerRegistry, HandlerReturn};
//!
//! let registry = HandlerRegistry::new().with("hello", |_: serde_json::Value, ctx: lambda_offline_lib::LambdaContext| {
//!     ctx.succeed(serde_json::json!({"msg": "hi"}));
//!     HandlerReturn::Immediate
//! });
//! let service = lambda_offline_config::parse_service_file("serverless.yml".as_ref())?.resolve()?;
//! let gateway = Arc::new(Gateway::new(service, GatewayOptions::new(), registry)?);
//! let listener = server::bind("127.0.0.1:3000".parse()?).await?;
//! server::serve(gateway, listener, None, std::future::pending()).await?;
//! ```

pub mod auth;
pub mod cors;
pub mod gateway;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use gateway::{Gateway, GatewayOptions, GatewayResponse};
pub use request::GatewayRequest;
pub use server::ServeError;

pub use lambda_offline_runtime::{
    async_handler, HandlerError, HandlerRegistry, HandlerReturn, LambdaContext,
};
