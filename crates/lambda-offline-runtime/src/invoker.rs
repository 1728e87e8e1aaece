//! Running one invocation end to end.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use lambda_offline_config::FunctionSpec;
use lambda_offline_telemetry::MetricsRegistry;
use serde_json::Value;

use crate::context::{ContextOptions, CurrentRequest, InvocationContext};
use crate::error::{HandlerError, HandlerLoadError};
use crate::handler::HandlerReturn;
use crate::outcome::InvocationOutcome;
use crate::registry::HandlerRegistry;

/// Error type reported for a panic during the handler call.
pub const HANDLER_THROW: &str = "HandlerThrow";
/// Error type reported for a panic while polling a deferred handler.
pub const HANDLER_ASYNC_FAILURE: &str = "HandlerAsyncFailure";

/// Invoker settings.
#[derive(Debug, Clone)]
pub struct InvokerOptions {
    pub timeouts_enabled: bool,
    pub region: String,
}

impl Default for InvokerOptions {
    fn default() -> Self {
        Self {
            timeouts_enabled: true,
            region: "us-east-1".to_string(),
        }
    }
}

/// Creates invocation contexts, calls handlers and awaits their outcome.
///
/// Owns the in-flight table (request id to context) and the
/// most-recent-request marker consulted by timers.
pub struct Invoker {
    registry: HandlerRegistry,
    in_flight: DashMap<String, InvocationContext>,
    options: ContextOptions,
}

impl Invoker {
    pub fn new(registry: HandlerRegistry, options: InvokerOptions) -> Self {
        Self {
            registry,
            in_flight: DashMap::new(),
            options: ContextOptions {
                timeouts_enabled: options.timeouts_enabled,
                region: options.region,
                current: CurrentRequest::new(),
                metrics: None,
            },
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.options.metrics = Some(metrics);
        self
    }

    /// Number of invocations without an outcome yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The in-flight context for a request, if still pending.
    pub fn context(&self, request_id: &str) -> Option<InvocationContext> {
        self.in_flight.get(request_id).map(|entry| entry.clone())
    }

    /// The most recently started request id.
    pub fn current_request(&self) -> Option<String> {
        self.options.current.get()
    }

    pub fn timeouts_enabled(&self) -> bool {
        self.options.timeouts_enabled
    }

    /// Invoke `function` with `event` and wait for its single outcome.
    ///
    /// `request_id` becomes the most recent request. Load failures are
    /// returned before any handler code runs.
    pub async fn invoke(
        &self,
        function: &Arc<FunctionSpec>,
        event: Value,
        request_id: &str,
    ) -> Result<InvocationOutcome, HandlerLoadError> {
        self.options.current.set(request_id);

        let loaded = self.registry.load(function)?;

        let (context, receiver) =
            InvocationContext::new(Arc::clone(function), request_id, &self.options);
        let _in_flight = InFlightGuard::register(self, request_id, &context);

        let handler = Arc::clone(&loaded.handler);
        let lambda_context = context.lambda_context();
        let returned =
            std::panic::catch_unwind(AssertUnwindSafe(move || handler.call(event, lambda_context)));

        match returned {
            Ok(HandlerReturn::Immediate) => {}
            Ok(HandlerReturn::Deferred(future)) if loaded.runtime.supports_deferred() => {
                let deferred_context = context.clone();
                tokio::spawn(async move {
                    let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(result) => InvocationOutcome::from(result),
                        Err(panic) => InvocationOutcome::Failure(
                            HandlerError::new(panic_message(panic.as_ref()))
                                .with_type(HANDLER_ASYNC_FAILURE),
                        ),
                    };
                    deferred_context.complete(outcome);
                });
            }
            Ok(HandlerReturn::Deferred(_)) => {
                tracing::debug!(
                    function = %function.name,
                    runtime = loaded.runtime.as_str(),
                    "runtime completes through callbacks only; deferred result ignored"
                );
            }
            Err(panic) => {
                context.complete(InvocationOutcome::Failure(
                    HandlerError::new(panic_message(panic.as_ref())).with_type(HANDLER_THROW),
                ));
            }
        }

        let outcome = receiver.await.unwrap_or_else(|_| {
            InvocationOutcome::Failure(HandlerError::new("invocation ended without an outcome"))
        });

        if let Some(metrics) = &self.options.metrics {
            metrics.record_invocation(
                &function.name,
                outcome.label(),
                context.elapsed().as_secs_f64(),
            );
        }
        if let InvocationOutcome::Failure(err) = &outcome {
            lambda_offline_telemetry::log_handler_failed!(
                request_id = %request_id,
                function = %function.name,
                error_type = %err.error_type,
                error = %err.message,
                "handler failed"
            );
        }

        Ok(outcome)
    }
}

/// Keeps an invocation in the in-flight table until it is dropped.
///
/// Dropped when `invoke` returns or when its future is cancelled, e.g. by a
/// client disconnect.
struct InFlightGuard<'a> {
    invoker: &'a Invoker,
    request_id: &'a str,
}

impl<'a> InFlightGuard<'a> {
    fn register(invoker: &'a Invoker, request_id: &'a str, context: &InvocationContext) -> Self {
        invoker
            .in_flight
            .insert(request_id.to_string(), context.clone());
        if let Some(metrics) = &invoker.options.metrics {
            metrics.invocation_started();
        }
        Self {
            invoker,
            request_id,
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.invoker.in_flight.remove(self.request_id);
        if let Some(metrics) = &self.invoker.options.metrics {
            metrics.invocation_finished();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LambdaContext;
    use crate::handler::async_handler;
    use lambda_offline_config::{MockConfig, MockError};
    use serde_json::json;
    use std::time::Duration;

    fn function(handler: &str, runtime: &str, timeout_ms: u64) -> Arc<FunctionSpec> {
        Arc::new(FunctionSpec {
            name: handler.into(),
            handler: handler.into(),
            timeout: Duration::from_millis(timeout_ms),
            runtime: runtime.into(),
            memory_size: 1024,
            mock: None,
        })
    }

    fn mock(config: MockConfig, timeout_ms: u64) -> Arc<FunctionSpec> {
        let mut spec = (*function("mocked", "mock", timeout_ms)).clone();
        spec.mock = Some(config);
        Arc::new(spec)
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .with("hello", |_: Value, ctx: LambdaContext| {
                ctx.succeed(json!({"msg": "hi"}));
                HandlerReturn::Immediate
            })
            .with("twice", |_: Value, ctx: LambdaContext| {
                ctx.succeed("first");
                ctx.succeed("second");
                HandlerReturn::Immediate
            })
            .with("never", |_: Value, _: LambdaContext| HandlerReturn::Immediate)
            .with("panics", |_: Value, _: LambdaContext| -> HandlerReturn {
                panic!("kaboom")
            })
            .with(
                "deferred",
                async_handler(|event: Value, _: LambdaContext| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!({"echo": event}))
                }),
            )
            .with(
                "deferred_error",
                async_handler(|_: Value, _: LambdaContext| async move {
                    Err(HandlerError::new("nope").with_type("ValidationError"))
                }),
            )
            .with(
                "deferred_panic",
                async_handler(|_: Value, _: LambdaContext| async move {
                    if true {
                        panic!("async kaboom");
                    }
                    Ok(Value::Null)
                }),
            )
    }

    fn invoker() -> Invoker {
        Invoker::new(registry(), InvokerOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn callback_success() {
        let invoker = invoker();
        let outcome = invoker
            .invoke(&function("hello", "rust", 1000), json!({}), "r1")
            .await
            .unwrap();
        assert_eq!(outcome, InvocationOutcome::Success(json!({"msg": "hi"})));
        assert_eq!(invoker.in_flight(), 0);
        assert_eq!(invoker.current_request().as_deref(), Some("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn double_completion_keeps_first() {
        let outcome = invoker()
            .invoke(&function("twice", "rust", 1000), json!({}), "r1")
            .await
            .unwrap();
        assert_eq!(outcome, InvocationOutcome::Success(json!("first")));
    }

    #[tokio::test(start_paused = true)]
    async fn never_completing_handler_times_out() {
        let invoker = invoker();
        let outcome = invoker
            .invoke(&function("never", "rust", 1000), json!({}), "r1")
            .await
            .unwrap();
        assert_eq!(outcome, InvocationOutcome::TimedOut);
        assert_eq!(invoker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_entry_exists_while_pending() {
        let invoker = Arc::new(invoker());
        let task = {
            let invoker = Arc::clone(&invoker);
            tokio::spawn(async move {
                invoker
                    .invoke(&function("never", "rust", 1000), json!({}), "r1")
                    .await
            })
        };
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(invoker.in_flight(), 1);
        assert!(invoker.context("r1").is_some());

        assert_eq!(task.await.unwrap().unwrap(), InvocationOutcome::TimedOut);
        assert_eq!(invoker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_invocation_leaves_no_entry() {
        let metrics = Arc::new(MetricsRegistry::new());
        let invoker = Arc::new(invoker().with_metrics(Arc::clone(&metrics)));
        let task = {
            let invoker = Arc::clone(&invoker);
            tokio::spawn(async move {
                invoker
                    .invoke(&function("deferred", "rust", 1000), json!({}), "r1")
                    .await
            })
        };
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(invoker.in_flight(), 1);
        assert_eq!(metrics.invocations_in_flight.get(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(invoker.in_flight(), 0);
        assert!(invoker.context("r1").is_none());
        assert_eq!(metrics.invocations_in_flight.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_panic_is_a_failure() {
        let outcome = invoker()
            .invoke(&function("panics", "rust", 1000), json!({}), "r1")
            .await
            .unwrap();
        match outcome {
            InvocationOutcome::Failure(err) => {
                assert_eq!(err.error_type, HANDLER_THROW);
                assert_eq!(err.message, "kaboom");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_results() {
        let invoker = invoker();
        let ok = invoker
            .invoke(&function("deferred", "rust", 1000), json!(7), "r1")
            .await
            .unwrap();
        assert_eq!(ok, InvocationOutcome::Success(json!({"echo": 7})));

        let err = invoker
            .invoke(&function("deferred_error", "rust", 1000), json!({}), "r2")
            .await
            .unwrap();
        assert_eq!(
            err,
            InvocationOutcome::Failure(HandlerError::new("nope").with_type("ValidationError"))
        );

        match invoker
            .invoke(&function("deferred_panic", "rust", 1000), json!({}), "r3")
            .await
            .unwrap()
        {
            InvocationOutcome::Failure(err) => {
                assert_eq!(err.error_type, HANDLER_ASYNC_FAILURE);
                assert_eq!(err.message, "async kaboom");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_slower_than_timeout() {
        let outcome = invoker()
            .invoke(&function("deferred", "rust", 10), json!({}), "r1")
            .await
            .unwrap();
        assert_eq!(outcome, InvocationOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn mock_runtime_behaviours() {
        let invoker = invoker();

        let result = MockConfig {
            result: Some(json!({"ok": true})),
            delay_ms: 20,
            ..Default::default()
        };
        assert_eq!(
            invoker.invoke(&mock(result, 1000), json!({}), "m1").await.unwrap(),
            InvocationOutcome::Success(json!({"ok": true}))
        );

        let echo = MockConfig {
            echo: true,
            ..Default::default()
        };
        assert_eq!(
            invoker.invoke(&mock(echo, 1000), json!({"in": 1}), "m2").await.unwrap(),
            InvocationOutcome::Success(json!({"in": 1}))
        );

        let error = MockConfig {
            error: Some(MockError {
                message: "Not Found: id=5".into(),
                error_type: "Error".into(),
            }),
            ..Default::default()
        };
        assert_eq!(
            invoker.invoke(&mock(error, 1000), json!({}), "m3").await.unwrap(),
            InvocationOutcome::Failure(HandlerError::new("Not Found: id=5"))
        );

        let hang = MockConfig {
            hang: true,
            ..Default::default()
        };
        assert_eq!(
            invoker.invoke(&mock(hang, 1000), json!({}), "m4").await.unwrap(),
            InvocationOutcome::TimedOut
        );
    }

    #[tokio::test(start_paused = true)]
    async fn load_errors_run_no_handler() {
        let invoker = invoker();
        let err = invoker
            .invoke(&function("missing", "rust", 1000), json!({}), "r1")
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerLoadError::NotRegistered { .. }));
        assert_eq!(invoker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_are_recorded() {
        let metrics = Arc::new(MetricsRegistry::new());
        let invoker = invoker().with_metrics(Arc::clone(&metrics));
        invoker
            .invoke(&function("twice", "rust", 1000), json!({}), "r1")
            .await
            .unwrap();
        let labels = lambda_offline_telemetry::metrics::InvocationLabels {
            function: "twice".into(),
            outcome: "success".into(),
        };
        assert_eq!(metrics.invocations_total.get_or_create(&labels).get(), 1);
        assert_eq!(metrics.invocations_in_flight.get(), 0);
    }
}
