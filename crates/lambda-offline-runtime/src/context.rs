//! Per-invocation state machine.
//!
//! An [`InvocationContext`] starts `Pending` and reaches exactly one terminal
//! state. Completion and the timeout timer race under the state mutex; the
//! first to arrive delivers the outcome and every later completion attempt is
//! a logged no-op.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lambda_offline_config::FunctionSpec;
use lambda_offline_telemetry::MetricsRegistry;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::HandlerError;
use crate::outcome::InvocationOutcome;

/// The id of the most recently started request.
///
/// A timer only fires while its request is still the most recent one.
#[derive(Debug, Clone, Default)]
pub struct CurrentRequest(Arc<RwLock<Option<String>>>);

impl CurrentRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, request_id: &str) {
        *self.0.write() = Some(request_id.to_string());
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().clone()
    }

    pub fn is(&self, request_id: &str) -> bool {
        self.0.read().as_deref() == Some(request_id)
    }
}

/// Shared settings for every context created by one invoker.
#[derive(Clone, Default)]
pub struct ContextOptions {
    /// Arm a timer per invocation.
    pub timeouts_enabled: bool,
    /// Region used in the function ARN.
    pub region: String,
    pub current: CurrentRequest,
    pub metrics: Option<Arc<MetricsRegistry>>,
}

/// Observable state of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Pending,
    Completed,
    TimedOut,
}

enum State {
    Pending {
        sender: oneshot::Sender<InvocationOutcome>,
        timer: Option<JoinHandle<()>>,
    },
    Completed,
    TimedOut,
}

struct Inner {
    request_id: String,
    function: Arc<FunctionSpec>,
    region: String,
    started: Instant,
    current: CurrentRequest,
    metrics: Option<Arc<MetricsRegistry>>,
    state: Mutex<State>,
    extra_completions: AtomicUsize,
}

/// The lifecycle of one invocation.
#[derive(Clone)]
pub struct InvocationContext {
    inner: Arc<Inner>,
}

/// Receives the single outcome of an invocation.
pub type OutcomeReceiver = oneshot::Receiver<InvocationOutcome>;

impl InvocationContext {
    /// Create a pending context and, when timeouts are enabled, arm its timer.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        function: Arc<FunctionSpec>,
        request_id: impl Into<String>,
        options: &ContextOptions,
    ) -> (Self, OutcomeReceiver) {
        let (sender, receiver) = oneshot::channel();
        let context = Self {
            inner: Arc::new(Inner {
                request_id: request_id.into(),
                function,
                region: options.region.clone(),
                started: Instant::now(),
                current: options.current.clone(),
                metrics: options.metrics.clone(),
                state: Mutex::new(State::Pending {
                    sender,
                    timer: None,
                }),
                extra_completions: AtomicUsize::new(0),
            }),
        };

        if options.timeouts_enabled {
            context.arm_timer();
        }

        (context, receiver)
    }

    fn arm_timer(&self) {
        let timeout = self.inner.function.timeout;
        let timer_context = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer_context.expire();
        });

        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Pending { timer, .. } => *timer = Some(handle),
            // completed before the handle was stored
            _ => handle.abort(),
        }
    }

    /// Timer callback.
    fn expire(&self) {
        let request_id = &self.inner.request_id;
        if !self.inner.current.is(request_id) {
            tracing::debug!(
                request_id = %request_id,
                function = %self.inner.function.name,
                "timer of a superseded request ignored"
            );
            return;
        }

        let mut state = self.inner.state.lock();
        if !matches!(*state, State::Pending { .. }) {
            return;
        }
        if let State::Pending { sender, .. } = std::mem::replace(&mut *state, State::TimedOut) {
            drop(state);
            let timeout_ms = self.inner.function.timeout.as_millis() as u64;
            lambda_offline_telemetry::log_invocation_timed_out!(
                request_id = %request_id,
                function = %self.inner.function.name,
                timeout_ms = timeout_ms,
                "invocation timed out"
            );
            let _ = sender.send(InvocationOutcome::TimedOut);
        }
    }

    /// Deliver an outcome. Returns `false` (and logs a warning) if the
    /// invocation was already terminal.
    pub fn complete(&self, outcome: InvocationOutcome) -> bool {
        let mut state = self.inner.state.lock();
        match std::mem::replace(&mut *state, State::Completed) {
            State::Pending { sender, timer } => {
                drop(state);
                if let Some(timer) = timer {
                    timer.abort();
                }
                let _ = sender.send(outcome);
                true
            }
            previous => {
                *state = previous;
                drop(state);
                self.extra_completion(&outcome);
                false
            }
        }
    }

    fn extra_completion(&self, outcome: &InvocationOutcome) {
        self.inner.extra_completions.fetch_add(1, Ordering::Relaxed);
        lambda_offline_telemetry::log_double_completion!(
            request_id = %self.inner.request_id,
            function = %self.inner.function.name,
            outcome = outcome.label(),
            "handler completed an invocation that already has an outcome"
        );
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_double_completion(&self.inner.function.name);
        }
    }

    pub fn state(&self) -> InvocationState {
        match *self.inner.state.lock() {
            State::Pending { .. } => InvocationState::Pending,
            State::Completed => InvocationState::Completed,
            State::TimedOut => InvocationState::TimedOut,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn function(&self) -> &Arc<FunctionSpec> {
        &self.inner.function
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Completion attempts made after the invocation became terminal.
    pub fn extra_completions(&self) -> usize {
        self.inner.extra_completions.load(Ordering::Relaxed)
    }

    /// The handler-facing view of this context.
    pub fn lambda_context(&self) -> LambdaContext {
        LambdaContext {
            invocation: self.clone(),
        }
    }
}

/// The context object handed to handler code.
#[derive(Clone)]
pub struct LambdaContext {
    invocation: InvocationContext,
}

impl LambdaContext {
    pub fn succeed(&self, value: impl Into<Value>) {
        self.invocation
            .complete(InvocationOutcome::Success(value.into()));
    }

    pub fn fail(&self, error: impl Into<HandlerError>) {
        self.invocation
            .complete(InvocationOutcome::Failure(error.into()));
    }

    /// `succeed` or `fail` depending on the result.
    pub fn done(&self, result: Result<Value, HandlerError>) {
        self.invocation.complete(result.into());
    }

    /// Time left before the configured timeout, saturating at zero.
    pub fn remaining_time_in_millis(&self) -> u64 {
        let inner = &self.invocation.inner;
        inner
            .function
            .timeout
            .saturating_sub(inner.started.elapsed())
            .as_millis() as u64
    }

    pub fn function_name(&self) -> &str {
        &self.invocation.inner.function.name
    }

    pub fn function_version(&self) -> &str {
        "$LATEST"
    }

    pub fn memory_limit_in_mb(&self) -> u32 {
        self.invocation.inner.function.memory_size
    }

    pub fn aws_request_id(&self) -> &str {
        &self.invocation.inner.request_id
    }

    pub fn invoked_function_arn(&self) -> String {
        format!(
            "arn:aws:lambda:{}:offline:function:{}",
            self.invocation.inner.region,
            self.function_name()
        )
    }

    pub fn log_group_name(&self) -> String {
        format!("/aws/lambda/{}", self.function_name())
    }

    pub fn log_stream_name(&self) -> String {
        format!(
            "{}/[$LATEST]{}",
            chrono::Utc::now().format("%Y/%m/%d"),
            self.aws_request_id().replace('-', "")
        )
    }
}
