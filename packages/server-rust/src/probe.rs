//! The `Probe` handle: the runtime surface through which request-processing
//! code emits lifecycle records.
//!
//! A probe is cheap to clone and is passed explicitly to whatever needs it.
//! It delivers either on the caller's thread or through an
//! [`AsyncDispatcher`], and degenerates to a no-op when nothing observes it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use reqprobe_core::{EventRecord, MetricValue, Observer, Operation, Payload, RequestContext};

use crate::config::{HookRetryPolicy, ProbeConfig};
use crate::dispatch::{AsyncDispatcher, DeliveryState, Dispatcher};
use crate::lifecycle;

enum ProbeInner<O: Operation> {
    Noop,
    Sync(Arc<Dispatcher<O>>),
    Async(Arc<AsyncDispatcher<O>>),
}

impl<O: Operation> Clone for ProbeInner<O> {
    fn clone(&self) -> Self {
        match self {
            Self::Noop => Self::Noop,
            Self::Sync(dispatcher) => Self::Sync(Arc::clone(dispatcher)),
            Self::Async(dispatcher) => Self::Async(Arc::clone(dispatcher)),
        }
    }
}

/// Handle for emitting lifecycle records to a fixed set of observers.
#[derive(Clone)]
pub struct Probe<O: Operation> {
    inner: ProbeInner<O>,
    hook_retry: HookRetryPolicy,
}

impl<O: Operation> Probe<O> {
    /// A probe that drops everything.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            inner: ProbeInner::Noop,
            hook_retry: HookRetryPolicy::default(),
        }
    }

    /// A synchronous probe over `observers`, or a no-op probe if there are none.
    #[must_use]
    pub fn from_observers(observers: impl IntoIterator<Item = Arc<dyn Observer<O>>>) -> Self {
        let dispatcher = Dispatcher::new(observers);
        if dispatcher.is_empty() {
            return Self::noop();
        }
        Self {
            inner: ProbeInner::Sync(Arc::new(dispatcher)),
            hook_retry: HookRetryPolicy::default(),
        }
    }

    /// Moves delivery onto a background thread with default settings.
    #[must_use]
    pub fn into_async(self) -> Self {
        self.into_async_with(&ProbeConfig::default())
    }

    /// Moves delivery onto a background thread configured by `config`.
    ///
    /// No-op and already asynchronous probes are returned unchanged.
    #[must_use]
    pub fn into_async_with(self, config: &ProbeConfig) -> Self {
        match self.inner {
            ProbeInner::Sync(dispatcher) => Self {
                inner: ProbeInner::Async(Arc::new(AsyncDispatcher::with_config(dispatcher, config))),
                hook_retry: self.hook_retry,
            },
            inner @ (ProbeInner::Noop | ProbeInner::Async(_)) => Self {
                inner,
                hook_retry: self.hook_retry,
            },
        }
    }

    #[must_use]
    pub fn with_hook_retry(mut self, policy: HookRetryPolicy) -> Self {
        self.hook_retry = policy;
        self
    }

    #[must_use]
    pub fn hook_retry(&self) -> HookRetryPolicy {
        self.hook_retry
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self.inner, ProbeInner::Noop)
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.inner, ProbeInner::Async(_))
    }

    /// State of the background thread, for asynchronous probes.
    #[must_use]
    pub fn delivery_state(&self) -> Option<DeliveryState> {
        match &self.inner {
            ProbeInner::Async(dispatcher) => Some(dispatcher.state()),
            ProbeInner::Noop | ProbeInner::Sync(_) => None,
        }
    }

    /// Delivers a prebuilt record.
    pub fn dispatch(&self, record: EventRecord<O>) {
        match &self.inner {
            ProbeInner::Noop => {}
            ProbeInner::Sync(dispatcher) => dispatcher.dispatch(&record),
            ProbeInner::Async(dispatcher) => dispatcher.push(record),
        }
    }

    /// Builds and delivers a record, skipping construction for no-op probes.
    fn emit(&self, record: impl FnOnce() -> EventRecord<O>) {
        if !self.is_noop() {
            self.dispatch(record());
        }
    }

    pub fn on_startup(&self) {
        self.emit(|| EventRecord::Startup);
    }

    pub fn on_shutdown(&self) {
        self.emit(|| EventRecord::Shutdown);
    }

    pub fn on_launched(&self, unit: impl Into<String>, message: impl Into<String>) {
        self.emit(|| EventRecord::Launched {
            unit: unit.into(),
            message: message.into(),
        });
    }

    pub fn on_launch_failure(
        &self,
        unit: impl Into<String>,
        options: serde_json::Value,
        error: impl Into<anyhow::Error>,
    ) {
        self.emit(|| EventRecord::LaunchFailed {
            unit: unit.into(),
            options,
            error: Arc::new(error.into()),
        });
    }

    pub fn on_start_request(&self, op: O, ctx: &Arc<RequestContext>) {
        self.emit(|| EventRecord::RequestStarted {
            op,
            ctx: Arc::clone(ctx),
        });
    }

    pub fn on_enter_handler(&self, op: O, ctx: &Arc<RequestContext>, handler: &'static str) {
        self.emit(|| EventRecord::HandlerEntered {
            op,
            ctx: Arc::clone(ctx),
            handler,
        });
    }

    /// Reports raw inbound bytes. The record keeps its own copy of `buffer`.
    pub fn on_before_payload_read(
        &self,
        op: O,
        ctx: &Arc<RequestContext>,
        handler: &'static str,
        buffer: &[u8],
    ) {
        self.emit(|| EventRecord::payload_read_before(op, Arc::clone(ctx), handler, buffer));
    }

    /// Like [`on_before_payload_read`](Self::on_before_payload_read) for a
    /// buffer that is already immutable and shared.
    pub fn on_before_payload_read_shared(
        &self,
        op: O,
        ctx: &Arc<RequestContext>,
        handler: &'static str,
        buffer: Bytes,
    ) {
        self.emit(|| EventRecord::PayloadReadBefore {
            op,
            ctx: Arc::clone(ctx),
            handler,
            buffer,
        });
    }

    pub fn on_after_payload_read(
        &self,
        op: O,
        ctx: &Arc<RequestContext>,
        handler: &'static str,
        payload: Option<Payload>,
    ) {
        self.emit(|| EventRecord::PayloadReadAfter {
            op,
            ctx: Arc::clone(ctx),
            handler,
            payload,
        });
    }

    pub fn on_before_send_response(&self, op: O, ctx: &Arc<RequestContext>, payload: Option<Payload>) {
        self.emit(|| EventRecord::ResponseSendBefore {
            op,
            ctx: Arc::clone(ctx),
            payload,
        });
    }

    pub fn on_after_send_response(&self, op: O, ctx: &Arc<RequestContext>, status: StatusCode) {
        self.emit(|| EventRecord::ResponseSendAfter {
            op,
            ctx: Arc::clone(ctx),
            status,
        });
    }

    pub fn on_response_completed(&self, op: O, ctx: &Arc<RequestContext>, status: StatusCode) {
        self.emit(|| EventRecord::ResponseCompleted {
            op,
            ctx: Arc::clone(ctx),
            status,
        });
    }

    pub fn on_failure(&self, op: O, ctx: &Arc<RequestContext>, error: impl Into<anyhow::Error>) {
        self.emit(|| EventRecord::Failure {
            op,
            ctx: Arc::clone(ctx),
            error: Arc::new(error.into()),
        });
    }

    pub fn on_non_operation_failure(&self, message: impl Into<String>, error: impl Into<anyhow::Error>) {
        self.emit(|| EventRecord::NonOperationFailure {
            message: message.into(),
            error: Arc::new(error.into()),
        });
    }

    pub fn on_metric(
        &self,
        op: O,
        ctx: &Arc<RequestContext>,
        name: impl Into<String>,
        value: impl Into<MetricValue>,
    ) {
        self.emit(|| EventRecord::Metric {
            op,
            ctx: Arc::clone(ctx),
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn on_event(&self, op: Option<O>, name: impl Into<String>, payload: Option<Payload>) {
        self.emit(|| EventRecord::Event {
            op,
            name: name.into(),
            payload,
        });
    }

    /// Starts observing `ctx` as a request for `op`.
    ///
    /// See [`lifecycle::attach_to`].
    pub fn attach_to(&self, ctx: &Arc<RequestContext>, op: O) {
        lifecycle::attach_to(self, ctx, op);
    }

    /// Age of the request behind `ctx`; frozen once the response completes.
    #[must_use]
    pub fn duration_of(ctx: &RequestContext) -> Duration {
        lifecycle::duration_of(ctx)
    }

    /// Awaits `fut`, reporting an error result as a failure of `op`.
    ///
    /// The result is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns whatever error `fut` resolves to.
    pub async fn listen<T, E, F>(&self, op: O, ctx: &Arc<RequestContext>, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let result = fut.await;
        if let Err(err) = &result {
            self.on_failure(op, ctx, anyhow::Error::msg(err.to_string()));
        }
        result
    }

    /// Awaits `fut`, reporting an error result as a non-operation failure
    /// described by `message`.
    ///
    /// # Errors
    ///
    /// Returns whatever error `fut` resolves to.
    pub async fn listen_non_operation<T, E, F>(&self, message: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let result = fut.await;
        if let Err(err) = &result {
            self.on_non_operation_failure(message, anyhow::Error::msg(err.to_string()));
        }
        result
    }

    /// Stops background delivery, then asks every observer to shut down.
    ///
    /// Returns `true` if anything was actually stopped; a second call
    /// returns `false` unless an observer reports otherwise.
    pub fn shutdown(&self) -> bool {
        match &self.inner {
            ProbeInner::Noop => false,
            ProbeInner::Sync(dispatcher) => dispatcher.shutdown(),
            ProbeInner::Async(dispatcher) => {
                let stopped = dispatcher.shutdown();
                dispatcher.delegate().shutdown() | stopped
            }
        }
    }
}

impl<O: Operation> Default for Probe<O> {
    fn default() -> Self {
        Self::noop()
    }
}

impl<O: Operation> fmt::Debug for Probe<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mode, observers) = match &self.inner {
            ProbeInner::Noop => ("noop", 0),
            ProbeInner::Sync(dispatcher) => ("sync", dispatcher.len()),
            ProbeInner::Async(dispatcher) => ("async", dispatcher.delegate().len()),
        };
        f.debug_struct("Probe")
            .field("mode", &mode)
            .field("observers", &observers)
            .field("hook_retry", &self.hook_retry)
            .finish()
    }
}
