//! Per-request context observed by the probe pipeline.
//!
//! A [`RequestContext`] is created by the host for every request it
//! processes. It carries identifying information for observers, the two
//! write-once timing slots used to compute request age, and a
//! [`CompletionHooks`] registrar through which the lifecycle attachment learns
//! when the response finishes.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::{Method, StatusCode};
use parking_lot::Mutex;

use crate::clock::{ClockSource, SystemClock};
use crate::event::SharedError;

/// Callback fired when a response stage completes.
pub type Hook = Arc<dyn Fn(&Completion) + Send + Sync>;

/// Outcome handed to completion hooks.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Final response status.
    pub status: StatusCode,
    /// Set when the request cycle ended with an error.
    pub error: Option<SharedError>,
}

impl Completion {
    #[must_use]
    pub fn ok(status: StatusCode) -> Self {
        Self {
            status,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: Some(Arc::new(error.into())),
        }
    }
}

/// Errors returned when registering a completion hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The host refused the registration; trying again may succeed.
    #[error("hook registration rejected: {reason}")]
    Rejected { reason: String },
    /// The stage the hook targets has already fired.
    #[error("request context already completed")]
    Completed,
}

impl HookError {
    /// Whether a retry has any chance of succeeding.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Host-side registrar for response completion callbacks.
///
/// Implemented by adapters over the host's request type. [`HookList`] is the
/// in-process default.
pub trait CompletionHooks: Send + Sync {
    /// Registers a hook fired once the response body has been written.
    ///
    /// # Errors
    ///
    /// Returns [`HookError`] if the host refuses the registration.
    fn add_body_end_hook(&self, hook: Hook) -> Result<(), HookError>;

    /// Registers a hook fired once the whole request/response cycle is done.
    ///
    /// # Errors
    ///
    /// Returns [`HookError`] if the host refuses the registration.
    fn add_end_hook(&self, hook: Hook) -> Result<(), HookError>;

    /// Runs `task` on the execution resource that owns the request.
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// In-process hook registrar: hooks are held until the host fires a stage.
///
/// Each stage fires at most once. Registering against a stage that already
/// fired returns [`HookError::Completed`].
pub struct HookList {
    body_end: Mutex<Option<Vec<Hook>>>,
    end: Mutex<Option<Vec<Hook>>>,
}

impl HookList {
    #[must_use]
    pub fn new() -> Self {
        Self {
            body_end: Mutex::new(Some(Vec::new())),
            end: Mutex::new(Some(Vec::new())),
        }
    }

    /// Fires body-end hooks. Returns `false` if they had already fired.
    pub fn fire_body_end(&self, status: StatusCode) -> bool {
        let hooks = self.body_end.lock().take();
        Self::fire(hooks, &Completion::ok(status))
    }

    /// Fires end hooks. Returns `false` if they had already fired.
    pub fn fire_end(&self, completion: &Completion) -> bool {
        let hooks = self.end.lock().take();
        Self::fire(hooks, completion)
    }

    fn fire(hooks: Option<Vec<Hook>>, completion: &Completion) -> bool {
        // Hooks run outside the lock so they may register further hooks.
        match hooks {
            Some(hooks) => {
                for hook in hooks {
                    hook(completion);
                }
                true
            }
            None => false,
        }
    }

    fn push(slot: &Mutex<Option<Vec<Hook>>>, hook: Hook) -> Result<(), HookError> {
        match slot.lock().as_mut() {
            Some(hooks) => {
                hooks.push(hook);
                Ok(())
            }
            None => Err(HookError::Completed),
        }
    }
}

impl Default for HookList {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionHooks for HookList {
    fn add_body_end_hook(&self, hook: Hook) -> Result<(), HookError> {
        Self::push(&self.body_end, hook)
    }

    fn add_end_hook(&self, hook: Hook) -> Result<(), HookError> {
        Self::push(&self.end, hook)
    }

    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Write-once timing slots attached to a request.
#[derive(Debug, Default)]
pub struct RequestTiming {
    start_ms: OnceLock<u64>,
    frozen_age: OnceLock<Duration>,
}

impl RequestTiming {
    /// Records the start timestamp. Returns `false` if one was already set.
    pub fn mark_start(&self, now_ms: u64) -> bool {
        self.start_ms.set(now_ms).is_ok()
    }

    #[must_use]
    pub fn start_ms(&self) -> Option<u64> {
        self.start_ms.get().copied()
    }

    #[must_use]
    pub fn frozen_age(&self) -> Option<Duration> {
        self.frozen_age.get().copied()
    }

    /// Elapsed time since start as of `now_ms`; zero when no start was recorded.
    #[must_use]
    pub fn elapsed_at(&self, now_ms: u64) -> Duration {
        self.start_ms()
            .map_or(Duration::ZERO, |start| {
                Duration::from_millis(now_ms.saturating_sub(start))
            })
    }

    /// Fixes the age at `now_ms` unless it was already fixed; returns the
    /// frozen value either way.
    pub fn freeze(&self, now_ms: u64) -> Duration {
        *self.frozen_age.get_or_init(|| self.elapsed_at(now_ms))
    }
}

/// Per-request context carrying identity and timing for observers.
pub struct RequestContext {
    request_id: Option<String>,
    method: Method,
    uri: String,
    remote_addr: Option<SocketAddr>,
    clock: Arc<dyn ClockSource>,
    hooks: Arc<dyn CompletionHooks>,
    timing: RequestTiming,
    monitor: Mutex<()>,
}

impl RequestContext {
    /// Context with a system clock and an unshared [`HookList`].
    #[must_use]
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self::builder(method, uri).build()
    }

    #[must_use]
    pub fn builder(method: Method, uri: impl Into<String>) -> RequestContextBuilder {
        RequestContextBuilder {
            request_id: None,
            method,
            uri: uri.into(),
            remote_addr: None,
            clock: None,
            hooks: None,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    #[must_use]
    pub fn timing(&self) -> &RequestTiming {
        &self.timing
    }

    #[must_use]
    pub fn hooks(&self) -> &dyn CompletionHooks {
        self.hooks.as_ref()
    }

    /// Current reading of this context's clock, in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now()
    }

    /// Runs `f` while holding the context's monitor.
    pub fn synchronized<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.monitor.lock();
        f()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("remote_addr", &self.remote_addr)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestContext`].
pub struct RequestContextBuilder {
    request_id: Option<String>,
    method: Method,
    uri: String,
    remote_addr: Option<SocketAddr>,
    clock: Option<Arc<dyn ClockSource>>,
    hooks: Option<Arc<dyn CompletionHooks>>,
}

impl RequestContextBuilder {
    #[must_use]
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Host adapter through which completion hooks are registered.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn CompletionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    #[must_use]
    pub fn build(self) -> RequestContext {
        RequestContext {
            request_id: self.request_id,
            method: self.method,
            uri: self.uri,
            remote_addr: self.remote_addr,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            hooks: self.hooks.unwrap_or_else(|| Arc::new(HookList::new())),
            timing: RequestTiming::default(),
            monitor: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn start_is_write_once() {
        let timing = RequestTiming::default();
        assert!(timing.start_ms().is_none());
        assert!(timing.mark_start(100));
        assert!(!timing.mark_start(200));
        assert_eq!(timing.start_ms(), Some(100));
    }

    #[test]
    fn elapsed_without_start_is_zero() {
        let timing = RequestTiming::default();
        assert_eq!(timing.elapsed_at(5_000), Duration::ZERO);
    }

    #[test]
    fn freeze_keeps_first_value() {
        let timing = RequestTiming::default();
        timing.mark_start(1_000);

        assert_eq!(timing.freeze(1_250), Duration::from_millis(250));
        assert_eq!(timing.freeze(9_999), Duration::from_millis(250));
        assert_eq!(timing.frozen_age(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn elapsed_saturates_when_clock_goes_backwards() {
        let timing = RequestTiming::default();
        timing.mark_start(1_000);
        assert_eq!(timing.elapsed_at(500), Duration::ZERO);
    }

    #[test]
    fn hook_list_fires_each_stage_once() {
        let hooks = HookList::new();
        let body_calls = Arc::new(AtomicUsize::new(0));
        let end_calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&body_calls);
        hooks
            .add_body_end_hook(Arc::new(move |c: &Completion| {
                assert_eq!(c.status, StatusCode::CREATED);
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        let counter = Arc::clone(&end_calls);
        hooks
            .add_end_hook(Arc::new(move |c: &Completion| {
                assert!(c.error.is_some());
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(hooks.fire_body_end(StatusCode::CREATED));
        assert!(!hooks.fire_body_end(StatusCode::CREATED));
        let completion = Completion::failed(
            StatusCode::INTERNAL_SERVER_ERROR,
            anyhow::anyhow!("handler blew up"),
        );
        assert!(hooks.fire_end(&completion));
        assert!(!hooks.fire_end(&completion));

        assert_eq!(body_calls.load(Ordering::SeqCst), 1);
        assert_eq!(end_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registering_after_fire_is_rejected_permanently() {
        let hooks = HookList::new();
        hooks.fire_end(&Completion::ok(StatusCode::OK));
        let err = hooks.add_end_hook(Arc::new(|_: &Completion| {})).unwrap_err();
        assert!(matches!(err, HookError::Completed));
        assert!(!err.is_transient());
        assert!(HookError::Rejected {
            reason: "index out of bounds".to_string()
        }
        .is_transient());
    }

    #[test]
    fn builder_defaults_and_overrides() {
        let clock = Arc::new(ManualClock::new(42));
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let ctx = RequestContext::builder(Method::PUT, "/pets/1")
            .request_id("req-1")
            .remote_addr(addr)
            .clock(clock.clone())
            .build();

        assert_eq!(ctx.request_id(), Some("req-1"));
        assert_eq!(ctx.method(), &Method::PUT);
        assert_eq!(ctx.uri(), "/pets/1");
        assert_eq!(ctx.remote_addr(), Some(addr));
        assert_eq!(ctx.now_ms(), 42);
        clock.advance(8);
        assert_eq!(ctx.now_ms(), 50);

        let plain = RequestContext::new(Method::GET, "/");
        assert!(plain.request_id().is_none());
        assert!(plain.now_ms() > 0);
    }

    proptest::proptest! {
        #[test]
        fn frozen_age_never_changes(start in 0_u64..1_000_000, first in 0_u64..1_000_000, later in 0_u64..1_000_000) {
            let timing = RequestTiming::default();
            timing.mark_start(start);
            let frozen = timing.freeze(start + first);
            proptest::prop_assert_eq!(frozen, Duration::from_millis(first));
            proptest::prop_assert_eq!(timing.freeze(start + first + later), frozen);
        }
    }

    #[test]
    fn synchronized_returns_closure_value() {
        let ctx = RequestContext::new(Method::GET, "/");
        assert_eq!(ctx.synchronized(|| 7), 7);
    }

    #[test]
    fn debug_output_names_the_request() {
        let ctx = RequestContext::builder(Method::GET, "/health")
            .request_id("abc")
            .build();
        let rendered = format!("{ctx:?}");
        assert!(rendered.contains("/health"));
        assert!(rendered.contains("abc"));
    }
}
