//! Attaches a probe to a request's lifecycle.
//!
//! Attachment records the start timestamp, emits the start record and
//! registers two completion hooks: one for the end of the response body and
//! one for the end of the request/response cycle. Both hooks freeze the
//! request's age, so observers running later on a background thread still
//! see the duration as of completion.
//!
//! Hook registration is retried a bounded number of times (see
//! [`HookRetryPolicy`]); failures are logged and never reach the caller.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use reqprobe_core::{
    Completion, CompletionHooks, EventRecord, Hook, HookError, Operation, RequestContext,
};
use tracing::{debug, warn};

use crate::config::HookRetryPolicy;
use crate::probe::Probe;

/// The two completion points a probe hooks into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    /// Response body fully written.
    BodyEnd,
    /// Request/response cycle finished, successfully or not.
    End,
}

impl HookStage {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::BodyEnd => "body-end",
            Self::End => "end",
        }
    }

    fn register(self, hooks: &dyn CompletionHooks, hook: Hook) -> Result<(), HookError> {
        match self {
            Self::BodyEnd => hooks.add_body_end_hook(hook),
            Self::End => hooks.add_end_hook(hook),
        }
    }
}

/// Starts observing `ctx` as a request for `op` through `probe`.
///
/// The start timestamp is recorded before the start record is emitted.
/// Hooks hold the context weakly; a context dropped before completion emits
/// nothing further.
pub fn attach_to<O: Operation>(probe: &Probe<O>, ctx: &Arc<RequestContext>, op: O) {
    if !ctx.timing().mark_start(ctx.now_ms()) {
        debug!(op = %op.logging_name(), "request start already recorded; keeping the first");
    }
    probe.on_start_request(op, ctx);

    let body_end: Hook = {
        let probe = probe.clone();
        let weak = Arc::downgrade(ctx);
        Arc::new(move |completion: &Completion| {
            if let Some(ctx) = weak.upgrade() {
                freeze_age(&ctx);
                probe.on_after_send_response(op, &ctx, completion.status);
            }
        })
    };
    let end: Hook = {
        let probe = probe.clone();
        let weak = Arc::downgrade(ctx);
        Arc::new(move |completion: &Completion| {
            if let Some(ctx) = weak.upgrade() {
                freeze_age(&ctx);
                if let Some(error) = &completion.error {
                    probe.dispatch(EventRecord::Failure {
                        op,
                        ctx: Arc::clone(&ctx),
                        error: Arc::clone(error),
                    });
                }
                probe.on_response_completed(op, &ctx, completion.status);
            }
        })
    };

    let policy = probe.hook_retry();
    register_with_retry(ctx, HookStage::BodyEnd, body_end, policy);
    register_with_retry(ctx, HookStage::End, end, policy);
}

/// Age of the request: the frozen age once completed, otherwise the time
/// since start. Zero if the request was never attached.
#[must_use]
pub fn duration_of(ctx: &RequestContext) -> Duration {
    let timing = ctx.timing();
    timing
        .frozen_age()
        .unwrap_or_else(|| timing.elapsed_at(ctx.now_ms()))
}

/// Fixes the request's age at the current time unless already fixed.
pub fn freeze_age(ctx: &RequestContext) -> Duration {
    ctx.timing().freeze(ctx.now_ms())
}

fn register_with_retry(
    ctx: &Arc<RequestContext>,
    stage: HookStage,
    hook: Hook,
    policy: HookRetryPolicy,
) {
    let Err(err) = stage.register(ctx.hooks(), Arc::clone(&hook)) else {
        return;
    };
    if !policy.enabled || !err.is_transient() {
        warn!(stage = stage.name(), error = %err, "completion hook not registered");
        return;
    }

    if policy.synchronized_retry {
        thread::yield_now();
        match ctx.synchronized(|| stage.register(ctx.hooks(), Arc::clone(&hook))) {
            Ok(()) => {
                debug!(stage = stage.name(), "completion hook registered on synchronized retry");
                return;
            }
            Err(err) if !err.is_transient() => {
                warn!(stage = stage.name(), error = %err, "completion hook not registered");
                return;
            }
            Err(err) => {
                debug!(stage = stage.name(), error = %err, "synchronized retry failed");
            }
        }
    }

    if policy.executor_retry {
        let weak: Weak<RequestContext> = Arc::downgrade(ctx);
        ctx.hooks().execute(Box::new(move || {
            let Some(ctx) = weak.upgrade() else {
                return;
            };
            if let Err(err) = stage.register(ctx.hooks(), hook) {
                warn!(
                    stage = stage.name(),
                    error = %err,
                    "completion hook not registered after retries; giving up"
                );
            }
        }));
        return;
    }

    warn!(stage = stage.name(), "completion hook not registered after retries; giving up");
}
