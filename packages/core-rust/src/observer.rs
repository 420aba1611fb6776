//! Observer contract for request-lifecycle events.
//!
//! Defines [`Observer`], the capability interface every event sink
//! implements. Every callback has a no-op default, so implementations only
//! override the events they care about. Multiple observers are sequenced by
//! [`Observer::ordinal`], lowest first.

use std::cmp::Ordering;

use bytes::Bytes;
use http::StatusCode;

use crate::context::RequestContext;
use crate::event::{MetricValue, Payload};
use crate::operation::Operation;

/// Ordinal reserved for observers that must run after every other one.
pub const CATCH_ALL_ORDINAL: i32 = i32::MAX;

/// Receiver of request-lifecycle callbacks.
///
/// Used as `Arc<dyn Observer<O>>`. Callbacks may run on the request thread
/// (synchronous delivery) or on a dispatcher-owned background thread
/// (asynchronous delivery); they must not assume either.
#[allow(unused_variables)]
pub trait Observer<O: Operation>: Send + Sync {
    /// The hosting process started.
    fn on_startup(&self) {}

    /// The hosting process is shutting down.
    fn on_shutdown(&self) {}

    /// A unit of work was launched; `message` is the host's launch identifier.
    fn on_launched(&self, unit: &str, message: &str) {}

    /// A unit of work failed to launch with the given options.
    fn on_launch_failure(&self, unit: &str, options: &serde_json::Value, error: &anyhow::Error) {}

    /// A request for `op` was first seen.
    fn on_start_request(&self, op: O, ctx: &RequestContext) {}

    /// The request entered the named handler stage.
    fn on_enter_handler(&self, op: O, ctx: &RequestContext, handler: &'static str) {}

    /// Raw inbound bytes are about to be decoded.
    fn on_before_payload_read(
        &self,
        op: O,
        ctx: &RequestContext,
        handler: &'static str,
        buffer: &Bytes,
    ) {
    }

    /// Inbound bytes were decoded; `payload` is `None` for empty bodies.
    fn on_after_payload_read(
        &self,
        op: O,
        ctx: &RequestContext,
        handler: &'static str,
        payload: Option<&Payload>,
    ) {
    }

    /// A response is about to be encoded and sent.
    fn on_before_send_response(&self, op: O, ctx: &RequestContext, payload: Option<&Payload>) {}

    /// The response body finished sending.
    fn on_after_send_response(&self, op: O, ctx: &RequestContext, status: StatusCode) {}

    /// The whole request/response cycle is done.
    fn on_response_completed(&self, op: O, ctx: &RequestContext, status: StatusCode) {}

    /// Processing `op` failed.
    fn on_failure(&self, op: O, ctx: &RequestContext, error: &anyhow::Error) {}

    /// Something failed outside of any request.
    fn on_non_operation_failure(&self, message: &str, error: &anyhow::Error) {}

    /// A named numeric measurement was taken while processing `op`.
    fn on_metric(&self, op: O, ctx: &RequestContext, name: &str, value: MetricValue) {}

    /// A free-form named event.
    fn on_event(&self, op: Option<O>, name: &str, payload: Option<&Payload>) {}

    /// Sort key among sibling observers; lower runs first.
    fn ordinal(&self) -> i32 {
        0
    }

    /// Stops any background delivery owned by this observer.
    ///
    /// Returns `true` if something was actually stopped. Plain observers own
    /// nothing and keep the default.
    fn shutdown(&self) -> bool {
        false
    }
}

/// Orders observers by ordinal, ascending.
pub fn by_ordinal<O: Operation>(a: &dyn Observer<O>, b: &dyn Observer<O>) -> Ordering {
    a.ordinal().cmp(&b.ordinal())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Op;

    impl Operation for Op {
        fn name(&self) -> &'static str {
            "OP"
        }
    }

    struct Plain;
    impl Observer<Op> for Plain {}

    struct Late;
    impl Observer<Op> for Late {
        fn ordinal(&self) -> i32 {
            CATCH_ALL_ORDINAL
        }
    }

    struct Early;
    impl Observer<Op> for Early {
        fn ordinal(&self) -> i32 {
            -5
        }
    }

    #[test]
    fn default_ordinal_is_zero_and_shutdown_is_noop() {
        assert_eq!(Plain.ordinal(), 0);
        assert!(!Plain.shutdown());
    }

    #[test]
    fn default_callbacks_do_nothing() {
        let ctx = RequestContext::new(http::Method::GET, "/");
        let error = anyhow::anyhow!("boom");
        Plain.on_startup();
        Plain.on_start_request(Op, &ctx);
        Plain.on_failure(Op, &ctx, &error);
        Plain.on_response_completed(Op, &ctx, StatusCode::OK);
        Plain.on_event(None, "x", None);
    }

    #[test]
    fn by_ordinal_sorts_ascending() {
        let mut observers: Vec<Arc<dyn Observer<Op>>> =
            vec![Arc::new(Late), Arc::new(Plain), Arc::new(Early)];
        observers.sort_by(|a, b| by_ordinal(a.as_ref(), b.as_ref()));
        let ordinals: Vec<i32> = observers.iter().map(|o| o.ordinal()).collect();
        assert_eq!(ordinals, vec![-5, 0, CATCH_ALL_ORDINAL]);
    }

    /// Verifies `Arc<dyn Observer<_>>` compiles (object safety).
    #[test]
    fn observer_is_object_safe() {
        fn _assert_object_safe(_: &Arc<dyn Observer<Op>>) {}
    }
}
