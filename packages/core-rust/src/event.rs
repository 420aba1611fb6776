//! Immutable event records, one variant per observable occurrence.
//!
//! A record carries exactly what is needed to replay the matching
//! [`Observer`] callback later, possibly on another thread. Buffers are held
//! as [`Bytes`], which cannot be mutated through a shared handle, so the
//! producer is free to reuse its own buffer once the record is built.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;

use crate::context::RequestContext;
use crate::observer::Observer;
use crate::operation::Operation;

/// Error value shared between every observer that sees a failure record.
pub type SharedError = Arc<anyhow::Error>;

/// Decoded request or response body attached to an event.
pub type Payload = Arc<dyn PayloadValue>;

/// A value that can ride along in a record as a payload.
///
/// Blanket-implemented for every `Debug + Send + Sync + 'static` type.
pub trait PayloadValue: Any + fmt::Debug + Send + Sync {
    /// Fully qualified type name of the payload.
    fn type_name(&self) -> &'static str;

    /// Upcast for downcasting by observers that know the concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> PayloadValue for T {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type name of the value inside a payload handle.
///
/// `Payload` itself satisfies the blanket impl, so calling `type_name()` on
/// the handle would report the `Arc` rather than its contents.
#[must_use]
pub fn payload_type_name(payload: &Payload) -> &'static str {
    (**payload).type_name()
}

/// Numeric value of a named metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    /// Value as a float, for sinks that only take `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// One lifecycle occurrence, ready to be replayed onto any observer.
#[derive(Debug, Clone)]
pub enum EventRecord<O: Operation> {
    /// The hosting process started.
    Startup,
    /// The hosting process is shutting down.
    Shutdown,
    /// A unit of work (worker, listener, verticle) was launched.
    Launched { unit: String, message: String },
    /// A unit of work failed to launch.
    LaunchFailed {
        unit: String,
        options: serde_json::Value,
        error: SharedError,
    },
    RequestStarted {
        op: O,
        ctx: Arc<RequestContext>,
    },
    HandlerEntered {
        op: O,
        ctx: Arc<RequestContext>,
        handler: &'static str,
    },
    PayloadReadBefore {
        op: O,
        ctx: Arc<RequestContext>,
        handler: &'static str,
        buffer: Bytes,
    },
    PayloadReadAfter {
        op: O,
        ctx: Arc<RequestContext>,
        handler: &'static str,
        payload: Option<Payload>,
    },
    ResponseSendBefore {
        op: O,
        ctx: Arc<RequestContext>,
        payload: Option<Payload>,
    },
    ResponseSendAfter {
        op: O,
        ctx: Arc<RequestContext>,
        status: StatusCode,
    },
    ResponseCompleted {
        op: O,
        ctx: Arc<RequestContext>,
        status: StatusCode,
    },
    Failure {
        op: O,
        ctx: Arc<RequestContext>,
        error: SharedError,
    },
    /// A failure not tied to any request, e.g. a background task.
    NonOperationFailure { message: String, error: SharedError },
    Metric {
        op: O,
        ctx: Arc<RequestContext>,
        name: String,
        value: MetricValue,
    },
    /// Free-form named event, optionally tied to an operation.
    Event {
        op: Option<O>,
        name: String,
        payload: Option<Payload>,
    },
}

impl<O: Operation> EventRecord<O> {
    /// Builds a payload-read record from a borrowed buffer, taking a private copy.
    #[must_use]
    pub fn payload_read_before(
        op: O,
        ctx: Arc<RequestContext>,
        handler: &'static str,
        buffer: &[u8],
    ) -> Self {
        Self::PayloadReadBefore {
            op,
            ctx,
            handler,
            buffer: Bytes::copy_from_slice(buffer),
        }
    }

    /// Short, stable name of the variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Launched { .. } => "launched",
            Self::LaunchFailed { .. } => "launch-failed",
            Self::RequestStarted { .. } => "request-started",
            Self::HandlerEntered { .. } => "handler-entered",
            Self::PayloadReadBefore { .. } => "payload-read-before",
            Self::PayloadReadAfter { .. } => "payload-read-after",
            Self::ResponseSendBefore { .. } => "response-send-before",
            Self::ResponseSendAfter { .. } => "response-send-after",
            Self::ResponseCompleted { .. } => "response-completed",
            Self::Failure { .. } => "failure",
            Self::NonOperationFailure { .. } => "non-operation-failure",
            Self::Metric { .. } => "metric",
            Self::Event { .. } => "event",
        }
    }

    /// Request context the record refers to, if any.
    #[must_use]
    pub fn context(&self) -> Option<&Arc<RequestContext>> {
        match self {
            Self::RequestStarted { ctx, .. }
            | Self::HandlerEntered { ctx, .. }
            | Self::PayloadReadBefore { ctx, .. }
            | Self::PayloadReadAfter { ctx, .. }
            | Self::ResponseSendBefore { ctx, .. }
            | Self::ResponseSendAfter { ctx, .. }
            | Self::ResponseCompleted { ctx, .. }
            | Self::Failure { ctx, .. }
            | Self::Metric { ctx, .. } => Some(ctx),
            Self::Startup
            | Self::Shutdown
            | Self::Launched { .. }
            | Self::LaunchFailed { .. }
            | Self::NonOperationFailure { .. }
            | Self::Event { .. } => None,
        }
    }

    /// Invokes the observer callback matching this record.
    pub fn replay(&self, observer: &dyn Observer<O>) {
        match self {
            Self::Startup => observer.on_startup(),
            Self::Shutdown => observer.on_shutdown(),
            Self::Launched { unit, message } => observer.on_launched(unit, message),
            Self::LaunchFailed {
                unit,
                options,
                error,
            } => observer.on_launch_failure(unit, options, error),
            Self::RequestStarted { op, ctx } => observer.on_start_request(*op, ctx),
            Self::HandlerEntered { op, ctx, handler } => {
                observer.on_enter_handler(*op, ctx, handler);
            }
            Self::PayloadReadBefore {
                op,
                ctx,
                handler,
                buffer,
            } => observer.on_before_payload_read(*op, ctx, handler, buffer),
            Self::PayloadReadAfter {
                op,
                ctx,
                handler,
                payload,
            } => observer.on_after_payload_read(*op, ctx, handler, payload.as_ref()),
            Self::ResponseSendBefore { op, ctx, payload } => {
                observer.on_before_send_response(*op, ctx, payload.as_ref());
            }
            Self::ResponseSendAfter { op, ctx, status } => {
                observer.on_after_send_response(*op, ctx, *status);
            }
            Self::ResponseCompleted { op, ctx, status } => {
                observer.on_response_completed(*op, ctx, *status);
            }
            Self::Failure { op, ctx, error } => observer.on_failure(*op, ctx, error),
            Self::NonOperationFailure { message, error } => {
                observer.on_non_operation_failure(message, error);
            }
            Self::Metric {
                op,
                ctx,
                name,
                value,
            } => observer.on_metric(*op, ctx, name, *value),
            Self::Event { op, name, payload } => observer.on_event(*op, name, payload.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Ops {
        Upload,
    }

    impl Operation for Ops {
        fn name(&self) -> &'static str {
            "UPLOAD"
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Observer<Ops> for Recorder {
        fn on_startup(&self) {
            self.seen.lock().push("startup".to_string());
        }

        fn on_before_payload_read(
            &self,
            _op: Ops,
            _ctx: &RequestContext,
            handler: &'static str,
            buffer: &Bytes,
        ) {
            self.seen
                .lock()
                .push(format!("read {handler} {}", buffer.len()));
        }

        fn on_metric(&self, _op: Ops, _ctx: &RequestContext, name: &str, value: MetricValue) {
            self.seen.lock().push(format!("{name}={value}"));
        }

        fn on_event(&self, op: Option<Ops>, name: &str, payload: Option<&Payload>) {
            let type_name = payload.map_or("-", payload_type_name);
            self.seen.lock().push(format!("{op:?} {name} {type_name}"));
        }
    }

    #[test]
    fn payload_read_record_owns_a_private_copy() {
        let ctx = Arc::new(RequestContext::new(http::Method::POST, "/upload"));
        let mut buffer = vec![1_u8, 2, 3];
        let record = EventRecord::payload_read_before(Ops::Upload, ctx, "BodyHandler", &buffer);

        // Producer reuses its buffer after submission.
        buffer.clear();
        buffer.extend_from_slice(&[9, 9, 9, 9, 9]);

        let EventRecord::PayloadReadBefore { buffer: copy, .. } = &record else {
            panic!("wrong variant");
        };
        assert_eq!(&copy[..], &[1_u8, 2, 3]);
    }

    #[test]
    fn replay_invokes_matching_callback() {
        let ctx = Arc::new(RequestContext::new(http::Method::GET, "/things"));
        let recorder = Recorder::default();

        EventRecord::<Ops>::Startup.replay(&recorder);
        EventRecord::payload_read_before(Ops::Upload, Arc::clone(&ctx), "Body", b"abcd")
            .replay(&recorder);
        EventRecord::Metric {
            op: Ops::Upload,
            ctx,
            name: "bytes".to_string(),
            value: MetricValue::from(42_i64),
        }
        .replay(&recorder);
        EventRecord::Event {
            op: Some(Ops::Upload),
            name: "cache-miss".to_string(),
            payload: Some(Arc::new(7_u32) as Payload),
        }
        .replay(&recorder);
        // Default no-op bodies swallow everything else.
        EventRecord::<Ops>::Shutdown.replay(&recorder);

        let seen = recorder.seen.lock();
        assert_eq!(
            *seen,
            vec![
                "startup".to_string(),
                "read Body 4".to_string(),
                "bytes=42".to_string(),
                "Some(Upload) cache-miss u32".to_string(),
            ]
        );
    }

    #[test]
    fn context_is_exposed_only_for_request_variants() {
        let ctx = Arc::new(RequestContext::new(http::Method::GET, "/"));
        let started = EventRecord::RequestStarted {
            op: Ops::Upload,
            ctx: Arc::clone(&ctx),
        };
        assert!(Arc::ptr_eq(started.context().unwrap(), &ctx));
        assert_eq!(started.kind(), "request-started");
        assert!(EventRecord::<Ops>::Startup.context().is_none());
    }

    #[test]
    fn metric_value_display_and_conversion() {
        assert_eq!(MetricValue::from(3_i32).to_string(), "3");
        assert_eq!(MetricValue::from(1.5_f64).to_string(), "1.5");
        assert!((MetricValue::Int(2).as_f64() - 2.0).abs() < f64::EPSILON);
    }
}
