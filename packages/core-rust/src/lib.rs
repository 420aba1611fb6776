//! `reqprobe` core — event records, the observer contract, and the per-request
//! context observers receive.

pub mod clock;
pub mod context;
pub mod event;
pub mod observer;
pub mod operation;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use context::{
    Completion, CompletionHooks, Hook, HookError, HookList, RequestContext, RequestContextBuilder,
    RequestTiming,
};
pub use event::{payload_type_name, EventRecord, MetricValue, Payload, PayloadValue, SharedError};
pub use observer::{by_ordinal, Observer, CATCH_ALL_ORDINAL};
pub use operation::Operation;

