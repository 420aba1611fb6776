//! `reqprobe` server side: dispatchers that fan event records out to
//! observers, request lifecycle attachment, and the bundled observers.

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod observers;
pub mod probe;

pub use builder::ProbeBuilder;
pub use config::{HookRetryPolicy, ProbeConfig};
pub use dispatch::{AsyncDispatcher, DeliveryState, Dispatcher, EventStack};
pub use error::ProbeError;
pub use lifecycle::{attach_to, duration_of, freeze_age, HookStage};
pub use logging::{init_logging, LoggingConfig, LoggingError};
pub use observers::{
    Loggability, StderrObserver, TracingObserver, TracingObserverConfig,
};
pub use probe::Probe;
