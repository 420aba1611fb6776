//! Reference observers.

pub mod stderr;
pub mod tracing_observer;

pub use stderr::{format_elapsed, StderrObserver};
pub use tracing_observer::{
    obfuscate, Classifier, Loggability, TracingObserver, TracingObserverConfig,
};
