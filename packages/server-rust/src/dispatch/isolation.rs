//! Per-observer failure isolation.
//!
//! A panicking callback is caught and reported, and delivery moves on to the
//! next observer. Reports go through `tracing`, except when a report is
//! already in progress on this thread: an observer wired into the logging
//! stack could otherwise panic again while its own panic is being logged and
//! recurse without bound, so nested reports are written straight to stderr.

use std::any::Any;
use std::cell::Cell;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};

use reqprobe_core::{EventRecord, Observer, Operation};

thread_local! {
    static REPORTING: Cell<bool> = const { Cell::new(false) };
}

/// Clears the reporting flag even if the subscriber itself panics.
struct ReportingGuard;

impl Drop for ReportingGuard {
    fn drop(&mut self) {
        REPORTING.with(|flag| flag.set(false));
    }
}

/// Replays `record` onto `observer`, containing any panic.
///
/// Returns `false` if the observer panicked.
pub(crate) fn deliver<O: Operation>(observer: &dyn Observer<O>, record: &EventRecord<O>) -> bool {
    match catch_unwind(AssertUnwindSafe(|| record.replay(observer))) {
        Ok(()) => true,
        Err(panic) => {
            report_observer_panic(record.kind(), observer.ordinal(), panic.as_ref());
            false
        }
    }
}

/// Runs `observer.shutdown()`, containing any panic.
///
/// A panicking observer counts as not stopped.
pub(crate) fn stop<O: Operation>(observer: &dyn Observer<O>) -> bool {
    match catch_unwind(AssertUnwindSafe(|| observer.shutdown())) {
        Ok(stopped) => stopped,
        Err(panic) => {
            report_observer_panic("observer-shutdown", observer.ordinal(), panic.as_ref());
            false
        }
    }
}

fn report_observer_panic(kind: &'static str, ordinal: i32, panic: &(dyn Any + Send)) {
    let message = panic_message(panic);
    if REPORTING.with(|flag| flag.replace(true)) {
        let _ = writeln!(
            std::io::stderr().lock(),
            "reqprobe: observer (ordinal {ordinal}) panicked while a failure was being reported; event {kind}: {message}"
        );
        return;
    }
    let _guard = ReportingGuard;
    tracing::error!(
        event = kind,
        ordinal,
        panic = %message,
        "observer panicked; continuing delivery"
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
