//! Bare-bones observer printing one line per record, prefixed with the time
//! elapsed since the observer was created. Handy while wiring up a service.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use reqprobe_core::{
    payload_type_name, ClockSource, MetricValue, Observer, Operation, Payload, RequestContext,
    SystemClock,
};

use crate::lifecycle::duration_of;

const PREFIX: char = '┇';
const ELAPSED_WIDTH: usize = 19;

/// Formats `elapsed` as `[hh:][mm:]ss.mmm`, omitting leading zero fields.
///
/// `0.007`, `01.500`, `01:05.000`, `01:00:00.000`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    let hours = millis / 3_600_000;
    let minutes = millis / 60_000;
    let seconds = millis / 1_000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours:02}"));
    }
    if minutes > 0 {
        if !out.is_empty() {
            out.push(':');
        }
        out.push_str(&format!("{:02}", minutes % 60));
    }
    if seconds > 0 {
        if !out.is_empty() {
            out.push(':');
        }
        out.push_str(&format!("{:02}", seconds % 60));
    } else {
        out.push('0');
    }
    out.push_str(&format!(".{:03}", millis % 1_000));
    out
}

/// Writes every record as a tab-separated line.
pub struct StderrObserver {
    clock: Arc<dyn ClockSource>,
    started_ms: u64,
    out: Mutex<Box<dyn Write + Send>>,
}

impl StderrObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::with_writer(Arc::new(SystemClock), io::stderr())
    }

    /// Writes to `out`, measuring elapsed time with `clock`.
    #[must_use]
    pub fn with_writer(clock: Arc<dyn ClockSource>, out: impl Write + Send + 'static) -> Self {
        let started_ms = clock.now();
        Self {
            clock,
            started_ms,
            out: Mutex::new(Box::new(out)),
        }
    }

    fn emit(&self, line: &str) {
        let elapsed =
            format_elapsed(Duration::from_millis(self.clock.now().saturating_sub(self.started_ms)));
        let mut out = self.out.lock();
        // Nowhere to report a failing stderr.
        let _ = writeln!(out, "{PREFIX}{elapsed:>ELAPSED_WIDTH$}\t{line}");
    }
}

impl Default for StderrObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Operation> Observer<O> for StderrObserver {
    fn on_startup(&self) {
        self.emit("startup");
    }

    fn on_shutdown(&self) {
        self.emit("shutdown");
    }

    fn on_launched(&self, unit: &str, message: &str) {
        self.emit(&format!("launched\t{message}\t{unit}"));
    }

    fn on_launch_failure(&self, unit: &str, _options: &serde_json::Value, error: &anyhow::Error) {
        self.emit(&format!("launchFailure\t{unit}\n{error:?}"));
    }

    fn on_start_request(&self, op: O, ctx: &RequestContext) {
        let remote = ctx
            .remote_addr()
            .map_or_else(|| "-".to_string(), |addr| addr.to_string());
        self.emit(&format!("start\t{}\t{}\t{remote}", op.name(), ctx.uri()));
    }

    fn on_enter_handler(&self, op: O, ctx: &RequestContext, handler: &'static str) {
        self.emit(&format!("enter\t{}\t{handler}\t{}", op.name(), ctx.uri()));
    }

    fn on_before_payload_read(
        &self,
        op: O,
        ctx: &RequestContext,
        handler: &'static str,
        buffer: &Bytes,
    ) {
        self.emit(&format!(
            "read\t{}\t{}\t{handler}\t{}",
            buffer.len(),
            op.name(),
            ctx.uri()
        ));
    }

    fn on_after_payload_read(
        &self,
        op: O,
        ctx: &RequestContext,
        handler: &'static str,
        payload: Option<&Payload>,
    ) {
        self.emit(&format!(
            "read\t{}\t{}\t{handler}\t{}",
            payload.is_some(),
            op.name(),
            ctx.uri()
        ));
    }

    fn on_before_send_response(&self, op: O, ctx: &RequestContext, payload: Option<&Payload>) {
        let payload = payload.map_or("-empty-", payload_type_name);
        self.emit(&format!("responding\t{}\t{}\t{payload}", op.name(), ctx.uri()));
    }

    fn on_after_send_response(&self, op: O, ctx: &RequestContext, status: StatusCode) {
        self.emit(&format!(
            "responded\t{}\t{}\t{}",
            op.name(),
            ctx.uri(),
            status.as_u16()
        ));
    }

    fn on_response_completed(&self, op: O, ctx: &RequestContext, status: StatusCode) {
        self.emit(&format!(
            "completed\t{}\t{}\t{}\tduration {}",
            op.name(),
            ctx.uri(),
            status.as_u16(),
            format_elapsed(duration_of(ctx))
        ));
    }

    fn on_failure(&self, op: O, ctx: &RequestContext, error: &anyhow::Error) {
        self.emit(&format!(
            "failure\t{}\t{}\tduration {}\t{error:#}",
            op.name(),
            ctx.uri(),
            format_elapsed(duration_of(ctx))
        ));
    }

    fn on_non_operation_failure(&self, message: &str, error: &anyhow::Error) {
        self.emit(&format!("failure\t{message}\t{error:#}"));
    }

    fn on_metric(&self, op: O, ctx: &RequestContext, name: &str, value: MetricValue) {
        self.emit(&format!("{name}\t{}\t{value}\t{}", op.name(), ctx.uri()));
    }

    fn on_event(&self, op: Option<O>, name: &str, _payload: Option<&Payload>) {
        let op = op.map_or("-", |op| op.name());
        self.emit(&format!("event\t{op}\t{name}"));
    }
}

#[cfg(test)]
mod tests {
    use reqprobe_core::ManualClock;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Op;

    impl Operation for Op {
        fn name(&self) -> &'static str {
            "GET_PET"
        }
    }

    #[derive(Clone, Default)]
    struct Lines(Arc<Mutex<Vec<u8>>>);

    impl Write for Lines {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Lines {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::ZERO), "0.000");
        assert_eq!(format_elapsed(Duration::from_millis(7)), "0.007");
        assert_eq!(format_elapsed(Duration::from_millis(1_500)), "01.500");
        assert_eq!(format_elapsed(Duration::from_millis(65_000)), "01:05.000");
        assert_eq!(format_elapsed(Duration::from_secs(3_600)), "01:00:00.000");
        assert_eq!(format_elapsed(Duration::from_millis(3_723_004)), "01:02:03.004");
    }

    #[test]
    fn lines_are_prefixed_and_padded() {
        let clock = Arc::new(ManualClock::new(10_000));
        let lines = Lines::default();
        let observer = StderrObserver::with_writer(clock.clone(), lines.clone());

        clock.advance(1_500);
        Observer::<Op>::on_startup(&observer);

        let text = lines.text();
        let expected = format!("┇{:>19}\tstartup\n", "01.500");
        assert_eq!(text, expected);
    }

    #[test]
    fn completion_line_carries_status_and_duration() {
        let clock = Arc::new(ManualClock::new(0));
        let lines = Lines::default();
        let observer = StderrObserver::with_writer(clock.clone(), lines.clone());
        let ctx = RequestContext::builder(http::Method::GET, "/pets/1")
            .clock(clock.clone())
            .build();
        ctx.timing().mark_start(0);
        clock.advance(42);
        ctx.timing().freeze(clock.now());

        observer.on_response_completed(Op, &ctx, StatusCode::OK);
        observer.on_event(None::<Op>, "cache-warm", None);

        let text = lines.text();
        assert!(text.contains("completed\tGET_PET\t/pets/1\t200\tduration 0.042"), "{text}");
        assert!(text.contains("event\t-\tcache-warm"), "{text}");
    }
}
