//! Observability tests for grading run lifecycle tracing.
//!
//! Events are captured through a JSON `tracing_subscriber` layer scoped to
//! each test, then checked for their `event` name and key fields.

use std::io::Write;
use std::sync::{Arc, Mutex};

use gradebox_core::domain::{Outcome, ReasonCode};
use gradebox_core::obs::{
    emit_outcome_recorded, emit_report_stored, emit_run_cancelled, emit_run_failed,
    emit_run_started, RunSpan,
};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` under a JSON subscriber and return the parsed log lines.
fn captured(f: impl FnOnce()) -> Vec<serde_json::Value> {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = capture.0.lock().unwrap().clone();
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn field<'a>(line: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    &line["fields"][name]
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[test]
fn run_started_carries_slot_and_rubric_version() {
    let lines = captured(|| emit_run_started("run-1", "alice", "hexgrid", 3));
    assert_eq!(lines.len(), 1);
    assert_eq!(field(&lines[0], "event"), "run.started");
    assert_eq!(field(&lines[0], "owner_id"), "alice");
    assert_eq!(field(&lines[0], "assignment_id"), "hexgrid");
    assert_eq!(field(&lines[0], "rubric_version"), 3);
}

#[test]
fn outcome_recorded_names_reason_code() {
    let lines = captured(|| {
        emit_outcome_recorded("run-2", &Outcome::pass("ok", 4));
        emit_outcome_recorded(
            "run-2",
            &Outcome::timeout("spin", ReasonCode::WallClock, 1200, "killed"),
        );
    });
    assert_eq!(lines.len(), 2);
    assert_eq!(field(&lines[0], "reason"), "-");
    assert_eq!(field(&lines[1], "criterion_id"), "spin");
    assert_eq!(field(&lines[1], "reason"), ReasonCode::WallClock.as_str());
    assert_eq!(field(&lines[1], "elapsed_ms"), 1200);
}

#[test]
fn report_stored_joins_slot() {
    let lines = captured(|| emit_report_stored("run-3", "bob", "hexgrid", 7));
    assert_eq!(field(&lines[0], "slot"), "bob/hexgrid");
    assert_eq!(field(&lines[0], "generation"), 7);
}

#[test]
fn run_failed_is_a_warning() {
    let lines = captured(|| {
        emit_run_cancelled("run-4", "requested");
        emit_run_failed("run-4", &"rubric hexgrid not found");
    });
    assert_eq!(lines[0]["level"], "INFO");
    assert_eq!(lines[1]["level"], "WARN");
    assert_eq!(field(&lines[1], "error"), "rubric hexgrid not found");
}

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

#[test]
fn run_span_scopes_events() {
    let lines = captured(|| {
        let _span = RunSpan::enter("run-5");
        emit_run_cancelled("run-5", "resubmitted");
    });
    assert_eq!(lines[0]["span"]["name"], "gradebox.run");
    assert_eq!(lines[0]["span"]["run_id"], "run-5");
}

#[test]
fn run_span_drop_exits() {
    let lines = captured(|| {
        {
            let _span = RunSpan::enter("run-6");
        }
        emit_run_cancelled("run-6", "requested");
    });
    assert!(lines[0].get("span").is_none());
}
