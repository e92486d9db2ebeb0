//! Progress events and the observer trait that consumes them.
//!
//! Every stage reports through one ordered, unbounded channel of
//! [`ProgressEvent`]s. The background task owns the sending half (wrapped in
//! [`EventSink`]); the observer drains the receiving half on its own
//! context, strictly in emission order. Nothing is dropped or reordered.
//!
//! Implement [`WorkflowObserver`] to react to events with plain method
//! calls instead of matching on the enum yourself; every method has a
//! no-op default so callers only override what they care about.
//!
//! # Example
//!
//! ```rust
//! use deckpress::{ProgressEvent, StepStatus, WorkflowObserver};
//!
//! #[derive(Default)]
//! struct Counter {
//!     completed: usize,
//! }
//!
//! impl WorkflowObserver for Counter {
//!     fn on_step_status(&mut self, _index: usize, status: StepStatus) {
//!         if status == StepStatus::Completed {
//!             self.completed += 1;
//!         }
//!     }
//! }
//!
//! let mut counter = Counter::default();
//! ProgressEvent::StepStatusChanged { index: 0, status: StepStatus::Completed }
//!     .dispatch(&mut counter);
//! assert_eq!(counter.completed, 1);
//! ```

use crate::error::{ErrorKind, WorkflowError};
use crate::steps::StepStatus;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::debug;

/// Whole-run state of the workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Preparing,
    AwaitingInputChoice,
    Acquiring,
    AwaitingReview,
    Rendering,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Preparing => "preparing",
            RunState::AwaitingInputChoice => "awaiting input choice",
            RunState::Acquiring => "acquiring",
            RunState::AwaitingReview => "awaiting review",
            RunState::Rendering => "rendering",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Which decision the background task is suspended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Upload vs. plugin fetch. Resolve with `RunControl::resolve_input`.
    InputMethod,
    /// Render, redo acquisition, or skip. Resolve with `RunControl::resolve_review`.
    Review,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        /// Newest artifact found after rendering, if any.
        artifact: Option<PathBuf>,
        /// False when the observer skipped rendering.
        rendered: bool,
    },
    Failure {
        kind: ErrorKind,
        reason: String,
    },
    Cancelled,
}

impl Outcome {
    pub(crate) fn from_error(err: &WorkflowError) -> Self {
        Outcome::Failure {
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// A single observer-visible event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    StepStatusChanged {
        index: usize,
        status: StepStatus,
    },
    LogLine {
        text: String,
        timestamp: DateTime<Local>,
    },
    ProgressFraction {
        value: f64,
    },
    DecisionRequested {
        kind: DecisionKind,
    },
    StateChanged {
        state: RunState,
    },
    TerminalOutcome {
        outcome: Outcome,
    },
}

impl ProgressEvent {
    pub fn log(text: impl Into<String>) -> Self {
        ProgressEvent::LogLine {
            text: text.into(),
            timestamp: Local::now(),
        }
    }

    /// Route this event to the matching observer method.
    pub fn dispatch(self, observer: &mut dyn WorkflowObserver) {
        match self {
            ProgressEvent::StepStatusChanged { index, status } => {
                observer.on_step_status(index, status)
            }
            ProgressEvent::LogLine { text, timestamp } => observer.on_log(&text, timestamp),
            ProgressEvent::ProgressFraction { value } => observer.on_progress(value),
            ProgressEvent::DecisionRequested { kind } => observer.on_decision(kind),
            ProgressEvent::StateChanged { state } => observer.on_state(state),
            ProgressEvent::TerminalOutcome { outcome } => observer.on_outcome(&outcome),
        }
    }
}

/// Receives events on the observer context, in emission order.
///
/// Methods take `&mut self`: events are delivered one at a time from a
/// single context, so implementations need no interior locking.
pub trait WorkflowObserver {
    fn on_step_status(&mut self, index: usize, status: StepStatus) {
        let _ = (index, status);
    }

    fn on_log(&mut self, text: &str, timestamp: DateTime<Local>) {
        let _ = (text, timestamp);
    }

    /// `value` is `completed / total` and may move backwards after a redo.
    fn on_progress(&mut self, value: f64) {
        let _ = value;
    }

    fn on_decision(&mut self, kind: DecisionKind) {
        let _ = kind;
    }

    fn on_state(&mut self, state: RunState) {
        let _ = state;
    }

    fn on_outcome(&mut self, outcome: &Outcome) {
        let _ = outcome;
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl WorkflowObserver for NoopObserver {}

/// Sending half of the event channel, owned by the background task.
///
/// Sends never block. If the observer has dropped its receiver the event is
/// discarded; the run carries on until it next needs the observer, which
/// [`closed`](Self::closed) reports.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("observer gone; event dropped");
        }
    }

    /// Resolves once the observer has dropped its receiver.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn log(&self, text: impl Into<String>) {
        self.emit(ProgressEvent::log(text));
    }

    pub fn step(&self, index: usize, status: StepStatus) {
        self.emit(ProgressEvent::StepStatusChanged { index, status });
    }

    pub fn fraction(&self, value: f64) {
        self.emit(ProgressEvent::ProgressFraction { value });
    }

    pub fn state(&self, state: RunState) {
        self.emit(ProgressEvent::StateChanged { state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Tracking {
        statuses: Vec<(usize, StepStatus)>,
        logs: Vec<String>,
        fractions: Vec<f64>,
        decisions: Vec<DecisionKind>,
        states: Vec<RunState>,
        outcomes: Vec<Outcome>,
    }

    impl WorkflowObserver for Tracking {
        fn on_step_status(&mut self, index: usize, status: StepStatus) {
            self.statuses.push((index, status));
        }
        fn on_log(&mut self, text: &str, _timestamp: DateTime<Local>) {
            self.logs.push(text.to_string());
        }
        fn on_progress(&mut self, value: f64) {
            self.fractions.push(value);
        }
        fn on_decision(&mut self, kind: DecisionKind) {
            self.decisions.push(kind);
        }
        fn on_state(&mut self, state: RunState) {
            self.states.push(state);
        }
        fn on_outcome(&mut self, outcome: &Outcome) {
            self.outcomes.push(outcome.clone());
        }
    }

    #[test]
    fn noop_observer_accepts_everything() {
        let mut o = NoopObserver;
        ProgressEvent::log("hello").dispatch(&mut o);
        ProgressEvent::TerminalOutcome {
            outcome: Outcome::Cancelled,
        }
        .dispatch(&mut o);
    }

    #[test]
    fn dispatch_routes_each_variant() {
        let mut t = Tracking::default();
        let events = vec![
            ProgressEvent::StateChanged {
                state: RunState::Preparing,
            },
            ProgressEvent::StepStatusChanged {
                index: 1,
                status: StepStatus::Running,
            },
            ProgressEvent::log("creating venv"),
            ProgressEvent::ProgressFraction { value: 0.25 },
            ProgressEvent::DecisionRequested {
                kind: DecisionKind::InputMethod,
            },
            ProgressEvent::TerminalOutcome {
                outcome: Outcome::Cancelled,
            },
        ];
        for e in events {
            e.dispatch(&mut t);
        }
        assert_eq!(t.states, vec![RunState::Preparing]);
        assert_eq!(t.statuses, vec![(1, StepStatus::Running)]);
        assert_eq!(t.logs, vec!["creating venv".to_string()]);
        assert_eq!(t.fractions, vec![0.25]);
        assert_eq!(t.decisions, vec![DecisionKind::InputMethod]);
        assert_eq!(t.outcomes, vec![Outcome::Cancelled]);
    }

    #[tokio::test]
    async fn sink_preserves_emission_order() {
        let (sink, mut rx) = EventSink::channel();
        for i in 0..100 {
            sink.log(format!("line {i}"));
        }
        drop(sink);
        let mut seen = Vec::new();
        while let Some(ProgressEvent::LogLine { text, .. }) = rx.recv().await {
            seen.push(text);
        }
        let expected: Vec<String> = (0..100).map(|i| format!("line {i}")).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn sink_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.log("nobody listening");
    }

    #[test]
    fn events_serialise_with_tags() {
        let json = serde_json::to_string(&ProgressEvent::StepStatusChanged {
            index: 3,
            status: StepStatus::Failed,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"event":"step_status_changed","index":3,"status":"failed"}"#
        );

        let json = serde_json::to_string(&ProgressEvent::TerminalOutcome {
            outcome: Outcome::Failure {
                kind: ErrorKind::Acquisition,
                reason: "rate limited".into(),
            },
        })
        .unwrap();
        assert!(json.contains(r#""result":"failure""#), "got: {json}");
        assert!(json.contains(r#""kind":"acquisition""#), "got: {json}");
    }
}
