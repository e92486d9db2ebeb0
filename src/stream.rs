//! Streaming API: consume a run's events as a `futures::Stream`.
//!
//! ## Why stream?
//!
//! Observers built on combinators (`StreamExt::for_each`, `select!` against
//! a UI event loop, forwarding into a websocket) want a `Stream` rather than
//! a hand-written `recv` loop. [`WorkflowRun::into_stream`] converts a run
//! into one. The stream yields events in emission order and ends right after
//! the `TerminalOutcome` event.

use crate::engine::{RunControl, WorkflowRun};
use crate::progress::{Outcome, ProgressEvent};
use std::pin::Pin;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// A boxed stream of progress events.
pub type EventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

impl WorkflowRun {
    /// Split the run into its event stream and its control handle.
    ///
    /// # Example
    /// ```rust,no_run
    /// use deckpress::{InputChoice, ProgressEvent, WorkflowConfig, WorkflowEngine};
    /// use futures::StreamExt;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let engine = WorkflowEngine::new(WorkflowConfig::default());
    /// let (mut events, control) = engine.start("./card-maker")?.into_stream();
    /// while let Some(event) = events.next().await {
    ///     if let ProgressEvent::DecisionRequested { .. } = event {
    ///         control.resolve_input(InputChoice::Upload);
    ///     }
    ///     println!("{}", serde_json::to_string(&event)?);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn into_stream(self) -> (EventStream, RunControl) {
        let (rx, control, _task) = self.into_parts();
        (Box::pin(UnboundedReceiverStream::new(rx)), control)
    }
}

/// The outcome carried by the last event of a finished stream, if any.
pub fn final_outcome<'a>(events: impl IntoIterator<Item = &'a ProgressEvent>) -> Option<Outcome> {
    events.into_iter().find_map(|e| match e {
        ProgressEvent::TerminalOutcome { outcome } => Some(outcome.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::engine::WorkflowEngine;
    use crate::progress::DecisionKind;
    use futures::StreamExt;

    #[tokio::test]
    async fn stream_ends_after_terminal_outcome() {
        let engine = WorkflowEngine::new(WorkflowConfig::default());
        let (stream, _control) = engine.start("/no/such/deckpress/root").unwrap().into_stream();
        let events: Vec<ProgressEvent> = stream.collect().await;
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::TerminalOutcome {
                outcome: Outcome::Failure { .. }
            })
        ));
        assert!(matches!(final_outcome(&events), Some(Outcome::Failure { .. })));
    }

    #[tokio::test]
    async fn control_answers_decisions_seen_on_the_stream() {
        let root = tempfile::tempdir().unwrap();
        let py = WorkflowConfig::default().env_interpreter(&root.path().join("venv"));
        std::fs::create_dir_all(py.parent().unwrap()).unwrap();
        std::fs::write(&py, b"").unwrap();

        let engine = WorkflowEngine::new(WorkflowConfig::default());
        let (mut stream, control) = engine.start(root.path()).unwrap().into_stream();
        let mut outcome = None;
        while let Some(event) = stream.next().await {
            match event {
                ProgressEvent::DecisionRequested {
                    kind: DecisionKind::InputMethod,
                } => {
                    control.cancel();
                }
                ProgressEvent::TerminalOutcome { outcome: o } => outcome = Some(o),
                _ => {}
            }
        }
        assert_eq!(outcome, Some(Outcome::Cancelled));
    }
}
