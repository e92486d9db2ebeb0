//! Pipeline stages for the card workflow.
//!
//! Each submodule implements one component of a run. Stages only touch the
//! paths held by the [`WorkflowSession`] they are handed and report through
//! the shared [`EventSink`]; the engine decides ordering and step status.
//!
//! ## Data Flow
//!
//! ```text
//! environment ──▶ intake::clean ──▶ decision ──▶ acquire ──▶ decision ──▶ render
//!  (venv, pip)      (delete stale)   (input)     (upload |    (review)    (PDF +
//!                                                 plugin)                 artifact)
//! ```
//!
//! 1. [`environment`] — create the dependency environment and install the
//!    manifest; idempotent
//! 2. [`intake`] — count and clean card images in the intake directories
//! 3. [`decision`] — one-shot suspension points answered by the observer
//! 4. [`acquire`] — verify uploads or run the selected plugin fetch
//! 5. [`render`] — run the renderer and locate the newest artifact

pub mod acquire;
pub mod decision;
pub mod environment;
pub mod intake;
pub mod render;

use crate::config::WorkflowConfig;
use crate::error::{ProcessError, StageError, WorkflowError};
use crate::process::{ExternalInvocation, ProcessOutcome, ProcessSupervisor};
use crate::progress::EventSink;
use crate::session::WorkflowSession;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything a stage needs besides the session.
#[derive(Debug, Clone)]
pub(crate) struct StageContext {
    pub events: EventSink,
    pub cancel: CancellationToken,
    pub supervisor: ProcessSupervisor,
    pub config: Arc<WorkflowConfig>,
}

impl StageContext {
    pub(crate) fn check_cancelled(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `argv` in the project root, forwarding each non-blank stdout line
    /// as a log line with `prefix` prepended.
    ///
    /// A child stopped by cancellation yields [`StageError::Cancelled`]; any
    /// other exit, zero or not, is returned for the stage to interpret.
    /// `on_spawn_error` maps launch failures into the stage's error kind.
    pub(crate) async fn run_logged(
        &self,
        session: &WorkflowSession,
        argv: Vec<String>,
        prefix: &str,
        on_spawn_error: impl FnOnce(ProcessError) -> WorkflowError,
    ) -> Result<ProcessOutcome, StageError> {
        self.check_cancelled()?;
        let invocation = match ExternalInvocation::new(argv, &session.root) {
            Ok(inv) => inv,
            Err(e) => return Err(on_spawn_error(e).into()),
        };
        self.events.log(format!("Command: {}", invocation.display()));

        let events = &self.events;
        let outcome = self
            .supervisor
            .run(&invocation, &self.cancel, |line| {
                if !line.trim().is_empty() {
                    events.log(format!("{prefix}{}", line.trim_end()));
                }
            })
            .await
            .map_err(on_spawn_error)?;

        debug!(exit_code = ?outcome.exit_code, cancelled = outcome.cancelled, "stage process finished");
        if outcome.cancelled {
            return Err(StageError::Cancelled);
        }
        Ok(outcome)
    }
}
