//! The workflow engine: one background run at a time, driven step by step.
//!
//! ## Execution model
//!
//! [`WorkflowEngine::start`] spawns the run on the tokio runtime and hands
//! back a [`WorkflowRun`]. The run owns its [`StepStateMachine`] and
//! [`WorkflowSession`] outright; the observer never touches them and learns
//! everything from the ordered [`ProgressEvent`] channel. The only places the
//! run waits on the observer are the two decision points, answered through
//! the cloneable [`RunControl`].
//!
//! ```text
//! Idle ─▶ Preparing ─▶ AwaitingInputChoice ─▶ Acquiring ─▶ AwaitingReview ─┬─▶ Rendering ─▶ Completed
//!                            ▲                                             ├─▶ Completed (skip)
//!                            └──────────── redo (clean again) ◀────────────┘
//! any state ─▶ Failed | Cancelled
//! ```
//!
//! ## Failure and cancellation
//!
//! A stage error fails the running step, logs the reason, and ends the run
//! with `Outcome::Failure`. Nothing is retried automatically. Cancellation
//! terminates any child process under the supervisor's grace policy, fails
//! the running step with reason "cancelled", and ends with
//! `Outcome::Cancelled`. In both cases the single-run lock is released
//! before the terminal event is emitted, so an observer may start the next
//! run as soon as it sees the outcome. A run whose [`WorkflowRun`] is dropped
//! while a decision is pending ends as cancelled.

use crate::config::WorkflowConfig;
use crate::error::{StageError, WorkflowError};
use crate::pipeline::decision::{DecisionSlot, Resolution};
use crate::pipeline::environment::EnvironmentPreparer;
use crate::pipeline::{acquire, intake, render, StageContext};
use crate::plugins::PluginRegistry;
use crate::process::ProcessSupervisor;
use crate::progress::{DecisionKind, EventSink, Outcome, ProgressEvent, RunState, WorkflowObserver};
use crate::session::{InputChoice, InputMethod, ReviewDecision, WorkflowSession};
use crate::steps::{
    StepStateMachine, StepStatus, TransitionError, ACQUIRE_IMAGES, CHOOSE_INPUT, CLEAN_INTAKE,
    CREATE_ENVIRONMENT, CREATE_PDF, INSTALL_REQUIREMENTS, LOCATE_PROJECT,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Starts runs and enforces that at most one is active.
///
/// Cheap to clone; clones share the active-run lock.
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    config: Arc<WorkflowConfig>,
    registry: Arc<PluginRegistry>,
    active: Arc<AtomicBool>,
}

impl WorkflowEngine {
    /// Engine with the built-in plugin registry.
    pub fn new(config: WorkflowConfig) -> Self {
        Self::with_registry(config, PluginRegistry::builtin())
    }

    pub fn with_registry(config: WorkflowConfig, registry: PluginRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Whether a run is in progress.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a run against the project at `root`. Must be called from within
    /// a tokio runtime.
    ///
    /// The root is validated as the run's first step, so a bad path shows up
    /// as a failed step and a `Failure` outcome rather than an `Err` here.
    ///
    /// # Errors
    /// [`WorkflowError::RunActive`] if another run has not finished yet.
    pub fn start(&self, root: impl AsRef<Path>) -> Result<WorkflowRun, WorkflowError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("start rejected: a run is already active");
            return Err(WorkflowError::RunActive);
        }
        let guard = ActiveGuard {
            flag: Arc::clone(&self.active),
        };

        let (events, rx) = EventSink::channel();
        let cancel = CancellationToken::new();
        let shared = Arc::new(ControlShared {
            input: DecisionSlot::default(),
            review: DecisionSlot::default(),
            cancel: cancel.clone(),
        });

        let runner = Runner {
            ctx: StageContext {
                events,
                cancel,
                supervisor: ProcessSupervisor::new(self.config.termination_grace()),
                config: Arc::clone(&self.config),
            },
            machine: StepStateMachine::workflow(),
            control: Arc::clone(&shared),
            registry: Arc::clone(&self.registry),
            root: root.as_ref().to_path_buf(),
            state: RunState::Idle,
        };
        info!(root = %runner.root.display(), "starting workflow run");
        let task = tokio::spawn(runner.run(guard));

        Ok(WorkflowRun {
            events: rx,
            control: RunControl { shared },
            task,
        })
    }
}

/// Clears the active flag when the run finishes, even by panic.
struct ActiveGuard {
    flag: Arc<AtomicBool>,
}

impl ActiveGuard {
    fn release(self) {}
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct ControlShared {
    input: DecisionSlot<InputChoice>,
    review: DecisionSlot<ReviewDecision>,
    cancel: CancellationToken,
}

/// Observer-side handle for answering decisions and cancelling.
///
/// Resolutions are accepted only while the matching decision is pending;
/// anything else (a second answer, an answer nobody asked for) returns
/// `false` and is ignored.
#[derive(Clone)]
pub struct RunControl {
    shared: Arc<ControlShared>,
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("input_pending", &self.shared.input.is_pending())
            .field("review_pending", &self.shared.review.is_pending())
            .field("cancelled", &self.shared.cancel.is_cancelled())
            .finish()
    }
}

impl RunControl {
    pub fn resolve_input(&self, choice: InputChoice) -> bool {
        self.shared.input.resolve(choice)
    }

    /// Refuse the input decision; the run ends as cancelled.
    pub fn decline_input(&self) -> bool {
        self.shared.input.decline()
    }

    pub fn resolve_review(&self, decision: ReviewDecision) -> bool {
        self.shared.review.resolve(decision)
    }

    /// Refuse the review decision; the run ends as cancelled.
    pub fn decline_review(&self) -> bool {
        self.shared.review.decline()
    }

    /// Cancel the run. Safe to call at any time, any number of times.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

/// A run in progress: its event channel, its control handle, its task.
#[derive(Debug)]
pub struct WorkflowRun {
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    control: RunControl,
    task: JoinHandle<Outcome>,
}

impl WorkflowRun {
    /// Next event in emission order; `None` once the run has ended and every
    /// event has been delivered.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    /// Deliver every event to `observer`, then return the outcome.
    ///
    /// The observer answers decisions through a [`RunControl`] obtained
    /// beforehand with [`control`](Self::control).
    pub async fn observe(mut self, observer: &mut dyn WorkflowObserver) -> Outcome {
        while let Some(event) = self.events.recv().await {
            event.dispatch(observer);
        }
        self.wait().await
    }

    /// Wait for the run to end, discarding undelivered events.
    pub async fn wait(self) -> Outcome {
        join_outcome(self.task).await
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedReceiver<ProgressEvent>,
        RunControl,
        JoinHandle<Outcome>,
    ) {
        (self.events, self.control, self.task)
    }
}

pub(crate) async fn join_outcome(task: JoinHandle<Outcome>) -> Outcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "workflow task ended abnormally");
            Outcome::from_error(&WorkflowError::Internal(format!("workflow task failed: {e}")))
        }
    }
}

// ── Background run ────────────────────────────────────────────────────────

struct Runner {
    ctx: StageContext,
    machine: StepStateMachine,
    control: Arc<ControlShared>,
    registry: Arc<PluginRegistry>,
    root: PathBuf,
    state: RunState,
}

fn transition_failed(e: TransitionError) -> StageError {
    StageError::Failed(WorkflowError::Internal(e.to_string()))
}

impl Runner {
    async fn run(mut self, guard: ActiveGuard) -> Outcome {
        self.set_state(RunState::Preparing);
        let outcome = match self.drive().await {
            Ok(outcome) => outcome,
            Err(StageError::Cancelled) => {
                self.fail_running("cancelled");
                self.ctx.events.log("Run cancelled");
                Outcome::Cancelled
            }
            Err(StageError::Failed(e)) => {
                error!(error = %e, "workflow run failed");
                self.fail_running(&e.to_string());
                self.ctx.events.log(format!("Error: {e}"));
                Outcome::from_error(&e)
            }
        };

        self.set_state(match outcome {
            Outcome::Success { .. } => RunState::Completed,
            Outcome::Cancelled => RunState::Cancelled,
            Outcome::Failure { .. } => RunState::Failed,
        });
        info!(state = %self.state, "workflow run finished");

        guard.release();
        self.ctx.events.emit(ProgressEvent::TerminalOutcome {
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn drive(&mut self) -> Result<Outcome, StageError> {
        // ── Preparing ────────────────────────────────────────────────────
        self.begin(LOCATE_PROJECT)?;
        let mut session = WorkflowSession::resolve(&self.root, &self.ctx.config)?;
        self.ctx
            .events
            .log(format!("Project directory: {}", session.root.display()));
        self.complete(LOCATE_PROJECT)?;

        self.begin(CREATE_ENVIRONMENT)?;
        EnvironmentPreparer::new(&self.ctx, &session).create().await?;
        self.complete(CREATE_ENVIRONMENT)?;

        self.begin(INSTALL_REQUIREMENTS)?;
        EnvironmentPreparer::new(&self.ctx, &session).install().await?;
        self.complete(INSTALL_REQUIREMENTS)?;

        self.begin(CLEAN_INTAKE)?;
        intake::clean(&self.ctx, &session).await?;
        self.complete(CLEAN_INTAKE)?;

        // ── Acquire, review, maybe redo ──────────────────────────────────
        let control = Arc::clone(&self.control);
        let render_args = loop {
            self.set_state(RunState::AwaitingInputChoice);
            self.begin(CHOOSE_INPUT)?;
            let choice = self
                .await_decision(&control.input, DecisionKind::InputMethod)
                .await?;
            let method = self.resolve_choice(choice)?;
            self.complete(CHOOSE_INPUT)?;

            self.set_state(RunState::Acquiring);
            self.begin(ACQUIRE_IMAGES)?;
            session.input = Some(method.clone());
            acquire::acquire(&self.ctx, &session, &method).await?;
            self.complete(ACQUIRE_IMAGES)?;

            self.set_state(RunState::AwaitingReview);
            match self
                .await_decision(&control.review, DecisionKind::Review)
                .await?
            {
                ReviewDecision::Render(args) => break args,
                ReviewDecision::Skip => {
                    self.begin(CREATE_PDF)?;
                    self.ctx.events.log("PDF creation skipped");
                    self.complete(CREATE_PDF)?;
                    return Ok(Outcome::Success {
                        artifact: None,
                        rendered: false,
                    });
                }
                ReviewDecision::Redo => {
                    info!("redoing image acquisition");
                    self.ctx.events.log("Redoing image acquisition");
                    self.reset_from(CLEAN_INTAKE)?;
                    session.input = None;
                    self.set_state(RunState::Acquiring);
                    self.begin(CLEAN_INTAKE)?;
                    // Cleaning recreates missing intake dirs; a vanished
                    // root must fail here instead.
                    session.verify_root()?;
                    intake::clean(&self.ctx, &session).await?;
                    self.complete(CLEAN_INTAKE)?;
                }
            }
        };

        // ── Rendering ────────────────────────────────────────────────────
        self.set_state(RunState::Rendering);
        self.begin(CREATE_PDF)?;
        session.render_args = render_args;
        let artifact = render::render(&self.ctx, &session, &session.render_args).await?;
        self.complete(CREATE_PDF)?;
        Ok(Outcome::Success {
            artifact,
            rendered: true,
        })
    }

    fn resolve_choice(&self, choice: InputChoice) -> Result<InputMethod, StageError> {
        let method = match choice {
            InputChoice::Upload => {
                self.ctx.events.log("Input method: upload");
                InputMethod::Upload
            }
            InputChoice::Plugin { decklist, plugin } => {
                let source = self.registry.resolve(&plugin)?;
                self.ctx.events.log(format!(
                    "Input method: {} via {}",
                    source.game, source.method
                ));
                InputMethod::Plugin { decklist, source }
            }
        };
        Ok(method)
    }

    /// Arm `slot`, announce the decision, and wait for the observer.
    async fn await_decision<T>(
        &self,
        slot: &DecisionSlot<T>,
        kind: DecisionKind,
    ) -> Result<T, StageError> {
        let pending = slot.request();
        self.ctx.events.emit(ProgressEvent::DecisionRequested { kind });
        let resolution = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => {
                slot.decline();
                Resolution::Declined
            }
            r = pending.wait() => r,
            _ = self.ctx.events.closed() => {
                // Nobody is left to answer.
                warn!(?kind, "observer dropped the run while a decision was pending");
                slot.decline();
                self.ctx.cancel.cancel();
                Resolution::Declined
            }
        };
        match resolution {
            Resolution::Chosen(value) => Ok(value),
            Resolution::Declined => {
                info!(?kind, "decision declined");
                Err(StageError::Cancelled)
            }
        }
    }

    // ── Step bookkeeping ─────────────────────────────────────────────────

    fn set_state(&mut self, state: RunState) {
        if self.state != state {
            self.state = state;
            self.ctx.events.state(state);
        }
    }

    fn begin(&mut self, index: usize) -> Result<(), StageError> {
        self.ctx.check_cancelled()?;
        self.machine.begin(index).map_err(transition_failed)?;
        info!(step = index, label = self.machine.label(index).unwrap_or(""), "step started");
        self.ctx.events.step(index, StepStatus::Running);
        Ok(())
    }

    fn complete(&mut self, index: usize) -> Result<(), StageError> {
        self.machine.complete(index).map_err(transition_failed)?;
        self.ctx.events.step(index, StepStatus::Completed);
        self.ctx.events.fraction(self.machine.progress_fraction());
        Ok(())
    }

    fn fail_running(&mut self, reason: &str) {
        if let Some(index) = self.machine.running() {
            if self.machine.fail(index).is_ok() {
                warn!(step = index, reason, "step failed");
                self.ctx.events.step(index, StepStatus::Failed);
            }
        }
    }

    fn reset_from(&mut self, index: usize) -> Result<(), StageError> {
        let changed = self.machine.reset_from(index).map_err(transition_failed)?;
        for i in changed {
            self.ctx.events.step(i, StepStatus::Pending);
        }
        self.ctx.events.fraction(self.machine.progress_fraction());
        Ok(())
    }
}
