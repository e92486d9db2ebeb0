//! The fixed list of pipeline steps and their status transitions.
//!
//! [`StepStateMachine`] is the single owner of step status. Every mutation
//! goes through [`begin`](StepStateMachine::begin),
//! [`complete`](StepStateMachine::complete), [`fail`](StepStateMachine::fail)
//! or [`reset_from`](StepStateMachine::reset_from), which together enforce
//! that at most one step is `Running` at any instant.
//!
//! ```text
//! Pending ──begin──▶ Running ──complete──▶ Completed
//!    ▲                  │
//!    │                  └────fail────────▶ Failed
//!    └──────────────reset_from (redo)──────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One entry of the pipeline. Only `status` ever changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStep {
    pub index: usize,
    pub label: &'static str,
    pub status: StepStatus,
}

pub const LOCATE_PROJECT: usize = 0;
pub const CREATE_ENVIRONMENT: usize = 1;
pub const INSTALL_REQUIREMENTS: usize = 2;
pub const CLEAN_INTAKE: usize = 3;
pub const CHOOSE_INPUT: usize = 4;
pub const ACQUIRE_IMAGES: usize = 5;
pub const CREATE_PDF: usize = 6;

/// Labels of the standard card workflow, in execution order.
pub const WORKFLOW_STEPS: [&str; 7] = [
    "Locate project directory",
    "Create dependency environment",
    "Install requirements",
    "Clean image directories",
    "Choose input method",
    "Acquire card images",
    "Create PDF",
];

/// Rejected transition. Returned instead of silently corrupting state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("step {0} does not exist")]
    UnknownStep(usize),

    #[error("cannot begin step {requested}: step {running} is still running")]
    AnotherRunning { requested: usize, running: usize },

    #[error("step {index} is {status}, expected {expected}")]
    InvalidState {
        index: usize,
        status: StepStatus,
        expected: StepStatus,
    },
}

/// Ordered steps with mutual exclusion on `Running`.
#[derive(Debug, Clone)]
pub struct StepStateMachine {
    steps: Vec<PipelineStep>,
}

impl StepStateMachine {
    pub fn new(labels: &[&'static str]) -> Self {
        let steps = labels
            .iter()
            .enumerate()
            .map(|(index, label)| PipelineStep {
                index,
                label,
                status: StepStatus::Pending,
            })
            .collect();
        Self { steps }
    }

    /// The seven-step card workflow.
    pub fn workflow() -> Self {
        Self::new(&WORKFLOW_STEPS)
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn status(&self, index: usize) -> Option<StepStatus> {
        self.steps.get(index).map(|s| s.status)
    }

    pub fn label(&self, index: usize) -> Option<&'static str> {
        self.steps.get(index).map(|s| s.label)
    }

    /// Index of the step currently running, if any.
    pub fn running(&self) -> Option<usize> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Running)
            .map(|s| s.index)
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// `completed / total`, in `[0, 1]`. An empty machine reports 0.
    pub fn progress_fraction(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.completed_count() as f64 / self.steps.len() as f64
    }

    /// Pending → Running. Fails if any other step is running.
    pub fn begin(&mut self, index: usize) -> Result<(), TransitionError> {
        if let Some(running) = self.running() {
            return Err(TransitionError::AnotherRunning {
                requested: index,
                running,
            });
        }
        self.transition(index, StepStatus::Pending, StepStatus::Running)
    }

    /// Running → Completed.
    pub fn complete(&mut self, index: usize) -> Result<(), TransitionError> {
        self.transition(index, StepStatus::Running, StepStatus::Completed)
    }

    /// Running → Failed.
    pub fn fail(&mut self, index: usize) -> Result<(), TransitionError> {
        self.transition(index, StepStatus::Running, StepStatus::Failed)
    }

    /// Reset every step from `index` to the end back to `Pending`.
    ///
    /// Returns the indices whose status actually changed, in order. The
    /// completed count drops by the number of previously completed steps in
    /// the suffix, so the progress fraction can move backwards.
    pub fn reset_from(&mut self, index: usize) -> Result<Vec<usize>, TransitionError> {
        if index >= self.steps.len() {
            return Err(TransitionError::UnknownStep(index));
        }
        if let Some(running) = self.running() {
            return Err(TransitionError::AnotherRunning {
                requested: index,
                running,
            });
        }
        let mut changed = Vec::new();
        for step in &mut self.steps[index..] {
            if step.status != StepStatus::Pending {
                step.status = StepStatus::Pending;
                changed.push(step.index);
            }
        }
        Ok(changed)
    }

    fn transition(
        &mut self,
        index: usize,
        expected: StepStatus,
        next: StepStatus,
    ) -> Result<(), TransitionError> {
        let step = self
            .steps
            .get_mut(index)
            .ok_or(TransitionError::UnknownStep(index))?;
        if step.status != expected {
            return Err(TransitionError::InvalidState {
                index,
                status: step.status,
                expected,
            });
        }
        step.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_through(m: &mut StepStateMachine, upto: usize) {
        for i in 0..upto {
            m.begin(i).unwrap();
            m.complete(i).unwrap();
        }
    }

    #[test]
    fn workflow_has_seven_pending_steps() {
        let m = StepStateMachine::workflow();
        assert_eq!(m.len(), 7);
        assert!(m.steps().iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(m.label(CREATE_PDF), Some("Create PDF"));
        assert_eq!(m.progress_fraction(), 0.0);
    }

    #[test]
    fn begin_rejects_second_running_step() {
        let mut m = StepStateMachine::workflow();
        m.begin(0).unwrap();
        let err = m.begin(1).unwrap_err();
        assert_eq!(
            err,
            TransitionError::AnotherRunning {
                requested: 1,
                running: 0
            }
        );
        assert_eq!(m.running(), Some(0));
    }

    #[test]
    fn at_most_one_running_across_a_sequence() {
        let mut m = StepStateMachine::workflow();
        let ops: &[(&str, usize)] = &[
            ("begin", 0),
            ("begin", 1),
            ("complete", 0),
            ("begin", 1),
            ("begin", 2),
            ("fail", 1),
            ("begin", 2),
            ("complete", 2),
            ("begin", 3),
        ];
        for (op, idx) in ops {
            let _ = match *op {
                "begin" => m.begin(*idx),
                "complete" => m.complete(*idx),
                _ => m.fail(*idx),
            };
            let running = m
                .steps()
                .iter()
                .filter(|s| s.status == StepStatus::Running)
                .count();
            assert!(running <= 1, "after {op} {idx}: {running} running");
        }
    }

    #[test]
    fn complete_requires_running() {
        let mut m = StepStateMachine::workflow();
        assert!(matches!(
            m.complete(2),
            Err(TransitionError::InvalidState { index: 2, .. })
        ));
        assert!(matches!(m.fail(99), Err(TransitionError::UnknownStep(99))));
    }

    #[test]
    fn fraction_tracks_completed_count() {
        let mut m = StepStateMachine::workflow();
        for i in 0..m.len() {
            m.begin(i).unwrap();
            m.complete(i).unwrap();
            let expected = (i + 1) as f64 / 7.0;
            assert!((m.progress_fraction() - expected).abs() < 1e-12);
        }
        assert_eq!(m.progress_fraction(), 1.0);
    }

    #[test]
    fn redo_suffix_drops_completed_count_by_k() {
        let mut m = StepStateMachine::workflow();
        run_through(&mut m, ACQUIRE_IMAGES + 1);
        let before = m.completed_count();
        assert_eq!(before, 6);

        let changed = m.reset_from(CLEAN_INTAKE).unwrap();
        assert_eq!(changed, vec![CLEAN_INTAKE, CHOOSE_INPUT, ACQUIRE_IMAGES]);
        assert_eq!(m.completed_count(), before - 3);
        assert!((m.progress_fraction() - 3.0 / 7.0).abs() < 1e-12);

        // Redone steps can run again.
        m.begin(CLEAN_INTAKE).unwrap();
        m.complete(CLEAN_INTAKE).unwrap();
    }

    #[test]
    fn reset_resets_failed_steps_too() {
        let mut m = StepStateMachine::workflow();
        run_through(&mut m, 5);
        m.begin(ACQUIRE_IMAGES).unwrap();
        m.fail(ACQUIRE_IMAGES).unwrap();
        let changed = m.reset_from(ACQUIRE_IMAGES).unwrap();
        assert_eq!(changed, vec![ACQUIRE_IMAGES]);
        assert_eq!(m.status(ACQUIRE_IMAGES), Some(StepStatus::Pending));
    }

    #[test]
    fn reset_refused_while_running() {
        let mut m = StepStateMachine::workflow();
        m.begin(0).unwrap();
        assert!(m.reset_from(0).is_err());
        assert!(m.reset_from(42).is_err());
    }
}
