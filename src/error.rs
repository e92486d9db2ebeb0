//! Error types for the deckpress library.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`WorkflowError`] — **Fatal for a run**: the pipeline cannot move
//!   forward (environment creation failed, no images were acquired, the
//!   renderer exited non-zero). The engine converts these into a
//!   `TerminalOutcome` event; they never cross the background/observer
//!   boundary as an `Err`.
//!
//! * [`ProcessError`] — **Immediate supervisor failure**: the external
//!   program could not even be started (empty argv, missing working
//!   directory, program not on `PATH`). A child that starts and then exits
//!   non-zero is *not* a `ProcessError`; it is an ordinary
//!   [`crate::process::ProcessOutcome`] for the caller to interpret.
//!
//! User cancellation is neither: it is a distinct terminal outcome, carried
//! internally by `StageError::Cancelled`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors produced by the deckpress library.
#[derive(Debug, Error)]
pub enum WorkflowError {
    // ── Stage errors ──────────────────────────────────────────────────────
    /// Dependency environment creation or package installation failed.
    #[error("Environment setup failed: {reason}")]
    Environment { reason: String },

    /// No decklist, no images, or an unknown plugin selection.
    #[error("Input error: {reason}")]
    Input { reason: String },

    /// The plugin fetch command exited non-zero.
    #[error("Image download failed with exit code {}: {}", fmt_code(.exit_code), .stderr.trim())]
    Acquisition {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The renderer exited non-zero.
    #[error("PDF creation failed with exit code {}: {}", fmt_code(.exit_code), .stderr.trim())]
    Render {
        exit_code: Option<i32>,
        stderr: String,
    },

    // ── Caller errors ─────────────────────────────────────────────────────
    /// A renderer option failed validation before any process was spawned.
    #[error("Invalid render option: {0}")]
    InvalidOption(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called while another run is still active.
    #[error("A workflow run is already active; wait for it to finish or cancel it")]
    RunActive,

    /// The project root is missing or lacks the expected layout.
    #[error("Project directory not found or incomplete: '{path}'")]
    ProjectNotFound { path: PathBuf },

    /// The plugin registry file could not be parsed.
    #[error("Invalid plugin registry: {0}")]
    Registry(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A file-system operation on a session path failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn fmt_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

/// Coarse classification of a [`WorkflowError`], carried in terminal
/// outcome events so observers can react without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Environment,
    Input,
    Acquisition,
    Render,
    Other,
}

impl WorkflowError {
    pub fn environment(reason: impl Into<String>) -> Self {
        Self::Environment {
            reason: reason.into(),
        }
    }

    pub fn input(reason: impl Into<String>) -> Self {
        Self::Input {
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Environment { .. } => ErrorKind::Environment,
            Self::Input { .. } => ErrorKind::Input,
            Self::Acquisition { .. } => ErrorKind::Acquisition,
            Self::Render { .. } => ErrorKind::Render,
            _ => ErrorKind::Other,
        }
    }

    /// Whether the observer can sensibly offer a retry of the same stage.
    ///
    /// Only image acquisition qualifies: a fetch can fail on transient
    /// network trouble, and re-running it replays cleaning first.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Acquisition { .. })
    }
}

/// Immediate failure to launch an external program. No process was spawned.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Cannot run an empty command line")]
    EmptyCommand,

    #[error("Working directory does not exist: '{path}'")]
    WorkdirMissing { path: PathBuf },

    #[error("Program not found: '{program}'")]
    ProgramNotFound { program: String },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a stage stopped. Crate-internal; the engine maps it to an outcome.
#[derive(Debug, Error)]
pub(crate) enum StageError {
    #[error(transparent)]
    Failed(#[from] WorkflowError),

    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_display_carries_stderr() {
        let e = WorkflowError::Acquisition {
            exit_code: Some(2),
            stderr: "rate limited\n".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exit code 2"), "got: {msg}");
        assert!(msg.contains("rate limited"), "got: {msg}");
        assert!(!msg.ends_with('\n'));
    }

    #[test]
    fn signal_exit_display() {
        let e = WorkflowError::Render {
            exit_code: None,
            stderr: String::new(),
        };
        assert!(e.to_string().contains("terminated by signal"));
    }

    #[test]
    fn kinds_and_recoverability() {
        assert_eq!(
            WorkflowError::environment("venv").kind(),
            ErrorKind::Environment
        );
        assert_eq!(WorkflowError::input("none").kind(), ErrorKind::Input);
        assert_eq!(WorkflowError::RunActive.kind(), ErrorKind::Other);

        let fetch = WorkflowError::Acquisition {
            exit_code: Some(1),
            stderr: String::new(),
        };
        assert!(fetch.is_recoverable());
        assert!(!WorkflowError::input("x").is_recoverable());
    }
}
