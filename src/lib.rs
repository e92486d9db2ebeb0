//! # deckpress
//!
//! Drive the card-image workflow of a card-maker project: prepare its Python
//! environment, acquire card images (manual upload or a fetch plugin), let a
//! person review them, and render a printable PDF.
//!
//! ## Why this crate?
//!
//! The heavy lifting happens in external programs: a venv, `pip`, a plugin
//! fetch script, a PDF renderer. What is hard is orchestrating them: never
//! blocking whoever is watching, streaming their output as it happens,
//! pausing for human decisions, cancelling cleanly without orphaned
//! processes, and redoing a stage without repeating the whole run. That
//! orchestration is this crate.
//!
//! ## Pipeline Overview
//!
//! ```text
//! project root
//!  │
//!  ├─ 0. Locate    resolve every session path once
//!  ├─ 1. Env       create venv (skipped if present)
//!  ├─ 2. Install   pip install -r requirements.txt (skipped if absent)
//!  ├─ 3. Clean     delete stale images from the intake directories
//!  ├─ 4. Choose    ◆ decision: upload | plugin(decklist, game, method)
//!  ├─ 5. Acquire   count uploads, or run plugins/<game>/fetch.py
//!  │               ◆ decision: render(args) | redo (back to 3) | skip
//!  └─ 6. Render    create_pdf.py [flags], then find the newest PDF
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deckpress::{InputChoice, ProgressEvent, RenderOptions, ReviewDecision, WorkflowConfig, WorkflowEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = WorkflowEngine::new(WorkflowConfig::default());
//!     let mut run = engine.start("./silhouette-card-maker")?;
//!     let control = run.control();
//!     let args = RenderOptions::builder().ppi(300).build()?.to_args();
//!
//!     while let Some(event) = run.next_event().await {
//!         match event {
//!             ProgressEvent::LogLine { text, .. } => println!("{text}"),
//!             ProgressEvent::DecisionRequested { kind } => match kind {
//!                 deckpress::DecisionKind::InputMethod => {
//!                     control.resolve_input(InputChoice::Upload);
//!                 }
//!                 deckpress::DecisionKind::Review => {
//!                     control.resolve_review(ReviewDecision::Render(args.clone()));
//!                 }
//!             },
//!             ProgressEvent::TerminalOutcome { outcome } => println!("{outcome:?}"),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deckpress` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! deckpress = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod plugins;
pub mod process;
pub mod progress;
pub mod session;
pub mod steps;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{validate_project_root, WorkflowConfig, WorkflowConfigBuilder};
pub use engine::{RunControl, WorkflowEngine, WorkflowRun};
pub use error::{ErrorKind, ProcessError, WorkflowError};
pub use options::{CardSize, Crop, CropUnit, PaperSize, RenderOptions, RenderOptionsBuilder};
pub use pipeline::acquire::write_decklist;
pub use pipeline::intake::{count_images, ImageCounts};
pub use pipeline::render::find_newest_artifact;
pub use plugins::{GamePlugins, PluginMethod, PluginRef, PluginRegistry, PluginSource};
pub use process::{ExternalInvocation, LiveHandle, ProcessEvent, ProcessOutcome, ProcessSupervisor};
pub use progress::{DecisionKind, NoopObserver, Outcome, ProgressEvent, RunState, WorkflowObserver};
pub use session::{InputChoice, InputMethod, ReviewDecision, WorkflowSession};
pub use steps::{PipelineStep, StepStateMachine, StepStatus, TransitionError, WORKFLOW_STEPS};
pub use stream::{final_outcome, EventStream};
