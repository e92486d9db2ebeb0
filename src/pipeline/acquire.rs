//! Image acquisition: verify uploaded images or fetch them with a plugin.

use super::intake::{count_images, ImageCounts};
use super::StageContext;
use crate::error::{StageError, WorkflowError};
use crate::session::{InputMethod, WorkflowSession};
use std::path::Path;
use tracing::{info, warn};

/// Write `text` to `path` exactly as given, creating parent directories.
///
/// Writes to a sibling `.tmp` file first and renames it into place so a
/// crashed run never leaves a half-written decklist behind.
pub async fn write_decklist(path: &Path, text: &str) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| WorkflowError::io(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, text.as_bytes())
        .await
        .map_err(|e| WorkflowError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| WorkflowError::io(path, e))?;
    Ok(())
}

/// Run the acquisition branch chosen by the observer.
pub(crate) async fn acquire(
    ctx: &StageContext,
    session: &WorkflowSession,
    method: &InputMethod,
) -> Result<ImageCounts, StageError> {
    ctx.check_cancelled()?;
    match method {
        InputMethod::Upload => verify_upload(ctx, session).await,
        InputMethod::Plugin { decklist, source } => {
            fetch_with_plugin(ctx, session, decklist, source).await
        }
    }
}

async fn verify_upload(ctx: &StageContext, session: &WorkflowSession) -> Result<ImageCounts, StageError> {
    let counts = count_images(session, &ctx.config).await?;
    if counts.total() == 0 {
        return Err(WorkflowError::input(
            "no images acquired: both intake directories are empty",
        )
        .into());
    }
    log_counts(ctx, counts);
    Ok(counts)
}

async fn fetch_with_plugin(
    ctx: &StageContext,
    session: &WorkflowSession,
    decklist: &str,
    source: &crate::plugins::PluginSource,
) -> Result<ImageCounts, StageError> {
    let events = &ctx.events;
    if decklist.trim().is_empty() {
        return Err(WorkflowError::input("no decklist provided").into());
    }

    write_decklist(&session.decklist, decklist).await?;
    events.log(format!("Decklist saved to {}", session.decklist.display()));

    events.log(format!(
        "Downloading card images with {} ({})...",
        source.game, source.method
    ));
    let outcome = ctx
        .run_logged(session, session.fetch_argv(source), "", |e| {
            WorkflowError::Acquisition {
                exit_code: None,
                stderr: e.to_string(),
            }
        })
        .await?;

    if !outcome.success() {
        warn!(exit_code = ?outcome.exit_code, plugin = %source.dir, "fetch failed");
        return Err(WorkflowError::Acquisition {
            exit_code: outcome.exit_code,
            stderr: outcome.stderr,
        }
        .into());
    }
    if !outcome.stderr.trim().is_empty() {
        for line in outcome.stderr.lines().filter(|l| !l.trim().is_empty()) {
            events.log(format!("stderr: {}", line.trim_end()));
        }
    }

    let counts = count_images(session, &ctx.config).await?;
    if counts.total() == 0 {
        warn!(plugin = %source.dir, "fetch succeeded but no images were found");
        events.log("Warning: the fetch finished but no images were found");
    }
    log_counts(ctx, counts);
    info!(front = counts.front, double_sided = counts.double_sided, "images acquired");
    Ok(counts)
}

fn log_counts(ctx: &StageContext, counts: ImageCounts) {
    ctx.events.log(format!(
        "Card images ready: {} front, {} double-sided, {} total",
        counts.front,
        counts.double_sided,
        counts.total()
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::process::ProcessSupervisor;
    use crate::progress::EventSink;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> StageContext {
        let (events, _rx) = EventSink::channel();
        StageContext {
            events,
            cancel: CancellationToken::new(),
            supervisor: ProcessSupervisor::default(),
            config: Arc::new(WorkflowConfig::default()),
        }
    }

    #[tokio::test]
    async fn decklist_round_trips_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("game/decklist/my_decklist.txt");
        write_decklist(&path, "4 Forest\n4 Island").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4 Forest\n4 Island");
        assert!(!path.with_extension("tmp").exists());

        write_decklist(&path, "1 Sol Ring\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1 Sol Ring\n");
    }

    #[tokio::test]
    async fn empty_upload_is_input_error() {
        let root = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let session = WorkflowSession::resolve(root.path(), &ctx.config).unwrap();
        let err = acquire(&ctx, &session, &InputMethod::Upload)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Failed(WorkflowError::Input { ref reason }) if reason.contains("no images acquired")
        ));
    }

    #[tokio::test]
    async fn upload_counts_both_directories() {
        let root = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let session = WorkflowSession::resolve(root.path(), &ctx.config).unwrap();
        std::fs::create_dir_all(&session.double_sided_dir).unwrap();
        std::fs::write(session.double_sided_dir.join("dfc.png"), b"x").unwrap();
        let counts = acquire(&ctx, &session, &InputMethod::Upload).await.unwrap();
        assert_eq!(counts.total(), 1);
        assert_eq!(counts.double_sided, 1);
    }

    #[tokio::test]
    async fn blank_decklist_is_rejected_before_spawning() {
        let root = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let session = WorkflowSession::resolve(root.path(), &ctx.config).unwrap();
        let method = InputMethod::Plugin {
            decklist: "  \n ".into(),
            source: crate::plugins::PluginRegistry::builtin()
                .resolve(&crate::plugins::PluginRef::new("Lorcana", "Dreamborn"))
                .unwrap(),
        };
        let err = acquire(&ctx, &session, &method).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Failed(WorkflowError::Input { ref reason }) if reason == "no decklist provided"
        ));
        assert!(!session.decklist.exists());
    }
}
