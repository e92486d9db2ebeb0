//! Intake directories: counting and cleaning card images.
//!
//! Only regular files directly inside an intake directory whose extension is
//! a supported image format are considered. Anything else (sub-directories,
//! `.gitkeep`, notes) is left alone.

use super::StageContext;
use crate::config::WorkflowConfig;
use crate::error::{StageError, WorkflowError};
use crate::session::WorkflowSession;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Image counts per intake directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCounts {
    pub front: usize,
    pub double_sided: usize,
}

impl ImageCounts {
    pub fn total(&self) -> usize {
        self.front + self.double_sided
    }
}

/// Supported images directly inside `dir`, sorted. A missing directory
/// yields an empty list.
pub async fn list_images(dir: &Path, config: &WorkflowConfig) -> Result<Vec<PathBuf>, WorkflowError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(WorkflowError::io(dir, e)),
    };
    let mut images = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| WorkflowError::io(dir, e))?
    {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file && config.is_supported_image(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Count supported images in both intake directories of `session`.
pub async fn count_images(
    session: &WorkflowSession,
    config: &WorkflowConfig,
) -> Result<ImageCounts, WorkflowError> {
    Ok(ImageCounts {
        front: list_images(&session.front_dir, config).await?.len(),
        double_sided: list_images(&session.double_sided_dir, config).await?.len(),
    })
}

/// Delete every supported image from both intake directories.
///
/// Missing directories are reported and created. Individual deletion
/// failures are logged and skipped. Returns the number of files removed.
pub(crate) async fn clean(ctx: &StageContext, session: &WorkflowSession) -> Result<usize, StageError> {
    let events = &ctx.events;
    let mut removed = 0;

    for dir in session.intake_dirs() {
        ctx.check_cancelled()?;
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "intake directory missing");
            events.log(format!(
                "Warning: directory not found: {}; creating it",
                dir.display()
            ));
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| WorkflowError::io(dir, e))?;
            continue;
        }

        let mut removed_here = 0;
        for image in list_images(dir, &ctx.config).await? {
            match tokio::fs::remove_file(&image).await {
                Ok(()) => {
                    debug!(file = %image.display(), "removed");
                    removed_here += 1;
                }
                Err(e) => {
                    warn!(file = %image.display(), error = %e, "could not remove image");
                    events.log(format!("Warning: could not delete {}: {e}", image.display()));
                }
            }
        }
        events.log(format!(
            "Cleaned {removed_here} image(s) from {}",
            dir.display()
        ));
        removed += removed_here;
    }

    info!(removed, "intake directories cleaned");
    events.log(format!("Removed {removed} image(s) in total"));
    Ok(removed)
}
