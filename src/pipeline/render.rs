//! PDF rendering: run the renderer, then find what it produced.
//!
//! ## Why search instead of asking the renderer?
//!
//! The renderer names its output from its own flags (`--output_path`, the
//! deck name, a timestamp) and does not report it. The newest file with the
//! artifact extension is the reliable answer. Search order is the output
//! directory, then the project root, then configured fallbacks; the first
//! location holding any candidate wins, and within it the most recently
//! modified file is chosen.

use super::StageContext;
use crate::error::{StageError, WorkflowError};
use crate::session::WorkflowSession;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Run the renderer with `args` and locate the newest artifact.
///
/// `Ok(None)` means the renderer succeeded but no artifact was found.
pub(crate) async fn render(
    ctx: &StageContext,
    session: &WorkflowSession,
    args: &[String],
) -> Result<Option<PathBuf>, StageError> {
    let events = &ctx.events;
    events.log("Creating PDF...");

    let outcome = ctx
        .run_logged(session, session.render_argv(args), "", |e| WorkflowError::Render {
            exit_code: None,
            stderr: e.to_string(),
        })
        .await?;
    if !outcome.success() {
        warn!(exit_code = ?outcome.exit_code, "renderer failed");
        return Err(WorkflowError::Render {
            exit_code: outcome.exit_code,
            stderr: outcome.stderr,
        }
        .into());
    }
    events.log("PDF created successfully");

    let extension = ctx.config.artifact_extension.clone();
    let dirs = session.artifact_dirs.clone();
    let skip = vec![session.env_dir.clone()];
    let searched = tokio::task::spawn_blocking(move || search_artifacts(&dirs, &extension, &skip))
        .await
        .map_err(|e| WorkflowError::Internal(format!("artifact search task failed: {e}")))?;

    for dir in &searched.visited {
        events.log(format!("Searched for PDF files in {}", dir.display()));
    }
    match &searched.newest {
        Some(path) => {
            info!(artifact = %path.display(), "newest artifact");
            events.log(format!("Most recent PDF: {}", path.display()));
        }
        None => events.log("No PDF file was found in the output locations"),
    }
    Ok(searched.newest)
}

struct ArtifactSearch {
    visited: Vec<PathBuf>,
    newest: Option<PathBuf>,
}

fn search_artifacts(dirs: &[PathBuf], extension: &str, skip: &[PathBuf]) -> ArtifactSearch {
    let mut visited = Vec::new();
    for dir in dirs.iter().filter(|d| d.is_dir()) {
        visited.push(dir.clone());
        if let Some(found) = newest_in(dir, extension, skip) {
            return ArtifactSearch {
                visited,
                newest: Some(found),
            };
        }
    }
    ArtifactSearch {
        visited,
        newest: None,
    }
}

/// Newest file under `dirs` (first directory with any match wins) whose
/// extension equals `extension`, ignoring case.
pub fn find_newest_artifact(dirs: &[PathBuf], extension: &str) -> Option<PathBuf> {
    search_artifacts(dirs, extension, &[]).newest
}

/// Recursive search of one directory, skipping `skip` subtrees and
/// hidden directories.
fn newest_in(dir: &Path, extension: &str, skip: &[PathBuf]) -> Option<PathBuf> {
    let wanted = extension.trim_start_matches('.');
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let hidden = e.file_name().to_string_lossy().starts_with('.');
            !hidden && !skip.iter().any(|s| s == e.path())
        })
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .map(|x| x.eq_ignore_ascii_case(wanted))
                .unwrap_or(false)
        })
        .map(|e| {
            let modified = e
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.into_path())
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn touch(path: &Path, age_secs: u64) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"%PDF-1.7").unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        let f = std::fs::File::options().write(true).open(path).unwrap();
        f.set_modified(when).unwrap();
    }

    #[test]
    fn newest_wins_case_insensitively() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("game/output");
        touch(&out.join("old.pdf"), 600);
        touch(&out.join("nested/NEW.PDF"), 5);
        touch(&out.join("notes.txt"), 0);

        let found = find_newest_artifact(&[out.clone()], "pdf").unwrap();
        assert!(found.ends_with("nested/NEW.PDF"), "{found:?}");
    }

    #[test]
    fn falls_back_to_later_directories() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("game/output");
        std::fs::create_dir_all(&out).unwrap();
        touch(&root.path().join("game/deck.pdf"), 10);

        let dirs = vec![out, root.path().join("game")];
        let found = find_newest_artifact(&dirs, "pdf").unwrap();
        assert!(found.ends_with("game/deck.pdf"));
    }

    #[test]
    fn first_directory_with_a_match_wins() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("game/output");
        touch(&out.join("deck.pdf"), 300);
        touch(&root.path().join("fresher.pdf"), 1);

        let dirs = vec![out, root.path().to_path_buf()];
        let found = find_newest_artifact(&dirs, "pdf").unwrap();
        assert!(found.ends_with("game/output/deck.pdf"));
    }

    #[test]
    fn nothing_found_is_none() {
        let root = tempfile::tempdir().unwrap();
        let dirs = vec![root.path().join("missing"), root.path().to_path_buf()];
        assert_eq!(find_newest_artifact(&dirs, "pdf"), None);
    }

    #[test]
    fn skipped_and_hidden_directories_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("venv/lib/doc.pdf"), 0);
        touch(&root.path().join(".cache/x.pdf"), 0);
        let search = search_artifacts(
            &[root.path().to_path_buf()],
            "pdf",
            &[root.path().join("venv")],
        );
        assert_eq!(search.newest, None);
        assert_eq!(search.visited.len(), 1);
    }
}
