//! Dependency environment: create it once, then install the manifest.
//!
//! Both operations are idempotent from the run's point of view: an existing
//! environment is reused as is, and a missing manifest skips installation.

use super::StageContext;
use crate::error::{StageError, WorkflowError};
use crate::session::WorkflowSession;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

/// Installer stderr lines that are advisory and never fail the step.
static ADVISORY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:WARNING|DEPRECATION|\[notice\])").expect("static regex"));

pub(crate) struct EnvironmentPreparer<'a> {
    ctx: &'a StageContext,
    session: &'a WorkflowSession,
}

impl<'a> EnvironmentPreparer<'a> {
    pub(crate) fn new(ctx: &'a StageContext, session: &'a WorkflowSession) -> Self {
        Self { ctx, session }
    }

    /// Create the environment unless its directory already exists.
    /// Returns whether anything was created.
    pub(crate) async fn create(&self) -> Result<bool, StageError> {
        let env_dir = &self.session.env_dir;
        let events = &self.ctx.events;

        let created = !env_dir.is_dir();
        if !created {
            events.log(format!(
                "Dependency environment already exists at {}",
                env_dir.display()
            ));
        } else {
            events.log("Creating dependency environment...");
            let outcome = self
                .ctx
                .run_logged(self.session, self.session.create_env_argv(), "", |e| {
                    WorkflowError::environment(e.to_string())
                })
                .await?;
            if !outcome.success() {
                return Err(WorkflowError::environment(format!(
                    "environment creation exited with code {}: {}",
                    code_str(outcome.exit_code),
                    outcome.stderr.trim()
                ))
                .into());
            }
            info!(env = %env_dir.display(), "dependency environment created");
            events.log("Dependency environment created");
        }

        if !self.session.env_python.exists() {
            return Err(WorkflowError::environment(format!(
                "interpreter not found at {}",
                self.session.env_python.display()
            ))
            .into());
        }
        Ok(created)
    }

    /// Install the manifest into the environment. Skipped when the manifest
    /// is absent. Returns whether the installer ran.
    pub(crate) async fn install(&self) -> Result<bool, StageError> {
        let manifest = &self.session.manifest;
        let events = &self.ctx.events;

        if !manifest.is_file() {
            events.log(format!(
                "No {} found; skipping package installation",
                file_name(manifest)
            ));
            return Ok(false);
        }

        events.log(format!("Installing packages from {}...", file_name(manifest)));
        let outcome = self
            .ctx
            .run_logged(self.session, self.session.install_argv(), "pip: ", |e| {
                WorkflowError::environment(e.to_string())
            })
            .await?;

        let mut errors = Vec::new();
        for line in outcome.stderr.lines().filter(|l| !l.trim().is_empty()) {
            if ADVISORY_LINE.is_match(line) {
                warn!(line, "installer warning");
                events.log(format!("pip warning: {}", line.trim()));
            } else {
                events.log(format!("pip error: {}", line.trim_end()));
                errors.push(line.trim());
            }
        }

        if !outcome.success() {
            let detail = if errors.is_empty() {
                outcome
                    .stderr
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .last()
                    .unwrap_or("no error output")
                    .to_string()
            } else {
                errors.join("\n")
            };
            return Err(WorkflowError::environment(format!(
                "package installation exited with code {}: {}",
                code_str(outcome.exit_code),
                detail
            ))
            .into());
        }
        events.log("Packages installed");
        Ok(true)
    }
}

fn code_str(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (terminated by signal)".into())
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_lines_are_recognised() {
        assert!(ADVISORY_LINE.is_match("WARNING: You are using pip version 21.0"));
        assert!(ADVISORY_LINE.is_match("DEPRECATION: legacy install"));
        assert!(ADVISORY_LINE.is_match("[notice] A new release of pip is available"));
        assert!(!ADVISORY_LINE.is_match("ERROR: No matching distribution found"));
        assert!(!ADVISORY_LINE.is_match("warnings are fun"));
    }

    #[test]
    fn signal_exit_is_spelled_out() {
        assert_eq!(code_str(Some(1)), "1");
        assert!(code_str(None).contains("signal"));
    }

    #[cfg(unix)]
    fn write_script(path: &std::path::Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn creates_once_then_installs() {
        use crate::config::WorkflowConfig;
        use crate::process::ProcessSupervisor;
        use crate::progress::{EventSink, ProgressEvent};
        use std::sync::Arc;
        use tokio_util::sync::CancellationToken;

        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("base-python");
        // `base-python -m venv venv` lays down an interpreter that fakes pip.
        write_script(
            &base,
            r#"mkdir -p "$3/bin"
cat > "$3/bin/python" <<'PY'
#!/bin/sh
echo "Collecting pillow"
echo "WARNING: pip is old" >&2
PY
chmod +x "$3/bin/python"
"#,
        );
        std::fs::write(root.path().join("requirements.txt"), "pillow\n").unwrap();

        let config = WorkflowConfig::builder()
            .interpreter(base.to_string_lossy())
            .build()
            .unwrap();
        let session = WorkflowSession::resolve(root.path(), &config).unwrap();
        let (events, mut rx) = EventSink::channel();
        let ctx = StageContext {
            events,
            cancel: CancellationToken::new(),
            supervisor: ProcessSupervisor::default(),
            config: Arc::new(config),
        };
        let preparer = EnvironmentPreparer::new(&ctx, &session);

        assert!(preparer.create().await.unwrap());
        assert!(preparer.install().await.unwrap());
        assert!(session.env_python.exists());
        assert!(!preparer.create().await.unwrap(), "second create is a no-op");

        drop(ctx);
        let mut logs = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ProgressEvent::LogLine { text, .. } = event {
                logs.push(text);
            }
        }
        assert!(logs.iter().any(|l| l == "pip: Collecting pillow"), "{logs:?}");
        assert!(logs.iter().any(|l| l == "pip warning: WARNING: pip is old"), "{logs:?}");
        assert!(!logs.iter().any(|l| l.starts_with("pip error")), "{logs:?}");
        assert!(logs.iter().any(|l| l.contains("already exists")), "{logs:?}");
    }

    #[cfg(unix)]
    async fn install_with(python: &str) -> Result<bool, StageError> {
        use crate::config::WorkflowConfig;
        use crate::process::ProcessSupervisor;
        use crate::progress::EventSink;
        use std::sync::Arc;
        use tokio_util::sync::CancellationToken;

        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("venv/bin");
        std::fs::create_dir_all(&bin).unwrap();
        write_script(&bin.join("python"), python);
        std::fs::write(root.path().join("requirements.txt"), "nothing\n").unwrap();

        let config = WorkflowConfig::default();
        let session = WorkflowSession::resolve(root.path(), &config).unwrap();
        let (events, _rx) = EventSink::channel();
        let ctx = StageContext {
            events,
            cancel: CancellationToken::new(),
            supervisor: ProcessSupervisor::default(),
            config: Arc::new(config),
        };
        EnvironmentPreparer::new(&ctx, &session).install().await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_installer_is_environment_error() {
        let err = install_with(
            "echo 'ERROR: No matching distribution found for nothing' >&2\nexit 1\n",
        )
        .await
        .unwrap_err();
        match err {
            StageError::Failed(e @ WorkflowError::Environment { .. }) => {
                let msg = e.to_string();
                assert!(msg.contains("exit code 1"), "{msg}");
                assert!(msg.contains("No matching distribution"), "{msg}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_with_only_warnings_still_has_a_reason() {
        let err = install_with("echo 'WARNING: Retrying after timeout' >&2\nexit 2\n")
            .await
            .unwrap_err();
        let msg = err_text(err);
        assert!(msg.ends_with("exit code 2: WARNING: Retrying after timeout"), "{msg}");

        let err = install_with("exit 2\n").await.unwrap_err();
        let msg = err_text(err);
        assert!(msg.ends_with("exit code 2: no error output"), "{msg}");
    }

    #[cfg(unix)]
    fn err_text(err: StageError) -> String {
        match err {
            StageError::Failed(e) => e.to_string(),
            StageError::Cancelled => panic!("unexpected cancellation"),
        }
    }
}
