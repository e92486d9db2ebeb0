//! Run-scoped state.
//!
//! A [`WorkflowSession`] is created when a run starts and dropped when it
//! ends. Every on-disk location the stages touch is resolved once in
//! [`WorkflowSession::resolve`]; stages read paths from here and never
//! re-derive them, so the intake directories cleaned before a decision are
//! the same ones counted after it.

use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::plugins::{PluginRef, PluginSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Observer's answer to the input-method decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum InputChoice {
    /// Images were placed into the intake directories by the caller.
    Upload,
    /// Fetch images with a plugin from a decklist.
    Plugin { decklist: String, plugin: PluginRef },
}

/// Observer's answer to the review decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Render with this finished argument list.
    Render(Vec<String>),
    /// Clean the intake directories and acquire again.
    Redo,
    /// Finish without rendering.
    Skip,
}

/// An [`InputChoice`] after plugin lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMethod {
    Upload,
    Plugin {
        decklist: String,
        source: PluginSource,
    },
}

/// Paths and choices for one run.
#[derive(Debug, Clone)]
pub struct WorkflowSession {
    pub root: PathBuf,
    pub env_dir: PathBuf,
    pub env_python: PathBuf,
    pub manifest: PathBuf,
    pub decklist: PathBuf,
    pub front_dir: PathBuf,
    pub double_sided_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Artifact search order: output, root, then configured fallbacks.
    pub artifact_dirs: Vec<PathBuf>,
    pub input: Option<InputMethod>,
    pub render_args: Vec<String>,

    // Root-relative forms handed to child processes, which run in `root`.
    rel_env_dir: PathBuf,
    rel_decklist: PathBuf,
    rel_render_entry: PathBuf,
    rel_plugins_dir: PathBuf,
    fetch_entry: String,
    interpreter: String,
    installer_module: String,
}

impl WorkflowSession {
    /// Resolve every session path against `root`.
    ///
    /// # Errors
    /// [`WorkflowError::ProjectNotFound`] if `root` is not an existing directory.
    pub fn resolve(root: &Path, config: &WorkflowConfig) -> Result<Self, WorkflowError> {
        if !root.is_dir() {
            return Err(WorkflowError::ProjectNotFound {
                path: root.to_path_buf(),
            });
        }
        let root = std::path::absolute(root).map_err(|e| WorkflowError::io(root, e))?;
        let env_dir = root.join(&config.env_dir);

        let mut artifact_dirs = vec![root.join(&config.output_dir), root.clone()];
        artifact_dirs.extend(config.artifact_fallback_dirs.iter().map(|d| root.join(d)));
        artifact_dirs.dedup();

        Ok(Self {
            env_python: config.env_interpreter(&env_dir),
            env_dir,
            manifest: root.join(&config.manifest),
            decklist: root.join(&config.decklist),
            front_dir: root.join(&config.front_dir),
            double_sided_dir: root.join(&config.double_sided_dir),
            output_dir: root.join(&config.output_dir),
            artifact_dirs,
            input: None,
            render_args: Vec::new(),
            rel_env_dir: config.env_dir.clone(),
            rel_decklist: config.decklist.clone(),
            rel_render_entry: config.render_entry.clone(),
            rel_plugins_dir: config.plugins_dir.clone(),
            fetch_entry: config.fetch_entry.clone(),
            interpreter: config.interpreter.clone(),
            installer_module: config.installer_module.clone(),
            root,
        })
    }

    /// The root is still a directory. Checked again before a redo cleans.
    pub fn verify_root(&self) -> Result<(), WorkflowError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(WorkflowError::ProjectNotFound {
                path: self.root.clone(),
            })
        }
    }

    pub fn intake_dirs(&self) -> [&Path; 2] {
        [&self.front_dir, &self.double_sided_dir]
    }

    // ── Command lines ─────────────────────────────────────────────────────

    /// `<interpreter> -m venv <env-dir>`
    pub fn create_env_argv(&self) -> Vec<String> {
        vec![
            self.interpreter.clone(),
            "-m".into(),
            "venv".into(),
            path_arg(&self.rel_env_dir),
        ]
    }

    /// `<env-python> -m <installer> install -r <manifest>`
    pub fn install_argv(&self) -> Vec<String> {
        vec![
            path_arg(&self.env_python),
            "-m".into(),
            self.installer_module.clone(),
            "install".into(),
            "-r".into(),
            path_arg(&self.manifest),
        ]
    }

    /// `<env-python> <plugins>/<dir>/<fetch-entry> <decklist> <source>`
    pub fn fetch_argv(&self, source: &PluginSource) -> Vec<String> {
        let script = self
            .rel_plugins_dir
            .join(&source.dir)
            .join(&self.fetch_entry);
        vec![
            path_arg(&self.env_python),
            path_arg(&script),
            path_arg(&self.rel_decklist),
            source.source.clone(),
        ]
    }

    /// `<env-python> <render-entry> [args...]`
    pub fn render_argv(&self, args: &[String]) -> Vec<String> {
        let mut argv = vec![path_arg(&self.env_python), path_arg(&self.rel_render_entry)];
        argv.extend(args.iter().cloned());
        argv
    }
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> PluginSource {
        PluginSource {
            game: "Magic: The Gathering".into(),
            method: "Moxfield".into(),
            dir: "mtg".into(),
            source: "moxfield".into(),
        }
    }

    #[test]
    fn missing_root_is_project_not_found() {
        let err = WorkflowSession::resolve(
            Path::new("/no/such/deckpress/root"),
            &WorkflowConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::ProjectNotFound { .. }));
    }

    #[test]
    fn paths_resolve_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let s = WorkflowSession::resolve(dir.path(), &WorkflowConfig::default()).unwrap();
        assert!(s.front_dir.ends_with("game/front"));
        assert!(s.double_sided_dir.ends_with("game/double_sided"));
        assert!(s.decklist.ends_with("game/decklist/my_decklist.txt"));
        assert!(s.front_dir.starts_with(&s.root));
        assert_eq!(s.artifact_dirs[0], s.output_dir);
        assert_eq!(s.artifact_dirs[1], s.root);
        assert_eq!(s.artifact_dirs[2], s.root.join("game"));
        assert!(s.input.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn command_lines_match_project_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkflowConfig::builder().interpreter("python3").build().unwrap();
        let s = WorkflowSession::resolve(dir.path(), &config).unwrap();
        let py = s.env_python.to_string_lossy().into_owned();
        assert!(py.ends_with("venv/bin/python"));

        assert_eq!(s.create_env_argv(), vec!["python3", "-m", "venv", "venv"]);
        assert_eq!(&s.install_argv()[1..5], ["-m", "pip", "install", "-r"]);
        assert_eq!(
            s.fetch_argv(&source()),
            vec![
                py.clone(),
                "plugins/mtg/fetch.py".to_string(),
                "game/decklist/my_decklist.txt".to_string(),
                "moxfield".to_string()
            ]
        );
        assert_eq!(
            s.render_argv(&["--ppi".into(), "300".into()]),
            vec![py, "create_pdf.py".into(), "--ppi".into(), "300".into()]
        );
    }

    #[test]
    fn choices_serialise_as_tagged() {
        let json = serde_json::to_string(&InputChoice::Upload).unwrap();
        assert_eq!(json, r#"{"method":"upload"}"#);
        let json = serde_json::to_string(&ReviewDecision::Skip).unwrap();
        assert_eq!(json, r#"{"action":"skip"}"#);
    }
}
