//! Configuration for a workflow run.
//!
//! Everything that names an external program or an on-disk location lives in
//! [`WorkflowConfig`], built via its [`WorkflowConfigBuilder`]. The defaults
//! describe the standard card-maker project layout:
//!
//! ```text
//! <root>/
//!  ├─ venv/                      dependency environment
//!  ├─ requirements.txt           installer manifest
//!  ├─ create_pdf.py              renderer entry
//!  ├─ plugins/<game>/fetch.py    plugin fetch entries
//!  └─ game/
//!      ├─ decklist/my_decklist.txt
//!      ├─ front/                 single-faced intake
//!      ├─ double_sided/          double-faced intake
//!      └─ output/                rendered PDFs
//! ```
//!
//! Paths are relative to the project root and are resolved exactly once per
//! run by [`crate::session::WorkflowSession::resolve`].

use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Image extensions recognised in the intake directories (lower-case, no dot).
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif", "webp", "ico", "ppm", "pgm", "pbm", "pnm",
    "pcx", "dib", "eps", "ps", "pdf", "sgi", "tga", "xbm", "xpm",
];

/// Configuration for a card workflow run.
///
/// # Example
/// ```rust
/// use deckpress::WorkflowConfig;
///
/// let config = WorkflowConfig::builder()
///     .interpreter("python3.12")
///     .termination_grace_ms(2_000)
///     .build()
///     .unwrap();
/// assert_eq!(config.env_dir, std::path::PathBuf::from("venv"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Base interpreter used to create the environment. Default: `python3`
    /// (`python` on Windows).
    pub interpreter: String,

    /// Environment directory, relative to the root. Default: `venv`.
    pub env_dir: PathBuf,

    /// Installer manifest, relative to the root. Default: `requirements.txt`.
    /// A missing manifest skips installation.
    pub manifest: PathBuf,

    /// Module run with `-m` to install packages. Default: `pip`.
    pub installer_module: String,

    /// Renderer entry script. Default: `create_pdf.py`.
    pub render_entry: PathBuf,

    /// Directory holding one sub-directory per plugin. Default: `plugins`.
    pub plugins_dir: PathBuf,

    /// Script inside each plugin directory. Default: `fetch.py`.
    pub fetch_entry: String,

    /// Decklist file written for plugin fetches. Default: `game/decklist/my_decklist.txt`.
    pub decklist: PathBuf,

    /// Single-faced intake directory. Default: `game/front`.
    pub front_dir: PathBuf,

    /// Double-faced intake directory. Default: `game/double_sided`.
    pub double_sided_dir: PathBuf,

    /// Where the renderer writes artifacts. Default: `game/output`.
    pub output_dir: PathBuf,

    /// Extra artifact search locations, tried after `output_dir` and the
    /// root itself. Default: `game`.
    pub artifact_fallback_dirs: Vec<PathBuf>,

    /// Artifact extension, matched case-insensitively. Default: `pdf`.
    pub artifact_extension: String,

    /// Extensions counted and cleaned in the intake directories.
    pub image_extensions: BTreeSet<String>,

    /// Time between the polite termination request and the force-kill.
    /// Default: 5000 ms.
    pub termination_grace_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter().to_string(),
            env_dir: PathBuf::from("venv"),
            manifest: PathBuf::from("requirements.txt"),
            installer_module: "pip".to_string(),
            render_entry: PathBuf::from("create_pdf.py"),
            plugins_dir: PathBuf::from("plugins"),
            fetch_entry: "fetch.py".to_string(),
            decklist: PathBuf::from("game/decklist/my_decklist.txt"),
            front_dir: PathBuf::from("game/front"),
            double_sided_dir: PathBuf::from("game/double_sided"),
            output_dir: PathBuf::from("game/output"),
            artifact_fallback_dirs: vec![PathBuf::from("game")],
            artifact_extension: "pdf".to_string(),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            termination_grace_ms: 5_000,
        }
    }
}

fn default_interpreter() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

impl WorkflowConfig {
    /// Create a new builder for `WorkflowConfig`.
    pub fn builder() -> WorkflowConfigBuilder {
        WorkflowConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// Interpreter inside the environment at `env_root`.
    pub fn env_interpreter(&self, env_root: &Path) -> PathBuf {
        if cfg!(windows) {
            env_root.join("Scripts").join("python.exe")
        } else {
            env_root.join("bin").join("python")
        }
    }

    /// Case-insensitive extension membership test.
    pub fn is_supported_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.image_extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

/// Builder for [`WorkflowConfig`].
#[derive(Debug)]
pub struct WorkflowConfigBuilder {
    config: WorkflowConfig,
}

impl WorkflowConfigBuilder {
    pub fn interpreter(mut self, program: impl Into<String>) -> Self {
        self.config.interpreter = program.into();
        self
    }

    pub fn env_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.env_dir = dir.into();
        self
    }

    pub fn manifest(mut self, file: impl Into<PathBuf>) -> Self {
        self.config.manifest = file.into();
        self
    }

    pub fn installer_module(mut self, module: impl Into<String>) -> Self {
        self.config.installer_module = module.into();
        self
    }

    pub fn render_entry(mut self, script: impl Into<PathBuf>) -> Self {
        self.config.render_entry = script.into();
        self
    }

    pub fn plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.plugins_dir = dir.into();
        self
    }

    pub fn fetch_entry(mut self, script: impl Into<String>) -> Self {
        self.config.fetch_entry = script.into();
        self
    }

    pub fn decklist(mut self, file: impl Into<PathBuf>) -> Self {
        self.config.decklist = file.into();
        self
    }

    pub fn front_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.front_dir = dir.into();
        self
    }

    pub fn double_sided_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.double_sided_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn artifact_fallback_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.config.artifact_fallback_dirs = dirs;
        self
    }

    pub fn artifact_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.artifact_extension = ext.into().trim_start_matches('.').to_ascii_lowercase();
        self
    }

    pub fn image_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.image_extensions = exts
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn termination_grace_ms(mut self, ms: u64) -> Self {
        self.config.termination_grace_ms = ms.clamp(10, 120_000);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkflowConfig, WorkflowError> {
        let c = &self.config;
        if c.interpreter.trim().is_empty() {
            return Err(WorkflowError::InvalidConfig(
                "interpreter must not be empty".into(),
            ));
        }
        if c.fetch_entry.trim().is_empty() || c.installer_module.trim().is_empty() {
            return Err(WorkflowError::InvalidConfig(
                "fetch entry and installer module must not be empty".into(),
            ));
        }
        if c.image_extensions.is_empty() {
            return Err(WorkflowError::InvalidConfig(
                "at least one image extension is required".into(),
            ));
        }
        if c.artifact_extension.is_empty() {
            return Err(WorkflowError::InvalidConfig(
                "artifact extension must not be empty".into(),
            ));
        }
        for (name, p) in [
            ("env_dir", &c.env_dir),
            ("decklist", &c.decklist),
            ("front_dir", &c.front_dir),
            ("double_sided_dir", &c.double_sided_dir),
            ("output_dir", &c.output_dir),
        ] {
            if p.is_absolute() {
                return Err(WorkflowError::InvalidConfig(format!(
                    "{name} must be relative to the project root, got {}",
                    p.display()
                )));
            }
        }
        if c.front_dir == c.double_sided_dir {
            return Err(WorkflowError::InvalidConfig(
                "front and double-sided intake directories must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Check that `root` looks like a card-maker project: `game/`, `plugins/`
/// and the renderer entry must all exist.
pub fn validate_project_root(root: &Path, config: &WorkflowConfig) -> Result<(), WorkflowError> {
    let expected = [
        root.join("game"),
        root.join(&config.plugins_dir),
        root.join(&config.render_entry),
    ];
    if root.is_dir() && expected.iter().all(|p| p.exists()) {
        Ok(())
    } else {
        Err(WorkflowError::ProjectNotFound {
            path: root.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_project_layout() {
        let c = WorkflowConfig::default();
        assert_eq!(c.decklist, PathBuf::from("game/decklist/my_decklist.txt"));
        assert_eq!(c.output_dir, PathBuf::from("game/output"));
        assert_eq!(c.termination_grace(), Duration::from_secs(5));
        assert!(c.image_extensions.contains("webp"));
        assert!(c.image_extensions.contains("xpm"));
    }

    #[test]
    fn image_match_is_case_insensitive() {
        let c = WorkflowConfig::default();
        assert!(c.is_supported_image(Path::new("a/Card.PNG")));
        assert!(c.is_supported_image(Path::new("b.JpEg")));
        assert!(!c.is_supported_image(Path::new("notes.txt")));
        assert!(!c.is_supported_image(Path::new("README")));
    }

    #[test]
    fn builder_normalises_extensions() {
        let c = WorkflowConfig::builder()
            .image_extensions([".PNG", "jpg"])
            .artifact_extension(".PDF")
            .build()
            .unwrap();
        assert!(c.image_extensions.contains("png"));
        assert_eq!(c.artifact_extension, "pdf");
    }

    #[test]
    fn grace_is_clamped() {
        let c = WorkflowConfig::builder()
            .termination_grace_ms(0)
            .build()
            .unwrap();
        assert_eq!(c.termination_grace_ms, 10);
    }

    #[test]
    fn build_rejects_bad_values() {
        assert!(WorkflowConfig::builder().interpreter("  ").build().is_err());
        assert!(WorkflowConfig::builder()
            .image_extensions(Vec::<String>::new())
            .build()
            .is_err());
        assert!(WorkflowConfig::builder()
            .front_dir("same")
            .double_sided_dir("same")
            .build()
            .is_err());
        assert!(WorkflowConfig::builder()
            .output_dir(std::env::temp_dir())
            .build()
            .is_err());
    }

    #[test]
    fn env_interpreter_is_platform_specific() {
        let c = WorkflowConfig::default();
        let p = c.env_interpreter(Path::new("/proj/venv"));
        if cfg!(windows) {
            assert!(p.ends_with("Scripts/python.exe"));
        } else {
            assert_eq!(p, PathBuf::from("/proj/venv/bin/python"));
        }
    }

    #[test]
    fn project_root_validation() {
        let dir = tempfile::tempdir().unwrap();
        let c = WorkflowConfig::default();
        assert!(validate_project_root(dir.path(), &c).is_err());

        std::fs::create_dir(dir.path().join("game")).unwrap();
        std::fs::create_dir(dir.path().join("plugins")).unwrap();
        std::fs::write(dir.path().join("create_pdf.py"), "").unwrap();
        validate_project_root(dir.path(), &c).unwrap();
    }
}
