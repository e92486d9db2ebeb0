//! CLI binary for deckpress.
//!
//! A thin shim over the library crate: maps flags to `WorkflowConfig` and
//! `RenderOptions`, drives one run, and answers its decisions from flags or
//! from the terminal.

use anyhow::{bail, Context, Result};
use clap::Parser;
use deckpress::{
    validate_project_root, CardSize, Crop, DecisionKind, InputChoice, Outcome, PaperSize,
    PluginRef, PluginRegistry, ProgressEvent, RenderOptions, ReviewDecision, RunControl, RunState,
    StepStatus, WorkflowConfig, WorkflowEngine, WorkflowObserver, WORKFLOW_STEPS,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Terminal observer using indicatif ────────────────────────────────────────

/// Renders the step list as a progress bar with log lines scrolling above
/// it. Without a bar (`--no-progress`), log lines go straight to stderr.
struct TerminalObserver {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl TerminalObserver {
    fn new(show_progress: bool, quiet: bool) -> Self {
        let bar = show_progress.then(|| {
            let bar = ProgressBar::new(WORKFLOW_STEPS.len() as u64);
            let style = ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos}/{len} steps  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
            bar.set_style(style);
            bar.set_prefix("Starting");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        Self { bar, quiet }
    }

    fn print(&self, line: String) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    /// Run `f` with the bar hidden, for interactive prompts.
    fn suspend<F: FnOnce()>(&self, f: F) {
        match &self.bar {
            Some(bar) => bar.suspend(f),
            None => f(),
        }
    }
}

impl WorkflowObserver for TerminalObserver {
    fn on_step_status(&mut self, index: usize, status: StepStatus) {
        let label = WORKFLOW_STEPS.get(index).copied().unwrap_or("?");
        match status {
            StepStatus::Running => {
                if let Some(bar) = &self.bar {
                    bar.set_message(label.to_string());
                }
            }
            StepStatus::Completed => self.print(format!("  {} {label}", green("✓"))),
            StepStatus::Failed => self.print(format!("  {} {label}", red("✗"))),
            StepStatus::Pending => self.print(format!("  {} {label}", dim("↺"))),
        }
    }

    fn on_log(&mut self, text: &str, timestamp: chrono::DateTime<chrono::Local>) {
        self.print(format!(
            "    {} {}",
            dim(&timestamp.format("%H:%M:%S").to_string()),
            dim(text)
        ));
    }

    fn on_progress(&mut self, value: f64) {
        if let Some(bar) = &self.bar {
            let pos = (value * WORKFLOW_STEPS.len() as f64).round() as u64;
            bar.set_position(pos);
        }
    }

    fn on_state(&mut self, state: RunState) {
        if let Some(bar) = &self.bar {
            let prefix = match state {
                RunState::AwaitingInputChoice | RunState::AwaitingReview => "Waiting".to_string(),
                other => {
                    let s = other.to_string();
                    let mut c = s.chars();
                    match c.next() {
                        Some(first) => first.to_uppercase().chain(c).collect(),
                        None => s,
                    }
                }
            };
            bar.set_prefix(prefix);
        }
    }

    fn on_outcome(&mut self, outcome: &Outcome) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
        match outcome {
            Outcome::Success { artifact, rendered } => {
                let detail = match (rendered, artifact) {
                    (false, _) => "PDF creation skipped".to_string(),
                    (true, Some(path)) => format!("PDF ready  →  {}", bold(&path.display().to_string())),
                    (true, None) => "PDF created, but no file was found in the output locations".to_string(),
                };
                eprintln!("{} {detail}", green("✔"));
            }
            Outcome::Failure { reason, .. } => eprintln!("{} {}", red("✘"), red(reason)),
            Outcome::Cancelled => eprintln!("{} Cancelled", cyan("⚠")),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Fetch a Moxfield export and render with defaults
  deckpress --project ~/silhouette-card-maker \
    --plugin "Magic: The Gathering" --method Moxfield --decklist deck.txt

  # Upload your own images, review before rendering
  deckpress --project ./scm --upload --front art/*.png --review prompt

  # A4 paper, 2 mm crop, extra renderer flags
  deckpress --project ./scm --upload --front cards/*.jpg \
    --paper-size a4 --crop 2mm --extra "--name 'Sealed Pool'"

  # Machine-readable event stream
  deckpress --project ./scm --plugin lorcana --method dreamborn \
    --decklist deck.txt --json > events.jsonl

  # Show the plugin table
  deckpress --list-plugins

ENVIRONMENT VARIABLES:
  DECKPRESS_PROJECT       Project root (same as --project)
  DECKPRESS_INTERPRETER   Base Python used to create the environment
  DECKPRESS_PLUGINS_FILE  Extra plugin registry (JSON)
  DECKPRESS_GRACE_MS      Grace period before force-killing a child
  RUST_LOG                Tracing filter (overrides --verbose)
"#;

/// Drive the card-maker workflow from the command line.
#[derive(Parser, Debug)]
#[command(
    name = "deckpress",
    version,
    about = "Prepare, fetch and render printable card sheets",
    long_about = "Prepare a card-maker project's Python environment, acquire card images \
(your own uploads or a decklist fetched through a plugin), then render a printable PDF.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Card-maker project root (contains game/, plugins/, create_pdf.py).
    #[arg(long, env = "DECKPRESS_PROJECT", required_unless_present = "list_plugins")]
    project: Option<PathBuf>,

    /// Use images you provide instead of a plugin fetch.
    #[arg(long, conflicts_with = "plugin")]
    upload: bool,

    /// Images copied into the single-faced intake directory (with --upload).
    #[arg(long, num_args = 1.., requires = "upload")]
    front: Vec<PathBuf>,

    /// Images copied into the double-faced intake directory (with --upload).
    #[arg(long, num_args = 1.., requires = "upload")]
    double_sided: Vec<PathBuf>,

    /// Game whose plugin fetches the images (name or plugin directory).
    #[arg(long, requires_all = ["method", "decklist"])]
    plugin: Option<String>,

    /// Fetch method label, e.g. Moxfield, MTGA, YDKE.
    #[arg(long)]
    method: Option<String>,

    /// Decklist file passed to the plugin ("-" reads stdin).
    #[arg(long)]
    decklist: Option<PathBuf>,

    /// What to do once images are acquired.
    #[arg(long, value_enum, default_value = "render")]
    review: ReviewMode,

    // ── Renderer flags ───────────────────────────────────────────────────
    /// Render only the card fronts.
    #[arg(long)]
    only_fronts: bool,

    /// Output resolution.
    #[arg(long)]
    ppi: Option<u32>,

    /// Output quality (0–100).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: Option<u8>,

    /// Extend card corners by this many pixels.
    #[arg(long)]
    extend_corners: Option<u32>,

    /// Paper size: letter, a4, a3, tabloid, archb.
    #[arg(long)]
    paper_size: Option<String>,

    /// Crop amount, e.g. 6.5 (percent), 6.5%, 2mm, 0.1in.
    #[arg(long)]
    crop: Option<String>,

    /// Apply the saved registration offset.
    #[arg(long)]
    load_offset: bool,

    /// Card size, e.g. standard, japanese, poker, bridge.
    #[arg(long)]
    card_size: Option<String>,

    /// Extra renderer arguments, split with shell quoting rules.
    #[arg(long, allow_hyphen_values = true)]
    extra: Option<String>,

    // ── Configuration ────────────────────────────────────────────────────
    /// Base Python interpreter used to create the environment.
    #[arg(long, env = "DECKPRESS_INTERPRETER")]
    interpreter: Option<String>,

    /// Additional plugin registry file (JSON), merged over the built-ins.
    #[arg(long, env = "DECKPRESS_PLUGINS_FILE")]
    plugins_file: Option<PathBuf>,

    /// Milliseconds between a termination request and the force-kill.
    #[arg(long, env = "DECKPRESS_GRACE_MS")]
    grace_ms: Option<u64>,

    /// Skip the project layout check.
    #[arg(long)]
    no_validate: bool,

    // ── Output ───────────────────────────────────────────────────────────
    /// Print every event as a JSON line on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// Print the plugin table and exit.
    #[arg(long)]
    list_plugins: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ReviewMode {
    Render,
    Skip,
    Prompt,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar carries the user-facing progress, so library logs stay at
    // error level unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress || cli.json {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let registry = load_registry(&cli)?;
    if cli.list_plugins {
        print_plugins(&registry);
        return Ok(());
    }

    let Some(project) = cli.project.clone() else {
        bail!("--project is required");
    };
    let config = build_config(&cli)?;
    if !cli.no_validate {
        validate_project_root(&project, &config).with_context(|| {
            format!(
                "{} does not look like a card-maker project (expected game/, plugins/ and {})",
                project.display(),
                config.render_entry.display()
            )
        })?;
    }

    // Everything that can be rejected is checked before the run spawns anything.
    let render_args = build_render_options(&cli)?.to_args();
    let input = build_input_choice(&cli, &registry)?;

    let mut answers = Answers::new(&cli, config.clone(), input, render_args, project.clone());
    let engine = WorkflowEngine::with_registry(config, registry);
    let mut run = engine.start(&project).context("Failed to start the workflow")?;
    let control = run.control();

    let mut observer = TerminalObserver::new(show_progress, cli.quiet || cli.json);
    let mut outcome = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = run.next_event() => {
                let Some(event) = event else { break };
                if cli.json {
                    println!("{}", serde_json::to_string(&event).context("Failed to serialise event")?);
                }
                if let ProgressEvent::TerminalOutcome { outcome: o } = &event {
                    outcome = Some(o.clone());
                }
                let decision = match &event {
                    ProgressEvent::DecisionRequested { kind } => Some(*kind),
                    _ => None,
                };
                event.dispatch(&mut observer);
                if let Some(kind) = decision {
                    answers.on_decision(kind, &control, &observer).await?;
                }
            }
            line = answers.next_line(), if answers.is_prompting() => {
                answers.on_line(line, &control, &observer);
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                observer.print(cyan("Interrupted; stopping the run…"));
                control.cancel();
            }
        }
    }

    match outcome.unwrap_or_else(|| Outcome::Failure {
        kind: deckpress::ErrorKind::Other,
        reason: "run ended without an outcome".into(),
    }) {
        Outcome::Success { .. } => Ok(()),
        Outcome::Cancelled => std::process::exit(130),
        Outcome::Failure { reason, .. } => bail!("Workflow failed: {reason}"),
    }
}

// ── Decision answering ───────────────────────────────────────────────────────

/// Answers decisions from flags, falling back to line prompts on stdin.
struct Answers {
    input: Option<InputChoice>,
    front: Vec<PathBuf>,
    double_sided: Vec<PathBuf>,
    project: PathBuf,
    config: WorkflowConfig,
    render_args: Vec<String>,
    review: ReviewMode,
    prompting: Option<DecisionKind>,
    stdin: Option<mpsc::UnboundedReceiver<String>>,
}

impl Answers {
    fn new(
        cli: &Cli,
        config: WorkflowConfig,
        input: Option<InputChoice>,
        render_args: Vec<String>,
        project: PathBuf,
    ) -> Self {
        Self {
            input,
            front: cli.front.clone(),
            double_sided: cli.double_sided.clone(),
            project,
            config,
            render_args,
            review: cli.review,
            prompting: None,
            stdin: None,
        }
    }

    fn is_prompting(&self) -> bool {
        self.prompting.is_some()
    }

    async fn on_decision(
        &mut self,
        kind: DecisionKind,
        control: &RunControl,
        observer: &TerminalObserver,
    ) -> Result<()> {
        match kind {
            DecisionKind::InputMethod => match self.input.clone() {
                Some(InputChoice::Upload) if !self.front.is_empty() || !self.double_sided.is_empty() => {
                    self.copy_uploads(observer).await?;
                    control.resolve_input(InputChoice::Upload);
                }
                Some(InputChoice::Upload) | None => {
                    let front = self.project.join(&self.config.front_dir);
                    let back = self.project.join(&self.config.double_sided_dir);
                    self.prompt(
                        DecisionKind::InputMethod,
                        observer,
                        &format!(
                            "Place card images in {} (and double-faced ones in {}), then press Enter. [q] cancels.",
                            front.display(),
                            back.display()
                        ),
                    );
                }
                Some(choice) => {
                    control.resolve_input(choice);
                }
            },
            DecisionKind::Review => match self.review {
                ReviewMode::Render => {
                    control.resolve_review(ReviewDecision::Render(self.render_args.clone()));
                }
                ReviewMode::Skip => {
                    control.resolve_review(ReviewDecision::Skip);
                }
                ReviewMode::Prompt => self.prompt(
                    DecisionKind::Review,
                    observer,
                    "Images are ready. [r]ender, re[d]o acquisition, [s]kip rendering, [q]uit?",
                ),
            },
        }
        Ok(())
    }

    fn on_line(&mut self, line: Option<String>, control: &RunControl, observer: &TerminalObserver) {
        let Some(kind) = self.prompting else { return };
        let answer = line.map(|l| l.trim().to_ascii_lowercase());
        let handled = match (kind, answer.as_deref()) {
            // stdin closed: nobody can answer.
            (DecisionKind::InputMethod, None) => control.decline_input(),
            (DecisionKind::Review, None) => control.decline_review(),
            (DecisionKind::InputMethod, Some("q" | "quit")) => control.decline_input(),
            (DecisionKind::InputMethod, Some(_)) => control.resolve_input(InputChoice::Upload),
            (DecisionKind::Review, Some("" | "r" | "render")) => {
                control.resolve_review(ReviewDecision::Render(self.render_args.clone()))
            }
            (DecisionKind::Review, Some("d" | "redo")) => control.resolve_review(ReviewDecision::Redo),
            (DecisionKind::Review, Some("s" | "skip")) => control.resolve_review(ReviewDecision::Skip),
            (DecisionKind::Review, Some("q" | "quit")) => control.decline_review(),
            (DecisionKind::Review, Some(other)) => {
                observer.print(red(&format!("Unknown answer '{other}'; expected r, d, s or q")));
                return;
            }
        };
        if !handled {
            tracing::debug!(?kind, "answer arrived after the decision closed");
        }
        self.prompting = None;
    }

    fn prompt(&mut self, kind: DecisionKind, observer: &TerminalObserver, question: &str) {
        observer.suspend(|| eprintln!("{} {}", cyan("?"), bold(question)));
        self.prompting = Some(kind);
        if self.stdin.is_none() {
            self.stdin = Some(spawn_stdin_reader());
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        match self.stdin.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn copy_uploads(&self, observer: &TerminalObserver) -> Result<()> {
        let targets = [
            (&self.front, self.project.join(&self.config.front_dir)),
            (&self.double_sided, self.project.join(&self.config.double_sided_dir)),
        ];
        for (files, dir) in targets {
            if files.is_empty() {
                continue;
            }
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            for file in files {
                let name = file
                    .file_name()
                    .with_context(|| format!("Not a file: {}", file.display()))?;
                tokio::fs::copy(file, dir.join(name))
                    .await
                    .with_context(|| format!("Failed to copy {}", file.display()))?;
            }
            observer.print(dim(&format!("Copied {} file(s) into {}", files.len(), dir.display())));
        }
        Ok(())
    }
}

/// Blocking stdin lines forwarded to the async loop. A plain thread keeps
/// an unanswered read from holding up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

// ── Flag mapping ─────────────────────────────────────────────────────────────

/// Map CLI args to `WorkflowConfig`.
fn build_config(cli: &Cli) -> Result<WorkflowConfig> {
    let mut builder = WorkflowConfig::builder();
    if let Some(ref interpreter) = cli.interpreter {
        builder = builder.interpreter(interpreter.clone());
    }
    if let Some(ms) = cli.grace_ms {
        builder = builder.termination_grace_ms(ms);
    }
    builder.build().context("Invalid configuration")
}

fn load_registry(cli: &Cli) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::builtin();
    if let Some(ref path) = cli.plugins_file {
        let extra = PluginRegistry::load(path)
            .with_context(|| format!("Failed to load plugin registry from {}", path.display()))?;
        registry.merge(extra);
    }
    Ok(registry)
}

fn build_render_options(cli: &Cli) -> Result<RenderOptions> {
    let mut builder = RenderOptions::builder()
        .only_fronts(cli.only_fronts)
        .load_offset(cli.load_offset);
    if let Some(ppi) = cli.ppi {
        builder = builder.ppi(ppi);
    }
    if let Some(q) = cli.quality {
        builder = builder.quality(q);
    }
    if let Some(px) = cli.extend_corners {
        builder = builder.extend_corners(px);
    }
    if let Some(ref size) = cli.paper_size {
        builder = builder.paper_size(size.parse::<PaperSize>()?);
    }
    if let Some(ref size) = cli.card_size {
        builder = builder.card_size(size.parse::<CardSize>()?);
    }
    if let Some(ref crop) = cli.crop {
        builder = builder.crop(parse_crop(crop)?);
    }
    if let Some(ref extra) = cli.extra {
        builder = builder.extra(extra.clone());
    }
    builder.build().context("Invalid render options")
}

/// `6.5`, `6.5%`, `2mm`, `0.1in` → `Crop`.
fn parse_crop(s: &str) -> Result<Crop> {
    let s = s.trim();
    let split = s
        .find(|c: char| c.is_ascii_alphabetic() || c == '%')
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    Ok(Crop::parse(value, unit)?)
}

fn build_input_choice(cli: &Cli, registry: &PluginRegistry) -> Result<Option<InputChoice>> {
    if cli.upload {
        return Ok(Some(InputChoice::Upload));
    }
    let Some(ref game) = cli.plugin else {
        return Ok(None);
    };
    let method = cli.method.clone().context("--method is required with --plugin")?;
    let plugin = PluginRef::new(game.clone(), method);
    // Surface an unknown pair now rather than mid-run.
    registry.resolve(&plugin)?;

    let decklist_path = cli.decklist.as_deref().context("--decklist is required with --plugin")?;
    let decklist = read_decklist(decklist_path)?;
    Ok(Some(InputChoice::Plugin { decklist, plugin }))
}

fn read_decklist(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        for line in io::stdin().lock().lines() {
            text.push_str(&line.context("Failed to read decklist from stdin")?);
            text.push('\n');
        }
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read decklist {}", path.display()))
}

fn print_plugins(registry: &PluginRegistry) {
    println!("{:<24} {:<12} {:<14} {}", "GAME", "DIR", "METHOD", "SOURCE");
    for game in registry.games() {
        for m in &game.methods {
            println!("{:<24} {:<12} {:<14} {}", game.name, game.dir, m.label, m.source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_flag_splits_value_and_unit() {
        assert_eq!(parse_crop("6.5").unwrap().to_arg(), "6.5");
        assert_eq!(parse_crop("6.5%").unwrap().to_arg(), "6.5");
        assert_eq!(parse_crop("2mm").unwrap().to_arg(), "2mm");
        assert_eq!(parse_crop(" 0.1in ").unwrap().to_arg(), "0.1in");
        assert!(parse_crop("110mm").is_err());
        assert!(parse_crop("2cm").is_err());
    }

    #[test]
    fn cli_parses_plugin_run() {
        let cli = Cli::try_parse_from([
            "deckpress",
            "--project",
            "/tmp/scm",
            "--plugin",
            "mtg",
            "--method",
            "moxfield",
            "--decklist",
            "deck.txt",
            "--paper-size",
            "a4",
            "--extra",
            "--name 'My Deck'",
        ])
        .unwrap();
        assert_eq!(cli.plugin.as_deref(), Some("mtg"));
        assert_eq!(cli.review, ReviewMode::Render);
        let args = build_render_options(&cli).unwrap().to_args();
        assert_eq!(args, ["--paper_size", "a4", "--name", "My Deck"]);
    }

    #[test]
    fn upload_and_plugin_conflict() {
        assert!(Cli::try_parse_from([
            "deckpress", "--project", "x", "--upload", "--plugin", "mtg", "--method", "m",
            "--decklist", "d",
        ])
        .is_err());
    }
}
