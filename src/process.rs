//! External program supervision: spawn, stream stdout, collect stderr, stop.
//!
//! [`ProcessSupervisor::spawn`] starts one child and returns a [`LiveHandle`].
//! A background task owns the child: it forwards every stdout line as a
//! [`ProcessEvent::Line`] the moment it is read, drains stderr concurrently
//! into a string, and finishes with exactly one [`ProcessEvent::Exited`].
//!
//! ## Why a process group?
//!
//! The programs we drive are interpreter scripts that often spawn their own
//! children (an installer forking a build backend, a fetch script shelling
//! out). Signalling only the direct child would leave those grandchildren
//! running and holding our pipes open. On Unix the child is therefore placed
//! in a fresh process group and termination signals go to the whole group.
//!
//! ## Termination policy
//!
//! On cancellation the group receives `SIGTERM`, then the supervisor waits up
//! to the configured grace period for the child to exit, then force-kills.
//! The child is always reaped before `Exited` is sent, so once a caller sees
//! that event the pid is gone from the process table. `kill_on_drop` covers
//! the case where the whole runtime is torn down first.

use crate::error::ProcessError;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A request to run one program. A value, not a resource: nothing is spawned
/// until it is handed to [`ProcessSupervisor::spawn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalInvocation {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    env: Vec<(String, String)>,
}

impl ExternalInvocation {
    /// `argv[0]` is the program; the rest are its arguments.
    pub fn new<I, S>(argv: I, workdir: impl Into<PathBuf>) -> Result<Self, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().ok_or(ProcessError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(ProcessError::EmptyCommand);
        }
        Ok(Self {
            program,
            args: argv.collect(),
            workdir: workdir.into(),
            env: Vec::new(),
        })
    }

    /// Add an environment variable on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Shell-quoted command line, for logs.
    pub fn display(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

/// How a supervised child ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Everything the child wrote to stderr, lossily decoded.
    pub stderr: String,
    /// True when the child was stopped by a termination request.
    pub cancelled: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.cancelled && self.exit_code == Some(0)
    }
}

/// Events produced by a [`LiveHandle`], in order: zero or more `Line`s,
/// then exactly one `Exited`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One stdout line without its trailing newline.
    Line(String),
    Exited(ProcessOutcome),
}

/// Spawns children and owns the termination policy.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessSupervisor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Start `invocation`. Must be called from within a tokio runtime.
    ///
    /// Cancelling `cancel` (or calling [`LiveHandle::terminate`]) stops the
    /// child under the grace-period policy.
    ///
    /// # Errors
    /// Returns a [`ProcessError`] and spawns nothing when the working
    /// directory is missing or the program cannot be started.
    pub fn spawn(
        &self,
        invocation: &ExternalInvocation,
        cancel: &CancellationToken,
    ) -> Result<LiveHandle, ProcessError> {
        if !invocation.workdir.is_dir() {
            return Err(ProcessError::WorkdirMissing {
                path: invocation.workdir.clone(),
            });
        }

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.workdir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::ProgramNotFound {
                    program: invocation.program.clone(),
                }
            } else {
                ProcessError::Spawn {
                    program: invocation.program.clone(),
                    source: e,
                }
            }
        })?;

        let pid = child.id();
        info!(pid = ?pid, command = %invocation.display(), "spawned child");

        let (tx, rx) = mpsc::unbounded_channel();
        let token = cancel.child_token();
        let task = tokio::spawn(supervise(child, tx, token.clone(), self.grace));

        Ok(LiveHandle {
            pid,
            events: rx,
            cancel: token,
            task,
        })
    }

    /// Spawn and drive to completion, handing each stdout line to `on_line`.
    pub async fn run<F>(
        &self,
        invocation: &ExternalInvocation,
        cancel: &CancellationToken,
        on_line: F,
    ) -> Result<ProcessOutcome, ProcessError>
    where
        F: FnMut(&str),
    {
        let handle = self.spawn(invocation, cancel)?;
        Ok(handle.wait(on_line).await)
    }
}

/// A running child. Dropping the handle does not stop the child; call
/// [`terminate`](LiveHandle::terminate) or cancel the parent token.
#[derive(Debug)]
pub struct LiveHandle {
    pid: Option<u32>,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LiveHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next line or the final exit event. `None` after `Exited`.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    /// Request termination. Idempotent.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    /// Drain all events, returning the final outcome.
    pub async fn wait<F>(mut self, mut on_line: F) -> ProcessOutcome
    where
        F: FnMut(&str),
    {
        while let Some(event) = self.events.recv().await {
            match event {
                ProcessEvent::Line(line) => on_line(&line),
                ProcessEvent::Exited(outcome) => return outcome,
            }
        }
        // Supervisor task died without reporting; surface it as a failure.
        let detail = match (&mut self.task).await {
            Err(e) if e.is_panic() => "process supervisor panicked".to_string(),
            _ => "process supervisor stopped without an exit status".to_string(),
        };
        ProcessOutcome {
            exit_code: None,
            stderr: detail,
            cancelled: self.cancel.is_cancelled(),
        }
    }
}

// ── Background supervision ────────────────────────────────────────────────

async fn supervise(
    mut child: Child,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    cancel: CancellationToken,
    grace: Duration,
) {
    let pid = child.id();

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                debug!(error = %e, "stderr read ended with error");
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let mut cancelled = false;
    let mut status = None;
    if let Some(stdout) = child.stdout.take() {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        // Set once the child has exited: a helper it left behind may still
        // hold stdout open, so the remaining output gets one grace period.
        let mut drain_until: Option<Instant> = None;
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled(), if status.is_none() => StdoutRead::Cancelled,
                r = reader.read_until(b'\n', &mut buf) => StdoutRead::Data(r),
                s = child.wait(), if status.is_none() => StdoutRead::Exited(s),
                _ = tokio::time::sleep_until(drain_until.unwrap_or_else(Instant::now)),
                    if drain_until.is_some() => StdoutRead::DrainExpired,
            };
            match read {
                StdoutRead::Cancelled => {
                    cancelled = true;
                    break;
                }
                StdoutRead::Exited(s) => {
                    status = Some(s);
                    drain_until = Some(Instant::now() + grace);
                }
                StdoutRead::DrainExpired => {
                    debug!(pid = ?pid, "stdout still open after exit; no longer reading it");
                    break;
                }
                StdoutRead::Data(Ok(0)) => break,
                StdoutRead::Data(Ok(_)) => {
                    // A partial line stays in `buf` until its newline or EOF.
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    let _ = tx.send(ProcessEvent::Line(line));
                    buf.clear();
                }
                StdoutRead::Data(Err(e)) => {
                    warn!(pid = ?pid, error = %e, "stdout read failed");
                    break;
                }
            }
        }
        if !buf.is_empty() {
            let line = String::from_utf8_lossy(&buf).trim_end_matches('\r').to_string();
            let _ = tx.send(ProcessEvent::Line(line));
        }
    }

    let status = match status {
        Some(s) => s,
        None if cancelled => terminate(&mut child, grace).await,
        None => {
            let waited = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                s = child.wait() => Some(s),
            };
            match waited {
                Some(s) => s,
                None => {
                    cancelled = true;
                    terminate(&mut child, grace).await
                }
            }
        }
    };

    let exit_code = match status {
        Ok(s) => exit_code_of(s),
        Err(e) => {
            warn!(pid = ?pid, error = %e, "waiting for child failed");
            None
        }
    };

    // The child is reaped; anything still holding stderr open is not ours to
    // wait for beyond the grace period.
    let stderr = match stderr_task {
        Some(mut task) => match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                debug!(pid = ?pid, error = %e, "stderr reader failed");
                String::new()
            }
            Err(_) => {
                debug!(pid = ?pid, "stderr still open after exit; no longer reading it");
                task.abort();
                String::new()
            }
        },
        None => String::new(),
    };

    debug!(pid = ?pid, exit_code = ?exit_code, cancelled, "child finished");
    let _ = tx.send(ProcessEvent::Exited(ProcessOutcome {
        exit_code,
        stderr,
        cancelled,
    }));
}

enum StdoutRead {
    Cancelled,
    Data(std::io::Result<usize>),
    Exited(std::io::Result<ExitStatus>),
    DrainExpired,
}

/// Polite stop, bounded wait, then force-kill. Always reaps the child.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    let pid = child.id();
    request_stop(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid = ?pid, grace_ms = grace.as_millis() as u64, "child ignored termination; killing");
            force_kill(child);
            if let Err(e) = child.start_kill() {
                debug!(pid = ?pid, error = %e, "start_kill failed");
            }
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    signal_group(child, libc::SIGTERM);
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed");
    }
}

#[cfg(unix)]
fn force_kill(child: &mut Child) {
    signal_group(child, libc::SIGKILL);
}

#[cfg(not(unix))]
fn force_kill(_child: &mut Child) {}

#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) {
    let Some(pid) = child.id() else { return };
    // SAFETY: the child is not yet reaped, so its pid (and the process group
    // it leads) cannot have been recycled.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc != 0 {
        debug!(pid, signal, error = %std::io::Error::last_os_error(), "group signal failed");
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    if let Some(sig) = status.signal() {
        debug!(signal = sig, "child terminated by signal");
    }
    status.code()
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> Option<i32> {
    status.code()
}
