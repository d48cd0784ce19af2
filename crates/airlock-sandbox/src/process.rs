//! Process execution under a wall-clock budget
//!
//! [`ProcessSandbox`] is the seam between Airlock and every native codec it
//! shells out to. [`CommandSandbox`] is the production implementation: it
//! spawns the program with piped, size-capped stdout/stderr, waits for at most
//! the invocation's timeout, and kills the child if the budget runs out.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

use crate::error::{Result, SandboxError};

/// Default cap on captured stdout (structure dumps can be large).
pub const DEFAULT_MAX_STDOUT: usize = 64 * 1024 * 1024;

/// Cap on captured stderr.
const MAX_STDERR: usize = 64 * 1024;

/// Grace period for a killed child to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// One external program run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub max_stdout: usize,
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
            max_stdout: DEFAULT_MAX_STDOUT,
            working_dir: None,
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns true if any argument equals `needle`.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

/// What a finished (or killed) program left behind.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code; `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub truncated_stdout: bool,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ToolOutput {
    /// A successful run with the given stdout.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// A run that exited with `code`.
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// A run that was killed at its deadline.
    pub fn killed_at_deadline(duration: Duration) -> Self {
        Self {
            timed_out: true,
            duration,
            ..Self::default()
        }
    }
}

/// Executes external programs on Airlock's behalf.
///
/// Implementations must enforce `Invocation::timeout` and report a kill as
/// `timed_out`. Returning `Err` is reserved for failing to run at all.
#[async_trait]
pub trait ProcessSandbox: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Runs programs with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct CommandSandbox;

impl CommandSandbox {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSandbox for CommandSandbox {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let program = invocation.program.as_str();
        let started = Instant::now();

        let mut cmd = Command::new(program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| SandboxError::MissingOutput {
            program: program.to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| SandboxError::MissingOutput {
            program: program.to_string(),
        })?;
        let stdout_task = tokio::spawn(read_to_end_limited(stdout, invocation.max_stdout));
        let stderr_task = tokio::spawn(read_to_end_limited(stderr, MAX_STDERR));

        let mut timed_out = false;
        let status = match time::timeout(invocation.timeout, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                timed_out = true;
                warn!(
                    program,
                    timeout_ms = invocation.timeout.as_millis() as u64,
                    "Tool exceeded its time budget, killing"
                );
                let _ = child.kill().await;
                time::timeout(KILL_GRACE, child.wait())
                    .await
                    .ok()
                    .and_then(|res| res.ok())
            }
        };

        let (stdout, truncated_stdout) = stdout_task.await.unwrap_or_default();
        let (stderr_bytes, _) = stderr_task.await.unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

        let output = ToolOutput {
            exit_code: if timed_out { None } else { status.and_then(|s| s.code()) },
            stdout,
            stderr,
            truncated_stdout,
            timed_out,
            duration: started.elapsed(),
        };

        debug!(
            program,
            exit_code = ?output.exit_code,
            duration_ms = output.duration.as_millis() as u64,
            timed_out,
            stderr = %output.stderr,
            "Tool finished"
        );

        Ok(output)
    }
}

/// Reads to EOF keeping at most `max_bytes`; the rest is drained and dropped
/// so a chatty child never blocks on a full pipe.
async fn read_to_end_limited<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = max_bytes.saturating_sub(buf.len());
        let take = remaining.min(n);
        buf.extend_from_slice(&tmp[..take]);
        if take < n {
            truncated = true;
        }
    }

    (buf, truncated)
}
