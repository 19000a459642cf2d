use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use anyhow::Context;

use crate::error::GtError;

// On Unix, CommandExt lets us call .process_group(0) to detach the child
// into its own process group so SIGTERM to the parent's group doesn't kill it.
#[cfg(unix)]
use std::os::unix::process::CommandExt as _;

/// Result of running a companion tool.
#[derive(Debug)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RunOutput {
    /// Returns true if the process exited successfully.
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Parse stdout as JSON.
    pub fn parse_json<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_str(self.stdout.trim())
            .with_context(|| "parsing JSON output from subprocess".to_string())
    }
}

/// Builder for invoking companion tools (`bd`, `tmux`, `git`, `gh`, the
/// summarizer runtime).
pub struct Tool {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
    /// When true, spawn the subprocess in a new process group so it survives
    /// a SIGTERM directed at the parent's process group. Used for cleanup
    /// subprocesses spawned from signal handlers.
    new_process_group: bool,
}

impl Tool {
    /// Create a new tool invocation.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
            timeout: None,
            new_process_group: false,
        }
    }

    /// Add a single argument.
    #[must_use]
    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| (*s).to_string()));
        self
    }

    /// Set an environment variable for the child only (e.g. `BEADS_DIR`,
    /// `BD_ACTOR`) without touching our own process environment.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Run the tool in the given directory.
    #[must_use]
    pub fn dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Set a timeout; the child is killed when it elapses.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Spawn in a new process group (no-op off Unix).
    #[must_use]
    pub const fn new_process_group(mut self) -> Self {
        self.new_process_group = true;
        self
    }

    /// Run the tool, capturing stdout and stderr.
    #[tracing::instrument(skip(self), fields(tool = %self.program))]
    pub fn run(&self) -> anyhow::Result<RunOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        if self.new_process_group {
            cmd.process_group(0);
        }

        let output: Output = if let Some(timeout) = self.timeout {
            run_with_timeout(&mut cmd, timeout, &self.program)?
        } else {
            cmd.output().map_err(|e| self.not_found_or_other(&e))?
        };

        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run the tool and return an error if it fails.
    pub fn run_ok(&self) -> anyhow::Result<RunOutput> {
        let output = self.run()?;
        if output.success() {
            Ok(output)
        } else {
            Err(GtError::External {
                tool: self.program.clone(),
                code: output.exit_code,
                message: output.stderr.trim().to_string(),
            }
            .into())
        }
    }

    fn not_found_or_other(&self, e: &std::io::Error) -> anyhow::Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            GtError::External {
                tool: self.program.clone(),
                code: 127,
                message: "not found on PATH".to_string(),
            }
            .into()
        } else {
            anyhow::anyhow!("running {}: {e}", self.program)
        }
    }
}

fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    tool_name: &str,
) -> anyhow::Result<Output> {
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::Error::from(GtError::External {
                tool: tool_name.to_string(),
                code: 127,
                message: "not found on PATH".to_string(),
            })
        } else {
            anyhow::Error::new(e).context(format!("spawning {tool_name}"))
        }
    })?;

    let start = std::time::Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let stdout = child.stdout.take().map_or_else(Vec::new, |mut r| {
                    let mut buf = Vec::new();
                    std::io::Read::read_to_end(&mut r, &mut buf).unwrap_or(0);
                    buf
                });
                let stderr = child.stderr.take().map_or_else(Vec::new, |mut r| {
                    let mut buf = Vec::new();
                    std::io::Read::read_to_end(&mut r, &mut buf).unwrap_or(0);
                    buf
                });
                return Ok(Output {
                    status,
                    stdout,
                    stderr,
                });
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(GtError::External {
                        tool: tool_name.to_string(),
                        code: -1,
                        message: format!("timed out after {}s", timeout.as_secs()),
                    }
                    .into());
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("waiting for {tool_name}")));
            }
        }
    }
}

/// Retry policy for the bead backend: up to 3 attempts with exponential
/// backoff starting at ~100 ms. Only transient errors are retried;
/// `NotFound`/`Invalid`/etc. surface immediately.
pub fn with_backend_retry<T>(
    op_name: &str,
    mut op: impl FnMut() -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let mut delay = Duration::from_millis(100);
    let mut last_err = None;

    for attempt in 1..=3 {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let transient = e
                    .downcast_ref::<GtError>()
                    .is_some_and(GtError::is_transient);
                if !transient {
                    return Err(e);
                }
                tracing::warn!(op = op_name, attempt, error = %e, "transient backend error");
                last_err = Some(e);
                if attempt < 3 {
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }

    Err(last_err.map_or_else(|| anyhow::anyhow!("{op_name}: retries exhausted"), |e| e))
}
