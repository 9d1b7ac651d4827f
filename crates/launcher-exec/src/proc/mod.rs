//! External process seam.
//!
//! Every docker / kubectl invocation goes through a [`ProcessRunner`], so backends can be
//! exercised against a scripted fake.

use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::{
    error::ExecError,
    util::{KILL_GRACE, cmd_program, kill_graceful, read_pipe},
};

/// One external command invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Written to the child's stdin, then closed.
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            stdin: None,
            timeout,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// `program arg1 arg2 ...`, for logs.
    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for arg in &self.args {
            s.push(' ');
            s.push_str(arg);
        }
        s
    }
}

/// Result of a command that ran to completion (successfully or not).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// `None` when terminated by a signal.
    pub code: Option<i32>,
    /// stdout followed by stderr.
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            output: output.into(),
        }
    }

    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            output: output.into(),
        }
    }

    /// Turn a failed run into an [`ExecError`].
    pub fn check(self, program: &str) -> Result<CommandOutput, ExecError> {
        if self.success {
            return Ok(self);
        }
        match self.code {
            Some(code) => Err(ExecError::NonZeroExit {
                program: program.to_string(),
                code,
                output: self.output,
            }),
            None => Err(ExecError::KilledBySignal {
                program: program.to_string(),
                output: self.output,
            }),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync + 'static {
    /// Run to completion or until `spec.timeout`, whichever comes first.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`], not as an error.
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, ExecError>;
}

/// Runs commands as real child processes.
#[derive(Clone, Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, ExecError> {
        trace!(target: "launcher.exec", program = %spec.program, args = ?spec.args, cwd = ?spec.cwd, "spawn");

        let mut cmd = cmd_program(&spec.program, &spec.args);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", spec.program)))?;

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_deref(), child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            drop(stdin);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = tokio::time::timeout(spec.timeout, async {
            let (status, out, err) = tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
            status.map(|status| (status, out, err))
        })
        .await;

        let (status, out, err) = match finished {
            Ok(res) => res?,
            Err(_) => {
                warn!(target: "launcher.exec", command = %spec.display(), timeout_s = spec.timeout.as_secs(), "timed out; killing child");
                let _ = kill_graceful(&mut child, KILL_GRACE).await;
                return Err(ExecError::Timeout {
                    program: spec.program,
                    after: spec.timeout,
                });
            }
        };

        let mut output = String::from_utf8_lossy(&out).into_owned();
        output.push_str(&String::from_utf8_lossy(&err));

        debug!(target: "launcher.exec", command = %spec.display(), code = ?status.code(), "exited");
        Ok(CommandOutput {
            success: status.success(),
            code: status.code(),
            output,
        })
    }
}
