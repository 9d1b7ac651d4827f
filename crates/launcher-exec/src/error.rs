use std::{path::PathBuf, time::Duration};

use launcher_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("unsafe workload slug: {0:?}")]
    UnsafeSlug(String),
    #[error("config path escapes working directory: {0}")]
    PathEscape(PathBuf),
    #[error("config not found: {0}")]
    ConfigMissing(PathBuf),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("{program} exited with code {code}")]
    NonZeroExit {
        program: String,
        code: i32,
        output: String,
    },
    #[error("{program} killed by signal")]
    KilledBySignal { program: String, output: String },
    #[error("{program} timed out after {}s", after.as_secs())]
    Timeout { program: String, after: Duration },
    #[error("io error: {0}")]
    Io(String),
    #[error(transparent)]
    Ports(#[from] CoreError),
}

impl ExecError {
    /// Captured output of the failed command, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            ExecError::NonZeroExit { output, .. } | ExecError::KilledBySignal { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
