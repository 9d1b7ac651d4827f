use thiserror::Error;

use crate::logger::config::{ENV_LOG, ENV_LOG_FORMAT};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("{ENV_LOG_FORMAT}={0:?} is not a log format (text, json, journald)")]
    InvalidFormat(String),
    #[error("journald output needs Linux and the `journald` feature")]
    JournaldNotSupported,
    #[error("a global logger is already installed")]
    AlreadyInitialized,
    #[error("logger setup failed: {0}")]
    InitializationFailed(String),
    #[error("{ENV_LOG}={filter:?} is not a valid filter: {reason}")]
    InvalidFilter { filter: String, reason: String },
}
