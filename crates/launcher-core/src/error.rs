use std::{path::PathBuf, time::Duration};

use launcher_model::WorkloadStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no workloads discovered")]
    NoWorkloads,

    #[error("duplicate workload slug: {0}")]
    DuplicateSlug(String),

    #[error("invalid catalog {path}: {reason}")]
    InvalidCatalog { path: PathBuf, reason: String },

    #[error("unknown workload: {0}")]
    UnknownWorkload(String),

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: WorkloadStatus,
        to: WorkloadStatus,
    },

    #[error("a restart vote is already in progress")]
    VoteActive,

    #[error("no restart vote is in progress")]
    NoActiveVote,

    #[error("restart cooldown active, retry in {}s", remaining.as_secs().max(1))]
    Cooldown { remaining: Duration },

    #[error("port range exhausted: need {wanted}, {available} available")]
    PortsExhausted { wanted: usize, available: usize },
}
