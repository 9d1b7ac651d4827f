use serde::{Deserialize, Serialize};

use crate::{PortMapping, WorkloadStatus};

/// Message pushed to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    Status { data: StatusData },
    VoteStarted { data: VoteStartedData },
    VoteUpdate { data: VoteUpdateData },
    VoteEnded { data: VoteEndedData },
    Error { message: String },
    Info { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        ServerMessage::Info {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Pong => "pong",
            ServerMessage::Status { .. } => "status",
            ServerMessage::VoteStarted { .. } => "vote_started",
            ServerMessage::VoteUpdate { .. } => "vote_update",
            ServerMessage::VoteEnded { .. } => "vote_ended",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Info { .. } => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    pub status: WorkloadStatus,
    pub connected_users: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_ports: Option<Vec<PortMapping>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteStartedData {
    pub initiator_ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteUpdateData {
    pub yes_percent: f64,
    pub no_percent: f64,
    pub total_users: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEndedData {
    pub result: VoteOutcome,
}

/// How a restart vote ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    Approved,
    Rejected,
    Expired,
}
