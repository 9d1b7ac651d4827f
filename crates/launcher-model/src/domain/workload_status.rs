use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    /// Nothing is running. Initial state after discovery.
    #[default]
    Stopped,
    /// A start operation is in flight.
    Starting,
    /// The backend reported a successful start.
    Running,
    /// A stop operation is in flight.
    Stopping,
    /// A stop-then-start cycle is in flight.
    Restarting,
    /// The health monitor found the workload down while it was believed running.
    Unhealthy,
}

impl WorkloadStatus {
    /// Returns `true` if `self -> next` is a legal edge of the lifecycle state machine.
    ///
    /// `Stopping -> Running | Unhealthy` are rollback edges taken when a stop fails and
    /// the workload keeps its pre-operation status.
    pub fn can_transition_to(self, next: WorkloadStatus) -> bool {
        use WorkloadStatus::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Running, Restarting)
                | (Running, Unhealthy)
                | (Stopping, Stopped)
                | (Stopping, Running)
                | (Stopping, Unhealthy)
                | (Restarting, Running)
                | (Restarting, Stopped)
                | (Unhealthy, Restarting)
                | (Unhealthy, Stopping)
        )
    }

    /// Returns `true` while a lifecycle operation is in flight.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            WorkloadStatus::Starting | WorkloadStatus::Stopping | WorkloadStatus::Restarting
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadStatus::Stopped => "stopped",
            WorkloadStatus::Starting => "starting",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Stopping => "stopping",
            WorkloadStatus::Restarting => "restarting",
            WorkloadStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
