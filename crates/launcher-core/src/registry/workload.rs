use std::{collections::HashMap, fmt, time::Duration};

use launcher_model::{BackendKind, Origin, PortMapping, WorkloadSpec, WorkloadStatus};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard},
    time::Instant,
};
use tracing::debug;

use crate::error::CoreError;

/// A discovered workload plus its runtime state.
///
/// Runtime state sits behind a short-lived sync lock. Lifecycle operations additionally
/// hold the async operation lock for their whole duration, so no two of them overlap on
/// the same workload.
pub struct Workload {
    spec: WorkloadSpec,
    state: Mutex<WorkloadState>,
    operation: AsyncMutex<()>,
}

#[derive(Debug, Default)]
struct WorkloadState {
    status: WorkloadStatus,
    last_restart: Option<Instant>,
    allocated_ports: Vec<PortMapping>,
    /// origin -> number of open connections from that origin.
    viewers: HashMap<Origin, usize>,
}

/// Point-in-time view of a workload, as exposed over the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadSnapshot {
    pub slug: String,
    pub name: String,
    pub category: String,
    pub event: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub backend: BackendKind,
    pub status: WorkloadStatus,
    pub connected_users: usize,
    pub ports: Vec<PortMapping>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allocated_ports: Vec<PortMapping>,
}

impl Workload {
    pub fn new(spec: WorkloadSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(WorkloadState::default()),
            operation: AsyncMutex::new(()),
        }
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    pub fn slug(&self) -> &str {
        &self.spec.slug
    }

    pub fn status(&self) -> WorkloadStatus {
        self.state.lock().status
    }

    /// Serialize lifecycle operations on this workload.
    pub async fn lock_operation(&self) -> AsyncMutexGuard<'_, ()> {
        self.operation.lock().await
    }

    /// Operation lock, unless some operation is already in flight.
    pub fn try_lock_operation(&self) -> Option<AsyncMutexGuard<'_, ()>> {
        self.operation.try_lock().ok()
    }

    /// Compare-and-set: move to `to` only if the current status is one of `from`.
    ///
    /// Returns the status that was replaced.
    pub fn transition(
        &self,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
    ) -> Result<WorkloadStatus, CoreError> {
        let mut state = self.state.lock();
        let current = state.status;
        if !from.contains(&current) {
            return Err(CoreError::IllegalTransition { from: current, to });
        }
        Self::apply(&self.spec, &mut state, to)?;
        Ok(current)
    }

    /// Move to `to` from whatever the current status is, if that edge is legal.
    pub fn set_status(&self, to: WorkloadStatus) -> Result<WorkloadStatus, CoreError> {
        let mut state = self.state.lock();
        let current = state.status;
        Self::apply(&self.spec, &mut state, to)?;
        Ok(current)
    }

    /// Enter `running` and record the host ports the backend bound.
    ///
    /// Ports are kept only for single-container workloads.
    pub fn set_running(&self, ports: Vec<PortMapping>) -> Result<WorkloadStatus, CoreError> {
        let mut state = self.state.lock();
        let current = state.status;
        Self::apply(&self.spec, &mut state, WorkloadStatus::Running)?;
        if self.spec.backend == BackendKind::Container {
            state.allocated_ports = ports;
        }
        Ok(current)
    }

    fn apply(
        spec: &WorkloadSpec,
        state: &mut WorkloadState,
        to: WorkloadStatus,
    ) -> Result<(), CoreError> {
        let from = state.status;
        if !from.can_transition_to(to) {
            return Err(CoreError::IllegalTransition { from, to });
        }
        state.status = to;
        if to != WorkloadStatus::Running {
            state.allocated_ports.clear();
        }
        debug!(slug = %spec.slug, %from, %to, "status transition");
        Ok(())
    }

    pub fn allocated_ports(&self) -> Vec<PortMapping> {
        self.state.lock().allocated_ports.clone()
    }

    /// Register one connection from `origin`. Returns the number of distinct origins.
    pub fn add_viewer(&self, origin: &str) -> usize {
        let mut state = self.state.lock();
        *state.viewers.entry(origin.to_string()).or_insert(0) += 1;
        state.viewers.len()
    }

    /// Drop one connection from `origin`. Returns the number of distinct origins left.
    pub fn remove_viewer(&self, origin: &str) -> usize {
        let mut state = self.state.lock();
        if let Some(count) = state.viewers.get_mut(origin) {
            *count -= 1;
            if *count == 0 {
                state.viewers.remove(origin);
            }
        }
        state.viewers.len()
    }

    pub fn viewers(&self) -> Vec<Origin> {
        let mut origins: Vec<_> = self.state.lock().viewers.keys().cloned().collect();
        origins.sort();
        origins
    }

    pub fn viewer_count(&self) -> usize {
        self.state.lock().viewers.len()
    }

    pub fn last_restart(&self) -> Option<Instant> {
        self.state.lock().last_restart
    }

    pub fn mark_restarted(&self) {
        self.state.lock().last_restart = Some(Instant::now());
    }

    /// Time left before another restart may be requested, if any.
    pub fn cooldown_remaining(&self, cooldown: Duration) -> Option<Duration> {
        let last = self.last_restart()?;
        cooldown
            .checked_sub(last.elapsed())
            .filter(|left| !left.is_zero())
    }

    pub fn snapshot(&self) -> WorkloadSnapshot {
        let state = self.state.lock();
        WorkloadSnapshot {
            slug: self.spec.slug.clone(),
            name: self.spec.name.clone(),
            category: self.spec.category.clone(),
            event: self.spec.event.clone(),
            description: self.spec.description.clone(),
            backend: self.spec.backend,
            status: state.status,
            connected_users: state.viewers.len(),
            ports: self.spec.ports.clone(),
            allocated_ports: state.allocated_ports.clone(),
        }
    }
}

impl fmt::Debug for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload")
            .field("slug", &self.spec.slug)
            .field("backend", &self.spec.backend)
            .field("status", &self.status())
            .finish()
    }
}
