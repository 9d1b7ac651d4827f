//! Periodic health reconciliation.
//!
//! Only `running` workloads are probed. A negative probe, or a probe that fails, moves
//! the workload to `unhealthy`; nothing here ever moves it back.

use std::{sync::Arc, time::Duration};

use launcher_exec::Lifecycle;
use launcher_model::{ServerMessage, WorkloadStatus};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use launcher_observe::workload_span;
use tracing::{Instrument, debug, info, warn};

use crate::hub::Hub;

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

pub struct HealthMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start probing every `interval`. The first cycle runs one interval after start.
    pub fn spawn<L: Lifecycle>(hub: Arc<Hub<L>>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {}
                }
                // Runs to completion even if cancellation arrives meanwhile.
                let flipped = run_cycle(&hub).await;
                if flipped > 0 {
                    info!(flipped, "health cycle marked workloads unhealthy");
                }
            }
            debug!("health monitor stopped");
        });

        Self { cancel, handle }
    }

    /// Stop the loop, waiting for an in-flight cycle to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "health monitor task failed");
        }
    }
}

/// Probe every running workload once. Returns how many were marked unhealthy.
pub async fn run_cycle<L: Lifecycle>(hub: &Hub<L>) -> usize {
    let mut flipped = 0;
    for workload in hub.registry().list() {
        if workload.status() != WorkloadStatus::Running {
            continue;
        }
        // Skip workloads with a lifecycle operation in flight; next cycle will see them.
        let Some(_op) = workload.try_lock_operation() else {
            continue;
        };
        if workload.status() != WorkloadStatus::Running {
            continue;
        }

        let slug = workload.slug();
        let probe = hub
            .executor()
            .check_health(workload.spec())
            .instrument(workload_span(slug));
        let healthy = match probe.await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(%slug, error = %e, "health check failed");
                false
            }
        };
        if healthy {
            continue;
        }

        if workload
            .transition(&[WorkloadStatus::Running], WorkloadStatus::Unhealthy)
            .is_ok()
        {
            warn!(%slug, "workload unhealthy");
            flipped += 1;
            hub.broadcast_status(&workload);
            hub.broadcast(
                slug,
                ServerMessage::error("health check failed, workload marked unhealthy"),
            );
        }
    }
    flipped
}
