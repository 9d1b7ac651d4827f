//! Connection hub.
//!
//! Multiplexes viewer connections per workload, fans out status and vote messages, and
//! stops workloads nobody is watching anymore.
//!
//! Each workload has its own connection table, so traffic on one workload never waits
//! for another. Broadcasts snapshot the table, release the lock, then `try_send` onto
//! every bounded queue; a full queue loses the message.

mod commands;
mod session;
pub use session::{Viewer, ViewerSession};

#[cfg(test)]
pub(crate) mod testing;

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use launcher_core::{
    ActionKind, RateDecision, RateLimiter, VoteCoordinator, VoteExpirations, Workload,
    WorkloadRegistry,
};
use launcher_exec::Lifecycle;
use launcher_model::{
    ServerMessage, Slug, StatusData, VoteEndedData, VoteOutcome, WorkloadStatus,
};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use launcher_observe::workload_span;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::{config::HubConfig, error::ApiError};
use session::Connection;

type ConnectionTable = Mutex<HashMap<Uuid, Connection>>;

struct PendingStop {
    generation: u64,
    token: CancellationToken,
}

pub struct Hub<L: Lifecycle> {
    registry: Arc<WorkloadRegistry>,
    executor: Arc<L>,
    limiter: Arc<RateLimiter>,
    votes: VoteCoordinator,
    cfg: HubConfig,
    /// One table per workload; the outer map is fixed at construction.
    connections: HashMap<Slug, ConnectionTable>,
    auto_stops: Mutex<HashMap<Slug, PendingStop>>,
    stop_generation: AtomicU64,
    cancel: CancellationToken,
}

impl<L: Lifecycle> Hub<L> {
    /// Build the hub and start forwarding vote expirations to viewers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        registry: Arc<WorkloadRegistry>,
        executor: Arc<L>,
        limiter: Arc<RateLimiter>,
        cfg: HubConfig,
    ) -> Arc<Self> {
        let (votes, expirations) = VoteCoordinator::new(cfg.vote_lifetime);
        let connections = registry
            .list()
            .iter()
            .map(|w| (w.slug().to_string(), Mutex::new(HashMap::new())))
            .collect();

        let hub = Arc::new(Self {
            registry,
            executor,
            limiter,
            votes,
            cfg,
            connections,
            auto_stops: Mutex::new(HashMap::new()),
            stop_generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });
        Self::spawn_vote_expiry(Arc::downgrade(&hub), expirations, hub.cancel.child_token());
        hub
    }

    pub fn registry(&self) -> &Arc<WorkloadRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<L> {
        &self.executor
    }

    pub fn config(&self) -> &HubConfig {
        &self.cfg
    }

    fn workload(&self, slug: &str) -> Result<Arc<Workload>, ApiError> {
        self.registry
            .get(slug)
            .ok_or_else(|| ApiError::UnknownWorkload(slug.to_string()))
    }

    /// Gate a new connection: the workload must exist and the origin must have budget left.
    pub fn admit(&self, slug: &str, origin: &str) -> Result<(), ApiError> {
        if !self.registry.contains(slug) {
            return Err(ApiError::UnknownWorkload(slug.to_string()));
        }
        self.rate_check(origin, ActionKind::Connect)
    }

    pub(crate) fn rate_check(&self, origin: &str, kind: ActionKind) -> Result<(), ApiError> {
        match self.limiter.allow(origin, kind) {
            RateDecision::Allowed => Ok(()),
            RateDecision::Denied { retry_after } => Err(ApiError::RateLimited { retry_after }),
        }
    }

    /// Register a connection and announce the new viewer count.
    pub fn attach(self: &Arc<Self>, slug: &str, origin: &str) -> Result<ViewerSession, ApiError> {
        let workload = self.workload(slug)?;
        let table = self
            .connections
            .get(slug)
            .ok_or_else(|| ApiError::UnknownWorkload(slug.to_string()))?;

        let (tx, rx) = tokio::sync::mpsc::channel(self.cfg.queue_capacity.max(1));
        let viewer = Viewer {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            origin: origin.to_string(),
        };
        table.lock().insert(
            viewer.id,
            Connection {
                origin: viewer.origin.clone(),
                tx,
            },
        );
        let viewers = workload.add_viewer(origin);
        self.cancel_auto_stop(slug);

        info!(%slug, %origin, conn = %viewer.id, viewers, "viewer attached");
        self.broadcast_status(&workload);
        self.evaluate_vote(&workload);

        Ok(ViewerSession {
            viewer,
            outbound: rx,
        })
    }

    /// Unregister a connection. Arms auto-stop when the last viewer of a live workload leaves.
    pub fn detach(self: &Arc<Self>, viewer: &Viewer) {
        let Some(workload) = self.registry.get(&viewer.slug) else {
            return;
        };
        let removed = self
            .connections
            .get(&viewer.slug)
            .and_then(|table| table.lock().remove(&viewer.id));
        let Some(conn) = removed else {
            return;
        };

        let remaining = workload.remove_viewer(&conn.origin);
        info!(slug = %viewer.slug, origin = %conn.origin, conn = %viewer.id, viewers = remaining, "viewer detached");

        self.broadcast_status(&workload);
        self.evaluate_vote(&workload);

        if remaining == 0
            && matches!(
                workload.status(),
                WorkloadStatus::Running | WorkloadStatus::Unhealthy
            )
        {
            self.arm_auto_stop(&viewer.slug);
        }
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    /// Queue `msg` for every connection of `slug`.
    pub fn broadcast(&self, slug: &str, msg: ServerMessage) {
        let Some(table) = self.connections.get(slug) else {
            return;
        };
        let targets: Vec<(Uuid, _)> = table
            .lock()
            .iter()
            .map(|(id, conn)| (*id, conn.tx.clone()))
            .collect();

        for (id, tx) in targets {
            match tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(%slug, conn = %id, kind = msg.kind(), "outbound queue full; message dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Queue `msg` for one connection only.
    pub fn send_to(&self, viewer: &Viewer, msg: ServerMessage) {
        let tx = self
            .connections
            .get(&viewer.slug)
            .and_then(|table| table.lock().get(&viewer.id).map(|c| c.tx.clone()));
        if let Some(tx) = tx {
            if let Err(TrySendError::Full(_)) = tx.try_send(msg) {
                debug!(slug = %viewer.slug, conn = %viewer.id, "outbound queue full; reply dropped");
            }
        }
    }

    pub fn broadcast_status(&self, workload: &Workload) {
        let ports = workload.allocated_ports();
        let msg = ServerMessage::Status {
            data: StatusData {
                status: workload.status(),
                connected_users: workload.viewer_count(),
                allocated_ports: (!ports.is_empty()).then_some(ports),
            },
        };
        self.broadcast(workload.slug(), msg);
    }

    // ========================================================================
    // Auto-stop
    // ========================================================================

    fn arm_auto_stop(self: &Arc<Self>, slug: &str) {
        let generation = self.stop_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = self.cancel.child_token();
        let previous = self.auto_stops.lock().insert(
            slug.to_string(),
            PendingStop {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let grace = self.cfg.auto_stop_grace;
        debug!(%slug, grace_s = grace.as_secs(), "auto-stop armed");

        let hub = Arc::clone(self);
        let span = workload_span(slug);
        let slug = slug.to_string();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(grace) => {}
                }
                {
                    let mut pending = hub.auto_stops.lock();
                    // A newer disconnect re-armed the timer.
                    if pending.get(&slug).map(|p| p.generation) != Some(generation) {
                        return;
                    }
                    pending.remove(&slug);
                }
                hub.auto_stop(&slug).await;
            }
            .instrument(span),
        );
    }

    fn cancel_auto_stop(&self, slug: &str) {
        if let Some(pending) = self.auto_stops.lock().remove(slug) {
            pending.token.cancel();
            debug!(%slug, "auto-stop cancelled");
        }
    }

    async fn auto_stop(&self, slug: &str) {
        let Some(workload) = self.registry.get(slug) else {
            return;
        };
        let _op = workload.lock_operation().await;

        if workload.viewer_count() > 0 {
            return;
        }
        let Ok(previous) = workload.transition(
            &[WorkloadStatus::Running, WorkloadStatus::Unhealthy],
            WorkloadStatus::Stopping,
        ) else {
            return;
        };
        info!(%slug, "no viewers left; stopping workload");
        self.broadcast_status(&workload);

        match self.executor.stop(workload.spec()).await {
            Ok(()) => {
                if let Err(e) = workload.set_status(WorkloadStatus::Stopped) {
                    warn!(%slug, error = %e, "auto-stop finished in unexpected state");
                }
            }
            Err(e) => {
                warn!(%slug, error = %e, "auto-stop failed");
                if let Err(e) = workload.set_status(previous) {
                    warn!(%slug, error = %e, "failed auto-stop could not be rolled back");
                }
            }
        }
        self.broadcast_status(&workload);
    }

    // ========================================================================
    // Votes
    // ========================================================================

    fn spawn_vote_expiry(hub: Weak<Self>, mut expirations: VoteExpirations, cancel: CancellationToken) {
        tokio::spawn(async move {
            loop {
                let slug = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = expirations.recv() => match next {
                        Some(slug) => slug,
                        None => break,
                    },
                };
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                info!(%slug, "restart vote expired");
                hub.broadcast(
                    &slug,
                    ServerMessage::VoteEnded {
                        data: VoteEndedData {
                            result: VoteOutcome::Expired,
                        },
                    },
                );
            }
        });
    }

    /// Cancel pending auto-stops and vote timers.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.auto_stops.lock().clear();
        self.votes.shutdown();
        info!("hub shut down");
    }
}
