//! Viewer commands: `ping`, `start`, `restart`, `vote`.
//!
//! Admission failures (rate limit, busy workload, cooldown, vote already running) are
//! answered to the requester only. Everything that changes shared state is broadcast.

use std::sync::Arc;

use launcher_core::{ActionKind, CoreError, VoteDecision, Workload};
use launcher_exec::Lifecycle;
use launcher_model::{
    Ballot, ClientMessage, ServerMessage, VoteEndedData, VoteStartedData, WorkloadStatus,
};
use launcher_observe::workload_span;
use tracing::{Instrument, debug, info, warn};

use super::{Hub, Viewer};
use crate::error::ApiError;

impl<L: Lifecycle> Hub<L> {
    /// Decode one text frame and act on it. Malformed frames get an `error` reply.
    pub fn handle_text(self: &Arc<Self>, viewer: &Viewer, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle_message(viewer, msg),
            Err(e) => {
                debug!(slug = %viewer.slug, origin = %viewer.origin, error = %e, "malformed frame");
                self.send_to(viewer, ServerMessage::error("malformed message"));
            }
        }
    }

    pub fn handle_message(self: &Arc<Self>, viewer: &Viewer, msg: ClientMessage) {
        debug!(slug = %viewer.slug, origin = %viewer.origin, kind = msg.kind(), "command");
        let result = match msg {
            ClientMessage::Ping => {
                self.send_to(viewer, ServerMessage::Pong);
                Ok(())
            }
            ClientMessage::Start => self.handle_start(viewer),
            ClientMessage::Restart => self.handle_restart_request(viewer),
            ClientMessage::Vote { data } => self.handle_ballot(viewer, data.value),
        };
        if let Err(e) = result {
            self.send_to(viewer, ServerMessage::error(e.to_string()));
        }
    }

    fn handle_start(self: &Arc<Self>, viewer: &Viewer) -> Result<(), ApiError> {
        self.rate_check(&viewer.origin, ActionKind::Lifecycle)?;
        let workload = self.workload(&viewer.slug)?;

        match workload.status() {
            WorkloadStatus::Running => {
                self.send_to(viewer, ServerMessage::info("workload is already running"));
                return Ok(());
            }
            WorkloadStatus::Unhealthy => {
                return Err(ApiError::InvalidRequest(
                    "workload is unhealthy, request a restart instead".into(),
                ));
            }
            status if status.is_transient() => {
                return Err(ApiError::InvalidRequest("workload is busy".into()));
            }
            _ => {}
        }

        // Lost race with another start.
        if workload
            .transition(&[WorkloadStatus::Stopped], WorkloadStatus::Starting)
            .is_err()
        {
            return Err(ApiError::InvalidRequest("workload is busy".into()));
        }
        info!(slug = %viewer.slug, origin = %viewer.origin, "start requested");
        self.broadcast_status(&workload);

        let hub = Arc::clone(self);
        let span = workload_span(&viewer.slug);
        tokio::spawn(async move { hub.run_start(workload).await }.instrument(span));
        Ok(())
    }

    async fn run_start(self: Arc<Self>, workload: Arc<Workload>) {
        let _op = workload.lock_operation().await;
        let slug = workload.slug();

        match self.executor.start(workload.spec()).await {
            Ok(ports) => {
                if let Err(e) = workload.set_running(ports) {
                    warn!(%slug, error = %e, "start finished in unexpected state");
                }
                self.broadcast_status(&workload);
            }
            Err(e) => {
                warn!(%slug, error = %e, "start failed");
                if let Err(e) = workload.set_status(WorkloadStatus::Stopped) {
                    warn!(%slug, error = %e, "failed start could not be rolled back");
                }
                self.broadcast_status(&workload);
                self.broadcast(slug, ServerMessage::error(format!("start failed: {e}")));
            }
        }
        self.stop_if_abandoned(&workload);
    }

    fn handle_restart_request(self: &Arc<Self>, viewer: &Viewer) -> Result<(), ApiError> {
        self.rate_check(&viewer.origin, ActionKind::Lifecycle)?;
        let workload = self.workload(&viewer.slug)?;

        if !matches!(
            workload.status(),
            WorkloadStatus::Running | WorkloadStatus::Unhealthy
        ) {
            return Err(ApiError::InvalidRequest("workload is not running".into()));
        }
        if let Some(remaining) = workload.cooldown_remaining(self.cfg.restart_cooldown) {
            return Err(CoreError::Cooldown { remaining }.into());
        }

        self.votes.start_vote(&viewer.slug)?;
        self.votes
            .cast_vote(&viewer.slug, &viewer.origin, Ballot::Yes)?;
        info!(slug = %viewer.slug, origin = %viewer.origin, "restart vote started");

        self.broadcast(
            &viewer.slug,
            ServerMessage::VoteStarted {
                data: VoteStartedData {
                    initiator_ip: viewer.origin.clone(),
                },
            },
        );
        self.evaluate_vote(&workload);
        Ok(())
    }

    fn handle_ballot(self: &Arc<Self>, viewer: &Viewer, ballot: Ballot) -> Result<(), ApiError> {
        self.rate_check(&viewer.origin, ActionKind::Ballot)?;
        let workload = self.workload(&viewer.slug)?;

        self.votes.cast_vote(&viewer.slug, &viewer.origin, ballot)?;
        self.evaluate_vote(&workload);
        Ok(())
    }

    /// Publish the current tally and resolve the vote once a side reaches the threshold.
    pub(super) fn evaluate_vote(self: &Arc<Self>, workload: &Arc<Workload>) {
        let slug = workload.slug();
        let connected = workload.viewers();
        let Some(tally) = self.votes.status(slug, &connected) else {
            return;
        };
        self.broadcast(slug, ServerMessage::VoteUpdate { data: tally.into() });

        let decision = tally.check_threshold();
        let Some(result) = decision.outcome() else {
            return;
        };
        // Only the caller that actually removes the vote acts on it.
        if !self.votes.end_vote(slug) {
            return;
        }
        info!(%slug, ?result, yes = tally.yes_percent, no = tally.no_percent, "restart vote resolved");
        self.broadcast(
            slug,
            ServerMessage::VoteEnded {
                data: VoteEndedData { result },
            },
        );

        if decision == VoteDecision::Approved {
            let hub = Arc::clone(self);
            let workload = Arc::clone(workload);
            let span = workload_span(slug);
            tokio::spawn(async move { hub.run_restart(workload).await }.instrument(span));
        }
    }

    async fn run_restart(self: Arc<Self>, workload: Arc<Workload>) {
        let _op = workload.lock_operation().await;
        let slug = workload.slug();

        if workload
            .transition(
                &[WorkloadStatus::Running, WorkloadStatus::Unhealthy],
                WorkloadStatus::Restarting,
            )
            .is_err()
        {
            self.broadcast(
                slug,
                ServerMessage::error("restart skipped, workload is no longer running"),
            );
            return;
        }
        self.broadcast_status(&workload);

        match self.executor.restart(workload.spec()).await {
            Ok(ports) => {
                if let Err(e) = workload.set_running(ports) {
                    warn!(%slug, error = %e, "restart finished in unexpected state");
                }
                workload.mark_restarted();
                self.broadcast_status(&workload);
                self.broadcast(slug, ServerMessage::info("workload restarted"));
            }
            Err(e) => {
                warn!(%slug, error = %e, "restart failed");
                if let Err(e) = workload.set_status(WorkloadStatus::Stopped) {
                    warn!(%slug, error = %e, "failed restart could not be rolled back");
                }
                self.broadcast_status(&workload);
                self.broadcast(slug, ServerMessage::error(format!("restart failed: {e}")));
            }
        }

        self.stop_if_abandoned(&workload);
    }

    /// The last viewer may have left while an operation was in flight; detach could not
    /// arm auto-stop then because the workload was not running yet.
    fn stop_if_abandoned(self: &Arc<Self>, workload: &Workload) {
        if workload.viewer_count() == 0 && workload.status() == WorkloadStatus::Running {
            debug!(slug = %workload.slug(), "no viewers after operation");
            self.arm_auto_stop(workload.slug());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use launcher_model::{Ballot, ClientMessage, ServerMessage, VoteOutcome, WorkloadStatus};

    use crate::hub::testing::*;

    #[tokio::test(start_paused = true)]
    async fn ping_is_answered_privately() {
        let (hub, _) = harness();
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        let mut b = hub.attach(SLUG, ORIGIN_B).unwrap();
        drain(&mut a);
        drain(&mut b);

        hub.handle_message(&a.viewer, ClientMessage::Ping);
        assert_eq!(a.outbound.try_recv().unwrap(), ServerMessage::Pong);
        assert!(b.outbound.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_gets_error() {
        let (hub, _) = harness();
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        drain(&mut a);

        hub.handle_text(&a.viewer, "{\"type\":\"launch\"}");
        assert!(matches!(
            a.outbound.try_recv().unwrap(),
            ServerMessage::Error { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn start_goes_through_starting_to_running() {
        let (hub, exec) = harness();
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        drain(&mut a);

        hub.handle_message(&a.viewer, ClientMessage::Start);
        assert_eq!(status_of(&mut a).await.0, WorkloadStatus::Starting);
        assert_eq!(status_of(&mut a).await.0, WorkloadStatus::Running);
        assert_eq!(exec.starts(), 1);

        hub.handle_message(&a.viewer, ClientMessage::Start);
        assert!(matches!(next_message(&mut a).await, ServerMessage::Info { .. }));
        assert_eq!(exec.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_returns_to_stopped() {
        let (hub, exec) = harness();
        exec.fail_start(true);
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        drain(&mut a);

        hub.handle_message(&a.viewer, ClientMessage::Start);
        assert_eq!(status_of(&mut a).await.0, WorkloadStatus::Starting);
        assert_eq!(status_of(&mut a).await.0, WorkloadStatus::Stopped);
        assert!(matches!(next_message(&mut a).await, ServerMessage::Error { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_run_once() {
        let (hub, exec) = harness();
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        let mut b = hub.attach(SLUG, ORIGIN_B).unwrap();
        drain(&mut a);
        drain(&mut b);

        // Both frames land before the spawned start gets to run.
        hub.handle_message(&a.viewer, ClientMessage::Start);
        hub.handle_message(&b.viewer, ClientMessage::Start);

        assert_eq!(status_of(&mut b).await.0, WorkloadStatus::Starting);
        match next_message(&mut b).await {
            ServerMessage::Error { message } => assert!(message.contains("busy")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(status_of(&mut a).await.0, WorkloadStatus::Starting);
        assert_eq!(status_of(&mut a).await.0, WorkloadStatus::Running);
        assert_eq!(exec.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_start_is_rejected() {
        let (hub, exec) = harness();
        set_running(&hub);
        workload(&hub).set_status(WorkloadStatus::Unhealthy).unwrap();
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        drain(&mut a);

        hub.handle_message(&a.viewer, ClientMessage::Start);
        assert!(matches!(next_message(&mut a).await, ServerMessage::Error { .. }));
        assert_eq!(exec.starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_requests_are_rate_limited() {
        let (hub, _) = harness();
        set_running(&hub);
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        drain(&mut a);

        for _ in 0..3 {
            hub.handle_message(&a.viewer, ClientMessage::Start);
            assert!(matches!(next_message(&mut a).await, ServerMessage::Info { .. }));
        }
        hub.handle_message(&a.viewer, ClientMessage::Start);
        match next_message(&mut a).await {
            ServerMessage::Error { message } => assert!(message.contains("rate limited")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_viewers_one_yes_restarts() {
        let (hub, exec) = harness();
        set_running(&hub);
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        let _b = hub.attach(SLUG, ORIGIN_B).unwrap();
        drain(&mut a);

        hub.handle_message(&a.viewer, ClientMessage::Restart);
        match next_message(&mut a).await {
            ServerMessage::VoteStarted { data } => assert_eq!(data.initiator_ip, ORIGIN_A),
            other => panic!("unexpected {other:?}"),
        }
        match next_message(&mut a).await {
            ServerMessage::VoteUpdate { data } => {
                assert_eq!(data.yes_percent, 50.0);
                assert_eq!(data.total_users, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(vote_result(&mut a).await, VoteOutcome::Approved);
        assert_eq!(status_of(&mut a).await.0, WorkloadStatus::Restarting);
        assert_eq!(status_of(&mut a).await.0, WorkloadStatus::Running);
        assert_eq!(exec.restarts(), 1);
        assert!(workload(&hub).last_restart().is_some());

        // Cooldown.
        drain(&mut a);
        hub.handle_message(&a.viewer, ClientMessage::Restart);
        match next_message(&mut a).await {
            ServerMessage::Error { message } => assert!(message.contains("cooldown")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_restart_stops_without_cooldown() {
        let (hub, exec) = harness();
        set_running(&hub);
        exec.fail_restart(true);
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        drain(&mut a);

        hub.handle_message(&a.viewer, ClientMessage::Restart);
        assert_eq!(vote_result(&mut a).await, VoteOutcome::Approved);
        assert_eq!(status_of(&mut a).await.0, WorkloadStatus::Restarting);
        match next_message(&mut a).await {
            ServerMessage::Status { data } => {
                assert_eq!(data.status, WorkloadStatus::Stopped);
                assert_eq!(data.allocated_ports, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        match next_message(&mut a).await {
            ServerMessage::Error { message } => assert!(message.contains("restart failed")),
            other => panic!("unexpected {other:?}"),
        }

        let w = workload(&hub);
        assert_eq!(exec.restarts(), 1);
        assert!(w.allocated_ports().is_empty());
        assert!(w.last_restart().is_none());
        assert!(w.cooldown_remaining(hub.config().restart_cooldown).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn majority_no_rejects() {
        let (hub, exec) = harness();
        set_running(&hub);
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        let b = hub.attach(SLUG, ORIGIN_B).unwrap();
        let c = hub.attach(SLUG, ORIGIN_C).unwrap();
        let _d = hub.attach(SLUG, "198.51.100.4").unwrap();

        hub.handle_message(&a.viewer, ClientMessage::Restart);
        hub.handle_message(&b.viewer, vote(Ballot::No));
        hub.handle_message(&c.viewer, vote(Ballot::No));

        assert_eq!(vote_result(&mut a).await, VoteOutcome::Rejected);
        settle().await;
        assert_eq!(exec.restarts(), 0);
        assert_eq!(workload(&hub).status(), WorkloadStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn second_vote_and_stray_ballot_are_rejected() {
        let (hub, _) = harness();
        set_running(&hub);
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        let mut b = hub.attach(SLUG, ORIGIN_B).unwrap();
        let _c = hub.attach(SLUG, ORIGIN_C).unwrap();

        hub.handle_message(&b.viewer, vote(Ballot::Yes));
        drain_until_error(&mut b).await;

        hub.handle_message(&a.viewer, ClientMessage::Restart);
        drain(&mut b);
        hub.handle_message(&b.viewer, ClientMessage::Restart);
        match drain_until_error(&mut b).await {
            ServerMessage::Error { message } => assert!(message.contains("already in progress")),
            other => panic!("unexpected {other:?}"),
        }
        drain(&mut a);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_vote_expires() {
        let (hub, exec) = harness();
        set_running(&hub);
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        let _b = hub.attach(SLUG, ORIGIN_B).unwrap();
        let _c = hub.attach(SLUG, ORIGIN_C).unwrap();

        hub.handle_message(&a.viewer, ClientMessage::Restart);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(vote_result(&mut a).await, VoteOutcome::Expired);
        assert_eq!(exec.restarts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_voter_can_resolve_vote() {
        let (hub, exec) = harness();
        set_running(&hub);
        let mut a = hub.attach(SLUG, ORIGIN_A).unwrap();
        let b = hub.attach(SLUG, ORIGIN_B).unwrap();
        let c = hub.attach(SLUG, ORIGIN_C).unwrap();

        // 1 yes of 3 is pending; once one other leaves, 1 of 2 approves.
        hub.handle_message(&a.viewer, ClientMessage::Restart);
        hub.detach(&b.viewer);
        hub.detach(&c.viewer);

        assert_eq!(vote_result(&mut a).await, VoteOutcome::Approved);
        settle().await;
        assert_eq!(exec.restarts(), 1);
    }
}
