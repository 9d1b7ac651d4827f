use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use launcher_core::{RateLimiter, Workload, WorkloadRegistry};
use launcher_exec::{ExecError, Lifecycle};
use launcher_model::{
    Ballot, BallotData, BackendKind, ClientMessage, PortMapping, ServerMessage, VoteOutcome,
    WorkloadSpec, WorkloadStatus,
};

use super::{Hub, ViewerSession};
use crate::config::HubConfig;

pub const SLUG: &str = "ctf-web-login";
pub const ORIGIN_A: &str = "198.51.100.1";
pub const ORIGIN_B: &str = "198.51.100.2";
pub const ORIGIN_C: &str = "198.51.100.3";

/// Lifecycle that succeeds instantly unless told to fail, counting every call.
#[derive(Default)]
pub struct FakeLifecycle {
    starts: AtomicUsize,
    stops: AtomicUsize,
    restarts: AtomicUsize,
    health_checks: AtomicUsize,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_restart: AtomicBool,
    unhealthy: AtomicBool,
    health_error: AtomicBool,
}

impl FakeLifecycle {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }
    pub fn fail_start(&self, on: bool) {
        self.fail_start.store(on, Ordering::SeqCst);
    }
    pub fn fail_stop(&self, on: bool) {
        self.fail_stop.store(on, Ordering::SeqCst);
    }
    pub fn fail_restart(&self, on: bool) {
        self.fail_restart.store(on, Ordering::SeqCst);
    }
    pub fn set_unhealthy(&self, on: bool) {
        self.unhealthy.store(on, Ordering::SeqCst);
    }
    pub fn set_health_error(&self, on: bool) {
        self.health_error.store(on, Ordering::SeqCst);
    }

    fn failure() -> ExecError {
        ExecError::NonZeroExit {
            program: "docker".into(),
            code: 1,
            output: "simulated".into(),
        }
    }
}

#[async_trait]
impl Lifecycle for FakeLifecycle {
    async fn start(&self, _spec: &WorkloadSpec) -> Result<Vec<PortMapping>, ExecError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Self::failure());
        }
        Ok(vec![PortMapping::mapped(50001, 80)])
    }

    async fn stop(&self, _spec: &WorkloadSpec) -> Result<(), ExecError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Self::failure());
        }
        Ok(())
    }

    async fn restart(&self, _spec: &WorkloadSpec) -> Result<Vec<PortMapping>, ExecError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(Self::failure());
        }
        Ok(vec![PortMapping::mapped(50002, 80)])
    }

    async fn check_health(&self, _spec: &WorkloadSpec) -> Result<bool, ExecError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.health_error.load(Ordering::SeqCst) {
            return Err(ExecError::Timeout {
                program: "docker".into(),
                after: Duration::from_secs(30),
            });
        }
        Ok(!self.unhealthy.load(Ordering::SeqCst))
    }
}

pub fn spec(slug: &str) -> WorkloadSpec {
    WorkloadSpec {
        slug: slug.into(),
        name: "login".into(),
        category: "web".into(),
        event: "ctf".into(),
        description: String::new(),
        working_dir: PathBuf::from("/nonexistent/launcher-test"),
        backend: BackendKind::Container,
        config_path: PathBuf::from("Dockerfile"),
        ports: vec![PortMapping::unmapped(80)],
    }
}

pub fn harness() -> (Arc<Hub<FakeLifecycle>>, Arc<FakeLifecycle>) {
    harness_with(|_| {})
}

pub fn harness_with(tweak: impl FnOnce(&mut HubConfig)) -> (Arc<Hub<FakeLifecycle>>, Arc<FakeLifecycle>) {
    let mut cfg = HubConfig::default();
    tweak(&mut cfg);
    let registry = WorkloadRegistry::from_specs(vec![spec(SLUG), spec("ctf-pwn-heap")]).unwrap();
    let exec = Arc::new(FakeLifecycle::default());
    let hub = Hub::new(
        Arc::new(registry),
        Arc::clone(&exec),
        Arc::new(RateLimiter::new()),
        cfg,
    );
    (hub, exec)
}

pub fn workload(hub: &Hub<FakeLifecycle>) -> Arc<Workload> {
    hub.registry().get(SLUG).unwrap()
}

pub fn set_running(hub: &Hub<FakeLifecycle>) {
    let w = workload(hub);
    w.transition(&[WorkloadStatus::Stopped], WorkloadStatus::Starting)
        .unwrap();
    w.set_running(vec![PortMapping::mapped(50001, 80)]).unwrap();
}

pub fn vote(value: Ballot) -> ClientMessage {
    ClientMessage::Vote {
        data: BallotData { value },
    }
}

/// Let spawned tasks run to completion.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn drain(session: &mut ViewerSession) {
    while session.outbound.try_recv().is_ok() {}
}

pub async fn next_message(session: &mut ViewerSession) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), session.recv())
        .await
        .expect("no message within 5s")
        .expect("session closed")
}

pub async fn status_of(session: &mut ViewerSession) -> (WorkloadStatus, usize) {
    loop {
        if let ServerMessage::Status { data } = next_message(session).await {
            return (data.status, data.connected_users);
        }
    }
}

pub async fn vote_result(session: &mut ViewerSession) -> VoteOutcome {
    loop {
        if let ServerMessage::VoteEnded { data } = next_message(session).await {
            return data.result;
        }
    }
}

pub async fn drain_until_error(session: &mut ViewerSession) -> ServerMessage {
    loop {
        let msg = next_message(session).await;
        if matches!(msg, ServerMessage::Error { .. }) {
            return msg;
        }
    }
}
