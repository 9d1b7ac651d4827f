//! Backend dispatch.
//!
//! [`Executor`] implements [`Lifecycle`] for every [`BackendKind`]; the per-backend command
//! sequences live in the submodules.

mod compose;
mod container;
mod kubernetes;

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use launcher_core::PortAllocator;
use launcher_model::{BackendKind, PortMapping, WorkloadSpec};
use tracing::{debug, info, warn};

use crate::{
    config::ExecConfig,
    error::ExecError,
    guard::{self, ResolvedPaths},
    proc::{CommandOutput, CommandSpec, ProcessRunner},
    util::tail,
};

/// Captured output kept in logs.
const LOG_OUTPUT_TAIL: usize = 4096;

/// Lifecycle operations on a workload's backend.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Bring the workload up. Returns the host ports it was published on (single-container only).
    async fn start(&self, spec: &WorkloadSpec) -> Result<Vec<PortMapping>, ExecError>;

    async fn stop(&self, spec: &WorkloadSpec) -> Result<(), ExecError>;

    /// Stop (failure logged, not fatal), pause, start.
    async fn restart(&self, spec: &WorkloadSpec) -> Result<Vec<PortMapping>, ExecError>;

    /// `Ok(false)` means the backend reports nothing running.
    async fn check_health(&self, spec: &WorkloadSpec) -> Result<bool, ExecError>;
}

pub struct Executor<R: ProcessRunner> {
    runner: Arc<R>,
    cfg: ExecConfig,
    allocator: PortAllocator,
}

impl<R: ProcessRunner> Executor<R> {
    pub fn new(runner: R, cfg: ExecConfig) -> Self {
        let allocator = PortAllocator::new(cfg.port_range.clone());
        Self::with_allocator(runner, cfg, allocator)
    }

    pub fn with_allocator(runner: R, cfg: ExecConfig, allocator: PortAllocator) -> Self {
        Self {
            runner: Arc::new(runner),
            cfg,
            allocator,
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.cfg
    }

    pub(crate) fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    /// Run a command; a failed exit becomes an error and its output is logged.
    pub(crate) async fn exec<I, S>(
        &self,
        program: &str,
        args: I,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(program, args, timeout);
        if let Some(cwd) = cwd {
            spec = spec.cwd(cwd);
        }
        let command = spec.display();

        let out = self.runner.run(spec).await?;
        if !out.success {
            warn!(
                target: "launcher.exec",
                %command,
                code = ?out.code,
                output = %tail(&out.output, LOG_OUTPUT_TAIL),
                "command failed"
            );
        }
        out.check(program)
    }

    pub(crate) fn docker(&self) -> &str {
        &self.cfg.docker
    }

    pub(crate) fn kubectl(&self) -> &str {
        &self.cfg.kubectl
    }

    pub(crate) fn command_timeout(&self) -> Duration {
        self.cfg.command_timeout
    }

    pub(crate) fn health_timeout(&self) -> Duration {
        self.cfg.health_timeout
    }
}

fn prepare(spec: &WorkloadSpec) -> Result<ResolvedPaths, ExecError> {
    guard::resolve(spec).inspect_err(|e| {
        warn!(slug = %spec.slug, error = %e, "refusing to run workload");
    })
}

#[async_trait]
impl<R: ProcessRunner> Lifecycle for Executor<R> {
    async fn start(&self, spec: &WorkloadSpec) -> Result<Vec<PortMapping>, ExecError> {
        let paths = prepare(spec)?;
        info!(slug = %spec.slug, backend = %spec.backend, "starting workload");

        let ports = match spec.backend {
            BackendKind::Compose => compose::up(self, &spec.slug, &paths).await.map(|()| Vec::new()),
            BackendKind::Container => container::up(self, spec, &paths).await,
            BackendKind::Kubernetes => kubernetes::apply(self, &paths).await.map(|()| Vec::new()),
        }?;

        info!(slug = %spec.slug, ports = ?ports, "workload started");
        Ok(ports)
    }

    async fn stop(&self, spec: &WorkloadSpec) -> Result<(), ExecError> {
        let paths = prepare(spec)?;
        info!(slug = %spec.slug, backend = %spec.backend, "stopping workload");

        match spec.backend {
            BackendKind::Compose => compose::down(self, &spec.slug, &paths).await,
            BackendKind::Container => container::remove(self, &spec.slug).await,
            BackendKind::Kubernetes => kubernetes::delete(self, &paths).await,
        }?;

        info!(slug = %spec.slug, "workload stopped");
        Ok(())
    }

    async fn restart(&self, spec: &WorkloadSpec) -> Result<Vec<PortMapping>, ExecError> {
        if let Err(e) = self.stop(spec).await {
            warn!(slug = %spec.slug, error = %e, "stop during restart failed; starting anyway");
        }
        tokio::time::sleep(self.cfg.restart_pause).await;
        self.start(spec).await
    }

    async fn check_health(&self, spec: &WorkloadSpec) -> Result<bool, ExecError> {
        let paths = prepare(spec)?;
        let healthy = match spec.backend {
            BackendKind::Compose => compose::healthy(self, &spec.slug, &paths).await,
            BackendKind::Container => container::healthy(self, &spec.slug).await,
            BackendKind::Kubernetes => kubernetes::healthy(self, &spec.slug).await,
        }?;
        debug!(slug = %spec.slug, healthy, "health probed");
        Ok(healthy)
    }
}
