mod config;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use launcher_api::{HealthMonitor, HttpApi, Hub};
use launcher_core::{CatalogSource, RateLimiter, WorkloadRegistry, ratelimit::DEFAULT_IDLE_WINDOW};
use launcher_exec::{Executor, SystemRunner};
use launcher_observe::{LoggerConfig, logger_init};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DaemonConfig;

const SWEEP_EVERY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Logger
    let log_cfg = LoggerConfig::from_env()?;
    logger_init(&log_cfg)?;

    // 2) Config
    let cfg = DaemonConfig::from_env()?;
    info!(bind = %cfg.bind, catalog = %cfg.catalog.display(), "configuration loaded");

    // 3) Discovery, the only fatal failure at runtime
    let source = CatalogSource::new(&cfg.catalog);
    let registry = WorkloadRegistry::discover(&source)
        .with_context(|| format!("discovery from {}", cfg.catalog.display()))?;
    info!(workloads = registry.len(), "registry ready");

    // 4) Executor + rate limiter
    let executor = Arc::new(Executor::new(SystemRunner, cfg.exec.clone()));
    let limiter = Arc::new(RateLimiter::new());
    let sweeper_cancel = CancellationToken::new();
    let sweeper = RateLimiter::spawn_sweeper(
        Arc::clone(&limiter),
        SWEEP_EVERY,
        DEFAULT_IDLE_WINDOW,
        sweeper_cancel.clone(),
    );

    // 5) Hub + health monitor
    let hub = Hub::new(Arc::new(registry), executor, limiter, cfg.hub.clone());
    let monitor = HealthMonitor::spawn(Arc::clone(&hub), cfg.health_interval);

    // 6) HTTP / WebSocket
    let listener = tokio::net::TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;
    info!(addr = %cfg.bind, "listening");

    let app = HttpApi::new(Arc::clone(&hub))
        .router()
        .into_make_service_with_connect_info::<SocketAddr>();
    let served = launcher_api::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // 7) Teardown
    info!("shutting down...");
    hub.shutdown();
    monitor.stop().await;
    sweeper_cancel.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "rate-limit sweeper failed");
    }

    served.context("http server")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
