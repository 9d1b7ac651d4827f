use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, bail};
use launcher_api::{DEFAULT_HEALTH_INTERVAL, HubConfig};
use launcher_exec::ExecConfig;

pub const ENV_BIND: &str = "LAUNCHER_BIND";
pub const ENV_CATALOG: &str = "LAUNCHER_CATALOG";
pub const ENV_AUTO_STOP_SECS: &str = "LAUNCHER_AUTO_STOP_SECS";
pub const ENV_RESTART_COOLDOWN_SECS: &str = "LAUNCHER_RESTART_COOLDOWN_SECS";
pub const ENV_VOTE_SECS: &str = "LAUNCHER_VOTE_SECS";
pub const ENV_HEALTH_INTERVAL_SECS: &str = "LAUNCHER_HEALTH_INTERVAL_SECS";
pub const ENV_COMMAND_TIMEOUT_SECS: &str = "LAUNCHER_COMMAND_TIMEOUT_SECS";
pub const ENV_TRUST_FORWARDED_FOR: &str = "LAUNCHER_TRUST_FORWARDED_FOR";
pub const ENV_DOCKER: &str = "LAUNCHER_DOCKER";
pub const ENV_KUBECTL: &str = "LAUNCHER_KUBECTL";

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_CATALOG: &str = "challenges/catalog.yml";

/// Everything the daemon needs to boot.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind: SocketAddr,
    pub catalog: PathBuf,
    pub health_interval: Duration,
    pub hub: HubConfig,
    pub exec: ExecConfig,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or blank values keep the defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = parse(ENV_BIND, get(ENV_BIND).as_deref().unwrap_or(DEFAULT_BIND))?;
        let catalog = PathBuf::from(get(ENV_CATALOG).unwrap_or_else(|| DEFAULT_CATALOG.into()));

        let mut hub = HubConfig::default();
        if let Some(v) = get(ENV_AUTO_STOP_SECS) {
            hub.auto_stop_grace = secs(ENV_AUTO_STOP_SECS, &v)?;
        }
        if let Some(v) = get(ENV_RESTART_COOLDOWN_SECS) {
            hub.restart_cooldown = secs(ENV_RESTART_COOLDOWN_SECS, &v)?;
        }
        if let Some(v) = get(ENV_VOTE_SECS) {
            hub.vote_lifetime = positive_secs(ENV_VOTE_SECS, &v)?;
        }
        if let Some(v) = get(ENV_TRUST_FORWARDED_FOR) {
            hub.trust_forwarded_for = flag(ENV_TRUST_FORWARDED_FOR, &v)?;
        }

        let mut exec = ExecConfig::default();
        if let Some(v) = get(ENV_COMMAND_TIMEOUT_SECS) {
            exec.command_timeout = positive_secs(ENV_COMMAND_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(ENV_DOCKER) {
            exec.docker = v.trim().to_string();
        }
        if let Some(v) = get(ENV_KUBECTL) {
            exec.kubectl = v.trim().to_string();
        }

        let health_interval = match get(ENV_HEALTH_INTERVAL_SECS) {
            Some(v) => positive_secs(ENV_HEALTH_INTERVAL_SECS, &v)?,
            None => DEFAULT_HEALTH_INTERVAL,
        };

        Ok(Self {
            bind,
            catalog,
            health_interval,
            hub,
            exec,
        })
    }
}

fn parse<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("invalid {key}: {raw:?}"))
}

fn secs(key: &str, raw: &str) -> anyhow::Result<Duration> {
    parse::<u64>(key, raw).map(Duration::from_secs)
}

// Zero would make tokio intervals panic or expire votes instantly.
fn positive_secs(key: &str, raw: &str) -> anyhow::Result<Duration> {
    let d = secs(key, raw)?;
    if d.is_zero() {
        bail!("{key} must be greater than zero");
    }
    Ok(d)
}

fn flag(key: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("invalid {key}: {raw:?}"),
    }
}
