use std::{ops::RangeInclusive, time::Duration};

use launcher_core::ports::DEFAULT_PORT_RANGE;

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Container CLI binary.
    pub docker: String,
    /// Kubernetes CLI binary.
    pub kubectl: String,
    /// Upper bound for start / stop commands (image builds included).
    pub command_timeout: Duration,
    /// Upper bound for a single health probe.
    pub health_timeout: Duration,
    /// Pause between the stop and start halves of a restart.
    pub restart_pause: Duration,
    /// Host port band for single-container workloads.
    pub port_range: RangeInclusive<u16>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            docker: "docker".into(),
            kubectl: "kubectl".into(),
            command_timeout: Duration::from_secs(10 * 60),
            health_timeout: Duration::from_secs(30),
            restart_pause: Duration::from_secs(2),
            port_range: DEFAULT_PORT_RANGE,
        }
    }
}
