use std::time::Duration;

use launcher_core::vote::DEFAULT_VOTE_LIFETIME;

/// Connection hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a running workload may stay viewer-less before it is stopped.
    pub auto_stop_grace: Duration,
    /// Minimum time between successful restarts of one workload.
    pub restart_cooldown: Duration,
    pub vote_lifetime: Duration,
    /// Outbound messages buffered per connection; overflow is dropped.
    pub queue_capacity: usize,
    /// WebSocket ping interval.
    pub heartbeat_interval: Duration,
    /// Take the viewer origin from the first `X-Forwarded-For` entry.
    pub trust_forwarded_for: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            auto_stop_grace: Duration::from_secs(60),
            restart_cooldown: Duration::from_secs(5 * 60),
            vote_lifetime: DEFAULT_VOTE_LIFETIME,
            queue_capacity: 64,
            heartbeat_interval: Duration::from_secs(30),
            trust_forwarded_for: false,
        }
    }
}
