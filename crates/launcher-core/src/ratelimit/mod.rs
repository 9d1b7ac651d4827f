//! Per-origin token buckets.
//!
//! One bucket per `(origin, action kind)`, created on first use and refilled lazily
//! from elapsed time. Buckets that have not been touched for a while are swept.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Action classes with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Start and restart requests.
    Lifecycle,
    /// Restart vote ballots.
    Ballot,
    /// New viewer connections.
    Connect,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Lifecycle => "lifecycle",
            ActionKind::Ballot => "ballot",
            ActionKind::Connect => "connect",
        }
    }

    pub fn default_profile(&self) -> RateProfile {
        match self {
            ActionKind::Lifecycle => RateProfile::new(3, Duration::from_secs(10)),
            ActionKind::Ballot => RateProfile::new(5, Duration::from_secs(3)),
            ActionKind::Connect => RateProfile::new(20, Duration::from_millis(500)),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket size and the time it takes to earn back one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateProfile {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl RateProfile {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            refill_every: refill_every.max(Duration::from_millis(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
    last_used: Instant,
}

impl Bucket {
    fn full(profile: &RateProfile, now: Instant) -> Self {
        Self {
            tokens: profile.capacity,
            last_refill: now,
            last_used: now,
        }
    }

    /// Credit whole refill periods elapsed since the last refill.
    fn refill(&mut self, profile: &RateProfile, now: Instant) {
        if self.tokens >= profile.capacity {
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let periods = elapsed.as_nanos() / profile.refill_every.as_nanos();
        if periods == 0 {
            return;
        }

        let missing = u128::from(profile.capacity - self.tokens);
        if periods >= missing {
            self.tokens = profile.capacity;
            self.last_refill = now;
        } else {
            // periods < capacity, fits in u32
            self.tokens += periods as u32;
            self.last_refill += profile.refill_every * periods as u32;
        }
    }
}

pub struct RateLimiter {
    profiles: HashMap<ActionKind, RateProfile>,
    buckets: Mutex<HashMap<(String, ActionKind), Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        let profiles = [ActionKind::Lifecycle, ActionKind::Ballot, ActionKind::Connect]
            .into_iter()
            .map(|k| (k, k.default_profile()))
            .collect();
        Self {
            profiles,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Override the budget of one action kind.
    pub fn with_profile(mut self, kind: ActionKind, profile: RateProfile) -> Self {
        self.profiles.insert(kind, profile);
        self
    }

    pub fn profile(&self, kind: ActionKind) -> RateProfile {
        self.profiles
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_profile())
    }

    /// Take one token from `origin`'s bucket for `kind`.
    pub fn allow(&self, origin: &str, kind: ActionKind) -> RateDecision {
        let profile = self.profile(kind);
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry((origin.to_string(), kind))
            .or_insert_with(|| Bucket::full(&profile, now));

        bucket.refill(&profile, now);
        bucket.last_used = now;

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            trace!(%origin, kind = %kind, left = bucket.tokens, "token taken");
            RateDecision::Allowed
        } else {
            let since = now.saturating_duration_since(bucket.last_refill);
            let retry_after = profile.refill_every.saturating_sub(since);
            debug!(%origin, kind = %kind, retry_after_ms = retry_after.as_millis() as u64, "rate limited");
            RateDecision::Denied { retry_after }
        }
    }

    /// Drop buckets unused for longer than `idle`. Returns how many were removed.
    pub fn sweep(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_used) <= idle);
        before - buckets.len()
    }

    pub fn tracked(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Sweep every `every` until `cancel` fires.
    pub fn spawn_sweeper(
        limiter: Arc<Self>,
        every: Duration,
        idle: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let removed = limiter.sweep(idle);
                        if removed > 0 {
                            debug!(removed, "idle rate buckets swept");
                        }
                    }
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "192.0.2.10";

    fn limiter(capacity: u32, every: Duration) -> RateLimiter {
        RateLimiter::new().with_profile(ActionKind::Ballot, RateProfile::new(capacity, every))
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_then_one_per_period() {
        let period = Duration::from_secs(3);
        let rl = limiter(5, period);

        for _ in 0..5 {
            assert_eq!(rl.allow(ORIGIN, ActionKind::Ballot), RateDecision::Allowed);
        }
        let denied = rl.allow(ORIGIN, ActionKind::Ballot);
        assert_eq!(denied, RateDecision::Denied { retry_after: period });

        tokio::time::advance(period).await;
        assert!(rl.allow(ORIGIN, ActionKind::Ballot).is_allowed());
        assert!(!rl.allow(ORIGIN, ActionKind::Ballot).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_shrinks_with_time() {
        let rl = limiter(1, Duration::from_secs(10));
        assert!(rl.allow(ORIGIN, ActionKind::Ballot).is_allowed());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            rl.allow(ORIGIN, ActionKind::Ballot),
            RateDecision::Denied {
                retry_after: Duration::from_secs(6)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let rl = limiter(2, Duration::from_secs(1));
        assert!(rl.allow(ORIGIN, ActionKind::Ballot).is_allowed());
        assert!(rl.allow(ORIGIN, ActionKind::Ballot).is_allowed());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(rl.allow(ORIGIN, ActionKind::Ballot).is_allowed());
        assert!(rl.allow(ORIGIN, ActionKind::Ballot).is_allowed());
        assert!(!rl.allow(ORIGIN, ActionKind::Ballot).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn buckets_are_per_origin_and_kind() {
        let rl = RateLimiter::new();
        for _ in 0..3 {
            assert!(rl.allow(ORIGIN, ActionKind::Lifecycle).is_allowed());
        }
        assert!(!rl.allow(ORIGIN, ActionKind::Lifecycle).is_allowed());

        assert!(rl.allow(ORIGIN, ActionKind::Ballot).is_allowed());
        assert!(rl.allow("192.0.2.11", ActionKind::Lifecycle).is_allowed());
        assert_eq!(rl.tracked(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_idle_buckets() {
        let rl = RateLimiter::new();
        rl.allow("a", ActionKind::Connect);
        tokio::time::advance(Duration::from_secs(120)).await;
        rl.allow("b", ActionKind::Connect);

        assert_eq!(rl.sweep(Duration::from_secs(60)), 1);
        assert_eq!(rl.tracked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancel() {
        let rl = Arc::new(RateLimiter::new());
        rl.allow("a", ActionKind::Connect);

        let cancel = CancellationToken::new();
        let handle = RateLimiter::spawn_sweeper(
            Arc::clone(&rl),
            Duration::from_secs(30),
            Duration::from_secs(10),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(rl.tracked(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
