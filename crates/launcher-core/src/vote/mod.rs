//! Restart votes.
//!
//! At most one vote per workload. Percentages are computed against the viewers that
//! are connected *now*, so a ballot from someone who left no longer counts.
//!
//! Every vote owns one cancellable expiry timer. When it fires before the vote is
//! resolved, the vote is removed and its slug is pushed to [`VoteExpirations`].

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use launcher_model::{Ballot, Origin, Slug, VoteOutcome, VoteUpdateData};
use parking_lot::Mutex;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::CoreError;

/// Share of connected viewers, in percent, one side needs to resolve a vote.
pub const THRESHOLD_PERCENT: f64 = 50.0;

pub const DEFAULT_VOTE_LIFETIME: Duration = Duration::from_secs(60);

type VoteTable = Arc<Mutex<HashMap<Slug, ActiveVote>>>;

struct ActiveVote {
    generation: u64,
    started_at: Instant,
    ballots: HashMap<Origin, Ballot>,
    timer: CancellationToken,
}

/// Yes/no shares among currently connected viewers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoteTally {
    pub yes_percent: f64,
    pub no_percent: f64,
    pub total_users: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDecision {
    Approved,
    Rejected,
    Pending,
}

impl VoteTally {
    /// Approval is checked first, so a 50/50 split approves.
    pub fn check_threshold(&self) -> VoteDecision {
        if self.total_users == 0 {
            VoteDecision::Pending
        } else if self.yes_percent >= THRESHOLD_PERCENT {
            VoteDecision::Approved
        } else if self.no_percent >= THRESHOLD_PERCENT {
            VoteDecision::Rejected
        } else {
            VoteDecision::Pending
        }
    }
}

impl From<VoteTally> for VoteUpdateData {
    fn from(t: VoteTally) -> Self {
        VoteUpdateData {
            yes_percent: t.yes_percent,
            no_percent: t.no_percent,
            total_users: t.total_users,
        }
    }
}

impl VoteDecision {
    pub fn outcome(self) -> Option<VoteOutcome> {
        match self {
            VoteDecision::Approved => Some(VoteOutcome::Approved),
            VoteDecision::Rejected => Some(VoteOutcome::Rejected),
            VoteDecision::Pending => None,
        }
    }
}

/// Receiving end of vote expirations.
pub struct VoteExpirations {
    rx: mpsc::UnboundedReceiver<Slug>,
}

impl VoteExpirations {
    /// Next slug whose vote expired. `None` once the coordinator is gone.
    pub async fn recv(&mut self) -> Option<Slug> {
        self.rx.recv().await
    }
}

pub struct VoteCoordinator {
    lifetime: Duration,
    votes: VoteTable,
    generation: AtomicU64,
    expired: mpsc::UnboundedSender<Slug>,
}

impl VoteCoordinator {
    pub fn new(lifetime: Duration) -> (Self, VoteExpirations) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            lifetime,
            votes: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            expired: tx,
        };
        (coordinator, VoteExpirations { rx })
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Open a vote for `slug` and arm its expiry timer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_vote(&self, slug: &str) -> Result<(), CoreError> {
        let mut votes = self.votes.lock();
        if votes.contains_key(slug) {
            return Err(CoreError::VoteActive);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let timer = CancellationToken::new();
        votes.insert(
            slug.to_string(),
            ActiveVote {
                generation,
                started_at: Instant::now(),
                ballots: HashMap::new(),
                timer: timer.clone(),
            },
        );
        drop(votes);

        self.arm_expiry(slug.to_string(), generation, timer);
        debug!(%slug, lifetime_s = self.lifetime.as_secs(), "restart vote started");
        Ok(())
    }

    fn arm_expiry(&self, slug: Slug, generation: u64, timer: CancellationToken) {
        let votes = Arc::clone(&self.votes);
        let expired = self.expired.clone();
        let lifetime = self.lifetime;

        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(lifetime) => {
                    let removed = {
                        let mut votes = votes.lock();
                        if votes.get(&slug).map(|v| v.generation) == Some(generation) {
                            votes.remove(&slug)
                        } else {
                            None
                        }
                    };
                    if removed.is_some() {
                        debug!(%slug, "restart vote expired");
                        let _ = expired.send(slug);
                    }
                }
            }
        });
    }

    /// Record (or overwrite) `origin`'s ballot.
    pub fn cast_vote(&self, slug: &str, origin: &str, ballot: Ballot) -> Result<(), CoreError> {
        let mut votes = self.votes.lock();
        let vote = votes.get_mut(slug).ok_or(CoreError::NoActiveVote)?;
        vote.ballots.insert(origin.to_string(), ballot);
        trace!(%slug, %origin, ?ballot, "ballot recorded");
        Ok(())
    }

    /// Tally ballots of the origins in `connected`. `None` if no vote is active.
    pub fn status(&self, slug: &str, connected: &[Origin]) -> Option<VoteTally> {
        let votes = self.votes.lock();
        let vote = votes.get(slug)?;

        let total_users = connected.len();
        let (mut yes, mut no) = (0usize, 0usize);
        for origin in connected {
            match vote.ballots.get(origin) {
                Some(Ballot::Yes) => yes += 1,
                Some(Ballot::No) => no += 1,
                None => {}
            }
        }

        let percent = |n: usize| {
            if total_users == 0 {
                0.0
            } else {
                n as f64 * 100.0 / total_users as f64
            }
        };
        Some(VoteTally {
            yes_percent: percent(yes),
            no_percent: percent(no),
            total_users,
        })
    }

    /// Remove the vote and cancel its timer. Returns `false` if none was active.
    pub fn end_vote(&self, slug: &str) -> bool {
        let removed = self.votes.lock().remove(slug);
        match removed {
            Some(vote) => {
                vote.timer.cancel();
                debug!(%slug, open_for_ms = vote.started_at.elapsed().as_millis() as u64, "restart vote ended");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, slug: &str) -> bool {
        self.votes.lock().contains_key(slug)
    }

    /// Cancel every pending timer and drop all votes.
    pub fn shutdown(&self) {
        for (_, vote) in self.votes.lock().drain() {
            vote.timer.cancel();
        }
    }
}
