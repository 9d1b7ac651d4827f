use std::{
    collections::HashSet,
    fmt,
    ops::RangeInclusive,
    sync::{Arc, LazyLock},
};

use parking_lot::Mutex;
use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha20Rng;
use regex::Regex;
use tracing::trace;

use crate::error::CoreError;

/// Host port band handed out to single-container workloads (IANA dynamic range).
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

/// Matches the host side of `0.0.0.0:49153->80/tcp` and `:::8000-8002->8000-8002/tcp`.
static HOST_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+)(?:-(\d+))?->").expect("host port pattern is valid"));

/// Host ports bound by existing containers, read from the container CLI's port listing.
pub fn parse_used_host_ports(output: &str) -> HashSet<u16> {
    let mut used = HashSet::new();
    for caps in HOST_PORT.captures_iter(output) {
        let Some(start) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) else {
            continue;
        };
        let end = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .unwrap_or(start);
        used.extend(start..=end.max(start));
    }
    used
}

/// Random host port allocator.
///
/// Candidates are shuffled with a dedicated ChaCha generator seeded once from OS
/// entropy. Ports handed out stay reserved until their [`PortLease`] is dropped, so two
/// concurrent starts never pick the same port before either container is up.
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    state: Arc<Mutex<AllocatorState>>,
}

struct AllocatorState {
    rng: ChaCha20Rng,
    leased: HashSet<u16>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self::with_rng(range, ChaCha20Rng::from_entropy())
    }

    /// Deterministic allocator, for tests.
    pub fn with_seed(range: RangeInclusive<u16>, seed: u64) -> Self {
        Self::with_rng(range, ChaCha20Rng::seed_from_u64(seed))
    }

    fn with_rng(range: RangeInclusive<u16>, rng: ChaCha20Rng) -> Self {
        Self {
            range,
            state: Arc::new(Mutex::new(AllocatorState {
                rng,
                leased: HashSet::new(),
            })),
        }
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }

    /// Draw `count` distinct ports that are neither in `in_use` nor leased elsewhere.
    pub fn allocate(&self, count: usize, in_use: &HashSet<u16>) -> Result<PortLease, CoreError> {
        let mut state = self.state.lock();

        let mut candidates: Vec<u16> = self
            .range
            .clone()
            .filter(|p| !in_use.contains(p) && !state.leased.contains(p))
            .collect();
        if candidates.len() < count {
            return Err(CoreError::PortsExhausted {
                wanted: count,
                available: candidates.len(),
            });
        }

        candidates.shuffle(&mut state.rng);
        candidates.truncate(count);
        state.leased.extend(candidates.iter().copied());
        trace!(ports = ?candidates, "ports leased");

        Ok(PortLease {
            ports: candidates,
            state: Arc::clone(&self.state),
        })
    }

    /// Number of ports currently reserved by live leases.
    pub fn leased(&self) -> usize {
        self.state.lock().leased.len()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}

impl fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortAllocator")
            .field("range", &self.range)
            .field("leased", &self.leased())
            .finish()
    }
}

/// Ports reserved for one start operation; released on drop.
pub struct PortLease {
    ports: Vec<u16>,
    state: Arc<Mutex<AllocatorState>>,
}

impl PortLease {
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        for port in &self.ports {
            state.leased.remove(port);
        }
    }
}

impl fmt::Debug for PortLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PortLease").field(&self.ports).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_docker_port_listing() {
        let output = "0.0.0.0:49153->80/tcp, :::49153->80/tcp\n\n127.0.0.1:8000-8002->8000-8002/tcp\n80/tcp\n";
        let used = parse_used_host_ports(output);
        let mut sorted: Vec<_> = used.into_iter().collect();
        sorted.sort();
        assert_eq!(sorted, vec![8000, 8001, 8002, 49153]);
    }

    #[test]
    fn allocates_distinct_ports_outside_exclusion() {
        let alloc = PortAllocator::with_seed(1000..=1099, 7);
        let in_use: HashSet<u16> = (1000..1090).collect();

        let lease = alloc.allocate(10, &in_use).unwrap();
        let ports: HashSet<u16> = lease.ports().iter().copied().collect();
        assert_eq!(ports.len(), 10);
        assert!(ports.iter().all(|p| !in_use.contains(p) && (1000..=1099).contains(p)));
    }

    #[test]
    fn fails_cleanly_when_range_is_too_small() {
        let alloc = PortAllocator::with_seed(1000..=1009, 1);
        let in_use: HashSet<u16> = (1000..1005).collect();

        let err = alloc.allocate(6, &in_use).unwrap_err();
        assert!(matches!(
            err,
            CoreError::PortsExhausted {
                wanted: 6,
                available: 5
            }
        ));
        assert_eq!(alloc.leased(), 0);
    }

    #[test]
    fn leases_block_concurrent_claims_until_dropped() {
        let alloc = PortAllocator::with_seed(2000..=2003, 3);
        let none = HashSet::new();

        let first = alloc.allocate(3, &none).unwrap();
        let second = alloc.allocate(1, &none).unwrap();
        assert!(!first.ports().contains(&second.ports()[0]));
        assert!(alloc.allocate(1, &none).is_err());

        drop(first);
        assert_eq!(alloc.leased(), 1);
        assert_eq!(alloc.allocate(3, &none).unwrap().ports().len(), 3);
    }

    #[test]
    fn same_seed_same_draw() {
        let none = HashSet::new();
        let a = PortAllocator::with_seed(DEFAULT_PORT_RANGE, 42);
        let b = PortAllocator::with_seed(DEFAULT_PORT_RANGE, 42);
        assert_eq!(a.allocate(4, &none).unwrap().ports(), b.allocate(4, &none).unwrap().ports());
    }
}
