pub mod error;
pub use error::CoreError;

pub mod discovery;
pub use discovery::{CatalogSource, StaticSource, WorkloadSource};

pub mod ports;
pub use ports::{PortAllocator, PortLease, parse_ports, parse_used_host_ports};

pub mod ratelimit;
pub use ratelimit::{ActionKind, RateDecision, RateLimiter, RateProfile};

pub mod registry;
pub use registry::{Workload, WorkloadRegistry, WorkloadSnapshot};

pub mod vote;
pub use vote::{VoteCoordinator, VoteDecision, VoteExpirations, VoteTally};
