//! Port resolver.
//!
//! Declared ports are best-effort metadata: every parser returns an empty list
//! rather than an error when a file is missing or unreadable.

mod allocator;
pub use allocator::{DEFAULT_PORT_RANGE, PortAllocator, PortLease, parse_used_host_ports};

mod compose;
mod dockerfile;
mod env;
mod manifest;

use std::path::Path;

use launcher_model::{BackendKind, PortMapping};
use tracing::trace;

/// Declared ports of a workload's launch config.
///
/// `config_path` is resolved against `working_dir` when relative. Calling this twice on an
/// unchanged config yields the same list.
pub fn parse_ports(backend: BackendKind, config_path: &Path, working_dir: &Path) -> Vec<PortMapping> {
    let config = working_dir.join(config_path);
    let ports = match backend {
        BackendKind::Compose => compose::parse(&config),
        BackendKind::Container => dockerfile::parse(&config),
        BackendKind::Kubernetes => manifest::parse(&config),
    };
    trace!(%backend, config = %config.display(), count = ports.len(), "ports parsed");
    ports
}

/// Parse one `[ip:][host:]container[/proto]` entry.
///
/// An empty host part (e.g. an undefined variable) means "declared but unmapped".
/// Port ranges are not representable and yield `None`.
fn parse_port_entry(entry: &str) -> Option<PortMapping> {
    let entry = entry.trim();
    let entry = entry.split('/').next().unwrap_or(entry);

    let (rest, container) = match entry.rsplit_once(':') {
        Some((rest, container)) => (Some(rest), container),
        None => (None, entry),
    };
    let container = container.trim().parse::<u16>().ok()?;

    let host = rest.map(|rest| rest.rsplit_once(':').map_or(rest, |(_, host)| host).trim());
    match host {
        None | Some("") => Some(PortMapping::unmapped(container)),
        Some(host) => host
            .parse::<u16>()
            .ok()
            .map(|host| PortMapping::mapped(host, container)),
    }
}
