use tracing::{Span, info_span};

/// Span name under which per-workload operations run.
pub const WORKLOAD_SPAN: &str = "workload";

/// Span carrying the workload slug.
///
/// Everything logged inside it, subprocess output under `launcher.exec` included, is
/// attributed to the workload: text output prefixes `workload{slug=..}:`, JSON output
/// adds a `span` object with the `slug` field.
pub fn workload_span(slug: &str) -> Span {
    info_span!("workload", slug = %slug)
}
