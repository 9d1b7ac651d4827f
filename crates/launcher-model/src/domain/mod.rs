mod backend_kind;
pub use backend_kind::{BackendKind, ParseBackendError};

mod port_mapping;
pub use port_mapping::{ParsePortError, PortMapping};

mod workload_spec;
pub use workload_spec::{WorkloadSpec, slugify};

mod workload_status;
pub use workload_status::WorkloadStatus;

/// Unique workload identifier, derived from event/category/name.
///
/// Slugs are URL- and shell-safe and immutable once a workload is discovered.
pub type Slug = String;

/// Viewer origin address (client IP as seen by the hub).
pub type Origin = String;
