mod workload;
pub use workload::{Workload, WorkloadSnapshot};

use std::{collections::HashMap, sync::Arc};

use launcher_model::{Slug, WorkloadSpec};
use tracing::{debug, info};

use crate::{discovery::WorkloadSource, error::CoreError, ports::parse_ports};

/// In-memory workload registry.
///
/// Populated once by [`WorkloadRegistry::discover`]. The slug map itself never changes
/// afterwards, so reads take no lock; each [`Workload`] guards its own runtime state.
#[derive(Debug)]
pub struct WorkloadRegistry {
    workloads: HashMap<Slug, Arc<Workload>>,
}

impl WorkloadRegistry {
    /// Load every workload from `source` and resolve its declared ports.
    ///
    /// Fails with [`CoreError::NoWorkloads`] when the source yields nothing to serve.
    pub fn discover(source: &dyn WorkloadSource) -> Result<Self, CoreError> {
        let specs = source.load()?;
        debug!(source = source.name(), count = specs.len(), "workload specs loaded");
        Self::from_specs(specs)
    }

    pub fn from_specs(specs: Vec<WorkloadSpec>) -> Result<Self, CoreError> {
        if specs.is_empty() {
            return Err(CoreError::NoWorkloads);
        }

        let mut workloads = HashMap::with_capacity(specs.len());
        for mut spec in specs {
            if workloads.contains_key(&spec.slug) {
                return Err(CoreError::DuplicateSlug(spec.slug));
            }

            let parsed = parse_ports(spec.backend, &spec.config_path, &spec.working_dir);
            if !parsed.is_empty() {
                spec.ports = parsed;
            }

            info!(
                slug = %spec.slug,
                backend = %spec.backend,
                dir = %spec.working_dir.display(),
                ports = ?spec.ports.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "workload discovered"
            );
            workloads.insert(spec.slug.clone(), Arc::new(Workload::new(spec)));
        }

        Ok(Self { workloads })
    }

    pub fn get(&self, slug: &str) -> Option<Arc<Workload>> {
        self.workloads.get(slug).cloned()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.workloads.contains_key(slug)
    }

    /// All workloads, ordered by slug.
    pub fn list(&self) -> Vec<Arc<Workload>> {
        let mut all: Vec<_> = self.workloads.values().cloned().collect();
        all.sort_by(|a, b| a.slug().cmp(b.slug()));
        all
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}
