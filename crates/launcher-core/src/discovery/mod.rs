//! Workload discovery.
//!
//! The registry does not care where workload specs come from; it asks a
//! [`WorkloadSource`] once at startup. [`CatalogSource`] reads a YAML catalog,
//! [`StaticSource`] hands over a prepared list.

mod catalog;
pub use catalog::CatalogSource;

use launcher_model::WorkloadSpec;

use crate::error::CoreError;

/// Supplier of workload specs, consulted once at startup.
pub trait WorkloadSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn load(&self) -> Result<Vec<WorkloadSpec>, CoreError>;
}

/// Source backed by an in-memory list.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    specs: Vec<WorkloadSpec>,
}

impl StaticSource {
    pub fn new(specs: Vec<WorkloadSpec>) -> Self {
        Self { specs }
    }
}

impl WorkloadSource for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    fn load(&self) -> Result<Vec<WorkloadSpec>, CoreError> {
        Ok(self.specs.clone())
    }
}
