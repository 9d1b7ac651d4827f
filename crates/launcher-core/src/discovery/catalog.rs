use std::{
    fs,
    path::{Path, PathBuf},
};

use launcher_model::{BackendKind, PortMapping, WorkloadSpec, slugify};
use serde::Deserialize;
use tracing::warn;

use super::WorkloadSource;
use crate::error::CoreError;

/// Reads workloads from a YAML catalog file.
///
/// ```yaml
/// workloads:
///   - event: CTF 2024
///     category: web
///     name: login
///     dir: web/login          # relative to the catalog file
///     backend: compose
///     config: compose.yml     # optional, backend default otherwise
///     ports: ["8080:80"]      # optional hints
/// ```
#[derive(Debug, Clone)]
pub struct CatalogSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    workloads: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    slug: Option<String>,
    event: String,
    category: String,
    name: String,
    #[serde(default)]
    description: String,
    dir: PathBuf,
    backend: String,
    #[serde(default)]
    config: Option<PathBuf>,
    #[serde(default)]
    ports: Vec<String>,
}

impl CatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn invalid(&self, reason: impl ToString) -> CoreError {
        CoreError::InvalidCatalog {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn to_spec(&self, base: &Path, entry: CatalogEntry) -> Result<WorkloadSpec, CoreError> {
        let backend: BackendKind = entry.backend.parse().map_err(|e| self.invalid(e))?;
        let slug = entry
            .slug
            .unwrap_or_else(|| slugify(&[&entry.event, &entry.category, &entry.name]));
        if slug.is_empty() {
            return Err(self.invalid(format!("entry {:?} has an empty slug", entry.name)));
        }

        let ports = entry
            .ports
            .iter()
            .filter_map(|p| match p.parse::<PortMapping>() {
                Ok(port) => Some(port),
                Err(e) => {
                    warn!(%slug, error = %e, "ignoring port hint");
                    None
                }
            })
            .collect();

        Ok(WorkloadSpec {
            config_path: entry
                .config
                .unwrap_or_else(|| PathBuf::from(backend.default_config())),
            working_dir: base.join(entry.dir),
            name: entry.name,
            category: entry.category,
            event: entry.event,
            description: entry.description,
            backend,
            ports,
            slug,
        })
    }
}

impl WorkloadSource for CatalogSource {
    fn name(&self) -> &'static str {
        "catalog"
    }

    fn load(&self) -> Result<Vec<WorkloadSpec>, CoreError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| self.invalid(e))?;
        let catalog: Catalog = serde_yaml::from_str(&raw).map_err(|e| self.invalid(e))?;
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));

        catalog
            .workloads
            .into_iter()
            .map(|entry| self.to_spec(base, entry))
            .collect()
    }
}
