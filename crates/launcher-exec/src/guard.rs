//! Checks run before any external command is spawned.

use std::{
    io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use launcher_model::WorkloadSpec;
use regex::Regex;

use crate::error::ExecError;

static SAFE_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("slug pattern is valid"));

/// Slugs become project, image and container names and are passed as CLI arguments.
/// Only `[a-z0-9_-]` is allowed, and the first character must be alphanumeric so a slug
/// never parses as a flag.
pub fn validate_slug(slug: &str) -> Result<(), ExecError> {
    if SAFE_SLUG.is_match(slug) {
        Ok(())
    } else {
        Err(ExecError::UnsafeSlug(slug.to_string()))
    }
}

/// Canonical working directory and launch config of a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub working_dir: PathBuf,
    pub config: PathBuf,
}

/// Resolve the workload's config and make sure it stays inside its working directory.
pub fn resolve(spec: &WorkloadSpec) -> Result<ResolvedPaths, ExecError> {
    validate_slug(&spec.slug)?;

    let working_dir = canonical(&spec.working_dir)?;
    let config = canonical(&spec.config_file())?;
    if !config.starts_with(&working_dir) {
        return Err(ExecError::PathEscape(spec.config_file()));
    }
    Ok(ResolvedPaths {
        working_dir,
        config,
    })
}

fn canonical(path: &Path) -> Result<PathBuf, ExecError> {
    path.canonicalize().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ExecError::ConfigMissing(path.to_path_buf()),
        _ => ExecError::from(e),
    })
}
