use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Launch mechanism used by a workload.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A compose stack driven by `docker compose`.
    Compose,
    /// A single image built from a Dockerfile and run as one container.
    Container,
    /// Kubernetes manifests applied with `kubectl`.
    Kubernetes,
}

impl BackendKind {
    /// Returns a short symbolic identifier, used in logs and on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendKind::Compose => "compose",
            BackendKind::Container => "container",
            BackendKind::Kubernetes => "kubernetes",
        }
    }

    /// Launch config file name used when the catalog does not name one.
    pub fn default_config(&self) -> &'static str {
        match self {
            BackendKind::Compose => "docker-compose.yml",
            BackendKind::Container => "Dockerfile",
            BackendKind::Kubernetes => "k8s.yml",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown backend kind: {0} (expected: compose|container|kubernetes)")]
pub struct ParseBackendError(pub String);

impl FromStr for BackendKind {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        match norm.as_str() {
            "compose" | "docker-compose" => Ok(BackendKind::Compose),
            "container" | "docker" | "dockerfile" => Ok(BackendKind::Container),
            "kubernetes" | "k8s" => Ok(BackendKind::Kubernetes),
            _ => Err(ParseBackendError(s.to_string())),
        }
    }
}
