use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{BackendKind, PortMapping, Slug};

/// Static description of a workload, as supplied by discovery.
///
/// Read-only after startup. Runtime state lives next to it in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub slug: Slug,
    pub name: String,
    pub category: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Directory the backend tool runs in. Every file the workload references must stay inside it.
    pub working_dir: PathBuf,
    pub backend: BackendKind,
    /// Launch config, relative to `working_dir` unless absolute.
    pub config_path: PathBuf,
    /// Declared ports (parsed from the launch config, or hints from discovery).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
}

impl WorkloadSpec {
    /// Config path joined onto the working directory.
    pub fn config_file(&self) -> PathBuf {
        self.working_dir.join(&self.config_path)
    }

    /// Container-side ports the workload exposes.
    pub fn container_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = Vec::with_capacity(self.ports.len());
        for p in &self.ports {
            if !ports.contains(&p.container) {
                ports.push(p.container);
            }
        }
        ports
    }
}

/// Lowercase, hyphen-separated identifier built from arbitrary text.
///
/// Keeps `[a-z0-9_]`, collapses every other run of characters into one `-`.
pub fn slugify(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        for c in part.chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                out.push(c.to_ascii_lowercase());
            } else if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
        }
        if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_joins_and_normalises() {
        assert_eq!(slugify(&["CTF 2024", "Web", "Baby's SQLi!"]), "ctf-2024-web-baby-s-sqli");
        assert_eq!(slugify(&["  a  ", "b_c"]), "a-b_c");
        assert_eq!(slugify(&["", "x"]), "x");
    }

    #[test]
    fn config_file_is_joined() {
        let spec = WorkloadSpec {
            slug: "e-c-n".into(),
            name: "n".into(),
            category: "c".into(),
            event: "e".into(),
            description: String::new(),
            working_dir: PathBuf::from("/srv/chal"),
            backend: BackendKind::Compose,
            config_path: PathBuf::from("docker-compose.yml"),
            ports: vec![PortMapping::unmapped(80), PortMapping::mapped(1, 80)],
        };
        assert_eq!(spec.config_file(), PathBuf::from("/srv/chal/docker-compose.yml"));
        assert_eq!(spec.container_ports(), vec![80]);
    }
}
