use std::{fs, path::Path};

use launcher_model::PortMapping;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

/// `port:targetPort` pairs of every `Service` across all documents of a manifest.
///
/// Entries without a numeric `port` and `targetPort` are skipped.
pub(super) fn parse(config: &Path) -> Vec<PortMapping> {
    let Ok(raw) = fs::read_to_string(config) else {
        return Vec::new();
    };

    let mut ports = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&raw) {
        let doc = match Value::deserialize(document) {
            Ok(doc) => doc,
            Err(e) => {
                debug!(config = %config.display(), error = %e, "skipping unparsable manifest document");
                continue;
            }
        };
        if doc.get("kind").and_then(Value::as_str) != Some("Service") {
            continue;
        }
        let Some(entries) = doc
            .get("spec")
            .and_then(|spec| spec.get("ports"))
            .and_then(Value::as_sequence)
        else {
            continue;
        };
        for entry in entries {
            let port = entry.get("port").and_then(as_port);
            let target = entry.get("targetPort").and_then(as_port);
            if let (Some(port), Some(target)) = (port, target) {
                ports.push(PortMapping::mapped(port, target));
            }
        }
    }
    ports
}

fn as_port(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|n| u16::try_from(n).ok())
}
