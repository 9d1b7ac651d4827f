use std::{fs, path::Path};

use launcher_model::PortMapping;
use serde_yaml::Value;
use tracing::debug;

use super::{
    env::{EnvMap, read_env_file, substitute},
    parse_port_entry,
};

/// Ports published by every service of a compose file.
///
/// Each service sees the default `.env` next to the compose file, overlaid with its own
/// `env_file` entries in declaration order.
pub(super) fn parse(config: &Path) -> Vec<PortMapping> {
    let Ok(raw) = fs::read_to_string(config) else {
        return Vec::new();
    };
    let doc: Value = match serde_yaml::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(config = %config.display(), error = %e, "compose file is not valid yaml");
            return Vec::new();
        }
    };

    let base_dir = config.parent().unwrap_or_else(|| Path::new("."));
    let default_env = read_env_file(&base_dir.join(".env")).unwrap_or_default();

    let Some(services) = doc.get("services").and_then(Value::as_mapping) else {
        return Vec::new();
    };

    let mut ports = Vec::new();
    for service in services.values() {
        let Some(entries) = service.get("ports").and_then(Value::as_sequence) else {
            continue;
        };
        let env = service_env(service, base_dir, &default_env);
        ports.extend(entries.iter().filter_map(|entry| port_from_value(entry, &env)));
    }
    ports
}

fn service_env(service: &Value, base_dir: &Path, default_env: &EnvMap) -> EnvMap {
    let mut env = default_env.clone();
    for file in env_files(service) {
        if let Some(layer) = read_env_file(&base_dir.join(&file)) {
            env.extend(layer);
        } else {
            debug!(file = %file, "env file not readable, skipping");
        }
    }
    env
}

/// `env_file` may be a string, a list of strings, or a list of `{path, required}` maps.
fn env_files(service: &Value) -> Vec<String> {
    match service.get("env_file") {
        Some(Value::String(path)) => vec![path.clone()],
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(path) => Some(path.clone()),
                Value::Mapping(_) => item.get("path").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn port_from_value(entry: &Value, env: &EnvMap) -> Option<PortMapping> {
    match entry {
        Value::String(s) => parse_port_entry(&substitute(s, env)),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .map(PortMapping::unmapped),
        // Long syntax: {target: 80, published: "8080"}
        Value::Mapping(_) => {
            let target = scalar(entry.get("target")?, env)?;
            match entry.get("published").and_then(|v| scalar(v, env)) {
                Some(published) => Some(PortMapping::mapped(published, target)),
                None => Some(PortMapping::unmapped(target)),
            }
        }
        _ => None,
    }
}

fn scalar(value: &Value, env: &EnvMap) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => substitute(s, env).trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn fixture(files: &[(&str, &str)]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            fs::write(dir.path().join(name), body).unwrap();
        }
        let config = dir.path().join("docker-compose.yml");
        (dir, config)
    }

    #[test]
    fn default_env_file_resolves_port() {
        let (_dir, config) = fixture(&[
            ("docker-compose.yml", "services:\n  web:\n    ports: [\"${LAUNCHER_T_PORT}:80\"]\n"),
            (".env", "LAUNCHER_T_PORT=3000\n"),
        ]);
        assert_eq!(parse(&config), vec![PortMapping::mapped(3000, 80)]);
    }

    #[test]
    fn service_env_file_overrides_default_and_process_env() {
        // PATH is set in any process environment; the service file must still win.
        let (_dir, config) = fixture(&[
            (
                "docker-compose.yml",
                "services:\n  web:\n    env_file: [first.env, {path: second.env, required: false}]\n    ports:\n      - \"${PATH}:80\"\n      - \"$LAUNCHER_T_OTHER:81\"\n",
            ),
            (".env", "PATH=1000\nLAUNCHER_T_OTHER=2000\n"),
            ("first.env", "PATH=4000\n"),
            ("second.env", "PATH=5000\n"),
        ]);
        assert_eq!(
            parse(&config),
            vec![PortMapping::mapped(5000, 80), PortMapping::mapped(2000, 81)]
        );
    }

    #[test]
    fn env_files_are_per_service() {
        let (_dir, config) = fixture(&[
            (
                "docker-compose.yml",
                "services:\n  a:\n    env_file: a.env\n    ports: [\"${LAUNCHER_T_P}:80\"]\n  b:\n    ports: [\"${LAUNCHER_T_P}:81\"]\n",
            ),
            ("a.env", "LAUNCHER_T_P=7000\n"),
        ]);
        assert_eq!(
            parse(&config),
            vec![PortMapping::mapped(7000, 80), PortMapping::unmapped(81)]
        );
    }

    #[test]
    fn long_and_numeric_syntax() {
        let (_dir, config) = fixture(&[(
            "docker-compose.yml",
            "services:\n  db:\n    ports:\n      - 5432\n      - target: 6379\n        published: \"16379\"\n      - target: 9000\n",
        )]);
        assert_eq!(
            parse(&config),
            vec![
                PortMapping::unmapped(5432),
                PortMapping::mapped(16379, 6379),
                PortMapping::unmapped(9000),
            ]
        );
    }

    #[test]
    fn parsing_is_idempotent() {
        let (_dir, config) = fixture(&[
            ("docker-compose.yml", "services:\n  web:\n    ports: [\"${LAUNCHER_T_Q:-8080}:80\", \"443\"]\n"),
        ]);
        let first = parse(&config);
        let second = parse(&config);
        assert_eq!(first, second);
        assert_eq!(first, vec![PortMapping::mapped(8080, 80), PortMapping::unmapped(443)]);
    }

    #[test]
    fn invalid_yaml_yields_nothing() {
        let (_dir, config) = fixture(&[("docker-compose.yml", "services: [unclosed\n")]);
        assert!(parse(&config).is_empty());
    }
}
