//! Dotenv loading and `$VAR` substitution for compose files.

use std::{collections::HashMap, fs, path::Path};

pub(crate) type EnvMap = HashMap<String, String>;

/// Parse a dotenv file. Missing or unreadable files yield `None`.
pub(crate) fn read_env_file(path: &Path) -> Option<EnvMap> {
    let raw = fs::read_to_string(path).ok()?;
    Some(parse_env(&raw))
}

pub(crate) fn parse_env(raw: &str) -> EnvMap {
    let mut env = EnvMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        env.insert(key.to_string(), unquote(value.trim()));
    }
    env
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    // Unquoted values may carry a trailing comment.
    match value.find(" #") {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Replace `${VAR}`, `${VAR:-default}`, `${VAR-default}` and `$VAR` tokens.
///
/// Lookup order: `env`, then the process environment. Undefined variables
/// without a default become the empty string. `$$` is a literal `$`.
pub(crate) fn substitute(input: &str, env: &EnvMap) -> String {
    let lookup = |name: &str| -> Option<String> {
        env.get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    };

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut body = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed {
                    out.push_str("${");
                    out.push_str(&body);
                    continue;
                }
                out.push_str(&expand_braced(&body, &lookup));
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&lookup(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}

fn expand_braced(body: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    if let Some((name, default)) = body.split_once(":-") {
        return match lookup(name) {
            Some(v) if !v.is_empty() => v,
            _ => default.to_string(),
        };
    }
    if let Some((name, default)) = body.split_once('-') {
        return lookup(name).unwrap_or_else(|| default.to_string());
    }
    lookup(body).unwrap_or_default()
}
