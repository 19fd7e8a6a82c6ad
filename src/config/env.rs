//! Environment substitution for configuration files.
//!
//! The same placeholder syntax the compose file uses is accepted in
//! `config.toml`, so a single environment drives the containers and the API:
//!
//! - `${NAME}` is replaced by the value of `NAME` (error if unset)
//! - `${NAME:-default}` falls back to `default` when `NAME` is unset or empty
//! - `$$` is a literal `$`
//!
//! Environment values are escaped for TOML basic strings, so placeholders
//! belong inside double quotes or stand alone as bare numbers. Defaults are
//! written in the file and inserted as-is.

use super::ConfigError;
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("placeholder regex is valid")
    })
}

/// Substitute placeholders using the process environment.
pub fn substitute(input: &str) -> Result<String, ConfigError> {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Substitute placeholders using an arbitrary lookup.
pub(crate) fn substitute_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = None;

    let output = placeholder().replace_all(input, |caps: &Captures<'_>| {
        let Some(name) = caps.get(1) else {
            return "$".to_string();
        };
        let value = lookup(name.as_str());
        match (value, caps.get(2)) {
            (Some(v), Some(default)) if v.is_empty() => default.as_str().to_string(),
            (Some(v), _) => escape(&v),
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.get_or_insert_with(|| name.as_str().to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::MissingVar(name)),
        None => Ok(output.into_owned()),
    }
}

/// Escape a value for use inside a TOML basic string.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}
