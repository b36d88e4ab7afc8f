//! Environment variable fallback and `${VAR}` reference resolution.
//!
//! Environment variables are a **fallback**, not an override: they only fill
//! fields that no config file set.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::merge::{ConfigLayer, FieldSources};

/// One `COURIER_*` variable and the field it backs.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

/// Supported variables. Earlier entries win when two map to the same field.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "COURIER_BUS_STRATEGY",
        field_path: "bus.strategy",
    },
    EnvMapping {
        var_name: "COURIER_ASYNC_POLICY",
        field_path: "bus.async_policy",
    },
    EnvMapping {
        var_name: "COURIER_HANDLER_TIMEOUT_SECS",
        field_path: "bus.handler_timeout_secs",
    },
    EnvMapping {
        var_name: "COURIER_CONSUMER",
        field_path: "bus.consumer",
    },
    EnvMapping {
        var_name: "COURIER_STORE_URL",
        field_path: "store.url",
    },
    // Conventional variable set by most Redis hosting.
    EnvMapping {
        var_name: "REDIS_URL",
        field_path: "store.url",
    },
    EnvMapping {
        var_name: "COURIER_STORE_PREFIX",
        field_path: "store.key_prefix",
    },
    EnvMapping {
        var_name: "COURIER_LOG_LEVEL",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "COURIER_LOG_FORMAT",
        field_path: "logging.format",
    },
    EnvMapping {
        var_name: "COURIER_LOG_DIR",
        field_path: "logging.directory",
    },
];

/// Apply environment variable fallbacks to fields not set by any file.
///
/// Returns the number of variables applied.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if is_file_set(sources, mapping.field_path) {
            continue;
        }

        if let Some(val) = env_vars.get(mapping.var_name) {
            debug!(
                var = mapping.var_name,
                field = mapping.field_path,
                "applying env var fallback"
            );

            set_field_from_string(merged, mapping.field_path, val);
            sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
            count = count.saturating_add(1);
        }
    }

    count
}

/// Whether a file layer (anything but the defaults) set `path`.
fn is_file_set(sources: &FieldSources, path: &str) -> bool {
    sources
        .get(path)
        .is_some_and(|layer| *layer != ConfigLayer::Defaults)
}

/// Expand `${VAR}` inside every string of the tree, e.g. a Redis password
/// kept out of the file.
pub fn resolve_env_references<S: ::std::hash::BuildHasher>(
    val: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) {
    match val {
        toml::Value::String(s) => {
            *s = resolve_string_refs(s, env_vars);
        },
        toml::Value::Table(table) => {
            for (_, child) in table.iter_mut() {
                resolve_env_references(child, env_vars);
            }
        },
        toml::Value::Array(arr) => {
            for child in arr.iter_mut() {
                resolve_env_references(child, env_vars);
            }
        },
        _ => {},
    }
}

/// Substitute every closed, non-empty `${NAME}` in `input`. Unknown names
/// and unterminated references are copied through unchanged.
fn resolve_string_refs<S: ::std::hash::BuildHasher>(
    input: &str,
    env_vars: &HashMap<String, String, S>,
) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some((head, after)) = rest.split_once("${") {
        out.push_str(head);
        match after.split_once('}') {
            Some((name, tail)) if !name.is_empty() => {
                match env_vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        debug!(var = name, "config references an unset variable");
                        let _ = write!(out, "${{{name}}}");
                    },
                }
                rest = tail;
            },
            _ => {
                out.push_str("${");
                rest = after;
            },
        }
    }

    out.push_str(rest);
    out
}

/// Write `val` at dotted `path`, creating intermediate tables.
fn set_field_from_string(root: &mut toml::Value, path: &str, val: &str) {
    let value = coerce_to_toml_value(path, val);
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut node = root;
    for segment in segments {
        let Some(table) = node.as_table_mut() else {
            return;
        };
        node = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    if let Some(table) = node.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}

/// Coerce an environment value to the TOML type the field expects.
fn coerce_to_toml_value(path: &str, val: &str) -> toml::Value {
    if matches!(
        path,
        "bus.handler_timeout_secs" | "bus.offline_batch_limit" | "store.lock_ttl_secs"
    ) && let Ok(i) = val.parse::<i64>()
    {
        return toml::Value::Integer(i);
    }

    toml::Value::String(val.to_owned())
}

/// Snapshot of the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}
