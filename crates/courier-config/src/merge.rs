//! Layer-by-layer merge of raw TOML trees.
//!
//! Merging happens before deserialization, so a key a layer leaves out
//! never overrides the layer below it.

use std::collections::HashMap;
use std::fmt;

/// Where a resolved value came from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    /// `defaults.toml` embedded in the binary.
    Defaults,
    /// `/etc/courier/config.toml`.
    System,
    /// `~/.courier/config.toml`.
    User,
    /// `{workspace}/.courier/config.toml`.
    Workspace,
    /// A file passed explicitly with `--config`.
    Explicit,
    /// A `COURIER_*` or `REDIS_URL` fallback.
    Environment,
}

impl ConfigLayer {
    /// Short label used in `config show` annotations.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Defaults => "defaults",
            Self::System => "system",
            Self::User => "user",
            Self::Workspace => "workspace",
            Self::Explicit => "file",
            Self::Environment => "env",
        }
    }
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Dotted field path to the layer that last set it.
pub type FieldSources = HashMap<String, ConfigLayer>;

/// Merge `overlay` into `base` and attribute every leaf it sets to `layer`.
///
/// Tables merge key by key. Scalars and arrays replace what was there.
pub fn merge_layer(
    base: &mut toml::Value,
    overlay: &toml::Value,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    merge_at(base, overlay, "", layer, sources);
}

fn merge_at(
    base: &mut toml::Value,
    overlay: &toml::Value,
    path: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    match (base, overlay) {
        (toml::Value::Table(into), toml::Value::Table(from)) => {
            for (key, value) in from {
                let child_path = join_path(path, key);
                match into.get_mut(key) {
                    Some(existing) if value.is_table() => {
                        merge_at(existing, value, &child_path, layer, sources);
                    },
                    Some(existing) => {
                        *existing = value.clone();
                        sources.insert(child_path, layer);
                    },
                    None => {
                        record_leaves(value, &child_path, layer, sources);
                        into.insert(key.clone(), value.clone());
                    },
                }
            }
        },
        (slot, value) => {
            *slot = value.clone();
            sources.insert(path.to_owned(), layer);
        },
    }
}

/// Attribute every leaf under `path` to `layer`.
pub fn record_leaves(
    value: &toml::Value,
    path: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                record_leaves(child, &join_path(path, key), layer, sources);
            }
        },
        _ => {
            sources.insert(path.to_owned(), layer);
        },
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    fn merged(base: &str, overlay: &str) -> (toml::Value, FieldSources) {
        let mut value = parse(base);
        let mut sources = FieldSources::new();
        record_leaves(&value, "", ConfigLayer::Defaults, &mut sources);
        merge_layer(&mut value, &parse(overlay), ConfigLayer::User, &mut sources);
        (value, sources)
    }

    #[test]
    fn test_unset_keys_survive() {
        let (value, sources) = merged(
            "[bus]\nstrategy = \"local\"\nconsumer = \"default\"",
            "[bus]\nstrategy = \"remote\"",
        );
        assert_eq!(value["bus"]["strategy"].as_str(), Some("remote"));
        assert_eq!(value["bus"]["consumer"].as_str(), Some("default"));
        assert_eq!(sources.get("bus.consumer"), Some(&ConfigLayer::Defaults));
        assert_eq!(sources.get("bus.strategy"), Some(&ConfigLayer::User));
    }

    #[test]
    fn test_arrays_replace() {
        let (value, _) = merged(
            "[logging]\ndirectives = [\"a=debug\", \"b=warn\"]",
            "[logging]\ndirectives = [\"c=info\"]",
        );
        assert_eq!(value["logging"]["directives"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_new_keys_are_attributed() {
        let (value, sources) = merged(
            "[store]\nurl = \"memory://\"",
            "[store]\nurl = \"redis://cache\"\nkey_prefix = \"app\"",
        );
        assert_eq!(sources.get("store.url"), Some(&ConfigLayer::User));
        assert_eq!(sources.get("store.key_prefix"), Some(&ConfigLayer::User));
        assert_eq!(value["store"]["url"].as_str(), Some("redis://cache"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(ConfigLayer::Explicit.to_string(), "file");
        assert_eq!(ConfigLayer::Environment.label(), "env");
    }
}
