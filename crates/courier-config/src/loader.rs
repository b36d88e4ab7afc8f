//! Config file discovery and layered loading.
//!
//! 1. Parse `defaults.toml` → base
//! 2. Merge `/etc/courier/config.toml` (system)
//! 3. Merge `~/.courier/config.toml` (user)
//! 4. Merge `{workspace}/.courier/config.toml` (workspace)
//! 5. Apply env var fallbacks for fields no file set
//! 6. Resolve `${VAR}` references
//! 7. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars, resolve_env_references};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, merge_layer, record_leaves};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// System-wide config path.
const SYSTEM_CONFIG: &str = "/etc/courier/config.toml";

/// Directory name for user and workspace config.
const CONFIG_DIR: &str = ".courier";

/// Files to merge, in precedence order (lowest first).
#[derive(Debug, Default)]
struct Layers {
    files: Vec<(PathBuf, ConfigLayer)>,
}

impl Layers {
    fn push(&mut self, path: PathBuf, layer: ConfigLayer) {
        self.files.push((path, layer));
    }
}

/// Load configuration with layered file precedence.
///
/// `workspace_root` is the project root; `None` skips the workspace layer.
/// `home_override` replaces the home directory used to find the user layer.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, or if the
/// merged configuration fails validation.
pub fn load(
    workspace_root: Option<&Path>,
    home_override: Option<&Path>,
) -> ConfigResult<ResolvedConfig> {
    let home_dir = match home_override {
        Some(h) => h.to_path_buf(),
        None => home_directory()?,
    };

    let mut layers = Layers::default();
    layers.push(PathBuf::from(SYSTEM_CONFIG), ConfigLayer::System);
    layers.push(
        home_dir.join(CONFIG_DIR).join("config.toml"),
        ConfigLayer::User,
    );
    if let Some(root) = workspace_root {
        layers.push(
            root.join(CONFIG_DIR).join("config.toml"),
            ConfigLayer::Workspace,
        );
    }

    load_layers(&layers, &collect_env_vars(), false)
}

/// Load defaults plus one explicit file, then environment fallbacks.
///
/// Used for `--config <path>`. Unlike the layered files, the explicit file
/// must exist.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed, or the
/// result fails validation.
pub fn load_file(path: &Path) -> ConfigResult<ResolvedConfig> {
    let mut layers = Layers::default();
    layers.push(path.to_path_buf(), ConfigLayer::Explicit);
    load_layers(&layers, &collect_env_vars(), true)
}

fn load_layers<S: ::std::hash::BuildHasher>(
    layers: &Layers,
    env_vars: &HashMap<String, String, S>,
    required: bool,
) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", ConfigLayer::Defaults, &mut field_sources);

    for (path, layer) in &layers.files {
        let overlay = if required {
            Some(read_file(path)?)
        } else {
            try_load_file(path)?
        };
        if let Some(overlay) = overlay {
            merge_layer(&mut merged, &overlay, *layer, &mut field_sources);
            loaded_files.push(path.display().to_string());
            info!(path = %path.display(), layer = %layer, "loaded config");
        }
    }

    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    resolve_env_references(&mut merged, env_vars);
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Try to load a file, returning `None` if it doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    match read_file(path) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::ReadError { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            debug!(path = %path.display(), "config file not found, skipping");
            Ok(None)
        },
        Err(e) => Err(e),
    }
}

/// Read and parse one file in a single read, bounded in size.
fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

/// Determine the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AsyncPolicyChoice, StrategyChoice};

    fn write(dir: &Path, rel: &str, body: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults_deserialize_to_default_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_defaults_only() {
        let resolved = load_layers(&Layers::default(), &env(&[]), false).unwrap();
        assert_eq!(resolved.config, Config::default());
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(
            resolved.field_sources.get("bus.strategy"),
            Some(&ConfigLayer::Defaults)
        );
    }

    #[test]
    fn test_layer_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let user = write(
            dir.path(),
            "home/.courier/config.toml",
            concat!(
                "[bus]\nstrategy = \"remote\"\nconsumer = \"user\"\n",
                "[store]\nurl = \"redis://cache:6379\"",
            ),
        );
        let workspace = write(
            dir.path(),
            "ws/.courier/config.toml",
            "[bus]\nconsumer = \"workspace\"",
        );

        let mut layers = Layers::default();
        layers.push(dir.path().join("missing/system.toml"), ConfigLayer::System);
        layers.push(user.clone(), ConfigLayer::User);
        layers.push(workspace, ConfigLayer::Workspace);

        let resolved = load_layers(&layers, &env(&[]), false).unwrap();
        let config = &resolved.config;
        assert_eq!(config.bus.strategy, StrategyChoice::Remote);
        assert_eq!(config.bus.consumer, "workspace");
        assert_eq!(config.store.url, "redis://cache:6379");
        assert_eq!(resolved.loaded_files.len(), 2);
        assert_eq!(
            resolved.field_sources.get("bus.consumer"),
            Some(&ConfigLayer::Workspace)
        );
    }

    #[test]
    fn test_env_is_fallback_only() {
        let dir = tempfile::tempdir().unwrap();
        let user = write(
            dir.path(),
            "config.toml",
            "[bus]\nasync_policy = \"await\"",
        );
        let mut layers = Layers::default();
        layers.push(user, ConfigLayer::User);

        let resolved = load_layers(
            &layers,
            &env(&[
                ("COURIER_ASYNC_POLICY", "detach"),
                ("COURIER_BUS_STRATEGY", "remote"),
                ("REDIS_URL", "redis://from-env"),
            ]),
            false,
        )
        .unwrap();
        assert_eq!(resolved.config.bus.async_policy, AsyncPolicyChoice::Await);
        assert_eq!(resolved.config.bus.strategy, StrategyChoice::Remote);
        assert_eq!(resolved.config.store.url, "redis://from-env");
    }

    #[test]
    fn test_env_references_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            dir.path(),
            "config.toml",
            "[store]\nurl = \"redis://:${CACHE_PW}@cache\"",
        );
        let mut layers = Layers::default();
        layers.push(file, ConfigLayer::Explicit);

        let resolved = load_layers(&layers, &env(&[("CACHE_PW", "pw")]), true).unwrap();
        assert_eq!(resolved.config.store.url, "redis://:pw@cache");
    }

    #[test]
    fn test_invalid_value_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(dir.path(), "config.toml", "[bus]\noffline_batch_limit = 0");
        let mut layers = Layers::default();
        layers.push(file, ConfigLayer::Explicit);

        let err = load_layers(&layers, &env(&[]), true).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_unknown_strategy_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(dir.path(), "config.toml", "[bus]\nstrategy = \"carrier-pigeon\"");
        let mut layers = Layers::default();
        layers.push(file, ConfigLayer::Explicit);

        let err = load_layers(&layers, &env(&[]), true).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_load_file_missing() {
        let err = load_file(Path::new("/nonexistent/courier.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(dir.path(), "config.toml", "[bus\nstrategy = ");
        assert!(matches!(
            try_load_file(&file),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_try_load_file_missing() {
        assert!(
            try_load_file(Path::new("/nonexistent/config.toml"))
                .unwrap()
                .is_none()
        );
    }
}
