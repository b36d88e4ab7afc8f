//! Source-annotated display for `config show`.

use std::fmt::{self, Write as _};

use crate::merge::{ConfigLayer, FieldSources};
use crate::types::Config;

/// Merged configuration plus where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final merged configuration.
    pub config: Config,
    /// Layer behind each dotted field path.
    pub field_sources: FieldSources,
    /// Files that contributed, lowest precedence first.
    pub loaded_files: Vec<String>,
}

/// `config show` rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowFormat {
    /// TOML, each value tagged with its layer.
    Toml,
    /// Plain JSON of the merged values.
    Json,
}

impl ResolvedConfig {
    /// Render the configuration.
    ///
    /// # Errors
    ///
    /// Fails only if the config cannot be serialized.
    pub fn show(&self, format: ShowFormat) -> Result<String, fmt::Error> {
        match format {
            ShowFormat::Toml => self.show_toml(),
            ShowFormat::Json => serde_json::to_string_pretty(&self.config).map_err(|_| fmt::Error),
        }
    }

    fn show_toml(&self) -> Result<String, fmt::Error> {
        let body = toml::to_string_pretty(&self.config).map_err(|_| fmt::Error)?;
        let mut out = String::from("# Resolved courier configuration\n");

        writeln!(out, "# Each value is tagged with the layer that set it.")?;
        for (rank, path) in (1_usize..).zip(&self.loaded_files) {
            writeln!(out, "#   {rank}. {path}")?;
        }
        out.push('\n');

        let mut section = "";
        for line in body.lines() {
            let trimmed = line.trim();
            if let Some(header) = trimmed.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                section = header;
                writeln!(out, "{line}")?;
                continue;
            }
            match self.source_of(section, trimmed) {
                Some(layer) => writeln!(out, "{line}  # [{layer}]")?,
                None => writeln!(out, "{line}")?,
            }
        }

        Ok(out)
    }

    /// Layer behind a `key = value` line of `section`.
    fn source_of(&self, section: &str, line: &str) -> Option<ConfigLayer> {
        let (key, _) = line.split_once('=')?;
        let key = key.trim();
        let path = if section.is_empty() {
            key.to_owned()
        } else {
            format!("{section}.{key}")
        };
        self.field_sources.get(&path).copied()
    }
}
