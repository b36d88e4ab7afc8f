//! Config command - show the resolved configuration.

use anyhow::Result;
use courier_config::{ResolvedConfig, ShowFormat};

/// Print the resolved configuration with source annotations.
pub(crate) fn show_config(resolved: &ResolvedConfig, json: bool) -> Result<()> {
    let format = if json {
        ShowFormat::Json
    } else {
        ShowFormat::Toml
    };

    let output = resolved
        .show(format)
        .map_err(|e| anyhow::anyhow!("failed to format config: {e}"))?;

    println!("{output}");
    Ok(())
}
