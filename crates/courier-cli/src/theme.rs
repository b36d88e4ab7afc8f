//! Terminal styling for command output.

use std::fmt::Display;

use colored::{ColoredString, Colorize};

/// Width of separators and of the key column in `kv` rows.
const RULE_WIDTH: usize = 40;
const KEY_WIDTH: usize = 12;

/// Styling helpers shared by every command.
pub(crate) struct Theme;

impl Theme {
    /// Bold section title.
    pub(crate) fn header(text: &str) -> String {
        text.bold().cyan().to_string()
    }

    /// Operation completed.
    pub(crate) fn success(text: &str) -> String {
        Self::marked("✓".green(), text.normal())
    }

    /// Operation failed or was refused.
    pub(crate) fn error(text: &str) -> String {
        Self::marked("✗".red(), text.red())
    }

    /// Something the operator should look at.
    pub(crate) fn warning(text: &str) -> String {
        Self::marked("!".yellow(), text.yellow())
    }

    /// Neutral note.
    pub(crate) fn info(text: &str) -> String {
        Self::marked("i".blue(), text.normal())
    }

    pub(crate) fn separator() -> String {
        "━".repeat(RULE_WIDTH).dimmed().to_string()
    }

    /// One `key: value` row of a stats table.
    pub(crate) fn kv(key: &str, value: impl Display) -> String {
        let label = format!("{:<KEY_WIDTH$}", format!("{key}:"));
        format!("  {} {value}", label.dimmed())
    }

    fn marked(mark: ColoredString, text: ColoredString) -> String {
        format!("{mark} {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_pads_key_column() {
        colored::control::set_override(false);
        assert_eq!(Theme::kv("pending", 3), "  pending:     3");
        assert_eq!(Theme::success("done"), "✓ done");
    }
}
