//! CLI commands.

pub(crate) mod config;
pub(crate) mod emit;
pub(crate) mod queue;
