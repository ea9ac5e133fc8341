//! CLI layer for deskmate.
//!
//! Provides the command-line interface using clap: one-shot chat, an
//! interactive session, catalogue listings and the dashboard backend.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands};
