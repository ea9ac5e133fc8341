//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// deskmate: a personal AI assistant for your project directory.
///
/// Routes each request across the configured LLM providers and lets the
/// model read files, run allow-listed commands, work with git and reach
/// the web through guarded tools.
#[derive(Parser, Debug)]
#[command(name = "deskmate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory the tools operate in.
    ///
    /// Defaults to `PROJECT_DIR` or the current directory.
    #[arg(short, long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Enable verbose logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message and print the answer.
    #[command(after_help = r#"Examples:
  deskmate chat "What changed since the last commit?"
  deskmate chat "Summarize README.md" --provider anthropic
  deskmate --format json chat "hello" | jq .response
"#)]
    Chat {
        /// Message to send.
        message: String,

        /// Send every round-trip to this provider instead of routing.
        #[arg(long)]
        provider: Option<String>,
    },

    /// Interactive session (/clear, /history, /costs, /exit).
    Repl {
        /// Send every round-trip to this provider instead of routing.
        #[arg(long)]
        provider: Option<String>,
    },

    /// Ask several providers the same question side by side.
    #[command(after_help = r#"Examples:
  deskmate compare "Explain Rust lifetimes in one paragraph"
  deskmate compare "hello" --providers anthropic,openai
"#)]
    Compare {
        /// Question to send.
        message: String,

        /// Providers to ask (comma-separated). Defaults to all of them.
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
    },

    /// List the tools advertised to the model.
    Tools,

    /// Show configured providers and the fallback chain.
    Providers,

    /// Run the dashboard HTTP backend.
    #[command(after_help = r#"Examples:
  deskmate serve                          # 127.0.0.1:3717
  deskmate serve --host 0.0.0.0 --port 8080
"#)]
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind.
        #[arg(long, default_value = "3717")]
        port: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chat_with_provider() {
        let cli = Cli::try_parse_from([
            "deskmate",
            "--format",
            "json",
            "chat",
            "hello",
            "--provider",
            "openai",
        ])
        .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(cli.format, "json");
        assert!(matches!(
            cli.command,
            Commands::Chat { ref message, provider: Some(ref p) } if message == "hello" && p == "openai"
        ));
    }

    #[test]
    fn test_parse_compare_provider_list() {
        let cli = Cli::try_parse_from([
            "deskmate",
            "compare",
            "hello",
            "--providers",
            "anthropic,openai",
        ])
        .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(matches!(
            cli.command,
            Commands::Compare { ref providers, .. } if providers == &["anthropic", "openai"]
        ));
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["deskmate", "serve"]).unwrap_or_else(|e| unreachable!("{e}"));
        assert!(matches!(
            cli.command,
            Commands::Serve { ref host, port: 3717 } if host == "127.0.0.1"
        ));
    }
}
