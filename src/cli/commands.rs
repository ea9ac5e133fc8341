//! CLI command implementations.
//!
//! Each command builds what it needs from [`AgentConfig`] and returns its
//! output as a string; `main` does the printing.

use std::fmt::Write as FmtWrite;
use std::io::{self, BufRead, Write as IoWrite};

use serde_json::json;

use crate::agent::{AgentConfig, Comparison, ModelRouter, Orchestrator, Role};
use crate::cli::output::OutputFormat;
use crate::cli::parser::{Cli, Commands};
use crate::error::{CommandError, Result};
use crate::tools::ToolRegistry;

/// Executes the CLI command.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the command fails.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let config = load_config(cli)?;

    match &cli.command {
        Commands::Chat { message, provider } => cmd_chat(&config, message, provider.clone(), format),
        Commands::Repl { provider } => cmd_repl(&config, provider.clone()),
        Commands::Compare { message, providers } => {
            cmd_compare(&config, message, providers, format)
        }
        Commands::Tools => cmd_tools(&config, format),
        Commands::Providers => cmd_providers(&config, format),
        Commands::Serve { host, port } => cmd_serve(&config, host, *port),
    }
}

fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let mut builder = AgentConfig::builder().from_env();
    if let Some(dir) = &cli.project_dir {
        builder = builder.project_dir(dir);
    }
    Ok(builder.build()?)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to create async runtime: {e}")).into()
    })
}

fn cmd_chat(
    config: &AgentConfig,
    message: &str,
    provider: Option<String>,
    format: OutputFormat,
) -> Result<String> {
    let agent = Orchestrator::from_config(config)?.with_provider(provider);
    let rt = runtime()?;
    let response = rt.block_on(agent.chat(message));

    match format {
        OutputFormat::Text => Ok(response),
        OutputFormat::Json => {
            let ledger = agent.router().ledger();
            Ok(format.to_json(&json!({
                "response": response,
                "costs": ledger.summary(),
                "calls": ledger.records(),
            })))
        }
    }
}

fn cmd_compare(
    config: &AgentConfig,
    message: &str,
    providers: &[String],
    format: OutputFormat,
) -> Result<String> {
    let agent = Orchestrator::from_config(config)?;
    let rt = runtime()?;
    let answers = rt.block_on(agent.compare(message, providers));

    match format {
        OutputFormat::Text => Ok(render_comparisons(&answers)),
        OutputFormat::Json => Ok(format.to_json(&answers)),
    }
}

fn render_comparisons(answers: &[Comparison]) -> String {
    if answers.is_empty() {
        return "No provider answered.".to_string();
    }
    let mut out = String::new();
    for answer in answers {
        let _ = writeln!(
            out,
            "== {} ({}) {}ms ${:.6}\n{}\n",
            answer.provider, answer.model, answer.latency_ms, answer.estimated_cost, answer.content
        );
    }
    out
}

fn cmd_repl(config: &AgentConfig, provider: Option<String>) -> Result<String> {
    let agent = Orchestrator::from_config(config)?.with_provider(provider);
    let rt = runtime()?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    writeln!(
        stdout,
        "deskmate {} in {} (/clear, /history, /costs, /exit)",
        env!("CARGO_PKG_VERSION"),
        config.project_dir.display()
    )?;

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "" => {}
            "/exit" | "/quit" => break,
            "/clear" => {
                agent.clear_history();
                writeln!(stdout, "History cleared.")?;
            }
            "/history" => {
                for turn in agent.history() {
                    let who = if turn.role == Role::User { "you" } else { "deskmate" };
                    writeln!(stdout, "{who}: {}", turn.content)?;
                }
            }
            "/costs" => writeln!(stdout, "{}", render_costs(&agent))?,
            _ => {
                let answer = rt.block_on(agent.chat(input));
                writeln!(stdout, "{answer}\n")?;
            }
        }
    }

    Ok(String::new())
}

fn render_costs(agent: &Orchestrator) -> String {
    let summary = agent.router().ledger().summary();
    let mut out = format!("Calls: {} | Total: ${:.6}", summary.calls, summary.total);
    for (provider, cost) in &summary.by_provider {
        let _ = write!(out, "\n  {provider}: ${cost:.6}");
    }
    out
}

fn cmd_tools(config: &AgentConfig, format: OutputFormat) -> Result<String> {
    let registry = ToolRegistry::from_config(config)?;
    let definitions = registry.definitions();

    match format {
        OutputFormat::Text => {
            let width = definitions.iter().map(|d| d.name.len()).max().unwrap_or(0);
            let mut out = String::new();
            for def in &definitions {
                let _ = writeln!(out, "{:width$}  {}", def.name, def.description);
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(format.to_json(&definitions)),
    }
}

fn cmd_providers(config: &AgentConfig, format: OutputFormat) -> Result<String> {
    let router = ModelRouter::from_config(config)?;
    let statuses = router.provider_statuses();

    match format {
        OutputFormat::Text => {
            let mut out = String::new();
            for status in &statuses {
                let state = if status.enabled { "enabled" } else { "disabled" };
                let tools = if status.supports_tools { "tools" } else { "no tools" };
                let _ = writeln!(
                    out,
                    "{:<11} {:<8} {:<9} {}",
                    status.name, state, tools, status.model
                );
            }
            let _ = writeln!(out, "\nFallback chain: {}", router.fallback_chain().join(" -> "));
            if !router.has_enabled_provider() {
                let _ = writeln!(
                    out,
                    "No provider is enabled. Set ANTHROPIC_API_KEY, OPENAI_API_KEY, \
                     PERPLEXITY_API_KEY, GEMINI_API_KEY or OLLAMA_BASE_URL."
                );
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(format.to_json(&json!({
            "providers": statuses,
            "fallback_chain": router.fallback_chain(),
        }))),
    }
}

#[cfg(feature = "server")]
fn cmd_serve(config: &AgentConfig, host: &str, port: u16) -> Result<String> {
    let agent = std::sync::Arc::new(Orchestrator::from_config(config)?);
    let rt = runtime()?;
    rt.block_on(async {
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                CommandError::ExecutionFailed(format!("cannot resolve {host}:{port}"))
            })?;
        crate::server::serve(agent, addr).await?;
        Ok::<_, crate::error::Error>(())
    })?;
    Ok(String::new())
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_config: &AgentConfig, _host: &str, _port: u16) -> Result<String> {
    Err(CommandError::FeatureDisabled("server".to_string()).into())
}
