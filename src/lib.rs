//! # deskmate
//!
//! A personal AI assistant agent: multi-provider LLM routing with retry,
//! fallback and cost tracking, driving a guarded local tool loop.
//!
//! ## Modules
//!
//! - [`agent`]: orchestrator, model router, provider adapters, retry, events
//! - [`tools`]: tool registry, guardrails and the built-in tools
//! - [`cli`]: command-line front-end
//! - `server`: HTTP backend for dashboards (feature `server`)
//! - [`error`]: error types
//!
//! ## Example
//!
//! ```no_run
//! use deskmate::agent::{AgentConfig, Orchestrator};
//!
//! # async fn run() -> Result<(), deskmate::Error> {
//! let config = AgentConfig::builder()
//!     .from_env()
//!     .project_dir(".")
//!     .build()?;
//! let agent = Orchestrator::from_config(&config)?;
//! let answer = agent.chat("What does this project do?").await;
//! # let _ = answer;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cli;
pub mod error;
#[cfg(feature = "server")]
pub mod server;
pub mod tools;

pub use agent::{AgentConfig, ModelRouter, Orchestrator};
pub use error::{AgentError, CommandError, Error, Result, ToolError};
pub use tools::{ToolOutput, ToolRegistry};
