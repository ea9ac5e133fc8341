//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into vendor wire formats. This keeps all agent logic decoupled
//! from any particular LLM vendor.

use async_trait::async_trait;
use serde::Serialize;

use super::message::{ChatRequest, ChatResponse};
use crate::error::AgentError;

/// Per-token prices in US dollars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostRates {
    /// Price of one prompt token.
    pub input_per_token: f64,
    /// Price of one completion token.
    pub output_per_token: f64,
}

impl CostRates {
    /// Rates expressed in dollars per million tokens.
    #[must_use]
    pub const fn per_million(input: f64, output: f64) -> Self {
        Self {
            input_per_token: input / 1_000_000.0,
            output_per_token: output / 1_000_000.0,
        }
    }

    /// A free (local) provider.
    #[must_use]
    pub const fn free() -> Self {
        Self {
            input_per_token: 0.0,
            output_per_token: 0.0,
        }
    }
}

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls)
/// for a specific provider while presenting a uniform interface to the router.
/// Retries are applied by the caller.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`, `"anthropic"`).
    fn name(&self) -> &str;

    /// Model identifier sent with each request.
    fn model(&self) -> &str;

    /// Whether the provider can currently be called.
    ///
    /// Evaluated on every call so credentials supplied after startup take
    /// effect immediately.
    fn is_enabled(&self) -> bool;

    /// Whether the provider accepts tool definitions.
    fn supports_tools(&self) -> bool {
        true
    }

    /// Token prices used for cost estimates.
    fn cost_rates(&self) -> CostRates;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] when disabled, and
    /// [`AgentError`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError>;

    /// Estimated cost of a call in US dollars.
    #[allow(clippy::cast_precision_loss)]
    fn estimate_cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        let rates = self.cost_rates();
        (input_tokens as f64).mul_add(
            rates.input_per_token,
            output_tokens as f64 * rates.output_per_token,
        )
    }
}
