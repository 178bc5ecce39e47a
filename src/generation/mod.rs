//! Generator trait and call policy
//!
//! The generation backend is an external, fallible, rate-limited dependency.
//! Every call goes through `call_with_policy`: a hard timeout, and a single
//! retry with backoff for transient network failures only.

use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub mod offline;
pub use offline::OfflineGenerator;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPurpose {
    Classification,
    KnowledgeAnswer,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: None,
            max_output_tokens: 1024,
            temperature: 0.3,
        }
    }
}

/// Structured prompt: system instruction + context + query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub purpose: GenerationPurpose,
    pub system_instruction: String,
    pub context: String,
    pub query: String,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(purpose: GenerationPurpose, system_instruction: impl Into<String>) -> Self {
        Self {
            purpose,
            system_instruction: system_instruction.into(),
            context: String::new(),
            query: String::new(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Context and query flattened into the single user turn sent to the model
    pub fn user_prompt(&self) -> String {
        if self.context.trim().is_empty() {
            self.query.clone()
        } else {
            format!("{}\n\n---\n\n{}", self.context, self.query)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub text: String,
    pub confidence: f32,
    pub usage: TokenUsage,
}

/// Language-model backend
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput>;
}

/// Timeout and retry settings shared by every external call
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn new(timeout: Duration, backoff: Duration) -> Self {
        Self { timeout, backoff }
    }
}

/// Run an external call with a timeout, retrying once on a transient failure.
///
/// `on_timeout` builds the error reported when the deadline passes.
pub async fn with_single_retry<T, F, Fut>(
    policy: CallPolicy,
    label: &str,
    on_timeout: fn(u64) -> OrchestrationError,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(policy.timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(value) => {
                debug!(call = label, attempt, "External call succeeded");
                return Ok(value);
            }
            Err(e) if attempt == 1 && e.is_retryable() => {
                warn!(
                    call = label,
                    error = %e,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    "Transient failure, retrying once"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => {
                warn!(call = label, attempt, error = %e, "External call failed");
                return Err(e);
            }
        }
    }
}

/// Generator call under the shared policy; empty output counts as a failure
pub async fn call_with_policy(
    generator: &dyn Generator,
    request: &GenerationRequest,
    policy: CallPolicy,
) -> Result<GenerationOutput> {
    let output = with_single_retry(
        policy,
        generator.name(),
        OrchestrationError::GenerationTimeout,
        || generator.generate(request),
    )
    .await?;

    if output.text.trim().is_empty() {
        return Err(OrchestrationError::generation(format!(
            "{} returned empty content",
            generator.name()
        )));
    }
    Ok(output)
}
