//! Text generation over an OpenAI-compatible chat completions endpoint.
//!
//! The single operation, `process_text`, sends the step's prompt (and
//! optional content) to `{base}/chat/completions` and stores the generated
//! text in the run's variables under `ai_content`, so later steps can use
//! either `{{ai_content}}` or `{{steps.N.output}}`.
//!
//! This is the only adapter that retries: transient failures (rate limits,
//! 5xx, transport errors, empty completions) are attempted again up to
//! [`RetryPolicy::max_attempts`] times.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::credentials::{CredentialProvider, bearer_token};
use crate::error::{AdapterError, Result};
use crate::fields::{check_required, optional_f64, optional_text, optional_u64, required_text};
use crate::http;
use crate::operation::{Integration, Operation};
use crate::traits::ServiceAdapter;

/// Gemini's OpenAI-compatible surface.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
/// Per-attempt request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Variable the generated text is written to.
pub const AI_CONTENT_VARIABLE: &str = "ai_content";

const SERVICE: &str = "text_generation";
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: u64 = 1000;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after the `failed_attempt`-th failure: `base * 2^(n-1)`.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Wait before retrying `error`. Rate limits never wait less than the
    /// full backoff, and longer if the service asked for it.
    pub fn delay_for(&self, failed_attempt: u32, error: &AdapterError) -> Duration {
        let backoff = self.backoff(failed_attempt);
        match error {
            AdapterError::RateLimited {
                retry_after: Some(asked),
                ..
            } => backoff.max(*asked),
            _ => backoff,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct TextGenerationAdapter {
    id: String,
    base_url: String,
    default_model: String,
    retry: RetryPolicy,
    credentials: Arc<dyn CredentialProvider>,
    http: reqwest::Client,
}

/// One successful completion.
struct Completion {
    content: String,
    model: String,
    tokens_used: Option<u64>,
}

impl TextGenerationAdapter {
    pub fn new(id: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            id: id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            retry: RetryPolicy::default(),
            credentials,
            http: http::client(DEFAULT_TIMEOUT),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = http::client(timeout);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn process_text(&self, config: &Value, ctx: &mut ExecutionContext) -> Result<Value> {
        let prompt = required_text(config, Operation::ProcessText, &["prompt"])?;
        let model = optional_text(config, &["model"]).unwrap_or_else(|| self.default_model.clone());
        let body = json!({
            "model": model,
            "messages": build_messages(
                &prompt,
                optional_text(config, &["content"]).as_deref(),
                optional_text(config, &["system_prompt"]).as_deref(),
            ),
            "temperature": optional_f64(config, "temperature").unwrap_or(DEFAULT_TEMPERATURE),
            "max_tokens": optional_u64(config, "max_tokens").unwrap_or(DEFAULT_MAX_TOKENS),
        });

        let token = bearer_token(
            self.credentials.as_ref(),
            &ctx.user_id,
            Integration::TextGeneration,
            SERVICE,
        )
        .await?;

        let (completion, attempts) = self.complete_with_retry(&token, &body).await?;

        ctx.set_variable(AI_CONTENT_VARIABLE, completion.content.clone());
        let output_variable = optional_text(config, &["output_variable"]);
        if let Some(name) = &output_variable {
            ctx.set_variable(name.trim(), completion.content.clone());
        }

        info!(
            model = %completion.model,
            attempts,
            chars = completion.content.chars().count(),
            "text generated"
        );

        Ok(json!({
            "content": completion.content,
            "model": completion.model,
            "tokens_used": completion.tokens_used,
            "attempts": attempts,
            "output_variable": output_variable,
        }))
    }

    async fn complete_with_retry(&self, token: &str, body: &Value) -> Result<(Completion, u32)> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.complete_once(token, body).await {
                Ok(completion) => return Ok((completion, attempt)),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt, &e);
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "text generation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "text generation failed");
                    return Err(e);
                }
            }
        }
    }

    async fn complete_once(&self, token: &str, body: &Value) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %body["model"], "sending completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let json_resp = http::json_body(SERVICE, response).await?;

        let content = json_resp
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(AdapterError::EmptyContent { service: SERVICE })?;

        Ok(Completion {
            content: content.to_string(),
            model: json_resp
                .get("model")
                .and_then(|v| v.as_str())
                .or_else(|| body["model"].as_str())
                .unwrap_or_default()
                .to_string(),
            tokens_used: json_resp.pointer("/usage/total_tokens").and_then(|v| v.as_u64()),
        })
    }
}

/// System messages for `system_prompt` and `content`, then the prompt.
fn build_messages(prompt: &str, content: Option<&str>, system_prompt: Option<&str>) -> Vec<Value> {
    let mut messages = Vec::with_capacity(3);
    if let Some(system) = system_prompt {
        messages.push(json!({ "role": "system", "content": system }));
    }
    if let Some(content) = content {
        messages.push(json!({
            "role": "system",
            "content": format!("Process the following content: {content}"),
        }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));
    messages
}

#[async_trait]
impl ServiceAdapter for TextGenerationAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn integration(&self) -> Integration {
        Integration::TextGeneration
    }

    async fn execute(
        &self,
        operation: Operation,
        config: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        self.ensure_supported(operation)?;
        check_required(config, operation)?;
        match operation {
            Operation::ProcessText => self.process_text(config, ctx).await,
            other => Err(AdapterError::UnsupportedOperation {
                integration: Integration::TextGeneration.as_str(),
                operation: other.to_string(),
            }),
        }
    }
}
