//! Model client: one rendered prompt in, one normalized response out.
//!
//! Policy, in order:
//! 1. Each attempt is bounded by `timeout`. A timed-out attempt is final.
//! 2. Transient failures (transport, rate limit, 5xx) are retried
//!    `retry_attempts` times with exponential backoff and jitter.
//! 3. When retries are exhausted and a fallback model is configured, the
//!    fallback gets exactly one attempt.
//! 4. The optional `deadline` bounds all of the above; on expiry the
//!    in-flight request is dropped and the call reports `Timeout`.
//!
//! The client never writes to storage. Every outcome is returned as a
//! [`ModelCall`] so callers can log the interaction.

use backon::Retryable;
use casework_core::{AiInteraction, CaseId, Operation, RenderedPrompt};
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ModelConfig;
use crate::providers::{ChatMessage, CompletionResponse, LlmProvider, ModelInfo, ProviderError};
use crate::resilience::{PricingTable, RetryPolicy, UsageLedger, UsageSummary};

/// Failure of a model call after policy has been applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited by provider after {attempts} attempts")]
    RateLimited {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    #[error("Provider rejected the request: {message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },

    #[error("All {attempts} attempts failed, last error: {last_error}")]
    AllRetriesExhausted { attempts: u32, last_error: String },
}

impl ModelError {
    /// Stable tag used in interaction logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelError::Timeout(_) => "timeout",
            ModelError::RateLimited { .. } => "rate_limited",
            ModelError::Provider { .. } => "provider_error",
            ModelError::AllRetriesExhausted { .. } => "all_retries_exhausted",
        }
    }

    fn from_final(err: ProviderError, attempts: u32) -> Self {
        match err {
            ProviderError::Timeout(after) => ModelError::Timeout(after),
            ProviderError::RateLimited { retry_after } => ModelError::RateLimited {
                attempts,
                retry_after,
            },
            err if err.is_retryable() => ModelError::AllRetriesExhausted {
                attempts,
                last_error: err.to_string(),
            },
            ProviderError::ApiError { status, message } => ModelError::Provider {
                status: Some(status),
                message,
            },
            ProviderError::AuthError => ModelError::Provider {
                status: Some(401),
                message: err.to_string(),
            },
            other => ModelError::Provider {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

/// Normalized response from a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub response_time: Duration,
    pub finish_reason: Option<String>,

    /// Model id as reported by the provider
    pub model: String,
}

impl ModelResponse {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Report of one `invoke`, whatever the outcome.
#[derive(Debug, Clone)]
pub struct ModelCall {
    /// Model the final attempt was sent to
    pub model_used: String,
    pub attempts: u32,
    pub used_fallback: bool,
    pub elapsed: Duration,
    pub outcome: Result<ModelResponse, ModelError>,
}

impl ModelCall {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> Result<ModelResponse, ModelError> {
        self.outcome
    }

    /// Interaction record for this call.
    pub fn interaction(
        &self,
        case_id: Option<CaseId>,
        operation: Operation,
        prompt: &RenderedPrompt,
    ) -> AiInteraction {
        let (response, input_tokens, output_tokens, cost_usd, error) = match &self.outcome {
            Ok(r) => (
                Some(r.content.clone()),
                r.input_tokens,
                r.output_tokens,
                r.cost_usd,
                None,
            ),
            Err(e) => (None, 0, 0, 0.0, Some(format!("{}: {}", e.kind(), e))),
        };

        AiInteraction {
            id: Uuid::new_v4(),
            case_id,
            operation,
            prompt: prompt.full_text(),
            response,
            model: self.model_used.clone(),
            input_tokens,
            output_tokens,
            cost_usd,
            duration_ms: self.elapsed.as_millis() as u64,
            success: self.outcome.is_ok(),
            error,
            timestamp: Utc::now(),
            template_id: prompt.template_id.clone(),
            template_version: prompt.template_version.clone(),
        }
    }
}

/// Mark a completed call whose reply could not be used.
pub fn reject_interaction(interaction: &mut AiInteraction, reason: impl std::fmt::Display) {
    interaction.success = false;
    interaction.error = Some(format!("unusable_response: {reason}"));
}

/// Sends prompts to a provider under a retry, fallback and deadline policy.
pub struct ModelClient {
    provider: Arc<dyn LlmProvider>,
    config: ModelConfig,
    pricing: PricingTable,
    ledger: UsageLedger,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModelClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: ModelConfig) -> Self {
        Self {
            provider,
            config,
            pricing: PricingTable::default(),
            ledger: UsageLedger::new(),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Running token and cost totals for calls made through this client.
    pub fn usage(&self) -> UsageSummary {
        self.ledger.snapshot()
    }

    /// Models offered by the provider. No retries; this is a catalog read.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ModelError> {
        self.provider
            .list_models()
            .await
            .map_err(|e| ModelError::from_final(e, 1))
    }

    /// Invoke the configured model.
    pub async fn invoke(&self, prompt: &RenderedPrompt, operation: Operation) -> ModelCall {
        self.invoke_with(prompt, operation, &self.config).await
    }

    /// Invoke with explicit settings, e.g. a judge model.
    pub async fn invoke_with(
        &self,
        prompt: &RenderedPrompt,
        operation: Operation,
        config: &ModelConfig,
    ) -> ModelCall {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let mut model_used = config.model.clone();
        let mut used_fallback = false;

        let messages = vec![
            ChatMessage::system(prompt.system.clone()),
            ChatMessage::user(prompt.user.clone()),
        ];

        let run = self.run(
            &messages,
            config,
            &attempts,
            &mut model_used,
            &mut used_fallback,
        );

        let outcome = match config.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        operation = %operation,
                        model = %config.model,
                        deadline = ?deadline,
                        "Model call abandoned at deadline"
                    );
                    Err(ModelError::Timeout(deadline))
                }
            },
            None => run.await,
        };

        let elapsed = started.elapsed();
        let attempts = attempts.load(Ordering::SeqCst);

        let outcome = outcome.map(|completion| {
            let cost_usd = self.pricing.cost(
                &model_used,
                completion.usage.prompt_tokens,
                completion.usage.completion_tokens,
            );
            ModelResponse {
                content: completion.content,
                input_tokens: completion.usage.prompt_tokens,
                output_tokens: completion.usage.completion_tokens,
                cost_usd,
                response_time: elapsed,
                finish_reason: completion.stop_reason,
                model: completion.model,
            }
        });

        match &outcome {
            Ok(response) => {
                self.ledger.record(
                    &model_used,
                    true,
                    response.input_tokens,
                    response.output_tokens,
                    response.cost_usd,
                );
                info!(
                    operation = %operation,
                    model = %model_used,
                    attempts,
                    used_fallback,
                    tokens = response.total_tokens(),
                    cost_usd = response.cost_usd,
                    "Model call completed"
                );
            }
            Err(err) => {
                self.ledger.record(&model_used, false, 0, 0, 0.0);
                warn!(
                    operation = %operation,
                    model = %model_used,
                    attempts,
                    error = %err,
                    "Model call failed"
                );
            }
        }

        ModelCall {
            model_used,
            attempts,
            used_fallback,
            elapsed,
            outcome,
        }
    }

    /// Primary model with retries, then at most one fallback attempt.
    async fn run(
        &self,
        messages: &[ChatMessage],
        config: &ModelConfig,
        attempts: &AtomicU32,
        model_used: &mut String,
        used_fallback: &mut bool,
    ) -> Result<CompletionResponse, ModelError> {
        let primary = self.with_retries(messages, config, attempts).await;

        let last_error = match primary {
            Ok(completion) => return Ok(completion),
            Err(err) if !err.is_retryable() => {
                return Err(ModelError::from_final(err, attempts.load(Ordering::SeqCst)))
            }
            Err(err) => err,
        };

        let Some(fallback) = config.fallback_model.as_deref() else {
            return Err(ModelError::from_final(
                last_error,
                attempts.load(Ordering::SeqCst),
            ));
        };

        warn!(
            model = %config.model,
            fallback,
            error = %last_error,
            "Retries exhausted, trying fallback model"
        );
        *model_used = fallback.to_string();
        *used_fallback = true;

        attempts.fetch_add(1, Ordering::SeqCst);
        self.attempt(messages, config, fallback)
            .await
            .map_err(|e| ModelError::from_final(e, attempts.load(Ordering::SeqCst)))
    }

    async fn with_retries(
        &self,
        messages: &[ChatMessage],
        config: &ModelConfig,
        attempts: &AtomicU32,
    ) -> Result<CompletionResponse, ProviderError> {
        let policy = RetryPolicy::from_config(config);
        let model = config.model.as_str();

        (move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            self.attempt(messages, config, model).await
        })
        .retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .when(|e: &ProviderError| e.is_retryable())
        .adjust(|e: &ProviderError, planned| policy.adjust_delay(e, planned))
        .notify(|e: &ProviderError, delay: Duration| {
            warn!(
                model,
                attempt = attempts.load(Ordering::SeqCst),
                delay = ?delay,
                error = %e,
                "Retrying model call"
            );
        })
        .await
    }

    /// One request, bounded by the per-attempt timeout.
    async fn attempt(
        &self,
        messages: &[ChatMessage],
        config: &ModelConfig,
        model: &str,
    ) -> Result<CompletionResponse, ProviderError> {
        let completion = config.completion(model);
        debug!(model, provider = self.provider.name(), "Sending model request");

        match tokio::time::timeout(
            config.timeout,
            self.provider.complete(messages.to_vec(), &completion),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(config.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use casework_core::TemplateRegistry;

    fn prompt() -> RenderedPrompt {
        RenderedPrompt {
            template_id: "overall_summary".to_string(),
            template_version: "v1".to_string(),
            system: "Summarize the case.".to_string(),
            user: "Case c-1".to_string(),
        }
    }

    fn config() -> ModelConfig {
        ModelConfig {
            model: "primary-model".to_string(),
            timeout: Duration::from_secs(5),
            retry_attempts: 2,
            backoff_min: Duration::from_millis(100),
            backoff_max: Duration::from_millis(400),
            ..ModelConfig::default()
        }
    }

    fn server_error() -> ProviderError {
        ProviderError::ApiError {
            status: 503,
            message: "overloaded".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_reports_tokens_and_cost() {
        let provider = Arc::new(ScriptedProvider::new().reply("Case summary."));
        let client = ModelClient::new(provider.clone(), config())
            .with_pricing(PricingTable::flat(crate::resilience::ModelPrice::new(1.0, 2.0)));

        let call = client.invoke(&prompt(), Operation::GenerateSummary).await;
        assert_eq!(call.attempts, 1);
        assert!(!call.used_fallback);

        let response = call.into_result().unwrap();
        assert_eq!(response.content, "Case summary.");
        assert_eq!(response.input_tokens, ScriptedProvider::INPUT_TOKENS);
        assert_eq!(response.output_tokens, ScriptedProvider::OUTPUT_TOKENS);
        let expected = (ScriptedProvider::INPUT_TOKENS as f64
            + 2.0 * ScriptedProvider::OUTPUT_TOKENS as f64)
            / 1_000_000.0;
        assert!((response.cost_usd - expected).abs() < 1e-12);
        assert_eq!(client.usage().total.calls, 1);

        let sent = provider.calls();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model, "primary-model");
        assert_eq!(sent[0].messages[0].role, "system");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail(server_error())
                .fail(ProviderError::HttpError("connection reset".into()))
                .reply("ok"),
        );
        let client = ModelClient::new(provider.clone(), config());

        let call = client.invoke(&prompt(), Operation::GenerateSummary).await;
        assert_eq!(call.attempts, 3);
        assert_eq!(call.outcome.unwrap().content, "ok");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let provider = Arc::new(ScriptedProvider::new().fail(ProviderError::ApiError {
            status: 400,
            message: "bad request".into(),
        }));
        let client = ModelClient::new(provider.clone(), config());

        let call = client.invoke(&prompt(), Operation::GenerateSummary).await;
        assert_eq!(call.attempts, 1);
        assert_eq!(
            call.outcome.unwrap_err(),
            ModelError::Provider {
                status: Some(400),
                message: "bad request".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail(server_error())
                .fail(server_error())
                .fail(server_error()),
        );
        let client = ModelClient::new(provider.clone(), config());

        let call = client.invoke(&prompt(), Operation::GenerateSummary).await;
        assert_eq!(provider.call_count(), 3);
        match call.outcome.unwrap_err() {
            ModelError::AllRetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("overloaded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.usage().total.failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_maps_to_rate_limited() {
        let limited = || ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(1)),
        };
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail(limited())
                .fail(limited())
                .fail(limited()),
        );
        let client = ModelClient::new(provider, config());

        let err = client
            .invoke(&prompt(), Operation::GenerateSummary)
            .await
            .outcome
            .unwrap_err();
        assert_eq!(err.kind(), "rate_limited");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_gets_one_attempt() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail(server_error())
                .fail(server_error())
                .fail(server_error())
                .reply("from fallback"),
        );
        let mut config = config();
        config.fallback_model = Some("fallback-model".to_string());
        let client = ModelClient::new(provider.clone(), config);

        let call = client.invoke(&prompt(), Operation::GenerateSummary).await;
        assert!(call.used_fallback);
        assert_eq!(call.model_used, "fallback-model");
        assert_eq!(call.attempts, 4);
        assert_eq!(call.outcome.unwrap().content, "from fallback");
        assert_eq!(provider.calls()[3].model, "fallback-model");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fallback_does_not_retry() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail(server_error())
                .fail(server_error())
                .fail(server_error())
                .fail(server_error())
                .reply("never reached"),
        );
        let mut config = config();
        config.fallback_model = Some("fallback-model".to_string());
        let client = ModelClient::new(provider.clone(), config);

        let call = client.invoke(&prompt(), Operation::GenerateSummary).await;
        assert_eq!(provider.call_count(), 4);
        assert!(matches!(
            call.outcome,
            Err(ModelError::AllRetriesExhausted { attempts: 4, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new().hang().reply("late"));
        let client = ModelClient::new(provider.clone(), config());

        let started = tokio::time::Instant::now();
        let call = client.invoke(&prompt(), Operation::GenerateSummary).await;

        assert_eq!(
            call.outcome.unwrap_err(),
            ModelError::Timeout(Duration::from_secs(5))
        );
        assert_eq!(provider.call_count(), 1);
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_retries() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .delay(Duration::from_secs(3))
                .fail(server_error())
                .delay(Duration::from_secs(3))
                .fail(server_error())
                .reply("too late"),
        );
        let mut config = config();
        config.deadline = Some(Duration::from_secs(4));
        let client = ModelClient::new(provider, config);

        let started = tokio::time::Instant::now();
        let call = client.invoke(&prompt(), Operation::GenerateSummary).await;

        assert_eq!(
            call.outcome.unwrap_err(),
            ModelError::Timeout(Duration::from_secs(4))
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4));
        assert!(elapsed < Duration::from_millis(4100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interaction_records_failure() {
        let provider = Arc::new(ScriptedProvider::new().fail(ProviderError::AuthError));
        let client = ModelClient::new(provider, config());

        let call = client.invoke(&prompt(), Operation::GenerateSummary).await;
        let interaction =
            call.interaction(Some(CaseId::new("c-1")), Operation::GenerateSummary, &prompt());

        assert!(!interaction.success);
        assert!(interaction.response.is_none());
        assert_eq!(interaction.tokens_used(), 0);
        assert!(interaction
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("provider_error")));
        assert_eq!(interaction.template_id, "overall_summary");
        assert!(interaction.prompt.contains("Case c-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_with_overrides_model() {
        let provider = Arc::new(ScriptedProvider::new().reply("scored"));
        let client = ModelClient::new(provider.clone(), config());
        let judge = client.config().with_model("judge-model");

        let rendered = TemplateRegistry::with_builtins()
            .render(
                "judge_rubric",
                "v1",
                &[
                    ("operation", "generate_summary"),
                    ("rubric_version", "v1"),
                    ("scale_max", "10"),
                    ("criteria", "- clarity"),
                    ("reference_context", "none"),
                    ("produced_output", "text"),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            )
            .unwrap();

        let call = client
            .invoke_with(&rendered, Operation::GenerateSummary, &judge)
            .await;
        assert!(call.is_success());
        assert_eq!(provider.calls()[0].model, "judge-model");
    }
}
