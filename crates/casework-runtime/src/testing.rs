//! Scripted provider and a store that refuses chosen batches, for tests.

use async_trait::async_trait;
use casework_core::{
    AiEvaluation, AiInteraction, AiSummary, AuditEntry, CaseId, EvaluationDataset,
    EvaluationExample, SummaryKey,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ModelInfo, ProviderError,
    TokenUsage,
};
use crate::store::{MemoryStore, Store, StoreError, WriteBatch};

enum Outcome {
    Reply(String),
    Fail(ProviderError),
    Hang,
}

struct Step {
    delay: Option<Duration>,
    outcome: Outcome,
}

/// A request the provider received.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Replays queued outcomes in order, then a repeating default if set.
pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    pending_delay: Option<Duration>,
    default_reply: Option<String>,
    models: Vec<ModelInfo>,
    calls: Mutex<Vec<RecordedCall>>,
    list_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub const INPUT_TOKENS: u32 = 120;
    pub const OUTPUT_TOKENS: u32 = 40;

    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            pending_delay: None,
            default_reply: None,
            models: Vec::new(),
            calls: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    fn push(mut self, outcome: Outcome) -> Self {
        let delay = self.pending_delay.take();
        self.script.get_mut().push_back(Step { delay, outcome });
        self
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Outcome::Reply(text.into()))
    }

    pub fn fail(self, err: ProviderError) -> Self {
        self.push(Outcome::Fail(err))
    }

    /// Never completes.
    pub fn hang(self) -> Self {
        self.push(Outcome::Hang)
    }

    /// Sleep before the next queued outcome.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.pending_delay = Some(delay);
        self
    }

    /// Reply used once the queue is empty.
    pub fn always(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    pub fn with_models(mut self, ids: &[&str]) -> Self {
        self.models = ids
            .iter()
            .map(|id| ModelInfo {
                id: id.to_string(),
                display_name: None,
            })
            .collect();
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.lock().push(RecordedCall {
            model: config.model.clone(),
            messages,
        });

        let step = self.script.lock().pop_front();
        let step = match step {
            Some(step) => step,
            None => match &self.default_reply {
                Some(text) => Step {
                    delay: None,
                    outcome: Outcome::Reply(text.clone()),
                },
                None => {
                    return Err(ProviderError::ApiError {
                        status: 400,
                        message: "script exhausted".to_string(),
                    })
                }
            },
        };

        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }

        match step.outcome {
            Outcome::Reply(content) => Ok(CompletionResponse {
                content,
                usage: TokenUsage {
                    prompt_tokens: Self::INPUT_TOKENS,
                    completion_tokens: Self::OUTPUT_TOKENS,
                },
                model: config.model.clone(),
                stop_reason: Some("end_turn".to_string()),
            }),
            Outcome::Fail(err) => Err(err),
            Outcome::Hang => std::future::pending().await,
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.models.clone())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Delegates to a [`MemoryStore`] but fails every batch matching `rejects`
/// with an I/O error, leaving the inner store untouched.
pub(crate) struct RejectingStore {
    inner: Arc<MemoryStore>,
    rejects: fn(&WriteBatch) -> bool,
}

impl RejectingStore {
    pub fn new(inner: Arc<MemoryStore>, rejects: fn(&WriteBatch) -> bool) -> Self {
        Self { inner, rejects }
    }
}

#[async_trait]
impl Store for RejectingStore {
    async fn max_summary_version(&self, key: &SummaryKey) -> Result<Option<u32>, StoreError> {
        self.inner.max_summary_version(key).await
    }

    async fn summaries(&self, key: &SummaryKey) -> Result<Vec<AiSummary>, StoreError> {
        self.inner.summaries(key).await
    }

    async fn audit_entries(&self, case_id: &CaseId) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.audit_entries(case_id).await
    }

    async fn interactions(
        &self,
        case_id: Option<&CaseId>,
    ) -> Result<Vec<AiInteraction>, StoreError> {
        self.inner.interactions(case_id).await
    }

    async fn evaluations(&self) -> Result<Vec<AiEvaluation>, StoreError> {
        self.inner.evaluations().await
    }

    async fn get_dataset(&self, id: Uuid) -> Result<Option<EvaluationDataset>, StoreError> {
        self.inner.get_dataset(id).await
    }

    async fn list_datasets(&self) -> Result<Vec<EvaluationDataset>, StoreError> {
        self.inner.list_datasets().await
    }

    async fn dataset_examples(
        &self,
        dataset_id: Uuid,
    ) -> Result<Vec<EvaluationExample>, StoreError> {
        self.inner.dataset_examples(dataset_id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if (self.rejects)(&batch) {
            return Err(StoreError::Io("disk full".to_string()));
        }
        self.inner.commit(batch).await
    }
}
