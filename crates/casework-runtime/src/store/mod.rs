//! Persistence seams: the case repository and the AI artifact store.
//!
//! Every record an operation produces goes into one [`WriteBatch`] and is
//! committed as a unit. A store must either apply the whole batch or none
//! of it.

mod memory;

pub use memory::{MemoryStore, StoreSnapshot};

use async_trait::async_trait;
use casework_core::{
    AiEvaluation, AiInteraction, AiSummary, AuditEntry, Case, CaseId, EvaluationDataset,
    EvaluationExample, SummaryKey,
};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Storage failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A uniqueness precondition failed, e.g. a summary version already exists
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Missing {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },

    #[error("Storage I/O failed: {0}")]
    Io(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Read access to cases owned by the case-management side.
#[async_trait]
pub trait CaseRepository: Send + Sync {
    async fn get_case(&self, id: &CaseId) -> Result<Option<Case>, StoreError>;
}

/// Reads and atomic writes for AI artifacts and evaluation datasets.
#[async_trait]
pub trait Store: Send + Sync {
    /// Highest version stored for the key, `None` when there is none.
    async fn max_summary_version(&self, key: &SummaryKey) -> Result<Option<u32>, StoreError>;

    /// All versions for the key, oldest first.
    async fn summaries(&self, key: &SummaryKey) -> Result<Vec<AiSummary>, StoreError>;

    async fn audit_entries(&self, case_id: &CaseId) -> Result<Vec<AuditEntry>, StoreError>;

    /// Interactions for one case, or every interaction when `case_id` is `None`.
    async fn interactions(&self, case_id: Option<&CaseId>)
        -> Result<Vec<AiInteraction>, StoreError>;

    async fn evaluations(&self) -> Result<Vec<AiEvaluation>, StoreError>;

    async fn get_dataset(&self, id: Uuid) -> Result<Option<EvaluationDataset>, StoreError>;

    /// All datasets in insertion order.
    async fn list_datasets(&self) -> Result<Vec<EvaluationDataset>, StoreError>;

    /// Examples of a dataset in insertion order.
    async fn dataset_examples(&self, dataset_id: Uuid)
        -> Result<Vec<EvaluationExample>, StoreError>;

    /// Apply every write in the batch, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// Commit `batch`. If the store rejects it, commit only its interactions,
/// marked as failed with the storage error, and return the original error.
///
/// A model call that happened always leaves its interaction behind, even
/// when the records built from its reply cannot be stored.
pub async fn commit_keeping_interactions(
    store: &dyn Store,
    batch: WriteBatch,
) -> Result<(), StoreError> {
    let interactions = batch.interactions.clone();
    let err = match store.commit(batch).await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    if interactions.is_empty() {
        return Err(err);
    }

    warn!(error = %err, "Batch rejected, recording the interaction alone");
    let reason = format!("persistence: {err}");
    let batch = interactions
        .into_iter()
        .fold(WriteBatch::new(), |batch, mut interaction| {
            interaction.success = false;
            interaction.error = Some(reason.clone());
            batch.interaction(interaction)
        });
    if let Err(second) = store.commit(batch).await {
        error!(error = %second, "Interaction could not be recorded either");
    }
    Err(err)
}

/// Records to be written together.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub summaries: Vec<AiSummary>,
    pub interactions: Vec<AiInteraction>,
    pub audit_entries: Vec<AuditEntry>,
    pub evaluations: Vec<AiEvaluation>,

    /// Datasets that must not exist yet
    pub new_datasets: Vec<EvaluationDataset>,

    /// Replacements for datasets that must already exist
    pub dataset_updates: Vec<EvaluationDataset>,

    pub examples: Vec<EvaluationExample>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(mut self, summary: AiSummary) -> Self {
        self.summaries.push(summary);
        self
    }

    pub fn interaction(mut self, interaction: AiInteraction) -> Self {
        self.interactions.push(interaction);
        self
    }

    pub fn audit(mut self, entry: AuditEntry) -> Self {
        self.audit_entries.push(entry);
        self
    }

    pub fn evaluation(mut self, evaluation: AiEvaluation) -> Self {
        self.evaluations.push(evaluation);
        self
    }

    pub fn create_dataset(mut self, dataset: EvaluationDataset) -> Self {
        self.new_datasets.push(dataset);
        self
    }

    pub fn update_dataset(mut self, dataset: EvaluationDataset) -> Self {
        self.dataset_updates.push(dataset);
        self
    }

    pub fn example(mut self, example: EvaluationExample) -> Self {
        self.examples.push(example);
        self
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
            + self.interactions.len()
            + self.audit_entries.len()
            + self.evaluations.len()
            + self.new_datasets.len()
            + self.dataset_updates.len()
            + self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
