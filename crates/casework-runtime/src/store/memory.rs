//! In-memory store with all-or-nothing batch commits.

use async_trait::async_trait;
use casework_core::{
    AiEvaluation, AiInteraction, AiSummary, AuditEntry, Case, CaseId, EvaluationDataset,
    EvaluationExample, SummaryKey,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use super::{CaseRepository, Store, StoreError, WriteBatch};

/// Serializable copy of every table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub cases: BTreeMap<CaseId, Case>,
    #[serde(default)]
    pub summaries: Vec<AiSummary>,
    #[serde(default)]
    pub interactions: Vec<AiInteraction>,
    #[serde(default)]
    pub audit_entries: Vec<AuditEntry>,
    #[serde(default)]
    pub evaluations: Vec<AiEvaluation>,
    #[serde(default)]
    pub datasets: Vec<EvaluationDataset>,
    #[serde(default)]
    pub examples: Vec<EvaluationExample>,
}

impl StoreSnapshot {
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, StoreError> {
        serde_json::from_str(text).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// Store and case repository backed by process memory.
///
/// A single write lock covers precondition checks and application, so a
/// batch is never visible half-applied.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            tables: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.tables.read().clone()
    }

    /// Add or replace a case. Cases are owned outside the AI subsystem;
    /// this exists for imports and tests.
    pub fn insert_case(&self, case: Case) {
        self.tables.write().cases.insert(case.id.clone(), case);
    }

    pub fn cases(&self) -> Vec<Case> {
        self.tables.read().cases.values().cloned().collect()
    }

    fn check(tables: &StoreSnapshot, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut versions: HashSet<(SummaryKey, u32)> = tables
            .summaries
            .iter()
            .map(|s| (s.key(), s.version))
            .collect();
        for summary in &batch.summaries {
            if !versions.insert((summary.key(), summary.version)) {
                return Err(StoreError::Conflict(format!(
                    "summary {} version {} already exists",
                    summary.key(),
                    summary.version
                )));
            }
        }

        let mut dataset_ids: HashSet<Uuid> = tables.datasets.iter().map(|d| d.id).collect();
        for dataset in &batch.new_datasets {
            if !dataset_ids.insert(dataset.id) {
                return Err(StoreError::Conflict(format!(
                    "dataset {} already exists",
                    dataset.id
                )));
            }
        }

        for dataset in &batch.dataset_updates {
            if !dataset_ids.contains(&dataset.id) {
                return Err(StoreError::MissingReference {
                    kind: "dataset",
                    id: dataset.id.to_string(),
                });
            }
        }

        for example in &batch.examples {
            if !dataset_ids.contains(&example.dataset_id) {
                return Err(StoreError::MissingReference {
                    kind: "dataset",
                    id: example.dataset_id.to_string(),
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl CaseRepository for MemoryStore {
    async fn get_case(&self, id: &CaseId) -> Result<Option<Case>, StoreError> {
        Ok(self.tables.read().cases.get(id).cloned())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn max_summary_version(&self, key: &SummaryKey) -> Result<Option<u32>, StoreError> {
        Ok(self
            .tables
            .read()
            .summaries
            .iter()
            .filter(|s| &s.key() == key)
            .map(|s| s.version)
            .max())
    }

    async fn summaries(&self, key: &SummaryKey) -> Result<Vec<AiSummary>, StoreError> {
        let mut summaries: Vec<_> = self
            .tables
            .read()
            .summaries
            .iter()
            .filter(|s| &s.key() == key)
            .cloned()
            .collect();
        summaries.sort_by_key(|s| s.version);
        Ok(summaries)
    }

    async fn audit_entries(&self, case_id: &CaseId) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .tables
            .read()
            .audit_entries
            .iter()
            .filter(|a| &a.case_id == case_id)
            .cloned()
            .collect())
    }

    async fn interactions(
        &self,
        case_id: Option<&CaseId>,
    ) -> Result<Vec<AiInteraction>, StoreError> {
        Ok(self
            .tables
            .read()
            .interactions
            .iter()
            .filter(|i| case_id.is_none() || i.case_id.as_ref() == case_id)
            .cloned()
            .collect())
    }

    async fn evaluations(&self) -> Result<Vec<AiEvaluation>, StoreError> {
        Ok(self.tables.read().evaluations.clone())
    }

    async fn get_dataset(&self, id: Uuid) -> Result<Option<EvaluationDataset>, StoreError> {
        Ok(self
            .tables
            .read()
            .datasets
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn list_datasets(&self) -> Result<Vec<EvaluationDataset>, StoreError> {
        Ok(self.tables.read().datasets.clone())
    }

    async fn dataset_examples(
        &self,
        dataset_id: Uuid,
    ) -> Result<Vec<EvaluationExample>, StoreError> {
        Ok(self
            .tables
            .read()
            .examples
            .iter()
            .filter(|e| e.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        Self::check(&tables, &batch)?;

        let WriteBatch {
            summaries,
            interactions,
            audit_entries,
            evaluations,
            new_datasets,
            dataset_updates,
            examples,
        } = batch;

        tables.summaries.extend(summaries);
        tables.interactions.extend(interactions);
        tables.audit_entries.extend(audit_entries);
        tables.evaluations.extend(evaluations);
        tables.datasets.extend(new_datasets);
        for update in dataset_updates {
            if let Some(slot) = tables.datasets.iter_mut().find(|d| d.id == update.id) {
                *slot = update;
            }
        }
        tables.examples.extend(examples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casework_core::{NewDataset, NewExample, Operation, SummaryType};
    use chrono::Utc;

    fn summary(case: &str, version: u32) -> AiSummary {
        AiSummary {
            id: Uuid::new_v4(),
            case_id: CaseId::new(case),
            summary_type: SummaryType::Overall,
            step: None,
            content: format!("v{version}"),
            recommendations: vec![],
            confidence: 0.9,
            generated_at: Utc::now(),
            version,
        }
    }

    fn dataset() -> EvaluationDataset {
        NewDataset::new("Summary Dataset", Operation::GenerateSummary)
            .into_dataset(Utc::now())
            .unwrap()
    }

    fn example(dataset_id: Uuid) -> EvaluationExample {
        let mut new = NewExample::default();
        new.input.prompt = "Summarize".to_string();
        new.expected_output.quality = 8.0;
        new.into_example(dataset_id, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_version_rejects_whole_batch() {
        let store = MemoryStore::new();
        store
            .commit(WriteBatch::new().summary(summary("c-1", 1)))
            .await
            .unwrap();

        let ds = dataset();
        let batch = WriteBatch::new()
            .create_dataset(ds.clone())
            .summary(summary("c-1", 2))
            .summary(summary("c-1", 1));
        let err = store.commit(batch).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        let key = SummaryKey::overall(CaseId::new("c-1"));
        assert_eq!(store.max_summary_version(&key).await.unwrap(), Some(1));
        assert!(store.get_dataset(ds.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_example_requires_dataset() {
        let store = MemoryStore::new();
        let err = store
            .commit(WriteBatch::new().example(example(Uuid::new_v4())))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingReference { kind: "dataset", .. }));
        assert!(store.snapshot().examples.is_empty());

        let ds = dataset();
        store
            .commit(WriteBatch::new().create_dataset(ds.clone()).example(example(ds.id)))
            .await
            .unwrap();
        assert_eq!(store.dataset_examples(ds.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_in_place() {
        let store = MemoryStore::new();
        let first = dataset();
        let second = dataset();
        store
            .commit(
                WriteBatch::new()
                    .create_dataset(first.clone())
                    .create_dataset(second.clone()),
            )
            .await
            .unwrap();

        let mut renamed = first.clone();
        renamed.name = "Renamed".to_string();
        store
            .commit(WriteBatch::new().update_dataset(renamed))
            .await
            .unwrap();

        let names: Vec<_> = store
            .list_datasets()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["Renamed", "Summary Dataset"]);
    }

    #[tokio::test]
    async fn test_summaries_sorted_by_version() {
        let store = MemoryStore::new();
        store
            .commit(
                WriteBatch::new()
                    .summary(summary("c-1", 2))
                    .summary(summary("c-1", 1))
                    .summary(summary("c-2", 1)),
            )
            .await
            .unwrap();

        let history = store
            .summaries(&SummaryKey::overall(CaseId::new("c-1")))
            .await
            .unwrap();
        let versions: Vec<_> = history.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = MemoryStore::new();
        store.insert_case(Case {
            id: CaseId::new("c-1"),
            application_data: serde_json::json!({"applicant": "A. Jones"}),
            status: "in_review".to_string(),
            current_step: Some("intake".to_string()),
            assignee: None,
        });
        let ds = dataset();
        store
            .commit(WriteBatch::new().create_dataset(ds.clone()).summary(summary("c-1", 1)))
            .await
            .unwrap();

        let json = store.snapshot().to_json().unwrap();
        let restored = MemoryStore::from_snapshot(StoreSnapshot::from_json(&json).unwrap());

        assert_eq!(restored.snapshot(), store.snapshot());
        assert!(restored
            .get_case(&CaseId::new("c-1"))
            .await
            .unwrap()
            .is_some());
    }
}
