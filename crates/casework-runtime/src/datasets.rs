//! Evaluation dataset management.

use casework_core::dataset::newest_first;
use casework_core::{
    DatasetFilter, DatasetStatistics, EvaluationDataset, EvaluationExample, NewDataset,
    NewExample,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::locks::KeyedLocks;
use crate::store::{Store, WriteBatch};
use crate::ServiceError;

/// Creates datasets, appends examples and keeps statistics current.
///
/// Statistics are recomputed from the full example set on every append,
/// under a per-dataset lock, and committed together with the new example.
pub struct DatasetManager {
    store: Arc<dyn Store>,
    locks: KeyedLocks<Uuid>,
}

impl DatasetManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn create_dataset(&self, new: NewDataset) -> Result<EvaluationDataset, ServiceError> {
        let dataset = new.into_dataset(Utc::now())?;
        self.store
            .commit(WriteBatch::new().create_dataset(dataset.clone()))
            .await?;

        info!(
            dataset_id = %dataset.id,
            name = %dataset.name,
            operation = %dataset.operation,
            "Dataset created"
        );
        Ok(dataset)
    }

    /// Datasets matching every given filter, in creation order.
    pub async fn list_datasets(
        &self,
        filter: &DatasetFilter,
    ) -> Result<Vec<EvaluationDataset>, ServiceError> {
        let datasets = self.store.list_datasets().await?;
        Ok(filter.apply(&datasets))
    }

    /// `None` when the id is unknown.
    pub async fn get_dataset(&self, id: Uuid) -> Result<Option<EvaluationDataset>, ServiceError> {
        Ok(self.store.get_dataset(id).await?)
    }

    /// Append an example and recompute the dataset's statistics. Nothing is
    /// written when the dataset is unknown or the example is invalid.
    pub async fn add_example_to_dataset(
        &self,
        dataset_id: Uuid,
        example: NewExample,
    ) -> Result<EvaluationExample, ServiceError> {
        example.validate()?;

        let _guard = self.locks.lock(dataset_id).await;

        let mut dataset = self
            .store
            .get_dataset(dataset_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("dataset", dataset_id))?;

        let now = Utc::now();
        let example = example.into_example(dataset_id, now)?;

        let mut examples = self.store.dataset_examples(dataset_id).await?;
        examples.push(example.clone());
        dataset.statistics = DatasetStatistics::compute(&examples);
        dataset.updated_at = now;

        debug!(
            dataset_id = %dataset_id,
            total = dataset.statistics.total_examples,
            average_quality = dataset.statistics.average_quality,
            "Recomputed dataset statistics"
        );

        self.store
            .commit(
                WriteBatch::new()
                    .example(example.clone())
                    .update_dataset(dataset),
            )
            .await?;

        Ok(example)
    }

    /// Examples newest first. Examples created in the same instant keep
    /// reverse insertion order.
    pub async fn get_dataset_examples(
        &self,
        dataset_id: Uuid,
    ) -> Result<Vec<EvaluationExample>, ServiceError> {
        if self.store.get_dataset(dataset_id).await?.is_none() {
            return Err(ServiceError::not_found("dataset", dataset_id));
        }

        let mut examples = self.store.dataset_examples(dataset_id).await?;
        examples.reverse();
        newest_first(&mut examples);
        Ok(examples)
    }

    pub async fn get_example(
        &self,
        dataset_id: Uuid,
        example_id: Uuid,
    ) -> Result<EvaluationExample, ServiceError> {
        self.store
            .dataset_examples(dataset_id)
            .await?
            .into_iter()
            .find(|e| e.id == example_id)
            .ok_or_else(|| ServiceError::not_found("example", example_id))
    }
}
