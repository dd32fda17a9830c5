//! Evaluation datasets and their derived statistics.
//!
//! Statistics are always recomputed from the full example set; nothing here
//! updates them incrementally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::types::Operation;
use crate::ValidationError;

/// Upper bound of the quality and criterion scale.
pub const MAX_QUALITY: f64 = 10.0;

/// Difficulty bucket of a dataset or example.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Where a dataset's examples came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Manual,
    Production,
    Synthetic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    #[serde(default)]
    pub created_by: String,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub difficulty: Difficulty,

    #[serde(default)]
    pub source_type: SourceType,
}

/// Aggregates derived from a dataset's examples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStatistics {
    pub total_examples: usize,
    pub average_quality: f64,

    /// Count per difficulty bucket; empty buckets are omitted
    pub difficulty_distribution: BTreeMap<Difficulty, usize>,

    /// Mean score per criterion over the examples that carry it
    #[serde(default)]
    pub criteria_averages: BTreeMap<String, f64>,
}

impl DatasetStatistics {
    /// Compute statistics from the complete example set.
    pub fn compute(examples: &[EvaluationExample]) -> Self {
        if examples.is_empty() {
            return Self::default();
        }

        let total_examples = examples.len();
        let quality_sum: f64 = examples.iter().map(|e| e.expected_output.quality).sum();

        let mut difficulty_distribution = BTreeMap::new();
        let mut criteria_totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();

        for example in examples {
            *difficulty_distribution
                .entry(example.metadata.difficulty)
                .or_insert(0) += 1;

            for (name, score) in &example.expected_output.criteria {
                let entry = criteria_totals.entry(name.clone()).or_insert((0.0, 0));
                entry.0 += score;
                entry.1 += 1;
            }
        }

        let criteria_averages = criteria_totals
            .into_iter()
            .map(|(name, (sum, count))| (name, sum / count as f64))
            .collect();

        Self {
            total_examples,
            average_quality: quality_sum / total_examples as f64,
            difficulty_distribution,
            criteria_averages,
        }
    }
}

/// A named collection of input/expected-output pairs for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDataset {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub operation: Operation,
    pub metadata: DatasetMetadata,
    pub statistics: DatasetStatistics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a dataset. Optional fields take documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDataset {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub operation: Option<Operation>,

    #[serde(default)]
    pub metadata: Option<NewDatasetMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDatasetMetadata {
    #[serde(default)]
    pub created_by: Option<String>,

    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,

    #[serde(default)]
    pub difficulty: Option<Difficulty>,

    #[serde(default)]
    pub source_type: Option<SourceType>,
}

impl NewDataset {
    pub fn new(name: impl Into<String>, operation: Operation) -> Self {
        Self {
            name: name.into(),
            operation: Some(operation),
            ..Default::default()
        }
    }

    /// Build the dataset record, applying defaults. Fails when the name or
    /// operation is missing.
    pub fn into_dataset(self, now: DateTime<Utc>) -> Result<EvaluationDataset, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::new("name", "dataset name is required"));
        }
        let operation = self
            .operation
            .ok_or_else(|| ValidationError::new("operation", "dataset operation is required"))?;

        let meta = self.metadata.unwrap_or_default();

        Ok(EvaluationDataset {
            id: Uuid::new_v4(),
            name,
            description: self.description.unwrap_or_default(),
            operation,
            metadata: DatasetMetadata {
                created_by: meta.created_by.unwrap_or_default(),
                tags: meta.tags.unwrap_or_default(),
                difficulty: meta.difficulty.unwrap_or_default(),
                source_type: meta.source_type.unwrap_or_default(),
            },
            statistics: DatasetStatistics::default(),
            created_at: now,
            updated_at: now,
        })
    }
}

/// Conjunctive filters for listing datasets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetFilter {
    #[serde(default)]
    pub operation: Option<Operation>,

    #[serde(default)]
    pub created_by: Option<String>,

    /// Matches when the dataset shares at least one tag
    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub offset: Option<usize>,
}

impl DatasetFilter {
    pub fn matches(&self, dataset: &EvaluationDataset) -> bool {
        if let Some(op) = self.operation {
            if dataset.operation != op {
                return false;
            }
        }
        if let Some(creator) = &self.created_by {
            if &dataset.metadata.created_by != creator {
                return false;
            }
        }
        if !self.tags.is_empty() && self.tags.is_disjoint(&dataset.metadata.tags) {
            return false;
        }
        true
    }

    /// Filter in insertion order, then page.
    pub fn apply<'a, I>(&self, datasets: I) -> Vec<EvaluationDataset>
    where
        I: IntoIterator<Item = &'a EvaluationDataset>,
    {
        datasets
            .into_iter()
            .filter(|d| self.matches(d))
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleInput {
    pub prompt: String,

    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedOutput {
    pub content: String,

    /// Overall quality, 0 - 10
    pub quality: f64,

    #[serde(default)]
    pub criteria: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleMetadata {
    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub difficulty: Difficulty,

    #[serde(default)]
    pub notes: Option<String>,
}

/// One input/expected-output pair within a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationExample {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub input: ExampleInput,
    pub expected_output: ExpectedOutput,
    pub metadata: ExampleMetadata,
    pub created_at: DateTime<Utc>,
}

/// Example payload supplied by callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExample {
    pub input: ExampleInput,
    pub expected_output: ExpectedOutput,

    #[serde(default)]
    pub metadata: Option<ExampleMetadata>,
}

impl NewExample {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.input.prompt.trim().is_empty() {
            return Err(ValidationError::new("input.prompt", "example prompt is required"));
        }
        check_scale("expectedOutput.quality", self.expected_output.quality)?;
        for (name, score) in &self.expected_output.criteria {
            check_scale(&format!("expectedOutput.criteria.{name}"), *score)?;
        }
        Ok(())
    }

    pub fn into_example(
        self,
        dataset_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<EvaluationExample, ValidationError> {
        self.validate()?;
        Ok(EvaluationExample {
            id: Uuid::new_v4(),
            dataset_id,
            input: self.input,
            expected_output: self.expected_output,
            metadata: self.metadata.unwrap_or_default(),
            created_at: now,
        })
    }
}

fn check_scale(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || !(0.0..=MAX_QUALITY).contains(&value) {
        return Err(ValidationError::new(
            field,
            format!("must be between 0 and {MAX_QUALITY}, got {value}"),
        ));
    }
    Ok(())
}

/// Order examples newest first by creation time.
pub fn newest_first(examples: &mut [EvaluationExample]) {
    examples.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
