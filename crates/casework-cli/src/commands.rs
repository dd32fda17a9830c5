//! Subcommand handlers.

use anyhow::{bail, Context as _, Result};
use casework_core::{
    Case, CaseId, DatasetFilter, Difficulty, NewDataset, NewDatasetMetadata, NewExample,
    Operation, SummaryKey,
};
use casework_runtime::{DatasetManager, MemoryStore, RuntimeConfig, Services, StoreSnapshot};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::output::Format;

/// Loaded configuration and store for one invocation.
pub struct Context {
    pub config: RuntimeConfig,
    pub store: Arc<MemoryStore>,
    pub store_path: PathBuf,
    pub format: Format,
}

impl Context {
    pub fn load(config_path: Option<&Path>, store_path: &Path, format: Format) -> Result<Self> {
        let config = match config_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                RuntimeConfig::from_yaml(&text)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => RuntimeConfig::default(),
        };

        let store = if store_path.exists() {
            let text = std::fs::read_to_string(store_path)
                .with_context(|| format!("Failed to read store {}", store_path.display()))?;
            MemoryStore::from_snapshot(StoreSnapshot::from_json(&text)?)
        } else {
            debug!(path = %store_path.display(), "No store snapshot yet, starting empty");
            MemoryStore::new()
        };

        Ok(Self {
            config,
            store: Arc::new(store),
            store_path: store_path.to_path_buf(),
            format,
        })
    }

    /// Services backed by this invocation's store. Needs a usable provider.
    fn services(&self) -> Result<Services> {
        Ok(Services::from_config_with_store(
            self.config.clone(),
            self.store.clone(),
            self.store.clone(),
        )?)
    }

    fn datasets(&self) -> DatasetManager {
        DatasetManager::new(self.store.clone())
    }

    /// Write the snapshot back, replacing the file atomically.
    fn save(&self) -> Result<()> {
        let json = self.store.snapshot().to_json()?;
        let tmp = self.store_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.store_path)
            .with_context(|| format!("Failed to replace {}", self.store_path.display()))?;
        debug!(path = %self.store_path.display(), "Store saved");
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CaseFile {
    Many(Vec<Case>),
    One(Case),
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

pub fn import_cases(ctx: &Context, file: &Path) -> Result<()> {
    let cases = match read_json::<CaseFile>(file)? {
        CaseFile::Many(cases) => cases,
        CaseFile::One(case) => vec![case],
    };

    let ids: Vec<CaseId> = cases.iter().map(|c| c.id.clone()).collect();
    for case in cases {
        ctx.store.insert_case(case);
    }
    ctx.save()?;

    info!(count = ids.len(), "Cases imported");
    ctx.format.print(&ids)
}

pub async fn generate_summary(ctx: &Context, case_id: &str) -> Result<()> {
    let services = ctx.services()?;
    let result = services
        .orchestration
        .generate_overall_summary(&CaseId::new(case_id))
        .await;
    // Failed calls still log an interaction.
    ctx.save()?;
    ctx.format.print(&result?)
}

pub async fn step_recommendation(ctx: &Context, case_id: &str, step: &str) -> Result<()> {
    let services = ctx.services()?;
    let result = services
        .orchestration
        .generate_step_recommendation(&CaseId::new(case_id), step)
        .await;
    ctx.save()?;
    ctx.format.print(&result?)
}

pub async fn refresh_summary(ctx: &Context, case_id: &str) -> Result<()> {
    let services = ctx.services()?;
    let result = services
        .orchestration
        .refresh_summary(&CaseId::new(case_id))
        .await;
    ctx.save()?;
    ctx.format.print(&result?)
}

pub async fn summary_history(ctx: &Context, case_id: &str, step: Option<&str>) -> Result<()> {
    use casework_runtime::Store;

    let case_id = CaseId::new(case_id);
    let key = match step {
        Some(step) => SummaryKey::step(case_id, step),
        None => SummaryKey::overall(case_id),
    };
    let history = ctx.store.summaries(&key).await?;
    ctx.format.print(&history)
}

pub async fn check_completeness(ctx: &Context, case_id: &str) -> Result<()> {
    let services = ctx.services()?;
    let result = services
        .orchestration
        .check_completeness(&CaseId::new(case_id))
        .await;
    ctx.save()?;
    ctx.format.print(&result?)
}

pub fn new_dataset(
    name: String,
    operation: Operation,
    description: Option<String>,
    created_by: Option<String>,
    tags: Vec<String>,
    difficulty: Option<&str>,
) -> Result<NewDataset> {
    let difficulty = difficulty
        .map(|d| {
            serde_json::from_value::<Difficulty>(serde_json::Value::String(d.to_string()))
                .with_context(|| format!("Unknown difficulty '{d}', expected easy, medium or hard"))
        })
        .transpose()?;

    Ok(NewDataset {
        name,
        description,
        operation: Some(operation),
        metadata: Some(NewDatasetMetadata {
            created_by,
            tags: (!tags.is_empty()).then(|| tags.into_iter().collect()),
            difficulty,
            source_type: None,
        }),
    })
}

pub async fn create_dataset(ctx: &Context, new: NewDataset) -> Result<()> {
    let dataset = ctx.datasets().create_dataset(new).await?;
    ctx.save()?;
    ctx.format.print(&dataset)
}

pub async fn list_datasets(ctx: &Context, filter: &DatasetFilter) -> Result<()> {
    let datasets = ctx.datasets().list_datasets(filter).await?;
    ctx.format.print(&datasets)
}

pub async fn show_dataset(ctx: &Context, id: Uuid) -> Result<()> {
    match ctx.datasets().get_dataset(id).await? {
        Some(dataset) => ctx.format.print(&dataset),
        None => bail!("dataset '{id}' not found"),
    }
}

pub async fn add_example(ctx: &Context, id: Uuid, file: &Path) -> Result<()> {
    let example: NewExample = read_json(file)?;
    let added = ctx.datasets().add_example_to_dataset(id, example).await?;
    ctx.save()?;
    ctx.format.print(&added)
}

pub async fn dataset_examples(ctx: &Context, id: Uuid) -> Result<()> {
    let examples = ctx.datasets().get_dataset_examples(id).await?;
    ctx.format.print(&examples)
}

pub async fn evaluate(
    ctx: &Context,
    operation: Operation,
    output: &Path,
    rubric: Option<&str>,
    reference: Option<&Path>,
) -> Result<()> {
    let produced = std::fs::read_to_string(output)
        .with_context(|| format!("Failed to read {}", output.display()))?;
    let reference = reference
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))
        })
        .transpose()?;

    let services = ctx.services()?;
    let result = services
        .judge
        .evaluate_output(operation, &produced, rubric, reference.as_deref())
        .await;
    ctx.save()?;
    ctx.format.print(&result?)
}

pub async fn models(ctx: &Context) -> Result<()> {
    let services = ctx.services()?;
    let catalog = services.judge.get_available_evaluation_models().await?;
    ctx.format.print(catalog.as_slice())
}
