//! Explicit wiring of the AI services.
//!
//! Everything is constructed once, at process start, and handed out by
//! reference. There is no global container; tests build their own.

use casework_core::{RubricCatalog, TemplateRegistry, ValidationError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::cache::CatalogCache;
use crate::client::ModelClient;
use crate::config::RuntimeConfig;
use crate::datasets::DatasetManager;
use crate::judge::JudgeEvaluator;
use crate::orchestrator::OrchestrationService;
use crate::providers::{LlmProvider, ProviderError, ProviderRegistry};
use crate::resilience::PricingTable;
use crate::store::{CaseRepository, MemoryStore, Store};

/// Errors from assembling the services.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No model provider set")]
    MissingProvider,

    #[error("A store was set without a case repository")]
    MissingCases,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),
}

/// The AI subsystem, ready to use.
pub struct Services {
    pub orchestration: Arc<OrchestrationService>,
    pub datasets: Arc<DatasetManager>,
    pub judge: Arc<JudgeEvaluator>,
    pub client: Arc<ModelClient>,
    pub store: Arc<dyn Store>,
    pub config: RuntimeConfig,
}

impl Services {
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::new()
    }

    /// Build with the provider named in `config.model.provider` and an
    /// empty in-memory store.
    pub fn from_config(config: RuntimeConfig) -> Result<Self, BuildError> {
        let store = Arc::new(MemoryStore::new());
        Self::from_config_with_store(config, store.clone(), store)
    }

    pub fn from_config_with_store(
        config: RuntimeConfig,
        store: Arc<dyn Store>,
        cases: Arc<dyn CaseRepository>,
    ) -> Result<Self, BuildError> {
        let registry = ProviderRegistry::with_defaults();
        let provider = registry.create(&config.model.provider, &config.model.provider_settings())?;

        ServicesBuilder::new()
            .provider(provider)
            .store(store)
            .cases(cases)
            .config(config)
            .build()
    }
}

/// Builder for [`Services`].
pub struct ServicesBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    store: Option<Arc<dyn Store>>,
    cases: Option<Arc<dyn CaseRepository>>,
    config: RuntimeConfig,
    templates: TemplateRegistry,
    rubrics: RubricCatalog,
}

impl ServicesBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            store: None,
            cases: None,
            config: RuntimeConfig::default(),
            templates: TemplateRegistry::with_builtins(),
            rubrics: RubricCatalog::with_builtins(),
        }
    }

    /// Set the LLM provider.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Case lookups. Required when a store is set; otherwise an in-memory
    /// store serves both.
    pub fn cases(mut self, cases: Arc<dyn CaseRepository>) -> Self {
        self.cases = Some(cases);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the template registry, e.g. to add template versions.
    pub fn templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn rubrics(mut self, rubrics: RubricCatalog) -> Self {
        self.rubrics = rubrics;
        self
    }

    pub fn build(self) -> Result<Services, BuildError> {
        self.config.validate()?;
        let provider = self.provider.ok_or(BuildError::MissingProvider)?;

        let (store, cases): (Arc<dyn Store>, Arc<dyn CaseRepository>) =
            match (self.store, self.cases) {
                (Some(store), Some(cases)) => (store, cases),
                (Some(_), None) => return Err(BuildError::MissingCases),
                (None, Some(cases)) => {
                    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
                    (store, cases)
                }
                (None, None) => {
                    let memory = Arc::new(MemoryStore::new());
                    let cases: Arc<dyn CaseRepository> = memory.clone();
                    let store: Arc<dyn Store> = memory;
                    (store, cases)
                }
            };

        let config = self.config;
        let pricing = PricingTable::default().with_overrides(&config.pricing);
        let client = Arc::new(ModelClient::new(provider, config.model.clone()).with_pricing(pricing));
        let templates = Arc::new(self.templates);
        let rubrics = Arc::new(self.rubrics);

        let orchestration = Arc::new(OrchestrationService::new(
            cases,
            store.clone(),
            client.clone(),
            templates.clone(),
            config.orchestration.clone(),
        ));
        let datasets = Arc::new(DatasetManager::new(store.clone()));
        let judge = Arc::new(
            JudgeEvaluator::new(
                store.clone(),
                client.clone(),
                templates,
                rubrics,
                config.judge_model(),
                config.judge.clone(),
            )
            .with_catalog_cache(CatalogCache::new(config.catalog_ttl)),
        );

        info!(
            provider = client.provider_name(),
            model = %config.model.model,
            judge_model = judge.judge_model(),
            "AI services ready"
        );

        Ok(Services {
            orchestration,
            datasets,
            judge,
            client,
            store,
            config,
        })
    }
}

impl Default for ServicesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use casework_core::{Case, CaseId, NewDataset, Operation};
    use serde_json::json;

    const SUMMARY: &str = r#"{"summary": "Complete application.", "recommendations": ["Approve"], "confidence": 0.9}"#;

    #[test]
    fn test_build_requires_provider() {
        assert!(matches!(
            ServicesBuilder::new().build(),
            Err(BuildError::MissingProvider)
        ));
    }

    #[test]
    fn test_build_validates_config() {
        let mut config = RuntimeConfig::default();
        config.judge.max_concurrency = 0;
        let result = ServicesBuilder::new()
            .provider(Arc::new(ScriptedProvider::new()))
            .config(config)
            .build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }

    #[test]
    fn test_unknown_provider_type() {
        let mut config = RuntimeConfig::default();
        config.model.provider = "carrier-pigeon".to_string();
        assert!(matches!(
            Services::from_config(config),
            Err(BuildError::Provider(ProviderError::NotConfigured(_)))
        ));
    }

    #[tokio::test]
    async fn test_services_share_one_store() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert_case(Case {
            id: CaseId::new("c-1"),
            application_data: json!({"applicant": "J. Okafor"}),
            status: "submitted".to_string(),
            current_step: None,
            assignee: None,
        });

        let mut config = RuntimeConfig::default();
        config.judge.model = Some("judge-model".to_string());

        let services = Services::builder()
            .provider(Arc::new(ScriptedProvider::new().always(SUMMARY)))
            .store(memory.clone())
            .cases(memory.clone())
            .config(config)
            .build()
            .unwrap();

        assert_eq!(services.judge.judge_model(), "judge-model");

        services
            .orchestration
            .generate_overall_summary(&CaseId::new("c-1"))
            .await
            .unwrap();
        services
            .datasets
            .create_dataset(NewDataset::new("Summary Dataset", Operation::GenerateSummary))
            .await
            .unwrap();

        let snapshot = memory.snapshot();
        assert_eq!(snapshot.summaries.len(), 1);
        assert_eq!(snapshot.datasets.len(), 1);
        assert_eq!(services.client.usage().total.calls, 1);
    }
}
