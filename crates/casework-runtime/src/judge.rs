//! Judge evaluation of produced outputs.
//!
//! A second model call scores an output against a versioned rubric. The
//! reply is decoded strictly; a reply that does not match the rubric is a
//! `JudgeParseError` and never becomes an evaluation.

use casework_core::judge::{overall_score, parse_judge_response};
use casework_core::prompt::JUDGE_RUBRIC;
use casework_core::{
    AiEvaluation, CaseId, EvaluationExample, EvaluationSubject, Operation, RenderedPrompt,
    Rubric, RubricCatalog, TemplateRegistry, ValidationError, Variables, Verdict,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cache::{Catalog, CatalogCache};
use crate::client::{reject_interaction, ModelClient};
use crate::config::{JudgeConfig, ModelConfig};
use crate::store::{commit_keeping_interactions, Store, WriteBatch};
use crate::ServiceError;

const NO_REFERENCE: &str = "None provided";

/// An evaluation model offered by the provider, with its list price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    pub provider: String,

    /// USD per million input tokens
    pub input_per_mtok: f64,

    /// USD per million output tokens
    pub output_per_mtok: f64,
}

/// What to evaluate and how.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub operation: Operation,
    pub produced_output: String,
    pub rubric_version: Option<String>,
    pub reference_context: Option<String>,
    pub case_id: Option<CaseId>,
    pub subject: EvaluationSubject,
}

impl EvaluationRequest {
    pub fn new(operation: Operation, produced_output: impl Into<String>) -> Self {
        Self {
            operation,
            produced_output: produced_output.into(),
            rubric_version: None,
            reference_context: None,
            case_id: None,
            subject: EvaluationSubject::adhoc(),
        }
    }

    pub fn with_rubric(mut self, version: impl Into<String>) -> Self {
        self.rubric_version = Some(version.into());
        self
    }

    pub fn with_reference(mut self, context: impl Into<String>) -> Self {
        self.reference_context = Some(context.into());
        self
    }

    pub fn for_case(mut self, case_id: CaseId) -> Self {
        self.case_id = Some(case_id);
        self
    }

    pub fn with_subject(mut self, subject: EvaluationSubject) -> Self {
        self.subject = subject;
        self
    }
}

/// Aggregate of judging many dataset examples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetEvaluationReport {
    pub dataset_id: Uuid,
    pub rubric_version: String,
    pub evaluated: usize,
    pub passed: usize,
    pub needs_review: usize,
    pub failed: usize,

    /// Mean overall score over successful evaluations
    pub mean_overall_score: Option<f64>,

    pub criteria_means: BTreeMap<String, f64>,

    /// Error message per example that could not be evaluated
    pub failures: BTreeMap<Uuid, String>,

    pub evaluations: Vec<AiEvaluation>,
}

impl DatasetEvaluationReport {
    fn from_results(
        dataset_id: Uuid,
        rubric_version: String,
        results: Vec<(Uuid, Result<AiEvaluation, ServiceError>)>,
    ) -> Self {
        let mut report = Self {
            dataset_id,
            rubric_version,
            ..Default::default()
        };
        let mut criteria_totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();

        for (example_id, result) in results {
            match result {
                Ok(evaluation) => {
                    match evaluation.verdict {
                        Verdict::Pass => report.passed += 1,
                        Verdict::NeedsReview => report.needs_review += 1,
                        Verdict::Fail => report.failed += 1,
                    }
                    for (name, score) in &evaluation.criteria_scores {
                        let entry = criteria_totals.entry(name.clone()).or_insert((0.0, 0));
                        entry.0 += score;
                        entry.1 += 1;
                    }
                    report.evaluations.push(evaluation);
                }
                Err(err) => {
                    report.failures.insert(example_id, err.to_string());
                }
            }
        }

        report.evaluated = report.evaluations.len();
        if report.evaluated > 0 {
            let total: f64 = report.evaluations.iter().map(|e| e.overall_score).sum();
            report.mean_overall_score = Some(round2(total / report.evaluated as f64));
        }
        report.criteria_means = criteria_totals
            .into_iter()
            .map(|(name, (sum, count))| (name, round2(sum / count as f64)))
            .collect();
        report
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Scores outputs with a judge model.
pub struct JudgeEvaluator {
    store: Arc<dyn Store>,
    client: Arc<ModelClient>,
    templates: Arc<TemplateRegistry>,
    rubrics: Arc<RubricCatalog>,
    model: ModelConfig,
    config: JudgeConfig,
    catalog: CatalogCache,
}

impl JudgeEvaluator {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<ModelClient>,
        templates: Arc<TemplateRegistry>,
        rubrics: Arc<RubricCatalog>,
        model: ModelConfig,
        config: JudgeConfig,
    ) -> Self {
        Self {
            store,
            client,
            templates,
            rubrics,
            model,
            config,
            catalog: CatalogCache::default(),
        }
    }

    pub fn with_catalog_cache(mut self, catalog: CatalogCache) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn judge_model(&self) -> &str {
        &self.model.model
    }

    /// Score an ad-hoc output.
    pub async fn evaluate_output(
        &self,
        operation: Operation,
        produced_output: &str,
        rubric_version: Option<&str>,
        reference_context: Option<&str>,
    ) -> Result<AiEvaluation, ServiceError> {
        let mut request = EvaluationRequest::new(operation, produced_output);
        request.rubric_version = rubric_version.map(str::to_string);
        request.reference_context = reference_context.map(str::to_string);
        self.evaluate(request).await
    }

    /// Render, call the judge, decode and persist.
    ///
    /// Exactly one interaction is written per call. The evaluation is written
    /// with it only when the reply decodes against the rubric.
    #[instrument(skip_all, fields(operation = %request.operation, subject = %request.subject.kind))]
    pub async fn evaluate(&self, request: EvaluationRequest) -> Result<AiEvaluation, ServiceError> {
        if request.produced_output.trim().is_empty() {
            return Err(ValidationError::new("producedOutput", "output to evaluate is empty").into());
        }

        let version = request
            .rubric_version
            .as_deref()
            .unwrap_or(&self.config.default_rubric_version);
        let rubric = self.rubrics.get(version)?;
        let prompt = self.render(&request, rubric)?;

        let call = self
            .client
            .invoke_with(&prompt, request.operation, &self.model)
            .await;
        let mut interaction = call.interaction(request.case_id.clone(), request.operation, &prompt);
        let judge_model = call.model_used.clone();

        let response = match call.outcome {
            Ok(response) => response,
            Err(err) => {
                self.store
                    .commit(WriteBatch::new().interaction(interaction))
                    .await?;
                return Err(err.into());
            }
        };

        let scores = match parse_judge_response(&response.content, rubric) {
            Ok(scores) => scores,
            Err(err) => {
                warn!(rubric = %rubric.version, error = %err, "Judge reply rejected");
                reject_interaction(&mut interaction, &err);
                self.store
                    .commit(WriteBatch::new().interaction(interaction))
                    .await?;
                return Err(err.into());
            }
        };

        let overall = overall_score(&scores.scores, rubric);
        let verdict = self.config.bands().verdict(overall);

        let evaluation = AiEvaluation {
            id: Uuid::new_v4(),
            case_id: request.case_id,
            subject: request.subject,
            operation: request.operation,
            judge_model,
            rubric_version: rubric.version.clone(),
            criteria_scores: scores.scores,
            overall_score: overall,
            verdict,
            comments: scores.comments,
            created_at: Utc::now(),
        };

        commit_keeping_interactions(
            self.store.as_ref(),
            WriteBatch::new()
                .interaction(interaction)
                .evaluation(evaluation.clone()),
        )
        .await?;

        info!(
            evaluation_id = %evaluation.id,
            overall_score = overall,
            verdict = %verdict,
            "Evaluation recorded"
        );
        Ok(evaluation)
    }

    /// Score an output produced for a dataset example, using the example's
    /// expected output as reference.
    pub async fn evaluate_example(
        &self,
        dataset_id: Uuid,
        example_id: Uuid,
        produced_output: &str,
        rubric_version: Option<&str>,
    ) -> Result<AiEvaluation, ServiceError> {
        let dataset = self
            .store
            .get_dataset(dataset_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("dataset", dataset_id))?;
        let example = self
            .store
            .dataset_examples(dataset_id)
            .await?
            .into_iter()
            .find(|e| e.id == example_id)
            .ok_or_else(|| ServiceError::not_found("example", example_id))?;

        let mut request = EvaluationRequest::new(dataset.operation, produced_output)
            .with_reference(reference_for(&example))
            .with_subject(EvaluationSubject::new("dataset_example", example_id.to_string()));
        request.rubric_version = rubric_version.map(str::to_string);
        self.evaluate(request).await
    }

    /// Score outputs for many examples of one dataset, at most
    /// `max_concurrency` judge calls at a time. Per-example failures are
    /// reported, not raised.
    pub async fn evaluate_dataset(
        &self,
        dataset_id: Uuid,
        outputs: BTreeMap<Uuid, String>,
        rubric_version: Option<&str>,
    ) -> Result<DatasetEvaluationReport, ServiceError> {
        if self.store.get_dataset(dataset_id).await?.is_none() {
            return Err(ServiceError::not_found("dataset", dataset_id));
        }
        let version = rubric_version.unwrap_or(&self.config.default_rubric_version);
        self.rubrics.get(version)?;

        let results: Vec<(Uuid, Result<AiEvaluation, ServiceError>)> = stream::iter(outputs)
            .map(|(example_id, output)| async move {
                let result = self
                    .evaluate_example(dataset_id, example_id, &output, Some(version))
                    .await;
                (example_id, result)
            })
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let report = DatasetEvaluationReport::from_results(dataset_id, version.to_string(), results);
        info!(
            dataset_id = %dataset_id,
            evaluated = report.evaluated,
            failures = report.failures.len(),
            "Dataset evaluation finished"
        );
        Ok(report)
    }

    /// Models the provider offers for judging. Cached for the catalog TTL;
    /// has no side effects on stored records.
    pub async fn get_available_evaluation_models(&self) -> Result<Catalog, ServiceError> {
        let provider = self.client.provider_name().to_string();
        let load = async {
            let models = self.client.list_models().await?;
            let pricing = self.client.pricing();
            Ok(models
                .into_iter()
                .map(|m| {
                    let price = pricing.price(&m.id);
                    ModelDescriptor {
                        id: m.id,
                        display_name: m.display_name,
                        provider: provider.clone(),
                        input_per_mtok: price.input_per_mtok,
                        output_per_mtok: price.output_per_mtok,
                    }
                })
                .collect())
        };
        Ok(self.catalog.get_or_load(&provider, load).await?)
    }

    pub fn rubric(&self, version: Option<&str>) -> Result<&Rubric, ServiceError> {
        let version = version.unwrap_or(&self.config.default_rubric_version);
        Ok(self.rubrics.get(version)?)
    }

    fn render(&self, request: &EvaluationRequest, rubric: &Rubric) -> Result<RenderedPrompt, ServiceError> {
        let mut variables = Variables::new();
        variables.insert("operation".into(), request.operation.to_string());
        variables.insert("rubric_version".into(), rubric.version.clone());
        variables.insert("scale_max".into(), rubric.scale_max.to_string());
        variables.insert("criteria".into(), rubric.criteria_block());
        variables.insert(
            "reference_context".into(),
            request
                .reference_context
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| NO_REFERENCE.to_string()),
        );
        variables.insert("produced_output".into(), request.produced_output.clone());

        let version = casework_core::prompt::DEFAULT_VERSION;
        Ok(self.templates.render(JUDGE_RUBRIC, version, &variables)?)
    }
}

fn reference_for(example: &EvaluationExample) -> String {
    let mut reference = format!(
        "Input prompt:\n{}\n\nExpected output (quality {}):\n{}",
        example.input.prompt, example.expected_output.quality, example.expected_output.content
    );
    if !example.expected_output.criteria.is_empty() {
        let criteria: Vec<String> = example
            .expected_output
            .criteria
            .iter()
            .map(|(name, score)| format!("{name}: {score}"))
            .collect();
        reference.push_str("\n\nExpected criterion scores: ");
        reference.push_str(&criteria.join(", "));
    }
    reference
}
