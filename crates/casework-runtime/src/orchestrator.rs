//! Orchestration of case-level AI operations.
//!
//! Each operation renders a prompt from the case, calls the model and commits
//! its records in one batch:
//! - success: summary + interaction + audit entry
//! - failed call or unusable reply: the interaction alone, with success=false
//!
//! Version numbers for a (case, type, step) key are assigned under a per-key
//! lock that covers read-max, assign and commit. The model call itself runs
//! outside the lock.

use casework_core::prompt::{COMPLETENESS_CHECK, OVERALL_SUMMARY, STEP_RECOMMENDATION};
use casework_core::summary::{parse_completeness_reply, parse_summary_reply};
use casework_core::{
    AiInteraction, AiSummary, AuditAction, AuditEntry, Case, CaseId, CompletenessReport,
    Operation, RenderedPrompt, SummaryKey, TemplateRegistry, ValidationError, Variables,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{reject_interaction, ModelClient, ModelCall, ModelResponse};
use crate::config::OrchestrationConfig;
use crate::locks::KeyedLocks;
use crate::store::{commit_keeping_interactions, CaseRepository, Store, WriteBatch};
use crate::ServiceError;

const NONE_RECORDED: &str = "None recorded";

/// What a summary request produces and how it is audited.
#[derive(Debug, Clone, Copy)]
enum SummaryIntent {
    Overall,
    Refresh,
    Step,
}

impl SummaryIntent {
    fn operation(self) -> Operation {
        match self {
            SummaryIntent::Overall | SummaryIntent::Refresh => Operation::GenerateSummary,
            SummaryIntent::Step => Operation::GenerateRecommendation,
        }
    }

    fn template(self) -> &'static str {
        match self {
            SummaryIntent::Overall | SummaryIntent::Refresh => OVERALL_SUMMARY,
            SummaryIntent::Step => STEP_RECOMMENDATION,
        }
    }

    fn action(self) -> AuditAction {
        match self {
            SummaryIntent::Overall => AuditAction::AiSummaryGenerated,
            SummaryIntent::Refresh => AuditAction::AiSummaryRefreshed,
            SummaryIntent::Step => AuditAction::AiRecommendationGenerated,
        }
    }
}

/// Turns case-level intents into persisted, versioned AI artifacts.
pub struct OrchestrationService {
    cases: Arc<dyn CaseRepository>,
    store: Arc<dyn Store>,
    client: Arc<ModelClient>,
    templates: Arc<TemplateRegistry>,
    config: OrchestrationConfig,
    locks: KeyedLocks<SummaryKey>,
}

impl OrchestrationService {
    pub fn new(
        cases: Arc<dyn CaseRepository>,
        store: Arc<dyn Store>,
        client: Arc<ModelClient>,
        templates: Arc<TemplateRegistry>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            cases,
            store,
            client,
            templates,
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// Generate a new version of the case's overall summary.
    pub async fn generate_overall_summary(
        &self,
        case_id: &CaseId,
    ) -> Result<AiSummary, ServiceError> {
        let case = self.load_case(case_id).await?;
        self.summarize(&case, SummaryKey::overall(case_id.clone()), SummaryIntent::Overall)
            .await
    }

    /// Generate a new version of the recommendation for one workflow step.
    pub async fn generate_step_recommendation(
        &self,
        case_id: &CaseId,
        step: &str,
    ) -> Result<AiSummary, ServiceError> {
        let step = step.trim();
        if step.is_empty() {
            return Err(ValidationError::new("step", "step is required").into());
        }
        let case = self.load_case(case_id).await?;
        self.summarize(
            &case,
            SummaryKey::step(case_id.clone(), step),
            SummaryIntent::Step,
        )
        .await
    }

    /// Regenerate the overall summary. Always appends a new version; earlier
    /// versions stay as they are. Not idempotent: two calls give two versions.
    pub async fn refresh_summary(&self, case_id: &CaseId) -> Result<AiSummary, ServiceError> {
        let case = self.load_case(case_id).await?;
        self.summarize(&case, SummaryKey::overall(case_id.clone()), SummaryIntent::Refresh)
            .await
    }

    /// Ask the model which required fields are missing from the application.
    pub async fn check_completeness(
        &self,
        case_id: &CaseId,
    ) -> Result<CompletenessReport, ServiceError> {
        let operation = Operation::ValidateCompleteness;
        let case = self.load_case(case_id).await?;

        let mut variables = case_variables(&case);
        variables.insert("current_step".into(), or_placeholder(&case.current_step, "not set"));
        let prompt = self.render(COMPLETENESS_CHECK, &variables)?;

        let call = self.client.invoke(&prompt, operation).await;
        let (response, mut interaction) = self.completed(case_id, operation, &prompt, call).await?;

        let report = match parse_completeness_reply(&response.content) {
            Ok(report) => report,
            Err(source) => {
                warn!(case_id = %case_id, error = %source, "Unusable completeness reply");
                reject_interaction(&mut interaction, &source);
                self.store
                    .commit(WriteBatch::new().interaction(interaction))
                    .await?;
                return Err(ServiceError::MalformedResponse { operation, source });
            }
        };

        let audit = self.audit(
            case_id,
            AuditAction::AiCompletenessChecked,
            json!({
                "complete": report.complete,
                "missingFields": report.missing_fields,
                "interactionId": interaction.id,
                "model": interaction.model,
            }),
        );
        commit_keeping_interactions(
            self.store.as_ref(),
            WriteBatch::new().interaction(interaction).audit(audit),
        )
        .await?;

        info!(
            case_id = %case_id,
            complete = report.complete,
            missing = report.missing_fields.len(),
            "Completeness check recorded"
        );
        Ok(report)
    }

    /// Every version for the key, oldest first.
    pub async fn summary_history(&self, key: &SummaryKey) -> Result<Vec<AiSummary>, ServiceError> {
        Ok(self.store.summaries(key).await?)
    }

    pub async fn latest_summary(&self, key: &SummaryKey) -> Result<Option<AiSummary>, ServiceError> {
        Ok(self.store.summaries(key).await?.pop())
    }

    pub async fn audit_trail(&self, case_id: &CaseId) -> Result<Vec<AuditEntry>, ServiceError> {
        Ok(self.store.audit_entries(case_id).await?)
    }

    pub async fn interactions(&self, case_id: &CaseId) -> Result<Vec<AiInteraction>, ServiceError> {
        Ok(self.store.interactions(Some(case_id)).await?)
    }

    async fn load_case(&self, case_id: &CaseId) -> Result<Case, ServiceError> {
        self.cases
            .get_case(case_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("case", case_id))
    }

    fn render(&self, template: &str, variables: &Variables) -> Result<RenderedPrompt, ServiceError> {
        Ok(self
            .templates
            .render(template, &self.config.template_version, variables)?)
    }

    /// Split a call into its response and interaction. A failed call is
    /// logged and turned into `GenerationFailed`.
    async fn completed(
        &self,
        case_id: &CaseId,
        operation: Operation,
        prompt: &RenderedPrompt,
        call: ModelCall,
    ) -> Result<(ModelResponse, AiInteraction), ServiceError> {
        let interaction = call.interaction(Some(case_id.clone()), operation, prompt);
        match call.outcome {
            Ok(response) => Ok((response, interaction)),
            Err(source) => {
                self.store
                    .commit(WriteBatch::new().interaction(interaction))
                    .await?;
                Err(ServiceError::GenerationFailed {
                    operation,
                    case_id: case_id.clone(),
                    source,
                })
            }
        }
    }

    async fn summarize(
        &self,
        case: &Case,
        key: SummaryKey,
        intent: SummaryIntent,
    ) -> Result<AiSummary, ServiceError> {
        let operation = intent.operation();
        let case_id = &case.id;

        let mut variables = case_variables(case);
        match &key.step {
            Some(step) => {
                variables.insert("step".into(), step.clone());
                variables.insert("prior_recommendations".into(), self.prior_recommendations(case_id).await?);
            }
            None => {
                variables.insert("current_step".into(), or_placeholder(&case.current_step, "not set"));
            }
        }
        let prompt = self.render(intent.template(), &variables)?;

        let call = self.client.invoke(&prompt, operation).await;
        let used_fallback = call.used_fallback;
        let (response, mut interaction) = self.completed(case_id, operation, &prompt, call).await?;

        let draft = match parse_summary_reply(&response.content) {
            Ok(draft) => draft,
            Err(source) => {
                warn!(case_id = %case_id, operation = %operation, error = %source, "Unusable summary reply");
                reject_interaction(&mut interaction, &source);
                self.store
                    .commit(WriteBatch::new().interaction(interaction))
                    .await?;
                return Err(ServiceError::MalformedResponse { operation, source });
            }
        };
        if !draft.structured {
            warn!(
                case_id = %case_id,
                operation = %operation,
                "Summary reply was not JSON, keeping it as plain text"
            );
        }

        let _guard = self.locks.lock(key.clone()).await;
        debug!(key = %key, "Acquired summary version lock");

        let previous = self.store.max_summary_version(&key).await?;
        let version = previous.unwrap_or(0) + 1;

        let summary = AiSummary {
            id: Uuid::new_v4(),
            case_id: case_id.clone(),
            summary_type: key.summary_type,
            step: key.step.clone(),
            content: draft.content,
            recommendations: draft.recommendations,
            confidence: draft.confidence,
            generated_at: Utc::now(),
            version,
        };

        let mut details = json!({
            "summaryId": summary.id,
            "summaryType": summary.summary_type,
            "step": summary.step,
            "version": version,
            "interactionId": interaction.id,
            "model": interaction.model,
            "usedFallback": used_fallback,
            "tokensUsed": interaction.tokens_used(),
            "costUsd": interaction.cost_usd,
        });
        if let (SummaryIntent::Refresh, Some(previous)) = (intent, previous) {
            details["previousVersion"] = json!(previous);
        }
        let audit = self.audit(case_id, intent.action(), details);

        commit_keeping_interactions(
            self.store.as_ref(),
            WriteBatch::new()
                .summary(summary.clone())
                .interaction(interaction)
                .audit(audit),
        )
        .await?;

        info!(
            case_id = %case_id,
            operation = %operation,
            summary_type = %key.summary_type,
            version,
            "Summary version recorded"
        );
        Ok(summary)
    }

    async fn prior_recommendations(&self, case_id: &CaseId) -> Result<String, ServiceError> {
        let latest = self
            .store
            .summaries(&SummaryKey::overall(case_id.clone()))
            .await?
            .pop();

        Ok(match latest {
            Some(summary) if !summary.recommendations.is_empty() => summary
                .recommendations
                .iter()
                .map(|r| format!("- {r}"))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => NONE_RECORDED.to_string(),
        })
    }

    fn audit(&self, case_id: &CaseId, action: AuditAction, details: serde_json::Value) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            case_id: case_id.clone(),
            action,
            details,
            actor: self.config.actor.clone(),
            timestamp: Utc::now(),
        }
    }
}

fn or_placeholder(value: &Option<String>, placeholder: &str) -> String {
    value.clone().unwrap_or_else(|| placeholder.to_string())
}

/// Variables shared by every case template.
fn case_variables(case: &Case) -> Variables {
    let application_data = serde_json::to_string_pretty(&case.application_data)
        .unwrap_or_else(|_| case.application_data.to_string());

    let mut variables = Variables::new();
    variables.insert("case_id".into(), case.id.to_string());
    variables.insert("status".into(), case.status.clone());
    variables.insert("assignee".into(), or_placeholder(&case.assignee, "unassigned"));
    variables.insert("application_data".into(), application_data);
    variables
}
