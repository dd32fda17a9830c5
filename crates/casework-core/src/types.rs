//! Core types for casework AI artifacts.
//!
//! These mirror the persisted entities: cases are read-only inputs, every
//! other record is append-only once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ValidationError;

/// Identifier of a case owned by the external case repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

impl CaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed set of AI task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GenerateSummary,
    GenerateRecommendation,
    AnalyzeApplication,
    GenerateFinalSummary,
    ValidateCompleteness,
    DetectMissingFields,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::GenerateSummary,
        Operation::GenerateRecommendation,
        Operation::AnalyzeApplication,
        Operation::GenerateFinalSummary,
        Operation::ValidateCompleteness,
        Operation::DetectMissingFields,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GenerateSummary => "generate_summary",
            Operation::GenerateRecommendation => "generate_recommendation",
            Operation::AnalyzeApplication => "analyze_application",
            Operation::GenerateFinalSummary => "generate_final_summary",
            Operation::ValidateCompleteness => "validate_completeness",
            Operation::DetectMissingFields => "detect_missing_fields",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ValidationError::new("operation", format!("unknown operation '{s}'")))
    }
}

/// A tracked administrative matter, as supplied by the case repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: CaseId,

    /// Structured application data submitted for the case
    #[serde(default)]
    pub application_data: serde_json::Value,

    pub status: String,

    #[serde(default)]
    pub current_step: Option<String>,

    #[serde(default)]
    pub assignee: Option<String>,
}

/// Kind of AI summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryType {
    Overall,
    StepSpecific,
}

impl fmt::Display for SummaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryType::Overall => f.write_str("overall"),
            SummaryType::StepSpecific => f.write_str("step-specific"),
        }
    }
}

/// The (case, type, step) triple that summary versions are counted under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryKey {
    pub case_id: CaseId,
    pub summary_type: SummaryType,
    pub step: Option<String>,
}

impl SummaryKey {
    pub fn overall(case_id: CaseId) -> Self {
        Self {
            case_id,
            summary_type: SummaryType::Overall,
            step: None,
        }
    }

    pub fn step(case_id: CaseId, step: impl Into<String>) -> Self {
        Self {
            case_id,
            summary_type: SummaryType::StepSpecific,
            step: Some(step.into()),
        }
    }
}

impl fmt::Display for SummaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(f, "{}/{}/{}", self.case_id, self.summary_type, step),
            None => write!(f, "{}/{}", self.case_id, self.summary_type),
        }
    }
}

/// One versioned AI-generated artifact for a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiSummary {
    pub id: Uuid,
    pub case_id: CaseId,
    pub summary_type: SummaryType,
    pub step: Option<String>,
    pub content: String,
    pub recommendations: Vec<String>,

    /// Model confidence in 0.0 - 1.0
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    pub version: u32,
}

impl AiSummary {
    pub fn key(&self) -> SummaryKey {
        SummaryKey {
            case_id: self.case_id.clone(),
            summary_type: self.summary_type,
            step: self.step.clone(),
        }
    }
}

/// Action tags recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AiSummaryGenerated,
    AiRecommendationGenerated,
    AiSummaryRefreshed,
    AiCompletenessChecked,
}

/// Append-only record of an action taken on a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub case_id: CaseId,
    pub action: AuditAction,
    pub details: serde_json::Value,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

/// Record of one external model invocation, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiInteraction {
    pub id: Uuid,
    pub case_id: Option<CaseId>,
    pub operation: Operation,
    pub prompt: String,
    pub response: Option<String>,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub template_id: String,
    pub template_version: String,
}

impl AiInteraction {
    pub fn tokens_used(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Categorical outcome of a judge evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    NeedsReview,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("pass"),
            Verdict::Fail => f.write_str("fail"),
            Verdict::NeedsReview => f.write_str("needs_review"),
        }
    }
}

/// What a judge evaluation was about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSubject {
    /// e.g. "ai_summary", "dataset_example", "adhoc"
    pub kind: String,
    pub id: Option<String>,
}

impl EvaluationSubject {
    pub fn adhoc() -> Self {
        Self {
            kind: "adhoc".to_string(),
            id: None,
        }
    }

    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id.into()),
        }
    }
}

/// A judge verdict on a produced output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiEvaluation {
    pub id: Uuid,
    pub case_id: Option<CaseId>,
    pub subject: EvaluationSubject,
    pub operation: Operation,
    pub judge_model: String,
    pub rubric_version: String,

    /// Scores keyed by criterion name
    pub criteria_scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    pub verdict: Verdict,
    pub comments: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_round_trips_through_str() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert!("summarize_everything".parse::<Operation>().is_err());
    }

    #[test]
    fn test_operation_serializes_snake_case() {
        let json = serde_json::to_string(&Operation::ValidateCompleteness).unwrap();
        assert_eq!(json, "\"validate_completeness\"");
    }

    #[test]
    fn test_summary_key_display() {
        let key = SummaryKey::step(CaseId::new("c-1"), "intake");
        assert_eq!(key.to_string(), "c-1/step-specific/intake");
        assert_eq!(SummaryKey::overall(CaseId::new("c-1")).to_string(), "c-1/overall");
    }

    #[test]
    fn test_verdict_serialization() {
        let json = serde_json::to_string(&Verdict::NeedsReview).unwrap();
        assert_eq!(json, "\"needs_review\"");
    }
}
