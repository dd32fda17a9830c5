//! # casework-core
//!
//! Deterministic domain model for AI-assisted casework.
//!
//! This crate holds everything about case summaries, evaluation datasets and
//! judge scoring that does not need I/O:
//! - Entity types for summaries, interactions, audit entries and evaluations
//! - The prompt template engine
//! - Dataset statistics, recomputed from the full example set
//! - Rubrics, strict judge-reply decoding, overall scores and verdicts
//!
//! ## Key Guarantees
//!
//! 1. **No network or storage calls**: model calls live in `casework-runtime`
//! 2. **Pure rendering**: same template, version and variables give the same prompt
//! 3. **Fail closed**: judge replies that do not match the rubric are errors
//!
//! ## Example
//!
//! ```rust
//! use casework_core::judge::{overall_score, parse_judge_response, Rubric, VerdictBands};
//!
//! let rubric = Rubric::default_v1();
//! let reply = r#"{"scores": {"faithfulness": 9, "completeness": 8, "relevance": 8, "clarity": 7},
//!                 "comments": "accurate"}"#;
//! let scores = parse_judge_response(reply, &rubric).unwrap();
//! let overall = overall_score(&scores.scores, &rubric);
//! assert_eq!(overall, 8.0);
//! assert_eq!(VerdictBands::default().verdict(overall).to_string(), "pass");
//! ```

pub mod dataset;
pub mod judge;
pub mod prompt;
pub mod summary;
pub mod types;

pub use dataset::{
    DatasetFilter, DatasetMetadata, DatasetStatistics, Difficulty, EvaluationDataset,
    EvaluationExample, ExampleInput, ExampleMetadata, ExpectedOutput, NewDataset,
    NewDatasetMetadata, NewExample, SourceType,
};
pub use judge::{
    JudgeParseError, JudgeScores, Rubric, RubricCatalog, VerdictBands, DEFAULT_RUBRIC_VERSION,
};
pub use prompt::{PromptTemplate, RenderedPrompt, TemplateError, TemplateRegistry, Variables};
pub use summary::{CompletenessReport, ResponseParseError, SummaryDraft};
pub use types::{
    AiEvaluation, AiInteraction, AiSummary, AuditAction, AuditEntry, Case, CaseId,
    EvaluationSubject, Operation, SummaryKey, SummaryType, Verdict,
};

use thiserror::Error;

/// Bad caller input. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}
