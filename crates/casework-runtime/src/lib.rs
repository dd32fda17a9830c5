//! # casework-runtime
//!
//! Async runtime for AI-assisted casework.
//!
//! This crate provides:
//! - LLM provider abstraction (Anthropic, OpenAI-compatible)
//! - A model client with timeouts, retry with backoff, a fallback model and
//!   token/cost accounting
//! - The orchestration service that writes versioned case summaries
//! - Evaluation dataset management and the judge evaluator
//! - Persistence seams and an in-memory transactional store
//!
//! ## Architecture
//!
//! ```text
//!  case id ──► OrchestrationService ──► TemplateRegistry ─► ModelClient ─► LlmProvider
//!                     │                                          │
//!                     └──── KeyedLocks ─── Store::commit(WriteBatch) ◄┘
//!
//!  output ──► JudgeEvaluator ──► judge_rubric prompt ─► ModelClient ─► strict decode ─► AiEvaluation
//! ```
//!
//! Summary, interaction and audit records for one operation are committed
//! in a single batch. Version assignment for a (case, type, step) key runs
//! under a per-key lock.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use casework_runtime::{RuntimeConfig, Services};
//!
//! let services = Services::from_config(RuntimeConfig::default())?;
//! let summary = services.orchestration.generate_overall_summary(&case_id).await?;
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod datasets;
pub mod judge;
pub mod locks;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod services;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ModelCall, ModelClient, ModelError, ModelResponse};
pub use config::{JudgeConfig, ModelConfig, OrchestrationConfig, RuntimeConfig};
pub use datasets::DatasetManager;
pub use judge::{DatasetEvaluationReport, EvaluationRequest, JudgeEvaluator, ModelDescriptor};
pub use locks::KeyedLocks;
pub use orchestrator::OrchestrationService;
pub use providers::{LlmProvider, ProviderError, ProviderRegistry};
pub use resilience::{PricingTable, UsageLedger, UsageSummary};
pub use services::{BuildError, Services, ServicesBuilder};
pub use store::{CaseRepository, MemoryStore, Store, StoreError, StoreSnapshot, WriteBatch};

use casework_core::{
    CaseId, JudgeParseError, Operation, ResponseParseError, TemplateError, ValidationError,
};
use thiserror::Error;

/// How a failure should be presented to whoever called the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or unknown entity; do not retry as-is
    Client,
    /// Model or provider trouble; the request may succeed later
    RetryableServer,
    /// Fails this request; the process keeps running
    Fatal,
}

/// Errors returned by the orchestration, dataset and judge services.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{operation} failed for case {case_id}: {source}")]
    GenerationFailed {
        operation: Operation,
        case_id: CaseId,
        source: ModelError,
    },

    #[error("Model call failed: {0}")]
    Model(#[from] ModelError),

    #[error("Judge reply rejected: {0}")]
    JudgeParse(#[from] JudgeParseError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Malformed {operation} reply: {source}")]
    MalformedResponse {
        operation: Operation,
        source: ResponseParseError,
    },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl ServiceError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ServiceError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Validation(_) | ServiceError::NotFound { .. } => ErrorClass::Client,
            ServiceError::GenerationFailed { .. }
            | ServiceError::Model(_)
            | ServiceError::JudgeParse(_)
            | ServiceError::MalformedResponse { .. } => ErrorClass::RetryableServer,
            ServiceError::Template(_) | ServiceError::Persistence(_) => ErrorClass::Fatal,
        }
    }
}
