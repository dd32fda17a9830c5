//! Parsing of summary and completeness replies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::judge::{extract_json_object, JudgeParseError};

/// Confidence assigned to replies that arrive as plain text.
pub const UNSTRUCTURED_CONFIDENCE: f64 = 0.5;

/// Errors from decoding a model reply.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponseParseError {
    #[error("Model reply was empty")]
    Empty,

    #[error("Model reply is not a valid {expected}: {message}")]
    Malformed {
        expected: &'static str,
        message: String,
    },
}

/// Summary content extracted from a model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDraft {
    pub content: String,
    pub recommendations: Vec<String>,
    pub confidence: f64,

    /// False when the reply was not the requested JSON shape
    pub structured: bool,
}

#[derive(Deserialize)]
struct SummaryReply {
    summary: String,
    #[serde(default)]
    recommendations: Vec<String>,
    confidence: Option<f64>,
}

/// Parse a summary reply. JSON replies are used as-is; anything else is kept
/// as plain text with bullet lines lifted into recommendations.
pub fn parse_summary_reply(text: &str) -> Result<SummaryDraft, ResponseParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ResponseParseError::Empty);
    }

    if let Ok(value) = extract_json_object(trimmed) {
        if let Ok(reply) = serde_json::from_value::<SummaryReply>(value) {
            let confidence = reply
                .confidence
                .filter(|c| c.is_finite())
                .unwrap_or(UNSTRUCTURED_CONFIDENCE)
                .clamp(0.0, 1.0);
            return Ok(SummaryDraft {
                content: reply.summary.trim().to_string(),
                recommendations: reply
                    .recommendations
                    .into_iter()
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect(),
                confidence,
                structured: true,
            });
        }
    }

    let recommendations = trimmed
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            line.strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .map(|r| r.trim().to_string())
        })
        .filter(|r| !r.is_empty())
        .collect();

    Ok(SummaryDraft {
        content: trimmed.to_string(),
        recommendations,
        confidence: UNSTRUCTURED_CONFIDENCE,
        structured: false,
    })
}

/// Result of a completeness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompletenessReport {
    pub complete: bool,

    #[serde(default)]
    pub missing_fields: Vec<String>,

    #[serde(default)]
    pub notes: String,
}

/// Parse a completeness reply. Strict: the JSON shape must match.
pub fn parse_completeness_reply(text: &str) -> Result<CompletenessReport, ResponseParseError> {
    if text.trim().is_empty() {
        return Err(ResponseParseError::Empty);
    }

    let value = extract_json_object(text).map_err(|e| ResponseParseError::Malformed {
        expected: "completeness report",
        message: match e {
            JudgeParseError::NoJson => "no JSON object found".to_string(),
            other => other.to_string(),
        },
    })?;

    let report: CompletenessReport =
        serde_json::from_value(value).map_err(|e| ResponseParseError::Malformed {
            expected: "completeness report",
            message: e.to_string(),
        })?;

    if report.complete && !report.missing_fields.is_empty() {
        return Err(ResponseParseError::Malformed {
            expected: "completeness report",
            message: "reported complete but listed missing fields".to_string(),
        });
    }

    Ok(report)
}
