//! Strict decoding of judge replies.
//!
//! The reply must contain a JSON object that validates against a schema
//! generated from the rubric. Partial matches are rejected, never defaulted.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use thiserror::Error;

use super::Rubric;

/// Errors from decoding a judge reply.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JudgeParseError {
    #[error("No JSON object found in judge reply")]
    NoJson,

    #[error("Invalid JSON in judge reply: {0}")]
    InvalidJson(String),

    #[error("Judge reply does not match rubric {rubric}: {}", .errors.join("; "))]
    SchemaMismatch { rubric: String, errors: Vec<String> },

    #[error("Failed to build schema for rubric {rubric}: {message}")]
    Schema { rubric: String, message: String },
}

/// Decoded per-criterion scores and comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JudgeScores {
    pub scores: BTreeMap<String, f64>,
    pub comments: String,
}

/// JSON Schema a judge reply must satisfy for this rubric.
pub fn reply_schema(rubric: &Rubric) -> JsonValue {
    let properties: serde_json::Map<String, JsonValue> = rubric
        .criteria
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                json!({"type": "number", "minimum": 0, "maximum": rubric.scale_max}),
            )
        })
        .collect();

    json!({
        "type": "object",
        "required": ["scores", "comments"],
        "additionalProperties": false,
        "properties": {
            "scores": {
                "type": "object",
                "required": rubric.criterion_names(),
                "additionalProperties": false,
                "properties": properties,
            },
            "comments": {"type": "string"}
        }
    })
}

/// Parse a raw judge reply against a rubric.
pub fn parse_judge_response(text: &str, rubric: &Rubric) -> Result<JudgeScores, JudgeParseError> {
    let value = extract_json_object(text)?;

    let schema = reply_schema(rubric);
    let validator = jsonschema::options()
        .build(&schema)
        .map_err(|e| JudgeParseError::Schema {
            rubric: rubric.version.clone(),
            message: e.to_string(),
        })?;

    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if !errors.is_empty() {
        return Err(JudgeParseError::SchemaMismatch {
            rubric: rubric.version.clone(),
            errors,
        });
    }

    serde_json::from_value(value).map_err(|e| JudgeParseError::InvalidJson(e.to_string()))
}

/// Locate the first JSON object in free text (models sometimes wrap replies
/// in prose or code fences).
pub(crate) fn extract_json_object(text: &str) -> Result<JsonValue, JudgeParseError> {
    let start = text.find('{').ok_or(JudgeParseError::NoJson)?;

    let value = serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<JsonValue>()
        .next()
        .ok_or(JudgeParseError::NoJson)?
        .map_err(|e| JudgeParseError::InvalidJson(e.to_string()))?;

    if !value.is_object() {
        return Err(JudgeParseError::NoJson);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rubric() -> Rubric {
        Rubric::default_v1()
    }

    const VALID: &str = r#"{"scores": {"faithfulness": 9, "completeness": 8, "relevance": 8, "clarity": 7}, "comments": "solid"}"#;

    #[test]
    fn test_parses_valid_reply() {
        let scores = parse_judge_response(VALID, &rubric()).unwrap();
        assert_eq!(scores.scores["faithfulness"], 9.0);
        assert_eq!(scores.comments, "solid");
    }

    #[test]
    fn test_tolerates_surrounding_prose_and_fences() {
        let text = format!("Here are my scores:\n```json\n{VALID}\n```\nThanks.");
        let scores = parse_judge_response(&text, &rubric()).unwrap();
        assert_eq!(scores.scores.len(), 4);
    }

    #[test]
    fn test_missing_criterion_fails_closed() {
        let text = r#"{"scores": {"faithfulness": 9, "completeness": 8, "relevance": 8}, "comments": ""}"#;
        let err = parse_judge_response(text, &rubric()).unwrap_err();
        match err {
            JudgeParseError::SchemaMismatch { errors, .. } => {
                assert!(errors.iter().any(|e| e.contains("clarity")));
            }
            other => panic!("Expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_criterion_rejected() {
        let text = r#"{"scores": {"faithfulness": 9, "completeness": 8, "relevance": 8, "clarity": 7, "tone": 5}, "comments": ""}"#;
        assert!(matches!(
            parse_judge_response(text, &rubric()),
            Err(JudgeParseError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_out_of_scale_and_non_numeric_rejected() {
        let too_high = r#"{"scores": {"faithfulness": 11, "completeness": 8, "relevance": 8, "clarity": 7}, "comments": ""}"#;
        assert!(parse_judge_response(too_high, &rubric()).is_err());

        let textual = r#"{"scores": {"faithfulness": "high", "completeness": 8, "relevance": 8, "clarity": 7}, "comments": ""}"#;
        assert!(parse_judge_response(textual, &rubric()).is_err());
    }

    #[test]
    fn test_missing_comments_rejected() {
        let text = r#"{"scores": {"faithfulness": 9, "completeness": 8, "relevance": 8, "clarity": 7}}"#;
        assert!(matches!(
            parse_judge_response(text, &rubric()),
            Err(JudgeParseError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_no_json() {
        assert_eq!(
            parse_judge_response("I think it is good.", &rubric()),
            Err(JudgeParseError::NoJson)
        );
        assert!(matches!(
            parse_judge_response("{not json", &rubric()),
            Err(JudgeParseError::InvalidJson(_))
        ));
    }
}
