//! Rubrics, strict judge-response decoding and scoring.
//!
//! The judge model produces per-criterion scores. Everything after the model
//! call is deterministic: decoding fails closed, the overall score is a
//! weighted mean in rubric order and the verdict is a fixed banding.

mod parser;
mod scoring;

pub(crate) use parser::extract_json_object;
pub use parser::{parse_judge_response, reply_schema, JudgeParseError, JudgeScores};
pub use scoring::{overall_score, VerdictBands};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ValidationError;

/// Version tag of the built-in rubric.
pub const DEFAULT_RUBRIC_VERSION: &str = "v1";

/// One named scoring criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub description: String,

    /// Relative weight in the overall score
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Criterion {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            weight: 1.0,
        }
    }
}

/// A named, versioned set of scoring criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub version: String,
    pub criteria: Vec<Criterion>,

    /// Top of the score scale (bottom is 0)
    pub scale_max: f64,
}

impl Rubric {
    /// The default casework rubric.
    pub fn default_v1() -> Self {
        Self {
            version: DEFAULT_RUBRIC_VERSION.to_string(),
            criteria: vec![
                Criterion::new(
                    "faithfulness",
                    "Every statement is supported by the case data or reference; nothing is invented.",
                ),
                Criterion::new(
                    "completeness",
                    "All material facts, open issues and required next steps are covered.",
                ),
                Criterion::new(
                    "relevance",
                    "Content addresses the requested operation and the case's current step.",
                ),
                Criterion::new(
                    "clarity",
                    "A caseworker can read and act on the output without rework.",
                ),
            ],
            scale_max: 10.0,
        }
    }

    pub fn criterion_names(&self) -> Vec<&str> {
        self.criteria.iter().map(|c| c.name.as_str()).collect()
    }

    /// Criteria formatted for the judge prompt.
    pub fn criteria_block(&self) -> String {
        self.criteria
            .iter()
            .map(|c| format!("- {} (weight {}): {}", c.name, c.weight, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.criteria.is_empty() {
            return Err(ValidationError::new("criteria", "rubric needs at least one criterion"));
        }
        if !(self.scale_max.is_finite() && self.scale_max > 0.0) {
            return Err(ValidationError::new("scaleMax", "scale must be positive"));
        }
        for criterion in &self.criteria {
            if criterion.name.trim().is_empty() {
                return Err(ValidationError::new("criteria.name", "criterion name is required"));
            }
            if !(criterion.weight.is_finite() && criterion.weight >= 0.0) {
                return Err(ValidationError::new(
                    format!("criteria.{}.weight", criterion.name),
                    "weight must be non-negative",
                ));
            }
        }
        let mut names = self.criterion_names();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.criteria.len() {
            return Err(ValidationError::new("criteria", "criterion names must be unique"));
        }
        Ok(())
    }
}

/// Rubrics keyed by version.
#[derive(Debug, Clone, Default)]
pub struct RubricCatalog {
    rubrics: BTreeMap<String, Rubric>,
}

impl RubricCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.rubrics.insert(
            DEFAULT_RUBRIC_VERSION.to_string(),
            Rubric::default_v1(),
        );
        catalog
    }

    /// Add or replace a rubric after validating it.
    pub fn register(&mut self, rubric: Rubric) -> Result<(), ValidationError> {
        rubric.validate()?;
        self.rubrics.insert(rubric.version.clone(), rubric);
        Ok(())
    }

    pub fn get(&self, version: &str) -> Result<&Rubric, ValidationError> {
        self.rubrics.get(version).ok_or_else(|| {
            ValidationError::new("rubricVersion", format!("unknown rubric version '{version}'"))
        })
    }

    pub fn versions(&self) -> Vec<&str> {
        self.rubrics.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rubric_is_valid() {
        let rubric = Rubric::default_v1();
        assert!(rubric.validate().is_ok());
        assert_eq!(
            rubric.criterion_names(),
            vec!["faithfulness", "completeness", "relevance", "clarity"]
        );
        assert!(rubric.criteria_block().contains("- clarity (weight 1)"));
    }

    #[test]
    fn test_catalog_rejects_duplicate_criteria() {
        let mut catalog = RubricCatalog::with_builtins();
        let rubric = Rubric {
            version: "dup".to_string(),
            criteria: vec![Criterion::new("a", "x"), Criterion::new("a", "y")],
            scale_max: 5.0,
        };
        assert!(catalog.register(rubric).is_err());
        assert!(catalog.get("dup").is_err());
        assert_eq!(catalog.versions(), vec!["v1"]);
    }

    #[test]
    fn test_unknown_version() {
        let catalog = RubricCatalog::with_builtins();
        let err = catalog.get("v7").unwrap_err();
        assert_eq!(err.field, "rubricVersion");
    }
}
