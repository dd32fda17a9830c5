//! Prompt template engine.
//!
//! Rendering is a pure function of `(template id, version, variables)`. Every
//! placeholder must be supplied; nothing is defaulted.

mod templates;

pub use templates::{
    COMPLETENESS_CHECK, DEFAULT_VERSION, JUDGE_RUBRIC, OVERALL_SUMMARY, STEP_RECOMMENDATION,
};

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

lazy_static! {
    /// `{{ name }}` placeholder
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap();
}

/// Named values substituted into a template.
pub type Variables = BTreeMap<String, String>;

/// Errors from template rendering.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Template not found: {id}@{version}")]
    NotFound { id: String, version: String },

    #[error("Template {id}@{version} requires variable '{name}'")]
    MissingVariable {
        id: String,
        version: String,
        name: String,
    },
}

/// A versioned prompt template with system and user parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub version: String,
    pub system: String,
    pub user: String,
}

impl PromptTemplate {
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            system: system.into(),
            user: user.into(),
        }
    }

    /// Placeholder names in order of first appearance (system, then user).
    pub fn placeholders(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for text in [&self.system, &self.user] {
            for caps in PLACEHOLDER.captures_iter(text) {
                let name = caps[1].to_string();
                if seen.insert(name.clone()) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// A rendered prompt, echoing the template that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    pub template_id: String,
    pub template_version: String,
    pub system: String,
    pub user: String,
}

impl RenderedPrompt {
    /// Both parts joined, as stored in interaction logs.
    pub fn full_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

/// Registry of templates keyed by id and version.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<(String, String), PromptTemplate>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in `v1` templates.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(PromptTemplate::new(
            OVERALL_SUMMARY,
            DEFAULT_VERSION,
            templates::CASE_ASSISTANT_SYSTEM_V1.trim(),
            templates::OVERALL_SUMMARY_USER_V1.trim(),
        ));
        registry.register(PromptTemplate::new(
            STEP_RECOMMENDATION,
            DEFAULT_VERSION,
            templates::CASE_ASSISTANT_SYSTEM_V1.trim(),
            templates::STEP_RECOMMENDATION_USER_V1.trim(),
        ));
        registry.register(PromptTemplate::new(
            COMPLETENESS_CHECK,
            DEFAULT_VERSION,
            templates::COMPLETENESS_SYSTEM_V1.trim(),
            templates::COMPLETENESS_USER_V1.trim(),
        ));
        registry.register(PromptTemplate::new(
            JUDGE_RUBRIC,
            DEFAULT_VERSION,
            templates::JUDGE_SYSTEM_V1.trim(),
            templates::JUDGE_USER_V1.trim(),
        ));
        registry
    }

    /// Register a template. Replaces any template with the same id and version.
    pub fn register(&mut self, template: PromptTemplate) {
        self.templates
            .insert((template.id.clone(), template.version.clone()), template);
    }

    pub fn get(&self, id: &str, version: &str) -> Result<&PromptTemplate, TemplateError> {
        self.templates
            .get(&(id.to_string(), version.to_string()))
            .ok_or_else(|| TemplateError::NotFound {
                id: id.to_string(),
                version: version.to_string(),
            })
    }

    /// Versions registered for a template id, sorted.
    pub fn versions(&self, id: &str) -> Vec<&str> {
        self.templates
            .keys()
            .filter(|(tid, _)| tid == id)
            .map(|(_, version)| version.as_str())
            .collect()
    }

    pub fn required_variables(&self, id: &str, version: &str) -> Result<Vec<String>, TemplateError> {
        Ok(self.get(id, version)?.placeholders())
    }

    /// Render a template. Fails on the first placeholder without a value.
    pub fn render(
        &self,
        id: &str,
        version: &str,
        variables: &Variables,
    ) -> Result<RenderedPrompt, TemplateError> {
        let template = self.get(id, version)?;

        if let Some(missing) = template
            .placeholders()
            .into_iter()
            .find(|name| !variables.contains_key(name))
        {
            return Err(TemplateError::MissingVariable {
                id: id.to_string(),
                version: version.to_string(),
                name: missing,
            });
        }

        tracing::debug!(template = id, version, "Rendering prompt template");

        Ok(RenderedPrompt {
            template_id: template.id.clone(),
            template_version: template.version.clone(),
            system: substitute(&template.system, variables),
            user: substitute(&template.user, variables),
        })
    }
}

fn substitute(text: &str, variables: &Variables) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            variables.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
