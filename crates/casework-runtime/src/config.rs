//! Runtime configuration.
//!
//! Every field has a default, so an empty YAML document is a valid config.
//! Durations are written the human way (`"30s"`, `"250ms"`, `"5m"`).
//!
//! ```yaml
//! model:
//!   provider: anthropic
//!   model: claude-sonnet-4-5
//!   timeout: 30s
//!   deadline: 2m
//!   retry_attempts: 3
//!   fallback_model: claude-haiku-4-5
//! judge:
//!   model: claude-opus-4-1
//!   pass_threshold: 7.0
//!   review_threshold: 5.0
//! orchestration:
//!   actor: ai-service
//! ```

use casework_core::judge::{VerdictBands, DEFAULT_RUBRIC_VERSION};
use casework_core::prompt::DEFAULT_VERSION;
use casework_core::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::providers::CompletionConfig;
use crate::resilience::ModelPrice;

mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod option_duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// How to reach a model and how hard to try.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider type registered in the provider registry
    pub provider: String,

    pub model: String,

    pub base_url: Option<String>,

    /// Falls back to the provider's environment variable when unset
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    pub temperature: f32,

    pub max_tokens: u32,

    /// Limit for a single attempt
    #[serde(with = "duration_human")]
    pub timeout: Duration,

    /// Limit for the whole call: retries, backoff and fallback included
    #[serde(with = "option_duration_human")]
    pub deadline: Option<Duration>,

    /// Extra attempts after the first, for transient failures only
    pub retry_attempts: u32,

    #[serde(with = "duration_human")]
    pub backoff_min: Duration,

    #[serde(with = "duration_human")]
    pub backoff_max: Duration,

    /// Tried once after the primary model's retries are exhausted
    pub fallback_model: Option<String>,

    pub prompt_caching: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.0,
            max_tokens: 1024,
            timeout: Duration::from_secs(30),
            deadline: None,
            retry_attempts: 3,
            backoff_min: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
            fallback_model: None,
            prompt_caching: true,
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .field("retry_attempts", &self.retry_attempts)
            .field("fallback_model", &self.fallback_model)
            .finish_non_exhaustive()
    }
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Same policy, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    /// Request settings for one attempt against `model`.
    pub fn completion(&self, model: &str) -> CompletionConfig {
        CompletionConfig {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.timeout,
            prompt_caching: self.prompt_caching,
        }
    }

    /// JSON settings handed to the provider factory.
    pub fn provider_settings(&self) -> serde_json::Value {
        let mut settings = serde_json::Map::new();
        if let Some(key) = &self.api_key {
            settings.insert("api_key".to_string(), key.clone().into());
        }
        if let Some(url) = &self.base_url {
            settings.insert("base_url".to_string(), url.clone().into());
        }
        serde_json::Value::Object(settings)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::new("model.model", "model id is required"));
        }
        if self.max_tokens == 0 {
            return Err(ValidationError::new("model.max_tokens", "must be greater than zero"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::new("model.temperature", "must be between 0 and 2"));
        }
        if self.timeout.is_zero() {
            return Err(ValidationError::new("model.timeout", "must be greater than zero"));
        }
        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(ValidationError::new("model.deadline", "must be greater than zero"));
        }
        if self.backoff_min > self.backoff_max {
            return Err(ValidationError::new(
                "model.backoff_min",
                "must not exceed backoff_max",
            ));
        }
        if let Some(url) = &self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ValidationError::new(
                    "model.base_url",
                    "must start with http:// or https://",
                ));
            }
        }
        Ok(())
    }
}

/// Judge model and scoring policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Judge model id; the production model when unset
    pub model: Option<String>,

    pub default_rubric_version: String,

    pub pass_threshold: f64,

    pub review_threshold: f64,

    /// Concurrent judge calls when scoring a dataset
    pub max_concurrency: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        let bands = VerdictBands::default();
        Self {
            model: None,
            default_rubric_version: DEFAULT_RUBRIC_VERSION.to_string(),
            pass_threshold: bands.pass_threshold,
            review_threshold: bands.review_threshold,
            max_concurrency: 4,
        }
    }
}

impl JudgeConfig {
    pub fn bands(&self) -> VerdictBands {
        VerdictBands {
            pass_threshold: self.pass_threshold,
            review_threshold: self.review_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Actor recorded on audit entries
    pub actor: String,

    /// Template version used for case prompts
    pub template_version: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            actor: "ai-service".to_string(),
            template_version: DEFAULT_VERSION.to_string(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub model: ModelConfig,

    pub judge: JudgeConfig,

    pub orchestration: OrchestrationConfig,

    /// How long the evaluation model catalog is cached
    #[serde(with = "duration_human")]
    pub catalog_ttl: Duration,

    /// Per-model price overrides keyed by model-id substring
    pub pricing: BTreeMap<String, ModelPrice>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            judge: JudgeConfig::default(),
            orchestration: OrchestrationConfig::default(),
            catalog_ttl: Duration::from_secs(300),
            pricing: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Model settings for judge calls.
    pub fn judge_model(&self) -> ModelConfig {
        match &self.judge.model {
            Some(model) => self.model.with_model(model.clone()),
            None => self.model.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.model.validate()?;

        // Judge thresholds are on the built-in 0-10 scale.
        self.judge.bands().validate(10.0)?;
        if self.judge.max_concurrency == 0 {
            return Err(ValidationError::new(
                "judge.max_concurrency",
                "must be greater than zero",
            ));
        }
        if self.judge.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(ValidationError::new("judge.model", "must not be empty"));
        }

        if self.orchestration.actor.trim().is_empty() {
            return Err(ValidationError::new("orchestration.actor", "actor is required"));
        }

        for (pattern, price) in &self.pricing {
            if price.input_per_mtok < 0.0 || price.output_per_mtok < 0.0 {
                return Err(ValidationError::new(
                    format!("pricing.{pattern}"),
                    "prices must be non-negative",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(config.model.timeout, Duration::from_secs(30));
        assert_eq!(config.model.retry_attempts, 3);
        assert_eq!(config.judge.default_rubric_version, "v1");
        assert_eq!(config.orchestration.actor, "ai-service");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_human_durations() {
        let config = RuntimeConfig::from_yaml(
            r#"
model:
  model: gpt-4o-mini
  provider: openai
  timeout: 250ms
  deadline: 2m
  backoff_max: 4s
catalog_ttl: 10m
pricing:
  gpt-4o-mini:
    inputPerMtok: 0.1
    outputPerMtok: 0.5
"#,
        )
        .unwrap();

        assert_eq!(config.model.timeout, Duration::from_millis(250));
        assert_eq!(config.model.deadline, Some(Duration::from_secs(120)));
        assert_eq!(config.model.backoff_max, Duration::from_secs(4));
        assert_eq!(config.catalog_ttl, Duration::from_secs(600));
        assert_eq!(config.pricing["gpt-4o-mini"].input_per_mtok, 0.1);
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        assert!(RuntimeConfig::from_yaml("model:\n  timeout: soon\n").is_err());
    }

    #[test]
    fn test_validate_thresholds() {
        let mut config = RuntimeConfig::default();
        config.judge.review_threshold = 8.0;
        config.judge.pass_threshold = 6.0;
        assert!(config.validate().is_err());

        let mut config = RuntimeConfig::default();
        config.judge.pass_threshold = 11.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_model() {
        let mut config = RuntimeConfig::default();
        config.model.max_tokens = 0;
        assert_eq!(config.validate().unwrap_err().field, "model.max_tokens");

        let mut config = RuntimeConfig::default();
        config.model.base_url = Some("api.example.com".to_string());
        assert_eq!(config.validate().unwrap_err().field, "model.base_url");
    }

    #[test]
    fn test_judge_model_override() {
        let mut config = RuntimeConfig::default();
        assert_eq!(config.judge_model().model, config.model.model);

        config.judge.model = Some("judge-large".to_string());
        config.model.retry_attempts = 1;
        let judge = config.judge_model();
        assert_eq!(judge.model, "judge-large");
        assert_eq!(judge.retry_attempts, 1);
    }

    #[test]
    fn test_api_key_is_redacted_and_not_serialized() {
        let mut config = ModelConfig::default();
        config.api_key = Some("sk-secret".to_string());

        assert!(!format!("{:?}", config).contains("sk-secret"));
        assert!(!serde_yaml::to_string(&config).unwrap().contains("sk-secret"));
        assert_eq!(config.provider_settings()["api_key"], "sk-secret");
    }
}
