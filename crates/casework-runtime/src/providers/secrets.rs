//! API keys for the model providers.
//!
//! A key is wrapped in [`ApiCredential`] the moment it is read, so it never
//! shows up in `Debug` output, interaction records or error messages. Each
//! provider describes where its key may come from with a [`KeySource`].
//!
//! ```ignore
//! const KEY: KeySource = KeySource::new("Anthropic API key", "api_key", "ANTHROPIC_API_KEY");
//! let cred = ApiCredential::resolve(&KEY, &settings)?;
//! request.header("x-api-key", cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::Config => "config",
            CredentialSource::Environment => "environment",
            CredentialSource::Programmatic => "programmatic",
        })
    }
}

/// Lookup rules for one provider's key: a settings field, then an
/// environment variable. Blank values count as missing.
#[derive(Debug, Clone, Copy)]
pub struct KeySource {
    pub label: &'static str,
    pub config_key: &'static str,
    pub env_var: &'static str,
}

impl KeySource {
    pub const fn new(label: &'static str, config_key: &'static str, env_var: &'static str) -> Self {
        Self {
            label,
            config_key,
            env_var,
        }
    }

    fn from_settings(&self, settings: &JsonValue) -> Option<String> {
        non_blank(settings[self.config_key].as_str().map(str::to_string))
    }

    fn from_environment(&self) -> Option<String> {
        non_blank(std::env::var(self.env_var).ok())
    }

    /// Whether a key could be resolved, without wrapping it.
    pub fn is_available(&self, settings: &JsonValue) -> bool {
        self.from_settings(settings).is_some() || self.from_environment().is_some()
    }

    /// Fails with the same message `resolve` would give.
    pub fn require(&self, settings: &JsonValue) -> Result<(), ProviderError> {
        if self.is_available(settings) {
            Ok(())
        } else {
            Err(self.missing())
        }
    }

    fn missing(&self) -> ProviderError {
        ProviderError::NotConfigured(format!(
            "{} required: set '{}' in the provider settings or the {} environment variable",
            self.label, self.config_key, self.env_var
        ))
    }
}

// Keys pasted from a terminal often carry a trailing newline.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A redacted API key. Reachable only through [`ApiCredential::expose`].
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    label: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, label: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            label,
        }
    }

    /// Read the key from the environment only.
    pub fn from_env(key: &KeySource) -> Result<Self, ProviderError> {
        key.from_environment()
            .map(|v| Self::new(v, CredentialSource::Environment, key.label))
            .ok_or_else(|| key.missing())
    }

    /// Settings first, then the environment.
    pub fn resolve(key: &KeySource, settings: &JsonValue) -> Result<Self, ProviderError> {
        if let Some(value) = key.from_settings(settings) {
            return Ok(Self::new(value, CredentialSource::Config, key.label));
        }
        Self::from_env(key)
    }

    /// The raw key, for a request header. Do not keep the returned value.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("label", &self.label)
            .field("source", &self.source)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [REDACTED]", self.label, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Each test uses its own variable; tests run in parallel.
    const fn key(env_var: &'static str) -> KeySource {
        KeySource::new("Test key", "api_key", env_var)
    }

    #[test]
    fn test_credential_never_printed() {
        let secret = "sk-case-secret-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Config, "Test key");

        let debug = format!("{cred:?}");
        assert!(!debug.contains(secret));
        assert!(debug.contains("[REDACTED]"));

        let display = cred.to_string();
        assert!(!display.contains(secret));
        assert_eq!(display, "Test key (config) [REDACTED]");
        assert_eq!(cred.expose(), secret);
    }

    #[test]
    fn test_settings_win_over_environment() {
        let source = key("CASEWORK_TEST_KEY_PRIORITY");
        std::env::set_var(source.env_var, "env-key");

        let cred = ApiCredential::resolve(&source, &json!({"api_key": "config-key"})).unwrap();
        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);

        std::env::remove_var(source.env_var);
    }

    #[test]
    fn test_blank_setting_falls_back_to_environment() {
        let source = key("CASEWORK_TEST_KEY_FALLBACK");
        std::env::set_var(source.env_var, " env-key\n");

        let cred = ApiCredential::resolve(&source, &json!({"api_key": "   "})).unwrap();
        assert_eq!(cred.expose(), "env-key");
        assert_eq!(cred.source(), CredentialSource::Environment);

        std::env::remove_var(source.env_var);
    }

    #[test]
    fn test_missing_key_names_both_places() {
        let source = key("CASEWORK_TEST_KEY_MISSING");
        let err = ApiCredential::resolve(&source, &json!({}))
            .unwrap_err()
            .to_string();

        assert!(err.contains("Test key"));
        assert!(err.contains("'api_key'"));
        assert!(err.contains("CASEWORK_TEST_KEY_MISSING"));
        assert!(source.require(&json!({})).is_err());
        assert!(source.is_available(&json!({"api_key": "value"})));
    }
}
