use std::path::Path;

use cohort_coordination::CoordinationConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelEndpoint {
    /// Base URL, e.g. `http://localhost:8080/v1`
    pub url: String,
    /// Bearer token; required even for local servers (any placeholder works)
    pub api_key: Option<String>,
    /// Model used when a prompt does not name one
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ModelEndpoint {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/v1".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            timeout_secs: 60,
        }
    }
}

/// Top-level configuration for the reactor host.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub model: ModelEndpoint,
    pub coordination: CoordinationConfig,
}

impl LabConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env_overrides()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// `LAB_MODEL_*` and `COORDINATION_*` variables win over file values
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(url) = std::env::var("LAB_MODEL_URL") {
            self.model.url = url;
        }
        if let Ok(key) = std::env::var("LAB_MODEL_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("LAB_MODEL_NAME") {
            self.model.model = model;
        }
        if let Ok(value) = std::env::var("LAB_MODEL_TIMEOUT_SECS") {
            self.model.timeout_secs = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "LAB_MODEL_TIMEOUT_SECS",
                value,
            })?;
        }
        self.coordination = self.coordination.with_env_overrides();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LabConfig::default();
        assert_eq!(config.model.timeout_secs, 60);
        assert!(config.model.api_key.is_none());
        assert_eq!(config.coordination, CoordinationConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = LabConfig::from_toml(
            r#"
            [model]
            url = "http://vllm:8000/v1"
            api_key = "sk-test"

            [coordination]
            tx_max_attempts = 5
            typing_delay = false
            "#,
        )
        .unwrap();
        assert_eq!(config.model.url, "http://vllm:8000/v1");
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.coordination.tx_max_attempts, 5);
        assert!(!config.coordination.typing_delay);
        assert_eq!(config.coordination.timer_max_wait_secs, 300);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        std::fs::write(&path, "[model]\nmodel = \"local-7b\"\n").unwrap();
        let config = LabConfig::from_file(&path).unwrap();
        assert_eq!(config.model.model, "local-7b");
    }

    #[test]
    fn test_missing_file() {
        let err = LabConfig::from_file(Path::new("/nonexistent/lab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        std::fs::write(&path, "[model\n").unwrap();
        assert!(matches!(
            LabConfig::from_file(&path).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }
}
