//! Model-call boundary
//!
//! The arbitrator only sees [`ModelClient`]; concrete HTTP adapters live in
//! the binary crate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::ModelGenerationConfig;

/// Outcome class of a model call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelResponseStatus {
    Ok,
    AuthError,
    ConfigError,
    Other,
}

impl std::fmt::Display for ModelResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelResponseStatus::Ok => "OK",
            ModelResponseStatus::AuthError => "AUTH_ERROR",
            ModelResponseStatus::ConfigError => "CONFIG_ERROR",
            ModelResponseStatus::Other => "OTHER",
        };
        write!(f, "{}", s)
    }
}

/// One generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    pub prompt: String,
    pub model_name: String,
    pub generation: ModelGenerationConfig,
    /// JSON schema the reply must follow, when structured output is enabled
    #[serde(default)]
    pub response_schema: Option<Value>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model_name: model_name.into(),
            generation: ModelGenerationConfig::default(),
            response_schema: None,
        }
    }

    pub fn with_generation(mut self, generation: ModelGenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_schema(mut self, schema: Option<Value>) -> Self {
        self.response_schema = schema;
        self
    }
}

/// Result of a generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    pub status: ModelResponseStatus,
    #[serde(default)]
    pub text: Option<String>,
    /// Parsed object for structured replies
    #[serde(default)]
    pub parsed: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ModelResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            status: ModelResponseStatus::Ok,
            text: Some(text.into()),
            parsed: None,
            error_message: None,
        }
    }

    pub fn error(status: ModelResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            text: None,
            parsed: None,
            error_message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ModelResponseStatus::Ok
    }
}

/// Text generation capability
///
/// Implementations report failures through [`ModelResponse::status`] rather
/// than panicking or erroring, so a failed call degrades to "no reply".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> ModelResponse;
}

pub type SharedModelClient = Arc<dyn ModelClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_value(ModelResponseStatus::AuthError).unwrap(),
            "AUTH_ERROR"
        );
        assert_eq!(ModelResponseStatus::ConfigError.to_string(), "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_mock_client() {
        let mut client = MockModelClient::new();
        client
            .expect_generate()
            .withf(|req| req.prompt.contains("hello"))
            .times(1)
            .returning(|_| ModelResponse::ok("hi"));

        let response = client.generate(ModelRequest::new("hello", "m")).await;
        assert!(response.is_ok());
        assert_eq!(response.text.as_deref(), Some("hi"));
    }
}
