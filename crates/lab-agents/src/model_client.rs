//! OpenAI-compatible chat-completions adapter
//!
//! Implements the coordination crate's [`ModelClient`] over HTTP. Failures
//! never surface as errors: they are folded into a [`ModelResponse`] status
//! so a failed call degrades to "no reply".

use std::time::Duration;

use async_trait::async_trait;
use cohort_coordination::{ModelClient, ModelRequest, ModelResponse, ModelResponseStatus};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::ModelEndpoint;

/// Map an HTTP failure status onto the model-call status taxonomy
pub fn status_for(code: StatusCode) -> ModelResponseStatus {
    match code.as_u16() {
        401 | 403 => ModelResponseStatus::AuthError,
        400 | 404 | 422 => ModelResponseStatus::ConfigError,
        _ => ModelResponseStatus::Other,
    }
}

/// Request body for `POST {url}/chat/completions`
pub fn build_body(request: &ModelRequest, default_model: &str) -> Value {
    let generation = &request.generation;
    let model = if request.model_name.trim().is_empty() {
        default_model
    } else {
        request.model_name.as_str()
    };

    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert(
        "messages".into(),
        json!([{ "role": "user", "content": request.prompt }]),
    );
    body.insert("max_tokens".into(), json!(generation.max_tokens));
    body.insert("temperature".into(), json!(generation.temperature));
    body.insert("top_p".into(), json!(generation.top_p));
    body.insert("frequency_penalty".into(), json!(generation.frequency_penalty));
    body.insert("presence_penalty".into(), json!(generation.presence_penalty));
    if !generation.stop_sequences.is_empty() {
        body.insert("stop".into(), json!(generation.stop_sequences));
    }
    if let Some(schema) = &request.response_schema {
        body.insert(
            "response_format".into(),
            json!({
                "type": "json_schema",
                "json_schema": { "name": "reply", "schema": schema },
            }),
        );
    }
    // Provider extras go last so they can override anything above.
    for field in &generation.custom_request_body_fields {
        let value = serde_json::from_str(&field.value).unwrap_or_else(|_| json!(field.value));
        body.insert(field.name.clone(), value);
    }
    Value::Object(body)
}

/// Turn a successful completion payload into a response
pub fn parse_completion(payload: &Value, structured: bool) -> ModelResponse {
    let Some(text) = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    else {
        return ModelResponse::error(
            ModelResponseStatus::Other,
            "completion contained no message content",
        );
    };

    let mut response = ModelResponse::ok(text);
    if structured {
        response.parsed = serde_json::from_str::<Value>(text)
            .ok()
            .filter(Value::is_object);
    }
    response
}

pub struct HttpModelClient {
    http: reqwest::Client,
    endpoint: ModelEndpoint,
}

impl HttpModelClient {
    pub fn new(endpoint: ModelEndpoint) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()?;
        Ok(Self { http, endpoint })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn generate(&self, request: ModelRequest) -> ModelResponse {
        let Some(api_key) = self.endpoint.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return ModelResponse::error(ModelResponseStatus::ConfigError, "missing API key");
        };
        if self.endpoint.url.trim().is_empty() {
            return ModelResponse::error(ModelResponseStatus::ConfigError, "missing model URL");
        }

        let body = build_body(&request, &self.endpoint.model);
        let structured = request.response_schema.is_some();
        debug!(url = %self.completions_url(), model = %body["model"], structured, "Model call");

        let resp = match self
            .http
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ModelResponse::error(ModelResponseStatus::Other, e.to_string()),
        };

        let code = resp.status();
        if !code.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return ModelResponse::error(status_for(code), format!("HTTP {}: {}", code, detail));
        }

        match resp.json::<Value>().await {
            Ok(payload) => parse_completion(&payload, structured),
            Err(e) => ModelResponse::error(ModelResponseStatus::Other, e.to_string()),
        }
    }
}

/// Check if an inference endpoint is reachable (GET /models)
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_coordination::state::{CustomRequestBodyField, ModelGenerationConfig};

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(StatusCode::UNAUTHORIZED), ModelResponseStatus::AuthError);
        assert_eq!(status_for(StatusCode::FORBIDDEN), ModelResponseStatus::AuthError);
        assert_eq!(status_for(StatusCode::NOT_FOUND), ModelResponseStatus::ConfigError);
        assert_eq!(
            status_for(StatusCode::UNPROCESSABLE_ENTITY),
            ModelResponseStatus::ConfigError
        );
        assert_eq!(status_for(StatusCode::TOO_MANY_REQUESTS), ModelResponseStatus::Other);
        assert_eq!(status_for(StatusCode::BAD_GATEWAY), ModelResponseStatus::Other);
    }

    #[test]
    fn test_body_forwards_generation_settings() {
        let generation = ModelGenerationConfig {
            max_tokens: 256,
            stop_sequences: vec!["\n\n".into()],
            temperature: 0.5,
            custom_request_body_fields: vec![
                CustomRequestBodyField {
                    name: "seed".into(),
                    value: "42".into(),
                },
                CustomRequestBodyField {
                    name: "user".into(),
                    value: "lab".into(),
                },
            ],
            ..Default::default()
        };
        let request = ModelRequest::new("Say hi", "").with_generation(generation);
        let body = build_body(&request, "fallback-model");

        assert_eq!(body["model"], "fallback-model");
        assert_eq!(body["messages"][0]["content"], "Say hi");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["stop"][0], "\n\n");
        assert_eq!(body["seed"], 42);
        assert_eq!(body["user"], "lab");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_body_requests_json_schema() {
        let request = ModelRequest::new("p", "gpt-x")
            .with_schema(Some(json!({ "type": "object" })));
        let body = build_body(&request, "fallback-model");
        assert_eq!(body["model"], "gpt-x");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["schema"]["type"], "object");
    }

    #[test]
    fn test_parse_completion() {
        let payload = json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"response\":\"hi\"}" } }]
        });
        let plain = parse_completion(&payload, false);
        assert!(plain.is_ok());
        assert!(plain.parsed.is_none());

        let structured = parse_completion(&payload, true);
        assert_eq!(structured.parsed.unwrap()["response"], "hi");

        let empty = parse_completion(&json!({ "choices": [] }), false);
        assert_eq!(empty.status, ModelResponseStatus::Other);
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let client = HttpModelClient::new(ModelEndpoint::default()).unwrap();
        let response = client.generate(ModelRequest::new("p", "m")).await;
        assert_eq!(response.status, ModelResponseStatus::ConfigError);
    }
}
