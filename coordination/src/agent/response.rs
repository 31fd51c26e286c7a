//! Reply extraction from model output

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::model::ModelResponse;
use crate::state::AgentChatPromptConfig;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```json\s*|\s*```").expect("CODE_FENCE regex should compile"));

/// A reply ready to be posted
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub message: String,
    pub explanation: Option<String>,
}

/// Remove markdown JSON fences around a model reply
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// Parse a (possibly fenced) JSON object
pub fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(&strip_code_fences(text)).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Empty or quote-only replies mean "say nothing"
pub fn is_blank_reply(message: &str) -> bool {
    matches!(message.trim(), "" | "\"\"" | "''")
}

/// Loose truthiness of a JSON flag
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes"),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn field_text(object: &Map<String, Value>, field: &str) -> Option<String> {
    match object.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn reply_object(response: &ModelResponse) -> Option<Map<String, Value>> {
    if let Some(Value::Object(map)) = &response.parsed {
        return Some(map.clone());
    }
    parse_json_object(response.text.as_deref()?)
}

/// Turn a successful model response into a reply, if there is one
pub fn extract_reply(prompt: &AgentChatPromptConfig, response: &ModelResponse) -> Option<ParsedReply> {
    if !response.is_ok() {
        return None;
    }

    let reply = if let Some(legacy) = prompt.response_config.as_ref().filter(|c| c.is_json) {
        let object = reply_object(response)?;
        ParsedReply {
            message: field_text(&object, &legacy.message_field).unwrap_or_default(),
            explanation: field_text(&object, &legacy.explanation_field),
        }
    } else if prompt.structured_output.enabled {
        let config = &prompt.structured_output;
        let object = reply_object(response)?;
        let speak = object
            .get(&config.should_respond_field)
            .map(is_truthy)
            .unwrap_or(true);
        if !speak {
            return None;
        }
        ParsedReply {
            message: field_text(&object, &config.message_field).unwrap_or_default(),
            explanation: field_text(&object, &config.explanation_field),
        }
    } else {
        ParsedReply {
            message: response.text.clone()?,
            explanation: None,
        }
    };

    if is_blank_reply(&reply.message) {
        return None;
    }
    Some(reply)
}

/// Read the should-respond flag from a pre-check response
pub fn should_respond_flag(response: &ModelResponse, field: &str) -> bool {
    reply_object(response)
        .and_then(|object| object.get(field).map(is_truthy))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LegacyResponseConfig;
    use serde_json::json;

    fn structured_prompt() -> AgentChatPromptConfig {
        let mut prompt = AgentChatPromptConfig::new("chat");
        prompt.structured_output.enabled = true;
        prompt
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  plain  "), "plain");
    }

    #[test]
    fn test_plain_text_reply() {
        let prompt = AgentChatPromptConfig::new("chat");
        let reply = extract_reply(&prompt, &ModelResponse::ok("Hello all")).unwrap();
        assert_eq!(reply.message, "Hello all");
        assert_eq!(reply.explanation, None);
    }

    #[test]
    fn test_blank_replies_dropped() {
        let prompt = AgentChatPromptConfig::new("chat");
        for text in ["", "   ", "\"\"", "''"] {
            assert!(extract_reply(&prompt, &ModelResponse::ok(text)).is_none(), "{:?}", text);
        }
    }

    #[test]
    fn test_structured_reply() {
        let text = "```json\n{\"shouldRespond\": true, \"response\": \"Let's refocus\", \"explanation\": \"drifting\"}\n```";
        let reply = extract_reply(&structured_prompt(), &ModelResponse::ok(text)).unwrap();
        assert_eq!(reply.message, "Let's refocus");
        assert_eq!(reply.explanation.as_deref(), Some("drifting"));
    }

    #[test]
    fn test_structured_reply_declined() {
        let text = r#"{"shouldRespond": false, "response": "ignored"}"#;
        assert!(extract_reply(&structured_prompt(), &ModelResponse::ok(text)).is_none());
    }

    #[test]
    fn test_structured_reply_unparseable() {
        assert!(extract_reply(&structured_prompt(), &ModelResponse::ok("not json")).is_none());
    }

    #[test]
    fn test_parsed_object_preferred() {
        let mut response = ModelResponse::ok("ignored");
        response.parsed = Some(json!({"response": "from parsed"}));
        let reply = extract_reply(&structured_prompt(), &response).unwrap();
        assert_eq!(reply.message, "from parsed");
    }

    #[test]
    fn test_legacy_json_reply() {
        let mut prompt = AgentChatPromptConfig::new("chat");
        prompt.response_config = Some(LegacyResponseConfig {
            is_json: true,
            message_field: "msg".into(),
            ..Default::default()
        });
        let reply = extract_reply(&prompt, &ModelResponse::ok(r#"{"msg": "hi"}"#)).unwrap();
        assert_eq!(reply.message, "hi");
    }

    #[test]
    fn test_should_respond_flag() {
        assert!(should_respond_flag(&ModelResponse::ok(r#"{"shouldRespond": true}"#), "shouldRespond"));
        assert!(!should_respond_flag(&ModelResponse::ok(r#"{"shouldRespond": "no"}"#), "shouldRespond"));
        assert!(!should_respond_flag(&ModelResponse::ok("garbage"), "shouldRespond"));
    }
}
