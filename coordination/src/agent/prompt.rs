//! Prompt construction for chat agents

use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::responder::Responder;
use crate::state::{ChatMessage, ChatStageConfig, ShouldRespondConfig, StructuredOutputConfig};

static PARTICIPANTS_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{\s*participants\s*\}\}").expect("PARTICIPANTS_PLACEHOLDER regex should compile")
});

/// Prompt asking an agent participant whether it is done talking
pub const READY_TO_END_PROMPT: &str = "Are you ready to end the conversation and stop talking? Please consider whether you have met your goals and explicitly communicated this to other participants. If you have more to say or have yet to explicitly agree in the chat, you should not end the discussion yet. If so, respond the exact word YES. Otherwise, do not return anything.";

/// Default structured reply of a chat agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefaultChatReply {
    /// Whether the agent wants to speak this turn
    pub should_respond: bool,
    /// The chat message to send
    pub response: String,
    /// Reasoning behind the decision, not shown to participants
    pub explanation: String,
}

/// JSON schema of [`DefaultChatReply`]
pub fn default_reply_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(DefaultChatReply)).unwrap_or(Value::Null)
}

/// Schema to request for a structured-output config, if enabled
pub fn response_schema(config: &StructuredOutputConfig) -> Option<Value> {
    if !config.enabled {
        return None;
    }
    Some(config.schema.clone().unwrap_or_else(default_reply_schema))
}

/// Render messages as `(HH:MM) Name: message` lines
pub fn format_transcript(messages: &[&ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let name = if m.profile.name.is_empty() {
                m.sender_id.as_str()
            } else {
                m.profile.name.as_str()
            };
            format!("({}) {}: {}", m.timestamp.format("%H:%M"), name, m.message)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Join names as "A", "A and B" or "A, B, and C"
pub fn format_names(names: &[&str]) -> String {
    match names {
        [] => "participants".to_string(),
        [one] => one.to_string(),
        [a, b] => format!("{} and {}", a, b),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

/// Replace every `{{participants}}` placeholder with the formatted names
pub fn interpolate_participants(template: &str, names: &[&str]) -> String {
    let joined = format_names(names);
    PARTICIPANTS_PLACEHOLDER
        .replace_all(template, regex::NoExpand(&joined))
        .into_owned()
}

fn structured_instructions(config: &StructuredOutputConfig) -> String {
    format!(
        "Respond only with a JSON object with the fields \"{}\" (boolean, whether to speak now), \"{}\" (your message) and \"{}\" (your reasoning).",
        config.should_respond_field, config.message_field, config.explanation_field
    )
}

fn header(responder: &Responder, stage: &ChatStageConfig, discussion: Option<&str>) -> String {
    let mut sections = vec![format!(
        "You are {}, taking part in the chat \"{}\".",
        responder.name,
        if stage.name.is_empty() { &stage.id } else { &stage.name }
    )];
    if let Some(description) = discussion
        .and_then(|id| stage.discussions.iter().find(|d| d.id == id))
        .map(|d| d.description.as_str())
        .filter(|d| !d.is_empty())
    {
        sections.push(format!("Current discussion: {}", description));
    }
    if !responder.agent.prompt_context.is_empty() {
        sections.push(responder.agent.prompt_context.clone());
    }
    sections.join("\n")
}

/// Main generation prompt
pub fn chat_prompt(
    responder: &Responder,
    stage: &ChatStageConfig,
    discussion: Option<&str>,
    transcript: &str,
) -> String {
    let mut prompt = header(responder, stage, discussion);
    prompt.push_str("\n\n--- Chat history ---\n");
    prompt.push_str(transcript);
    prompt.push_str("\n\n");
    prompt.push_str(&responder.prompt.prompt_context);

    if let Some(legacy) = responder.prompt.response_config.as_ref().filter(|c| c.is_json) {
        prompt.push_str(&format!(
            "\n\nRespond as JSON with the message in \"{}\" and your reasoning in \"{}\". {}",
            legacy.message_field, legacy.explanation_field, legacy.formatting_instructions
        ));
    } else if responder.prompt.structured_output.enabled {
        prompt.push_str("\n\n");
        prompt.push_str(&structured_instructions(&responder.prompt.structured_output));
    }
    prompt
}

/// Prompt for the optional "should respond" pre-check
pub fn should_respond_prompt(
    responder: &Responder,
    stage: &ChatStageConfig,
    config: &ShouldRespondConfig,
    transcript: &str,
) -> String {
    let structured = config
        .structured_output
        .as_ref()
        .unwrap_or(&responder.prompt.structured_output);
    format!(
        "{}\n\n--- Chat history ---\n{}\n\n{}\n\n{}",
        header(responder, stage, None),
        transcript,
        config.prompt_context,
        structured_instructions(structured)
    )
}

/// Readiness question for an agent participant
pub fn ready_to_end_prompt(responder: &Responder, stage: &ChatStageConfig, transcript: &str) -> String {
    format!(
        "{}\n\n--- Chat history ---\n{}\n\n{}",
        header(responder, stage, None),
        transcript,
        READY_TO_END_PROMPT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatSenderType;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_format_names() {
        assert_eq!(format_names(&[]), "participants");
        assert_eq!(format_names(&["Ann"]), "Ann");
        assert_eq!(format_names(&["Ann", "Bo"]), "Ann and Bo");
        assert_eq!(format_names(&["Ann", "Bo", "Cy"]), "Ann, Bo, and Cy");
    }

    #[test]
    fn test_interpolation_is_case_and_space_tolerant() {
        let out = interpolate_participants("Hi {{ Participants }}! Bye {{participants}}.", &["Ann", "Bo"]);
        assert_eq!(out, "Hi Ann and Bo! Bye Ann and Bo.");
    }

    #[test]
    fn test_interpolation_does_not_expand_names() {
        let out = interpolate_participants("Hi {{participants}}", &["$1 Dollar"]);
        assert_eq!(out, "Hi $1 Dollar");
    }

    #[test]
    fn test_transcript_format() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 7, 0).single().unwrap();
        let a = ChatMessage::new("1", ChatSenderType::Participant, "p1", "hello")
            .with_profile("Ann", None)
            .at(ts);
        let b = ChatMessage::new("2", ChatSenderType::Mediator, "m1", "welcome").at(ts);
        assert_eq!(format_transcript(&[&a, &b]), "(09:07) Ann: hello\n(09:07) m1: welcome");
    }

    #[test]
    fn test_default_schema_fields() {
        let schema = default_reply_schema();
        let properties = &schema["properties"];
        assert!(properties.get("shouldRespond").is_some());
        assert!(properties.get("response").is_some());
        assert!(properties.get("explanation").is_some());
    }

    #[test]
    fn test_response_schema_only_when_enabled() {
        let mut config = StructuredOutputConfig::default();
        assert!(response_schema(&config).is_none());
        config.enabled = true;
        assert!(response_schema(&config).is_some());
    }
}
