//! Agent persona, prompt and mediator documents

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{CohortId, StageId};

/// Condition key used when a cohort's condition has no explicit entry
pub const DEFAULT_CONDITION_KEY: &str = "_default";

/// Whether an automated actor posts as a participant or a mediator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPersonaType {
    Participant,
    Mediator,
}

impl AgentPersonaType {
    /// Dedup-marker suffix for this actor class
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPersonaType::Participant => "PARTICIPANT",
            AgentPersonaType::Mediator => "MEDIATOR",
        }
    }
}

impl std::fmt::Display for AgentPersonaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Model selection for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentModelSettings {
    pub model_name: String,
}

impl Default for AgentModelSettings {
    fn default() -> Self {
        Self {
            model_name: "gpt-4o-mini".to_string(),
        }
    }
}

/// Agent binding carried on a participant or mediator profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileAgentConfig {
    /// Persona the profile was created from
    pub agent_id: String,
    /// Extra text appended to every prompt of this agent
    pub prompt_context: String,
    pub model_settings: AgentModelSettings,
}

impl ProfileAgentConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }
}

/// Provider-specific extra request body field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRequestBodyField {
    pub name: String,
    pub value: String,
}

/// Generation parameters forwarded to the model adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelGenerationConfig {
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub custom_request_body_fields: Vec<CustomRequestBodyField>,
}

impl Default for ModelGenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            stop_sequences: Vec::new(),
            temperature: 1.0,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            custom_request_body_fields: Vec::new(),
        }
    }
}

/// Pacing and quota settings for an agent in a chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentChatSettings {
    /// Typing speed; also the weight when several agents compete for a turn
    pub words_per_minute: u32,
    /// Conversation length required before this agent may speak
    pub min_messages_before_responding: u32,
    /// May reply when the latest message is its own
    pub can_self_trigger_calls: bool,
    /// Cap on this agent's messages in the stage; `None` is unlimited
    pub max_responses: Option<u32>,
}

impl Default for AgentChatSettings {
    fn default() -> Self {
        Self {
            words_per_minute: 100,
            min_messages_before_responding: 0,
            can_self_trigger_calls: false,
            max_responses: Some(100),
        }
    }
}

/// Structured (JSON) output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructuredOutputConfig {
    pub enabled: bool,
    /// Custom schema; the default reply schema is used when absent
    pub schema: Option<serde_json::Value>,
    pub message_field: String,
    pub explanation_field: String,
    pub should_respond_field: String,
}

impl Default for StructuredOutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schema: None,
            message_field: "response".to_string(),
            explanation_field: "explanation".to_string(),
            should_respond_field: "shouldRespond".to_string(),
        }
    }
}

/// Deprecated JSON reply format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyResponseConfig {
    #[serde(rename = "isJSON")]
    pub is_json: bool,
    pub message_field: String,
    pub explanation_field: String,
    pub formatting_instructions: String,
}

impl Default for LegacyResponseConfig {
    fn default() -> Self {
        Self {
            is_json: false,
            message_field: "response".to_string(),
            explanation_field: "explanation".to_string(),
            formatting_instructions: String::new(),
        }
    }
}

/// How an agent responds under a given experimental condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Fixed template message
    Static,
    /// Model-generated message
    #[default]
    Llm,
    /// Present but silent
    None,
    /// Absent from the cohort
    Hide,
}

/// Per-condition response override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConditionResponseConfig {
    pub response_type: ResponseType,
    pub static_message: Option<String>,
}

/// Settings for the optional "should respond" pre-check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShouldRespondConfig {
    pub prompt_context: String,
    /// Falls back to the main prompt's generation config
    pub generation_config: Option<ModelGenerationConfig>,
    /// Falls back to the main prompt's structured output config
    pub structured_output: Option<StructuredOutputConfig>,
}

/// Chat prompt of an agent persona for one stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentChatPromptConfig {
    /// Stage id
    pub id: StageId,
    pub prompt_context: String,
    pub chat_settings: AgentChatSettings,
    pub generation_config: ModelGenerationConfig,
    #[serde(rename = "structuredOutputConfig")]
    pub structured_output: StructuredOutputConfig,
    /// Deprecated; takes precedence over structured output when JSON
    pub response_config: Option<LegacyResponseConfig>,
    pub should_respond: Option<ShouldRespondConfig>,
    pub experimental_condition_config: BTreeMap<String, ConditionResponseConfig>,
}

impl AgentChatPromptConfig {
    pub fn new(stage_id: impl Into<String>) -> Self {
        Self {
            id: stage_id.into(),
            ..Default::default()
        }
    }

    /// Response override for a condition, falling back to `_default` then LLM
    pub fn response_for_condition(&self, condition: Option<&str>) -> ConditionResponseConfig {
        condition
            .and_then(|c| self.experimental_condition_config.get(c))
            .or_else(|| self.experimental_condition_config.get(DEFAULT_CONDITION_KEY))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the legacy JSON format is in effect
    pub fn uses_legacy_json(&self) -> bool {
        self.response_config.as_ref().is_some_and(|c| c.is_json)
    }
}

/// An agent persona template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPersonaConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub persona_type: AgentPersonaType,
    /// Add a mediator from this persona to every new cohort
    #[serde(default)]
    pub is_default_add_to_cohort: bool,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub default_model_settings: AgentModelSettings,
}

impl AgentPersonaConfig {
    pub fn mediator(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            persona_type: AgentPersonaType::Mediator,
            is_default_add_to_cohort: true,
            avatar: None,
            default_model_settings: AgentModelSettings::default(),
        }
    }

    pub fn participant(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            persona_type: AgentPersonaType::Participant,
            is_default_add_to_cohort: false,
            ..Self::mediator(id, name)
        }
    }
}

/// An automated mediator placed in one cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediatorProfile {
    pub id: String,
    pub public_id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub current_cohort_id: CohortId,
    /// Stages in which this mediator takes part
    #[serde(default)]
    pub active_stage_map: BTreeMap<StageId, bool>,
    pub agent_config: ProfileAgentConfig,
}

impl MediatorProfile {
    /// Whether the mediator takes part in the stage
    pub fn is_active_in(&self, stage_id: &str) -> bool {
        self.active_stage_map.get(stage_id).copied().unwrap_or(false)
    }
}
