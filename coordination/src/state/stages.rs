//! Stage documents
//!
//! Stage configs, per-cohort public data and per-participant answers are
//! polymorphic over the stage kind. Each carries a `kind` discriminant so it
//! can be loaded and dispatched with an exhaustive match.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agents::AgentPersonaType;
use super::types::{CohortParticipantConfig, StageId};

/// Discussion identifier within a chat stage
pub type DiscussionId = String;

/// Participant public identifier
pub type PublicId = String;

// =============================================================================
// Stage configs
// =============================================================================

/// Static configuration of one experiment stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StageConfig {
    Chat(ChatStageConfig),
    Transfer(TransferStageConfig),
    Survey(SurveyStageConfig),
}

impl StageConfig {
    pub fn id(&self) -> &str {
        match self {
            StageConfig::Chat(stage) => &stage.id,
            StageConfig::Transfer(stage) => &stage.id,
            StageConfig::Survey(stage) => &stage.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StageConfig::Chat(_) => "chat",
            StageConfig::Transfer(_) => "transfer",
            StageConfig::Survey(_) => "survey",
        }
    }
}

/// One bounded sub-segment of a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDiscussion {
    pub id: DiscussionId,
    #[serde(default)]
    pub description: String,
}

impl ChatDiscussion {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
        }
    }
}

/// Group chat stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStageConfig {
    pub id: StageId,
    #[serde(default)]
    pub name: String,
    /// Ordered discussions; empty on legacy stages
    #[serde(default)]
    pub discussions: Vec<ChatDiscussion>,
    #[serde(default)]
    pub time_limit_in_minutes: Option<u64>,
}

impl ChatStageConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            discussions: Vec::new(),
            time_limit_in_minutes: None,
        }
    }

    pub fn with_discussions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discussions = ids.into_iter().map(ChatDiscussion::new).collect();
        self
    }

    pub fn with_time_limit(mut self, minutes: u64) -> Self {
        self.time_limit_in_minutes = Some(minutes);
        self
    }

    /// Position of a discussion in the configured order
    pub fn discussion_index(&self, discussion_id: &str) -> Option<usize> {
        self.discussions.iter().position(|d| d.id == discussion_id)
    }
}

/// Waiting stage that regroups participants into new cohorts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStageConfig {
    pub id: StageId,
    #[serde(default)]
    pub name: String,
    /// Survey stage holding the sorting question
    pub survey_stage_id: StageId,
    /// Question whose answer classifies participants
    pub survey_question_id: String,
    /// Required number of participants per classification value
    pub participant_counts: BTreeMap<String, u32>,
    /// Relative weight per condition name
    #[serde(default)]
    pub condition_probabilities: BTreeMap<String, f64>,
    /// Quota policy stamped on each new cohort
    #[serde(default)]
    pub new_cohort_participant_config: CohortParticipantConfig,
    #[serde(default)]
    pub enable_timeout: bool,
    #[serde(default = "default_transfer_timeout")]
    pub timeout_seconds: u64,
}

fn default_transfer_timeout() -> u64 {
    600
}

impl TransferStageConfig {
    pub fn new(
        id: impl Into<String>,
        survey_stage_id: impl Into<String>,
        survey_question_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            survey_stage_id: survey_stage_id.into(),
            survey_question_id: survey_question_id.into(),
            participant_counts: BTreeMap::new(),
            condition_probabilities: BTreeMap::new(),
            new_cohort_participant_config: CohortParticipantConfig::default(),
            enable_timeout: false,
            timeout_seconds: default_transfer_timeout(),
        }
    }

    pub fn require(mut self, class: impl Into<String>, count: u32) -> Self {
        self.participant_counts.insert(class.into(), count);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>, weight: f64) -> Self {
        self.condition_probabilities.insert(condition.into(), weight);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.enable_timeout = true;
        self.timeout_seconds = seconds;
        self
    }

    /// Total participants per formed cohort
    pub fn cohort_size(&self) -> u32 {
        self.participant_counts.values().sum()
    }
}

/// A survey question (content is authored elsewhere)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyQuestion {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Survey stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyStageConfig {
    pub id: StageId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub questions: Vec<SurveyQuestion>,
}

// =============================================================================
// Survey answers
// =============================================================================

/// One answer to a survey question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SurveyAnswer {
    #[serde(rename_all = "camelCase")]
    MultipleChoice { id: String, choice_id: String },
    Text { id: String, answer: String },
    #[serde(rename_all = "camelCase")]
    Check { id: String, is_checked: bool },
    Scale { id: String, value: i64 },
}

impl SurveyAnswer {
    /// Question id
    pub fn question_id(&self) -> &str {
        match self {
            SurveyAnswer::MultipleChoice { id, .. }
            | SurveyAnswer::Text { id, .. }
            | SurveyAnswer::Check { id, .. }
            | SurveyAnswer::Scale { id, .. } => id,
        }
    }

    /// Value used to classify participants for transfer quotas
    pub fn classification_value(&self) -> String {
        match self {
            SurveyAnswer::MultipleChoice { choice_id, .. } => choice_id.clone(),
            SurveyAnswer::Text { answer, .. } => answer.trim().to_string(),
            SurveyAnswer::Check { is_checked, .. } => is_checked.to_string(),
            SurveyAnswer::Scale { value, .. } => value.to_string(),
        }
    }
}

// =============================================================================
// Public stage data (per cohort)
// =============================================================================

/// Cohort-visible state of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StagePublicData {
    Chat(ChatStagePublicData),
    Survey(SurveyStagePublicData),
}

/// Discussion pointer and timers of a chat stage in one cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStagePublicData {
    pub id: StageId,
    /// `None` means no discussions configured or all complete
    #[serde(default)]
    pub current_discussion_id: Option<DiscussionId>,
    /// discussion -> participant public id -> ready timestamp
    #[serde(default)]
    pub discussion_timestamp_map: BTreeMap<DiscussionId, BTreeMap<PublicId, DateTime<Utc>>>,
    #[serde(default)]
    pub discussion_start_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discussion_checkpoint_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discussion_end_timestamp: Option<DateTime<Utc>>,
}

impl ChatStagePublicData {
    /// Fresh state pointing at the first configured discussion
    pub fn new(stage: &ChatStageConfig) -> Self {
        Self {
            id: stage.id.clone(),
            current_discussion_id: stage.discussions.first().map(|d| d.id.clone()),
            discussion_timestamp_map: BTreeMap::new(),
            discussion_start_timestamp: None,
            discussion_checkpoint_timestamp: None,
            discussion_end_timestamp: None,
        }
    }
}

/// Survey answers shared within a cohort, keyed by public id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyStagePublicData {
    pub id: StageId,
    #[serde(default)]
    pub participant_answer_map: BTreeMap<PublicId, BTreeMap<String, SurveyAnswer>>,
}

impl SurveyStagePublicData {
    pub fn new(stage_id: impl Into<String>) -> Self {
        Self {
            id: stage_id.into(),
            participant_answer_map: BTreeMap::new(),
        }
    }

    /// Classification of a participant by the given question
    pub fn classification_of(&self, public_id: &str, question_id: &str) -> Option<String> {
        self.participant_answer_map
            .get(public_id)?
            .get(question_id)
            .map(SurveyAnswer::classification_value)
    }
}

// =============================================================================
// Participant answers (private)
// =============================================================================

/// A participant's private record for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StageParticipantAnswer {
    Chat(ChatStageParticipantAnswer),
    Survey(SurveyStageParticipantAnswer),
}

/// Ready-to-end timestamps per discussion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStageParticipantAnswer {
    pub id: StageId,
    #[serde(default)]
    pub discussion_timestamp_map: BTreeMap<DiscussionId, Option<DateTime<Utc>>>,
}

impl ChatStageParticipantAnswer {
    pub fn new(stage_id: impl Into<String>) -> Self {
        Self {
            id: stage_id.into(),
            discussion_timestamp_map: BTreeMap::new(),
        }
    }
}

/// Private survey answers keyed by question id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyStageParticipantAnswer {
    pub id: StageId,
    #[serde(default)]
    pub answer_map: BTreeMap<String, SurveyAnswer>,
}

// =============================================================================
// Chat messages and trigger logs
// =============================================================================

/// Author class of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatSenderType {
    Participant,
    Mediator,
    Experimenter,
}

/// Sender display profile copied onto each message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderProfile {
    pub name: String,
    pub avatar: Option<String>,
}

/// Immutable chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    /// Discussion active when the message was sent
    #[serde(default)]
    pub discussion_id: Option<DiscussionId>,
    #[serde(rename = "type")]
    pub sender_type: ChatSenderType,
    /// Participant public id, mediator id or experimenter id
    pub sender_id: String,
    #[serde(default)]
    pub profile: SenderProfile,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Model rationale, for debugging
    #[serde(default)]
    pub explanation: Option<String>,
    /// Persona that generated an automated message
    #[serde(default)]
    pub agent_id: Option<String>,
}

impl ChatMessage {
    pub fn new(
        id: impl Into<String>,
        sender_type: ChatSenderType,
        sender_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            discussion_id: None,
            sender_type,
            sender_id: sender_id.into(),
            profile: SenderProfile::default(),
            message: message.into(),
            timestamp: Utc::now(),
            explanation: None,
            agent_id: None,
        }
    }

    pub fn in_discussion(mut self, discussion_id: Option<String>) -> Self {
        self.discussion_id = discussion_id;
        self
    }

    pub fn with_profile(mut self, name: impl Into<String>, avatar: Option<String>) -> Self {
        self.profile = SenderProfile {
            name: name.into(),
            avatar,
        };
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Sort messages into conversation order (timestamp, then id)
pub fn sort_messages(messages: &mut [ChatMessage]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}

/// Dedup marker recording that an actor class replied to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerLogEntry {
    pub trigger_message_id: String,
    pub responder: AgentPersonaType,
    /// Message written in reply
    pub reply_message_id: String,
    pub timestamp: DateTime<Utc>,
}
