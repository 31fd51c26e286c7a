//! Experiment state held in the document store
//!
//! - `schema`: document path layout and trigger path matching
//! - `store`: the transactional in-process document store
//! - `types`: participants, cohorts and experiments
//! - `stages`: polymorphic stage configs, public data, answers and messages
//! - `agents`: agent personas, chat prompts and mediators
//!
//! # Usage
//!
//! ```ignore
//! use cohort_coordination::state::{paths, DocumentStore, ParticipantProfile};
//!
//! let store = DocumentStore::new().shared();
//! let participant = ParticipantProfile::new("priv-1", "pub-1", "lobby", "survey");
//! store.set(&paths::participant("exp-1", "priv-1"), &participant)?;
//!
//! let mut tx = store.begin()?;
//! let mut p: ParticipantProfile = tx.require(&paths::participant("exp-1", "priv-1"))?;
//! p.connected = Some(false);
//! tx.set(&paths::participant("exp-1", "priv-1"), &p)?;
//! tx.commit()?;
//! ```

pub mod agents;
pub mod schema;
pub mod stages;
pub mod store;
pub mod types;

pub use agents::{
    AgentChatPromptConfig, AgentChatSettings, AgentModelSettings, AgentPersonaConfig,
    AgentPersonaType, ConditionResponseConfig, CustomRequestBodyField, LegacyResponseConfig,
    MediatorProfile, ModelGenerationConfig, ProfileAgentConfig, ResponseType,
    ShouldRespondConfig, StructuredOutputConfig, DEFAULT_CONDITION_KEY,
};
pub use schema::{paths, TriggerPath};
pub use stages::{
    sort_messages, ChatDiscussion, ChatMessage, ChatSenderType, ChatStageConfig,
    ChatStageParticipantAnswer, ChatStagePublicData, DiscussionId, PublicId, SenderProfile,
    StageConfig, StageParticipantAnswer, StagePublicData, SurveyAnswer, SurveyQuestion,
    SurveyStageConfig, SurveyStageParticipantAnswer, SurveyStagePublicData, TransferStageConfig,
    TriggerLogEntry,
};
pub use store::{DocumentStore, SharedDocumentStore, StoreError, StoreResult, Transaction};
pub use types::{
    CohortConfig, CohortId, CohortMetadata, CohortParticipantConfig, Experiment, ExperimentId,
    ParticipantProfile, ParticipantStatus, ParticipantTimestamps, StageId,
};
