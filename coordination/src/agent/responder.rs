//! Automated actors that may speak in a chat stage

use crate::error::CoordinationResult;
use crate::state::{
    paths, AgentChatPromptConfig, AgentPersonaType, ChatSenderType, DocumentStore,
    MediatorProfile, ParticipantProfile, ParticipantStatus, ProfileAgentConfig,
};

/// Prompt used for agent participants whose persona has no chat prompt
pub const DEFAULT_PARTICIPANT_CHAT_PROMPT: &str = "You are a participant. Respond in a quick sentence if you would like to say something. Otherwise, do not respond.";

/// An agent participant or mediator resolved for one stage
#[derive(Debug, Clone, PartialEq)]
pub struct Responder {
    pub class: AgentPersonaType,
    /// Document id of the profile (participant private id or mediator id)
    pub profile_id: String,
    /// Id carried on this actor's messages
    pub sender_id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub agent: ProfileAgentConfig,
    pub prompt: AgentChatPromptConfig,
}

impl Responder {
    pub fn from_mediator(mediator: &MediatorProfile, prompt: AgentChatPromptConfig) -> Self {
        Self {
            class: AgentPersonaType::Mediator,
            profile_id: mediator.id.clone(),
            sender_id: mediator.public_id.clone(),
            name: mediator.name.clone(),
            avatar: mediator.avatar.clone(),
            agent: mediator.agent_config.clone(),
            prompt,
        }
    }

    /// `None` for human participants
    pub fn from_participant(
        participant: &ParticipantProfile,
        prompt: AgentChatPromptConfig,
    ) -> Option<Self> {
        let agent = participant.agent_config.clone()?;
        Some(Self {
            class: AgentPersonaType::Participant,
            profile_id: participant.private_id.clone(),
            sender_id: participant.public_id.clone(),
            name: participant.display_name().to_string(),
            avatar: participant.avatar.clone(),
            agent,
            prompt,
        })
    }

    pub fn sender_type(&self) -> ChatSenderType {
        match self.class {
            AgentPersonaType::Participant => ChatSenderType::Participant,
            AgentPersonaType::Mediator => ChatSenderType::Mediator,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.agent.model_settings.model_name
    }

    pub fn words_per_minute(&self) -> u32 {
        self.prompt.chat_settings.words_per_minute
    }
}

/// Fallback chat prompt for an agent participant
pub fn default_participant_prompt(stage_id: &str) -> AgentChatPromptConfig {
    AgentChatPromptConfig {
        prompt_context: DEFAULT_PARTICIPANT_CHAT_PROMPT.to_string(),
        ..AgentChatPromptConfig::new(stage_id)
    }
}

/// Mediators of a cohort that take part in the stage and have a chat prompt
pub fn load_mediators(
    store: &DocumentStore,
    experiment_id: &str,
    cohort_id: &str,
    stage_id: &str,
) -> CoordinationResult<Vec<Responder>> {
    let mediators: Vec<MediatorProfile> = store.list(&paths::mediators(experiment_id))?;
    let mut responders = Vec::new();
    for mediator in mediators
        .iter()
        .filter(|m| m.current_cohort_id == cohort_id && m.is_active_in(stage_id))
    {
        let prompt_path = paths::chat_prompt(experiment_id, &mediator.agent_config.agent_id, stage_id);
        if let Some(prompt) = store.get::<AgentChatPromptConfig>(&prompt_path)? {
            responders.push(Responder::from_mediator(mediator, prompt));
        }
    }
    Ok(responders)
}

/// In-progress agent participants of a cohort currently in the stage
pub fn load_agent_participants(
    store: &DocumentStore,
    experiment_id: &str,
    cohort_id: &str,
    stage_id: &str,
) -> CoordinationResult<Vec<Responder>> {
    let participants: Vec<ParticipantProfile> = store.list(&paths::participants(experiment_id))?;
    let mut responders = Vec::new();
    for participant in participants.iter().filter(|p| {
        p.is_agent()
            && p.current_status == ParticipantStatus::InProgress
            && p.current_cohort_id == cohort_id
            && p.current_stage_id == stage_id
    }) {
        if let Some(responder) = load_participant_responder(store, experiment_id, participant)? {
            responders.push(responder);
        }
    }
    Ok(responders)
}

/// Resolve one agent participant with its stage prompt or the fallback
pub fn load_participant_responder(
    store: &DocumentStore,
    experiment_id: &str,
    participant: &ParticipantProfile,
) -> CoordinationResult<Option<Responder>> {
    let Some(agent) = participant.agent_config.as_ref() else {
        return Ok(None);
    };
    let stage_id = &participant.current_stage_id;
    let prompt = store
        .get::<AgentChatPromptConfig>(&paths::chat_prompt(experiment_id, &agent.agent_id, stage_id))?
        .unwrap_or_else(|| default_participant_prompt(stage_id));
    Ok(Responder::from_participant(participant, prompt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn mediator(id: &str, cohort: &str, stage: &str) -> MediatorProfile {
        MediatorProfile {
            id: id.to_string(),
            public_id: format!("pub-{}", id),
            name: "Mod".to_string(),
            avatar: None,
            current_cohort_id: cohort.to_string(),
            active_stage_map: BTreeMap::from([(stage.to_string(), true)]),
            agent_config: ProfileAgentConfig::new("persona"),
        }
    }

    #[test]
    fn test_mediators_filtered_by_cohort_and_prompt() {
        let store = DocumentStore::new();
        store.set(&paths::mediator("e1", "m1"), &mediator("m1", "c1", "chat")).unwrap();
        store.set(&paths::mediator("e1", "m2"), &mediator("m2", "c2", "chat")).unwrap();
        store.set(&paths::mediator("e1", "m3"), &mediator("m3", "c1", "other")).unwrap();
        store
            .set(
                &paths::chat_prompt("e1", "persona", "chat"),
                &AgentChatPromptConfig::new("chat"),
            )
            .unwrap();

        let responders = load_mediators(&store, "e1", "c1", "chat").unwrap();
        assert_eq!(responders.len(), 1);
        assert_eq!(responders[0].sender_id, "pub-m1");
        assert_eq!(responders[0].sender_type(), ChatSenderType::Mediator);
    }

    #[test]
    fn test_agent_participants_use_fallback_prompt() {
        let store = DocumentStore::new();
        let agent = ParticipantProfile::new("a1", "pub-a1", "c1", "chat")
            .with_agent(ProfileAgentConfig::new("bot"));
        let human = ParticipantProfile::new("h1", "pub-h1", "c1", "chat");
        store.set(&paths::participant("e1", "a1"), &agent).unwrap();
        store.set(&paths::participant("e1", "h1"), &human).unwrap();

        let responders = load_agent_participants(&store, "e1", "c1", "chat").unwrap();
        assert_eq!(responders.len(), 1);
        assert_eq!(responders[0].profile_id, "a1");
        assert_eq!(responders[0].prompt.prompt_context, DEFAULT_PARTICIPANT_CHAT_PROMPT);
    }
}
