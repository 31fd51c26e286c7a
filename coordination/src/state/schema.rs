//! Document path layout for the experiment store
//!
//! Every document lives at a hierarchical, slash-separated path. A document's
//! collection is its parent path, so listing `experiments/e1/participants`
//! returns every participant of experiment `e1`.

/// Top-level collection holding all experiments
pub const COLLECTION_EXPERIMENTS: &str = "experiments";

/// Sub-collection of stage configs under an experiment
pub const COLLECTION_STAGES: &str = "stages";

/// Sub-collection of cohorts under an experiment
pub const COLLECTION_COHORTS: &str = "cohorts";

/// Sub-collection of participants under an experiment
pub const COLLECTION_PARTICIPANTS: &str = "participants";

/// Sub-collection of per-cohort public stage data
pub const COLLECTION_PUBLIC_STAGE_DATA: &str = "publicStageData";

/// Sub-collection of per-participant stage answers
pub const COLLECTION_STAGE_DATA: &str = "stageData";

/// Sub-collection of chat messages under chat public data
pub const COLLECTION_CHATS: &str = "chats";

/// Sub-collection of agent reply dedup markers under chat public data
pub const COLLECTION_TRIGGER_LOGS: &str = "triggerLogs";

/// Sub-collection of agent personas under an experiment
pub const COLLECTION_AGENTS: &str = "agents";

/// Sub-collection of per-stage chat prompts under an agent persona
pub const COLLECTION_CHAT_PROMPTS: &str = "chatPrompts";

/// Sub-collection of mediator profiles under an experiment
pub const COLLECTION_MEDIATORS: &str = "mediators";

/// Path builders for every document kind
pub mod paths {
    use super::*;

    /// Experiment document
    pub fn experiment(experiment_id: &str) -> String {
        format!("{}/{}", COLLECTION_EXPERIMENTS, experiment_id)
    }

    /// Stage config collection
    pub fn stages(experiment_id: &str) -> String {
        format!("{}/{}", experiment(experiment_id), COLLECTION_STAGES)
    }

    /// Stage config document
    pub fn stage(experiment_id: &str, stage_id: &str) -> String {
        format!("{}/{}", stages(experiment_id), stage_id)
    }

    /// Cohort collection
    pub fn cohorts(experiment_id: &str) -> String {
        format!("{}/{}", experiment(experiment_id), COLLECTION_COHORTS)
    }

    /// Cohort document
    pub fn cohort(experiment_id: &str, cohort_id: &str) -> String {
        format!("{}/{}", cohorts(experiment_id), cohort_id)
    }

    /// Participant collection
    pub fn participants(experiment_id: &str) -> String {
        format!("{}/{}", experiment(experiment_id), COLLECTION_PARTICIPANTS)
    }

    /// Participant document, keyed by private id
    pub fn participant(experiment_id: &str, private_id: &str) -> String {
        format!("{}/{}", participants(experiment_id), private_id)
    }

    /// Participant stage answer document
    pub fn participant_answer(experiment_id: &str, private_id: &str, stage_id: &str) -> String {
        format!(
            "{}/{}/{}",
            participant(experiment_id, private_id),
            COLLECTION_STAGE_DATA,
            stage_id
        )
    }

    /// Public stage data document for a (cohort, stage)
    pub fn public_data(experiment_id: &str, cohort_id: &str, stage_id: &str) -> String {
        format!(
            "{}/{}/{}",
            cohort(experiment_id, cohort_id),
            COLLECTION_PUBLIC_STAGE_DATA,
            stage_id
        )
    }

    /// Chat message collection for a (cohort, stage)
    pub fn chats(experiment_id: &str, cohort_id: &str, stage_id: &str) -> String {
        format!(
            "{}/{}",
            public_data(experiment_id, cohort_id, stage_id),
            COLLECTION_CHATS
        )
    }

    /// Chat message document
    pub fn chat(experiment_id: &str, cohort_id: &str, stage_id: &str, message_id: &str) -> String {
        format!("{}/{}", chats(experiment_id, cohort_id, stage_id), message_id)
    }

    /// Dedup marker document for (trigger message, responder class)
    pub fn trigger_log(
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
        trigger_message_id: &str,
        responder: &str,
    ) -> String {
        format!(
            "{}/{}/{}-{}",
            public_data(experiment_id, cohort_id, stage_id),
            COLLECTION_TRIGGER_LOGS,
            trigger_message_id,
            responder
        )
    }

    /// Agent persona collection
    pub fn agents(experiment_id: &str) -> String {
        format!("{}/{}", experiment(experiment_id), COLLECTION_AGENTS)
    }

    /// Agent persona document
    pub fn agent(experiment_id: &str, agent_id: &str) -> String {
        format!("{}/{}", agents(experiment_id), agent_id)
    }

    /// Chat prompt collection of an agent persona
    pub fn chat_prompts(experiment_id: &str, agent_id: &str) -> String {
        format!("{}/{}", agent(experiment_id, agent_id), COLLECTION_CHAT_PROMPTS)
    }

    /// Chat prompt of an agent persona for one stage
    pub fn chat_prompt(experiment_id: &str, agent_id: &str, stage_id: &str) -> String {
        format!("{}/{}", chat_prompts(experiment_id, agent_id), stage_id)
    }

    /// Mediator collection
    pub fn mediators(experiment_id: &str) -> String {
        format!("{}/{}", experiment(experiment_id), COLLECTION_MEDIATORS)
    }

    /// Mediator document
    pub fn mediator(experiment_id: &str, mediator_id: &str) -> String {
        format!("{}/{}", mediators(experiment_id), mediator_id)
    }

    /// Parent collection of a document path
    pub fn collection_of(path: &str) -> &str {
        path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }

    /// Final segment (document id) of a path
    pub fn document_id(path: &str) -> &str {
        path.rsplit_once('/').map(|(_, id)| id).unwrap_or(path)
    }
}

/// A document path that reactors subscribe to, with its captured parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPath {
    /// `experiments/{e}/cohorts/{c}/publicStageData/{s}/chats/{m}`
    ChatMessage {
        experiment_id: String,
        cohort_id: String,
        stage_id: String,
        message_id: String,
    },
    /// `experiments/{e}/cohorts/{c}/publicStageData/{s}`
    PublicStageData {
        experiment_id: String,
        cohort_id: String,
        stage_id: String,
    },
    /// `experiments/{e}/participants/{p}/stageData/{s}`
    ParticipantAnswer {
        experiment_id: String,
        participant_id: String,
        stage_id: String,
    },
    /// `experiments/{e}/participants/{p}`
    Participant {
        experiment_id: String,
        participant_id: String,
    },
}

impl TriggerPath {
    /// Match a concrete document path against the subscribed patterns
    pub fn parse(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.first() != Some(&COLLECTION_EXPERIMENTS) || parts.iter().any(|p| p.is_empty()) {
            return None;
        }

        match parts.as_slice() {
            [_, e, COLLECTION_COHORTS, c, COLLECTION_PUBLIC_STAGE_DATA, s, COLLECTION_CHATS, m] => {
                Some(Self::ChatMessage {
                    experiment_id: e.to_string(),
                    cohort_id: c.to_string(),
                    stage_id: s.to_string(),
                    message_id: m.to_string(),
                })
            }
            [_, e, COLLECTION_COHORTS, c, COLLECTION_PUBLIC_STAGE_DATA, s] => {
                Some(Self::PublicStageData {
                    experiment_id: e.to_string(),
                    cohort_id: c.to_string(),
                    stage_id: s.to_string(),
                })
            }
            [_, e, COLLECTION_PARTICIPANTS, p, COLLECTION_STAGE_DATA, s] => {
                Some(Self::ParticipantAnswer {
                    experiment_id: e.to_string(),
                    participant_id: p.to_string(),
                    stage_id: s.to_string(),
                })
            }
            [_, e, COLLECTION_PARTICIPANTS, p] => Some(Self::Participant {
                experiment_id: e.to_string(),
                participant_id: p.to_string(),
            }),
            _ => None,
        }
    }
}
