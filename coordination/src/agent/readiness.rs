//! Agent participant readiness
//!
//! After each chat message, agent participants are asked whether they are
//! done. A "YES" marks them ready for the current discussion, or completes
//! the stage when no later discussion exists.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::model::{ModelRequest, SharedModelClient};
use super::prompt::{format_transcript, ready_to_end_prompt};
use super::responder::{load_agent_participants, Responder};
use crate::chat::visible_messages;
use crate::config::CoordinationConfig;
use crate::error::CoordinationResult;
use crate::participant::advance_in_transaction;
use crate::resilience::run_in_transaction;
use crate::state::{
    paths, sort_messages, ChatMessage, ChatStageConfig, ChatStageParticipantAnswer,
    ChatStagePublicData, ParticipantProfile, ParticipantStatus, SharedDocumentStore, StageConfig,
    StageParticipantAnswer, StagePublicData,
};

/// Affirmative token the readiness prompt asks for
const READY_TOKEN: &str = "YES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    NotReady,
    /// Ready timestamp recorded for this discussion
    MarkedReady { discussion_id: String },
    /// Stage completed; the next stage, or `None` at the end of the experiment
    AdvancedStage { next_stage: Option<String> },
    /// The participant left the stage before the answer arrived
    MovedOn,
}

/// Whether a ready answer should mark the discussion rather than finish the stage
fn later_discussion_exists(stage: &ChatStageConfig, data: &ChatStagePublicData) -> Option<String> {
    let current = data.current_discussion_id.as_ref()?;
    let last = stage.discussions.last()?;
    (current != &last.id).then(|| current.clone())
}

pub struct ReadinessChecker {
    store: SharedDocumentStore,
    config: CoordinationConfig,
    client: SharedModelClient,
}

impl ReadinessChecker {
    pub fn new(store: SharedDocumentStore, config: CoordinationConfig, client: SharedModelClient) -> Self {
        Self {
            store,
            config,
            client,
        }
    }

    /// Reactor entry point for a new chat message
    pub async fn handle_message_created(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<Vec<(String, ReadinessOutcome)>> {
        let stage = match self.store.get::<StageConfig>(&paths::stage(experiment_id, stage_id))? {
            Some(StageConfig::Chat(stage)) => stage,
            _ => return Ok(Vec::new()),
        };
        let data = match self
            .store
            .get::<StagePublicData>(&paths::public_data(experiment_id, cohort_id, stage_id))?
        {
            Some(StagePublicData::Chat(data)) => data,
            _ => ChatStagePublicData::new(&stage),
        };
        if data.discussion_end_timestamp.is_some() {
            return Ok(Vec::new());
        }

        let agents = load_agent_participants(&self.store, experiment_id, cohort_id, stage_id)?;
        if agents.is_empty() {
            return Ok(Vec::new());
        }

        let mut messages: Vec<ChatMessage> =
            self.store.list(&paths::chats(experiment_id, cohort_id, stage_id))?;
        sort_messages(&mut messages);
        let visible = visible_messages(&stage, data.current_discussion_id.as_deref(), &messages);
        let transcript = format_transcript(&visible);

        let mut outcomes = Vec::new();
        for responder in &agents {
            let outcome = if self.is_ready(responder, &stage, &transcript).await {
                self.apply(experiment_id, stage_id, responder, &stage, &data).await?
            } else {
                ReadinessOutcome::NotReady
            };
            outcomes.push((responder.profile_id.clone(), outcome));
        }
        Ok(outcomes)
    }

    async fn is_ready(&self, responder: &Responder, stage: &ChatStageConfig, transcript: &str) -> bool {
        let request = ModelRequest::new(
            ready_to_end_prompt(responder, stage, transcript),
            responder.model_name(),
        )
        .with_generation(responder.prompt.generation_config.clone());

        let response = self.client.generate(request).await;
        if !response.is_ok() {
            warn!(
                participant_id = %responder.profile_id,
                status = %response.status,
                "Readiness check failed"
            );
            return false;
        }
        let ready = response
            .text
            .as_deref()
            .is_some_and(|text| text.contains(READY_TOKEN));
        debug!(participant_id = %responder.profile_id, ready, "Readiness check");
        ready
    }

    async fn apply(
        &self,
        experiment_id: &str,
        stage_id: &str,
        responder: &Responder,
        stage: &ChatStageConfig,
        data: &ChatStagePublicData,
    ) -> CoordinationResult<ReadinessOutcome> {
        let participant_id = responder.profile_id.as_str();
        let policy = self.config.retry_policy();

        if let Some(discussion_id) = later_discussion_exists(stage, data) {
            let marked = run_in_transaction(&self.store, &policy, "agent_ready_to_end", |tx| {
                let participant: Option<ParticipantProfile> =
                    tx.get(&paths::participant(experiment_id, participant_id))?;
                if !participant.is_some_and(|p| p.current_stage_id == stage_id) {
                    return Ok(false);
                }
                let path = paths::participant_answer(experiment_id, participant_id, stage_id);
                let mut answer = match tx.get::<StageParticipantAnswer>(&path)? {
                    Some(StageParticipantAnswer::Chat(answer)) => answer,
                    _ => ChatStageParticipantAnswer::new(stage_id),
                };
                let entry = answer
                    .discussion_timestamp_map
                    .entry(discussion_id.clone())
                    .or_insert(None);
                if entry.is_none() {
                    *entry = Some(Utc::now());
                    tx.set(&path, &StageParticipantAnswer::Chat(answer))?;
                }
                Ok(true)
            })
            .await?;

            return Ok(if marked {
                info!(experiment_id, participant_id, discussion_id = %discussion_id, "Agent ready to end discussion");
                ReadinessOutcome::MarkedReady { discussion_id }
            } else {
                ReadinessOutcome::MovedOn
            });
        }

        let advanced = run_in_transaction(&self.store, &policy, "agent_complete_chat", |tx| {
            let participant: Option<ParticipantProfile> =
                tx.get(&paths::participant(experiment_id, participant_id))?;
            let still_here = participant.is_some_and(|p| {
                p.current_stage_id == stage_id && p.current_status == ParticipantStatus::InProgress
            });
            if !still_here {
                return Ok(None);
            }
            let (_, next) = advance_in_transaction(tx, experiment_id, participant_id, Utc::now())?;
            Ok(Some(next))
        })
        .await?;

        Ok(match advanced {
            Some(next_stage) => {
                info!(experiment_id, participant_id, next_stage = ?next_stage, "Agent finished chat stage");
                ReadinessOutcome::AdvancedStage { next_stage }
            }
            None => ReadinessOutcome::MovedOn,
        })
    }
}
