//! Chat discussion state machine
//!
//! Per (cohort, stage) progression through the configured discussions.
//! The pure transition functions operate on [`ChatStagePublicData`]; the
//! [`DiscussionCoordinator`] runs them inside retrying transactions.
//!
//! The pointer only ever moves forward by one step, and nothing moves once
//! `discussion_end_timestamp` is set.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::CoordinationConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::participant::active_in_cohort;
use crate::resilience::run_in_transaction;
use crate::state::{
    paths, ChatMessage, ChatStageConfig, ChatStagePublicData, ParticipantProfile,
    SharedDocumentStore, StageConfig, StageParticipantAnswer, StagePublicData, Transaction,
};

/// Where a cohort is in a chat stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscussionState {
    /// No message has been sent yet
    NotStarted,
    /// Discussing the configured discussion at this index
    InDiscussion(usize),
    /// Started, on a stage without configured discussions
    Open,
    /// Time limit reached or every discussion completed
    Ended,
}

impl DiscussionState {
    pub fn is_ended(&self) -> bool {
        matches!(self, DiscussionState::Ended)
    }
}

/// Derive the current state from stored public data
pub fn discussion_state(stage: &ChatStageConfig, data: &ChatStagePublicData) -> DiscussionState {
    if data.discussion_end_timestamp.is_some() {
        return DiscussionState::Ended;
    }
    if !stage.discussions.is_empty() && data.current_discussion_id.is_none() {
        return DiscussionState::Ended;
    }
    if data.discussion_start_timestamp.is_none() {
        return DiscussionState::NotStarted;
    }
    match data.current_discussion_id.as_deref() {
        Some(id) => stage
            .discussion_index(id)
            .map(DiscussionState::InDiscussion)
            .unwrap_or(DiscussionState::Open),
        None => DiscussionState::Open,
    }
}

/// Set start and checkpoint timestamps if unset; returns whether anything changed
pub fn start_discussion(data: &mut ChatStagePublicData, now: DateTime<Utc>) -> bool {
    if data.discussion_end_timestamp.is_some() {
        return false;
    }
    let mut changed = false;
    if data.discussion_start_timestamp.is_none() {
        data.discussion_start_timestamp = Some(now);
        changed = true;
    }
    if data.discussion_checkpoint_timestamp.is_none() {
        data.discussion_checkpoint_timestamp = Some(now);
        changed = true;
    }
    changed
}

/// Record that a participant is ready to leave a discussion
///
/// The first timestamp wins. Ignored once the stage has ended.
pub fn mark_ready(
    data: &mut ChatStagePublicData,
    discussion_id: &str,
    public_id: &str,
    at: DateTime<Utc>,
) -> bool {
    if data.discussion_end_timestamp.is_some() {
        return false;
    }
    let ready = data
        .discussion_timestamp_map
        .entry(discussion_id.to_string())
        .or_default();
    if ready.contains_key(public_id) {
        return false;
    }
    ready.insert(public_id.to_string(), at);
    true
}

/// Advance past every discussion all active participants are ready to end
///
/// Readiness already recorded for later discussions carries the pointer
/// through them in one call. Returns whether the pointer moved. A pointer
/// that names a discussion not present in the stage configuration is an
/// invariant violation.
pub fn try_advance(
    stage: &ChatStageConfig,
    data: &mut ChatStagePublicData,
    active_public_ids: &[&str],
) -> CoordinationResult<bool> {
    if data.discussion_end_timestamp.is_some() || active_public_ids.is_empty() {
        return Ok(false);
    }

    let mut moved = false;
    while let Some(current) = data.current_discussion_id.clone() {
        let index = stage.discussion_index(&current).ok_or_else(|| {
            CoordinationError::InvariantViolation(format!(
                "current discussion {} is not configured on stage {}",
                current, stage.id
            ))
        })?;

        let all_ready = data
            .discussion_timestamp_map
            .get(&current)
            .map(|ready| active_public_ids.iter().all(|id| ready.contains_key(*id)))
            .unwrap_or(false);
        if !all_ready {
            break;
        }

        data.current_discussion_id = stage.discussions.get(index + 1).map(|d| d.id.clone());
        moved = true;
    }
    Ok(moved)
}

/// Messages a participant may see
///
/// Messages from discussions up to and including the current one, plus
/// messages outside any discussion. Stages without discussions, or data
/// without a pointer, show the full history.
pub fn visible_messages<'a>(
    stage: &ChatStageConfig,
    current_discussion_id: Option<&str>,
    messages: &'a [ChatMessage],
) -> Vec<&'a ChatMessage> {
    let unlocked = current_discussion_id
        .filter(|_| !stage.discussions.is_empty())
        .and_then(|id| stage.discussion_index(id));
    let Some(index) = unlocked else {
        return messages.iter().collect();
    };
    let allowed: Vec<&str> = stage.discussions[..=index]
        .iter()
        .map(|d| d.id.as_str())
        .collect();

    messages
        .iter()
        .filter(|m| match m.discussion_id.as_deref() {
            Some(id) => allowed.contains(&id),
            None => true,
        })
        .collect()
}

/// Load a chat stage config inside a transaction, `None` for other kinds
pub(crate) fn load_chat_stage(
    tx: &mut Transaction<'_>,
    experiment_id: &str,
    stage_id: &str,
) -> CoordinationResult<Option<ChatStageConfig>> {
    match tx.get::<StageConfig>(&paths::stage(experiment_id, stage_id))? {
        Some(StageConfig::Chat(stage)) => Ok(Some(stage)),
        Some(_) => Ok(None),
        None => Err(CoordinationError::not_found("stage", stage_id)),
    }
}

/// Load chat public data, or fresh data for a stage that has none yet
pub(crate) fn load_chat_data(
    tx: &mut Transaction<'_>,
    path: &str,
    stage: &ChatStageConfig,
) -> CoordinationResult<ChatStagePublicData> {
    match tx.get::<StagePublicData>(path)? {
        Some(StagePublicData::Chat(data)) => Ok(data),
        Some(StagePublicData::Survey(_)) => Err(CoordinationError::InvariantViolation(format!(
            "public data at {} is not chat data",
            path
        ))),
        None => Ok(ChatStagePublicData::new(stage)),
    }
}

/// Drives discussion state in the document store
pub struct DiscussionCoordinator {
    store: SharedDocumentStore,
    config: CoordinationConfig,
}

impl DiscussionCoordinator {
    pub fn new(store: SharedDocumentStore, config: CoordinationConfig) -> Self {
        Self { store, config }
    }

    /// A message was written: start the discussion timers if needed
    pub async fn handle_message_created(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<bool> {
        let policy = self.config.retry_policy();
        let started = run_in_transaction(&self.store, &policy, "start_discussion", |tx| {
            let Some(stage) = load_chat_stage(tx, experiment_id, stage_id)? else {
                return Ok(false);
            };
            let path = paths::public_data(experiment_id, cohort_id, stage_id);
            let mut data = load_chat_data(tx, &path, &stage)?;
            if !start_discussion(&mut data, Utc::now()) {
                return Ok(false);
            }
            tx.set(&path, &StagePublicData::Chat(data))?;
            Ok(true)
        })
        .await?;

        if started {
            debug!(experiment_id, cohort_id, stage_id, "Discussion started");
        }
        Ok(started)
    }

    /// A participant's chat answer was written: merge readiness and advance
    pub async fn handle_participant_answer(
        &self,
        experiment_id: &str,
        participant_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<DiscussionState> {
        let policy = self.config.retry_policy();
        let (state, advanced, cohort_id) =
            run_in_transaction(&self.store, &policy, "advance_discussion", |tx| {
                self.merge_and_advance(tx, experiment_id, participant_id, stage_id)
            })
            .await?;

        if advanced {
            info!(
                experiment_id,
                cohort_id = %cohort_id,
                stage_id,
                state = ?state,
                "Discussion advanced"
            );
        }
        Ok(state)
    }

    fn merge_and_advance(
        &self,
        tx: &mut Transaction<'_>,
        experiment_id: &str,
        participant_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<(DiscussionState, bool, String)> {
        let participant: ParticipantProfile = tx
            .get(&paths::participant(experiment_id, participant_id))?
            .ok_or_else(|| CoordinationError::not_found("participant", participant_id))?;
        let cohort_id = participant.current_cohort_id.clone();
        let Some(stage) = load_chat_stage(tx, experiment_id, stage_id)? else {
            return Ok((DiscussionState::NotStarted, false, cohort_id));
        };
        let answer = match tx.get::<StageParticipantAnswer>(&paths::participant_answer(
            experiment_id,
            participant_id,
            stage_id,
        ))? {
            Some(StageParticipantAnswer::Chat(answer)) => answer,
            _ => return Ok((DiscussionState::NotStarted, false, cohort_id)),
        };

        let path = paths::public_data(experiment_id, &cohort_id, stage_id);
        let mut data = load_chat_data(tx, &path, &stage)?;
        let mut changed = false;
        for (discussion_id, ready_at) in &answer.discussion_timestamp_map {
            if let Some(at) = ready_at {
                changed |= mark_ready(&mut data, discussion_id, &participant.public_id, *at);
            }
        }

        let participants: Vec<ParticipantProfile> = tx.list(&paths::participants(experiment_id))?;
        let active: Vec<&str> = active_in_cohort(&participants, &cohort_id)
            .into_iter()
            .map(|p| p.public_id.as_str())
            .collect();
        let advanced = try_advance(&stage, &mut data, &active)?;

        let state = discussion_state(&stage, &data);
        if changed || advanced {
            tx.set(&path, &StagePublicData::Chat(data))?;
        }
        Ok((state, advanced, cohort_id))
    }
}
