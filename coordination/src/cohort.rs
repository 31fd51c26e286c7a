//! Cohort administration
//!
//! Manual cohort creation, locking, joining and cascading deletion, plus the
//! default-mediator population shared with the transfer matcher.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::CoordinationConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::resilience::run_in_transaction;
use crate::state::{
    paths, AgentChatPromptConfig, AgentPersonaConfig, AgentPersonaType, CohortConfig,
    CohortParticipantConfig, MediatorProfile, ParticipantProfile, ParticipantStatus,
    ProfileAgentConfig, ResponseType, SharedDocumentStore, Transaction,
};

/// Create a mediator in `cohort` for every default-add mediator persona
///
/// A persona is skipped when every one of its chat prompts resolves to
/// `hide` under the cohort's condition.
pub fn add_default_mediators(
    tx: &mut Transaction<'_>,
    experiment_id: &str,
    cohort: &CohortConfig,
) -> CoordinationResult<Vec<MediatorProfile>> {
    let personas: Vec<AgentPersonaConfig> = tx.list(&paths::agents(experiment_id))?;
    let mut created = Vec::new();

    for persona in personas {
        if persona.persona_type != AgentPersonaType::Mediator || !persona.is_default_add_to_cohort {
            continue;
        }
        let prompts: Vec<AgentChatPromptConfig> =
            tx.list(&paths::chat_prompts(experiment_id, &persona.id))?;
        let active_stage_map: BTreeMap<String, bool> = prompts
            .iter()
            .map(|prompt| {
                let response = prompt.response_for_condition(cohort.experimental_condition.as_deref());
                (prompt.id.clone(), response.response_type != ResponseType::Hide)
            })
            .collect();
        if !active_stage_map.values().any(|active| *active) {
            debug!(persona_id = %persona.id, cohort_id = %cohort.id, "Mediator hidden for condition");
            continue;
        }

        let mediator = MediatorProfile {
            id: uuid::Uuid::new_v4().to_string(),
            public_id: uuid::Uuid::new_v4().to_string(),
            name: persona.name.clone(),
            avatar: persona.avatar.clone(),
            current_cohort_id: cohort.id.clone(),
            active_stage_map,
            agent_config: ProfileAgentConfig {
                agent_id: persona.id.clone(),
                prompt_context: String::new(),
                model_settings: persona.default_model_settings.clone(),
            },
        };
        tx.set(&paths::mediator(experiment_id, &mediator.id), &mediator)?;
        created.push(mediator);
    }

    Ok(created)
}

/// Count participants occupying a slot in the cohort, excluding one id
fn occupied_slots(
    participants: &[ParticipantProfile],
    cohort: &CohortConfig,
    exclude_id: &str,
) -> usize {
    let include_all = cohort.participant_config.include_all_participants_in_cohort_count;
    participants
        .iter()
        .filter(|p| p.private_id != exclude_id)
        .filter(|p| p.authoritative_cohort_id() == cohort.id)
        .filter(|p| p.occupies_cohort_slot(include_all))
        .count()
}

/// Reject a join into a locked or full cohort
pub(crate) fn check_can_join(
    tx: &mut Transaction<'_>,
    experiment_id: &str,
    cohort_id: &str,
    participant_id: &str,
) -> CoordinationResult<()> {
    let cohort: CohortConfig = tx
        .get(&paths::cohort(experiment_id, cohort_id))?
        .ok_or_else(|| CoordinationError::not_found("cohort", cohort_id))?;
    if cohort.is_locked {
        return Err(CoordinationError::CohortLocked);
    }
    let participants: Vec<ParticipantProfile> = tx.list(&paths::participants(experiment_id))?;
    if !cohort
        .participant_config
        .has_room_for_one_more(occupied_slots(&participants, &cohort, participant_id))
    {
        return Err(CoordinationError::CohortFull);
    }
    Ok(())
}

/// Experimenter-facing cohort operations
pub struct CohortAdmin {
    store: SharedDocumentStore,
    config: CoordinationConfig,
}

impl CohortAdmin {
    pub fn new(store: SharedDocumentStore, config: CoordinationConfig) -> Self {
        Self { store, config }
    }

    /// Create a cohort (with default mediators)
    pub async fn create_cohort(
        &self,
        experiment_id: &str,
        name: &str,
        participant_config: CohortParticipantConfig,
        condition: Option<String>,
    ) -> CoordinationResult<CohortConfig> {
        let policy = self.config.retry_policy();
        let cohort = run_in_transaction(&self.store, &policy, "create_cohort", |tx| {
            let mut cohort =
                CohortConfig::new(uuid::Uuid::new_v4().to_string(), participant_config.clone())
                    .with_name(name);
            cohort.experimental_condition = condition.clone();
            tx.set(&paths::cohort(experiment_id, &cohort.id), &cohort)?;
            add_default_mediators(tx, experiment_id, &cohort)?;
            Ok(cohort)
        })
        .await?;

        info!(experiment_id, cohort_id = %cohort.id, "Cohort created");
        Ok(cohort)
    }

    /// Lock or unlock a cohort against new joins
    pub async fn set_cohort_lock(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        locked: bool,
    ) -> CoordinationResult<()> {
        let policy = self.config.retry_policy();
        run_in_transaction(&self.store, &policy, "set_cohort_lock", |tx| {
            let path = paths::cohort(experiment_id, cohort_id);
            let mut cohort: CohortConfig = tx
                .get(&path)?
                .ok_or_else(|| CoordinationError::not_found("cohort", cohort_id))?;
            cohort.is_locked = locked;
            tx.set(&path, &cohort)?;
            Ok(())
        })
        .await?;

        info!(experiment_id, cohort_id, locked, "Cohort lock changed");
        Ok(())
    }

    /// Move an existing participant into a cohort
    pub async fn join_cohort(
        &self,
        experiment_id: &str,
        participant_id: &str,
        cohort_id: &str,
    ) -> CoordinationResult<ParticipantProfile> {
        let policy = self.config.retry_policy();
        run_in_transaction(&self.store, &policy, "join_cohort", |tx| {
            let path = paths::participant(experiment_id, participant_id);
            let mut participant: ParticipantProfile = tx
                .get(&path)?
                .ok_or_else(|| CoordinationError::not_found("participant", participant_id))?;
            check_can_join(tx, experiment_id, cohort_id, participant_id)?;
            participant.current_cohort_id = cohort_id.to_string();
            tx.set(&path, &participant)?;
            Ok(participant)
        })
        .await
    }

    /// Delete a cohort, cascading to participants and mediators
    ///
    /// Members are marked deleted; participants with a pending transfer into
    /// the cohort go back to in-progress in their current cohort. Participants
    /// already reserved out of the cohort keep their reservation.
    pub async fn delete_cohort(&self, experiment_id: &str, cohort_id: &str) -> CoordinationResult<usize> {
        let policy = self.config.retry_policy();
        let affected = run_in_transaction(&self.store, &policy, "delete_cohort", |tx| {
            let cohort_path = paths::cohort(experiment_id, cohort_id);
            if tx.get_value(&cohort_path)?.is_none() {
                return Err(CoordinationError::not_found("cohort", cohort_id));
            }

            let mut affected = 0;
            let participants: Vec<ParticipantProfile> =
                tx.list(&paths::participants(experiment_id))?;
            for mut participant in participants {
                if participant.transfer_cohort_id.as_deref() == Some(cohort_id) {
                    participant.transfer_cohort_id = None;
                    if participant.current_status == ParticipantStatus::TransferPending {
                        participant.transition_to(ParticipantStatus::InProgress)?;
                    }
                } else if participant.authoritative_cohort_id() == cohort_id
                    && participant.current_status != ParticipantStatus::Deleted
                {
                    participant.transition_to(ParticipantStatus::Deleted)?;
                } else {
                    continue;
                }
                tx.set(
                    &paths::participant(experiment_id, &participant.private_id),
                    &participant,
                )?;
                affected += 1;
            }

            let mediators: Vec<MediatorProfile> = tx.list(&paths::mediators(experiment_id))?;
            for mediator in mediators.iter().filter(|m| m.current_cohort_id == cohort_id) {
                tx.delete(&paths::mediator(experiment_id, &mediator.id));
            }
            tx.delete(&cohort_path);
            Ok(affected)
        })
        .await?;

        info!(experiment_id, cohort_id, participants = affected, "Cohort deleted");
        Ok(affected)
    }
}
