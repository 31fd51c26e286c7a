//! Transfer matcher
//!
//! Forms a new cohort out of participants waiting in a transfer stage once
//! every required classification has enough waiting members. The whole
//! read-classify-reserve sequence runs inside one retrying transaction, so a
//! participant can never be reserved into two cohorts.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use super::condition::assign_condition;
use crate::cohort::add_default_mediators;
use crate::config::CoordinationConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::resilience::run_in_transaction;
use crate::state::{
    paths, CohortConfig, ParticipantProfile, ParticipantStatus, SharedDocumentStore, StageConfig,
    StagePublicData, SurveyStagePublicData, Transaction, TransferStageConfig,
};

/// Result of one matching attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// The participant is not waiting in a transfer stage
    NotWaiting,
    /// Quotas are not met yet; the participant stays queued
    Queued,
    /// The participant waited past the stage timeout
    TimedOut,
    /// A new cohort was formed
    CohortFormed {
        cohort_id: String,
        condition: Option<String>,
        participant_ids: Vec<String>,
    },
}

impl TransferOutcome {
    pub fn is_formed(&self) -> bool {
        matches!(self, TransferOutcome::CohortFormed { .. })
    }
}

/// A participant eligible for matching, with its classification
#[derive(Debug, Clone, PartialEq)]
pub struct WaitingParticipant {
    pub private_id: String,
    pub public_id: String,
    /// Answer to the sorting question, if recorded
    pub class: Option<String>,
    /// When the participant reached the transfer stage
    pub queued_at: Option<DateTime<Utc>>,
}

/// Whether a participant is waiting to be matched in the given stage
pub fn is_waiting_in(participant: &ParticipantProfile, stage_id: &str) -> bool {
    participant.current_stage_id == stage_id
        && participant.current_status == ParticipantStatus::InProgress
        && participant.transfer_cohort_id.is_none()
        && participant.is_connected()
}

/// Whether a waiting participant has exceeded the stage timeout
pub fn has_timed_out(
    stage: &TransferStageConfig,
    participant: &ParticipantProfile,
    now: DateTime<Utc>,
) -> bool {
    if !stage.enable_timeout {
        return false;
    }
    match participant.reached_stage_at(&stage.id) {
        Some(reached) => now - reached >= Duration::seconds(stage.timeout_seconds as i64),
        None => false,
    }
}

/// Choose cohort members, or `None` if some classification is short
///
/// Each bucket is ordered with the triggering participant first, then
/// earliest queued, then by id.
pub fn plan_cohort(
    stage: &TransferStageConfig,
    waiting: &[WaitingParticipant],
    trigger_id: &str,
) -> Option<Vec<String>> {
    let mut buckets: BTreeMap<&str, Vec<&WaitingParticipant>> = BTreeMap::new();
    for participant in waiting {
        if let Some(class) = participant.class.as_deref() {
            buckets.entry(class).or_default().push(participant);
        }
    }

    let mut selected = Vec::new();
    for (class, required) in &stage.participant_counts {
        let required = *required as usize;
        if required == 0 {
            continue;
        }
        let bucket = buckets.get_mut(class.as_str())?;
        if bucket.len() < required {
            return None;
        }
        bucket.sort_by(|a, b| {
            (a.private_id != trigger_id)
                .cmp(&(b.private_id != trigger_id))
                .then_with(|| match (a.queued_at, b.queued_at) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.private_id.cmp(&b.private_id))
        });
        selected.extend(bucket.iter().take(required).map(|p| p.private_id.clone()));
    }

    if selected.is_empty() {
        None
    } else {
        Some(selected)
    }
}

/// Runs matching attempts against the document store
pub struct TransferMatcher {
    store: SharedDocumentStore,
    config: CoordinationConfig,
}

impl TransferMatcher {
    pub fn new(store: SharedDocumentStore, config: CoordinationConfig) -> Self {
        Self { store, config }
    }

    /// Reactor entry point for a participant document write
    ///
    /// Safe to call redundantly; a no-op unless the participant is waiting
    /// in a transfer stage.
    pub async fn handle_participant_changed(
        &self,
        experiment_id: &str,
        participant_id: &str,
    ) -> CoordinationResult<TransferOutcome> {
        let Some(participant) = self
            .store
            .get::<ParticipantProfile>(&paths::participant(experiment_id, participant_id))?
        else {
            return Ok(TransferOutcome::NotWaiting);
        };
        let stage_path = paths::stage(experiment_id, &participant.current_stage_id);
        match self.store.get::<StageConfig>(&stage_path)? {
            Some(StageConfig::Transfer(_))
                if is_waiting_in(&participant, &participant.current_stage_id) =>
            {
                self.attempt_transfer(experiment_id, &participant.current_stage_id, participant_id)
                    .await
            }
            _ => Ok(TransferOutcome::NotWaiting),
        }
    }

    /// Try to form a cohort that includes (or was triggered by) a participant
    pub async fn attempt_transfer(
        &self,
        experiment_id: &str,
        stage_id: &str,
        participant_id: &str,
    ) -> CoordinationResult<TransferOutcome> {
        let policy = self.config.retry_policy();
        let result = run_in_transaction(&self.store, &policy, "transfer", |tx| {
            match_in_transaction(tx, experiment_id, stage_id, participant_id, Utc::now())
        })
        .await;

        match &result {
            Ok(TransferOutcome::CohortFormed {
                cohort_id,
                condition,
                participant_ids,
            }) => info!(
                experiment_id,
                stage_id,
                cohort_id = %cohort_id,
                condition = condition.as_deref().unwrap_or("none"),
                members = participant_ids.len(),
                "Cohort formed"
            ),
            Ok(TransferOutcome::TimedOut) => {
                info!(experiment_id, stage_id, participant_id, "Transfer timed out")
            }
            Ok(outcome) => {
                debug!(experiment_id, stage_id, participant_id, ?outcome, "No cohort formed")
            }
            Err(e) if e.is_config() => {
                error!(experiment_id, stage_id, error = %e, "Transfer stage misconfigured")
            }
            Err(_) => {}
        }
        result
    }

    /// Match every waiting participant in a stage until no quota can be met
    pub async fn match_all(
        &self,
        experiment_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<Vec<TransferOutcome>> {
        let mut formed = Vec::new();
        let participants: Vec<ParticipantProfile> =
            self.store.list(&paths::participants(experiment_id))?;

        for participant in participants {
            if !is_waiting_in(&participant, stage_id) {
                continue;
            }
            let outcome = self
                .attempt_transfer(experiment_id, stage_id, &participant.private_id)
                .await?;
            if outcome.is_formed() {
                formed.push(outcome);
            }
        }
        Ok(formed)
    }
}

fn match_in_transaction(
    tx: &mut Transaction<'_>,
    experiment_id: &str,
    stage_id: &str,
    trigger_id: &str,
    now: DateTime<Utc>,
) -> CoordinationResult<TransferOutcome> {
    let stage = match tx.get::<StageConfig>(&paths::stage(experiment_id, stage_id))? {
        Some(StageConfig::Transfer(stage)) => stage,
        Some(_) => return Ok(TransferOutcome::NotWaiting),
        None => return Err(CoordinationError::not_found("stage", stage_id)),
    };
    if stage.cohort_size() == 0 {
        return Err(CoordinationError::Config(format!(
            "transfer stage {} requires no participants",
            stage.id
        )));
    }

    let trigger: ParticipantProfile = tx
        .get(&paths::participant(experiment_id, trigger_id))?
        .ok_or_else(|| CoordinationError::not_found("participant", trigger_id))?;
    if !is_waiting_in(&trigger, stage_id) {
        return Ok(TransferOutcome::NotWaiting);
    }
    let staging_cohort = trigger.current_cohort_id.clone();

    // Re-read the live pool; never trust a pre-transaction snapshot.
    let participants: Vec<ParticipantProfile> = tx.list(&paths::participants(experiment_id))?;
    let mut pool = Vec::new();
    let mut trigger_timed_out = false;
    for mut participant in participants {
        if participant.current_cohort_id != staging_cohort || !is_waiting_in(&participant, stage_id)
        {
            continue;
        }
        if has_timed_out(&stage, &participant, now) {
            participant.transition_to(ParticipantStatus::TransferTimeout)?;
            tx.set(
                &paths::participant(experiment_id, &participant.private_id),
                &participant,
            )?;
            trigger_timed_out |= participant.private_id == trigger_id;
            continue;
        }
        pool.push(participant);
    }
    if trigger_timed_out {
        return Ok(TransferOutcome::TimedOut);
    }

    let survey = match tx.get::<StagePublicData>(&paths::public_data(
        experiment_id,
        &staging_cohort,
        &stage.survey_stage_id,
    ))? {
        Some(StagePublicData::Survey(data)) => data,
        _ => SurveyStagePublicData::new(stage.survey_stage_id.clone()),
    };

    let waiting: Vec<WaitingParticipant> = pool
        .iter()
        .map(|p| WaitingParticipant {
            private_id: p.private_id.clone(),
            public_id: p.public_id.clone(),
            class: survey.classification_of(&p.public_id, &stage.survey_question_id),
            queued_at: p.reached_stage_at(stage_id),
        })
        .collect();

    let Some(selected) = plan_cohort(&stage, &waiting, trigger_id) else {
        return Ok(TransferOutcome::Queued);
    };

    let condition = if stage.condition_probabilities.is_empty() {
        None
    } else {
        Some(assign_condition(
            &stage.condition_probabilities,
            &mut rand::thread_rng(),
        )?)
    };

    let cohort_id = uuid::Uuid::new_v4().to_string();
    let mut cohort = CohortConfig::new(&cohort_id, stage.new_cohort_participant_config.clone())
        .with_name(format!("Transfer from {}", stage.id));
    cohort.experimental_condition = condition.clone();
    tx.set(&paths::cohort(experiment_id, &cohort_id), &cohort)?;
    add_default_mediators(tx, experiment_id, &cohort)?;

    for participant in pool.iter_mut() {
        if !selected.contains(&participant.private_id) {
            continue;
        }
        participant.transfer_cohort_id = Some(cohort_id.clone());
        participant
            .timestamps
            .cohort_transfers
            .insert(cohort_id.clone(), now);
        participant.transition_to(ParticipantStatus::TransferPending)?;
        tx.set(
            &paths::participant(experiment_id, &participant.private_id),
            &*participant,
        )?;
    }

    Ok(TransferOutcome::CohortFormed {
        cohort_id,
        condition,
        participant_ids: selected,
    })
}
