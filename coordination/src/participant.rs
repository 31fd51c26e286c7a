//! Participant lifecycle operations
//!
//! Joining, presence, survey answers, readiness signals, transfer
//! acceptance and stage progression. Everything that must be atomic with a
//! read runs through [`run_in_transaction`]; presence is a best-effort merge.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::cohort::check_can_join;
use crate::config::CoordinationConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::resilience::run_in_transaction;
use crate::state::{
    paths, ChatStageParticipantAnswer, Experiment, ParticipantProfile, ParticipantStatus,
    SharedDocumentStore, StageParticipantAnswer, StagePublicData, SurveyAnswer,
    SurveyStageParticipantAnswer, SurveyStagePublicData, Transaction,
};

/// Participants currently active in a cohort
pub fn active_in_cohort<'a>(
    participants: &'a [ParticipantProfile],
    cohort_id: &str,
) -> Vec<&'a ParticipantProfile> {
    participants
        .iter()
        .filter(|p| p.authoritative_cohort_id() == cohort_id && p.current_status.is_active())
        .collect()
}

/// Mark the current stage complete and move to the next one
///
/// Returns the new stage id, or `None` when the experiment is finished (the
/// participant is then marked successful).
pub fn advance_profile(
    participant: &mut ParticipantProfile,
    experiment: &Experiment,
    now: DateTime<Utc>,
) -> CoordinationResult<Option<String>> {
    let current = participant.current_stage_id.clone();
    participant.timestamps.completed_stages.insert(current.clone(), now);

    match experiment.next_stage_after(&current) {
        Some(next) => {
            participant.current_stage_id = next.to_string();
            participant
                .timestamps
                .ready_stages
                .entry(next.to_string())
                .or_insert(now);
            Ok(Some(next.to_string()))
        }
        None => {
            participant.transition_to(ParticipantStatus::Success)?;
            participant.timestamps.end_experiment = Some(now);
            Ok(None)
        }
    }
}

/// Advance a participant inside an open transaction
pub(crate) fn advance_in_transaction(
    tx: &mut Transaction<'_>,
    experiment_id: &str,
    participant_id: &str,
    now: DateTime<Utc>,
) -> CoordinationResult<(ParticipantProfile, Option<String>)> {
    let experiment: Experiment = tx
        .get(&paths::experiment(experiment_id))?
        .ok_or_else(|| CoordinationError::not_found("experiment", experiment_id))?;
    let path = paths::participant(experiment_id, participant_id);
    let mut participant: ParticipantProfile = tx
        .get(&path)?
        .ok_or_else(|| CoordinationError::not_found("participant", participant_id))?;
    let next = advance_profile(&mut participant, &experiment, now)?;
    tx.set(&path, &participant)?;
    Ok((participant, next))
}

/// Participant-facing operations
pub struct ParticipantService {
    store: SharedDocumentStore,
    config: CoordinationConfig,
}

impl ParticipantService {
    pub fn new(store: SharedDocumentStore, config: CoordinationConfig) -> Self {
        Self { store, config }
    }

    /// Add a new participant to its cohort, respecting lock and quota
    pub async fn join(
        &self,
        experiment_id: &str,
        participant: ParticipantProfile,
    ) -> CoordinationResult<ParticipantProfile> {
        let policy = self.config.retry_policy();
        let joined = run_in_transaction(&self.store, &policy, "join", |tx| {
            check_can_join(
                tx,
                experiment_id,
                &participant.current_cohort_id,
                &participant.private_id,
            )?;
            tx.set(
                &paths::participant(experiment_id, &participant.private_id),
                &participant,
            )?;
            Ok(participant.clone())
        })
        .await?;

        info!(
            experiment_id,
            participant_id = %joined.private_id,
            cohort_id = %joined.current_cohort_id,
            "Participant joined"
        );
        Ok(joined)
    }

    /// Best-effort presence update
    pub fn set_connected(
        &self,
        experiment_id: &str,
        participant_id: &str,
        connected: bool,
    ) -> CoordinationResult<()> {
        let path = paths::participant(experiment_id, participant_id);
        if self.store.get_value(&path)?.is_none() {
            return Err(CoordinationError::not_found("participant", participant_id));
        }
        self.store.merge(&path, json!({ "connected": connected }))?;
        debug!(experiment_id, participant_id, connected, "Presence updated");
        Ok(())
    }

    /// Record a survey answer privately and in the cohort's public answers
    pub async fn record_survey_answer(
        &self,
        experiment_id: &str,
        participant_id: &str,
        stage_id: &str,
        answer: SurveyAnswer,
    ) -> CoordinationResult<()> {
        let policy = self.config.retry_policy();
        run_in_transaction(&self.store, &policy, "record_survey_answer", |tx| {
            let participant: ParticipantProfile = tx
                .get(&paths::participant(experiment_id, participant_id))?
                .ok_or_else(|| CoordinationError::not_found("participant", participant_id))?;
            let question_id = answer.question_id().to_string();

            let answer_path = paths::participant_answer(experiment_id, participant_id, stage_id);
            let mut private = match tx.get::<StageParticipantAnswer>(&answer_path)? {
                Some(StageParticipantAnswer::Survey(data)) => data,
                _ => SurveyStageParticipantAnswer {
                    id: stage_id.to_string(),
                    answer_map: Default::default(),
                },
            };
            private.answer_map.insert(question_id.clone(), answer.clone());
            tx.set(&answer_path, &StageParticipantAnswer::Survey(private))?;

            let public_path =
                paths::public_data(experiment_id, &participant.current_cohort_id, stage_id);
            let mut public = match tx.get::<StagePublicData>(&public_path)? {
                Some(StagePublicData::Survey(data)) => data,
                _ => SurveyStagePublicData::new(stage_id),
            };
            public
                .participant_answer_map
                .entry(participant.public_id.clone())
                .or_default()
                .insert(question_id, answer.clone());
            tx.set(&public_path, &StagePublicData::Survey(public))?;
            Ok(())
        })
        .await
    }

    /// Signal readiness to end a chat discussion
    ///
    /// The first signal per discussion wins; repeats are no-ops.
    pub async fn record_ready_to_end(
        &self,
        experiment_id: &str,
        participant_id: &str,
        stage_id: &str,
        discussion_id: &str,
    ) -> CoordinationResult<()> {
        let policy = self.config.retry_policy();
        run_in_transaction(&self.store, &policy, "record_ready_to_end", |tx| {
            let path = paths::participant_answer(experiment_id, participant_id, stage_id);
            let mut answer = match tx.get::<StageParticipantAnswer>(&path)? {
                Some(StageParticipantAnswer::Chat(data)) => data,
                _ => ChatStageParticipantAnswer::new(stage_id),
            };
            let entry = answer
                .discussion_timestamp_map
                .entry(discussion_id.to_string())
                .or_insert(None);
            if entry.is_some() {
                return Ok(());
            }
            *entry = Some(Utc::now());
            tx.set(&path, &StageParticipantAnswer::Chat(answer))?;
            Ok(())
        })
        .await
    }

    /// Accept a pending transfer and move on to the next stage
    pub async fn accept_transfer(
        &self,
        experiment_id: &str,
        participant_id: &str,
    ) -> CoordinationResult<ParticipantProfile> {
        let policy = self.config.retry_policy();
        let participant = run_in_transaction(&self.store, &policy, "accept_transfer", |tx| {
            let path = paths::participant(experiment_id, participant_id);
            let mut participant: ParticipantProfile = tx
                .get(&path)?
                .ok_or_else(|| CoordinationError::not_found("participant", participant_id))?;
            let Some(cohort_id) = participant.transfer_cohort_id.clone() else {
                return Err(CoordinationError::InvalidTransition {
                    from: participant.current_status,
                    to: ParticipantStatus::InProgress,
                });
            };
            if participant.current_status != ParticipantStatus::TransferPending {
                return Err(CoordinationError::InvalidTransition {
                    from: participant.current_status,
                    to: ParticipantStatus::InProgress,
                });
            }

            let now = Utc::now();
            participant.transition_to(ParticipantStatus::InProgress)?;
            participant.current_cohort_id = cohort_id.clone();
            participant.transfer_cohort_id = None;
            participant.timestamps.cohort_transfers.insert(cohort_id, now);
            tx.set(&path, &participant)?;

            let (participant, _) = advance_in_transaction(tx, experiment_id, participant_id, now)?;
            Ok(participant)
        })
        .await?;

        info!(
            experiment_id,
            participant_id,
            cohort_id = %participant.current_cohort_id,
            stage_id = %participant.current_stage_id,
            "Transfer accepted"
        );
        Ok(participant)
    }

    /// Decline a pending transfer
    pub async fn decline_transfer(
        &self,
        experiment_id: &str,
        participant_id: &str,
    ) -> CoordinationResult<ParticipantProfile> {
        let policy = self.config.retry_policy();
        let participant = run_in_transaction(&self.store, &policy, "decline_transfer", |tx| {
            let path = paths::participant(experiment_id, participant_id);
            let mut participant: ParticipantProfile = tx
                .get(&path)?
                .ok_or_else(|| CoordinationError::not_found("participant", participant_id))?;
            if participant.current_status != ParticipantStatus::TransferPending {
                return Err(CoordinationError::InvalidTransition {
                    from: participant.current_status,
                    to: ParticipantStatus::TransferDeclined,
                });
            }
            participant.transition_to(ParticipantStatus::TransferDeclined)?;
            participant.transfer_cohort_id = None;
            tx.set(&path, &participant)?;
            Ok(participant)
        })
        .await?;

        info!(experiment_id, participant_id, "Transfer declined");
        Ok(participant)
    }

    /// Complete the current stage and move to the next one
    pub async fn advance_to_next_stage(
        &self,
        experiment_id: &str,
        participant_id: &str,
    ) -> CoordinationResult<Option<String>> {
        let policy = self.config.retry_policy();
        let next = run_in_transaction(&self.store, &policy, "advance_stage", |tx| {
            let (_, next) = advance_in_transaction(tx, experiment_id, participant_id, Utc::now())?;
            Ok(next)
        })
        .await?;

        debug!(experiment_id, participant_id, next_stage = ?next, "Stage advanced");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::CohortAdmin;
    use crate::state::{CohortConfig, CohortParticipantConfig, DocumentStore};

    struct Fixture {
        store: SharedDocumentStore,
        service: ParticipantService,
    }

    fn fixture() -> Fixture {
        let store = DocumentStore::new().shared();
        store
            .set(
                &paths::experiment("e1"),
                &Experiment::new("e1", vec!["survey".into(), "transfer".into(), "chat".into()]),
            )
            .unwrap();
        store
            .set(
                &paths::cohort("e1", "lobby"),
                &CohortConfig::new("lobby", CohortParticipantConfig::default()),
            )
            .unwrap();
        let service = ParticipantService::new(store.clone(), CoordinationConfig::immediate());
        Fixture { store, service }
    }

    fn participant(id: &str, stage: &str) -> ParticipantProfile {
        ParticipantProfile::new(id, format!("pub-{}", id), "lobby", stage)
    }

    fn load(store: &DocumentStore, id: &str) -> ParticipantProfile {
        store.get(&paths::participant("e1", id)).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_join_and_presence() {
        let f = fixture();
        f.service.join("e1", participant("p1", "survey")).await.unwrap();

        f.service.set_connected("e1", "p1", false).unwrap();
        assert!(!load(&f.store, "p1").is_connected());

        f.service.set_connected("e1", "p1", true).unwrap();
        assert!(load(&f.store, "p1").is_connected());

        assert!(f.service.set_connected("e1", "ghost", true).is_err());
    }

    #[tokio::test]
    async fn test_join_locked_cohort_rejected() {
        let f = fixture();
        let admin = CohortAdmin::new(f.store.clone(), CoordinationConfig::immediate());
        admin.set_cohort_lock("e1", "lobby", true).await.unwrap();

        let err = f.service.join("e1", participant("p1", "survey")).await.unwrap_err();
        assert!(matches!(err, CoordinationError::CohortLocked));
        assert!(f.store.get_value(&paths::participant("e1", "p1")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_survey_answer_written_publicly() {
        let f = fixture();
        f.service.join("e1", participant("p1", "survey")).await.unwrap();

        f.service
            .record_survey_answer(
                "e1",
                "p1",
                "survey",
                SurveyAnswer::MultipleChoice {
                    id: "q1".into(),
                    choice_id: "legal".into(),
                },
            )
            .await
            .unwrap();

        let public: StagePublicData = f
            .store
            .get(&paths::public_data("e1", "lobby", "survey"))
            .unwrap()
            .unwrap();
        let StagePublicData::Survey(public) = public else {
            panic!("expected survey public data");
        };
        assert_eq!(
            public.classification_of("pub-p1", "q1").as_deref(),
            Some("legal")
        );

        let private: StageParticipantAnswer = f
            .store
            .get(&paths::participant_answer("e1", "p1", "survey"))
            .unwrap()
            .unwrap();
        assert!(matches!(private, StageParticipantAnswer::Survey(ref s) if s.answer_map.contains_key("q1")));
    }

    #[tokio::test]
    async fn test_ready_to_end_is_idempotent() {
        let f = fixture();
        f.service.join("e1", participant("p1", "chat")).await.unwrap();

        f.service.record_ready_to_end("e1", "p1", "chat", "d1").await.unwrap();
        let first = f
            .store
            .version(&paths::participant_answer("e1", "p1", "chat"))
            .unwrap();
        f.service.record_ready_to_end("e1", "p1", "chat", "d1").await.unwrap();
        let second = f
            .store
            .version(&paths::participant_answer("e1", "p1", "chat"))
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_accept_transfer_moves_cohort_and_stage() {
        let f = fixture();
        let mut p = participant("p1", "transfer");
        p.transfer_cohort_id = Some("new".into());
        p.current_status = ParticipantStatus::TransferPending;
        f.store.set(&paths::participant("e1", "p1"), &p).unwrap();

        let accepted = f.service.accept_transfer("e1", "p1").await.unwrap();
        assert_eq!(accepted.current_cohort_id, "new");
        assert_eq!(accepted.transfer_cohort_id, None);
        assert_eq!(accepted.current_status, ParticipantStatus::InProgress);
        assert_eq!(accepted.current_stage_id, "chat");
        assert!(accepted.timestamps.completed_stages.contains_key("transfer"));
        assert!(accepted.timestamps.cohort_transfers.contains_key("new"));
    }

    #[tokio::test]
    async fn test_accept_without_pending_transfer_fails() {
        let f = fixture();
        f.store
            .set(&paths::participant("e1", "p1"), &participant("p1", "transfer"))
            .unwrap();
        let err = f.service.accept_transfer("e1", "p1").await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_decline_transfer() {
        let f = fixture();
        let mut p = participant("p1", "transfer");
        p.transfer_cohort_id = Some("new".into());
        p.current_status = ParticipantStatus::TransferPending;
        f.store.set(&paths::participant("e1", "p1"), &p).unwrap();

        let declined = f.service.decline_transfer("e1", "p1").await.unwrap();
        assert_eq!(declined.current_status, ParticipantStatus::TransferDeclined);
        assert_eq!(declined.authoritative_cohort_id(), "lobby");
    }

    #[tokio::test]
    async fn test_advance_through_last_stage_succeeds() {
        let f = fixture();
        f.store
            .set(&paths::participant("e1", "p1"), &participant("p1", "chat"))
            .unwrap();

        let next = f.service.advance_to_next_stage("e1", "p1").await.unwrap();
        assert_eq!(next, None);
        let p = load(&f.store, "p1");
        assert_eq!(p.current_status, ParticipantStatus::Success);
        assert!(p.timestamps.end_experiment.is_some());
    }

    #[test]
    fn test_active_in_cohort() {
        let a = participant("a", "chat");
        let mut b = participant("b", "chat");
        b.current_status = ParticipantStatus::BootedOut;
        let mut c = participant("c", "chat");
        c.current_cohort_id = "other".into();
        let all = vec![a, b, c];

        let active = active_in_cohort(&all, "lobby");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].private_id, "a");
    }
}
