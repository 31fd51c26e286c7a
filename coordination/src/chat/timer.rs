//! Discussion time limits
//!
//! A stage with `time_limit_in_minutes` ends once that much time has passed
//! since `discussion_start_timestamp`. Instead of one long timer the check is
//! re-armed: each wait is capped at the configured maximum, and a check that
//! finds time remaining bumps `discussion_checkpoint_timestamp`, whose write
//! triggers the next wait. Every check is idempotent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::discussion::{load_chat_data, load_chat_stage};
use crate::config::CoordinationConfig;
use crate::error::CoordinationResult;
use crate::resilience::run_in_transaction;
use crate::state::{
    paths, ChatStageConfig, ChatStagePublicData, SharedDocumentStore, StagePublicData,
};

/// Time-limit state of one (cohort, stage)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLimitStatus {
    /// The stage has no time limit
    NoLimit,
    /// The discussion has not started
    NotStarted,
    /// Time remains
    Running { remaining: Duration },
    /// The limit has passed but the end timestamp is not written yet
    Expired,
    /// The end timestamp is set
    Ended,
}

/// Compute the time-limit status at `now`
pub fn time_limit_status(
    stage: &ChatStageConfig,
    data: &ChatStagePublicData,
    now: DateTime<Utc>,
) -> TimeLimitStatus {
    if data.discussion_end_timestamp.is_some() {
        return TimeLimitStatus::Ended;
    }
    let Some(minutes) = stage.time_limit_in_minutes else {
        return TimeLimitStatus::NoLimit;
    };
    let Some(start) = data.discussion_start_timestamp else {
        return TimeLimitStatus::NotStarted;
    };

    let limit = chrono::Duration::minutes(minutes as i64);
    let remaining = limit - (now - start);
    if remaining <= chrono::Duration::zero() {
        TimeLimitStatus::Expired
    } else {
        TimeLimitStatus::Running {
            remaining: remaining.to_std().unwrap_or(Duration::ZERO),
        }
    }
}

/// How long to wait before the next check
pub fn next_check_interval(remaining: Duration, max_wait: Duration) -> Duration {
    remaining.min(max_wait)
}

/// Checks and re-arms discussion time limits
pub struct TimeLimitChecker {
    store: SharedDocumentStore,
    config: CoordinationConfig,
}

impl TimeLimitChecker {
    pub fn new(store: SharedDocumentStore, config: CoordinationConfig) -> Self {
        Self { store, config }
    }

    /// End the discussion if its time is up
    ///
    /// Returns the status after the check; `Expired` is never returned
    /// because an expired discussion is ended in the same transaction.
    pub async fn check(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<TimeLimitStatus> {
        let policy = self.config.retry_policy();
        let (status, ended_now) = run_in_transaction(&self.store, &policy, "check_time_limit", |tx| {
            let Some(stage) = load_chat_stage(tx, experiment_id, stage_id)? else {
                return Ok((TimeLimitStatus::NoLimit, false));
            };
            let path = paths::public_data(experiment_id, cohort_id, stage_id);
            let mut data = load_chat_data(tx, &path, &stage)?;
            let now = Utc::now();
            match time_limit_status(&stage, &data, now) {
                TimeLimitStatus::Expired => {
                    data.discussion_end_timestamp = Some(now);
                    tx.set(&path, &StagePublicData::Chat(data))?;
                    Ok((TimeLimitStatus::Ended, true))
                }
                status => Ok((status, false)),
            }
        })
        .await?;

        if ended_now {
            info!(experiment_id, cohort_id, stage_id, "Discussion ended by time limit");
        }
        Ok(status)
    }

    /// Wait for the next interval, then check again
    ///
    /// If time still remains and no other checker moved the checkpoint in
    /// the meantime, the checkpoint is bumped so the write re-arms the check.
    pub async fn arm(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<TimeLimitStatus> {
        let observed = match self.check(experiment_id, cohort_id, stage_id).await? {
            TimeLimitStatus::Running { remaining } => remaining,
            status => return Ok(status),
        };
        let checkpoint = self.checkpoint(experiment_id, cohort_id, stage_id)?;

        let wait = next_check_interval(observed, self.config.timer_max_wait());
        debug!(
            experiment_id,
            cohort_id,
            stage_id,
            wait_secs = wait.as_secs(),
            "Time limit check armed"
        );
        tokio::time::sleep(wait).await;

        let status = self.check(experiment_id, cohort_id, stage_id).await?;
        if !matches!(status, TimeLimitStatus::Running { .. }) {
            return Ok(status);
        }

        let policy = self.config.retry_policy();
        run_in_transaction(&self.store, &policy, "rearm_time_limit", |tx| {
            let Some(stage) = load_chat_stage(tx, experiment_id, stage_id)? else {
                return Ok(());
            };
            let path = paths::public_data(experiment_id, cohort_id, stage_id);
            let mut data = load_chat_data(tx, &path, &stage)?;
            if data.discussion_checkpoint_timestamp != checkpoint
                || data.discussion_end_timestamp.is_some()
            {
                return Ok(());
            }
            data.discussion_checkpoint_timestamp = Some(Utc::now());
            tx.set(&path, &StagePublicData::Chat(data))?;
            Ok(())
        })
        .await?;
        Ok(status)
    }

    fn checkpoint(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<Option<DateTime<Utc>>> {
        let path = paths::public_data(experiment_id, cohort_id, stage_id);
        Ok(match self.store.get::<StagePublicData>(&path)? {
            Some(StagePublicData::Chat(data)) => data.discussion_checkpoint_timestamp,
            _ => None,
        })
    }
}
