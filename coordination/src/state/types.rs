//! Core experiment documents
//!
//! Participants, cohorts and experiments as stored in the document store.
//! Field names are camelCase on the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agents::ProfileAgentConfig;
use crate::error::{CoordinationError, CoordinationResult};

/// Unique identifier for experiments
pub type ExperimentId = String;

/// Unique identifier for cohorts
pub type CohortId = String;

/// Unique identifier for stages
pub type StageId = String;

/// Lifecycle status of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    /// Working through stages
    InProgress,
    /// Paused on an attention check
    AttentionCheck,
    /// Reserved into a new cohort, awaiting acceptance
    TransferPending,
    /// Waited too long in a transfer stage
    TransferTimeout,
    /// Transfer could not be completed
    #[serde(rename = "TRANSFER_FAIL")]
    TransferFailed,
    /// Declined a pending transfer
    TransferDeclined,
    /// Finished the experiment
    Success,
    /// Removed by the experimenter
    BootedOut,
    /// Deleted (e.g. by cohort deletion)
    Deleted,
}

impl ParticipantStatus {
    /// Whether the participant takes part in synchronous stages
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ParticipantStatus::InProgress
                | ParticipantStatus::AttentionCheck
                | ParticipantStatus::Success
        )
    }

    /// Whether the status can never change again except to `Deleted`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipantStatus::TransferTimeout
                | ParticipantStatus::TransferFailed
                | ParticipantStatus::TransferDeclined
                | ParticipantStatus::Success
                | ParticipantStatus::BootedOut
                | ParticipantStatus::Deleted
        )
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    pub fn can_transition_to(&self, next: ParticipantStatus) -> bool {
        use ParticipantStatus::*;

        if *self == next {
            return true;
        }
        match self {
            Deleted => false,
            _ if self.is_terminal() => next == Deleted,
            InProgress => true,
            AttentionCheck => matches!(next, InProgress | BootedOut | Deleted),
            TransferPending => matches!(
                next,
                InProgress | TransferTimeout | TransferFailed | TransferDeclined | BootedOut | Deleted
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ParticipantStatus::InProgress => "IN_PROGRESS",
            ParticipantStatus::AttentionCheck => "ATTENTION_CHECK",
            ParticipantStatus::TransferPending => "TRANSFER_PENDING",
            ParticipantStatus::TransferTimeout => "TRANSFER_TIMEOUT",
            ParticipantStatus::TransferFailed => "TRANSFER_FAIL",
            ParticipantStatus::TransferDeclined => "TRANSFER_DECLINED",
            ParticipantStatus::Success => "SUCCESS",
            ParticipantStatus::BootedOut => "BOOTED_OUT",
            ParticipantStatus::Deleted => "DELETED",
        };
        write!(f, "{}", label)
    }
}

/// Per-participant progress timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantTimestamps {
    pub start_experiment: Option<DateTime<Utc>>,
    pub end_experiment: Option<DateTime<Utc>>,
    /// When the participant reached (became ready for) each stage
    pub ready_stages: BTreeMap<StageId, DateTime<Utc>>,
    pub completed_stages: BTreeMap<StageId, DateTime<Utc>>,
    /// When each transfer into a cohort was initiated
    pub cohort_transfers: BTreeMap<CohortId, DateTime<Utc>>,
}

/// One human or agent participant in an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    /// Capability token, never shown to peers
    pub private_id: String,
    /// Peer-visible identifier
    pub public_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    pub current_stage_id: StageId,
    pub current_cohort_id: CohortId,
    /// Set only while a transfer is pending
    #[serde(default)]
    pub transfer_cohort_id: Option<CohortId>,
    pub current_status: ParticipantStatus,
    /// Advisory presence flag; absent on legacy documents
    #[serde(default)]
    pub connected: Option<bool>,
    #[serde(default)]
    pub timestamps: ParticipantTimestamps,
    /// Present for automated agent participants
    #[serde(default)]
    pub agent_config: Option<ProfileAgentConfig>,
}

impl ParticipantProfile {
    /// Create an in-progress participant at the given cohort and stage
    pub fn new(
        private_id: impl Into<String>,
        public_id: impl Into<String>,
        cohort_id: impl Into<String>,
        stage_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let stage_id = stage_id.into();
        let mut timestamps = ParticipantTimestamps {
            start_experiment: Some(now),
            ..Default::default()
        };
        timestamps.ready_stages.insert(stage_id.clone(), now);

        Self {
            private_id: private_id.into(),
            public_id: public_id.into(),
            name: None,
            avatar: None,
            current_stage_id: stage_id,
            current_cohort_id: cohort_id.into(),
            transfer_cohort_id: None,
            current_status: ParticipantStatus::InProgress,
            connected: Some(true),
            timestamps,
            agent_config: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_agent(mut self, agent_config: ProfileAgentConfig) -> Self {
        self.agent_config = Some(agent_config);
        self
    }

    /// Presence flag, treating a missing flag as connected
    pub fn is_connected(&self) -> bool {
        self.connected.unwrap_or(true)
    }

    pub fn is_agent(&self) -> bool {
        self.agent_config.is_some()
    }

    /// The cohort this participant currently belongs to
    ///
    /// While a transfer is pending the reserved cohort is authoritative, so a
    /// participant is never counted by two cohorts at once.
    pub fn authoritative_cohort_id(&self) -> &str {
        match (&self.current_status, &self.transfer_cohort_id) {
            (ParticipantStatus::TransferPending, Some(cohort)) => cohort.as_str(),
            _ => self.current_cohort_id.as_str(),
        }
    }

    /// Name shown to peers
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.public_id)
    }

    /// Whether this participant occupies a slot in its authoritative cohort
    pub fn occupies_cohort_slot(&self, include_all: bool) -> bool {
        match self.current_status {
            ParticipantStatus::Deleted => false,
            ParticipantStatus::TransferPending => true,
            status if status.is_active() => true,
            _ => include_all,
        }
    }

    /// Move to a new lifecycle status, rejecting illegal steps
    pub fn transition_to(&mut self, next: ParticipantStatus) -> CoordinationResult<()> {
        if !self.current_status.can_transition_to(next) {
            return Err(CoordinationError::InvalidTransition {
                from: self.current_status,
                to: next,
            });
        }
        self.current_status = next;
        Ok(())
    }

    /// When the participant reached the given stage
    pub fn reached_stage_at(&self, stage_id: &str) -> Option<DateTime<Utc>> {
        self.timestamps.ready_stages.get(stage_id).copied()
    }
}

/// Participant-count policy of a cohort
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CohortParticipantConfig {
    pub min_participants_per_cohort: Option<u32>,
    pub max_participants_per_cohort: Option<u32>,
    /// Count booted and failed participants toward the quota
    pub include_all_participants_in_cohort_count: bool,
}

impl CohortParticipantConfig {
    pub fn with_max(mut self, max: u32) -> Self {
        self.max_participants_per_cohort = Some(max);
        self
    }

    pub fn with_min(mut self, min: u32) -> Self {
        self.min_participants_per_cohort = Some(min);
        self
    }

    /// Whether a cohort holding `count` occupants can take one more
    pub fn has_room_for_one_more(&self, count: usize) -> bool {
        match self.max_participants_per_cohort {
            Some(max) => count < max as usize,
            None => true,
        }
    }
}

/// Human-readable cohort metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CohortMetadata {
    pub name: String,
    pub description: String,
    pub creator: String,
    pub date_created: Option<DateTime<Utc>>,
}

/// A group of participants co-located for synchronous stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortConfig {
    pub id: CohortId,
    #[serde(default)]
    pub metadata: CohortMetadata,
    /// Fixed at creation
    #[serde(default)]
    pub participant_config: CohortParticipantConfig,
    /// Assigned experimental condition; immutable once set
    #[serde(default)]
    pub experimental_condition: Option<String>,
    /// Blocks new joins when set
    #[serde(default)]
    pub is_locked: bool,
}

impl CohortConfig {
    pub fn new(id: impl Into<String>, participant_config: CohortParticipantConfig) -> Self {
        Self {
            id: id.into(),
            metadata: CohortMetadata {
                date_created: Some(Utc::now()),
                ..Default::default()
            },
            participant_config,
            experimental_condition: None,
            is_locked: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.experimental_condition = Some(condition.into());
        self
    }

    /// Stamp the experimental condition, refusing to change an existing one
    pub fn assign_condition(&mut self, condition: &str) -> CoordinationResult<()> {
        match &self.experimental_condition {
            Some(existing) if existing == condition => Ok(()),
            Some(existing) => Err(CoordinationError::InvariantViolation(format!(
                "cohort {} already has condition {}",
                self.id, existing
            ))),
            None => {
                self.experimental_condition = Some(condition.to_string());
                Ok(())
            }
        }
    }
}

/// Experiment-level document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: ExperimentId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version_id")]
    pub version_id: u32,
    /// Stage order
    pub stage_ids: Vec<StageId>,
    #[serde(default)]
    pub default_cohort_config: CohortParticipantConfig,
}

fn default_version_id() -> u32 {
    Experiment::CURRENT_VERSION
}

impl Experiment {
    /// Document schema version written by this crate
    pub const CURRENT_VERSION: u32 = 7;

    pub fn new(id: impl Into<String>, stage_ids: Vec<StageId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version_id: Self::CURRENT_VERSION,
            stage_ids,
            default_cohort_config: CohortParticipantConfig::default(),
        }
    }

    /// Stage following `stage_id` in experiment order
    pub fn next_stage_after(&self, stage_id: &str) -> Option<&str> {
        let index = self.stage_ids.iter().position(|id| id == stage_id)?;
        self.stage_ids.get(index + 1).map(String::as_str)
    }
}
