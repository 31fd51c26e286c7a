//! Cohort Coordination Library
//!
//! Server-side coordination for multi-participant chat experiments:
//! - A transactional document store with optimistic concurrency and
//!   change events
//! - Participant transfer into new cohorts with weighted condition assignment
//! - Chat stages split into discussions, with readiness-driven advancement
//!   and time limits
//! - Automated mediators and agent participants, arbitrated so each message
//!   gets at most one reply per actor class
//! - A reactor runtime wiring all of the above to document writes
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use cohort_coordination::{CoordinationConfig, DocumentStore, ReactorRuntime, Reactors};
//!
//! let store = DocumentStore::new().shared();
//! let reactors = Reactors::new(store.clone(), CoordinationConfig::default(), client);
//! let runtime = ReactorRuntime::new(reactors);
//! let handle = runtime.start();
//!
//! // ... writes to `store` now drive transfers, discussions and agents ...
//!
//! runtime.stop();
//! handle.await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod chat;
pub mod cohort;
pub mod config;
pub mod error;
pub mod events;
pub mod participant;
pub mod reactors;
pub mod resilience;
pub mod state;
pub mod transfer;

// Re-export configuration and error types
pub use config::CoordinationConfig;
pub use error::{CoordinationError, CoordinationResult};

// Re-export key state types
pub use state::{
    paths, ChatMessage, ChatStageConfig, CohortConfig, DocumentStore, Experiment,
    ParticipantProfile, ParticipantStatus, SharedDocumentStore, StageConfig, StoreError,
    Transaction, TriggerPath,
};

// Re-export key event types
pub use events::{ChangeKind, DocumentEvent, EventBus, SharedEventBus};

// Re-export resilience types
pub use resilience::{run_in_transaction, RetryPolicy};

// Re-export transfer types
pub use transfer::{assign_condition, TransferMatcher, TransferOutcome};

// Re-export lifecycle services
pub use cohort::{add_default_mediators, CohortAdmin};
pub use participant::{active_in_cohort, advance_profile, ParticipantService};

// Re-export chat orchestration types
pub use chat::{DiscussionCoordinator, DiscussionState, TimeLimitChecker, TimeLimitStatus};

// Re-export agent types
pub use agent::{
    AgentArbitrator, DeliveryOutcome, ModelClient, ModelRequest, ModelResponse,
    ModelResponseStatus, ReadinessChecker, SharedModelClient,
};

// Re-export runtime types
pub use reactors::{ReactorRuntime, Reactors};
