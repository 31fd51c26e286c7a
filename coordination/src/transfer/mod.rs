//! Participant transfer and cohort formation
//!
//! - `condition`: weighted experimental-condition assignment
//! - `matcher`: quota-driven cohort formation inside a retrying transaction

pub mod condition;
pub mod matcher;

pub use condition::{assign_condition, ConditionError};
pub use matcher::{
    has_timed_out, is_waiting_in, plan_cohort, TransferMatcher, TransferOutcome,
    WaitingParticipant,
};
