//! Chat stage orchestration
//!
//! - `discussion`: discussion pointer, readiness and visible history
//! - `timer`: self re-arming time-limit checks

pub mod discussion;
pub mod timer;

pub use discussion::{
    discussion_state, mark_ready, start_discussion, try_advance, visible_messages,
    DiscussionCoordinator, DiscussionState,
};
pub use timer::{next_check_interval, time_limit_status, TimeLimitChecker, TimeLimitStatus};
