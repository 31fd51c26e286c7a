//! Automated chat actors
//!
//! - `model`: the model-call boundary ([`ModelClient`])
//! - `responder`: mediators and agent participants resolved for a stage
//! - `eligibility`: quota, warm-up and self-trigger gate
//! - `policy`: pluggable should-respond decision
//! - `prompt`: prompt text, name interpolation and reply schema
//! - `response`: reply extraction from raw model output
//! - `selection`: words-per-minute weighted turn taking
//! - `typing`: simulated typing delay
//! - `arbitrator`: at-most-once reply delivery per trigger and actor class
//! - `readiness`: agent participants deciding to end a discussion

pub mod arbitrator;
pub mod eligibility;
pub mod model;
pub mod policy;
pub mod prompt;
pub mod readiness;
pub mod responder;
pub mod response;
pub mod selection;
pub mod typing;

pub use arbitrator::{ActorReply, AgentArbitrator, DeliveryOutcome, INITIAL_TRIGGER_ID};
pub use eligibility::can_respond;
pub use model::{ModelClient, ModelRequest, ModelResponse, ModelResponseStatus, SharedModelClient};
pub use policy::{AlwaysRespond, InterventionContext, InterventionPolicy, ModelIntervention};
pub use prompt::{default_reply_schema, format_names, interpolate_participants, DefaultChatReply};
pub use readiness::{ReadinessChecker, ReadinessOutcome};
pub use responder::Responder;
pub use response::{extract_reply, ParsedReply};
pub use selection::select_by_wpm;
pub use typing::typing_delay;
