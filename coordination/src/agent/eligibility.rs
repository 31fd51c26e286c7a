//! Response eligibility gate
//!
//! Cheap checks evaluated per actor before any model call.

use crate::state::{AgentChatSettings, ChatMessage};

/// Whether an actor may reply to the conversation as it stands
///
/// `sender_id` is the id the actor's own messages carry. `messages` must be
/// in conversation order.
pub fn can_respond(sender_id: &str, settings: &AgentChatSettings, messages: &[ChatMessage]) -> bool {
    if let Some(max) = settings.max_responses {
        let own = messages.iter().filter(|m| m.sender_id == sender_id).count();
        if own >= max as usize {
            return false;
        }
    }

    if messages.len() < settings.min_messages_before_responding as usize {
        return false;
    }

    if !settings.can_self_trigger_calls
        && messages.last().is_some_and(|m| m.sender_id == sender_id)
    {
        return false;
    }

    true
}
