//! Intervention policies
//!
//! Decide whether an eligible actor should speak before its reply is
//! generated. The heuristic is deliberately pluggable; the default asks the
//! model when the prompt configures a should-respond check.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::model::{ModelRequest, SharedModelClient};
use super::prompt::{response_schema, should_respond_prompt};
use super::responder::Responder;
use super::response::should_respond_flag;
use crate::state::{ChatMessage, ChatStageConfig};

/// What a policy sees when deciding
pub struct InterventionContext<'a> {
    pub responder: &'a Responder,
    pub stage: &'a ChatStageConfig,
    /// Visible messages in conversation order
    pub messages: &'a [&'a ChatMessage],
    pub transcript: &'a str,
}

#[async_trait]
pub trait InterventionPolicy: Send + Sync {
    async fn should_respond(&self, ctx: &InterventionContext<'_>) -> bool;
}

/// Always lets eligible actors speak
pub struct AlwaysRespond;

#[async_trait]
impl InterventionPolicy for AlwaysRespond {
    async fn should_respond(&self, _ctx: &InterventionContext<'_>) -> bool {
        true
    }
}

/// Runs the prompt's should-respond model check, if any
pub struct ModelIntervention {
    client: SharedModelClient,
}

impl ModelIntervention {
    pub fn new(client: SharedModelClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InterventionPolicy for ModelIntervention {
    async fn should_respond(&self, ctx: &InterventionContext<'_>) -> bool {
        let prompt = &ctx.responder.prompt;
        let Some(check) = prompt.should_respond.as_ref() else {
            return true;
        };

        let structured = check
            .structured_output
            .clone()
            .unwrap_or_else(|| prompt.structured_output.clone());
        let generation = check
            .generation_config
            .clone()
            .unwrap_or_else(|| prompt.generation_config.clone());
        let request = ModelRequest::new(
            should_respond_prompt(ctx.responder, ctx.stage, check, ctx.transcript),
            ctx.responder.model_name(),
        )
        .with_generation(generation)
        .with_schema(response_schema(&structured));

        let response = self.client.generate(request).await;
        if !response.is_ok() {
            warn!(
                responder = %ctx.responder.sender_id,
                status = %response.status,
                error = ?response.error_message,
                "Should-respond check failed"
            );
            return false;
        }

        let decision = should_respond_flag(&response, &structured.should_respond_field);
        debug!(responder = %ctx.responder.sender_id, decision, "Should-respond check");
        decision
    }
}
