//! Agent response arbitrator
//!
//! Reacts to a new chat message by letting at most one actor per class
//! (mediators, agent participants) reply. Both classes run concurrently and
//! candidates are generated outside any transaction; within a class the
//! winner is chosen by typing speed, waits out its typing delay, and is
//! delivered in a transaction that re-checks staleness and writes a dedup
//! marker next to the message.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::eligibility::can_respond;
use super::model::{ModelRequest, SharedModelClient};
use super::policy::{InterventionContext, InterventionPolicy, ModelIntervention};
use super::prompt::{chat_prompt, format_transcript, interpolate_participants, response_schema};
use super::responder::{load_agent_participants, load_mediators, load_participant_responder, Responder};
use super::response::{extract_reply, ParsedReply};
use super::selection::select_by_wpm;
use super::typing::typing_delay;
use crate::chat::visible_messages;
use crate::config::CoordinationConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::participant::active_in_cohort;
use crate::resilience::run_in_transaction;
use crate::state::{
    paths, sort_messages, AgentPersonaType, ChatMessage, ChatStageConfig, ChatStagePublicData,
    CohortConfig, ParticipantProfile, ParticipantStatus, ResponseType, SharedDocumentStore,
    StageConfig, StagePublicData, TriggerLogEntry,
};

/// Trigger id used when an agent opens an empty conversation
pub const INITIAL_TRIGGER_ID: &str = "initial";

/// What happened to a generated reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { message_id: String },
    /// The conversation moved on while the reply was being produced
    Stale,
    /// This actor class already replied to the trigger
    Duplicate,
    /// The discussion ended before delivery
    Ended,
}

/// Delivery result for one actor class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorReply {
    pub class: AgentPersonaType,
    pub responder_id: String,
    pub outcome: DeliveryOutcome,
}

/// Snapshot of a chat read before arbitration
struct ChatContext {
    stage: ChatStageConfig,
    data: ChatStagePublicData,
    messages: Vec<ChatMessage>,
    condition: Option<String>,
    human_names: Vec<String>,
}

#[derive(Clone)]
struct Candidate {
    responder: Responder,
    reply: ParsedReply,
}

pub struct AgentArbitrator {
    store: SharedDocumentStore,
    config: CoordinationConfig,
    client: SharedModelClient,
    policy: Arc<dyn InterventionPolicy>,
}

impl AgentArbitrator {
    pub fn new(store: SharedDocumentStore, config: CoordinationConfig, client: SharedModelClient) -> Self {
        let policy = Arc::new(ModelIntervention::new(client.clone()));
        Self {
            store,
            config,
            client,
            policy,
        }
    }

    /// Replace the intervention policy
    pub fn with_policy(mut self, policy: Arc<dyn InterventionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Reactor entry point for a new chat message
    pub async fn handle_message_created(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
        trigger_message_id: &str,
    ) -> CoordinationResult<Vec<ActorReply>> {
        let Some(ctx) = self.load_context(experiment_id, cohort_id, stage_id)? else {
            return Ok(Vec::new());
        };

        let (mediator, participant) = tokio::join!(
            self.respond_as(
                AgentPersonaType::Mediator,
                experiment_id,
                cohort_id,
                stage_id,
                trigger_message_id,
                &ctx
            ),
            self.respond_as(
                AgentPersonaType::Participant,
                experiment_id,
                cohort_id,
                stage_id,
                trigger_message_id,
                &ctx
            ),
        );
        Ok([mediator?, participant?].into_iter().flatten().collect())
    }

    /// Generate and deliver at most one reply for one actor class
    ///
    /// Classes run independently; whichever delivers first makes the other
    /// stale.
    async fn respond_as(
        &self,
        class: AgentPersonaType,
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
        trigger_message_id: &str,
        ctx: &ChatContext,
    ) -> CoordinationResult<Option<ActorReply>> {
        let responders = match class {
            AgentPersonaType::Mediator => load_mediators(&self.store, experiment_id, cohort_id, stage_id)?,
            AgentPersonaType::Participant => {
                load_agent_participants(&self.store, experiment_id, cohort_id, stage_id)?
            }
        };
        if responders.is_empty() {
            return Ok(None);
        }

        let visible = visible_messages(
            &ctx.stage,
            ctx.data.current_discussion_id.as_deref(),
            &ctx.messages,
        );
        let transcript = format_transcript(&visible);
        let candidates: Vec<Candidate> = join_all(
            responders
                .into_iter()
                .map(|responder| self.generate(responder, ctx, &visible, &transcript)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        let chosen = {
            let mut rng = rand::thread_rng();
            select_by_wpm(&candidates, |c| c.responder.words_per_minute(), &mut rng).cloned()
        };
        let Some(chosen) = chosen else {
            return Ok(None);
        };

        let responder_id = chosen.responder.profile_id.clone();
        let outcome = self
            .deliver(
                experiment_id,
                cohort_id,
                stage_id,
                trigger_message_id,
                chosen,
                ctx.messages.len(),
                ctx.data.current_discussion_id.clone(),
            )
            .await?;
        Ok(Some(ActorReply {
            class,
            responder_id,
            outcome,
        }))
    }

    /// Let an agent participant open an empty conversation
    ///
    /// Returns `None` when the participant is not an in-progress agent in a
    /// chat stage, the chat already has messages, or the agent stays silent.
    pub async fn initiate_discussion(
        &self,
        experiment_id: &str,
        participant_id: &str,
    ) -> CoordinationResult<Option<DeliveryOutcome>> {
        let participant: ParticipantProfile = self
            .store
            .get(&paths::participant(experiment_id, participant_id))?
            .ok_or_else(|| CoordinationError::not_found("participant", participant_id))?;
        if !participant.is_agent() || participant.current_status != ParticipantStatus::InProgress {
            return Ok(None);
        }
        let cohort_id = participant.current_cohort_id.clone();
        let stage_id = participant.current_stage_id.clone();

        let Some(ctx) = self.load_context(experiment_id, &cohort_id, &stage_id)? else {
            return Ok(None);
        };
        if !ctx.messages.is_empty() {
            return Ok(None);
        }
        let Some(responder) = load_participant_responder(&self.store, experiment_id, &participant)?
        else {
            return Ok(None);
        };
        let Some(candidate) = self.generate(responder, &ctx, &[], "").await else {
            return Ok(None);
        };

        let outcome = self
            .deliver(
                experiment_id,
                &cohort_id,
                &stage_id,
                INITIAL_TRIGGER_ID,
                candidate,
                0,
                ctx.data.current_discussion_id.clone(),
            )
            .await?;
        Ok(Some(outcome))
    }

    fn load_context(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<Option<ChatContext>> {
        let stage = match self.store.get::<StageConfig>(&paths::stage(experiment_id, stage_id))? {
            Some(StageConfig::Chat(stage)) => stage,
            _ => return Ok(None),
        };
        let data = match self
            .store
            .get::<StagePublicData>(&paths::public_data(experiment_id, cohort_id, stage_id))?
        {
            Some(StagePublicData::Chat(data)) => data,
            _ => ChatStagePublicData::new(&stage),
        };
        if data.discussion_end_timestamp.is_some() {
            return Ok(None);
        }

        let mut messages: Vec<ChatMessage> =
            self.store.list(&paths::chats(experiment_id, cohort_id, stage_id))?;
        sort_messages(&mut messages);

        let condition = self
            .store
            .get::<CohortConfig>(&paths::cohort(experiment_id, cohort_id))?
            .and_then(|cohort| cohort.experimental_condition);
        let participants: Vec<ParticipantProfile> =
            self.store.list(&paths::participants(experiment_id))?;
        let human_names = active_in_cohort(&participants, cohort_id)
            .into_iter()
            .filter(|p| !p.is_agent())
            .map(|p| p.name.clone().unwrap_or_else(|| "Participant".to_string()))
            .collect();

        Ok(Some(ChatContext {
            stage,
            data,
            messages,
            condition,
            human_names,
        }))
    }

    /// Produce one actor's reply, or `None` if it stays silent
    async fn generate(
        &self,
        responder: Responder,
        ctx: &ChatContext,
        visible: &[&ChatMessage],
        transcript: &str,
    ) -> Option<Candidate> {
        let response_config = responder.prompt.response_for_condition(ctx.condition.as_deref());
        if matches!(
            response_config.response_type,
            ResponseType::None | ResponseType::Hide
        ) {
            return None;
        }
        if !can_respond(&responder.sender_id, &responder.prompt.chat_settings, &ctx.messages) {
            return None;
        }

        let reply = match response_config.response_type {
            ResponseType::Static => {
                let template = response_config.static_message.unwrap_or_default();
                if template.trim().is_empty() {
                    return None;
                }
                let names: Vec<&str> = ctx.human_names.iter().map(String::as_str).collect();
                ParsedReply {
                    message: interpolate_participants(&template, &names),
                    explanation: None,
                }
            }
            _ => {
                let allowed = {
                    let intervention = InterventionContext {
                        responder: &responder,
                        stage: &ctx.stage,
                        messages: visible,
                        transcript,
                    };
                    self.policy.should_respond(&intervention).await
                };
                if !allowed {
                    return None;
                }

                let schema = if responder.prompt.uses_legacy_json() {
                    None
                } else {
                    response_schema(&responder.prompt.structured_output)
                };
                let request = ModelRequest::new(
                    chat_prompt(
                        &responder,
                        &ctx.stage,
                        ctx.data.current_discussion_id.as_deref(),
                        transcript,
                    ),
                    responder.model_name(),
                )
                .with_generation(responder.prompt.generation_config.clone())
                .with_schema(schema);

                let response = self.client.generate(request).await;
                if !response.is_ok() {
                    warn!(
                        responder = %responder.sender_id,
                        status = %response.status,
                        error = ?response.error_message,
                        "Model call failed, skipping reply"
                    );
                    return None;
                }
                extract_reply(&responder.prompt, &response)?
            }
        };

        Some(Candidate { responder, reply })
    }

    #[allow(clippy::too_many_arguments)]
    async fn deliver(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        stage_id: &str,
        trigger_message_id: &str,
        candidate: Candidate,
        seen_messages: usize,
        discussion_id: Option<String>,
    ) -> CoordinationResult<DeliveryOutcome> {
        let chats = paths::chats(experiment_id, cohort_id, stage_id);
        if self.store.list_ids(&chats)?.len() > seen_messages {
            debug!(experiment_id, cohort_id, stage_id, trigger_message_id, "Reply stale before typing");
            return Ok(DeliveryOutcome::Stale);
        }

        let Candidate { responder, reply } = candidate;
        if self.config.typing_delay {
            let delay = typing_delay(
                &reply.message,
                responder.words_per_minute(),
                self.config.max_typing_delay(),
            );
            tokio::time::sleep(delay).await;
        }

        let mut message = ChatMessage::new(
            uuid::Uuid::new_v4().to_string(),
            responder.sender_type(),
            responder.sender_id.clone(),
            reply.message,
        )
        .in_discussion(discussion_id)
        .with_profile(responder.name.clone(), responder.avatar.clone());
        message.explanation = reply.explanation;
        message.agent_id = Some(responder.agent.agent_id.clone());

        let class = responder.class;
        let marker = paths::trigger_log(experiment_id, cohort_id, stage_id, trigger_message_id, class.as_str());
        let public_path = paths::public_data(experiment_id, cohort_id, stage_id);
        let message_path = paths::chat(experiment_id, cohort_id, stage_id, &message.id);

        let policy = self.config.retry_policy();
        let outcome = run_in_transaction(&self.store, &policy, "deliver_agent_reply", |tx| {
            if tx.list::<ChatMessage>(&chats)?.len() > seen_messages {
                return Ok(DeliveryOutcome::Stale);
            }
            if let Some(StagePublicData::Chat(data)) = tx.get::<StagePublicData>(&public_path)? {
                if data.discussion_end_timestamp.is_some() {
                    return Ok(DeliveryOutcome::Ended);
                }
            }
            if tx.get_value(&marker)?.is_some() {
                return Ok(DeliveryOutcome::Duplicate);
            }

            tx.set(
                &marker,
                &TriggerLogEntry {
                    trigger_message_id: trigger_message_id.to_string(),
                    responder: class,
                    reply_message_id: message.id.clone(),
                    timestamp: Utc::now(),
                },
            )?;
            tx.set(&message_path, &message)?;
            Ok(DeliveryOutcome::Sent {
                message_id: message.id.clone(),
            })
        })
        .await?;

        match &outcome {
            DeliveryOutcome::Sent { message_id } => info!(
                experiment_id,
                cohort_id,
                stage_id,
                trigger_message_id,
                responder = %responder.sender_id,
                class = %class,
                message_id = %message_id,
                "Agent reply delivered"
            ),
            other => debug!(
                experiment_id,
                cohort_id,
                stage_id,
                trigger_message_id,
                responder = %responder.sender_id,
                outcome = ?other,
                "Agent reply dropped"
            ),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::model::{MockModelClient, ModelClient, ModelResponse, ModelResponseStatus};
    use crate::agent::policy::AlwaysRespond;
    use crate::state::{
        AgentChatPromptConfig, ChatSenderType, ConditionResponseConfig, DocumentStore,
        MediatorProfile, ProfileAgentConfig, ShouldRespondConfig, DEFAULT_CONDITION_KEY,
    };
    use std::collections::BTreeMap;

    const E: &str = "e1";
    const C: &str = "c1";
    const S: &str = "chat";

    fn seed(store: &DocumentStore, prompt: AgentChatPromptConfig) {
        store
            .set(
                &paths::stage(E, S),
                &StageConfig::Chat(ChatStageConfig::new(S).with_discussions(["d1"])),
            )
            .unwrap();
        store
            .set(
                &paths::cohort(E, C),
                &CohortConfig::new(C, Default::default()).with_condition("treatment"),
            )
            .unwrap();
        store
            .set(
                &paths::participant(E, "h1"),
                &ParticipantProfile::new("h1", "pub-h1", C, S).with_name("Ann"),
            )
            .unwrap();
        store
            .set(
                &paths::mediator(E, "m1"),
                &MediatorProfile {
                    id: "m1".into(),
                    public_id: "pub-m1".into(),
                    name: "Moderator".into(),
                    avatar: None,
                    current_cohort_id: C.into(),
                    active_stage_map: BTreeMap::from([(S.to_string(), true)]),
                    agent_config: ProfileAgentConfig::new("persona"),
                },
            )
            .unwrap();
        store.set(&paths::chat_prompt(E, "persona", S), &prompt).unwrap();
        store
            .set(
                &paths::chat(E, C, S, "m0"),
                &ChatMessage::new("m0", ChatSenderType::Participant, "pub-h1", "hello")
                    .in_discussion(Some("d1".into())),
            )
            .unwrap();
    }

    fn arbitrator(store: SharedDocumentStore, client: MockModelClient) -> AgentArbitrator {
        AgentArbitrator::new(store, CoordinationConfig::immediate(), Arc::new(client))
            .with_policy(Arc::new(AlwaysRespond))
    }

    fn chat_count(store: &DocumentStore) -> usize {
        store.list_ids(&paths::chats(E, C, S)).unwrap().len()
    }

    #[tokio::test]
    async fn test_llm_reply_delivered_once() {
        let store = DocumentStore::new().shared();
        seed(&store, AgentChatPromptConfig::new(S));
        let mut client = MockModelClient::new();
        client
            .expect_generate()
            .times(1)
            .returning(|_| ModelResponse::ok("Welcome, everyone"));
        let arbitrator = arbitrator(store.clone(), client);

        let replies = arbitrator.handle_message_created(E, C, S, "m0").await.unwrap();
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0].outcome, DeliveryOutcome::Sent { .. }));
        assert_eq!(chat_count(&store), 2);

        let marker: TriggerLogEntry = store
            .get(&paths::trigger_log(E, C, S, "m0", "MEDIATOR"))
            .unwrap()
            .unwrap();
        assert_eq!(marker.responder, AgentPersonaType::Mediator);

        let mut messages: Vec<ChatMessage> = store.list(&paths::chats(E, C, S)).unwrap();
        sort_messages(&mut messages);
        let reply = messages.iter().find(|m| m.id != "m0").unwrap();
        assert_eq!(reply.sender_type, ChatSenderType::Mediator);
        assert_eq!(reply.sender_id, "pub-m1");
        assert_eq!(reply.discussion_id.as_deref(), Some("d1"));
        assert_eq!(reply.agent_id.as_deref(), Some("persona"));
    }

    #[tokio::test]
    async fn test_existing_marker_blocks_second_reply() {
        let store = DocumentStore::new().shared();
        seed(&store, AgentChatPromptConfig::new(S));
        store
            .set(
                &paths::trigger_log(E, C, S, "m0", "MEDIATOR"),
                &TriggerLogEntry {
                    trigger_message_id: "m0".into(),
                    responder: AgentPersonaType::Mediator,
                    reply_message_id: "earlier".into(),
                    timestamp: Utc::now(),
                },
            )
            .unwrap();
        let mut client = MockModelClient::new();
        client.expect_generate().returning(|_| ModelResponse::ok("again"));
        let arbitrator = arbitrator(store.clone(), client);

        let replies = arbitrator.handle_message_created(E, C, S, "m0").await.unwrap();
        assert_eq!(replies[0].outcome, DeliveryOutcome::Duplicate);
        assert_eq!(chat_count(&store), 1);
    }

    #[tokio::test]
    async fn test_static_reply_interpolates_names() {
        let store = DocumentStore::new().shared();
        let mut prompt = AgentChatPromptConfig::new(S);
        prompt.experimental_condition_config.insert(
            "treatment".into(),
            ConditionResponseConfig {
                response_type: ResponseType::Static,
                static_message: Some("Welcome {{participants}}".into()),
            },
        );
        seed(&store, prompt);
        let mut client = MockModelClient::new();
        client.expect_generate().times(0);
        let arbitrator = arbitrator(store.clone(), client);

        arbitrator.handle_message_created(E, C, S, "m0").await.unwrap();
        let messages: Vec<ChatMessage> = store.list(&paths::chats(E, C, S)).unwrap();
        assert!(messages.iter().any(|m| m.message == "Welcome Ann"));
    }

    #[tokio::test]
    async fn test_static_reply_skips_should_respond_check() {
        let store = DocumentStore::new().shared();
        let mut prompt = AgentChatPromptConfig::new(S);
        prompt.should_respond = Some(ShouldRespondConfig {
            prompt_context: "Only speak if the discussion is heated.".into(),
            ..Default::default()
        });
        prompt.experimental_condition_config.insert(
            "treatment".into(),
            ConditionResponseConfig {
                response_type: ResponseType::Static,
                static_message: Some("Welcome {{participants}}".into()),
            },
        );
        seed(&store, prompt);
        let mut client = MockModelClient::new();
        client.expect_generate().times(0);
        // Default policy, which would ask the model for an llm reply
        let arbitrator =
            AgentArbitrator::new(store.clone(), CoordinationConfig::immediate(), Arc::new(client));

        let replies = arbitrator.handle_message_created(E, C, S, "m0").await.unwrap();
        assert!(matches!(replies[0].outcome, DeliveryOutcome::Sent { .. }));
        let messages: Vec<ChatMessage> = store.list(&paths::chats(E, C, S)).unwrap();
        assert!(messages.iter().any(|m| m.message == "Welcome Ann"));
    }

    /// Answers slowly for one model name so the other class finishes first
    struct SlowFor {
        slow_model: &'static str,
    }

    #[async_trait::async_trait]
    impl ModelClient for SlowFor {
        async fn generate(&self, request: ModelRequest) -> ModelResponse {
            if request.model_name == self.slow_model {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                ModelResponse::ok("mediator here")
            } else {
                ModelResponse::ok("agent here")
            }
        }
    }

    #[tokio::test]
    async fn test_agent_participant_can_beat_mediator() {
        let store = DocumentStore::new().shared();
        seed(&store, AgentChatPromptConfig::new(S));
        let mut agent = ProfileAgentConfig::new("bot");
        agent.model_settings.model_name = "fast-model".into();
        store
            .set(
                &paths::participant(E, "a1"),
                &ParticipantProfile::new("a1", "pub-a1", C, S)
                    .with_name("Bot")
                    .with_agent(agent),
            )
            .unwrap();
        let arbitrator = AgentArbitrator::new(
            store.clone(),
            CoordinationConfig::immediate(),
            Arc::new(SlowFor {
                slow_model: "gpt-4o-mini",
            }),
        )
        .with_policy(Arc::new(AlwaysRespond));

        let replies = arbitrator.handle_message_created(E, C, S, "m0").await.unwrap();
        assert_eq!(replies.len(), 2);
        let participant = replies
            .iter()
            .find(|r| r.class == AgentPersonaType::Participant)
            .unwrap();
        assert_eq!(participant.responder_id, "a1");
        assert!(matches!(participant.outcome, DeliveryOutcome::Sent { .. }));
        let mediator = replies
            .iter()
            .find(|r| r.class == AgentPersonaType::Mediator)
            .unwrap();
        assert_eq!(mediator.outcome, DeliveryOutcome::Stale);

        let messages: Vec<ChatMessage> = store.list(&paths::chats(E, C, S)).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.message == "agent here"));
    }

    #[tokio::test]
    async fn test_hidden_condition_is_silent() {
        let store = DocumentStore::new().shared();
        let mut prompt = AgentChatPromptConfig::new(S);
        prompt.experimental_condition_config.insert(
            DEFAULT_CONDITION_KEY.into(),
            ConditionResponseConfig {
                response_type: ResponseType::None,
                static_message: None,
            },
        );
        seed(&store, prompt);
        let mut client = MockModelClient::new();
        client.expect_generate().times(0);
        let arbitrator = arbitrator(store.clone(), client);

        let replies = arbitrator.handle_message_created(E, C, S, "m0").await.unwrap();
        assert!(replies.is_empty());
        assert_eq!(chat_count(&store), 1);
    }

    #[tokio::test]
    async fn test_model_failure_is_no_reply() {
        let store = DocumentStore::new().shared();
        seed(&store, AgentChatPromptConfig::new(S));
        let mut client = MockModelClient::new();
        client
            .expect_generate()
            .returning(|_| ModelResponse::error(ModelResponseStatus::ConfigError, "no key"));
        let arbitrator = arbitrator(store.clone(), client);

        let replies = arbitrator.handle_message_created(E, C, S, "m0").await.unwrap();
        assert!(replies.is_empty());
        assert_eq!(chat_count(&store), 1);
    }

    #[tokio::test]
    async fn test_ended_discussion_gets_no_reply() {
        let store = DocumentStore::new().shared();
        seed(&store, AgentChatPromptConfig::new(S));
        let stage = ChatStageConfig::new(S).with_discussions(["d1"]);
        let mut data = ChatStagePublicData::new(&stage);
        data.discussion_end_timestamp = Some(Utc::now());
        store
            .set(&paths::public_data(E, C, S), &StagePublicData::Chat(data))
            .unwrap();
        let mut client = MockModelClient::new();
        client.expect_generate().times(0);
        let arbitrator = arbitrator(store.clone(), client);

        assert!(arbitrator.handle_message_created(E, C, S, "m0").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_agent_opens_empty_conversation() {
        let store = DocumentStore::new().shared();
        store
            .set(&paths::stage(E, S), &StageConfig::Chat(ChatStageConfig::new(S)))
            .unwrap();
        store
            .set(
                &paths::participant(E, "a1"),
                &ParticipantProfile::new("a1", "pub-a1", C, S)
                    .with_name("Bot")
                    .with_agent(ProfileAgentConfig::new("bot")),
            )
            .unwrap();
        let mut client = MockModelClient::new();
        client.expect_generate().returning(|_| ModelResponse::ok("Hi all, shall we start?"));
        let arbitrator = arbitrator(store.clone(), client);

        let outcome = arbitrator.initiate_discussion(E, "a1").await.unwrap();
        assert!(matches!(outcome, Some(DeliveryOutcome::Sent { .. })));
        assert!(store
            .get_value(&paths::trigger_log(E, C, S, INITIAL_TRIGGER_ID, "PARTICIPANT"))
            .unwrap()
            .is_some());

        // A second attempt finds the conversation started
        assert_eq!(arbitrator.initiate_discussion(E, "a1").await.unwrap(), None);
    }
}
