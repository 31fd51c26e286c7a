//! Reactor runtime
//!
//! Subscribes to the store's event bus and dispatches each committed write
//! to the handlers registered for its path. Each event is handled on its own
//! task so a slow handler (typing delay, time-limit wait) never blocks the
//! others.
//!
//! | Path                               | Handlers                                   |
//! |------------------------------------|--------------------------------------------|
//! | `…/publicStageData/{s}/chats/{m}`  | discussion start, time check, arbitrator, readiness |
//! | `…/cohorts/{c}/publicStageData/{s}`| time-limit re-arm                          |
//! | `…/participants/{p}/stageData/{s}` | chat readiness merge, transfer matcher     |
//! | `…/participants/{p}`               | transfer matcher, agent-initiated chat     |

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentArbitrator, InterventionPolicy, ReadinessChecker, SharedModelClient};
use crate::chat::{DiscussionCoordinator, TimeLimitChecker};
use crate::config::CoordinationConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::events::{ChangeKind, DocumentEvent, EventBusError, EventFilter};
use crate::state::{paths, SharedDocumentStore, StageConfig, TriggerPath};
use crate::transfer::TransferMatcher;

fn report(handler: &'static str, result: CoordinationResult<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_transient() => warn!(handler, error = %e, "Handler gave up after conflicts"),
        Err(e) if e.is_config() => error!(handler, error = %e, "Handler configuration error"),
        Err(CoordinationError::NotFound { kind, id }) => {
            debug!(handler, kind, id = %id, "Handler target missing")
        }
        Err(e) => warn!(handler, error = %e, "Handler failed"),
    }
}

/// Every write-triggered handler, sharing one store
pub struct Reactors {
    store: SharedDocumentStore,
    discussion: DiscussionCoordinator,
    timer: TimeLimitChecker,
    matcher: TransferMatcher,
    arbitrator: AgentArbitrator,
    readiness: ReadinessChecker,
}

impl Reactors {
    pub fn new(store: SharedDocumentStore, config: CoordinationConfig, client: SharedModelClient) -> Self {
        Self {
            discussion: DiscussionCoordinator::new(store.clone(), config.clone()),
            timer: TimeLimitChecker::new(store.clone(), config.clone()),
            matcher: TransferMatcher::new(store.clone(), config.clone()),
            arbitrator: AgentArbitrator::new(store.clone(), config.clone(), client.clone()),
            readiness: ReadinessChecker::new(store.clone(), config, client),
            store,
        }
    }

    /// Use a different intervention policy for the arbitrator
    pub fn with_intervention_policy(mut self, policy: Arc<dyn InterventionPolicy>) -> Self {
        self.arbitrator = self.arbitrator.with_policy(policy);
        self
    }

    /// Run every handler registered for an event to completion
    pub async fn handle(&self, event: &DocumentEvent) {
        if !event.is_write() {
            return;
        }
        let Some(trigger) = event.trigger() else {
            return;
        };

        match trigger {
            TriggerPath::ChatMessage {
                experiment_id,
                cohort_id,
                stage_id,
                message_id,
            } => {
                if event.change != ChangeKind::Created {
                    return;
                }
                let (e, c, s) = (experiment_id.as_str(), cohort_id.as_str(), stage_id.as_str());
                let (started, checked, replied, ready) = tokio::join!(
                    self.discussion.handle_message_created(e, c, s),
                    self.timer.check(e, c, s),
                    self.arbitrator.handle_message_created(e, c, s, &message_id),
                    self.readiness.handle_message_created(e, c, s),
                );
                report("start_discussion", started.map(drop));
                report("check_time_limit", checked.map(drop));
                report("agent_arbitrator", replied.map(drop));
                report("agent_readiness", ready.map(drop));
            }
            TriggerPath::PublicStageData {
                experiment_id,
                cohort_id,
                stage_id,
            } => {
                let result = self.timer.arm(&experiment_id, &cohort_id, &stage_id).await;
                report("time_limit", result.map(drop));
            }
            TriggerPath::ParticipantAnswer {
                experiment_id,
                participant_id,
                stage_id,
            } => {
                let result = self
                    .handle_participant_answer(&experiment_id, &participant_id, &stage_id)
                    .await;
                report("participant_answer", result);
            }
            TriggerPath::Participant {
                experiment_id,
                participant_id,
            } => {
                let (matched, opened) = tokio::join!(
                    self.matcher.handle_participant_changed(&experiment_id, &participant_id),
                    self.arbitrator.initiate_discussion(&experiment_id, &participant_id),
                );
                report("transfer_matcher", matched.map(drop));
                report("initiate_discussion", opened.map(drop));
            }
        }
    }

    async fn handle_participant_answer(
        &self,
        experiment_id: &str,
        participant_id: &str,
        stage_id: &str,
    ) -> CoordinationResult<()> {
        match self.store.get::<StageConfig>(&paths::stage(experiment_id, stage_id))? {
            Some(StageConfig::Chat(_)) => {
                self.discussion
                    .handle_participant_answer(experiment_id, participant_id, stage_id)
                    .await?;
            }
            Some(StageConfig::Survey(_)) => {
                self.matcher
                    .handle_participant_changed(experiment_id, participant_id)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Event loop feeding [`Reactors`] from the store's event bus
pub struct ReactorRuntime {
    reactors: Arc<Reactors>,
    cancel: CancellationToken,
}

impl ReactorRuntime {
    pub fn new(reactors: Reactors) -> Self {
        Self {
            reactors: Arc::new(reactors),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the runtime and its in-flight handlers
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn reactors(&self) -> &Arc<Reactors> {
        &self.reactors
    }

    /// Start dispatching events until cancelled
    pub fn start(&self) -> JoinHandle<()> {
        let filter = EventFilter::new().changes(vec![ChangeKind::Created, ChangeKind::Updated]);
        let mut receiver = self.reactors.store.event_bus().subscribe_filtered(filter);
        let reactors = self.reactors.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            info!("Reactor runtime started");
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => event,
                        Err(EventBusError::Lagged(skipped)) => {
                            warn!(skipped, "Reactor runtime lagged, events dropped");
                            continue;
                        }
                        Err(EventBusError::ChannelClosed) => break,
                    },
                };

                let reactors = reactors.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = reactors.handle(&event) => {}
                    }
                });
            }
            info!("Reactor runtime stopped");
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::model::{MockModelClient, ModelResponse};
    use crate::state::{
        ChatMessage, ChatSenderType, ChatStageConfig, ChatStageParticipantAnswer,
        ChatStagePublicData, DocumentStore, ParticipantProfile, StageParticipantAnswer, StagePublicData,
    };
    use chrono::Utc;

    fn reactors(store: SharedDocumentStore) -> Reactors {
        let mut client = MockModelClient::new();
        client.expect_generate().returning(|_| ModelResponse::ok(""));
        Reactors::new(store, CoordinationConfig::immediate(), Arc::new(client))
    }

    #[tokio::test]
    async fn test_chat_message_starts_discussion() {
        let store = DocumentStore::new().shared();
        store
            .set(
                &paths::stage("e1", "chat"),
                &StageConfig::Chat(ChatStageConfig::new("chat").with_discussions(["d1"])),
            )
            .unwrap();
        let path = paths::chat("e1", "c1", "chat", "m1");
        store
            .set(&path, &ChatMessage::new("m1", ChatSenderType::Participant, "p", "hi"))
            .unwrap();

        reactors(store.clone())
            .handle(&DocumentEvent::new(path, ChangeKind::Created, 1))
            .await;

        let Some(StagePublicData::Chat(data)) = store
            .get::<StagePublicData>(&paths::public_data("e1", "c1", "chat"))
            .unwrap()
        else {
            panic!("expected chat public data");
        };
        assert!(data.discussion_start_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_chat_answer_advances_discussion() {
        let store = DocumentStore::new().shared();
        let stage = ChatStageConfig::new("chat").with_discussions(["d1", "d2"]);
        store
            .set(&paths::stage("e1", "chat"), &StageConfig::Chat(stage.clone()))
            .unwrap();
        store
            .set(
                &paths::public_data("e1", "c1", "chat"),
                &StagePublicData::Chat(ChatStagePublicData::new(&stage)),
            )
            .unwrap();
        store
            .set(
                &paths::participant("e1", "p1"),
                &ParticipantProfile::new("p1", "pub-p1", "c1", "chat"),
            )
            .unwrap();
        let mut answer = ChatStageParticipantAnswer::new("chat");
        answer.discussion_timestamp_map.insert("d1".into(), Some(Utc::now()));
        let path = paths::participant_answer("e1", "p1", "chat");
        store.set(&path, &StageParticipantAnswer::Chat(answer)).unwrap();

        reactors(store.clone())
            .handle(&DocumentEvent::new(path, ChangeKind::Created, 1))
            .await;

        let Some(StagePublicData::Chat(data)) = store
            .get::<StagePublicData>(&paths::public_data("e1", "c1", "chat"))
            .unwrap()
        else {
            panic!("expected chat public data");
        };
        assert_eq!(data.current_discussion_id.as_deref(), Some("d2"));
    }

    #[tokio::test]
    async fn test_runtime_dispatches_and_stops() {
        let store = DocumentStore::new().shared();
        store
            .set(
                &paths::stage("e1", "chat"),
                &StageConfig::Chat(ChatStageConfig::new("chat")),
            )
            .unwrap();
        let runtime = ReactorRuntime::new(reactors(store.clone()));
        let handle = runtime.start();
        tokio::task::yield_now().await;

        store
            .set(
                &paths::chat("e1", "c1", "chat", "m1"),
                &ChatMessage::new("m1", ChatSenderType::Participant, "p", "hi"),
            )
            .unwrap();

        let public = paths::public_data("e1", "c1", "chat");
        let mut started = false;
        for _ in 0..100 {
            if store.get_value(&public).unwrap().is_some() {
                started = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(started);

        runtime.stop();
        handle.await.unwrap();
    }
}
