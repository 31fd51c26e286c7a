//! Reactor host
//!
//! Loads (or creates) a document store, runs the reactor runtime against it
//! until shutdown, and writes the store back to its snapshot file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cohort_coordination::{
    paths, ChangeKind, DocumentEvent, DocumentStore, Experiment, ReactorRuntime, Reactors,
    SharedDocumentStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LabConfig;
use crate::model_client::{check_endpoint, HttpModelClient};

/// Cancel `token` on Ctrl-C
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
        token.cancel();
    });
}

pub fn open_store(snapshot: Option<&PathBuf>) -> Result<SharedDocumentStore> {
    let store = match snapshot {
        Some(path) if path.exists() => DocumentStore::load_snapshot(path)
            .with_context(|| format!("Failed to load snapshot {}", path.display()))?,
        _ => DocumentStore::new(),
    };
    Ok(store.shared())
}

/// Documents whose triggers may have been missed while no host was running
///
/// Replaying an update for each of them re-arms chat timers, retries pending
/// transfers and lets idle agents open their chats. Every handler is
/// idempotent, so replaying already handled documents is harmless.
pub fn resume_paths(store: &DocumentStore) -> Result<Vec<String>> {
    let mut resume = Vec::new();
    for experiment_id in store.list_ids("experiments")? {
        let Some(experiment) = store.get::<Experiment>(&paths::experiment(&experiment_id))? else {
            continue;
        };
        for cohort_id in store.list_ids(&paths::cohorts(&experiment_id))? {
            for stage_id in &experiment.stage_ids {
                let path = paths::public_data(&experiment_id, &cohort_id, stage_id);
                if store.version(&path)?.is_some() {
                    resume.push(path);
                }
            }
        }
        for participant_id in store.list_ids(&paths::participants(&experiment_id))? {
            resume.push(paths::participant(&experiment_id, &participant_id));
        }
    }
    Ok(resume)
}

/// Run the reactors until `shutdown` is cancelled
pub async fn serve(
    config: LabConfig,
    snapshot: Option<PathBuf>,
    shutdown: CancellationToken,
) -> Result<()> {
    let store = open_store(snapshot.as_ref())?;
    info!(documents = store.len()?, "Document store ready");

    if !check_endpoint(&config.model.url).await {
        warn!(url = %config.model.url, "Model endpoint unreachable; agents will stay silent");
    }
    let client = HttpModelClient::new(config.model.clone()).context("Failed to build model client")?;

    let runtime = ReactorRuntime::new(Reactors::new(
        store.clone(),
        config.coordination.clone(),
        Arc::new(client),
    ));
    let handle = runtime.start();

    let resume = resume_paths(&store)?;
    info!(count = resume.len(), "Replaying triggers for existing documents");
    for path in resume {
        let version = store.version(&path)?.unwrap_or_default();
        let reactors = runtime.reactors().clone();
        let cancel = runtime.cancellation_token();
        tokio::spawn(async move {
            let event = DocumentEvent::new(path, ChangeKind::Updated, version);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = reactors.handle(&event) => {}
            }
        });
    }

    shutdown.cancelled().await;
    runtime.stop();
    handle.await.context("Reactor runtime panicked")?;

    if let Some(path) = snapshot {
        store
            .save_snapshot(&path)
            .with_context(|| format!("Failed to save snapshot {}", path.display()))?;
        info!(path = %path.display(), "Snapshot saved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_coordination::state::{ChatStageConfig, ChatStagePublicData, StagePublicData};
    use cohort_coordination::{CohortConfig, ParticipantProfile};

    #[test]
    fn test_resume_paths() {
        let store = DocumentStore::new();
        store
            .set(
                &paths::experiment("e1"),
                &Experiment::new("e1", vec!["chat".into(), "exit".into()]),
            )
            .unwrap();
        store
            .set(&paths::cohort("e1", "c1"), &CohortConfig::new("c1", Default::default()))
            .unwrap();
        store
            .set(
                &paths::public_data("e1", "c1", "chat"),
                &StagePublicData::Chat(ChatStagePublicData::new(&ChatStageConfig::new("chat"))),
            )
            .unwrap();
        store
            .set(
                &paths::participant("e1", "p1"),
                &ParticipantProfile::new("p1", "pub-p1", "c1", "chat"),
            )
            .unwrap();

        let resume = resume_paths(&store).unwrap();
        assert_eq!(
            resume,
            vec![
                paths::public_data("e1", "c1", "chat"),
                paths::participant("e1", "p1"),
            ]
        );
    }

    #[test]
    fn test_open_store_without_snapshot() {
        let store = open_store(None).unwrap();
        assert!(store.is_empty().unwrap());

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("state.json");
        assert!(open_store(Some(&missing)).unwrap().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_serve_saves_snapshot_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let seed = DocumentStore::new();
            seed.set(&paths::experiment("e1"), &Experiment::new("e1", vec![]))
                .unwrap();
            seed.save_snapshot(&path).unwrap();
        }

        let mut config = LabConfig::default();
        config.model.url = "http://127.0.0.1:9".into();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        serve(config, Some(path.clone()), shutdown).await.unwrap();

        let reloaded = DocumentStore::load_snapshot(&path).unwrap();
        assert!(reloaded
            .get_value(&paths::experiment("e1"))
            .unwrap()
            .is_some());
    }
}
