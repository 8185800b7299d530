//! Single-flight refresh runs in the background.
//!
//! At most one run is active at a time; a second start while one is running
//! is rejected with [`Error::RunInProgress`]. Finished runs are kept in a
//! bounded in-memory history, newest first.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use xlrefresh_core::{defaults, BatchSummary, Error, RefreshSettings, Result, RunRecord, RunStatus};

use crate::orchestrator::BatchOrchestrator;

struct ActiveRun {
    record: RunRecord,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RunnerState {
    active: Option<ActiveRun>,
    history: VecDeque<RunRecord>,
}

/// Starts orchestrator runs on background tasks and tracks their records.
#[derive(Clone)]
pub struct RefreshRunner {
    orchestrator: Arc<BatchOrchestrator>,
    state: Arc<RwLock<RunnerState>>,
    history_limit: usize,
    /// Id of the active run, `None` when idle.
    active_tx: Arc<watch::Sender<Option<Uuid>>>,
}

impl RefreshRunner {
    pub fn new(orchestrator: BatchOrchestrator) -> Self {
        let (active_tx, _) = watch::channel(None);
        Self {
            orchestrator: Arc::new(orchestrator),
            state: Arc::new(RwLock::new(RunnerState::default())),
            history_limit: defaults::RUN_HISTORY_LIMIT,
            active_tx: Arc::new(active_tx),
        }
    }

    /// Keep at most `limit` finished runs.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn orchestrator(&self) -> &BatchOrchestrator {
        &self.orchestrator
    }

    /// Start a run with `settings` and return immediately.
    ///
    /// The settings value is captured here; later updates do not affect the
    /// run.
    pub async fn start(&self, settings: RefreshSettings) -> Result<RunRecord> {
        let mut state = self.state.write().await;
        if let Some(active) = &state.active {
            warn!(
                subsystem = "jobs",
                component = "runner",
                active_run_id = %active.record.id,
                "Refresh requested while a run is active"
            );
            return Err(Error::RunInProgress(active.record.id));
        }

        let run_id = Uuid::now_v7();
        let record = RunRecord::running(run_id, settings);
        let cancel = CancellationToken::new();
        state.active = Some(ActiveRun {
            record: record.clone(),
            cancel: cancel.clone(),
        });
        // the watch value only changes while the state lock is held
        self.active_tx.send_replace(Some(run_id));
        drop(state);

        info!(
            subsystem = "jobs",
            component = "runner",
            %run_id,
            refresh_delay = settings.refresh_delay,
            inter_file_delay = settings.inter_file_delay,
            "Refresh run accepted"
        );

        let runner = self.clone();
        tokio::spawn(async move {
            let orchestrator = runner.orchestrator.clone();
            let token = cancel.clone();
            let task =
                tokio::spawn(async move { orchestrator.run(run_id, settings, &token).await });

            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(%run_id, error = ?e, "Refresh run task panicked");
                    Err(Error::Internal(format!("refresh run task failed: {}", e)))
                }
            };
            runner.complete(run_id, outcome).await;
        });

        Ok(record)
    }

    async fn complete(&self, run_id: Uuid, outcome: Result<BatchSummary>) {
        let mut state = self.state.write().await;
        let mut record = match state.active.take() {
            Some(active) if active.record.id == run_id => active.record,
            other => {
                // never expected: only this run's task completes it
                state.active = other;
                RunRecord::running(run_id, RefreshSettings::default())
            }
        };

        record.finished_at = Some(Utc::now());
        match outcome {
            Ok(summary) => {
                record.status = if summary.cancelled {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Completed
                };
                record.summary = Some(summary);
            }
            Err(e) => {
                error!(%run_id, error = %e, "Refresh run failed");
                record.status = RunStatus::Failed;
                record.error = Some(e.to_string());
            }
        }

        info!(%run_id, status = ?record.status, "Refresh run recorded");
        state.history.push_front(record);
        state.history.truncate(self.history_limit);
        self.active_tx.send_replace(None);
        drop(state);
    }

    /// Request cancellation of the active run. Returns its id.
    pub async fn cancel(&self) -> Result<Uuid> {
        let state = self.state.read().await;
        match &state.active {
            Some(active) => {
                active.cancel.cancel();
                info!(run_id = %active.record.id, "Refresh run cancellation requested");
                Ok(active.record.id)
            }
            None => Err(Error::NotFound("No refresh run in progress".to_string())),
        }
    }

    /// The active run, if any.
    pub async fn current(&self) -> Option<RunRecord> {
        self.state
            .read()
            .await
            .active
            .as_ref()
            .map(|a| a.record.clone())
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.active.is_some()
    }

    /// Look up a run by id, active or finished.
    pub async fn get(&self, id: Uuid) -> Option<RunRecord> {
        let state = self.state.read().await;
        if let Some(active) = state.active.as_ref().filter(|a| a.record.id == id) {
            return Some(active.record.clone());
        }
        state.history.iter().find(|r| r.id == id).cloned()
    }

    /// Active run first, then finished runs newest first.
    pub async fn history(&self) -> Vec<RunRecord> {
        let state = self.state.read().await;
        state
            .active
            .iter()
            .map(|a| a.record.clone())
            .chain(state.history.iter().cloned())
            .collect()
    }

    /// Wait until no run is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.active_tx.subscribe();
        let _ = rx.wait_for(|active| active.is_none()).await;
    }

    /// Wait for run `id` to finish and return its final record.
    pub async fn wait(&self, id: Uuid) -> Option<RunRecord> {
        let mut rx = self.active_tx.subscribe();
        let _ = rx.wait_for(|active| *active != Some(id)).await;
        self.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::RefreshEngine;
    use crate::mock::{EngineCall, InMemoryPathRepository, MockEngine};
    use crate::orchestrator::OrchestratorConfig;
    use xlrefresh_core::{EventBus, SettingsStore, SettingsUpdate};

    fn runner_with(paths: &[String], engine: &MockEngine) -> RefreshRunner {
        RefreshRunner::new(BatchOrchestrator::new(
            Arc::new(InMemoryPathRepository::with_paths(paths)),
            RefreshEngine::new(Arc::new(engine.clone())),
            OrchestratorConfig::default(),
            EventBus::default(),
        ))
    }

    fn files(dir: &tempfile::TempDir, names: &[&str]) -> Vec<String> {
        names
            .iter()
            .map(|n| {
                let p = dir.path().join(n);
                std::fs::write(&p, b"xlsx").unwrap();
                p.to_string_lossy().into_owned()
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_returns_immediately_and_completes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let runner = runner_with(&files(&dir, &["a.xlsx"]), &engine);

        let record = runner.start(RefreshSettings::new(1, 1)).await.unwrap();
        assert_eq!(record.status, RunStatus::Running);
        assert!(runner.is_running().await);
        assert_eq!(runner.current().await.unwrap().id, record.id);

        let finished = runner.wait(record.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Completed);
        assert!(finished.finished_at.is_some());
        let summary = finished.summary.unwrap();
        assert_eq!(summary.run_id, record.id);
        assert_eq!(summary.succeeded, 1);
        assert!(runner.current().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let runner = runner_with(&files(&dir, &["a.xlsx", "b.xlsx"]), &engine);

        let first = runner.start(RefreshSettings::new(5, 5)).await.unwrap();
        let err = runner.start(RefreshSettings::new(5, 5)).await.unwrap_err();
        assert!(matches!(err, Error::RunInProgress(id) if id == first.id));

        runner.wait_idle().await;
        // only one batch touched the engine
        assert_eq!(engine.count(&EngineCall::Launch), 2);

        // idle again, so a new run is accepted
        let second = runner.start(RefreshSettings::new(0, 0)).await.unwrap();
        assert_ne!(second.id, first.id);
        runner.wait_idle().await;
        assert_eq!(runner.history().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_active_run() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let runner = runner_with(&files(&dir, &["a.xlsx", "b.xlsx", "c.xlsx"]), &engine);

        let record = runner.start(RefreshSettings::new(10, 10)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(runner.cancel().await.unwrap(), record.id);

        let finished = runner.wait(record.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Cancelled);
        let summary = finished.summary.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 2);
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_not_found() {
        let runner = runner_with(&[], &MockEngine::new());
        assert!(matches!(runner.cancel().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_registry_failure_records_failed_run() {
        let runner = RefreshRunner::new(BatchOrchestrator::new(
            Arc::new(InMemoryPathRepository::new().fail_list()),
            RefreshEngine::new(Arc::new(MockEngine::new())),
            OrchestratorConfig::default(),
            EventBus::default(),
        ));

        let record = runner.start(RefreshSettings::default()).await.unwrap();
        let finished = runner.wait(record.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Failed);
        assert!(finished.error.unwrap().contains("registry unavailable"));
        assert!(finished.summary.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_captured_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let runner = runner_with(&files(&dir, &["a.xlsx", "b.xlsx"]), &engine);
        let store = SettingsStore::new(RefreshSettings::new(2, 2));

        let start = tokio::time::Instant::now();
        let record = runner.start(store.get().await).await.unwrap();
        store
            .set(SettingsUpdate {
                refresh_delay: 100,
                inter_file_delay: 100,
            })
            .await
            .unwrap();

        let finished = runner.wait(record.id).await.unwrap();
        assert_eq!(finished.settings, RefreshSettings::new(2, 2));
        // 2 x (2 + 2) + 30 settle
        assert_eq!(start.elapsed(), Duration::from_secs(38));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_idle_signal_tracks_back_to_back_runs() {
        let runner = runner_with(&[], &MockEngine::new());

        for _ in 0..200 {
            let record = loop {
                match runner.start(RefreshSettings::new(0, 0)).await {
                    Ok(record) => break record,
                    Err(Error::RunInProgress(_)) => tokio::task::yield_now().await,
                    Err(e) => panic!("unexpected error {}", e),
                }
            };

            tokio::time::timeout(Duration::from_secs(5), runner.wait_idle())
                .await
                .expect("idle signal lost");
            assert!(!runner.is_running().await);
            assert!(!runner.get(record.id).await.unwrap().is_running());
        }
    }

    #[tokio::test]
    async fn test_history_is_bounded_newest_first() {
        let runner = runner_with(&[], &MockEngine::new()).with_history_limit(3);

        let mut ids = Vec::new();
        for _ in 0..5 {
            let record = runner.start(RefreshSettings::new(0, 0)).await.unwrap();
            runner.wait(record.id).await;
            ids.push(record.id);
        }

        let history: Vec<Uuid> = runner.history().await.iter().map(|r| r.id).collect();
        assert_eq!(history, vec![ids[4], ids[3], ids[2]]);
        assert!(runner.get(ids[0]).await.is_none());
        assert!(runner.get(ids[4]).await.is_some());
    }
}
