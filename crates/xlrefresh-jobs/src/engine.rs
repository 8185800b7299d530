//! Single-file refresh cycle against an external spreadsheet engine.
//!
//! Every call launches a fresh application instance and walks it through
//!
//! ```text
//! LAUNCH -> [file exists?] -no-> NOT_FOUND
//!             |yes
//!           OPEN -> RECALCULATE -> WAIT(refresh_delay) -> [RUN_MACRO] -> SAVE
//!           -> CLOSE -> QUIT
//! ```
//!
//! Faults never escape: they become a [`FileOutcome`] in the returned
//! [`FileReport`]. Once the application is launched it is quit on every exit
//! path, and once the document is open it is closed on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use xlrefresh_core::{
    defaults, EngineStage, Error, FileOutcome, FileReport, Result, SpreadsheetEngine,
    SpreadsheetSession,
};

/// Drives one isolated engine instance per file.
#[derive(Clone)]
pub struct RefreshEngine {
    engine: Arc<dyn SpreadsheetEngine>,
    step_timeout: Duration,
}

impl RefreshEngine {
    pub fn new(engine: Arc<dyn SpreadsheetEngine>) -> Self {
        Self {
            engine,
            step_timeout: Duration::from_secs(defaults::ENGINE_STEP_TIMEOUT_SECS),
        }
    }

    /// Bound every individual engine step (launch, open, save, ...).
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.engine.health_check().await
    }

    /// Recalculate and save `path`.
    pub async fn refresh(
        &self,
        path: &str,
        refresh_delay: Duration,
        cancel: &CancellationToken,
    ) -> FileReport {
        self.run_cycle(path, None, refresh_delay, cancel).await
    }

    /// Recalculate `path`, invoke `macro_name` against it, then save.
    pub async fn refresh_and_run_macro(
        &self,
        path: &str,
        macro_name: &str,
        refresh_delay: Duration,
        cancel: &CancellationToken,
    ) -> FileReport {
        self.run_cycle(path, Some(macro_name), refresh_delay, cancel)
            .await
    }

    async fn run_cycle(
        &self,
        path: &str,
        macro_name: Option<&str>,
        refresh_delay: Duration,
        cancel: &CancellationToken,
    ) -> FileReport {
        let started_at = Utc::now();
        let start = Instant::now();

        debug!(
            subsystem = "jobs",
            component = "refresh_engine",
            engine = self.engine.name(),
            file_path = path,
            macro_name,
            refresh_delay_secs = refresh_delay.as_secs(),
            "Starting refresh cycle"
        );

        let outcome = self.drive(path, macro_name, refresh_delay, cancel).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            FileOutcome::Succeeded => info!(
                subsystem = "jobs",
                component = "refresh_engine",
                file_path = path,
                duration_ms,
                "File refreshed"
            ),
            FileOutcome::NotFound => warn!(
                subsystem = "jobs",
                component = "refresh_engine",
                file_path = path,
                "File not found, skipping refresh"
            ),
            FileOutcome::EngineFault { stage, cause } => warn!(
                subsystem = "jobs",
                component = "refresh_engine",
                file_path = path,
                %stage,
                cause = %cause,
                duration_ms,
                "Refresh failed"
            ),
            FileOutcome::Cancelled => info!(
                subsystem = "jobs",
                component = "refresh_engine",
                file_path = path,
                "Refresh cancelled before save"
            ),
        }

        FileReport {
            path: path.to_string(),
            outcome,
            macro_name: macro_name.map(String::from),
            started_at,
            duration_ms,
        }
    }

    async fn drive(
        &self,
        path: &str,
        macro_name: Option<&str>,
        refresh_delay: Duration,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let mut session = match self.step(EngineStage::Launch, self.engine.launch()).await {
            Ok(session) => session,
            Err(cause) => {
                return FileOutcome::EngineFault {
                    stage: EngineStage::Launch,
                    cause,
                }
            }
        };

        let outcome = self
            .drive_session(session.as_mut(), path, macro_name, refresh_delay, cancel)
            .await;

        if let Err(cause) = self.step(EngineStage::Quit, session.quit()).await {
            warn!(
                subsystem = "jobs",
                component = "refresh_engine",
                file_path = path,
                stage = %EngineStage::Quit,
                cause = %cause,
                "Failed to quit engine instance"
            );
        }
        outcome
    }

    async fn drive_session(
        &self,
        session: &mut dyn SpreadsheetSession,
        path: &str,
        macro_name: Option<&str>,
        refresh_delay: Duration,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        match tokio::fs::try_exists(path).await {
            Ok(true) => {}
            Ok(false) => return FileOutcome::NotFound,
            Err(e) => {
                return FileOutcome::EngineFault {
                    stage: EngineStage::Open,
                    cause: format!("cannot access {}: {}", path, e),
                }
            }
        }

        if let Err(cause) = self.step(EngineStage::Open, session.open(path)).await {
            return FileOutcome::EngineFault {
                stage: EngineStage::Open,
                cause,
            };
        }

        let outcome = self
            .drive_document(session, macro_name, refresh_delay, cancel)
            .await;

        if let Err(cause) = self.step(EngineStage::Close, session.close()).await {
            warn!(
                subsystem = "jobs",
                component = "refresh_engine",
                file_path = path,
                stage = %EngineStage::Close,
                cause = %cause,
                "Failed to close document"
            );
        }
        outcome
    }

    async fn drive_document(
        &self,
        session: &mut dyn SpreadsheetSession,
        macro_name: Option<&str>,
        refresh_delay: Duration,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        if let Err(cause) = self
            .step(EngineStage::Recalculate, session.recalculate())
            .await
        {
            return FileOutcome::EngineFault {
                stage: EngineStage::Recalculate,
                cause,
            };
        }

        // Recalculation is asynchronous in the engine and offers no completion
        // signal; the delay is a heuristic.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return FileOutcome::Cancelled,
            _ = tokio::time::sleep(refresh_delay) => {}
        }

        if let Some(name) = macro_name {
            if let Err(cause) = self.step(EngineStage::RunMacro, session.run_macro(name)).await {
                return FileOutcome::EngineFault {
                    stage: EngineStage::RunMacro,
                    cause,
                };
            }
        }

        match self.step(EngineStage::Save, session.save()).await {
            Ok(()) => FileOutcome::Succeeded,
            Err(cause) => FileOutcome::EngineFault {
                stage: EngineStage::Save,
                cause,
            },
        }
    }

    /// Run one engine step under the step timeout, flattening the error to
    /// its cause text.
    async fn step<T, F>(&self, stage: EngineStage, fut: F) -> std::result::Result<T, String>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::Engine { message, .. })) => Err(message),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "{} timed out after {}s",
                stage,
                self.step_timeout.as_secs()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{EngineCall, MockEngine};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn workbook(dir: &TempDir, name: &str) -> String {
        let path: PathBuf = dir.path().join(name);
        std::fs::write(&path, b"xlsx").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn engine_with(mock: &MockEngine) -> RefreshEngine {
        RefreshEngine::new(Arc::new(mock.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_success_sequence_and_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(&dir, "a.xlsx");
        let mock = MockEngine::new();
        let engine = engine_with(&mock);

        let start = tokio::time::Instant::now();
        let report = engine
            .refresh(&path, Duration::from_secs(10), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, FileOutcome::Succeeded);
        assert!(report.macro_name.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(
            mock.calls(),
            vec![
                EngineCall::Launch,
                EngineCall::Open(path.clone()),
                EngineCall::Recalculate,
                EngineCall::Save,
                EngineCall::Close,
                EngineCall::Quit,
            ]
        );

        // save happens only after the full refresh delay
        let timed = mock.timed_calls();
        let recalc_at = timed[2].0;
        let save_at = timed[3].0;
        assert_eq!(save_at - recalc_at, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_and_run_macro_inserts_macro_before_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(&dir, "master.xlsm");
        let mock = MockEngine::new();
        let engine = engine_with(&mock);

        let report = engine
            .refresh_and_run_macro(
                &path,
                "CombineWithTableAndSource",
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;

        assert!(report.outcome.is_success());
        assert_eq!(report.macro_name.as_deref(), Some("CombineWithTableAndSource"));
        assert_eq!(
            mock.calls(),
            vec![
                EngineCall::Launch,
                EngineCall::Open(path),
                EngineCall::Recalculate,
                EngineCall::RunMacro("CombineWithTableAndSource".to_string()),
                EngineCall::Save,
                EngineCall::Close,
                EngineCall::Quit,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_file_quits_without_opening() {
        let mock = MockEngine::new();
        let engine = engine_with(&mock);

        let report = engine
            .refresh(
                "/no/such/dir/missing.xlsx",
                Duration::ZERO,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.outcome, FileOutcome::NotFound);
        assert_eq!(mock.calls(), vec![EngineCall::Launch, EngineCall::Quit]);
    }

    #[tokio::test]
    async fn test_inaccessible_path_is_an_engine_fault_with_cause() {
        let mock = MockEngine::new();
        let engine = engine_with(&mock);

        let report = engine
            .refresh("/tmp/bad\0name.xlsx", Duration::ZERO, &CancellationToken::new())
            .await;

        match &report.outcome {
            FileOutcome::EngineFault { stage, cause } => {
                assert_eq!(*stage, EngineStage::Open);
                assert!(cause.contains("cannot access"));
                assert!(cause.to_lowercase().contains("nul byte"), "cause: {}", cause);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(report.outcome.is_failure());
        assert_eq!(mock.calls(), vec![EngineCall::Launch, EngineCall::Quit]);
    }

    #[tokio::test]
    async fn test_launch_failure_is_contained() {
        let mock = MockEngine::new().fail_launch();
        let engine = engine_with(&mock);

        let report = engine
            .refresh("whatever.xlsx", Duration::ZERO, &CancellationToken::new())
            .await;

        assert_eq!(
            report.outcome,
            FileOutcome::EngineFault {
                stage: EngineStage::Launch,
                cause: "application unavailable".to_string()
            }
        );
        assert_eq!(mock.calls(), vec![EngineCall::Launch]);
    }

    #[tokio::test]
    async fn test_open_failure_still_quits() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(&dir, "locked.xlsx");
        let mock = MockEngine::new().fail_on(&path, EngineStage::Open, "file is locked");
        let engine = engine_with(&mock);

        let report = engine
            .refresh(&path, Duration::ZERO, &CancellationToken::new())
            .await;

        assert!(matches!(
            report.outcome,
            FileOutcome::EngineFault { stage: EngineStage::Open, ref cause } if cause == "file is locked"
        ));
        // never opened, so nothing to close
        assert_eq!(
            mock.calls(),
            vec![EngineCall::Launch, EngineCall::Open(path), EngineCall::Quit]
        );
    }

    #[tokio::test]
    async fn test_save_failure_closes_and_quits() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(&dir, "a.xlsx");
        let mock = MockEngine::new().fail_on(&path, EngineStage::Save, "disk full");
        let engine = engine_with(&mock);

        let report = engine
            .refresh(&path, Duration::ZERO, &CancellationToken::new())
            .await;

        assert!(report.outcome.is_failure());
        assert_eq!(mock.count(&EngineCall::Close), 1);
        assert_eq!(mock.count(&EngineCall::Quit), 1);
    }

    #[tokio::test]
    async fn test_macro_failure_skips_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(&dir, "master.xlsm");
        let mock = MockEngine::new().fail_on(&path, EngineStage::RunMacro, "macro not found");
        let engine = engine_with(&mock);

        let report = engine
            .refresh_and_run_macro(&path, "Missing", Duration::ZERO, &CancellationToken::new())
            .await;

        assert!(matches!(
            report.outcome,
            FileOutcome::EngineFault {
                stage: EngineStage::RunMacro,
                ..
            }
        ));
        assert_eq!(mock.count(&EngineCall::Save), 0);
        assert_eq!(mock.count(&EngineCall::Close), 1);
        assert_eq!(mock.count(&EngineCall::Quit), 1);
    }

    #[tokio::test]
    async fn test_close_failure_after_save_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(&dir, "a.xlsx");
        let mock = MockEngine::new()
            .fail_on(&path, EngineStage::Close, "already closed")
            .fail_on(&path, EngineStage::Quit, "instance gone");
        let engine = engine_with(&mock);

        let report = engine
            .refresh(&path, Duration::ZERO, &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, FileOutcome::Succeeded);
        assert_eq!(mock.count(&EngineCall::Quit), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_step_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(&dir, "slow.xlsx");
        let mock = MockEngine::new().hang_on(EngineStage::Recalculate);
        let engine = engine_with(&mock).with_step_timeout(Duration::from_secs(60));

        let start = tokio::time::Instant::now();
        let report = engine
            .refresh(&path, Duration::from_secs(5), &CancellationToken::new())
            .await;

        assert_eq!(
            report.outcome,
            FileOutcome::EngineFault {
                stage: EngineStage::Recalculate,
                cause: "recalculate timed out after 60s".to_string()
            }
        );
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(mock.count(&EngineCall::Close), 1);
        assert_eq!(mock.count(&EngineCall::Quit), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_closes_without_saving() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(&dir, "a.xlsx");
        let mock = MockEngine::new();
        let engine = engine_with(&mock);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let report = engine.refresh(&path, Duration::from_secs(10), &cancel).await;

        assert_eq!(report.outcome, FileOutcome::Cancelled);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(mock.count(&EngineCall::Save), 0);
        assert_eq!(mock.count(&EngineCall::Close), 1);
        assert_eq!(mock.count(&EngineCall::Quit), 1);
    }
}
