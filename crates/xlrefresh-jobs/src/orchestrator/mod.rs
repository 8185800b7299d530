//! Batch orchestrator: the paced pass over the registry and the master-file
//! post-pass.
//!
//! A run reads the registry once and never re-reads it. Files are refreshed
//! strictly one at a time in snapshot order, with the inter-file pause after
//! every file (the last one included). After the pass the orchestrator waits
//! a fixed settle period, then refreshes the master file once more with the
//! master macro if the master file is part of the snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use xlrefresh_core::{
    defaults, BatchSummary, EventBus, FileOutcome, FileReport, PathRepository, PostPass,
    PostPassSkip, RefreshEvent, RefreshSettings, Result, WaitKind,
};

use crate::engine::RefreshEngine;


/// Post-pass configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Master file designator, compared by exact string equality.
    pub master_file: Option<String>,
    /// Macro invoked on the master file.
    pub master_macro: String,
    /// Fixed wait between the main pass and the post-pass.
    pub settle_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            master_file: None,
            master_macro: defaults::MASTER_MACRO_NAME.to_string(),
            settle_delay: Duration::from_secs(defaults::SETTLE_DELAY_SECS),
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `MASTER_FILE` | unset | Master file path; unset skips the post-pass |
    /// | `MASTER_MACRO` | `CombineWithTableAndSource` | Macro run on the master file |
    pub fn from_env() -> Self {
        let master_file = std::env::var("MASTER_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let master_macro = std::env::var("MASTER_MACRO")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| defaults::MASTER_MACRO_NAME.to_string());

        Self {
            master_file,
            master_macro,
            ..Self::default()
        }
    }

    pub fn with_master_file(mut self, path: impl Into<String>) -> Self {
        self.master_file = Some(path.into());
        self
    }

    pub fn with_master_macro(mut self, name: impl Into<String>) -> Self {
        self.master_macro = name.into();
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Sequences the refresh engine over a registry snapshot.
pub struct BatchOrchestrator {
    registry: Arc<dyn PathRepository>,
    engine: RefreshEngine,
    config: OrchestratorConfig,
    events: EventBus,
}

impl BatchOrchestrator {
    pub fn new(
        registry: Arc<dyn PathRepository>,
        engine: RefreshEngine,
        config: OrchestratorConfig,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            engine,
            config,
            events,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn engine(&self) -> &RefreshEngine {
        &self.engine
    }

    /// Run one batch with `settings` captured by the caller.
    ///
    /// Only a failure to read the registry snapshot is an error; per-file
    /// faults are reported in the summary.
    #[instrument(skip(self, settings, cancel), fields(subsystem = "jobs", component = "orchestrator"))]
    pub async fn run(
        &self,
        run_id: Uuid,
        settings: RefreshSettings,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let snapshot = self.registry.list().await?;
        let started_at = Utc::now();
        let total = snapshot.len();
        let refresh_delay = settings.refresh_delay_duration();

        info!(
            %run_id,
            file_count = total,
            refresh_delay_secs = settings.refresh_delay,
            inter_file_delay_secs = settings.inter_file_delay,
            "Refresh run started"
        );
        self.events.emit(RefreshEvent::RunStarted {
            run_id,
            file_count: total,
        });

        if snapshot.is_empty() {
            info!(%run_id, "Registry is empty, nothing to refresh");
            return Ok(self.finish(run_id, 0, Vec::new(), PostPass::NotReached, false, started_at));
        }

        let mut files = Vec::with_capacity(total);
        let mut cancelled = false;

        for (index, entry) in snapshot.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            self.events.emit(RefreshEvent::FileStarted {
                run_id,
                index,
                path: entry.path.clone(),
            });
            let report = self.engine.refresh(&entry.path, refresh_delay, cancel).await;
            let interrupted = report.outcome == FileOutcome::Cancelled;
            self.events.emit(RefreshEvent::FileFinished {
                run_id,
                report: report.clone(),
            });
            files.push(report);

            if interrupted
                || !self
                    .pause(
                        run_id,
                        WaitKind::InterFile,
                        settings.inter_file_delay_duration(),
                        cancel,
                    )
                    .await
            {
                cancelled = true;
                break;
            }
        }

        if !cancelled
            && !self
                .pause(run_id, WaitKind::Settle, self.config.settle_delay, cancel)
                .await
        {
            cancelled = true;
        }

        let post_pass = if cancelled {
            self.skip_post_pass(run_id, PostPassSkip::Cancelled)
        } else {
            match self.config.master_file.as_deref() {
                None => self.skip_post_pass(run_id, PostPassSkip::NoMasterConfigured),
                Some(master) if !snapshot.iter().any(|e| e.path == master) => self
                    .skip_post_pass(
                        run_id,
                        PostPassSkip::MasterNotRegistered {
                            master_file: master.to_string(),
                        },
                    ),
                Some(master) => {
                    info!(%run_id, file_path = master, macro_name = %self.config.master_macro, "Running master post-pass");
                    self.events.emit(RefreshEvent::PostPassStarted {
                        run_id,
                        path: master.to_string(),
                        macro_name: self.config.master_macro.clone(),
                    });
                    let report = self
                        .engine
                        .refresh_and_run_macro(
                            master,
                            &self.config.master_macro,
                            refresh_delay,
                            cancel,
                        )
                        .await;
                    if report.outcome == FileOutcome::Cancelled {
                        cancelled = true;
                    }
                    PostPass::Ran { report }
                }
            }
        };

        Ok(self.finish(run_id, total, files, post_pass, cancelled, started_at))
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` on cancel.
    async fn pause(
        &self,
        run_id: Uuid,
        kind: WaitKind,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        self.events.emit(RefreshEvent::Waiting {
            run_id,
            kind,
            seconds: duration.as_secs(),
        });
        debug!(%run_id, ?kind, seconds = duration.as_secs(), "Waiting");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(%run_id, ?kind, "Wait interrupted by cancellation");
                false
            }
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn skip_post_pass(&self, run_id: Uuid, reason: PostPassSkip) -> PostPass {
        match &reason {
            PostPassSkip::MasterNotRegistered { .. } => {
                warn!(%run_id, "Post-pass skipped: {}", reason)
            }
            _ => info!(%run_id, "Post-pass skipped: {}", reason),
        }
        self.events.emit(RefreshEvent::PostPassSkipped {
            run_id,
            reason: reason.clone(),
        });
        PostPass::Skipped { reason }
    }

    fn finish(
        &self,
        run_id: Uuid,
        total: usize,
        files: Vec<FileReport>,
        post_pass: PostPass,
        cancelled: bool,
        started_at: DateTime<Utc>,
    ) -> BatchSummary {
        let summary =
            BatchSummary::from_reports(run_id, total, files, post_pass, cancelled, started_at);
        info!(
            %run_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "Refresh run finished"
        );
        self.events.emit(RefreshEvent::RunFinished {
            run_id,
            summary: summary.clone(),
        });
        summary
    }
}
