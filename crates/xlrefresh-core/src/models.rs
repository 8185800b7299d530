//! Core data models for xlrefresh.
//!
//! These types are shared across all xlrefresh crates and are serialized
//! as-is by the HTTP API.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// REGISTRY TYPES
// =============================================================================

/// A spreadsheet location registered for refreshing.
///
/// `id` is assigned by the registry, increases monotonically and is never
/// reused, even after the entry is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredPath {
    pub id: i64,
    #[serde(rename = "file_path")]
    pub path: String,
}

/// Request body for adding or replacing a registry path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

/// Result of populating the registry from a seed list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    /// Paths newly inserted.
    pub added: usize,
    /// Paths skipped because they were already registered.
    pub already_present: usize,
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Validated delay settings captured by a refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSettings {
    /// Seconds to wait after triggering recalculation before saving.
    pub refresh_delay: u64,
    /// Seconds to pause after each file.
    pub inter_file_delay: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            refresh_delay: defaults::REFRESH_DELAY_SECS,
            inter_file_delay: defaults::INTER_FILE_DELAY_SECS,
        }
    }
}

impl RefreshSettings {
    /// Create settings from explicit delays in seconds.
    pub fn new(refresh_delay: u64, inter_file_delay: u64) -> Self {
        Self {
            refresh_delay,
            inter_file_delay,
        }
    }

    /// Defaults used by the terminal run mode (5s / 2s).
    pub fn terminal() -> Self {
        Self::new(
            defaults::TERMINAL_REFRESH_DELAY_SECS,
            defaults::TERMINAL_INTER_FILE_DELAY_SECS,
        )
    }

    pub fn refresh_delay_duration(&self) -> Duration {
        Duration::from_secs(self.refresh_delay)
    }

    pub fn inter_file_delay_duration(&self) -> Duration {
        Duration::from_secs(self.inter_file_delay)
    }
}

/// Unvalidated settings as submitted by a front end.
///
/// Missing fields fall back to the API defaults; the update always replaces
/// both values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default = "default_refresh_delay")]
    pub refresh_delay: i64,
    #[serde(default = "default_inter_file_delay")]
    pub inter_file_delay: i64,
}

fn default_refresh_delay() -> i64 {
    defaults::REFRESH_DELAY_SECS as i64
}

fn default_inter_file_delay() -> i64 {
    defaults::INTER_FILE_DELAY_SECS as i64
}

impl SettingsUpdate {
    /// Validate and convert into [`RefreshSettings`].
    ///
    /// Fails with [`Error::InvalidSettings`] when either delay is negative.
    pub fn validate(self) -> Result<RefreshSettings> {
        let refresh_delay = u64::try_from(self.refresh_delay).map_err(|_| {
            Error::InvalidSettings(format!(
                "refresh_delay must be >= 0, got {}",
                self.refresh_delay
            ))
        })?;
        let inter_file_delay = u64::try_from(self.inter_file_delay).map_err(|_| {
            Error::InvalidSettings(format!(
                "inter_file_delay must be >= 0, got {}",
                self.inter_file_delay
            ))
        })?;
        Ok(RefreshSettings::new(refresh_delay, inter_file_delay))
    }
}

impl From<RefreshSettings> for SettingsUpdate {
    fn from(s: RefreshSettings) -> Self {
        Self {
            refresh_delay: s.refresh_delay as i64,
            inter_file_delay: s.inter_file_delay as i64,
        }
    }
}

// =============================================================================
// PER-FILE OUTCOMES
// =============================================================================

/// Steps of one engine session, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStage {
    Launch,
    Open,
    Recalculate,
    RunMacro,
    Save,
    Close,
    Quit,
}

impl EngineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStage::Launch => "launch",
            EngineStage::Open => "open",
            EngineStage::Recalculate => "recalculate",
            EngineStage::RunMacro => "run_macro",
            EngineStage::Save => "save",
            EngineStage::Close => "close",
            EngineStage::Quit => "quit",
        }
    }
}

impl fmt::Display for EngineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed outcome of refreshing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Recalculated and saved.
    Succeeded,
    /// The path did not exist when the refresh started.
    NotFound,
    /// An engine step failed.
    EngineFault { stage: EngineStage, cause: String },
    /// The run was cancelled while this file was waiting on recalculation.
    Cancelled,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FileOutcome::NotFound | FileOutcome::EngineFault { .. }
        )
    }
}

/// Report for one file processed by the refresh engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
    /// Macro invoked for this file (post-pass only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macro_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

// =============================================================================
// BATCH SUMMARY
// =============================================================================

/// Why the master-file post-pass did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PostPassSkip {
    /// No master file is configured.
    NoMasterConfigured,
    /// The master file is not among the registered paths.
    MasterNotRegistered { master_file: String },
    /// The run was cancelled before the post-pass.
    Cancelled,
}

impl fmt::Display for PostPassSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostPassSkip::NoMasterConfigured => write!(f, "no master file configured"),
            PostPassSkip::MasterNotRegistered { master_file } => {
                write!(f, "master file {} is not registered", master_file)
            }
            PostPassSkip::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Result of the master-file post-pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PostPass {
    /// The main pass had nothing to do.
    NotReached,
    Skipped {
        #[serde(flatten)]
        reason: PostPassSkip,
    },
    Ran { report: FileReport },
}

/// Summary of one orchestrator run.
///
/// Counts cover the main pass only; the post-pass is reported separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    /// Paths in the registry snapshot.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Paths not processed (never started or interrupted by cancellation).
    pub skipped: usize,
    pub files: Vec<FileReport>,
    pub post_pass: PostPass,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    /// Build a summary from per-file reports of a snapshot with `total` paths.
    pub fn from_reports(
        run_id: Uuid,
        total: usize,
        files: Vec<FileReport>,
        post_pass: PostPass,
        cancelled: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let succeeded = files.iter().filter(|f| f.outcome.is_success()).count();
        let failed = files.iter().filter(|f| f.outcome.is_failure()).count();
        let skipped = total.saturating_sub(succeeded + failed);
        Self {
            run_id,
            total,
            succeeded,
            failed,
            skipped,
            files,
            post_pass,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

// =============================================================================
// RUN RECORDS
// =============================================================================

/// Lifecycle state of a refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    /// The registry snapshot could not be read.
    Failed,
}

/// Observable record of a refresh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub status: RunStatus,
    pub settings: RefreshSettings,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// A freshly started run.
    pub fn running(id: Uuid, settings: RefreshSettings) -> Self {
        Self {
            id,
            status: RunStatus::Running,
            settings,
            started_at: Utc::now(),
            finished_at: None,
            summary: None,
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}
