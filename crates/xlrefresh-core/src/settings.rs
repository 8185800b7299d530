//! Process-wide refresh settings holder.
//!
//! Runs capture a copy of the settings when they start, so an update never
//! affects a run that is already in flight.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::Result;
use crate::models::{RefreshSettings, SettingsUpdate};

/// Shared, wholesale-replaceable refresh settings.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    current: Arc<RwLock<RefreshSettings>>,
}

impl SettingsStore {
    pub fn new(initial: RefreshSettings) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
        }
    }

    /// Snapshot of the current settings.
    pub async fn get(&self) -> RefreshSettings {
        *self.current.read().await
    }

    /// Replace both delays. Rejects negative values and leaves the current
    /// settings untouched in that case.
    pub async fn set(&self, update: SettingsUpdate) -> Result<RefreshSettings> {
        let validated = update.validate()?;
        *self.current.write().await = validated;
        info!(
            refresh_delay = validated.refresh_delay,
            inter_file_delay = validated.inter_file_delay,
            "Refresh settings updated"
        );
        Ok(validated)
    }
}
