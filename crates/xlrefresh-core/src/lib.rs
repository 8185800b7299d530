//! # xlrefresh-core
//!
//! Core types, traits, and abstractions for xlrefresh.
//!
//! This crate provides the domain data structures (registry entries, refresh
//! settings, per-file outcomes, batch summaries), the error taxonomy, and the
//! trait seams (path registry, external spreadsheet engine) that the other
//! xlrefresh crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod models;
pub mod settings;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, RefreshEvent, WaitKind};
pub use models::*;
pub use settings::SettingsStore;
pub use traits::*;
