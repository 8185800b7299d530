//! # xlrefresh-jobs
//!
//! Sequential spreadsheet refresh for xlrefresh.
//!
//! This crate provides:
//! - [`RefreshEngine`]: one isolated recalculate-and-save cycle per file
//! - [`BatchOrchestrator`]: the paced pass over a registry snapshot plus the
//!   master-file post-pass
//! - [`RefreshRunner`]: single-flight background runs with cancellation and
//!   an in-memory run history
//! - [`BridgeEngine`]: an out-of-process engine speaking JSON lines
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use xlrefresh_jobs::{BatchOrchestrator, BridgeConfig, BridgeEngine, OrchestratorConfig, RefreshEngine, RefreshRunner};
//!
//! let engine = RefreshEngine::new(Arc::new(BridgeEngine::new(BridgeConfig::from_env())));
//! let orchestrator = BatchOrchestrator::new(registry, engine, OrchestratorConfig::from_env(), events);
//! let runner = RefreshRunner::new(orchestrator);
//!
//! let run = runner.start(settings.get().await).await?;
//! println!("Run {} started", run.id);
//! ```

pub mod adapters;
pub mod engine;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod orchestrator;
pub mod runner;

// Re-export core types
pub use xlrefresh_core::*;

pub use adapters::{BridgeConfig, BridgeEngine};
pub use engine::RefreshEngine;
pub use orchestrator::{BatchOrchestrator, OrchestratorConfig};
pub use runner::RefreshRunner;
