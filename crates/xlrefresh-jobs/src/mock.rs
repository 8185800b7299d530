//! Recording test doubles for the engine and the path registry.
//!
//! Available in this crate's tests and, with the `mock` feature, to other
//! crates' tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use xlrefresh_core::{
    EngineStage, Error, PathRepository, RegisteredPath, Result, SpreadsheetEngine,
    SpreadsheetSession,
};

// =============================================================================
// MOCK ENGINE
// =============================================================================

/// One call observed by [`MockEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Launch,
    Open(String),
    Recalculate,
    RunMacro(String),
    Save,
    Close,
    Quit,
}

#[derive(Default)]
struct MockState {
    calls: Vec<(Instant, EngineCall)>,
    failing_launch: bool,
    failures: HashMap<(String, EngineStage), String>,
    hanging: HashSet<EngineStage>,
}

/// Engine double that records every call with its (virtual) timestamp.
///
/// Steps succeed instantly unless configured with [`fail_on`](Self::fail_on)
/// or [`hang_on`](Self::hang_on).
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every launch fails.
    pub fn fail_launch(self) -> Self {
        self.lock().failing_launch = true;
        self
    }

    /// Fail `stage` for sessions that opened (or try to open) `path`.
    pub fn fail_on(self, path: &str, stage: EngineStage, cause: &str) -> Self {
        self.lock()
            .failures
            .insert((path.to_string(), stage), cause.to_string());
        self
    }

    /// Never complete `stage` for any session.
    pub fn hang_on(self, stage: EngineStage) -> Self {
        self.lock().hanging.insert(stage);
        self
    }

    /// All calls in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.iter().map(|(_, c)| c.clone()).collect()
    }

    /// All calls with the instant they were made.
    pub fn timed_calls(&self) -> Vec<(Instant, EngineCall)> {
        self.lock().calls.clone()
    }

    /// Paths passed to `open`, in order.
    pub fn opened_paths(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|(_, c)| match c {
                EngineCall::Open(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.lock().calls.iter().filter(|(_, c)| c == call).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SpreadsheetEngine for MockEngine {
    async fn launch(&self) -> Result<Box<dyn SpreadsheetSession>> {
        let failing = {
            let mut state = self.lock();
            state.calls.push((Instant::now(), EngineCall::Launch));
            state.failing_launch
        };
        if failing {
            return Err(Error::engine(EngineStage::Launch, "application unavailable"));
        }
        Ok(Box::new(MockSession {
            engine: self.clone(),
            path: None,
        }))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.lock().failing_launch)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockSession {
    engine: MockEngine,
    path: Option<String>,
}

impl MockSession {
    async fn record(&self, stage: EngineStage, call: EngineCall) -> Result<()> {
        let (hang, failure) = {
            let mut state = self.engine.lock();
            state.calls.push((Instant::now(), call));
            let failure = self
                .path
                .as_ref()
                .and_then(|p| state.failures.get(&(p.clone(), stage)).cloned());
            (state.hanging.contains(&stage), failure)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        match failure {
            Some(cause) => Err(Error::engine(stage, cause)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SpreadsheetSession for MockSession {
    async fn open(&mut self, path: &str) -> Result<()> {
        self.path = Some(path.to_string());
        self.record(EngineStage::Open, EngineCall::Open(path.to_string()))
            .await
    }

    async fn recalculate(&mut self) -> Result<()> {
        self.record(EngineStage::Recalculate, EngineCall::Recalculate)
            .await
    }

    async fn run_macro(&mut self, name: &str) -> Result<()> {
        self.record(EngineStage::RunMacro, EngineCall::RunMacro(name.to_string()))
            .await
    }

    async fn save(&mut self) -> Result<()> {
        self.record(EngineStage::Save, EngineCall::Save).await
    }

    async fn close(&mut self) -> Result<()> {
        self.record(EngineStage::Close, EngineCall::Close).await
    }

    async fn quit(&mut self) -> Result<()> {
        self.record(EngineStage::Quit, EngineCall::Quit).await
    }
}

// =============================================================================
// IN-MEMORY REGISTRY
// =============================================================================

#[derive(Default)]
struct RegistryState {
    next_id: i64,
    entries: Vec<RegisteredPath>,
    failing_list: bool,
}

/// Path registry kept in memory with the same contract as the SQLite one.
#[derive(Clone, Default)]
pub struct InMemoryPathRepository {
    state: Arc<Mutex<RegistryState>>,
}

impl InMemoryPathRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `paths` in order.
    pub fn with_paths<S: AsRef<str>>(paths: &[S]) -> Self {
        let repo = Self::new();
        {
            let mut state = repo.lock();
            for p in paths {
                state.next_id += 1;
                let id = state.next_id;
                state.entries.push(RegisteredPath {
                    id,
                    path: p.as_ref().to_string(),
                });
            }
        }
        repo
    }

    /// Make `list` fail with a database-style error.
    pub fn fail_list(self) -> Self {
        self.lock().failing_list = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PathRepository for InMemoryPathRepository {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn add(&self, path: &str) -> Result<RegisteredPath> {
        let mut state = self.lock();
        if state.entries.iter().any(|e| e.path == path) {
            return Err(Error::DuplicatePath(path.to_string()));
        }
        state.next_id += 1;
        let entry = RegisteredPath {
            id: state.next_id,
            path: path.to_string(),
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn list(&self) -> Result<Vec<RegisteredPath>> {
        let state = self.lock();
        if state.failing_list {
            return Err(Error::Internal("registry unavailable".to_string()));
        }
        Ok(state.entries.clone())
    }

    async fn get(&self, id: i64) -> Result<Option<RegisteredPath>> {
        Ok(self.lock().entries.iter().find(|e| e.id == id).cloned())
    }

    async fn update_by_id(&self, id: i64, new_path: &str) -> Result<bool> {
        let mut state = self.lock();
        if !state.entries.iter().any(|e| e.id == id) {
            return Err(Error::NotFound(format!("Path {} not found", id)));
        }
        if state
            .entries
            .iter()
            .any(|e| e.id != id && e.path == new_path)
        {
            return Ok(false);
        }
        if let Some(entry) = state.entries.iter_mut().find(|e| e.id == id) {
            entry.path = new_path.to_string();
        }
        Ok(true)
    }

    async fn delete_by_id(&self, id: i64) -> Result<()> {
        self.lock().entries.retain(|e| e.id != id);
        Ok(())
    }
}
