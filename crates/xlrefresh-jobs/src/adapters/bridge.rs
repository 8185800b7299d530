//! Engine adapter that drives a spreadsheet application through a bridge
//! process speaking line-delimited JSON on stdin/stdout.
//!
//! One bridge process is spawned per [`launch`](SpreadsheetEngine::launch),
//! so every file gets an isolated application instance. Requests and
//! responses are one JSON object per line:
//!
//! ```text
//! -> {"op":"open","path":"C:\\Data\\a.xlsx"}
//! <- {"ok":true}
//! -> {"op":"run_macro","name":"CombineWithTableAndSource"}
//! <- {"ok":false,"error":"Cannot run the macro"}
//! ```
//!
//! Supported ops: `ping`, `open`, `recalculate`, `run_macro`, `save`,
//! `close`, `quit`. The reference bridge for Excel COM is
//! `scripts/excel-bridge.ps1`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use xlrefresh_core::{
    defaults, EngineStage, Error, Result, SpreadsheetEngine, SpreadsheetSession,
};

/// Bridge process configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Program to spawn.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Upper bound for a single request/response exchange.
    pub step_timeout: Duration,
    /// How long to wait for the process to exit after `quit` before killing it.
    pub exit_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: defaults::ENGINE_COMMAND.to_string(),
            args: split_args(defaults::ENGINE_ARGS),
            step_timeout: Duration::from_secs(defaults::ENGINE_STEP_TIMEOUT_SECS),
            exit_grace: Duration::from_secs(defaults::ENGINE_EXIT_GRACE_SECS),
        }
    }
}

impl BridgeConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ENGINE_COMMAND` | `powershell` | Bridge program |
    /// | `ENGINE_ARGS` | `-NoProfile -ExecutionPolicy Bypass -File scripts/excel-bridge.ps1` | Whitespace-separated arguments |
    /// | `ENGINE_STEP_TIMEOUT_SECS` | `300` | Upper bound for one engine step |
    pub fn from_env() -> Self {
        let program = std::env::var("ENGINE_COMMAND")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| defaults::ENGINE_COMMAND.to_string());

        let args = std::env::var("ENGINE_ARGS")
            .map(|v| split_args(&v))
            .unwrap_or_else(|_| split_args(defaults::ENGINE_ARGS));

        let step_timeout_secs = std::env::var("ENGINE_STEP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::ENGINE_STEP_TIMEOUT_SECS)
            .max(1);

        Self {
            program,
            args,
            step_timeout: Duration::from_secs(step_timeout_secs),
            exit_grace: Duration::from_secs(defaults::ENGINE_EXIT_GRACE_SECS),
        }
    }

    /// Bridge spawning `program` with `args`.
    pub fn command<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(String::from).collect()
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Ping,
    Open { path: &'a str },
    Recalculate,
    RunMacro { name: &'a str },
    Save,
    Close,
    Quit,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Spreadsheet engine backed by a bridge process.
#[derive(Debug, Clone)]
pub struct BridgeEngine {
    config: BridgeConfig,
}

impl BridgeEngine {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    async fn spawn(&self) -> Result<BridgeSession> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::engine(
                    EngineStage::Launch,
                    format!("Failed to start {}: {}", self.config.program, e),
                )
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(BufReader::new);
        let (stdin, stdout) = match (stdin, stdout) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                return Err(Error::engine(
                    EngineStage::Launch,
                    "Bridge process has no stdio pipes",
                ))
            }
        };

        debug!(
            subsystem = "jobs",
            component = "bridge",
            program = %self.config.program,
            pid = child.id(),
            "Bridge process started"
        );

        Ok(BridgeSession {
            child,
            stdin: Some(stdin),
            stdout,
            step_timeout: self.config.step_timeout,
            exit_grace: self.config.exit_grace,
            poisoned: false,
        })
    }
}

impl Default for BridgeEngine {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

#[async_trait]
impl SpreadsheetEngine for BridgeEngine {
    async fn launch(&self) -> Result<Box<dyn SpreadsheetSession>> {
        let mut session = self.spawn().await?;
        // the bridge answers ping once the application instance exists
        if let Err(e) = session.call(EngineStage::Launch, &BridgeRequest::Ping).await {
            session.kill().await;
            return Err(e);
        }
        Ok(Box::new(session))
    }

    async fn health_check(&self) -> Result<bool> {
        match self.launch().await {
            Ok(mut session) => {
                let _ = session.quit().await;
                Ok(true)
            }
            Err(e) => {
                debug!(error = %e, "Bridge health check failed");
                Ok(false)
            }
        }
    }

    fn name(&self) -> &str {
        "bridge"
    }
}

/// One bridge process with at most one open document.
pub struct BridgeSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    step_timeout: Duration,
    exit_grace: Duration,
    /// Set while a request awaits its response; still set afterwards if the
    /// exchange was abandoned, leaving the stream out of sync.
    poisoned: bool,
}

impl BridgeSession {
    async fn call(&mut self, stage: EngineStage, request: &BridgeRequest<'_>) -> Result<()> {
        if self.poisoned {
            return Err(Error::engine(
                stage,
                "bridge stream out of sync after an interrupted step",
            ));
        }

        self.poisoned = true;
        let timeout = self.step_timeout;
        let response = tokio::time::timeout(timeout, self.exchange(stage, request))
            .await
            .map_err(|_| {
                Error::engine(
                    stage,
                    format!("bridge did not answer within {}s", timeout.as_secs()),
                )
            })??;
        self.poisoned = false;

        if response.ok {
            Ok(())
        } else {
            Err(Error::engine(
                stage,
                response
                    .error
                    .unwrap_or_else(|| "bridge reported an unspecified error".to_string()),
            ))
        }
    }

    async fn exchange(
        &mut self,
        stage: EngineStage,
        request: &BridgeRequest<'_>,
    ) -> Result<BridgeResponse> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::engine(stage, "bridge input already closed"))?;

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::engine(stage, format!("write to bridge failed: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::engine(stage, format!("write to bridge failed: {}", e)))?;

        let mut reply = String::new();
        loop {
            reply.clear();
            let n = self
                .stdout
                .read_line(&mut reply)
                .await
                .map_err(|e| Error::engine(stage, format!("read from bridge failed: {}", e)))?;
            if n == 0 {
                return Err(Error::engine(stage, "bridge exited unexpectedly"));
            }
            if !reply.trim().is_empty() {
                break;
            }
        }

        serde_json::from_str(reply.trim()).map_err(|e| {
            Error::engine(
                stage,
                format!("invalid bridge response: {}: {}", e, reply.trim()),
            )
        })
    }

    async fn kill(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.kill().await {
            warn!(subsystem = "jobs", component = "bridge", error = %e, "Failed to kill bridge process");
        }
    }
}

#[async_trait]
impl SpreadsheetSession for BridgeSession {
    async fn open(&mut self, path: &str) -> Result<()> {
        self.call(EngineStage::Open, &BridgeRequest::Open { path })
            .await
    }

    async fn recalculate(&mut self) -> Result<()> {
        self.call(EngineStage::Recalculate, &BridgeRequest::Recalculate)
            .await
    }

    async fn run_macro(&mut self, name: &str) -> Result<()> {
        self.call(EngineStage::RunMacro, &BridgeRequest::RunMacro { name })
            .await
    }

    async fn save(&mut self) -> Result<()> {
        self.call(EngineStage::Save, &BridgeRequest::Save).await
    }

    async fn close(&mut self) -> Result<()> {
        self.call(EngineStage::Close, &BridgeRequest::Close).await
    }

    async fn quit(&mut self) -> Result<()> {
        let result = self.call(EngineStage::Quit, &BridgeRequest::Quit).await;
        // closing stdin lets a bridge that ignored `quit` see EOF
        self.stdin = None;

        match tokio::time::timeout(self.exit_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(subsystem = "jobs", component = "bridge", %status, "Bridge process exited");
            }
            Ok(Err(e)) => {
                warn!(subsystem = "jobs", component = "bridge", error = %e, "Failed to reap bridge process");
                self.kill().await;
            }
            Err(_) => {
                warn!(
                    subsystem = "jobs",
                    component = "bridge",
                    grace_secs = self.exit_grace.as_secs(),
                    "Bridge process did not exit after quit, killing"
                );
                self.kill().await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(BridgeRequest::Open { path: "C:\\a.xlsx" }).unwrap();
        assert_eq!(json, serde_json::json!({"op": "open", "path": "C:\\a.xlsx"}));

        let json = serde_json::to_value(BridgeRequest::RunMacro { name: "M" }).unwrap();
        assert_eq!(json, serde_json::json!({"op": "run_macro", "name": "M"}));

        let json = serde_json::to_value(BridgeRequest::Recalculate).unwrap();
        assert_eq!(json, serde_json::json!({"op": "recalculate"}));
    }

    #[test]
    fn test_response_parsing() {
        let ok: BridgeResponse = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(ok.ok);
        assert!(ok.error.is_none());

        let err: BridgeResponse =
            serde_json::from_str(r#"{"ok":false,"error":"locked"}"#).unwrap();
        assert!(!err.ok);
        assert_eq!(err.error.as_deref(), Some("locked"));
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.program, "powershell");
        assert_eq!(
            config.args,
            vec!["-NoProfile", "-ExecutionPolicy", "Bypass", "-File", "scripts/excel-bridge.ps1"]
        );
        assert_eq!(config.step_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_command_builder() {
        let config = BridgeConfig::command("sh", ["-c", "true"])
            .with_step_timeout(Duration::from_secs(2))
            .with_exit_grace(Duration::from_secs(1));
        assert_eq!(config.program, "sh");
        assert_eq!(config.args, vec!["-c", "true"]);
        assert_eq!(config.step_timeout, Duration::from_secs(2));
        assert_eq!(config.exit_grace, Duration::from_secs(1));
    }
}
