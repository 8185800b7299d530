//! Integration tests for the JSON-lines bridge engine.
//!
//! This test suite validates:
//! - Bridge-001: A well-behaved bridge completes a full refresh cycle
//! - Bridge-002: `{"ok":false}` responses become engine faults at the right stage
//! - Bridge-003: A missing bridge program is a launch fault
//! - Bridge-004: A bridge that exits early is a launch fault
//! - Bridge-005: A silent bridge hits the step timeout
//! - Bridge-006: Health check reflects bridge availability
//!
//! The bridges are small `sh` loops, so these tests only run on unix.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use xlrefresh_jobs::{
    BridgeConfig, BridgeEngine, EngineStage, Error, FileOutcome, RefreshEngine,
    SpreadsheetEngine,
};

/// Answers every request with success and exits on EOF.
const OK_BRIDGE: &str = r#"while read line; do echo '{"ok":true}'; done"#;

/// Fails `save`, succeeds on everything else.
const SAVE_FAILS_BRIDGE: &str = r#"while read line; do
  case "$line" in
    *'"save"'*) echo '{"ok":false,"error":"disk full"}' ;;
    *) echo '{"ok":true}' ;;
  esac
done"#;

/// Logs every request line to the file named by $1.
const RECORDING_BRIDGE: &str = r#"while read line; do
  echo "$line" >> "$1"
  echo '{"ok":true}'
done"#;

fn sh_bridge(script: &str) -> BridgeEngine {
    BridgeEngine::new(
        BridgeConfig::command("sh", ["-c", script])
            .with_step_timeout(Duration::from_secs(5))
            .with_exit_grace(Duration::from_secs(5)),
    )
}

fn workbook(dir: &tempfile::TempDir, name: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, b"xlsx").expect("Failed to write workbook");
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_ok_bridge_completes_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(&dir, "a.xlsx");
    let engine = RefreshEngine::new(Arc::new(sh_bridge(OK_BRIDGE)));

    let report = engine
        .refresh(&path, Duration::from_millis(10), &CancellationToken::new())
        .await;

    assert_eq!(report.outcome, FileOutcome::Succeeded);
    assert_eq!(engine.engine_name(), "bridge");
}

#[tokio::test]
async fn test_bridge_receives_protocol_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(&dir, "master.xlsm");
    let log = dir.path().join("requests.log");
    let log_arg = log.to_string_lossy().into_owned();

    let bridge = BridgeEngine::new(
        BridgeConfig::command("sh", ["-c", RECORDING_BRIDGE, "bridge", log_arg.as_str()])
            .with_step_timeout(Duration::from_secs(5)),
    );
    let engine = RefreshEngine::new(Arc::new(bridge));

    let report = engine
        .refresh_and_run_macro(
            &path,
            "CombineWithTableAndSource",
            Duration::ZERO,
            &CancellationToken::new(),
        )
        .await;
    assert!(report.outcome.is_success());

    let ops: Vec<String> = std::fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["op"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(
        ops,
        vec!["ping", "open", "recalculate", "run_macro", "save", "close", "quit"]
    );
}

#[tokio::test]
async fn test_bridge_error_maps_to_stage() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(&dir, "a.xlsx");
    let engine = RefreshEngine::new(Arc::new(sh_bridge(SAVE_FAILS_BRIDGE)));

    let report = engine
        .refresh(&path, Duration::ZERO, &CancellationToken::new())
        .await;

    assert_eq!(
        report.outcome,
        FileOutcome::EngineFault {
            stage: EngineStage::Save,
            cause: "disk full".to_string()
        }
    );
}

#[tokio::test]
async fn test_missing_program_is_launch_fault() {
    let engine = RefreshEngine::new(Arc::new(BridgeEngine::new(BridgeConfig::command(
        "/nonexistent/xlrefresh-bridge",
        Vec::<String>::new(),
    ))));

    let report = engine
        .refresh("a.xlsx", Duration::ZERO, &CancellationToken::new())
        .await;

    match report.outcome {
        FileOutcome::EngineFault { stage, cause } => {
            assert_eq!(stage, EngineStage::Launch);
            assert!(cause.contains("Failed to start"), "cause: {}", cause);
        }
        other => panic!("expected launch fault, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bridge_exiting_early_is_launch_fault() {
    let engine = sh_bridge("exit 0");
    let err = match engine.launch().await {
        Ok(_) => panic!("launch should fail"),
        Err(e) => e,
    };
    // either the write or the read notices the dead process first
    assert!(matches!(
        err,
        Error::Engine {
            stage: EngineStage::Launch,
            ..
        }
    ));
}

#[tokio::test]
async fn test_silent_bridge_times_out() {
    let bridge = BridgeEngine::new(
        BridgeConfig::command("sh", ["-c", "while read line; do :; done"])
            .with_step_timeout(Duration::from_millis(200))
            .with_exit_grace(Duration::from_millis(200)),
    );

    let err = match bridge.launch().await {
        Ok(_) => panic!("launch should time out"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("did not answer"));
}

#[tokio::test]
async fn test_health_check() {
    assert!(sh_bridge(OK_BRIDGE).health_check().await.unwrap());
    assert!(!sh_bridge("exit 1").health_check().await.unwrap());
}
