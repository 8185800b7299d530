//! ApiClient tests against a mock HTTP server.

use std::time::Duration;

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xlrefresh_api::client::ApiClient;
use xlrefresh_core::{Error, RefreshSettings, RunStatus};

fn run_json(id: Uuid, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "status": status,
        "settings": { "refresh_delay": 10, "inter_file_delay": 5 },
        "started_at": "2026-10-18T09:00:00Z"
    })
}

#[tokio::test]
async fn test_list_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "file_path": "C:\\a.xlsx" },
            { "id": 4, "file_path": "C:\\b.xlsx" }
        ])))
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri());
    let files = client.list_files().await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].id, 4);
    assert_eq!(files[1].path, "C:\\b.xlsx");
}

#[tokio::test]
async fn test_add_file_sends_path_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .and(body_json(json!({ "path": "C:\\a.xlsx" })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": 7, "file_path": "C:\\a.xlsx" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(format!("{}/", server.uri()));
    let entry = client.add_file("C:\\a.xlsx").await.unwrap();
    assert_eq!(entry.id, 7);
}

#[tokio::test]
async fn test_error_body_becomes_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({ "error": "Path already registered: C:\\a.xlsx" })),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri());
    let err = client.add_file("C:\\a.xlsx").await.unwrap_err();
    match err {
        Error::Request(msg) => {
            assert!(msg.contains("409"));
            assert!(msg.contains("Path already registered"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_settings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/settings"))
        .and(body_json(json!({ "refresh_delay": 3, "inter_file_delay": 1 })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "refresh_delay": 3, "inter_file_delay": 1 })),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri());
    let settings = client.set_settings(3, 1).await.unwrap();
    assert_eq!(settings, RefreshSettings::new(3, 1));
}

#[tokio::test]
async fn test_cancel_returns_run_id() {
    let server = MockServer::start().await;
    let id = Uuid::now_v7();
    Mock::given(method("POST"))
        .and(path("/runs/current/cancel"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "run_id": id })))
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri());
    assert_eq!(client.cancel_run().await.unwrap(), id);
}

#[tokio::test]
async fn test_wait_for_run_polls_until_finished() {
    let server = MockServer::start().await;
    let id = Uuid::now_v7();
    let run_path = format!("/runs/{}", id);

    Mock::given(method("GET"))
        .and(path(run_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_json(id, "running")))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(run_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_json(id, "completed")))
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri());
    let record = client
        .wait_for_run(id, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unreachable_server() {
    let client = ApiClient::new("http://127.0.0.1:1");
    let err = client.health().await.unwrap_err();
    assert!(err.to_string().contains("Cannot reach"));
}
