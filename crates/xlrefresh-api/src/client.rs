//! Typed HTTP client for the xlrefresh API.
//!
//! Used by the `xlrefresh` command-line front end.
//!
//! ```rust,no_run
//! use xlrefresh_api::client::ApiClient;
//!
//! # async fn demo() -> xlrefresh_core::Result<()> {
//! let client = ApiClient::new("http://127.0.0.1:8000");
//! for entry in client.list_files().await? {
//!     println!("{}: {}", entry.id, entry.path);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use xlrefresh_core::{
    Error, PathRequest, RefreshSettings, RegisteredPath, Result, RunRecord, SeedReport,
    SettingsUpdate,
};

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct CancelResponse {
    run_id: Uuid,
}

/// Client for one API server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Request(format!("Cannot reach {}: {}", self.base_url, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        Err(Error::Request(format!("{}: {}", status, message)))
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        Ok(response.json::<T>().await?)
    }

    /// `GET /health`: returns the server version.
    pub async fn health(&self) -> Result<String> {
        let body: serde_json::Value = self.json(self.request(Method::GET, "/health")).await?;
        Ok(body["version"].as_str().unwrap_or("unknown").to_string())
    }

    pub async fn list_files(&self) -> Result<Vec<RegisteredPath>> {
        self.json(self.request(Method::GET, "/files")).await
    }

    pub async fn add_file(&self, path: &str) -> Result<RegisteredPath> {
        let body = PathRequest {
            path: path.to_string(),
        };
        self.json(self.request(Method::POST, "/files").json(&body))
            .await
    }

    pub async fn update_file(&self, id: i64, path: &str) -> Result<RegisteredPath> {
        let body = PathRequest {
            path: path.to_string(),
        };
        self.json(
            self.request(Method::PUT, &format!("/files/{}", id))
                .json(&body),
        )
        .await
    }

    pub async fn delete_file(&self, id: i64) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("/files/{}", id)))
            .await?;
        Ok(())
    }

    pub async fn get_settings(&self) -> Result<RefreshSettings> {
        self.json(self.request(Method::GET, "/settings")).await
    }

    /// Replace both delays. Negative values are rejected by the server.
    pub async fn set_settings(
        &self,
        refresh_delay: i64,
        inter_file_delay: i64,
    ) -> Result<RefreshSettings> {
        let body = SettingsUpdate {
            refresh_delay,
            inter_file_delay,
        };
        self.json(self.request(Method::POST, "/settings").json(&body))
            .await
    }

    pub async fn run_refresh(&self) -> Result<RunRecord> {
        self.json(self.request(Method::POST, "/run-refresh")).await
    }

    pub async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        self.json(self.request(Method::GET, "/runs")).await
    }

    pub async fn get_run(&self, id: Uuid) -> Result<RunRecord> {
        self.json(self.request(Method::GET, &format!("/runs/{}", id)))
            .await
    }

    /// Request cancellation of the active run and return its id.
    pub async fn cancel_run(&self) -> Result<Uuid> {
        let body: CancelResponse = self
            .json(self.request(Method::POST, "/runs/current/cancel"))
            .await?;
        Ok(body.run_id)
    }

    pub async fn init_db(&self) -> Result<SeedReport> {
        self.json(self.request(Method::POST, "/init-db")).await
    }

    /// Poll run `id` every `interval` until it is no longer running.
    pub async fn wait_for_run(&self, id: Uuid, interval: Duration) -> Result<RunRecord> {
        loop {
            let record = self.get_run(id).await?;
            if !record.is_running() {
                return Ok(record);
            }
            tokio::time::sleep(interval).await;
        }
    }
}
