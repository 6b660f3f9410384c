//! Client for the task-recording server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::RecordedAction;

/// Where finished actions go.
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Open a root task and return its id.
    async fn start_task(&self, task_name: &str) -> Result<String>;

    /// Action that also opens a sub-task described by its instruction.
    async fn add_task_and_action(&self, task_id: &str, action: &RecordedAction) -> Result<()>;

    /// Action on the current page that needs no instruction.
    async fn add_page_action(&self, task_id: &str, action: &RecordedAction) -> Result<()>;

    /// Close the task with a final screenshot.
    async fn save_task(&self, task_id: &str, screenshot: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct NewTask<'a> {
    task_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct NewTaskResponse {
    task_id: String,
}

#[derive(Debug, Serialize)]
struct EndTask<'a> {
    screenshot: &'a str,
}

/// JSON-over-HTTP [`ActionSink`].
pub struct TaskApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl TaskApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("POST {} returned {}: {}", url, status, text);
        }
        Ok(response)
    }
}

#[async_trait]
impl ActionSink for TaskApiClient {
    async fn start_task(&self, task_name: &str) -> Result<String> {
        let response: NewTaskResponse = self
            .post("start_root_task", &NewTask { task_name })
            .await?
            .json()
            .await
            .context("Invalid start_root_task response")?;
        tracing::info!("Started root task {} ({})", response.task_id, task_name);
        Ok(response.task_id)
    }

    async fn add_task_and_action(&self, task_id: &str, action: &RecordedAction) -> Result<()> {
        self.post(&format!("add_task_and_action/{}", task_id), action)
            .await?;
        tracing::debug!("Submitted {} with instruction for {}", action.action, task_id);
        Ok(())
    }

    async fn add_page_action(&self, task_id: &str, action: &RecordedAction) -> Result<()> {
        self.post(&format!("add_page_action/{}", task_id), action)
            .await?;
        tracing::debug!("Submitted {} for {}", action.action, task_id);
        Ok(())
    }

    async fn save_task(&self, task_id: &str, screenshot: &str) -> Result<()> {
        self.post(&format!("save_task/{}", task_id), &EndTask { screenshot })
            .await?;
        tracing::info!("Saved task {}", task_id);
        Ok(())
    }
}
