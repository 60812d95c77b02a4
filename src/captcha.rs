//! Image captcha solving
//!
//! Thin client for the JSON-RPC solver service: submit a base64 PNG,
//! then poll for the answer on a fixed cadence until the poll budget
//! runs out. Transient transport or parse failures during polling
//! consume an attempt and do not abort the solve.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::SolverConfig;
use crate::error::{CaptchaError, Result};
use crate::session;

/// Per-request timeout when submitting a task
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-request timeout for a single poll
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    #[serde(rename = "errorId")]
    error_id: Option<i64>,
    #[serde(rename = "errorDescription")]
    error_description: Option<String>,
    #[serde(rename = "taskId")]
    task_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TaskResultResponse {
    #[serde(rename = "errorId")]
    error_id: Option<i64>,
    #[serde(rename = "errorDescription")]
    error_description: Option<String>,
    status: Option<String>,
    solution: Option<TaskSolution>,
}

#[derive(Debug, Deserialize)]
struct TaskSolution {
    text: Option<String>,
}

/// Client for an external image-to-text captcha service
#[derive(Clone)]
pub struct CaptchaSolver {
    client: Client,
    api_base: String,
    client_key: Option<String>,
    poll_interval: Duration,
    max_polls: u32,
}

impl CaptchaSolver {
    /// Build a solver from configuration. Fails only if the underlying
    /// HTTP client cannot be constructed.
    pub fn new(config: &SolverConfig) -> Result<Self> {
        Ok(Self {
            client: session::solver_client()?,
            api_base: config.api_url.trim_end_matches('/').to_string(),
            client_key: config.client_key.clone(),
            poll_interval: config.poll_interval,
            max_polls: config.max_polls,
        })
    }

    #[cfg(test)]
    fn with_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    /// Solve one image captcha.
    ///
    /// `image_b64` is the raw base64 payload without the data-URL prefix.
    /// Returns the transcribed text, or an error once the poll budget is
    /// exhausted or the service rejects the task.
    pub async fn solve(&self, image_b64: &str) -> std::result::Result<String, CaptchaError> {
        let key = self
            .client_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(CaptchaError::NotConfigured)?;

        let task_id = self.submit(key, image_b64).await?;
        debug!(task_id, "captcha task submitted");
        self.poll(key, task_id).await
    }

    async fn submit(&self, key: &str, image_b64: &str) -> std::result::Result<u64, CaptchaError> {
        let body = json!({
            "clientKey": key,
            "task": {
                "type": "ImageToTextTask",
                "body": image_b64,
                "phrase": false,
                "case": true,
                "numeric": 0,
            },
        });

        let response = self
            .client
            .post(format!("{}/createTask", self.api_base))
            .timeout(SUBMIT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| CaptchaError::Transport(e.to_string()))?;
        let created: CreateTaskResponse = response
            .json()
            .await
            .map_err(|e| CaptchaError::Transport(e.to_string()))?;

        if created.error_id.unwrap_or(0) != 0 {
            return Err(CaptchaError::Solver(
                created
                    .error_description
                    .unwrap_or_else(|| "task rejected".to_string()),
            ));
        }
        match created.task_id {
            Some(id) if id != 0 => Ok(id),
            _ => Err(CaptchaError::MissingTaskId),
        }
    }

    async fn poll(&self, key: &str, task_id: u64) -> std::result::Result<String, CaptchaError> {
        let body = json!({ "clientKey": key, "taskId": task_id });

        for attempt in 1..=self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let sent = self
                .client
                .post(format!("{}/getTaskResult", self.api_base))
                .timeout(POLL_TIMEOUT)
                .json(&body)
                .send()
                .await;
            let response = match sent {
                Ok(r) => r,
                Err(e) => {
                    warn!(task_id, attempt, error = %e, "captcha poll failed, retrying");
                    continue;
                }
            };
            let result: TaskResultResponse = match response.json().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(task_id, attempt, error = %e, "captcha poll unparseable, retrying");
                    continue;
                }
            };

            if result.error_id.unwrap_or(0) != 0 {
                return Err(CaptchaError::Solver(
                    result
                        .error_description
                        .unwrap_or_else(|| "task failed".to_string()),
                ));
            }
            match result.status.as_deref() {
                Some("ready") => {
                    let text = result
                        .solution
                        .and_then(|s| s.text)
                        .unwrap_or_default();
                    if text.is_empty() {
                        return Err(CaptchaError::EmptySolution);
                    }
                    return Ok(text);
                }
                Some("processing") | None => {
                    debug!(task_id, attempt, "captcha still processing");
                }
                Some(other) => {
                    return Err(CaptchaError::Solver(format!("unexpected status {other:?}")));
                }
            }
        }

        Err(CaptchaError::Timeout)
    }
}
