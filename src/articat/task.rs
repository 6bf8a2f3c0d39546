//! Task creation and polling.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::http::{HttpClient, RequestOptions, join_url_segments};

/// Task endpoints exposed by Articat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEndpoint {
    ArtifactIds,
    ArtifactProv,
    StringDigest,
}

impl TaskEndpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEndpoint::ArtifactIds => "artifact-ids",
            TaskEndpoint::ArtifactProv => "artifact-prov",
            TaskEndpoint::StringDigest => "string-digest",
        }
    }
}

impl fmt::Display for TaskEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// A task as reported by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub status: TaskStatus,
    pub task_url: String,
    #[serde(default)]
    pub outputs: Value,
}

#[derive(Debug)]
pub enum TaskError {
    /// The task ended FAILED or CANCELLED.
    Failed { task_url: String, status: TaskStatus },
    /// The task did not finish in time.
    Timeout { task_url: String, waited: Duration },
    /// The artifact URL has no SRP unique id.
    UrlUnconverted(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Failed { task_url, status } => {
                write!(f, "Task {} ended with status {}", task_url, status)
            }
            TaskError::Timeout { task_url, waited } => {
                write!(
                    f,
                    "Task {} did not finish within {}s",
                    task_url,
                    waited.as_secs()
                )
            }
            TaskError::UrlUnconverted(url) => {
                write!(f, "The url is not converted to SRP unique ID: {}", url)
            }
        }
    }
}

impl std::error::Error for TaskError {}

impl TaskError {
    /// Failed and timed-out tasks are worth running again.
    fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Failed { .. } | TaskError::Timeout { .. })
    }
}

/// Timing of task execution.
#[derive(Debug, Clone, Copy)]
pub struct TaskSettings {
    pub poll_interval: Duration,
    pub max_attempts: usize,
    pub retry_wait: Duration,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_attempts: 3,
            retry_wait: Duration::from_secs(3),
        }
    }
}

impl TaskSettings {
    /// Settings with no waiting between polls or attempts.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            max_attempts: 3,
            retry_wait: Duration::ZERO,
        }
    }
}

pub(crate) async fn execute(
    http: &HttpClient,
    settings: &TaskSettings,
    endpoint: TaskEndpoint,
    post_data: &Value,
    timeout: Duration,
) -> Result<Task> {
    let max_attempts = settings.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match execute_once(http, settings, endpoint, post_data, timeout).await {
            Ok(task) => return Ok(task),
            Err(e) => {
                let retryable = e
                    .downcast_ref::<TaskError>()
                    .is_some_and(TaskError::is_retryable);
                if !retryable {
                    debug!("{} task: non-retryable error: {}", endpoint, e);
                    return Err(e);
                }

                if attempt < max_attempts {
                    warn!(
                        "{} task: attempt {}/{} failed ({}), retrying in {}ms...",
                        endpoint,
                        attempt,
                        max_attempts,
                        e,
                        settings.retry_wait.as_millis()
                    );
                    tokio::time::sleep(settings.retry_wait).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow!("{} task: failed after {} attempts", endpoint, max_attempts)))
}

#[tracing::instrument(skip(http, settings, post_data))]
async fn execute_once(
    http: &HttpClient,
    settings: &TaskSettings,
    endpoint: TaskEndpoint,
    post_data: &Value,
    timeout: Duration,
) -> Result<Task> {
    let tasks_path = join_url_segments(&[endpoint.as_str(), "tasks"])?;

    let mut task: Task = http
        .post_json(&tasks_path, RequestOptions::new().json(post_data.clone()))
        .await
        .with_context(|| format!("Failed to create {} task", endpoint))?;

    if task.status.is_terminal() {
        // Same inputs ran before; force a fresh run.
        let old_task_url = task.task_url.clone();
        info!("This task has been executed before: {}", old_task_url);

        task = http
            .post_json(
                &tasks_path,
                RequestOptions::new()
                    .query("force", "1")
                    .json(post_data.clone()),
            )
            .await
            .with_context(|| format!("Failed to force a new {} task", endpoint))?;

        if task.task_url == old_task_url {
            bail!("The task url is not changed by a force post: {}", old_task_url);
        }
    }
    info!("A new task is created: {}", task.task_url);

    let task = poll_until_done(http, settings, &task.task_url, timeout).await?;
    if matches!(task.status, TaskStatus::Failed | TaskStatus::Cancelled) {
        error!("The task status is '{}'", task.status);
        return Err(TaskError::Failed {
            task_url: task.task_url,
            status: task.status,
        }
        .into());
    }

    Ok(task)
}

async fn poll_until_done(
    http: &HttpClient,
    settings: &TaskSettings,
    task_url: &str,
    timeout: Duration,
) -> Result<Task> {
    let deadline = Instant::now() + timeout;

    loop {
        let task: Task = http
            .get_json(task_url, RequestOptions::new())
            .await
            .with_context(|| format!("Failed to poll task {}", task_url))?;

        if task.status.is_terminal() {
            return Ok(task);
        }
        debug!("Task {} is {}", task_url, task.status);

        let now = Instant::now();
        if now >= deadline {
            return Err(TaskError::Timeout {
                task_url: task_url.to_string(),
                waited: timeout,
            }
            .into());
        }
        // the last poll lands on the deadline
        tokio::time::sleep(settings.poll_interval.min(deadline - now)).await;
    }
}
