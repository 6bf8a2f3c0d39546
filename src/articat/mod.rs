//! Articat service on Helix: artifact lookups run as server-side tasks.
//!
//! A task is created with a POST to `<endpoint>/tasks` and then polled at its
//! `task_url` until it reaches a terminal status.

mod task;

use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use serde_json::{Value, json};

use crate::http::HttpClient;

pub use task::{Task, TaskEndpoint, TaskError, TaskSettings, TaskStatus};

/// How long artifact-id resolution may run server-side.
pub const TASK_TIMEOUT_FOR_ARTIFACT_IDS: Duration = Duration::from_secs(600);

/// How long provenance lookups may run server-side.
pub const TASK_TIMEOUT_FOR_ARTIFACT_PROV: Duration = Duration::from_secs(60);

/// Input hashed by [`Articat::string_digest`].
pub const TASK_STRING_DIGEST_INPUT: &str = "test string";

/// Artifact used by the smoke test.
pub const SMOKE_TEST_ARTIFACT_URL: &str =
    "https://build-artifactory.eng.vmware.com/jcenter-cache/junit/junit/4.13/junit-4.13.jar";

/// Articat endpoints, layered over a shared [`HttpClient`].
pub struct Articat {
    http: HttpClient,
    settings: TaskSettings,
}

impl Articat {
    pub fn new(http: HttpClient) -> Self {
        Self::with_settings(http, TaskSettings::default())
    }

    pub fn with_settings(http: HttpClient, settings: TaskSettings) -> Self {
        Self { http, settings }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Resolves an artifact URL to its SRP unique id.
    #[tracing::instrument(skip(self))]
    pub async fn convert_url_to_srp_uid(&self, artifact_url: &str) -> Result<String> {
        let task = self
            .execute_task(
                TaskEndpoint::ArtifactIds,
                json!({ "inputs": [artifact_url] }),
                TASK_TIMEOUT_FOR_ARTIFACT_IDS,
            )
            .await
            .with_context(|| format!("Failed to convert {} to an SRP unique id", artifact_url))?;

        let srp_uid = task
            .outputs
            .get("comp_ids")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::UrlUnconverted(artifact_url.to_string()))?;

        info!("The SRP unique id is {}", srp_uid);
        Ok(srp_uid.to_string())
    }

    /// Fetches provenance data for an SRP unique id.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_prov_data(&self, srp_uid: &str) -> Result<Value> {
        let task = self
            .execute_task(
                TaskEndpoint::ArtifactProv,
                json!({ "inputs": [srp_uid] }),
                TASK_TIMEOUT_FOR_ARTIFACT_PROV,
            )
            .await
            .with_context(|| format!("Failed to fetch provenance data for {}", srp_uid))?;

        Ok(task.outputs)
    }

    /// Digests a fixed string server-side; a cheap check that tasks run.
    #[tracing::instrument(skip(self))]
    pub async fn string_digest(&self) -> Result<Value> {
        let task = self
            .execute_task(
                TaskEndpoint::StringDigest,
                json!({ "inputs": [TASK_STRING_DIGEST_INPUT] }),
                TASK_TIMEOUT_FOR_ARTIFACT_PROV,
            )
            .await
            .context("Failed to digest the test string")?;

        Ok(task.outputs)
    }

    /// Runs a task to completion, retrying it when it fails or times out.
    pub async fn execute_task(
        &self,
        endpoint: TaskEndpoint,
        post_data: Value,
        timeout: Duration,
    ) -> Result<Task> {
        task::execute(&self.http, &self.settings, endpoint, &post_data, timeout).await
    }
}
