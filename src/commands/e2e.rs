//! End-to-end run over the artifact URLs found by an observer scan.
//!
//! Every artifactory URL is converted to an SRP unique id and its provenance
//! data is fetched. Outcomes are kept in a [`Report`] that is written to disk
//! periodically, so an interrupted run can resume where it stopped.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::articat::{Articat, TaskError};
use crate::http::join_url_segments;

/// Hosts whose URLs are exercised; other hosts are only listed.
pub const ARTIFACTORY_HOSTS: &[&str] = &["build-artifactory.eng.vmware.com"];

/// The report is saved after this many URLs.
pub const REPORT_SAVE_INTERVAL: usize = 20;

const REPORT_FILE_NAME: &str = "report.json";

/// `~/report.json`, or `report.json` in the working directory without a home.
pub fn default_report_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(REPORT_FILE_NAME)
}

/// The part of an observer result listing artifact repositories.
#[derive(Debug, Deserialize)]
pub struct ObserverResult {
    pub artifact_repositories: Vec<ArtifactRepository>,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactRepository {
    pub host: String,
    #[serde(default)]
    pub path: Vec<String>,
}

impl ObserverResult {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read observer result {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse observer result {}", path.display()))
    }
}

/// Where in the convert-then-fetch pipeline a URL failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Conversion,
    FetchProvData,
}

/// Outcome of every URL seen so far.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Report {
    pub non_artifactory_urls: Vec<String>,
    pub artifactory_urls: Vec<String>,
    pub successful_urls: Vec<String>,
    pub unconverted_urls: Vec<String>,
    pub timeout_in_conversion: Vec<String>,
    pub task_failed_in_conversion: Vec<String>,
    pub unexpected_error_in_conversion: Vec<String>,
    pub timeout_in_fetch_prov_data: Vec<String>,
    pub task_failed_in_fetch_prov_data: Vec<String>,
    pub unexpected_error_in_fetch_prov_data: Vec<String>,
    /// Error message per URL, for failures without a bucket of their own.
    pub unexpected_errors: BTreeMap<String, String>,
}

fn push_unique(urls: &mut Vec<String>, url: &str) {
    if !urls.iter().any(|u| u == url) {
        urls.push(url.to_string());
    }
}

impl Report {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read report {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse report {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write report {}", path.display()))
    }

    /// Adds every `https://<host>/<path>` of the observer result, keeping
    /// URLs already listed.
    pub fn add_observed_urls(
        &mut self,
        observer: &ObserverResult,
        artifactory_hosts: &[String],
    ) -> Result<()> {
        for repository in &observer.artifact_repositories {
            let host = repository.host.trim_end_matches('/');
            let is_artifactory = artifactory_hosts.iter().any(|h| h == host);
            let base = format!("https://{}", host);

            for path in &repository.path {
                let url = join_url_segments(&[&base, path])?;
                if is_artifactory {
                    push_unique(&mut self.artifactory_urls, &url);
                } else {
                    push_unique(&mut self.non_artifactory_urls, &url);
                }
            }
        }
        Ok(())
    }

    pub fn is_successful(&self, url: &str) -> bool {
        self.successful_urls.iter().any(|u| u == url)
    }

    /// Marks `url` successful and forgets its earlier failures.
    pub fn add_successful_url(&mut self, url: &str) {
        push_unique(&mut self.successful_urls, url);
        for urls in self.failure_lists_mut() {
            urls.retain(|u| u != url);
        }
        self.unexpected_errors.remove(url);
    }

    /// Files `url` under the bucket matching `error`.
    pub fn record_failure(&mut self, url: &str, stage: Stage, error: &anyhow::Error) {
        warn!("{:?} failed for {}: {:#}", stage, url, error);

        let bucket = match (stage, error.downcast_ref::<TaskError>()) {
            (Stage::Conversion, Some(TaskError::UrlUnconverted(_))) => &mut self.unconverted_urls,
            (Stage::Conversion, Some(TaskError::Timeout { .. })) => &mut self.timeout_in_conversion,
            (Stage::Conversion, Some(TaskError::Failed { .. })) => {
                &mut self.task_failed_in_conversion
            }
            (Stage::FetchProvData, Some(TaskError::Timeout { .. })) => {
                &mut self.timeout_in_fetch_prov_data
            }
            (Stage::FetchProvData, Some(TaskError::Failed { .. })) => {
                &mut self.task_failed_in_fetch_prov_data
            }
            (Stage::Conversion, _) => {
                self.unexpected_errors
                    .insert(url.to_string(), format!("{:#}", error));
                &mut self.unexpected_error_in_conversion
            }
            (Stage::FetchProvData, _) => {
                self.unexpected_errors
                    .insert(url.to_string(), format!("{:#}", error));
                &mut self.unexpected_error_in_fetch_prov_data
            }
        };
        push_unique(bucket, url);
    }

    fn failure_lists_mut(&mut self) -> [&mut Vec<String>; 7] {
        [
            &mut self.unconverted_urls,
            &mut self.timeout_in_conversion,
            &mut self.task_failed_in_conversion,
            &mut self.unexpected_error_in_conversion,
            &mut self.timeout_in_fetch_prov_data,
            &mut self.task_failed_in_fetch_prov_data,
            &mut self.unexpected_error_in_fetch_prov_data,
        ]
    }

    pub fn log_summary(&self) {
        info!(
            "Totally {} urls",
            self.non_artifactory_urls.len() + self.artifactory_urls.len()
        );
        let counts = [
            ("non_artifactory_urls", self.non_artifactory_urls.len()),
            ("artifactory_urls", self.artifactory_urls.len()),
            ("successful_urls", self.successful_urls.len()),
            ("unconverted_urls", self.unconverted_urls.len()),
            ("timeout_in_conversion", self.timeout_in_conversion.len()),
            ("task_failed_in_conversion", self.task_failed_in_conversion.len()),
            (
                "unexpected_error_in_conversion",
                self.unexpected_error_in_conversion.len(),
            ),
            ("timeout_in_fetch_prov_data", self.timeout_in_fetch_prov_data.len()),
            (
                "task_failed_in_fetch_prov_data",
                self.task_failed_in_fetch_prov_data.len(),
            ),
            (
                "unexpected_error_in_fetch_prov_data",
                self.unexpected_error_in_fetch_prov_data.len(),
            ),
        ];
        for (name, count) in counts {
            info!("Totally {} {} urls", count, name);
        }
    }
}

/// Inputs of an end-to-end run.
#[derive(Debug, Clone)]
pub struct E2eOptions {
    pub observer_json_file: PathBuf,
    pub report_json_file: PathBuf,
    /// Resume from `report_json_file` when it exists.
    pub use_pre_report: bool,
    pub artifactory_hosts: Vec<String>,
}

/// Convert and fetch provenance for every artifactory URL of the observer
/// result, saving the report as it goes.
#[tracing::instrument(skip(articat))]
pub async fn e2e_test(articat: &Articat, options: &E2eOptions) -> Result<Report> {
    let mut report = if options.use_pre_report && options.report_json_file.exists() {
        info!(
            "Resuming from the previous report {}",
            options.report_json_file.display()
        );
        Report::load(&options.report_json_file)?
    } else {
        Report::default()
    };

    let observer = ObserverResult::load(&options.observer_json_file)?;
    report.add_observed_urls(&observer, &options.artifactory_hosts)?;

    let urls = report.artifactory_urls.clone();
    for (index, url) in urls.iter().enumerate() {
        let count = index + 1;
        info!("Handling the {}th url: {}", count, url);

        if report.is_successful(url) {
            info!("Skip the successful url in the previous report: {}", url);
        } else {
            match articat.convert_url_to_srp_uid(url).await {
                Ok(srp_uid) => match articat.fetch_prov_data(&srp_uid).await {
                    Ok(_) => report.add_successful_url(url),
                    Err(e) => report.record_failure(url, Stage::FetchProvData, &e),
                },
                Err(e) => report.record_failure(url, Stage::Conversion, &e),
            }
        }

        if count % REPORT_SAVE_INTERVAL == 0 {
            report.save(&options.report_json_file)?;
        }
    }

    report.save(&options.report_json_file)?;
    report.log_summary();
    info!("The e2e test has finished successfully!");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articat::TaskSettings;
    use crate::auth::{AccessToken, ApiToken, MockTokenExchange, TokenProvider};
    use crate::http::{HttpClient, RetryPolicy};
    use mockito::{Matcher, Mock, Server};
    use reqwest::Client;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    const ARTIFACTORY: &str = "https://build-artifactory.eng.vmware.com";

    fn articat_for(base_url: &str) -> Articat {
        let mut exchange = MockTokenExchange::new();
        exchange
            .expect_exchange()
            .returning(|_| Ok(AccessToken::new("token-1")));
        let tokens = Arc::new(TokenProvider::new(Some(ApiToken::new("api")), exchange));
        let http =
            HttpClient::with_client(Client::new(), base_url, tokens, RetryPolicy::immediate(4))
                .unwrap();
        Articat::with_settings(http, TaskSettings::immediate())
    }

    fn hosts() -> Vec<String> {
        ARTIFACTORY_HOSTS.iter().map(|h| h.to_string()).collect()
    }

    fn observer(paths: &[&str]) -> ObserverResult {
        serde_json::from_value(json!({
            "artifact_repositories": [
                {"host": "build-artifactory.eng.vmware.com", "path": paths},
                {"host": "repo1.maven.org", "path": ["maven2/junit.jar"]}
            ]
        }))
        .unwrap()
    }

    /// A task for `endpoint` whose input is `input`, finishing with `final_task`.
    async fn mock_task(
        server: &mut Server,
        endpoint: &str,
        input: &str,
        name: &str,
        final_task: serde_json::Value,
    ) -> (Mock, Mock) {
        let task_url = format!("{}/tasks/{}", server.url(), name);
        let create = server
            .mock("POST", format!("/{}/tasks", endpoint).as_str())
            .match_body(Matcher::Json(json!({"inputs": [input]})))
            .with_status(201)
            .with_body(json!({"status": "QUEUED", "task_url": task_url}).to_string())
            .create_async()
            .await;
        let mut body = final_task;
        body["task_url"] = json!(task_url);
        let poll = server
            .mock("GET", format!("/tasks/{}", name).as_str())
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;
        (create, poll)
    }

    #[test]
    fn test_add_observed_urls_splits_hosts() {
        let mut report = Report::default();
        let observer = observer(&["jcenter-cache/a.jar", "/jcenter-cache/b.jar"]);

        report.add_observed_urls(&observer, &hosts()).unwrap();
        report.add_observed_urls(&observer, &hosts()).unwrap();

        assert_eq!(
            report.artifactory_urls,
            vec![
                format!("{}/jcenter-cache/a.jar", ARTIFACTORY),
                format!("{}/jcenter-cache/b.jar", ARTIFACTORY),
            ]
        );
        assert_eq!(
            report.non_artifactory_urls,
            vec!["https://repo1.maven.org/maven2/junit.jar".to_string()]
        );
    }

    #[test]
    fn test_add_successful_url_clears_failures() {
        let mut report = Report::default();
        let url = "https://h/a.jar";
        report.record_failure(
            url,
            Stage::FetchProvData,
            &anyhow::anyhow!("connection reset"),
        );
        report.record_failure(
            url,
            Stage::Conversion,
            &TaskError::UrlUnconverted(url.to_string()).into(),
        );
        assert_eq!(report.unexpected_error_in_fetch_prov_data, vec![url]);
        assert_eq!(report.unconverted_urls, vec![url]);
        assert!(report.unexpected_errors[url].contains("connection reset"));

        report.add_successful_url(url);

        assert!(report.is_successful(url));
        assert!(report.unconverted_urls.is_empty());
        assert!(report.unexpected_error_in_fetch_prov_data.is_empty());
        assert!(report.unexpected_errors.is_empty());
    }

    #[test]
    fn test_record_failure_buckets_by_stage() {
        let mut report = Report::default();
        let timeout = || -> anyhow::Error {
            anyhow::Error::from(TaskError::Timeout {
                task_url: "https://h/tasks/1".into(),
                waited: std::time::Duration::from_secs(60),
            })
            .context("Failed to fetch provenance data")
        };

        report.record_failure("https://h/a.jar", Stage::Conversion, &timeout());
        report.record_failure("https://h/b.jar", Stage::FetchProvData, &timeout());
        // unconverted only has a bucket during conversion
        report.record_failure(
            "https://h/c.jar",
            Stage::FetchProvData,
            &TaskError::UrlUnconverted("https://h/c.jar".into()).into(),
        );

        assert_eq!(report.timeout_in_conversion, vec!["https://h/a.jar"]);
        assert_eq!(report.timeout_in_fetch_prov_data, vec!["https://h/b.jar"]);
        assert_eq!(
            report.unexpected_error_in_fetch_prov_data,
            vec!["https://h/c.jar"]
        );
        assert!(report.unconverted_urls.is_empty());
    }

    #[test]
    fn test_load_report_with_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        fs::write(&path, r#"{"successful_urls": ["https://h/a.jar"]}"#).unwrap();

        let report = Report::load(&path).unwrap();

        assert!(report.is_successful("https://h/a.jar"));
        assert!(report.artifactory_urls.is_empty());
        assert!(report.unexpected_errors.is_empty());
    }

    #[tokio::test]
    async fn test_e2e_test_buckets_failures() {
        let mut server = Server::new_async().await;
        let dir = tempdir().unwrap();
        let observer_file = dir.path().join("observer.json");
        let report_file = dir.path().join("report.json");
        let paths = ["a.jar", "b.jar", "c.jar", "d.jar"];
        fs::write(
            &observer_file,
            serde_json::to_string(&json!({
                "artifact_repositories": [
                    {"host": "build-artifactory.eng.vmware.com", "path": paths},
                    {"host": "repo1.maven.org", "path": ["never-called.jar"]}
                ]
            }))
            .unwrap(),
        )
        .unwrap();
        let url = |p: &str| format!("{}/{}", ARTIFACTORY, p);

        // a: converted and fetched
        let _a = mock_task(
            &mut server,
            "artifact-ids",
            &url("a.jar"),
            "a",
            json!({"status": "SUCCEEDED", "outputs": {"comp_ids": ["uid-a"]}}),
        )
        .await;
        let _a_prov = mock_task(
            &mut server,
            "artifact-prov",
            "uid-a",
            "a-prov",
            json!({"status": "SUCCEEDED", "outputs": {"license": "MIT"}}),
        )
        .await;
        // b: no SRP unique id
        let _b = mock_task(
            &mut server,
            "artifact-ids",
            &url("b.jar"),
            "b",
            json!({"status": "SUCCEEDED", "outputs": {"comp_ids": []}}),
        )
        .await;
        // c: conversion task fails on every attempt
        let _c = mock_task(
            &mut server,
            "artifact-ids",
            &url("c.jar"),
            "c",
            json!({"status": "FAILED"}),
        )
        .await;
        // d: converted, provenance request rejected
        let _d = mock_task(
            &mut server,
            "artifact-ids",
            &url("d.jar"),
            "d",
            json!({"status": "SUCCEEDED", "outputs": {"comp_ids": ["uid-d"]}}),
        )
        .await;
        let _d_prov = server
            .mock("POST", "/artifact-prov/tasks")
            .match_body(Matcher::Json(json!({"inputs": ["uid-d"]})))
            .with_status(400)
            .with_body("unknown component")
            .create_async()
            .await;
        let untouched = server
            .mock("POST", "/artifact-ids/tasks")
            .match_body(Matcher::Regex("repo1.maven.org".to_string()))
            .expect(0)
            .create_async()
            .await;

        let articat = articat_for(&server.url());
        let options = E2eOptions {
            observer_json_file: observer_file,
            report_json_file: report_file.clone(),
            use_pre_report: true,
            artifactory_hosts: hosts(),
        };
        let report = e2e_test(&articat, &options).await.unwrap();

        untouched.assert_async().await;
        assert_eq!(report.successful_urls, vec![url("a.jar")]);
        assert_eq!(report.unconverted_urls, vec![url("b.jar")]);
        assert_eq!(report.task_failed_in_conversion, vec![url("c.jar")]);
        assert_eq!(report.unexpected_error_in_fetch_prov_data, vec![url("d.jar")]);
        assert!(report.unexpected_errors[&url("d.jar")].contains("HTTP 400"));
        assert_eq!(
            report.non_artifactory_urls,
            vec!["https://repo1.maven.org/never-called.jar".to_string()]
        );
        assert_eq!(Report::load(&report_file).unwrap(), report);
    }

    #[tokio::test]
    async fn test_e2e_test_skips_previously_successful_urls() {
        let mut server = Server::new_async().await;
        let dir = tempdir().unwrap();
        let observer_file = dir.path().join("observer.json");
        let report_file = dir.path().join("report.json");
        let done = format!("{}/done.jar", ARTIFACTORY);
        let retry = format!("{}/retry.jar", ARTIFACTORY);

        fs::write(
            &observer_file,
            json!({
                "artifact_repositories": [
                    {"host": "build-artifactory.eng.vmware.com", "path": ["done.jar", "retry.jar"]}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let mut previous = Report::default();
        previous.artifactory_urls = vec![done.clone(), retry.clone()];
        previous.add_successful_url(&done);
        previous.unconverted_urls = vec![retry.clone()];
        previous.save(&report_file).unwrap();

        let done_create = server
            .mock("POST", "/artifact-ids/tasks")
            .match_body(Matcher::Json(json!({"inputs": [done]})))
            .expect(0)
            .create_async()
            .await;
        let (retry_create, _) = mock_task(
            &mut server,
            "artifact-ids",
            &retry,
            "retry",
            json!({"status": "SUCCEEDED", "outputs": {"comp_ids": ["uid-retry"]}}),
        )
        .await;
        let _retry_prov = mock_task(
            &mut server,
            "artifact-prov",
            "uid-retry",
            "retry-prov",
            json!({"status": "SUCCEEDED", "outputs": {}}),
        )
        .await;

        let articat = articat_for(&server.url());
        let options = E2eOptions {
            observer_json_file: observer_file,
            report_json_file: report_file.clone(),
            use_pre_report: true,
            artifactory_hosts: hosts(),
        };
        let report = e2e_test(&articat, &options).await.unwrap();

        done_create.assert_async().await;
        retry_create.assert_async().await;
        assert_eq!(report.successful_urls, vec![done, retry]);
        assert!(report.unconverted_urls.is_empty());
        assert_eq!(report.artifactory_urls.len(), 2);
    }

    #[tokio::test]
    async fn test_e2e_test_without_previous_report_reruns_everything() {
        let mut server = Server::new_async().await;
        let dir = tempdir().unwrap();
        let observer_file = dir.path().join("observer.json");
        let report_file = dir.path().join("report.json");
        let done = format!("{}/done.jar", ARTIFACTORY);

        fs::write(
            &observer_file,
            json!({
                "artifact_repositories": [
                    {"host": "build-artifactory.eng.vmware.com", "path": ["done.jar"]}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let mut previous = Report::default();
        previous.add_successful_url(&done);
        previous.save(&report_file).unwrap();

        let (create, _) = mock_task(
            &mut server,
            "artifact-ids",
            &done,
            "done",
            json!({"status": "SUCCEEDED", "outputs": {"comp_ids": []}}),
        )
        .await;

        let articat = articat_for(&server.url());
        let options = E2eOptions {
            observer_json_file: observer_file,
            report_json_file: report_file.clone(),
            use_pre_report: false,
            artifactory_hosts: hosts(),
        };
        let report = e2e_test(&articat, &options).await.unwrap();

        create.assert_async().await;
        assert!(report.successful_urls.is_empty());
        assert_eq!(report.unconverted_urls, vec![done]);
        assert_eq!(Report::load(&report_file).unwrap(), report);
    }
}
