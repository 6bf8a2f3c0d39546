//! Command implementations behind the `articat` binary.

use anyhow::{Context, Result};
use log::info;
use serde_json::Value;

use crate::{
    articat::Articat,
    http::{HttpClient, RequestOptions},
};

mod e2e;
mod services;

pub use e2e::{
    ARTIFACTORY_HOSTS, ArtifactRepository, E2eOptions, ObserverResult, REPORT_SAVE_INTERVAL,
    Report, Stage, default_report_path, e2e_test,
};
pub use services::{ConnectOptions, build_articat, build_http_client, build_token_provider};

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to render JSON output")?
    );
    Ok(())
}

/// Convert an artifact URL, then fetch provenance for the resulting id.
#[tracing::instrument(skip(articat))]
pub async fn smoke_test(articat: &Articat, artifact_url: &str) -> Result<()> {
    let srp_uid = articat
        .convert_url_to_srp_uid(artifact_url)
        .await
        .context("The smoke test has failed")?;
    let prov_data = articat
        .fetch_prov_data(&srp_uid)
        .await
        .context("The smoke test has failed")?;

    info!("The prov data is {}", prov_data);
    print_json(&serde_json::json!({
        "srp_uid": srp_uid,
        "prov_data": prov_data,
    }))?;
    info!("The smoke test has completed successfully.");
    Ok(())
}

/// Print the SRP unique id of an artifact URL.
#[tracing::instrument(skip(articat))]
pub async fn convert_url(articat: &Articat, artifact_url: &str) -> Result<()> {
    let srp_uid = articat.convert_url_to_srp_uid(artifact_url).await?;
    println!("{}", srp_uid);
    Ok(())
}

/// Print provenance data for an SRP unique id.
#[tracing::instrument(skip(articat))]
pub async fn fetch_prov(articat: &Articat, srp_uid: &str) -> Result<()> {
    let prov_data = articat.fetch_prov_data(srp_uid).await?;
    print_json(&prov_data)
}

/// Print the digest of the fixed test string.
#[tracing::instrument(skip(articat))]
pub async fn string_digest(articat: &Articat) -> Result<()> {
    let digest = articat.string_digest().await?;
    print_json(&digest)
}

/// Authenticated GET of any path under the service root.
#[tracing::instrument(skip(http, query))]
pub async fn get(http: &HttpClient, path: &str, query: &[(String, String)]) -> Result<()> {
    let options = query
        .iter()
        .fold(RequestOptions::new(), |options, (k, v)| options.query(k, v));
    let response = http
        .get(path, options)
        .await
        .with_context(|| format!("GET {} failed", path))?;

    match response.json::<Value>() {
        Ok(value) => print_json(&value),
        Err(_) => {
            println!("{}", response.text());
            Ok(())
        }
    }
}

/// Obtain an access token and print it masked, to check credentials.
#[tracing::instrument(skip(http))]
pub async fn token(http: &HttpClient) -> Result<()> {
    let token = http.tokens().get_token().await?;
    match token.expires_in() {
        Some(secs) => println!("{} (expires in {}s)", token.masked(), secs),
        None => println!("{}", token.masked()),
    }
    Ok(())
}
