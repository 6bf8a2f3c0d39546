use assert_cmd::Command;
use assert_cmd::cargo;
use mockito::{Matcher, Server};
use predicates::prelude::*;
use serde_json::json;

/// `articat` pointed at `server`, with no credentials leaking in from the environment.
fn articat(server: &Server) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("articat"));
    cmd.env_remove("ESP_API_TOKEN")
        .env_remove("CSP_CLIENT_ID")
        .env_remove("CSP_CLIENT_SECRET")
        .arg("--server")
        .arg(server.url())
        .arg("--auth-url")
        .arg(format!("{}/authorize", server.url()));
    cmd
}

fn mock_authorize(server: &mut Server, api_token: &str, access_token: &str) -> mockito::Mock {
    server
        .mock("POST", "/authorize")
        .match_body(Matcher::UrlEncoded(
            "refresh_token".into(),
            api_token.into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"access_token": access_token, "expires_in": 1799}).to_string())
        .create()
}

#[test]
fn test_help() {
    let mut cmd = Command::new(cargo::cargo_bin!("articat"));
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("--esp-api-token"))
        .stdout(predicates::str::contains("smoke-test"));
}

#[test]
fn test_missing_api_token_fails() {
    let mut server = Server::new();
    let never = server.mock("GET", Matcher::Any).expect(0).create();

    let mut cmd = articat(&server);
    cmd.arg("get").arg("artifact-ids");

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("Authentication failed"));
    never.assert();
}

#[test]
fn test_token_from_environment() {
    let mut server = Server::new();
    let auth = mock_authorize(&mut server, "env-api-token", "access-token-123");

    let mut cmd = articat(&server);
    cmd.env("ESP_API_TOKEN", "env-api-token").arg("token");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("acce********"))
        .stdout(predicates::str::contains("expires in 1799s"))
        .stdout(predicates::str::contains("access-token-123").not());
    auth.assert();
}

#[test]
fn test_rejected_api_token_fails() {
    let mut server = Server::new();
    let auth = server
        .mock("POST", "/authorize")
        .with_status(400)
        .with_body(r#"{"message": "invalid_grant"}"#)
        .expect(1)
        .create();

    let mut cmd = articat(&server);
    cmd.arg("--esp-api-token").arg("bad-token").arg("token");

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("token exchange rejected with HTTP 400"));
    auth.assert();
}

#[test]
fn test_get_prints_json_with_bearer_token() {
    let mut server = Server::new();
    let auth = mock_authorize(&mut server, "api-token", "access-token-123");
    let get = server
        .mock("GET", "/api/v1/components?name=junit")
        .match_header("authorization", "Bearer access-token-123")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"results": [{"name": "junit"}]}"#)
        .create();

    let mut cmd = articat(&server);
    cmd.arg("--esp-api-token")
        .arg("api-token")
        .arg("get")
        .arg("components")
        .arg("--query")
        .arg("name=junit");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("\"name\": \"junit\""));
    auth.assert();
    get.assert();
}

#[test]
fn test_client_error_is_not_retried() {
    let mut server = Server::new();
    let _auth = mock_authorize(&mut server, "api-token", "access");
    let get = server
        .mock("GET", "/api/v1/missing")
        .with_status(404)
        .with_body("no such thing")
        .expect(1)
        .create();

    let mut cmd = articat(&server);
    cmd.arg("--esp-api-token")
        .arg("api-token")
        .arg("get")
        .arg("missing");

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("Request error: HTTP 404"));
    get.assert();
}

#[test]
fn test_convert_url_end_to_end() {
    let mut server = Server::new();
    let url = server.url();
    let task_url = format!("{}/api/v1/tasks/1", url);

    let _auth = mock_authorize(&mut server, "api-token", "access");
    let create = server
        .mock("POST", "/api/v1/artifact-ids/tasks")
        .match_header("authorization", "Bearer access")
        .match_body(Matcher::Json(json!({"inputs": ["https://repo/junit.jar"]})))
        .with_status(201)
        .with_body(json!({"status": "QUEUED", "task_url": task_url}).to_string())
        .create();
    let poll = server
        .mock("GET", "/api/v1/tasks/1")
        .with_status(200)
        .with_body(
            json!({
                "status": "SUCCEEDED",
                "task_url": task_url,
                "outputs": {"comp_ids": ["uid.mavenpkg://junit/junit@4.13"]}
            })
            .to_string(),
        )
        .create();

    let mut cmd = articat(&server);
    cmd.arg("--esp-api-token")
        .arg("api-token")
        .arg("convert-url")
        .arg("https://repo/junit.jar");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("uid.mavenpkg://junit/junit@4.13"));
    create.assert();
    poll.assert();
}

#[test]
fn test_smoke_test_end_to_end() {
    let mut server = Server::new();
    let url = server.url();
    let ids_url = format!("{}/api/v1/tasks/ids", url);
    let prov_url = format!("{}/api/v1/tasks/prov", url);

    let _auth = mock_authorize(&mut server, "api-token", "access");
    let _create_ids = server
        .mock("POST", "/api/v1/artifact-ids/tasks")
        .match_body(Matcher::Json(json!({"inputs": ["https://repo/junit.jar"]})))
        .with_status(201)
        .with_body(json!({"status": "QUEUED", "task_url": ids_url}).to_string())
        .create();
    let _poll_ids = server
        .mock("GET", "/api/v1/tasks/ids")
        .with_status(200)
        .with_body(
            json!({
                "status": "SUCCEEDED",
                "task_url": ids_url,
                "outputs": {"comp_ids": ["uid-1"]}
            })
            .to_string(),
        )
        .create();
    let create_prov = server
        .mock("POST", "/api/v1/artifact-prov/tasks")
        .match_body(Matcher::Json(json!({"inputs": ["uid-1"]})))
        .with_status(201)
        .with_body(json!({"status": "RUNNING", "task_url": prov_url}).to_string())
        .expect(1)
        .create();
    let _poll_prov = server
        .mock("GET", "/api/v1/tasks/prov")
        .with_status(200)
        .with_body(
            json!({
                "status": "SUCCEEDED",
                "task_url": prov_url,
                "outputs": {"license": "EPL-1.0"}
            })
            .to_string(),
        )
        .create();

    let mut cmd = articat(&server);
    cmd.arg("--esp-api-token")
        .arg("api-token")
        .arg("smoke-test")
        .arg("--artifact-url")
        .arg("https://repo/junit.jar");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("\"srp_uid\": \"uid-1\""))
        .stdout(predicates::str::contains("\"license\": \"EPL-1.0\""));
    create_prov.assert();
}

#[test]
fn test_e2e_test_writes_report() {
    let mut server = Server::new();
    let url = server.url();
    let task_url = format!("{}/api/v1/tasks/1", url);
    let dir = tempfile::tempdir().unwrap();
    let observer_file = dir.path().join("observer.json");
    let report_file = dir.path().join("report.json");
    std::fs::write(
        &observer_file,
        json!({
            "artifact_repositories": [
                {"host": "artifactory.local", "path": ["libs/missing.jar"]},
                {"host": "elsewhere.local", "path": ["libs/skipped.jar"]}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let _auth = mock_authorize(&mut server, "api-token", "access");
    let create = server
        .mock("POST", "/api/v1/artifact-ids/tasks")
        .match_body(Matcher::Json(
            json!({"inputs": ["https://artifactory.local/libs/missing.jar"]}),
        ))
        .with_status(201)
        .with_body(json!({"status": "QUEUED", "task_url": task_url}).to_string())
        .expect(1)
        .create();
    let _poll = server
        .mock("GET", "/api/v1/tasks/1")
        .with_status(200)
        .with_body(
            json!({"status": "SUCCEEDED", "task_url": task_url, "outputs": {"comp_ids": []}})
                .to_string(),
        )
        .create();

    let mut cmd = articat(&server);
    cmd.arg("--esp-api-token")
        .arg("api-token")
        .arg("e2e-test")
        .arg("--observer-json-file")
        .arg(&observer_file)
        .arg("--report-json-file")
        .arg(&report_file)
        .arg("--artifactory-host")
        .arg("artifactory.local");

    cmd.assert().success();
    create.assert();

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_file).unwrap()).unwrap();
    assert_eq!(
        report["unconverted_urls"],
        json!(["https://artifactory.local/libs/missing.jar"])
    );
    assert_eq!(
        report["non_artifactory_urls"],
        json!(["https://elsewhere.local/libs/skipped.jar"])
    );
    assert_eq!(report["successful_urls"], json!([]));
}

#[test]
fn test_invalid_query_argument_fails() {
    let server = Server::new();
    let mut cmd = articat(&server);
    cmd.arg("--esp-api-token")
        .arg("api-token")
        .arg("get")
        .arg("components")
        .arg("-q")
        .arg("novalue");

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("Expected KEY=VALUE"));
}
