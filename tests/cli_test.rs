//! Tests for the fare-advisor binary

use std::io::Write;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::NamedTempFile;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const PAGE: &str = r#"
<html><body>
  <div class="pricing">Monthly membership $15/month with 45 minutes included</div>
  <p>Unlock fee is $1.00 for every ride.</p>
  <p>Rides cost $0.15 per minute.</p>
</body></html>
"#;

fn trips_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(contents.as_bytes()).unwrap();
    file
}

async fn run(args: Vec<String>) -> Output {
    run_with_env(args, Vec::new()).await
}

async fn run_with_env(args: Vec<String>, envs: Vec<(&'static str, &'static str)>) -> Output {
    tokio::task::spawn_blocking(move || {
        Command::new(env!("CARGO_BIN_EXE_fare-advisor"))
            .args(&args)
            .env("LOG_LEVEL", "error")
            .envs(envs)
            .output()
            .expect("Failed to run fare-advisor")
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_cli_prints_result_json() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pricing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(&mock_server)
        .await;

    let trips: Vec<Value> = (0..30)
        .map(|_| serde_json::json!({"duration": 25, "bike_type": "classic", "start_time": "2024-05-06 08:30:00"}))
        .collect();
    let file = trips_file(&serde_json::to_string(&trips).unwrap());

    let output = run(vec![
        "--trips".to_string(),
        file.path().display().to_string(),
        "--policy-url".to_string(),
        format!("{}/pricing", mock_server.uri()),
    ])
    .await;

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["stopReason"], "completed");
    assert_eq!(result["decision"], "Buy Monthly Membership");
    assert!(result["runId"].is_string());
}

#[tokio::test]
async fn test_cli_exits_2_when_run_fails() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let file = trips_file(r#"[{"duration": "10", "bike_type": "classic"}]"#);

    // Free rides leave break-even undefined
    let output = run_with_env(
        vec![
            "--trips".to_string(),
            file.path().display().to_string(),
            "--policy-url".to_string(),
            format!("{}/pricing", mock_server.uri()),
            "--pretty".to_string(),
        ],
        vec![("DEFAULT_UNLOCK_FEE", "0"), ("DEFAULT_PER_MINUTE_COST", "0")],
    )
    .await;

    assert_eq!(output.status.code(), Some(2));
    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["stopReason"], "error");
    assert_eq!(result["decision"], "Unable to determine");
    assert!(result["costBreakdown"].is_null());
}

#[tokio::test]
async fn test_cli_rejects_invalid_url() {
    let file = trips_file(r#"[{"duration": "10", "bike_type": "classic"}]"#);

    let output = run(vec![
        "--trips".to_string(),
        file.path().display().to_string(),
        "--policy-url".to_string(),
        "not-a-url".to_string(),
    ])
    .await;

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[tokio::test]
async fn test_cli_rejects_malformed_trips_file() {
    let file = trips_file("this is not json");

    let output = run(vec![
        "--trips".to_string(),
        file.path().display().to_string(),
        "--policy-url".to_string(),
        "https://bikes.example.com/pricing".to_string(),
    ])
    .await;

    assert!(!output.status.success());
}
