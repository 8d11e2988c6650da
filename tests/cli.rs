//! Tests for the `srag` binary.

mod common;

use serde_json::json;
use std::fs;
use std::path::Path;
use std::process::Output;
use tempfile::TempDir;
use tokio::process::Command;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn run_srag(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_srag"))
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .await
        .expect("failed to run srag")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn write_ollama_config(dir: &Path, url: &str) -> String {
    let path = dir.join("srag.toml");
    fs::write(
        &path,
        format!(
            r#"[llm]
provider = "ollama"
url = "{}"
chat_model = "llama3"
embedding_model = "nomic-embed-text"
dims = 2
retry_delay_ms = 1

[retrieval]
expand_queries = false
"#,
            url
        ),
    )
    .unwrap();
    path.to_string_lossy().to_string()
}

async fn mock_ollama() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.6, 0.8]] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "role": "assistant", "content": "The entry point is src/main.py." },
            "done": true,
            "prompt_eval_count": 30,
            "eval_count": 8
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_help() {
    let output = run_srag(&["--help"]).await;
    assert!(output.status.success());
    let out = stdout(&output);
    for command in ["init", "query", "chat", "list"] {
        assert!(out.contains(command), "help is missing {}", command);
    }
}

#[tokio::test]
async fn test_list_runs_newest_first() {
    let tmp = TempDir::new().unwrap();
    let old = tmp.path().join("summary_2024-01-02_08-00-00");
    let new = tmp.path().join("summary_2024-03-05_09-30-00");
    fs::create_dir_all(&old).unwrap();
    fs::create_dir_all(&new).unwrap();
    fs::create_dir_all(tmp.path().join("scratch")).unwrap();
    fs::write(
        new.join("metadata.json"),
        r#"{"created_at": "2024-03-05T09:30:00", "model": "gpt-4",
            "final_statistics": {"successful": 12, "failed": 1, "total_tokens_used": 9000}}"#,
    )
    .unwrap();

    let output = run_srag(&["list", tmp.path().to_str().unwrap()]).await;
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    let newest = out.find("1. summary_2024-03-05_09-30-00").expect("newest run");
    let oldest = out.find("2. summary_2024-01-02_08-00-00").expect("oldest run");
    assert!(newest < oldest);
    assert!(out.contains("Model: gpt-4"));
    assert!(out.contains("Files: 12 successful, 1 failed"));
    assert!(!out.contains("scratch"));
}

#[tokio::test]
async fn test_list_without_runs() {
    let tmp = TempDir::new().unwrap();
    let output = run_srag(&["list", tmp.path().to_str().unwrap()]).await;
    assert!(output.status.success());
    assert!(stdout(&output).contains("No summary directories found"));
}

#[tokio::test]
async fn test_missing_api_key_exits_with_failure() {
    let tmp = TempDir::new().unwrap();
    common::write_abc(tmp.path());
    let config = tmp.path().join("absent.toml");

    let output = run_srag(&[
        "--config",
        config.to_str().unwrap(),
        "init",
        tmp.path().to_str().unwrap(),
    ])
    .await;
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("OPENAI_API_KEY"));
}

#[tokio::test]
async fn test_invalid_config_exits_with_failure() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("srag.toml");
    fs::write(&config, "[llm]\nprovider = \"carrier-pigeon\"\n").unwrap();

    let output = run_srag(&[
        "--config",
        config.to_str().unwrap(),
        "init",
        tmp.path().to_str().unwrap(),
    ])
    .await;
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("carrier-pigeon"));
}

#[tokio::test]
async fn test_init_and_query_over_ollama() {
    let server = mock_ollama().await;
    let config_dir = TempDir::new().unwrap();
    let config = write_ollama_config(config_dir.path(), &server.uri());
    let summaries = TempDir::new().unwrap();
    common::write_summary(summaries.path(), "main.md", "src/main.py", "Program entry point.");
    common::write_summary(summaries.path(), "db.md", "src/db.py", "Connection pool.");
    let dir = summaries.path().to_str().unwrap();

    let output = run_srag(&["--config", &config, "--progress", "off", "init", dir]).await;
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Indexed 2 documents"));

    let output = run_srag(&["--config", &config, "--progress", "off", "init", dir]).await;
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Loaded 2 documents"));

    let output = run_srag(&[
        "--config",
        &config,
        "--progress",
        "off",
        "query",
        dir,
        "where does the program start?",
    ])
    .await;
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("The entry point is src/main.py."));
    assert!(out.contains("Sources:"));
    assert!(out.contains("- Model: llama3"));
    assert!(out.contains("- Total Tokens: 38"));
}

#[tokio::test]
async fn test_init_reports_empty_and_missing_directories() {
    let server = mock_ollama().await;
    let config_dir = TempDir::new().unwrap();
    let config = write_ollama_config(config_dir.path(), &server.uri());
    let empty = TempDir::new().unwrap();

    let output = run_srag(&[
        "--config",
        &config,
        "init",
        empty.path().to_str().unwrap(),
    ])
    .await;
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("No summary files found"));

    let missing = empty.path().join("missing");
    let output = run_srag(&["--config", &config, "init", missing.to_str().unwrap()]).await;
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("not found"));
}
