use base64::Engine;
use repo_chat::config::{Config, Credentials, Settings};
use repo_chat::frontend::ScriptedFrontEnd;
use repo_chat::session::{run_interactive, Services};
use repo_chat::store::VectorStore;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn repochat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("repochat");
    path
}

/// Embeds each input as a byte histogram so retrieval is deterministic.
struct HistogramEmbeddings;

impl Respond for HistogramEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let data: Vec<Value> = body["input"]
            .as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let mut v = vec![0.0f32; 16];
                for b in text.as_str().unwrap().bytes() {
                    v[(b % 16) as usize] += 1.0;
                }
                json!({ "index": i, "embedding": v })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
    }
}

fn blob(content: &str) -> Value {
    json!({
        "content": base64::engine::general_purpose::STANDARD.encode(content),
        "encoding": "base64",
    })
}

/// GitHub fake for `runs` ingestions: `main` is missing, `master` holds a
/// README, a Python file, and a PNG that the extension filter must skip.
async fn mount_github(server: &MockServer, runs: u64) {
    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/branches/main"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "Branch not found" })),
        )
        .expect(runs)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/branches/master"))
        .and(header("authorization", "Bearer test-gh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "master",
            "commit": { "sha": "c0ffee", "commit": { "tree": { "sha": "tree1" } } }
        })))
        .expect(runs)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/git/trees/tree1"))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tree": [
                { "path": "README.md", "type": "blob", "sha": "b1" },
                { "path": "gym", "type": "tree", "sha": "t2" },
                { "path": "gym/core.py", "type": "blob", "sha": "b2" },
                { "path": "docs/logo.png", "type": "blob", "sha": "b3" }
            ],
            "truncated": false
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/git/blobs/b1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(blob(
            "# Gym\n\nGym is a toolkit for developing reinforcement learning algorithms.",
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/git/blobs/b2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(blob(
            "class Env:\n    def step(self, action):\n        raise NotImplementedError\n",
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/git/blobs/b3"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(server)
        .await;
}

async fn mount_openai(server: &MockServer, answer: &str) {
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", "Bearer test-openai-key"))
        .respond_with(HistogramEmbeddings)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": answer } }]
        })))
        .mount(server)
        .await;
}

fn settings(github: &MockServer, openai: &MockServer) -> Settings {
    let mut settings = Settings::default();
    settings.github.api_base = github.uri();
    settings.openai.base_url = openai.uri();
    settings.embedding.max_retries = 0;
    settings.generation.max_retries = 0;
    settings
}

fn credentials() -> Credentials {
    Credentials {
        openai_api_key: "test-openai-key".into(),
        github_token: "test-gh-token".into(),
        activeloop_token: "test-al-token".into(),
    }
}

async fn chat_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/chat/completions")
        .count()
}

#[tokio::test]
async fn test_ingest_and_answer_with_master_fallback() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    mount_github(&github, 1).await;
    mount_openai(&openai, "Gym is a reinforcement learning toolkit.").await;

    let tmp = TempDir::new().unwrap();
    let dataset = tmp.path().join("dataset").join("index.sqlite");
    let config =
        Config::from_parts(credentials(), dataset.clone(), settings(&github, &openai)).unwrap();
    let services = Services::from_config(Arc::new(config)).await.unwrap();

    let mut fe = ScriptedFrontEnd::new([
        "https://github.com/openai/gym",
        "What does Env.step do?",
        "exit",
    ]);
    let session = run_interactive(&mut fe, &services).await.unwrap().unwrap();

    assert_eq!(session.branch(), "master");
    assert_eq!(session.document_count(), 2);
    assert!(fe.saw("Loading gym repository by openai"));
    assert!(fe.saw("Documents uploaded:"));
    assert!(fe.saw("'file_path': 'README.md'"));
    assert!(fe.saw("'url': 'https://github.com/openai/gym/blob/master/gym/core.py'"));
    assert!(!fe.saw("logo.png"));
    assert!(fe.saw("Answer: Gym is a reinforcement learning toolkit."));
    assert!(fe.saw("Exiting, thanks for chatting!"));
    assert!(dataset.exists());

    // intro question + one user question
    assert_eq!(chat_count(&openai).await, 2);

    let requests = openai.received_requests().await.unwrap();
    let completion: Value = requests
        .iter()
        .find(|r| r.url.path() == "/chat/completions")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    assert_eq!(completion["model"], "gpt-3.5-turbo");
    assert_eq!(completion["messages"][0]["role"], "system");
    let prompt = completion["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.starts_with("Context information is below."));
    assert!(prompt.contains("Query: What is the repository about?"));
}

#[tokio::test]
async fn test_rebuild_overwrites_previous_index() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    mount_github(&github, 2).await;
    mount_openai(&openai, "ok").await;

    let tmp = TempDir::new().unwrap();
    let dataset = tmp.path().join("index.sqlite");
    let config = Arc::new(
        Config::from_parts(credentials(), dataset, settings(&github, &openai)).unwrap(),
    );
    let services = Services::from_config(config).await.unwrap();

    for _ in 0..2 {
        let mut fe = ScriptedFrontEnd::new(["https://github.com/openai/gym", "exit"]);
        run_interactive(&mut fe, &services).await.unwrap().unwrap();
    }
    assert_eq!(services.store.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_unauthorized_github_token_is_not_retried_on_master() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/branches/main"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })),
        )
        .expect(1)
        .mount(&github)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/branches/master"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&github)
        .await;

    let tmp = TempDir::new().unwrap();
    let config = Config::from_parts(
        credentials(),
        tmp.path().join("index.sqlite"),
        settings(&github, &openai),
    )
    .unwrap();
    let services = Services::from_config(Arc::new(config)).await.unwrap();

    let mut fe = ScriptedFrontEnd::new(["https://github.com/openai/gym"]);
    let err = run_interactive(&mut fe, &services).await.err().unwrap();
    assert!(format!("{:#}", err).contains("401"));
    assert_eq!(chat_count(&openai).await, 0);
}

// ============ Binary ============

fn write_config(dir: &Path, github: &str, openai: &str) -> PathBuf {
    let config_path = dir.join("repochat.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"[github]
api_base = "{github}"

[openai]
base_url = "{openai}"

[embedding]
max_retries = 0

[generation]
max_retries = 0
"#
        ),
    )
    .unwrap();
    config_path
}

#[tokio::test]
async fn test_binary_fails_fast_without_openai_key() {
    let tmp = TempDir::new().unwrap();
    let output = tokio::process::Command::new(repochat_binary())
        .env_clear()
        .env("GITHUB_TOKEN", "gh")
        .env("ACTIVELOOP_TOKEN", "al")
        .env("DATASET_PATH", tmp.path().join("index.sqlite"))
        .current_dir(tmp.path())
        .arg("--config")
        .arg(tmp.path().join("missing.toml"))
        .stdin(Stdio::null())
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr={}", stderr);
    assert!(output.stdout.is_empty());
    assert!(!tmp.path().join("index.sqlite").exists());
}

#[tokio::test]
async fn test_binary_rejects_invalid_tunables() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("repochat.toml");
    std::fs::write(&config_path, "[retrieval]\nsimilarity_top_k = 0\n").unwrap();

    let output = tokio::process::Command::new(repochat_binary())
        .env_clear()
        .env("OPENAI_API_KEY", "sk")
        .env("GITHUB_TOKEN", "gh")
        .env("ACTIVELOOP_TOKEN", "al")
        .env("DATASET_PATH", tmp.path().join("index.sqlite"))
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&config_path)
        .stdin(Stdio::null())
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("similarity_top_k"));
}

#[tokio::test]
async fn test_binary_console_session() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    mount_github(&github, 1).await;
    mount_openai(&openai, "A toolkit.").await;

    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), &github.uri(), &openai.uri());

    let mut child = tokio::process::Command::new(repochat_binary())
        .env_clear()
        .env("OPENAI_API_KEY", "test-openai-key")
        .env("GITHUB_TOKEN", "test-gh-token")
        .env("ACTIVELOOP_TOKEN", "test-al-token")
        .env("DATASET_PATH", tmp.path().join("index.sqlite"))
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&config_path)
        .arg("console")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    stdin
        .write_all(b"gitlab.com/openai/gym\nhttps://github.com/openai/gym\nWhat is Env?\nExit\n")
        .await
        .unwrap();
    drop(stdin);

    let output = child.wait_with_output().await.unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stdout={}, stderr={}", stdout, stderr);

    assert!(stdout.contains("Invalid GitHub URL. Please try again."));
    assert!(stdout.contains("Loading gym repository by openai"));
    assert!(stdout.contains("Test question: What is the repository about?"));
    assert!(stdout.contains(&"=".repeat(50)));
    assert!(stdout.contains("Your question: What is Env?"));
    assert!(stdout.contains("Answer: A toolkit."));
    assert!(stdout.contains("Exiting, thanks for chatting!"));
    assert_eq!(chat_count(&openai).await, 2);
}
