//! Web front ends.
//!
//! Two surfaces share one axum router:
//!
//! - a single-pass form that runs one ingest-and-answer cycle per submission,
//! - a chat widget backed by a JSON session API, where each session owns an
//!   ingested repository and its chat transcript.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `GET`    | `/` | Form page (repository URL + question) |
//! | `POST`   | `/` | Run one ingest-and-answer cycle, render its output |
//! | `GET`    | `/chat` | Chat widget page |
//! | `POST`   | `/api/sessions` | `{url}` → ingest, returns `{session_id, log}` |
//! | `POST`   | `/api/sessions/{id}/messages` | `{content}` → `{reply, transcript}` |
//! | `GET`    | `/api/sessions/{id}/messages` | Current transcript |
//! | `DELETE` | `/api/sessions/{id}` | Drop the session |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Invalid GitHub URL. Please try again." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `index_replaced` (409),
//! `internal` (500).
//!
//! # Sessions
//!
//! All sessions share one store location, so each successful ingestion
//! (chat session or form) replaces the index older sessions were built
//! on. Those sessions are evicted from the map right after the new index
//! is written and answer `404` from then on. At most one chat session is
//! live at a time.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::frontend::{OutputKind, OutputLine, ScriptedFrontEnd};
use crate::models::{ChatMessage, RepositoryReference};
use crate::session::{run_interactive, Services, Session, CHAT_GREETING, INVALID_URL_WARNING};
use crate::store::StoreError;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    services: Services,
    /// Live chat sessions keyed by id. Entries are created by
    /// `POST /api/sessions` and removed by `DELETE /api/sessions/{id}` or
    /// when a later ingestion replaces their index.
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    /// Serializes index builds; all sessions share one store location.
    ingest_lock: Arc<Mutex<()>>,
}

struct SessionEntry {
    index_id: String,
    session: Arc<Mutex<Session>>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ingest_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn session(&self, id: &str) -> Result<Arc<Mutex<Session>>, AppError> {
        self.sessions
            .lock()
            .await
            .get(id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| not_found(format!("no session with id: {}", id)))
    }

    /// Drop every session whose index is no longer the store's current build.
    async fn evict_replaced(&self) -> anyhow::Result<()> {
        let current = self.services.store.current_index_id().await?;
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, entry| current.as_deref() == Some(entry.index_id.as_str()));
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, "evicted sessions with a replaced index");
        }
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_form_page).post(handle_form_submit))
        .route("/chat", get(handle_chat_page))
        .route("/api/sessions", post(handle_create_session))
        .route("/api/sessions/{id}", delete(handle_delete_session))
        .route(
            "/api/sessions/{id}/messages",
            get(handle_get_messages).post(handle_post_message),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the web server on `[server].bind` and runs until the process is terminated.
pub async fn run_server(services: Services) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let app = router(AppState::new(services));

    println!("Web front end listening on http://{}", bind_addr);
    println!("  form: http://{}/   chat: http://{}/chat", bind_addr, bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn index_replaced(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "index_replaced".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Form: GET / and POST / ============

#[derive(Deserialize)]
struct FormInput {
    url: String,
    #[serde(default)]
    question: String,
}

async fn handle_form_page() -> Html<String> {
    Html(render_form_page("", "", &[], None))
}

/// Runs the shared flow once with the submitted URL and, when non-empty,
/// the submitted question queued as front-end input.
///
/// The question is only queued behind a valid URL so that it is never
/// re-read as a repository URL after the invalid-URL warning.
async fn handle_form_submit(
    State(state): State<AppState>,
    Form(input): Form<FormInput>,
) -> Html<String> {
    let url = input.url.trim().to_string();
    let question = input.question.trim().to_string();
    let url_is_valid = RepositoryReference::from_url(&url).is_some();

    let mut inputs = vec![url];
    if url_is_valid && !question.is_empty() {
        inputs.push(question);
    }
    let mut frontend = ScriptedFrontEnd::new(inputs);

    let result = {
        let _guard = state.ingest_lock.lock().await;
        let result = run_interactive(&mut frontend, &state.services).await;
        if let Err(e) = state.evict_replaced().await {
            tracing::warn!(error = %e, "failed to evict replaced sessions");
        }
        result
    };
    let error = result.err().map(|e| {
        tracing::error!(error = %format!("{:#}", e), "form submission failed");
        format!("{:#}", e)
    });

    Html(render_form_page(
        &input.url,
        &input.question,
        frontend.output(),
        error.as_deref(),
    ))
}

// ============ Chat: GET /chat and the session API ============

async fn handle_chat_page() -> Html<String> {
    Html(CHAT_PAGE.replace("{{GREETING}}", &escape_html(CHAT_GREETING)))
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    url: String,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: String,
    repository: String,
    branch: String,
    document_count: usize,
    log: Vec<OutputLine>,
}

async fn handle_create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let repository = RepositoryReference::from_url(req.url.trim())
        .ok_or_else(|| bad_request(INVALID_URL_WARNING))?;

    let mut frontend = ScriptedFrontEnd::new(Vec::<String>::new());
    let _guard = state.ingest_lock.lock().await;
    let ingested = Session::ingest(&state.services, repository, &mut frontend).await;
    state.evict_replaced().await.map_err(internal)?;
    let session = ingested.map_err(internal)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let response = CreateSessionResponse {
        session_id: session_id.clone(),
        repository: session.repository().to_string(),
        branch: session.branch().to_string(),
        document_count: session.document_count(),
        log: frontend.into_output(),
    };
    let entry = SessionEntry {
        index_id: session.index_id().to_string(),
        session: Arc::new(Mutex::new(session)),
    };
    state.sessions.lock().await.insert(session_id.clone(), entry);
    tracing::info!(%session_id, repository = %response.repository, "chat session created");

    Ok(Json(response))
}

#[derive(Deserialize)]
struct PostMessageRequest {
    content: String,
}

#[derive(Serialize)]
struct PostMessageResponse {
    reply: String,
    transcript: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct TranscriptResponse {
    transcript: Vec<ChatMessage>,
}

async fn handle_post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Json<PostMessageResponse>, AppError> {
    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    let session = state.session(&id).await?;
    let mut session = session.lock().await;

    let reply = match session.chat(&req.content).await {
        Ok(reply) => reply,
        Err(e) if e.downcast_ref::<StoreError>().is_some() => {
            state.sessions.lock().await.remove(&id);
            return Err(index_replaced(format!("{:#}", e)));
        }
        Err(e) => return Err(internal(e)),
    };
    Ok(Json(PostMessageResponse {
        reply,
        transcript: session.transcript().entries().to_vec(),
    }))
}

async fn handle_get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TranscriptResponse>, AppError> {
    let session = state.session(&id).await?;
    let session = session.lock().await;
    Ok(Json(TranscriptResponse {
        transcript: session.transcript().entries().to_vec(),
    }))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    match state.sessions.lock().await.remove(&id) {
        Some(_) => {
            tracing::info!(session_id = %id, "chat session closed");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(not_found(format!("no session with id: {}", id))),
    }
}

// ============ HTML ============

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_form_page(
    url: &str,
    question: &str,
    output: &[OutputLine],
    error: Option<&str>,
) -> String {
    let mut body = String::new();
    for line in output {
        let class = match line.kind {
            OutputKind::Text => "text",
            OutputKind::Progress => "progress",
            OutputKind::Warning => "warning",
        };
        body.push_str(&format!(
            "<pre class=\"{}\">{}</pre>\n",
            class,
            escape_html(&line.text)
        ));
    }
    if let Some(err) = error {
        body.push_str(&format!("<pre class=\"error\">{}</pre>\n", escape_html(err)));
    }

    FORM_PAGE
        .replace("{{URL}}", &escape_html(url))
        .replace("{{QUESTION}}", &escape_html(question))
        .replace("{{OUTPUT}}", &body)
}

const FORM_PAGE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Chat with a GitHub Repository</title>
<style>
body { font-family: sans-serif; max-width: 52rem; margin: 2rem auto; }
input { width: 100%; padding: .4rem; margin-bottom: .8rem; }
pre { white-space: pre-wrap; margin: .2rem 0; }
.progress { color: #555; }
.warning, .error { color: #b00; }
</style>
</head>
<body>
<h1>Chat with a GitHub Repository</h1>
<form method="post" action="/">
<label>GitHub repository URL<input name="url" value="{{URL}}"></label>
<label>Question<input name="question" value="{{QUESTION}}"></label>
<button type="submit">Submit</button>
</form>
<section id="output">
{{OUTPUT}}</section>
<p><a href="/chat">Open the chat widget</a></p>
</body>
</html>
"#;

const CHAT_PAGE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Chat with a GitHub Repository</title>
<style>
body { font-family: sans-serif; max-width: 52rem; margin: 2rem auto; }
#messages div { margin: .4rem 0; white-space: pre-wrap; }
.user { font-weight: bold; }
.log { color: #555; font-size: .9em; }
input { width: 80%; padding: .4rem; }
</style>
</head>
<body>
<h1>Chat with a GitHub Repository</h1>
<form id="repo-form">
<input id="url" placeholder="https://github.com/owner/repo">
<button type="submit">Load</button>
</form>
<div id="messages"><div class="assistant">{{GREETING}}</div></div>
<form id="chat-form">
<input id="content" placeholder="Your question" disabled>
<button type="submit">Send</button>
</form>
<script>
let sessionId = null;
const messages = document.getElementById("messages");
function show(cls, text) {
  const div = document.createElement("div");
  div.className = cls;
  div.textContent = text;
  messages.appendChild(div);
}
async function call(method, path, body) {
  const res = await fetch(path, {
    method,
    headers: { "Content-Type": "application/json" },
    body: body ? JSON.stringify(body) : undefined,
  });
  const json = res.status === 204 ? {} : await res.json();
  if (!res.ok) throw new Error(json.error ? json.error.message : res.statusText);
  return json;
}
document.getElementById("repo-form").addEventListener("submit", async (e) => {
  e.preventDefault();
  if (sessionId) { await call("DELETE", "/api/sessions/" + sessionId); sessionId = null; }
  try {
    const res = await call("POST", "/api/sessions", { url: document.getElementById("url").value });
    res.log.forEach((l) => show("log", l.text));
    sessionId = res.session_id;
    document.getElementById("content").disabled = false;
  } catch (err) { show("log", err.message); }
});
document.getElementById("chat-form").addEventListener("submit", async (e) => {
  e.preventDefault();
  const input = document.getElementById("content");
  const content = input.value;
  if (!sessionId || !content.trim()) return;
  input.value = "";
  show("user", content);
  try {
    const res = await call("POST", "/api/sessions/" + sessionId + "/messages", { content });
    show("assistant", res.reply);
  } catch (err) { show("log", err.message); }
});
</script>
</body>
</html>
"#;
