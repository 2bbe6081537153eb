//! HTTP front end.
//!
//! Serves the single chat page and the form endpoints that drive it. Every
//! state-changing request runs one flow against the caller's session and
//! answers `303 See Other` to `/`, so the browser immediately re-fetches
//! the page and it is rendered again from current state.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Render the page for the caller's session |
//! | `POST` | `/chat` | Ask a question (form field `prompt`) |
//! | `POST` | `/chat/clear` | Clear the transcript |
//! | `POST` | `/repos` | Load a repository (form field `repo`) |
//! | `POST` | `/session/end` | Discard the caller's session |
//! | `GET`  | `/api/session` | JSON snapshot of the caller's session |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Sessions are identified by the `repo_chat_session` cookie; a request
//! without a known cookie starts a new session.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "generation_failed", "message": "Ollama connection error ..." } }
//! ```
//!
//! Error codes: `generation_failed` (500), `internal` (500). Repository
//! load failures are not errors at this level; they come back as notices on
//! the page.

use axum::{
    extract::{Form, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::credentials::GithubToken;
use crate::github::{GithubLoader, RepositoryLoader};
use crate::knowledge_base::{KnowledgeBase, KnowledgeService};
use crate::render::{PageView, Renderer};
use crate::session::{Notice, SessionSnapshot, SessionState, SessionStore};

pub const SESSION_COOKIE: &str = "repo_chat_session";

/// Static facts about the knowledge base shown on every page.
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub llm_model: String,
    pub store_dir: String,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    kb: Arc<dyn KnowledgeService>,
    sessions: Arc<SessionStore>,
    renderer: Arc<Renderer>,
    page: Arc<PageInfo>,
}

impl AppState {
    pub fn new(
        kb: Arc<dyn KnowledgeService>,
        sessions: Arc<SessionStore>,
        page: PageInfo,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            kb,
            sessions,
            renderer: Arc::new(Renderer::new()?),
            page: Arc::new(page),
        })
    }
}

/// Builds the router. Split from [`run_server`] so tests can serve it on
/// an ephemeral port with stand-in backends.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_page))
        .route("/chat", post(handle_chat))
        .route("/chat/clear", post(handle_clear))
        .route("/repos", post(handle_repo))
        .route("/session/end", post(handle_end_session))
        .route("/api/session", get(handle_snapshot))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the server and runs until Ctrl-C.
///
/// Each new session gets its own [`GithubLoader`] built from `token`.
pub async fn run_server(
    config: &Config,
    kb: Arc<KnowledgeBase>,
    token: GithubToken,
    bind: Option<String>,
) -> anyhow::Result<()> {
    let github = config.github.clone();
    let sessions = SessionStore::new(move || {
        let loader = GithubLoader::new(token.clone(), &github)?;
        Ok(Arc::new(loader) as Arc<dyn RepositoryLoader>)
    })
    .with_idle_ttl(Duration::from_secs(config.server.session_idle_secs));

    let page = PageInfo {
        llm_model: kb.llm_model().to_string(),
        store_dir: kb.store().dir().display().to_string(),
    };
    let state = AppState::new(kb, Arc::new(sessions), page)?;

    let bind_addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    println!("repo-chat listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

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

/// Internal error type that converts into an HTTP response.
pub struct AppError {
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

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "internal error");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

fn generation_failed(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "answer generation failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "generation_failed".to_string(),
        message: format!("{:#}", err),
    }
}

// ============ Sessions ============

type SharedSession = Arc<tokio::sync::Mutex<SessionState>>;

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == SESSION_COOKIE)
        .map(|(_, v)| v.to_string())
}

/// The caller's session plus the `Set-Cookie` value to send if it is new.
///
/// A new session starts with a notice naming the vector store directory.
async fn session_for(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(SharedSession, Option<String>), AppError> {
    let cookie = session_cookie(headers);
    let (id, session, created) = state
        .sessions
        .get_or_create(cookie.as_deref())
        .map_err(internal)?;
    if !created {
        return Ok((session, None));
    }

    session.lock().await.push_notice(Notice::info(format!(
        "Created vector store at {}",
        state.page.store_dir
    )));
    let set_cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
    Ok((session, Some(set_cookie)))
}

fn with_cookie(mut response: Response, set_cookie: Option<String>) -> Result<Response, AppError> {
    if let Some(cookie) = set_cookie {
        let value = HeaderValue::from_str(&cookie).map_err(|e| internal(e.into()))?;
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    Ok(response)
}

fn back_to_page(set_cookie: Option<String>) -> Result<Response, AppError> {
    with_cookie(Redirect::to("/").into_response(), set_cookie)
}

// ============ GET / ============

async fn handle_page(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (session, set_cookie) = session_for(&state, &headers).await?;
    let mut session = session.lock().await;

    let notices = session.take_notices();
    let snapshot = session.snapshot();
    let view = PageView {
        llm_model: &state.page.llm_model,
        store_dir: state.page.store_dir.clone(),
        notices,
        chat_history: session.chat_history(),
        loaded_repos: snapshot.loaded_repos,
    };
    let html = state.renderer.render_page(&view).map_err(internal)?;

    with_cookie(Html(html).into_response(), set_cookie)
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatForm {
    #[serde(default)]
    prompt: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Result<Response, AppError> {
    let (session, set_cookie) = session_for(&state, &headers).await?;
    {
        let mut session = session.lock().await;
        session
            .ask(state.kb.as_ref(), &form.prompt)
            .await
            .map_err(generation_failed)?;
    }
    back_to_page(set_cookie)
}

// ============ POST /chat/clear ============

async fn handle_clear(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (session, set_cookie) = session_for(&state, &headers).await?;
    session.lock().await.clear_history();
    back_to_page(set_cookie)
}

// ============ POST /repos ============

#[derive(Deserialize)]
struct RepoForm {
    #[serde(default)]
    repo: String,
}

async fn handle_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<RepoForm>,
) -> Result<Response, AppError> {
    let (session, set_cookie) = session_for(&state, &headers).await?;
    {
        let mut session = session.lock().await;
        session.load_repo(state.kb.as_ref(), &form.repo).await;
    }
    back_to_page(set_cookie)
}

// ============ POST /session/end ============

async fn handle_end_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(id) = session_cookie(&headers) {
        state.sessions.remove(&id);
    }
    let expired = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE);
    back_to_page(Some(expired))
}

// ============ GET /api/session ============

async fn handle_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (session, set_cookie) = session_for(&state, &headers).await?;
    let snapshot: SessionSnapshot = session.lock().await.snapshot();
    with_cookie(Json(snapshot).into_response(), set_cookie)
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
