//! Per-session UI state and the interaction flows that mutate it.
//!
//! A [`SessionState`] is created when a browser (or CLI run) starts a
//! session and dropped when it ends. It holds the session's loader, its
//! transcript, the set of repositories it has submitted, and the notices
//! waiting to be shown. The shared knowledge base is passed into each flow
//! rather than stored here.
//!
//! [`SessionStore`] maps session ids to states. Each state sits behind its
//! own async mutex that a handler holds for the whole interaction, so one
//! session processes one interaction at a time. Sessions left idle longer
//! than the store's TTL are dropped.

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::github::RepositoryLoader;
use crate::knowledge_base::KnowledgeService;
use crate::models::{ChatMessage, LoaderQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A message for the user, shown once on the next render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Serializable view of a session, for the JSON API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub chat_history: Vec<ChatMessage>,
    pub loaded_repos: Vec<String>,
}

pub struct SessionState {
    loader: Arc<dyn RepositoryLoader>,
    chat_history: Vec<ChatMessage>,
    loaded_repos: HashSet<String>,
    notices: Vec<Notice>,
}

impl SessionState {
    pub fn new(loader: Arc<dyn RepositoryLoader>) -> Self {
        Self {
            loader,
            chat_history: Vec::new(),
            loaded_repos: HashSet::new(),
            notices: Vec::new(),
        }
    }

    pub fn chat_history(&self) -> &[ChatMessage] {
        &self.chat_history
    }

    pub fn loaded_repos(&self) -> &HashSet<String> {
        &self.loaded_repos
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    /// Removes and returns pending notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            chat_history: self.chat_history.clone(),
            loaded_repos: self
                .loaded_repos
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }

    /// Ingestion flow. Returns whether an ingestion was attempted.
    ///
    /// Blank or already-submitted identifiers are ignored. Otherwise the
    /// repository is ingested, the outcome becomes a notice, and the
    /// identifier is recorded as loaded whether or not ingestion succeeded.
    /// A failed repository therefore shows in the loaded list and is not
    /// retried on resubmission.
    pub async fn load_repo(&mut self, kb: &dyn KnowledgeService, repo: &str) -> bool {
        let repo = repo.trim();
        if repo.is_empty() || self.loaded_repos.contains(repo) {
            return false;
        }

        let query = LoaderQuery::for_repo(repo);
        match kb.ingest(&query, self.loader.as_ref()).await {
            Ok(report) => {
                tracing::info!(repo, documents = report.documents_added, "repository loaded");
                self.push_notice(Notice::success(format!("Added {} to knowledge base!", repo)));
            }
            Err(e) => {
                tracing::warn!(repo, error = %format!("{:#}", e), "repository load failed");
                self.push_notice(Notice::error(format!("Error loading repository: {:#}", e)));
            }
        }

        self.loaded_repos.insert(repo.to_string());
        true
    }

    /// Chat flow. Returns `Ok(false)` for blank input.
    ///
    /// Answer failures are returned to the caller untouched and leave the
    /// transcript as it was.
    pub async fn ask(&mut self, kb: &dyn KnowledgeService, prompt: &str) -> Result<bool> {
        if prompt.trim().is_empty() {
            return Ok(false);
        }

        let answer = kb.answer(prompt, &self.chat_history).await?;
        self.chat_history.push(ChatMessage::user(prompt));
        self.chat_history.push(ChatMessage::assistant(answer));
        Ok(true)
    }

    pub fn clear_history(&mut self) {
        self.chat_history.clear();
    }
}

type LoaderFactory = dyn Fn() -> Result<Arc<dyn RepositoryLoader>> + Send + Sync;
type SharedSession = Arc<tokio::sync::Mutex<SessionState>>;

/// Sessions untouched for this long are dropped on the next sweep.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

struct Entry {
    state: SharedSession,
    last_seen: Instant,
}

/// All live sessions, keyed by session id.
///
/// Idle sessions are swept whenever a new one is created. A session whose
/// state is still held by a request is never swept.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Entry>>,
    make_loader: Box<LoaderFactory>,
    idle_ttl: Duration,
}

impl SessionStore {
    /// `make_loader` is called once for every new session.
    pub fn new<F>(make_loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn RepositoryLoader>> + Send + Sync + 'static,
    {
        Self {
            sessions: Mutex::new(HashMap::new()),
            make_loader: Box::new(make_loader),
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Looks up a live session and marks it as seen. An expired session
    /// that has not been swept yet is dropped here instead.
    pub fn get(&self, id: &str) -> Option<SharedSession> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(id)?;
        if !self.is_live(entry) {
            sessions.remove(id);
            tracing::debug!(session = %id, "session expired");
            return None;
        }
        entry.last_seen = Instant::now();
        Some(entry.state.clone())
    }

    /// Starts a new session, returning its id.
    pub fn create(&self) -> Result<(String, SharedSession)> {
        let loader = (self.make_loader)()?;
        let id = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(tokio::sync::Mutex::new(SessionState::new(loader)));

        let mut sessions = self.lock();
        self.sweep(&mut sessions);
        sessions.insert(
            id.clone(),
            Entry {
                state: state.clone(),
                last_seen: Instant::now(),
            },
        );
        tracing::debug!(session = %id, live = sessions.len(), "session started");
        Ok((id, state))
    }

    /// Returns the session for `id`, or starts a new one. The flag is true
    /// when a session was created.
    pub fn get_or_create(&self, id: Option<&str>) -> Result<(String, SharedSession, bool)> {
        if let Some(id) = id {
            if let Some(state) = self.get(id) {
                return Ok((id.to_string(), state, false));
            }
        }
        let (id, state) = self.create()?;
        Ok((id, state, true))
    }

    /// Ends a session, discarding its state.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            tracing::debug!(session = %id, "session ended");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(&self, sessions: &mut HashMap<String, Entry>) {
        let before = sessions.len();
        sessions.retain(|_, entry| self.is_live(entry));
        let expired = before - sessions.len();
        if expired > 0 {
            tracing::debug!(expired, "idle sessions dropped");
        }
    }

    fn is_live(&self, entry: &Entry) -> bool {
        Arc::strong_count(&entry.state) > 1 || entry.last_seen.elapsed() < self.idle_ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
