//! Core data models shared by the loader, the knowledge base, and the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file fetched from a repository, before chunking.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub body: String,
    pub metadata_json: String,
}

/// Normalized document as stored in the vector store.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub updated_at: i64,
    pub body: String,
    pub metadata_json: String,
    pub dedup_hash: String,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk retrieved for a question, with its cosine similarity.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What the loader should fetch, parsed from `repo:<owner>/<name> type:<kind>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderQuery {
    pub owner: String,
    pub name: String,
}

impl LoaderQuery {
    /// Builds the query string the ingestion flow hands to the knowledge base.
    pub fn for_repo(repo: &str) -> String {
        format!("repo:{} type:repo", repo)
    }

    pub fn parse(query: &str) -> anyhow::Result<Self> {
        let mut repo = None;
        let mut kind = None;
        for part in query.split_whitespace() {
            if let Some(v) = part.strip_prefix("repo:") {
                repo = Some(v);
            } else if let Some(v) = part.strip_prefix("type:") {
                kind = Some(v);
            } else {
                anyhow::bail!("invalid loader query term: '{}'", part);
            }
        }

        match kind {
            Some("repo") => {}
            Some(other) => anyhow::bail!("unsupported loader type: '{}'", other),
            None => anyhow::bail!("loader query is missing 'type:'"),
        }

        let repo = repo.ok_or_else(|| anyhow::anyhow!("loader query is missing 'repo:'"))?;
        let (owner, name) = repo
            .split_once('/')
            .filter(|(o, n)| is_valid_segment(o) && is_valid_segment(n))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "invalid repository identifier '{}': expected owner/name",
                    repo
                )
            })?;

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
