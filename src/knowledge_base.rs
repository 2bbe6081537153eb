//! The retrieval-augmented chat object.
//!
//! A [`KnowledgeBase`] owns the live backends: the chat model, the embedder,
//! and the on-disk vector store. It is built once per process and shared by
//! every session through an `Arc`; nothing in it is session-specific.
//!
//! Two operations with different failure contracts:
//!
//! - [`ingest`](KnowledgeService::ingest) fetches a repository through a
//!   [`RepositoryLoader`] and indexes it. Callers are expected to catch its
//!   errors and show them.
//! - [`answer`](KnowledgeService::answer) retrieves and generates. Callers
//!   propagate its errors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{Embedder, OllamaEmbedder};
use crate::github::RepositoryLoader;
use crate::llm::{ChatModel, OllamaChat, PromptMessage};
use crate::models::{ChatMessage, Document, LoaderQuery, RetrievedChunk, SourceItem};
use crate::store::VectorStore;

/// Outcome of one successful ingestion.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    pub repo: String,
    pub files: usize,
    pub documents_added: usize,
    pub documents_unchanged: usize,
    pub chunks_written: usize,
}

/// The operations the session flows need from a knowledge base.
#[async_trait]
pub trait KnowledgeService: Send + Sync {
    /// Fetch and index the content named by `query`
    /// (`repo:<owner>/<name> type:repo`).
    async fn ingest(&self, query: &str, loader: &dyn RepositoryLoader) -> Result<IngestReport>;

    /// Answer `question` from indexed content. `history` is the caller's
    /// transcript so far, oldest first.
    async fn answer(&self, question: &str, history: &[ChatMessage]) -> Result<String>;
}

pub struct KnowledgeBase {
    store: VectorStore,
    embedder: Box<dyn Embedder>,
    llm: Box<dyn ChatModel>,
    config: Config,
}

impl KnowledgeBase {
    /// Builds the Ollama-backed knowledge base with a fresh temporary store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = VectorStore::create_temporary(&config.vectordb).await?;
        tracing::info!(dir = %store.dir().display(), "created vector store");

        let embedder = OllamaEmbedder::new(&config.embedder)?;
        let llm = OllamaChat::new(&config.llm)?;
        Ok(Self::new(config, store, Box::new(embedder), Box::new(llm)))
    }

    pub fn new(
        config: &Config,
        store: VectorStore,
        embedder: Box<dyn Embedder>,
        llm: Box<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config: config.clone(),
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn llm_model(&self) -> &str {
        self.llm.model_name()
    }

    pub fn embedder_model(&self) -> &str {
        self.embedder.model_name()
    }

    async fn index_item(&self, item: &SourceItem, report: &mut IngestReport) -> Result<()> {
        let dedup_hash = dedup_hash(item);
        let existing = self.store.find_document(&item.source, &item.source_id).await?;

        let doc_id = match existing {
            Some((_, hash)) if hash == dedup_hash => {
                report.documents_unchanged += 1;
                return Ok(());
            }
            Some((id, _)) => id,
            None => Uuid::new_v4().to_string(),
        };

        let chunks = chunk_text(
            &doc_id,
            &item.body,
            self.config.chunking.max_tokens,
            self.config.chunking.overlap_tokens,
        );

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embedder.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self
                .embedder
                .embed(&texts)
                .await
                .with_context(|| format!("embedding {} failed", item.source_id))?;
            vectors.extend(embedded);
        }

        let doc = Document {
            id: doc_id.clone(),
            source: item.source.clone(),
            source_id: item.source_id.clone(),
            source_url: item.source_url.clone(),
            title: item.title.clone(),
            updated_at: item.updated_at.timestamp(),
            body: item.body.clone(),
            metadata_json: item.metadata_json.clone(),
            dedup_hash,
        };
        self.store
            .write_document(&doc, &chunks, &vectors, self.embedder.model_name())
            .await?;

        report.documents_added += 1;
        report.chunks_written += chunks.len();
        Ok(())
    }

    async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>> {
        if self.store.chunk_count().await? == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed_one(question).await?;
        self.store
            .search(&query_vec, self.config.retrieval.number_documents)
            .await
    }
}

#[async_trait]
impl KnowledgeService for KnowledgeBase {
    async fn ingest(&self, query: &str, loader: &dyn RepositoryLoader) -> Result<IngestReport> {
        let query = LoaderQuery::parse(query)?;
        let items = loader.load(&query).await?;

        let mut report = IngestReport {
            repo: query.full_name(),
            files: items.len(),
            ..IngestReport::default()
        };
        for item in &items {
            self.index_item(item, &mut report).await?;
        }

        tracing::info!(
            repo = %report.repo,
            files = report.files,
            added = report.documents_added,
            unchanged = report.documents_unchanged,
            chunks = report.chunks_written,
            "ingested repository"
        );
        Ok(report)
    }

    async fn answer(&self, question: &str, history: &[ChatMessage]) -> Result<String> {
        let context = self.retrieve(question).await?;
        tracing::debug!(hits = context.len(), "retrieved context");

        let keep = self.config.retrieval.history_messages;
        let recent = &history[history.len().saturating_sub(keep)..];

        let mut messages = Vec::new();
        if let Some(system) = &self.config.llm.system_prompt {
            messages.push(PromptMessage::new("system", system.clone()));
        }
        messages.push(PromptMessage::new(
            "user",
            build_prompt(question, &context, recent),
        ));

        self.llm.complete(&messages).await
    }
}

fn dedup_hash(item: &SourceItem) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item.source.as_bytes());
    hasher.update(item.source_id.as_bytes());
    hasher.update(item.body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Formats the single user turn sent to the model.
pub fn build_prompt(question: &str, context: &[RetrievedChunk], history: &[ChatMessage]) -> String {
    let context_block = context
        .iter()
        .map(|c| format!("[{}]\n{}", c.source_id, c.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let history_block = history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You answer questions about source code repositories. Ground every answer in the \
         context below; if the context does not contain the answer, say so plainly. Do not \
         refer to \"the context\" in your reply.\n\
         \n\
         Context:\n\
         ----------------------\n\
         {}\n\
         ----------------------\n\
         \n\
         Conversation so far:\n\
         ----------------------\n\
         {}\n\
         ----------------------\n\
         \n\
         Question: {}\n\
         Answer:",
        context_block, history_block, question
    )
}
