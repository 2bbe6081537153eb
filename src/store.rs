//! On-disk vector store.
//!
//! A SQLite file (`vectors.sqlite`) inside a directory owned by the store.
//! [`VectorStore::create_temporary`] makes a fresh temporary directory per
//! call and leaves it on disk when the process exits; the index is never
//! read back across restarts.
//!
//! Similarity search is brute-force cosine similarity over every stored
//! vector.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

use crate::config::VectorDbConfig;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Chunk, Document, RetrievedChunk};

pub const DB_FILE_NAME: &str = "vectors.sqlite";

pub struct VectorStore {
    pool: SqlitePool,
    dir: PathBuf,
}

impl VectorStore {
    /// Creates a new temporary directory and opens a store inside it.
    pub async fn create_temporary(config: &VectorDbConfig) -> Result<Self> {
        let root = config
            .temp_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create {}", root.display()))?;

        let tmp = tempfile::Builder::new()
            .prefix("repo-chat-")
            .suffix("-vectordb")
            .tempdir_in(&root)
            .with_context(|| format!("Failed to create temp dir in {}", root.display()))?;
        let dir = tmp.keep();

        Self::open(&dir).await
    }

    /// Opens (or creates) a store in `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        let pool = db::connect(&dir.join(DB_FILE_NAME)).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns `(id, dedup_hash)` of an existing document.
    pub async fn find_document(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<(String, String)>> {
        let row = sqlx::query(
            "SELECT id, dedup_hash FROM documents WHERE source = ? AND source_id = ?",
        )
        .bind(source)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| (r.get("id"), r.get("dedup_hash"))))
    }

    /// Writes a document and replaces all of its chunks and vectors in one
    /// transaction. Returns the id the document is stored under, which is the
    /// existing row's id when `(source, source_id)` is already present.
    ///
    /// `vectors` must be parallel to `chunks`.
    pub async fn write_document(
        &self,
        doc: &Document,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<String> {
        anyhow::ensure!(
            chunks.len() == vectors.len(),
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        );

        let mut tx = self.pool.begin().await?;

        let document_id: String = sqlx::query_scalar(
            r#"
            INSERT INTO documents (id, source, source_id, source_url, title,
                                   updated_at, body, metadata_json, dedup_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, source_id) DO UPDATE SET
                source_url = excluded.source_url,
                title = excluded.title,
                updated_at = excluded.updated_at,
                body = excluded.body,
                metadata_json = excluded.metadata_json,
                dedup_hash = excluded.dedup_hash
            RETURNING id
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source)
        .bind(&doc.source_id)
        .bind(&doc.source_url)
        .bind(&doc.title)
        .bind(doc.updated_at)
        .bind(&doc.body)
        .bind(&doc.metadata_json)
        .bind(&doc.dedup_hash)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(&document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&document_id)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&document_id)
            .bind(model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(document_id)
    }

    /// Top `limit` chunks by cosine similarity to `query_vec`.
    pub async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.embedding, c.text, d.source_id, d.source_url
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = cv.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<RetrievedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                RetrievedChunk {
                    chunk_id: row.get("chunk_id"),
                    source_id: row.get("source_id"),
                    source_url: row.get("source_url"),
                    text: row.get("text"),
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn document_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, source_id: &str) -> Document {
        Document {
            id: id.to_string(),
            source: "github".to_string(),
            source_id: source_id.to_string(),
            source_url: None,
            title: Some("README.md".to_string()),
            updated_at: 0,
            body: "body".to_string(),
            metadata_json: "{}".to_string(),
            dedup_hash: "h1".to_string(),
        }
    }

    fn chunk(id: &str, doc_id: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            hash: format!("hash-{}", id),
        }
    }

    #[tokio::test]
    async fn temporary_store_gets_fresh_dir() {
        let root = tempfile::TempDir::new().unwrap();
        let config = VectorDbConfig {
            provider: "sqlite".to_string(),
            temp_root: Some(root.path().to_path_buf()),
        };
        let a = VectorStore::create_temporary(&config).await.unwrap();
        let b = VectorStore::create_temporary(&config).await.unwrap();
        assert_ne!(a.dir(), b.dir());
        assert!(a.dir().join(DB_FILE_NAME).exists());
        assert!(a.dir().starts_with(root.path()));
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = VectorStore::open(tmp.path()).await.unwrap();
        store
            .write_document(
                &doc("d1", "o/r:a.md"),
                &[chunk("c1", "d1", 0, "north"), chunk("c2", "d1", 1, "east")],
                &[vec![0.0, 1.0], vec![1.0, 0.0]],
                "test",
            )
            .await
            .unwrap();

        let hits = store.search(&[0.9, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "east");
        assert_eq!(hits[0].source_id, "o/r:a.md");
        assert!(hits[0].score > hits[1].score);

        let top = store.search(&[0.9, 0.1], 1).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn rewrite_drops_old_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = VectorStore::open(tmp.path()).await.unwrap();
        let d = doc("d1", "o/r:a.md");
        store
            .write_document(&d, &[chunk("c1", "d1", 0, "old")], &[vec![1.0]], "m")
            .await
            .unwrap();
        store
            .write_document(&d, &[chunk("c2", "d1", 0, "new")], &[vec![1.0]], "m")
            .await
            .unwrap();

        assert_eq!(store.chunk_count().await.unwrap(), 1);
        let hits = store.search(&[1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "new");
    }

    #[tokio::test]
    async fn write_is_keyed_by_source_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = VectorStore::open(tmp.path()).await.unwrap();
        store
            .write_document(&doc("d1", "o/r:a.md"), &[], &[], "m")
            .await
            .unwrap();
        let mut updated = doc("d1", "o/r:a.md");
        updated.dedup_hash = "h2".to_string();
        store.write_document(&updated, &[], &[], "m").await.unwrap();

        assert_eq!(store.document_count().await.unwrap(), 1);
        let (id, hash) = store
            .find_document("github", "o/r:a.md")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, "d1");
        assert_eq!(hash, "h2");
    }

    #[tokio::test]
    async fn second_writer_attaches_chunks_to_stored_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = VectorStore::open(tmp.path()).await.unwrap();
        let first = store
            .write_document(
                &doc("first", "o/r:a.md"),
                &[chunk("c1", "first", 0, "one")],
                &[vec![1.0]],
                "m",
            )
            .await
            .unwrap();
        // Same file indexed under a freshly minted id by a second ingest.
        let second = store
            .write_document(
                &doc("second", "o/r:a.md"),
                &[chunk("c2", "second", 0, "two")],
                &[vec![1.0]],
                "m",
            )
            .await
            .unwrap();

        assert_eq!(first, "first");
        assert_eq!(second, "first");
        assert_eq!(store.document_count().await.unwrap(), 1);
        let hits = store.search(&[1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "two");
        assert_eq!(hits[0].source_id, "o/r:a.md");
    }

    #[tokio::test]
    async fn mismatched_vectors_store_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = VectorStore::open(tmp.path()).await.unwrap();
        let err = store
            .write_document(&doc("d1", "o/r:a.md"), &[chunk("c1", "d1", 0, "x")], &[], "m")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 chunks but 0 vectors"));
        assert!(store
            .find_document("github", "o/r:a.md")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.document_count().await.unwrap(), 0);
    }
}
