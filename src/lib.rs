//! # repo-chat
//!
//! Chat with GitHub repositories. Repositories are cloned, split into
//! chunks, embedded with a local Ollama model and kept in a throwaway
//! SQLite vector store; questions are answered by retrieving the closest
//! chunks and handing them to an Ollama chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │   GitHub    │──▶│  Pipeline   │──▶│  SQLite  │
//! │ API + clone │   │ Chunk+Embed │   │ vectors  │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │ Session  │──────▶│  Ollama  │
//!                 │  flows   │       │   chat   │
//!                 └────┬─────┘       └──────────┘
//!                      ▼
//!                 ┌──────────┐
//!                 │ HTML/CLI │
//!                 └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`credentials`] | GitHub token resolution |
//! | [`models`] | Core data types |
//! | [`github`] | GitHub repository loader |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction |
//! | [`store`] | Temporary vector store |
//! | [`knowledge_base`] | Ingestion and answering |
//! | [`session`] | Per-session state and flows |
//! | [`render`] | HTML page rendering |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod credentials;
pub mod db;
pub mod embedding;
pub mod github;
pub mod knowledge_base;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod render;
pub mod server;
pub mod session;
pub mod store;
