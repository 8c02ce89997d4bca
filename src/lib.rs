//! # PDF RAG
//!
//! Upload PDFs, then ask questions answered from their content.
//!
//! Uploaded documents are split into overlapping text chunks, embedded with a
//! configurable provider, and stored in an on-disk SQLite vector store. A
//! question is embedded the same way, the most similar chunks are retrieved,
//! and a hosted (or local) LLM generates an answer citing them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Extract+Chunk│──▶│ Embed+Store  │
//! │  (PDF)   │   │  (pages)     │   │  (SQLite)    │
//! └──────────┘   └──────────────┘   └──────┬───────┘
//!                                          │ top-k
//!                 ┌──────────┐       ┌─────▼──────┐
//!                 │ Question │──────▶│ Chat (LLM) │
//!                 └──────────┘       └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pdf-rag ingest ./manual.pdf
//! pdf-rag ask "How do I reset the device?" --k 3
//! pdf-rag serve                 # HTTP API on 0.0.0.0:8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Pipeline error kinds |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF validation and text extraction |
//! | [`chunk`] | Recursive character text splitting |
//! | [`provider`] | Shared HTTP client with timeouts and retries |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction |
//! | [`store`] | Persistent vector store |
//! | [`ingest`] | Upload → chunks → vectors pipeline |
//! | [`chat`] | Retrieval-augmented answering |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod server;
pub mod store;
