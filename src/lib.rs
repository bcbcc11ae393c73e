//! # Study Harness
//!
//! A retrieval-augmented study assistant. Upload PDF notes; their text is
//! extracted (with an OCR fallback for scans), chunked, embedded and held in
//! an in-process vector index. Chat questions are answered by a local model
//! from the most similar chunks, and the same notes can be turned into
//! flashcards and multiple-choice quizzes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  PDF upload │──▶│ Extract+OCR │──▶│ Chunk+Embed  │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            ▼
//!  ┌──────────┐   ┌──────────┐        ┌──────────────┐
//!  │ Validate │──▶│ Retrieve │◀──────▶│ VectorIndex  │
//!  └──────────┘   └────┬─────┘        └──────────────┘
//!                      ▼
//!               ┌──────────────┐   ┌──────────────┐
//!               │ Orchestrator │──▶│ Ollama model │
//!               └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF text extraction with OCR fallback |
//! | [`chunk`] | Sliding-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory vector index |
//! | [`retriever`] | Ingest and retrieval paths |
//! | [`llm`] | Ollama chat model client |
//! | [`orchestrator`] | Prompt construction for chat, flashcards, quizzes |
//! | [`generation`] | Parsing of model-generated JSON |
//! | [`validate`] | Query length and prompt-injection checks |
//! | [`session`] | Per-session chat history |
//! | [`telemetry`] | JSONL request telemetry |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod index;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod validate;
