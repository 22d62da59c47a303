//! # edgequake-doc2json
//!
//! Extract structured JSON from rasterised documents using Vision Language
//! Models (VLMs).
//!
//! ## Why this crate?
//!
//! Page-by-page OCR loses the structure that makes a document useful: which
//! cells belong to which table, which lines form a list, what a figure shows.
//! Instead this crate hands every page image of a document to a VLM in one
//! request, asks for a fixed JSON schema (pages → summary, tables, lists,
//! image descriptions) and turns the reply into a validated [`DocumentTree`].
//!
//! ## Pipeline Overview
//!
//! ```text
//! (container, prefix)
//!  │
//!  ├─ 1. Collect    list the prefix, keep .png/.jpg/.jpeg, fetch bytes
//!  ├─ 2. Request    images + instruction block + "```json" prefill
//!  ├─ 3. Invoke     one blocking model call; only end_turn is trusted
//!  ├─ 4. Repair     fence strip, quote/newline heuristics (versioned)
//!  ├─ 5. Normalise  strict JSON parse + schema walk
//!  └─ 6. Output     { "message": "Success", "ai_response": DocumentTree }
//! ```
//!
//! Any failure aborts the invocation with a [`Doc2JsonError`]; there is no
//! partial result.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2json::{ExtractionConfig, Extractor, LocalObjectStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let store = Arc::new(LocalObjectStore::new("./data"));
//!     let extractor = Extractor::from_config(store, ExtractionConfig::default()).await?;
//!     let output = extractor.extract("images", "reports/q1/").await?;
//!     println!("{}", serde_json::to_string_pretty(&output)?);
//!     eprintln!("tokens: {} in / {} out",
//!         output.stats.input_tokens,
//!         output.stats.output_tokens);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2json` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-doc2json = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod event;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, FenceStrip, RepairStrategy};
pub use error::{Doc2JsonError, ErrorKind, ErrorReport};
pub use event::StageInput;
pub use extract::{
    extract_sync, extract_to_file, normalize_response, resolve_provider, write_output, Extractor,
};
pub use output::{
    DocumentTree, ExtractionOutput, ExtractionStats, ImageDescription, ListBlock, Page, Table,
};
pub use pipeline::invoke::{ModelEndpoint, ModelResponse, TokenUsage};
pub use pipeline::llm::LlmEndpoint;
pub use pipeline::repair::FencePath;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use storage::{LocalObjectStore, MemoryObjectStore, ObjectStore};
