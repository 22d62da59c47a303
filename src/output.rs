//! Output types: the normalised document tree and the invocation result.
//!
//! [`DocumentTree`] is built exclusively by
//! [`crate::pipeline::normalize`] and is never mutated afterwards. Field
//! names serialise with the same snake_case keys the model is asked to emit,
//! so a serialised tree is itself a valid model response.

use crate::pipeline::repair::FencePath;
use serde::{Deserialize, Serialize};

/// The normalised document: one entry per rasterised page, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTree {
    pub pages: Vec<Page>,
}

/// A single page of extracted content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed page number as reported by the model (or its position when
    /// the model omitted it).
    pub page_number: u32,
    pub summary: String,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub lists: Vec<ListBlock>,
    #[serde(default)]
    pub images: Vec<ImageDescription>,
}

/// A table as rows of cell strings. Rows need not all have the same length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub table_number: u32,
    pub content: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBlock {
    pub list_number: u32,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescription {
    pub image_number: u32,
    pub description: String,
}

impl DocumentTree {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn table_count(&self) -> usize {
        self.pages.iter().map(|p| p.tables.len()).sum()
    }
}

/// Result of a successful extraction.
///
/// Serialises to `{ "message": ..., "ai_response": ... }`; [`ExtractionStats`]
/// travels alongside for the caller but is not part of the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub message: String,
    pub ai_response: DocumentTree,
    #[serde(skip)]
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    pub const SUCCESS_MESSAGE: &'static str = "Success";

    pub fn new(document: DocumentTree, stats: ExtractionStats) -> Self {
        Self {
            message: Self::SUCCESS_MESSAGE.to_string(),
            ai_response: document,
            stats,
        }
    }
}

/// Per-invocation statistics and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Images sent to the model.
    pub image_count: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub collect_duration_ms: u64,
    pub inference_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Which trailing-fence path the repair stage took.
    pub fence_path: Option<FencePath>,
    pub quotes_unescaped: usize,
    pub newlines_stripped: usize,
    /// Non-fatal schema leniencies applied during normalisation.
    pub warnings: Vec<String>,
}
