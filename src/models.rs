//! Core data models used throughout taxpilot.
//!
//! These types represent the pages, chunks, and ranked passages that flow
//! through the indexing and retrieval pipeline, plus the conversation
//! records the orchestrator produces.

use serde::{Deserialize, Serialize};

/// A single page of extracted text from a PDF. Pages that yield no
/// extractable text are dropped before this type is constructed.
#[derive(Debug, Clone)]
pub struct PageText {
    /// 1-based page number within the source document.
    pub number: u32,
    pub text: String,
}

/// Lightweight document metadata read from the PDF info dictionary.
/// `title` falls back to the filename when the dictionary has none.
#[derive(Debug, Clone)]
pub struct DocMeta {
    pub filename: String,
    pub title: String,
    pub author: Option<String>,
    pub created: Option<String>,
}

/// Metadata attached to a vector index entry.
///
/// The document-level index holds `Summary` entries (one per source PDF);
/// the chunk-level index holds `Passage` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryMeta {
    Summary {
        filename: String,
        title: String,
        page_count: usize,
        total_chars: usize,
    },
    Passage {
        filename: String,
        title: String,
        /// 1-based page number the passage was cut from.
        page: u32,
        /// Position of this chunk within its page.
        chunk_id: usize,
        chunk_size: usize,
        total_chunks: usize,
    },
}

impl EntryMeta {
    pub fn filename(&self) -> &str {
        match self {
            EntryMeta::Summary { filename, .. } => filename,
            EntryMeta::Passage { filename, .. } => filename,
        }
    }
}

/// A retrieved passage with its fused relevance score.
#[derive(Debug, Clone)]
pub struct RankedPassage {
    pub text: String,
    pub meta: EntryMeta,
    pub score: f64,
}

/// One completed conversation turn, held in session memory.
#[derive(Debug, Clone)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// A logged question/answer record in the external history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRecord {
    pub user_id: String,
    pub timestamp: String,
    pub category: String,
    pub question: String,
    pub answer: String,
}
