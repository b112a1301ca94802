//! # Taxpilot
//!
//! A retrieval-augmented question-answering engine for tax advisory over a
//! curated PDF corpus.
//!
//! Taxpilot ingests a directory of PDF documents into two parallel vector
//! indexes (document summaries for coarse narrowing, page chunks for fine
//! retrieval), caches them keyed by a content fingerprint of the corpus,
//! and answers natural-language questions by fusing similarity and
//! diversity retrieval, compressing the result, and issuing one generation
//! call per question.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ PDF corpus   │──▶│  Builder       │──▶│ Index cache  │
//! │ (documents/) │   │ Extract+Chunk │   │ (fingerprint │
//! └──────────────┘   │ +Summarize    │   │   gated)     │
//!                    └───────────────┘   └──────┬───────┘
//!                                               │
//!                          ┌────────────────────┤
//!                          ▼                    ▼
//!                    ┌───────────┐       ┌────────────┐
//!                    │ Retriever │──────▶│  Session   │
//!                    │ sim + MMR │       │ ask/answer │
//!                    └───────────┘       └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! taxpilot index                     # build or refresh the corpus indexes
//! taxpilot ask "Am I eligible for Small Business Relief?"
//! taxpilot chat                      # interactive session
//! taxpilot upload ./statement.pdf    # ask against a single document
//! taxpilot stats                     # collection overview
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | Corpus content fingerprinting |
//! | [`extract`] | PDF text and metadata extraction |
//! | [`chunk`] | Adaptive text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Generation provider abstraction |
//! | [`index`] | In-memory vector index with persistence |
//! | [`builder`] | Hierarchical index construction |
//! | [`cache`] | Fingerprint-gated index cache |
//! | [`retrieve`] | Ensemble retrieval and compression |
//! | [`profile`] | Questionnaire schema and profile store |
//! | [`certificate`] | Certificate field extraction and storage |
//! | [`session`] | Conversation orchestration |
//! | [`stats`] | Collection statistics |

pub mod builder;
pub mod cache;
pub mod certificate;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod fingerprint;
pub mod index;
pub mod llm;
pub mod models;
pub mod profile;
pub mod retrieve;
pub mod session;
pub mod stats;
