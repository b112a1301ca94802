//! Hierarchical index construction.
//!
//! Builds two parallel vector indexes from a corpus directory: a coarse
//! document-level index of generated summaries and a fine chunk-level index
//! of page passages. A single document failing to extract is skipped with a
//! warning; a corpus yielding nothing fails the whole build explicitly.
//! Large corpora are inserted in fixed-size batches and merged incrementally
//! to bound the work done per insertion call.

use std::path::Path;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::chunk;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::extract;
use crate::fingerprint;
use crate::index::VectorIndex;
use crate::llm::Generator;
use crate::models::EntryMeta;

/// Documents whose total extracted text is shorter than this are skipped.
pub const MIN_DOCUMENT_CHARS: usize = 50;
/// Pages shorter than this are not chunked.
pub const MIN_PAGE_CHARS: usize = 100;
/// Chunk counts above this threshold switch to batched insertion.
pub const BATCH_THRESHOLD: usize = 1000;
/// Batch size for incremental insertion on large corpora.
pub const BATCH_SIZE: usize = 500;
/// Summary input is truncated to this many characters before generation.
pub const SUMMARY_INPUT_CAP: usize = 4000;

/// Build the document-level and chunk-level indexes for the corpus.
///
/// Returns an explicit error when no document yields usable content; an
/// empty index is never reported as success.
pub async fn build_indexes(
    config: &Config,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
) -> Result<(VectorIndex, VectorIndex)> {
    let pdfs = fingerprint::list_pdfs(&config.corpus.documents_dir)?;

    let mut summaries: Vec<String> = Vec::new();
    let mut summary_metas: Vec<EntryMeta> = Vec::new();
    let mut chunks: Vec<String> = Vec::new();
    let mut chunk_metas: Vec<EntryMeta> = Vec::new();

    for path in &pdfs {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(file = %filename, error = %e, "skipping unreadable document");
                continue;
            }
        };

        let pages = match extract::extract_pages(&bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(file = %filename, error = %e, "skipping unparseable document");
                continue;
            }
        };
        if pages.is_empty() {
            warn!(file = %filename, "skipping document with no extractable text");
            continue;
        }

        let meta = extract::read_doc_meta(&bytes, &filename);
        let full_text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if full_text.trim().chars().count() < MIN_DOCUMENT_CHARS {
            warn!(file = %filename, "skipping document below minimum text length");
            continue;
        }

        let summary = summarize_document(generator, &filename, &full_text).await;
        summaries.push(summary);
        summary_metas.push(EntryMeta::Summary {
            filename: filename.clone(),
            title: meta.title.clone(),
            page_count: pages.len(),
            total_chars: full_text.chars().count(),
        });

        for page in &pages {
            if page.text.trim().chars().count() < MIN_PAGE_CHARS {
                continue;
            }
            let page_chunks = chunk::chunk_page(&page.text);
            let total = page_chunks.len();
            for (chunk_id, text) in page_chunks.into_iter().enumerate() {
                let size = text.chars().count();
                chunk_metas.push(EntryMeta::Passage {
                    filename: filename.clone(),
                    title: meta.title.clone(),
                    page: page.number,
                    chunk_id,
                    chunk_size: size,
                    total_chunks: total,
                });
                chunks.push(text);
            }
        }
    }

    if summaries.is_empty() || chunks.is_empty() {
        bail!("no valid documents could be processed");
    }

    info!(
        documents = summaries.len(),
        chunks = chunks.len(),
        "building hierarchical indexes"
    );

    let mut doc_index = VectorIndex::new(embedder.dims());
    let doc_vectors = embedder.embed(&summaries).await?;
    doc_index.insert_batch(summaries, summary_metas, doc_vectors)?;

    let chunk_index = build_chunk_index(embedder, chunks, chunk_metas).await?;

    Ok((doc_index, chunk_index))
}

/// Embed and insert chunks, batching for large corpora so each insertion
/// call handles a bounded slice.
async fn build_chunk_index(
    embedder: &dyn Embedder,
    chunks: Vec<String>,
    metas: Vec<EntryMeta>,
) -> Result<VectorIndex> {
    let mut index = VectorIndex::new(embedder.dims());

    if chunks.len() <= BATCH_THRESHOLD {
        let vectors = embedder.embed(&chunks).await?;
        index.insert_batch(chunks, metas, vectors)?;
        return Ok(index);
    }

    let mut chunks = chunks;
    let mut metas = metas;
    while !chunks.is_empty() {
        let take = chunks.len().min(BATCH_SIZE);
        let batch_texts: Vec<String> = chunks.drain(..take).collect();
        let batch_metas: Vec<EntryMeta> = metas.drain(..take).collect();
        let vectors = embedder.embed(&batch_texts).await?;

        let mut batch = VectorIndex::new(embedder.dims());
        batch.insert_batch(batch_texts, batch_metas, vectors)?;
        index.merge(batch)?;
    }

    Ok(index)
}

/// One generation call per document, over input truncated to
/// [`SUMMARY_INPUT_CAP`] characters. A generation failure degrades to an
/// excerpt-based summary rather than failing the build.
pub async fn summarize_document(
    generator: &dyn Generator,
    filename: &str,
    full_text: &str,
) -> String {
    let truncated = truncate_chars(full_text, SUMMARY_INPUT_CAP);
    let input = if truncated.len() < full_text.len() {
        format!("{}...", truncated)
    } else {
        truncated.to_string()
    };

    let prompt = format!(
        "Create a comprehensive summary of this document covering:\n\
         1. Main topics and subjects\n\
         2. Key concepts and terminology\n\
         3. Document type and purpose\n\n\
         Document: {}\n\
         Content: {}\n\n\
         Summary:",
        filename, input
    );

    match generator.complete(&prompt).await {
        Ok(summary) => format!("Document: {}\nSummary: {}", filename, summary.trim()),
        Err(e) => {
            warn!(file = %filename, error = %e, "summary generation failed, using excerpt");
            format!(
                "Document: {}\nContent: {}...",
                filename,
                truncate_chars(full_text, 500)
            )
        }
    }
}

/// Build an ephemeral chunk-level index for a single uploaded PDF.
///
/// The file is size-capped; the resulting index lives only in the session
/// and is never persisted.
pub async fn build_ephemeral_index(
    path: &Path,
    max_bytes: u64,
    embedder: &dyn Embedder,
) -> Result<VectorIndex> {
    let len = std::fs::metadata(path)?.len();
    if len > max_bytes {
        bail!(
            "Uploaded file exceeds the {} MB limit",
            max_bytes / (1024 * 1024)
        );
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = std::fs::read(path)?;

    let pages = extract::extract_pages(&bytes)
        .map_err(|e| anyhow::anyhow!("Could not extract text from the uploaded PDF: {}", e))?;
    let meta = extract::read_doc_meta(&bytes, &filename);

    let mut chunks: Vec<String> = Vec::new();
    let mut metas: Vec<EntryMeta> = Vec::new();
    for page in &pages {
        let page_chunks = chunk::chunk_page(&page.text);
        let total = page_chunks.len();
        for (chunk_id, text) in page_chunks.into_iter().enumerate() {
            let size = text.chars().count();
            metas.push(EntryMeta::Passage {
                filename: filename.clone(),
                title: meta.title.clone(),
                page: page.number,
                chunk_id,
                chunk_size: size,
                total_chunks: total,
            });
            chunks.push(text);
        }
    }

    if chunks.is_empty() {
        bail!("Could not extract any text from the uploaded PDF");
    }

    let vectors = embedder.embed(&chunks).await?;
    let mut index = VectorIndex::new(embedder.dims());
    index.insert_batch(chunks, metas, vectors)?;
    Ok(index)
}

fn truncate_chars(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "déjà vu".repeat(10);
        let cut = truncate_chars(&text, 5);
        assert_eq!(cut.chars().count(), 5);
    }

    #[test]
    fn truncate_shorter_input_untouched() {
        assert_eq!(truncate_chars("short", 100), "short");
    }

    /// Records the size of each embed call and encodes the chunk's own
    /// number into its vector, so ordering survives round trips.
    struct RecordingEmbedder {
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Embedder for RecordingEmbedder {
        fn model_name(&self) -> &str {
            "recording"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batch_sizes.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| {
                    let n: f32 = t
                        .rsplit(' ')
                        .next()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0.0);
                    vec![n, 1.0]
                })
                .collect())
        }
    }

    fn synthetic_chunks(count: usize) -> (Vec<String>, Vec<EntryMeta>) {
        let chunks: Vec<String> = (0..count).map(|i| format!("chunk {}", i)).collect();
        let metas: Vec<EntryMeta> = (0..count)
            .map(|i| EntryMeta::Passage {
                filename: "big.pdf".to_string(),
                title: "big.pdf".to_string(),
                page: 1,
                chunk_id: i,
                chunk_size: 10,
                total_chunks: count,
            })
            .collect();
        (chunks, metas)
    }

    #[tokio::test]
    async fn small_chunk_sets_embed_in_one_call() {
        let embedder = RecordingEmbedder {
            batch_sizes: Mutex::new(Vec::new()),
        };
        let (chunks, metas) = synthetic_chunks(BATCH_THRESHOLD);

        let index = build_chunk_index(&embedder, chunks, metas).await.unwrap();
        assert_eq!(index.len(), BATCH_THRESHOLD);
        assert_eq!(*embedder.batch_sizes.lock().unwrap(), vec![BATCH_THRESHOLD]);
    }

    #[tokio::test]
    async fn large_chunk_sets_embed_in_bounded_batches() {
        let embedder = RecordingEmbedder {
            batch_sizes: Mutex::new(Vec::new()),
        };
        let (chunks, metas) = synthetic_chunks(1200);

        let index = build_chunk_index(&embedder, chunks, metas).await.unwrap();
        assert_eq!(index.len(), 1200);
        // 1200 chunks over batches of 500: two full batches plus the tail.
        assert_eq!(*embedder.batch_sizes.lock().unwrap(), vec![500, 500, 200]);

        // Entry order matches input order across batch merges.
        assert_eq!(index.entry(0).text, "chunk 0");
        assert_eq!(index.entry(499).text, "chunk 499");
        assert_eq!(index.entry(500).text, "chunk 500");
        assert_eq!(index.entry(1199).text, "chunk 1199");
        for (i, entry) in index.entries().iter().enumerate() {
            assert_eq!(entry.vector[0] as usize, i);
        }
    }
}
