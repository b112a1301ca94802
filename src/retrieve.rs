//! Retrieval composition: ensemble fusion and relevance compression.
//!
//! Two retrieval modes run against the chunk index: plain similarity
//! top-k, and a diversity-promoting MMR search that over-fetches a wider
//! candidate pool. Their rankings are fused with fixed weights using
//! reciprocal-rank fusion. On large corpora the document-level index first
//! narrows candidates to the chunks of the best-matching documents. An
//! optional compression pass asks the language model to keep only the
//! query-relevant spans of each passage; it is best-effort and falls back
//! to the uncompressed fused list on any failure.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::index::{Hit, VectorIndex};
use crate::llm::Generator;
use crate::models::RankedPassage;

/// Rank constant for reciprocal-rank fusion; dampens the gap between
/// adjacent ranks.
const RRF_K: f64 = 60.0;

/// Marker the compression prompt asks for when a passage is irrelevant.
const NO_OUTPUT: &str = "NO_OUTPUT";

pub struct Retriever<'a> {
    doc_index: &'a VectorIndex,
    chunk_index: &'a VectorIndex,
    cfg: &'a RetrievalConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(
        doc_index: &'a VectorIndex,
        chunk_index: &'a VectorIndex,
        cfg: &'a RetrievalConfig,
    ) -> Self {
        Self {
            doc_index,
            chunk_index,
            cfg,
        }
    }

    /// Fused similarity + MMR retrieval for an embedded query.
    ///
    /// Deterministic for a fixed query and index: both underlying searches
    /// tie-break on insertion order and fusion tie-breaks on entry index.
    pub fn fused(&self, query_vec: &[f32]) -> Vec<RankedPassage> {
        let allowed = self.narrowed_documents(query_vec);
        let keep = |e: &crate::index::IndexEntry| match &allowed {
            Some(set) => set.contains(e.meta.filename()),
            None => true,
        };

        let sim_hits = self
            .chunk_index
            .similarity_search_where(query_vec, self.cfg.similarity_k, keep);
        let mmr_hits = self.chunk_index.mmr_search_where(
            query_vec,
            self.cfg.mmr_k,
            self.cfg.mmr_fetch_k,
            self.cfg.mmr_lambda,
            keep,
        );

        let fused = fuse_rankings(
            &[
                (&sim_hits, self.cfg.similarity_weight),
                (&mmr_hits, self.cfg.mmr_weight),
            ],
            self.cfg.final_limit,
        );

        fused
            .into_iter()
            .map(|(index, score)| {
                let entry = self.chunk_index.entry(index);
                RankedPassage {
                    text: entry.text.clone(),
                    meta: entry.meta.clone(),
                    score,
                }
            })
            .collect()
    }

    /// Coarse corpus narrowing: on large corpora, restrict chunk candidates
    /// to the filenames of the top-ranked document summaries.
    fn narrowed_documents(&self, query_vec: &[f32]) -> Option<HashSet<String>> {
        if self.doc_index.len() <= self.cfg.doc_filter_threshold {
            return None;
        }
        let doc_hits = self.doc_index.similarity_search(query_vec, self.cfg.doc_k);
        Some(
            doc_hits
                .iter()
                .map(|h| self.doc_index.entry(h.index).meta.filename().to_string())
                .collect(),
        )
    }

    /// Relevance compression over the fused passages. Best-effort: any
    /// generation failure returns the uncompressed input unchanged.
    pub async fn compress(
        &self,
        generator: &dyn Generator,
        query: &str,
        passages: Vec<RankedPassage>,
    ) -> Vec<RankedPassage> {
        let mut compressed = Vec::with_capacity(passages.len());

        for passage in &passages {
            let prompt = format!(
                "Given the following question and context, extract any part of the context \
                 *as is* that is relevant to answer the question. If none of the context is \
                 relevant return {}.\n\n\
                 Question: {}\n\n\
                 Context:\n{}\n\n\
                 Extracted relevant parts:",
                NO_OUTPUT, query, passage.text
            );

            match generator.complete(&prompt).await {
                Ok(extracted) => {
                    let extracted = extracted.trim();
                    if extracted.is_empty() || extracted == NO_OUTPUT {
                        continue;
                    }
                    compressed.push(RankedPassage {
                        text: extracted.to_string(),
                        meta: passage.meta.clone(),
                        score: passage.score,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "compression failed, returning uncompressed passages");
                    return passages;
                }
            }
        }

        compressed
    }

    /// Retrieve fused passages, compressed when enabled.
    pub async fn retrieve(
        &self,
        generator: &dyn Generator,
        query: &str,
        query_vec: &[f32],
    ) -> Result<Vec<RankedPassage>> {
        let fused = self.fused(query_vec);
        if !self.cfg.compression {
            return Ok(fused);
        }
        Ok(self.compress(generator, query, fused).await)
    }
}

/// Weighted reciprocal-rank fusion over ranked hit lists.
///
/// Each list contributes `weight / (RRF_K + rank)` per entry; entries are
/// ordered by total contribution, tie-breaking on entry index.
fn fuse_rankings(lists: &[(&[Hit], f64)], limit: usize) -> Vec<(usize, f64)> {
    let mut scores: HashMap<usize, f64> = HashMap::new();

    for (hits, weight) in lists {
        for (rank, hit) in hits.iter().enumerate() {
            *scores.entry(hit.index).or_insert(0.0) += weight / (RRF_K + rank as f64 + 1.0);
        }
    }

    let mut fused: Vec<(usize, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    fused.truncate(limit);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryMeta;

    fn hits(indices: &[usize]) -> Vec<Hit> {
        indices
            .iter()
            .map(|&i| Hit {
                index: i,
                score: 1.0,
            })
            .collect()
    }

    #[test]
    fn fusion_prefers_entries_in_both_lists() {
        let a = hits(&[0, 1, 2]);
        let b = hits(&[2, 3, 4]);
        let fused = fuse_rankings(&[(&a, 0.6), (&b, 0.4)], 10);
        // Entry 2 appears in both lists and should outrank entry 1,
        // which only appears (later than 0) in one list.
        let order: Vec<usize> = fused.iter().map(|(i, _)| *i).collect();
        let pos2 = order.iter().position(|&i| i == 2).unwrap();
        let pos1 = order.iter().position(|&i| i == 1).unwrap();
        assert!(pos2 < pos1);
    }

    #[test]
    fn fusion_respects_weights() {
        let a = hits(&[0]);
        let b = hits(&[1]);
        let fused = fuse_rankings(&[(&a, 0.6), (&b, 0.4)], 10);
        assert_eq!(fused[0].0, 0);
        let flipped = fuse_rankings(&[(&a, 0.4), (&b, 0.6)], 10);
        assert_eq!(flipped[0].0, 1);
    }

    #[test]
    fn fusion_is_deterministic() {
        let a = hits(&[3, 1, 4]);
        let b = hits(&[1, 5, 9]);
        let first = fuse_rankings(&[(&a, 0.6), (&b, 0.4)], 10);
        let second = fuse_rankings(&[(&a, 0.6), (&b, 0.4)], 10);
        assert_eq!(first, second);
    }

    #[test]
    fn fusion_tie_breaks_on_entry_index() {
        let a = hits(&[7]);
        let b = hits(&[2]);
        let fused = fuse_rankings(&[(&a, 0.5), (&b, 0.5)], 10);
        assert_eq!(fused[0].0, 2);
    }

    #[test]
    fn fusion_truncates_to_limit() {
        let a = hits(&[0, 1, 2, 3, 4]);
        let fused = fuse_rankings(&[(&a, 1.0)], 2);
        assert_eq!(fused.len(), 2);
    }

    fn summary_meta(filename: &str) -> EntryMeta {
        EntryMeta::Summary {
            filename: filename.to_string(),
            title: filename.to_string(),
            page_count: 1,
            total_chars: 100,
        }
    }

    fn passage_meta(filename: &str) -> EntryMeta {
        EntryMeta::Passage {
            filename: filename.to_string(),
            title: filename.to_string(),
            page: 1,
            chunk_id: 0,
            chunk_size: 100,
            total_chunks: 1,
        }
    }

    /// Three-document corpus where the chunk closest to the query belongs
    /// to the document whose summary matches it worst.
    fn narrowing_indexes() -> (VectorIndex, VectorIndex) {
        let mut doc_index = VectorIndex::new(2);
        doc_index
            .insert_batch(
                vec![
                    "summary of a".to_string(),
                    "summary of b".to_string(),
                    "summary of c".to_string(),
                ],
                vec![
                    summary_meta("a.pdf"),
                    summary_meta("b.pdf"),
                    summary_meta("c.pdf"),
                ],
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]],
            )
            .unwrap();

        let mut chunk_index = VectorIndex::new(2);
        chunk_index
            .insert_batch(
                vec![
                    "chunk from a".to_string(),
                    "chunk from b".to_string(),
                    "second chunk from a".to_string(),
                ],
                vec![
                    passage_meta("a.pdf"),
                    passage_meta("b.pdf"),
                    passage_meta("a.pdf"),
                ],
                // b.pdf's chunk is the best raw match for the query.
                vec![vec![0.9, 0.1], vec![1.0, 0.0], vec![0.8, 0.2]],
            )
            .unwrap();

        (doc_index, chunk_index)
    }

    #[test]
    fn large_corpus_narrows_chunks_to_top_documents() {
        let (doc_index, chunk_index) = narrowing_indexes();
        let cfg = RetrievalConfig {
            doc_k: 1,
            doc_filter_threshold: 2,
            ..Default::default()
        };
        let retriever = Retriever::new(&doc_index, &chunk_index, &cfg);

        let passages = retriever.fused(&[1.0, 0.0]);
        assert!(!passages.is_empty());
        // Only a.pdf survives the document filter, so b.pdf's chunk is
        // excluded even though it matches the query best.
        for p in &passages {
            assert_eq!(p.meta.filename(), "a.pdf");
        }
        assert_eq!(passages.len(), 2);
    }

    #[test]
    fn small_corpus_skips_document_narrowing() {
        let (doc_index, chunk_index) = narrowing_indexes();
        let cfg = RetrievalConfig {
            doc_k: 1,
            doc_filter_threshold: 10,
            ..Default::default()
        };
        let retriever = Retriever::new(&doc_index, &chunk_index, &cfg);

        let passages = retriever.fused(&[1.0, 0.0]);
        assert!(passages.iter().any(|p| p.meta.filename() == "b.pdf"));
    }
}
