//! In-memory vector index with JSON persistence.
//!
//! A [`VectorIndex`] maps embedding vectors to `(text, metadata)` entries
//! and supports brute-force cosine similarity search, maximum-marginal-
//! relevance search, and incremental merge of batches. Two instances back
//! the pipeline: a document-level index of summaries and a chunk-level
//! index of passages. Persistence is a versioned JSON file; a version
//! mismatch on load is an error so stale artifacts fall through to a
//! rebuild.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::models::EntryMeta;

/// Bumped whenever the on-disk layout changes; older files fail to load.
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub text: String,
    pub meta: EntryMeta,
    pub vector: Vec<f32>,
}

/// A scored reference into a [`VectorIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub index: usize,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VectorIndex {
    version: u32,
    dims: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            version: INDEX_FORMAT_VERSION,
            dims,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> &IndexEntry {
        &self.entries[index]
    }

    /// Insert a batch of parallel texts/metadata/vectors.
    pub fn insert_batch(
        &mut self,
        texts: Vec<String>,
        metas: Vec<EntryMeta>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<()> {
        if texts.len() != metas.len() || texts.len() != vectors.len() {
            bail!(
                "Mismatched batch lengths: {} texts, {} metas, {} vectors",
                texts.len(),
                metas.len(),
                vectors.len()
            );
        }
        for v in &vectors {
            if v.len() != self.dims {
                bail!("Vector has {} dims, index expects {}", v.len(), self.dims);
            }
        }
        for ((text, meta), vector) in texts.into_iter().zip(metas).zip(vectors) {
            self.entries.push(IndexEntry { text, meta, vector });
        }
        Ok(())
    }

    /// Merge another index's entries into this one, preserving order.
    pub fn merge(&mut self, other: VectorIndex) -> Result<()> {
        if other.dims != self.dims {
            bail!(
                "Cannot merge index with {} dims into index with {} dims",
                other.dims,
                self.dims
            );
        }
        self.entries.extend(other.entries);
        Ok(())
    }

    /// Top-`k` entries by cosine similarity to `query`. Ties break on
    /// insertion order, so repeated searches are deterministic.
    pub fn similarity_search(&self, query: &[f32], k: usize) -> Vec<Hit> {
        self.similarity_search_where(query, k, |_| true)
    }

    /// Top-`k` similarity search restricted to entries matching `pred`.
    pub fn similarity_search_where(
        &self,
        query: &[f32],
        k: usize,
        pred: impl Fn(&IndexEntry) -> bool,
    ) -> Vec<Hit> {
        let mut hits: Vec<Hit> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| pred(e))
            .map(|(i, e)| Hit {
                index: i,
                score: cosine_similarity(query, &e.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        hits.truncate(k);
        hits
    }

    /// Maximum-marginal-relevance search: over-fetch `fetch_k` candidates by
    /// similarity, then greedily select `k` of them trading off query
    /// relevance against redundancy with already-selected entries.
    ///
    /// `lambda` = 1.0 degenerates to plain similarity; 0.0 maximizes
    /// diversity only.
    pub fn mmr_search(&self, query: &[f32], k: usize, fetch_k: usize, lambda: f32) -> Vec<Hit> {
        self.mmr_search_where(query, k, fetch_k, lambda, |_| true)
    }

    pub fn mmr_search_where(
        &self,
        query: &[f32],
        k: usize,
        fetch_k: usize,
        lambda: f32,
        pred: impl Fn(&IndexEntry) -> bool,
    ) -> Vec<Hit> {
        let pool = self.similarity_search_where(query, fetch_k, pred);
        let mut selected: Vec<Hit> = Vec::with_capacity(k.min(pool.len()));
        let mut remaining: Vec<Hit> = pool;

        while selected.len() < k && !remaining.is_empty() {
            let mut best_pos = 0;
            let mut best_score = f32::NEG_INFINITY;

            for (pos, cand) in remaining.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|s| {
                        cosine_similarity(
                            &self.entries[cand.index].vector,
                            &self.entries[s.index].vector,
                        )
                    })
                    .fold(0.0f32, f32::max);
                let mmr = lambda * cand.score - (1.0 - lambda) * redundancy;
                // Strict comparison keeps the earlier (higher-similarity)
                // candidate on ties, for determinism.
                if mmr > best_score {
                    best_score = mmr;
                    best_pos = pos;
                }
            }

            selected.push(remaining.remove(best_pos));
        }

        selected
    }

    /// Persist the index as versioned JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write index: {}", path.display()))?;
        Ok(())
    }

    /// Load a persisted index, failing on corruption or a format-version
    /// mismatch.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read index: {}", path.display()))?;
        let index: VectorIndex = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt index file: {}", path.display()))?;
        if index.version != INDEX_FORMAT_VERSION {
            bail!(
                "Index format version {} does not match expected {}",
                index.version,
                INDEX_FORMAT_VERSION
            );
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage_meta(filename: &str, chunk_id: usize) -> EntryMeta {
        EntryMeta::Passage {
            filename: filename.to_string(),
            title: filename.to_string(),
            page: 1,
            chunk_id,
            chunk_size: 10,
            total_chunks: 1,
        }
    }

    fn index_with(vectors: Vec<Vec<f32>>) -> VectorIndex {
        let dims = vectors[0].len();
        let mut idx = VectorIndex::new(dims);
        let n = vectors.len();
        idx.insert_batch(
            (0..n).map(|i| format!("entry {}", i)).collect(),
            (0..n).map(|i| passage_meta("doc.pdf", i)).collect(),
            vectors,
        )
        .unwrap();
        idx
    }

    #[test]
    fn similarity_orders_by_cosine() {
        let idx = index_with(vec![
            vec![0.0, 1.0],  // orthogonal
            vec![1.0, 0.0],  // identical direction
            vec![1.0, 1.0],  // in between
        ]);
        let hits = idx.similarity_search(&[1.0, 0.0], 3);
        assert_eq!(hits[0].index, 1);
        assert_eq!(hits[1].index, 2);
        assert_eq!(hits[2].index, 0);
    }

    #[test]
    fn similarity_tie_breaks_on_insertion_order() {
        let idx = index_with(vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]]);
        let hits = idx.similarity_search(&[1.0, 0.0], 3);
        assert_eq!(
            hits.iter().map(|h| h.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn filtered_search_excludes_entries() {
        let mut idx = VectorIndex::new(2);
        idx.insert_batch(
            vec!["a".into(), "b".into()],
            vec![passage_meta("a.pdf", 0), passage_meta("b.pdf", 0)],
            vec![vec![1.0, 0.0], vec![1.0, 0.0]],
        )
        .unwrap();
        let hits =
            idx.similarity_search_where(&[1.0, 0.0], 5, |e| e.meta.filename() == "b.pdf");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, 1);
    }

    #[test]
    fn mmr_prefers_diversity_over_near_duplicates() {
        // Two near-identical vectors close to the query plus one distinct.
        let idx = index_with(vec![
            vec![1.0, 0.0, 0.0],
            vec![0.999, 0.01, 0.0],
            vec![0.6, 0.8, 0.0],
        ]);
        let hits = idx.mmr_search(&[1.0, 0.0, 0.0], 2, 3, 0.5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 0);
        // The second pick should skip the near-duplicate.
        assert_eq!(hits[1].index, 2);
    }

    #[test]
    fn mmr_with_lambda_one_matches_similarity() {
        let idx = index_with(vec![
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![0.0, 1.0],
        ]);
        let sim: Vec<usize> = idx
            .similarity_search(&[1.0, 0.0], 2)
            .iter()
            .map(|h| h.index)
            .collect();
        let mmr: Vec<usize> = idx
            .mmr_search(&[1.0, 0.0], 2, 3, 1.0)
            .iter()
            .map(|h| h.index)
            .collect();
        assert_eq!(sim, mmr);
    }

    #[test]
    fn merge_appends_preserving_order() {
        let mut a = index_with(vec![vec![1.0, 0.0]]);
        let b = index_with(vec![vec![0.0, 1.0]]);
        a.merge(b).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.entry(1).vector, vec![0.0, 1.0]);
    }

    #[test]
    fn merge_rejects_dims_mismatch() {
        let mut a = index_with(vec![vec![1.0, 0.0]]);
        let b = index_with(vec![vec![0.0, 1.0, 0.0]]);
        assert!(a.merge(b).is_err());
    }

    #[test]
    fn insert_rejects_wrong_dims() {
        let mut idx = VectorIndex::new(2);
        let err = idx.insert_batch(
            vec!["a".into()],
            vec![passage_meta("a.pdf", 0)],
            vec![vec![1.0, 0.0, 0.0]],
        );
        assert!(err.is_err());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let idx = index_with(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        idx.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.entry(0).text, "entry 0");
        assert_eq!(loaded.entry(1).vector, vec![0.0, 1.0]);
    }

    #[test]
    fn load_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(VectorIndex::load(&path).is_err());
    }

    #[test]
    fn load_rejects_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let idx = index_with(vec![vec![1.0, 0.0]]);
        let mut json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&idx).unwrap()).unwrap();
        json["version"] = serde_json::json!(INDEX_FORMAT_VERSION + 1);
        std::fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();
        assert!(VectorIndex::load(&path).is_err());
    }
}
