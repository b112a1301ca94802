//! Collection statistics and cache health overview.
//!
//! Provides a quick summary of what's indexed: document counts, chunk
//! counts, and cache artifact sizes. Used by `taxpilot stats` to give
//! confidence that ingestion produced a sane collection.

use anyhow::{bail, Result};

use crate::cache;
use crate::config::Config;
use crate::index::VectorIndex;

/// Aggregate counts over the two hierarchical indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub avg_chunks_per_doc: f64,
}

pub fn collection_stats(doc_index: &VectorIndex, chunk_index: &VectorIndex) -> CollectionStats {
    let total_documents = doc_index.len();
    let total_chunks = chunk_index.len();
    let avg_chunks_per_doc = if total_documents > 0 {
        total_chunks as f64 / total_documents as f64
    } else {
        0.0
    };
    CollectionStats {
        total_documents,
        total_chunks,
        avg_chunks_per_doc,
    }
}

/// Run the stats command: load the cached indexes and print a summary.
/// Never triggers a rebuild; a missing cache is reported as such.
pub fn run_stats(config: &Config) -> Result<()> {
    let cache_root = &config.corpus.cache_dir;
    let doc_path = cache_root.join(cache::DOC_INDEX_FILE);
    let chunk_path = cache_root.join(cache::CHUNK_INDEX_FILE);

    if !doc_path.exists() || !chunk_path.exists() {
        bail!(
            "No index cache found under {}. Run `taxpilot index` first.",
            cache_root.display()
        );
    }

    let doc_index = VectorIndex::load(&doc_path)?;
    let chunk_index = VectorIndex::load(&chunk_path)?;
    let stats = collection_stats(&doc_index, &chunk_index);

    let cache_size = [&doc_path, &chunk_path]
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum::<u64>();

    println!("Taxpilot — Collection Stats");
    println!("===========================");
    println!();
    println!("  Cache:           {}", cache_root.display());
    println!("  Cache size:      {}", format_bytes(cache_size));
    println!();
    println!("  Documents:       {}", stats.total_documents);
    println!("  Chunks:          {}", stats.total_chunks);
    println!("  Chunks per doc:  {:.1}", stats.avg_chunks_per_doc);
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryMeta;

    fn index_with(n: usize, dims: usize) -> VectorIndex {
        let mut idx = VectorIndex::new(dims);
        idx.insert_batch(
            (0..n).map(|i| format!("entry {}", i)).collect(),
            (0..n)
                .map(|i| EntryMeta::Passage {
                    filename: "doc.pdf".to_string(),
                    title: "doc.pdf".to_string(),
                    page: 1,
                    chunk_id: i,
                    chunk_size: 10,
                    total_chunks: n,
                })
                .collect(),
            (0..n).map(|_| vec![1.0; dims]).collect(),
        )
        .unwrap();
        idx
    }

    #[test]
    fn stats_average_is_chunks_over_documents() {
        let docs = index_with(4, 2);
        let chunks = index_with(10, 2);
        let stats = collection_stats(&docs, &chunks);
        assert_eq!(stats.total_documents, 4);
        assert_eq!(stats.total_chunks, 10);
        assert!((stats.avg_chunks_per_doc - 2.5).abs() < 1e-9);
    }

    #[test]
    fn stats_empty_collection_has_zero_average() {
        let docs = VectorIndex::new(2);
        let chunks = VectorIndex::new(2);
        let stats = collection_stats(&docs, &chunks);
        assert_eq!(stats.avg_chunks_per_doc, 0.0);
    }

    #[test]
    fn format_bytes_scales() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
