//! Write-through, invalidate-on-mismatch index cache.
//!
//! The cache root holds three artifacts: the two serialized indexes and a
//! text file with the fingerprint of the corpus they were built from. A
//! load is attempted only when all three exist and the stored fingerprint
//! equals the freshly computed one; a mismatch, a missing artifact (partial
//! cache), or a load failure all fall through to a full rebuild of both
//! indexes followed by a write-through persist. There is no partial
//! invalidation: any corpus change rebuilds everything.
//!
//! Rebuilds are single-flighted per fingerprint within the process:
//! concurrent sessions detecting the same stale cache take turns, and the
//! laggards re-check the cache instead of rebuilding again. Cross-process
//! coordination is out of scope.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::builder;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::fingerprint;
use crate::index::VectorIndex;
use crate::llm::Generator;

pub const DOC_INDEX_FILE: &str = "doc_index.json";
pub const CHUNK_INDEX_FILE: &str = "chunk_index.json";
pub const FINGERPRINT_FILE: &str = "fingerprint.txt";

/// One rebuild lock per corpus fingerprint.
static REBUILD_LOCKS: Lazy<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>> =
    Lazy::new(|| std::sync::Mutex::new(HashMap::new()));

fn rebuild_lock(fingerprint: &str) -> Arc<Mutex<()>> {
    let mut locks = REBUILD_LOCKS.lock().unwrap();
    locks
        .entry(fingerprint.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Drop the map entry for a finished rebuild so the lock table does not
/// grow with every corpus revision. Waiters already holding a clone of the
/// `Arc` keep serializing on it and then hit the persisted cache.
fn release_rebuild_lock(fingerprint: &str) {
    let mut locks = REBUILD_LOCKS.lock().unwrap();
    locks.remove(fingerprint);
}

/// Load the cached indexes if still valid, otherwise rebuild and persist.
pub async fn load_or_build(
    config: &Config,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
) -> Result<(VectorIndex, VectorIndex)> {
    let current = fingerprint::corpus_fingerprint(&config.corpus.documents_dir)?;
    let cache_root = config.corpus.cache_dir.clone();

    if let Some(pair) = try_load(&cache_root, &current) {
        info!("loaded cached indexes (documents unchanged)");
        return Ok(pair);
    }

    let lock = rebuild_lock(&current);
    let _guard = lock.lock().await;

    // Another session may have finished the rebuild while we waited.
    if let Some(pair) = try_load(&cache_root, &current) {
        info!("loaded cached indexes built by a concurrent session");
        return Ok(pair);
    }

    info!("index cache stale or absent, rebuilding");
    let (doc_index, chunk_index) = builder::build_indexes(config, embedder, generator).await?;
    persist(&cache_root, &current, &doc_index, &chunk_index)?;
    // The rebuild is durable; later callers load from disk without a lock.
    release_rebuild_lock(&current);

    Ok((doc_index, chunk_index))
}

/// Attempt a cache load. Returns `None` on any missing artifact,
/// fingerprint mismatch, or unreadable index — all are treated as a miss.
fn try_load(cache_root: &Path, current_fingerprint: &str) -> Option<(VectorIndex, VectorIndex)> {
    let doc_path = cache_root.join(DOC_INDEX_FILE);
    let chunk_path = cache_root.join(CHUNK_INDEX_FILE);
    let fp_path = cache_root.join(FINGERPRINT_FILE);

    if !doc_path.exists() || !chunk_path.exists() || !fp_path.exists() {
        return None;
    }

    let stored = std::fs::read_to_string(&fp_path).ok()?;
    if stored.trim() != current_fingerprint {
        return None;
    }

    let doc_index = match VectorIndex::load(&doc_path) {
        Ok(idx) => idx,
        Err(e) => {
            warn!(error = %e, "cached document index unreadable, rebuilding");
            return None;
        }
    };
    let chunk_index = match VectorIndex::load(&chunk_path) {
        Ok(idx) => idx,
        Err(e) => {
            warn!(error = %e, "cached chunk index unreadable, rebuilding");
            return None;
        }
    };

    Some((doc_index, chunk_index))
}

/// Write both indexes and the fingerprint. The fingerprint is written last
/// so a crash mid-persist leaves a cache that reads as a miss.
fn persist(
    cache_root: &Path,
    fingerprint: &str,
    doc_index: &VectorIndex,
    chunk_index: &VectorIndex,
) -> Result<()> {
    std::fs::create_dir_all(cache_root)
        .with_context(|| format!("Failed to create cache directory: {}", cache_root.display()))?;

    doc_index.save(&cache_root.join(DOC_INDEX_FILE))?;
    chunk_index.save(&cache_root.join(CHUNK_INDEX_FILE))?;
    std::fs::write(cache_root.join(FINGERPRINT_FILE), fingerprint)
        .with_context(|| "Failed to write fingerprint file")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuild_lock_entry_is_pruned_on_release() {
        let fp = "cache-test-prune";
        let lock = rebuild_lock(fp);
        assert!(REBUILD_LOCKS.lock().unwrap().contains_key(fp));

        release_rebuild_lock(fp);
        assert!(!REBUILD_LOCKS.lock().unwrap().contains_key(fp));
        // A handle taken before the release stays usable.
        assert!(lock.try_lock().is_ok());
    }

    #[test]
    fn pruned_fingerprint_gets_a_fresh_lock() {
        let fp = "cache-test-refresh";
        let first = rebuild_lock(fp);
        release_rebuild_lock(fp);
        let second = rebuild_lock(fp);
        assert!(!Arc::ptr_eq(&first, &second));
        release_rebuild_lock(fp);
    }
}
