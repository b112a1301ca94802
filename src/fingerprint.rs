//! Corpus content fingerprinting.
//!
//! A fingerprint is a single SHA-256 digest over the byte contents of every
//! PDF in the corpus directory, streamed in filename-sorted order. Sorting
//! before hashing makes the digest stable across filesystem enumeration
//! order; any added, removed, or modified document changes it. The digest is
//! the sole cache-validity key used by [`crate::cache`].

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// List the PDF files in `dir`, sorted by filename. Extension matching is
/// case-insensitive; non-PDF entries and subdirectories are ignored.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read corpus directory: {}", dir.display()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false)
        })
        .collect();

    paths.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    Ok(paths)
}

/// Compute the deterministic digest of the corpus directory.
///
/// Read-only; returns an error only if the directory or one of its PDFs
/// cannot be read. An empty directory hashes to the digest of zero bytes,
/// which is itself a valid (and stable) fingerprint.
pub fn corpus_fingerprint(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 4096];

    for path in list_pdfs(dir)? {
        let mut file = File::open(&path)
            .with_context(|| format!("Failed to open document: {}", path.display()))?;
        loop {
            let n = file
                .read(&mut buf)
                .with_context(|| format!("Failed to read document: {}", path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_pdf(dir: &Path, name: &str, bytes: &[u8]) {
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    #[test]
    fn identical_corpora_produce_identical_digests() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        // Write in different orders; the digest must not care.
        write_pdf(a.path(), "one.pdf", b"alpha");
        write_pdf(a.path(), "two.pdf", b"beta");
        write_pdf(b.path(), "two.pdf", b"beta");
        write_pdf(b.path(), "one.pdf", b"alpha");

        let fa = corpus_fingerprint(a.path()).unwrap();
        let fb = corpus_fingerprint(b.path()).unwrap();
        assert_eq!(fa, fb);
    }

    #[test]
    fn single_byte_change_changes_digest() {
        let dir = TempDir::new().unwrap();
        write_pdf(dir.path(), "doc.pdf", b"alpha");
        let before = corpus_fingerprint(dir.path()).unwrap();

        write_pdf(dir.path(), "doc.pdf", b"alphb");
        let after = corpus_fingerprint(dir.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn added_document_changes_digest() {
        let dir = TempDir::new().unwrap();
        write_pdf(dir.path(), "doc.pdf", b"alpha");
        let before = corpus_fingerprint(dir.path()).unwrap();

        write_pdf(dir.path(), "extra.pdf", b"gamma");
        let after = corpus_fingerprint(dir.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn non_pdf_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        write_pdf(dir.path(), "doc.pdf", b"alpha");
        let before = corpus_fingerprint(dir.path()).unwrap();

        std::fs::write(dir.path().join("notes.txt"), b"irrelevant").unwrap();
        let after = corpus_fingerprint(dir.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        write_pdf(dir.path(), "upper.PDF", b"alpha");
        let paths = list_pdfs(dir.path()).unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");
        assert!(corpus_fingerprint(&gone).is_err());
    }
}
