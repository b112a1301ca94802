//! Per-page PDF text extraction and document metadata.
//!
//! Extraction is pipeline-layer: callers supply raw bytes, this module
//! returns ordered page text. A corrupt or encrypted document yields an
//! error and the ingestion pipeline skips it rather than aborting the
//! corpus. Metadata (title/author/creation date) is read best-effort from
//! the PDF info dictionary and never fails.

use crate::models::{DocMeta, PageText};

/// Extraction error (no panic; the pipeline skips the failed document).
#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract per-page text from PDF bytes. Pages whose text trims to empty
/// are dropped; page numbers are 1-based and reflect the original layout,
/// so gaps are possible after dropping.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| PageText {
            number: (i + 1) as u32,
            text,
        })
        .collect())
}

/// Read title/author/creation date from the PDF info dictionary.
/// Best-effort: a missing or malformed dictionary falls back to the
/// filename as title, never to an error.
pub fn read_doc_meta(bytes: &[u8], filename: &str) -> DocMeta {
    let mut title = None;
    let mut author = None;
    let mut created = None;

    if let Ok(doc) = lopdf::Document::load_mem(bytes) {
        if let Some(info) = doc
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|o| o.as_reference().ok())
            .and_then(|r| doc.get_object(r).ok())
            .and_then(|o| o.as_dict().ok())
        {
            title = info_string(info, b"Title");
            author = info_string(info, b"Author");
            created = info_string(info, b"CreationDate");
        }
    }

    DocMeta {
        filename: filename.to_string(),
        title: title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| filename.to_string()),
        author: author.filter(|a| !a.trim().is_empty()),
        created,
    }
}

fn info_string(dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        lopdf::Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
}

/// PDF text strings are either UTF-16BE with a BOM or PDFDocEncoding
/// (treated as Latin-1 here).
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn meta_falls_back_to_filename() {
        let meta = read_doc_meta(b"not a pdf", "report.pdf");
        assert_eq!(meta.filename, "report.pdf");
        assert_eq!(meta.title, "report.pdf");
        assert!(meta.author.is_none());
    }

    #[test]
    fn decode_utf16_string() {
        // "Hi" in UTF-16BE with BOM
        let bytes = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69];
        assert_eq!(decode_pdf_string(&bytes), "Hi");
    }

    #[test]
    fn decode_latin1_string() {
        assert_eq!(decode_pdf_string(b"Annual Report"), "Annual Report");
    }
}
