//! Adaptive overlapping text chunker.
//!
//! Page text is split into chunks whose size and overlap adapt to the input
//! length: short pages get small chunks, long pages get large ones.
//! Splitting prefers paragraph boundaries, then line boundaries, then
//! sentence boundaries, then word boundaries, then arbitrary character
//! positions, so chunks rarely cut mid-sentence. Pieces are split
//! inclusively (each keeps its trailing separator), so concatenating the
//! produced chunks, overlap aside, reproduces the source text.

/// Chunks whose trimmed length falls below this floor are discarded as noise.
pub const MIN_CHUNK_CHARS: usize = 50;

/// Split preference order, strongest boundary first. The empty separator is
/// the hard character-boundary fallback.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub chunk_size: usize,
    pub overlap: usize,
}

/// Pick the chunking policy for an input of `len` characters.
///
/// Boundaries are inclusive on the lower policy: 499 chars is still small,
/// 500 is medium; 1999 is medium, 2000 is large.
pub fn adaptive_policy(len: usize) -> ChunkPolicy {
    if len < 500 {
        ChunkPolicy {
            chunk_size: 300,
            overlap: 50,
        }
    } else if len < 2000 {
        ChunkPolicy {
            chunk_size: 600,
            overlap: 100,
        }
    } else {
        ChunkPolicy {
            chunk_size: 1200,
            overlap: 200,
        }
    }
}

/// Chunk one page of text with the adaptive policy, dropping chunks below
/// the minimum-length floor.
pub fn chunk_page(text: &str) -> Vec<String> {
    let policy = adaptive_policy(text.chars().count());
    split_text(text, policy.chunk_size, policy.overlap)
        .into_iter()
        .filter(|c| c.trim().chars().count() >= MIN_CHUNK_CHARS)
        .collect()
}

/// Split `text` into chunks of at most `chunk_size` characters, with up to
/// `overlap` characters of carry-over between consecutive chunks.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let pieces = split_recursive(text, &SEPARATORS, chunk_size);
    merge_pieces(&pieces, chunk_size, overlap)
}

/// Recursively break text into pieces no longer than `chunk_size`, trying
/// each separator in preference order. Pieces keep their trailing separator.
fn split_recursive(text: &str, separators: &[&str], chunk_size: usize) -> Vec<String> {
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    let (sep, rest) = match separators.split_first() {
        Some(pair) => pair,
        None => return vec![text.to_string()],
    };

    if sep.is_empty() {
        // Hard split at character boundaries.
        let chars: Vec<char> = text.chars().collect();
        return chars
            .chunks(chunk_size)
            .map(|c| c.iter().collect())
            .collect();
    }

    if !text.contains(sep) {
        return split_recursive(text, rest, chunk_size);
    }

    let mut out = Vec::new();
    for piece in text.split_inclusive(sep) {
        if piece.chars().count() <= chunk_size {
            out.push(piece.to_string());
        } else {
            out.extend(split_recursive(piece, rest, chunk_size));
        }
    }
    out
}

/// Greedily pack pieces into chunks up to `chunk_size`, carrying the tail
/// pieces of each emitted chunk (up to `overlap` characters) into the next.
fn merge_pieces(pieces: &[String], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: Vec<&String> = Vec::new();
    let mut window_len = 0usize;
    // Pieces carried over purely for overlap; a chunk made only of these
    // would duplicate the previous chunk's tail.
    let mut carried = 0usize;

    for piece in pieces {
        let piece_len = piece.chars().count();

        if window_len + piece_len > chunk_size && window_len > 0 {
            if window.len() > carried {
                chunks.push(window.iter().map(|s| s.as_str()).collect::<String>());
            }
            // Keep tail pieces within the overlap budget.
            while window_len > overlap || (window_len + piece_len > chunk_size && window_len > 0) {
                let dropped = window.remove(0);
                window_len -= dropped.chars().count();
            }
            carried = window.len();
        }

        window.push(piece);
        window_len += piece_len;
    }

    if window.len() > carried && window_len > 0 {
        chunks.push(window.iter().map(|s| s.as_str()).collect::<String>());
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_of(n: usize) -> String {
        // Sentences of 25 chars each ("Sentence number 0000 ok. " fills 25)
        let mut s = String::new();
        let mut i = 0;
        while s.chars().count() < n {
            s.push_str(&format!("Sentence number {:04} ok. ", i));
            i += 1;
        }
        s.truncate(n);
        s
    }

    #[test]
    fn policy_boundary_at_500_is_inclusive_lower() {
        assert_eq!(adaptive_policy(499).chunk_size, 300);
        assert_eq!(adaptive_policy(500).chunk_size, 600);
    }

    #[test]
    fn policy_boundary_at_2000_is_inclusive_lower() {
        assert_eq!(adaptive_policy(1999).chunk_size, 600);
        assert_eq!(adaptive_policy(2000).chunk_size, 1200);
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let text = page_of(200);
        let chunks = split_text(&text, 300, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn no_chunk_exceeds_size() {
        let text = page_of(3000);
        for (size, overlap) in [(300, 50), (600, 100), (1200, 200)] {
            for c in split_text(&text, size, overlap) {
                assert!(c.chars().count() <= size, "chunk too long: {}", c.len());
            }
        }
    }

    #[test]
    fn chunks_cover_source_text() {
        let text = (0..40)
            .map(|i| format!("Paragraph {} talks about deductions and filing rules.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_text(&text, 600, 100);
        let joined = chunks.concat();
        for para in text.split("\n\n") {
            assert!(joined.contains(para), "missing paragraph: {}", para);
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        let text = page_of(2500);
        let chunks = split_text(&text, 600, 100);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // The head of each chunk repeats some tail of the previous one.
            let head: String = pair[1].chars().take(20).collect();
            assert!(
                pair[0].contains(&head),
                "no overlap between consecutive chunks"
            );
        }
    }

    #[test]
    fn noise_chunks_are_discarded() {
        let chunks = chunk_page("Too short.");
        assert!(chunks.is_empty());
    }

    #[test]
    fn splitting_prefers_sentence_boundaries() {
        let text = page_of(1000);
        let chunks = split_text(&text, 600, 100);
        for c in &chunks {
            assert!(
                c.ends_with(". ") || c.ends_with('.') || c.ends_with("ok"),
                "chunk cut mid-sentence: ...{:?}",
                &c[c.len().saturating_sub(20)..]
            );
        }
    }

    #[test]
    fn deterministic() {
        let text = page_of(2100);
        assert_eq!(split_text(&text, 1200, 200), split_text(&text, 1200, 200));
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split_text("", 300, 50).is_empty());
        assert!(chunk_page("").is_empty());
    }

    #[test]
    fn hard_split_handles_separator_free_text() {
        let text: String = "x".repeat(1000);
        let chunks = split_text(&text, 300, 50);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.chars().count() <= 300);
        }
    }
}
