//! Overlapping, boundary-aware text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` bytes,
//! where each chunk after the first starts exactly `overlap` bytes before
//! the previous chunk ended. Every chunk is a verbatim slice of the source
//! text, so neighbors share their overlap region character for character.
//!
//! # Algorithm
//!
//! 1. If the rest of the text fits in `chunk_size`, emit it and stop.
//! 2. Otherwise look for a split point inside the window, preferring in
//!    order: paragraph break (`\n\n`), line break, sentence end (`. `,
//!    `! `, `? `), then any space.
//! 3. A split point is only accepted in the second half of the window and
//!    past the overlap region, so every step makes progress.
//! 4. With no acceptable boundary, hard-cut at the size limit.
//! 5. The next window starts `overlap` bytes before the split point.
//!
//! All byte offsets are snapped back to UTF-8 character boundaries.
//!
//! # Example
//!
//! ```rust
//! use ragchat_core::chunk::split_spans;
//!
//! let spans = split_spans("Hello world.\n\nSecond paragraph.", 1000, 100);
//! assert_eq!(spans, vec![(0, 31)]);
//! ```

use crate::models::{Chunk, Document};

/// Split points, best first. The split lands after the separator.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// Split a document into overlapping chunks.
///
/// Returns no chunks for empty or whitespace-only documents. Chunk ids
/// are `<document-id>-<index>`, so re-chunking the same document yields
/// the same ids.
pub fn chunk_document(doc: &Document, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    split_spans(&doc.text, chunk_size, overlap)
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Chunk {
            id: format!("{}-{}", doc.id, index),
            document_id: doc.id.clone(),
            text: doc.text[start..end].to_string(),
            category: doc.category.clone(),
            source_path: doc.source_path.clone(),
            sequence_index: index,
        })
        .collect()
}

/// Compute `(start, end)` byte ranges of each chunk in `text`.
///
/// `overlap` is clamped below `chunk_size`; configuration validation
/// rejects such values before they get here.
pub fn split_spans(text: &str, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        if text.len() - start <= chunk_size {
            spans.push((start, text.len()));
            break;
        }

        let hard_end = snap_to_char_boundary(text, start + chunk_size);
        // A single character wider than chunk_size still has to go somewhere.
        let hard_end = hard_end.max(next_char_boundary(text, start));

        let min_end = (start + overlap + 1).max(start + chunk_size / 2);
        let end = find_break(text, start, hard_end, min_end).unwrap_or(hard_end);
        spans.push((start, end));

        let next = snap_to_char_boundary(text, end.saturating_sub(overlap));
        start = if next > start { next } else { end };
    }

    spans
}

/// Find the best natural split point in `text[start..end]` at or after `min_end`.
fn find_break(text: &str, start: usize, end: usize, min_end: usize) -> Option<usize> {
    let window = &text[start..end];
    SEPARATORS.iter().find_map(|sep| {
        window
            .rfind(sep)
            .map(|pos| start + pos + sep.len())
            .filter(|&split| split >= min_end && split <= end)
    })
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .char_indices()
        .nth(1)
        .map(|(i, _)| index + i)
        .unwrap_or(s.len())
}
