//! Splitting raw text into overlapping, bounded chunks.
//!
//! [`Chunker`] walks the text with a window of `max_chunk_size` characters.
//! Inside each window it cuts at the last paragraph break, else the last
//! sentence break, else the last whitespace, else hard at the window edge.
//! The next window starts up to `overlap_size` characters before the cut so
//! that answers spanning a boundary still appear whole in one chunk.
//!
//! All sizes are counted in characters; cuts never split a UTF-8 sequence.

use crate::config::RagConfig;
use crate::document::Chunk;
use crate::error::{RagError, Result};

/// Preferred cut points, strongest first.
const PARAGRAPH_SEPARATORS: &[&str] = &["\n\n"];
const SENTENCE_SEPARATORS: &[&str] = &[". ", "! ", "? ", "\n"];

/// Splits text into overlapping windows cut at natural boundaries.
///
/// # Example
///
/// ```rust
/// use spacemania_rag::Chunker;
///
/// let chunker = Chunker::new(40, 10)?;
/// let chunks = chunker.split("First paragraph here.\n\nSecond paragraph follows it.");
/// assert_eq!(chunks[0].text, "First paragraph here.\n\n");
/// # Ok::<(), spacemania_rag::RagError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chunk_size: usize,
    overlap_size: usize,
}

impl Chunker {
    /// Create a new `Chunker`.
    ///
    /// # Arguments
    ///
    /// * `max_chunk_size`: maximum number of characters per chunk
    /// * `overlap_size`: maximum number of characters shared by consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidChunkParameters`] if `max_chunk_size` is
    /// zero or `overlap_size >= max_chunk_size`.
    pub fn new(max_chunk_size: usize, overlap_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(RagError::InvalidChunkParameters(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap_size >= max_chunk_size {
            return Err(RagError::InvalidChunkParameters(format!(
                "overlap_size ({overlap_size}) must be less than max_chunk_size ({max_chunk_size})"
            )));
        }
        Ok(Self { max_chunk_size, overlap_size })
    }

    /// Create a chunker from the chunk settings of a [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Maximum chunk length in characters.
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Maximum overlap between consecutive chunks in characters.
    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    /// Lazily iterate over the chunks of `text`.
    ///
    /// The iterator is finite and can be cloned to restart from its current
    /// position; calling `chunks` again restarts from the beginning.
    pub fn chunks<'a>(&self, text: &'a str) -> ChunkIter<'a> {
        ChunkIter {
            text,
            max_chunk_size: self.max_chunk_size,
            overlap_size: self.overlap_size,
            start: 0,
            prev_end: 0,
            index: 0,
            finished: text.is_empty(),
        }
    }

    /// Collect all chunks of `text`.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        self.chunks(text).collect()
    }
}

/// Iterator over the chunks of one text, produced by [`Chunker::chunks`].
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    text: &'a str,
    max_chunk_size: usize,
    overlap_size: usize,
    start: usize,
    prev_end: usize,
    index: usize,
    finished: bool,
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.finished {
            return None;
        }

        let text = self.text;
        let start = self.start;
        let window_end = advance_chars(text, start, self.max_chunk_size);

        let end = if window_end >= text.len() {
            self.finished = true;
            text.len()
        } else {
            // Never cut inside the previous chunk, and keep chunks at least
            // half a window long.
            let floor = advance_chars(text, start, self.max_chunk_size / 2)
                .max(advance_chars(text, self.prev_end, 1));
            natural_cut(text, floor, window_end).unwrap_or(window_end)
        };

        let chunk = Chunk { index: self.index, text: text[start..end].to_string(), start, end };
        self.index += 1;
        self.prev_end = end;
        if !self.finished {
            self.start = next_start(text, start, end, self.overlap_size);
        }
        Some(chunk)
    }
}

impl std::iter::FusedIterator for ChunkIter<'_> {}

/// The byte offset of the best natural cut in `text[floor..ceiling]`.
fn natural_cut(text: &str, floor: usize, ceiling: usize) -> Option<usize> {
    let region = &text[floor..ceiling];
    last_separator_end(region, PARAGRAPH_SEPARATORS)
        .or_else(|| last_separator_end(region, SENTENCE_SEPARATORS))
        .or_else(|| {
            region
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8())
        })
        .map(|offset| floor + offset)
}

/// Offset just past the last occurrence of any separator in `region`.
fn last_separator_end(region: &str, separators: &[&str]) -> Option<usize> {
    separators.iter().filter_map(|sep| region.rfind(sep).map(|pos| pos + sep.len())).max()
}

/// Where the chunk after `start..end` begins.
fn next_start(text: &str, start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }

    let min_start = advance_chars(text, start, 1);
    let back = retreat_chars(text, end, overlap).max(min_start);

    let at_word_start = text[..back].chars().next_back().is_none_or(char::is_whitespace);
    if at_word_start {
        return back;
    }

    // Drop the partial word at the front of the overlap, if anything remains.
    match text[back..end].char_indices().find(|(_, c)| c.is_whitespace()) {
        Some((i, c)) if back + i + c.len_utf8() < end => back + i + c.len_utf8(),
        _ => back,
    }
}

/// Byte offset `n` characters after `from`, clamped to the end of `text`.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..].char_indices().nth(n).map(|(i, _)| from + i).unwrap_or(text.len())
}

/// Byte offset `n` characters before `from`, clamped to the start of `text`.
fn retreat_chars(text: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    text[..from].char_indices().rev().nth(n - 1).map(|(i, _)| i).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(Chunker::new(0, 0), Err(RagError::InvalidChunkParameters(_))));
        assert!(matches!(Chunker::new(10, 10), Err(RagError::InvalidChunkParameters(_))));
        assert!(matches!(Chunker::new(10, 20), Err(RagError::InvalidChunkParameters(_))));
        assert!(Chunker::new(10, 0).is_ok());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = Chunker::new(10_000, 1_000).unwrap();
        let chunks = chunker.split("The rocket's fuel capacity is 500 liters.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "The rocket's fuel capacity is 500 liters.");
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        let chunker = Chunker::new(100, 10).unwrap();
        assert!(chunker.split("").is_empty());
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let chunker = Chunker::new(40, 0).unwrap();
        let text = "First paragraph here.\n\nSecond paragraph follows it.";
        let chunks = chunker.split(text);
        assert_eq!(chunks[0].text, "First paragraph here.\n\n");
        assert_eq!(chunks[1].text, "Second paragraph follows it.");
    }

    #[test]
    fn falls_back_to_sentence_breaks() {
        let chunker = Chunker::new(30, 0).unwrap();
        let chunks = chunker.split("The engine fires. It burns fuel for hours on end.");
        assert_eq!(chunks[0].text, "The engine fires. ");
    }

    #[test]
    fn falls_back_to_hard_cut_without_boundaries() {
        let chunker = Chunker::new(4, 1).unwrap();
        let chunks = chunker.split("abcdefghij");
        assert!(chunks.iter().all(|c| c.char_len() <= 4));
        assert_eq!(chunks[0].text, "abcd");
        assert_eq!(chunks[1].text, "defg");
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let chunker = Chunker::new(20, 8).unwrap();
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunker.split(text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "expected overlap between {pair:?}");
            let shared = text[pair[1].start..pair[0].end].chars().count();
            assert!(shared <= 8);
        }
    }

    #[test]
    fn never_splits_multibyte_characters() {
        let chunker = Chunker::new(3, 1).unwrap();
        let text = "ロケットの燃料容量は五百リットルです";
        for chunk in chunker.chunks(text) {
            assert!(chunk.char_len() <= 3);
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn iterator_is_restartable() {
        let chunker = Chunker::new(12, 4).unwrap();
        let text = "one two three four five six seven";
        let mut iter = chunker.chunks(text);
        iter.next();
        let resumed: Vec<Chunk> = iter.clone().collect();
        assert_eq!(resumed, iter.collect::<Vec<_>>());
        assert_eq!(chunker.split(text), chunker.chunks(text).collect::<Vec<_>>());
    }
}
