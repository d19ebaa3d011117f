//! Overlapping word-window text chunker.
//!
//! Splits document text into [`TextWindow`]s of at most `window_words`
//! words. Consecutive windows share `overlap_words` words so that facts
//! straddling a boundary are seen whole by at least one generation call.
//!
//! # Algorithm
//!
//! 1. Record the byte span of every whitespace-separated word.
//! 2. If the whole sequence fits in one window, return the input unchanged
//!    as a single window.
//! 3. Otherwise advance the window start by `window_words - overlap_words`
//!    (clamped to at least 1, so an overlap that is too large still makes
//!    forward progress) until a window reaches the final word. Each window's
//!    text is the source slice from its first word to its last, so line
//!    breaks inside a window are preserved.
//!
//! # Example
//!
//! ```rust
//! use docgraph_core::chunk::chunk_words;
//!
//! let windows = chunk_words("one two three four five", 3, 1);
//! assert_eq!(windows.len(), 2);
//! assert_eq!(windows[0].text, "one two three");
//! assert_eq!(windows[1].text, "three four five");
//! ```

use uuid::Uuid;

use crate::models::{Segment, SegmentStatus};

/// One window over a document's word sequence.
///
/// `word_start..word_end` is a half-open range into the whitespace-split
/// words of the source text. `text` is the matching slice of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub index: usize,
    pub text: String,
    pub word_start: usize,
    pub word_end: usize,
    pub word_count: usize,
}

/// Split text into overlapping word windows.
///
/// Returns windows with contiguous indices starting at 0. Returns no
/// windows for empty or whitespace-only input. A `window_words` of 0 is
/// treated as 1.
pub fn chunk_words(text: &str, window_words: usize, overlap_words: usize) -> Vec<TextWindow> {
    let words = word_spans(text);
    if words.is_empty() {
        return Vec::new();
    }

    let window = window_words.max(1);
    if words.len() <= window {
        return vec![TextWindow {
            index: 0,
            text: text.to_string(),
            word_start: 0,
            word_end: words.len(),
            word_count: words.len(),
        }];
    }
    let step = window.saturating_sub(overlap_words).max(1);

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window).min(words.len());
        windows.push(TextWindow {
            index: windows.len(),
            text: text[words[start].0..words[end - 1].1].to_string(),
            word_start: start,
            word_end: end,
            word_count: end - start,
        });
        if end == words.len() {
            break;
        }
        start += step;
    }

    windows
}

/// Byte ranges of the whitespace-separated words in `text`.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<usize> = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), current) {
            (true, Some(start)) => {
                spans.push((start, i));
                current = None;
            }
            (false, None) => current = Some(i),
            _ => {}
        }
    }
    if let Some(start) = current {
        spans.push((start, text.len()));
    }
    spans
}

/// Build pending [`Segment`] rows for a document from its windows.
pub fn segments_for_document(document_id: &str, windows: &[TextWindow]) -> Vec<Segment> {
    windows
        .iter()
        .map(|w| Segment {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            index: w.index as i64,
            text: w.text.clone(),
            word_start: w.word_start as i64,
            word_end: w.word_end as i64,
            word_count: w.word_count as i64,
            status: SegmentStatus::Pending,
            error_message: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_text_single_window() {
        let windows = chunk_words("Hello, world!", 700, 80);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].index, 0);
        assert_eq!(windows[0].text, "Hello, world!");
        assert_eq!(windows[0].word_count, 2);
    }

    #[test]
    fn test_single_window_keeps_input_verbatim() {
        let text = "id,name\nA-1,Main account\nA-2,Savings\n";
        let windows = chunk_words(text, 800, 100);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].text, text);
        assert_eq!(windows[0].word_count, 4);
    }

    #[test]
    fn test_windows_preserve_line_breaks() {
        let text = "id,name\nA-1,Main  account\nA-2,Savings\nA-3,Brokerage";
        let windows = chunk_words(text, 3, 1);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].text, "id,name\nA-1,Main  account");
        assert_eq!(windows[1].text, "account\nA-2,Savings\nA-3,Brokerage");
    }

    #[test]
    fn test_word_spans_handle_multibyte_text() {
        let text = " caf\u{e9}\u{3000}na\u{ef}ve \n";
        let spans = word_spans(text);
        let words: Vec<&str> = spans.iter().map(|&(a, b)| &text[a..b]).collect();
        assert_eq!(words, text.split_whitespace().collect::<Vec<_>>());
    }

    #[test]
    fn test_exact_fit_is_single_window() {
        let text = numbered_words(10);
        let windows = chunk_words(&text, 10, 3);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].text, text);
    }

    #[test]
    fn test_empty_and_whitespace_yield_nothing() {
        assert!(chunk_words("", 10, 2).is_empty());
        assert!(chunk_words("   \n\t  ", 10, 2).is_empty());
    }

    #[test]
    fn test_windows_overlap_by_requested_amount() {
        let text = numbered_words(25);
        let windows = chunk_words(&text, 10, 3);
        for pair in windows.windows(2) {
            assert_eq!(pair[1].word_start, pair[0].word_start + 7);
            assert_eq!(pair[0].word_end - pair[1].word_start, 3);
        }
    }

    #[test]
    fn test_windows_cover_every_word_without_gaps() {
        for (n, window, overlap) in [(1, 1, 0), (37, 10, 3), (100, 7, 6), (50, 5, 0), (64, 8, 20)] {
            let text = numbered_words(n);
            let windows = chunk_words(&text, window, overlap);
            assert_eq!(windows[0].word_start, 0);
            assert_eq!(windows.last().unwrap().word_end, n);
            for pair in windows.windows(2) {
                assert!(
                    pair[1].word_start <= pair[0].word_end,
                    "gap between windows {} and {}",
                    pair[0].index,
                    pair[1].index
                );
                assert!(pair[1].word_start > pair[0].word_start);
            }
        }
    }

    #[test]
    fn test_overlap_larger_than_window_still_progresses() {
        let text = numbered_words(12);
        let windows = chunk_words(&text, 4, 9);
        assert_eq!(windows.len(), 9);
        for pair in windows.windows(2) {
            assert_eq!(pair[1].word_start, pair[0].word_start + 1);
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let text = numbered_words(200);
        let windows = chunk_words(&text, 15, 5);
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_segments_for_document() {
        let windows = chunk_words(&numbered_words(30), 10, 0);
        let segments = segments_for_document("doc1", &windows);
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.status == SegmentStatus::Pending));
        assert_eq!(segments[2].word_start, 20);
        assert_eq!(segments[2].document_id, "doc1");
    }
}
