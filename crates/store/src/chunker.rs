//! Document text chunking
//!
//! Splits document text into non-overlapping, bounded chunks. Offsets count
//! chars of the source text and bound the trimmed chunk text exactly, so
//! `source[start..end] == chunk.text` in char positions.

/// One document chunk before it is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
}

/// Split text into chunks of at most `max_chunk_chars` chars
///
/// Each window ends at the last sentence break (`. `, `! `, `? `, or a blank
/// line) in its second half, else at the last whitespace past its first
/// quarter, else at the window edge. Whitespace-only input yields no chunks.
pub fn split_document_into_chunks(text: &str, max_chunk_chars: usize) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let max = max_chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let window_end = (start + max).min(chars.len());
        let end = if window_end < chars.len() {
            find_break(&chars[start..window_end], max).map_or(window_end, |b| start + b)
        } else {
            window_end
        };

        if let Some(chunk) = trimmed_chunk(&chars, start, end) {
            chunks.push(chunk);
        }
        start = end;
    }

    chunks
}

/// Break position inside `window`, as an exclusive end in `1..window.len()`
fn find_break(window: &[char], max: usize) -> Option<usize> {
    let sentence_floor = (max / 2).max(1);
    let word_floor = (max / 4).max(1);

    let sentence = (sentence_floor..window.len()).rev().find(|&b| is_sentence_break(window, b));
    if sentence.is_some() {
        return sentence;
    }

    (word_floor..window.len()).rev().find(|&b| window[b].is_whitespace())
}

fn is_sentence_break(window: &[char], b: usize) -> bool {
    let prev = window[b - 1];
    let terminated = matches!(prev, '.' | '!' | '?') && window[b] == ' ';
    let paragraph = b >= 2 && prev == '\n' && window[b - 2] == '\n';
    terminated || paragraph
}

fn trimmed_chunk(chars: &[char], start: usize, end: usize) -> Option<TextChunk> {
    let slice = &chars[start..end];
    let lead = slice.iter().take_while(|c| c.is_whitespace()).count();
    if lead == slice.len() {
        return None;
    }
    let trail = slice.iter().rev().take_while(|c| c.is_whitespace()).count();

    let start_offset = start + lead;
    let end_offset = end - trail;
    Some(TextChunk { start_offset, end_offset, text: chars[start_offset..end_offset].iter().collect() })
}
