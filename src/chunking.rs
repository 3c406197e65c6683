/// Default upper bound on a chunk's length, in characters
pub const DEFAULT_MAX_CHARS: usize = 500;

/// Split text into consecutive chunks of at most `max_chars` characters
///
/// The chunks partition the input: joined back together in order they are
/// exactly `text`. Lengths are counted in chars, so a cut never lands inside
/// a multi-byte code point. Empty input yields no chunks.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);

    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::with_capacity(text.len() / max_chars + 1);
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }

    chunks.push(&text[start..]);
    chunks
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
