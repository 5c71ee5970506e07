//! Streaming sentence segmentation and text normalization.

/// Characters that terminate a sentence, CJK and ASCII forms both honored.
const SPLIT_CHARS: &[char] = &[
    '。', '！', '？', '.', '!', '?', '；', ';', '：', ':', '，', ',', '、',
];

/// Split `text` into delimiter-terminated pieces, retaining the delimiter
/// with the preceding piece. A trailing remainder with no delimiter is
/// included as the final piece. Empty pieces (after trim) are dropped.
fn split_into_pieces(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if SPLIT_CHARS.contains(&c) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                pieces.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        pieces.push(trimmed.to_string());
    }
    pieces
}

/// Split complete text into sentences (ground truth for property testing
/// against [`segment_sentences`] applied incrementally).
#[must_use]
pub fn split_into_sentences(text: &str) -> Vec<String> {
    split_into_pieces(text)
}

fn ends_with_split_char(text: &str) -> bool {
    text.trim_end().chars().last().is_some_and(|c| SPLIT_CHARS.contains(&c))
}

/// Accumulate streaming text and emit complete sentences on punctuation
/// boundaries. `buffer` carries the trailing incomplete piece across calls.
#[must_use]
pub fn segment_sentences(chunk: &str, buffer: &str) -> (Vec<String>, String) {
    let full = format!("{buffer}{chunk}");

    if !full.chars().any(|c| SPLIT_CHARS.contains(&c)) {
        return (Vec::new(), full);
    }

    let pieces = split_into_pieces(&full);

    if ends_with_split_char(&full) {
        return (pieces, String::new());
    }

    match pieces.split_last() {
        Some((last, complete)) => (complete.to_vec(), last.clone()),
        None => (Vec::new(), full),
    }
}

/// Collapse runs of whitespace to a single space and trim. Idempotent.
#[must_use]
pub fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_delimiter_buffers_whole_chunk() {
        let (complete, buffer) = segment_sentences("hello there", "");
        assert!(complete.is_empty());
        assert_eq!(buffer, "hello there");
    }

    #[test]
    fn delimiter_emits_complete_sentence() {
        let (complete, buffer) = segment_sentences("Hi there. How are you", "");
        assert_eq!(complete, vec!["Hi there."]);
        assert_eq!(buffer, "How are you");
    }

    #[test]
    fn trailing_delimiter_flushes_buffer() {
        let (complete, buffer) = segment_sentences("Hi there. How are you?", "");
        assert_eq!(complete, vec!["Hi there.", "How are you?"]);
        assert_eq!(buffer, "");
    }

    #[test]
    fn buffer_threads_across_calls() {
        let (complete1, buffer1) = segment_sentences("Hi ", "");
        assert!(complete1.is_empty());
        let (complete2, buffer2) = segment_sentences("there. How are", &buffer1);
        assert_eq!(complete2, vec!["Hi there."]);
        assert_eq!(buffer2, "How are");
    }

    #[test]
    fn no_empty_sentences_emitted() {
        let (complete, buffer) = segment_sentences("...", "");
        assert!(complete.iter().all(|s| !s.is_empty()));
        assert_eq!(buffer, "");
    }

    #[test]
    fn clean_collapses_whitespace() {
        assert_eq!(clean("  hello   world  "), "hello world");
    }

    #[test]
    fn clean_is_idempotent() {
        let t = "  hello \n world\t again  ";
        assert_eq!(clean(clean(t).as_str()), clean(t));
    }
}
