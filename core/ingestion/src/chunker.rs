/// Maximum characters per embedded chunk.
pub const CHUNK_SIZE: usize = 500;

/// Split text into contiguous, non-overlapping slices of at most `size`
/// characters. Words may be split; concatenating the chunks gives back the
/// input exactly.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(text.len() / size + 1);
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == size {
            chunks.push(text[start..offset].to_string());
            start = offset;
            count = 0;
        }
        count += 1;
    }

    if count > 0 {
        chunks.push(text[start..].to_string());
    }

    chunks
}

/// The first `max` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count_and_lengths() {
        for len in [1usize, 499, 500, 501, 1000, 1234] {
            let text = "x".repeat(len);
            let chunks = chunk_text(&text, CHUNK_SIZE);

            assert_eq!(chunks.len(), (len + CHUNK_SIZE - 1) / CHUNK_SIZE, "len {}", len);
            for chunk in &chunks[..chunks.len() - 1] {
                assert_eq!(chunk.chars().count(), CHUNK_SIZE);
            }
            assert!(chunks.last().unwrap().chars().count() <= CHUNK_SIZE);
            assert_eq!(chunks.concat(), text);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_text("", CHUNK_SIZE).is_empty());
    }

    #[test]
    fn test_splits_words_without_boundary_awareness() {
        let chunks = chunk_text("hello world", 4);
        assert_eq!(chunks, vec!["hell", "o wo", "rld"]);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("añb", 2), "añ");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "héllo wörld ✓✓✓";
        let chunks = chunk_text(text, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "héllo");
        assert_eq!(chunks.concat(), text);
    }
}
