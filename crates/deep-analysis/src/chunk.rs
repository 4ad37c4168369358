/// Sliding-window chunking: ~1500-character windows with ~200 characters of
/// overlap, split on char boundaries.
pub const CHUNK_SIZE: usize = 1500;
pub const CHUNK_OVERLAP: usize = 200;

pub fn chunk_text(text: &str) -> Vec<String> {
    chunk_with(text, CHUNK_SIZE, CHUNK_OVERLAP)
}

pub fn chunk_with(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= size {
        return vec![text.to_string()];
    }

    let stride = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("hello"), vec!["hello".to_string()]);
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let text = "abcdefghij".repeat(40); // 400 chars
        let chunks = chunk_with(&text, 100, 20);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev_tail: String = pair[0].chars().rev().take(20).collect();
            let next_head: String = pair[1].chars().take(20).collect();
            let prev_tail: String = prev_tail.chars().rev().collect();
            assert_eq!(prev_tail, next_head);
        }
    }

    #[test]
    fn final_chunk_reaches_end_of_text() {
        let text = "x".repeat(357);
        let chunks = chunk_with(&text, 100, 20);
        let last = chunks.last().unwrap();
        assert!(text.ends_with(last.as_str()));
    }
}
