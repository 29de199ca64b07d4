//! Word-window chunking of page content before embedding.

/// Split text into consecutive windows of at most `chunk_size_words` words.
///
/// Whitespace is normalized in the process. Empty or whitespace-only input
/// yields no chunks.
pub fn chunk_words(text: &str, chunk_size_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || chunk_size_words == 0 {
        return Vec::new();
    }
    words
        .chunks(chunk_size_words)
        .map(|window| window.join(" "))
        .collect()
}
