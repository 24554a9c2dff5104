//! Packs document chunks into extraction batches.

use crate::types::extraction::DocumentChunk;

/// Rough token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Concatenate chunks, in position order, into texts of at most
/// `token_budget` estimated tokens. A chunk larger than the budget forms a
/// batch of its own.
pub fn pack_chunks(chunks: &[DocumentChunk], token_budget: usize) -> Vec<String> {
    let mut ordered: Vec<&DocumentChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.position);

    let mut batches = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    for chunk in ordered {
        let text = chunk.content.trim();
        if text.is_empty() {
            continue;
        }
        let tokens = estimate_tokens(text);
        if !current.is_empty() && current_tokens + tokens > token_budget {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(text);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(position: usize, len: usize) -> DocumentChunk {
        DocumentChunk::new("d1", position, "x".repeat(len))
    }

    #[test]
    fn test_packs_in_position_order() {
        let chunks = vec![
            DocumentChunk::new("d1", 1, "second"),
            DocumentChunk::new("d1", 0, "first"),
        ];
        assert_eq!(pack_chunks(&chunks, 100), vec!["first\n\nsecond".to_string()]);
    }

    #[test]
    fn test_budget_splits_batches() {
        // 40 chars = 10 tokens each
        let chunks: Vec<_> = (0..5).map(|i| chunk(i, 40)).collect();
        let batches = pack_chunks(&chunks, 25);
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn test_oversized_chunk_alone_and_blank_skipped() {
        let chunks = vec![chunk(0, 400), DocumentChunk::new("d1", 1, "   "), chunk(2, 4)];
        let batches = pack_chunks(&chunks, 10);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 400);
    }
}
