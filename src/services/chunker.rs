use crate::models::{Chunk, Paragraph};
use crate::services::tokens::TokenCount;

/// Groups paragraphs, in order, into chunks of at most `budget` tokens.
///
/// A paragraph is never split. One that alone exceeds the budget becomes
/// its own chunk.
pub fn chunk_paragraphs(
    paragraphs: &[Paragraph],
    budget: usize,
    counter: &dyn TokenCount,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<Paragraph> = Vec::new();
    let mut current_tokens = 0;

    for paragraph in paragraphs {
        let tokens = counter.count(paragraph.as_str());

        if !current.is_empty() && current_tokens + tokens > budget {
            chunks.push(Chunk {
                paragraphs: std::mem::take(&mut current),
                tokens: current_tokens,
            });
            current_tokens = 0;
        }

        current.push(paragraph.clone());
        current_tokens += tokens;
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            paragraphs: current,
            tokens: current_tokens,
        });
    }

    chunks
}
