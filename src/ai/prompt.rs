//! Chunk Prompt Augmentation
//!
//! Every chunk of a split request is sent to a reader with no memory of its
//! siblings, so its system prompt is extended with the chunk's position and
//! a report-specific reminder.

use crate::types::ReportKind;

/// Where a chunk sits among its siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPosition {
    Only,
    First,
    Middle,
    Last,
}

impl ChunkPosition {
    pub fn of(index: usize, total: usize) -> Self {
        match (index, total) {
            (_, 0 | 1) => ChunkPosition::Only,
            (0, _) => ChunkPosition::First,
            (i, t) if i + 1 >= t => ChunkPosition::Last,
            _ => ChunkPosition::Middle,
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            ChunkPosition::Only => "This part contains the whole dataset; analyze it completely.",
            ChunkPosition::First => {
                "This is the first part. Focus on the beginning of the data; later parts follow."
            }
            ChunkPosition::Middle => {
                "Continue from previous chunks, keeping the same structure and criteria."
            }
            ChunkPosition::Last => {
                "This is the final part. Complete and summarize the analysis for this data."
            }
        }
    }
}

/// System prompt for chunk `index` (0-based) of `total`
pub fn chunk_system_prompt(
    system_prompt: &str,
    index: usize,
    total: usize,
    kind: ReportKind,
) -> String {
    let position = ChunkPosition::of(index, total);
    format!(
        "{}\n\n## Chunked Request\n\nYou are processing part {} of {}.\n{}\n{}",
        system_prompt.trim_end(),
        index + 1,
        total.max(1),
        position.instruction(),
        kind.chunk_instruction()
    )
}
