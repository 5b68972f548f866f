//! Plan Command
//!
//! Dry run: show how a prompt would be chunked, without any network call.

use std::path::PathBuf;

use crate::ai::{ChunkPosition, ChunkingEngine, plan_dispatch};
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, read_input};
use crate::types::{ReportKind, Result};

const PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub user: PathBuf,
    pub system: Option<PathBuf>,
    pub kind: ReportKind,
    pub json: bool,
}

pub fn run(ctx: &CommandContext, options: PlanOptions) -> Result<()> {
    let user = read_input(&options.user)?;
    let system = match &options.system {
        Some(path) => read_input(path)?,
        None => String::new(),
    };

    let chunker = ChunkingEngine::new(ctx.config.chunk_token_budget());
    let plan = plan_dispatch(&chunker, &system, &user);
    let output = Output::new();

    if options.json {
        output.result(&serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    output.result(&format!(
        "Strategy: {:?}, ~{} tokens, budget {}, {} chunk(s), kind {}",
        plan.strategy,
        plan.estimated_tokens,
        plan.budget,
        plan.chunks.len(),
        options.kind
    ));

    let total = plan.chunks.len();
    for chunk in &plan.chunks {
        output.result(&format!(
            "  #{:<3} ~{:>6} tokens  {}",
            chunk.index + 1,
            chunk.estimated_tokens,
            preview(&chunk.content)
        ));
        if plan.is_chunked() {
            output.result(&format!(
                "        {}",
                ChunkPosition::of(chunk.index, total).instruction()
            ));
        }
    }
    if plan.is_chunked() {
        output.result(&format!("  Every chunk: {}", options.kind.chunk_instruction()));
    }
    Ok(())
}

/// First line of a chunk, shortened
fn preview(content: &str) -> String {
    let line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut shortened: String = line.chars().take(PREVIEW_CHARS).collect();
    if line.chars().count() > PREVIEW_CHARS {
        shortened.push('…');
    }
    shortened
}
