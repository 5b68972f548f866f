//! Estimate Command
//!
//! Print the token estimate of a prompt and whether it would be split.

use std::path::Path;

use crate::ai::TokenEstimator;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, read_input};
use crate::types::Result;

pub fn run(ctx: &CommandContext, input: &Path, as_json: bool) -> Result<()> {
    let text = read_input(input)?;
    let estimator = TokenEstimator::default();
    let tokens = estimator.estimate(&text);
    let budget = ctx.config.chunk_token_budget();
    let fits = tokens <= budget;

    let output = Output::new();
    if as_json {
        let value = serde_json::json!({
            "characters": text.chars().count(),
            "structured": TokenEstimator::looks_structured(&text),
            "estimated_tokens": tokens,
            "budget": budget,
            "single_request": fits,
        });
        output.result(&serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    output.result(&format!("Characters:       {}", text.chars().count()));
    output.result(&format!("Estimated tokens: {}", tokens));
    output.result(&format!(
        "Budget:           {} ({} x {})",
        budget, ctx.config.llm.max_input_tokens, ctx.config.chunking.budget_ratio
    ));
    if fits {
        output.result("Dispatch:         single request");
    } else {
        output.result(&format!(
            "Dispatch:         chunked (about {} chunks)",
            tokens.div_ceil(budget.max(1))
        ));
    }
    Ok(())
}
