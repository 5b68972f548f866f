//! Complete Command
//!
//! Send a prompt through the orchestrator and print the result.
//!
//! Usage:
//!   rankrelay complete --system system.txt --user rows.txt --kind record-list
//!   cat rows.txt | rankrelay complete --system system.txt --user - --json

use std::path::PathBuf;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::ai::{RequestOrchestrator, parse_json_content, with_optional_timeout};
use crate::cli::progress::ConsoleRenderer;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, read_inputs};
use crate::types::{PromptRequest, RelayError, ReportKind, Result};

#[derive(Debug, Clone)]
pub struct CompleteOptions {
    pub system: PathBuf,
    pub user: PathBuf,
    pub kind: ReportKind,
    pub no_cache: bool,
    /// Require a JSON result and pretty-print it
    pub json: bool,
    pub timeout_secs: Option<u64>,
    pub quiet: bool,
}

pub fn run(ctx: &CommandContext, options: CompleteOptions) -> Result<()> {
    let inputs = read_inputs(&[&options.system, &options.user])?;
    let [system, user] = <[String; 2]>::try_from(inputs)
        .map_err(|_| RelayError::config("Expected system and user prompts"))?;

    let request = PromptRequest::new(system, user, options.kind)
        .with_cache(!options.no_cache && ctx.config.cache.enabled);

    let orchestrator = RequestOrchestrator::from_config(&ctx.config)?;
    let output = Output::quiet(options.quiet);
    let timeout = options.timeout_secs.map(Duration::from_secs);

    let rt = Runtime::new()?;
    let report = rt.block_on(async {
        let renderer = (!options.quiet)
            .then(|| ConsoleRenderer::new(orchestrator.subscribe()).start_render_loop());

        let result =
            with_optional_timeout(timeout, orchestrator.execute(&request), "completion").await;

        if let Some(handle) = renderer {
            // Let queued lines flush before stopping the renderer
            tokio::task::yield_now().await;
            handle.abort();
        }
        result
    })?;

    info!(
        chunks = report.chunks.len(),
        from_cache = report.from_cache,
        "Completion finished"
    );

    if report.is_partial() {
        output.warning(&format!(
            "{} of {} chunks failed; showing partial result",
            report.failed_chunks(),
            report.chunks.len()
        ));
    }

    if options.json {
        let value = parse_json_content(&report.content)?;
        output.result(&serde_json::to_string_pretty(&value)?);
    } else {
        output.result(&report.content);
    }

    let summary = orchestrator.metrics().summary();
    debug!("\n{}", summary.display());
    Ok(())
}
