//! Console Progress Rendering
//!
//! Renders orchestrator progress events on stderr while a request runs, so
//! stdout carries only the result.

use std::time::Instant;

use console::style;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::ai::ProgressEvent;

/// Console progress renderer
pub struct ConsoleRenderer {
    events: broadcast::Receiver<ProgressEvent>,
    start_time: Instant,
}

impl ConsoleRenderer {
    pub fn new(events: broadcast::Receiver<ProgressEvent>) -> Self {
        Self {
            events,
            start_time: Instant::now(),
        }
    }

    /// Start rendering loop (non-blocking). Abort the handle when done.
    pub fn start_render_loop(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.events.recv().await {
                    Ok(event) => {
                        let elapsed = self.start_time.elapsed().as_secs();
                        if let Some(line) = render_event(&event, elapsed) {
                            eprintln!("{}", line);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        let note = format!("({} progress events skipped)", skipped);
                        eprintln!("{}", style(note).dim());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// One console line per event worth showing
pub fn render_event(event: &ProgressEvent, elapsed_secs: u64) -> Option<String> {
    let elapsed = style(format_duration(elapsed_secs)).dim();
    match event {
        ProgressEvent::CacheHit { .. } => {
            Some(format!("{} Served from cache {}", style("●").cyan(), elapsed))
        }
        ProgressEvent::Planned {
            chunks,
            estimated_tokens,
            ..
        } if *chunks > 1 => Some(format!(
            "{} ~{} tokens, splitting into {} chunks",
            style("ℹ").blue(),
            estimated_tokens,
            chunks
        )),
        ProgressEvent::Planned { .. } => None,
        ProgressEvent::ChunkStarted { .. } => None,
        ProgressEvent::ChunkFinished {
            index,
            total,
            failed,
            ..
        } => {
            let mark = if *failed {
                style("✗").red()
            } else {
                style("✓").green()
            };
            Some(format!(
                "{} {} {}/{} {}",
                mark,
                render_progress_bar(index + 1, *total, 20),
                index + 1,
                total,
                elapsed
            ))
        }
        ProgressEvent::Completed {
            chunks,
            failed_chunks,
            ..
        } if *failed_chunks > 0 => Some(format!(
            "{} {} of {} chunks failed; result is partial",
            style("⚠").yellow(),
            failed_chunks,
            chunks
        )),
        ProgressEvent::Completed { .. } => None,
        ProgressEvent::Failed { error, .. } => {
            Some(format!("{} {} {}", style("✗").red(), error, elapsed))
        }
    }
}

/// Render a simple progress bar
fn render_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}]", " ".repeat(width));
    }

    let progress = (completed as f32 / total as f32).min(1.0);
    let filled = (progress * width as f32) as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format duration as human-readable string
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_render() {
        assert_eq!(render_progress_bar(0, 10, 10), "[░░░░░░░░░░]");
        assert_eq!(render_progress_bar(5, 10, 10), "[█████░░░░░]");
        assert_eq!(render_progress_bar(10, 10, 10), "[██████████]");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3700), "1h 1m");
    }

    #[test]
    fn test_render_event() {
        let single = ProgressEvent::Planned {
            request_id: 0,
            chunks: 1,
            estimated_tokens: 10,
        };
        assert!(render_event(&single, 0).is_none());

        let split = ProgressEvent::Planned {
            request_id: 0,
            chunks: 3,
            estimated_tokens: 50_000,
        };
        assert!(render_event(&split, 0).unwrap().contains("3 chunks"));

        let finished = ProgressEvent::ChunkFinished {
            request_id: 0,
            index: 1,
            total: 3,
            failed: false,
        };
        assert!(render_event(&finished, 2).unwrap().contains("2/3"));
    }
}
