pub mod error;

pub use error::{RelayError, Result};

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Report Kind
// =============================================================================

/// Shape family of a report, which decides how chunked results recombine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    /// Page-level tables: arrays of records keyed by URL
    RecordList,
    /// Keyword or volatility analyses: lists of observations and recommendations
    #[default]
    InsightList,
}

impl ReportKind {
    /// Short instruction appended to every chunk's system prompt
    pub fn chunk_instruction(&self) -> &'static str {
        match self {
            ReportKind::RecordList => {
                "Analyze the pages in this chunk individually and return one entry per page."
            }
            ReportKind::InsightList => {
                "Report insights and recommendations supported by the data in this chunk."
            }
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportKind::RecordList => write!(f, "record-list"),
            ReportKind::InsightList => write!(f, "insight-list"),
        }
    }
}

impl std::str::FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "record-list" | "records" => Ok(ReportKind::RecordList),
            "insight-list" | "insights" => Ok(ReportKind::InsightList),
            _ => Err(format!(
                "Unknown report kind: {}. Valid values: record-list, insight-list",
                s
            )),
        }
    }
}

// =============================================================================
// Prompt Request
// =============================================================================

/// One logical completion request as submitted by the report layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub use_cache: bool,
    pub report_kind: ReportKind,
}

impl PromptRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        report_kind: ReportKind,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            use_cache: true,
            report_kind,
        }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }
}

// =============================================================================
// Chunks
// =============================================================================

/// A bounded-size fragment of an oversized prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// 0-based, dense position among siblings
    pub index: usize,
    pub content: String,
    pub estimated_tokens: usize,
}

/// Outcome of dispatching one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkResult {
    pub index: usize,
    /// Response text, or a placeholder describing the failure
    pub content: String,
    pub tokens: usize,
    pub failed: bool,
}

impl ChunkResult {
    pub fn success(index: usize, content: impl Into<String>, tokens: usize) -> Self {
        Self {
            index,
            content: content.into(),
            tokens,
            failed: false,
        }
    }

    pub fn failure(index: usize, error: &RelayError) -> Self {
        Self {
            index,
            content: format!("[Chunk {} failed: {}]", index + 1, error),
            tokens: 0,
            failed: true,
        }
    }
}
