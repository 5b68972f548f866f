//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Token estimation constants
pub mod tokens {
    /// Average characters per token for English prose
    pub const CHARS_PER_TOKEN: usize = 4;

    /// Multiplier applied when text contains JSON structure markers.
    ///
    /// Heuristic; tune freely, nothing depends on the exact value.
    pub const JSON_PENALTY: f64 = 1.2;
}

/// Chunking constants
pub mod chunking {
    /// Share of the per-request input ceiling usable by one chunk.
    /// The rest is headroom for the system prompt and the response.
    pub const DEFAULT_BUDGET_RATIO: f64 = 0.7;

    /// Default per-request input-token ceiling of the completion service
    pub const DEFAULT_MAX_INPUT_TOKENS: usize = 32_000;

    /// Prefix for free-text chunks after the first
    pub const TEXT_CONTEXT_PREFIX: &str = "Continuation of a larger analysis request. \
        Earlier parts of the data were sent separately; keep the same goal and \
        output format for this part.\n\n";

    /// Prefix for record batches after the first
    pub const RECORDS_CONTEXT_PREFIX: &str =
        "The following records continue the dataset from previous chunks:\n";

    /// Largest share of the chunk budget the text around a record array may
    /// take before the prompt is split as free text instead
    pub const MAX_RECORD_FRAMING_RATIO: f64 = 0.5;
}

/// Rate limiting constants
pub mod rate_limit {
    /// Default number of requests allowed per window
    pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 10;

    /// Rate window length (seconds)
    pub const WINDOW_SECS: u64 = 60;

    /// Fixed delay after every dispatch (milliseconds)
    pub const MIN_INTERVAL_MS: u64 = 1_000;
}

/// Response cache constants
pub mod cache {
    /// Entry time-to-live (seconds)
    pub const TTL_SECS: u64 = 3_600;
}

/// Completion service constants
pub mod network {
    /// Default OpenAI-compatible API base
    pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

    /// Default model identifier
    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

    /// Default maximum output tokens
    pub const DEFAULT_MAX_TOKENS: usize = 4_096;

    /// Default sampling temperature
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;

    /// HTTP client timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
}

/// Result combination constants
pub mod combine {
    /// Separator used when chunk results are joined as text
    pub const TEXT_SEPARATOR: &str = "\n\n---\n\n";

    /// Record field used to deduplicate record-list reports
    pub const RECORD_KEY_FIELD: &str = "url";

    /// Array fields merged for insight-list reports
    pub const INSIGHT_FIELDS: [&str; 2] = ["insights", "recommendations"];
}

/// Progress channel capacity
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;
