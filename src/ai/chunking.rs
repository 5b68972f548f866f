//! Prompt Chunking
//!
//! Splits an oversized prompt into an ordered sequence of bounded-size chunks.
//!
//! ## Algorithms
//!
//! - **Free text**: a delimiter cascade (sentence → paragraph → line → whitespace)
//!   re-splits only the segments still over budget, then consecutive segments are
//!   packed greedily. Only a single unsplittable segment may exceed the budget.
//! - **Record lists**: records are costed individually and packed greedily into
//!   batches serialized as JSON arrays. A batch always holds at least one record,
//!   so nothing is ever dropped.
//!
//! Every chunk after the first is prefixed with a caller-supplied context prefix.
//! The budget applies to chunk content, not to the prefix.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::tokenizer::TokenEstimator;
use crate::types::Chunk;

static SENTENCE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?]+["')\]]*\s+"#).expect("Failed to compile sentence boundary pattern")
});

/// Split levels, coarsest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Sentence,
    Paragraph,
    Line,
    Whitespace,
}

impl Delimiter {
    const CASCADE: [Delimiter; 4] = [
        Delimiter::Sentence,
        Delimiter::Paragraph,
        Delimiter::Line,
        Delimiter::Whitespace,
    ];

    /// Split keeping delimiters attached, so concatenating the pieces restores the input
    fn split(self, text: &str) -> Vec<&str> {
        match self {
            Delimiter::Sentence => {
                split_at_ends(text, SENTENCE_BOUNDARY.find_iter(text).map(|m| m.end()))
            }
            Delimiter::Paragraph => text.split_inclusive("\n\n").collect(),
            Delimiter::Line => text.split_inclusive('\n').collect(),
            Delimiter::Whitespace => text.split_inclusive(char::is_whitespace).collect(),
        }
    }
}

fn split_at_ends(text: &str, ends: impl Iterator<Item = usize>) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for end in ends {
        if end > start {
            pieces.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

// =============================================================================
// Embedded Record Payload
// =============================================================================

/// A prompt that embeds a JSON array of records
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPayload<'a> {
    /// Text before the array
    pub lead: &'a str,
    pub records: Vec<Value>,
    /// Text after the array
    pub tail: &'a str,
}

/// Find the largest bracketed JSON array of objects embedded in `text`.
///
/// Returns `None` when the prompt carries no such payload and should be
/// treated as free text.
pub fn find_record_payload(text: &str) -> Option<RecordPayload<'_>> {
    let mut best: Option<(usize, usize, Vec<Value>)> = None;
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('[') {
        let start = search_from + offset;

        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Array(items)))
                if !items.is_empty() && items.iter().all(Value::is_object) =>
            {
                let end = start + stream.byte_offset();
                if best.as_ref().is_none_or(|(s, e, _)| end - start > e - s) {
                    best = Some((start, end, items));
                }
                search_from = end;
            }
            // Scalars cannot hide a record array; skip the whole span
            Some(Ok(Value::Array(items)))
                if !items.iter().any(|v| v.is_array() || v.is_object()) =>
            {
                search_from = start + stream.byte_offset();
            }
            _ => search_from = start + 1,
        }

        if search_from >= text.len() {
            break;
        }
    }

    best.map(|(start, end, records)| RecordPayload {
        lead: &text[..start],
        records,
        tail: &text[end..],
    })
}

// =============================================================================
// Chunking Engine
// =============================================================================

/// Splits content into chunks that fit a per-chunk token budget
#[derive(Debug, Clone)]
pub struct ChunkingEngine {
    estimator: TokenEstimator,
    max_tokens_per_chunk: usize,
}

impl ChunkingEngine {
    pub fn new(max_tokens_per_chunk: usize) -> Self {
        Self::with_estimator(max_tokens_per_chunk, TokenEstimator::default())
    }

    pub fn with_estimator(max_tokens_per_chunk: usize, estimator: TokenEstimator) -> Self {
        Self {
            estimator,
            max_tokens_per_chunk: max_tokens_per_chunk.max(1),
        }
    }

    pub fn max_tokens_per_chunk(&self) -> usize {
        self.max_tokens_per_chunk
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    fn fits(&self, text: &str) -> bool {
        self.estimator.fits_budget(text, self.max_tokens_per_chunk)
    }

    // -------------------------------------------------------------------------
    // Free Text
    // -------------------------------------------------------------------------

    /// Split free text into chunks.
    ///
    /// Never fails; non-empty input yields at least one chunk.
    pub fn split_text(&self, text: &str, context_prefix: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let segments = self.segment(text);
        let mut packer = TextPacker::new(self, context_prefix);
        for segment in &segments {
            packer.push(segment);
        }
        let mut chunks = packer.finish();

        if chunks.is_empty() {
            // Whitespace-only input: pass it through untouched
            chunks.push(Chunk {
                index: 0,
                content: text.to_string(),
                estimated_tokens: self.estimator.estimate(text),
            });
        }

        debug!(
            "Split {} chars of text into {} chunks ({} segments, budget {})",
            text.len(),
            chunks.len(),
            segments.len(),
            self.max_tokens_per_chunk
        );
        chunks
    }

    /// Apply the delimiter cascade, re-splitting only oversized segments
    fn segment<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut segments = vec![text];

        for delimiter in Delimiter::CASCADE {
            if segments.iter().all(|s| self.fits(s)) {
                break;
            }
            segments = segments
                .into_iter()
                .flat_map(|segment| {
                    if self.fits(segment) {
                        vec![segment]
                    } else {
                        delimiter.split(segment)
                    }
                })
                .collect();
        }

        segments
    }

    // -------------------------------------------------------------------------
    // Record Lists
    // -------------------------------------------------------------------------

    /// Group records into consecutive batches within budget.
    ///
    /// Every record lands in exactly one batch, in order. A record larger than
    /// the budget gets a batch of its own.
    pub fn batch_records<'a>(&self, records: &'a [Value]) -> Vec<&'a [Value]> {
        let mut batches = Vec::new();
        let mut batch_start = 0;
        let mut used = 0;

        for (i, record) in records.iter().enumerate() {
            // +1 for the separating comma
            let cost = self.estimator.estimate(&record.to_string()) + 1;
            if i > batch_start && used + cost > self.max_tokens_per_chunk {
                batches.push(&records[batch_start..i]);
                batch_start = i;
                used = 0;
            }
            used += cost;
        }

        if batch_start < records.len() {
            batches.push(&records[batch_start..]);
        }

        batches
    }

    /// Split a record list into chunks, each a JSON array of records
    pub fn split_records(&self, records: &[Value], context_prefix: &str) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = self
            .batch_records(records)
            .into_iter()
            .enumerate()
            .map(|(index, batch)| {
                let body = Value::Array(batch.to_vec()).to_string();
                let content = if index == 0 {
                    body
                } else {
                    format!("{}{}", context_prefix, body)
                };
                Chunk {
                    index,
                    estimated_tokens: self.estimator.estimate(&content),
                    content,
                }
            })
            .collect();

        debug!(
            "Split {} records into {} batches (budget {})",
            records.len(),
            chunks.len(),
            self.max_tokens_per_chunk
        );
        chunks
    }
}

/// Greedy packer for text segments
struct TextPacker<'e> {
    engine: &'e ChunkingEngine,
    context_prefix: &'e str,
    chunks: Vec<Chunk>,
    current: String,
    current_chars: usize,
    current_structured: bool,
}

impl<'e> TextPacker<'e> {
    fn new(engine: &'e ChunkingEngine, context_prefix: &'e str) -> Self {
        Self {
            engine,
            context_prefix,
            chunks: Vec::new(),
            current: String::new(),
            current_chars: 0,
            current_structured: false,
        }
    }

    fn push(&mut self, segment: &str) {
        let chars = segment.chars().count();
        let structured = TokenEstimator::looks_structured(segment);

        if !self.current.is_empty() {
            let combined = self.engine.estimator.estimate_counts(
                self.current_chars + chars,
                self.current_structured || structured,
            );
            if combined > self.engine.max_tokens_per_chunk {
                self.seal();
            }
        }

        self.current.push_str(segment);
        self.current_chars += chars;
        self.current_structured |= structured;
    }

    fn seal(&mut self) {
        let body = self.current.trim();
        if !body.is_empty() {
            let index = self.chunks.len();
            let content = if index == 0 {
                body.to_string()
            } else {
                format!("{}{}", self.context_prefix, body)
            };
            self.chunks.push(Chunk {
                index,
                estimated_tokens: self.engine.estimator.estimate(&content),
                content,
            });
        }
        self.current.clear();
        self.current_chars = 0;
        self.current_structured = false;
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.seal();
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const PREFIX: &str = "(continued)\n";

    fn body<'a>(chunk: &'a Chunk) -> &'a str {
        if chunk.index == 0 {
            &chunk.content
        } else {
            chunk
                .content
                .strip_prefix(PREFIX)
                .expect("later chunks carry the prefix")
        }
    }

    #[test]
    fn test_small_text_is_single_chunk() {
        let engine = ChunkingEngine::new(100);
        let chunks = engine.split_text("Clicks rose 20% week over week.", PREFIX);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "Clicks rose 20% week over week.");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let engine = ChunkingEngine::new(100);
        assert!(engine.split_text("", PREFIX).is_empty());
    }

    #[test]
    fn test_whitespace_only_text_yields_one_chunk() {
        let engine = ChunkingEngine::new(100);
        let chunks = engine.split_text("   \n  ", PREFIX);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_splits_on_sentences_and_prefixes_later_chunks() {
        let engine = ChunkingEngine::new(10);
        let text = "The first sentence is here. The second sentence follows. \
                    The third one ends it.";
        let chunks = engine.split_text(text, PREFIX);

        assert!(chunks.len() >= 2);
        assert!(!chunks[0].content.starts_with(PREFIX));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(engine.estimator().estimate(body(chunk)) <= 10);
            if i > 0 {
                assert!(chunk.content.starts_with(PREFIX));
            }
        }
        assert!(chunks[0].content.ends_with('.'));
    }

    #[test]
    fn test_falls_back_to_whitespace_for_long_sentences() {
        let engine = ChunkingEngine::new(3);
        let text = "one two three four five six seven eight nine ten";
        let chunks = engine.split_text(text, PREFIX);

        assert!(chunks.len() > 1);
        let words: Vec<&str> = chunks
            .iter()
            .flat_map(|c| body(c).split_whitespace())
            .collect();
        assert_eq!(words, text.split_whitespace().collect::<Vec<_>>());
    }

    #[test]
    fn test_oversized_word_passes_through_unsplit() {
        let engine = ChunkingEngine::new(2);
        let long_word = "x".repeat(40);
        let text = format!("ok {} ok", long_word);
        let chunks = engine.split_text(&text, PREFIX);

        let oversized: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| engine.estimator().estimate(body(c)) > 2)
            .collect();
        assert_eq!(oversized.len(), 1);
        assert_eq!(body(oversized[0]), long_word);
    }

    #[test]
    fn test_paragraph_split_keeps_order() {
        let engine = ChunkingEngine::new(8);
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta\n\niota kappa lambda mu";
        let chunks = engine.split_text(text, PREFIX);
        let joined: Vec<&str> = chunks
            .iter()
            .flat_map(|c| body(c).split_whitespace())
            .collect();
        assert_eq!(joined, text.split_whitespace().collect::<Vec<_>>());
    }

    fn gsc_rows(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                json!({
                    "url": format!("https://example.com/page-{}", i),
                    "clicks": i * 3,
                    "impressions": i * 40,
                    "ctr": 0.075,
                    "position": 4.2
                })
            })
            .collect()
    }

    #[test]
    fn test_records_fit_in_one_batch() {
        let engine = ChunkingEngine::new(10_000);
        let rows = gsc_rows(10);
        let chunks = engine.split_records(&rows, PREFIX);
        assert_eq!(chunks.len(), 1);
        let parsed: Vec<Value> = serde_json::from_str(&chunks[0].content).unwrap();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn test_records_split_into_prefixed_batches() {
        let engine = ChunkingEngine::new(100);
        let rows = gsc_rows(20);
        let chunks = engine.split_records(&rows, PREFIX);
        assert!(chunks.len() >= 2);

        let mut all = Vec::new();
        for chunk in &chunks {
            let batch: Vec<Value> = serde_json::from_str(body(chunk)).unwrap();
            assert!(!batch.is_empty());
            all.extend(batch);
        }
        assert_eq!(all, rows);
    }

    #[test]
    fn test_oversized_record_gets_own_batch() {
        let engine = ChunkingEngine::new(10);
        let rows = vec![
            json!({"url": "a"}),
            json!({"url": "b", "notes": "x".repeat(500)}),
            json!({"url": "c"}),
        ];
        let batches = engine.batch_records(&rows);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1][0]["url"], "b");
    }

    #[test]
    fn test_find_record_payload() {
        let prompt = "Analyze page X using these rows:\n\
                      [{\"url\":\"a\",\"clicks\":1},{\"url\":\"b\",\"clicks\":2}]\n\
                      Respond in JSON.";
        let payload = find_record_payload(prompt).unwrap();
        assert_eq!(payload.lead, "Analyze page X using these rows:\n");
        assert_eq!(payload.records.len(), 2);
        assert_eq!(payload.tail, "\nRespond in JSON.");
    }

    #[test]
    fn test_find_record_payload_prefers_largest_array() {
        let prompt = "Keys [{\"k\":1}] then rows [{\"url\":\"a\"},{\"url\":\"b\"},{\"url\":\"c\"}]";
        let payload = find_record_payload(prompt).unwrap();
        assert_eq!(payload.records.len(), 3);
        assert!(payload.lead.starts_with("Keys [{\"k\":1}] then rows "));
    }

    #[test]
    fn test_find_record_payload_after_many_brackets() {
        let mut prompt = String::new();
        for i in 0..50 {
            prompt.push_str(&format!("See [page {i}](https://example.com/{i}) and [{i}, {i}]. "));
        }
        prompt.push_str("Rows: [{\"url\":\"a\"},{\"url\":\"b\"}]");

        let payload = find_record_payload(&prompt).unwrap();
        assert_eq!(payload.records.len(), 2);
        assert_eq!(payload.tail, "");
    }

    #[test]
    fn test_find_record_payload_rejects_prose_brackets() {
        assert!(find_record_payload("Summarize [the] traffic trends.").is_none());
        assert!(find_record_payload("Scores: [1, 2, 3]").is_none());
        assert!(find_record_payload("No arrays here").is_none());
    }

    fn prose() -> impl Strategy<Value = String> {
        prop::collection::vec(
            ("[a-z]{1,12}", prop::sample::select(vec![" ", ". ", "\n", "\n\n", "! "])),
            1..120,
        )
        .prop_map(|parts| {
            parts
                .into_iter()
                .map(|(w, sep)| format!("{}{}", w, sep))
                .collect::<String>()
        })
    }

    proptest! {
        #[test]
        fn prop_text_chunks_fit_budget_and_keep_words(text in prose(), budget in 5usize..60) {
            let engine = ChunkingEngine::new(budget);
            let chunks = engine.split_text(&text, PREFIX);

            prop_assert!(!chunks.is_empty());
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert!(engine.estimator().estimate(body(chunk)) <= budget);
            }

            let words: Vec<&str> = chunks.iter().flat_map(|c| body(c).split_whitespace()).collect();
            prop_assert_eq!(words, text.split_whitespace().collect::<Vec<_>>());
        }

        #[test]
        fn prop_record_batches_preserve_every_record(n in 1usize..200, budget in 1usize..400) {
            let engine = ChunkingEngine::new(budget);
            let rows = gsc_rows(n);
            let batches = engine.batch_records(&rows);

            prop_assert!(batches.iter().all(|b| !b.is_empty()));
            let flattened: Vec<Value> = batches.iter().flat_map(|b| b.iter().cloned()).collect();
            prop_assert_eq!(flattened, rows);
        }
    }
}
