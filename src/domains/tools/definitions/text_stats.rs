//! Text statistics tool.
//!
//! Counts characters, words, lines and sentences of a text and optionally
//! reports its most frequent words. Runs locally and is deterministic, so
//! results cache well.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::domains::tools::contract::ToolDefinition;
use crate::domains::tools::error::AdapterError;
use crate::domains::tools::registry::ToolPolicy;

/// Parameters for text statistics.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TextStatsParams {
    /// The text to analyze.
    #[schemars(length(min = 1, max = 1_000_000))]
    pub text: String,

    /// How many of the most frequent words to return (default: 0).
    #[serde(default)]
    #[schemars(range(max = 50))]
    pub top_words: u32,
}

/// Structured output for text statistics.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct TextStats {
    pub characters: usize,
    pub words: usize,
    pub lines: usize,
    pub sentences: usize,
    pub top_words: Vec<WordCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct WordCount {
    pub word: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TextStatsTool;

impl TextStatsTool {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(text: &str, top_words: usize) -> TextStats {
        let words: Vec<String> = text
            .split_whitespace()
            .filter_map(normalize_word)
            .collect();

        TextStats {
            characters: text.chars().count(),
            words: words.len(),
            lines: text.lines().count(),
            sentences: count_sentences(text),
            top_words: most_frequent(&words, top_words),
        }
    }
}

#[async_trait]
impl ToolDefinition for TextStatsTool {
    const NAME: &'static str = "text_stats";

    const DESCRIPTION: &'static str = "Count characters, words, lines and sentences in a text. \
        Optionally returns the most frequent words (case-insensitive).";

    type Params = TextStatsParams;
    type Output = TextStats;

    fn default_policy(base: ToolPolicy) -> ToolPolicy {
        base.rate_limit(None).cache_ttl(Duration::from_secs(3600))
    }

    async fn execute(&self, params: TextStatsParams) -> Result<TextStats, AdapterError> {
        debug!("Analyzing {} bytes of text", params.text.len());
        Ok(Self::analyze(&params.text, params.top_words as usize))
    }
}

/// Lower-case a token and strip surrounding punctuation; `None` if nothing
/// word-like remains.
fn normalize_word(token: &str) -> Option<String> {
    let trimmed = token.trim_matches(|c: char| !c.is_alphanumeric());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// A sentence is a run of text containing a word character, ended by
/// `.`, `!`, `?` or the end of input.
fn count_sentences(text: &str) -> usize {
    let mut sentences = 0;
    let mut open = false;
    for c in text.chars() {
        if matches!(c, '.' | '!' | '?') {
            if open {
                sentences += 1;
                open = false;
            }
        } else if c.is_alphanumeric() {
            open = true;
        }
    }
    sentences + usize::from(open)
}

fn most_frequent(words: &[String], limit: usize) -> Vec<WordCount> {
    if limit == 0 {
        return Vec::new();
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in words {
        *counts.entry(word.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(word, count)| WordCount {
            word: word.to_string(),
            count,
        })
        .collect()
}
