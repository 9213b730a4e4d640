//! Task and complexity classification
//!
//! Vision beats coding when both signals appear; complexity is advisory only
//! and feeds the pre-turn model recommendation.

use once_cell::sync::Lazy;
use regex::RegexSet;
use serde_json::Value;

use crate::providers::TaskKind;

static CODING_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(code|coding|function|bug|implement|refactor|debug|compile|syntax|script|program|class|method|api|endpoint|regex|unit test)\b",
        r"(?i)\.(ts|js|tsx|jsx|py|go|rs|java|rb|cpp|cs|php|swift|kt|sh|sql)\b",
    ])
    .expect("coding patterns compile")
});

static COMPLEX_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\barchitect",
        r"(?i)\bsecurity\b",
        r"(?i)\baudit\b",
        r"(?i)deep analysis",
        r"(?i)refactor (the )?entire",
        r"(?i)\bdistributed\b",
        r"(?i)\bproduction\b",
    ])
    .expect("complex patterns compile")
});

static MEDIUM_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bimplement\b",
        r"(?i)fix (the |a )?bug",
        r"(?i)\bupdate\b",
        r"(?i)\bintegrate\b",
        r"(?i)write tests",
        r"(?i)\bexplain\b",
    ])
    .expect("medium patterns compile")
});

const COMPLEX_CONTENT_CHARS: usize = 50_000;
const COMPLEX_MESSAGE_COUNT: usize = 10;
const MEDIUM_PROMPT_CHARS: usize = 200;
const MEDIUM_MESSAGE_COUNT: usize = 3;

/// Advisory complexity tier of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskComplexity {
    Simple,
    Medium,
    Complex,
}

/// Classify the task role of a turn: vision > coding > general.
pub fn classify_task(prompt: &str, messages: &[Value]) -> TaskKind {
    if has_image_block(messages) {
        return TaskKind::Vision;
    }
    if CODING_PATTERNS.is_match(prompt) {
        return TaskKind::Coding;
    }
    TaskKind::General
}

/// Classify the advisory complexity of a turn.
pub fn classify_complexity(prompt: &str, messages: &[Value]) -> TaskComplexity {
    let total_chars = prompt.len() + content_chars(messages);
    if COMPLEX_PATTERNS.is_match(prompt)
        || total_chars > COMPLEX_CONTENT_CHARS
        || messages.len() > COMPLEX_MESSAGE_COUNT
    {
        return TaskComplexity::Complex;
    }
    if MEDIUM_PATTERNS.is_match(prompt)
        || prompt.len() > MEDIUM_PROMPT_CHARS
        || messages.len() > MEDIUM_MESSAGE_COUNT
    {
        return TaskComplexity::Medium;
    }
    TaskComplexity::Simple
}

/// Estimated context size in tokens (chars / 4) of the whole turn input.
pub fn estimate_context_tokens(prompt: &str, messages: &[Value]) -> usize {
    (prompt.len() + content_chars(messages)) / 4
}

fn has_image_block(messages: &[Value]) -> bool {
    messages.iter().any(|message| {
        message
            .get("content")
            .and_then(Value::as_array)
            .is_some_and(|blocks| {
                blocks
                    .iter()
                    .any(|block| block.get("type").and_then(Value::as_str) == Some("image"))
            })
    })
}

fn content_chars(messages: &[Value]) -> usize {
    messages
        .iter()
        .map(|message| match message.get("content") {
            Some(Value::String(text)) => text.len(),
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .map(str::len)
                .sum(),
            _ => 0,
        })
        .sum()
}
