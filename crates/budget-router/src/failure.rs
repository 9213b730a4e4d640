//! Turn failure classification and consecutive-failure tracking
//!
//! A turn is judged from its message trace alone: the host reports an error,
//! the trace has no usable assistant reply, or the last assistant message
//! reads like a provider error. Counters are per provider per day; any
//! success resets the provider's counter to zero.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::today_utc;
use crate::storage;

/// Assistant replies matching any of these read as provider errors.
static ERROR_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)rate.?limit",
        r"\b(429|502|503|401|403)\b",
        r"(?i)timed?.?out",
        r"(?i)gateway time.?out",
        r"(?i)internal server error",
        r"(?i)connection refused",
        r"(?i)econnrefused",
        r"(?i)etimedout",
        r"(?i)billing error",
        r"(?i)insufficient (balance|credits|funds)",
        r"(?i)quota exceeded",
        r"(?i)payment required",
        r"(?i)unauthorized",
        r"(?i)invalid api key",
        r"(?i)authentication failed",
    ])
    .expect("failure patterns compile")
});

/// Replies shorter than this without a usage object look like dropped turns.
const MIN_HEALTHY_REPLY_CHARS: usize = 20;

/// Outcome of classifying one completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Success,
    Failure(String),
}

impl TurnOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TurnOutcome::Failure(_))
    }
}

/// Classify a completed turn from its trace and the host's error field.
pub fn classify_turn(messages: &[Value], error: Option<&str>) -> TurnOutcome {
    if let Some(error) = error {
        return TurnOutcome::Failure(format!("host reported error: {error}"));
    }

    let Some(last_assistant) = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
    else {
        return TurnOutcome::Failure("no assistant message in trace".to_string());
    };

    let text = text_content(last_assistant.get("content"));
    if text.is_empty() {
        return TurnOutcome::Failure("assistant reply has no content".to_string());
    }
    if ERROR_PATTERNS.is_match(&text) {
        return TurnOutcome::Failure("assistant reply reads as a provider error".to_string());
    }
    if last_assistant.get("usage").is_none() && text.chars().count() < MIN_HEALTHY_REPLY_CHARS {
        return TurnOutcome::Failure("reply carries no usage and almost no text".to_string());
    }

    TurnOutcome::Success
}

/// Flatten string content or the text blocks of an array content.
fn text_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    block.get("text").and_then(Value::as_str)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRow {
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDocument {
    pub date: String,
    pub providers: BTreeMap<String, FailureRow>,
}

/// Per-provider consecutive-failure counters, daily keyed.
#[derive(Debug)]
pub struct FailureTracker {
    path: PathBuf,
    doc: FailureDocument,
}

impl FailureTracker {
    pub fn load(path: &Path) -> Result<Self> {
        let today = today_utc();
        let doc = match storage::read_json::<FailureDocument>(path) {
            Some(doc) if doc.date == today => doc,
            Some(stale) => {
                tracing::info!(
                    "failure counters rolled over from {} to {today}",
                    stale.date
                );
                FailureDocument {
                    date: today,
                    providers: BTreeMap::new(),
                }
            }
            None => FailureDocument {
                date: today,
                providers: BTreeMap::new(),
            },
        };
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    pub fn count(&self, provider: &str) -> u32 {
        self.doc
            .providers
            .get(provider)
            .map(|row| row.consecutive_failures)
            .unwrap_or(0)
    }

    /// Increment a provider's counter and return the new value.
    pub fn record_failure(&mut self, provider: &str) -> Result<u32> {
        let row = self.doc.providers.entry(provider.to_string()).or_default();
        row.consecutive_failures += 1;
        row.last_failure_at = Some(Utc::now().to_rfc3339());
        let count = row.consecutive_failures;
        self.save()?;
        Ok(count)
    }

    pub fn record_success(&mut self, provider: &str) -> Result<()> {
        if self.count(provider) == 0 {
            return Ok(());
        }
        self.doc
            .providers
            .entry(provider.to_string())
            .or_default()
            .consecutive_failures = 0;
        self.save()
    }

    pub fn should_switch(&self, provider: &str, threshold: u32) -> bool {
        self.count(provider) >= threshold
    }

    fn save(&self) -> Result<()> {
        storage::write_json(&self.path, &self.doc)
    }
}
