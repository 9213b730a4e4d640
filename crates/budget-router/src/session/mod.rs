//! Session log truncation
//!
//! The host appends one JSON entry per line to its session log, each entry
//! pointing at its predecessor through `parentId`. When the estimated token
//! size outgrows the context ceiling, the oldest content entries are
//! dropped, a compaction marker takes their place, and the whole chain is
//! re-linked from scratch. Structural entries (session metadata, model
//! changes) always survive.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::Settings;
use crate::host::restart::restart_host;
use crate::storage;

const STRUCTURAL_TOKEN_ESTIMATE: usize = 50;
const MIN_CONTENT_TOKEN_ESTIMATE: usize = 50;

/// One line of the session log. Unknown fields ride along in `extra` so a
/// rewrite never loses host-private data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionEntry {
    /// Content entries carry conversation; everything else (including types
    /// this version does not know) is structural and kept.
    pub fn is_content(&self) -> bool {
        self.kind == "message"
    }

    pub fn estimated_tokens(&self) -> usize {
        if !self.is_content() {
            return STRUCTURAL_TOKEN_ESTIMATE;
        }
        let chars = content_chars(self.message.as_ref());
        MIN_CONTENT_TOKEN_ESTIMATE.max(chars.div_ceil(4))
    }
}

fn content_chars(message: Option<&Value>) -> usize {
    let Some(content) = message.and_then(|m| m.get("content")) else {
        return 0;
    };
    match content {
        Value::String(text) => text.len(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .map(str::len)
            .sum(),
        _ => 0,
    }
}

/// What a truncation attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationOutcome {
    /// Log rewritten; this many content entries were dropped.
    Truncated { removed: usize },
    WithinBudget,
    LogMissing,
}

/// Estimate the total token footprint of a log.
pub fn estimate_log_tokens(entries: &[SessionEntry]) -> usize {
    entries.iter().map(SessionEntry::estimated_tokens).sum()
}

/// Read a JSONL session log, skipping lines that do not parse.
pub fn read_log(path: &Path) -> Result<Option<Vec<SessionEntry>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("skipping unparseable session entry: {e}"),
        }
    }
    Ok(Some(entries))
}

fn write_log(path: &Path, entries: &[SessionEntry]) -> Result<()> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');
    }
    storage::write_text(path, &out)
}

/// Rewrite a log that outgrew the ceiling: keep all structural entries and
/// the last `keep_recent` content entries, insert one compaction marker
/// where the dropped span was, and re-link the parent chain.
pub fn truncate_log(
    path: &Path,
    max_tokens: usize,
    keep_recent: usize,
) -> Result<TruncationOutcome> {
    let Some(entries) = read_log(path)? else {
        return Ok(TruncationOutcome::LogMissing);
    };

    let total = estimate_log_tokens(&entries);
    if total <= max_tokens {
        return Ok(TruncationOutcome::WithinBudget);
    }
    let content_count = entries.iter().filter(|e| e.is_content()).count();
    if content_count <= keep_recent {
        return Ok(TruncationOutcome::WithinBudget);
    }

    let removed = content_count - keep_recent;
    let mut rebuilt: Vec<SessionEntry> = Vec::with_capacity(entries.len() - removed + 1);
    let mut seen_content = 0usize;
    let mut marker_inserted = false;

    for entry in entries {
        if entry.is_content() {
            seen_content += 1;
            if seen_content <= removed {
                continue;
            }
            if !marker_inserted {
                rebuilt.push(compaction_marker(removed));
                marker_inserted = true;
            }
        }
        rebuilt.push(entry);
    }
    if !marker_inserted {
        rebuilt.push(compaction_marker(removed));
    }

    relink(&mut rebuilt);
    write_log(path, &rebuilt)?;

    tracing::info!(
        "session log truncated: dropped {removed} content entries, \
estimate {total} -> {} tokens",
        estimate_log_tokens(&rebuilt)
    );
    Ok(TruncationOutcome::Truncated { removed })
}

/// Rebuild the linear parent chain from scratch.
fn relink(entries: &mut [SessionEntry]) {
    let mut previous: Option<String> = None;
    for entry in entries {
        entry.parent_id = previous.take();
        previous = Some(entry.id.clone());
    }
}

fn compaction_marker(removed: usize) -> SessionEntry {
    SessionEntry {
        kind: "compaction".to_string(),
        id: Uuid::new_v4().to_string(),
        parent_id: None,
        timestamp: Some(Value::String(Utc::now().to_rfc3339())),
        message: Some(json!({
            "role": "system",
            "content": format!(
                "[Session compacted: removed {removed} older messages to stay under the context limit]"
            ),
        })),
        extra: Map::new(),
    }
}

/// Binds truncation to the host's sessions directory and its sidecar index.
pub struct SessionTruncator<'a> {
    settings: &'a Settings,
}

impl<'a> SessionTruncator<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Resolve the active session's log file through `sessions.json`.
    pub fn session_file(&self) -> Option<PathBuf> {
        let index: BTreeMap<String, String> =
            storage::read_json(&self.settings.sessions_index_path())?;
        index
            .get(&self.settings.session_key)
            .map(|relative| self.settings.sessions_dir.join(relative))
    }

    /// Truncate the active session if it outgrew the ceiling, restarting the
    /// host afterwards so it reloads the rewritten log.
    pub async fn enforce_budget(&self) -> Result<TruncationOutcome> {
        if !self.settings.truncation_enabled {
            return Ok(TruncationOutcome::WithinBudget);
        }
        let Some(path) = self.session_file() else {
            tracing::debug!(
                "no session log registered for key {}",
                self.settings.session_key
            );
            return Ok(TruncationOutcome::LogMissing);
        };

        let outcome = truncate_log(
            &path,
            self.settings.context_max_tokens,
            self.settings.context_keep_recent,
        )?;
        if matches!(outcome, TruncationOutcome::Truncated { .. }) {
            restart_host(&self.settings.restart_command).await;
        }
        Ok(outcome)
    }
}
