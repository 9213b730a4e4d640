//! Turn usage aggregation
//!
//! The host reports usage inside assistant messages; field names vary by
//! provider SDK, so extraction walks a fixed precedence list of field pairs
//! and silently skips shapes it does not recognise. A `since` cutoff (the
//! timestamp of the last recorded transaction) prevents double counting when
//! the host replays history across turns.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::providers::pricing::{self, CostRate};

/// Aggregated usage for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnUsage {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

const TOKEN_FIELD_PAIRS: &[(&str, &str)] = &[
    ("input_tokens", "output_tokens"),
    ("prompt_tokens", "completion_tokens"),
    ("input", "output"),
];

/// Parse a host-supplied timestamp: RFC 3339 string or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Sum tokens and cost across assistant messages newer than `since`.
/// Returns `None` when nothing new was found.
pub fn aggregate_turn(
    messages: &[Value],
    fallback_model: &str,
    fallback_rate: &CostRate,
    since: Option<DateTime<Utc>>,
) -> Option<TurnUsage> {
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;
    let mut cost_usd = 0.0f64;
    let mut model: Option<String> = None;
    let mut counted = false;

    for message in messages {
        if message.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(usage) = message.get("usage") else {
            continue;
        };
        let Some((input, output)) = token_counts(usage) else {
            continue;
        };
        if let Some(cutoff) = since {
            // Messages without a timestamp cannot be proven new; skip them.
            match message.get("timestamp").and_then(parse_timestamp) {
                Some(ts) if ts > cutoff => {}
                _ => continue,
            }
        }

        counted = true;
        input_tokens += input;
        output_tokens += output;
        cost_usd += message_cost(message, usage, input, output, fallback_rate);
        if model.is_none() {
            model = Some(message_model(message, fallback_model));
        }
    }

    if !counted {
        return None;
    }
    Some(TurnUsage {
        model: model.unwrap_or_else(|| fallback_model.to_string()),
        input_tokens,
        output_tokens,
        cost_usd,
    })
}

fn as_tokens(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|f| f.max(0.0) as u64))
}

fn token_counts(usage: &Value) -> Option<(u64, u64)> {
    for (input_key, output_key) in TOKEN_FIELD_PAIRS {
        let input = usage.get(*input_key).and_then(as_tokens);
        let output = usage.get(*output_key).and_then(as_tokens);
        if input.is_some() || output.is_some() {
            return Some((input.unwrap_or(0), output.unwrap_or(0)));
        }
    }
    None
}

fn message_model(message: &Value, fallback: &str) -> String {
    let provider = message.get("provider").and_then(Value::as_str);
    let model = message.get("model").and_then(Value::as_str);
    match (provider, model) {
        (Some(provider), Some(model)) => format!("{provider}/{model}"),
        (None, Some(model)) => model.to_string(),
        _ => fallback.to_string(),
    }
}

fn message_cost(
    message: &Value,
    usage: &Value,
    input_tokens: u64,
    output_tokens: u64,
    fallback_rate: &CostRate,
) -> f64 {
    let provider = message.get("provider").and_then(Value::as_str).unwrap_or("");
    let model = message.get("model").and_then(Value::as_str).unwrap_or("");
    if provider == "ollama" || pricing::is_local_model(model) {
        return 0.0;
    }
    if let Some(total) = usage.pointer("/cost/total").and_then(Value::as_f64) {
        if total > 0.0 {
            return total;
        }
    }
    fallback_rate.cost(input_tokens, output_tokens)
}
