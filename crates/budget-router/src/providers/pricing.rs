//! Built-in model cost table
//!
//! Rates are USD per 1K tokens. The table is a fallback: hosts that report a
//! pre-computed cost bypass it entirely. Unknown models resolve to a zero
//! rate, which undercounts rather than overcounts spend.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Cost of a model per 1K input/output tokens.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl CostRate {
    pub const FREE: CostRate = CostRate {
        input_per_1k: 0.0,
        output_per_1k: 0.0,
    };

    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn is_free(&self) -> bool {
        self.input_per_1k == 0.0 && self.output_per_1k == 0.0
    }

    /// Dollar cost of a token count pair at this rate.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Model families that only ship as local weights. Anything matching is
/// treated as free even if the host reports a price for it.
const LOCAL_MODEL_FAMILIES: &[&str] = &[
    "qwen",
    "llama",
    "mistral",
    "phi",
    "gemma",
    "vicuna",
    "orca",
    "neural-chat",
    "starling",
    "openchat",
    "zephyr",
    "dolphin",
    "nous-hermes",
    "yi",
];

static COST_TABLE: Lazy<HashMap<&'static str, CostRate>> = Lazy::new(|| {
    HashMap::from([
        ("claude-opus-4-20250514", CostRate::new(0.015, 0.075)),
        ("claude-sonnet-4-20250514", CostRate::new(0.003, 0.015)),
        ("claude-3-5-haiku-20241022", CostRate::new(0.0008, 0.004)),
        ("gpt-4o", CostRate::new(0.0025, 0.01)),
        ("gpt-4o-mini", CostRate::new(0.00015, 0.0006)),
        ("kimi-k2.5", CostRate::new(0.0006, 0.0025)),
        ("deepseek-chat", CostRate::new(0.00027, 0.0011)),
        ("deepseek-reasoner", CostRate::new(0.00055, 0.00219)),
        ("glm-4.6", CostRate::new(0.0006, 0.0022)),
        ("minimax-m2", CostRate::new(0.0003, 0.0012)),
    ])
});

/// Whether a model name belongs to a local family or carries the `ollama/`
/// provider prefix.
pub fn is_local_model(model: &str) -> bool {
    if model.starts_with("ollama/") {
        return true;
    }
    let lowered = model.to_lowercase();
    LOCAL_MODEL_FAMILIES
        .iter()
        .any(|family| lowered.contains(family))
}

/// Resolve a model identifier to its rate. Lookup is exact on both the bare
/// name and the provider-prefixed form; local models are always free.
pub fn resolve_cost(model: &str) -> CostRate {
    if is_local_model(model) {
        return CostRate::FREE;
    }
    if let Some(rate) = COST_TABLE.get(model) {
        return *rate;
    }
    if let Some((_, bare)) = model.split_once('/') {
        if let Some(rate) = COST_TABLE.get(bare) {
            return *rate;
        }
    }
    tracing::warn!("no cost entry for model {model}, counting usage as free");
    CostRate::FREE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_and_prefixed_lookup_agree() {
        let bare = resolve_cost("kimi-k2.5");
        let prefixed = resolve_cost("moonshot/kimi-k2.5");
        assert_eq!(bare, prefixed);
        assert!(bare.input_per_1k > 0.0);
    }

    #[test]
    fn unknown_model_resolves_to_free() {
        let rate = resolve_cost("some-future-model-v9");
        assert!(rate.is_free());
    }

    #[test]
    fn local_families_are_free_even_when_priced_upstream() {
        assert!(resolve_cost("qwen3:8b").is_free());
        assert!(resolve_cost("llama3.1:70b").is_free());
        assert!(resolve_cost("ollama/anything-at-all").is_free());
        assert!(is_local_model("nous-hermes2"));
        assert!(!is_local_model("claude-sonnet-4-20250514"));
    }

    #[test]
    fn cost_scales_per_thousand_tokens() {
        let rate = CostRate::new(0.003, 0.015);
        let cost = rate.cost(2000, 1000);
        assert!((cost - (0.006 + 0.015)).abs() < 1e-12);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        let rate = resolve_cost("claude-sonnet-4-20250514");
        assert_eq!(rate.cost(0, 0), 0.0);
    }
}
