//! Decision engine
//!
//! Pure reads across the ledger, the chain and the failure counters produce
//! one of three decisions for the next turn. Side effects (config patching,
//! restarts) belong to the switcher and the hook adapters.

pub mod switcher;
pub mod task;

use std::fmt;

use serde_json::Value;

use crate::config::{ModelRouting, Settings};
use crate::failure::FailureTracker;
use crate::ledger::BudgetLedger;
use crate::providers::ProviderChain;
use self::task::TaskComplexity;

/// Injection is dropped entirely once the estimated context passes this.
pub const INJECTION_CONTEXT_CAP_TOKENS: usize = 150_000;

/// Remaining-budget fraction below which the injection carries a budget line.
const BUDGET_WARN_FRACTION: f64 = 0.2;

/// Why the engine wants to leave the active provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchReason {
    Exhausted,
    ConsecutiveFailures(u32),
    ProviderUnavailable,
}

impl fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchReason::Exhausted => write!(f, "daily budget exhausted"),
            SwitchReason::ConsecutiveFailures(count) => {
                write!(f, "{count} consecutive failures")
            }
            SwitchReason::ProviderUnavailable => write!(f, "provider disabled or missing"),
        }
    }
}

/// What the next turn should do.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow {
        provider: String,
        model: String,
        remaining_usd: f64,
        percent_used: f64,
    },
    SwitchProvider {
        from: String,
        next: String,
        model: String,
        reason: SwitchReason,
    },
    AllExhausted,
}

/// The decision engine over one consistent snapshot of state.
pub struct Router<'a> {
    pub chain: &'a ProviderChain,
    pub settings: &'a Settings,
}

impl<'a> Router<'a> {
    pub fn new(chain: &'a ProviderChain, settings: &'a Settings) -> Self {
        Self { chain, settings }
    }

    /// Decide what the next turn should do given current ledger and failure
    /// state.
    pub fn decide(
        &self,
        ledger: &BudgetLedger,
        failures: &FailureTracker,
        prompt: &str,
        messages: &[Value],
    ) -> Decision {
        let task = task::classify_task(prompt, messages);
        let exhausted = ledger.exhausted_set(self.chain);
        let active_id = ledger.active_provider().to_string();

        let Some(active) = self.chain.get(&active_id).filter(|p| p.enabled) else {
            return match self.chain.first_available(&exhausted) {
                Some(fallback) => Decision::SwitchProvider {
                    from: active_id,
                    next: fallback.id.clone(),
                    model: fallback.model_for_task(task).to_string(),
                    reason: SwitchReason::ProviderUnavailable,
                },
                None => Decision::AllExhausted,
            };
        };

        let over_budget = ledger.exhausted(self.chain, &active.id);
        let failing = failures.should_switch(&active.id, self.settings.failure_threshold);
        if over_budget || failing {
            let reason = if over_budget {
                SwitchReason::Exhausted
            } else {
                SwitchReason::ConsecutiveFailures(failures.count(&active.id))
            };
            return match self.chain.next_after(&active.id, &exhausted) {
                Some(next) => Decision::SwitchProvider {
                    from: active.id.clone(),
                    next: next.id.clone(),
                    model: next.model_for_task(task).to_string(),
                    reason,
                },
                None => Decision::AllExhausted,
            };
        }

        Decision::Allow {
            provider: active.id.clone(),
            model: active.model_for_task(task).to_string(),
            remaining_usd: ledger.remaining(self.chain, &active.id),
            percent_used: ledger.percent_used(self.chain, &active.id),
        }
    }

    /// Build the pre-turn injection for a decision: the optimization
    /// preface, an advisory model recommendation on tier mismatch, and a
    /// budget line when the active provider runs low. Suppressed entirely
    /// when the estimated context is already past the cap.
    pub fn injection(&self, decision: &Decision, prompt: &str, messages: &[Value]) -> Option<String> {
        let estimated = task::estimate_context_tokens(prompt, messages);
        if estimated > INJECTION_CONTEXT_CAP_TOKENS {
            tracing::warn!(
                "skipping injection: estimated context {estimated} tokens exceeds cap"
            );
            return None;
        }

        let mut parts: Vec<String> = Vec::new();
        let premium_id = self.chain.premium().map(|p| p.id.clone());

        if self.settings.prompt_optimization {
            let on_premium = match decision {
                Decision::Allow { provider, .. } => Some(provider) == premium_id.as_ref(),
                _ => false,
            };
            parts.push(optimization_preface(on_premium).to_string());
        }

        if self.settings.model_routing == ModelRouting::Advisory {
            if let Some(line) = self.recommendation(decision, prompt, messages) {
                parts.push(line);
            }
        }

        if let Decision::Allow {
            provider,
            remaining_usd,
            percent_used,
            ..
        } = decision
        {
            let is_free = self
                .chain
                .get(provider)
                .map(|p| p.is_free())
                .unwrap_or(true);
            if !is_free && 1.0 - percent_used <= BUDGET_WARN_FRACTION {
                let cap = self
                    .chain
                    .get(provider)
                    .map(|p| p.max_daily_usd)
                    .unwrap_or(0.0);
                parts.push(format!(
                    "[BUDGET] {provider}: ${remaining_usd:.2} of ${cap:.2} remaining today"
                ));
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    fn recommendation(
        &self,
        decision: &Decision,
        prompt: &str,
        messages: &[Value],
    ) -> Option<String> {
        let Decision::Allow { provider, .. } = decision else {
            return None;
        };
        let active = self.chain.get(provider)?;
        let complexity = task::classify_complexity(prompt, messages);
        let task = task::classify_task(prompt, messages);
        let premium = self.chain.premium()?;

        if complexity == TaskComplexity::Simple && active.id == premium.id && !active.is_free() {
            let cheap = self.chain.cheapest()?;
            if cheap.id != active.id {
                return Some(format!(
                    "[MODEL RECOMMENDATION] This looks like a simple request; {} would handle it at lower cost.",
                    cheap.qualified_model(task)
                ));
            }
        }

        if complexity == TaskComplexity::Complex && active.is_free() && !premium.is_free() {
            return Some(format!(
                "[MODEL RECOMMENDATION] This looks like a complex task; consider {} for better results.",
                premium.qualified_model(task)
            ));
        }

        None
    }
}

fn optimization_preface(on_premium: bool) -> &'static str {
    if on_premium {
        "Keep responses focused and token-efficient: answer directly, avoid restating \
the question or unchanged code, batch related edits together, and do not re-read \
files already shown this session unless they changed."
    } else {
        "Keep responses short and direct; avoid repeating context that is already in \
the conversation."
    }
}
