//! Event adapters
//!
//! Binds the router to the host's two hook events. Handler bodies are
//! wrapped so nothing ever propagates to the host: on any internal failure
//! the pre-turn handler returns an empty outcome and the post-turn handler
//! just logs. Host reliability beats router correctness.

mod events;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub use events::{AgentEndEvent, AgentStartEvent, HookKind, HookOutcome};

use crate::config::Settings;
use crate::failure::{classify_turn, FailureTracker, TurnOutcome};
use crate::host::HostConfig;
use crate::ledger::legacy::{BudgetAction, LegacyBudget};
use crate::ledger::usage::aggregate_turn;
use crate::ledger::BudgetLedger;
use crate::providers::{pricing, ProviderChain, TaskKind};
use crate::routing::switcher::{ModelSwitcher, LOCAL_PROVIDER_ID};
use crate::routing::task::estimate_context_tokens;
use crate::routing::{Decision, Router, INJECTION_CONTEXT_CAP_TOKENS};
use crate::session::SessionTruncator;

/// Subscription priority passed to the host dispatcher.
pub const HOOK_PRIORITY: i32 = 50;

/// Last-resort model id when neither the event nor the host config names one.
const FALLBACK_MODEL_ID: &str = "anthropic/claude-sonnet-4-20250514";

/// A handler for the two hooks this plugin consumes.
#[async_trait]
pub trait HookSubscriber: Send + Sync {
    async fn before_agent_start(&self, event: &AgentStartEvent) -> HookOutcome;
    async fn agent_end(&self, event: &AgentEndEvent);
}

/// The slice of the host plugin API the router needs at registration.
pub trait PluginApi {
    fn on(&mut self, hook: HookKind, priority: i32, subscriber: Arc<dyn HookSubscriber>);
}

/// Plugin entry point: resolve settings and subscribe the router.
pub fn register(api: &mut dyn PluginApi) {
    let settings = Settings::load();
    tracing::info!(
        "budget router registering (chain_mode={}, data_dir={})",
        settings.chain_mode,
        settings.data_dir.display()
    );
    let router = Arc::new(BudgetRouter::new(settings));
    api.on(HookKind::BeforeAgentStart, HOOK_PRIORITY, router.clone());
    api.on(HookKind::AgentEnd, HOOK_PRIORITY, router);
}

/// The event adapter. Stateless between invocations: every handler call
/// loads its state from disk, which keeps handlers correct across the host
/// restarts the router itself triggers.
pub struct BudgetRouter {
    settings: Settings,
}

impl BudgetRouter {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn run_before_agent_start(&self, event: &AgentStartEvent) -> Result<HookOutcome> {
        if self.settings.chain_mode {
            self.chain_before_agent_start(event).await
        } else {
            self.legacy_before_agent_start(event).await
        }
    }

    async fn run_agent_end(&self, event: &AgentEndEvent) -> Result<()> {
        if self.settings.chain_mode {
            self.chain_agent_end(event).await
        } else {
            self.legacy_agent_end(event).await
        }
    }

    async fn chain_before_agent_start(&self, event: &AgentStartEvent) -> Result<HookOutcome> {
        let chain = ProviderChain::load(&self.settings.chain_path(), &self.settings.local_models)?;
        self.bootstrap_host_config(&chain);

        let (ledger, was_reset) =
            BudgetLedger::load_with_status(&self.settings.ledger_path(), &chain)?;
        self.maybe_restore_chain(&chain, &ledger, was_reset).await;

        let failures = FailureTracker::load(&self.settings.failure_path())?;
        let router = Router::new(&chain, &self.settings);
        let decision = router.decide(&ledger, &failures, &event.prompt, &event.messages);
        log_decision(&decision);

        let injection = router.injection(&decision, &event.prompt, &event.messages);
        Ok(HookOutcome {
            prepend_context: injection,
        })
    }

    async fn chain_agent_end(&self, event: &AgentEndEvent) -> Result<()> {
        let chain = ProviderChain::load(&self.settings.chain_path(), &self.settings.local_models)?;
        let (mut ledger, was_reset) =
            BudgetLedger::load_with_status(&self.settings.ledger_path(), &chain)?;
        self.maybe_restore_chain(&chain, &ledger, was_reset).await;

        let active_id = ledger.active_provider().to_string();
        let mut failures = FailureTracker::load(&self.settings.failure_path())?;
        match classify_turn(&event.messages, event.error.as_deref()) {
            TurnOutcome::Failure(reason) => {
                let count = failures.record_failure(&active_id)?;
                tracing::warn!(
                    "turn on {active_id} classified as failure ({reason}), \
consecutive failures: {count}"
                );
            }
            TurnOutcome::Success => failures.record_success(&active_id)?,
        }

        let fallback_model = event
            .model
            .clone()
            .or_else(|| {
                chain
                    .get(&active_id)
                    .map(|p| p.qualified_model(TaskKind::General))
            })
            .unwrap_or_else(|| FALLBACK_MODEL_ID.to_string());
        let rate = pricing::resolve_cost(&fallback_model);
        let since = ledger.last_transaction_timestamp();
        if let Some(turn) = aggregate_turn(&event.messages, &fallback_model, &rate, since) {
            tracing::info!(
                "recorded {} in / {} out tokens (${:.4}) against {active_id}",
                turn.input_tokens,
                turn.output_tokens,
                turn.cost_usd
            );
            ledger.record_transaction(&chain, &active_id, &turn)?;
        }

        let router = Router::new(&chain, &self.settings);
        let decision = router.decide(&ledger, &failures, &event.prompt, &event.messages);
        match decision {
            Decision::SwitchProvider {
                from,
                next,
                model,
                reason,
            } => {
                let switcher = ModelSwitcher::new(&self.settings);
                match switcher.apply_switch(&next, &model).await {
                    Ok(true) => {
                        ledger.record_switch(&from, &next, &reason.to_string())?;
                        tracing::info!("switched {from} -> {next} ({reason})");
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!("switch {from} -> {next} aborted: {e}"),
                }
            }
            Decision::AllExhausted => {
                tracing::error!("every provider in the chain is exhausted; leaving host untouched")
            }
            Decision::Allow { .. } => {}
        }

        let truncator = SessionTruncator::new(&self.settings);
        truncator.enforce_budget().await?;
        Ok(())
    }

    async fn legacy_before_agent_start(&self, event: &AgentStartEvent) -> Result<HookOutcome> {
        let (budget, was_reset) = LegacyBudget::load_with_status(
            &self.settings.legacy_ledger_path(),
            self.settings.daily_budget_usd,
        )?;
        self.maybe_restore_legacy(&budget, was_reset).await;

        let estimated = estimate_context_tokens(&event.prompt, &event.messages);
        if estimated > INJECTION_CONTEXT_CAP_TOKENS {
            tracing::warn!(
                "skipping injection: estimated context {estimated} tokens exceeds cap"
            );
            return Ok(HookOutcome::none());
        }

        let check = budget.check_budget(&event.prompt, &event.messages, &self.settings.local_models);
        let mut parts: Vec<String> = Vec::new();
        if self.settings.prompt_optimization {
            if check.action == BudgetAction::Allow {
                parts.push(
                    "Keep responses focused and token-efficient: answer directly, avoid \
restating the question or unchanged code, and batch related edits together."
                        .to_string(),
                );
            } else {
                parts.push(
                    "Keep responses short and direct; avoid repeating context that is \
already in the conversation."
                        .to_string(),
                );
            }
        }
        if check.action == BudgetAction::ForceLocal {
            if let Some(model) = &check.forced_model {
                parts.push(format!(
                    "[MODEL RECOMMENDATION] Daily budget exhausted \
(${:.2} remaining); this {} turn should run on {model}.",
                    check.remaining,
                    check.task_type.as_str()
                ));
            }
        }

        Ok(if parts.is_empty() {
            HookOutcome::none()
        } else {
            HookOutcome::with_context(parts.join("\n\n"))
        })
    }

    async fn legacy_agent_end(&self, event: &AgentEndEvent) -> Result<()> {
        let (mut budget, was_reset) = LegacyBudget::load_with_status(
            &self.settings.legacy_ledger_path(),
            self.settings.daily_budget_usd,
        )?;
        self.maybe_restore_legacy(&budget, was_reset).await;

        let fallback_model = event
            .model
            .clone()
            .or_else(|| {
                HostConfig::load(&self.settings.host_config_path)
                    .ok()
                    .and_then(|host| host.primary_model().map(str::to_string))
            })
            .unwrap_or_else(|| FALLBACK_MODEL_ID.to_string());
        let rate = pricing::resolve_cost(&fallback_model);
        let since = budget.last_transaction_timestamp();
        if let Some(turn) = aggregate_turn(&event.messages, &fallback_model, &rate, since) {
            tracing::info!(
                "recorded {} in / {} out tokens (${:.4}), ${:.2} of daily budget remaining",
                turn.input_tokens,
                turn.output_tokens,
                turn.cost_usd,
                (self.settings.daily_budget_usd - budget.spent() - turn.cost_usd).max(0.0)
            );
            budget.record(&turn)?;
        }

        let check = budget.check_budget(&event.prompt, &event.messages, &self.settings.local_models);
        if check.action == BudgetAction::ForceLocal {
            let switcher = ModelSwitcher::new(&self.settings);
            if let Some(model) = &check.forced_model {
                match switcher.apply_switch(LOCAL_PROVIDER_ID, model).await {
                    Ok(true) => tracing::info!("daily budget exhausted, switched to {model}"),
                    Ok(false) => {}
                    Err(e) => tracing::warn!("local switch aborted: {e}"),
                }
            }
        }

        let truncator = SessionTruncator::new(&self.settings);
        truncator.enforce_budget().await?;
        Ok(())
    }

    /// On the first event of a new day: if the agent sits on the local
    /// fallback and a paid provider is affordable again, restore the
    /// original model. If the budget is still gone we are already where we
    /// should be, and doing nothing avoids a restart loop.
    async fn maybe_restore_chain(
        &self,
        chain: &ProviderChain,
        ledger: &BudgetLedger,
        was_reset: bool,
    ) {
        if !was_reset {
            return;
        }
        let switcher = ModelSwitcher::new(&self.settings);
        if !switcher.is_local() {
            return;
        }
        let healthy = chain
            .first_available(&ledger.exhausted_set(chain))
            .map(|p| !p.is_free())
            .unwrap_or(false);
        if !healthy {
            tracing::debug!("new day but no paid provider available, staying on local fallback");
            return;
        }
        if let Err(e) = switcher.restore_original().await {
            tracing::warn!("failed to restore original model on new day: {e}");
        }
    }

    async fn maybe_restore_legacy(&self, budget: &LegacyBudget, was_reset: bool) {
        if !was_reset {
            return;
        }
        let switcher = ModelSwitcher::new(&self.settings);
        if !switcher.is_local() || budget.exhausted() {
            return;
        }
        if let Err(e) = switcher.restore_original().await {
            tracing::warn!("failed to restore original model on new day: {e}");
        }
    }

    /// First-run bootstrap: install alias entries and a primary pointer into
    /// a pristine host config. Missing config just means the host is not set
    /// up yet; stay out of the way.
    fn bootstrap_host_config(&self, chain: &ProviderChain) {
        let mut host = match HostConfig::load(&self.settings.host_config_path) {
            Ok(host) => host,
            Err(e) => {
                tracing::debug!("host config not patchable yet: {e}");
                return;
            }
        };
        if host.has_models_table() {
            return;
        }
        host.install_defaults(chain);
        match host.save() {
            Ok(()) => tracing::info!("installed model aliases into host config"),
            Err(e) => tracing::warn!("failed to install model aliases: {e}"),
        }
    }
}

#[async_trait]
impl HookSubscriber for BudgetRouter {
    async fn before_agent_start(&self, event: &AgentStartEvent) -> HookOutcome {
        match self.run_before_agent_start(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("pre-turn handler failed, staying out of the way: {e:#}");
                HookOutcome::none()
            }
        }
    }

    async fn agent_end(&self, event: &AgentEndEvent) {
        if let Err(e) = self.run_agent_end(event).await {
            tracing::warn!("post-turn handler failed, staying out of the way: {e:#}");
        }
    }
}

fn log_decision(decision: &Decision) {
    match decision {
        Decision::Allow {
            provider,
            model,
            remaining_usd,
            percent_used,
        } => tracing::info!(
            "turn allowed on {provider}/{model} (${remaining_usd:.2} remaining, \
{:.0}% used)",
            percent_used * 100.0
        ),
        Decision::SwitchProvider {
            from,
            next,
            reason,
            ..
        } => tracing::info!("switch pending: {from} -> {next} ({reason})"),
        Decision::AllExhausted => tracing::warn!("all providers exhausted"),
    }
}
