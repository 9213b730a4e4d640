//! Provider chain registry
//!
//! The chain is entirely data-driven: an ordered list of provider
//! descriptors loaded from `provider-chain.json`, with per-provider
//! environment overrides applied in memory only. A minimal default chain
//! (anthropic, then a free local provider) is written on first use.

pub mod pricing;

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::LocalModels;
use crate::storage;

/// Task role a turn is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    General,
    Coding,
    Vision,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::General => "general",
            TaskKind::Coding => "coding",
            TaskKind::Vision => "vision",
        }
    }
}

/// Per-task model slots. `default` is required; the others fall back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderModels {
    pub default: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision: Option<String>,
}

impl ProviderModels {
    pub fn uniform(model: impl Into<String>) -> Self {
        Self {
            default: model.into(),
            coding: None,
            vision: None,
        }
    }

    pub fn for_task(&self, task: TaskKind) -> &str {
        match task {
            TaskKind::General => &self.default,
            TaskKind::Coding => self.coding.as_deref().unwrap_or(&self.default),
            TaskKind::Vision => self.vision.as_deref().unwrap_or(&self.default),
        }
    }
}

/// One provider in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: String,
    /// Lower priority is tried first.
    pub priority: i64,
    pub enabled: bool,
    /// Daily cap in USD; `0` marks a free provider that never exhausts.
    pub max_daily_usd: f64,
    pub models: ProviderModels,
}

impl ProviderDescriptor {
    pub fn is_free(&self) -> bool {
        self.max_daily_usd == 0.0
    }

    pub fn model_for_task(&self, task: TaskKind) -> &str {
        self.models.for_task(task)
    }

    /// Provider-prefixed id of a model, the form the host config stores.
    pub fn qualified_model(&self, task: TaskKind) -> String {
        format!("{}/{}", self.id, self.model_for_task(task))
    }

    fn env_prefix(&self) -> String {
        self.id.to_uppercase().replace('-', "_")
    }
}

/// On-disk shape of `provider-chain.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDocument {
    pub providers: Vec<ProviderDescriptor>,
}

/// The loaded chain with env overrides applied.
#[derive(Debug, Clone)]
pub struct ProviderChain {
    providers: Vec<ProviderDescriptor>,
}

impl ProviderChain {
    /// Load the chain document, writing the built-in default when absent.
    /// Env overrides are applied to the in-memory copy only.
    pub fn load(path: &Path, local_models: &LocalModels) -> Result<Self> {
        let doc = match storage::read_json::<ChainDocument>(path) {
            Some(doc) => doc,
            None => {
                let doc = default_chain(local_models);
                storage::write_json(path, &doc)?;
                doc
            }
        };

        let mut providers = doc.providers;
        for provider in &mut providers {
            apply_env_overrides(provider);
        }
        Ok(Self::from_providers(providers))
    }

    pub fn from_providers(providers: Vec<ProviderDescriptor>) -> Self {
        Self { providers }
    }

    pub fn get(&self, id: &str) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Enabled providers, priority ascending, ties broken by id.
    pub fn enabled(&self) -> Vec<&ProviderDescriptor> {
        let mut enabled: Vec<&ProviderDescriptor> =
            self.providers.iter().filter(|p| p.enabled).collect();
        enabled.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        enabled
    }

    /// First enabled, non-exhausted provider.
    pub fn first_available(&self, exhausted: &HashSet<String>) -> Option<&ProviderDescriptor> {
        self.enabled()
            .into_iter()
            .find(|p| p.is_free() || !exhausted.contains(&p.id))
    }

    /// Next enabled provider strictly after `current_id` in priority order,
    /// skipping exhausted ones. Free providers cannot be exhausted and are
    /// always candidates.
    pub fn next_after(
        &self,
        current_id: &str,
        exhausted: &HashSet<String>,
    ) -> Option<&ProviderDescriptor> {
        let current = self.get(current_id)?;
        self.enabled()
            .into_iter()
            .filter(|p| p.priority > current.priority)
            .find(|p| p.is_free() || !exhausted.contains(&p.id))
    }

    /// The premium provider: first in the enabled ordering.
    pub fn premium(&self) -> Option<&ProviderDescriptor> {
        self.enabled().into_iter().next()
    }

    /// The cheapest fallback: the first free enabled provider, else the last
    /// in the enabled ordering.
    pub fn cheapest(&self) -> Option<&ProviderDescriptor> {
        let enabled = self.enabled();
        enabled
            .iter()
            .find(|p| p.is_free())
            .copied()
            .or_else(|| enabled.last().copied())
    }
}

fn apply_env_overrides(provider: &mut ProviderDescriptor) {
    let prefix = provider.env_prefix();

    if let Ok(raw) = std::env::var(format!("{prefix}_DAILY_BUDGET_USD")) {
        match raw.trim().parse::<f64>() {
            Ok(value) if value >= 0.0 && value.is_finite() => provider.max_daily_usd = value,
            _ => tracing::warn!(
                "ignoring invalid {prefix}_DAILY_BUDGET_USD override: {raw:?}"
            ),
        }
    }

    if let Ok(raw) = std::env::var(format!("{prefix}_ENABLED")) {
        match raw.trim().to_lowercase().as_str() {
            "true" => provider.enabled = true,
            "false" => provider.enabled = false,
            _ => tracing::warn!("ignoring invalid {prefix}_ENABLED override: {raw:?}"),
        }
    }
}

/// The built-in minimal chain: one paid provider, then the free local one.
fn default_chain(local_models: &LocalModels) -> ChainDocument {
    ChainDocument {
        providers: vec![
            ProviderDescriptor {
                id: "anthropic".to_string(),
                priority: 1,
                enabled: true,
                max_daily_usd: 10.0,
                models: ProviderModels::uniform("claude-sonnet-4-20250514"),
            },
            ProviderDescriptor {
                id: "ollama".to_string(),
                priority: 100,
                enabled: true,
                max_daily_usd: 0.0,
                models: ProviderModels {
                    default: local_models.general.clone(),
                    coding: Some(local_models.coding.clone()),
                    vision: Some(local_models.vision.clone()),
                },
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn descriptor(id: &str, priority: i64, max_daily_usd: f64) -> ProviderDescriptor {
        ProviderDescriptor {
            id: id.to_string(),
            priority,
            enabled: true,
            max_daily_usd,
            models: ProviderModels::uniform(format!("{id}-default")),
        }
    }

    fn test_chain() -> ProviderChain {
        ProviderChain::from_providers(vec![
            descriptor("alpha", 1, 3.0),
            descriptor("beta", 2, 2.0),
            descriptor("gamma", 3, 1.0),
            descriptor("ollama", 100, 0.0),
        ])
    }

    #[test]
    fn enabled_orders_by_priority_then_id() {
        let chain = ProviderChain::from_providers(vec![
            descriptor("zeta", 2, 1.0),
            descriptor("alpha", 2, 1.0),
            descriptor("omega", 1, 1.0),
        ]);
        let ids: Vec<&str> = chain.enabled().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["omega", "alpha", "zeta"]);
    }

    #[test]
    fn disabled_providers_are_skipped() {
        let mut providers = vec![descriptor("alpha", 1, 3.0), descriptor("beta", 2, 2.0)];
        providers[0].enabled = false;
        let chain = ProviderChain::from_providers(providers);

        assert_eq!(
            chain.first_available(&HashSet::new()).map(|p| p.id.as_str()),
            Some("beta")
        );
    }

    #[test]
    fn next_after_skips_exhausted() {
        let chain = test_chain();
        let exhausted: HashSet<String> = ["beta".to_string()].into_iter().collect();

        let next = chain.next_after("alpha", &exhausted).unwrap();
        assert_eq!(next.id, "gamma");
    }

    #[test]
    fn free_provider_is_always_a_candidate() {
        let chain = test_chain();
        // A free id in the exhausted set must still be offered.
        let exhausted: HashSet<String> = ["beta", "gamma", "ollama"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let next = chain.next_after("alpha", &exhausted).unwrap();
        assert_eq!(next.id, "ollama");
    }

    #[test]
    fn next_after_unknown_provider_is_none() {
        let chain = test_chain();
        assert!(chain.next_after("missing", &HashSet::new()).is_none());
    }

    #[test]
    fn task_slots_fall_back_to_default() {
        let provider = ProviderDescriptor {
            id: "ollama".to_string(),
            priority: 1,
            enabled: true,
            max_daily_usd: 0.0,
            models: ProviderModels {
                default: "qwen3:8b".to_string(),
                coding: Some("qwen3-coder:30b".to_string()),
                vision: None,
            },
        };

        assert_eq!(provider.model_for_task(TaskKind::General), "qwen3:8b");
        assert_eq!(provider.model_for_task(TaskKind::Coding), "qwen3-coder:30b");
        assert_eq!(provider.model_for_task(TaskKind::Vision), "qwen3:8b");
        assert_eq!(
            provider.qualified_model(TaskKind::Coding),
            "ollama/qwen3-coder:30b"
        );
    }

    #[test]
    #[serial]
    fn env_overrides_apply_in_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider-chain.json");

        std::env::set_var("ANTHROPIC_DAILY_BUDGET_USD", "2.5");
        std::env::set_var("ANTHROPIC_ENABLED", "FALSE");

        let chain = ProviderChain::load(&path, &LocalModels::default()).unwrap();
        let anthropic = chain.get("anthropic").unwrap();
        assert_eq!(anthropic.max_daily_usd, 2.5);
        assert!(!anthropic.enabled);

        // The written default must not carry the overrides.
        let on_disk: ChainDocument = crate::storage::read_json(&path).unwrap();
        let stored = on_disk
            .providers
            .iter()
            .find(|p| p.id == "anthropic")
            .unwrap();
        assert_eq!(stored.max_daily_usd, 10.0);
        assert!(stored.enabled);

        std::env::remove_var("ANTHROPIC_DAILY_BUDGET_USD");
        std::env::remove_var("ANTHROPIC_ENABLED");
    }

    #[test]
    #[serial]
    fn invalid_env_overrides_are_ignored() {
        let mut provider = descriptor("kimi-cloud", 1, 3.0);
        std::env::set_var("KIMI_CLOUD_DAILY_BUDGET_USD", "plenty");
        std::env::set_var("KIMI_CLOUD_ENABLED", "maybe");

        apply_env_overrides(&mut provider);
        assert_eq!(provider.max_daily_usd, 3.0);
        assert!(provider.enabled);

        std::env::remove_var("KIMI_CLOUD_DAILY_BUDGET_USD");
        std::env::remove_var("KIMI_CLOUD_ENABLED");
    }

    #[test]
    fn default_chain_is_written_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider-chain.json");

        let chain = ProviderChain::load(&path, &LocalModels::default()).unwrap();
        assert!(path.exists());
        assert_eq!(chain.premium().map(|p| p.id.as_str()), Some("anthropic"));
        assert_eq!(chain.cheapest().map(|p| p.id.as_str()), Some("ollama"));
    }
}
