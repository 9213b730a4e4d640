//! Daily budget ledger
//!
//! One document per UTC day: per-provider spend rows, the append-only
//! transaction list, the active provider pointer and the switch history.
//! Loads detect day rollover lazily and atomically replace the document with
//! a fresh one before any other state is read.

pub mod legacy;
pub mod usage;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::ProviderChain;
use crate::storage;
use self::usage::TurnUsage;

/// One recorded model call, append-only within a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub timestamp: String,
}

/// Per-provider spend row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpend {
    pub spent_usd: f64,
    pub exhausted: bool,
}

/// One switch decision, kept for the day for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRecord {
    pub from: String,
    pub to: String,
    pub at: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    pub date: String,
    pub providers: BTreeMap<String, ProviderSpend>,
    pub transactions: Vec<Transaction>,
    pub active_provider: String,
    pub switch_history: Vec<SwitchRecord>,
}

/// Per-provider snapshot for status surfaces and tests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub id: String,
    pub spent_usd: f64,
    pub max_daily_usd: f64,
    pub remaining_usd: f64,
    pub exhausted: bool,
}

pub fn today_utc() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// The chain-mode ledger bound to its on-disk file.
#[derive(Debug)]
pub struct BudgetLedger {
    path: PathBuf,
    doc: LedgerDocument,
}

impl BudgetLedger {
    pub fn load(path: &Path, chain: &ProviderChain) -> Result<Self> {
        Self::load_with_status(path, chain).map(|(ledger, _)| ledger)
    }

    /// Load the ledger, resetting on day rollover. The returned flag is true
    /// only when an older-day document was replaced; it is the signal that
    /// drives the restore-to-original-model path.
    pub fn load_with_status(path: &Path, chain: &ProviderChain) -> Result<(Self, bool)> {
        let today = today_utc();
        match storage::read_json::<LedgerDocument>(path) {
            Some(doc) if doc.date == today => Ok((
                Self {
                    path: path.to_path_buf(),
                    doc,
                },
                false,
            )),
            Some(stale) => {
                tracing::info!(
                    "budget ledger rolled over from {} to {today}, resetting spends",
                    stale.date
                );
                let ledger = Self {
                    path: path.to_path_buf(),
                    doc: fresh_document(&today, chain),
                };
                ledger.save()?;
                Ok((ledger, true))
            }
            None => {
                let ledger = Self {
                    path: path.to_path_buf(),
                    doc: fresh_document(&today, chain),
                };
                ledger.save()?;
                Ok((ledger, false))
            }
        }
    }

    pub fn date(&self) -> &str {
        &self.doc.date
    }

    pub fn active_provider(&self) -> &str {
        &self.doc.active_provider
    }

    pub fn document(&self) -> &LedgerDocument {
        &self.doc
    }

    /// Record one turn's usage against a provider and persist.
    pub fn record_transaction(
        &mut self,
        chain: &ProviderChain,
        provider: &str,
        turn: &TurnUsage,
    ) -> Result<()> {
        let row = self.doc.providers.entry(provider.to_string()).or_default();
        row.spent_usd += turn.cost_usd;
        if let Some(descriptor) = chain.get(provider) {
            if !descriptor.is_free() && row.spent_usd >= descriptor.max_daily_usd {
                row.exhausted = true;
            }
        }

        self.doc.transactions.push(Transaction {
            provider: provider.to_string(),
            model: turn.model.clone(),
            input_tokens: turn.input_tokens,
            output_tokens: turn.output_tokens,
            cost_usd: turn.cost_usd,
            timestamp: Utc::now().to_rfc3339(),
        });
        self.save()
    }

    pub fn spent(&self, provider: &str) -> f64 {
        self.doc
            .providers
            .get(provider)
            .map(|row| row.spent_usd)
            .unwrap_or(0.0)
    }

    /// Remaining budget for a provider, clamped at zero. Free providers
    /// report zero remaining but are never exhausted.
    pub fn remaining(&self, chain: &ProviderChain, provider: &str) -> f64 {
        let Some(descriptor) = chain.get(provider) else {
            return 0.0;
        };
        (descriptor.max_daily_usd - self.spent(provider)).max(0.0)
    }

    /// Fraction of the daily cap already spent, in [0, 1]. Free providers
    /// are always fully available.
    pub fn percent_used(&self, chain: &ProviderChain, provider: &str) -> f64 {
        match chain.get(provider) {
            Some(descriptor) if !descriptor.is_free() => {
                (self.spent(provider) / descriptor.max_daily_usd).min(1.0)
            }
            _ => 0.0,
        }
    }

    /// Whether a provider's spend has reached its cap. Spend equal to the
    /// cap counts as exhausted; a free provider never does.
    pub fn exhausted(&self, chain: &ProviderChain, provider: &str) -> bool {
        let Some(descriptor) = chain.get(provider) else {
            return false;
        };
        if descriptor.is_free() {
            return false;
        }
        let row = self.doc.providers.get(provider);
        row.map(|r| r.exhausted).unwrap_or(false)
            || self.spent(provider) >= descriptor.max_daily_usd
    }

    pub fn exhausted_set(&self, chain: &ProviderChain) -> HashSet<String> {
        chain
            .enabled()
            .into_iter()
            .filter(|p| self.exhausted(chain, &p.id))
            .map(|p| p.id.clone())
            .collect()
    }

    /// Mark a provider exhausted regardless of recorded spend. Ignored for
    /// free providers.
    pub fn mark_exhausted(&mut self, chain: &ProviderChain, provider: &str) -> Result<()> {
        if chain.get(provider).is_some_and(|p| p.is_free()) {
            return Ok(());
        }
        self.doc
            .providers
            .entry(provider.to_string())
            .or_default()
            .exhausted = true;
        self.save()
    }

    pub fn set_active(&mut self, provider: &str) -> Result<()> {
        self.doc.active_provider = provider.to_string();
        self.save()
    }

    /// Append a switch record and move the active pointer.
    pub fn record_switch(&mut self, from: &str, to: &str, reason: &str) -> Result<()> {
        self.doc.switch_history.push(SwitchRecord {
            from: from.to_string(),
            to: to.to_string(),
            at: Utc::now().to_rfc3339(),
            reason: reason.to_string(),
        });
        self.doc.active_provider = to.to_string();
        self.save()
    }

    pub fn total_spent(&self) -> f64 {
        self.doc.providers.values().map(|row| row.spent_usd).sum()
    }

    /// Timestamp of the most recently recorded transaction, the `since`
    /// cutoff for the next aggregation.
    pub fn last_transaction_timestamp(&self) -> Option<DateTime<Utc>> {
        self.doc.transactions.last().and_then(|tx| {
            DateTime::parse_from_rfc3339(&tx.timestamp)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
    }

    pub fn summary(&self, chain: &ProviderChain) -> Vec<ProviderSummary> {
        chain
            .enabled()
            .into_iter()
            .map(|p| ProviderSummary {
                id: p.id.clone(),
                spent_usd: self.spent(&p.id),
                max_daily_usd: p.max_daily_usd,
                remaining_usd: self.remaining(chain, &p.id),
                exhausted: self.exhausted(chain, &p.id),
            })
            .collect()
    }

    fn save(&self) -> Result<()> {
        storage::write_json(&self.path, &self.doc)
    }
}

fn fresh_document(date: &str, chain: &ProviderChain) -> LedgerDocument {
    let providers = chain
        .enabled()
        .into_iter()
        .map(|p| (p.id.clone(), ProviderSpend::default()))
        .collect();
    LedgerDocument {
        date: date.to_string(),
        providers,
        transactions: Vec::new(),
        active_provider: chain
            .premium()
            .map(|p| p.id.clone())
            .unwrap_or_default(),
        switch_history: Vec::new(),
    }
}
