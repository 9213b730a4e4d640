//! Legacy single-budget mode
//!
//! The original deployment tracked one daily cap for the whole agent and
//! forced every task onto a local model once the cap was hit. Chain mode
//! supersedes it, but installs that predate the chain document still run
//! this path (`USE_CHAIN_MODE` unset).

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::usage::TurnUsage;
use super::{today_utc, Transaction};
use crate::config::LocalModels;
use crate::providers::TaskKind;
use crate::routing::task::classify_task;
use crate::storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDocument {
    pub date: String,
    pub spent_usd: f64,
    pub transactions: Vec<Transaction>,
}

/// What the agent should do about the next turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAction {
    Allow,
    ForceLocal,
}

/// Result of a legacy budget check.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCheck {
    pub action: BudgetAction,
    pub forced_model: Option<String>,
    pub task_type: TaskKind,
    pub remaining: f64,
}

/// Single-cap budget bound to `budget.json`.
#[derive(Debug)]
pub struct LegacyBudget {
    path: PathBuf,
    doc: LegacyDocument,
    budget_usd: f64,
}

impl LegacyBudget {
    pub fn load(path: &Path, budget_usd: f64) -> Result<Self> {
        Self::load_with_status(path, budget_usd).map(|(budget, _)| budget)
    }

    pub fn load_with_status(path: &Path, budget_usd: f64) -> Result<(Self, bool)> {
        let today = today_utc();
        match storage::read_json::<LegacyDocument>(path) {
            Some(doc) if doc.date == today => Ok((
                Self {
                    path: path.to_path_buf(),
                    doc,
                    budget_usd,
                },
                false,
            )),
            Some(stale) => {
                tracing::info!(
                    "daily budget rolled over from {} to {today}",
                    stale.date
                );
                let budget = Self {
                    path: path.to_path_buf(),
                    doc: fresh_document(&today),
                    budget_usd,
                };
                budget.save()?;
                Ok((budget, true))
            }
            None => {
                let budget = Self {
                    path: path.to_path_buf(),
                    doc: fresh_document(&today),
                    budget_usd,
                };
                budget.save()?;
                Ok((budget, false))
            }
        }
    }

    pub fn spent(&self) -> f64 {
        self.doc.spent_usd
    }

    pub fn remaining(&self) -> f64 {
        (self.budget_usd - self.doc.spent_usd).max(0.0)
    }

    pub fn exhausted(&self) -> bool {
        self.doc.spent_usd >= self.budget_usd
    }

    pub fn record(&mut self, turn: &TurnUsage) -> Result<()> {
        self.doc.spent_usd += turn.cost_usd;
        self.doc.transactions.push(Transaction {
            provider: "default".to_string(),
            model: turn.model.clone(),
            input_tokens: turn.input_tokens,
            output_tokens: turn.output_tokens,
            cost_usd: turn.cost_usd,
            timestamp: Utc::now().to_rfc3339(),
        });
        self.save()
    }

    pub fn last_transaction_timestamp(&self) -> Option<DateTime<Utc>> {
        self.doc.transactions.last().and_then(|tx| {
            DateTime::parse_from_rfc3339(&tx.timestamp)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
    }

    /// Decide whether the next turn may stay on the cloud model or must be
    /// forced onto the task-appropriate local one.
    pub fn check_budget(
        &self,
        prompt: &str,
        messages: &[Value],
        local_models: &LocalModels,
    ) -> BudgetCheck {
        let task_type = classify_task(prompt, messages);
        if self.exhausted() {
            BudgetCheck {
                action: BudgetAction::ForceLocal,
                forced_model: Some(local_models.for_task(task_type).to_string()),
                task_type,
                remaining: self.remaining(),
            }
        } else {
            BudgetCheck {
                action: BudgetAction::Allow,
                forced_model: None,
                task_type,
                remaining: self.remaining(),
            }
        }
    }

    fn save(&self) -> Result<()> {
        storage::write_json(&self.path, &self.doc)
    }
}

fn fresh_document(date: &str) -> LegacyDocument {
    LegacyDocument {
        date: date.to_string(),
        spent_usd: 0.0,
        transactions: Vec::new(),
    }
}
