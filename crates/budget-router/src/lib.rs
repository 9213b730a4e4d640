//! Budget-and-failure-aware model routing for the OpenClaw agent runtime.
//!
//! The router runs inside the host as an event-driven plugin. It keeps a
//! per-day ledger of what each model provider has cost, walks an ordered
//! provider chain as budgets run out or providers start failing, rewrites
//! the host's default-model pointer (followed by a host restart) when a
//! switch is due, and truncates the host's session log when the transcript
//! outgrows the usable context window.
//!
//! The host integration surface is [`register`], which subscribes a
//! [`BudgetRouter`] to the `before_agent_start` and `agent_end` hooks. All
//! state lives in JSON files under the data directory, written via
//! temp-file rename so a crash or a concurrent reader never sees a torn
//! document.

pub mod config;
pub mod error;
pub mod failure;
pub mod hooks;
pub mod host;
pub mod ledger;
pub mod providers;
pub mod routing;
pub mod session;
pub mod storage;

pub use config::Settings;
pub use error::{RouterError, RouterResult};
pub use hooks::{
    register, AgentEndEvent, AgentStartEvent, BudgetRouter, HookKind, HookOutcome, HookSubscriber,
    PluginApi,
};
pub use routing::{Decision, Router, SwitchReason};
