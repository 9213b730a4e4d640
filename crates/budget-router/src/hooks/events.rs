//! Host hook events
//!
//! The host fires two events at the router: one before a turn starts and one
//! after it ends. Message payloads stay as raw JSON values; their shape
//! varies by provider SDK and is interpreted leniently downstream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The hooks this plugin subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeAgentStart,
    AgentEnd,
}

impl HookKind {
    pub fn name(&self) -> &'static str {
        match self {
            HookKind::BeforeAgentStart => "before_agent_start",
            HookKind::AgentEnd => "agent_end",
        }
    }
}

/// Fired before the host dispatches a turn to the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStartEvent {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Fired after a turn completes, with the final message trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentEndEvent {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a pre-turn handler hands back to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepend_context: Option<String>,
}

impl HookOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_context(context: impl Into<String>) -> Self {
        Self {
            prepend_context: Some(context.into()),
        }
    }
}
