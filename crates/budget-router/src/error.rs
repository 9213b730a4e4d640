//! Router domain errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the routing and switching machinery.
///
/// None of these ever reach the host: the hook adapters swallow and log
/// every failure so the host sees "no interference" at worst.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("host config not found at {0}")]
    HostConfigMissing(PathBuf),

    #[error("host config has an unexpected shape: {0}")]
    HostConfigShape(String),

    #[error("local provider unavailable: {0}")]
    LocalProviderUnavailable(String),

    #[error("model {0} is not installed on the local provider")]
    LocalModelMissing(String),

    #[error("provider not found in chain: {0}")]
    ProviderNotFound(String),

    #[error("all providers exhausted")]
    AllProvidersExhausted,

    #[error("state write failed: {0}")]
    StateWrite(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterError {
    /// Whether the local switch should be abandoned rather than retried
    /// within the same turn.
    pub fn aborts_local_switch(&self) -> bool {
        matches!(
            self,
            Self::LocalProviderUnavailable(_) | Self::LocalModelMissing(_)
        )
    }
}

pub type RouterResult<T> = Result<T, RouterError>;
