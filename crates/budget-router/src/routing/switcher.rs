//! Model switching and the cloud/local fallback state
//!
//! Switching writes the host config and restarts the host, so a switch made
//! on turn N takes effect on turn N+1. The switcher-state file exists only
//! while the agent runs on the local fallback; it carries the model to
//! restore and doubles as the lock that keeps a restart loop from
//! re-initiating the same switch.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{RouterError, RouterResult};
use crate::host::restart::restart_host;
use crate::host::HostConfig;
use crate::storage;

/// The provider id that is special-cased as the probeable free local one.
pub const LOCAL_PROVIDER_ID: &str = "ollama";

const PROBE_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchMode {
    Cloud,
    Local,
}

/// Persisted only while mode == local.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitcherState {
    pub mode: SwitchMode,
    pub original_model: String,
    pub switched_at: String,
    pub switched_model_id: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Performs switches against the host config and tracks fallback state.
pub struct ModelSwitcher<'a> {
    settings: &'a Settings,
}

impl<'a> ModelSwitcher<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    fn state_path(&self) -> PathBuf {
        self.settings.switcher_state_path()
    }

    pub fn state(&self) -> Option<SwitcherState> {
        storage::read_json(&self.state_path())
    }

    pub fn is_local(&self) -> bool {
        self.state().is_some_and(|s| s.mode == SwitchMode::Local)
    }

    /// Probe the local provider and verify the model is actually installed.
    pub async fn probe_local(&self, model: &str) -> RouterResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .map_err(|e| RouterError::LocalProviderUnavailable(e.to_string()))?;

        let url = format!("{}/api/tags", normalize_base_url(&self.settings.ollama_url));
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| RouterError::LocalProviderUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RouterError::LocalProviderUnavailable(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| RouterError::LocalProviderUnavailable(e.to_string()))?;
        if tags.models.iter().any(|tag| model_matches(&tag.name, model)) {
            Ok(())
        } else {
            Err(RouterError::LocalModelMissing(model.to_string()))
        }
    }

    /// Switch the host onto a provider's model. Local targets are probed
    /// first and tracked in the switcher-state file; a switch while already
    /// on local is a no-op. Returns whether a switch was performed.
    pub async fn apply_switch(&self, provider_id: &str, model: &str) -> RouterResult<bool> {
        if provider_id == LOCAL_PROVIDER_ID {
            self.switch_to_local(model).await
        } else {
            self.switch_to_cloud(provider_id, model).await
        }
    }

    async fn switch_to_cloud(&self, provider_id: &str, model: &str) -> RouterResult<bool> {
        let model_id = format!("{provider_id}/{model}");
        let mut host = HostConfig::load(&self.settings.host_config_path)?;
        host.set_primary_model(&model_id);
        host.ensure_model_entry(&model_id);
        host.save()?;
        tracing::info!("switched host primary model to {model_id}");

        restart_host(&self.settings.restart_command).await;
        Ok(true)
    }

    async fn switch_to_local(&self, model: &str) -> RouterResult<bool> {
        if self.is_local() {
            tracing::debug!("already on local fallback, not switching again");
            return Ok(false);
        }

        self.probe_local(model).await?;

        let mut host = HostConfig::load(&self.settings.host_config_path)?;
        let original_model = host.primary_model().unwrap_or_default().to_string();
        let model_id = format!("{LOCAL_PROVIDER_ID}/{model}");

        // The state file must exist before the config changes: it is the
        // lock that stops the post-restart plugin from switching again.
        let state = SwitcherState {
            mode: SwitchMode::Local,
            original_model,
            switched_at: Utc::now().to_rfc3339(),
            switched_model_id: model_id.clone(),
        };
        storage::write_json(&self.state_path(), &state)
            .map_err(|e| RouterError::StateWrite(e.to_string()))?;

        host.set_primary_model(&model_id);
        host.ensure_model_entry(&model_id);
        host.save()?;
        tracing::info!("switched host onto local fallback {model_id}");

        restart_host(&self.settings.restart_command).await;
        Ok(true)
    }

    /// Put the original model back after a healthy new day. Deletes the
    /// state file and restarts once. Returns whether a restore happened.
    pub async fn restore_original(&self) -> RouterResult<bool> {
        let Some(state) = self.state() else {
            return Ok(false);
        };
        if state.mode != SwitchMode::Local || state.original_model.is_empty() {
            storage::delete(&self.state_path())
                .map_err(|e| RouterError::StateWrite(e.to_string()))?;
            return Ok(false);
        }

        let mut host = HostConfig::load(&self.settings.host_config_path)?;
        host.set_primary_model(&state.original_model);
        host.ensure_model_entry(&state.original_model);
        host.save()?;
        storage::delete(&self.state_path())
            .map_err(|e| RouterError::StateWrite(e.to_string()))?;
        tracing::info!(
            "new day with healthy budget, restored original model {}",
            state.original_model
        );

        restart_host(&self.settings.restart_command).await;
        Ok(true)
    }
}

/// `OLLAMA_URL` may arrive without a scheme or with a trailing slash.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Tag names match exactly, or by repository name when only one side carries
/// a `:tag` suffix (`qwen3` matches `qwen3:8b`).
fn model_matches(tag_name: &str, wanted: &str) -> bool {
    if tag_name == wanted {
        return true;
    }
    let repo = |name: &str| name.split(':').next().unwrap_or(name).to_string();
    (!tag_name.contains(':') || !wanted.contains(':')) && repo(tag_name) == repo(wanted)
}
