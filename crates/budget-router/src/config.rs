//! Plugin settings
//!
//! Everything the router can be told from outside comes through the
//! environment. A `.env` file next to the process is loaded first via
//! `dotenvy`; variables already present in the shell environment always win.

use std::env;
use std::path::PathBuf;

use crate::providers::TaskKind;

pub const DEFAULT_DAILY_BUDGET_USD: f64 = 5.0;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_CONTEXT_MAX_TOKENS: usize = 120_000;
pub const DEFAULT_CONTEXT_KEEP_RECENT: usize = 20;
pub const DEFAULT_SESSION_KEY: &str = "agent:main:main";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_RESTART_COMMAND: &str = "openclaw gateway restart";

pub const DEFAULT_LOCAL_GENERAL_MODEL: &str = "qwen3:8b";
pub const DEFAULT_LOCAL_CODING_MODEL: &str = "qwen3-coder:30b";
pub const DEFAULT_LOCAL_VISION_MODEL: &str = "qwen3-vl:8b";

/// How the pre-turn model recommendation behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRouting {
    Off,
    Advisory,
}

/// Local model names per task role, resolvable from `LOCAL_MODEL*` vars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalModels {
    pub general: String,
    pub coding: String,
    pub vision: String,
}

impl Default for LocalModels {
    fn default() -> Self {
        Self {
            general: DEFAULT_LOCAL_GENERAL_MODEL.to_string(),
            coding: DEFAULT_LOCAL_CODING_MODEL.to_string(),
            vision: DEFAULT_LOCAL_VISION_MODEL.to_string(),
        }
    }
}

impl LocalModels {
    fn from_env() -> Self {
        let defaults = Self::default();
        // LOCAL_MODEL overrides every role; per-role vars override that again.
        let all = env::var("LOCAL_MODEL").ok();
        let pick = |specific: &str, fallback: &str| {
            env::var(specific)
                .ok()
                .or_else(|| all.clone())
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            general: pick("LOCAL_MODEL_GENERAL", &defaults.general),
            coding: pick("LOCAL_MODEL_CODING", &defaults.coding),
            vision: pick("LOCAL_MODEL_VISION", &defaults.vision),
        }
    }

    pub fn for_task(&self, task: TaskKind) -> &str {
        match task {
            TaskKind::General => &self.general,
            TaskKind::Coding => &self.coding,
            TaskKind::Vision => &self.vision,
        }
    }
}

/// Resolved plugin settings for one handler invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Chain mode walks the provider chain; legacy mode tracks one budget.
    pub chain_mode: bool,
    pub data_dir: PathBuf,
    pub host_config_path: PathBuf,
    pub sessions_dir: PathBuf,
    pub session_key: String,
    pub ollama_url: String,
    pub restart_command: String,
    pub daily_budget_usd: f64,
    pub failure_threshold: u32,
    pub model_routing: ModelRouting,
    pub prompt_optimization: bool,
    pub truncation_enabled: bool,
    pub context_max_tokens: usize,
    pub context_keep_recent: usize,
    pub local_models: LocalModels,
}

impl Settings {
    /// Load `.env` (existing environment wins) and resolve settings.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Resolve settings from the current process environment only.
    pub fn from_env() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let openclaw_dir = home.join(".openclaw");

        let data_dir = env::var("BUDGET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| openclaw_dir.join("budget-router").join("data"));
        let host_config_path = env::var("OPENCLAW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| openclaw_dir.join("openclaw.json"));
        let sessions_dir = env::var("OPENCLAW_SESSIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| openclaw_dir.join("sessions"));

        Self {
            chain_mode: env_flag("USE_CHAIN_MODE", false),
            data_dir,
            host_config_path,
            sessions_dir,
            session_key: env::var("SESSION_KEY")
                .unwrap_or_else(|_| DEFAULT_SESSION_KEY.to_string()),
            ollama_url: env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string()),
            restart_command: env::var("OPENCLAW_RESTART_COMMAND")
                .unwrap_or_else(|_| DEFAULT_RESTART_COMMAND.to_string()),
            daily_budget_usd: env_parse("DAILY_BUDGET_USD", DEFAULT_DAILY_BUDGET_USD),
            failure_threshold: env_parse("FAILURE_THRESHOLD", DEFAULT_FAILURE_THRESHOLD),
            model_routing: match env::var("AUTO_MODEL_ROUTING").as_deref() {
                Ok("off") | Ok("OFF") => ModelRouting::Off,
                _ => ModelRouting::Advisory,
            },
            prompt_optimization: !env_flag("DISABLE_PROMPT_OPTIMIZATION", false),
            truncation_enabled: env_flag("CONTEXT_TRUNCATION_ENABLED", true),
            context_max_tokens: env_parse("CONTEXT_MAX_TOKENS", DEFAULT_CONTEXT_MAX_TOKENS),
            context_keep_recent: env_parse("CONTEXT_KEEP_RECENT", DEFAULT_CONTEXT_KEEP_RECENT),
            local_models: LocalModels::from_env(),
        }
    }

    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join("provider-chain.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("chain-budget.json")
    }

    pub fn legacy_ledger_path(&self) -> PathBuf {
        self.data_dir.join("budget.json")
    }

    pub fn failure_path(&self) -> PathBuf {
        self.data_dir.join("failure-tracker.json")
    }

    pub fn switcher_state_path(&self) -> PathBuf {
        self.data_dir.join("switcher-state.json")
    }

    pub fn sessions_index_path(&self) -> PathBuf {
        self.sessions_dir.join("sessions.json")
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_router_env() {
        for key in [
            "USE_CHAIN_MODE",
            "BUDGET_DATA_DIR",
            "OPENCLAW_CONFIG",
            "OPENCLAW_SESSIONS_DIR",
            "SESSION_KEY",
            "OLLAMA_URL",
            "OPENCLAW_RESTART_COMMAND",
            "DAILY_BUDGET_USD",
            "FAILURE_THRESHOLD",
            "AUTO_MODEL_ROUTING",
            "DISABLE_PROMPT_OPTIMIZATION",
            "CONTEXT_TRUNCATION_ENABLED",
            "CONTEXT_MAX_TOKENS",
            "CONTEXT_KEEP_RECENT",
            "LOCAL_MODEL",
            "LOCAL_MODEL_GENERAL",
            "LOCAL_MODEL_CODING",
            "LOCAL_MODEL_VISION",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_without_environment() {
        clear_router_env();
        let settings = Settings::from_env();

        assert!(!settings.chain_mode);
        assert_eq!(settings.daily_budget_usd, DEFAULT_DAILY_BUDGET_USD);
        assert_eq!(settings.failure_threshold, DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(settings.model_routing, ModelRouting::Advisory);
        assert!(settings.prompt_optimization);
        assert!(settings.truncation_enabled);
        assert_eq!(settings.context_max_tokens, DEFAULT_CONTEXT_MAX_TOKENS);
        assert_eq!(settings.context_keep_recent, DEFAULT_CONTEXT_KEEP_RECENT);
        assert_eq!(settings.session_key, DEFAULT_SESSION_KEY);
        assert_eq!(settings.local_models, LocalModels::default());
    }

    #[test]
    #[serial]
    fn environment_overrides_apply() {
        clear_router_env();
        std::env::set_var("USE_CHAIN_MODE", "true");
        std::env::set_var("DAILY_BUDGET_USD", "12.5");
        std::env::set_var("FAILURE_THRESHOLD", "5");
        std::env::set_var("AUTO_MODEL_ROUTING", "off");
        std::env::set_var("DISABLE_PROMPT_OPTIMIZATION", "true");
        std::env::set_var("CONTEXT_TRUNCATION_ENABLED", "false");
        std::env::set_var("BUDGET_DATA_DIR", "/tmp/router-data");

        let settings = Settings::from_env();
        assert!(settings.chain_mode);
        assert_eq!(settings.daily_budget_usd, 12.5);
        assert_eq!(settings.failure_threshold, 5);
        assert_eq!(settings.model_routing, ModelRouting::Off);
        assert!(!settings.prompt_optimization);
        assert!(!settings.truncation_enabled);
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/router-data"));
        assert_eq!(
            settings.chain_path(),
            PathBuf::from("/tmp/router-data/provider-chain.json")
        );

        clear_router_env();
    }

    #[test]
    #[serial]
    fn local_model_overrides_layer_correctly() {
        clear_router_env();
        std::env::set_var("LOCAL_MODEL", "llama3:8b");
        std::env::set_var("LOCAL_MODEL_CODING", "qwen3-coder:7b");

        let models = LocalModels::from_env();
        assert_eq!(models.general, "llama3:8b");
        assert_eq!(models.vision, "llama3:8b");
        assert_eq!(models.coding, "qwen3-coder:7b");

        clear_router_env();
    }

    #[test]
    #[serial]
    fn invalid_numeric_values_fall_back() {
        clear_router_env();
        std::env::set_var("DAILY_BUDGET_USD", "not-a-number");
        std::env::set_var("FAILURE_THRESHOLD", "-3");

        let settings = Settings::from_env();
        assert_eq!(settings.daily_budget_usd, DEFAULT_DAILY_BUDGET_USD);
        assert_eq!(settings.failure_threshold, DEFAULT_FAILURE_THRESHOLD);

        clear_router_env();
    }
}
