//! Host configuration patching
//!
//! The router owns exactly two paths inside the host's JSON config:
//! `agents.defaults.model.primary` and the `agents.defaults.models` map.
//! Everything else is carried through untouched; the edit works on a parsed
//! document and is written back atomically with a trailing newline.

pub mod restart;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{RouterError, RouterResult};
use crate::providers::{ProviderChain, TaskKind};
use crate::storage;

/// Short aliases installed for well-known models on first run.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("anthropic/claude-opus-4-20250514", "opus"),
    ("anthropic/claude-sonnet-4-20250514", "sonnet"),
    ("anthropic/claude-3-5-haiku-20241022", "haiku"),
    ("ollama/qwen3:8b", "qwen"),
    ("ollama/qwen3-coder:30b", "qwen-coder"),
    ("ollama/qwen3-vl:8b", "qwen-vl"),
];

/// A loaded host config bound to its file.
#[derive(Debug)]
pub struct HostConfig {
    path: PathBuf,
    doc: Value,
}

impl HostConfig {
    pub fn load(path: &Path) -> RouterResult<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RouterError::HostConfigMissing(path.to_path_buf()))
            }
            Err(e) => return Err(RouterError::Io(e)),
        };
        let doc: Value = serde_json::from_str(&raw)
            .map_err(|e| RouterError::HostConfigShape(e.to_string()))?;
        if !doc.is_object() {
            return Err(RouterError::HostConfigShape(
                "root is not a JSON object".to_string(),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    pub fn primary_model(&self) -> Option<&str> {
        self.doc
            .pointer("/agents/defaults/model/primary")
            .and_then(Value::as_str)
    }

    pub fn set_primary_model(&mut self, model_id: &str) {
        let model = ensure_object(&mut self.doc, &["agents", "defaults", "model"]);
        model.insert("primary".to_string(), Value::String(model_id.to_string()));
    }

    /// Make sure `agents.defaults.models[<model_id>]` exists, creating an
    /// empty entry if absent. Existing entries are left alone.
    pub fn ensure_model_entry(&mut self, model_id: &str) {
        let models = ensure_object(&mut self.doc, &["agents", "defaults", "models"]);
        models
            .entry(model_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    /// First-run install: alias entries for the chain's known models, and a
    /// primary pointer at the premium provider's default model if none is
    /// set yet.
    pub fn install_defaults(&mut self, chain: &ProviderChain) {
        for provider in chain.enabled() {
            for task in [TaskKind::General, TaskKind::Coding, TaskKind::Vision] {
                let model_id = provider.qualified_model(task);
                self.ensure_model_entry(&model_id);
                if let Some((_, alias)) = MODEL_ALIASES.iter().find(|(id, _)| *id == model_id) {
                    let models = ensure_object(&mut self.doc, &["agents", "defaults", "models"]);
                    if let Some(entry) = models.get_mut(&model_id).and_then(Value::as_object_mut) {
                        entry
                            .entry("alias".to_string())
                            .or_insert_with(|| Value::String(alias.to_string()));
                    }
                }
            }
        }

        if self.primary_model().is_none() {
            if let Some(premium) = chain.premium() {
                self.set_primary_model(&premium.qualified_model(TaskKind::General));
            }
        }
    }

    /// Whether the models table has been installed yet. Used to detect the
    /// very first run against a pristine host config.
    pub fn has_models_table(&self) -> bool {
        self.doc
            .pointer("/agents/defaults/models")
            .is_some_and(Value::is_object)
    }

    /// Write the document back atomically, pretty-printed with a trailing
    /// newline.
    pub fn save(&self) -> RouterResult<()> {
        let content = format!("{}\n", serde_json::to_string_pretty(&self.doc)?);
        storage::write_text(&self.path, &content)
            .map_err(|e| RouterError::StateWrite(e.to_string()))
    }

    #[cfg(test)]
    pub fn document(&self) -> &Value {
        &self.doc
    }
}

/// Walk (and create) a chain of nested objects, returning the innermost map.
fn ensure_object<'a>(root: &'a mut Value, path: &[&str]) -> &'a mut Map<String, Value> {
    let mut current = root;
    for key in path {
        let obj = current
            .as_object_mut()
            .expect("host config nodes on owned paths are objects");
        current = obj
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !current.is_object() {
            // A scalar squatting on an owned path gets replaced.
            *current = Value::Object(Map::new());
        }
    }
    current
        .as_object_mut()
        .expect("host config nodes on owned paths are objects")
}
