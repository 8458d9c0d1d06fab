//! Model policy files and profile resolution.
//!
//! Each theater carries `repo/policy/model_policy.json` naming the model
//! profiles callers may request and the models overrides may select. The
//! Conductor resolves a profile plus caller overrides into the config the
//! Worker executes with.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("model policy not found for theater {0}")]
    NotFound(String),
    #[error("failed to read model policy: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse model policy: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown model profile: {0}")]
    UnknownProfile(String),
    #[error("model {0} not in allowlist")]
    ModelNotAllowed(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;

/// A single named profile in the policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// The on-disk policy schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPolicy {
    #[serde(default)]
    pub profiles: BTreeMap<String, ModelProfile>,
    #[serde(default)]
    pub allowlist_models: Vec<String>,
}

/// Model configuration handed to the Worker after profile + override merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedModelConfig {
    pub model: String,
    /// Older emitters omitted this; readers must tolerate its absence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResolvedModelConfig {
    pub fn profile_name(&self) -> &str {
        self.profile_name.as_deref().unwrap_or("unknown")
    }

    /// The config minus `model` and `profile_name`, as fed to the
    /// fingerprint.
    pub fn fingerprint_overrides(&self) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.remove("model");
        map.remove("profile_name");
        map
    }
}

impl ModelPolicy {
    /// Locate the policy file for a theater, falling back to the
    /// `default` theater.
    pub fn find(theaters_root: &Path, theater: &str) -> Result<PathBuf> {
        let candidates = [
            theaters_root
                .join(theater)
                .join("repo/policy/model_policy.json"),
            theaters_root.join("default/repo/policy/model_policy.json"),
        ];
        candidates
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| PolicyError::NotFound(theater.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Merge a requested profile with caller overrides.
    ///
    /// A `model` override must be in the allowlist; `temperature` and
    /// `max_tokens` pass through; all other override keys are ignored.
    pub fn resolve(
        &self,
        profile_name: &str,
        overrides: &Map<String, Value>,
    ) -> Result<ResolvedModelConfig> {
        let profile = self
            .profiles
            .get(profile_name)
            .ok_or_else(|| PolicyError::UnknownProfile(profile_name.to_string()))?;

        let mut config = ResolvedModelConfig {
            model: profile.model.clone(),
            profile_name: Some(profile_name.to_string()),
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            extra: Map::new(),
        };

        if let Some(model) = overrides.get("model").and_then(Value::as_str) {
            if !self.allowlist_models.iter().any(|m| m == model) {
                return Err(PolicyError::ModelNotAllowed(model.to_string()));
            }
            config.model = model.to_string();
        }
        if let Some(temperature) = overrides.get("temperature").and_then(Value::as_f64) {
            config.temperature = Some(temperature);
        }
        if let Some(max_tokens) = overrides.get("max_tokens").and_then(Value::as_u64) {
            config.max_tokens = Some(max_tokens as u32);
        }

        Ok(config)
    }
}
