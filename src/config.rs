//! Engine configuration.
//!
//! Serializable settings for the annotation engine, allowing callers to
//! export and import their tuning (undo depth, mask thresholds, pending
//! prompt policy).

use serde::{Deserialize, Serialize};

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// What to do with a prompt submitted before the model finished loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PendingPolicy {
    /// Queue at most one prompt (latest wins) and flush it on model ready
    #[default]
    QueueLatest,
    /// Reject the prompt with `ModelNotLoaded`
    Reject,
}

impl PendingPolicy {
    /// Get the display name for this policy.
    pub fn name(&self) -> &'static str {
        match self {
            PendingPolicy::QueueLatest => "Queue latest",
            PendingPolicy::Reject => "Reject",
        }
    }
}

/// Engine configuration that can be exported and imported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version of the configuration format
    pub version: u32,

    /// Maximum number of commands kept in undo history per document
    #[serde(default = "default_max_undo")]
    pub max_undo: usize,

    /// Probability above which a mask pixel counts as foreground
    #[serde(default = "default_mask_threshold")]
    pub mask_threshold: f32,

    /// Perpendicular-distance tolerance (pixels) for polygon simplification
    #[serde(default = "default_simplify_tolerance")]
    pub simplify_tolerance: f32,

    /// Minimum width/height (pixels) for a drawn bounding box to commit
    #[serde(default = "default_min_box_size")]
    pub min_box_size: f32,

    /// Handling of prompts issued before the model is ready
    #[serde(default)]
    pub pending_policy: PendingPolicy,
}

fn default_max_undo() -> usize {
    50
}

fn default_mask_threshold() -> f32 {
    0.5
}

fn default_simplify_tolerance() -> f32 {
    2.0
}

fn default_min_box_size() -> f32 {
    5.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            max_undo: default_max_undo(),
            mask_threshold: default_mask_threshold(),
            simplify_tolerance: default_simplify_tolerance(),
            min_box_size: default_min_box_size(),
            pending_policy: PendingPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Serialize the configuration to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a configuration from JSON.
    ///
    /// A version mismatch is tolerated (missing fields fall back to
    /// defaults) but logged so the caller can re-export.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Self = serde_json::from_str(json)?;
        if config.version != CONFIG_VERSION {
            log::warn!(
                "Config version mismatch: expected {}, found {}",
                CONFIG_VERSION,
                config.version
            );
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips() {
        let config = EngineConfig::default();
        let json = config.to_json().expect("serialize");
        let restored = EngineConfig::from_json(&json).expect("deserialize");
        assert_eq!(restored.max_undo, 50);
        assert_eq!(restored.pending_policy, PendingPolicy::QueueLatest);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = EngineConfig::from_json(r#"{"version": 1}"#).expect("deserialize");
        assert_eq!(config.mask_threshold, 0.5);
        assert_eq!(config.min_box_size, 5.0);
    }

    #[test]
    fn pending_policy_uses_lowercase_names() {
        let json = serde_json::to_string(&PendingPolicy::Reject).expect("serialize");
        assert_eq!(json, "\"reject\"");
    }
}
