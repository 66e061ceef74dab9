//! # Scholar Configuration
//!
//! Runtime knobs for the review pipeline, persisted at `.scholar/config.json`.
//! Every field is defaulted so partial files and partial updates both work.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ModelSettings;

/// Default location of the persisted config
pub const CONFIG_PATH: &str = ".scholar/config.json";

/// Retry policy for outbound calls (search backends, structured generation)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Time-windowed failure tracking for search backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthSettings {
    /// Failures inside the window that make a backend skipped
    pub failure_threshold: usize,
    pub window_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_secs: 120,
        }
    }
}

/// Semantic citation check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EntailmentSettings {
    pub enabled: bool,
    /// Minimum fraction of entailed statements
    pub min_ratio: f64,
    pub concurrency: usize,
}

impl Default for EntailmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_ratio: 0.8,
            concurrency: 2,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScholarConfig {
    /// Reflection-driven retries before a session fails
    pub max_retries: u32,
    /// Wall-clock budget for one drive of the pipeline
    pub timeout_secs: u64,
    /// Parallel structured-generation calls inside a stage
    pub llm_concurrency: usize,
    /// Parallel search calls inside the retrieval stage
    pub retrieval_concurrency: usize,
    pub max_keywords: usize,
    pub items_per_query: usize,
    /// Cap on approved items extracted and placed in the writing context
    pub max_context_items: usize,
    pub context_token_budget: usize,
    pub retry: RetrySettings,
    pub backend_health: HealthSettings,
    pub entailment: EntailmentSettings,
    pub model: ModelSettings,
    /// Enabled search backends by name
    pub sources: Vec<String>,
    pub database_path: PathBuf,
}

impl Default for ScholarConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_secs: 300,
            llm_concurrency: 2,
            retrieval_concurrency: 3,
            max_keywords: 5,
            items_per_query: 5,
            max_context_items: 25,
            context_token_budget: 6000,
            retry: RetrySettings::default(),
            backend_health: HealthSettings::default(),
            entailment: EntailmentSettings::default(),
            model: ModelSettings::default(),
            sources: vec!["semantic_scholar".to_string(), "pubmed".to_string()],
            database_path: PathBuf::from(".scholar/scholar.db"),
        }
    }
}

impl ScholarConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Load from the default path, falling back to defaults
    pub async fn load() -> Self {
        Self::load_from(CONFIG_PATH).await
    }

    /// Load from a path; a missing or unreadable file yields defaults
    pub async fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed config");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub async fn save(&self) -> Result<()> {
        self.save_to(CONFIG_PATH).await
    }

    pub async fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Apply a partial update; only fields present in the patch replace
    pub fn merge(&mut self, patch: ConfigPatch) {
        if let Some(v) = patch.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = patch.timeout_secs {
            self.timeout_secs = v;
        }
        if let Some(v) = patch.llm_concurrency {
            self.llm_concurrency = v.max(1);
        }
        if let Some(v) = patch.retrieval_concurrency {
            self.retrieval_concurrency = v.max(1);
        }
        if let Some(v) = patch.max_keywords {
            self.max_keywords = v;
        }
        if let Some(v) = patch.items_per_query {
            self.items_per_query = v;
        }
        if let Some(v) = patch.max_context_items {
            self.max_context_items = v;
        }
        if let Some(v) = patch.context_token_budget {
            self.context_token_budget = v;
        }
        if let Some(v) = patch.entailment_enabled {
            self.entailment.enabled = v;
        }
        if let Some(v) = patch.min_entailment_ratio {
            self.entailment.min_ratio = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.model {
            self.model = v;
        }
        if let Some(v) = patch.sources {
            self.sources = v;
        }
    }
}

/// Partial configuration update
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_keywords: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_per_query: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_token_budget: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entailment_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_entailment_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScholarConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.backend_health.failure_threshold, 3);
        assert!((config.entailment.min_ratio - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: ScholarConfig =
            serde_json::from_str(r#"{"max_retries": 1, "entailment": {"enabled": false}}"#)
                .unwrap();
        assert_eq!(config.max_retries, 1);
        assert!(!config.entailment.enabled);
        assert_eq!(config.entailment.concurrency, 2);
        assert_eq!(config.items_per_query, 5);
    }

    #[test]
    fn test_merge_only_present_fields() {
        let mut config = ScholarConfig::default();
        config.merge(ConfigPatch {
            max_retries: Some(5),
            min_entailment_ratio: Some(1.7),
            ..Default::default()
        });
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.entailment.min_ratio, 1.0);
        assert_eq!(config.timeout_secs, 300);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("scholar-config-{}.json", uuid::Uuid::new_v4()));
        let mut config = ScholarConfig::default();
        config.sources = vec!["pubmed".to_string()];
        config.save_to(&path).await.unwrap();

        let loaded = ScholarConfig::load_from(&path).await;
        assert_eq!(loaded, config);

        let _ = std::fs::remove_file(&path);
    }
}
