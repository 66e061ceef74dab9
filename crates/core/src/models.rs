//! # Scholar Models
//!
//! LLM provider selection for the generation capability.
//!
//! Each pipeline task (planning, extraction, writing, entailment) can pin its
//! own provider/model; anything unset falls back to the global choice.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported LLM providers
///
/// API keys are read from the environment by the provider client:
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Gemini (Google) - `GEMINI_API_KEY`
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
/// - Grok (xAI) - `XAI_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    /// Parse a provider name as it appears in config files and CLI flags
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAI),
            "gemini" => Some(Self::Gemini),
            "openrouter" => Some(Self::OpenRouter),
            "grok" => Some(Self::Grok),
            "deepseek" => Some(Self::DeepSeek),
            _ => None,
        }
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }

    /// Model used when nothing more specific is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Gemini => "gemini-2.0-flash",
            LlmProvider::OpenRouter => "anthropic/claude-3.5-sonnet",
            LlmProvider::Grok => "grok-2",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }
}

/// Pipeline task that issues structured completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmTask {
    Planning,
    Extraction,
    Writing,
    Entailment,
}

impl LlmTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmTask::Planning => "planning",
            LlmTask::Extraction => "extraction",
            LlmTask::Writing => "writing",
            LlmTask::Entailment => "entailment",
        }
    }
}

/// Concrete provider/model pair handed to the LLM client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::with_provider(LlmProvider::Anthropic, LlmProvider::Anthropic.default_model())
    }
}

impl ModelConfig {
    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Global model choice plus per-task overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub provider: LlmProvider,
    /// Global model; provider default when unset
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Per-task model overrides (task -> model name)
    pub task_models: HashMap<LlmTask, String>,
    /// Per-task provider overrides (task -> provider)
    pub task_providers: HashMap<LlmTask, LlmProvider>,
}

impl ModelSettings {
    /// Resolve the model for a task: per-task override -> global -> provider default
    pub fn for_task(&self, task: LlmTask) -> ModelConfig {
        let provider = self
            .task_providers
            .get(&task)
            .cloned()
            .unwrap_or_else(|| self.provider.clone());

        let model = self
            .task_models
            .get(&task)
            .or(self.model.as_ref())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = if provider.supports_base_url() {
            self.base_url.clone()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, LlmProvider::Anthropic);
        assert!(config.model.contains("claude"));
    }

    #[test]
    fn test_base_url_support() {
        assert!(LlmProvider::OpenAI.supports_base_url());
        assert!(!LlmProvider::Anthropic.supports_base_url());
    }

    #[test]
    fn test_task_override_wins() {
        let mut settings = ModelSettings {
            model: Some("claude-opus".to_string()),
            ..Default::default()
        };
        settings
            .task_models
            .insert(LlmTask::Entailment, "claude-haiku".to_string());

        assert_eq!(settings.for_task(LlmTask::Entailment).model, "claude-haiku");
        assert_eq!(settings.for_task(LlmTask::Writing).model, "claude-opus");
    }

    #[test]
    fn test_base_url_dropped_for_unsupported_provider() {
        let mut settings = ModelSettings {
            base_url: Some("http://localhost:11434/v1".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.for_task(LlmTask::Planning).base_url, None);

        settings
            .task_providers
            .insert(LlmTask::Planning, LlmProvider::OpenAI);
        let config = settings.for_task(LlmTask::Planning);
        assert_eq!(config.model, "gpt-4o");
        assert!(config.base_url.is_some());
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(LlmProvider::parse("OpenAI"), Some(LlmProvider::OpenAI));
        assert_eq!(LlmProvider::parse("mistral"), None);
    }
}
