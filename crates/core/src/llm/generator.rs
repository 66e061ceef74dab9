//! # Structured Generation
//!
//! The capability every LLM-driven stage depends on: given a prompt, return
//! a schema-typed value or a tagged error. Stages pattern-match on the tag
//! instead of trusting the shape of a dynamic response.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::retry::Retryable;

/// Tagged failure of a structured completion
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    /// Network, rate limit, provider overload; worth retrying in place
    #[error("transient generation error: {0}")]
    Transient(String),
    /// Response did not conform to the requested schema
    #[error("schema error: {0}")]
    Schema(String),
    /// Configuration or provider rejection; retrying will not help
    #[error("generation failed: {0}")]
    Fatal(String),
}

impl Retryable for GenerationError {
    fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

pub type GenerationResult<T> = Result<T, GenerationError>;

/// System instructions plus user content
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Planner output
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct KeywordPlan {
    /// Short search queries, most important first
    pub keywords: Vec<String>,
}

/// Extractor output for one item
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct ExtractionOutput {
    /// One or two sentences on what the work contributes
    pub core_contribution: String,
    #[serde(default)]
    pub problem: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub findings: Option<String>,
    #[serde(default)]
    pub limitations: Option<String>,
}

/// Writer outline
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct OutlineOutput {
    pub title: String,
    pub section_headings: Vec<String>,
}

/// Writer output for one section
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct SectionOutput {
    /// Section body with `{cite:N}` markers
    pub content: String,
}

/// Entailment judgement for one (statement, source) pair
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct EntailmentOutput {
    /// "entails", "insufficient" or "contradicts"
    pub label: String,
    /// Confidence in the label (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Parsed entailment label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntailmentLabel {
    Entails,
    Insufficient,
    Contradicts,
}

impl EntailmentOutput {
    /// Unknown labels count as insufficient
    pub fn label(&self) -> EntailmentLabel {
        match self.label.trim().to_ascii_lowercase().as_str() {
            "entails" | "entailment" | "supported" => EntailmentLabel::Entails,
            "contradicts" | "contradiction" => EntailmentLabel::Contradicts,
            _ => EntailmentLabel::Insufficient,
        }
    }
}

/// Structured completion capability, one method per schema
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn keywords(&self, prompt: &Prompt) -> GenerationResult<KeywordPlan>;

    async fn extract(&self, prompt: &Prompt) -> GenerationResult<ExtractionOutput>;

    async fn outline(&self, prompt: &Prompt) -> GenerationResult<OutlineOutput>;

    async fn section(&self, prompt: &Prompt) -> GenerationResult<SectionOutput>;

    async fn judge(&self, prompt: &Prompt) -> GenerationResult<EntailmentOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parsing() {
        let out = |label: &str| EntailmentOutput {
            label: label.to_string(),
            confidence: 0.9,
            rationale: None,
        };
        assert_eq!(out("Entails").label(), EntailmentLabel::Entails);
        assert_eq!(out(" contradicts ").label(), EntailmentLabel::Contradicts);
        assert_eq!(out("maybe").label(), EntailmentLabel::Insufficient);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(GenerationError::Transient("429".into()).is_transient());
        assert!(!GenerationError::Schema("bad".into()).is_transient());
        assert!(!GenerationError::Fatal("no key".into()).is_transient());
    }
}
