//! # Radkit Generator
//!
//! [`StructuredGenerator`] backed by radkit `LlmFunction`s. Provider matching
//! happens once in [`run_llm_function!`]; provider errors are classified into
//! the transient/schema/fatal tags here.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use super::generator::{
    EntailmentOutput, ExtractionOutput, GenerationError, GenerationResult, KeywordPlan,
    OutlineOutput, Prompt, SectionOutput, StructuredGenerator,
};
use crate::models::{LlmTask, ModelConfig, ModelSettings};

/// Run an LlmFunction with any provider.
#[macro_export]
macro_rules! run_llm_function {
    ($config:expr, $output_type:ty, $system_prompt:expr, $input:expr) => {{
        use radkit::agent::LlmFunction;
        use radkit::models::providers::{
            AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
        };
        use $crate::models::LlmProvider;

        let config = $config;
        let result: anyhow::Result<$output_type> = match config.provider {
            LlmProvider::Anthropic => {
                let llm = AnthropicLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::OpenAI => {
                let mut llm = OpenAILlm::from_env(&config.model)?;
                if let Some(base_url) = &config.base_url {
                    llm = llm.with_base_url(base_url);
                }
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::Gemini => {
                let llm = GeminiLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::OpenRouter => {
                let llm = OpenRouterLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::Grok => {
                let llm = GrokLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::DeepSeek => {
                let llm = DeepSeekLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
        };
        result
    }};
}

pub use run_llm_function;

macro_rules! structured_call {
    ($self:ident, $prompt:ident, $output_type:ty, $task:expr) => {{
        let config = $self.settings.for_task($task);
        let result: anyhow::Result<$output_type> = async {
            run_llm_function!(
                &config,
                $output_type,
                $prompt.system.clone(),
                $prompt.user.clone()
            )
        }
        .await;
        result.map_err(|e| classify(&config, &e))
    }};
}

/// Generator that talks to the configured LLM providers
pub struct RadkitGenerator {
    settings: ModelSettings,
}

impl RadkitGenerator {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl StructuredGenerator for RadkitGenerator {
    async fn keywords(&self, prompt: &Prompt) -> GenerationResult<KeywordPlan> {
        structured_call!(self, prompt, KeywordPlan, LlmTask::Planning)
    }

    async fn extract(&self, prompt: &Prompt) -> GenerationResult<ExtractionOutput> {
        structured_call!(self, prompt, ExtractionOutput, LlmTask::Extraction)
    }

    async fn outline(&self, prompt: &Prompt) -> GenerationResult<OutlineOutput> {
        structured_call!(self, prompt, OutlineOutput, LlmTask::Writing)
    }

    async fn section(&self, prompt: &Prompt) -> GenerationResult<SectionOutput> {
        structured_call!(self, prompt, SectionOutput, LlmTask::Writing)
    }

    async fn judge(&self, prompt: &Prompt) -> GenerationResult<EntailmentOutput> {
        structured_call!(self, prompt, EntailmentOutput, LlmTask::Entailment)
    }
}

/// Map a provider error onto the generation tags
fn classify(config: &ModelConfig, err: &anyhow::Error) -> GenerationError {
    let message = format!("{:#}", err);
    let category = classify_message(&message);
    tracing::debug!(
        provider = ?config.provider,
        model = %config.model,
        "Structured completion failed: {}",
        message
    );
    match category {
        ErrorClass::Transient => GenerationError::Transient(message),
        ErrorClass::Schema => GenerationError::Schema(message),
        ErrorClass::Fatal => GenerationError::Fatal(message),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ErrorClass {
    Transient,
    Schema,
    Fatal,
}

/// Status codes only count next to a status word, so "max_tokens 1500"
/// stays fatal
static RETRYABLE_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:status|http|code)\b\D{0,3}(?:429|5\d\d)\b").expect("valid status regex")
});

fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    const TRANSIENT: &[&str] = &[
        "rate limit",
        "too many requests",
        "timeout",
        "timed out",
        "connection",
        "overloaded",
        "internal server error",
        "bad gateway",
        "service unavailable",
        "temporarily",
    ];
    const SCHEMA: &[&str] = &["parse", "json", "schema", "deserializ", "missing field"];

    if RETRYABLE_STATUS.is_match(&lower) || TRANSIENT.iter().any(|needle| lower.contains(needle)) {
        ErrorClass::Transient
    } else if SCHEMA.iter().any(|needle| lower.contains(needle)) {
        ErrorClass::Schema
    } else {
        ErrorClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_messages() {
        assert_eq!(classify_message("HTTP 429 Too Many Requests"), ErrorClass::Transient);
        assert_eq!(classify_message("connection reset by peer"), ErrorClass::Transient);
        assert_eq!(
            classify_message("failed to parse JSON: missing field `content`"),
            ErrorClass::Schema
        );
        assert_eq!(
            classify_message("ANTHROPIC_API_KEY not set"),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_status_codes_need_context() {
        assert_eq!(classify_message("HTTP 503"), ErrorClass::Transient);
        assert_eq!(classify_message("API error (status: 502)"), ErrorClass::Transient);
        assert_eq!(classify_message("status code 529 overloaded_error"), ErrorClass::Transient);
        assert_eq!(
            classify_message("max_tokens 1500 exceeds the model limit of 1024"),
            ErrorClass::Fatal
        );
        assert_eq!(classify_message("invalid model id claude-3-5-sonnet-20241022"), ErrorClass::Fatal);
    }
}
