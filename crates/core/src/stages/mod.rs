//! # Stages
//!
//! Stage functions. Each consumes the blackboard by reference and returns a
//! [`BlackboardPatch`](crate::state::BlackboardPatch); none of them writes
//! state or decides routing.

pub mod citations;
pub mod extractor;
pub mod planner;
pub mod prompts;
pub mod reflection;
pub mod retriever;
pub mod validator;
pub mod writer;

use std::sync::Arc;

use crate::config::ScholarConfig;
use crate::llm::StructuredGenerator;
use crate::retry::RetryPolicy;
use crate::search::{BackendHealth, SearchBackend};
use crate::state::ConversationMessage;

pub use reflection::{ReflectionDecision, ReflectionEntry};
pub use validator::{FindingCategory, FixHint, ValidationFinding, ValidationReport};

/// Collaborators and limits shared by every stage
#[derive(Clone)]
pub struct StageContext {
    pub generator: Arc<dyn StructuredGenerator>,
    pub backends: Vec<Arc<dyn SearchBackend>>,
    pub health: Arc<BackendHealth>,
    pub config: Arc<ScholarConfig>,
    /// Backoff for outbound calls
    pub retry: RetryPolicy,
}

impl StageContext {
    pub fn new(
        generator: Arc<dyn StructuredGenerator>,
        backends: Vec<Arc<dyn SearchBackend>>,
        config: ScholarConfig,
    ) -> Self {
        Self {
            generator,
            backends,
            health: Arc::new(BackendHealth::from_settings(&config.backend_health)),
            retry: RetryPolicy::from(&config.retry),
            config: Arc::new(config),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

/// Turns kept when briefing a continuation
pub const MAX_CONVERSATION_TURNS: usize = 5;

/// Last few turns (user + assistant pairs) as `Role: content` lines
pub(crate) fn conversation_context(messages: &[ConversationMessage]) -> String {
    let keep = MAX_CONVERSATION_TURNS * 2;
    let recent = &messages[messages.len().saturating_sub(keep)..];
    recent
        .iter()
        .map(|m| {
            let role = if m.role == "user" { "User" } else { "Assistant" };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
