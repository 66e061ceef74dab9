//! # Pipeline Errors
//!
//! Session-level failures surfaced by the driver. Every variant maps to a
//! stable [`ErrorCategory`] so callers never see internal traces.

use serde::{Deserialize, Serialize};

use crate::workflow::stage::Stage;

/// Stable, user-visible error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    SessionNotFound,
    InvalidApproval,
    StaleVersion,
    NotAwaitingApproval,
    NoDraft,
    GenerationFailed,
    RetrievalFailed,
    RetriesExhausted,
    Storage,
    InvalidTransition,
    SessionBusy,
    SessionFailed,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::SessionNotFound => "session_not_found",
            Self::InvalidApproval => "invalid_approval",
            Self::StaleVersion => "stale_version",
            Self::NotAwaitingApproval => "not_awaiting_approval",
            Self::NoDraft => "no_draft",
            Self::GenerationFailed => "generation_failed",
            Self::RetrievalFailed => "retrieval_failed",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Storage => "storage",
            Self::InvalidTransition => "invalid_transition",
            Self::SessionBusy => "session_busy",
            Self::SessionFailed => "session_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "timeout" => Self::Timeout,
            "session_not_found" => Self::SessionNotFound,
            "invalid_approval" => Self::InvalidApproval,
            "stale_version" => Self::StaleVersion,
            "not_awaiting_approval" => Self::NotAwaitingApproval,
            "no_draft" => Self::NoDraft,
            "generation_failed" => Self::GenerationFailed,
            "retrieval_failed" => Self::RetrievalFailed,
            "retries_exhausted" => Self::RetriesExhausted,
            "storage" => Self::Storage,
            "invalid_transition" => Self::InvalidTransition,
            "session_busy" => Self::SessionBusy,
            "session_failed" => Self::SessionFailed,
            _ => return None,
        })
    }

    /// Whether this failure aborts the session it occurred in.
    ///
    /// Lookup and precondition failures (unknown session, stale patch, wrong
    /// state) are rejected without touching the session.
    pub fn aborts_session(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::InvalidApproval
                | Self::GenerationFailed
                | Self::RetrievalFailed
                | Self::RetriesExhausted
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main driver error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Whole-run wall-clock budget elapsed
    #[error("pipeline timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Approval payload did not name any known candidate
    #[error("invalid approval: {0}")]
    InvalidApproval(String),

    /// Patch was computed against an older checkpoint
    #[error("stale patch: expected version {expected}, latest is {latest}")]
    StaleVersion { expected: u64, latest: u64 },

    #[error("session {0} is not waiting for approval")]
    NotAwaitingApproval(String),

    #[error("session {0} has no draft yet")]
    NoDraft(String),

    /// Structured generation failed at pipeline level (not contained)
    #[error("{stage} generation failed: {message}")]
    Generation { stage: Stage, message: String },

    /// Every retrieval sub-unit failed
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("invalid transition from {from} on {signal}")]
    InvalidTransition { from: Stage, signal: String },

    /// Another call is already driving this session
    #[error("session {0} is already running")]
    Busy(String),

    /// The session was aborted; only a fresh start can replace it
    #[error("session {0} has failed and cannot be resumed")]
    Failed(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl PipelineError {
    /// Stable category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::SessionNotFound(_) => ErrorCategory::SessionNotFound,
            Self::InvalidApproval(_) => ErrorCategory::InvalidApproval,
            Self::StaleVersion { .. } => ErrorCategory::StaleVersion,
            Self::NotAwaitingApproval(_) => ErrorCategory::NotAwaitingApproval,
            Self::NoDraft(_) => ErrorCategory::NoDraft,
            Self::Generation { .. } => ErrorCategory::GenerationFailed,
            Self::Retrieval(_) => ErrorCategory::RetrievalFailed,
            Self::InvalidTransition { .. } => ErrorCategory::InvalidTransition,
            Self::Busy(_) => ErrorCategory::SessionBusy,
            Self::Failed(_) => ErrorCategory::SessionFailed,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// Short message safe to show to a user
    pub fn user_message(&self) -> String {
        match self {
            // storage internals stay in the logs
            Self::Storage(_) => "internal storage error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Category plus short message, as recorded on a failed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&PipelineError> for SessionError {
    fn from(err: &PipelineError) -> Self {
        Self {
            category: err.category(),
            message: err.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip_names() {
        for category in [
            ErrorCategory::Timeout,
            ErrorCategory::InvalidApproval,
            ErrorCategory::RetriesExhausted,
            ErrorCategory::StaleVersion,
            ErrorCategory::SessionFailed,
        ] {
            assert_eq!(ErrorCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(ErrorCategory::parse("bogus"), None);
    }

    #[test]
    fn test_storage_message_is_opaque() {
        let err = PipelineError::Storage(anyhow::anyhow!("disk I/O error at page 7"));
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(!err.user_message().contains("page 7"));
    }

    #[test]
    fn test_precondition_errors_do_not_abort() {
        assert!(!ErrorCategory::StaleVersion.aborts_session());
        assert!(!ErrorCategory::SessionNotFound.aborts_session());
        assert!(!ErrorCategory::SessionFailed.aborts_session());
        assert!(ErrorCategory::Timeout.aborts_session());
        assert!(ErrorCategory::InvalidApproval.aborts_session());
    }
}
