//! # Pipeline Stages
//!
//! Stage enum and the explicit transition table `(stage, signal) -> stage`.
//! The table is the only place routing decisions live; stage bodies just
//! report a [`Signal`].

use serde::{Deserialize, Serialize};

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Turning the query into search keywords
    Planning,
    /// Fanning out over search backends
    Retrieval,
    /// Waiting for the user to approve candidates
    Interrupted,
    /// Pulling structured content out of approved items
    Extraction,
    /// Writing the draft
    Generation,
    /// Checking citations
    Validation,
    /// Classifying findings and choosing a retry target
    Reflection,
    /// Complete
    Completed,
    /// Failed
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Retrieval => "retrieval",
            Stage::Interrupted => "interrupted",
            Stage::Extraction => "extraction",
            Stage::Generation => "generation",
            Stage::Validation => "validation",
            Stage::Reflection => "reflection",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "planning" => Stage::Planning,
            "retrieval" => Stage::Retrieval,
            "interrupted" => Stage::Interrupted,
            "extraction" => Stage::Extraction,
            "generation" => Stage::Generation,
            "validation" => Stage::Validation,
            "reflection" => Stage::Reflection,
            "completed" => Stage::Completed,
            "failed" => Stage::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where reflection sends a failed draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTarget {
    Generation,
    Retrieval,
}

/// Outcome reported by a stage (or an external action)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stage finished normally
    Advance,
    /// User approved a candidate set
    Approved,
    ValidationPassed,
    ValidationFailed,
    Retry(RetryTarget),
    RetriesExhausted,
    /// User asked for a revision of a finished draft
    Continue,
    /// Timeout or fatal stage error
    Abort,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Advance => f.write_str("advance"),
            Signal::Approved => f.write_str("approved"),
            Signal::ValidationPassed => f.write_str("validation_passed"),
            Signal::ValidationFailed => f.write_str("validation_failed"),
            Signal::Retry(RetryTarget::Generation) => f.write_str("retry_generation"),
            Signal::Retry(RetryTarget::Retrieval) => f.write_str("retry_retrieval"),
            Signal::RetriesExhausted => f.write_str("retries_exhausted"),
            Signal::Continue => f.write_str("continue"),
            Signal::Abort => f.write_str("abort"),
        }
    }
}

/// The transition table. `None` means the signal is not valid in that stage.
pub fn next_stage(stage: Stage, signal: Signal) -> Option<Stage> {
    use Signal::*;
    use Stage::*;

    match (stage, signal) {
        (Completed | Failed, Continue) => Some(Generation),
        (Completed | Failed, _) => None,
        (_, Abort) => Some(Failed),

        (Planning, Advance) => Some(Retrieval),
        // retrieval always ends at the approval gate
        (Retrieval, Advance) => Some(Interrupted),
        (Interrupted, Approved) => Some(Extraction),
        (Extraction, Advance) => Some(Generation),
        (Generation, Advance) => Some(Validation),
        (Validation, ValidationPassed) => Some(Completed),
        (Validation, ValidationFailed) => Some(Reflection),
        (Reflection, Retry(RetryTarget::Generation)) => Some(Generation),
        (Reflection, Retry(RetryTarget::Retrieval)) => Some(Retrieval),
        (Reflection, RetriesExhausted) => Some(Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut stage = Stage::Planning;
        for signal in [
            Signal::Advance,
            Signal::Advance,
            Signal::Approved,
            Signal::Advance,
            Signal::Advance,
            Signal::ValidationPassed,
        ] {
            stage = next_stage(stage, signal).unwrap();
        }
        assert_eq!(stage, Stage::Completed);
    }

    #[test]
    fn test_interrupt_only_left_by_approval() {
        assert_eq!(next_stage(Stage::Interrupted, Signal::Advance), None);
        assert_eq!(
            next_stage(Stage::Interrupted, Signal::Approved),
            Some(Stage::Extraction)
        );
        assert_eq!(next_stage(Stage::Retrieval, Signal::Approved), None);
    }

    #[test]
    fn test_reflection_routes() {
        assert_eq!(
            next_stage(Stage::Reflection, Signal::Retry(RetryTarget::Generation)),
            Some(Stage::Generation)
        );
        assert_eq!(
            next_stage(Stage::Reflection, Signal::Retry(RetryTarget::Retrieval)),
            Some(Stage::Retrieval)
        );
        assert_eq!(
            next_stage(Stage::Reflection, Signal::RetriesExhausted),
            Some(Stage::Failed)
        );
    }

    #[test]
    fn test_terminal_states() {
        assert_eq!(next_stage(Stage::Completed, Signal::Abort), None);
        assert_eq!(next_stage(Stage::Failed, Signal::Advance), None);
        assert_eq!(
            next_stage(Stage::Completed, Signal::Continue),
            Some(Stage::Generation)
        );
        assert_eq!(next_stage(Stage::Extraction, Signal::Abort), Some(Stage::Failed));
    }

    #[test]
    fn test_stage_names_round_trip() {
        for stage in [Stage::Planning, Stage::Interrupted, Stage::Reflection, Stage::Failed] {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
    }
}
