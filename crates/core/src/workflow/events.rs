//! # Workflow Events
//!
//! Progress events emitted by the driver after every state change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::Stage;

/// Kind of workflow event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    /// Session created, planning about to run
    SessionStarted,
    StageStarted,
    /// Stage merged and checkpointed
    StageCompleted,
    StageFailed,
    /// Waiting for candidate approval
    InterruptRaised,
    /// Approval or continuation accepted, execution continuing
    Resumed,
    /// Reflection sent the session back to an earlier stage
    RetryScheduled,
    SessionCompleted,
    SessionFailed,
}

/// An event in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: WorkflowEventKind,
    pub session_id: String,
    #[serde(default)]
    pub stage: Option<Stage>,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl WorkflowEvent {
    pub fn new(kind: WorkflowEventKind, session_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            session_id: session_id.to_string(),
            stage: None,
            data: None,
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = WorkflowEvent::new(WorkflowEventKind::StageStarted, "s-1")
            .with_stage(Stage::Retrieval);

        assert_eq!(event.session_id, "s-1");
        assert_eq!(event.stage, Some(Stage::Retrieval));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "stage_started");
        assert_eq!(json["stage"], "retrieval");
    }
}
