//! # Blackboard
//!
//! The state object threaded through every stage. Stages never mutate it
//! directly: they return a [`BlackboardPatch`] and the driver merges it.
//!
//! Each field has one merge discipline:
//!
//! | field            | discipline |
//! |------------------|------------|
//! | `logs`           | append     |
//! | `messages`       | append     |
//! | `trace`          | append     |
//! | everything else  | overwrite  |
//!
//! Overwrite fields in a patch are `Option`s: `None` leaves the current value
//! untouched. Fields that must be clearable use `Option<Option<T>>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::documents::{CandidateItem, ConversationMessage, Draft, Language};
use crate::stages::reflection::ReflectionDecision;
use crate::stages::validator::ValidationReport;
use crate::workflow::stage::Stage;

/// Record of one stage handing over to the next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageHandoff {
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
}

/// Shared, mergeable pipeline state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Blackboard {
    pub query: String,
    pub language: Language,
    /// Search backends requested for this session (empty = all configured)
    pub sources: Vec<String>,
    pub keywords: Vec<String>,
    pub candidates: Vec<CandidateItem>,
    /// Approved items actually placed in the last writing context
    pub supplied_ids: Vec<String>,
    pub draft: Option<Draft>,
    pub validation: Option<ValidationReport>,
    pub reflection: Option<ReflectionDecision>,
    pub retry_count: u32,
    /// Latest user instruction for a continuation
    pub instruction: Option<String>,
    pub is_continuation: bool,
    pub logs: Vec<String>,
    pub messages: Vec<ConversationMessage>,
    pub trace: Vec<StageHandoff>,
}

impl Blackboard {
    pub fn new(query: impl Into<String>, language: Language) -> Self {
        Self {
            query: query.into(),
            language,
            ..Default::default()
        }
    }

    /// Approved candidates in list order; position + 1 is the citation index
    pub fn approved(&self) -> Vec<&CandidateItem> {
        self.candidates.iter().filter(|c| c.approved).collect()
    }

    /// Owned copy of the approved list
    pub fn approved_items(&self) -> Vec<CandidateItem> {
        self.approved().into_iter().cloned().collect()
    }

    /// Merge a stage result, each field by its declared discipline
    pub fn merge(&mut self, patch: BlackboardPatch) {
        overwrite(&mut self.keywords, patch.keywords);
        overwrite(&mut self.candidates, patch.candidates);
        overwrite(&mut self.supplied_ids, patch.supplied_ids);
        overwrite(&mut self.draft, patch.draft);
        overwrite(&mut self.validation, patch.validation);
        overwrite(&mut self.reflection, patch.reflection);
        overwrite(&mut self.retry_count, patch.retry_count);
        overwrite(&mut self.instruction, patch.instruction);
        overwrite(&mut self.is_continuation, patch.is_continuation);
        append(&mut self.logs, patch.logs);
        append(&mut self.messages, patch.messages);
        append(&mut self.trace, patch.trace);
    }
}

fn overwrite<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn append<T>(slot: &mut Vec<T>, values: Vec<T>) {
    slot.extend(values);
}

/// Partial update produced by a stage or an external action
#[derive(Debug, Clone, Default)]
pub struct BlackboardPatch {
    pub keywords: Option<Vec<String>>,
    pub candidates: Option<Vec<CandidateItem>>,
    pub supplied_ids: Option<Vec<String>>,
    pub draft: Option<Option<Draft>>,
    pub validation: Option<Option<ValidationReport>>,
    pub reflection: Option<Option<ReflectionDecision>>,
    pub retry_count: Option<u32>,
    pub instruction: Option<Option<String>>,
    pub is_continuation: Option<bool>,
    pub logs: Vec<String>,
    pub messages: Vec<ConversationMessage>,
    pub trace: Vec<StageHandoff>,
}

impl BlackboardPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a human-readable log line
    pub fn log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn handoff(mut self, from: Stage, to: Stage) -> Self {
        self.trace.push(StageHandoff {
            from,
            to,
            at: Utc::now(),
        });
        self
    }

    pub fn message(mut self, message: ConversationMessage) -> Self {
        self.messages.push(message);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Blackboard {
        let mut board = Blackboard::new("graph neural networks", Language::En);
        board.keywords = vec!["gnn".to_string()];
        board.candidates = vec![
            CandidateItem::new("p1", "A", "pubmed"),
            CandidateItem::new("p2", "B", "pubmed"),
        ];
        board.logs = vec!["planned".to_string()];
        board
    }

    #[test]
    fn test_append_fields_concatenate_in_order() {
        let mut board = board();
        board.merge(BlackboardPatch::new().log("retrieved").log("approved"));
        assert_eq!(board.logs, vec!["planned", "retrieved", "approved"]);
    }

    #[test]
    fn test_absent_overwrite_fields_are_untouched() {
        let mut board = board();
        let before = board.clone();
        board.merge(BlackboardPatch {
            retry_count: Some(2),
            ..Default::default()
        });

        assert_eq!(board.retry_count, 2);
        assert_eq!(board.keywords, before.keywords);
        assert_eq!(board.candidates, before.candidates);
        assert_eq!(board.query, before.query);
        assert_eq!(board.logs, before.logs);
    }

    #[test]
    fn test_clearable_fields() {
        let mut board = board();
        board.instruction = Some("shorten".to_string());
        board.merge(BlackboardPatch {
            instruction: Some(None),
            ..Default::default()
        });
        assert_eq!(board.instruction, None);
    }

    #[test]
    fn test_approved_preserves_list_order() {
        let mut board = board();
        board.candidates.push(CandidateItem::new("p3", "C", "pubmed"));
        board.candidates[2].approved = true;
        board.candidates[0].approved = true;

        let ids: Vec<&str> = board.approved().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[test]
    fn test_messages_and_trace_append() {
        let mut board = board();
        board.merge(
            BlackboardPatch::new()
                .message(ConversationMessage::user("graph neural networks"))
                .handoff(Stage::Planning, Stage::Retrieval),
        );
        board.merge(
            BlackboardPatch::new()
                .message(ConversationMessage::assistant("Draft ready"))
                .handoff(Stage::Retrieval, Stage::Interrupted),
        );

        assert_eq!(board.messages.len(), 2);
        assert_eq!(board.messages[1].content, "Draft ready");
        let hops: Vec<(Stage, Stage)> = board.trace.iter().map(|h| (h.from, h.to)).collect();
        assert_eq!(
            hops,
            vec![
                (Stage::Planning, Stage::Retrieval),
                (Stage::Retrieval, Stage::Interrupted)
            ]
        );
    }
}
