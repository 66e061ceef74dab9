//! # Interrupt Controller
//!
//! The approval gate before extraction. Suspending writes a checkpoint with
//! `pending_interrupt = true`; the only way past it is an approval payload,
//! merged onto the full suspended blackboard and committed with the flag
//! cleared.

use std::collections::HashSet;

use crate::error::PipelineError;
use crate::state::{Blackboard, BlackboardPatch, Checkpoint, CheckpointStore};
use crate::workflow::stage::Stage;

/// What an approval request finds at the gate
#[derive(Debug)]
pub enum GateState {
    /// Suspended, waiting for this checkpoint to be approved
    Pending(Checkpoint),
    /// Already released by an approval naming exactly these ids
    AlreadyApproved(Checkpoint),
    /// Not at the gate, or released with a different set
    Elsewhere(Checkpoint),
}

pub struct InterruptController<'a> {
    checkpoints: &'a CheckpointStore,
}

impl<'a> InterruptController<'a> {
    pub fn new(checkpoints: &'a CheckpointStore) -> Self {
        Self { checkpoints }
    }

    /// Park the session at the gate
    pub fn suspend(&self, session_id: &str, board: &Blackboard) -> Result<Checkpoint, PipelineError> {
        Ok(self
            .checkpoints
            .commit(session_id, Stage::Interrupted, board, true)?)
    }

    /// Classify the latest checkpoint against an approval request.
    ///
    /// `expected_version`, when given, must equal the latest version.
    pub fn inspect(
        &self,
        session_id: &str,
        approved_ids: &[String],
        expected_version: Option<u64>,
    ) -> Result<GateState, PipelineError> {
        let latest = self
            .checkpoints
            .latest(session_id)?
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;

        if let Some(expected) = expected_version {
            if expected != latest.version {
                return Err(PipelineError::StaleVersion {
                    expected,
                    latest: latest.version,
                });
            }
        }

        if latest.pending_interrupt {
            return Ok(GateState::Pending(latest));
        }

        let requested: HashSet<&str> = approved_ids.iter().map(String::as_str).collect();
        let current: HashSet<&str> = latest
            .blackboard
            .approved()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        let released = latest.stage != Stage::Planning && latest.stage != Stage::Retrieval;
        if released && !current.is_empty() && requested == current {
            Ok(GateState::AlreadyApproved(latest))
        } else {
            Ok(GateState::Elsewhere(latest))
        }
    }

    /// Patch that sets approval flags; every candidate not named is unapproved
    pub fn approval_patch(board: &Blackboard, approved_ids: &[String]) -> Result<BlackboardPatch, PipelineError> {
        let wanted: HashSet<&str> = approved_ids.iter().map(String::as_str).collect();
        let candidates: Vec<_> = board
            .candidates
            .iter()
            .cloned()
            .map(|mut c| {
                c.approved = wanted.contains(c.id.as_str());
                c
            })
            .collect();

        let approved = candidates.iter().filter(|c| c.approved).count();
        if approved == 0 {
            return Err(PipelineError::InvalidApproval(format!(
                "none of the {} submitted ids match a candidate",
                approved_ids.len()
            )));
        }
        let unknown = wanted.len().saturating_sub(approved);

        let mut patch = BlackboardPatch {
            candidates: Some(candidates),
            ..Default::default()
        }
        .log(format!(
            "Approved {} of {} candidates",
            approved,
            board.candidates.len()
        ));
        if unknown > 0 {
            patch = patch.log(format!("Ignored {} unknown ids in approval", unknown));
        }
        Ok(patch)
    }

    /// Clear the gate: commit the approved board as the extraction checkpoint
    pub fn release(&self, session_id: &str, board: &Blackboard) -> Result<Checkpoint, PipelineError> {
        Ok(self
            .checkpoints
            .commit(session_id, Stage::Extraction, board, false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CandidateItem, Language, ScholarDb, SessionStore};

    fn board() -> Blackboard {
        let mut board = Blackboard::new("gnn", Language::En);
        board.keywords = vec!["gnn".to_string()];
        board.candidates = vec![
            CandidateItem::new("p1", "A", "pubmed"),
            CandidateItem::new("p2", "B", "pubmed"),
            CandidateItem::new("p3", "C", "pubmed"),
        ];
        board
    }

    #[test]
    fn test_approval_patch_sets_flags() {
        let patch =
            InterruptController::approval_patch(&board(), &["p3".to_string(), "p1".to_string()])
                .unwrap();
        let flags: Vec<bool> = patch.candidates.unwrap().iter().map(|c| c.approved).collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn test_approval_with_no_known_ids_is_invalid() {
        let err = InterruptController::approval_patch(&board(), &["nope".to_string()]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidApproval(_)));
    }

    #[test]
    fn test_gate_lifecycle() {
        let db = ScholarDb::open_in_memory().unwrap();
        let session = SessionStore::new(&db).create("gnn", Language::En).unwrap();
        let store = CheckpointStore::new(&db);
        let gate = InterruptController::new(&store);
        let ids = vec!["p1".to_string()];

        let suspended = gate.suspend(&session.id, &board()).unwrap();
        assert!(suspended.pending_interrupt);
        assert!(matches!(
            gate.inspect(&session.id, &ids, Some(suspended.version)).unwrap(),
            GateState::Pending(_)
        ));

        let mut approved = suspended.blackboard.clone();
        approved.merge(InterruptController::approval_patch(&approved, &ids).unwrap());
        gate.release(&session.id, &approved).unwrap();

        assert!(matches!(
            gate.inspect(&session.id, &ids, None).unwrap(),
            GateState::AlreadyApproved(_)
        ));
        assert!(matches!(
            gate.inspect(&session.id, &["p2".to_string()], None).unwrap(),
            GateState::Elsewhere(_)
        ));
        assert!(matches!(
            gate.inspect(&session.id, &ids, Some(suspended.version)),
            Err(PipelineError::StaleVersion { .. })
        ));
    }
}
