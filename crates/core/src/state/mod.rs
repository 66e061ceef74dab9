pub mod blackboard;
pub mod checkpoint;
pub mod db;
pub mod documents;
pub mod session;

pub use db::ScholarDb;

pub use blackboard::{Blackboard, BlackboardPatch, StageHandoff};
pub use checkpoint::{Checkpoint, CheckpointInfo, CheckpointStore};
pub use documents::{
    CandidateItem, ConversationMessage, Draft, DraftSection, ExtractedContent, Language,
};
pub use session::{Session, SessionStatus, SessionStore};
