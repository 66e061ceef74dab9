//! # Workflow
//!
//! Stage table, approval gate, progress events and the driver that ties the
//! stages together.

pub mod driver;
pub mod events;
pub mod interrupt;
pub mod stage;

pub use driver::{ReviewDriver, RunOutcome, SessionDetail, StartOptions, StatusReport};
pub use events::{WorkflowEvent, WorkflowEventKind};
pub use interrupt::{GateState, InterruptController};
pub use stage::{next_stage, RetryTarget, Signal, Stage};
