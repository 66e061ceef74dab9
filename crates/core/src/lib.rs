//! # Scholar Core
//!
//! Workflow engine for cited literature reviews: a research query goes
//! through planning, retrieval, a mandatory approval gate, extraction,
//! generation and citation validation, with reflection routing failed
//! drafts back to an earlier stage under a bounded retry budget.
//!
//! ## Architecture
//!
//! - `state/` - Blackboard, documents, SQLite-backed sessions and checkpoints
//! - `stages/` - Stage functions, citation validator, reflection router
//! - `workflow/` - Transition table, approval gate, events, the driver
//! - `llm/` - Structured-generation capability and its radkit adapter
//! - `search/` - Search backends and the shared backend health tracker
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scholar_core::{ReviewDriver, ScholarConfig, ScholarDb, StageContext, StartOptions};
//!
//! let config = ScholarConfig::load().await;
//! let ctx = StageContext::new(generator, backends, config);
//! let driver = ReviewDriver::new(ctx, &ScholarDb::open()?);
//! let parked = driver.start("graph neural networks", StartOptions::default()).await?;
//! let done = driver.approve(&parked.session_id, &ids, Some(parked.version)).await?;
//! ```

pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod retry;
pub mod search;
pub mod stages;
pub mod state;
pub mod workflow;

pub use config::{ConfigPatch, ScholarConfig};
pub use error::{ErrorCategory, PipelineError, SessionError};
pub use llm::{RadkitGenerator, StructuredGenerator};
pub use search::{backends_from_config, BackendHealth, SearchBackend};
pub use stages::StageContext;
pub use state::{Blackboard, Draft, Language, ScholarDb, SessionStatus};
pub use workflow::{ReviewDriver, RunOutcome, StartOptions, Stage, WorkflowEvent};
