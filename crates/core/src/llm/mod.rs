//! # LLM
//!
//! Structured-generation capability and its radkit-backed implementation.

pub mod generator;
pub mod radkit;

pub use generator::{
    EntailmentLabel, EntailmentOutput, ExtractionOutput, GenerationError, GenerationResult,
    KeywordPlan, OutlineOutput, Prompt, SectionOutput, StructuredGenerator,
};
pub use radkit::RadkitGenerator;
