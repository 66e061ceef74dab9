//! HTTP API: review sessions, progress events and configuration.

pub mod config;
pub mod error;
pub mod review;
