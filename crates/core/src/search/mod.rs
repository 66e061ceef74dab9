//! # Search
//!
//! Retrieval backends. A backend returns candidate items or a [`SearchError`];
//! an empty `Vec` means "no hits", never "something went wrong".

pub mod health;
pub mod pubmed;
pub mod semantic_scholar;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::retry::Retryable;
use crate::state::CandidateItem;

pub use health::BackendHealth;
pub use pubmed::PubMedBackend;
pub use semantic_scholar::SemanticScholarBackend;

/// Failure of one backend call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    /// Network failure, timeout, 429 or 5xx
    #[error("{backend}: transient failure: {message}")]
    Transient { backend: String, message: String },
    /// Other 4xx, undecodable body, misconfiguration
    #[error("{backend}: {message}")]
    Fatal { backend: String, message: String },
}

impl SearchError {
    pub fn transient(backend: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub fn fatal(backend: &str, message: impl Into<String>) -> Self {
        Self::Fatal {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(backend: &str, status: u16) -> Self {
        if status == 429 || status >= 500 {
            Self::transient(backend, format!("HTTP {}", status))
        } else {
            Self::fatal(backend, format!("HTTP {}", status))
        }
    }

    /// Classify a transport-level reqwest error
    pub fn from_reqwest(backend: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(backend, status.as_u16());
        }
        if err.is_decode() {
            Self::fatal(backend, format!("undecodable response: {}", err))
        } else {
            Self::transient(backend, err.to_string())
        }
    }
}

impl Retryable for SearchError {
    fn is_transient(&self) -> bool {
        matches!(self, SearchError::Transient { .. })
    }
}

/// A literature search backend
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Stable key used for health tracking and item provenance
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateItem>, SearchError>;
}

/// Shared HTTP client for the built-in backends
pub(crate) fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent("scholar/0.1")
        .timeout(Duration::from_secs(20))
        .build()
}

/// Build the backends named in the config; unknown names are skipped
pub fn backends_from_config(sources: &[String]) -> anyhow::Result<Vec<Arc<dyn SearchBackend>>> {
    let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();
    for source in sources {
        match source.as_str() {
            semantic_scholar::NAME => backends.push(Arc::new(SemanticScholarBackend::from_env()?)),
            pubmed::NAME => backends.push(Arc::new(PubMedBackend::from_env()?)),
            other => tracing::warn!(source = other, "Unknown search backend, skipping"),
        }
    }
    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(SearchError::from_status("pubmed", 429).is_transient());
        assert!(SearchError::from_status("pubmed", 503).is_transient());
        assert!(!SearchError::from_status("pubmed", 400).is_transient());
        assert!(!SearchError::from_status("pubmed", 404).is_transient());
    }

    #[test]
    fn test_backends_from_config() {
        let backends = backends_from_config(&[
            "semantic_scholar".to_string(),
            "arxiv".to_string(),
            "pubmed".to_string(),
        ])
        .unwrap();
        let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["semantic_scholar", "pubmed"]);
    }
}
