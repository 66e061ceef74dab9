//! # Retrieval Stage
//!
//! Fans out over (query, backend) pairs with bounded concurrency. A failing
//! pair is contained: it is logged, counted against the backend's health,
//! and the stage continues with whatever the other pairs returned. Results
//! are merged in (query, backend) order regardless of completion order.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::StageContext;
use crate::error::PipelineError;
use crate::retry::{with_retry, RetryPolicy};
use crate::search::{BackendHealth, SearchBackend, SearchError};
use crate::state::{Blackboard, BlackboardPatch, CandidateItem};
use crate::workflow::stage::RetryTarget;

/// Search one backend, honouring and updating its health record.
///
/// A backend over its failure threshold is refused before any call is made,
/// including between retry attempts. Calls already in flight when the
/// threshold is crossed are allowed to finish.
pub async fn search_backend(
    backend: &dyn SearchBackend,
    health: &BackendHealth,
    policy: &RetryPolicy,
    query: &str,
    limit: usize,
) -> Result<Vec<CandidateItem>, SearchError> {
    let name = backend.name();
    with_retry(policy, name, || async move {
        if !health.admit(name) {
            tracing::debug!(backend = name, "Skipping unhealthy backend");
            return Err(SearchError::fatal(name, "skipped after repeated recent failures"));
        }
        match backend.search(query, limit).await {
            Ok(items) => {
                health.record_success(name);
                Ok(items)
            }
            Err(e) => {
                if health.record_failure(name) {
                    tracing::warn!(backend = name, "Backend over failure threshold: {}", e);
                }
                Err(e)
            }
        }
    })
    .await
}

/// Extra queries for a retry: titles of approved items the writer never got
fn recovery_queries(board: &Blackboard) -> Vec<String> {
    board
        .approved()
        .into_iter()
        .filter(|item| !board.supplied_ids.contains(&item.id))
        .map(|item| item.title.clone())
        .collect()
}

fn returning_from_reflection(board: &Blackboard) -> bool {
    board
        .reflection
        .as_ref()
        .is_some_and(|r| r.should_retry && r.retry_target == Some(RetryTarget::Retrieval))
}

/// Merge fresh results behind the existing list; first occurrence wins on id,
/// then on case-folded title. Existing items keep approval and content.
pub fn merge_candidates(existing: &[CandidateItem], fresh: Vec<CandidateItem>) -> Vec<CandidateItem> {
    let mut ids = HashSet::new();
    let mut titles = HashSet::new();
    let mut merged = Vec::with_capacity(existing.len() + fresh.len());

    for item in existing.iter().cloned().chain(fresh) {
        let title = item.title_key();
        if ids.contains(&item.id) || titles.contains(&title) {
            continue;
        }
        ids.insert(item.id.clone());
        titles.insert(title);
        merged.push(item);
    }
    merged
}

pub async fn retrieve(ctx: &StageContext, board: &Blackboard) -> Result<BlackboardPatch, PipelineError> {
    let retrying = returning_from_reflection(board);
    let mut queries = board.keywords.clone();
    if retrying {
        queries.extend(recovery_queries(board));
    }

    if queries.is_empty() {
        let log = "No search keywords available, skipping search".to_string();
        tracing::warn!("{}", log);
        return Ok(BlackboardPatch::new().log(log));
    }

    let backends: Vec<Arc<dyn SearchBackend>> = ctx
        .backends
        .iter()
        .filter(|b| board.sources.is_empty() || board.sources.iter().any(|s| s == b.name()))
        .cloned()
        .collect();
    if backends.is_empty() {
        return Err(PipelineError::Retrieval(
            "no search backend is enabled for this session".to_string(),
        ));
    }

    let semaphore = Arc::new(Semaphore::new(ctx.config.retrieval_concurrency.max(1)));
    let limit = ctx.config.items_per_query;
    let mut join_set = JoinSet::new();

    // SCATTER
    for (qi, query) in queries.iter().enumerate() {
        for (bi, backend) in backends.iter().enumerate() {
            let semaphore = semaphore.clone();
            let backend = backend.clone();
            let health = ctx.health.clone();
            let policy = ctx.retry;
            let query = query.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = search_backend(backend.as_ref(), &health, &policy, &query, limit).await;
                ((qi, bi), backend.name().to_string(), result)
            });
        }
    }

    // GATHER
    let total = queries.len() * backends.len();
    let mut batches = Vec::with_capacity(total);
    let mut errors = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((key, _, Ok(items))) => batches.push((key, items)),
            Ok((_, backend, Err(e))) => errors.push(format!("{}: {}", backend, e)),
            Err(e) => errors.push(format!("Task panicked: {}", e)),
        }
    }

    if !errors.is_empty() {
        tracing::warn!(
            "Retrieval had {} errors out of {}: {:?}",
            errors.len(),
            total,
            errors
        );
    }
    if batches.is_empty() {
        return Err(PipelineError::Retrieval(format!(
            "all {} searches failed: {}",
            total,
            errors.first().cloned().unwrap_or_default()
        )));
    }

    batches.sort_by_key(|(key, _)| *key);
    let fresh: Vec<CandidateItem> = batches.into_iter().flat_map(|(_, items)| items).collect();
    let fetched = fresh.len();

    let existing: &[CandidateItem] = if retrying { &board.candidates } else { &[] };
    let candidates = merge_candidates(existing, fresh);
    let added = candidates.len().saturating_sub(existing.len());

    let source_names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    let mut patch = BlackboardPatch {
        candidates: Some(candidates),
        ..Default::default()
    }
    .log(format!(
        "Found {} unique items ({} fetched) across {} queries from {}",
        added,
        fetched,
        queries.len(),
        source_names.join(", ")
    ));
    if !errors.is_empty() {
        patch = patch.log(format!("{} of {} searches failed", errors.len(), total));
    }
    tracing::info!(added, fetched, failed = errors.len(), "Retrieval complete");
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct DownBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SearchBackend for DownBackend {
        fn name(&self) -> &str {
            "down"
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<CandidateItem>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SearchError::transient("down", "HTTP 503"))
        }
    }

    #[test]
    fn test_merge_dedupes_by_id_then_title() {
        let mut kept = CandidateItem::new("a", "Graph Attention Networks", "pubmed");
        kept.approved = true;
        let fresh = vec![
            CandidateItem::new("a", "Other title", "semantic_scholar"),
            CandidateItem::new("b", "graph attention  networks", "semantic_scholar"),
            CandidateItem::new("c", "GraphSAGE", "semantic_scholar"),
        ];

        let merged = merge_candidates(&[kept], fresh);
        let ids: Vec<&str> = merged.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(merged[0].approved);
        assert_eq!(merged[0].source, "pubmed");
    }

    #[tokio::test]
    async fn test_unhealthy_backend_gets_no_calls() {
        let backend = DownBackend {
            calls: AtomicUsize::new(0),
        };
        let health = BackendHealth::new(3, Duration::from_secs(120));
        let policy = RetryPolicy::immediate(4);

        let result = search_backend(&backend, &health, &policy, "gnn", 5).await;
        assert!(result.is_err());
        // third failure trips the threshold; the fourth attempt is skipped
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

        let result = search_backend(&backend, &health, &policy, "gnn", 5).await;
        assert!(matches!(result, Err(SearchError::Fatal { .. })));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }
}
