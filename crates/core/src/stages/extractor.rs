//! Extraction stage: structured content for each approved item.
//!
//! Runs per item with bounded concurrency. Items that already carry content
//! (kept across a retrieval retry) are not re-extracted; an item whose
//! extraction fails is left without content.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{prompts, StageContext};
use crate::error::PipelineError;
use crate::llm::{ExtractionOutput, Prompt};
use crate::retry::with_retry;
use crate::state::{Blackboard, BlackboardPatch, CandidateItem, ExtractedContent};

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<ExtractionOutput> for ExtractedContent {
    fn from(output: ExtractionOutput) -> Self {
        Self {
            core_contribution: output.core_contribution.trim().to_string(),
            problem: non_empty(output.problem),
            method: non_empty(output.method),
            findings: non_empty(output.findings),
            limitations: non_empty(output.limitations),
        }
    }
}

pub fn build_prompt(item: &CandidateItem) -> Prompt {
    let abstract_text = if item.abstract_text.trim().is_empty() {
        "(no abstract available)"
    } else {
        item.abstract_text.as_str()
    };
    Prompt::new(
        prompts::EXTRACTOR,
        format!(
            "Title: {}\nYear: {}\nAbstract: {}",
            item.title,
            item.year.map(|y| y.to_string()).unwrap_or_else(|| "N/A".to_string()),
            abstract_text
        ),
    )
}

pub async fn extract(ctx: &StageContext, board: &Blackboard) -> Result<BlackboardPatch, PipelineError> {
    let approved_ids: Vec<String> = board.approved().iter().map(|c| c.id.clone()).collect();
    if approved_ids.is_empty() {
        let log = "No approved items to process".to_string();
        tracing::warn!("{}", log);
        return Ok(BlackboardPatch::new().log(log));
    }

    let selected: Vec<CandidateItem> = board
        .approved()
        .into_iter()
        .take(ctx.config.max_context_items)
        .filter(|item| item.extracted.is_none())
        .cloned()
        .collect();
    let pending = selected.len();
    tracing::info!(
        approved = approved_ids.len(),
        pending,
        "Extracting contributions"
    );

    let semaphore = Arc::new(Semaphore::new(ctx.config.llm_concurrency.max(1)));
    let mut join_set = JoinSet::new();

    for item in selected {
        let semaphore = semaphore.clone();
        let generator = ctx.generator.clone();
        let policy = ctx.retry;
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let prompt = build_prompt(&item);
            let result = with_retry(&policy, "extractor", || generator.extract(&prompt)).await;
            (item.id, result)
        });
    }

    let mut extracted = std::collections::HashMap::new();
    let mut failures = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((id, Ok(output))) => {
                extracted.insert(id, ExtractedContent::from(output));
            }
            Ok((id, Err(e))) => {
                tracing::error!(item_id = %id, "Extraction failed: {}", e);
                failures.push(id);
            }
            Err(e) => tracing::error!("Extraction task panicked: {}", e),
        }
    }

    // merge by id so completion order does not matter
    let succeeded = extracted.len();
    let candidates: Vec<CandidateItem> = board
        .candidates
        .iter()
        .cloned()
        .map(|mut item| {
            if let Some(content) = extracted.remove(&item.id) {
                item.extracted = Some(content);
            }
            item
        })
        .collect();

    let mut patch = BlackboardPatch {
        candidates: Some(candidates),
        ..Default::default()
    }
    .log(format!(
        "Extracted contributions from {}/{} items",
        succeeded, pending
    ));
    if approved_ids.len() > ctx.config.max_context_items {
        patch = patch.log(format!(
            "Selected {}/{} approved items for extraction",
            ctx.config.max_context_items,
            approved_ids.len()
        ));
    }
    if !failures.is_empty() {
        failures.sort_by_key(|id| approved_ids.iter().position(|a| a == id));
        patch = patch.log(format!("Extraction failed for: {}", failures.join(", ")));
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_conversion_drops_blank_fields() {
        let content = ExtractedContent::from(ExtractionOutput {
            core_contribution: "  Introduces GATs. ".to_string(),
            problem: Some("   ".to_string()),
            method: Some("masked self-attention".to_string()),
            findings: None,
            limitations: Some(String::new()),
        });

        assert_eq!(content.core_contribution, "Introduces GATs.");
        assert_eq!(content.problem, None);
        assert_eq!(content.method.as_deref(), Some("masked self-attention"));
        assert_eq!(content.limitations, None);
    }

    #[test]
    fn test_prompt_handles_missing_abstract() {
        let item = CandidateItem::new("p1", "GraphSAGE", "pubmed").with_year(2017);
        let prompt = build_prompt(&item);
        assert!(prompt.user.contains("Year: 2017"));
        assert!(prompt.user.contains("(no abstract available)"));
    }
}
