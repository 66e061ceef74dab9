//! # Generation Stage
//!
//! Outline first, then every section concurrently. A section that fails
//! becomes a placeholder; the draft always has one section per heading.
//! Each run produces a fresh draft: retries and continuations regenerate
//! everything with extra instructions instead of patching sections.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{citations, conversation_context, prompts, StageContext};
use crate::error::PipelineError;
use crate::llm::Prompt;
use crate::retry::with_retry;
use crate::state::{Blackboard, BlackboardPatch, CandidateItem, Draft, DraftSection};
use crate::workflow::stage::Stage;

/// Numbered source list handed to the writer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WritingContext {
    pub text: String,
    /// Items actually included, in citation order
    pub supplied_ids: Vec<String>,
    pub estimated_tokens: usize,
}

/// Rough token count: words x 1.3, at least 20
pub fn estimate_tokens(item: &CandidateItem) -> usize {
    let mut parts = vec![item.title.clone()];
    match &item.extracted {
        Some(content) => parts.push(content.evidence()),
        None => parts.push(item.abstract_text.chars().take(200).collect()),
    }
    let words = parts.iter().map(|p| p.split_whitespace().count()).sum::<usize>();
    ((words as f64 * 1.3) as usize).max(20)
}

fn describe(index: usize, item: &CandidateItem) -> String {
    let year = item.year.map(|y| y.to_string()).unwrap_or_else(|| "N/A".to_string());
    let mut lines = vec![format!("[{}] {} (Year: {})", index, item.title, year)];
    if !item.authors.is_empty() {
        let shown: Vec<&str> = item.authors.iter().take(3).map(String::as_str).collect();
        let more = if item.authors.len() > 3 { "..." } else { "" };
        lines.push(format!("    Authors: {}{}", shown.join(", "), more));
    }
    if let Some(content) = &item.extracted {
        for line in content.evidence().lines() {
            lines.push(format!("    {}", line));
        }
    }
    lines.join("\n")
}

/// Number items by approved-list position and fill up to the token budget.
///
/// Only items with extracted content are included. The first such item is
/// always included, whatever its size.
pub fn build_context(approved: &[&CandidateItem], budget: usize, max_items: usize) -> WritingContext {
    let mut context = WritingContext::default();
    let mut entries = Vec::new();

    for (position, item) in approved.iter().enumerate().take(max_items) {
        if item.extracted.is_none() {
            continue;
        }
        let tokens = estimate_tokens(item);
        if context.estimated_tokens + tokens > budget && !entries.is_empty() {
            tracing::info!(
                estimated = context.estimated_tokens,
                budget,
                included = entries.len(),
                "Context budget reached"
            );
            break;
        }
        entries.push(describe(position + 1, item));
        context.supplied_ids.push(item.id.clone());
        context.estimated_tokens += tokens;
    }

    context.text = entries.join("\n\n");
    context
}

/// Approved ids cited in a body, in citation order; out-of-range markers ignored
pub fn derive_cited_ids(body: &str, approved: &[&CandidateItem]) -> Vec<String> {
    citations::marker_indices(body)
        .into_iter()
        .filter(|i| (1..=approved.len()).contains(i))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|i| approved[i - 1].id.clone())
        .collect()
}

/// Extra system instructions for retries and continuations
pub fn addenda(board: &Blackboard, num_sources: usize) -> String {
    let mut extra = String::new();
    let count = num_sources.to_string();

    if let Some(reflection) = board.reflection.as_ref().filter(|r| r.should_retry) {
        let instructions = reflection.instructions().join("\n");
        extra.push_str(&prompts::render(
            prompts::RETRY_ADDENDUM,
            &[("instructions", instructions.as_str()), ("num_sources", count.as_str())],
        ));
    }

    if board.is_continuation {
        if let Some(instruction) = &board.instruction {
            let summary = board
                .draft
                .as_ref()
                .map(|d| format!("Existing draft:\n{}", d.summary()))
                .unwrap_or_default();
            let conversation = conversation_context(&board.messages);
            extra.push_str(&prompts::render(
                prompts::REVISION_ADDENDUM,
                &[
                    ("draft_summary", summary.as_str()),
                    ("instruction", instruction.as_str()),
                    ("conversation", conversation.as_str()),
                ],
            ));
        }
    }
    extra
}

pub async fn write(ctx: &StageContext, board: &Blackboard) -> Result<BlackboardPatch, PipelineError> {
    let approved = board.approved();
    let context = build_context(
        &approved,
        ctx.config.context_token_budget,
        ctx.config.max_context_items,
    );

    if context.supplied_ids.is_empty() {
        let log = "No approved items with extracted content, cannot draft review".to_string();
        tracing::warn!("{}", log);
        return Ok(BlackboardPatch {
            draft: Some(None),
            supplied_ids: Some(Vec::new()),
            ..Default::default()
        }
        .log(log));
    }

    let num_sources = approved.len().min(ctx.config.max_context_items);
    let count = num_sources.to_string();
    let language = board.language.display_name();
    let extra = addenda(board, num_sources);
    let user = format!("Research topic: {}\n\nSources:\n{}", board.query, context.text);

    tracing::info!(
        sources = context.supplied_ids.len(),
        retry = board.retry_count,
        continuation = board.is_continuation,
        "Generating outline"
    );

    let mut outline_system = prompts::render(
        prompts::OUTLINE,
        &[("language", language), ("num_sources", count.as_str())],
    );
    outline_system.push_str(&extra);
    let outline_prompt = Prompt::new(outline_system, user.clone());
    let outline = with_retry(&ctx.retry, "outline", || ctx.generator.outline(&outline_prompt))
        .await
        .map_err(|e| PipelineError::Generation {
            stage: Stage::Generation,
            message: format!("outline: {}", e),
        })?;

    let headings: Vec<String> = outline
        .section_headings
        .iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();
    let total = headings.len();
    let outline_line = headings.join(", ");

    let semaphore = Arc::new(Semaphore::new(ctx.config.llm_concurrency.max(1)));
    let mut join_set = JoinSet::new();

    // SCATTER
    for (index, heading) in headings.iter().enumerate() {
        let section_num = (index + 1).to_string();
        let total_sections = total.to_string();
        let mut system = prompts::render(
            prompts::SECTION,
            &[
                ("heading", heading.as_str()),
                ("section_num", section_num.as_str()),
                ("total_sections", total_sections.as_str()),
                ("outline", outline_line.as_str()),
                ("language", language),
                ("num_sources", count.as_str()),
            ],
        );
        system.push_str(&extra);
        let prompt = Prompt::new(system, user.clone());
        let semaphore = semaphore.clone();
        let generator = ctx.generator.clone();
        let policy = ctx.retry;

        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = with_retry(&policy, "section", || generator.section(&prompt)).await;
            (index, result)
        });
    }

    // GATHER, keyed by section index
    let mut bodies: Vec<Option<String>> = vec![None; total];
    let mut failed = 0;
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((index, Ok(output))) => bodies[index] = Some(output.content),
            Ok((index, Err(e))) => {
                tracing::error!(section = %headings[index], "Section generation failed: {}", e);
                failed += 1;
                bodies[index] = Some(format!("[Generation failed: {}]", e));
            }
            Err(e) => tracing::error!("Section task panicked: {}", e),
        }
    }

    let sections: Vec<DraftSection> = headings
        .into_iter()
        .zip(bodies)
        .map(|(heading, body)| {
            let body = body.unwrap_or_else(|| "[Generation failed: task aborted]".to_string());
            DraftSection {
                cited_ids: derive_cited_ids(&body, &approved),
                heading,
                body,
            }
        })
        .collect();

    let cited: BTreeSet<usize> = sections
        .iter()
        .flat_map(|s| citations::marker_indices(&s.body))
        .collect();
    let out_of_range: Vec<usize> = cited
        .iter()
        .copied()
        .filter(|i| !(1..=approved.len()).contains(i))
        .collect();
    if !out_of_range.is_empty() {
        tracing::warn!(?out_of_range, valid = approved.len(), "Draft cites outside the approved range");
    }

    let mut log = format!(
        "Draft complete: '{}' with {} sections, {} unique citations",
        outline.title,
        sections.len(),
        cited.len()
    );
    if board.retry_count > 0 {
        log.push_str(&format!(" (retry {})", board.retry_count));
    }
    if failed > 0 {
        log.push_str(&format!(", {} sections failed", failed));
    }
    tracing::info!("{}", log);

    Ok(BlackboardPatch {
        draft: Some(Some(Draft {
            title: outline.title,
            sections,
        })),
        supplied_ids: Some(context.supplied_ids),
        ..Default::default()
    }
    .log(log))
}
