//! Planning stage: research query to search keywords.

use super::{prompts, StageContext};
use crate::error::PipelineError;
use crate::llm::Prompt;
use crate::retry::with_retry;
use crate::state::{Blackboard, BlackboardPatch};
use crate::workflow::stage::Stage;

/// Trim, drop empties and case-insensitive duplicates, cap at `max`
pub fn clean_keywords(raw: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .map(|k| k.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .take(max)
        .collect()
}

pub fn build_prompt(board: &Blackboard, max_keywords: usize) -> Prompt {
    let max = max_keywords.to_string();
    let system = prompts::render(prompts::PLANNER, &[("max_keywords", max.as_str())]);
    Prompt::new(system, format!("Topic: {}", board.query))
}

pub async fn plan(ctx: &StageContext, board: &Blackboard) -> Result<BlackboardPatch, PipelineError> {
    let max = ctx.config.max_keywords;
    tracing::info!(query = %board.query, "Planning search keywords");

    let prompt = build_prompt(board, max);
    let plan = with_retry(&ctx.retry, "planner", || ctx.generator.keywords(&prompt))
        .await
        .map_err(|e| PipelineError::Generation {
            stage: Stage::Planning,
            message: e.to_string(),
        })?;

    let keywords = clean_keywords(plan.keywords, max);
    let log = format!("Generated {} search keywords: {}", keywords.len(), keywords.join(", "));
    tracing::info!("{}", log);

    Ok(BlackboardPatch {
        keywords: Some(keywords),
        ..Default::default()
    }
    .log(log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Language;

    #[test]
    fn test_clean_keywords() {
        let raw = vec![
            " graph  neural networks ".to_string(),
            "Graph Neural Networks".to_string(),
            "".to_string(),
            "message passing".to_string(),
            "over-smoothing".to_string(),
        ];
        assert_eq!(
            clean_keywords(raw, 2),
            vec!["graph neural networks", "message passing"]
        );
    }

    #[test]
    fn test_prompt_names_topic_and_keyword_cap() {
        let board = Blackboard::new("graph neural networks", Language::En);
        let prompt = build_prompt(&board, 5);
        assert_eq!(prompt.user, "Topic: graph neural networks");
        assert!(prompt.system.contains('5'));
        assert!(!prompt.system.contains("{max_keywords}"));
    }
}
