//! # Citation Validator
//!
//! Deterministic checks over a draft against the approved list, followed by
//! an optional semantic pass. Every check reads the citation markers out of
//! the section text itself; `DraftSection::cited_ids` is never consulted.
//!
//! 1. bounds: each marker must resolve to an approved item
//! 2. coverage: each approved item must be cited somewhere
//! 3. structure: each section must carry at least one marker
//! 4. entailment (feature-flagged, only once 1-3 pass): the share of
//!    (statement, cited item) pairs judged `entails` must reach the minimum

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::citations;
use super::prompts;
use super::StageContext;
use crate::error::PipelineError;
use crate::llm::{EntailmentLabel, Prompt};
use crate::retry::with_retry;
use crate::state::{Blackboard, BlackboardPatch, CandidateItem, Draft};

/// Kind of validation problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    CitationOutOfBounds,
    MissingCitation,
    UncitedApprovedItem,
    LowEntailment,
    Structural,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CitationOutOfBounds => "citation_out_of_bounds",
            Self::MissingCitation => "missing_citation",
            Self::UncitedApprovedItem => "uncited_approved_item",
            Self::LowEntailment => "low_entailment",
            Self::Structural => "structural",
        }
    }
}

impl std::fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who can fix a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixHint {
    /// The writer can fix it with the material it already has
    Rewrite,
    /// The writer was never given enough material; more retrieval is needed
    NeedsMaterial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub category: FindingCategory,
    pub detail: String,
    pub hint: FixHint,
    /// Approved item the finding is about, if any
    #[serde(default)]
    pub item_id: Option<String>,
    /// 0-based section the finding is about, if any
    #[serde(default)]
    pub section: Option<usize>,
}

impl ValidationFinding {
    fn rewrite(category: FindingCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            detail: detail.into(),
            hint: FixHint::Rewrite,
            item_id: None,
            section: None,
        }
    }

    fn in_section(mut self, index: usize) -> Self {
        self.section = Some(index);
        self
    }
}

/// Result of one validation run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
    /// True iff `findings` is empty
    pub passed: bool,
    /// Share of judged pairs labelled `entails`; `None` when not computed
    #[serde(default)]
    pub entailment_ratio: Option<f64>,
}

impl ValidationReport {
    pub fn from_findings(findings: Vec<ValidationFinding>) -> Self {
        Self {
            passed: findings.is_empty(),
            findings,
            entailment_ratio: None,
        }
    }
}

/// Checks 1-3. Pure; findings are ordered by check, then by position.
pub fn structural_findings(
    draft: Option<&Draft>,
    approved: &[&CandidateItem],
    supplied_ids: &[String],
) -> Vec<ValidationFinding> {
    let Some(draft) = draft else {
        return vec![ValidationFinding {
            category: FindingCategory::Structural,
            detail: "No draft was produced: no approved item had usable content".to_string(),
            hint: FixHint::NeedsMaterial,
            item_id: None,
            section: None,
        }];
    };
    if draft.sections.is_empty() {
        return vec![ValidationFinding::rewrite(
            FindingCategory::Structural,
            "Draft has no sections",
        )];
    }

    let valid = 1..=approved.len();
    let mut out_of_bounds = Vec::new();
    let mut uncited_sections = Vec::new();
    let mut cited = BTreeSet::new();

    for (index, section) in draft.sections.iter().enumerate() {
        let markers: BTreeSet<usize> = citations::marker_indices(&section.body).into_iter().collect();
        if markers.is_empty() {
            uncited_sections.push(
                ValidationFinding::rewrite(
                    FindingCategory::MissingCitation,
                    format!("Section {} ('{}') has no citations", index + 1, section.heading),
                )
                .in_section(index),
            );
        }
        for marker in markers {
            if valid.contains(&marker) {
                cited.insert(marker);
            } else {
                out_of_bounds.push(
                    ValidationFinding::rewrite(
                        FindingCategory::CitationOutOfBounds,
                        format!(
                            "Section {}: citation {{cite:{}}} is outside the approved range 1-{}",
                            index + 1,
                            marker,
                            approved.len()
                        ),
                    )
                    .in_section(index),
                );
            }
        }
    }

    let uncovered = approved.iter().enumerate().filter_map(|(i, item)| {
        if cited.contains(&(i + 1)) {
            return None;
        }
        let supplied = supplied_ids.iter().any(|id| id == &item.id);
        let detail = if supplied {
            format!("Approved source [{}] '{}' is never cited", i + 1, item.title)
        } else {
            format!(
                "Approved source [{}] '{}' is never cited and was not in the writing context",
                i + 1,
                item.title
            )
        };
        Some(ValidationFinding {
            category: FindingCategory::UncitedApprovedItem,
            detail,
            hint: if supplied {
                FixHint::Rewrite
            } else {
                FixHint::NeedsMaterial
            },
            item_id: Some(item.id.clone()),
            section: None,
        })
    });

    out_of_bounds
        .into_iter()
        .chain(uncovered)
        .chain(uncited_sections)
        .collect()
}

/// One (statement, cited item) pair for the semantic pass
#[derive(Debug, Clone, PartialEq)]
pub struct EntailmentPair {
    pub section: usize,
    pub statement: String,
    pub index: usize,
    pub item_id: String,
    pub evidence: String,
}

/// Every judgeable pair in the draft, in document order
pub fn entailment_pairs(draft: &Draft, approved: &[&CandidateItem]) -> Vec<EntailmentPair> {
    let mut pairs = Vec::new();
    for (section, body) in draft.sections.iter().map(|s| &s.body).enumerate() {
        for statement in citations::cited_statements(body) {
            for &index in &statement.indices {
                let Some(item) = index.checked_sub(1).and_then(|i| approved.get(i)) else {
                    continue;
                };
                let evidence = match &item.extracted {
                    Some(content) => content.evidence(),
                    None if !item.abstract_text.is_empty() => item.abstract_text.clone(),
                    None => continue,
                };
                pairs.push(EntailmentPair {
                    section,
                    statement: statement.text.clone(),
                    index,
                    item_id: item.id.clone(),
                    evidence,
                });
            }
        }
    }
    pairs
}

/// Check 4. Judgements that error are skipped; returns the labelled pairs.
async fn judge_pairs(
    ctx: &StageContext,
    pairs: Vec<EntailmentPair>,
) -> Vec<(EntailmentPair, EntailmentLabel)> {
    let semaphore = Arc::new(Semaphore::new(ctx.config.entailment.concurrency.max(1)));
    let mut join_set = JoinSet::new();

    for (position, pair) in pairs.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let generator = ctx.generator.clone();
        let policy = ctx.retry;
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let prompt = Prompt::new(
                prompts::ENTAILMENT,
                format!(
                    "Statement:\n{}\n\nSource [{}]:\n{}",
                    pair.statement, pair.index, pair.evidence
                ),
            );
            let verdict = with_retry(&policy, "entailment", || generator.judge(&prompt)).await;
            (position, pair, verdict)
        });
    }

    let mut judged = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((position, pair, Ok(output))) => judged.push((position, pair, output.label())),
            Ok((_, pair, Err(e))) => {
                tracing::warn!(item_id = %pair.item_id, "Entailment judgement failed, skipping: {}", e)
            }
            Err(e) => tracing::warn!("Entailment task panicked: {}", e),
        }
    }
    judged.sort_by_key(|(position, _, _)| *position);
    judged
        .into_iter()
        .map(|(_, pair, label)| (pair, label))
        .collect()
}

/// Entailment ratio and the low-entailment finding, if the ratio is too low
pub fn entailment_outcome(
    judged: &[(EntailmentPair, EntailmentLabel)],
    min_ratio: f64,
) -> (Option<f64>, Option<ValidationFinding>) {
    if judged.is_empty() {
        return (None, None);
    }
    let entailed = judged
        .iter()
        .filter(|(_, label)| *label == EntailmentLabel::Entails)
        .count();
    let ratio = entailed as f64 / judged.len() as f64;
    if ratio >= min_ratio {
        return (Some(ratio), None);
    }

    let examples: Vec<String> = judged
        .iter()
        .filter(|(_, label)| *label != EntailmentLabel::Entails)
        .take(3)
        .map(|(pair, label)| {
            let short: String = pair.statement.chars().take(60).collect();
            format!("'{}' citing [{}] ({:?})", short, pair.index, label)
        })
        .collect();
    let finding = ValidationFinding::rewrite(
        FindingCategory::LowEntailment,
        format!(
            "Only {:.0}% of cited statements are supported (minimum {:.0}%): {}",
            ratio * 100.0,
            min_ratio * 100.0,
            examples.join("; ")
        ),
    );
    (Some(ratio), Some(finding))
}

/// Validation stage
pub async fn validate(
    ctx: &StageContext,
    board: &Blackboard,
) -> Result<(ValidationReport, BlackboardPatch), PipelineError> {
    let approved = board.approved();
    let mut report = ValidationReport::from_findings(structural_findings(
        board.draft.as_ref(),
        &approved,
        &board.supplied_ids,
    ));

    if report.passed && ctx.config.entailment.enabled {
        if let Some(draft) = &board.draft {
            let pairs = entailment_pairs(draft, &approved);
            let total = pairs.len();
            let judged = judge_pairs(ctx, pairs).await;
            tracing::info!(pairs = total, judged = judged.len(), "Entailment pass complete");

            let (ratio, finding) = entailment_outcome(&judged, ctx.config.entailment.min_ratio);
            report.entailment_ratio = ratio;
            if let Some(finding) = finding {
                report.findings.push(finding);
                report.passed = false;
            }
        }
    }

    let log = if report.passed {
        match report.entailment_ratio {
            Some(ratio) => format!(
                "Validation passed: all citations verified ({:.0}% entailed)",
                ratio * 100.0
            ),
            None => "Validation passed: all citations verified".to_string(),
        }
    } else {
        let preview: Vec<&str> = report.findings.iter().take(3).map(|f| f.detail.as_str()).collect();
        format!(
            "Validation failed with {} findings: {}",
            report.findings.len(),
            preview.join(" | ")
        )
    };
    tracing::info!(passed = report.passed, findings = report.findings.len(), "{}", log);

    let patch = BlackboardPatch {
        validation: Some(Some(report.clone())),
        ..Default::default()
    }
    .log(log);
    Ok((report, patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DraftSection, ExtractedContent};

    fn items() -> Vec<CandidateItem> {
        ["p1", "p2"]
            .iter()
            .map(|id| {
                let mut item = CandidateItem::new(*id, format!("Paper {}", id), "pubmed");
                item.approved = true;
                item.extracted = Some(ExtractedContent {
                    core_contribution: format!("{} contribution", id),
                    ..Default::default()
                });
                item
            })
            .collect()
    }

    fn draft(bodies: &[&str]) -> Draft {
        Draft {
            title: "Review".to_string(),
            sections: bodies
                .iter()
                .enumerate()
                .map(|(i, body)| DraftSection {
                    heading: format!("S{}", i + 1),
                    body: body.to_string(),
                    cited_ids: Vec::new(),
                })
                .collect(),
        }
    }

    fn supplied() -> Vec<String> {
        vec!["p1".to_string(), "p2".to_string()]
    }

    #[test]
    fn test_clean_draft_has_no_findings() {
        let items = items();
        let approved: Vec<&CandidateItem> = items.iter().collect();
        let draft = draft(&["A {cite:1}.", "B {cite:2}."]);
        assert!(structural_findings(Some(&draft), &approved, &supplied()).is_empty());
    }

    #[test]
    fn test_out_of_bounds_marker() {
        let items = items();
        let approved: Vec<&CandidateItem> = items.iter().collect();
        let draft = draft(&["A {cite:1} and {cite:3}.", "B {cite:2}."]);
        let findings = structural_findings(Some(&draft), &approved, &supplied());

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, FindingCategory::CitationOutOfBounds);
        assert_eq!(findings[0].section, Some(0));
        assert_eq!(findings[0].hint, FixHint::Rewrite);
    }

    #[test]
    fn test_self_reported_cited_ids_are_ignored() {
        let items = items();
        let approved: Vec<&CandidateItem> = items.iter().collect();
        let mut draft = draft(&["A {cite:1}."]);
        draft.sections[0].cited_ids = vec!["p1".to_string(), "p2".to_string()];

        let findings = structural_findings(Some(&draft), &approved, &supplied());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, FindingCategory::UncitedApprovedItem);
        assert_eq!(findings[0].item_id.as_deref(), Some("p2"));
    }

    #[test]
    fn test_uncited_unsupplied_item_needs_material() {
        let items = items();
        let approved: Vec<&CandidateItem> = items.iter().collect();
        let draft = draft(&["A {cite:1}."]);
        let findings = structural_findings(Some(&draft), &approved, &["p1".to_string()]);

        assert_eq!(findings[0].category, FindingCategory::UncitedApprovedItem);
        assert_eq!(findings[0].hint, FixHint::NeedsMaterial);
    }

    #[test]
    fn test_section_without_markers() {
        let items = items();
        let approved: Vec<&CandidateItem> = items.iter().collect();
        let draft = draft(&["A {cite:1} {cite:2}.", "[Generation failed: timeout]"]);
        let findings = structural_findings(Some(&draft), &approved, &supplied());

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, FindingCategory::MissingCitation);
        assert_eq!(findings[0].section, Some(1));
    }

    #[test]
    fn test_missing_draft_is_structural() {
        let findings = structural_findings(None, &[], &[]);
        assert_eq!(findings[0].category, FindingCategory::Structural);
        assert_eq!(findings[0].hint, FixHint::NeedsMaterial);
    }

    #[test]
    fn test_entailment_pairs_resolve_items() {
        let items = items();
        let approved: Vec<&CandidateItem> = items.iter().collect();
        let draft = draft(&["First claim {cite:1}{cite:2}. Second {cite:9}."]);
        let pairs = entailment_pairs(&draft, &approved);

        let ids: Vec<&str> = pairs.iter().map(|p| p.item_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert_eq!(pairs[0].statement, "First claim .");
        assert!(pairs[0].evidence.contains("p1 contribution"));
    }

    #[test]
    fn test_entailment_ratio_threshold() {
        let pair = |i: usize| EntailmentPair {
            section: 0,
            statement: format!("claim {}", i),
            index: 1,
            item_id: "p1".to_string(),
            evidence: String::new(),
        };
        let mut judged: Vec<_> = (0..4).map(|i| (pair(i), EntailmentLabel::Entails)).collect();
        judged.push((pair(4), EntailmentLabel::Contradicts));

        let (ratio, finding) = entailment_outcome(&judged, 0.8);
        assert_eq!(ratio, Some(0.8));
        assert!(finding.is_none());

        judged.push((pair(5), EntailmentLabel::Insufficient));
        let (ratio, finding) = entailment_outcome(&judged, 0.8);
        assert!(ratio.unwrap() < 0.8);
        assert_eq!(finding.unwrap().category, FindingCategory::LowEntailment);

        assert_eq!(entailment_outcome(&[], 0.8), (None, None));
    }
}
