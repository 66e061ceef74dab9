//! # Reflection Router
//!
//! Turns validation findings into a retry decision. Only runs after a failed
//! validation. The routing is deterministic: a finding the writer cannot fix
//! sends the session back to retrieval, everything else back to generation,
//! and an exhausted retry budget ends the session.

use serde::{Deserialize, Serialize};

use super::validator::{FindingCategory, FixHint, ValidationFinding, ValidationReport};
use crate::state::BlackboardPatch;
use crate::workflow::stage::{RetryTarget, Signal};

/// One classified finding with its remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionEntry {
    pub category: FindingCategory,
    pub detail: String,
    pub strategy: String,
    pub fixable_by_generation: bool,
}

impl ReflectionEntry {
    /// Instruction line handed to the writer on retry
    pub fn instruction(&self) -> String {
        format!("- [{}] {}", self.category, self.strategy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionDecision {
    pub entries: Vec<ReflectionEntry>,
    pub should_retry: bool,
    /// `None` when the retry budget is exhausted
    pub retry_target: Option<RetryTarget>,
    pub rationale: String,
}

impl ReflectionDecision {
    /// Signal for the transition table
    pub fn signal(&self) -> Signal {
        match (self.should_retry, self.retry_target) {
            (true, Some(target)) => Signal::Retry(target),
            _ => Signal::RetriesExhausted,
        }
    }

    /// Writer instructions, one `- [category] strategy` line per entry
    pub fn instructions(&self) -> Vec<String> {
        self.entries.iter().map(ReflectionEntry::instruction).collect()
    }
}

fn strategy(finding: &ValidationFinding) -> String {
    match (finding.category, finding.hint) {
        (FindingCategory::CitationOutOfBounds, _) => {
            "Only cite sources by their number in the provided list; replace or remove any marker outside that range".to_string()
        }
        (FindingCategory::MissingCitation, _) => match finding.section {
            Some(index) => format!(
                "Support the claims in section {} with at least one {{cite:N}} marker to a relevant source",
                index + 1
            ),
            None => "Support every section's claims with at least one {cite:N} marker".to_string(),
        },
        (FindingCategory::UncitedApprovedItem, FixHint::Rewrite) => {
            "Discuss and cite every provided source at least once where it is relevant".to_string()
        }
        (FindingCategory::UncitedApprovedItem, FixHint::NeedsMaterial) => {
            "Retrieve more material for this approved source before it can be cited".to_string()
        }
        (FindingCategory::LowEntailment, _) => {
            "Only attribute claims that the cited source states; rephrase overreaching claims or cite the source that supports them".to_string()
        }
        (FindingCategory::Structural, FixHint::NeedsMaterial) => {
            "Gather approved sources with usable content before drafting".to_string()
        }
        (FindingCategory::Structural, FixHint::Rewrite) => {
            "Produce a complete draft with a title and at least one cited section".to_string()
        }
    }
}

/// Classify findings and choose the next stage
pub fn reflect(report: &ValidationReport, retry_count: u32, max_retries: u32) -> ReflectionDecision {
    let entries: Vec<ReflectionEntry> = report
        .findings
        .iter()
        .map(|finding| ReflectionEntry {
            category: finding.category,
            detail: finding.detail.clone(),
            strategy: strategy(finding),
            fixable_by_generation: finding.hint == FixHint::Rewrite,
        })
        .collect();

    let writer_fixable = entries.iter().filter(|e| e.fixable_by_generation).count();
    let needs_material = entries.len() - writer_fixable;

    if retry_count >= max_retries {
        return ReflectionDecision {
            rationale: format!(
                "Retry limit reached ({}/{}) with {} unresolved findings",
                retry_count,
                max_retries,
                entries.len()
            ),
            entries,
            should_retry: false,
            retry_target: None,
        };
    }

    let (target, rationale) = if needs_material > 0 {
        (
            RetryTarget::Retrieval,
            format!(
                "{} findings need more source material; returning to retrieval",
                needs_material
            ),
        )
    } else {
        (
            RetryTarget::Generation,
            format!("{} findings are fixable by regenerating the draft", writer_fixable),
        )
    };

    ReflectionDecision {
        entries,
        should_retry: true,
        retry_target: Some(target),
        rationale,
    }
}

/// Reflection stage: decision plus the bumped retry counter
pub fn run(report: &ValidationReport, retry_count: u32, max_retries: u32) -> (ReflectionDecision, BlackboardPatch) {
    let decision = reflect(report, retry_count, max_retries);
    let writer_fixable = decision.entries.iter().filter(|e| e.fixable_by_generation).count();

    tracing::info!(
        findings = decision.entries.len(),
        writer_fixable,
        should_retry = decision.should_retry,
        target = ?decision.retry_target,
        "{}",
        decision.rationale
    );

    let mut patch = BlackboardPatch {
        reflection: Some(Some(decision.clone())),
        ..Default::default()
    }
    .log(format!(
        "Reflection: {} findings analyzed ({} writer-fixable, {} need retrieval)",
        decision.entries.len(),
        writer_fixable,
        decision.entries.len() - writer_fixable
    ))
    .log(format!("Reflection: {}", decision.rationale));

    if decision.should_retry {
        patch.retry_count = Some(retry_count + 1);
    }
    (decision, patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(category: FindingCategory, hint: FixHint) -> ValidationFinding {
        ValidationFinding {
            category,
            detail: format!("{} detail", category),
            hint,
            item_id: None,
            section: Some(0),
        }
    }

    #[test]
    fn test_writer_fixable_findings_target_generation() {
        let report = ValidationReport::from_findings(vec![
            finding(FindingCategory::CitationOutOfBounds, FixHint::Rewrite),
            finding(FindingCategory::MissingCitation, FixHint::Rewrite),
        ]);
        let decision = reflect(&report, 0, 3);

        assert!(decision.should_retry);
        assert_eq!(decision.retry_target, Some(RetryTarget::Generation));
        assert!(decision.entries.iter().all(|e| e.fixable_by_generation));
        assert_eq!(decision.signal(), Signal::Retry(RetryTarget::Generation));
    }

    #[test]
    fn test_any_unfixable_finding_targets_retrieval() {
        let report = ValidationReport::from_findings(vec![
            finding(FindingCategory::CitationOutOfBounds, FixHint::Rewrite),
            finding(FindingCategory::UncitedApprovedItem, FixHint::NeedsMaterial),
        ]);
        let decision = reflect(&report, 1, 3);

        assert_eq!(decision.retry_target, Some(RetryTarget::Retrieval));
        assert!(!decision.entries[1].fixable_by_generation);
    }

    #[test]
    fn test_retry_budget_overrides_findings() {
        let report = ValidationReport::from_findings(vec![finding(
            FindingCategory::LowEntailment,
            FixHint::Rewrite,
        )]);
        let decision = reflect(&report, 3, 3);

        assert!(!decision.should_retry);
        assert_eq!(decision.retry_target, None);
        assert_eq!(decision.signal(), Signal::RetriesExhausted);
    }

    #[test]
    fn test_instruction_lines() {
        let report = ValidationReport::from_findings(vec![finding(
            FindingCategory::CitationOutOfBounds,
            FixHint::Rewrite,
        )]);
        let decision = reflect(&report, 0, 3);
        let lines = decision.instructions();

        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("- [citation_out_of_bounds] "));
    }

    #[test]
    fn test_run_bumps_retry_count_only_when_retrying() {
        let report = ValidationReport::from_findings(vec![finding(
            FindingCategory::Structural,
            FixHint::Rewrite,
        )]);
        let (_, patch) = run(&report, 1, 3);
        assert_eq!(patch.retry_count, Some(2));

        let (_, patch) = run(&report, 3, 3);
        assert_eq!(patch.retry_count, None);
    }
}
