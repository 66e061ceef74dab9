//! # Documents
//!
//! Candidate items, extracted content and drafts carried on the blackboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::stages::citations;

/// Output language of the review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "en" | "english" => Some(Self::En),
            "zh" | "chinese" => Some(Self::Zh),
            _ => None,
        }
    }

    /// Name used inside prompts
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Zh => "Chinese",
        }
    }
}

/// Structured content pulled out of one item during extraction
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub core_contribution: String,
    #[serde(default)]
    pub problem: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub findings: Option<String>,
    #[serde(default)]
    pub limitations: Option<String>,
}

impl ExtractedContent {
    /// Flat text used as evidence for entailment checks
    pub fn evidence(&self) -> String {
        let mut parts = vec![format!("Contribution: {}", self.core_contribution)];
        for (label, value) in [
            ("Problem", &self.problem),
            ("Method", &self.method),
            ("Findings", &self.findings),
            ("Limitations", &self.limitations),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                parts.push(format!("{}: {}", label, value));
            }
        }
        parts.join("\n")
    }
}

/// A retrieved document awaiting, or having received, approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    /// Backend that produced this item
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub extracted: Option<ExtractedContent>,
}

impl CandidateItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            authors: Vec::new(),
            year: None,
            abstract_text: String::new(),
            source: source.into(),
            url: None,
            approved: false,
            extracted: None,
        }
    }

    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.abstract_text = text.into();
        self
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Key used for title-level de-duplication
    pub fn title_key(&self) -> String {
        self.title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// One section of a draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSection {
    pub heading: String,
    /// Body text with `{cite:N}` markers (normalized to `[N]` on export)
    pub body: String,
    /// Candidate ids cited by this section, derived from the body
    #[serde(default)]
    pub cited_ids: Vec<String>,
}

/// Generated review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    pub sections: Vec<DraftSection>,
}

impl Draft {
    /// Export form: markers become `[N]`, out-of-range markers are dropped,
    /// and each section's cited ids are re-derived from the text.
    pub fn normalized(&self, approved: &[CandidateItem]) -> Draft {
        let sections = self
            .sections
            .iter()
            .map(|section| {
                let body = citations::normalize_markers(&section.body, approved.len());
                let indices: BTreeSet<usize> = citations::bracket_indices(&body)
                    .into_iter()
                    .filter(|i| (1..=approved.len()).contains(i))
                    .collect();
                DraftSection {
                    heading: section.heading.clone(),
                    cited_ids: indices
                        .into_iter()
                        .map(|i| approved[i - 1].id.clone())
                        .collect(),
                    body,
                }
            })
            .collect();

        Draft {
            title: self.title.clone(),
            sections,
        }
    }

    /// Short outline used to brief a continuation
    pub fn summary(&self) -> String {
        let headings: Vec<&str> = self.sections.iter().map(|s| s.heading.as_str()).collect();
        format!("Title: {}\nSections: {}", self.title, headings.join(", "))
    }
}

/// Conversation turn recorded on the blackboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approved() -> Vec<CandidateItem> {
        vec![
            CandidateItem::new("p1", "Graph Attention Networks", "semantic_scholar"),
            CandidateItem::new("p2", "Semi-Supervised GCN", "pubmed"),
        ]
    }

    #[test]
    fn test_normalized_rewrites_markers_and_derives_ids() {
        let draft = Draft {
            title: "GNN Review".to_string(),
            sections: vec![DraftSection {
                heading: "Intro".to_string(),
                body: "Attention helps {cite:1}. Spectral methods {cite:2}{cite:3}.".to_string(),
                cited_ids: vec!["bogus".to_string()],
            }],
        };

        let out = draft.normalized(&approved());
        assert_eq!(
            out.sections[0].body,
            "Attention helps [1]. Spectral methods [2]."
        );
        assert_eq!(out.sections[0].cited_ids, vec!["p1", "p2"]);
    }

    #[test]
    fn test_title_key_folds_case_and_space() {
        let a = CandidateItem::new("a", "Graph  Neural\tNetworks", "x");
        let b = CandidateItem::new("b", "graph neural networks", "y");
        assert_eq!(a.title_key(), b.title_key());
    }

    #[test]
    fn test_abstract_field_name() {
        let item = CandidateItem::new("p1", "T", "pubmed").with_abstract("text");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["abstract"], "text");
    }

    #[test]
    fn test_language_parse() {
        assert_eq!(Language::parse("ZH"), Some(Language::Zh));
        assert_eq!(Language::parse("fr"), None);
    }
}
