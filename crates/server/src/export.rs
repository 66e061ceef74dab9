//! Markdown rendering of a finished draft.

use scholar_core::state::{CandidateItem, Draft};
use serde::Serialize;
use utoipa::ToSchema;

/// One numbered entry of the reference list
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReferenceEntry {
    /// 1-based position in the approved list, as cited in the text
    pub index: usize,
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub url: Option<String>,
}

impl ReferenceEntry {
    fn line(&self) -> String {
        let mut line = format!("[{}] ", self.index);
        if !self.authors.is_empty() {
            let shown: Vec<&str> = self.authors.iter().take(3).map(String::as_str).collect();
            let more = if self.authors.len() > 3 { " et al." } else { "" };
            line.push_str(&format!("{}{}. ", shown.join(", "), more));
        }
        line.push_str(&self.title);
        if let Some(year) = self.year {
            line.push_str(&format!(" ({})", year));
        }
        if let Some(url) = &self.url {
            line.push_str(&format!(". {}", url));
        }
        line
    }
}

/// Reference list numbered by approved-list position
pub fn references(approved: &[CandidateItem]) -> Vec<ReferenceEntry> {
    approved
        .iter()
        .enumerate()
        .map(|(i, item)| ReferenceEntry {
            index: i + 1,
            id: item.id.clone(),
            title: item.title.clone(),
            authors: item.authors.clone(),
            year: item.year,
            url: item.url.clone(),
        })
        .collect()
}

/// Render an exported (`[N]`-marker) draft with its reference list
pub fn markdown(draft: &Draft, approved: &[CandidateItem]) -> String {
    let mut out = format!("# {}\n", draft.title);
    for section in &draft.sections {
        out.push_str(&format!("\n## {}\n\n{}\n", section.heading, section.body.trim()));
    }

    let references = references(approved);
    if !references.is_empty() {
        out.push_str("\n## References\n\n");
        for entry in &references {
            out.push_str(&entry.line());
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholar_core::state::DraftSection;

    #[test]
    fn test_markdown_lists_references_in_citation_order() {
        let approved = vec![
            CandidateItem::new("p1", "Graph Attention Networks", "semantic_scholar")
                .with_authors(vec!["Velickovic".to_string()])
                .with_year(2018),
            CandidateItem::new("p2", "GraphSAGE", "pubmed"),
        ];
        let draft = Draft {
            title: "GNN Review".to_string(),
            sections: vec![DraftSection {
                heading: "Background".to_string(),
                body: "Attention helps [1]. Sampling scales [2].".to_string(),
                cited_ids: vec!["p1".to_string(), "p2".to_string()],
            }],
        };

        let rendered = markdown(&draft, &approved);
        assert!(rendered.starts_with("# GNN Review\n"));
        assert!(rendered.contains("## Background\n\nAttention helps [1]."));
        assert!(rendered.contains("[1] Velickovic. Graph Attention Networks (2018)"));
        assert!(rendered.contains("[2] GraphSAGE\n"));
    }
}
