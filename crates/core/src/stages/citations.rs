//! # Citation Markers
//!
//! Generated text cites approved items as `{cite:N}`, N being the 1-based
//! position in the approved list. Citations are always re-derived from the
//! text; nothing the generator reports about its own citations is trusted.

use regex::Regex;
use std::sync::LazyLock;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{cite:\s*(\d+)\s*\}").expect("valid marker regex"));
static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid bracket regex"));
// terminal punctuation, plus any markers trailing it
static SENTENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.!?。！？](?:\s*\{cite:\s*\d+\s*\})*").expect("valid sentence regex")
});

/// Every `{cite:N}` index in order of appearance (duplicates kept)
pub fn marker_indices(text: &str) -> Vec<usize> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

/// Every `[N]` index in order of appearance
pub fn bracket_indices(text: &str) -> Vec<usize> {
    BRACKET_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

/// Rewrite `{cite:N}` to `[N]`; markers outside `1..=max_index` are removed
pub fn normalize_markers(text: &str, max_index: usize) -> String {
    MARKER_RE
        .replace_all(text, |caps: &regex::Captures| {
            match caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
                Some(idx) if (1..=max_index).contains(&idx) => format!("[{}]", idx),
                other => {
                    tracing::warn!(index = ?other, max_index, "Dropping out-of-range citation");
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Remove all markers, leaving the prose
pub fn strip_markers(text: &str) -> String {
    let stripped = MARKER_RE.replace_all(text, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A sentence that carries at least one citation
#[derive(Debug, Clone, PartialEq)]
pub struct CitedStatement {
    /// Sentence text with markers removed
    pub text: String,
    /// Distinct indices cited by the sentence
    pub indices: Vec<usize>,
}

/// Split a body into sentences and keep those with at least one marker
pub fn cited_statements(body: &str) -> Vec<CitedStatement> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut push = |chunk: &str| {
        let mut indices = marker_indices(chunk);
        if indices.is_empty() {
            return;
        }
        indices.sort_unstable();
        indices.dedup();
        let text = strip_markers(chunk);
        if !text.is_empty() {
            statements.push(CitedStatement { text, indices });
        }
    };

    for m in SENTENCE_RE.find_iter(body) {
        push(&body[start..m.end()]);
        start = m.end();
    }
    if start < body.len() {
        push(&body[start..]);
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_indices_tolerates_spacing() {
        assert_eq!(marker_indices("a {cite:1} b {cite: 12 } c {cite:x}"), vec![1, 12]);
    }

    #[test]
    fn test_normalize_drops_out_of_range() {
        assert_eq!(normalize_markers("x {cite:0} y {cite:2} z {cite:3}", 2), "x  y [2] z ");
    }

    #[test]
    fn test_cited_statements_attach_trailing_markers() {
        let body = "GNNs aggregate neighbours. {cite:1} Attention weighs edges {cite:2}. \
                    Nothing cited here. Both agree.{cite:1}{cite:2}";
        let statements = cited_statements(body);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0].text, "GNNs aggregate neighbours.");
        assert_eq!(statements[0].indices, vec![1]);
        assert_eq!(statements[1].indices, vec![2]);
        assert_eq!(statements[2].text, "Both agree.");
        assert_eq!(statements[2].indices, vec![1, 2]);
    }

    #[test]
    fn test_cited_statements_without_terminal_punctuation() {
        let statements = cited_statements("Trailing claim {cite:4}");
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].indices, vec![4]);
    }
}
