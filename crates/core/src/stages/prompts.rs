//! Default prompt templates bundled at compile time.
//!
//! Placeholders are written `{name}` and filled by [`render`]; anything else
//! in braces (such as the `{cite:N}` marker syntax) is left alone.

/// Planner - query to search keywords
pub const PLANNER: &str = include_str!("defaults/planner.md");

/// Extractor - structured content from one item
pub const EXTRACTOR: &str = include_str!("defaults/extractor.md");

/// Writer - title and section headings
pub const OUTLINE: &str = include_str!("defaults/outline.md");

/// Writer - one section body
pub const SECTION: &str = include_str!("defaults/section.md");

/// Writer addendum after a failed validation
pub const RETRY_ADDENDUM: &str = include_str!("defaults/retry_addendum.md");

/// Writer addendum for a continuation
pub const REVISION_ADDENDUM: &str = include_str!("defaults/revision_addendum.md");

/// Validator - statement/source entailment judge
pub const ENTAILMENT: &str = include_str!("defaults/entailment.md");

/// Fill `{key}` placeholders
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{}}}", key), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_leaves_marker_syntax() {
        let text = render(SECTION, &[("heading", "Background"), ("num_sources", "4")]);
        assert!(text.contains("Section heading: Background"));
        assert!(text.contains("{cite:N}"));
        assert!(text.contains("(1 to 4)"));
    }

    #[test]
    fn test_templates_not_empty() {
        for template in [PLANNER, EXTRACTOR, OUTLINE, SECTION, ENTAILMENT] {
            assert!(!template.trim().is_empty());
        }
    }
}
