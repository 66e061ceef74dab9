//! Semantic Scholar Graph API backend.

use async_trait::async_trait;
use serde_json::Value;

use super::{http_client, SearchBackend, SearchError};
use crate::state::CandidateItem;

pub const NAME: &str = "semantic_scholar";

const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const FIELDS: &str = "paperId,title,abstract,year,authors,url";

pub struct SemanticScholarBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarBackend {
    /// Reads `SEMANTIC_SCHOLAR_API_KEY` if set; the API works without one at a lower rate
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl SearchBackend for SemanticScholarBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateItem>, SearchError> {
        let url = format!(
            "{}/paper/search?query={}&limit={}&fields={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query),
            limit,
            FIELDS
        );

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SearchError::from_reqwest(NAME, &e))?;
        if !response.status().is_success() {
            return Err(SearchError::from_status(NAME, response.status().as_u16()));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| SearchError::from_reqwest(NAME, &e))?;

        Ok(parse_response(&json, limit))
    }
}

/// Map a `/paper/search` body to candidates; entries without id or title are dropped
pub(crate) fn parse_response(json: &Value, limit: usize) -> Vec<CandidateItem> {
    let Some(data) = json.get("data").and_then(|d| d.as_array()) else {
        return Vec::new();
    };

    data.iter()
        .filter_map(|paper| {
            let id = paper.get("paperId").and_then(|v| v.as_str())?;
            let title = paper.get("title").and_then(|v| v.as_str())?.trim();
            if title.is_empty() {
                return None;
            }

            let authors = paper
                .get("authors")
                .and_then(|a| a.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|a| a.get("name").and_then(|n| n.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let mut item = CandidateItem::new(format!("s2:{}", id), title, NAME)
                .with_abstract(paper.get("abstract").and_then(|v| v.as_str()).unwrap_or(""))
                .with_authors(authors);
            item.year = paper
                .get("year")
                .and_then(|v| v.as_i64())
                .map(|y| y as i32);
            item.url = paper
                .get("url")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Some(item)
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_response() {
        let body = json!({
            "total": 2,
            "data": [
                {
                    "paperId": "abc123",
                    "title": "Graph Attention Networks",
                    "abstract": "We present GATs.",
                    "year": 2018,
                    "authors": [{"authorId": "1", "name": "Petar Veličković"}],
                    "url": "https://www.semanticscholar.org/paper/abc123"
                },
                {"paperId": "def456", "title": "", "abstract": null}
            ]
        });

        let items = parse_response(&body, 5);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "s2:abc123");
        assert_eq!(items[0].year, Some(2018));
        assert_eq!(items[0].authors, vec!["Petar Veličković"]);
        assert_eq!(items[0].source, NAME);
    }

    #[test]
    fn test_parse_missing_data() {
        assert!(parse_response(&json!({"message": "rate limited"}), 5).is_empty());
    }
}
