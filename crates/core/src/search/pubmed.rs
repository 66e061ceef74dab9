//! NCBI PubMed E-utilities backend (esearch for ids, esummary for metadata).

use async_trait::async_trait;
use serde_json::Value;

use super::{http_client, SearchBackend, SearchError};
use crate::state::CandidateItem;

pub const NAME: &str = "pubmed";

const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

pub struct PubMedBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PubMedBackend {
    /// Reads `NCBI_API_KEY` if set
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: std::env::var("NCBI_API_KEY").ok(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn key_param(&self) -> String {
        self.api_key
            .as_ref()
            .map(|k| format!("&api_key={}", urlencoding::encode(k)))
            .unwrap_or_default()
    }

    async fn get_json(&self, url: &str) -> Result<Value, SearchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SearchError::from_reqwest(NAME, &e))?;
        if !response.status().is_success() {
            return Err(SearchError::from_status(NAME, response.status().as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| SearchError::from_reqwest(NAME, &e))
    }
}

#[async_trait]
impl SearchBackend for PubMedBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateItem>, SearchError> {
        let base = self.base_url.trim_end_matches('/');
        let search_url = format!(
            "{}/esearch.fcgi?db=pubmed&retmode=json&retmax={}&term={}{}",
            base,
            limit,
            urlencoding::encode(query),
            self.key_param()
        );
        let ids = parse_id_list(&self.get_json(&search_url).await?);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let summary_url = format!(
            "{}/esummary.fcgi?db=pubmed&retmode=json&id={}{}",
            base,
            ids.join(","),
            self.key_param()
        );
        let summary = self.get_json(&summary_url).await?;
        Ok(parse_summaries(&summary, &ids))
    }
}

pub(crate) fn parse_id_list(json: &Value) -> Vec<String> {
    json.pointer("/esearchresult/idlist")
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Summaries keyed by uid, returned in esearch rank order
pub(crate) fn parse_summaries(json: &Value, ids: &[String]) -> Vec<CandidateItem> {
    let Some(result) = json.get("result") else {
        return Vec::new();
    };

    ids.iter()
        .filter_map(|uid| {
            let doc = result.get(uid.as_str())?;
            let title = doc.get("title").and_then(|v| v.as_str())?.trim();
            if title.is_empty() {
                return None;
            }

            let authors = doc
                .get("authors")
                .and_then(|a| a.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|a| a.get("name").and_then(|n| n.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let mut item = CandidateItem::new(format!("pmid:{}", uid), title, NAME).with_authors(authors);
            // "2019 Mar 12" -> 2019
            item.year = doc
                .get("pubdate")
                .and_then(|v| v.as_str())
                .and_then(|d| d.get(..4))
                .and_then(|y| y.parse().ok());
            item.url = Some(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", uid));
            if let Some(journal) = doc.get("fulljournalname").and_then(|v| v.as_str()) {
                item.abstract_text = format!("Published in {}.", journal);
            }
            Some(item)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_id_list() {
        let body = json!({"esearchresult": {"count": "2", "idlist": ["311", "42"]}});
        assert_eq!(parse_id_list(&body), vec!["311", "42"]);
        assert!(parse_id_list(&json!({})).is_empty());
    }

    #[test]
    fn test_parse_summaries_keeps_rank_order() {
        let body = json!({
            "result": {
                "uids": ["42", "311"],
                "42": {"uid": "42", "title": "Second", "pubdate": "2020 Jan"},
                "311": {
                    "uid": "311",
                    "title": "First",
                    "pubdate": "2019 Mar 12",
                    "authors": [{"name": "Kipf TN"}],
                    "fulljournalname": "Journal of Graphs"
                }
            }
        });
        let ids = vec!["311".to_string(), "42".to_string()];
        let items = parse_summaries(&body, &ids);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "pmid:311");
        assert_eq!(items[0].year, Some(2019));
        assert_eq!(items[0].authors, vec!["Kipf TN"]);
        assert_eq!(items[1].title, "Second");
    }
}
