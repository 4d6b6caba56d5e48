//! DuckDuckGo HTML search as a lead source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;

use super::{Candidate, LeadSearch, SearchConfig, SearchError};

const DDG_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// Lead search backed by DuckDuckGo's HTML endpoint.
///
/// Understood filters: `site` (restrict to a domain), `exclude` (array of
/// terms to negate), `region` (DuckDuckGo `kl` code, default `us-en`).
pub struct DuckDuckGoSearch {
    client: Client,
    config: SearchConfig,
}

impl DuckDuckGoSearch {
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn parse_results(&self, html: &str) -> Result<Vec<Candidate>, SearchError> {
        let document = Html::parse_document(html);

        // Each hit is an <a class="result__a"> inside a .result block
        let result_selector = Selector::parse("div.result")
            .map_err(|e| SearchError::Parse(format!("bad selector: {:?}", e)))?;
        let link_selector = Selector::parse("a.result__a")
            .map_err(|e| SearchError::Parse(format!("bad selector: {:?}", e)))?;
        let snippet_selector = Selector::parse(".result__snippet")
            .map_err(|e| SearchError::Parse(format!("bad selector: {:?}", e)))?;

        let mut results = Vec::new();
        for block in document.select(&result_selector) {
            let Some(link) = block.select(&link_selector).next() else {
                continue;
            };
            let Some(url) = link.value().attr("href").and_then(extract_url) else {
                continue;
            };
            let title = collapse_whitespace(&link.text().collect::<String>());
            let snippet = block
                .select(&snippet_selector)
                .next()
                .map(|s| collapse_whitespace(&s.text().collect::<String>()))
                .filter(|s| !s.is_empty());

            let mut candidate = Candidate::new(&url, &title);
            candidate.account = guess_account(&title, &url);
            candidate.raw = serde_json::json!({ "engine": "duckduckgo" });
            candidate.snippet = snippet;
            results.push(candidate);

            if self.config.max_results > 0 && results.len() >= self.config.max_results {
                break;
            }
        }

        debug!("Parsed {} results from DuckDuckGo", results.len());
        Ok(results)
    }
}

#[async_trait]
impl LeadSearch for DuckDuckGoSearch {
    async fn search(
        &self,
        query: &str,
        filters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<Candidate>, SearchError> {
        let full_query = build_query(query, filters);
        let region = filters
            .get("region")
            .and_then(|v| v.as_str())
            .unwrap_or("us-en");
        debug!("DuckDuckGo search: {}", full_query);

        let response = self
            .client
            .post(DDG_SEARCH_URL)
            .form(&[("q", full_query.as_str()), ("kl", region)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::Unavailable(format!(
                "DuckDuckGo returned {}",
                response.status()
            )));
        }

        let html = response.text().await?;
        self.parse_results(&html)
    }
}

fn build_query(query: &str, filters: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut parts = vec![query.trim().to_string()];
    if let Some(site) = filters.get("site").and_then(|v| v.as_str()) {
        parts.push(format!("site:{}", site));
    }
    if let Some(excluded) = filters.get("exclude").and_then(|v| v.as_array()) {
        for term in excluded.iter().filter_map(|t| t.as_str()) {
            if term.contains(' ') {
                parts.push(format!("-\"{}\"", term));
            } else {
                parts.push(format!("-{}", term));
            }
        }
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Extract the actual URL from DuckDuckGo's redirect URL.
fn extract_url(href: &str) -> Option<String> {
    if href.starts_with("//duckduckgo.com/l/") || href.starts_with("/l/") {
        // //duckduckgo.com/l/?uddg=<encoded_url>&...
        let uddg_start = href.find("uddg=")?;
        let encoded = &href[uddg_start + 5..];
        let end = encoded.find('&').unwrap_or(encoded.len());
        urlencoding::decode(&encoded[..end])
            .ok()
            .map(|s| s.into_owned())
    } else if href.starts_with("http://") || href.starts_with("https://") {
        Some(href.to_string())
    } else if href.starts_with("//") {
        Some(format!("https:{}", href))
    } else {
        None
    }
}

/// Company name from a "Role - Company" style title, else the bare domain.
fn guess_account(title: &str, url: &str) -> Option<String> {
    for sep in [" | ", " - ", " – ", " at "] {
        if let Some((_, tail)) = title.rsplit_once(sep) {
            let tail = tail.trim();
            if !tail.is_empty() && tail.len() <= 80 {
                return Some(tail.to_string());
            }
        }
    }
    let host = url::Url::parse(url).ok()?.host_str()?.to_string();
    Some(host.trim_start_matches("www.").to_string())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r##"
        <div class="results">
          <div class="result results_links">
            <h2><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Facme.io%2Fjobs%2F42&rut=x">
              Senior Rust Engineer - Acme</a></h2>
            <a class="result__snippet" href="#">Build   payment rails.</a>
          </div>
          <div class="result results_links">
            <h2><a class="result__a" href="https://www.globex.com/careers">Careers</a></h2>
          </div>
          <div class="result results_links">
            <h2><a class="result__a" href="javascript:void(0)">Ad</a></h2>
          </div>
        </div>"##;

    fn search() -> DuckDuckGoSearch {
        DuckDuckGoSearch::new(SearchConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_results() {
        let results = search().parse_results(SAMPLE).unwrap();
        assert_eq!(results.len(), 2);

        assert_eq!(results[0].url, "https://acme.io/jobs/42");
        assert_eq!(results[0].title, "Senior Rust Engineer - Acme");
        assert_eq!(results[0].account.as_deref(), Some("Acme"));
        assert_eq!(results[0].snippet.as_deref(), Some("Build payment rails."));

        assert_eq!(results[1].account.as_deref(), Some("globex.com"));
    }

    #[test]
    fn test_max_results() {
        let mut config = SearchConfig::default();
        config.max_results = 1;
        let search = DuckDuckGoSearch::new(config).unwrap();
        assert_eq!(search.parse_results(SAMPLE).unwrap().len(), 1);
    }

    #[test]
    fn test_build_query_applies_filters() {
        let filters = json!({"site": "linkedin.com", "exclude": ["intern", "junior dev"]});
        let query = build_query("rust engineer", filters.as_object().unwrap());
        assert_eq!(
            query,
            "rust engineer site:linkedin.com -intern -\"junior dev\""
        );
    }

    #[test]
    fn test_extract_url() {
        assert_eq!(
            extract_url("//example.com/a"),
            Some("https://example.com/a".to_string())
        );
        assert_eq!(extract_url("/settings"), None);
    }
}
