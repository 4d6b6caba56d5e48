//! Lead deduplication.
//!
//! A candidate is a duplicate when its normalized URL matches a known one,
//! or, failing that, when its normalized title and company both match.

use std::collections::HashSet;

use url::Url;

use crate::models::DedupKeys;
use crate::search::Candidate;

const TRACKING_PREFIXES: &[&str] = &["utm_", "mc_"];
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref"];
const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "ltd", "limited", "corp", "corporation", "co", "gmbh", "plc",
    "sa", "ag", "bv",
];

/// Normalize a URL for comparison: scheme, `www.`, fragment, tracking
/// parameters and trailing slashes are ignored.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let Ok(url) = Url::parse(raw) else {
        return Some(raw.trim_end_matches('/').to_lowercase());
    };
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_lowercase();
            !TRACKING_PREFIXES.iter().any(|p| k.starts_with(p))
                && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    let mut normalized = format!("{}{}", host, url.path().trim_end_matches('/'));
    if !params.is_empty() {
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        normalized.push('?');
        normalized.push_str(&query.join("&"));
    }
    Some(normalized)
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize_text(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .flat_map(|c| {
            let c = if c.is_alphanumeric() { c } else { ' ' };
            c.to_lowercase()
        })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    (!words.is_empty()).then(|| words.join(" "))
}

/// Like [`normalize_text`], also dropping trailing legal-entity suffixes.
pub fn normalize_company(raw: &str) -> Option<String> {
    let text = normalize_text(raw)?;
    let mut words: Vec<&str> = text.split(' ').collect();
    while words.len() > 1 && words.last().is_some_and(|w| LEGAL_SUFFIXES.contains(w)) {
        words.pop();
    }
    Some(words.join(" "))
}

/// Dedup keys for a search candidate.
pub fn keys_for(candidate: &Candidate) -> DedupKeys {
    DedupKeys {
        url: normalize_url(&candidate.url),
        title: normalize_text(&candidate.title),
        company: candidate.account.as_deref().and_then(normalize_company),
    }
}

/// Dedup keys for a lead described by a proposal payload (`url`, `title`
/// and `account` or `company`).
pub fn keys_for_payload(payload: &serde_json::Value) -> DedupKeys {
    let field = |name: &str| payload.get(name).and_then(|v| v.as_str());
    DedupKeys {
        url: field("url").and_then(normalize_url),
        title: field("title").and_then(normalize_text),
        company: field("account")
            .or_else(|| field("company"))
            .and_then(normalize_company),
    }
}

/// Known leads for one tenant, grown as a batch is processed.
#[derive(Debug, Default)]
pub struct DedupIndex {
    urls: HashSet<String>,
    title_company: HashSet<(String, String)>,
    entries: usize,
}

impl DedupIndex {
    pub fn new<I: IntoIterator<Item = DedupKeys>>(known: I) -> Self {
        let mut index = Self::default();
        for keys in known {
            index.insert(&keys);
        }
        index
    }

    pub fn contains(&self, keys: &DedupKeys) -> bool {
        if let Some(url) = &keys.url {
            if self.urls.contains(url) {
                return true;
            }
        }
        match (&keys.title, &keys.company) {
            (Some(title), Some(company)) => self
                .title_company
                .contains(&(title.clone(), company.clone())),
            _ => false,
        }
    }

    /// Record `keys`, returning false if they were already known.
    pub fn insert(&mut self, keys: &DedupKeys) -> bool {
        if self.contains(keys) {
            return false;
        }
        if let Some(url) = &keys.url {
            self.urls.insert(url.clone());
        }
        if let (Some(title), Some(company)) = (&keys.title, &keys.company) {
            self.title_company.insert((title.clone(), company.clone()));
        }
        self.entries += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://www.Acme.com/about/?utm_source=x#team").as_deref(),
            Some("acme.com/about")
        );
        assert_eq!(
            normalize_url("http://acme.com/about").as_deref(),
            Some("acme.com/about")
        );
        assert_eq!(
            normalize_url("https://acme.com/p?b=2&a=1").as_deref(),
            Some("acme.com/p?a=1&b=2")
        );
        assert_eq!(normalize_url("   "), None);
    }

    #[test]
    fn test_normalize_company_strips_suffixes() {
        assert_eq!(normalize_company("Acme, Inc.").as_deref(), Some("acme"));
        assert_eq!(normalize_company("ACME Corp").as_deref(), Some("acme"));
        assert_eq!(normalize_company("Co").as_deref(), Some("co"));
        assert_eq!(normalize_text("  Head of   Sales! ").as_deref(), Some("head of sales"));
    }

    #[test]
    fn test_url_match_wins() {
        let index = DedupIndex::new([keys_for(&Candidate::new(
            "https://acme.com/jobs",
            "Anything",
        ))]);
        let same_url = Candidate::new("http://www.acme.com/jobs/", "Different title");
        assert!(index.contains(&keys_for(&same_url)));
    }

    #[test]
    fn test_title_company_fallback() {
        let known = Candidate::new("https://news.example/a", "Acme raises Series B")
            .with_account("Acme Inc");
        let index = DedupIndex::new([keys_for(&known)]);

        let reposted = Candidate::new("https://other.example/b", "ACME raises series B")
            .with_account("acme");
        assert!(index.contains(&keys_for(&reposted)));

        let no_company = Candidate::new("https://other.example/c", "Acme raises Series B");
        assert!(!index.contains(&keys_for(&no_company)));
    }

    #[test]
    fn test_insert_catches_batch_repeats() {
        let mut index = DedupIndex::default();
        let a = keys_for(&Candidate::new("https://a.example", "A"));
        assert!(index.insert(&a));
        assert!(!index.insert(&a));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_only_tracking_params_are_dropped() {
        assert_eq!(
            normalize_url("https://acme.com/p?ref=home&gclid=1&utm_medium=x").as_deref(),
            Some("acme.com/p")
        );
        assert_eq!(
            normalize_url("https://acme.com/p?reference=42&refine=rust").as_deref(),
            Some("acme.com/p?reference=42&refine=rust")
        );
    }

    #[test]
    fn test_text_folds_non_ascii_case() {
        assert_eq!(normalize_text("ÉCOLE Øst").as_deref(), Some("école øst"));
        assert_eq!(normalize_text("ÉCOLE"), normalize_text("école"));
    }

    #[test]
    fn test_payload_keys_match_candidate_keys() {
        let candidate = Candidate::new("https://www.acme.com/jobs/", "Rust Engineer")
            .with_account("Acme GmbH");
        let payload = serde_json::json!({
            "url": candidate.url,
            "title": candidate.title,
            "account": candidate.account,
        });
        assert_eq!(keys_for_payload(&payload), keys_for(&candidate));

        let by_company = serde_json::json!({"title": "Rust Engineer", "company": "Acme"});
        assert_eq!(keys_for_payload(&by_company).company.as_deref(), Some("acme"));
        assert_eq!(keys_for_payload(&serde_json::json!({"stage": "won"})), DedupKeys::default());
    }
}
