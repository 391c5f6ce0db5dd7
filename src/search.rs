use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::SearchError;

/// Rough characters-per-token ratio used to turn token budgets into
/// character budgets.
pub const CHARS_PER_TOKEN: usize = 4;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchCategory {
    #[default]
    General,
    News,
    Finance,
}

impl SearchCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchCategory::General => "general",
            SearchCategory::News => "news",
            SearchCategory::Finance => "finance",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchDepth::Basic => "basic",
            SearchDepth::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_results_per_query: usize,
    pub max_tokens_per_source: usize,
    pub category: SearchCategory,
    pub depth: SearchDepth,
    pub days_back: Option<u32>,
    pub include_raw_content: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

impl SourceRecord {
    pub fn new(url: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            raw_content: None,
        }
    }

    pub fn with_raw_content(mut self, raw: impl Into<String>) -> Self {
        self.raw_content = Some(raw.into());
        self
    }

    /// Caps content and raw content to `max_tokens`.
    pub fn capped(mut self, max_tokens: usize) -> Self {
        self.content = truncate_to_tokens(&self.content, max_tokens);
        self.raw_content = self.raw_content.map(|raw| truncate_to_tokens(&raw, max_tokens));
        self
    }
}

/// Sources keyed by URL. Inserting a URL that is already present replaces
/// the earlier entry, so a URL never appears twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceMap(BTreeMap<String, SourceRecord>);

impl SourceMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, record: SourceRecord) -> Option<SourceRecord> {
        self.0.insert(record.url.clone(), record)
    }

    pub fn merge(&mut self, other: SourceMap) {
        for (_, record) in other.0 {
            self.insert(record);
        }
    }

    pub fn get(&self, url: &str) -> Option<&SourceRecord> {
        self.0.get(url)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn urls(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceRecord> {
        self.0.values()
    }
}

impl IntoIterator for SourceMap {
    type Item = (String, SourceRecord);
    type IntoIter = btree_map::IntoIter<String, SourceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<SourceRecord> for SourceMap {
    fn from_iter<I: IntoIterator<Item = SourceRecord>>(iter: I) -> Self {
        let mut map = SourceMap::new();
        for record in iter {
            map.insert(record);
        }
        map
    }
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Runs every query and returns the results deduplicated by URL, each
    /// capped to `options.max_tokens_per_source`.
    async fn search(&self, queries: &[String], options: &SearchOptions) -> Result<SourceMap, SearchError>;
}

pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Flattens sources into the prompt block handed to the note taker.
pub fn format_sources(sources: &SourceMap, max_tokens_per_source: usize, include_raw_content: bool) -> String {
    if sources.is_empty() {
        return "Sources:\n\nNo sources were found.\n".to_string();
    }

    let mut out = String::from("Sources:\n\n");
    for source in sources.iter() {
        out.push_str(&format!("Source: {}\n===\n", source.title));
        out.push_str(&format!("URL: {}\n===\n", source.url));
        out.push_str(&format!("Most relevant content from source: {}\n===\n", source.content));
        if include_raw_content {
            let raw = source.raw_content.as_deref().unwrap_or_default();
            out.push_str(&format!(
                "Full source content limited to {} tokens: {}\n\n",
                max_tokens_per_source,
                truncate_to_tokens(raw, max_tokens_per_source)
            ));
        } else {
            out.push('\n');
        }
    }
    out
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    topic: &'static str,
    search_depth: &'static str,
    max_results: usize,
    include_raw_content: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

#[derive(Debug, Clone)]
struct CallWindow {
    last_call: Instant,
    call_count: usize,
}

/// [`WebSearch`] backed by the Tavily search API.
pub struct TavilyClient {
    endpoint: String,
    api_key: String,
    http_client: reqwest::Client,
    window: StdMutex<Option<CallWindow>>,
}

impl TavilyClient {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.tavily.com/search";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(Self::DEFAULT_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            http_client: reqwest::Client::new(),
            window: StdMutex::new(None),
        }
    }

    /// Progressive delay for bursts of calls inside one minute: 0ms,
    /// 100ms, 250ms, 500ms, 1s, then 1.5s.
    fn rate_limit_delay(&self) -> Duration {
        let now = Instant::now();
        let Ok(mut window) = self.window.lock() else {
            return Duration::ZERO;
        };

        let call_count = match window.as_mut() {
            Some(w) if now.duration_since(w.last_call) <= RATE_LIMIT_WINDOW => {
                w.call_count += 1;
                w.last_call = now;
                w.call_count
            }
            _ => {
                *window = Some(CallWindow { last_call: now, call_count: 1 });
                1
            }
        };

        let delay_ms = match call_count {
            1 => 0,
            2 => 100,
            3 => 250,
            4 => 500,
            5 => 1000,
            _ => 1500,
        };
        Duration::from_millis(delay_ms)
    }

    async fn search_one(&self, query: &str, options: &SearchOptions) -> Result<TavilyResponse, SearchError> {
        let delay = self.rate_limit_delay();
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, query, "rate limiting search call");
            tokio::time::sleep(delay).await;
        }

        let days = match options.category {
            SearchCategory::News => options.days_back,
            SearchCategory::General | SearchCategory::Finance => None,
        };
        let request = TavilyRequest {
            query,
            topic: options.category.as_str(),
            search_depth: options.depth.as_str(),
            max_results: options.max_results_per_query,
            include_raw_content: options.include_raw_content,
            days,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status { status: status.as_u16(), body });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl WebSearch for TavilyClient {
    async fn search(&self, queries: &[String], options: &SearchOptions) -> Result<SourceMap, SearchError> {
        let responses = join_all(queries.iter().map(|q| self.search_one(q, options))).await;

        let mut sources = SourceMap::new();
        let mut failures = 0usize;
        let mut total_results = 0usize;

        for (query, response) in queries.iter().zip(responses) {
            match response {
                Ok(response) => {
                    debug!(query = %query, results = response.results.len(), "search query returned");
                    for result in response.results {
                        total_results += 1;
                        let mut record = SourceRecord::new(result.url, result.title, result.content);
                        if options.include_raw_content {
                            record.raw_content = result.raw_content;
                        }
                        sources.insert(record.capped(options.max_tokens_per_source));
                    }
                }
                Err(err) => {
                    failures += 1;
                    warn!(query = %query, error = %err, "search query failed");
                }
            }
        }

        if !queries.is_empty() && failures == queries.len() {
            return Err(SearchError::AllQueriesFailed(failures));
        }

        debug!(unique = sources.len(), total_results, "search batch deduplicated");
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> SearchOptions {
        SearchOptions {
            max_results_per_query: 3,
            max_tokens_per_source: 2,
            category: SearchCategory::General,
            depth: SearchDepth::Basic,
            days_back: None,
            include_raw_content: true,
        }
    }

    #[test]
    fn source_map_keeps_one_entry_per_url() {
        let mut map = SourceMap::new();
        map.insert(SourceRecord::new("https://a.io", "A", "first"));
        let replaced = map.insert(SourceRecord::new("https://a.io", "A", "second"));

        assert_eq!(replaced.unwrap().content, "first");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("https://a.io").unwrap().content, "second");

        let other: SourceMap = vec![
            SourceRecord::new("https://a.io", "A", "third"),
            SourceRecord::new("https://b.io", "B", "b"),
        ]
        .into_iter()
        .collect();
        map.merge(other);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("https://a.io").unwrap().content, "third");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_tokens("abcdefghij", 2), "abcdefgh");
        assert_eq!(truncate_to_tokens("short", 10), "short");
        assert_eq!(truncate_to_tokens("ééééé", 1), "éééé");
    }

    #[test]
    fn capped_applies_to_raw_content() {
        let record = SourceRecord::new("u", "t", "123456789").with_raw_content("abcdefghijk").capped(1);
        assert_eq!(record.content, "1234");
        assert_eq!(record.raw_content.as_deref(), Some("abcd"));
    }

    #[test]
    fn format_sources_renders_each_source() {
        let map: SourceMap = vec![SourceRecord::new("https://a.io", "Alpha", "about a").with_raw_content("raw a")]
            .into_iter()
            .collect();

        let text = format_sources(&map, 100, true);
        assert!(text.starts_with("Sources:\n\n"));
        assert!(text.contains("Source: Alpha"));
        assert!(text.contains("URL: https://a.io"));
        assert!(text.contains("Most relevant content from source: about a"));
        assert!(text.contains("Full source content limited to 100 tokens: raw a"));

        let without_raw = format_sources(&map, 100, false);
        assert!(!without_raw.contains("Full source content"));
        assert!(format_sources(&SourceMap::new(), 100, true).contains("No sources were found"));
    }

    #[tokio::test]
    async fn tavily_client_deduplicates_across_queries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer tvly-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "url": "https://acme.io", "title": "Acme", "content": "Acme builds rockets", "raw_content": "long page", "score": 0.9 },
                    { "url": "https://news.io/acme", "title": "News", "content": "Acme raised", "raw_content": null, "score": 0.5 }
                ]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = TavilyClient::with_endpoint(format!("{}/search", server.uri()), "tvly-test");
        let sources = client
            .search(&["acme rockets".to_string(), "acme funding".to_string()], &options())
            .await
            .unwrap();

        assert_eq!(sources.len(), 2);
        let acme = sources.get("https://acme.io").unwrap();
        assert_eq!(acme.content, "Acme bui");
        assert_eq!(acme.raw_content.as_deref(), Some("long pag"));
        assert!(sources.get("https://news.io/acme").unwrap().raw_content.is_none());
    }

    #[tokio::test]
    async fn tavily_client_fails_only_when_every_query_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let client = TavilyClient::with_endpoint(server.uri(), "key");
        let err = client.search(&["q".to_string()], &options()).await.unwrap_err();
        assert!(matches!(err, SearchError::AllQueriesFailed(1)));

        let empty = client.search(&[], &options()).await.unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn rate_limit_delay_grows_within_window() {
        let client = TavilyClient::new("key");
        assert_eq!(client.rate_limit_delay(), Duration::ZERO);
        assert_eq!(client.rate_limit_delay(), Duration::from_millis(100));
        assert_eq!(client.rate_limit_delay(), Duration::from_millis(250));
    }
}
