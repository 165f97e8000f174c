use serde::Deserialize;
use std::collections::{HashSet, VecDeque};

use super::{ImageResult, ImageSearch, SearchResults};
use crate::config::{SafeSearch, SearchConfig};
use crate::error::SearchError;

const BASE_URL: &str = "https://duckduckgo.com";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

/// DuckDuckGo image search over the `i.js` JSON endpoint.
pub struct DuckDuckGoSearch {
    agent: ureq::Agent,
    region: String,
    safesearch: SafeSearch,
    max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ImagePage {
    #[serde(default)]
    results: Vec<RawResult>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    image: String,
    #[serde(default)]
    thumbnail: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
}

impl DuckDuckGoSearch {
    pub fn new(config: &SearchConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build();

        Self {
            agent,
            region: config.region.clone(),
            safesearch: config.safesearch,
            max_results: config.max_results,
        }
    }

    fn fetch_vqd(&self, query: &str) -> Result<String, SearchError> {
        let html = self
            .agent
            .post(BASE_URL)
            .send_form(&[("q", query)])
            .map_err(|e| SearchError::Http(e.to_string()))?
            .into_string()
            .map_err(|e| SearchError::Http(e.to_string()))?;

        extract_vqd(&html).ok_or_else(|| SearchError::MissingToken {
            query: query.to_string(),
        })
    }

    fn fetch_page(&self, query: &str, vqd: &str, offset: &str) -> Result<ImagePage, SearchError> {
        let response = self
            .agent
            .get(&format!("{}/i.js", BASE_URL))
            .set("Referer", &format!("{}/", BASE_URL))
            .query("l", &self.region)
            .query("o", "json")
            .query("q", query)
            .query("vqd", vqd)
            .query("f", ",,,,,,")
            .query("p", self.safesearch.query_value())
            .query("s", offset)
            .call()
            .map_err(|e| SearchError::Http(e.to_string()))?;

        let body = response
            .into_string()
            .map_err(|e| SearchError::Http(e.to_string()))?;

        parse_page(&body)
    }
}

impl ImageSearch for DuckDuckGoSearch {
    fn search(&self, query: &str) -> Result<SearchResults<'_>, SearchError> {
        let vqd = self.fetch_vqd(query)?;
        let first = self.fetch_page(query, &vqd, "0")?;

        tracing::debug!(
            query,
            results = first.results.len(),
            has_next = first.next.is_some(),
            "Fetched first result page"
        );

        let mut pages = ResultPages {
            search: self,
            query: query.to_string(),
            vqd,
            buffer: VecDeque::new(),
            next_offset: None,
            seen: HashSet::new(),
            yielded: 0,
        };
        pages.absorb(first);

        Ok(Box::new(pages))
    }

    fn provider_name(&self) -> &'static str {
        "duckduckgo"
    }
}

/// Walks result pages on demand, skipping images already yielded.
struct ResultPages<'a> {
    search: &'a DuckDuckGoSearch,
    query: String,
    vqd: String,
    buffer: VecDeque<ImageResult>,
    next_offset: Option<String>,
    seen: HashSet<String>,
    yielded: usize,
}

impl ResultPages<'_> {
    fn absorb(&mut self, page: ImagePage) {
        self.buffer.extend(page.results.into_iter().map(|r| ImageResult {
            thumbnail: r.thumbnail,
            image: r.image,
            title: r.title,
            url: r.url,
        }));
        self.next_offset = page.next.as_deref().and_then(next_offset);
    }
}

impl Iterator for ResultPages<'_> {
    type Item = ImageResult;

    fn next(&mut self) -> Option<ImageResult> {
        loop {
            if self
                .search
                .max_results
                .is_some_and(|max| self.yielded >= max)
            {
                return None;
            }

            if let Some(result) = self.buffer.pop_front() {
                if result.image.is_empty() || !self.seen.insert(result.image.clone()) {
                    continue;
                }
                self.yielded += 1;
                return Some(result);
            }

            let offset = self.next_offset.take()?;
            match self.search.fetch_page(&self.query, &self.vqd, &offset) {
                Ok(page) => self.absorb(page),
                Err(e) => {
                    tracing::warn!(query = %self.query, offset = %offset, error = %e, "Result page failed, ending search");
                    return None;
                }
            }
        }
    }
}

fn parse_page(body: &str) -> Result<ImagePage, SearchError> {
    serde_json::from_str(body).map_err(|e| SearchError::Malformed(e.to_string()))
}

/// Pull the `vqd` token out of the DuckDuckGo front page.
fn extract_vqd(html: &str) -> Option<String> {
    for (open, close) in [("vqd=\"", '"'), ("vqd=", '&'), ("vqd='", '\'')] {
        if let Some(start) = html.find(open) {
            let rest = &html[start + open.len()..];
            if let Some(end) = rest.find(close) {
                let token = &rest[..end];
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}

/// The `s` offset carried by a `next` link such as `i.js?q=x&s=100&...`.
fn next_offset(next: &str) -> Option<String> {
    let (_, tail) = next.rsplit_once("s=")?;
    let offset = tail.split('&').next().unwrap_or_default();
    (!offset.is_empty()).then(|| offset.to_string())
}
