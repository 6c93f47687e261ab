use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::ExportError;

pub const FIRST_CURSOR: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub ids: Vec<String>,
    pub next_cursor: Option<String>,
    pub total_hits: Option<u64>,
}

impl SearchPage {
    pub fn is_last(&self) -> bool {
        self.ids.is_empty() || self.next_cursor.is_none()
    }
}

pub trait SearchClient: Send + Sync {
    fn fetch_page(&self, base_url: &Url, cursor: &str) -> Result<SearchPage, ExportError>;
}

impl<T: SearchClient + ?Sized> SearchClient for Box<T> {
    fn fetch_page(&self, base_url: &Url, cursor: &str) -> Result<SearchPage, ExportError> {
        (**self).fetch_page(base_url, cursor)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "hitCount")]
    hit_count: Option<u64>,
    entries: Option<Vec<SearchEntry>>,
    #[serde(rename = "searchPosition")]
    search_position: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    id: String,
}

#[derive(Clone)]
pub struct SearchHttpClient {
    client: Client,
    max_attempts: usize,
    retry_delay: Duration,
}

impl SearchHttpClient {
    pub fn new(config: &SearchConfig) -> Result<Self, ExportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("rnac-export/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ExportError::InvalidRequest(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|err| ExportError::FetchFailure {
                attempts: 0,
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
        })
    }

    fn get_text(&self, url: &Url) -> Result<String, String> {
        let response = self.client.get(url.clone()).send().map_err(|err| err.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("{url} returned status {}", status.as_u16()));
        }
        response.text().map_err(|err| err.to_string())
    }
}

impl SearchClient for SearchHttpClient {
    fn fetch_page(&self, base_url: &Url, cursor: &str) -> Result<SearchPage, ExportError> {
        let url = page_url(base_url, cursor);
        debug!(%url, "fetching search page");
        let body = retry_fixed(self.max_attempts, self.retry_delay, || self.get_text(&url))?;
        parse_page(&body)
    }
}

/// Runs `op` up to `max_attempts` times, sleeping `delay` between failed attempts.
pub fn retry_fixed<T, F>(max_attempts: usize, delay: Duration, mut op: F) -> Result<T, ExportError>
where
    F: FnMut() -> Result<T, String>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(message) if attempt < max_attempts => {
                warn!(attempt, max_attempts, %message, "search request failed, retrying");
                std::thread::sleep(delay);
            }
            Err(message) => {
                return Err(ExportError::FetchFailure {
                    attempts: attempt,
                    message,
                });
            }
        }
    }
}

pub fn page_url(base_url: &Url, cursor: &str) -> Url {
    let mut url = base_url.clone();
    url.query_pairs_mut().append_pair("searchposition", cursor);
    url
}

pub fn parse_page(body: &str) -> Result<SearchPage, ExportError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|err| ExportError::MalformedResponse(err.to_string()))?;
    let entries = response
        .entries
        .ok_or_else(|| ExportError::MalformedResponse("missing entries".to_string()))?;
    Ok(SearchPage {
        ids: entries.into_iter().map(|entry| entry.id).collect(),
        next_cursor: response.search_position.filter(|value| !value.is_empty()),
        total_hits: response.hit_count,
    })
}
