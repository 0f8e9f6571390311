use crate::inspector::Finding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One network response captured while a page was opened.
#[derive(Debug, Clone)]
pub struct ResponseDescriptor {
    pub url: String,
    pub status: u16,
    /// Header names are lower-cased; repeated headers are joined with ", ".
    pub headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl ResponseDescriptor {
    pub fn new(url: String, status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            url,
            status,
            headers,
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// A GET query URL or an HTML form submission surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actionable {
    pub url: String,
    #[serde(rename = "type")]
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<String>,
}

impl Actionable {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "get".to_string(),
            data: None,
        }
    }

    /// The serialized record, used as the dedup identity.
    pub fn dedup_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{}|{}|{}", self.url, self.method, self.data.as_deref().unwrap_or(""))
        })
    }
}

/// Links and actionables pulled out of a single page.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub links: Vec<String>,
    pub actionables: Vec<Actionable>,
}

/// Per-page record of a single fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub response_time: Duration,
    pub responses_captured: usize,
    pub links_found: usize,
    pub actionables_found: usize,
    pub findings_found: usize,
    pub error: Option<String>,
}

impl CrawlResult {
    pub fn new(url: String) -> Self {
        Self {
            url,
            status_code: 0,
            content_type: None,
            response_time: Duration::from_secs(0),
            responses_captured: 0,
            links_found: 0,
            actionables_found: 0,
            findings_found: 0,
            error: None,
        }
    }

    pub fn with_error(url: String, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(url)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Everything a finished crawl produced.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub start_url: String,
    /// Canonical URLs in discovery order, terminal file links included.
    pub visited: Vec<String>,
    pub pending: usize,
    pub cap: usize,
    pub cap_reached: bool,
    pub findings: Vec<Finding>,
    pub actionables: Vec<Actionable>,
    pub pages: Vec<CrawlResult>,
}

impl CrawlOutcome {
    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.is_error()).count()
    }
}
