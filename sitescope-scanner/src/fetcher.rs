use crate::error::{Result, ScanError};
use crate::result::ResponseDescriptor;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use reqwest::header::HeaderMap;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

/// A form as it appears on the page, action already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSnapshot {
    pub action: String,
    /// Raw `method` attribute, lower-cased; empty when unspecified.
    pub method: String,
    /// `name=value` pairs of every input, select and textarea, in document order.
    pub fields: Vec<(String, String)>,
}

/// What opening a page surfaced.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    pub url: String,
    /// Every anchor href on the page, resolved to an absolute URL.
    pub links: Vec<String>,
    pub forms: Vec<FormSnapshot>,
    /// One descriptor per response, the top-level navigation first.
    pub responses: Vec<ResponseDescriptor>,
}

impl PageSnapshot {
    pub fn document(&self) -> Option<&ResponseDescriptor> {
        self.responses.first()
    }
}

/// Capability that opens a page and reports its links, forms and responses.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn open(&self, url: &str) -> Result<PageSnapshot>;
}

/// Static HTTP fetcher: downloads the document and its referenced
/// sub-resources without executing scripts.
pub struct HttpFetcher {
    client: Client,
    sessions: Arc<Semaphore>,
    max_subresources: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_options(timeout, 10, 32)
    }

    pub fn with_options(
        timeout: Duration,
        max_sessions: usize,
        max_subresources: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("Sitescope/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ScanError::FetcherUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            sessions: Arc::new(Semaphore::new(max_sessions.max(1))),
            max_subresources,
        })
    }

    async fn capture(&self, url: &str) -> Result<(Url, ResponseDescriptor)> {
        let response = self.client.get(url).send().await?;
        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?.to_vec();

        Ok((
            final_url,
            ResponseDescriptor::new(url.to_string(), status, headers, body),
        ))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn open(&self, url: &str) -> Result<PageSnapshot> {
        // One session per page, released when this call returns.
        let _session = self
            .sessions
            .acquire()
            .await
            .map_err(|e| ScanError::FetcherUnavailable(e.to_string()))?;

        debug!("Opening {}", url);
        let (final_url, document) = self.capture(url).await?;

        let is_html = document
            .content_type()
            .map(|ct| ct.contains("html"))
            .unwrap_or(false);

        let mut snapshot = PageSnapshot {
            url: url.to_string(),
            ..Default::default()
        };

        if is_html {
            let html = String::from_utf8_lossy(document.body());
            let parsed = parse_document(&html, &final_url);
            snapshot.links = parsed.links;
            snapshot.forms = parsed.forms;

            let subresources: Vec<String> = parsed
                .subresources
                .into_iter()
                .take(self.max_subresources)
                .collect();

            snapshot.responses.push(document);

            let captures = join_all(subresources.iter().map(|u| self.capture(u))).await;
            for (sub_url, capture) in subresources.iter().zip(captures) {
                match capture {
                    Ok((_, descriptor)) => snapshot.responses.push(descriptor),
                    Err(e) => debug!("Sub-resource {} failed: {}", sub_url, e),
                }
            }
        } else {
            snapshot.responses.push(document);
        }

        Ok(snapshot)
    }
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        collected
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    collected
}

/// Elements pulled out of an HTML document.
#[derive(Debug, Default)]
pub struct ParsedDocument {
    pub links: Vec<String>,
    pub forms: Vec<FormSnapshot>,
    pub subresources: Vec<String>,
}

/// Parse anchors, forms and sub-resource references out of `html`, resolving
/// everything against `base`.
pub fn parse_document(html: &str, base: &Url) -> ParsedDocument {
    let document = Html::parse_document(html);
    let base = document_base(&document, base);

    let anchor_selector = Selector::parse("a[href]").unwrap();
    let links = document
        .select(&anchor_selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve_url(&base, href))
        .collect();

    let form_selector = Selector::parse("form").unwrap();
    let forms = document
        .select(&form_selector)
        .map(|form| form_snapshot(form, &base))
        .collect();

    let resource_selector =
        Selector::parse("script[src], link[href], img[src], iframe[src]").unwrap();
    let mut subresources: Vec<String> = Vec::new();
    for element in document.select(&resource_selector) {
        let el = element.value();
        let reference = match el.name() {
            "link" => {
                let rel = el.attr("rel").unwrap_or("").to_lowercase();
                if !(rel.contains("stylesheet") || rel.contains("icon") || rel.contains("preload"))
                {
                    continue;
                }
                el.attr("href")
            }
            _ => el.attr("src"),
        };
        if let Some(resolved) = reference.and_then(|r| resolve_url(&base, r))
            && resolved.starts_with("http")
            && !subresources.contains(&resolved)
        {
            subresources.push(resolved);
        }
    }

    ParsedDocument {
        links,
        forms,
        subresources,
    }
}

fn document_base(document: &Html, url: &Url) -> Url {
    let base_selector = Selector::parse("base[href]").unwrap();
    document
        .select(&base_selector)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| url.join(href.trim()).ok())
        .unwrap_or_else(|| url.clone())
}

fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let mut resolved = base.join(href).ok()?;
    // fragments never reach the frontier or the actionable list
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

fn form_snapshot(form: ElementRef<'_>, base: &Url) -> FormSnapshot {
    let method = form
        .value()
        .attr("method")
        .unwrap_or("")
        .trim()
        .to_lowercase();

    let action = form
        .value()
        .attr("action")
        .filter(|a| !a.trim().is_empty())
        .and_then(|a| base.join(a.trim()).ok())
        .unwrap_or_else(|| base.clone())
        .to_string();

    let field_selector = Selector::parse("input, select, textarea").unwrap();
    let fields = form
        .select(&field_selector)
        .map(|field| {
            let el = field.value();
            let name = el.attr("name").unwrap_or("").to_string();
            let value = match el.name() {
                "textarea" => field.text().collect::<String>(),
                "select" => select_value(field),
                _ => el.attr("value").unwrap_or("").to_string(),
            };
            (name, value)
        })
        .collect();

    FormSnapshot {
        action,
        method,
        fields,
    }
}

fn select_value(select: ElementRef<'_>) -> String {
    let option_selector = Selector::parse("option").unwrap();
    let mut options = select.select(&option_selector);
    let first = options.next();
    let chosen = first
        .into_iter()
        .chain(options)
        .find(|o| o.value().attr("selected").is_some())
        .or(first);

    chosen
        .map(|o| {
            o.value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| o.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default()
}
