use crate::error::{Result, ScanError};
use crate::extract::extract;
use crate::fetcher::PageFetcher;
use crate::inspector::{Finding, InspectorPipeline};
use crate::normalize::{LinkKind, canonicalize, classify_link, default_skip_extensions};
use crate::result::{CrawlOutcome, CrawlResult, ExtractionResult};
use crate::session::CrawlSession;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Called with `(visited, cap, url)` each time a page is dispatched.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, String) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub concurrency: usize,
    pub max_links: usize,
    pub page_timeout: Duration,
    pub inspector_timeout: Duration,
    pub skip_extensions: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_links: 1000,
            page_timeout: Duration::from_secs(30),
            inspector_timeout: Duration::from_secs(10),
            skip_extensions: default_skip_extensions(),
        }
    }
}

impl CrawlConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_links(mut self, max_links: usize) -> Self {
        self.max_links = max_links;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub fn with_inspector_timeout(mut self, timeout: Duration) -> Self {
        self.inspector_timeout = timeout;
        self
    }

    pub fn with_extra_extensions(mut self, extensions: Vec<String>) -> Self {
        for ext in extensions {
            if !self.skip_extensions.contains(&ext) {
                self.skip_extensions.push(ext);
            }
        }
        self
    }
}

/// What one fetch task hands back to the scheduler.
struct PageVisit {
    result: CrawlResult,
    extraction: Option<ExtractionResult>,
    findings: Vec<Finding>,
}

/// Round-based crawl scheduler.
///
/// Each round takes a batch from the frontier, fetches it concurrently and
/// waits for the whole batch before merging results and starting the next
/// round. All state changes happen on the scheduler between rounds.
pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    pipeline: Arc<InspectorPipeline>,
    config: CrawlConfig,
    progress_callback: Option<ProgressCallback>,
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, pipeline: InspectorPipeline) -> Self {
        Self {
            fetcher,
            pipeline: Arc::new(pipeline),
            config: CrawlConfig::default(),
            progress_callback: None,
        }
    }

    pub fn with_config(mut self, config: CrawlConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub async fn crawl(&self, start_url: &str) -> Result<CrawlOutcome> {
        let parsed = Url::parse(start_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", start_url, e)))?;
        let start_host = parsed
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(format!("{} has no host", start_url)))?
            .to_string();
        if !parsed.origin().is_tuple() {
            return Err(ScanError::InvalidUrl(format!("{} has no origin", start_url)));
        }

        let cap = self.config.max_links;
        let concurrency = self.config.concurrency.max(1);
        info!(
            "Starting crawl of {} (concurrency {}, cap {})",
            start_url, concurrency, cap
        );

        let mut session = CrawlSession::new(cap);
        session.enqueue(canonicalize(&parsed));

        let mut pages = Vec::new();
        let mut round = 0usize;

        while session.has_pending() && session.visited_count() < cap {
            let batch = session.next_batch(concurrency);
            if batch.is_empty() {
                break;
            }
            round += 1;
            debug!("Round {}: dispatching {} page(s)", round, batch.len());

            let mut handles = Vec::with_capacity(batch.len());
            for url in batch {
                if let Some(ref callback) = self.progress_callback {
                    callback(session.visited_count(), cap, url.clone());
                }

                let fetcher = self.fetcher.clone();
                let pipeline = self.pipeline.clone();
                let page_timeout = self.config.page_timeout;
                let inspector_timeout = self.config.inspector_timeout;
                let task_url = url.clone();

                let handle = tokio::spawn(async move {
                    Self::visit(fetcher, pipeline, task_url, page_timeout, inspector_timeout).await
                });
                handles.push((url, handle));
            }

            for (url, handle) in handles {
                let visit = match handle.await.map_err(ScanError::from) {
                    Ok(visit) => visit,
                    Err(e) => {
                        warn!("Fetch task for {} failed: {}", url, e);
                        pages.push(CrawlResult::with_error(url, e.to_string()));
                        continue;
                    }
                };
                self.merge(&mut session, &start_host, visit, &mut pages);
            }
        }

        let cap_reached = session.cap_reached();
        let (visited, pending, findings, actionables) = session.into_parts();
        info!(
            "Crawl complete. Visited {} URL(s) in {} round(s), {} finding(s)",
            visited.len(),
            round,
            findings.len()
        );

        Ok(CrawlOutcome {
            start_url: start_url.to_string(),
            visited,
            pending,
            cap,
            cap_reached,
            findings,
            actionables,
            pages,
        })
    }

    fn merge(
        &self,
        session: &mut CrawlSession,
        start_host: &str,
        visit: PageVisit,
        pages: &mut Vec<CrawlResult>,
    ) {
        let PageVisit {
            mut result,
            extraction,
            findings,
        } = visit;

        result.findings_found = session.absorb_findings(findings);

        if let Some(extraction) = extraction {
            for link in extraction.links {
                match classify_link(&link, start_host, &self.config.skip_extensions) {
                    LinkKind::Page(canonical) => {
                        if session.enqueue(canonical.clone()) {
                            debug!("Queued {}", canonical);
                        }
                    }
                    LinkKind::TerminalFile(canonical) => {
                        if session.record_terminal(canonical.clone()) {
                            info!("File link recorded without fetching: {}", canonical);
                        }
                    }
                    LinkKind::OffHost | LinkKind::Invalid => {}
                }
            }
            result.actionables_found = session.absorb_actionables(extraction.actionables);
        }

        pages.push(result);
    }

    async fn visit(
        fetcher: Arc<dyn PageFetcher>,
        pipeline: Arc<InspectorPipeline>,
        url: String,
        page_timeout: Duration,
        inspector_timeout: Duration,
    ) -> PageVisit {
        let start = Instant::now();
        let opened = match tokio::time::timeout(page_timeout, fetcher.open(&url)).await {
            Ok(opened) => opened,
            Err(_) => Err(ScanError::Timeout {
                url: url.clone(),
                elapsed: page_timeout,
            }),
        };

        let snapshot = match opened {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to open {}: {}", url, e);
                return PageVisit {
                    result: CrawlResult::with_error(url, e.to_string()),
                    extraction: None,
                    findings: Vec::new(),
                };
            }
        };

        let mut result = CrawlResult::new(url.clone());
        result.response_time = start.elapsed();
        result.responses_captured = snapshot.responses.len();
        if let Some(document) = snapshot.document() {
            result.status_code = document.status;
            result.content_type = document.content_type().map(str::to_string);
        }

        let findings = pipeline
            .inspect_page(&url, &snapshot.responses, inspector_timeout)
            .await;

        let extraction = extract(&snapshot);
        result.links_found = extraction.links.len();

        PageVisit {
            result,
            extraction: Some(extraction),
            findings,
        }
    }
}
