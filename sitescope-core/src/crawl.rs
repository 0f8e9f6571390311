use crate::inspectors::{InspectorConfig, default_pipeline};
use crate::probe::{ProbeConfig, tags_from_findings};
use crate::report::Report;
use crate::sitetree::render_site_tree;
use indicatif::{ProgressBar, ProgressStyle};
use sitescope_scanner::{
    CrawlConfig, Crawler, HttpFetcher, InspectorPipeline, PageFetcher, ScanError,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Most subresources captured per page for inspection.
const MAX_SUBRESOURCES: usize = 32;

/// Options for configuring a crawl operation
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    pub url: String,
    pub crawl: CrawlConfig,
    pub inspectors: InspectorConfig,
    /// Run the PoC probe phase after crawling.
    pub probe: Option<ProbeConfig>,
    pub show_progress_bars: bool,
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Failed to load fingerprint database: {0}")]
    FingerprintDb(#[from] rusqlite::Error),
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("Starting crawl...");
    pb
}

/// Execute a crawl with the given options using the HTTP fetcher and the
/// built-in inspectors.
pub async fn execute_crawl(
    options: CrawlOptions,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<Report, CrawlError> {
    let fetcher = HttpFetcher::with_options(
        options.crawl.page_timeout,
        options.crawl.concurrency,
        MAX_SUBRESOURCES,
    )?;
    let pipeline = default_pipeline(&options.inspectors)?;
    info!("Registered inspectors: {}", pipeline.names().join(", "));

    execute_crawl_with(Arc::new(fetcher), pipeline, options, progress_callback).await
}

/// Execute a crawl with caller-supplied collaborators.
pub async fn execute_crawl_with(
    fetcher: Arc<dyn PageFetcher>,
    pipeline: InspectorPipeline,
    options: CrawlOptions,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<Report, CrawlError> {
    let CrawlOptions {
        url,
        crawl,
        probe,
        show_progress_bars,
        ..
    } = options;

    let progress_bar = show_progress_bars.then(|| Arc::new(spinner()));

    let internal_progress: sitescope_scanner::ProgressCallback = {
        let pb = progress_bar.clone();
        let cb = progress_callback.clone();
        Arc::new(move |visited: usize, cap: usize, url: String| {
            if let Some(ref pb) = pb {
                pb.set_message(format!("Crawling [{}/{}] {}", visited + 1, cap, url));
                pb.tick();
            }
            if let Some(ref cb) = cb {
                cb(format!("Visiting {}", url));
            }
        })
    };

    let crawler = Crawler::new(fetcher, pipeline)
        .with_config(crawl)
        .with_progress_callback(internal_progress);

    let outcome = match crawler.crawl(&url).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(ref pb) = progress_bar {
                pb.finish_and_clear();
            }
            return Err(e.into());
        }
    };

    if let Some(ref pb) = progress_bar {
        pb.finish_with_message(format!(
            "Crawl complete: {} URL(s) visited, {} finding(s)",
            outcome.visited.len(),
            outcome.findings.len()
        ));
    }

    let site_tree = render_site_tree(&outcome.visited);

    let probe_summary = match probe {
        Some(config) => {
            let tags = tags_from_findings(&outcome.findings);
            if let Some(ref cb) = progress_callback {
                cb(format!("Probing {} technology tag(s)", tags.len()));
            }
            Some(config.orchestrator().run(&tags, &url).await)
        }
        None => None,
    };

    Ok(Report::assemble(outcome, site_tree, probe_summary))
}
