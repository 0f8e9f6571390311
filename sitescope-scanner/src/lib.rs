pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod inspector;
pub mod normalize;
pub mod result;
pub mod session;

pub use crawler::{CrawlConfig, Crawler, ProgressCallback};
pub use error::ScanError;
pub use fetcher::{HttpFetcher, PageFetcher};
pub use inspector::{Finding, Inspector, InspectorPipeline};
pub use result::{Actionable, CrawlOutcome, CrawlResult, ResponseDescriptor};
pub use session::CrawlSession;
