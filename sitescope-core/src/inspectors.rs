// Built-in response inspectors

use async_trait::async_trait;
use md5::{Digest, Md5};
use rusqlite::{Connection, params};
use serde_json::Value;
use sitescope_scanner::{Finding, Inspector, InspectorPipeline, ResponseDescriptor};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use url::Url;

pub const TECH_KEYWORDS: &[&str] = &[
    "nginx",
    "apache",
    "iis",
    "tomcat",
    "flask",
    "express",
    "kestrel",
    "gunicorn",
    "uvicorn",
    "php",
    "asp.net",
    "aspnet",
    "django",
    "rails",
    "laravel",
    "spring",
    "node.js",
    "nodejs",
    "cloudflare",
    "fastly",
    "akamai",
    "amazon cloudfront",
    "maxcdn",
    "keycdn",
    "vue",
    "react",
    "angular",
    "ember",
    "backbone",
    "wordpress",
    "drupal",
    "joomla",
    "magento",
    "shopify",
];

/// Matches technology keywords against the headers of HTML responses.
pub struct HeaderKeywordInspector {
    keywords: Vec<String>,
}

impl HeaderKeywordInspector {
    pub fn new() -> Self {
        Self::with_keywords(TECH_KEYWORDS.iter().map(|k| k.to_string()).collect())
    }

    pub fn with_keywords(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Keywords present in any header name or value, in keyword-list order.
    pub fn match_headers<'a>(
        &self,
        headers: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Vec<String> {
        let haystacks: Vec<(String, String)> = headers
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
            .collect();

        self.keywords
            .iter()
            .filter(|keyword| {
                haystacks
                    .iter()
                    .any(|(k, v)| k.contains(keyword.as_str()) || v.contains(keyword.as_str()))
            })
            .cloned()
            .collect()
    }
}

impl Default for HeaderKeywordInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Inspector for HeaderKeywordInspector {
    fn name(&self) -> &str {
        "header_match"
    }

    async fn inspect(&self, response: &ResponseDescriptor) -> anyhow::Result<Option<Finding>> {
        let is_html = response
            .content_type()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);
        if !is_html {
            return Ok(None);
        }

        let stack = self.match_headers(&response.headers);
        if stack.is_empty() {
            return Ok(None);
        }
        debug!("Header keywords on {}: {:?}", response.url, stack);
        Ok(Some(Finding::new(Value::from(stack))))
    }
}

/// A known static file: its path, the MD5 of its content and the
/// technology it identifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub pathname: String,
    pub md5_hash: String,
    pub tech_stack: String,
    pub description: Option<String>,
}

/// Identifies technologies by the exact content hash of well-known files.
pub struct FileHashInspector {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl FileHashInspector {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::InvalidPath(PathBuf::from(format!("{}: {}", parent.display(), e)))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS file_matches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pathname TEXT NOT NULL,
                md5_hash TEXT NOT NULL,
                tech_stack TEXT,
                description TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_file_matches_pathname ON file_matches(pathname);
            ",
        )?;

        info!("Fingerprint database ready at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_fingerprint(&self, fingerprint: &FileFingerprint) -> rusqlite::Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO file_matches (pathname, md5_hash, tech_stack, description)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                fingerprint.pathname,
                fingerprint.md5_hash.to_lowercase(),
                fingerprint.tech_stack,
                fingerprint.description,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn fingerprint_count(&self) -> rusqlite::Result<i64> {
        self.lock()
            .query_row("SELECT COUNT(*) FROM file_matches", [], |row| row.get(0))
    }

    /// `(md5_hash, tech_stack)` rows registered for a path.
    fn candidates(&self, pathname: &str) -> rusqlite::Result<Vec<(String, Option<String>)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT md5_hash, tech_stack FROM file_matches WHERE pathname = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([pathname], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // a poisoned lock only means another inspection panicked mid-query
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn md5_hex(body: &[u8]) -> String {
    format!("{:x}", Md5::digest(body))
}

#[async_trait]
impl Inspector for FileHashInspector {
    fn name(&self) -> &str {
        "file_match"
    }

    async fn inspect(&self, response: &ResponseDescriptor) -> anyhow::Result<Option<Finding>> {
        let pathname = Url::parse(&response.url)?.path().to_string();
        let candidates = self.candidates(&pathname)?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let actual = md5_hex(response.body());
        debug!(
            "{} candidate fingerprint(s) for {}, body md5 {}",
            candidates.len(),
            pathname,
            actual
        );

        let matched = candidates
            .into_iter()
            .find(|(expected, _)| expected.eq_ignore_ascii_case(&actual))
            .and_then(|(_, tech)| tech);

        if let Some(ref tech) = matched {
            info!("Fingerprint match on {}: {}", response.url, tech);
        }
        Ok(matched.map(Finding::text))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InspectorConfig {
    /// Location of the file fingerprint database; `None` disables the
    /// file-hash inspector.
    pub fingerprint_db: Option<PathBuf>,
}

/// Register the built-in inspectors. Fails when the fingerprint database
/// cannot be opened.
pub fn default_pipeline(config: &InspectorConfig) -> rusqlite::Result<InspectorPipeline> {
    let mut pipeline = InspectorPipeline::new();
    pipeline.register(Arc::new(HeaderKeywordInspector::new()));
    if let Some(ref db_path) = config.fingerprint_db {
        pipeline.register(Arc::new(FileHashInspector::open(db_path)?));
    }
    Ok(pipeline)
}
