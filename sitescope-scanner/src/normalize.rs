//! Link canonicalization and admission rules.
//!
//! The canonical form of a URL is its origin followed by its path. Query
//! strings and fragments are dropped, so `https://x.test/a?page=2` and
//! `https://x.test/a#top` are the same page for visitation purposes.

use tracing::debug;
use url::Url;

/// Path suffixes that mark a link as a downloadable file rather than a page.
pub const DEFAULT_SKIP_EXTENSIONS: &[&str] = &[
    ".zip", ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".mp3", ".mp4", ".doc", ".docx", ".xls",
    ".xlsx", ".ppt", ".pptx", ".exe", ".msi", ".rar", ".tar", ".gz", ".svg", ".webp", ".avi",
    ".mov", ".wmv", ".csv", ".txt", ".7z", ".tar.gz", ".tar.bz2", ".tar.xz", ".iso", ".apk",
    ".dmg", ".pkg", ".deb", ".rpm", ".bin", ".sh",
];

pub fn default_skip_extensions() -> Vec<String> {
    DEFAULT_SKIP_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

/// Normalize a user-supplied extension to the lower-cased, dot-prefixed form.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// Origin + path, query and fragment stripped.
pub fn canonicalize(url: &Url) -> String {
    format!("{}{}", url.origin().ascii_serialization(), url.path())
}

pub fn canonicalize_str(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !parsed.origin().is_tuple() {
        return None;
    }
    Some(canonicalize(&parsed))
}

/// Case-insensitive suffix match of a URL path against the extension list.
pub fn is_terminal_path(path: &str, extensions: &[String]) -> bool {
    let path = path.to_lowercase();
    extensions.iter().any(|ext| path.ends_with(ext.as_str()))
}

/// How a discovered link should be treated by the frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// Same-host page to fetch, carrying its canonical URL.
    Page(String),
    /// Same-host file link, recorded as visited without a fetch.
    TerminalFile(String),
    /// Host differs from the crawl's start host.
    OffHost,
    /// Malformed or host-less link.
    Invalid,
}

pub fn classify_link(link: &str, start_host: &str, extensions: &[String]) -> LinkKind {
    let Ok(parsed) = Url::parse(link) else {
        return LinkKind::Invalid;
    };
    if !parsed.origin().is_tuple() {
        return LinkKind::Invalid;
    }

    match parsed.host_str() {
        Some(host) if host == start_host => {}
        Some(_) => return LinkKind::OffHost,
        None => return LinkKind::Invalid,
    }

    let canonical = canonicalize(&parsed);
    if is_terminal_path(parsed.path(), extensions) {
        debug!("Terminal file link: {}", canonical);
        LinkKind::TerminalFile(canonical)
    } else {
        LinkKind::Page(canonical)
    }
}
