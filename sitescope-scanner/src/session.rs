//! Crawl state: the visited set, the frontier and the aggregate lists.
//!
//! A `CrawlSession` is owned by the scheduler and only mutated between
//! rounds, so every collection has a single writer.

use crate::inspector::Finding;
use crate::result::Actionable;
use std::collections::{HashSet, VecDeque};

#[derive(Debug)]
pub struct CrawlSession {
    cap: usize,
    visited: Vec<String>,
    visited_index: HashSet<String>,
    frontier: VecDeque<String>,
    queued: HashSet<String>,
    findings: Vec<Finding>,
    finding_keys: HashSet<String>,
    actionables: Vec<Actionable>,
    actionable_keys: HashSet<String>,
}

impl CrawlSession {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            visited: Vec::new(),
            visited_index: HashSet::new(),
            frontier: VecDeque::new(),
            queued: HashSet::new(),
            findings: Vec::new(),
            finding_keys: HashSet::new(),
            actionables: Vec::new(),
            actionable_keys: HashSet::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// URLs either visited or waiting in the frontier.
    pub fn accepted(&self) -> usize {
        self.visited.len() + self.frontier.len()
    }

    pub fn cap_reached(&self) -> bool {
        self.accepted() >= self.cap
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn pending(&self) -> usize {
        self.frontier.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.frontier.is_empty()
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited_index.contains(url)
    }

    pub fn is_queued(&self, url: &str) -> bool {
        self.queued.contains(url)
    }

    pub fn visited(&self) -> &[String] {
        &self.visited
    }

    fn admissible(&self, url: &str) -> bool {
        !self.is_visited(url) && !self.is_queued(url) && !self.cap_reached()
    }

    /// Admit a canonical URL into the frontier. Returns false when it was
    /// already seen or the cap leaves no room.
    pub fn enqueue(&mut self, url: String) -> bool {
        if !self.admissible(&url) {
            return false;
        }
        self.queued.insert(url.clone());
        self.frontier.push_back(url);
        true
    }

    /// Record a file link as visited without ever fetching it.
    pub fn record_terminal(&mut self, url: String) -> bool {
        if !self.admissible(&url) {
            return false;
        }
        self.visited_index.insert(url.clone());
        self.visited.push(url);
        true
    }

    /// Remove up to `n` URLs from the frontier and claim them as visited
    /// before they are fetched.
    pub fn next_batch(&mut self, n: usize) -> Vec<String> {
        let room = self.cap.saturating_sub(self.visited.len());
        let take = n.min(room).min(self.frontier.len());

        let mut batch = Vec::with_capacity(take);
        for _ in 0..take {
            let Some(url) = self.frontier.pop_front() else {
                break;
            };
            self.queued.remove(&url);
            self.visited_index.insert(url.clone());
            self.visited.push(url.clone());
            batch.push(url);
        }
        batch
    }

    /// Fold findings into the technology list. Array findings contribute
    /// their elements, and structural duplicates are skipped. Returns how
    /// many entries were new.
    pub fn absorb_findings(&mut self, findings: Vec<Finding>) -> usize {
        let mut added = 0;
        for finding in findings.into_iter().flat_map(Finding::flatten) {
            if self.finding_keys.insert(finding.dedup_key()) {
                self.findings.push(finding);
                added += 1;
            }
        }
        added
    }

    pub fn absorb_actionables(&mut self, actionables: Vec<Actionable>) -> usize {
        let mut added = 0;
        for actionable in actionables {
            if self.actionable_keys.insert(actionable.dedup_key()) {
                self.actionables.push(actionable);
                added += 1;
            }
        }
        added
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn actionables(&self) -> &[Actionable] {
        &self.actionables
    }

    pub fn into_parts(self) -> (Vec<String>, usize, Vec<Finding>, Vec<Actionable>) {
        let pending = self.frontier.len();
        (self.visited, pending, self.findings, self.actionables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_disjoint(session: &CrawlSession) {
        for url in &session.frontier {
            assert!(!session.is_visited(url), "{} is both visited and queued", url);
        }
    }

    #[test]
    fn test_enqueue_dedups() {
        let mut session = CrawlSession::new(10);
        assert!(session.enqueue("https://x.test/".into()));
        assert!(!session.enqueue("https://x.test/".into()));
        assert_eq!(session.pending(), 1);
    }

    #[test]
    fn test_enqueue_rejects_visited() {
        let mut session = CrawlSession::new(10);
        session.enqueue("https://x.test/a".into());
        let batch = session.next_batch(5);
        assert_eq!(batch, vec!["https://x.test/a".to_string()]);
        assert!(!session.enqueue("https://x.test/a".into()));
        assert_disjoint(&session);
    }

    #[test]
    fn test_cap_counts_queued_urls() {
        let mut session = CrawlSession::new(2);
        assert!(session.enqueue("https://x.test/1".into()));
        assert!(session.enqueue("https://x.test/2".into()));
        assert!(!session.enqueue("https://x.test/3".into()));
        assert!(session.cap_reached());

        let batch = session.next_batch(10);
        assert_eq!(batch.len(), 2);
        assert!(!session.enqueue("https://x.test/4".into()));
        assert_eq!(session.visited_count(), 2);
    }

    #[test]
    fn test_terminal_links_consume_cap() {
        let mut session = CrawlSession::new(2);
        assert!(session.record_terminal("https://x.test/a.pdf".into()));
        assert!(session.enqueue("https://x.test/b".into()));
        assert!(!session.record_terminal("https://x.test/c.zip".into()));
        assert!(session.is_visited("https://x.test/a.pdf"));
        assert!(!session.is_queued("https://x.test/a.pdf"));
    }

    #[test]
    fn test_next_batch_claims_before_fetch() {
        let mut session = CrawlSession::new(100);
        for i in 0..5 {
            session.enqueue(format!("https://x.test/{}", i));
        }
        let first = session.next_batch(3);
        assert_eq!(first.len(), 3);
        assert_eq!(session.visited_count(), 3);
        assert_eq!(session.pending(), 2);
        assert_disjoint(&session);

        let second = session.next_batch(3);
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|u| !second.contains(u)));
        assert!(!session.has_pending());
    }

    #[test]
    fn test_visited_keeps_discovery_order() {
        let mut session = CrawlSession::new(10);
        session.enqueue("https://x.test/".into());
        session.next_batch(1);
        session.record_terminal("https://x.test/z.pdf".into());
        session.enqueue("https://x.test/b".into());
        session.next_batch(1);
        assert_eq!(
            session.visited(),
            &[
                "https://x.test/".to_string(),
                "https://x.test/z.pdf".to_string(),
                "https://x.test/b".to_string(),
            ]
        );
    }

    #[test]
    fn test_absorb_findings_dedups_structurally() {
        let mut session = CrawlSession::new(10);
        let added = session.absorb_findings(vec![
            Finding::new(json!("WordPress 6.1")),
            Finding::new(json!({"tech": "vue", "version": "3"})),
            Finding::new(json!({"version": "3", "tech": "vue"})),
            Finding::new(json!("WordPress 6.1")),
        ]);
        assert_eq!(added, 2);
        assert_eq!(session.findings().len(), 2);
    }

    #[test]
    fn test_array_findings_fold_into_tag_list() {
        let mut session = CrawlSession::new(10);
        session.absorb_findings(vec![Finding::new(json!(["nginx", "php"]))]);
        session.absorb_findings(vec![Finding::new(json!(["nginx"])), Finding::text("nginx")]);
        assert_eq!(session.findings(), &[Finding::text("nginx"), Finding::text("php")]);
    }

    #[test]
    fn test_absorb_actionables_keeps_method_variants() {
        let mut session = CrawlSession::new(10);
        let post = Actionable {
            url: "https://x.test/login".into(),
            method: "post".into(),
            data: Some("user=&pass=".into()),
        };
        let put = Actionable {
            method: "put".into(),
            ..post.clone()
        };
        let added = session.absorb_actionables(vec![
            Actionable::get("https://x.test/search?q=1"),
            post.clone(),
            put,
            Actionable::get("https://x.test/search?q=1"),
            post,
        ]);
        assert_eq!(added, 3);
    }
}
