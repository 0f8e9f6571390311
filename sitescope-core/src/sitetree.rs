//! Hierarchical rendering of the visited URL set.
//!
//! ```text
//! https://x.test/
//! ├─api
//! │  ├─users
//! │  └─orders
//! └─about
//! ```

use url::Url;

/// One path segment and everything below it. Children keep first-insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathNode {
    children: Vec<(String, PathNode)>,
}

impl PathNode {
    pub fn children(&self) -> &[(String, PathNode)] {
        &self.children
    }

    pub fn child(&self, segment: &str) -> Option<&PathNode> {
        self.children
            .iter()
            .find(|(key, _)| key == segment)
            .map(|(_, node)| node)
    }

    fn child_mut_or_insert(&mut self, segment: &str) -> &mut PathNode {
        let idx = match self.children.iter().position(|(key, _)| key == segment) {
            Some(idx) => idx,
            None => {
                self.children.push((segment.to_string(), PathNode::default()));
                self.children.len() - 1
            }
        };
        &mut self.children[idx].1
    }

    fn insert(&mut self, segments: &[String]) {
        let mut cursor = self;
        for segment in segments {
            cursor = cursor.child_mut_or_insert(segment);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteTree {
    pub root_label: String,
    pub root: PathNode,
}

/// Path segments of a URL, with the query string folded into the last one.
pub fn url_segments(url: &Url) -> Vec<String> {
    let mut segments: Vec<String> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        match segments.last_mut() {
            Some(last) => {
                last.push('?');
                last.push_str(query);
            }
            None => segments.push(query.to_string()),
        }
    }
    segments
}

/// Build the tree from visited URLs in discovery order. Returns `None` when
/// there is nothing parseable to show.
pub fn build_tree(visited: &[String]) -> Option<SiteTree> {
    let first = visited.iter().find_map(|u| Url::parse(u).ok())?;
    let root_label = format!("{}/", first.origin().ascii_serialization());

    let mut root = PathNode::default();
    for link in visited {
        let Ok(url) = Url::parse(link) else {
            continue;
        };
        root.insert(&url_segments(&url));
    }

    Some(SiteTree { root_label, root })
}

fn draw(node: &PathNode, prefix: &str, lines: &mut Vec<String>) {
    let count = node.children.len();
    for (idx, (key, child)) in node.children.iter().enumerate() {
        let is_last = idx == count - 1;
        lines.push(format!("{}{}{}", prefix, if is_last { "└─" } else { "├─" }, key));
        let next_prefix = format!("{}{}", prefix, if is_last { "  " } else { "│  " });
        draw(child, &next_prefix, lines);
    }
}

impl SiteTree {
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        draw(&self.root, "", &mut lines);
        format!("{}\n{}", self.root_label, lines.join("\n"))
    }
}

/// Render visited URLs as an ASCII tree; empty input renders as "".
pub fn render_site_tree(visited: &[String]) -> String {
    build_tree(visited)
        .map(|tree| tree.render())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_visited_renders_nothing() {
        assert_eq!(render_site_tree(&[]), "");
    }

    #[test]
    fn test_root_only() {
        assert_eq!(render_site_tree(&urls(&["https://x.test/"])), "https://x.test/\n");
    }

    #[test]
    fn test_query_leaf_diverges_from_plain_segment() {
        let tree = render_site_tree(&urls(&[
            "https://x.test/",
            "https://x.test/a",
            "https://x.test/a?q=1",
        ]));
        assert_eq!(tree, "https://x.test/\n├─a\n└─a?q=1");
    }

    #[test]
    fn test_root_query_becomes_segment() {
        let tree = render_site_tree(&urls(&["https://x.test/?page=2"]));
        assert_eq!(tree, "https://x.test/\n└─page=2");
    }

    #[test]
    fn test_nested_prefixes() {
        let tree = render_site_tree(&urls(&[
            "https://x.test/api/users",
            "https://x.test/about",
            "https://x.test/api/orders/42",
            "https://x.test/api/users/",
        ]));
        let expected = [
            "https://x.test/",
            "├─api",
            "│  ├─users",
            "│  └─orders",
            "│    └─42",
            "└─about",
        ]
        .join("\n");
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_sibling_order_is_insertion_order() {
        let tree = build_tree(&urls(&[
            "https://x.test/zeta",
            "https://x.test/alpha",
            "https://x.test/mid",
        ]))
        .unwrap();
        let keys: Vec<&str> = tree.root.children().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_repeat_visits_reuse_subtrees() {
        let tree = build_tree(&urls(&[
            "https://x.test/a/b",
            "https://x.test/a/b",
            "https://x.test/a/c",
        ]))
        .unwrap();
        let a = tree.root.child("a").unwrap();
        assert_eq!(tree.root.children().len(), 1);
        assert_eq!(a.children().len(), 2);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let visited = urls(&[
            "https://x.test/",
            "https://x.test/b/x",
            "https://x.test/a",
            "https://x.test/b/y?z=1",
        ]);
        let first = render_site_tree(&visited);
        for _ in 0..5 {
            assert_eq!(render_site_tree(&visited), first);
        }
    }

    #[test]
    fn test_root_label_uses_first_url_origin() {
        let tree = render_site_tree(&urls(&["http://x.test:8080/a", "http://x.test:8080/b"]));
        assert!(tree.starts_with("http://x.test:8080/\n"));
    }
}
