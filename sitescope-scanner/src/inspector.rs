//! Response inspectors and the pipeline that runs them.
//!
//! Inspectors are registered explicitly on an [`InspectorPipeline`]. For every
//! captured response each inspector is invoked independently; a failing or
//! panicking inspector is logged and counts as "no finding".

use crate::result::ResponseDescriptor;
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Opaque technology finding returned by an inspector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Finding(Value);

impl Finding {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn text(tag: impl Into<String>) -> Self {
        Self(Value::String(tag.into()))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Serialized form with object keys sorted, so structurally equal
    /// findings share one key regardless of field order.
    pub fn dedup_key(&self) -> String {
        let mut out = String::new();
        write_canonical(&self.0, &mut out);
        out
    }

    /// Split an array finding into one finding per element. Other values
    /// come back unchanged. Only one level is unwrapped.
    pub fn flatten(self) -> Vec<Finding> {
        match self.0 {
            Value::Array(items) => items.into_iter().map(Finding).collect(),
            other => vec![Finding(other)],
        }
    }

    /// Technology tags carried by this finding: a string is one tag, an
    /// array contributes each of its string elements.
    pub fn tags(&self) -> Vec<String> {
        match &self.0 {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// A pluggable classifier invoked once per captured response.
///
/// Implementations may keep their own lookup state but must not touch crawl
/// state, and must not rely on running before or after any other inspector.
#[async_trait]
pub trait Inspector: Send + Sync {
    fn name(&self) -> &str;

    async fn inspect(&self, response: &ResponseDescriptor) -> anyhow::Result<Option<Finding>>;
}

#[derive(Clone, Default)]
pub struct InspectorPipeline {
    inspectors: Vec<Arc<dyn Inspector>>,
}

impl InspectorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn Inspector>) -> Self {
        self.register(inspector);
        self
    }

    pub fn register(&mut self, inspector: Arc<dyn Inspector>) {
        debug!("Registered inspector {}", inspector.name());
        self.inspectors.push(inspector);
    }

    pub fn len(&self) -> usize {
        self.inspectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inspectors.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.inspectors.iter().map(|i| i.name().to_string()).collect()
    }

    /// Run every inspector against one response.
    pub async fn inspect(&self, response: &ResponseDescriptor) -> Vec<Finding> {
        let runs = self.inspectors.iter().map(|inspector| {
            let inspector = inspector.clone();
            async move {
                let outcome = AssertUnwindSafe(inspector.inspect(response))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(Some(finding))) if !finding.is_null() => Some(finding),
                    Ok(Ok(_)) => None,
                    Ok(Err(e)) => {
                        error!(
                            "Inspector {} failed on {}: {:#}",
                            inspector.name(),
                            response.url,
                            e
                        );
                        None
                    }
                    Err(_) => {
                        error!("Inspector {} panicked on {}", inspector.name(), response.url);
                        None
                    }
                }
            }
        });

        join_all(runs).await.into_iter().flatten().collect()
    }

    /// Inspect every response of a page within a shared time budget.
    /// Findings from responses that finished before the deadline are kept.
    pub async fn inspect_page(
        &self,
        page_url: &str,
        responses: &[ResponseDescriptor],
        budget: Duration,
    ) -> Vec<Finding> {
        if self.is_empty() || responses.is_empty() {
            return Vec::new();
        }

        let deadline = Instant::now() + budget;
        let mut pending: FuturesUnordered<_> =
            responses.iter().map(|response| self.inspect(response)).collect();

        let mut findings = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some(batch)) => findings.extend(batch),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Inspectors for {} exceeded {:?}; {} response(s) left uninspected",
                        page_url,
                        budget,
                        pending.len()
                    );
                    break;
                }
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Fixed(&'static str, Option<Value>);

    #[async_trait]
    impl Inspector for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn inspect(&self, _response: &ResponseDescriptor) -> anyhow::Result<Option<Finding>> {
            Ok(self.1.clone().map(Finding::new))
        }
    }

    struct Failing;

    #[async_trait]
    impl Inspector for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn inspect(&self, _response: &ResponseDescriptor) -> anyhow::Result<Option<Finding>> {
            anyhow::bail!("lookup table missing")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Inspector for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn inspect(&self, _response: &ResponseDescriptor) -> anyhow::Result<Option<Finding>> {
            panic!("inspector bug")
        }
    }

    struct Slow;

    #[async_trait]
    impl Inspector for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn inspect(&self, response: &ResponseDescriptor) -> anyhow::Result<Option<Finding>> {
            if response.url.ends_with("slow.js") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(Some(Finding::text(response.url.clone())))
        }
    }

    fn response(url: &str) -> ResponseDescriptor {
        ResponseDescriptor::new(url.to_string(), 200, BTreeMap::new(), Vec::new())
    }

    #[test]
    fn test_dedup_key_ignores_field_order() {
        let a = Finding::new(json!({"name": "nginx", "meta": {"b": 1, "a": 2}}));
        let b = Finding::new(json!({"meta": {"a": 2, "b": 1}, "name": "nginx"}));
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), Finding::text("nginx").dedup_key());
    }

    #[test]
    fn test_tags_from_string_and_array() {
        assert_eq!(Finding::text("WordPress").tags(), vec!["WordPress"]);
        assert_eq!(
            Finding::new(json!(["nginx", 3, "php"])).tags(),
            vec!["nginx", "php"]
        );
        assert!(Finding::new(json!({"x": 1})).tags().is_empty());
    }

    #[test]
    fn test_flatten_unwraps_one_level() {
        assert_eq!(
            Finding::new(json!(["nginx", ["php"], {"k": 1}])).flatten(),
            vec![
                Finding::text("nginx"),
                Finding::new(json!(["php"])),
                Finding::new(json!({"k": 1})),
            ]
        );
        assert_eq!(Finding::text("vue").flatten(), vec![Finding::text("vue")]);
    }

    #[tokio::test]
    async fn test_pipeline_collects_non_null_findings() {
        let pipeline = InspectorPipeline::new()
            .with_inspector(Arc::new(Fixed("a", Some(json!("nginx")))))
            .with_inspector(Arc::new(Fixed("b", None)))
            .with_inspector(Arc::new(Fixed("c", Some(Value::Null))));

        let findings = pipeline.inspect(&response("https://x.test/")).await;
        assert_eq!(findings, vec![Finding::text("nginx")]);
    }

    #[tokio::test]
    async fn test_failing_inspectors_are_isolated() {
        let pipeline = InspectorPipeline::new()
            .with_inspector(Arc::new(Failing))
            .with_inspector(Arc::new(Panicking))
            .with_inspector(Arc::new(Fixed("ok", Some(json!(["php"])))));

        let findings = pipeline.inspect(&response("https://x.test/")).await;
        assert_eq!(findings, vec![Finding::new(json!(["php"]))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspect_page_keeps_partial_results_on_timeout() {
        let pipeline = InspectorPipeline::new().with_inspector(Arc::new(Slow));
        let responses = vec![
            response("https://x.test/"),
            response("https://x.test/slow.js"),
            response("https://x.test/app.css"),
        ];

        let findings = pipeline
            .inspect_page("https://x.test/", &responses, Duration::from_secs(5))
            .await;

        assert_eq!(findings.len(), 2);
        assert!(!findings.contains(&Finding::text("https://x.test/slow.js")));
    }

    #[tokio::test]
    async fn test_empty_pipeline_returns_nothing() {
        let pipeline = InspectorPipeline::new();
        let findings = pipeline
            .inspect_page("https://x.test/", &[response("https://x.test/")], Duration::from_secs(1))
            .await;
        assert!(findings.is_empty());
    }
}
