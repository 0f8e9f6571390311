//! External vulnerability probing.
//!
//! Every technology tag found during the crawl is handed to an external PoC
//! scanner. Its output is scanned line by line for success markers, and each
//! PoC identifier is reported at most once per run no matter how many tags
//! triggered it.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sitescope_scanner::Finding;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

const SUCCESS_MARKER: &str = "执行成功";
const VULNERABLE_MARKER: &str = "目标可能存在漏洞";

static POC_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"POC\s+(\S+)").unwrap());

pub const DEFAULT_PROBE_BIN: &str = "./go-poc/go-poc";

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub binary: PathBuf,
    pub timeout: Duration,
    /// Keep raw stdout/stderr for every tag.
    pub detail: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_PROBE_BIN),
            timeout: DEFAULT_PROBE_TIMEOUT,
            detail: false,
        }
    }
}

impl ProbeConfig {
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_detail(mut self, detail: bool) -> Self {
        self.detail = detail;
        self
    }

    pub fn orchestrator(&self) -> ProbeOrchestrator {
        let runner = CommandProbeRunner::new(self.binary.clone()).with_timeout(self.timeout);
        ProbeOrchestrator::new(Arc::new(runner)).with_detail(self.detail)
    }
}

/// Captured output of one probe invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_info: String,
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to launch probe {}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Probe for '{keyword}' timed out after {after:?}")]
    Timeout { keyword: String, after: Duration },

    #[error("Probe for '{keyword}' exited with {}", .output.exit_info)]
    NonZeroExit { keyword: String, output: ProbeOutput },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the external scanner for one technology tag against one target.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(&self, keyword: &str, target: &str) -> Result<ProbeOutput, ProbeError>;
}

/// Spawns `<bin> search --keyword <tag> --target <url> --all` from the
/// binary's own directory.
pub struct CommandProbeRunner {
    binary: PathBuf,
    timeout: Duration,
}

impl CommandProbeRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl ProbeRunner for CommandProbeRunner {
    async fn run(&self, keyword: &str, target: &str) -> Result<ProbeOutput, ProbeError> {
        let binary = std::path::absolute(&self.binary)?;
        let workdir = binary
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        debug!("Running {} for keyword '{}'", binary.display(), keyword);

        let child = Command::new(&binary)
            .args(["search", "--keyword", keyword, "--target", target, "--all"])
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                binary: binary.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout {
                keyword: keyword.to_string(),
                after: self.timeout,
            })??;

        let captured = ProbeOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_info: output.status.to_string(),
        };

        if !output.status.success() {
            return Err(ProbeError::NonZeroExit {
                keyword: keyword.to_string(),
                output: captured,
            });
        }
        Ok(captured)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocResult {
    pub keyword: String,
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PocDetail {
    pub keyword: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_info: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    /// Tags that produced at least one new finding, in probing order.
    pub results: Vec<PocResult>,
    /// Raw output per tag; only populated in verbose mode.
    pub detail: Option<Vec<PocDetail>>,
    pub total_unique: usize,
}

/// PoC identifiers from success lines, in output order.
pub fn parse_success_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.contains(SUCCESS_MARKER) && line.contains(VULNERABLE_MARKER))
        .filter_map(|line| {
            POC_ID_RE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// One confirmed PoC hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFinding {
    pub tech_tag: String,
    pub finding_text: String,
}

impl ProbeFinding {
    pub fn new(tech_tag: &str, poc_id: &str) -> Self {
        Self {
            tech_tag: tech_tag.to_string(),
            finding_text: format!("POC {} succeeded, target may be vulnerable", poc_id),
        }
    }
}

/// Group hits into one result per tag, keeping first-hit tag order.
pub fn group_by_tag(hits: Vec<ProbeFinding>) -> Vec<PocResult> {
    let mut results: Vec<PocResult> = Vec::new();
    for hit in hits {
        match results.iter_mut().find(|r| r.keyword == hit.tech_tag) {
            Some(result) => result.findings.push(hit.finding_text),
            None => results.push(PocResult {
                keyword: hit.tech_tag,
                findings: vec![hit.finding_text],
            }),
        }
    }
    results
}

/// Probe tags from crawl findings, deduplicated in first-seen order.
pub fn tags_from_findings(findings: &[Finding]) -> Vec<String> {
    let mut seen = HashSet::new();
    findings
        .iter()
        .flat_map(Finding::tags)
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

pub struct ProbeOrchestrator {
    runner: Arc<dyn ProbeRunner>,
    verbose: bool,
}

impl ProbeOrchestrator {
    pub fn new(runner: Arc<dyn ProbeRunner>) -> Self {
        Self {
            runner,
            verbose: false,
        }
    }

    pub fn with_detail(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Probe every tag in turn. Failed invocations are logged and skipped.
    pub async fn run(&self, tags: &[String], target: &str) -> ProbeSummary {
        let mut summary = ProbeSummary {
            detail: self.verbose.then(Vec::new),
            ..Default::default()
        };

        if tags.is_empty() {
            warn!("No technology tags found, skipping PoC probing");
            return summary;
        }

        info!("Probing {} technology tag(s) against {}", tags.len(), target);
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut hits: Vec<ProbeFinding> = Vec::new();

        for tag in tags {
            let output = match self.runner.run(tag, target).await {
                Ok(output) => output,
                Err(ProbeError::NonZeroExit { keyword, output }) => {
                    warn!("Probe for '{}' exited with {}", keyword, output.exit_info);
                    self.keep_detail(&mut summary, tag, output);
                    continue;
                }
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            };

            let before = hits.len();
            hits.extend(
                parse_success_lines(&output.stdout)
                    .into_iter()
                    .filter(|id| seen_ids.insert(id.clone()))
                    .map(|poc_id| ProbeFinding::new(tag, &poc_id)),
            );
            if hits.len() > before {
                info!("{} new PoC hit(s) for '{}'", hits.len() - before, tag);
            }
            self.keep_detail(&mut summary, tag, output);
        }

        summary.total_unique = seen_ids.len();
        summary.results = group_by_tag(hits);
        summary
    }

    fn keep_detail(&self, summary: &mut ProbeSummary, tag: &str, output: ProbeOutput) {
        if let Some(detail) = summary.detail.as_mut() {
            detail.push(PocDetail {
                keyword: tag.to_string(),
                stdout: output.stdout,
                stderr: output.stderr,
                exit_info: output.exit_info,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const HIT_A: &str = "[+] POC CVE-2021-1234 执行成功 目标可能存在漏洞";
    const HIT_B: &str = "[+] POC nginx-leak 执行成功 目标可能存在漏洞";

    enum Scripted {
        Ok(String),
        Exit(String),
        Timeout,
    }

    struct FakeRunner {
        script: HashMap<String, Scripted>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(script: Vec<(&str, Scripted)>) -> Self {
            Self {
                script: script
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProbeRunner for FakeRunner {
        async fn run(&self, keyword: &str, _target: &str) -> Result<ProbeOutput, ProbeError> {
            self.calls.lock().unwrap().push(keyword.to_string());
            match self.script.get(keyword) {
                Some(Scripted::Ok(stdout)) => Ok(ProbeOutput {
                    stdout: stdout.clone(),
                    stderr: String::new(),
                    exit_info: "exit status: 0".into(),
                }),
                Some(Scripted::Exit(stdout)) => Err(ProbeError::NonZeroExit {
                    keyword: keyword.to_string(),
                    output: ProbeOutput {
                        stdout: stdout.clone(),
                        stderr: "boom".into(),
                        exit_info: "exit status: 2".into(),
                    },
                }),
                Some(Scripted::Timeout) | None => Err(ProbeError::Timeout {
                    keyword: keyword.to_string(),
                    after: Duration::from_secs(60),
                }),
            }
        }
    }

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_requires_both_markers() {
        let stdout = format!(
            "{}\n[-] POC other 执行成功\n[-] POC third 目标可能存在漏洞\n{}",
            HIT_A, HIT_B
        );
        assert_eq!(parse_success_lines(&stdout), vec!["CVE-2021-1234", "nginx-leak"]);
    }

    #[test]
    fn test_parse_skips_marked_line_without_id() {
        assert!(parse_success_lines("执行成功 目标可能存在漏洞").is_empty());
    }

    #[test]
    fn test_tags_from_findings_flattens_and_dedups() {
        let findings = vec![
            Finding::new(json!(["nginx", "php"])),
            Finding::text("wordpress"),
            Finding::new(json!(["php", 3, "react"])),
            Finding::new(json!({"name": "ignored"})),
        ];
        assert_eq!(
            tags_from_findings(&findings),
            tags(&["nginx", "php", "wordpress", "react"])
        );
    }

    #[test]
    fn test_group_by_tag_keeps_tag_order() {
        let results = group_by_tag(vec![
            ProbeFinding::new("php", "CVE-1"),
            ProbeFinding::new("nginx", "CVE-2"),
            ProbeFinding::new("php", "CVE-3"),
        ]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].keyword, "php");
        assert_eq!(
            results[0].findings,
            vec![
                "POC CVE-1 succeeded, target may be vulnerable",
                "POC CVE-3 succeeded, target may be vulnerable",
            ]
        );
        assert_eq!(results[1].keyword, "nginx");
    }

    #[tokio::test]
    async fn test_ids_deduplicated_across_tags() {
        let runner = Arc::new(FakeRunner::new(vec![
            ("nginx", Scripted::Ok(format!("{}\n{}", HIT_A, HIT_A))),
            ("php", Scripted::Ok(format!("{}\n{}", HIT_A, HIT_B))),
            ("react", Scripted::Ok(HIT_B.to_string())),
        ]));
        let summary = ProbeOrchestrator::new(runner)
            .run(&tags(&["nginx", "php", "react"]), "https://x.test/")
            .await;

        assert_eq!(summary.total_unique, 2);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[0].keyword, "nginx");
        assert_eq!(
            summary.results[0].findings,
            vec!["POC CVE-2021-1234 succeeded, target may be vulnerable"]
        );
        assert_eq!(summary.results[1].keyword, "php");
        assert_eq!(
            summary.results[1].findings,
            vec!["POC nginx-leak succeeded, target may be vulnerable"]
        );
        assert!(summary.detail.is_none());
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let runner = Arc::new(FakeRunner::new(vec![
            ("slow", Scripted::Timeout),
            ("broken", Scripted::Exit(HIT_A.to_string())),
            ("php", Scripted::Ok(HIT_A.to_string())),
        ]));
        let summary = ProbeOrchestrator::new(runner.clone())
            .run(&tags(&["slow", "broken", "php"]), "https://x.test/")
            .await;

        assert_eq!(*runner.calls.lock().unwrap(), tags(&["slow", "broken", "php"]));
        // non-zero exit output is not scanned, so php still gets the hit
        assert_eq!(summary.results.len(), 1);
        assert_eq!(summary.results[0].keyword, "php");
        assert_eq!(summary.total_unique, 1);
    }

    #[tokio::test]
    async fn test_detail_keeps_raw_output() {
        let runner = Arc::new(FakeRunner::new(vec![
            ("broken", Scripted::Exit("partial".to_string())),
            ("php", Scripted::Ok("nothing found".to_string())),
            ("slow", Scripted::Timeout),
        ]));
        let summary = ProbeOrchestrator::new(runner)
            .with_detail(true)
            .run(&tags(&["broken", "php", "slow"]), "https://x.test/")
            .await;

        let detail = summary.detail.unwrap();
        assert_eq!(detail.len(), 2);
        assert_eq!(detail[0].keyword, "broken");
        assert_eq!(detail[0].stdout, "partial");
        assert_eq!(detail[0].stderr, "boom");
        assert_eq!(detail[0].exit_info, "exit status: 2");
        assert_eq!(detail[1].keyword, "php");
        assert!(summary.results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_tags_skip_probing() {
        let runner = Arc::new(FakeRunner::new(vec![]));
        let summary = ProbeOrchestrator::new(runner.clone())
            .run(&[], "https://x.test/")
            .await;
        assert_eq!(summary, ProbeSummary::default());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runner = CommandProbeRunner::new("/nonexistent/sitescope-probe-bin")
            .with_timeout(Duration::from_secs(5));
        let err = runner.run("nginx", "https://x.test/").await.unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }
}
