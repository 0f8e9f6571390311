// Report generation from a finished crawl

use crate::probe::{PocDetail, PocResult, ProbeSummary};
use serde::Serialize;
use serde_json::Value;
use sitescope_scanner::{Actionable, CrawlOutcome, Finding};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DIVIDER: &str =
    "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write report to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlStats {
    pub visited: usize,
    pub pending: usize,
    pub cap: usize,
    pub cap_reached: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(skip)]
    pub target: String,
    pub stats: CrawlStats,
    pub tech_stack: Vec<Finding>,
    pub visited_links: Vec<String>,
    pub site_tree: String,
    pub actionables: Vec<Actionable>,
    pub poc_results: Vec<PocResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poc_detail: Option<Vec<PocDetail>>,
    /// Unique PoC identifiers; `None` when probing did not run.
    #[serde(skip)]
    pub poc_total: Option<usize>,
}

impl Report {
    pub fn assemble(outcome: CrawlOutcome, site_tree: String, probe: Option<ProbeSummary>) -> Self {
        let stats = CrawlStats {
            visited: outcome.visited.len(),
            pending: outcome.pending,
            cap: outcome.cap,
            cap_reached: outcome.cap_reached,
        };

        let (poc_results, poc_detail, poc_total) = match probe {
            Some(summary) => (summary.results, summary.detail, Some(summary.total_unique)),
            None => (Vec::new(), None, None),
        };

        Self {
            target: outcome.start_url,
            stats,
            tech_stack: outcome.findings,
            visited_links: outcome.visited,
            site_tree,
            actionables: outcome.actionables,
            poc_results,
            poc_detail,
            poc_total,
        }
    }
}

/// Console sections shown on top of the always-present header and tech stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummarySections {
    pub tree: bool,
    pub queries: bool,
    pub links: bool,
}

pub fn generate_json_report(report: &Report) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn generate_text_report(report: &Report, sections: SummarySections) -> String {
    let mut out = String::new();

    out.push_str(DIVIDER);
    out.push_str("                          SITESCOPE CRAWL SUMMARY\n");
    out.push_str(DIVIDER);
    out.push('\n');

    out.push_str(&format!("Target:       {}\n", report.target));
    out.push_str(&format!(
        "Scan Date:    {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "Visited:      {} / {}{}\n",
        report.stats.visited,
        report.stats.cap,
        if report.stats.cap_reached { " (cap reached)" } else { "" }
    ));
    out.push_str(&format!("Pending:      {}\n", report.stats.pending));
    out.push_str(&format!("Actionables:  {}\n\n", report.actionables.len()));

    section_header(&mut out, "TECH STACK");
    if report.tech_stack.is_empty() {
        out.push_str("No technologies detected.\n");
    }
    for finding in &report.tech_stack {
        out.push_str(&format!("  • {}\n", describe_finding(finding)));
    }
    out.push('\n');

    if sections.tree {
        section_header(&mut out, "SITE TREE");
        out.push_str(&report.site_tree);
        out.push_str("\n\n");
    }

    if sections.queries {
        section_header(&mut out, "QUERIES AND FORMS");
        if report.actionables.is_empty() {
            out.push_str("None found.\n");
        }
        for actionable in &report.actionables {
            out.push_str(&format!(
                "  [{}] {}\n",
                actionable.method.to_uppercase(),
                actionable.url
            ));
            if let Some(ref data) = actionable.data {
                out.push_str(&format!("        data: {}\n", data));
            }
        }
        out.push('\n');
    }

    if sections.links {
        section_header(&mut out, "VISITED LINKS");
        for link in &report.visited_links {
            out.push_str(&format!("  {}\n", link));
        }
        out.push('\n');
    }

    if let Some(total) = report.poc_total {
        section_header(&mut out, "POC RESULTS");
        out.push_str(&format!("Potential vulnerabilities: {}\n\n", total));
        for result in &report.poc_results {
            out.push_str(&format!("  {}\n", result.keyword));
            for finding in &result.findings {
                out.push_str(&format!("    - {}\n", finding));
            }
        }
        if let Some(ref detail) = report.poc_detail {
            for entry in detail {
                out.push_str(&format!("\n--- {} ({}) ---\n", entry.keyword, entry.exit_info));
                out.push_str(entry.stdout.trim_end());
                out.push('\n');
                if !entry.stderr.trim().is_empty() {
                    out.push_str("stderr:\n");
                    out.push_str(entry.stderr.trim_end());
                    out.push('\n');
                }
            }
        }
        out.push('\n');
    }

    out.push_str(DIVIDER);
    out
}

fn section_header(out: &mut String, title: &str) {
    out.push_str(DIVIDER);
    out.push_str(title);
    out.push('\n');
    out.push_str(DIVIDER);
    out.push('\n');
}

/// Human-readable form of a finding: arrays as a comma list, strings bare.
pub fn describe_finding(finding: &Finding) -> String {
    match finding.value() {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

pub fn save_report(content: &str, path: &Path) -> Result<(), ReportError> {
    let write = || -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    };
    write().map_err(|source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    })
}
