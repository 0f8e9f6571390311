use clap::ArgMatches;
use colored::Colorize;
use sitescope_core::crawl::{CrawlOptions, CrawlProgressCallback, execute_crawl};
use sitescope_core::inspectors::InspectorConfig;
use sitescope_core::probe::ProbeConfig;
use sitescope_core::report::{
    Report, ReportError, SummarySections, generate_json_report, generate_text_report, save_report,
};
use sitescope_scanner::CrawlConfig;
use sitescope_scanner::normalize::normalize_extension;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Install the fmt subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Expand a leading `~` in a user-supplied path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Turn parsed arguments into crawl options.
pub fn build_options(matches: &ArgMatches) -> Result<CrawlOptions, String> {
    let url = matches
        .get_one::<Url>("URL")
        .ok_or_else(|| "A start URL must be provided".to_string())?;

    let concurrency = *matches.get_one::<usize>("concurrency").unwrap_or(&10);
    if concurrency == 0 {
        return Err("--concurrency must be at least 1".to_string());
    }
    let max_links = *matches.get_one::<usize>("max-links").unwrap_or(&1000);
    let timeout = *matches.get_one::<u64>("timeout").unwrap_or(&30);
    let inspector_timeout = *matches.get_one::<u64>("inspector-timeout").unwrap_or(&10);

    let extra_extensions: Vec<String> = matches
        .get_many::<String>("skip-ext")
        .map(|values| values.map(|ext| normalize_extension(ext)).collect())
        .unwrap_or_default();

    let crawl = CrawlConfig::default()
        .with_concurrency(concurrency)
        .with_max_links(max_links)
        .with_page_timeout(Duration::from_secs(timeout))
        .with_inspector_timeout(Duration::from_secs(inspector_timeout))
        .with_extra_extensions(extra_extensions);

    let fingerprint_db = matches
        .get_one::<String>("fingerprint-db")
        .map(|raw| expand_path(raw));

    let probe = if matches.get_flag("poc") {
        let binary = matches
            .get_one::<String>("poc-bin")
            .map(|raw| expand_path(raw))
            .unwrap_or_else(|| PathBuf::from(sitescope_core::probe::DEFAULT_PROBE_BIN));
        let poc_timeout = *matches.get_one::<u64>("poc-timeout").unwrap_or(&60);
        Some(
            ProbeConfig::default()
                .with_binary(binary)
                .with_timeout(Duration::from_secs(poc_timeout))
                .with_detail(matches.get_flag("detail")),
        )
    } else {
        None
    };

    Ok(CrawlOptions {
        url: url.as_str().to_string(),
        crawl,
        inspectors: InspectorConfig { fingerprint_db },
        probe,
        show_progress_bars: !matches.get_flag("quiet"),
    })
}

pub fn summary_sections(matches: &ArgMatches) -> SummarySections {
    SummarySections {
        tree: matches.get_flag("tree"),
        queries: matches.get_flag("query"),
        links: matches.get_flag("links"),
    }
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_summary(report: &Report, sections: SummarySections) {
    print!("{}", generate_text_report(report, sections));
}

/// Persist the JSON report, or print the console summary when no output
/// file was requested.
pub fn write_output(
    report: &Report,
    output: Option<&Path>,
    sections: SummarySections,
) -> Result<(), ReportError> {
    match output {
        Some(path) => {
            let json = generate_json_report(report)?;
            save_report(&json, path)?;
            println!(
                "{} Results saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
            Ok(())
        }
        None => {
            print_summary(report, sections);
            Ok(())
        }
    }
}

/// Run the crawl described by `matches` and return the process exit code.
pub async fn handle_crawl(matches: &ArgMatches) -> i32 {
    let options = match build_options(matches) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            return 1;
        }
    };

    if matches.get_flag("no-headless") {
        warn!("--no-headless has no effect: pages are fetched over plain HTTP");
    }

    let quiet = matches.get_flag("quiet");
    if !quiet {
        print_divider();
        println!(
            "{} {}",
            "  Crawling".bright_white().bold(),
            options.url.bright_cyan()
        );
        print_divider();
        println!("Concurrency: {}", options.crawl.concurrency);
        println!("Max links:   {}", options.crawl.max_links);
        println!(
            "PoC probing: {}\n",
            if options.probe.is_some() { "enabled" } else { "disabled" }
        );
    }

    let progress_callback: CrawlProgressCallback = Arc::new(|msg: String| {
        debug!("{}", msg);
    });

    let report = match execute_crawl(options, Some(progress_callback)).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} Crawl failed: {}", "✗".red().bold(), e);
            return 1;
        }
    };

    if !quiet {
        println!("\n{} Crawl complete!\n", "✓".green().bold());
    }

    let sections = summary_sections(matches);
    let output = matches.get_one::<PathBuf>("output");
    if let Err(e) = write_output(&report, output.map(PathBuf::as_path), sections) {
        eprintln!("{} {}", "✗".red().bold(), e);
        eprintln!("Printing the summary instead.\n");
        print_summary(&report, sections);
        return 1;
    }
    0
}
