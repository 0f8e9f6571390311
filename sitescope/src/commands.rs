use clap::arg;
use url::Url;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub const DEFAULT_FINGERPRINT_DB: &str = "~/.config/sitescope/file_match.db";

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("sitescope")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("sitescope")
        .about(
            "Crawl a single host, fingerprint its technology stack and collect query and form \
            surfaces.",
        )
        .styles(CLAP_STYLING)
        .arg(
            arg!(<URL>)
                .help("The URL to start crawling from")
                .value_parser(clap::value_parser!(Url)),
        )
        .arg(
            arg!(-c --"concurrency" <N>)
                .required(false)
                .help("Number of pages fetched per round")
                .value_parser(clap::value_parser!(usize))
                .default_value("10"),
        )
        .arg(
            arg!(-m --"max-links" <N>)
                .required(false)
                .help("Maximum number of URLs to visit")
                .value_parser(clap::value_parser!(usize))
                .default_value("1000"),
        )
        .arg(
            arg!(-o --"output" <FILE>)
                .required(false)
                .help("Write the JSON report to FILE instead of printing a summary")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(arg!(-t --"tree" "Include the site tree in the summary").required(false))
        .arg(arg!(-q --"query" "Include queries and forms in the summary").required(false))
        .arg(arg!(-l --"links" "Include every visited link in the summary").required(false))
        .arg(
            arg!(--"poc" "Run PoC probes for every detected technology").required(false),
        )
        .arg(
            arg!(--"detail" "Keep raw probe output in the results")
                .required(false)
                .requires("poc"),
        )
        .arg(
            arg!(--"no-headless" "Run the fetcher in visible mode, where supported")
                .required(false),
        )
        .arg(
            arg!(--"timeout" <SECS>)
                .required(false)
                .help("Page navigation timeout in seconds")
                .value_parser(clap::value_parser!(u64))
                .default_value("30"),
        )
        .arg(
            arg!(--"inspector-timeout" <SECS>)
                .required(false)
                .help("Time budget for running inspectors on one page, in seconds")
                .value_parser(clap::value_parser!(u64))
                .default_value("10"),
        )
        .arg(
            arg!(--"fingerprint-db" <PATH>)
                .required(false)
                .help("Location of the file fingerprint database")
                .default_value(DEFAULT_FINGERPRINT_DB),
        )
        .arg(
            arg!(--"poc-bin" <PATH>)
                .required(false)
                .help("Path to the PoC scanner binary")
                .default_value(sitescope_core::probe::DEFAULT_PROBE_BIN),
        )
        .arg(
            arg!(--"poc-timeout" <SECS>)
                .required(false)
                .help("Time limit for one PoC scanner run, in seconds")
                .value_parser(clap::value_parser!(u64))
                .default_value("60"),
        )
        .arg(
            arg!(--"skip-ext" <EXT>)
                .required(false)
                .help("Extra file extension to record without fetching (repeatable)")
                .action(clap::ArgAction::Append),
        )
        .arg(arg!(--"quiet" "Suppress the banner and progress output").required(false))
        .arg(arg!(-v --"verbose" "Enable debug logging").required(false))
}
