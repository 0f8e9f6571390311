pub mod crawl;
pub mod inspectors;
pub mod probe;
pub mod report;
pub mod sitetree;

use colored::Colorize;

pub fn print_banner() {
    let banner = r#"
     _ _
 ___(_) |_ ___  ___  ___ ___  _ __   ___
/ __| | __/ _ \/ __|/ __/ _ \| '_ \ / _ \
\__ \ | ||  __/\__ \ (_| (_) | |_) |  __/
|___/_|\__\___||___/\___\___/| .__/ \___|
                             |_|"#;
    println!("{}", banner.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "domain-scoped crawler & fingerprinter".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
}
