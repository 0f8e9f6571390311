use sitescope::{command_argument_builder, handle_crawl, init_tracing};
use sitescope_core::print_banner;

#[tokio::main]
async fn main() {
    let matches = command_argument_builder().get_matches();
    init_tracing(matches.get_flag("verbose"));

    // Show banner unless --quiet flag is set
    if !matches.get_flag("quiet") {
        print_banner();
    }

    let code = handle_crawl(&matches).await;
    if code != 0 {
        std::process::exit(code);
    }
}
