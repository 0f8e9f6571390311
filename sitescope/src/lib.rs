pub mod commands;
pub mod handlers;

pub use commands::command_argument_builder;
pub use handlers::{build_options, handle_crawl, init_tracing, summary_sections, write_output};
