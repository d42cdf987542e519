mod cli;
mod log;
mod model;
mod orchestrator;
mod protocol;
mod server;
mod text_view;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "run_console=warn",
        1 => "run_console=debug",
        2 => "run_console=trace",
        _ => "trace",
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // RUST_LOG wins over -v.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(args.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    cli::run(args).await
}
