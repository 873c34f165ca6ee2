//! docpush entry point.

mod app;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = config::Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting docpush");

    let settings = config::Settings::resolve(&args)?;

    let rt = tokio::runtime::Runtime::new()?;
    let code = rt.block_on(app::run(settings))?;
    drop(rt);

    std::process::exit(code);
}
