use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use trellis::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("TRELLIS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let dir = cli.dir.clone();
    cli::run(cli).with_context(|| format!("proof directory {}", dir.display()))
}
