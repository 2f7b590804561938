mod chrom;
mod cli;
mod error;
mod expression;
mod gencode;
mod intersect;
mod io;
mod isoform;
mod liftover;
mod merge;
mod models;
mod overlap;
mod pipeline;
mod regulatory;

use anyhow::Result;
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(n) = cli.rayon_threads
        && let Err(err) = ThreadPoolBuilder::new().num_threads(n).build_global()
    {
        tracing::warn!("failed to set Rayon thread pool size: {}", err);
    }

    match cli.command {
        Command::Build(args) => pipeline::run_build(args),
        Command::AggregateRegulation(args) => pipeline::run_aggregate(args),
        Command::LiftVariants(args) => pipeline::run_lift(args),
    }
}
