use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::error;

use haplophase::cli::{Cli, Commands};

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Phase(args) => haplophase::run_phase(args),
        Commands::Extend(args) => haplophase::run_extend(args),
        Commands::Split(args) => haplophase::run_split(args),
    }
}
