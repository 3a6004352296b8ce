use anyhow::Result;
use clap::Parser;

mod argparser;
mod data;
mod data_load;
mod error;
mod impute;
mod processing;

use argparser::{Args, Commands};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Commands::Impute(impute_args) => impute::impute(impute_args),
    }
}
