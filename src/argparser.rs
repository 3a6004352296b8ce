use clap::{Parser, Subcommand};

use crate::impute::ImputeArgs;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Impute missing CpG methylation values for one or more bisulfite coverage files.
    Impute(ImputeArgs),
}
