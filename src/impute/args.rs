use clap::Parser;
use std::path::PathBuf;

use crate::processing::fast_impute::CutoffMode;

#[derive(Parser, Debug, Clone)]
pub struct ImputeArgs {
    #[arg(short, long, required = true, num_args(1..), help = "Coverage files, or directories containing them (.cov, .bed, .txt, .tsv).")]
    pub input: Vec<PathBuf>,

    #[arg(short, long, required = true, help = "Reference CpG catalog: tab-separated chromosome, start, end.")]
    pub reference: PathBuf,

    #[arg(short, long, help = "Optional exclusion set: tab-separated chromosome, start.")]
    pub exclude: Option<PathBuf>,

    #[arg(short, long, required = true, help = "Output directory. One imputed_<sample>.bed is written per sample.")]
    pub output: PathBuf,

    #[arg(
        long,
        default_value_t = 10,
        help = "Minimum strand-collapsed coverage for a site to count as observed."
    )]
    pub min_coverage: u32,

    #[arg(
        long,
        default_value_t = 0,
        help = "Maximum distance to either neighbor for a site to be imputed. 0 disables the cutoff."
    )]
    pub max_distance: u64,

    #[arg(
        long,
        value_enum,
        default_value_t = CutoffMode::Inclusive,
        help = "Whether a neighbor exactly max-distance away is accepted."
    )]
    pub distance_cutoff: CutoffMode,

    #[arg(long, default_value_t = false, help = "Keep plus and minus strand calls as separate sites.")]
    pub no_collapse: bool,

    #[arg(
        long,
        default_value_t = 1,
        help = "Subtracted from minus-strand starts before matching them to plus-strand starts."
    )]
    pub minus_strand_offset: u64,

    #[arg(long, default_value_t = false, help = "Impute with a regression model trained per sample instead of linear interpolation.")]
    pub accurate: bool,

    #[arg(long, default_value_t = 300, help = "Training time budget per sample in seconds (accurate mode).")]
    pub max_time: u64,

    #[arg(long, default_value_t = 8, help = "Maximum number of candidate models per sample (accurate mode).")]
    pub max_models: usize,

    #[arg(long, default_value_t = false, help = "Process and write one chromosome at a time to reduce memory use.")]
    pub streaming: bool,

    #[arg(short, long, default_value_t = 1)]
    pub threads: usize,

    #[arg(
        long,
        default_value_t = 16,
        help = "Number of samples processed before results are flushed. Lower number will use less memory."
    )]
    pub batch_size: usize,
}
