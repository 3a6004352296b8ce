use anyhow::{Context, Result};
use std::{fs, path::PathBuf, time::Duration};

use crate::error::ImputeError;
use crate::impute::args::ImputeArgs;
use crate::processing::collapse::CollapseOptions;
use crate::processing::fast_impute::DistanceCutoff;
use crate::processing::regression::TrainingBudget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimator {
    Fast,
    Accurate(TrainingBudget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Eager,
    Streaming,
}

/// Validated settings shared read-only by every sample pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputeConfig {
    pub output_dir: PathBuf,
    pub min_coverage: u32,
    pub collapse: CollapseOptions,
    pub cutoff: DistanceCutoff,
    pub estimator: Estimator,
    pub evaluation: Evaluation,
    pub threads: usize,
    pub batch_size: usize,
}

impl ImputeConfig {
    pub fn from_args(args: &ImputeArgs) -> Result<Self> {
        if args.threads == 0 {
            return Err(ImputeError::config("--threads must be at least 1").into());
        }
        if args.batch_size == 0 {
            return Err(ImputeError::config("--batch-size must be at least 1").into());
        }
        if args.accurate && args.max_models == 0 {
            return Err(ImputeError::config("--max-models must be at least 1").into());
        }

        if args.output.exists() && !args.output.is_dir() {
            return Err(ImputeError::config(format!(
                "output path {:?} exists and is not a directory",
                args.output
            ))
            .into());
        }
        fs::create_dir_all(&args.output)
            .with_context(|| format!("Could not create output directory: {:?}", args.output))?;

        let estimator = if args.accurate {
            Estimator::Accurate(TrainingBudget {
                max_time: Duration::from_secs(args.max_time),
                max_models: args.max_models,
            })
        } else {
            Estimator::Fast
        };

        Ok(Self {
            output_dir: args.output.clone(),
            min_coverage: args.min_coverage,
            collapse: CollapseOptions {
                collapse: !args.no_collapse,
                minus_strand_offset: args.minus_strand_offset,
            },
            cutoff: DistanceCutoff::new(args.max_distance, args.distance_cutoff),
            estimator,
            evaluation: if args.streaming {
                Evaluation::Streaming
            } else {
                Evaluation::Eager
            },
            threads: args.threads,
            batch_size: args.batch_size,
        })
    }
}
