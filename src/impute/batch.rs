use anyhow::{Context, Result};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressState, ProgressStyle};
use log::{debug, error};
use rayon::prelude::*;
use std::{fmt::Write, path::PathBuf};

use crate::error::error_kind;
use crate::impute::sample::{run_sample, SampleContext, SampleReport};

pub struct SampleOutcome {
    pub input: PathBuf,
    pub result: Result<SampleReport>,
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} samples ({eta})",
        )
        .context("Invalid progress bar template")?
        .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
        })
        .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Runs every sample on a pool of `threads` workers, `batch_size` samples at
/// a time. A failing sample is recorded in its outcome and never stops the
/// other samples.
pub fn run_in_batches(
    inputs: &[PathBuf],
    ctx: &SampleContext,
    threads: usize,
    batch_size: usize,
) -> Result<Vec<SampleOutcome>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("Could not initialize threadpool")?;

    let pb = progress_bar(inputs.len() as u64)?;
    let mut outcomes = Vec::with_capacity(inputs.len());

    for (batch_number, batch) in inputs.chunks(batch_size.max(1)).enumerate() {
        debug!(
            "Starting batch {} with {} samples",
            batch_number + 1,
            batch.len()
        );

        let mut batch_outcomes: Vec<SampleOutcome> = pool.install(|| {
            batch
                .par_iter()
                .progress_with(pb.clone())
                .map(|input| {
                    let result = run_sample(input, ctx)
                        .with_context(|| format!("Sample {:?} failed", input));
                    SampleOutcome {
                        input: input.clone(),
                        result,
                    }
                })
                .collect()
        });

        for outcome in &batch_outcomes {
            if let Err(e) = &outcome.result {
                pb.suspend(|| error!("[{}] {:#}", error_kind(e), e));
            }
        }
        outcomes.append(&mut batch_outcomes);
    }

    pb.finish_with_message("Finished processing all samples.");
    Ok(outcomes)
}
