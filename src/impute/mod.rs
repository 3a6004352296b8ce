use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use std::sync::Arc;

use crate::data_load::{discover_inputs, load_exclusions, load_reference};
use crate::error::error_kind;
use crate::processing::regression::RidgeSearch;

pub mod args;
pub mod batch;
pub mod config;
pub mod sample;
pub mod writer;

pub use args::ImputeArgs;
use batch::{run_in_batches, SampleOutcome};
use config::ImputeConfig;
use sample::SampleContext;

pub fn impute(args: ImputeArgs) -> Result<()> {
    info!("Running gimmecpg 'impute' with {} threads", &args.threads);

    let config = ImputeConfig::from_args(&args)?;
    let inputs = discover_inputs(&args.input)?;
    info!("Found {} coverage files", inputs.len());

    let mut reference = load_reference(&args.reference)
        .with_context(|| format!("Error loading reference catalog from path: {:?}", args.reference))?;
    if let Some(exclude) = &args.exclude {
        let exclusions = load_exclusions(exclude)
            .with_context(|| format!("Error loading exclusion set from path: {:?}", exclude))?;
        if exclusions.is_empty() {
            warn!("Exclusion set {:?} lists no sites", exclude);
        }
        let before = reference.site_count();
        reference = reference.without(&exclusions);
        info!(
            "Excluded {} reference sites, {} remain",
            before - reference.site_count(),
            reference.site_count()
        );
    }

    let ctx = SampleContext {
        config: Arc::new(config),
        reference: Arc::new(reference),
        backend: Arc::new(RidgeSearch),
    };

    let outcomes = run_in_batches(&inputs, &ctx, ctx.config.threads, ctx.config.batch_size)?;
    summarize(&outcomes)
}

/// Logs one line per sample and fails only when no sample succeeded.
fn summarize(outcomes: &[SampleOutcome]) -> Result<()> {
    let mut failed = 0;

    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => {
                info!("ok     {}: {} -> {:?}", report.sample, report.counts, report.output);
                if report.malformed_records > 0 {
                    warn!(
                        "       {}: {} malformed records skipped",
                        report.sample, report.malformed_records
                    );
                }
                if let Some(rows) = report.training_rows {
                    info!("       {}: model trained on {} sites", report.sample, rows);
                }
            }
            Err(e) => {
                failed += 1;
                error!("failed {:?}: [{}] {:#}", outcome.input, error_kind(e), e);
            }
        }
    }

    if failed == outcomes.len() {
        bail!("All {} samples failed", failed);
    }
    if failed > 0 {
        warn!("{} of {} samples failed", failed, outcomes.len());
    } else {
        info!("All {} samples imputed", outcomes.len());
    }
    Ok(())
}
