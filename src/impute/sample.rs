use ahash::AHashMap;
use anyhow::{Context, Result};
use humantime::format_duration;
use log::{debug, info, warn};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use crate::data::reference::ReferenceCatalog;
use crate::data::SampleSites;
use crate::data_load::load_coverage_file;
use crate::error::ImputeError;
use crate::impute::config::{Estimator, Evaluation, ImputeConfig};
use crate::impute::writer::ImputedWriter;
use crate::processing::{
    assemble::{assemble_chromosome, AssembledChromosome, AssemblyCounts},
    collapse::collapse_strands,
    coverage_filter::CoverageFilter,
    fast_impute::{impute_fast, ChromosomeEstimates},
    features::{training_candidates, PredictionTable, TrainingSet},
    reference_diff::{annotate, ensure_reference},
    regression::{predict_checked, RegressionBackend, TrainingBudget, TrainingSession},
    ChromosomeView,
};

/// Read-only state shared by all sample pipelines of a run.
#[derive(Clone)]
pub struct SampleContext {
    pub config: Arc<ImputeConfig>,
    pub reference: Arc<ReferenceCatalog>,
    pub backend: Arc<dyn RegressionBackend>,
}

#[derive(Debug, Clone)]
pub struct SampleReport {
    pub sample: String,
    pub output: PathBuf,
    pub counts: AssemblyCounts,
    pub malformed_records: usize,
    pub training_rows: Option<usize>,
}

/// Keeps an error that already carries a kind, otherwise reports it as a
/// training failure.
fn as_training_failure(err: anyhow::Error) -> anyhow::Error {
    if err.downcast_ref::<ImputeError>().is_some() {
        err
    } else {
        ImputeError::training(format!("{:#}", err)).into()
    }
}

fn fit_session(
    backend: &dyn RegressionBackend,
    training: &TrainingSet,
    budget: &TrainingBudget,
) -> Result<Box<dyn TrainingSession>> {
    info!(
        "Training {} model on {} sites (max {} models, {})",
        backend.name(),
        training.len(),
        budget.max_models,
        format_duration(budget.max_time)
    );

    let mut session = backend.open_session().map_err(as_training_failure)?;
    session
        .fit(&training.table(), budget)
        .map_err(as_training_failure)?;
    Ok(session)
}

fn estimate_eager(
    ctx: &SampleContext,
    views: &[(String, ChromosomeView)],
) -> Result<(AHashMap<String, ChromosomeEstimates>, Option<usize>)> {
    let cutoff = &ctx.config.cutoff;

    match &ctx.config.estimator {
        Estimator::Fast => {
            let estimates = views
                .iter()
                .map(|(chromosome, view)| {
                    (
                        chromosome.clone(),
                        impute_fast(&view.sites, &view.features, cutoff),
                    )
                })
                .collect();
            Ok((estimates, None))
        }
        Estimator::Accurate(budget) => {
            let candidates = views
                .iter()
                .flat_map(|(_, view)| training_candidates(&view.sites, &view.features))
                .collect();
            let training = TrainingSet::build(candidates, cutoff);
            let session = fit_session(ctx.backend.as_ref(), &training, budget)?;

            let mut table = PredictionTable::new();
            for (chromosome, view) in views {
                training.extend_prediction_table(&mut table, chromosome, &view.sites, &view.features, cutoff);
            }
            let predictions = predict_checked(session.as_ref(), &table).map_err(as_training_failure)?;

            Ok((table.merge_predictions(&predictions), Some(training.len())))
        }
    }
}

/// Materializes the whole annotated table, estimates, then writes.
fn run_eager(ctx: &SampleContext, sites: &SampleSites, writer: &mut ImputedWriter) -> Result<(AssemblyCounts, Option<usize>)> {
    let annotated = annotate(&ctx.reference, sites)?;
    debug!(
        "{} reference sites observed, {} missing",
        annotated.observed_count(),
        annotated.missing_count()
    );

    let views: Vec<(String, ChromosomeView)> = annotated
        .chromosomes
        .into_iter()
        .map(|(chromosome, sites)| (chromosome, ChromosomeView::from_sites(sites)))
        .collect();

    let (estimates, training_rows) = estimate_eager(ctx, &views)?;

    let empty = ChromosomeEstimates::new();
    let assembled: Vec<AssembledChromosome> = views
        .iter()
        .map(|(chromosome, view)| {
            assemble_chromosome(chromosome, &view.sites, estimates.get(chromosome).unwrap_or(&empty))
        })
        .collect();

    let mut counts = AssemblyCounts::default();
    for chromosome in &assembled {
        counts.add(chromosome);
        writer.write_chromosome(chromosome)?;
    }
    Ok((counts, training_rows))
}

/// Works one chromosome at a time. Accurate mode needs a first pass to
/// gather training sites from every chromosome before anything is written.
fn run_streaming(
    ctx: &SampleContext,
    sites: &SampleSites,
    writer: &mut ImputedWriter,
) -> Result<(AssemblyCounts, Option<usize>)> {
    ensure_reference(&ctx.reference)?;
    let cutoff = &ctx.config.cutoff;

    let model = match &ctx.config.estimator {
        Estimator::Fast => None,
        Estimator::Accurate(budget) => {
            let mut candidates = Vec::new();
            for (chromosome, reference_sites) in ctx.reference.iter() {
                let view = ChromosomeView::build(reference_sites, sites.chromosome(chromosome));
                candidates.extend(training_candidates(&view.sites, &view.features));
            }
            let training = TrainingSet::build(candidates, cutoff);
            let session = fit_session(ctx.backend.as_ref(), &training, budget)?;
            Some((training, session))
        }
    };

    let mut counts = AssemblyCounts::default();
    for (chromosome, reference_sites) in ctx.reference.iter() {
        let view = ChromosomeView::build(reference_sites, sites.chromosome(chromosome));

        let estimates = match &model {
            None => impute_fast(&view.sites, &view.features, cutoff),
            Some((training, session)) => {
                let mut table = PredictionTable::new();
                training.extend_prediction_table(&mut table, chromosome, &view.sites, &view.features, cutoff);
                let predictions =
                    predict_checked(session.as_ref(), &table).map_err(as_training_failure)?;
                table
                    .merge_predictions(&predictions)
                    .remove(chromosome)
                    .unwrap_or_default()
            }
        };

        let assembled = assemble_chromosome(chromosome, &view.sites, &estimates);
        counts.add(&assembled);
        writer.write_chromosome(&assembled)?;
    }

    Ok((counts, model.map(|(training, _)| training.len())))
}

/// ingest → collapse → filter → diff → neighbors → estimate → write, for
/// one coverage file.
pub fn run_sample(path: &Path, ctx: &SampleContext) -> Result<SampleReport> {
    let started = Instant::now();
    let config = &ctx.config;

    let table = load_coverage_file(path)?;
    let collapsed = collapse_strands(&table, &config.collapse)
        .with_context(|| format!("Could not collapse strands of '{}'", table.name))?;
    let filter = CoverageFilter::from_sites(&collapsed, config.min_coverage);
    let sites = filter.apply(collapsed);
    info!(
        "{}: {} sites pass coverage filter [{}, {})",
        table.name,
        sites.len(),
        filter.min_coverage,
        filter
            .upper_bound
            .map(|upper| upper.to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    if sites.is_empty() {
        warn!("{}: no site passes the coverage filter", table.name);
    }
    ensure_reference(&ctx.reference)?;

    let mut writer = ImputedWriter::create(&config.output_dir, &table.name)?;
    let (counts, training_rows) = match config.evaluation {
        Evaluation::Eager => run_eager(ctx, &sites, &mut writer)?,
        Evaluation::Streaming => run_streaming(ctx, &sites, &mut writer)?,
    };
    debug!("{}: {} rows written", table.name, writer.rows_written());
    let output = writer.finish()?;

    let elapsed = Duration::from_millis(started.elapsed().as_millis() as u64);
    info!(
        "{}: {} - saved to {:?} in {}",
        table.name,
        counts,
        output,
        format_duration(elapsed)
    );

    Ok(SampleReport {
        sample: table.name,
        output,
        counts,
        malformed_records: table.malformed_records,
        training_rows,
    })
}
