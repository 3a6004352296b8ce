use ahash::AHashMap;
use log::debug;
use methylome::SiteKey;

use crate::processing::fast_impute::{fast_estimate, ChromosomeEstimates, DistanceCutoff};
use crate::processing::neighbors::{Flanks, NeighborFeatures};
use crate::processing::reference_diff::AnnotatedSite;
use crate::processing::stats::{nearest_rank, pearson};

/// Columns handed to the regression trainer, in this order.
pub const FEATURE_COLUMNS: [&str; 10] = [
    "b_meth", "f_meth", "b_dist", "f_dist", "lg_b_dist", "lg_f_dist", "lg_b_meth", "lg_f_meth",
    "b_corr", "f_corr",
];
pub const N_FEATURES: usize = FEATURE_COLUMNS.len();

pub type FeatureVector = [f64; N_FEATURES];

/// Observed sites whose fast-estimate error lies above this quantile are
/// kept out of training.
pub const TRAINING_ERROR_QUANTILE: f64 = 0.99;

/// Bin for neighbor distances beyond 2 kb.
pub const SENTINEL_BIN: i64 = -1;

/// Buckets a neighbor distance: exact up to 200 bp, rounded up to the next
/// 10 bp up to 500 bp, to the next 100 bp up to 2 kb, one bin beyond.
pub fn distance_bin(distance: u64) -> i64 {
    let round_up = |step: u64| (((distance - 1) / step + 1) * step) as i64;
    match distance {
        0..=200 => distance as i64,
        201..=500 => round_up(10),
        501..=2000 => round_up(100),
        _ => SENTINEL_BIN,
    }
}

/// An observed site with two-sided context, usable as a training example.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelledFlanks {
    pub avg: f64,
    pub flanks: Flanks,
}

impl LabelledFlanks {
    pub fn interpolation_error(&self) -> f64 {
        (fast_estimate(&self.flanks) - self.avg).abs()
    }
}

pub fn training_candidates<'a>(
    sites: &'a [AnnotatedSite],
    features: &'a [NeighborFeatures],
) -> impl Iterator<Item = LabelledFlanks> + 'a {
    sites.iter().zip(features).filter_map(|(site, feature)| {
        Some(LabelledFlanks {
            avg: site.avg()?,
            flanks: feature.flanks()?,
        })
    })
}

/// Removes the sites where linear interpolation fails worst: rows whose
/// error is strictly above the nearest-rank 99th percentile.
pub fn drop_interpolation_outliers(candidates: Vec<LabelledFlanks>) -> Vec<LabelledFlanks> {
    let mut errors: Vec<f64> = candidates.iter().map(LabelledFlanks::interpolation_error).collect();
    errors.sort_by(|a, b| a.total_cmp(b));

    let Some(limit) = nearest_rank(&errors, TRAINING_ERROR_QUANTILE) else {
        return candidates;
    };

    candidates
        .into_iter()
        .filter(|row| row.interpolation_error() <= limit)
        .collect()
}

/// Pearson correlation between forward-neighbor methylation and the site's
/// own methylation, per forward-distance bin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinCorrelations {
    by_bin: AHashMap<i64, f64>,
}

impl BinCorrelations {
    pub fn from_training(rows: &[LabelledFlanks]) -> Self {
        let mut grouped: AHashMap<i64, (Vec<f64>, Vec<f64>)> = AHashMap::new();
        for row in rows {
            let (neighbor, own) = grouped.entry(distance_bin(row.flanks.f_dist)).or_default();
            neighbor.push(row.flanks.f_meth);
            own.push(row.avg);
        }

        let by_bin = grouped
            .into_iter()
            .filter_map(|(bin, (neighbor, own))| {
                if bin == SENTINEL_BIN {
                    return Some((bin, 0.0));
                }
                pearson(&neighbor, &own).map(|corr| (bin, corr))
            })
            .collect();

        Self { by_bin }
    }

    /// Correlation for the bin of `distance`; bins without one contribute 0.
    pub fn for_distance(&self, distance: u64) -> f64 {
        self.by_bin
            .get(&distance_bin(distance))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.by_bin.len()
    }
}

pub fn feature_vector(flanks: &Flanks, correlations: &BinCorrelations) -> FeatureVector {
    let b_dist = flanks.b_dist as f64;
    let f_dist = flanks.f_dist as f64;
    [
        flanks.b_meth,
        flanks.f_meth,
        b_dist,
        f_dist,
        b_dist.ln_1p(),
        f_dist.ln_1p(),
        flanks.b_meth.ln_1p(),
        flanks.f_meth.ln_1p(),
        correlations.for_distance(flanks.b_dist),
        correlations.for_distance(flanks.f_dist),
    ]
}

/// Labelled rows for the trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingTable {
    pub columns: &'static [&'static str],
    pub features: Vec<FeatureVector>,
    pub labels: Vec<f64>,
}

impl TrainingTable {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Unlabelled rows for the trainer, keyed by (chromosome, start) so that
/// predictions can be merged back.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionTable {
    pub columns: &'static [&'static str],
    pub keys: Vec<SiteKey>,
    pub features: Vec<FeatureVector>,
}

impl PredictionTable {
    pub fn new() -> Self {
        Self {
            columns: &FEATURE_COLUMNS,
            keys: Vec::new(),
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Groups `predictions` (aligned with the rows of this table) into
    /// per-chromosome estimates.
    pub fn merge_predictions(&self, predictions: &[f64]) -> AHashMap<String, ChromosomeEstimates> {
        let mut merged: AHashMap<String, ChromosomeEstimates> = AHashMap::new();
        for ((chromosome, start), &value) in self.keys.iter().zip(predictions) {
            merged
                .entry(chromosome.clone())
                .or_default()
                .insert(*start, value);
        }
        merged
    }
}

/// Training rows after outlier and distance filtering, together with the
/// bin correlations derived from them.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    rows: Vec<LabelledFlanks>,
    correlations: BinCorrelations,
}

impl TrainingSet {
    /// The outlier cut is taken over all two-sided observed sites before the
    /// distance cutoff is applied.
    pub fn build(candidates: Vec<LabelledFlanks>, cutoff: &DistanceCutoff) -> Self {
        let total = candidates.len();
        let rows: Vec<LabelledFlanks> = drop_interpolation_outliers(candidates)
            .into_iter()
            .filter(|row| cutoff.admits(&row.flanks))
            .collect();
        let correlations = BinCorrelations::from_training(&rows);

        debug!(
            "Training set: {} of {} observed sites, {} distance bins correlated",
            rows.len(),
            total,
            correlations.len()
        );

        Self { rows, correlations }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn table(&self) -> TrainingTable {
        TrainingTable {
            columns: &FEATURE_COLUMNS,
            features: self
                .rows
                .iter()
                .map(|row| feature_vector(&row.flanks, &self.correlations))
                .collect(),
            labels: self.rows.iter().map(|row| row.avg).collect(),
        }
    }

    /// Appends the missing, two-sided sites of one chromosome that pass
    /// `cutoff` to `table`, built with the same features as training.
    pub fn extend_prediction_table(
        &self,
        table: &mut PredictionTable,
        chromosome: &str,
        sites: &[AnnotatedSite],
        features: &[NeighborFeatures],
        cutoff: &DistanceCutoff,
    ) {
        for (site, feature) in sites.iter().zip(features) {
            if site.is_observed() {
                continue;
            }
            let Some(flanks) = feature.flanks() else {
                continue;
            };
            if !cutoff.admits(&flanks) {
                continue;
            }
            table.keys.push((chromosome.to_string(), site.start));
            table.features.push(feature_vector(&flanks, &self.correlations));
        }
    }
}
