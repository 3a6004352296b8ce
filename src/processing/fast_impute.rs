use ahash::AHashMap;
use clap::ValueEnum;

use crate::processing::neighbors::{Flanks, NeighborFeatures};
use crate::processing::reference_diff::AnnotatedSite;

/// Estimates for one chromosome keyed by site start.
pub type ChromosomeEstimates = AHashMap<u64, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CutoffMode {
    /// Neighbors exactly `max_distance` away are still used.
    Inclusive,
    /// Neighbors must be closer than `max_distance`.
    Exclusive,
}

/// Maximum gap allowed on either side of a site before it is left
/// un-imputed. `max_distance: None` disables the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceCutoff {
    pub max_distance: Option<u64>,
    pub mode: CutoffMode,
}

impl DistanceCutoff {
    /// A `max_distance` of 0 disables the cutoff.
    pub fn new(max_distance: u64, mode: CutoffMode) -> Self {
        match max_distance {
            0 => Self::unbounded(),
            max => Self {
                max_distance: Some(max),
                mode,
            },
        }
    }

    pub fn unbounded() -> Self {
        Self {
            max_distance: None,
            mode: CutoffMode::Inclusive,
        }
    }

    pub fn admits(&self, flanks: &Flanks) -> bool {
        let Some(max) = self.max_distance else {
            return true;
        };
        match self.mode {
            CutoffMode::Inclusive => flanks.b_dist <= max && flanks.f_dist <= max,
            CutoffMode::Exclusive => flanks.b_dist < max && flanks.f_dist < max,
        }
    }
}

/// Linear interpolation along the genome between the two flanking
/// observations: the nearer neighbor receives the larger weight.
pub fn fast_estimate(flanks: &Flanks) -> f64 {
    let total = flanks.total_distance();
    if total == 0 {
        return (flanks.b_meth + flanks.f_meth) / 2.0;
    }
    (flanks.b_meth * flanks.f_dist as f64 + flanks.f_meth * flanks.b_dist as f64) / total as f64
}

/// Fast estimates for the missing sites of one chromosome. `features` must be
/// aligned with `sites`. Boundary sites and sites failing `cutoff` get no
/// entry.
pub fn impute_fast(
    sites: &[AnnotatedSite],
    features: &[NeighborFeatures],
    cutoff: &DistanceCutoff,
) -> ChromosomeEstimates {
    sites
        .iter()
        .zip(features)
        .filter(|(site, _)| !site.is_observed())
        .filter_map(|(site, feature)| {
            let flanks = feature.flanks()?;
            cutoff
                .admits(&flanks)
                .then(|| (site.start, fast_estimate(&flanks)))
        })
        .collect()
}
