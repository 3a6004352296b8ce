use log::debug;

use crate::data::SampleSites;
use crate::processing::stats::nearest_rank;

/// Coverage quantile above which sites are treated as duplication or mapping
/// artifacts.
pub const OUTLIER_COVERAGE_QUANTILE: f64 = 0.999;

/// Coverage bounds derived from one sample's own distribution. Sites pass
/// when `min_coverage <= coverage_total < upper_bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageFilter {
    pub min_coverage: u64,
    pub upper_bound: Option<u64>,
}

impl CoverageFilter {
    pub fn from_sites(sites: &SampleSites, min_coverage: u32) -> Self {
        let mut coverages: Vec<u64> = sites
            .iter()
            .flat_map(|(_, sites)| sites.iter().map(|site| site.coverage_total))
            .collect();
        coverages.sort_unstable();

        Self {
            min_coverage: u64::from(min_coverage),
            upper_bound: nearest_rank(&coverages, OUTLIER_COVERAGE_QUANTILE),
        }
    }

    pub fn passes(&self, coverage_total: u64) -> bool {
        coverage_total >= self.min_coverage
            && self.upper_bound.map_or(true, |upper| coverage_total < upper)
    }

    pub fn apply(&self, mut sites: SampleSites) -> SampleSites {
        let before = sites.len();
        sites.retain(|site| self.passes(site.coverage_total));
        debug!(
            "Coverage filter [{}, {:?}) kept {} of {} sites",
            self.min_coverage,
            self.upper_bound,
            sites.len(),
            before
        );
        sites
    }
}
