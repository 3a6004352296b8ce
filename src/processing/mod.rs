pub mod assemble;
pub mod collapse;
pub mod coverage_filter;
pub mod fast_impute;
pub mod features;
pub mod neighbors;
pub mod reference_diff;
pub mod regression;
pub mod stats;

use crate::data::reference::ReferenceSite;
use crate::data::ObservedSite;
use crate::processing::neighbors::{build_neighbor_features, NeighborFeatures};
use crate::processing::reference_diff::{annotate_chromosome, AnnotatedSite};

/// Annotated sites of one chromosome with their aligned neighbor features.
pub struct ChromosomeView {
    pub sites: Vec<AnnotatedSite>,
    pub features: Vec<NeighborFeatures>,
}

impl ChromosomeView {
    pub fn build(reference: &[ReferenceSite], sample: &[ObservedSite]) -> Self {
        Self::from_sites(annotate_chromosome(reference, sample))
    }

    pub fn from_sites(sites: Vec<AnnotatedSite>) -> Self {
        let features = build_neighbor_features(&sites);
        Self { sites, features }
    }
}
