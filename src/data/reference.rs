use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::error::ImputeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceSite {
    pub start: u64,
    pub end: u64,
}

fn sort_unique(chromosome: String, mut sites: Vec<ReferenceSite>) -> Result<(String, Vec<ReferenceSite>)> {
    sites.sort_unstable_by_key(|site| site.start);

    if let Some(pair) = sites.windows(2).find(|pair| pair[0].start == pair[1].start) {
        return Err(ImputeError::DuplicateSite {
            chromosome,
            start: pair[0].start,
            origin: "reference catalog",
        }
        .into());
    }
    Ok((chromosome, sites))
}

/// Canonical CpG catalog, split per chromosome and sorted by start. Loaded
/// once per run and shared read-only between sample pipelines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceCatalog {
    chromosomes: BTreeMap<String, Vec<ReferenceSite>>,
}

impl ReferenceCatalog {
    /// Builds a catalog from unsorted per-chromosome site lists, sorting the
    /// chromosomes in parallel.
    pub fn from_chromosomes(chromosomes: AHashMap<String, Vec<ReferenceSite>>) -> Result<Self> {
        let sorted = chromosomes
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(chromosome, sites)| sort_unique(chromosome, sites))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            chromosomes: sorted
                .into_iter()
                .filter(|(_, sites)| !sites.is_empty())
                .collect(),
        })
    }

    #[cfg(test)]
    pub fn chromosome(&self, chromosome: &str) -> &[ReferenceSite] {
        self.chromosomes
            .get(chromosome)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Chromosomes in output order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<ReferenceSite>)> {
        self.chromosomes.iter()
    }

    pub fn site_count(&self) -> usize {
        self.chromosomes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.site_count() == 0
    }

    /// Anti-join against `exclusions`: sites whose (chromosome, start) is
    /// listed are dropped, everything else is kept in order.
    pub fn without(&self, exclusions: &ExclusionSet) -> ReferenceCatalog {
        let chromosomes = self
            .chromosomes
            .iter()
            .filter_map(|(chromosome, sites)| {
                let kept: Vec<ReferenceSite> = match exclusions.chromosome(chromosome) {
                    Some(excluded) => sites
                        .iter()
                        .filter(|site| !excluded.contains(&site.start))
                        .copied()
                        .collect(),
                    None => sites.clone(),
                };
                (!kept.is_empty()).then(|| (chromosome.clone(), kept))
            })
            .collect();

        ReferenceCatalog { chromosomes }
    }
}

/// Coordinates removed from the reference before differencing.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    chromosomes: AHashMap<String, AHashSet<u64>>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chromosome: String, start: u64) {
        self.chromosomes.entry(chromosome).or_default().insert(start);
    }

    pub fn chromosome(&self, chromosome: &str) -> Option<&AHashSet<u64>> {
        self.chromosomes.get(chromosome)
    }

    pub fn len(&self) -> usize {
        self.chromosomes.values().map(|set| set.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
