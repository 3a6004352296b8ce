pub mod coverage;
pub mod methylation;
pub mod reference;

use anyhow::Result;
use methylation::MethylationCall;
use methylome::Strand;
use std::collections::BTreeMap;

use crate::error::ImputeError;

/// One parsed coverage row. Chromosome names are normalized at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct MethylationSite {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    pub call: MethylationCall,
}

impl MethylationSite {
    pub fn new(chromosome: String, start: u64, end: u64, strand: Strand, call: MethylationCall) -> Self {
        Self {
            chromosome,
            start,
            end,
            strand,
            call,
        }
    }
}

/// Every parsed row of one coverage file, in file order.
#[derive(Debug, Clone)]
pub struct SampleTable {
    pub name: String,
    pub sites: Vec<MethylationSite>,
    pub malformed_records: usize,
}

impl SampleTable {
    pub fn new(name: impl Into<String>, sites: Vec<MethylationSite>) -> Self {
        Self {
            name: name.into(),
            sites,
            malformed_records: 0,
        }
    }
}

/// A strand-collapsed observation, keyed by `start` inside its chromosome.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedSite {
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    pub coverage_total: u64,
    pub avg: f64,
}

/// Per-chromosome arena of observed sites, each vector sorted by `start`
/// with no duplicate starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSites {
    chromosomes: BTreeMap<String, Vec<ObservedSite>>,
}

impl SampleSites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts `sites` and stores them under `chromosome`. Two observations at
    /// the same start cannot be joined unambiguously and are rejected.
    pub fn insert_chromosome(&mut self, chromosome: String, mut sites: Vec<ObservedSite>) -> Result<()> {
        sites.sort_by_key(|site| site.start);

        if let Some(pair) = sites.windows(2).find(|pair| pair[0].start == pair[1].start) {
            return Err(ImputeError::DuplicateSite {
                chromosome,
                start: pair[0].start,
                origin: "sample",
            }
            .into());
        }

        if !sites.is_empty() {
            self.chromosomes.insert(chromosome, sites);
        }
        Ok(())
    }

    pub fn chromosome(&self, chromosome: &str) -> &[ObservedSite] {
        self.chromosomes
            .get(chromosome)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<ObservedSite>)> {
        self.chromosomes.iter()
    }

    pub fn len(&self) -> usize {
        self.chromosomes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosomes.is_empty()
    }

    /// Keeps the sites for which `keep` returns true, dropping chromosomes
    /// left without any site.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&ObservedSite) -> bool,
    {
        for sites in self.chromosomes.values_mut() {
            sites.retain(|site| keep(site));
        }
        self.chromosomes.retain(|_, sites| !sites.is_empty());
    }
}
