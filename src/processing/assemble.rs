use methylome::Strand;
use std::fmt::Display;

use crate::processing::fast_impute::ChromosomeEstimates;
use crate::processing::reference_diff::AnnotatedSite;

/// Label written for sites whose value was estimated.
pub const IMPUTED_LABEL: &str = "imputed";

pub fn clamp_percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Sample,
    Imputed,
}

/// Final per-site record. `strand` is unknown for imputed sites.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImputedSite {
    pub start: u64,
    pub end: u64,
    pub strand: Option<Strand>,
    pub provenance: Provenance,
    pub avg: f64,
}

impl ImputedSite {
    pub fn label<'a>(&self, sample: &'a str) -> &'a str {
        match self.provenance {
            Provenance::Sample => sample,
            Provenance::Imputed => IMPUTED_LABEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledChromosome {
    pub chromosome: String,
    pub rows: Vec<ImputedSite>,
    pub not_imputed: usize,
}

/// Site counts of one assembled sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyCounts {
    pub observed: usize,
    pub imputed: usize,
    pub not_imputed: usize,
}

impl AssemblyCounts {
    pub fn add(&mut self, chromosome: &AssembledChromosome) {
        for row in &chromosome.rows {
            match row.provenance {
                Provenance::Sample => self.observed += 1,
                Provenance::Imputed => self.imputed += 1,
            }
        }
        self.not_imputed += chromosome.not_imputed;
    }
}

impl Display for AssemblyCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} observed, {} imputed, {} left missing",
            self.observed, self.imputed, self.not_imputed
        )
    }
}

/// Left-joins the annotated sites of one chromosome with `estimates` on
/// start. Observed values win over estimates; missing sites without an
/// estimate are counted and left out. Every value is clamped to [0, 100].
pub fn assemble_chromosome(
    chromosome: &str,
    sites: &[AnnotatedSite],
    estimates: &ChromosomeEstimates,
) -> AssembledChromosome {
    let mut rows = Vec::with_capacity(sites.len());
    let mut not_imputed = 0;

    for site in sites {
        let row = match site.observed {
            Some(observation) => Some(ImputedSite {
                start: site.start,
                end: site.end,
                strand: Some(observation.strand),
                provenance: Provenance::Sample,
                avg: clamp_percent(observation.avg),
            }),
            None => estimates.get(&site.start).map(|&value| ImputedSite {
                start: site.start,
                end: site.end,
                strand: None,
                provenance: Provenance::Imputed,
                avg: clamp_percent(value),
            }),
        };

        match row {
            Some(row) => rows.push(row),
            None => not_imputed += 1,
        }
    }

    AssembledChromosome {
        chromosome: chromosome.to_string(),
        rows,
        not_imputed,
    }
}
