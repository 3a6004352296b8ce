use ahash::AHashMap;
use anyhow::Result;
use log::debug;
use methylome::Strand;

use crate::data::{MethylationSite, ObservedSite, SampleSites, SampleTable};
use crate::error::ImputeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollapseOptions {
    pub collapse: bool,
    /// Subtracted from a minus-strand `start` before it is matched against a
    /// plus-strand `start`. With 0-based, 1-bp calls the C of a CpG on the
    /// minus strand sits one base after the plus-strand C, hence the default 1.
    pub minus_strand_offset: u64,
}

impl Default for CollapseOptions {
    fn default() -> Self {
        Self {
            collapse: true,
            minus_strand_offset: 1,
        }
    }
}

/// Outcome of matching plus and minus calls on the adjusted coordinate.
#[derive(Debug, Clone, PartialEq)]
pub enum StrandJoin<'a> {
    Plus(&'a MethylationSite),
    Minus(&'a MethylationSite),
    Both(&'a MethylationSite, &'a MethylationSite),
}

impl StrandJoin<'_> {
    /// Merges the joined calls into one observation. Zero total coverage is
    /// not an observation and yields `None`.
    pub fn merge(&self) -> Option<ObservedSite> {
        let site = match self {
            StrandJoin::Plus(single) | StrandJoin::Minus(single) => ObservedSite {
                start: single.start,
                end: single.end,
                strand: single.strand,
                coverage_total: u64::from(single.call.coverage()),
                avg: single.call.percent_methylated(),
            },
            StrandJoin::Both(plus, minus) => {
                let coverage_total =
                    u64::from(plus.call.coverage()) + u64::from(minus.call.coverage());
                let avg = if coverage_total > 0 {
                    (plus.call.methylated_weight() + minus.call.methylated_weight())
                        / coverage_total as f64
                } else {
                    0.0
                };
                ObservedSite {
                    start: plus.start.min(minus.start),
                    end: plus.end.max(minus.end),
                    strand: Strand::Both,
                    coverage_total,
                    avg,
                }
            }
        };

        (site.coverage_total > 0).then_some(site)
    }
}

/// Full outer merge-join of plus-strand calls (keyed on `start`) with
/// minus-strand calls (keyed on `start - offset`). Both inputs must be
/// sorted by their key with unique keys.
pub fn join_strands<'a>(
    plus: &[&'a MethylationSite],
    minus: &[(Option<u64>, &'a MethylationSite)],
) -> Vec<StrandJoin<'a>> {
    let mut joined = Vec::with_capacity(plus.len().max(minus.len()));
    let (mut i, mut j) = (0, 0);

    while i < plus.len() && j < minus.len() {
        let plus_key = Some(plus[i].start);
        let (minus_key, minus_site) = minus[j];

        match minus_key.cmp(&plus_key) {
            std::cmp::Ordering::Equal => {
                joined.push(StrandJoin::Both(plus[i], minus_site));
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                joined.push(StrandJoin::Minus(minus_site));
                j += 1;
            }
            std::cmp::Ordering::Greater => {
                joined.push(StrandJoin::Plus(plus[i]));
                i += 1;
            }
        }
    }
    joined.extend(plus[i..].iter().map(|site| StrandJoin::Plus(*site)));
    joined.extend(minus[j..].iter().map(|(_, site)| StrandJoin::Minus(*site)));

    joined
}

/// `starts` must be ascending.
fn reject_duplicates(chromosome: &str, starts: impl Iterator<Item = u64>) -> Result<()> {
    let mut previous: Option<u64> = None;
    for start in starts {
        if previous == Some(start) {
            return Err(ImputeError::DuplicateSite {
                chromosome: chromosome.to_string(),
                start,
                origin: "sample strand",
            }
            .into());
        }
        previous = Some(start);
    }
    Ok(())
}

/// Turns the parsed rows of one sample into per-chromosome observations,
/// merging the two strands of each CpG when `options.collapse` is set.
pub fn collapse_strands(table: &SampleTable, options: &CollapseOptions) -> Result<SampleSites> {
    let mut by_chromosome: AHashMap<&str, Vec<&MethylationSite>> = AHashMap::new();
    for site in &table.sites {
        by_chromosome
            .entry(site.chromosome.as_str())
            .or_default()
            .push(site);
    }

    let mut collapsed = SampleSites::new();
    let mut dropped_zero_coverage = 0usize;

    for (chromosome, sites) in by_chromosome {
        let merged: Vec<ObservedSite> = if options.collapse {
            let mut plus: Vec<&MethylationSite> = Vec::new();
            let mut minus: Vec<(Option<u64>, &MethylationSite)> = Vec::new();
            let mut merged_upstream: Vec<&MethylationSite> = Vec::new();

            for site in sites {
                match site.strand {
                    Strand::Positive => plus.push(site),
                    Strand::Negative => {
                        minus.push((site.start.checked_sub(options.minus_strand_offset), site))
                    }
                    Strand::Both => merged_upstream.push(site),
                }
            }

            plus.sort_by_key(|site| site.start);
            minus.sort_by_key(|(key, site)| (*key, site.start));
            reject_duplicates(chromosome, plus.iter().map(|site| site.start))?;
            reject_duplicates(chromosome, minus.iter().map(|(_, site)| site.start))?;

            let joined = join_strands(&plus, &minus);
            let total = joined.len() + merged_upstream.len();

            let merged: Vec<ObservedSite> = joined
                .iter()
                .filter_map(StrandJoin::merge)
                .chain(
                    merged_upstream
                        .into_iter()
                        .filter_map(|site| StrandJoin::Plus(site).merge()),
                )
                .collect();
            dropped_zero_coverage += total - merged.len();
            merged
        } else {
            let total = sites.len();
            let kept: Vec<ObservedSite> = sites
                .into_iter()
                .filter_map(|site| StrandJoin::Plus(site).merge())
                .collect();
            dropped_zero_coverage += total - kept.len();
            kept
        };

        collapsed.insert_chromosome(chromosome.to_string(), merged)?;
    }

    debug!(
        "{}: {} rows collapsed into {} sites ({} without coverage dropped)",
        table.name,
        table.sites.len(),
        collapsed.len(),
        dropped_zero_coverage
    );

    Ok(collapsed)
}
