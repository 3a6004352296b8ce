use anyhow::Result;
use methylome::Strand;

use crate::data::reference::{ReferenceCatalog, ReferenceSite};
use crate::data::{ObservedSite, SampleSites};
use crate::error::ImputeError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub avg: f64,
    pub strand: Strand,
}

/// A reference CpG with the sample's observation attached, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotatedSite {
    pub start: u64,
    pub end: u64,
    pub observed: Option<Observation>,
}

impl AnnotatedSite {
    pub fn missing(site: &ReferenceSite) -> Self {
        Self {
            start: site.start,
            end: site.end,
            observed: None,
        }
    }

    pub fn avg(&self) -> Option<f64> {
        self.observed.map(|obs| obs.avg)
    }

    pub fn is_observed(&self) -> bool {
        self.observed.is_some()
    }
}

/// Left merge-join of one chromosome's reference sites against the sample's
/// observations on `start`. Every reference site appears exactly once, in
/// reference order; sample sites absent from the reference are dropped.
pub fn annotate_chromosome(reference: &[ReferenceSite], sample: &[ObservedSite]) -> Vec<AnnotatedSite> {
    let mut annotated = Vec::with_capacity(reference.len());
    let mut j = 0;

    for site in reference {
        while j < sample.len() && sample[j].start < site.start {
            j += 1;
        }

        annotated.push(match sample.get(j) {
            Some(obs) if obs.start == site.start => AnnotatedSite {
                start: site.start,
                end: site.end,
                observed: Some(Observation {
                    avg: obs.avg,
                    strand: obs.strand,
                }),
            },
            _ => AnnotatedSite::missing(site),
        });
    }

    annotated
}

pub fn ensure_reference(reference: &ReferenceCatalog) -> Result<()> {
    if reference.is_empty() {
        return Err(ImputeError::EmptyReferenceAfterFiltering.into());
    }
    Ok(())
}

/// All reference sites of one sample, classified as observed or missing and
/// ordered by (chromosome, start).
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedTable {
    pub chromosomes: Vec<(String, Vec<AnnotatedSite>)>,
}

impl AnnotatedTable {
    pub fn observed_count(&self) -> usize {
        self.sites().filter(|site| site.is_observed()).count()
    }

    pub fn missing_count(&self) -> usize {
        self.sites().filter(|site| !site.is_observed()).count()
    }

    fn sites(&self) -> impl Iterator<Item = &AnnotatedSite> {
        self.chromosomes.iter().flat_map(|(_, sites)| sites.iter())
    }
}

pub fn annotate(reference: &ReferenceCatalog, sample: &SampleSites) -> Result<AnnotatedTable> {
    ensure_reference(reference)?;

    let chromosomes = reference
        .iter()
        .map(|(chromosome, sites)| {
            (
                chromosome.clone(),
                annotate_chromosome(sites, sample.chromosome(chromosome)),
            )
        })
        .collect();

    Ok(AnnotatedTable { chromosomes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::reference::ExclusionSet;
    use ahash::AHashMap;

    fn reference(chromosomes: &[(&str, &[u64])]) -> ReferenceCatalog {
        let map: AHashMap<String, Vec<ReferenceSite>> = chromosomes
            .iter()
            .map(|(chromosome, starts)| {
                (
                    chromosome.to_string(),
                    starts
                        .iter()
                        .map(|&start| ReferenceSite { start, end: start + 2 })
                        .collect(),
                )
            })
            .collect();
        ReferenceCatalog::from_chromosomes(map).unwrap()
    }

    fn sample(chromosomes: &[(&str, &[(u64, f64)])]) -> SampleSites {
        let mut sites = SampleSites::new();
        for (chromosome, observed) in chromosomes {
            let observed = observed
                .iter()
                .map(|&(start, avg)| ObservedSite {
                    start,
                    end: start + 2,
                    strand: Strand::Both,
                    coverage_total: 20,
                    avg,
                })
                .collect();
            sites.insert_chromosome(chromosome.to_string(), observed).unwrap();
        }
        sites
    }

    #[test]
    fn test_left_join_classifies_sites() -> Result<()> {
        let reference = reference(&[("1", &[100, 200, 300]), ("2", &[10])]);
        let sample = sample(&[("1", &[(100, 40.0), (150, 99.0), (300, 60.0)]), ("3", &[(1, 1.0)])]);

        let table = annotate(&reference, &sample)?;

        assert_eq!(table.chromosomes.len(), 2);
        let (chromosome, sites) = &table.chromosomes[0];
        assert_eq!(chromosome, "1");
        let avgs: Vec<Option<f64>> = sites.iter().map(AnnotatedSite::avg).collect();
        assert_eq!(avgs, vec![Some(40.0), None, Some(60.0)]);

        assert_eq!(table.observed_count(), 2);
        assert_eq!(table.missing_count(), 2);
        Ok(())
    }

    #[test]
    fn test_every_reference_site_once() {
        let reference_sites: Vec<ReferenceSite> = (0..50)
            .map(|i| ReferenceSite {
                start: i * 3,
                end: i * 3 + 2,
            })
            .collect();
        let observed: Vec<ObservedSite> = (0..80)
            .map(|i| ObservedSite {
                start: i * 2,
                end: i * 2 + 2,
                strand: Strand::Positive,
                coverage_total: 10,
                avg: i as f64,
            })
            .collect();

        let annotated = annotate_chromosome(&reference_sites, &observed);

        assert_eq!(annotated.len(), reference_sites.len());
        for (site, reference_site) in annotated.iter().zip(&reference_sites) {
            assert_eq!(site.start, reference_site.start);
            assert_eq!(site.is_observed(), site.start % 2 == 0);
        }
    }

    #[test]
    fn test_empty_reference_after_exclusion() {
        let reference = reference(&[("1", &[100])]);
        let mut exclusions = ExclusionSet::new();
        exclusions.insert("1".to_string(), 100);

        let err = annotate(&reference.without(&exclusions), &SampleSites::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImputeError>(),
            Some(ImputeError::EmptyReferenceAfterFiltering)
        ));
    }

    #[test]
    fn test_empty_exclusion_matches_no_exclusion() -> Result<()> {
        let reference = reference(&[("1", &[100, 200, 300])]);
        let sample = sample(&[("1", &[(100, 40.0), (300, 60.0)])]);

        let plain = annotate(&reference, &sample)?;
        let excluded = annotate(&reference.without(&ExclusionSet::new()), &sample)?;
        assert_eq!(plain, excluded);
        Ok(())
    }
}
