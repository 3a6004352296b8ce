use crate::processing::reference_diff::AnnotatedSite;

/// Nearest observed site on one side of a reference site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub start: u64,
    pub meth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborFeatures {
    pub start: u64,
    pub backward: Option<Neighbor>,
    pub forward: Option<Neighbor>,
}

/// Two-sided context of a site: gap to and methylation of both neighbors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flanks {
    pub b_dist: u64,
    pub f_dist: u64,
    pub b_meth: f64,
    pub f_meth: f64,
}

impl Flanks {
    pub fn total_distance(&self) -> u64 {
        self.b_dist + self.f_dist
    }
}

impl NeighborFeatures {
    pub fn b_dist(&self) -> Option<u64> {
        self.backward.map(|b| self.start - b.start)
    }

    pub fn f_dist(&self) -> Option<u64> {
        self.forward.map(|f| f.start - self.start)
    }

    /// `None` at chromosome boundaries, where one side has no observed site.
    pub fn flanks(&self) -> Option<Flanks> {
        Some(Flanks {
            b_dist: self.b_dist()?,
            f_dist: self.f_dist()?,
            b_meth: self.backward?.meth,
            f_meth: self.forward?.meth,
        })
    }
}

/// For every site of one chromosome (sorted by start), finds the closest
/// observed site strictly before and strictly after it. A forward pass
/// carries the last observation, a backward pass carries the next one.
pub fn build_neighbor_features(sites: &[AnnotatedSite]) -> Vec<NeighborFeatures> {
    let mut features: Vec<NeighborFeatures> = Vec::with_capacity(sites.len());

    let mut last: Option<Neighbor> = None;
    for site in sites {
        features.push(NeighborFeatures {
            start: site.start,
            backward: last,
            forward: None,
        });
        if let Some(avg) = site.avg() {
            last = Some(Neighbor {
                start: site.start,
                meth: avg,
            });
        }
    }

    let mut next: Option<Neighbor> = None;
    for (site, feature) in sites.iter().zip(features.iter_mut()).rev() {
        feature.forward = next;
        if let Some(avg) = site.avg() {
            next = Some(Neighbor {
                start: site.start,
                meth: avg,
            });
        }
    }

    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::reference_diff::Observation;
    use methylome::Strand;

    fn site(start: u64, avg: Option<f64>) -> AnnotatedSite {
        AnnotatedSite {
            start,
            end: start + 2,
            observed: avg.map(|avg| Observation {
                avg,
                strand: Strand::Both,
            }),
        }
    }

    #[test]
    fn test_missing_site_between_two_observations() {
        let sites = vec![site(100, Some(40.0)), site(200, None), site(300, Some(60.0))];
        let features = build_neighbor_features(&sites);

        let flanks = features[1].flanks().unwrap();
        assert_eq!(
            flanks,
            Flanks {
                b_dist: 100,
                f_dist: 100,
                b_meth: 40.0,
                f_meth: 60.0
            }
        );
    }

    #[test]
    fn test_boundaries_have_no_flanks() {
        let sites = vec![site(100, Some(40.0)), site(200, None), site(300, Some(60.0))];
        let features = build_neighbor_features(&sites);

        assert_eq!(features[0].backward, None);
        assert_eq!(features[0].f_dist(), Some(200));
        assert!(features[0].flanks().is_none());

        assert_eq!(features[2].forward, None);
        assert_eq!(features[2].b_dist(), Some(200));
        assert!(features[2].flanks().is_none());
    }

    #[test]
    fn test_observed_site_does_not_neighbor_itself() {
        let sites = vec![
            site(10, Some(10.0)),
            site(20, Some(20.0)),
            site(25, None),
            site(40, Some(40.0)),
        ];
        let features = build_neighbor_features(&sites);

        let flanks = features[1].flanks().unwrap();
        assert_eq!(flanks.b_dist, 10);
        assert_eq!(flanks.b_meth, 10.0);
        assert_eq!(flanks.f_dist, 20);
        assert_eq!(flanks.f_meth, 40.0);
    }

    #[test]
    fn test_distances_are_non_negative_and_ordered() {
        let sites: Vec<AnnotatedSite> = (0..200u64)
            .map(|i| {
                let observed = (i * 7919) % 5 < 2;
                site(i * 13 + (i % 3), observed.then_some((i % 101) as f64))
            })
            .collect();
        let features = build_neighbor_features(&sites);

        for feature in &features {
            if let Some(flanks) = feature.flanks() {
                let b_start = feature.backward.unwrap().start;
                let f_start = feature.forward.unwrap().start;
                assert!(b_start <= feature.start && feature.start <= f_start);
                assert!(flanks.b_dist > 0 && flanks.f_dist > 0);
            }
        }
    }

    #[test]
    fn test_no_observations() {
        let sites = vec![site(1, None), site(2, None)];
        let features = build_neighbor_features(&sites);
        assert!(features.iter().all(|f| f.backward.is_none() && f.forward.is_none()));
    }
}
