use anyhow::{bail, Result};

/// Read coverage and methylation level of one call, validated on construction.
#[derive(Debug, Clone, PartialEq, Copy)]
pub struct MethylationCall {
    coverage: u32,
    percent_methylated: f64,
}

impl MethylationCall {
    pub fn new(coverage: u32, percent_methylated: f64) -> Result<Self> {
        if !percent_methylated.is_finite() || !(0.0..=100.0).contains(&percent_methylated) {
            bail!(
                "Invalid methylation: percent_methylated ({}) must be within [0, 100]",
                percent_methylated
            )
        }

        Ok(Self {
            coverage,
            percent_methylated,
        })
    }

    pub fn coverage(&self) -> u32 {
        self.coverage
    }

    pub fn percent_methylated(&self) -> f64 {
        self.percent_methylated
    }

    /// Number of methylated reads implied by the call, used as the weight
    /// when strands are merged.
    pub fn methylated_weight(&self) -> f64 {
        self.coverage as f64 * self.percent_methylated
    }
}
