use methylome::Strand;
use serde::de::IgnoredAny;
use serde::Deserialize;

/// One row of a per-sample coverage file, deserialized by column position.
#[derive(Debug, Deserialize)]
pub struct CoverageRecord {
    // 0
    pub chromosome: String,

    // 1
    pub start: u64,

    // 2
    pub end: u64,

    // 3
    _name: IgnoredAny,

    // 4
    _score: IgnoredAny,

    // 5
    pub strand: Strand,

    // 6
    _thick_start: IgnoredAny,

    // 7
    _thick_end: IgnoredAny,

    // 8
    _color: IgnoredAny,

    // 9
    pub coverage: u32,

    // 10
    pub percent_methylated: f64,
}
