mod chromosome;
pub mod strand;

pub use chromosome::normalize_chromosome;
pub use strand::Strand;

/// Join key shared by every stage: normalized chromosome name and 0-based start.
pub type SiteKey = (String, u64);

pub fn site_key(chromosome: &str, start: u64) -> SiteKey {
    (normalize_chromosome(chromosome), start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_key_normalizes_chromosome() {
        assert_eq!(site_key("chr1", 100), ("1".to_string(), 100));
        assert_eq!(site_key("CHRX", 5), ("X".to_string(), 5));
        assert_eq!(site_key("2", 7), ("2".to_string(), 7));
    }
}
