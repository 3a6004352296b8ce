use regex::Regex;
use std::sync::OnceLock;

fn chr_prefix() -> &'static Regex {
    static CHR_PREFIX: OnceLock<Regex> = OnceLock::new();
    CHR_PREFIX.get_or_init(|| Regex::new(r"(?i)^chr").expect("Expected regex pattern"))
}

/// Strips a leading, case-insensitive `chr` token so that `chr1`, `Chr1` and
/// `1` all join against each other.
pub fn normalize_chromosome(name: &str) -> String {
    chr_prefix().replace(name.trim(), "").into_owned()
}
