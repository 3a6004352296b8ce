use serde::de::{self, Deserialize, Deserializer};
use std::{fmt::Display, str::FromStr};

use anyhow::bail;

/// Strand of a methylation call. `Both` marks a CpG whose plus and minus
/// strand calls were merged into one observation.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
pub enum Strand {
    Positive,
    Negative,
    Both,
}

impl Strand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strand::Positive => "+",
            Strand::Negative => "-",
            Strand::Both => "+/-",
        }
    }
}

impl Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Strand {
    type Err = anyhow::Error;

    fn from_str(strand: &str) -> anyhow::Result<Self> {
        match strand.trim() {
            "+" => Ok(Strand::Positive),
            "-" => Ok(Strand::Negative),
            "+/-" | "-/+" => Ok(Strand::Both),
            _ => bail!("Could not parse '{}' to Strand", strand),
        }
    }
}

impl<'de> Deserialize<'de> for Strand {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        Strand::from_str(&s).map_err(|e| de::Error::custom(e.to_string()))
    }
}
