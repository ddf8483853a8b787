use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream sources the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// SEC EDGAR N-PORT filings.
    Nport,
    /// Luxembourg / German officially appointed mechanisms.
    Oam,
    /// French AMF disclosure database.
    Bdif,
    /// General market-data provider used by the fallback synthesizer.
    Metadata,
}

impl SourceId {
    pub const ALL: [Self; 4] = [Self::Nport, Self::Oam, Self::Bdif, Self::Metadata];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nport => "nport",
            Self::Oam => "oam",
            Self::Bdif => "bdif",
            Self::Metadata => "metadata",
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nport" | "n-port" | "sec" => Ok(Self::Nport),
            "oam" | "luxse" | "bundesanzeiger" => Ok(Self::Oam),
            "bdif" | "amf" => Ok(Self::Bdif),
            "metadata" | "metadata-provider" | "yfinance" => Ok(Self::Metadata),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("N-PORT".parse::<SourceId>(), Ok(SourceId::Nport));
        assert_eq!("LuxSE".parse::<SourceId>(), Ok(SourceId::Oam));
        assert_eq!("metadata-provider".parse::<SourceId>(), Ok(SourceId::Metadata));
        assert!("ftp".parse::<SourceId>().is_err());
    }
}
