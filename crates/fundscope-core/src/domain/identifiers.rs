use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const ISIN_LEN: usize = 12;
const CIK_MAX_DIGITS: usize = 10;

/// International Securities Identification Number, normalized to uppercase.
///
/// Only the structure is checked (two-letter prefix, nine alphanumerics and a
/// trailing character); the check digit is not verified because upstream
/// documents occasionally carry placeholder identifiers that are still useful
/// for grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Isin(String);

impl Isin {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized: String = input
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(ValidationError::EmptyIdentifier);
        }

        let len = normalized.chars().count();
        if len != ISIN_LEN {
            return Err(ValidationError::IsinLength {
                value: normalized,
                len,
            });
        }

        if !normalized.chars().take(2).all(|ch| ch.is_ascii_alphabetic()) {
            return Err(ValidationError::IsinCountry { value: normalized });
        }

        for (index, ch) in normalized.chars().enumerate() {
            if !ch.is_ascii_alphanumeric() {
                return Err(ValidationError::IsinInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    /// Cheap shape test used when an identifier could be a ticker or an ISIN.
    pub fn looks_like(input: &str) -> bool {
        Self::parse(input).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-letter country prefix (`US`, `LU`, `FR`, ...).
    pub fn country_code(&self) -> &str {
        &self.0[..2]
    }
}

impl Display for Isin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Isin {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Isin> for String {
    fn from(value: Isin) -> Self {
        value.0
    }
}

/// SEC Central Index Key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cik(u64);

impl Cik {
    /// Accepts `"884394"`, `"0000884394"` or `"CIK0000884394"`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("CIK")
            .or_else(|| trimmed.strip_prefix("cik"))
            .unwrap_or(trimmed);

        let valid = !digits.is_empty()
            && digits.len() <= CIK_MAX_DIGITS
            && digits.chars().all(|ch| ch.is_ascii_digit());
        if !valid {
            return Err(ValidationError::InvalidCik {
                value: input.to_owned(),
            });
        }

        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ValidationError::InvalidCik {
                value: input.to_owned(),
            })
    }

    /// Zero-padded to ten digits, as used by the submissions API.
    pub fn padded(self) -> String {
        format!("{:010}", self.0)
    }

    /// Without leading zeros, as used in archive paths.
    pub fn unpadded(self) -> String {
        self.0.to_string()
    }
}

impl Display for Cik {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.padded())
    }
}
