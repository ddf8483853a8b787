use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Validation errors for identifiers and user-supplied values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("identifier cannot be empty")]
    EmptyIdentifier,
    #[error("ISIN must be 12 characters, got {len}: '{value}'")]
    IsinLength { value: String, len: usize },
    #[error("ISIN must start with a two-letter country code: '{value}'")]
    IsinCountry { value: String },
    #[error("ISIN contains invalid character '{ch}' at index {index}")]
    IsinInvalidChar { ch: char, index: usize },
    #[error("CIK must be 1 to 10 digits: '{value}'")]
    InvalidCik { value: String },
    #[error("as_of must be YYYY-MM-DD: '{value}'")]
    InvalidDate { value: String },
    #[error("invalid source '{value}', expected one of nport, oam, bdif, metadata")]
    InvalidSource { value: String },
    #[error("invalid asset type '{value}', expected etf or stock")]
    InvalidAssetType { value: String },
}

/// The only errors surfaced to callers of the resolution façade.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HoldingsError {
    /// Identifier is not present in the fund registry.
    #[error("fund '{identifier}' is not registered")]
    NotRegistered { identifier: String },

    /// Fund is registered but no snapshot exists, even after the fallback ran.
    #[error("no holdings snapshot available for '{fund_id}'{}", as_of_suffix(.as_of))]
    NoSnapshotAvailable {
        fund_id: String,
        as_of: Option<String>,
    },

    /// Unparseable `as_of`, unsupported snapshot format or unreadable file.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Snapshot lacks usable weight and market-value columns.
    #[error("partial data: {0}")]
    PartialData(String),
}

fn as_of_suffix(as_of: &Option<String>) -> String {
    as_of
        .as_deref()
        .map(|date| format!(" as of {date}"))
        .unwrap_or_default()
}

impl From<ValidationError> for HoldingsError {
    fn from(value: ValidationError) -> Self {
        Self::MalformedInput(value.to_string())
    }
}

impl From<fundscope_store::StoreError> for HoldingsError {
    fn from(value: fundscope_store::StoreError) -> Self {
        Self::MalformedInput(value.to_string())
    }
}

/// Classification of discovery/download failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Unavailable,
    NotFound,
    RateLimited,
    InvalidResponse,
    Unauthorized,
    Storage,
}

/// Network or source failure. Recovered locally by retries, then downgraded
/// to "nothing found"; never returned from the façade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::NotFound,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidResponse,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unauthorized,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Storage,
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps an HTTP status to an error, or `None` for 2xx.
    pub fn from_status(status: u16, url: &str) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(Self::unauthorized(format!("{url} returned {status}"))),
            404 | 410 => Some(Self::not_found(format!("{url} returned {status}"))),
            408 => Some(Self::unavailable(format!("{url} timed out ({status})"))),
            429 => Some(Self::rate_limited(format!("{url} rate limited ({status})"))),
            500..=599 => Some(Self::unavailable(format!("{url} returned {status}"))),
            _ => Some(Self {
                kind: SourceErrorKind::InvalidResponse,
                message: format!("{url} returned {status}"),
                retryable: false,
            }),
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidResponse => "source.invalid_response",
            SourceErrorKind::Unauthorized => "source.unauthorized",
            SourceErrorKind::Storage => "source.storage",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_but_not_found_is_not() {
        let server = SourceError::from_status(503, "https://x.test").expect("error");
        let missing = SourceError::from_status(404, "https://x.test").expect("error");

        assert!(server.retryable());
        assert_eq!(server.code(), "source.unavailable");
        assert!(!missing.retryable());
        assert!(SourceError::from_status(200, "https://x.test").is_none());
    }

    #[test]
    fn no_snapshot_message_mentions_requested_date() {
        let err = HoldingsError::NoSnapshotAvailable {
            fund_id: "SPY".into(),
            as_of: Some("2024-03-31".into()),
        };
        assert_eq!(err.to_string(), "no holdings snapshot available for 'SPY' as of 2024-03-31");
    }
}
