use std::time::Duration;

use crate::retry::{Backoff, RetryConfig};
use crate::SourceId;

/// Per-source request discipline: pacing, timeout, retries and how stale a
/// persisted snapshot may get before the source is asked again.
#[derive(Debug, Clone)]
pub struct SourcePolicy {
    pub source: SourceId,
    /// Minimum spacing between two outbound calls to this source.
    pub min_interval: Duration,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub freshness_days: u32,
}

impl SourcePolicy {
    pub fn nport_default() -> Self {
        Self {
            source: SourceId::Nport,
            min_interval: Duration::from_millis(150),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::exponential(3),
            freshness_days: 30,
        }
    }

    pub fn oam_default() -> Self {
        Self {
            source: SourceId::Oam,
            min_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::exponential(3),
            freshness_days: 210,
        }
    }

    pub fn bdif_default() -> Self {
        Self {
            source: SourceId::Bdif,
            min_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::exponential(3),
            freshness_days: 185,
        }
    }

    pub fn metadata_default() -> Self {
        Self {
            source: SourceId::Metadata,
            min_interval: Duration::from_millis(250),
            request_timeout: Duration::from_secs(15),
            retry: RetryConfig::exponential(3),
            freshness_days: 30,
        }
    }

    pub fn default_for(source: SourceId) -> Self {
        match source {
            SourceId::Nport => Self::nport_default(),
            SourceId::Oam => Self::oam_default(),
            SourceId::Bdif => Self::bdif_default(),
            SourceId::Metadata => Self::metadata_default(),
        }
    }

    /// Downloads back off linearly (`2s * attempt`), three attempts in total.
    pub fn download_retry(&self) -> RetryConfig {
        RetryConfig {
            backoff: Backoff::Linear {
                step: Duration::from_secs(2),
                max: Duration::from_secs(6),
            },
            ..self.retry.clone()
        }
    }

    /// Policy with no pacing and no retry delays, for hermetic tests.
    pub fn immediate(source: SourceId) -> Self {
        Self {
            min_interval: Duration::from_millis(1),
            retry: RetryConfig::fixed(Duration::ZERO, 3),
            ..Self::default_for(source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sec_pacing_stays_within_fair_access_limits() {
        let policy = SourcePolicy::nport_default();

        assert_eq!(policy.source, SourceId::Nport);
        assert!(policy.min_interval >= Duration::from_millis(100));
        assert_eq!(policy.retry.max_attempts, 3);
        assert_eq!(policy.freshness_days, 30);
    }

    #[test]
    fn european_sources_default_to_semiannual_freshness() {
        assert_eq!(SourcePolicy::oam_default().freshness_days, 210);
        assert_eq!(SourcePolicy::bdif_default().freshness_days, 185);
        assert!(SourcePolicy::bdif_default().min_interval <= Duration::from_millis(500));
    }

    #[test]
    fn download_retry_is_linear_in_attempts() {
        let retry = SourcePolicy::nport_default().download_retry();

        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(5), Duration::from_secs(6));
    }
}
