//! Candidate report discovery.
//!
//! Each adapter answers "which documents could hold this fund's holdings?".
//! Adapters never fail: network errors are retried inside the transport and,
//! once retries are exhausted, logged and reported as an empty list.
//!
//! | Adapter | Source |
//! |---------|--------|
//! | [`NportDiscoverer`] | SEC EDGAR submissions + filing manifests |
//! | [`OamDiscoverer`] | LuxSE OAM search (LU), Bundesanzeiger (DE) |
//! | [`BdifDiscoverer`] | AMF open-data search API (FR) |

pub mod bdif;
pub mod nport;
pub mod oam;

use std::cmp::Reverse;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use time::Date;

use crate::domain::{Cik, Isin};
use crate::SourceId;

pub use bdif::BdifDiscoverer;
pub use nport::{MutualFundTicker, NportDiscoverer};
pub use oam::OamDiscoverer;

pub type DiscoveryFuture<'a> = Pin<Box<dyn Future<Output = Vec<ReportMetadata>> + Send + 'a>>;

/// Everything the registry knows that helps locate a fund's reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryQuery {
    pub fund_id: String,
    pub cik: Option<Cik>,
    pub isin: Option<Isin>,
    pub target_date: Option<Date>,
    pub series_id: Option<String>,
    pub class_id: Option<String>,
    /// Two-letter jurisdiction; defaults to the ISIN prefix.
    pub jurisdiction: Option<String>,
}

impl DiscoveryQuery {
    pub fn new(fund_id: impl Into<String>) -> Self {
        Self {
            fund_id: fund_id.into(),
            ..Self::default()
        }
    }

    pub fn with_cik(mut self, cik: Cik) -> Self {
        self.cik = Some(cik);
        self
    }

    pub fn with_isin(mut self, isin: Isin) -> Self {
        self.isin = Some(isin);
        self
    }

    pub fn with_target_date(mut self, target_date: Option<Date>) -> Self {
        self.target_date = target_date;
        self
    }

    pub fn with_series(mut self, series_id: Option<String>, class_id: Option<String>) -> Self {
        self.series_id = series_id;
        self.class_id = class_id;
        self
    }

    pub fn jurisdiction(&self) -> Option<String> {
        self.jurisdiction
            .as_deref()
            .map(str::to_ascii_uppercase)
            .or_else(|| self.isin.as_ref().map(|isin| isin.country_code().to_owned()))
    }
}

/// One candidate document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMetadata {
    pub url: String,
    /// Reporting date when known from the listing, else the filing date.
    pub as_of: Date,
    pub record_id: Option<String>,
    pub doc_type: String,
    pub title: Option<String>,
    /// Registry filters carried along for the orchestrator to check against
    /// what the parser finds inside the document.
    pub series_id: Option<String>,
    pub class_id: Option<String>,
}

impl ReportMetadata {
    pub fn new(url: impl Into<String>, as_of: Date, doc_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            as_of,
            record_id: None,
            doc_type: doc_type.into(),
            title: None,
            series_id: None,
            class_id: None,
        }
    }
}

/// Finds candidate documents for one fund.
pub trait Discoverer: Send + Sync {
    fn source(&self) -> SourceId;

    fn discover<'a>(&'a self, query: DiscoveryQuery) -> DiscoveryFuture<'a>;
}

/// Closest to `target` first (ties: most recent), or most recent first.
pub fn rank(mut reports: Vec<ReportMetadata>, target: Option<Date>) -> Vec<ReportMetadata> {
    match target {
        Some(target) => reports.sort_by_key(|report| {
            ((report.as_of - target).whole_days().abs(), Reverse(report.as_of))
        }),
        None => reports.sort_by_key(|report| Reverse(report.as_of)),
    }
    reports
}

/// Keeps the first report for each URL.
pub fn dedupe_by_url(reports: Vec<ReportMetadata>) -> Vec<ReportMetadata> {
    let mut seen = HashSet::new();
    reports
        .into_iter()
        .filter(|report| seen.insert(report.url.clone()))
        .collect()
}
