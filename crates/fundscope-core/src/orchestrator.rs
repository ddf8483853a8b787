//! Generic ingestion orchestrator.
//!
//! One control flow serves every source; what differs is the
//! [`IngestionStrategy`] (discoverer, parser, downloader):
//!
//! ```text
//! FreshnessCheck -> Discover -> for each candidate {
//!     Download -> Parse -> FilterMatch
//! } -> Enrich -> Persist -> QA
//! ```
//!
//! A candidate that fails to download, belongs to another series or class, or
//! parses to zero holdings is skipped in favour of the next one. Running out
//! of candidates is a failure, not an error.

use std::sync::Arc;

use fundscope_store::dates::format_date;
use fundscope_store::{SnapshotHandle, SnapshotStore};
use time::{Date, OffsetDateTime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::discovery::{Discoverer, DiscoveryQuery, ReportMetadata};
use crate::domain::{GoldRecord, Holding};
use crate::download::Downloader;
use crate::enrichment::Enricher;
use crate::parsers::{DocumentParser, ParseContext, ParseMetadata};
use crate::qa::{QaGate, QaResult};
use crate::registry::FundRegistryEntry;
use crate::SourceId;

/// The per-source pieces plugged into the shared control flow.
#[derive(Clone)]
pub struct IngestionStrategy {
    pub discoverer: Arc<dyn Discoverer>,
    pub parser: Arc<dyn DocumentParser>,
    pub downloader: Downloader,
    /// Used when the registry entry does not set its own window.
    pub freshness_days: u32,
}

impl IngestionStrategy {
    pub fn source(&self) -> SourceId {
        self.discoverer.source()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Pins discovery to the report closest to this date and skips the
    /// freshness check.
    pub as_of: Option<Date>,
    pub force: bool,
}

impl IngestOptions {
    pub fn forced() -> Self {
        Self {
            as_of: None,
            force: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestionOutcome {
    /// Latest snapshot is inside the freshness window; nothing was fetched.
    Fresh { latest_as_of: Date, age_days: i64 },
    /// A snapshot was written and checked.
    Persisted { snapshot: SnapshotHandle, qa: QaResult },
    NoCandidates,
    /// Every discovered candidate was rejected.
    Exhausted { tried: usize },
    /// The registry entry cannot drive this source.
    Unroutable { reason: String },
    StorageFailed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionReport {
    pub fund_id: String,
    pub source: SourceId,
    pub outcome: IngestionOutcome,
}

impl IngestionReport {
    /// Fresh data counts as success; a new snapshot only if QA passed.
    pub fn success(&self) -> bool {
        match &self.outcome {
            IngestionOutcome::Fresh { .. } => true,
            IngestionOutcome::Persisted { qa, .. } => qa.passed(),
            _ => false,
        }
    }

    pub fn snapshot(&self) -> Option<&SnapshotHandle> {
        match &self.outcome {
            IngestionOutcome::Persisted { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct IngestionPipeline {
    strategy: IngestionStrategy,
    snapshots: SnapshotStore,
    enricher: Arc<Enricher>,
    qa: QaGate,
}

impl IngestionPipeline {
    pub fn new(
        strategy: IngestionStrategy,
        snapshots: SnapshotStore,
        enricher: Arc<Enricher>,
        qa: QaGate,
    ) -> Self {
        Self {
            strategy,
            snapshots,
            enricher,
            qa,
        }
    }

    pub fn source(&self) -> SourceId {
        self.strategy.source()
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub async fn ingest(
        &self,
        entry: &FundRegistryEntry,
        options: IngestOptions,
    ) -> IngestionReport {
        let outcome = self.run(entry, options).await;
        let report = IngestionReport {
            fund_id: entry.fund_id.clone(),
            source: self.source(),
            outcome,
        };
        info!(
            fund_id = %report.fund_id,
            source = %report.source,
            success = report.success(),
            outcome = ?outcome_label(&report.outcome),
            "ingestion finished"
        );
        report
    }

    /// Ingests `entries` with at most `max_concurrency` funds in flight.
    /// Outbound pacing stays per source because every task shares the same
    /// throttled clients. Reports come back sorted by fund id.
    pub async fn ingest_batch(
        &self,
        entries: Vec<FundRegistryEntry>,
        options: IngestOptions,
        max_concurrency: usize,
    ) -> Vec<IngestionReport> {
        let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for entry in entries {
            let pipeline = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                pipeline.ingest(&entry, options).await
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(err) => warn!(source = %self.source(), error = %err, "ingestion task aborted"),
            }
        }
        reports.sort_by(|a, b| a.fund_id.cmp(&b.fund_id));
        reports
    }

    async fn run(&self, entry: &FundRegistryEntry, options: IngestOptions) -> IngestionOutcome {
        let fund_id = entry.fund_id.as_str();
        let fund_root = match self.snapshots.fund_root(fund_id, entry.gold_path.as_deref()) {
            Ok(root) => root,
            Err(err) => {
                return IngestionOutcome::StorageFailed {
                    message: err.to_string(),
                }
            }
        };

        if !options.force && options.as_of.is_none() {
            let window = entry.freshness_days.unwrap_or(self.strategy.freshness_days);
            match self.snapshots.latest_as_of(&fund_root) {
                Ok(Some(latest_as_of)) => {
                    let age_days = (today() - latest_as_of).whole_days();
                    if age_days < i64::from(window) {
                        debug!(fund_id, %latest_as_of, age_days, window, "snapshot still fresh");
                        return IngestionOutcome::Fresh { latest_as_of, age_days };
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(fund_id, error = %err, "could not scan existing snapshots"),
            }
        }

        let query = match self.query_for(entry, options.as_of) {
            Ok(query) => query,
            Err(reason) => return IngestionOutcome::Unroutable { reason },
        };

        let candidates = self.strategy.discoverer.discover(query).await;
        if candidates.is_empty() {
            info!(fund_id, source = %self.source(), "no candidate reports");
            return IngestionOutcome::NoCandidates;
        }
        debug!(fund_id, candidates = candidates.len(), "candidates discovered");

        for (index, report) in candidates.iter().enumerate() {
            let Some((as_of, holdings)) = self.try_candidate(entry, report, index).await else {
                continue;
            };

            let gold = self.enricher.enrich(holdings);
            let records: Vec<GoldRecord> = gold.iter().map(GoldRecord::from).collect();
            let snapshot = match self.snapshots.write_csv(&fund_root, fund_id, as_of, &records) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(fund_id, %as_of, error = %err, "snapshot write failed");
                    return IngestionOutcome::StorageFailed {
                        message: err.to_string(),
                    };
                }
            };

            let qa = self.qa.validate(&gold, fund_id, as_of);
            return IngestionOutcome::Persisted { snapshot, qa };
        }

        warn!(fund_id, tried = candidates.len(), "all candidates rejected");
        IngestionOutcome::Exhausted {
            tried: candidates.len(),
        }
    }

    /// Download, parse and filter one candidate. `None` means "try the next".
    async fn try_candidate(
        &self,
        entry: &FundRegistryEntry,
        report: &ReportMetadata,
        index: usize,
    ) -> Option<(Date, Vec<Holding>)> {
        let fund_id = entry.fund_id.as_str();

        let document = match self.strategy.downloader.download(report, fund_id).await {
            Ok(document) => document,
            Err(err) => {
                warn!(
                    fund_id,
                    candidate = index,
                    url = %report.url,
                    code = err.code(),
                    "download failed, skipping"
                );
                return None;
            }
        };

        let mut context = ParseContext::new(fund_id, report.as_of);
        context.source_url = Some(report.url.clone());
        context.content_hash = Some(document.stored.metadata.sha256.clone());
        let outcome = self.strategy.parser.parse(&document.bytes, &context);

        if let Some(reason) = rejection(entry, &outcome.metadata) {
            info!(fund_id, candidate = index, url = %report.url, reason, "candidate rejected");
            return None;
        }
        if outcome.holdings.is_empty() {
            info!(
                fund_id,
                candidate = index,
                url = %report.url,
                error = outcome.metadata.error.as_deref().unwrap_or("no positions"),
                "candidate yielded no holdings"
            );
            return None;
        }

        let as_of = outcome
            .metadata
            .as_of
            .or_else(|| fundscope_store::layout::as_of_from_path(&document.stored.path))
            .unwrap_or(report.as_of);
        let holdings = outcome
            .holdings
            .into_iter()
            .map(|mut holding| {
                holding.as_of = as_of;
                holding
            })
            .collect();

        debug!(
            fund_id,
            candidate = index,
            as_of = %format_date(as_of),
            positions = outcome.metadata.n_holdings,
            "candidate accepted"
        );
        Some((as_of, holdings))
    }

    fn query_for(
        &self,
        entry: &FundRegistryEntry,
        target: Option<Date>,
    ) -> Result<DiscoveryQuery, String> {
        let mut query = DiscoveryQuery::new(entry.fund_id.clone())
            .with_target_date(target)
            .with_series(entry.series_id.clone(), entry.class_id.clone());
        query.jurisdiction = entry.jurisdiction();

        if let Some(cik) = entry.parsed_cik() {
            query = query.with_cik(cik);
        }
        if let Some(isin) = entry.parsed_isin() {
            query = query.with_isin(isin);
        }

        match self.source() {
            SourceId::Nport if query.cik.is_none() => Err(String::from("entry has no valid cik")),
            SourceId::Oam | SourceId::Bdif if query.isin.is_none() => {
                Err(String::from("entry has no valid isin"))
            }
            _ => Ok(query),
        }
    }
}

/// Why a parsed document does not belong to the registry entry.
fn rejection(entry: &FundRegistryEntry, metadata: &ParseMetadata) -> Option<&'static str> {
    match (entry.series_id.as_deref(), metadata.series_id.as_deref()) {
        (Some(expected), Some(found)) if !expected.eq_ignore_ascii_case(found) => {
            return Some("series mismatch");
        }
        (Some(expected), None) => {
            debug!(
                fund_id = %entry.fund_id,
                expected_series = expected,
                "document names no series, series filter skipped"
            );
        }
        _ => {}
    }
    if let Some(expected) = entry.class_id.as_deref() {
        let listed = !metadata.class_ids.is_empty();
        if listed && !metadata.class_ids.iter().any(|class| class.eq_ignore_ascii_case(expected)) {
            return Some("class mismatch");
        }
    }
    None
}

fn outcome_label(outcome: &IngestionOutcome) -> &'static str {
    match outcome {
        IngestionOutcome::Fresh { .. } => "fresh",
        IngestionOutcome::Persisted { .. } => "persisted",
        IngestionOutcome::NoCandidates => "no_candidates",
        IngestionOutcome::Exhausted { .. } => "exhausted",
        IngestionOutcome::Unroutable { .. } => "unroutable",
        IngestionOutcome::StorageFailed { .. } => "storage_failed",
    }
}

pub(crate) fn today() -> Date {
    OffsetDateTime::now_utc().date()
}
