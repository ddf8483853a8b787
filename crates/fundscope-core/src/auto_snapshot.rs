//! Last-resort snapshot creation for funds with nothing on disk.
//!
//! Funds with a CIK get a forced N-PORT ingestion. Funds routed to the
//! metadata provider get a snapshot synthesized from the provider's published
//! top holdings, or from the registry's `fallback_holdings` when the provider
//! has none.

use std::sync::Arc;

use fundscope_store::SnapshotStore;
use time::Date;
use tracing::{debug, info, warn};

use crate::domain::{AssetClass, GoldHolding, GoldRecord, Holding};
use crate::enrichment::{normalize_country, ENRICHMENT_VERSION, UNKNOWN};
use crate::metadata_provider::{MetadataProvider, ProviderHolding};
use crate::orchestrator::{today, IngestOptions, IngestionPipeline};
use crate::registry::FundRegistryEntry;
use crate::SourceId;

/// Constituents looked up individually for country and sector.
pub const DEFAULT_ENRICH_LIMIT: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSnapshotResult {
    pub success: bool,
    pub message: String,
}

impl AutoSnapshotResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A synthesized row before it becomes a gold record.
#[derive(Debug, Clone, PartialEq)]
struct SynthRow {
    symbol: String,
    name: String,
    isin: Option<String>,
    weight: f64,
    country: String,
    sector: String,
    asset_class: AssetClass,
}

#[derive(Clone)]
pub struct AutoSnapshot {
    snapshots: SnapshotStore,
    provider: Arc<dyn MetadataProvider>,
    nport: Option<IngestionPipeline>,
    enrich_limit: usize,
}

impl AutoSnapshot {
    pub fn new(snapshots: SnapshotStore, provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            snapshots,
            provider,
            nport: None,
            enrich_limit: DEFAULT_ENRICH_LIMIT,
        }
    }

    pub fn with_nport(mut self, pipeline: IngestionPipeline) -> Self {
        self.nport = Some(pipeline);
        self
    }

    pub fn with_enrich_limit(mut self, limit: usize) -> Self {
        self.enrich_limit = limit;
        self
    }

    pub async fn ensure_snapshot(
        &self,
        entry: &FundRegistryEntry,
        as_of_override: Option<Date>,
    ) -> AutoSnapshotResult {
        if entry.fund_id.trim().is_empty() {
            return AutoSnapshotResult::failed("Missing fund_id");
        }
        info!(fund_id = %entry.fund_id, "auto-snapshot requested");

        if entry.parsed_cik().is_some() {
            return self.ingest_from_sec(entry, as_of_override).await;
        }

        let routed_to_provider = entry
            .auto_source
            .as_deref()
            .and_then(|source| source.parse::<SourceId>().ok())
            == Some(SourceId::Metadata);
        if routed_to_provider {
            return self.synthesize(entry, as_of_override).await;
        }

        warn!(fund_id = %entry.fund_id, "no automatic snapshot source configured");
        AutoSnapshotResult::failed("No automatic snapshot source configured")
    }

    async fn ingest_from_sec(
        &self,
        entry: &FundRegistryEntry,
        as_of: Option<Date>,
    ) -> AutoSnapshotResult {
        let Some(pipeline) = &self.nport else {
            return AutoSnapshotResult::failed("N-PORT ingestion is not configured");
        };

        let report = pipeline
            .ingest(entry, IngestOptions { as_of, force: true })
            .await;
        if report.success() {
            AutoSnapshotResult::ok("Ingestion run completed")
        } else {
            AutoSnapshotResult::failed("Ingestion failed")
        }
    }

    async fn synthesize(
        &self,
        entry: &FundRegistryEntry,
        as_of: Option<Date>,
    ) -> AutoSnapshotResult {
        let Some(symbol) = entry.primary_ticker() else {
            return AutoSnapshotResult::failed("No ticker defined for metadata snapshot");
        };

        let published = match self.provider.top_holdings(symbol).await {
            Ok(holdings) => holdings,
            Err(err) => {
                warn!(
                    fund_id = %entry.fund_id,
                    symbol,
                    code = err.code(),
                    "top holdings lookup failed"
                );
                Vec::new()
            }
        };

        let rows = if published.iter().any(|holding| holding.weight.is_some()) {
            let mut rows = rows_from_provider(&published);
            self.enrich_rows(&mut rows).await;
            rows
        } else {
            debug!(fund_id = %entry.fund_id, "provider has no holdings, trying registry fallback");
            rows_from_fallback(entry)
        };
        if rows.is_empty() {
            return AutoSnapshotResult::failed(
                "No holdings data available from provider or fallback",
            );
        }

        let as_of = as_of.unwrap_or_else(today);
        let records: Vec<GoldRecord> = rows
            .into_iter()
            .map(|row| GoldRecord::from(&gold_from_row(&entry.fund_id, as_of, row)))
            .collect();

        let written = self
            .snapshots
            .fund_root(&entry.fund_id, entry.gold_path.as_deref())
            .and_then(|root| self.snapshots.write_csv(&root, &entry.fund_id, as_of, &records));
        match written {
            Ok(snapshot) => {
                info!(
                    fund_id = %entry.fund_id,
                    %as_of,
                    version = snapshot.version,
                    rows = records.len(),
                    "synthesized snapshot written"
                );
                AutoSnapshotResult::ok("Metadata snapshot created")
            }
            Err(err) => {
                warn!(fund_id = %entry.fund_id, error = %err, "synthesized snapshot write failed");
                AutoSnapshotResult::failed("Failed to write snapshot")
            }
        }
    }

    /// Per-constituent profile lookups, capped at `enrich_limit` rows.
    async fn enrich_rows(&self, rows: &mut [SynthRow]) {
        let limit = self.enrich_limit.min(rows.len());
        for row in rows.iter_mut().take(limit) {
            let profile = match self.provider.instrument_profile(&row.symbol).await {
                Ok(Some(profile)) => profile,
                Ok(None) => continue,
                Err(err) => {
                    debug!(
                        symbol = %row.symbol,
                        code = err.code(),
                        "constituent profile unavailable"
                    );
                    continue;
                }
            };
            if profile.country.is_some() {
                row.country = normalize_country(profile.country.as_deref(), row.isin.as_deref());
            }
            if let Some(sector) = profile.sector.filter(|sector| !sector.trim().is_empty()) {
                row.sector = sector;
            }
        }
    }
}

/// Fractions summing to 1.0. Values above 1 are taken as percentages; a
/// zero total falls back to equal weights.
pub fn normalize_weights(raw: &[Option<f64>]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }

    let values: Vec<f64> = raw
        .iter()
        .map(|value| value.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0))
        .collect();
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    let scaled: Vec<f64> = if max > 1.0 {
        values.iter().map(|value| value / 100.0).collect()
    } else {
        values
    };

    let total: f64 = scaled.iter().sum();
    if total <= 0.0 {
        let equal = 1.0 / raw.len() as f64;
        return vec![equal; raw.len()];
    }
    scaled.iter().map(|value| value / total).collect()
}

fn rows_from_provider(published: &[ProviderHolding]) -> Vec<SynthRow> {
    let published_weights: Vec<_> = published.iter().map(|holding| holding.weight).collect();
    let weights = normalize_weights(&published_weights);

    published
        .iter()
        .zip(weights)
        .filter_map(|(holding, weight)| {
            let symbol = holding
                .symbol
                .clone()
                .or_else(|| holding.name.clone())
                .filter(|symbol| !symbol.trim().is_empty())?;
            Some(SynthRow {
                name: holding.name.clone().unwrap_or_else(|| symbol.clone()),
                symbol,
                isin: None,
                weight,
                country: String::from(UNKNOWN),
                sector: String::from(UNKNOWN),
                asset_class: AssetClass::Equity,
            })
        })
        .collect()
}

fn rows_from_fallback(entry: &FundRegistryEntry) -> Vec<SynthRow> {
    let usable: Vec<_> = entry
        .fallback_holdings
        .iter()
        .filter(|holding| !holding.symbol.trim().is_empty())
        .collect();
    let fallback_weights: Vec<_> = usable.iter().map(|holding| Some(holding.weight)).collect();
    let weights = normalize_weights(&fallback_weights);

    usable
        .into_iter()
        .zip(weights)
        .map(|(holding, weight)| SynthRow {
            symbol: holding.symbol.clone(),
            name: holding.name.clone().unwrap_or_else(|| holding.symbol.clone()),
            isin: holding.isin.clone(),
            weight,
            country: normalize_country(holding.country.as_deref(), holding.isin.as_deref()),
            sector: holding.sector.clone().unwrap_or_else(|| String::from(UNKNOWN)),
            asset_class: holding
                .asset_class
                .as_deref()
                .and_then(|class| class.parse().ok())
                .unwrap_or(AssetClass::Equity),
        })
        .collect()
}

fn gold_from_row(fund_id: &str, as_of: Date, row: SynthRow) -> GoldHolding {
    let mut holding = Holding::new(fund_id, as_of, row.name);
    holding.ticker = Some(row.symbol);
    holding.isin = row.isin;
    holding.reported_weight_pct = Some(row.weight * 100.0);

    GoldHolding {
        holding,
        weight_pct: row.weight * 100.0,
        country: row.country,
        asset_class: row.asset_class,
        sector: row.sector,
        enrichment_version: ENRICHMENT_VERSION,
    }
}
