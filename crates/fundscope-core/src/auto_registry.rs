//! Registers funds on first sight and routes them to a holdings source.
//!
//! | Domicile | Route |
//! |----------|-------|
//! | US with a CIK | N-PORT |
//! | LU, DE | OAM, metadata provider as fallback |
//! | FR | BDIF (holdings only), metadata provider for registration |
//! | anything else | metadata provider |

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auto_snapshot::AutoSnapshot;
use crate::discovery::NportDiscoverer;
use crate::domain::Isin;
use crate::metadata_provider::MetadataProvider;
use crate::orchestrator::{IngestOptions, IngestionPipeline};
use crate::registry::{FundRegistry, FundRegistryEntry, RegistryError, RegistryStore};
use crate::{SourceId, ValidationError};

pub const METADATA_AUTO_SOURCE: &str = "metadata-provider";

const NPORT_FRESHNESS_DAYS: u32 = 30;
const OAM_FRESHNESS_DAYS: u32 = 210;
const PROVIDER_FRESHNESS_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetType {
    Etf,
    Stock,
}

impl FromStr for AssetType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "etf" | "fund" | "mutualfund" => Ok(Self::Etf),
            "stock" | "equity" => Ok(Self::Stock),
            _ => Err(ValidationError::InvalidAssetType {
                value: value.to_owned(),
            }),
        }
    }
}

/// Which orchestrator can fetch primary holdings for `entry`.
pub fn holdings_route(entry: &FundRegistryEntry) -> Option<SourceId> {
    let jurisdiction = entry.jurisdiction()?;
    match jurisdiction.as_str() {
        "US" if entry.parsed_cik().is_some() => Some(SourceId::Nport),
        "LU" | "DE" if entry.parsed_isin().is_some() => Some(SourceId::Oam),
        "FR" if entry.parsed_isin().is_some() => Some(SourceId::Bdif),
        _ => None,
    }
}

pub struct AutoRegistry {
    registry: RegistryStore,
    provider: Arc<dyn MetadataProvider>,
    sec: Option<NportDiscoverer>,
    pipelines: BTreeMap<SourceId, IngestionPipeline>,
    auto_snapshot: Option<AutoSnapshot>,
}

impl AutoRegistry {
    pub fn new(registry: RegistryStore, provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            registry,
            provider,
            sec: None,
            pipelines: BTreeMap::new(),
            auto_snapshot: None,
        }
    }

    /// Enables ticker to CIK resolution for US funds.
    pub fn with_sec_lookup(mut self, discoverer: NportDiscoverer) -> Self {
        self.sec = Some(discoverer);
        self
    }

    pub fn with_pipeline(mut self, pipeline: IngestionPipeline) -> Self {
        self.pipelines.insert(pipeline.source(), pipeline);
        self
    }

    pub fn with_auto_snapshot(mut self, auto_snapshot: AutoSnapshot) -> Self {
        self.auto_snapshot = Some(auto_snapshot);
        self
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    /// Returns the fund id the identifiers resolve to, registering the fund
    /// when it is an ETF not yet in the registry. Non-fund assets are never
    /// registered; their own identifier is returned.
    pub async fn ensure_fund_registered(
        &self,
        isin: Option<&str>,
        ticker: Option<&str>,
        asset_type: Option<AssetType>,
    ) -> Result<Option<String>, RegistryError> {
        let isin = clean(isin);
        let ticker = clean(ticker);
        if isin.is_none() && ticker.is_none() {
            return Ok(None);
        }
        let fallback_id = ticker.clone().or_else(|| isin.clone());

        let registry = self.registry.load()?;
        let existing = registry.find(isin.as_deref(), ticker.as_deref()).cloned();

        let asset_type = match asset_type {
            Some(asset_type) => asset_type,
            None => self.detect_asset_type(ticker.as_deref()).await,
        };
        if asset_type != AssetType::Etf {
            debug!(identifier = ?fallback_id, "not a fund, skipping registration");
            return Ok(fallback_id);
        }

        if let Some(existing) = existing {
            if needs_patch(&existing, ticker.as_deref()) {
                if let Some(patch) = self.discover_entry(isin.as_deref(), ticker.as_deref()).await {
                    let fund_id = existing.fund_id.clone();
                    self.registry.update(|registry| {
                        registry.upsert(&fund_id, patch);
                        apply_default_auto_source(registry, &fund_id);
                    })?;
                    info!(fund_id = %existing.fund_id, "registry entry patched");
                }
            }
            return Ok(Some(existing.fund_id));
        }

        match self.discover_entry(isin.as_deref(), ticker.as_deref()).await {
            Some(entry) => {
                let fund_id = entry.fund_id.clone();
                self.registry.update(|registry| {
                    registry.upsert(&fund_id, entry);
                    apply_default_auto_source(registry, &fund_id);
                })?;
                info!(%fund_id, "fund auto-registered");
                Ok(Some(fund_id))
            }
            None => Ok(fallback_id),
        }
    }

    /// Makes sure holdings for `fund_id` exist or were just fetched. Funds
    /// without a primary source are left to the resolution fallback.
    pub async fn ensure_holdings_available(
        &self,
        fund_id: &str,
        isin: Option<&str>,
        ticker: Option<&str>,
    ) -> Result<bool, RegistryError> {
        let registry = self.registry.load()?;
        let entry = registry
            .get(fund_id)
            .or_else(|| isin.and_then(|isin| registry.find_by_isin(isin)))
            .cloned();

        let Some(entry) = entry else {
            let Some(auto_snapshot) = &self.auto_snapshot else {
                return Ok(false);
            };
            let temporary = FundRegistryEntry {
                share_class_isin: clean(isin),
                tickers: clean(ticker).into_iter().collect(),
                auto_source: Some(String::from(METADATA_AUTO_SOURCE)),
                ..FundRegistryEntry::new(fund_id)
            };
            return Ok(auto_snapshot.ensure_snapshot(&temporary, None).await.success);
        };

        let Some(source) = holdings_route(&entry) else {
            debug!(
                fund_id = %entry.fund_id,
                "no primary source, resolution fallback will handle it"
            );
            return Ok(true);
        };
        match self.pipelines.get(&source) {
            Some(pipeline) => Ok(pipeline.ingest(&entry, IngestOptions::default()).await.success()),
            None => {
                warn!(fund_id = %entry.fund_id, %source, "no pipeline configured for source");
                Ok(false)
            }
        }
    }

    async fn detect_asset_type(&self, ticker: Option<&str>) -> AssetType {
        let Some(ticker) = ticker else {
            return AssetType::Etf;
        };
        match self.provider.instrument_profile(ticker).await {
            Ok(Some(profile)) if profile.is_fund() == Some(false) => AssetType::Stock,
            Ok(_) => AssetType::Etf,
            Err(err) => {
                debug!(ticker, code = err.code(), "asset type lookup failed, assuming fund");
                AssetType::Etf
            }
        }
    }

    async fn discover_entry(
        &self,
        isin: Option<&str>,
        ticker: Option<&str>,
    ) -> Option<FundRegistryEntry> {
        let parsed_isin = isin.and_then(|isin| Isin::parse(isin).ok());
        let domicile = parsed_isin.as_ref().map(|isin| isin.country_code().to_owned());

        let mut ticker = ticker.map(str::to_owned);
        if ticker.is_none() {
            if let Some(isin) = isin {
                ticker = match self.provider.symbol_for_isin(isin).await {
                    Ok(symbol) => symbol,
                    Err(err) => {
                        debug!(isin, code = err.code(), "isin to symbol lookup failed");
                        None
                    }
                };
            }
        }

        let mut entry = FundRegistryEntry {
            share_class_isin: parsed_isin.as_ref().map(|isin| isin.as_str().to_owned()),
            domicile: domicile.clone(),
            tickers: ticker.clone().into_iter().collect(),
            ..FundRegistryEntry::new(ticker.clone().or_else(|| isin.map(str::to_owned))?)
        };

        if let Some(symbol) = ticker.as_deref().or(isin) {
            if let Ok(Some(profile)) = self.provider.instrument_profile(symbol).await {
                entry.name = profile.name;
                entry.issuer = profile.fund_family;
            }
        }

        let us_listed = matches!(domicile.as_deref(), Some("US") | None);
        if us_listed {
            if let (Some(sec), Some(symbol)) = (&self.sec, ticker.as_deref()) {
                if let Some(listing) = sec.lookup_ticker(symbol).await {
                    entry.domicile = Some(String::from("US"));
                    entry.cik = Some(listing.cik.padded());
                    entry.series_id = listing.series_id;
                    entry.class_id = listing.class_id;
                    entry.freshness_days = Some(NPORT_FRESHNESS_DAYS);
                    return Some(entry);
                }
            }
        }

        match (domicile.as_deref(), &parsed_isin) {
            (Some(jurisdiction @ ("LU" | "DE")), Some(isin)) => {
                entry.fund_id = isin.as_str().to_owned();
                let portal = if jurisdiction == "LU" { "LuxSE" } else { "Bundesanzeiger" };
                entry.oam = Some(String::from(portal));
                entry.freshness_days = Some(OAM_FRESHNESS_DAYS);
                entry.auto_source = Some(String::from(METADATA_AUTO_SOURCE));
            }
            _ => {
                entry.auto_source = Some(String::from(METADATA_AUTO_SOURCE));
                entry.freshness_days = Some(PROVIDER_FRESHNESS_DAYS);
            }
        }
        Some(entry)
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_uppercase)
}

fn needs_patch(entry: &FundRegistryEntry, ticker: Option<&str>) -> bool {
    let european = matches!(entry.jurisdiction().as_deref(), Some("LU" | "DE"));
    (european && entry.auto_source.is_none()) || (entry.tickers.is_empty() && ticker.is_some())
}

/// LU/DE funds always keep the metadata provider as a secondary source.
fn apply_default_auto_source(registry: &mut FundRegistry, fund_id: &str) {
    let Some(entry) = registry.get(fund_id) else {
        return;
    };
    if matches!(entry.jurisdiction().as_deref(), Some("LU" | "DE")) && entry.auto_source.is_none() {
        registry.upsert(fund_id, FundRegistryEntry {
            auto_source: Some(String::from(METADATA_AUTO_SOURCE)),
            ..FundRegistryEntry::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_provider::{InstrumentProfile, StaticMetadataProvider};

    fn registry(temp: &tempfile::TempDir) -> RegistryStore {
        RegistryStore::new(temp.path().join("funds.yaml"))
    }

    #[test]
    fn routes_follow_domicile() {
        let us = FundRegistryEntry {
            domicile: Some(String::from("US")),
            cik: Some(String::from("884394")),
            ..FundRegistryEntry::new("SPY")
        };
        let lu = FundRegistryEntry {
            share_class_isin: Some(String::from("LU0908500753")),
            ..FundRegistryEntry::new("LU0908500753")
        };
        let fr = FundRegistryEntry {
            isin: Some(String::from("FR0010315770")),
            ..FundRegistryEntry::new("CW8")
        };
        let us_without_cik = FundRegistryEntry {
            domicile: Some(String::from("US")),
            ..FundRegistryEntry::new("XYZ")
        };

        assert_eq!(holdings_route(&us), Some(SourceId::Nport));
        assert_eq!(holdings_route(&lu), Some(SourceId::Oam));
        assert_eq!(holdings_route(&fr), Some(SourceId::Bdif));
        assert_eq!(holdings_route(&us_without_cik), None);
    }

    #[tokio::test]
    async fn luxembourg_isin_registers_under_isin_with_oam_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let auto = AutoRegistry::new(registry(&temp), Arc::new(StaticMetadataProvider::new()));

        let fund_id = auto
            .ensure_fund_registered(Some("lu0908500753"), None, None)
            .await
            .expect("register");

        assert_eq!(fund_id.as_deref(), Some("LU0908500753"));
        let saved = auto.registry().load().expect("load");
        let entry = saved.get("LU0908500753").expect("entry");
        assert_eq!(entry.oam.as_deref(), Some("LuxSE"));
        assert_eq!(entry.freshness_days, Some(210));
        assert_eq!(entry.auto_source.as_deref(), Some(METADATA_AUTO_SOURCE));
    }

    #[tokio::test]
    async fn stocks_are_never_registered() {
        let temp = tempfile::tempdir().expect("tempdir");
        let provider = StaticMetadataProvider::new().with_profile(InstrumentProfile {
            symbol: String::from("AAPL"),
            quote_type: Some(String::from("EQUITY")),
            ..InstrumentProfile::default()
        });
        let auto = AutoRegistry::new(registry(&temp), Arc::new(provider));

        let fund_id = auto.ensure_fund_registered(None, Some("AAPL"), None).await.expect("lookup");

        assert_eq!(fund_id.as_deref(), Some("AAPL"));
        assert!(auto.registry().load().expect("load").is_empty());
    }

    #[tokio::test]
    async fn existing_entry_gets_missing_ticker_patched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = registry(&temp);
        store
            .update(|registry| {
                registry.upsert("IE00B4L5Y983", FundRegistryEntry {
                    share_class_isin: Some(String::from("IE00B4L5Y983")),
                    ..FundRegistryEntry::default()
                });
            })
            .expect("seed");
        let auto = AutoRegistry::new(store, Arc::new(StaticMetadataProvider::new()));

        let fund_id = auto
            .ensure_fund_registered(Some("IE00B4L5Y983"), Some("IWDA.AS"), Some(AssetType::Etf))
            .await
            .expect("register");

        assert_eq!(fund_id.as_deref(), Some("IE00B4L5Y983"));
        let registry = auto.registry().load().expect("load");
        let entry = registry.get("IE00B4L5Y983").cloned().expect("entry");
        assert_eq!(entry.tickers, vec!["IWDA.AS"]);
        assert_eq!(entry.auto_source.as_deref(), Some(METADATA_AUTO_SOURCE));
    }
}
