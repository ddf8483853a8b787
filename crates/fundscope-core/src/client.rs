//! Point-in-time holdings resolution for downstream look-through.
//!
//! [`PrimaryHoldingsClient::fetch_holdings`] turns a ticker or ISIN into the
//! latest (or requested) persisted snapshot, with canonical columns and
//! weights summing to 1.0. Only [`HoldingsError`] ever reaches the caller.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use fundscope_store::dates::{format_date, parse_date};
use fundscope_store::{SnapshotHandle, SnapshotStore, SnapshotTable};
use time::Date;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auto_snapshot::AutoSnapshot;
use crate::cache::CacheStore;
use crate::domain::Isin;
use crate::lookup::FieldAliases;
use crate::parsers::numbers::parse_number;
use crate::registry::{FundRegistry, FundRegistryEntry, RegistryStore};
use crate::{HoldingsError, ValidationError};

const SYMBOL: FieldAliases =
    FieldAliases::new("Symbol", &["Symbol", "instrument_ticker", "ticker", "symbol"]);
const SYMBOL_FALLBACK: FieldAliases = FieldAliases::new("Symbol", &["isin", "instrument_isin"]);
const NAME: FieldAliases =
    FieldAliases::new("Name", &["Name", "instrument_name", "instrument_name_raw", "name"]);
const COUNTRY: FieldAliases = FieldAliases::new("Country", &["Country", "country"]);
const SECTOR: FieldAliases = FieldAliases::new("Sector", &["Sector", "sector"]);
const ASSET_CLASS: FieldAliases = FieldAliases::new("Asset_Class", &["Asset_Class", "asset_class"]);
const WEIGHT: FieldAliases = FieldAliases::new(
    "Weight",
    &["Weight", "weight_pct_recalc", "weight_pct", "weight_pct_issuer", "weight_pct_raw", "weight"],
);
const MARKET_VALUE: FieldAliases = FieldAliases::new(
    "market_value",
    &["market_value_eur", "market_value_local", "market_value", "value"],
);

const UNKNOWN: &str = "Unknown";

/// One constituent with canonical fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHolding {
    pub symbol: String,
    pub name: String,
    /// Fraction of the returned snapshot; all weights sum to 1.0.
    pub weight: f64,
    /// `None` when the snapshot has no such column.
    pub country: Option<String>,
    pub sector: Option<String>,
    pub asset_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMetadata {
    pub fund_id: String,
    /// Identifier as requested, uppercased.
    pub ticker: String,
    pub as_of: Date,
    pub version: u32,
    pub issuer: Option<String>,
    pub source: String,
    pub snapshot_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSnapshot {
    pub holdings: Vec<ResolvedHolding>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exposure {
    pub key: String,
    pub weight: f64,
}

/// Registry entries plus an uppercase ticker index.
#[derive(Debug, Default)]
struct RegistryIndex {
    registry: FundRegistry,
    tickers: HashMap<String, String>,
    loaded: bool,
}

impl RegistryIndex {
    fn build(registry: FundRegistry) -> Self {
        let mut tickers = HashMap::new();
        for entry in registry.entries() {
            for ticker in &entry.tickers {
                tickers.insert(ticker.to_ascii_uppercase(), entry.fund_id.clone());
            }
        }
        Self {
            registry,
            tickers,
            loaded: true,
        }
    }

    /// Ticker index, then a scan of keys and ticker lists, then ISIN fields.
    fn resolve(&self, identifier: &str) -> Option<FundRegistryEntry> {
        let by_ticker = self.tickers.get(identifier).and_then(|fund_id| self.registry.get(fund_id));
        if let Some(entry) = by_ticker {
            return Some(entry.clone());
        }
        if let Some(entry) = self
            .registry
            .entries()
            .find(|entry| {
                entry.fund_id.eq_ignore_ascii_case(identifier) || entry.has_ticker(identifier)
            })
        {
            return Some(entry.clone());
        }
        if Isin::looks_like(identifier) {
            return self.registry.find_by_isin(identifier).cloned();
        }
        None
    }
}

pub struct PrimaryHoldingsClient {
    registry: RegistryStore,
    index: RwLock<RegistryIndex>,
    snapshots: SnapshotStore,
    auto_snapshot: Option<AutoSnapshot>,
    cache: CacheStore<ResolvedSnapshot>,
}

impl PrimaryHoldingsClient {
    pub fn new(registry: RegistryStore, snapshots: SnapshotStore) -> Self {
        Self {
            registry,
            index: RwLock::new(RegistryIndex::default()),
            snapshots,
            auto_snapshot: None,
            cache: CacheStore::with_default_ttl(),
        }
    }

    pub fn with_auto_snapshot(mut self, auto_snapshot: AutoSnapshot) -> Self {
        self.auto_snapshot = Some(auto_snapshot);
        self
    }

    pub fn with_cache(mut self, cache: CacheStore<ResolvedSnapshot>) -> Self {
        self.cache = cache;
        self
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Resolves `identifier` (ticker, fund id or ISIN) to a normalized
    /// snapshot. `as_of` must be `YYYY-MM-DD`; `max_positions` keeps the
    /// largest positions and renormalizes.
    pub async fn fetch_holdings(
        &self,
        identifier: &str,
        as_of: Option<&str>,
        max_positions: Option<usize>,
    ) -> Result<ResolvedSnapshot, HoldingsError> {
        let identifier = identifier.trim().to_ascii_uppercase();
        if identifier.is_empty() {
            return Err(ValidationError::EmptyIdentifier.into());
        }
        let as_of = as_of
            .map(|raw| {
                parse_date(raw).ok_or_else(|| ValidationError::InvalidDate {
                    value: raw.to_owned(),
                })
            })
            .transpose()?;

        let cache_key = format!(
            "{identifier}:{}:{}",
            as_of.map(format_date).unwrap_or_else(|| String::from("latest")),
            max_positions.map(|n| n.to_string()).unwrap_or_else(|| String::from("all"))
        );
        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!(%identifier, "holdings served from cache");
            return Ok(cached);
        }

        let entry = self
            .resolve_entry(&identifier)
            .await?
            .ok_or_else(|| HoldingsError::NotRegistered {
                identifier: identifier.clone(),
            })?;

        let handle = self.locate_snapshot(&entry, as_of).await?;
        let table = SnapshotTable::load(&handle.path)?;
        let holdings = prepare_holdings(&table, max_positions)?;

        let resolved = ResolvedSnapshot {
            holdings,
            metadata: SnapshotMetadata {
                fund_id: entry.fund_id.clone(),
                ticker: identifier.clone(),
                as_of: handle.as_of,
                version: handle.version,
                issuer: entry.issuer.clone(),
                source: entry.auto_source.clone().unwrap_or_else(|| String::from("PRIMARY")),
                snapshot_path: handle.path.clone(),
            },
        };
        info!(
            fund_id = %entry.fund_id,
            as_of = %format_date(handle.as_of),
            version = handle.version,
            positions = resolved.holdings.len(),
            "holdings resolved"
        );

        self.cache.put(cache_key, resolved.clone(), None).await;
        Ok(resolved)
    }

    pub fn get_country_exposure(&self, holdings: &[ResolvedHolding]) -> Option<Vec<Exposure>> {
        aggregate(holdings, |holding| holding.country.as_deref())
    }

    pub fn get_sector_exposure(&self, holdings: &[ResolvedHolding]) -> Option<Vec<Exposure>> {
        aggregate(holdings, |holding| holding.sector.as_deref())
    }

    pub fn get_asset_class_exposure(&self, holdings: &[ResolvedHolding]) -> Option<Vec<Exposure>> {
        aggregate(holdings, |holding| holding.asset_class.as_deref())
    }

    /// Looks the identifier up, reloading the registry from disk once on a
    /// miss so entries added by auto-registration become visible.
    async fn resolve_entry(
        &self,
        identifier: &str,
    ) -> Result<Option<FundRegistryEntry>, HoldingsError> {
        {
            let index = self.index.read().await;
            if index.loaded {
                if let Some(entry) = index.resolve(identifier) {
                    return Ok(Some(entry));
                }
            }
        }

        let registry = self
            .registry
            .load()
            .map_err(|err| HoldingsError::MalformedInput(err.to_string()))?;
        let mut index = self.index.write().await;
        *index = RegistryIndex::build(registry);
        Ok(index.resolve(identifier))
    }

    async fn locate_snapshot(
        &self,
        entry: &FundRegistryEntry,
        as_of: Option<Date>,
    ) -> Result<SnapshotHandle, HoldingsError> {
        if let Some(handle) = self.discover_snapshot(entry, as_of)? {
            return Ok(handle);
        }

        if let Some(auto_snapshot) = &self.auto_snapshot {
            let result = auto_snapshot.ensure_snapshot(entry, as_of).await;
            if result.success {
                if let Some(handle) = self.discover_snapshot(entry, as_of)? {
                    return Ok(handle);
                }
            } else {
                warn!(fund_id = %entry.fund_id, message = %result.message, "auto-snapshot failed");
            }
        }

        Err(HoldingsError::NoSnapshotAvailable {
            fund_id: entry.fund_id.clone(),
            as_of: as_of.map(format_date),
        })
    }

    fn discover_snapshot(
        &self,
        entry: &FundRegistryEntry,
        as_of: Option<Date>,
    ) -> Result<Option<SnapshotHandle>, HoldingsError> {
        let fund_root = self.snapshots.fund_root(&entry.fund_id, entry.gold_path.as_deref())?;
        let mut handles = self.snapshots.list(&fund_root, &entry.fund_id)?;
        if let Some(as_of) = as_of {
            handles.retain(|handle| handle.as_of == as_of);
        }
        Ok(handles.pop())
    }
}

/// Canonical columns, weights from the first populated weight column or
/// market value proportions, sorted, truncated and renormalized.
pub fn prepare_holdings(
    table: &SnapshotTable,
    max_positions: Option<usize>,
) -> Result<Vec<ResolvedHolding>, HoldingsError> {
    if table.is_empty() {
        return Err(HoldingsError::PartialData(String::from("holdings snapshot is empty")));
    }

    let weights = numeric_column(table, &WEIGHT)
        .or_else(|| numeric_column(table, &MARKET_VALUE))
        .ok_or_else(|| {
            HoldingsError::PartialData(String::from(
                "snapshot is missing weight and market value information",
            ))
        })?;
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(HoldingsError::PartialData(String::from(
            "holdings snapshot has zero total weight",
        )));
    }

    let symbol = SYMBOL.first(|name| table.column_index(name));
    let symbol_fallback = SYMBOL_FALLBACK.first(|name| table.column_index(name));
    let name = NAME.first(|name| table.column_index(name));
    let country = COUNTRY.first(|name| table.column_index(name));
    let sector = SECTOR.first(|name| table.column_index(name));
    let asset_class = ASSET_CLASS.first(|name| table.column_index(name));

    let text = |row: usize, column: Option<usize>| {
        column.and_then(|column| table.value(row, column)).map(str::to_owned)
    };
    let dimension = |row: usize, column: Option<usize>| {
        column.map(|column| table.value(row, column).unwrap_or(UNKNOWN).to_owned())
    };

    let mut holdings: Vec<ResolvedHolding> = (0..table.len())
        .map(|row| {
            let symbol = text(row, symbol).or_else(|| text(row, symbol_fallback));
            let name = text(row, name).or_else(|| symbol.clone()).unwrap_or_default();
            ResolvedHolding {
                symbol: symbol.unwrap_or_else(|| name.clone()),
                name,
                weight: weights[row] / total,
                country: dimension(row, country),
                sector: dimension(row, sector),
                asset_class: dimension(row, asset_class),
            }
        })
        .collect();

    holdings.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
    if let Some(limit) = max_positions {
        holdings.truncate(limit);
        let kept: f64 = holdings.iter().map(|holding| holding.weight).sum();
        if kept > 0.0 {
            for holding in &mut holdings {
                holding.weight /= kept;
            }
        }
    }
    Ok(holdings)
}

/// First candidate column holding at least one positive value; negative and
/// unparseable cells count as zero.
fn numeric_column(table: &SnapshotTable, candidates: &FieldAliases) -> Option<Vec<f64>> {
    candidates.first(|column| {
        let values: Vec<f64> = table
            .column_values(column)?
            .into_iter()
            .map(|value| {
                value
                    .and_then(parse_number)
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .unwrap_or(0.0)
            })
            .collect();
        values.iter().any(|value| *value > 0.0).then_some(values)
    })
}

fn aggregate(
    holdings: &[ResolvedHolding],
    key: impl Fn(&ResolvedHolding) -> Option<&str>,
) -> Option<Vec<Exposure>> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for holding in holdings {
        if let Some(value) = key(holding) {
            *totals.entry(value).or_default() += holding.weight;
        }
    }
    if totals.is_empty() {
        return None;
    }

    let mut exposures: Vec<Exposure> = totals
        .into_iter()
        .map(|(key, weight)| Exposure {
            key: key.to_owned(),
            weight,
        })
        .collect();
    exposures.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
    Some(exposures)
}

impl std::fmt::Debug for PrimaryHoldingsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryHoldingsClient")
            .field("registry", &self.registry.path())
            .field("gold_root", &self.snapshots.root())
            .field("auto_snapshot", &self.auto_snapshot.is_some())
            .finish()
    }
}
