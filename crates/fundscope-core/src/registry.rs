//! Durable fund registry: `fund_id -> FundRegistryEntry`, stored as YAML.
//!
//! ```yaml
//! funds:
//!   SPY:
//!     domicile: US
//!     cik: "0000884394"
//!     series_id: S000004310
//!     tickers: SPY
//!     freshness_days: 30
//!   LU0908500753:
//!     domicile: LU
//!     share_class_isin: LU0908500753
//!     oam: LuxSE
//!     auto_source: metadata-provider
//! ```
//!
//! A missing file is an empty registry. Writes hold a process-wide lock
//! across read-modify-write and replace the file atomically.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Cik, Isin};

/// Serializes every registry write in this process.
static REGISTRY_WRITER: Mutex<()> = Mutex::new(());

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("registry yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A constituent row kept in the registry for when no live source answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackHolding {
    pub symbol: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_class: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundRegistryEntry {
    /// Filled from the map key on load.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fund_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domicile: Option<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub tickers: Vec<String>,
    #[serde(default, deserialize_with = "text_or_number", skip_serializing_if = "Option::is_none")]
    pub cik: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_class_isin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_days: Option<u32>,
    /// Storage hint replacing `fund_id=<F>` under the gold root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_source: Option<String>,
    /// OAM portal name (`LuxSE`, `Bundesanzeiger`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oam: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_holdings: Vec<FallbackHolding>,
}

impl FundRegistryEntry {
    pub fn new(fund_id: impl Into<String>) -> Self {
        Self {
            fund_id: fund_id.into(),
            ..Self::default()
        }
    }

    /// Share-class ISIN, whichever key it was stored under.
    pub fn isin(&self) -> Option<&str> {
        self.share_class_isin
            .as_deref()
            .or(self.isin.as_deref())
            .map(str::trim)
            .filter(|isin| !isin.is_empty())
    }

    pub fn parsed_isin(&self) -> Option<Isin> {
        self.isin().and_then(|isin| Isin::parse(isin).ok())
    }

    pub fn parsed_cik(&self) -> Option<Cik> {
        self.cik.as_deref().and_then(|cik| Cik::parse(cik).ok())
    }

    pub fn primary_ticker(&self) -> Option<&str> {
        self.tickers.first().map(String::as_str)
    }

    /// Declared domicile, else the ISIN country prefix.
    pub fn jurisdiction(&self) -> Option<String> {
        self.domicile
            .as_deref()
            .map(str::trim)
            .filter(|domicile| !domicile.is_empty())
            .map(str::to_ascii_uppercase)
            .or_else(|| self.parsed_isin().map(|isin| isin.country_code().to_owned()))
    }

    pub fn has_ticker(&self, ticker: &str) -> bool {
        self.tickers.iter().any(|known| known.eq_ignore_ascii_case(ticker))
    }

    pub fn matches_isin(&self, isin: &str) -> bool {
        [self.isin.as_deref(), self.share_class_isin.as_deref()]
            .into_iter()
            .flatten()
            .any(|known| known.trim().eq_ignore_ascii_case(isin))
    }

    /// Fills fields that are unset here from `patch`; tickers are unioned.
    /// Existing values are never replaced or removed.
    pub fn merge_missing(&mut self, patch: FundRegistryEntry) {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }

        fill(&mut self.name, patch.name);
        fill(&mut self.issuer, patch.issuer);
        fill(&mut self.domicile, patch.domicile);
        fill(&mut self.cik, patch.cik);
        fill(&mut self.series_id, patch.series_id);
        fill(&mut self.class_id, patch.class_id);
        fill(&mut self.isin, patch.isin);
        fill(&mut self.share_class_isin, patch.share_class_isin);
        fill(&mut self.freshness_days, patch.freshness_days);
        fill(&mut self.gold_path, patch.gold_path);
        fill(&mut self.auto_source, patch.auto_source);
        fill(&mut self.oam, patch.oam);

        for ticker in patch.tickers {
            if !self.has_ticker(&ticker) {
                self.tickers.push(ticker);
            }
        }
        if self.fallback_holdings.is_empty() {
            self.fallback_holdings = patch.fallback_holdings;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FundRegistry {
    funds: BTreeMap<String, FundRegistryEntry>,
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    funds: Option<BTreeMap<String, FundRegistryEntry>>,
}

impl FundRegistry {
    pub fn from_yaml(raw: &str) -> Result<Self, RegistryError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: Option<RegistryFile> = serde_yaml::from_str(raw)?;
        let mut funds = file.and_then(|file| file.funds).unwrap_or_default();
        for (fund_id, entry) in funds.iter_mut() {
            entry.fund_id = fund_id.clone();
        }
        Ok(Self { funds })
    }

    pub fn to_yaml(&self) -> Result<String, RegistryError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn len(&self) -> usize {
        self.funds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funds.is_empty()
    }

    pub fn get(&self, fund_id: &str) -> Option<&FundRegistryEntry> {
        self.funds.get(fund_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &FundRegistryEntry> {
        self.funds.values()
    }

    /// Key match first, then any entry listing the ticker.
    pub fn find_by_ticker(&self, ticker: &str) -> Option<&FundRegistryEntry> {
        self.funds
            .get(ticker)
            .or_else(|| self.funds.values().find(|entry| entry.has_ticker(ticker)))
    }

    pub fn find_by_isin(&self, isin: &str) -> Option<&FundRegistryEntry> {
        self.funds
            .values()
            .find(|entry| entry.matches_isin(isin) || entry.fund_id.eq_ignore_ascii_case(isin))
    }

    /// Ticker lookup, then ISIN lookup.
    pub fn find(&self, isin: Option<&str>, ticker: Option<&str>) -> Option<&FundRegistryEntry> {
        ticker
            .and_then(|ticker| self.find_by_ticker(ticker))
            .or_else(|| isin.and_then(|isin| self.find_by_isin(isin)))
    }

    /// Inserts a new entry or merges into the existing one under `fund_id`.
    pub fn upsert(&mut self, fund_id: &str, mut entry: FundRegistryEntry) -> &FundRegistryEntry {
        entry.fund_id = fund_id.to_owned();
        let slot = self.funds.entry(fund_id.to_owned()).or_default();
        if slot.fund_id.is_empty() {
            *slot = entry;
        } else {
            slot.merge_missing(entry);
        }
        slot
    }
}

/// File-backed registry.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<FundRegistry, RegistryError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => FundRegistry::from_yaml(&raw),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "registry file missing, starting empty");
                Ok(FundRegistry::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, registry: &FundRegistry) -> Result<(), RegistryError> {
        let _guard = REGISTRY_WRITER.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_atomic(registry)
    }

    /// Load, apply `change`, save; all under the writer lock.
    pub fn update<T>(
        &self,
        change: impl FnOnce(&mut FundRegistry) -> T,
    ) -> Result<T, RegistryError> {
        let _guard = REGISTRY_WRITER.lock().unwrap_or_else(PoisonError::into_inner);
        let mut registry = self.load()?;
        let output = change(&mut registry);
        self.write_atomic(&registry)?;
        Ok(output)
    }

    fn write_atomic(&self, registry: &FundRegistry) -> Result<(), RegistryError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let yaml = registry.to_yaml()?;
        let mut staged = tempfile::NamedTempFile::new_in(&parent)?;
        staged.write_all(yaml.as_bytes())?;
        staged.as_file_mut().flush()?;
        staged.persist(&self.path).map_err(|err| err.error)?;

        info!(path = %self.path.display(), funds = registry.len(), "registry saved");
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(ticker)) => vec![ticker],
        Some(OneOrMany::Many(tickers)) => tickers,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Number(u64),
}

fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<TextOrNumber>::deserialize(deserializer)?.map(|value| match value {
        TextOrNumber::Text(text) => text,
        TextOrNumber::Number(number) => number.to_string(),
    }))
}
