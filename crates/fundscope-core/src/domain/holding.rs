use std::fmt::{Display, Formatter};
use std::str::FromStr;

use fundscope_store::dates::iso_date;
use serde::{Deserialize, Serialize};
use time::Date;

/// Normalized asset class taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    Equity,
    #[serde(rename = "Fixed Income")]
    FixedIncome,
    Derivatives,
    Cash,
    Other,
}

impl AssetClass {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Equity => "Equity",
            Self::FixedIncome => "Fixed Income",
            Self::Derivatives => "Derivatives",
            Self::Cash => "Cash",
            Self::Other => "Other",
        }
    }
}

impl Display for AssetClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "equity" => Ok(Self::Equity),
            "fixed income" | "fixed_income" => Ok(Self::FixedIncome),
            "derivatives" => Ok(Self::Derivatives),
            "cash" => Ok(Self::Cash),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown asset class '{other}'")),
        }
    }
}

/// One raw position as extracted from a disclosure document.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub as_of: Date,
    pub fund_id: String,
    pub instrument_name_raw: String,
    pub isin: Option<String>,
    pub cusip: Option<String>,
    pub ticker: Option<String>,
    pub quantity: Option<f64>,
    pub market_value_local: Option<f64>,
    pub currency: Option<String>,
    pub category_raw: Option<String>,
    pub country_raw: Option<String>,
    pub derivative_flag: bool,
    pub issuer_name: Option<String>,
    /// Weight as printed by the issuer, in percent.
    pub reported_weight_pct: Option<f64>,
    pub maturity: Option<String>,
    pub coupon: Option<f64>,
    pub source_url: Option<String>,
    pub content_hash: Option<String>,
}

impl Holding {
    pub fn new(
        fund_id: impl Into<String>,
        as_of: Date,
        instrument_name_raw: impl Into<String>,
    ) -> Self {
        Self {
            as_of,
            fund_id: fund_id.into(),
            instrument_name_raw: instrument_name_raw.into(),
            isin: None,
            cusip: None,
            ticker: None,
            quantity: None,
            market_value_local: None,
            currency: None,
            category_raw: None,
            country_raw: None,
            derivative_flag: false,
            issuer_name: None,
            reported_weight_pct: None,
            maturity: None,
            coupon: None,
            source_url: None,
            content_hash: None,
        }
    }

    /// Best identifier available for display and grouping.
    pub fn primary_identifier(&self) -> Option<&str> {
        self.isin
            .as_deref()
            .or(self.cusip.as_deref())
            .or(self.ticker.as_deref())
    }
}

/// A holding after enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct GoldHolding {
    pub holding: Holding,
    /// Share of the snapshot's positive market value, 0..=100.
    pub weight_pct: f64,
    pub country: String,
    pub asset_class: AssetClass,
    pub sector: String,
    pub enrichment_version: u32,
}

/// Flat snapshot row; the persisted schema shared by every writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldRecord {
    pub fund_id: String,
    #[serde(with = "iso_date")]
    pub as_of: Date,
    pub instrument_name_raw: String,
    pub instrument_ticker: Option<String>,
    pub isin: Option<String>,
    pub cusip: Option<String>,
    pub quantity: Option<f64>,
    pub market_value_local: Option<f64>,
    pub currency: Option<String>,
    pub category_raw: Option<String>,
    pub country_raw: Option<String>,
    pub derivative_flag: bool,
    pub issuer_name: Option<String>,
    pub maturity: Option<String>,
    pub coupon: Option<f64>,
    pub weight_pct_issuer: Option<f64>,
    pub weight_pct: f64,
    pub country: String,
    pub asset_class: AssetClass,
    pub sector: String,
    pub enrichment_version: u32,
    pub source_url: Option<String>,
    pub content_hash: Option<String>,
}

impl From<&GoldHolding> for GoldRecord {
    fn from(gold: &GoldHolding) -> Self {
        let raw = &gold.holding;
        Self {
            fund_id: raw.fund_id.clone(),
            as_of: raw.as_of,
            instrument_name_raw: raw.instrument_name_raw.clone(),
            instrument_ticker: raw.ticker.clone(),
            isin: raw.isin.clone(),
            cusip: raw.cusip.clone(),
            quantity: raw.quantity,
            market_value_local: raw.market_value_local,
            currency: raw.currency.clone(),
            category_raw: raw.category_raw.clone(),
            country_raw: raw.country_raw.clone(),
            derivative_flag: raw.derivative_flag,
            issuer_name: raw.issuer_name.clone(),
            maturity: raw.maturity.clone(),
            coupon: raw.coupon,
            weight_pct_issuer: raw.reported_weight_pct,
            weight_pct: gold.weight_pct,
            country: gold.country.clone(),
            asset_class: gold.asset_class,
            sector: gold.sector.clone(),
            enrichment_version: gold.enrichment_version,
            source_url: raw.source_url.clone(),
            content_hash: raw.content_hash.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn asset_class_labels_parse_back() {
        for class in [
            AssetClass::Equity,
            AssetClass::FixedIncome,
            AssetClass::Derivatives,
            AssetClass::Cash,
            AssetClass::Other,
        ] {
            assert_eq!(class.label().parse::<AssetClass>(), Ok(class));
        }
    }

    #[test]
    fn record_serializes_asset_class_with_space() {
        let mut holding = Holding::new("SPY", date!(2024 - 03 - 31), "US Treasury 2030");
        holding.isin = Some("US912828ZT04".into());
        let gold = GoldHolding {
            holding,
            weight_pct: 100.0,
            country: "US".into(),
            asset_class: AssetClass::FixedIncome,
            sector: "Unknown".into(),
            enrichment_version: 1,
        };

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(GoldRecord::from(&gold)).expect("serialize");
        let written = String::from_utf8(writer.into_inner().expect("flush")).expect("utf8");

        assert!(written.contains("Fixed Income"));
        assert!(written.contains("2024-03-31"));
    }

    #[test]
    fn primary_identifier_prefers_isin() {
        let mut holding = Holding::new("SPY", date!(2024 - 03 - 31), "Apple");
        holding.cusip = Some("037833100".into());
        assert_eq!(holding.primary_identifier(), Some("037833100"));
        holding.isin = Some("US0378331005".into());
        assert_eq!(holding.primary_identifier(), Some("US0378331005"));
    }
}
