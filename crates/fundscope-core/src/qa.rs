//! Quality gate for enriched snapshots.

use fundscope_store::dates::iso_date;
use fundscope_store::QaReportStore;
use serde::{Deserialize, Serialize};
use time::Date;
use tracing::{info, warn};

use crate::domain::GoldHolding;

/// Which identifiers count as resolved for the coverage check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageRule {
    IsinOrCusip,
    IsinOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaThresholds {
    pub weight_sum_min: f64,
    pub weight_sum_max: f64,
    pub min_identifier_coverage_pct: f64,
    pub coverage: CoverageRule,
}

impl Default for QaThresholds {
    fn default() -> Self {
        Self {
            weight_sum_min: 99.5,
            weight_sum_max: 100.5,
            min_identifier_coverage_pct: 98.0,
            coverage: CoverageRule::IsinOrCusip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QaStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopHolding {
    pub instrument_name_raw: String,
    pub isin: Option<String>,
    pub weight_pct: f64,
}

/// Outcome of one validation run; persisted as the record of an ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaResult {
    pub fund_id: String,
    #[serde(with = "iso_date")]
    pub as_of: Date,
    pub n_positions: usize,
    pub weight_sum: f64,
    pub unresolved_ids: usize,
    pub unresolved_pct: f64,
    pub identifier_coverage_pct: f64,
    pub top10_concentration: f64,
    pub top10_holdings: Vec<TopHolding>,
    pub checks_passed: Vec<String>,
    pub checks_failed: Vec<String>,
    pub status: QaStatus,
}

impl QaResult {
    pub fn passed(&self) -> bool {
        self.status == QaStatus::Pass
    }
}

#[derive(Debug, Clone)]
pub struct QaGate {
    reports: QaReportStore,
    thresholds: QaThresholds,
}

impl QaGate {
    pub fn new(reports: QaReportStore, thresholds: QaThresholds) -> Self {
        Self { reports, thresholds }
    }

    pub fn thresholds(&self) -> &QaThresholds {
        &self.thresholds
    }

    pub fn reports(&self) -> &QaReportStore {
        &self.reports
    }

    /// Runs every check and writes the report. A failed write is logged; the
    /// result is still returned.
    pub fn validate(&self, holdings: &[GoldHolding], fund_id: &str, as_of: Date) -> QaResult {
        let result = evaluate(holdings, fund_id, as_of, &self.thresholds);

        match self.reports.write(fund_id, as_of, &result) {
            Ok(path) => info!(
                fund_id,
                %as_of,
                status = ?result.status,
                weight_sum = result.weight_sum,
                report = %path.display(),
                "qa report written"
            ),
            Err(err) => warn!(fund_id, %as_of, error = %err, "qa report could not be written"),
        }

        result
    }

    pub fn read(&self, fund_id: &str, as_of: Date) -> Option<QaResult> {
        self.reports.read(fund_id, as_of).ok().flatten()
    }
}

/// Pure check logic, independent of persistence.
pub fn evaluate(
    holdings: &[GoldHolding],
    fund_id: &str,
    as_of: Date,
    thresholds: &QaThresholds,
) -> QaResult {
    if holdings.is_empty() {
        return QaResult {
            fund_id: fund_id.to_owned(),
            as_of,
            n_positions: 0,
            weight_sum: 0.0,
            unresolved_ids: 0,
            unresolved_pct: 0.0,
            identifier_coverage_pct: 0.0,
            top10_concentration: 0.0,
            top10_holdings: Vec::new(),
            checks_passed: Vec::new(),
            checks_failed: vec![String::from("Empty holdings data")],
            status: QaStatus::Fail,
        };
    }

    let mut passed = Vec::new();
    let mut failed = Vec::new();
    let n = holdings.len();

    let weight_sum: f64 = holdings.iter().map(|g| g.weight_pct).sum();
    let range = format!("[{:.1}, {:.1}]", thresholds.weight_sum_min, thresholds.weight_sum_max);
    if (thresholds.weight_sum_min..=thresholds.weight_sum_max).contains(&weight_sum) {
        passed.push(format!("Weight sum {weight_sum:.2}% within {range}"));
    } else {
        failed.push(format!("Weight sum {weight_sum:.2}% outside {range}"));
    }

    let unresolved = holdings
        .iter()
        .filter(|g| {
            let holding = &g.holding;
            let has_isin = holding.isin.as_deref().is_some_and(|v| !v.trim().is_empty());
            let has_cusip = holding.cusip.as_deref().is_some_and(|v| !v.trim().is_empty());
            match thresholds.coverage {
                CoverageRule::IsinOrCusip => !(has_isin || has_cusip),
                CoverageRule::IsinOnly => !has_isin,
            }
        })
        .count();
    let unresolved_pct = unresolved as f64 / n as f64 * 100.0;
    let coverage_pct = 100.0 - unresolved_pct;
    if coverage_pct >= thresholds.min_identifier_coverage_pct {
        passed.push(format!(
            "Identifier coverage {coverage_pct:.2}% ({}/{n} positions)",
            n - unresolved
        ));
    } else {
        failed.push(format!(
            "Identifier coverage {coverage_pct:.2}% below {:.1}% ({}/{n} positions)",
            thresholds.min_identifier_coverage_pct,
            n - unresolved
        ));
    }

    let mut ranked: Vec<&GoldHolding> = holdings.iter().collect();
    ranked.sort_by(|a, b| b.weight_pct.total_cmp(&a.weight_pct));
    let top10: Vec<TopHolding> = ranked
        .iter()
        .take(10)
        .map(|g| TopHolding {
            instrument_name_raw: g.holding.instrument_name_raw.clone(),
            isin: g.holding.isin.clone(),
            weight_pct: g.weight_pct,
        })
        .collect();
    let top10_concentration: f64 = top10.iter().map(|t| t.weight_pct).sum();
    passed.push(format!("Top 10 concentration: {top10_concentration:.2}%"));

    let mut missing = Vec::new();
    let blank_names = holdings
        .iter()
        .filter(|g| g.holding.instrument_name_raw.trim().is_empty())
        .count();
    if blank_names > 0 {
        missing.push(format!("instrument_name_raw ({blank_names} rows)"));
    }
    if holdings.iter().any(|g| g.holding.fund_id.trim().is_empty()) {
        missing.push(String::from("fund_id"));
    }
    if holdings.iter().all(|g| g.holding.market_value_local.is_none()) {
        missing.push(String::from("market_value_local"));
    }
    if missing.is_empty() {
        passed.push(String::from("All required columns present"));
    } else {
        failed.push(format!("Missing values: {}", missing.join(", ")));
    }

    let status = if failed.is_empty() { QaStatus::Pass } else { QaStatus::Fail };

    QaResult {
        fund_id: fund_id.to_owned(),
        as_of,
        n_positions: n,
        weight_sum,
        unresolved_ids: unresolved,
        unresolved_pct,
        identifier_coverage_pct: coverage_pct,
        top10_concentration,
        top10_holdings: top10,
        checks_passed: passed,
        checks_failed: failed,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetClass, Holding};
    use time::macros::date;

    fn gold(name: &str, isin: Option<&str>, weight_pct: f64) -> GoldHolding {
        let mut holding = Holding::new("SPY", date!(2024 - 03 - 31), name);
        holding.isin = isin.map(str::to_owned);
        holding.market_value_local = Some(weight_pct);
        GoldHolding {
            holding,
            weight_pct,
            country: String::from("US"),
            asset_class: AssetClass::Equity,
            sector: String::from("Unknown"),
            enrichment_version: 1,
        }
    }

    fn twelve_even() -> Vec<GoldHolding> {
        (0..12)
            .map(|i| gold(&format!("Stock {i}"), Some("US0378331005"), 100.0 / 12.0))
            .collect()
    }

    #[test]
    fn balanced_snapshot_passes() {
        let result =
            evaluate(&twelve_even(), "SPY", date!(2024 - 03 - 31), &QaThresholds::default());

        assert!(result.passed(), "{:?}", result.checks_failed);
        assert_eq!(result.n_positions, 12);
        assert_eq!(result.top10_holdings.len(), 10);
        assert!((result.top10_concentration - 1000.0 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn weight_sum_outside_band_fails() {
        let mut holdings = twelve_even();
        holdings[0].weight_pct += 1.0;

        let result = evaluate(&holdings, "SPY", date!(2024 - 03 - 31), &QaThresholds::default());

        assert_eq!(result.status, QaStatus::Fail);
        assert!(result.checks_failed.iter().any(|c| c.starts_with("Weight sum")));
    }

    #[test]
    fn coverage_rule_is_configurable() {
        let mut holdings = twelve_even();
        holdings[0].holding.isin = None;
        holdings[0].holding.cusip = Some(String::from("037833100"));

        let lenient = evaluate(&holdings, "SPY", date!(2024 - 03 - 31), &QaThresholds::default());
        let strict = evaluate(
            &holdings,
            "SPY",
            date!(2024 - 03 - 31),
            &QaThresholds {
                coverage: CoverageRule::IsinOnly,
                ..QaThresholds::default()
            },
        );

        assert!(lenient.passed());
        assert_eq!(strict.unresolved_ids, 1);
        assert_eq!(strict.status, QaStatus::Fail);
    }

    #[test]
    fn empty_snapshot_fails() {
        let result = evaluate(&[], "SPY", date!(2024 - 03 - 31), &QaThresholds::default());
        assert_eq!(result.status, QaStatus::Fail);
        assert_eq!(result.checks_failed, vec![String::from("Empty holdings data")]);
    }

    #[test]
    fn validate_persists_report_even_on_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = QaGate::new(QaReportStore::new(temp.path()), QaThresholds::default());

        let result = gate.validate(&[gold("Lonely", None, 50.0)], "SPY", date!(2024 - 03 - 31));
        let stored = gate.read("SPY", date!(2024 - 03 - 31)).expect("report on disk");

        assert_eq!(result.status, QaStatus::Fail);
        assert_eq!(stored, result);
        assert!(temp
            .path()
            .join("fund_id=SPY/as_of=2024-03-31/qa_report.json")
            .exists());
    }

    #[test]
    fn thresholds_deserialize_with_defaults() {
        let thresholds: QaThresholds =
            serde_json::from_str(r#"{"weight_sum_min": 95.0}"#).expect("parse");
        assert_eq!(thresholds.weight_sum_min, 95.0);
        assert_eq!(thresholds.weight_sum_max, 100.5);
        assert_eq!(thresholds.coverage, CoverageRule::IsinOrCusip);
    }
}
