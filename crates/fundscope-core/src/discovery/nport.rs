//! SEC EDGAR N-PORT discovery.

use serde::Deserialize;
use serde_json::Value;
use time::{Date, Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use fundscope_store::dates::parse_date;

use crate::discovery::{rank, Discoverer, DiscoveryFuture, DiscoveryQuery, ReportMetadata};
use crate::domain::Cik;
use crate::transport::SourceClient;
use crate::SourceId;

pub const SEC_DATA_BASE: &str = "https://data.sec.gov";
pub const SEC_ARCHIVE_BASE: &str = "https://www.sec.gov";
const NPORT_FORMS: [&str; 2] = ["NPORT-P", "NPORT-EX"];
const PREFERRED_XML: [&str; 4] = ["nport-p.xml", "nport_p.xml", "nport-ex.xml", "nport_ex.xml"];
const WINDOW_AROUND_TARGET_DAYS: i64 = 365;
const WINDOW_BEFORE_TODAY_DAYS: i64 = 120;

#[derive(Debug, Default, Deserialize)]
struct Submissions {
    #[serde(default)]
    filings: SubmissionFilings,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionFilings {
    #[serde(default)]
    recent: RecentFilings,
}

/// Column-oriented filing index: the n-th entry of every list describes the
/// same filing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    report_date: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FilingManifest {
    #[serde(default)]
    directory: ManifestDirectory,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestDirectory {
    #[serde(default)]
    item: Vec<ManifestItem>,
}

#[derive(Debug, Deserialize)]
struct ManifestItem {
    name: String,
}

/// One row of the SEC mutual fund ticker table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutualFundTicker {
    pub cik: Cik,
    pub series_id: Option<String>,
    pub class_id: Option<String>,
    pub symbol: String,
}

#[derive(Debug, Clone)]
struct FilingRow {
    accession: String,
    filed_on: Date,
    report_date: Option<Date>,
    form: String,
    primary_document: String,
}

#[derive(Debug, Clone)]
pub struct NportDiscoverer {
    client: SourceClient,
    data_base: String,
    archive_base: String,
}

impl NportDiscoverer {
    pub fn new(client: SourceClient) -> Self {
        Self::with_bases(client, SEC_DATA_BASE, SEC_ARCHIVE_BASE)
    }

    pub fn with_bases(
        client: SourceClient,
        data_base: impl Into<String>,
        archive_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            data_base: data_base.into().trim_end_matches('/').to_owned(),
            archive_base: archive_base.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Filing-date window: target ± one year, else the last 120 days.
    pub fn window(target: Option<Date>, today: Date) -> (Date, Date) {
        match target {
            Some(target) => (
                target - Duration::days(WINDOW_AROUND_TARGET_DAYS),
                target + Duration::days(WINDOW_AROUND_TARGET_DAYS),
            ),
            None => (today - Duration::days(WINDOW_BEFORE_TODAY_DAYS), today),
        }
    }

    /// Looks a share class ticker up in `company_tickers_mf.json`.
    pub async fn lookup_ticker(&self, ticker: &str) -> Option<MutualFundTicker> {
        let url = format!("{}/files/company_tickers_mf.json", self.archive_base);
        let table: Value = match self.client.get_json(&url).await {
            Ok(table) => table,
            Err(err) => {
                warn!(ticker, code = err.code(), error = %err, "sec ticker table unavailable");
                return None;
            }
        };
        find_ticker(&table, ticker)
    }

    async fn filings(&self, cik: Cik) -> Vec<FilingRow> {
        let url = format!("{}/submissions/CIK{}.json", self.data_base, cik.padded());
        match self.client.get_json::<Submissions>(&url).await {
            Ok(submissions) => filing_rows(submissions.filings.recent),
            Err(err) => {
                warn!(cik = %cik, code = err.code(), error = %err, "sec submissions unavailable");
                Vec::new()
            }
        }
    }

    /// URL of the machine-readable XML inside a filing directory.
    async fn resolve_document(&self, filing_dir: &str, primary_document: &str) -> String {
        let manifest_url = format!("{filing_dir}/index.json");
        let names = match self.client.get_json::<FilingManifest>(&manifest_url).await {
            Ok(manifest) => manifest.directory.item.into_iter().map(|item| item.name).collect(),
            Err(err) => {
                debug!(url = %manifest_url, error = %err, "filing manifest unavailable");
                Vec::new()
            }
        };

        let name = select_document(&names)
            .unwrap_or_else(|| strip_rendering_prefix(primary_document).to_owned());
        format!("{filing_dir}/{name}")
    }

    async fn discover_for(&self, query: DiscoveryQuery) -> Vec<ReportMetadata> {
        let Some(cik) = query.cik else {
            debug!(fund_id = %query.fund_id, "n-port discovery needs a cik");
            return Vec::new();
        };

        let today = OffsetDateTime::now_utc().date();
        let (from, to) = Self::window(query.target_date, today);

        let rows: Vec<FilingRow> = self
            .filings(cik)
            .await
            .into_iter()
            .filter(|row| NPORT_FORMS.contains(&row.form.as_str()))
            .filter(|row| row.filed_on >= from && row.filed_on <= to)
            .collect();

        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            let filing_dir = format!(
                "{}/Archives/edgar/data/{}/{}",
                self.archive_base,
                cik.unpadded(),
                row.accession.replace('-', "")
            );
            let url = self.resolve_document(&filing_dir, &row.primary_document).await;

            let as_of = row.report_date.unwrap_or(row.filed_on);
            let mut report = ReportMetadata::new(url, as_of, row.form);
            report.record_id = Some(row.accession);
            report.series_id = query.series_id.clone();
            report.class_id = query.class_id.clone();
            reports.push(report);
        }

        info!(
            fund_id = %query.fund_id,
            cik = %cik,
            filings = reports.len(),
            "n-port filings discovered"
        );
        rank(reports, query.target_date)
    }
}

impl Discoverer for NportDiscoverer {
    fn source(&self) -> SourceId {
        SourceId::Nport
    }

    fn discover<'a>(&'a self, query: DiscoveryQuery) -> DiscoveryFuture<'a> {
        Box::pin(self.discover_for(query))
    }
}

fn filing_rows(recent: RecentFilings) -> Vec<FilingRow> {
    recent
        .form
        .iter()
        .enumerate()
        .filter_map(|(index, form)| {
            let accession = recent.accession_number.get(index)?.trim();
            let filed_on = recent.filing_date.get(index).and_then(|d| parse_date(d))?;
            let primary_document = recent.primary_document.get(index)?.trim();
            if accession.is_empty() || primary_document.is_empty() {
                return None;
            }
            Some(FilingRow {
                accession: accession.to_owned(),
                filed_on,
                report_date: recent.report_date.get(index).and_then(|d| parse_date(d)),
                form: form.trim().to_owned(),
                primary_document: primary_document.to_owned(),
            })
        })
        .collect()
}

/// Preferred N-PORT names, then any XML that is not a rendering.
fn select_document(names: &[String]) -> Option<String> {
    for preferred in PREFERRED_XML {
        let found = names.iter().find(|name| name.to_ascii_lowercase().ends_with(preferred));
        if let Some(name) = found {
            return Some(name.clone());
        }
    }

    names
        .iter()
        .find(|name| {
            let lowered = name.to_ascii_lowercase();
            lowered.ends_with(".xml") && !lowered.contains("xsl")
        })
        .cloned()
}

/// `xslFormNPORT-P_X01/primary_doc.xml` is an HTML rendering of `primary_doc.xml`.
fn strip_rendering_prefix(primary_document: &str) -> &str {
    match primary_document.split_once('/') {
        Some((prefix, rest)) if prefix.to_ascii_lowercase().starts_with("xsl") => rest,
        _ => primary_document,
    }
}

/// `{"fields": ["cik","seriesId","classId","symbol"], "data": [[...], ...]}`.
fn find_ticker(table: &Value, ticker: &str) -> Option<MutualFundTicker> {
    let fields: Vec<&str> = table
        .get("fields")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    let position = |name: &str| fields.iter().position(|field| field.eq_ignore_ascii_case(name));
    let (cik_at, series_at, class_at, symbol_at) =
        (position("cik")?, position("seriesId"), position("classId"), position("symbol")?);

    let text = |row: &[Value], index: usize| -> Option<String> {
        match row.get(index)? {
            Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_owned()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    };

    table.get("data")?.as_array()?.iter().find_map(|row| {
        let row = row.as_array()?.as_slice();
        let symbol = text(row, symbol_at)?;
        if !symbol.eq_ignore_ascii_case(ticker.trim()) {
            return None;
        }
        Some(MutualFundTicker {
            cik: Cik::parse(&text(row, cik_at)?).ok()?,
            series_id: series_at.and_then(|index| text(row, index)),
            class_id: class_at.and_then(|index| text(row, index)),
            symbol,
        })
    })
}
