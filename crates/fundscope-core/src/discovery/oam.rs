//! Officially appointed mechanism discovery for Luxembourg and German funds.
//!
//! Both portals only offer HTML search results, so rows are scraped, titles
//! filtered to periodic financial reports and dates pulled from free text.

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use time::Date;
use tracing::{debug, info, warn};

use crate::discovery::{
    dedupe_by_url, rank, Discoverer, DiscoveryFuture, DiscoveryQuery, ReportMetadata,
};
use crate::lookup::FieldAliases;
use crate::parsers::dates::{extract_date, extract_date_anchored};
use crate::transport::SourceClient;
use crate::SourceId;

pub const LUXSE_SEARCH_URL: &str = "https://www.bourse.lu/oam-search";
pub const BUNDESANZEIGER_SEARCH_URL: &str = "https://www.bundesanzeiger.de/pub/en/search";

const LU_REPORT_TITLES: FieldAliases = FieldAliases::new(
    "report_title",
    &[
        "financial report",
        "annual",
        "half-yearly",
        "semi-annual",
        "semiannual",
        "rapport annuel",
        "rapport semestriel",
    ],
);
const DE_REPORT_TITLES: FieldAliases = FieldAliases::new(
    "report_title",
    &["jahresbericht", "halbjahresbericht", "annual", "half-yearly", "semi-annual"],
);

#[derive(Debug, Clone)]
pub struct OamDiscoverer {
    client: SourceClient,
    luxse_url: String,
    bundesanzeiger_url: String,
}

impl OamDiscoverer {
    pub fn new(client: SourceClient) -> Self {
        Self::with_urls(client, LUXSE_SEARCH_URL, BUNDESANZEIGER_SEARCH_URL)
    }

    pub fn with_urls(
        client: SourceClient,
        luxse_url: impl Into<String>,
        bundesanzeiger_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            luxse_url: luxse_url.into(),
            bundesanzeiger_url: bundesanzeiger_url.into(),
        }
    }

    async fn luxembourg(&self, isin: &str, target: Option<Date>) -> Vec<ReportMetadata> {
        let year = target.map(|d| d.year().to_string()).unwrap_or_default();
        let fields = [
            ("countryOfIssuer", ""),
            ("issuerName", ""),
            ("isinCode", isin),
            ("referenceYear", year.as_str()),
            ("informationType", "Periodic information"),
        ];

        match self.client.post_form(&self.luxse_url, &fields).await {
            Ok(html) => scrape_reports(&html, &self.luxse_url, &LU_REPORT_TITLES, target),
            Err(err) => {
                warn!(isin, code = err.code(), error = %err, "luxse search unavailable");
                Vec::new()
            }
        }
    }

    async fn germany(&self, isin: &str, target: Option<Date>) -> Vec<ReportMetadata> {
        let url = format!("{}?fulltext={}", self.bundesanzeiger_url, urlencoding::encode(isin));
        match self.client.get_text(&url).await {
            Ok(html) => scrape_reports(&html, &self.bundesanzeiger_url, &DE_REPORT_TITLES, target),
            Err(err) => {
                warn!(isin, code = err.code(), error = %err, "bundesanzeiger search unavailable");
                Vec::new()
            }
        }
    }

    async fn discover_for(&self, query: DiscoveryQuery) -> Vec<ReportMetadata> {
        let Some(isin) = query.isin.as_ref().map(|isin| isin.as_str().to_owned()) else {
            debug!(fund_id = %query.fund_id, "oam discovery needs an isin");
            return Vec::new();
        };

        let reports = match query.jurisdiction().as_deref() {
            Some("LU") => self.luxembourg(&isin, query.target_date).await,
            Some("DE") => self.germany(&isin, query.target_date).await,
            other => {
                debug!(
                    fund_id = %query.fund_id,
                    jurisdiction = ?other,
                    "no oam portal for jurisdiction"
                );
                Vec::new()
            }
        };

        let reports = rank(dedupe_by_url(reports), query.target_date);
        info!(fund_id = %query.fund_id, %isin, reports = reports.len(), "oam reports discovered");
        reports
    }
}

impl Discoverer for OamDiscoverer {
    fn source(&self) -> SourceId {
        SourceId::Oam
    }

    fn discover<'a>(&'a self, query: DiscoveryQuery) -> DiscoveryFuture<'a> {
        Box::pin(self.discover_for(query))
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Result rows from either portal: table rows, or Bundesanzeiger's `div.row`
/// result blocks.
fn scrape_reports(
    html: &str,
    page_url: &str,
    titles: &FieldAliases,
    target: Option<Date>,
) -> Vec<ReportMetadata> {
    let document = Html::parse_document(html);
    let (Some(rows), Some(title_cells), Some(links), Some(cells)) = (
        selector("table tbody tr, div.result_container div.row, tr"),
        selector("td.title, div.info a, td:first-child, a"),
        selector("a[href]"),
        selector("td, div.date"),
    ) else {
        return Vec::new();
    };

    let mut reports = Vec::new();
    for row in document.select(&rows) {
        let Some(title) = row.select(&title_cells).next().map(element_text) else {
            continue;
        };
        if !titles.matches_substring(&title) {
            continue;
        }
        let Some(href) = row.select(&links).find_map(|link| link.value().attr("href")) else {
            continue;
        };

        let as_of = extract_date_anchored(&title, target)
            .or_else(|| row.select(&cells).find_map(|cell| extract_date(&element_text(cell))));
        let Some(as_of) = as_of else {
            debug!(%title, "oam row without a recognisable date");
            continue;
        };

        let lowered = title.to_lowercase();
        let half_yearly =
            ["half", "semi", "halbjahr"].iter().any(|marker| lowered.contains(marker));
        let doc_type = if half_yearly {
            "half-yearly"
        } else {
            "annual"
        };

        let Some(url) = absolute_url(page_url, href) else {
            debug!(href, "oam link is not a valid url");
            continue;
        };

        let mut report = ReportMetadata::new(url, as_of, doc_type);
        report.title = Some(title);
        reports.push(report);
    }
    reports
}

/// Resolves `href` against the result page it was found on.
fn absolute_url(page_url: &str, href: &str) -> Option<String> {
    let base = Url::parse(page_url).ok()?;
    base.join(href.trim()).ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    const LUXSE_HTML: &str = r#"
        <html><body><table><tbody>
          <tr><td class="title">Annual report as at 31 December 2023</td>
              <td><a href="/oam/doc/123.pdf">PDF</a></td></tr>
          <tr><td class="title">Semi-annual financial report 2024</td>
              <td>30/06/2024</td><td><a href="https://cdn.bourse.lu/oam/456.pdf">PDF</a></td></tr>
          <tr><td class="title">Notice to shareholders</td>
              <td><a href="/oam/doc/789.pdf">PDF</a></td></tr>
          <tr><td class="title">Annual report</td><td><a href="/oam/doc/000.pdf">PDF</a></td></tr>
        </tbody></table></body></html>"#;

    #[test]
    fn periodic_reports_are_kept_and_links_resolved() {
        let reports = scrape_reports(LUXSE_HTML, LUXSE_SEARCH_URL, &LU_REPORT_TITLES, None);

        assert_eq!(reports.len(), 2, "notice and undated rows are skipped");
        assert_eq!(reports[0].url, "https://www.bourse.lu/oam/doc/123.pdf");
        assert_eq!(reports[0].as_of, date!(2023 - 12 - 31));
        assert_eq!(reports[0].doc_type, "annual");
        assert_eq!(reports[1].url, "https://cdn.bourse.lu/oam/456.pdf");
        assert_eq!(reports[1].doc_type, "half-yearly");
    }

    #[test]
    fn year_only_titles_anchor_to_target() {
        let target = Some(date!(2025 - 06 - 30));
        let reports = scrape_reports(LUXSE_HTML, LUXSE_SEARCH_URL, &LU_REPORT_TITLES, target);
        assert_eq!(reports[1].as_of, date!(2024 - 06 - 30));

        let unanchored = scrape_reports(LUXSE_HTML, LUXSE_SEARCH_URL, &LU_REPORT_TITLES, None);
        assert_eq!(unanchored[1].as_of, date!(2024 - 12 - 31));
    }

    #[test]
    fn bundesanzeiger_result_blocks() {
        let html = r#"<div class="result_container">
            <div class="row"><div class="first">iShares (DE)</div>
              <div class="info"><a href="/pub/en/doc?id=1">Jahresbericht zum 28.02.2024</a></div>
              <div class="date">15.06.2024</div></div>
            <div class="row">
              <div class="info"><a href="/pub/en/doc?id=2">Verkaufsprospekt</a></div></div>
        </div>"#;

        let reports = scrape_reports(html, BUNDESANZEIGER_SEARCH_URL, &DE_REPORT_TITLES, None);

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].as_of, date!(2024 - 02 - 28));
        assert_eq!(reports[0].url, "https://www.bundesanzeiger.de/pub/en/doc?id=1");
    }

    #[test]
    fn absolute_urls() {
        let page = "https://a.test/oam/search/results";
        assert_eq!(absolute_url(page, "/doc.pdf").as_deref(), Some("https://a.test/doc.pdf"));
        assert_eq!(
            absolute_url(page, "docs/report.pdf").as_deref(),
            Some("https://a.test/oam/search/docs/report.pdf")
        );
        assert_eq!(absolute_url(page, "../x.pdf").as_deref(), Some("https://a.test/oam/x.pdf"));
        assert_eq!(absolute_url(page, "http://b.test/z").as_deref(), Some("http://b.test/z"));
        assert_eq!(absolute_url("not a url", "doc.pdf"), None);
    }

    #[test]
    fn relative_report_links_keep_the_page_directory() {
        let html = r#"<table><tbody>
            <tr><td class="title">Annual report as at 31 December 2023</td>
                <td><a href="files/annual-2023.pdf">PDF</a></td></tr>
        </tbody></table>"#;

        let page = "https://www.bourse.lu/oam/issuer/123";
        let reports = scrape_reports(html, page, &LU_REPORT_TITLES, None);

        assert_eq!(reports[0].url, "https://www.bourse.lu/oam/issuer/files/annual-2023.pdf");
    }
}
