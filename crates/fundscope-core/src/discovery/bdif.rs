//! AMF (BDIF) discovery through the info-financiere open-data search API.
//!
//! Full-text search is fuzzy, so several query strategies are tried in order
//! and every returned record is checked against the requested ISIN.

use serde_json::Value;
use tracing::{debug, info, warn};

use fundscope_store::dates::parse_date;

use crate::discovery::{rank, Discoverer, DiscoveryFuture, DiscoveryQuery, ReportMetadata};
use crate::lookup::FieldAliases;
use crate::transport::SourceClient;
use crate::SourceId;

pub const BDIF_BASE_URL: &str = "https://info-financiere.gouv.fr/api/records/1.0/search/";
pub const BDIF_DATASET: &str = "flux-amf-new-prod";
const DEFAULT_ROWS: u32 = 100;

const RECORD_ISIN: &str = "identificationsociete_iso_cd_isi";
const DOCUMENT_URL: FieldAliases = FieldAliases::new("url", &["url_de_recuperation"]);
const RECORD_DATE: FieldAliases =
    FieldAliases::new("as_of", &["uin_dat_amf", "uin_dat_mar", "informationdeposee_inf_dat_emt"]);
const RECORD_TITLE: FieldAliases =
    FieldAliases::new("title", &["informationdeposee_inf_tit_inf", "code_isin_nom_sc"]);
const RECORD_DOC_TYPE: FieldAliases = FieldAliases::new(
    "doc_type",
    &["informationdeposee_inf_cod_dif", "sous_type_d_information", "type_d_information"],
);

#[derive(Debug, Clone)]
pub struct BdifDiscoverer {
    client: SourceClient,
    base_url: String,
    dataset: String,
    rows: u32,
    attachment_proxy: Option<String>,
}

impl BdifDiscoverer {
    pub fn new(client: SourceClient) -> Self {
        Self {
            client,
            base_url: String::from(BDIF_BASE_URL),
            dataset: String::from(BDIF_DATASET),
            rows: DEFAULT_ROWS,
            attachment_proxy: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Document URLs are rewritten to `<proxy><percent-encoded url>`.
    pub fn with_attachment_proxy(mut self, proxy: Option<String>) -> Self {
        self.attachment_proxy = proxy.filter(|p| !p.trim().is_empty());
        self
    }

    /// Query strings in the order they are tried.
    pub fn strategies(isin: &str) -> Vec<String> {
        let mut strategies = vec![
            isin.to_owned(),
            format!("{RECORD_ISIN}:{isin}"),
            format!("code_isin_nom_sc:\"*{isin}*\""),
        ];
        if let Some(prefix) = isin.get(..9) {
            strategies.push(prefix.to_owned());
        }
        strategies
    }

    fn search_url(&self, query: &str) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}dataset={}&q={}&rows={}",
            self.base_url,
            urlencoding::encode(&self.dataset),
            urlencoding::encode(query),
            self.rows
        )
    }

    fn document_url(&self, url: &str) -> String {
        match &self.attachment_proxy {
            Some(proxy) => format!("{proxy}{}", urlencoding::encode(url)),
            None => url.to_owned(),
        }
    }

    fn reports_from(&self, payload: &Value, isin: &str) -> Vec<ReportMetadata> {
        let Some(records) = payload.get("records").and_then(Value::as_array) else {
            return Vec::new();
        };

        records
            .iter()
            .filter_map(|record| {
                let fields = record.get("fields")?;
                let record_isin =
                    fields.get(RECORD_ISIN).and_then(Value::as_str).unwrap_or_default();
                if !record_isin.trim().eq_ignore_ascii_case(isin) {
                    return None;
                }

                let url = DOCUMENT_URL.first_json_text(fields)?;
                let as_of = RECORD_DATE.first(|key| {
                    fields
                        .get(key)
                        .and_then(Value::as_str)
                        .and_then(|raw| raw.get(..10))
                        .and_then(parse_date)
                })?;

                let doc_type = RECORD_DOC_TYPE.first_json_text(fields).unwrap_or_default();
                let mut report = ReportMetadata::new(self.document_url(&url), as_of, doc_type);
                report.title = RECORD_TITLE.first_json_text(fields);
                report.record_id =
                    record.get("recordid").and_then(Value::as_str).map(str::to_owned);
                Some(report)
            })
            .collect()
    }

    async fn discover_for(&self, query: DiscoveryQuery) -> Vec<ReportMetadata> {
        let Some(isin) = query.isin.as_ref().map(|isin| isin.as_str().to_owned()) else {
            debug!(fund_id = %query.fund_id, "bdif discovery needs an isin");
            return Vec::new();
        };
        if !isin.starts_with("FR") {
            debug!(fund_id = %query.fund_id, %isin, "bdif only covers french isins");
            return Vec::new();
        }

        for strategy in Self::strategies(&isin) {
            let url = self.search_url(&strategy);
            let payload: Value = match self.client.get_json(&url).await {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(
                        %isin,
                        query = %strategy,
                        code = err.code(),
                        error = %err,
                        "bdif search failed"
                    );
                    continue;
                }
            };

            let reports = self.reports_from(&payload, &isin);
            debug!(%isin, query = %strategy, matches = reports.len(), "bdif strategy evaluated");
            if !reports.is_empty() {
                info!(
                    fund_id = %query.fund_id,
                    %isin,
                    reports = reports.len(),
                    "bdif reports discovered"
                );
                return rank(reports, query.target_date);
            }
        }

        info!(fund_id = %query.fund_id, %isin, "no bdif reports found");
        Vec::new()
    }
}

impl Discoverer for BdifDiscoverer {
    fn source(&self) -> SourceId {
        SourceId::Bdif
    }

    fn discover<'a>(&'a self, query: DiscoveryQuery) -> DiscoveryFuture<'a> {
        Box::pin(self.discover_for(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::FixtureHttpClient;
    use crate::source_policy::SourcePolicy;
    use crate::throttling::ThrottleRegistry;
    use serde_json::json;
    use std::sync::Arc;
    use time::macros::date;

    fn discoverer() -> BdifDiscoverer {
        let client = SourceClient::new(
            Arc::new(FixtureHttpClient::new()),
            &SourcePolicy::immediate(SourceId::Bdif),
            &ThrottleRegistry::new(),
        );
        BdifDiscoverer::new(client)
    }

    #[test]
    fn strategies_go_from_exact_to_prefix() {
        let strategies = BdifDiscoverer::strategies("FR0010315770");
        assert_eq!(strategies[0], "FR0010315770");
        assert_eq!(strategies[1], "identificationsociete_iso_cd_isi:FR0010315770");
        assert_eq!(strategies[2], "code_isin_nom_sc:\"*FR0010315770*\"");
        assert_eq!(strategies[3], "FR0010315");
    }

    #[test]
    fn records_for_other_isins_are_rejected() {
        let payload = json!({"records": [
            {"recordid": "a", "fields": {
                "identificationsociete_iso_cd_isi": "FR0010315770",
                "url_de_recuperation": "https://bdif.test/a.pdf",
                "uin_dat_amf": "2024-06-30T00:00:00+00:00",
                "informationdeposee_inf_tit_inf": "Rapport semestriel",
                "type_d_information": "Information périodique"}},
            {"recordid": "b", "fields": {
                "identificationsociete_iso_cd_isi": "FR0010315771",
                "url_de_recuperation": "https://bdif.test/b.pdf",
                "uin_dat_amf": "2024-06-30"}},
            {"recordid": "c", "fields": {
                "identificationsociete_iso_cd_isi": "FR0010315770",
                "url_de_recuperation": "https://bdif.test/c.pdf"}}
        ]});

        let reports = discoverer().reports_from(&payload, "FR0010315770");

        assert_eq!(reports.len(), 1, "mismatched isin and undated records are dropped");
        assert_eq!(reports[0].as_of, date!(2024 - 06 - 30));
        assert_eq!(reports[0].record_id.as_deref(), Some("a"));
        assert_eq!(reports[0].title.as_deref(), Some("Rapport semestriel"));
        assert_eq!(reports[0].doc_type, "Information périodique");
    }

    #[test]
    fn proxy_wraps_document_urls() {
        let discoverer =
            discoverer().with_attachment_proxy(Some(String::from("https://relay.test/?u=")));
        assert_eq!(
            discoverer.document_url("https://bdif.test/a.pdf"),
            "https://relay.test/?u=https%3A%2F%2Fbdif.test%2Fa.pdf"
        );
    }

    #[test]
    fn search_url_encodes_query() {
        let url = discoverer().search_url("code_isin_nom_sc:\"*FR1*\"");
        assert!(url.starts_with(BDIF_BASE_URL));
        assert!(url.contains("dataset=flux-amf-new-prod"));
        assert!(url.contains("q=code_isin_nom_sc%3A%22%2AFR1%2A%22"));
        assert!(url.ends_with("rows=100"));
    }
}
