use fundscope_store::dates::parse_date;
use time::Date;
use tracing::debug;

use crate::domain::{Holding, Isin};
use crate::lookup::FieldAliases;
use crate::parsers::dates::extract_date;
use crate::parsers::numbers::parse_number;
use crate::parsers::xml_tree::XmlNode;
use crate::parsers::{parse_hash, DocumentParser, ParseContext, ParseMetadata, ParseOutcome};
use crate::SourceId;

const REPORT_DATE: FieldAliases = FieldAliases::new(
    "report_date",
    &["reportingPeriodEndDate", "repPdDate", "repPdEnded", "reportDate"],
);
const SERIES_ID: FieldAliases = FieldAliases::new("series_id", &["seriesId", "series_id"]);

const NAME: FieldAliases =
    FieldAliases::new("name", &["name", "issuerName", "title", "description"]);
const CUSIP: FieldAliases = FieldAliases::new("cusip", &["cusip"]);
const TICKER: FieldAliases = FieldAliases::new("ticker", &["ticker"]);
const QUANTITY: FieldAliases =
    FieldAliases::new("quantity", &["balance", "quantity", "shares", "units"]);
const VALUE: FieldAliases =
    FieldAliases::new("market_value", &["valUSD", "value", "marketValue", "fairValue"]);
const WEIGHT: FieldAliases = FieldAliases::new("weight", &["pctVal", "percentage"]);
const CURRENCY: FieldAliases =
    FieldAliases::new("currency", &["curCd", "currency", "currencyCode"]);
const CATEGORY: FieldAliases =
    FieldAliases::new("category", &["assetCat", "assetCategory", "category", "instrumentType"]);
const COUNTRY: FieldAliases =
    FieldAliases::new("country", &["invCountry", "country", "countryCode", "issuerCountry"]);
const ISSUER: FieldAliases = FieldAliases::new("issuer", &["issuerName", "issuer", "name"]);
const DERIVATIVE: FieldAliases = FieldAliases::new("derivative", &["isDerivative", "derivative"]);
const MATURITY: FieldAliases =
    FieldAliases::new("maturity", &["maturityDt", "maturityDate", "maturity"]);
const COUPON: FieldAliases =
    FieldAliases::new("coupon", &["couponRt", "couponRate", "coupon", "interestRate"]);

const POSITION_TAGS: [&str; 3] = ["invstOrSec", "investment", "holding"];
const PLACEHOLDER_IDS: [&str; 5] = ["N/A", "NA", "NONE", "000000000", "0"];

/// Parser for SEC Form N-PORT XML submissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NportXmlParser;

impl NportXmlParser {
    pub fn new() -> Self {
        Self
    }

    fn report_date(root: &XmlNode) -> Option<Date> {
        if let Some(date) = root.first_value(&REPORT_DATE).and_then(|raw| parse_report_date(&raw)) {
            return Some(date);
        }

        root.descendants()
            .filter(|node| {
                let lowered = node.name.to_ascii_lowercase();
                lowered.contains("period") && lowered.contains("end")
            })
            .find_map(|node| node.text().and_then(parse_report_date))
    }

    fn holding(node: &XmlNode, context: &ParseContext, as_of: Date) -> Option<Holding> {
        let isin = isin_of(node);
        let cusip = node.first_value(&CUSIP).filter(|v| !is_placeholder(v));
        let ticker = node.first_value(&TICKER).filter(|v| !is_placeholder(v));
        let name = node.first_value(&NAME);

        let name = match (name, &isin, &cusip) {
            (Some(name), _, _) => name,
            (None, Some(id), _) | (None, None, Some(id)) => id.clone(),
            (None, None, None) => return None,
        };

        let mut holding = Holding::new(context.fund_id.clone(), as_of, name);
        holding.isin = isin;
        holding.cusip = cusip;
        holding.ticker = ticker;
        holding.quantity = node.first_value(&QUANTITY).and_then(|v| parse_number(&v));
        holding.market_value_local = node.first_value(&VALUE).and_then(|v| parse_number(&v));
        holding.reported_weight_pct = node.first_value(&WEIGHT).and_then(|v| parse_number(&v));
        holding.currency = Some(
            node.first_value(&CURRENCY)
                .map(|v| v.to_ascii_uppercase())
                .unwrap_or_else(|| String::from("USD")),
        );
        holding.category_raw = node.first_value(&CATEGORY);
        holding.country_raw = node.first_value(&COUNTRY);
        holding.issuer_name = node.first_value(&ISSUER);
        holding.derivative_flag = node.find("derivativeInfo").is_some()
            || node
                .first_value(&DERIVATIVE)
                .is_some_and(|v| {
                    matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "y" | "1")
                });
        holding.maturity = node.first_value(&MATURITY);
        holding.coupon = node.first_value(&COUPON).and_then(|v| parse_number(&v));
        holding.source_url = context.source_url.clone();
        holding.content_hash = context.content_hash.clone();
        Some(holding)
    }
}

impl DocumentParser for NportXmlParser {
    fn source(&self) -> SourceId {
        SourceId::Nport
    }

    fn parse(&self, document: &[u8], context: &ParseContext) -> ParseOutcome {
        let hash = parse_hash(document);
        let root = match XmlNode::parse(document) {
            Ok(root) => root,
            Err(err) => {
                debug!(
                    fund_id = %context.fund_id,
                    error = %err,
                    "N-PORT document is not well-formed"
                );
                return ParseOutcome::failed(hash, err);
            }
        };

        let report_date = Self::report_date(&root);
        let as_of = report_date.unwrap_or(context.fallback_as_of);

        let positions = POSITION_TAGS
            .iter()
            .map(|tag| root.find_all(tag))
            .find(|nodes| !nodes.is_empty())
            .unwrap_or_default();

        let mut diagnostics = Vec::new();
        if positions.is_empty() {
            diagnostics.push(String::from("no investment elements found"));
        }
        if report_date.is_none() {
            diagnostics.push(String::from("no reporting period date found"));
        }

        let holdings: Vec<Holding> = positions
            .into_iter()
            .filter_map(|node| Self::holding(node, context, as_of))
            .collect();

        let mut class_ids: Vec<String> = Vec::new();
        for node in root.find_all("classId") {
            if let Some(id) = node.text() {
                if !class_ids.iter().any(|known| known == id) {
                    class_ids.push(id.to_owned());
                }
            }
        }

        ParseOutcome {
            metadata: ParseMetadata {
                as_of: report_date,
                n_holdings: holdings.len(),
                parse_hash: hash,
                series_id: root.first_value(&SERIES_ID),
                class_ids,
                diagnostics,
                ..ParseMetadata::default()
            },
            holdings,
        }
    }
}

fn parse_report_date(raw: &str) -> Option<Date> {
    let trimmed = raw.trim();
    parse_date(trimmed).or_else(|| extract_date(trimmed))
}

fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_IDS
        .iter()
        .any(|placeholder| value.trim().eq_ignore_ascii_case(placeholder))
}

/// `<isin value=...>` or text, else an `<other otherDesc="ISIN" value=...>`.
fn isin_of(node: &XmlNode) -> Option<String> {
    if let Some(isin) = node.value_of("isin").and_then(|v| Isin::parse(&v).ok()) {
        return Some(isin.into());
    }

    node.descendants()
        .filter(|child| {
            child
                .attribute("otherDesc")
                .or_else(|| child.attribute("type"))
                .is_some_and(|desc| desc.eq_ignore_ascii_case("isin"))
        })
        .find_map(|child| child.attribute("value").or_else(|| child.text()))
        .and_then(|raw| Isin::parse(raw).ok())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    const FILING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<edgarSubmission xmlns="http://www.sec.gov/edgar/nport" xmlns:com="http://www.sec.gov/edgar/common">
  <headerData>
    <filerInfo>
      <seriesClassInfo>
        <seriesId>S000004310</seriesId>
        <classId>C000012081</classId>
      </seriesClassInfo>
    </filerInfo>
  </headerData>
  <formData>
    <genInfo>
      <repPdEnd>2024-09-30</repPdEnd>
      <repPdDate>2024-03-31</repPdDate>
    </genInfo>
    <invstOrSecs>
      <invstOrSec>
        <name>Apple Inc</name>
        <lei>HWUPKR0MPOU8FGXBT394</lei>
        <title>Apple Inc</title>
        <cusip>037833100</cusip>
        <identifiers><isin value="US0378331005"/></identifiers>
        <balance>1,000</balance>
        <units>NS</units>
        <curCd>USD</curCd>
        <valUSD>171000.50</valUSD>
        <pctVal>6.5</pctVal>
        <assetCat>EC</assetCat>
        <invCountry>US</invCountry>
      </invstOrSec>
      <invstOrSec>
        <name>S&amp;P 500 E-mini Future</name>
        <cusip>N/A</cusip>
        <identifiers><other otherDesc="ISIN" value="XS0000000009"/></identifiers>
        <balance>10</balance>
        <valUSD>-2500</valUSD>
        <currencyConditional curCd="eur" exchangeRt="1.08"/>
        <assetCat>DE</assetCat>
        <derivativeInfo><futrDeriv derivCat="FUT"/></derivativeInfo>
      </invstOrSec>
    </invstOrSecs>
  </formData>
</edgarSubmission>"#;

    fn context() -> ParseContext {
        ParseContext::new("SPY", date!(2024 - 05 - 01))
    }

    #[test]
    fn extracts_positions_with_first_matching_tags() {
        let outcome = NportXmlParser.parse(FILING.as_bytes(), &context());

        assert_eq!(outcome.holdings.len(), 2);
        let apple = &outcome.holdings[0];
        assert_eq!(apple.instrument_name_raw, "Apple Inc");
        assert_eq!(apple.isin.as_deref(), Some("US0378331005"));
        assert_eq!(apple.cusip.as_deref(), Some("037833100"));
        assert_eq!(apple.quantity, Some(1_000.0));
        assert_eq!(apple.market_value_local, Some(171_000.5));
        assert_eq!(apple.reported_weight_pct, Some(6.5));
        assert_eq!(apple.category_raw.as_deref(), Some("EC"));
        assert_eq!(apple.country_raw.as_deref(), Some("US"));
        assert!(!apple.derivative_flag);
    }

    #[test]
    fn reads_identifiers_and_currency_from_attributes() {
        let outcome = NportXmlParser.parse(FILING.as_bytes(), &context());
        let future = &outcome.holdings[1];

        assert_eq!(future.instrument_name_raw, "S&P 500 E-mini Future");
        assert_eq!(future.cusip, None, "N/A is a placeholder");
        assert_eq!(future.isin.as_deref(), Some("XS0000000009"));
        assert_eq!(future.currency.as_deref(), Some("EUR"));
        assert_eq!(future.market_value_local, Some(-2_500.0));
        assert!(future.derivative_flag);
    }

    #[test]
    fn reporting_period_date_and_series_metadata() {
        let outcome = NportXmlParser.parse(FILING.as_bytes(), &context());

        assert_eq!(outcome.metadata.as_of, Some(date!(2024 - 03 - 31)));
        assert!(outcome.holdings.iter().all(|h| h.as_of == date!(2024 - 03 - 31)));
        assert_eq!(outcome.metadata.series_id.as_deref(), Some("S000004310"));
        assert_eq!(outcome.metadata.class_ids, vec![String::from("C000012081")]);
        assert_eq!(outcome.metadata.parse_hash.len(), 16);
    }

    #[test]
    fn falls_back_to_any_period_end_element() {
        let xml = r#"<root><info><fiscalPeriodEnd>2023-12-31</fiscalPeriodEnd></info>
            <investment><name>Bond</name><value>10</value></investment></root>"#;
        let outcome = NportXmlParser.parse(xml.as_bytes(), &context());

        assert_eq!(outcome.metadata.as_of, Some(date!(2023 - 12 - 31)));
        assert_eq!(outcome.holdings.len(), 1);
    }

    #[test]
    fn malformed_document_yields_empty_result_with_diagnostic() {
        let outcome = NportXmlParser.parse(b"<edgarSubmission><formData>", &context());
        assert!(outcome.holdings.is_empty());

        let outcome = NportXmlParser.parse(b"<a><b></a>", &context());
        assert!(outcome.holdings.is_empty());
        assert!(outcome.metadata.error.is_some());
    }

    #[test]
    fn missing_date_uses_fallback() {
        let xml = "<root><invstOrSec><name>Cash</name></invstOrSec></root>";
        let outcome = NportXmlParser.parse(xml.as_bytes(), &context());

        assert_eq!(outcome.metadata.as_of, None);
        assert_eq!(outcome.holdings[0].as_of, date!(2024 - 05 - 01));
        assert!(outcome.metadata.diagnostics.iter().any(|d| d.contains("date")));
    }
}
