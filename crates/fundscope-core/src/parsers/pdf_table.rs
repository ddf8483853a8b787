//! Holdings tables in OAM and BDIF periodic reports.
//!
//! Pages are scored against locale-aware section keywords and their
//! positioned rows are scanned for a header row. Header cells are mapped to
//! canonical fields by lowercase substring match, so column order does not
//! matter. When no table can be recognised a line-based ISIN scan is used
//! instead.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::domain::{Holding, Isin};
use crate::lookup::FieldAliases;
use crate::parsers::dates::extract_date;
use crate::parsers::numbers::parse_number;
use crate::parsers::pdf::{split_cells, LopdfTextExtractor, PdfPage, PdfTextExtractor};
use crate::parsers::{parse_hash, DocumentParser, ParseContext, ParseMetadata, ParseOutcome};
use crate::SourceId;

static ISIN_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2}[A-Z0-9]{9}[0-9])\b").expect("isin pattern is valid"));

const SECTION: FieldAliases = FieldAliases::new(
    "section",
    &[
        "portefeuille",
        "inventaire",
        "composition de l'actif",
        "portfolio",
        "statement of investments",
        "schedule of investments",
        "securities portfolio",
        "holdings",
        "vermögensaufstellung",
        "wertpapiervermögen",
        "bestand",
    ],
);

const HEADER_ISIN: FieldAliases = FieldAliases::new("isin", &["isin"]);
const HEADER_WEIGHT: FieldAliases =
    FieldAliases::new("weight", &["%", "poids", "weight", "anteil"]);
const HEADER_VALUE: FieldAliases = FieldAliases::new(
    "market_value",
    &["valeur", "value", "montant", "market", "kurswert", "amount", "evaluation", "évaluation"],
);
const HEADER_QUANTITY: FieldAliases = FieldAliases::new(
    "quantity",
    &[
        "quantité", "quantite", "quantity", "nombre", "shares", "units", "nominal", "stück",
        "anzahl",
    ],
);
const HEADER_NAME: FieldAliases = FieldAliases::new(
    "name",
    &[
        "désignation",
        "designation",
        "libellé",
        "libelle",
        "intitul",
        "name",
        "instrument",
        "security",
        "description",
        "issuer",
        "bezeichnung",
        "wertpapier",
    ],
);
const HEADER_CURRENCY: FieldAliases =
    FieldAliases::new("currency", &["currency", "devise", "währung", "ccy"]);
const HEADER_COUNTRY: FieldAliases = FieldAliases::new("country", &["pays", "country", "land"]);
const HEADER_CATEGORY: FieldAliases = FieldAliases::new(
    "category",
    &["classe", "asset", "type", "catégor", "categor", "sector", "secteur"],
);

/// Canonical fields in assignment order; a header cell goes to the first
/// field that claims it.
const HEADER_FIELDS: [FieldAliases; 8] = [
    HEADER_ISIN,
    HEADER_WEIGHT,
    HEADER_VALUE,
    HEADER_QUANTITY,
    HEADER_NAME,
    HEADER_CURRENCY,
    HEADER_COUNTRY,
    HEADER_CATEGORY,
];

const TOTAL_MARKERS: [&str; 6] = ["total", "sous-total", "summe", "sum", "gesamt", "insgesamt"];
const HEADER_SEARCH_ROWS: usize = 10;
const CURRENCY_HINTS: [&str; 5] = ["EUR", "USD", "GBP", "CHF", "JPY"];

/// Layout family of the disclosure; controls how strict header detection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableProfile {
    /// Luxembourg and German annual and semi-annual reports.
    Oam,
    /// French AMF filings, which often print narrow tables.
    Bdif,
}

impl TableProfile {
    fn min_header_hits(self) -> usize {
        match self {
            Self::Oam => 3,
            Self::Bdif => 2,
        }
    }

    fn source(self) -> SourceId {
        match self {
            Self::Oam => SourceId::Oam,
            Self::Bdif => SourceId::Bdif,
        }
    }
}

/// Column positions keyed by canonical field name.
#[derive(Debug, Clone)]
struct ColumnMap {
    columns: HashMap<&'static str, usize>,
    currency_hint: Option<String>,
}

impl ColumnMap {
    fn from_header(cells: &[String]) -> Self {
        let mut columns = HashMap::new();
        let mut taken = vec![false; cells.len()];

        for field in HEADER_FIELDS {
            let position = cells
                .iter()
                .enumerate()
                .find(|(index, cell)| !taken[*index] && field.matches_substring(cell))
                .map(|(index, _)| index);
            if let Some(index) = position {
                taken[index] = true;
                columns.insert(field.field, index);
            }
        }

        let currency_hint = columns.get(HEADER_VALUE.field).and_then(|index| {
            let header = cells[*index].to_uppercase();
            CURRENCY_HINTS
                .iter()
                .find(|code| header.contains(*code))
                .map(|code| (*code).to_owned())
        });

        Self {
            columns,
            currency_hint,
        }
    }

    fn hits(&self) -> usize {
        self.columns.len()
    }

    fn cell<'a>(&self, row: &'a [String], field: &FieldAliases) -> Option<&'a str> {
        self.columns
            .get(field.field)
            .and_then(|index| row.get(*index))
            .map(String::as_str)
            .filter(|cell| !cell.trim().is_empty())
    }
}

/// Parser for PDF holdings tables.
#[derive(Clone)]
pub struct PdfTableParser {
    profile: TableProfile,
    extractor: Arc<dyn PdfTextExtractor>,
}

impl PdfTableParser {
    pub fn new(profile: TableProfile) -> Self {
        Self::with_extractor(profile, Arc::new(LopdfTextExtractor))
    }

    pub fn with_extractor(profile: TableProfile, extractor: Arc<dyn PdfTextExtractor>) -> Self {
        Self { profile, extractor }
    }

    pub fn profile(&self) -> TableProfile {
        self.profile
    }

    /// Parses already-extracted page text.
    pub fn parse_pages(
        &self,
        pages: &[PdfPage],
        context: &ParseContext,
        hash: String,
    ) -> ParseOutcome {
        let report_date = pages
            .iter()
            .take(3)
            .find_map(|page| extract_date(&page.text))
            .or_else(|| pages.iter().find_map(|page| extract_date(&page.text)));
        let as_of = report_date.unwrap_or(context.fallback_as_of);

        let candidates = holdings_pages(pages);
        let mut diagnostics = Vec::new();
        let mut holdings = Vec::new();
        let mut pages_scanned = Vec::new();
        let mut header: Option<ColumnMap> = None;

        for page in &candidates {
            pages_scanned.push(page.number);
            let rows = table_rows(page);

            let start = match self.find_header(&rows) {
                Some((index, map)) => {
                    header = Some(map);
                    index + 1
                }
                None => 0,
            };
            let Some(map) = header.as_ref() else {
                continue;
            };

            for row in &rows[start..] {
                if let Some(holding) = row_holding(row, map, context, as_of) {
                    holdings.push(holding);
                }
            }
        }

        if holdings.is_empty() {
            if header.is_none() {
                diagnostics.push(String::from("no holdings table header recognised"));
            }
            holdings = text_fallback(&candidates, context, as_of);
            if !holdings.is_empty() {
                diagnostics.push(String::from("holdings recovered by isin text scan"));
            }
        }

        if report_date.is_none() {
            diagnostics.push(String::from("no report date found"));
        }

        debug!(
            fund_id = %context.fund_id,
            profile = ?self.profile,
            pages = pages_scanned.len(),
            holdings = holdings.len(),
            "pdf tables parsed"
        );

        ParseOutcome {
            metadata: ParseMetadata {
                as_of: report_date,
                n_holdings: holdings.len(),
                parse_hash: hash,
                pages_scanned,
                diagnostics,
                ..ParseMetadata::default()
            },
            holdings,
        }
    }

    fn find_header(&self, rows: &[Vec<String>]) -> Option<(usize, ColumnMap)> {
        rows.iter()
            .take(HEADER_SEARCH_ROWS)
            .enumerate()
            .map(|(index, cells)| (index, ColumnMap::from_header(cells)))
            .filter(|(_, map)| map.hits() >= self.profile.min_header_hits())
            .max_by_key(|(index, map)| (map.hits(), std::cmp::Reverse(*index)))
    }
}

impl DocumentParser for PdfTableParser {
    fn source(&self) -> SourceId {
        self.profile.source()
    }

    fn parse(&self, document: &[u8], context: &ParseContext) -> ParseOutcome {
        let hash = parse_hash(document);
        match self.extractor.pages(document) {
            Ok(pages) => self.parse_pages(&pages, context, hash),
            Err(err) => {
                debug!(fund_id = %context.fund_id, error = %err, "pdf text extraction failed");
                ParseOutcome::failed(hash, err)
            }
        }
    }
}

/// Pages that mention a holdings section, best-scoring first in page order;
/// every page when none does.
fn holdings_pages(pages: &[PdfPage]) -> Vec<&PdfPage> {
    let scored: Vec<&PdfPage> = pages
        .iter()
        .filter(|page| SECTION.count_hits(&page.text) > 0 || ISIN_TOKEN.is_match(&page.text))
        .collect();
    if scored.is_empty() {
        pages.iter().collect()
    } else {
        scored
    }
}

/// Rows with at least two cells; titles and running text are not table rows.
fn table_rows(page: &PdfPage) -> Vec<Vec<String>> {
    page.rows.iter().filter(|cells| cells.len() >= 2).cloned().collect()
}

fn is_total_row(row: &[String]) -> bool {
    row.iter().take(2).any(|cell| {
        let lowered = cell.to_lowercase();
        TOTAL_MARKERS.iter().any(|marker| {
            lowered
                .strip_prefix(marker)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', ':']))
        })
    })
}

fn row_holding(
    row: &[String],
    map: &ColumnMap,
    context: &ParseContext,
    as_of: time::Date,
) -> Option<Holding> {
    if is_total_row(row) {
        return None;
    }

    let isin = map
        .cell(row, &HEADER_ISIN)
        .and_then(|cell| Isin::parse(cell).ok())
        .map(String::from);
    let name = map
        .cell(row, &HEADER_NAME)
        .filter(|cell| parse_number(cell).is_none())
        .map(str::to_owned)
        .or_else(|| isin.clone())?;

    let market_value = map.cell(row, &HEADER_VALUE).and_then(parse_number);
    let weight = map.cell(row, &HEADER_WEIGHT).and_then(parse_number);
    let quantity = map.cell(row, &HEADER_QUANTITY).and_then(parse_number);
    if market_value.is_none() && weight.is_none() && quantity.is_none() {
        return None;
    }

    let mut holding = Holding::new(context.fund_id.clone(), as_of, name);
    holding.isin = isin;
    holding.market_value_local = market_value;
    holding.reported_weight_pct = weight;
    holding.quantity = quantity;
    holding.currency = map
        .cell(row, &HEADER_CURRENCY)
        .map(str::to_uppercase)
        .or_else(|| map.currency_hint.clone());
    holding.country_raw = map.cell(row, &HEADER_COUNTRY).map(str::to_owned);
    holding.category_raw = map.cell(row, &HEADER_CATEGORY).map(str::to_owned);
    holding.source_url = context.source_url.clone();
    holding.content_hash = context.content_hash.clone();
    Some(holding)
}

fn text_fallback(pages: &[&PdfPage], context: &ParseContext, as_of: time::Date) -> Vec<Holding> {
    let mut holdings = Vec::new();
    for page in pages {
        for line in page.text.lines() {
            let Some(found) = ISIN_TOKEN.find(line) else {
                continue;
            };
            let Ok(isin) = Isin::parse(found.as_str()) else {
                continue;
            };

            let before = line[..found.start()].trim();
            let after = &line[found.end()..];
            let mut name = None;
            let mut weight = None;
            let mut market_value = None;
            for token in split_cells(after) {
                match parse_number(&token) {
                    Some(value) if token.contains('%') => weight = Some(value),
                    Some(value) => market_value = Some(value),
                    None if name.is_none() => name = Some(token),
                    None => {}
                }
            }

            let name = if before.is_empty() { name } else { Some(before.to_owned()) };
            let name = name.unwrap_or_else(|| isin.to_string());
            let mut holding = Holding::new(context.fund_id.clone(), as_of, name);
            holding.isin = Some(isin.into());
            holding.market_value_local = market_value;
            holding.reported_weight_pct = weight;
            holding.source_url = context.source_url.clone();
            holding.content_hash = context.content_hash.clone();
            holdings.push(holding);
        }
    }
    holdings
}
