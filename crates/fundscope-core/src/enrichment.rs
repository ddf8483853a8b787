//! Raw holdings to gold holdings.
//!
//! Steps, in order: CUSIP to ISIN resolution from a reference table, market
//! value weights, country normalization, asset class mapping, version stamp.
//! Every step is a pure function of its inputs, so enriching gold output a
//! second time changes nothing.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use fundscope_store::StoreError;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::{AssetClass, GoldHolding, Holding, Isin};

pub const ENRICHMENT_VERSION: u32 = 1;
pub const UNKNOWN: &str = "Unknown";

/// Prefixes that do not name a country of risk.
const SUPRANATIONAL_PREFIXES: [&str; 2] = ["XS", "EU"];

const COUNTRY_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "US",
        &[
            "USA",
            "UNITED STATES",
            "UNITED STATES OF AMERICA",
            "ETATS-UNIS",
            "ÉTATS-UNIS",
            "VEREINIGTE STAATEN",
        ],
    ),
    (
        "GB",
        &["UK", "UNITED KINGDOM", "GREAT BRITAIN", "ROYAUME-UNI", "GROSSBRITANNIEN", "ENGLAND"],
    ),
    ("FR", &["FRANCE", "FRANKREICH"]),
    ("DE", &["GERMANY", "ALLEMAGNE", "DEUTSCHLAND"]),
    ("LU", &["LUXEMBOURG", "LUXEMBURG"]),
    ("NL", &["NETHERLANDS", "THE NETHERLANDS", "PAYS-BAS", "NIEDERLANDE", "HOLLAND"]),
    ("IE", &["IRELAND", "IRLANDE", "IRLAND"]),
    ("CH", &["SWITZERLAND", "SUISSE", "SCHWEIZ"]),
    ("IT", &["ITALY", "ITALIE", "ITALIEN"]),
    ("ES", &["SPAIN", "ESPAGNE", "SPANIEN"]),
    ("BE", &["BELGIUM", "BELGIQUE", "BELGIEN"]),
    ("AT", &["AUSTRIA", "AUTRICHE", "ÖSTERREICH"]),
    ("SE", &["SWEDEN", "SUÈDE", "SUEDE", "SCHWEDEN"]),
    ("DK", &["DENMARK", "DANEMARK", "DÄNEMARK"]),
    ("FI", &["FINLAND", "FINLANDE", "FINNLAND"]),
    ("NO", &["NORWAY", "NORVÈGE", "NORVEGE", "NORWEGEN"]),
    ("JP", &["JAPAN", "JAPON"]),
    ("CN", &["CHINA", "CHINE"]),
    ("HK", &["HONG KONG"]),
    ("CA", &["CANADA", "KANADA"]),
    ("AU", &["AUSTRALIA", "AUSTRALIE", "AUSTRALIEN"]),
    ("KR", &["SOUTH KOREA", "KOREA", "CORÉE DU SUD"]),
    ("TW", &["TAIWAN"]),
    ("IN", &["INDIA", "INDE", "INDIEN"]),
    ("BR", &["BRAZIL", "BRÉSIL", "BRESIL", "BRASILIEN"]),
];

/// Officially assigned ISO 3166-1 alpha-2 codes, sorted.
const ISO_ALPHA2: &[&str] = &[
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX", "AZ",
    "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ", "BR", "BS",
    "BT", "BV", "BW", "BY", "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK", "CL", "CM", "CN",
    "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM", "DO", "DZ", "EC", "EE",
    "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK", "FM", "FO", "FR", "GA", "GB", "GD", "GE", "GF",
    "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS", "GT", "GU", "GW", "GY", "HK", "HM",
    "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN", "IO", "IQ", "IR", "IS", "IT", "JE", "JM",
    "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN", "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC",
    "LI", "LK", "LR", "LS", "LT", "LU", "LV", "LY", "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK",
    "ML", "MM", "MN", "MO", "MP", "MQ", "MR", "MS", "MT", "MU", "MV", "MW", "MX", "MY", "MZ", "NA",
    "NC", "NE", "NF", "NG", "NI", "NL", "NO", "NP", "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG",
    "PH", "PK", "PL", "PM", "PN", "PR", "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW",
    "SA", "SB", "SC", "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS",
    "ST", "SV", "SX", "SY", "SZ", "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO",
    "TR", "TT", "TV", "TW", "TZ", "UA", "UG", "UM", "US", "UY", "UZ", "VA", "VC", "VE", "VG", "VI",
    "VN", "VU", "WF", "WS", "YE", "YT", "ZA", "ZM", "ZW",
];

/// N-PORT `assetCat` codes.
const NPORT_CATEGORY_CODES: &[(&str, AssetClass)] = &[
    ("EC", AssetClass::Equity),
    ("EP", AssetClass::Equity),
    ("DBT", AssetClass::FixedIncome),
    ("ABS-MBS", AssetClass::FixedIncome),
    ("ABS-ASBS", AssetClass::FixedIncome),
    ("ABS-CBDO", AssetClass::FixedIncome),
    ("ABS-O", AssetClass::FixedIncome),
    ("LON", AssetClass::FixedIncome),
    ("SN", AssetClass::FixedIncome),
    ("DE", AssetClass::Derivatives),
    ("DCO", AssetClass::Derivatives),
    ("DCR", AssetClass::Derivatives),
    ("DFE", AssetClass::Derivatives),
    ("DIR", AssetClass::Derivatives),
    ("DO", AssetClass::Derivatives),
    ("STIV", AssetClass::Cash),
    ("RA", AssetClass::Cash),
    ("RE", AssetClass::Other),
    ("COMM", AssetClass::Other),
];

/// Keyword table, checked in order; derivatives first so that
/// "equity future" is not read as equity.
const CATEGORY_KEYWORDS: &[(AssetClass, &[&str])] = &[
    (
        AssetClass::Derivatives,
        &[
            "derivative",
            "dérivé",
            "derive",
            "future",
            "option",
            "swap",
            "forward",
            "warrant",
            "termingeschäft",
        ],
    ),
    (
        AssetClass::Cash,
        &[
            "cash",
            "liquidit",
            "money market",
            "monétaire",
            "monetaire",
            "repurchase",
            "deposit",
            "dépôt",
            "bankguthaben",
        ],
    ),
    (
        AssetClass::FixedIncome,
        &[
            "fixed income",
            "bond",
            "debt",
            "obligation",
            "anleihe",
            "rente",
            "note",
            "treasury",
            "convertible",
            "loan",
        ],
    ),
    (
        AssetClass::Equity,
        &["equity", "action", "aktie", "share", "stock", "common", "preferred"],
    ),
];

#[derive(Debug, Deserialize)]
struct ReferenceRow {
    cusip: String,
    isin: String,
}

/// Applies the enrichment steps to a parsed snapshot.
#[derive(Debug, Clone, Default)]
pub struct Enricher {
    cusip_to_isin: HashMap<String, String>,
}

impl Enricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(cusip_to_isin: HashMap<String, String>) -> Self {
        let cusip_to_isin = cusip_to_isin
            .into_iter()
            .map(|(cusip, isin)| {
                (cusip.trim().to_ascii_uppercase(), isin.trim().to_ascii_uppercase())
            })
            .collect();
        Self { cusip_to_isin }
    }

    /// Loads `cusip,isin` rows from a CSV reference file. A missing file
    /// yields an enricher without CUSIP resolution.
    pub fn from_reference_file(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "no cusip reference table; isin resolution disabled");
            return Ok(Self::new());
        }

        let mut reader = csv::Reader::from_reader(File::open(path)?);
        let mut table = HashMap::new();
        for row in reader.deserialize::<ReferenceRow>() {
            let row = row?;
            if Isin::looks_like(&row.isin) {
                table.insert(row.cusip, row.isin);
            }
        }
        debug!(path = %path.display(), entries = table.len(), "loaded cusip reference table");
        Ok(Self::with_reference(table))
    }

    pub fn reference_len(&self) -> usize {
        self.cusip_to_isin.len()
    }

    pub fn enrich(&self, holdings: Vec<Holding>) -> Vec<GoldHolding> {
        let holdings: Vec<Holding> = holdings.into_iter().map(|h| self.resolve_isin(h)).collect();
        let weights = market_value_weights(&holdings);

        holdings
            .into_iter()
            .zip(weights)
            .map(|(holding, weight_pct)| {
                let country =
                    normalize_country(holding.country_raw.as_deref(), holding.isin.as_deref());
                let asset_class =
                    map_asset_class(holding.category_raw.as_deref(), holding.derivative_flag);
                GoldHolding {
                    holding,
                    weight_pct,
                    country,
                    asset_class,
                    sector: String::from(UNKNOWN),
                    enrichment_version: ENRICHMENT_VERSION,
                }
            })
            .collect()
    }

    /// Re-runs enrichment over normalized output, using the normalized
    /// country and asset class as inputs.
    pub fn enrich_gold(&self, gold: Vec<GoldHolding>) -> Vec<GoldHolding> {
        let holdings: Vec<Holding> = gold.iter().map(|g| g.holding.clone()).collect();
        let weights = market_value_weights(&holdings);

        gold.into_iter()
            .zip(weights)
            .map(|(mut gold, weight_pct)| {
                gold.holding = self.resolve_isin(gold.holding);
                gold.weight_pct = weight_pct;
                gold.country =
                    normalize_country(Some(&gold.country), gold.holding.isin.as_deref());
                gold.asset_class =
                    map_asset_class(Some(gold.asset_class.label()), gold.holding.derivative_flag);
                gold.enrichment_version = ENRICHMENT_VERSION;
                gold
            })
            .collect()
    }

    fn resolve_isin(&self, mut holding: Holding) -> Holding {
        if holding.isin.is_none() {
            if let Some(isin) = holding
                .cusip
                .as_deref()
                .and_then(|cusip| self.cusip_to_isin.get(&cusip.trim().to_ascii_uppercase()))
            {
                holding.isin = Some(isin.clone());
            }
        }
        holding
    }
}

/// Percent of total positive market value. Shorts keep their row but get
/// zero weight and are left out of the denominator.
pub fn market_value_weights(holdings: &[Holding]) -> Vec<f64> {
    let positive: Vec<f64> = holdings
        .iter()
        .map(|h| h.market_value_local.filter(|v| *v > 0.0).unwrap_or(0.0))
        .collect();
    let total: f64 = positive.iter().sum();

    if total <= 0.0 {
        if !holdings.is_empty() {
            warn!(
                fund_id = holdings.first().map(|h| h.fund_id.as_str()).unwrap_or_default(),
                positions = holdings.len(),
                "no positive market value; weights set to zero"
            );
        }
        return vec![0.0; holdings.len()];
    }

    positive.into_iter().map(|value| value / total * 100.0).collect()
}

/// Known country name or assigned ISO-2 code, else the ISIN prefix, else
/// `Unknown`.
pub fn normalize_country(raw: Option<&str>, isin: Option<&str>) -> String {
    let cleaned = raw.map(|r| r.trim().to_uppercase()).filter(|r| !r.is_empty());

    if let Some(value) = cleaned.as_deref() {
        if let Some((code, _)) = COUNTRY_SYNONYMS
            .iter()
            .find(|(_, names)| names.iter().any(|name| *name == value))
        {
            return (*code).to_owned();
        }
        if ISO_ALPHA2.binary_search(&value).is_ok() {
            return value.to_owned();
        }
    }

    isin.and_then(|isin| Isin::parse(isin).ok())
        .map(|isin| isin.country_code().to_owned())
        .filter(|prefix| !SUPRANATIONAL_PREFIXES.contains(&prefix.as_str()))
        .unwrap_or_else(|| String::from(UNKNOWN))
}

/// Canonical label, then N-PORT code, then keyword, then the derivative flag.
pub fn map_asset_class(category: Option<&str>, derivative_flag: bool) -> AssetClass {
    let category = category.map(str::trim).filter(|c| !c.is_empty());

    if let Some(raw) = category {
        if let Ok(class) = raw.parse::<AssetClass>() {
            return class;
        }

        let code = raw.to_ascii_uppercase();
        if let Some((_, class)) = NPORT_CATEGORY_CODES.iter().find(|(known, _)| *known == code) {
            return *class;
        }

        let lowered = raw.to_lowercase();
        if let Some((class, _)) = CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        {
            return *class;
        }
    }

    if derivative_flag {
        AssetClass::Derivatives
    } else {
        AssetClass::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn holding(name: &str, value: Option<f64>) -> Holding {
        let mut holding = Holding::new("SPY", date!(2024 - 03 - 31), name);
        holding.market_value_local = value;
        holding
    }

    #[test]
    fn weights_use_positive_market_value_only() {
        let holdings = vec![
            holding("A", Some(300.0)),
            holding("B", Some(100.0)),
            holding("Short", Some(-50.0)),
            holding("Missing", None),
        ];

        let gold = Enricher::new().enrich(holdings);

        assert_eq!(gold.len(), 4, "shorts and blanks keep their rows");
        assert!((gold[0].weight_pct - 75.0).abs() < 1e-9);
        assert!((gold[1].weight_pct - 25.0).abs() < 1e-9);
        assert_eq!(gold[2].weight_pct, 0.0);
        assert_eq!(gold[3].weight_pct, 0.0);
    }

    #[test]
    fn no_market_value_at_all_gives_zero_weights() {
        let gold = Enricher::new().enrich(vec![holding("A", None), holding("B", Some(-1.0))]);
        assert!(gold.iter().all(|g| g.weight_pct == 0.0));
    }

    #[test]
    fn cusip_resolves_missing_isin() {
        let enricher = Enricher::with_reference(HashMap::from([(
            String::from("037833100"),
            String::from("US0378331005"),
        )]));
        let mut apple = holding("Apple", Some(1.0));
        apple.cusip = Some(String::from("037833100"));
        let mut kept = holding("Other", Some(1.0));
        kept.cusip = Some(String::from("037833100"));
        kept.isin = Some(String::from("US5949181045"));

        let gold = enricher.enrich(vec![apple, kept]);

        assert_eq!(gold[0].holding.isin.as_deref(), Some("US0378331005"));
        assert_eq!(gold[1].holding.isin.as_deref(), Some("US5949181045"));
    }

    #[test]
    fn reference_file_loads_and_missing_file_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cusip_to_isin.csv");
        std::fs::write(&path, "cusip,isin\n037833100,US0378331005\nBAD,not-an-isin\n")
            .expect("write");

        let enricher = Enricher::from_reference_file(&path).expect("load");
        assert_eq!(enricher.reference_len(), 1);

        let missing = Enricher::from_reference_file(&temp.path().join("absent.csv")).expect("load");
        assert_eq!(missing.reference_len(), 0);
    }

    #[test]
    fn country_synonyms_and_isin_fallback() {
        assert_eq!(normalize_country(Some("United States"), None), "US");
        assert_eq!(normalize_country(Some("uk"), None), "GB");
        assert_eq!(normalize_country(Some("Allemagne"), None), "DE");
        assert_eq!(normalize_country(Some(" fr "), None), "FR");
        assert_eq!(normalize_country(None, Some("NL0000235190")), "NL");
        assert_eq!(normalize_country(Some(""), Some("XS1234567890")), UNKNOWN);
        assert_eq!(normalize_country(Some("Atlantis"), None), UNKNOWN);
    }

    #[test]
    fn unassigned_two_letter_codes_are_not_countries() {
        assert_eq!(normalize_country(Some("UK"), Some("GB0002374006")), "GB");
        assert_eq!(normalize_country(Some("ZZ"), Some("JP3633400001")), "JP");
        assert_eq!(normalize_country(Some("EU"), None), UNKNOWN);
        assert_eq!(normalize_country(Some("ch"), None), "CH");
    }

    #[test]
    fn asset_classes_from_codes_keywords_and_flag() {
        assert_eq!(map_asset_class(Some("EC"), false), AssetClass::Equity);
        assert_eq!(map_asset_class(Some("ABS-MBS"), false), AssetClass::FixedIncome);
        assert_eq!(map_asset_class(Some("STIV"), false), AssetClass::Cash);
        assert_eq!(map_asset_class(Some("Obligations d'État"), false), AssetClass::FixedIncome);
        assert_eq!(map_asset_class(Some("Actions"), false), AssetClass::Equity);
        assert_eq!(map_asset_class(Some("Equity index future"), false), AssetClass::Derivatives);
        assert_eq!(map_asset_class(Some("Fixed Income"), false), AssetClass::FixedIncome);
        assert_eq!(map_asset_class(None, true), AssetClass::Derivatives);
        assert_eq!(map_asset_class(Some("Real estate fund"), false), AssetClass::Other);
    }

    #[test]
    fn enrichment_is_idempotent() {
        let mut bond = holding("US Treasury 2030", Some(250.0));
        bond.category_raw = Some(String::from("DBT"));
        bond.country_raw = Some(String::from("United States"));
        let mut stock = holding("Siemens", Some(750.0));
        stock.category_raw = Some(String::from("Aktien"));
        stock.isin = Some(String::from("DE0007236101"));

        let enricher = Enricher::new();
        let first = enricher.enrich(vec![bond, stock]);
        let second = enricher.enrich_gold(first.clone());

        assert_eq!(first, second);
        assert_eq!(second[0].country, "US");
        assert_eq!(second[1].country, "DE");
        assert_eq!(second[1].asset_class, AssetClass::Equity);
    }
}
