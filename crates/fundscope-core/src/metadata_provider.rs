//! General market-data lookups used by auto-registration and the
//! auto-snapshot fallback: instrument profiles and a fund's published top
//! holdings.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SourceErrorKind;
use crate::http_client::HttpRequest;
use crate::transport::SourceClient;
use crate::SourceError;

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentProfile {
    pub symbol: String,
    pub name: Option<String>,
    /// Provider classification such as `ETF`, `MUTUALFUND` or `EQUITY`.
    pub quote_type: Option<String>,
    pub country: Option<String>,
    pub sector: Option<String>,
    pub fund_family: Option<String>,
}

impl InstrumentProfile {
    /// `Some(true)` for funds, `Some(false)` for single stocks, `None` when
    /// the provider did not say.
    pub fn is_fund(&self) -> Option<bool> {
        match self.quote_type.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("ETF" | "MUTUALFUND") => Some(true),
            Some("EQUITY") => Some(false),
            _ => None,
        }
    }
}

/// One constituent as published by the provider; weights are fractions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHolding {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub weight: Option<f64>,
}

pub trait MetadataProvider: Send + Sync {
    fn instrument_profile<'a>(
        &'a self,
        symbol: &'a str,
    ) -> ProviderFuture<'a, Option<InstrumentProfile>>;

    fn top_holdings<'a>(&'a self, symbol: &'a str) -> ProviderFuture<'a, Vec<ProviderHolding>>;

    /// Listing symbol for an ISIN, when the provider can resolve one.
    fn symbol_for_isin<'a>(&'a self, isin: &'a str) -> ProviderFuture<'a, Option<String>>;
}

// ============================================================================
// Crumb authentication
// ============================================================================

pub const YAHOO_COOKIE_URL: &str = "https://fc.yahoo.com";
pub const YAHOO_CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
pub const YAHOO_API_BASE: &str = "https://query2.finance.yahoo.com";
const YAHOO_REFERER: &str = "https://finance.yahoo.com/";

/// Session crumb required by the quoteSummary endpoints. The session cookie
/// itself lives in the HTTP client's cookie jar.
#[derive(Debug, Clone)]
struct CrumbAuth {
    cookie_url: String,
    crumb_url: String,
    cached: Arc<Mutex<Option<(String, Instant)>>>,
    ttl: Duration,
}

impl CrumbAuth {
    fn new(cookie_url: String, crumb_url: String) -> Self {
        Self {
            cookie_url,
            crumb_url,
            cached: Arc::new(Mutex::new(None)),
            ttl: Duration::from_secs(3600),
        }
    }

    fn cached(&self) -> Option<String> {
        let cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .as_ref()
            .filter(|(_, fetched)| fetched.elapsed() < self.ttl)
            .map(|(crumb, _)| crumb.clone())
    }

    fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    async fn crumb(&self, client: &SourceClient) -> Result<String, SourceError> {
        if let Some(crumb) = self.cached() {
            return Ok(crumb);
        }

        // The cookie endpoint answers 404 while still setting the session cookie.
        let _ = client
            .execute(HttpRequest::get(&self.cookie_url).with_header("referer", YAHOO_REFERER))
            .await;

        let response = client
            .execute(HttpRequest::get(&self.crumb_url).with_header("referer", YAHOO_REFERER))
            .await?;
        let body = response.text();
        let crumb = body.trim();

        if crumb.to_ascii_lowercase().contains("too many requests") {
            return Err(SourceError::rate_limited("rate limited while fetching crumb"));
        }
        if crumb.is_empty() || crumb.len() >= 100 || crumb.contains(' ') || crumb.contains('<') {
            return Err(SourceError::invalid_response("crumb endpoint returned an unusable token"));
        }

        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((crumb.to_owned(), Instant::now()));
        debug!("metadata provider crumb refreshed");
        Ok(crumb.to_owned())
    }
}

// ============================================================================
// quoteSummary payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryEnvelope {
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    #[serde(default)]
    result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct QuoteSummaryResult {
    price: Option<PriceModule>,
    asset_profile: Option<AssetProfileModule>,
    quote_type: Option<QuoteTypeModule>,
    fund_profile: Option<FundProfileModule>,
    top_holdings: Option<TopHoldingsModule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PriceModule {
    long_name: Option<String>,
    short_name: Option<String>,
    quote_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AssetProfileModule {
    country: Option<String>,
    sector: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct QuoteTypeModule {
    quote_type: Option<String>,
    long_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FundProfileModule {
    family: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TopHoldingsModule {
    holdings: Vec<TopHoldingRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TopHoldingRow {
    symbol: Option<String>,
    holding_name: Option<String>,
    holding_percent: Option<RawNumber>,
}

/// `{"raw": 0.07, "fmt": "7.00%"}` or a bare number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Wrapped { raw: Option<f64> },
    Bare(f64),
}

impl RawNumber {
    fn value(&self) -> Option<f64> {
        match self {
            Self::Wrapped { raw } => *raw,
            Self::Bare(value) => Some(*value),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchEnvelope {
    quotes: Vec<SearchQuote>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchQuote {
    symbol: Option<String>,
}

// ============================================================================
// Yahoo provider
// ============================================================================

/// Yahoo Finance quoteSummary client with cookie/crumb authentication.
#[derive(Debug, Clone)]
pub struct YahooMetadataProvider {
    client: SourceClient,
    auth: CrumbAuth,
    api_base: String,
}

impl YahooMetadataProvider {
    pub fn new(client: SourceClient) -> Self {
        Self::with_endpoints(client, YAHOO_COOKIE_URL, YAHOO_CRUMB_URL, YAHOO_API_BASE)
    }

    pub fn with_endpoints(
        client: SourceClient,
        cookie_url: impl Into<String>,
        crumb_url: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            auth: CrumbAuth::new(cookie_url.into(), crumb_url.into()),
            api_base: api_base.into().trim_end_matches('/').to_owned(),
        }
    }

    fn summary_url(&self, symbol: &str, modules: &str, crumb: &str) -> String {
        format!(
            "{}/v10/finance/quoteSummary/{}?modules={}&crumb={}",
            self.api_base,
            urlencoding::encode(symbol),
            modules,
            urlencoding::encode(crumb)
        )
    }

    /// Fetches one quoteSummary result; an auth failure refreshes the crumb
    /// and retries once.
    async fn summary(
        &self,
        symbol: &str,
        modules: &str,
    ) -> Result<Option<QuoteSummaryResult>, SourceError> {
        let crumb = self.auth.crumb(&self.client).await?;
        let url = self.summary_url(symbol, modules, &crumb);
        let envelope: QuoteSummaryEnvelope = match self.client.get_json(&url).await {
            Ok(envelope) => envelope,
            Err(err) if err.kind() == SourceErrorKind::Unauthorized => {
                warn!(symbol, "metadata provider rejected crumb, refreshing");
                self.auth.invalidate();
                let crumb = self.auth.crumb(&self.client).await?;
                self.client.get_json(&self.summary_url(symbol, modules, &crumb)).await?
            }
            Err(err) if err.kind() == SourceErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        Ok(envelope.quote_summary.result.and_then(|results| results.into_iter().next()))
    }

    async fn profile_for(&self, symbol: &str) -> Result<Option<InstrumentProfile>, SourceError> {
        let modules = "price,assetProfile,quoteType,fundProfile";
        let Some(result) = self.summary(symbol, modules).await? else {
            return Ok(None);
        };

        let price = result.price.unwrap_or_default();
        let quote = result.quote_type.unwrap_or_default();
        let asset = result.asset_profile.unwrap_or_default();
        Ok(Some(InstrumentProfile {
            symbol: symbol.to_owned(),
            name: price.long_name.or(quote.long_name).or(price.short_name),
            quote_type: quote.quote_type.or(price.quote_type),
            country: asset.country,
            sector: asset.sector,
            fund_family: result.fund_profile.and_then(|fund| fund.family),
        }))
    }

    async fn holdings_for(&self, symbol: &str) -> Result<Vec<ProviderHolding>, SourceError> {
        let rows = self
            .summary(symbol, "topHoldings")
            .await?
            .and_then(|result| result.top_holdings)
            .map(|top| top.holdings)
            .unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|row| ProviderHolding {
                symbol: row.symbol,
                name: row.holding_name,
                weight: row.holding_percent.as_ref().and_then(RawNumber::value),
            })
            .collect())
    }

    async fn search_for(&self, isin: &str) -> Result<Option<String>, SourceError> {
        let url = format!(
            "{}/v1/finance/search?q={}&quotesCount=5&newsCount=0",
            self.api_base,
            urlencoding::encode(isin)
        );
        let envelope: SearchEnvelope = self.client.get_json(&url).await?;
        Ok(envelope.quotes.into_iter().find_map(|quote| quote.symbol))
    }
}

impl MetadataProvider for YahooMetadataProvider {
    fn instrument_profile<'a>(
        &'a self,
        symbol: &'a str,
    ) -> ProviderFuture<'a, Option<InstrumentProfile>> {
        Box::pin(self.profile_for(symbol))
    }

    fn top_holdings<'a>(&'a self, symbol: &'a str) -> ProviderFuture<'a, Vec<ProviderHolding>> {
        Box::pin(self.holdings_for(symbol))
    }

    fn symbol_for_isin<'a>(&'a self, isin: &'a str) -> ProviderFuture<'a, Option<String>> {
        Box::pin(self.search_for(isin))
    }
}

// ============================================================================
// Static provider
// ============================================================================

/// In-memory provider for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataProvider {
    profiles: HashMap<String, InstrumentProfile>,
    holdings: HashMap<String, Vec<ProviderHolding>>,
    symbols: HashMap<String, String>,
}

impl StaticMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: InstrumentProfile) -> Self {
        self.profiles.insert(profile.symbol.to_ascii_uppercase(), profile);
        self
    }

    pub fn with_top_holdings(mut self, symbol: &str, holdings: Vec<ProviderHolding>) -> Self {
        self.holdings.insert(symbol.to_ascii_uppercase(), holdings);
        self
    }

    pub fn with_symbol(mut self, isin: &str, symbol: &str) -> Self {
        self.symbols.insert(isin.to_ascii_uppercase(), symbol.to_owned());
        self
    }
}

impl MetadataProvider for StaticMetadataProvider {
    fn instrument_profile<'a>(
        &'a self,
        symbol: &'a str,
    ) -> ProviderFuture<'a, Option<InstrumentProfile>> {
        let profile = self.profiles.get(&symbol.to_ascii_uppercase()).cloned();
        Box::pin(async move { Ok(profile) })
    }

    fn top_holdings<'a>(&'a self, symbol: &'a str) -> ProviderFuture<'a, Vec<ProviderHolding>> {
        let holdings = self.holdings.get(&symbol.to_ascii_uppercase()).cloned().unwrap_or_default();
        Box::pin(async move { Ok(holdings) })
    }

    fn symbol_for_isin<'a>(&'a self, isin: &'a str) -> ProviderFuture<'a, Option<String>> {
        let symbol = self.symbols.get(&isin.to_ascii_uppercase()).cloned();
        Box::pin(async move { Ok(symbol) })
    }
}
