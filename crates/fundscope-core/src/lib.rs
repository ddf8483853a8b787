//! # Fundscope Core
//!
//! Fund holdings ingestion, enrichment and point-in-time resolution.
//!
//! ## Overview
//!
//! Holdings come from regulatory disclosures: SEC N-PORT filings for US funds,
//! OAM annual and semi-annual reports for Luxembourg and German funds, and the
//! AMF BDIF open-data feed for French funds. Each source plugs a discoverer,
//! a downloader and a parser into one [`orchestrator`]; the result is enriched,
//! checked by the [`qa`] gate and persisted as a versioned snapshot.
//!
//! Downstream analytics only talk to [`PrimaryHoldingsClient`], which resolves
//! a ticker or ISIN to the newest snapshot with weights summing to 1.0 and
//! falls back to [`auto_snapshot`] when nothing has been ingested yet.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auto_registry`] | Lazily registers unknown funds and routes them to a source |
//! | [`auto_snapshot`] | Fallback snapshots from N-PORT or a metadata provider |
//! | [`cache`] | TTL cache for resolved holdings |
//! | [`client`] | `PrimaryHoldingsClient` resolution façade |
//! | [`config`] | Paths, endpoints, thresholds and source policies |
//! | [`discovery`] | Candidate report discovery per source |
//! | [`domain`] | Identifiers and holding records |
//! | [`download`] | Raw document fetch and content-addressed caching |
//! | [`enrichment`] | Identifier, country, asset-class and weight normalization |
//! | [`error`] | Error types |
//! | [`http_client`] | HTTP client abstraction and test fixture |
//! | [`metadata_provider`] | Instrument profile and top-holdings lookup |
//! | [`orchestrator`] | Generic ingestion control flow |
//! | [`parsers`] | N-PORT XML and PDF holdings-table parsers |
//! | [`qa`] | Weight-sum and identifier-coverage gate |
//! | [`registry`] | Fund registry file |
//! | [`runtime`] | Wires everything from a [`PipelineConfig`] |
//! | [`source_policy`] | Pacing, retry and freshness per source |
//! | [`throttling`] | Shared per-source rate limiters |
//! | [`transport`] | Throttled, retrying HTTP access to one source |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fundscope_core::{PipelineConfig, Runtime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     fundscope_core::telemetry::init_tracing();
//!     let runtime = Runtime::from_config(PipelineConfig::from_env())?;
//!
//!     let snapshot = runtime.client.fetch_holdings("SPY", None, Some(25)).await?;
//!     for holding in &snapshot.holdings {
//!         println!("{:<8} {:>6.2}%", holding.symbol, holding.weight * 100.0);
//!     }
//!     if let Some(countries) = runtime.client.get_country_exposure(&snapshot.holdings) {
//!         println!("{} countries", countries.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Callers of the façade only ever see [`HoldingsError`]:
//!
//! ```rust
//! use fundscope_core::HoldingsError;
//!
//! fn describe(error: &HoldingsError) -> &'static str {
//!     match error {
//!         HoldingsError::NotRegistered { .. } => "register the fund first",
//!         HoldingsError::NoSnapshotAvailable { .. } => "run an ingestion",
//!         HoldingsError::MalformedInput(_) => "check the request",
//!         HoldingsError::PartialData(_) => "snapshot lacks weights",
//!     }
//! }
//! ```

pub mod auto_registry;
pub mod auto_snapshot;
pub mod cache;
pub mod client;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod download;
pub mod enrichment;
pub mod error;
pub mod http_client;
pub mod lookup;
pub mod metadata_provider;
pub mod orchestrator;
pub mod parsers;
pub mod qa;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod source;
pub mod source_policy;
pub mod telemetry;
pub mod throttling;
pub mod transport;

// Errors
pub use error::{HoldingsError, SourceError, SourceErrorKind, ValidationError};

// Identifiers
pub use domain::{AssetClass, Cik, GoldHolding, GoldRecord, Holding, Isin};
pub use source::SourceId;

// Resolution
pub use cache::CacheStore;
pub use client::{
    Exposure, PrimaryHoldingsClient, ResolvedHolding, ResolvedSnapshot, SnapshotMetadata,
};

// Ingestion
pub use auto_registry::{AssetType, AutoRegistry};
pub use auto_snapshot::{AutoSnapshot, AutoSnapshotResult};
pub use discovery::{
    BdifDiscoverer, Discoverer, DiscoveryQuery, NportDiscoverer, OamDiscoverer, ReportMetadata,
};
pub use download::{DownloadedDocument, Downloader};
pub use enrichment::Enricher;
pub use orchestrator::{
    IngestOptions, IngestionOutcome, IngestionPipeline, IngestionReport, IngestionStrategy,
};
pub use parsers::{DocumentParser, NportXmlParser, PdfTableParser, TableProfile};
pub use qa::{QaGate, QaResult, QaThresholds};

// Registry and providers
pub use metadata_provider::{
    InstrumentProfile, MetadataProvider, ProviderHolding, StaticMetadataProvider,
    YahooMetadataProvider,
};
pub use registry::{FallbackHolding, FundRegistry, FundRegistryEntry, RegistryError, RegistryStore};

// Wiring
pub use config::PipelineConfig;
pub use http_client::{FixtureHttpClient, HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use runtime::Runtime;
pub use source_policy::SourcePolicy;
pub use throttling::ThrottleRegistry;
pub use transport::SourceClient;
