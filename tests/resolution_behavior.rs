//! Behavior-driven tests for holdings resolution
//!
//! These tests verify what downstream analytics see when they ask
//! `PrimaryHoldingsClient` for a fund: which snapshot is chosen, how weights
//! are normalized, and which of the four error kinds comes back.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use fundscope_core::{
    AutoSnapshot, FundRegistryEntry, HoldingsError, PrimaryHoldingsClient, ProviderHolding,
    RegistryStore, StaticMetadataProvider,
};
use fundscope_store::{SnapshotStore, StoreConfig};
use tempfile::{tempdir, TempDir};
use time::macros::date;

const GOLD_HEADER: &str = "fund_id,as_of,instrument_name_raw,instrument_ticker,isin,\
                           market_value_local,weight_pct,country,asset_class,sector";

fn seed_snapshot(home: &Path, fund_id: &str, as_of: &str, version: u32, body: &str) {
    let dir = StoreConfig::under(home)
        .gold_root
        .join(format!("fund_id={fund_id}"))
        .join(format!("as_of={as_of}"))
        .join(format!("version={version}"));
    fs::create_dir_all(&dir).expect("snapshot dir");
    fs::write(dir.join("holdings.csv"), body).expect("snapshot file");
}

fn register(home: &Path, entry: FundRegistryEntry) {
    registry(home)
        .update(|funds| {
            funds.upsert(&entry.fund_id.clone(), entry);
        })
        .expect("registry write");
}

fn registry(home: &Path) -> RegistryStore {
    RegistryStore::new(home.join("registry/funds.yaml"))
}

fn client(home: &Path) -> PrimaryHoldingsClient {
    let snapshots = SnapshotStore::new(StoreConfig::under(home).gold_root);
    PrimaryHoldingsClient::new(registry(home), snapshots)
}

fn spy_entry() -> FundRegistryEntry {
    let mut entry = FundRegistryEntry::new("SPY");
    entry.name = Some(String::from("SPDR S&P 500 ETF Trust"));
    entry.issuer = Some(String::from("State Street"));
    entry.tickers = vec![String::from("SPY")];
    entry.isin = Some(String::from("US78462F1030"));
    entry
}

fn spy_home() -> TempDir {
    let home = tempdir().expect("tempdir");
    register(home.path(), spy_entry());
    seed_snapshot(
        home.path(),
        "SPY",
        "2024-03-31",
        1,
        &format!(
            "{GOLD_HEADER}\n\
             SPY,2024-03-31,Apple Inc,AAPL,US0378331005,500,50,US,Equity,Technology\n\
             SPY,2024-03-31,Nestle SA,NESN,CH0038863350,300,30,CH,Equity,Consumer Staples\n\
             SPY,2024-03-31,US Treasury Bill,,US912797GK45,200,20,US,Fixed Income,\n"
        ),
    );
    home
}

fn sum(weights: impl Iterator<Item = f64>) -> f64 {
    weights.sum()
}

// =============================================================================
// Resolution: Lookup
// =============================================================================

#[tokio::test]
async fn when_identifier_is_unknown_caller_gets_not_registered() {
    // Given: An empty registry
    let home = tempdir().expect("tempdir");
    let client = client(home.path());

    // When: A holdings request is made
    let err = client.fetch_holdings("ZZZZ", None, None).await.expect_err("unknown fund");

    // Then: The error names the identifier
    assert_eq!(
        err,
        HoldingsError::NotRegistered {
            identifier: String::from("ZZZZ")
        }
    );
}

#[tokio::test]
async fn when_fund_is_requested_by_ticker_or_isin_the_same_snapshot_resolves() {
    // Given: SPY registered with a ticker and an ISIN
    let home = spy_home();
    let client = client(home.path());

    // When: It is requested both ways, in any case
    let by_ticker = client.fetch_holdings("spy", None, None).await.expect("by ticker");
    let by_isin = client.fetch_holdings("US78462F1030", None, None).await.expect("by isin");

    // Then: Both resolve to the same fund and snapshot
    assert_eq!(by_ticker.metadata.fund_id, "SPY");
    assert_eq!(by_isin.metadata.fund_id, "SPY");
    assert_eq!(by_ticker.holdings, by_isin.holdings);
    assert_eq!(by_ticker.metadata.ticker, "SPY");
}

#[tokio::test]
async fn when_fund_is_registered_after_client_start_it_is_picked_up() {
    // Given: A client that has already loaded an empty registry
    let home = tempdir().expect("tempdir");
    let client = client(home.path());
    assert!(client.fetch_holdings("SPY", None, None).await.is_err());

    // When: Another process registers the fund and writes a snapshot
    register(home.path(), spy_entry());
    seed_snapshot(
        home.path(),
        "SPY",
        "2024-03-31",
        1,
        &format!(
            "{GOLD_HEADER}\n\
             SPY,2024-03-31,Apple Inc,AAPL,US0378331005,100,100,US,Equity,Technology\n"
        ),
    );

    // Then: The next request reloads the registry and succeeds
    let resolved = client.fetch_holdings("SPY", None, None).await.expect("reloaded");
    assert_eq!(resolved.holdings.len(), 1);
}

// =============================================================================
// Resolution: Snapshot Selection
// =============================================================================

#[tokio::test]
async fn when_several_snapshots_exist_the_latest_version_of_the_latest_date_wins() {
    // Given: Two dates, the newer one with two versions
    let home = spy_home();
    let row = |name: &str| {
        format!("{GOLD_HEADER}\nSPY,x,{name},T,US0000000001,1,100,US,Equity,Tech\n")
    };
    seed_snapshot(home.path(), "SPY", "2024-06-30", 1, &row("June v1"));
    seed_snapshot(home.path(), "SPY", "2024-06-30", 2, &row("June v2"));
    let client = client(home.path());

    // When: The latest holdings are requested
    let resolved = client.fetch_holdings("SPY", None, None).await.expect("latest");

    // Then: (2024-06-30, v2) is returned with full metadata
    assert_eq!(resolved.metadata.as_of, date!(2024 - 06 - 30));
    assert_eq!(resolved.metadata.version, 2);
    assert_eq!(resolved.holdings[0].name, "June v2");
    assert_eq!(resolved.metadata.issuer.as_deref(), Some("State Street"));
    assert_eq!(resolved.metadata.source, "PRIMARY");
    assert!(resolved.metadata.snapshot_path.ends_with("version=2/holdings.csv"));
}

#[tokio::test]
async fn when_as_of_is_given_only_that_date_is_considered() {
    // Given: Snapshots for March and June
    let home = spy_home();
    seed_snapshot(
        home.path(),
        "SPY",
        "2024-06-30",
        1,
        &format!("{GOLD_HEADER}\nSPY,2024-06-30,June,J,US0000000001,1,100,US,Equity,Tech\n"),
    );
    let client = client(home.path());

    // When: March is requested explicitly, then a date with no snapshot
    let march = client.fetch_holdings("SPY", Some("2024-03-31"), None).await.expect("march");
    let missing = client.fetch_holdings("SPY", Some("2023-12-31"), None).await;

    // Then: March resolves and the absent date is reported as such
    assert_eq!(march.metadata.as_of, date!(2024 - 03 - 31));
    assert_eq!(
        missing.expect_err("no december snapshot"),
        HoldingsError::NoSnapshotAvailable {
            fund_id: String::from("SPY"),
            as_of: Some(String::from("2023-12-31")),
        }
    );
}

#[tokio::test]
async fn when_as_of_is_not_a_date_caller_gets_malformed_input() {
    // Given: A registered fund
    let home = spy_home();
    let client = client(home.path());

    // When: The as_of cannot be parsed
    let err = client.fetch_holdings("SPY", Some("31/03/2024"), None).await.expect_err("bad date");

    // Then: The request is rejected before touching storage
    assert!(matches!(err, HoldingsError::MalformedInput(_)));
}

#[tokio::test]
async fn when_fund_has_no_snapshot_and_no_fallback_caller_gets_no_snapshot_available() {
    // Given: A registered fund with nothing on disk
    let home = tempdir().expect("tempdir");
    register(home.path(), spy_entry());
    let client = client(home.path());

    // When: Holdings are requested
    let err = client.fetch_holdings("SPY", None, None).await.expect_err("no snapshot");

    // Then: The fund id is reported without a date
    assert_eq!(
        err,
        HoldingsError::NoSnapshotAvailable {
            fund_id: String::from("SPY"),
            as_of: None
        }
    );
}

// =============================================================================
// Resolution: Weights
// =============================================================================

#[tokio::test]
async fn when_snapshot_is_returned_weights_sum_to_one_in_descending_order() {
    // Given: A three-position snapshot
    let home = spy_home();
    let client = client(home.path());

    // When: All positions are requested
    let resolved = client.fetch_holdings("SPY", None, None).await.expect("resolved");

    // Then: Weights are fractions, sorted, and canonical fields are filled
    let weights: Vec<f64> = resolved.holdings.iter().map(|h| h.weight).collect();
    assert!((sum(weights.iter().copied()) - 1.0).abs() < 1e-9);
    assert!(weights.windows(2).all(|pair| pair[0] >= pair[1]));
    assert_eq!(resolved.holdings[0].symbol, "AAPL");
    assert_eq!(resolved.holdings[2].symbol, "US912797GK45", "isin stands in for a missing ticker");
    assert_eq!(resolved.holdings[2].sector.as_deref(), Some("Unknown"));
}

#[tokio::test]
async fn when_max_positions_truncates_the_remainder_is_renormalized() {
    // Given: A three-position snapshot weighted 50/30/20
    let home = spy_home();
    let client = client(home.path());

    // When: Only the top two are requested
    let resolved = client.fetch_holdings("SPY", None, Some(2)).await.expect("resolved");

    // Then: 50/30 becomes 0.625/0.375
    assert_eq!(resolved.holdings.len(), 2);
    assert!((resolved.holdings[0].weight - 0.625).abs() < 1e-9);
    assert!((resolved.holdings[1].weight - 0.375).abs() < 1e-9);
}

#[tokio::test]
async fn when_snapshot_only_has_market_values_weights_come_from_them() {
    // Given: A snapshot without any weight column
    let home = tempdir().expect("tempdir");
    register(home.path(), spy_entry());
    seed_snapshot(
        home.path(),
        "SPY",
        "2024-03-31",
        1,
        "instrument_name_raw,isin,market_value_local\n\
         Apple Inc,US0378331005,750\n\
         Nestle SA,CH0038863350,250\n",
    );
    let client = client(home.path());

    // When: Holdings are requested
    let resolved = client.fetch_holdings("SPY", None, None).await.expect("resolved");

    // Then: Weights are market value proportions
    assert!((resolved.holdings[0].weight - 0.75).abs() < 1e-9);
    assert_eq!(resolved.holdings[0].name, "Apple Inc");
    assert_eq!(resolved.holdings[0].symbol, "US0378331005");
    assert_eq!(resolved.holdings[0].country, None, "no country column, no country");
}

#[tokio::test]
async fn when_snapshot_has_no_weights_or_values_caller_gets_partial_data() {
    // Given: A snapshot with names only
    let home = tempdir().expect("tempdir");
    register(home.path(), spy_entry());
    let body = "instrument_name_raw,isin\nApple Inc,US0378331005\n";
    seed_snapshot(home.path(), "SPY", "2024-03-31", 1, body);
    let client = client(home.path());

    // When: Holdings are requested
    let err = client.fetch_holdings("SPY", None, None).await.expect_err("unusable snapshot");

    // Then: Partial data is reported
    assert!(matches!(err, HoldingsError::PartialData(_)));
}

#[tokio::test]
async fn when_snapshot_file_has_unknown_format_caller_gets_malformed_input() {
    // Given: A version directory holding only a spreadsheet export
    let home = tempdir().expect("tempdir");
    register(home.path(), spy_entry());
    let dir = StoreConfig::under(home.path())
        .gold_root
        .join("fund_id=SPY/as_of=2024-03-31/version=1");
    fs::create_dir_all(&dir).expect("dir");
    fs::write(dir.join("holdings.xlsx"), b"PK\x03\x04").expect("file");
    let client = client(home.path());

    // When: Holdings are requested
    let err = client.fetch_holdings("SPY", None, None).await.expect_err("unsupported");

    // Then: The format is rejected
    assert!(matches!(err, HoldingsError::MalformedInput(_)));
}

// =============================================================================
// Resolution: Exposures
// =============================================================================

#[tokio::test]
async fn when_exposures_are_requested_weights_are_grouped_by_dimension() {
    // Given: Resolved SPY holdings
    let home = spy_home();
    let client = client(home.path());
    let resolved = client.fetch_holdings("SPY", None, None).await.expect("resolved");

    // When: Country and asset class exposures are computed
    let countries = client.get_country_exposure(&resolved.holdings).expect("country column");
    let classes = client.get_asset_class_exposure(&resolved.holdings).expect("asset class column");

    // Then: Groups are summed and sorted descending
    assert_eq!(countries[0].key, "US");
    assert!((countries[0].weight - 0.7).abs() < 1e-9);
    assert_eq!(countries[1].key, "CH");
    assert_eq!(classes[0].key, "Equity");
    assert!((classes[0].weight - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn when_dimension_column_is_absent_exposure_is_none() {
    // Given: Holdings resolved from a snapshot without a sector column
    let home = tempdir().expect("tempdir");
    register(home.path(), spy_entry());
    seed_snapshot(home.path(), "SPY", "2024-03-31", 1, "Name,Weight\nApple,0.6\nNestle,0.4\n");
    let client = client(home.path());
    let resolved = client.fetch_holdings("SPY", None, None).await.expect("resolved");

    // When: A sector breakdown is asked for
    let sectors = client.get_sector_exposure(&resolved.holdings);

    // Then: There is nothing to group by
    assert!(sectors.is_none());
}

// =============================================================================
// Resolution: Caching
// =============================================================================

#[tokio::test]
async fn when_request_is_repeated_the_cached_result_is_returned_until_cleared() {
    // Given: A resolved request
    let home = spy_home();
    let client = client(home.path());
    let first = client.fetch_holdings("SPY", None, Some(2)).await.expect("first");

    // When: The snapshot disappears from disk
    let fund_dir = StoreConfig::under(home.path()).gold_root.join("fund_id=SPY");
    fs::remove_dir_all(fund_dir).expect("remove");

    // Then: The same request is served from cache, until the cache is cleared
    let cached = client.fetch_holdings("SPY", None, Some(2)).await.expect("cached");
    assert_eq!(cached, first);
    client.clear_cache().await;
    assert!(matches!(
        client.fetch_holdings("SPY", None, Some(2)).await,
        Err(HoldingsError::NoSnapshotAvailable { .. })
    ));
}

// =============================================================================
// Resolution: Fallback Snapshot
// =============================================================================

#[tokio::test]
async fn when_no_snapshot_exists_a_metadata_snapshot_is_synthesized() {
    // Given: A fund routed to the metadata provider, which publishes top holdings
    let home = tempdir().expect("tempdir");
    let mut entry = FundRegistryEntry::new("IE00B4L5Y983");
    entry.tickers = vec![String::from("IWDA.AS")];
    entry.auto_source = Some(String::from("metadata-provider"));
    register(home.path(), entry);

    let provider = StaticMetadataProvider::new().with_top_holdings(
        "IWDA.AS",
        vec![
            ProviderHolding {
                symbol: Some(String::from("AAPL")),
                name: Some(String::from("Apple Inc")),
                weight: Some(0.05),
            },
            ProviderHolding {
                symbol: Some(String::from("MSFT")),
                name: Some(String::from("Microsoft Corp")),
                weight: Some(0.15),
            },
        ],
    );
    let snapshots = SnapshotStore::new(StoreConfig::under(home.path()).gold_root);
    let client = PrimaryHoldingsClient::new(registry(home.path()), snapshots.clone())
        .with_auto_snapshot(AutoSnapshot::new(snapshots, Arc::new(provider)));

    // When: Holdings are requested by ticker
    let resolved = client.fetch_holdings("IWDA.AS", None, None).await.expect("synthesized");

    // Then: The fallback snapshot is persisted and normalized
    assert_eq!(resolved.metadata.fund_id, "IE00B4L5Y983");
    assert_eq!(resolved.metadata.version, 1);
    assert_eq!(resolved.metadata.source, "metadata-provider");
    assert!(resolved.metadata.snapshot_path.exists());
    assert_eq!(resolved.holdings[0].symbol, "MSFT");
    assert!((resolved.holdings[0].weight - 0.75).abs() < 1e-9);
}
