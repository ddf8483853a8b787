//! Wires the whole pipeline from a [`PipelineConfig`].
//!
//! One [`ThrottleRegistry`] is shared by every client, so discovery, download
//! and auto-registration against the same source respect one rate limit.

use std::sync::Arc;

use fundscope_store::{QaReportStore, RawDocumentStore, SnapshotStore, StoreError};

use crate::auto_registry::AutoRegistry;
use crate::auto_snapshot::AutoSnapshot;
use crate::client::PrimaryHoldingsClient;
use crate::config::PipelineConfig;
use crate::discovery::{BdifDiscoverer, NportDiscoverer, OamDiscoverer};
use crate::download::Downloader;
use crate::enrichment::Enricher;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::metadata_provider::{MetadataProvider, YahooMetadataProvider};
use crate::orchestrator::{IngestionPipeline, IngestionStrategy};
use crate::parsers::{NportXmlParser, PdfTableParser, TableProfile};
use crate::qa::QaGate;
use crate::registry::RegistryStore;
use crate::throttling::ThrottleRegistry;
use crate::transport::SourceClient;
use crate::SourceId;

pub struct Runtime {
    pub config: PipelineConfig,
    pub nport: IngestionPipeline,
    pub oam: IngestionPipeline,
    pub bdif: IngestionPipeline,
    pub auto_snapshot: AutoSnapshot,
    pub auto_registry: Arc<AutoRegistry>,
    pub client: Arc<PrimaryHoldingsClient>,
}

impl Runtime {
    /// Production wiring: reqwest transport, Yahoo metadata provider.
    pub fn from_config(config: PipelineConfig) -> Result<Self, StoreError> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(&config.sec_user_agent));
        let throttles = ThrottleRegistry::new();
        let metadata = SourceClient::new(Arc::clone(&http), &config.metadata, &throttles);
        let provider: Arc<dyn MetadataProvider> = Arc::new(YahooMetadataProvider::new(metadata));
        Self::assemble(config, http, provider, throttles)
    }

    /// Wiring with an injected transport and metadata provider.
    pub fn with_http(
        config: PipelineConfig,
        http: Arc<dyn HttpClient>,
        provider: Arc<dyn MetadataProvider>,
    ) -> Result<Self, StoreError> {
        Self::assemble(config, http, provider, ThrottleRegistry::new())
    }

    fn assemble(
        config: PipelineConfig,
        http: Arc<dyn HttpClient>,
        provider: Arc<dyn MetadataProvider>,
        throttles: ThrottleRegistry,
    ) -> Result<Self, StoreError> {
        let enricher = Arc::new(Enricher::from_reference_file(&config.cusip_reference_path)?);
        let snapshots = SnapshotStore::new(&config.store.gold_root);
        let raw = RawDocumentStore::new(&config.store.raw_root);
        let qa = QaGate::new(QaReportStore::new(&config.store.qa_root), config.qa);

        let client_for = |source: SourceId| {
            let client = SourceClient::new(Arc::clone(&http), config.policy(source), &throttles);
            match source {
                SourceId::Nport => client.with_user_agent(config.sec_user_agent.clone()),
                _ => client,
            }
        };
        let downloader_for = |source: SourceId| {
            let retry = config.policy(source).download_retry();
            Downloader::new(client_for(source).with_retry(retry), raw.clone())
        };
        let pipeline = |strategy: IngestionStrategy| {
            IngestionPipeline::new(strategy, snapshots.clone(), Arc::clone(&enricher), qa.clone())
        };

        let nport = pipeline(IngestionStrategy {
            discoverer: Arc::new(NportDiscoverer::new(client_for(SourceId::Nport))),
            parser: Arc::new(NportXmlParser),
            downloader: downloader_for(SourceId::Nport),
            freshness_days: config.nport.freshness_days,
        });
        let oam = pipeline(IngestionStrategy {
            discoverer: Arc::new(OamDiscoverer::with_urls(
                client_for(SourceId::Oam),
                config.luxse_search_url.clone(),
                config.bundesanzeiger_search_url.clone(),
            )),
            parser: Arc::new(PdfTableParser::new(TableProfile::Oam)),
            downloader: downloader_for(SourceId::Oam),
            freshness_days: config.oam.freshness_days,
        });
        let bdif = pipeline(IngestionStrategy {
            discoverer: Arc::new(
                BdifDiscoverer::new(client_for(SourceId::Bdif))
                    .with_base_url(config.bdif_base_url.clone())
                    .with_attachment_proxy(config.bdif_attachment_proxy.clone()),
            ),
            parser: Arc::new(PdfTableParser::new(TableProfile::Bdif)),
            downloader: downloader_for(SourceId::Bdif),
            freshness_days: config.bdif.freshness_days,
        });

        let auto_snapshot =
            AutoSnapshot::new(snapshots.clone(), Arc::clone(&provider)).with_nport(nport.clone());
        let registry = RegistryStore::new(&config.registry_path);
        let auto_registry = AutoRegistry::new(registry.clone(), provider)
            .with_sec_lookup(NportDiscoverer::new(client_for(SourceId::Nport)))
            .with_pipeline(nport.clone())
            .with_pipeline(oam.clone())
            .with_pipeline(bdif.clone())
            .with_auto_snapshot(auto_snapshot.clone());
        let client = PrimaryHoldingsClient::new(registry, snapshots)
            .with_auto_snapshot(auto_snapshot.clone());

        Ok(Self {
            config,
            nport,
            oam,
            bdif,
            auto_snapshot,
            auto_registry: Arc::new(auto_registry),
            client: Arc::new(client),
        })
    }

    /// The ingestion pipeline for `source`; the metadata provider has none.
    pub fn pipeline(&self, source: SourceId) -> Option<&IngestionPipeline> {
        match source {
            SourceId::Nport => Some(&self.nport),
            SourceId::Oam => Some(&self.oam),
            SourceId::Bdif => Some(&self.bdif),
            SourceId::Metadata => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::FixtureHttpClient;
    use crate::metadata_provider::StaticMetadataProvider;

    #[test]
    fn every_holdings_source_gets_a_pipeline() {
        let home = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig::under(home.path()).with_immediate_policies();

        let runtime = Runtime::with_http(
            config,
            Arc::new(FixtureHttpClient::new()),
            Arc::new(StaticMetadataProvider::new()),
        )
        .expect("runtime");

        assert_eq!(runtime.pipeline(SourceId::Nport).map(|p| p.source()), Some(SourceId::Nport));
        assert_eq!(runtime.pipeline(SourceId::Oam).map(|p| p.source()), Some(SourceId::Oam));
        assert_eq!(runtime.pipeline(SourceId::Bdif).map(|p| p.source()), Some(SourceId::Bdif));
        assert!(runtime.pipeline(SourceId::Metadata).is_none());
    }
}
