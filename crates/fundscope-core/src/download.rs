//! Fetches candidate documents into the raw cache.

use fundscope_store::{RawDocumentRequest, RawDocumentStore, StoredDocument};
use tracing::{debug, info};

use crate::discovery::ReportMetadata;
use crate::transport::SourceClient;
use crate::{SourceError, SourceId};

/// Bytes of a fetched document plus where they were cached.
#[derive(Debug, Clone)]
pub struct DownloadedDocument {
    pub stored: StoredDocument,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: SourceClient,
    store: RawDocumentStore,
}

impl Downloader {
    /// `client` should carry the download retry discipline
    /// ([`crate::source_policy::SourcePolicy::download_retry`]).
    pub fn new(client: SourceClient, store: RawDocumentStore) -> Self {
        Self { client, store }
    }

    pub fn source(&self) -> SourceId {
        self.client.source()
    }

    /// Downloads `report`, hashes it and caches it with a metadata sidecar.
    /// Exhausted retries come back as `Err` so the caller can move on to the
    /// next candidate.
    pub async fn download(
        &self,
        report: &ReportMetadata,
        fund_id: &str,
    ) -> Result<DownloadedDocument, SourceError> {
        let bytes = self.client.get_bytes(&report.url).await?;
        if bytes.is_empty() {
            return Err(SourceError::invalid_response(format!("{}: empty body", report.url)));
        }

        let source = self.client.source();
        let extension = extension_for(&report.url, source);
        let request = RawDocumentRequest {
            source: source.as_str(),
            fund_id,
            as_of: report.as_of,
            source_url: &report.url,
            extension,
            record_id: report.record_id.as_deref(),
        };

        let stored = self
            .store
            .put(&request, &bytes)
            .map_err(|err| SourceError::storage(format!("caching {}: {err}", report.url)))?;

        if stored.reused {
            debug!(
                fund_id,
                sha256 = %stored.metadata.sha256,
                "document unchanged since last download"
            );
        } else {
            info!(
                fund_id,
                %source,
                size_bytes = stored.metadata.size_bytes,
                path = %stored.path.display(),
                "document downloaded"
            );
        }

        Ok(DownloadedDocument { stored, bytes })
    }
}

fn extension_for(url: &str, source: SourceId) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".xml") {
        "xml"
    } else if path.ends_with(".pdf") {
        "pdf"
    } else {
        match source {
            SourceId::Nport => "xml",
            SourceId::Metadata => "json",
            SourceId::Oam | SourceId::Bdif => "pdf",
        }
    }
}
