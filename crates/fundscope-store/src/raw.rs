//! Raw document cache keyed by content hash.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Date, OffsetDateTime};
use tracing::debug;

use crate::dates::iso_date;
use crate::layout::{as_of_partition, fund_partition, partition};
use crate::StoreError;

/// Sidecar record written next to every raw document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocumentMetadata {
    pub source: String,
    pub fund_id: String,
    #[serde(with = "iso_date")]
    pub as_of: Date,
    pub source_url: String,
    pub sha256: String,
    pub size_bytes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub retrieved_at: OffsetDateTime,
    #[serde(default)]
    pub record_id: Option<String>,
}

/// What the caller knows about a document before it is stored.
#[derive(Debug, Clone)]
pub struct RawDocumentRequest<'a> {
    pub source: &'a str,
    pub fund_id: &'a str,
    pub as_of: Date,
    pub source_url: &'a str,
    pub extension: &'a str,
    pub record_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub path: PathBuf,
    pub metadata: RawDocumentMetadata,
    /// `true` when identical bytes were already cached and nothing was rewritten.
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub struct RawDocumentStore {
    root: PathBuf,
}

impl RawDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn put(
        &self,
        request: &RawDocumentRequest<'_>,
        bytes: &[u8],
    ) -> Result<StoredDocument, StoreError> {
        let sha256 = sha256_hex(bytes);
        let extension = request.extension.trim_start_matches('.');
        let dir = self
            .root
            .join(partition("source", request.source)?)
            .join(fund_partition(request.fund_id)?)
            .join(as_of_partition(request.as_of));
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{sha256}.{extension}"));
        let sidecar = dir.join(format!("{sha256}.json"));

        if path.exists() && sidecar.exists() {
            let metadata: RawDocumentMetadata =
                serde_json::from_str(&fs::read_to_string(&sidecar)?)?;
            debug!(
                sha256 = %metadata.sha256,
                path = %path.display(),
                "raw document already cached"
            );
            return Ok(StoredDocument {
                path,
                metadata,
                reused: true,
            });
        }

        let metadata = RawDocumentMetadata {
            source: request.source.to_owned(),
            fund_id: request.fund_id.to_owned(),
            as_of: request.as_of,
            source_url: request.source_url.to_owned(),
            sha256,
            size_bytes: bytes.len() as u64,
            retrieved_at: OffsetDateTime::now_utc(),
            record_id: request.record_id.map(str::to_owned),
        };

        write_atomic(&dir, &path, bytes)?;
        write_atomic(&dir, &sidecar, &serde_json::to_vec_pretty(&metadata)?)?;

        Ok(StoredDocument {
            path,
            metadata,
            reused: false,
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file_mut().flush()?;
    staged.persist(target).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn request<'a>(url: &'a str) -> RawDocumentRequest<'a> {
        RawDocumentRequest {
            source: "nport",
            fund_id: "SPY",
            as_of: date!(2024 - 03 - 31),
            source_url: url,
            extension: "xml",
            record_id: Some("0000884394-24-000001"),
        }
    }

    #[test]
    fn stores_bytes_under_content_hash_with_sidecar() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RawDocumentStore::new(temp.path());

        let stored = store
            .put(&request("https://example.test/a.xml"), b"<xml/>")
            .expect("put");

        assert!(!stored.reused);
        assert_eq!(stored.metadata.size_bytes, 6);
        assert_eq!(stored.metadata.sha256, sha256_hex(b"<xml/>"));
        let expected = format!(
            "source=nport/fund_id=SPY/as_of=2024-03-31/{}.xml",
            stored.metadata.sha256
        );
        assert!(stored.path.ends_with(expected));
        assert_eq!(fs::read(&stored.path).expect("read"), b"<xml/>");
    }

    #[test]
    fn identical_content_is_not_rewritten() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RawDocumentStore::new(temp.path());

        let first = store.put(&request("https://example.test/a.xml"), b"<xml/>").expect("put");
        let second = store.put(&request("https://mirror.test/a.xml"), b"<xml/>").expect("put");

        assert!(second.reused);
        assert_eq!(second.path, first.path);
        assert_eq!(second.metadata.source_url, "https://example.test/a.xml");
    }
}
