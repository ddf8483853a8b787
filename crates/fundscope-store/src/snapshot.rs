//! Append-only, versioned gold snapshot store.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::Date;
use tracing::{debug, info};

use crate::layout::{
    as_of_partition, fund_partition, parse_as_of, parse_version, resolve_hint, version_partition,
};
use crate::table::SnapshotFormat;
use crate::StoreError;

/// File name every writer uses inside a version directory.
pub const SNAPSHOT_FILE: &str = "holdings.csv";

const MAX_VERSION_RACES: u32 = 16;

/// Location of one persisted snapshot, derived by scanning storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    pub fund_id: String,
    pub as_of: Date,
    pub version: u32,
    /// Data file inside the version directory.
    pub path: PathBuf,
}

impl SnapshotHandle {
    pub fn version_dir(&self) -> Option<&Path> {
        self.path.parent()
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every `as_of=` partition of a fund. A storage hint,
    /// when present, replaces the default `fund_id=<F>` directory.
    pub fn fund_root(&self, fund_id: &str, hint: Option<&str>) -> Result<PathBuf, StoreError> {
        match hint.map(str::trim).filter(|hint| !hint.is_empty()) {
            Some(hint) => Ok(resolve_hint(&self.root, hint)),
            None => Ok(self.root.join(fund_partition(fund_id)?)),
        }
    }

    /// All snapshots under `fund_root`, ordered by `(as_of, version)`.
    /// A missing directory yields an empty list.
    pub fn list(&self, fund_root: &Path, fund_id: &str) -> Result<Vec<SnapshotHandle>, StoreError> {
        let mut handles = Vec::new();

        for as_of_dir in read_dirs(fund_root)? {
            let Some(as_of) = dir_name(&as_of_dir).and_then(parse_as_of) else {
                continue;
            };

            for version_dir in read_dirs(&as_of_dir)? {
                let Some(version) = dir_name(&version_dir).and_then(parse_version) else {
                    continue;
                };

                if let Some(path) = pick_data_file(&version_dir)? {
                    handles.push(SnapshotHandle {
                        fund_id: fund_id.to_owned(),
                        as_of,
                        version,
                        path,
                    });
                }
            }
        }

        handles.sort_by_key(|handle| (handle.as_of, handle.version));
        Ok(handles)
    }

    /// Snapshot with the maximum `(as_of, version)`.
    pub fn latest(
        &self,
        fund_root: &Path,
        fund_id: &str,
    ) -> Result<Option<SnapshotHandle>, StoreError> {
        Ok(self.list(fund_root, fund_id)?.pop())
    }

    pub fn latest_as_of(&self, fund_root: &Path) -> Result<Option<Date>, StoreError> {
        Ok(read_dirs(fund_root)?
            .iter()
            .filter_map(|dir| dir_name(dir).and_then(parse_as_of))
            .max())
    }

    /// `max(existing versions) + 1` for a `(fund, as_of)` partition.
    pub fn next_version(&self, fund_root: &Path, as_of: Date) -> Result<u32, StoreError> {
        let as_of_dir = fund_root.join(as_of_partition(as_of));
        let current = read_dirs(&as_of_dir)?
            .iter()
            .filter_map(|dir| dir_name(dir).and_then(parse_version))
            .max()
            .unwrap_or(0);
        Ok(current + 1)
    }

    /// Serializes `rows` as CSV into a brand-new version directory.
    ///
    /// The version directory is claimed with a non-recursive `create_dir`, so
    /// two concurrent writers for the same partition end up with distinct
    /// versions instead of overwriting each other.
    pub fn write_csv<T: Serialize>(
        &self,
        fund_root: &Path,
        fund_id: &str,
        as_of: Date,
        rows: &[T],
    ) -> Result<SnapshotHandle, StoreError> {
        let as_of_dir = fund_root.join(as_of_partition(as_of));
        fs::create_dir_all(&as_of_dir)?;

        let mut version = self.next_version(fund_root, as_of)?;
        let mut races = 0;
        let version_dir = loop {
            let candidate = as_of_dir.join(version_partition(version));
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(err)
                    if err.kind() == io::ErrorKind::AlreadyExists && races < MAX_VERSION_RACES =>
                {
                    debug!(fund_id, version, "version directory already claimed, retrying");
                    races += 1;
                    version += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let mut staged = tempfile::NamedTempFile::new_in(&version_dir)?;
        {
            let mut writer = csv::Writer::from_writer(&mut staged);
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        staged.as_file_mut().flush()?;

        let path = version_dir.join(SNAPSHOT_FILE);
        staged.persist(&path).map_err(|err| err.error)?;

        info!(fund_id, version, rows = rows.len(), path = %path.display(), "snapshot persisted");

        Ok(SnapshotHandle {
            fund_id: fund_id.to_owned(),
            as_of,
            version,
            path,
        })
    }
}

fn dir_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

fn read_dirs(path: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Prefers a recognised data file; otherwise returns the first visible file so
/// the loader can report the unsupported format.
fn pick_data_file(version_dir: &Path) -> Result<Option<PathBuf>, StoreError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(version_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let hidden = name.to_str().is_some_and(|name| name.starts_with('.'));
        if entry.file_type()?.is_file() && !hidden {
            files.push(entry.path());
        }
    }
    files.sort();

    let supported = files
        .iter()
        .find(|path| SnapshotFormat::from_path(path).is_ok())
        .cloned();
    Ok(supported.or_else(|| files.into_iter().next()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use time::macros::date;

    #[derive(Serialize)]
    struct Row {
        name: &'static str,
        weight_pct: f64,
    }

    #[test]
    fn repeated_writes_create_increasing_versions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        let fund_root = store.fund_root("SPY", None).expect("fund root");
        let rows = [Row { name: "Apple", weight_pct: 100.0 }];

        let first = store
            .write_csv(&fund_root, "SPY", date!(2024 - 03 - 31), &rows)
            .expect("first write");
        let second = store
            .write_csv(&fund_root, "SPY", date!(2024 - 03 - 31), &rows)
            .expect("second write");

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_ne!(first.path, second.path);
        assert!(first.path.exists(), "earlier version must survive");

        let latest = store.latest(&fund_root, "SPY").expect("scan").expect("snapshot");
        assert_eq!(latest.version, 2);
    }

    #[test]
    fn latest_orders_by_as_of_before_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        let fund_root = store.fund_root("SPY", None).expect("fund root");
        let rows = [Row { name: "Apple", weight_pct: 100.0 }];

        store.write_csv(&fund_root, "SPY", date!(2024 - 06 - 30), &rows).expect("write");
        store.write_csv(&fund_root, "SPY", date!(2024 - 03 - 31), &rows).expect("write");
        store.write_csv(&fund_root, "SPY", date!(2024 - 03 - 31), &rows).expect("write");

        let latest = store.latest(&fund_root, "SPY").expect("scan").expect("snapshot");
        assert_eq!(latest.as_of, date!(2024 - 06 - 30));
        assert_eq!(latest.version, 1);
        assert_eq!(store.latest_as_of(&fund_root).expect("scan"), Some(date!(2024 - 06 - 30)));
    }

    #[test]
    fn missing_fund_directory_lists_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path());
        let fund_root = store.fund_root("NOPE", None).expect("fund root");

        assert!(store.list(&fund_root, "NOPE").expect("scan").is_empty());
        assert_eq!(store.next_version(&fund_root, date!(2024 - 01 - 01)).expect("scan"), 1);
    }

    #[test]
    fn storage_hint_replaces_default_fund_directory() {
        let store = SnapshotStore::new("/data/gold");

        assert_eq!(
            store.fund_root("SPY", Some("custom/spy")).expect("root"),
            PathBuf::from("/data/gold/custom/spy")
        );
        assert_eq!(
            store.fund_root("SPY", None).expect("root"),
            PathBuf::from("/data/gold/fund_id=SPY")
        );
    }
}
