use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use time::Date;

use crate::layout::{as_of_partition, fund_partition};
use crate::StoreError;

pub const REPORT_FILE: &str = "qa_report.json";

/// Durable QA reports keyed by `(fund_id, as_of)`. A later report for the same
/// key replaces the earlier one: the newest gate run is the system of record.
#[derive(Debug, Clone)]
pub struct QaReportStore {
    root: PathBuf,
}

impl QaReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn report_path(&self, fund_id: &str, as_of: Date) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join(fund_partition(fund_id)?)
            .join(as_of_partition(as_of))
            .join(REPORT_FILE))
    }

    pub fn write<T: Serialize>(
        &self,
        fund_id: &str,
        as_of: Date,
        report: &T,
    ) -> Result<PathBuf, StoreError> {
        let path = self.report_path(fund_id, as_of)?;
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::InvalidLayout(path.display().to_string()))?;
        fs::create_dir_all(dir)?;

        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut staged, report)?;
        staged.as_file_mut().flush()?;
        staged.persist(&path).map_err(|err| err.error)?;
        Ok(path)
    }

    pub fn read<T: DeserializeOwned>(
        &self,
        fund_id: &str,
        as_of: Date,
    ) -> Result<Option<T>, StoreError> {
        let path = self.report_path(fund_id, as_of)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}
