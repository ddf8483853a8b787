//! Hive-style `key=value` partition naming.

use std::path::{Component, Path, PathBuf};

use time::Date;

use crate::dates::{format_date, parse_date};
use crate::StoreError;

pub const FUND_KEY: &str = "fund_id";
pub const AS_OF_KEY: &str = "as_of";
pub const VERSION_KEY: &str = "version";

/// Builds a single `key=value` path segment, rejecting values that would
/// escape the partition directory.
pub fn partition(key: &str, value: &str) -> Result<String, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
    {
        return Err(StoreError::InvalidLayout(value.to_owned()));
    }
    Ok(format!("{key}={trimmed}"))
}

pub fn fund_partition(fund_id: &str) -> Result<String, StoreError> {
    partition(FUND_KEY, fund_id)
}

pub fn as_of_partition(as_of: Date) -> String {
    format!("{AS_OF_KEY}={}", format_date(as_of))
}

pub fn version_partition(version: u32) -> String {
    format!("{VERSION_KEY}={version}")
}

/// Returns the value of a `key=value` directory name when the key matches.
pub fn partition_value<'a>(name: &'a str, key: &str) -> Option<&'a str> {
    name.strip_prefix(key)?.strip_prefix('=')
}

pub fn parse_version(name: &str) -> Option<u32> {
    partition_value(name, VERSION_KEY)?
        .parse::<u32>()
        .ok()
        .filter(|version| *version >= 1)
}

pub fn parse_as_of(name: &str) -> Option<Date> {
    parse_date(partition_value(name, AS_OF_KEY)?)
}

/// Finds the first `as_of=YYYY-MM-DD` segment anywhere in a path.
pub fn as_of_from_path(path: &Path) -> Option<Date> {
    path.components().find_map(|component| match component {
        Component::Normal(segment) => segment.to_str().and_then(parse_as_of),
        _ => None,
    })
}

/// Joins a relative hint onto `root`; absolute hints are used as-is.
pub fn resolve_hint(root: &Path, hint: &str) -> PathBuf {
    let candidate = Path::new(hint);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}
