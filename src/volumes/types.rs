use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::db::StorageError;

/// A registered directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: i64,
    pub root_path: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub asset_count: u64,
    pub total_bytes: u64,
}

/// Cached metadata for one file within a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub volume_id: i64,
    pub relative_path: String,
    pub file_name: String,
    pub extension: Option<String>,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
}

/// Something the scan could not read. The scan still completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanIssue {
    pub relative_path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub volume_id: i64,
    pub root_path: String,
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    pub unchanged: u64,
    pub total_files: u64,
    pub issues: Vec<ScanIssue>,
}

/// A token drawn from indexed file paths, with the number of assets whose
/// path contains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetKeyword {
    pub keyword: String,
    pub asset_count: u64,
}

/// Optional narrowing for `list_assets`. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    /// Case-insensitive substring of the relative path.
    pub contains: Option<String>,
    /// File extension without the dot, case-insensitive.
    pub extension: Option<String>,
    /// Regex matched against the relative path.
    pub pattern: Option<Regex>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AssetFilter {
    /// Build a filter from raw tool arguments, compiling the pattern.
    pub fn build(
        contains: Option<String>,
        extension: Option<String>,
        pattern: Option<&str>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Self, VolumeError> {
        let pattern = pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| VolumeError::InvalidFilter(e.to_string()))?;
        Ok(Self {
            contains: contains.filter(|s| !s.is_empty()),
            extension: extension
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty()),
            pattern,
            limit,
            offset: offset.unwrap_or(0),
        })
    }

    pub fn matches(&self, asset: &Asset) -> bool {
        if let Some(ref needle) = self.contains {
            if !asset
                .relative_path
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(ref ext) = self.extension {
            if asset.extension.as_deref() != Some(ext.as_str()) {
                return false;
            }
        }
        if let Some(ref re) = self.pattern {
            if !re.is_match(&asset.relative_path) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("path not found or not a directory: {path}")]
    PathNotFound { path: String },

    #[error("asset '{relative_path}' not found in volume {root_path}")]
    NotFound {
        root_path: String,
        relative_path: String,
    },

    #[error("invalid asset filter: {0}")]
    InvalidFilter(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Lowercased extension of a file name, without the dot.
pub fn extension_of(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}
