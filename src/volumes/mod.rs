//! Volume indexing: directory trees of samples cached in SQLite.
//!
//! - `fs`    -- filesystem collaborator and lazy walk
//! - `index` -- scan/list/lookup against the cache
//! - `types` -- volume, asset, filter and error types

pub mod fs;
pub mod index;
pub mod types;

pub use fs::{FileSystem, LocalFs};
pub use index::VolumeIndex;
pub use types::{Asset, AssetFilter, AssetKeyword, ScanIssue, ScanSummary, Volume, VolumeError};
