//! Volume index: reconciles cached asset rows with the filesystem.
//!
//! `scan_volume` is the only operation that touches the filesystem. Listing
//! and lookups are answered from SQLite, so they stay cheap no matter how
//! large the tree is, at the cost of only seeing changes after a re-scan.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use tracing::{debug, info, warn};

use super::fs::{AssetWalk, FileRecord, FileSystem, WalkItem};
use super::types::{
    extension_of, Asset, AssetFilter, AssetKeyword, ScanIssue, ScanSummary, Volume, VolumeError,
};
use crate::db::{Database, StorageError};

const VOLUME_COLUMNS: &str = "v.id, v.root_path, v.name, v.description, v.created_at, v.last_scanned_at, \
     COUNT(a.id), COALESCE(SUM(a.size_bytes), 0)";

const ASSET_COLUMNS: &str =
    "volume_id, relative_path, file_name, extension, size_bytes, modified_at_ns, indexed_at";

/// Cached view of a row used while diffing a scan.
struct CachedAsset {
    size_bytes: u64,
    modified_at_ns: i64,
}

#[derive(Clone)]
pub struct VolumeIndex {
    db: Database,
    fs: Arc<dyn FileSystem>,
    /// Lowercased extensions to index; empty means every regular file.
    extensions: Vec<String>,
}

impl VolumeIndex {
    pub fn new(db: Database, fs: Arc<dyn FileSystem>, extensions: &[String]) -> Self {
        Self {
            db,
            fs,
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Walk `root` and bring the cached rows in line with what is on disk.
    ///
    /// Creates the volume on first scan. All row changes for the volume are
    /// committed in one transaction.
    pub fn scan_volume(
        &self,
        root: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<ScanSummary, VolumeError> {
        let root_path = self.resolve_existing_dir(root)?;
        let root_key = root_path.to_string_lossy().into_owned();
        info!(root = %root_key, "Scanning volume");

        let mut seen: HashMap<String, FileRecord> = HashMap::new();
        let mut issues = Vec::new();
        let mut unreadable_dirs = Vec::new();

        for item in AssetWalk::new(self.fs.as_ref(), &root_path) {
            match item {
                WalkItem::File(record) => {
                    if self.accepts(&record.file_name) {
                        seen.insert(record.relative_path.clone(), record);
                    }
                }
                WalkItem::Unreadable {
                    relative_path,
                    error,
                } => {
                    warn!(root = %root_key, dir = %relative_path, "Skipping unreadable directory: {}", error);
                    issues.push(ScanIssue {
                        relative_path: relative_path.clone(),
                        error: error.to_string(),
                    });
                    unreadable_dirs.push(relative_path);
                }
            }
        }

        let now = Utc::now();
        let mut summary = self.db.transaction(|tx| {
            let volume_id = upsert_volume(tx, &root_key, &root_path, name, description, now)?;
            let cached = load_cached(tx, volume_id)?;
            let mut summary = ScanSummary {
                volume_id,
                root_path: root_key.clone(),
                total_files: seen.len() as u64,
                ..ScanSummary::default()
            };

            for record in seen.values() {
                let modified_ns = to_nanos(record.modified_at);
                match cached.get(&record.relative_path) {
                    None => {
                        insert_asset(tx, volume_id, record, now)?;
                        summary.added += 1;
                    }
                    Some(row)
                        if row.size_bytes != record.size_bytes
                            || row.modified_at_ns != modified_ns =>
                    {
                        update_asset(tx, volume_id, record, now)?;
                        summary.updated += 1;
                    }
                    Some(_) => summary.unchanged += 1,
                }
            }

            let gone: Vec<&String> = cached
                .keys()
                .filter(|path| !seen.contains_key(*path))
                .filter(|path| !under_any(path, &unreadable_dirs))
                .collect();
            for path in gone {
                tx.execute(
                    "DELETE FROM assets WHERE volume_id = ?1 AND relative_path = ?2",
                    params![volume_id, path],
                )
                .map_err(StorageError::from)?;
                summary.removed += 1;
            }

            tx.execute(
                "UPDATE volumes SET last_scanned_at = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), volume_id],
            )
            .map_err(StorageError::from)?;

            Ok::<_, VolumeError>(summary)
        })?;

        summary.issues = issues;
        info!(
            root = %root_key,
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            unchanged = summary.unchanged,
            "Volume scan complete"
        );
        Ok(summary)
    }

    /// Cached assets of a volume, ordered by relative path.
    pub fn list_assets(&self, root: &str, filter: &AssetFilter) -> Result<Vec<Asset>, VolumeError> {
        let volume = self.require_volume(root)?;
        let assets = self.db.fetch_all(
            &format!(
                "SELECT {} FROM assets WHERE volume_id = ?1 ORDER BY relative_path",
                ASSET_COLUMNS
            ),
            params![volume.id],
            map_asset,
        )?;

        let matching = assets
            .into_iter()
            .filter(|asset| filter.matches(asset))
            .skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    pub fn get_asset(&self, root: &str, relative_path: &str) -> Result<Asset, VolumeError> {
        let relative = normalize_relative(relative_path);
        let volume = match self.require_volume(root) {
            Ok(volume) => volume,
            Err(VolumeError::PathNotFound { path }) => {
                return Err(VolumeError::NotFound {
                    root_path: path,
                    relative_path: relative,
                })
            }
            Err(e) => return Err(e),
        };
        self.db
            .fetch_one(
                &format!(
                    "SELECT {} FROM assets WHERE volume_id = ?1 AND relative_path = ?2",
                    ASSET_COLUMNS
                ),
                params![volume.id, relative],
                map_asset,
            )?
            .ok_or_else(|| VolumeError::NotFound {
                root_path: volume.root_path.clone(),
                relative_path: relative,
            })
    }

    pub fn list_volumes(&self) -> Result<Vec<Volume>, VolumeError> {
        Ok(self.db.fetch_all(
            &format!(
                "SELECT {} FROM volumes v LEFT JOIN assets a ON a.volume_id = v.id \
                 GROUP BY v.id ORDER BY v.name, v.root_path",
                VOLUME_COLUMNS
            ),
            [],
            map_volume,
        )?)
    }

    pub fn get_volume(&self, root: &str) -> Result<Volume, VolumeError> {
        self.require_volume(root)
    }

    /// Rename or re-describe a volume without rescanning it. `None` leaves a
    /// field as it is.
    pub fn update_volume(
        &self,
        root: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Volume, VolumeError> {
        let name = name.map(str::trim);
        if name == Some("") {
            return Err(VolumeError::InvalidArgument("volume name must not be empty".into()));
        }
        let volume = self.require_volume(root)?;
        if name.is_none() && description.is_none() {
            return Ok(volume);
        }
        self.db.execute(
            "UPDATE volumes SET name = COALESCE(?1, name), description = COALESCE(?2, description) \
             WHERE id = ?3",
            params![name, description, volume.id],
        )?;
        info!(root = %volume.root_path, "Volume details updated");
        self.require_volume(&volume.root_path)
    }

    /// Keywords found in cached asset paths, most common first. Restricted to
    /// one volume when `root` is given. Nothing is read from disk.
    pub fn asset_keywords(
        &self,
        root: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<AssetKeyword>, VolumeError> {
        let paths: Vec<String> = match root {
            Some(root) => {
                let volume = self.require_volume(root)?;
                self.db.fetch_all(
                    "SELECT relative_path FROM assets WHERE volume_id = ?1",
                    params![volume.id],
                    |row| row.get(0),
                )?
            }
            None => self
                .db
                .fetch_all("SELECT relative_path FROM assets", [], |row| row.get(0))?,
        };

        let mut counts: HashMap<String, u64> = HashMap::new();
        for path in &paths {
            for keyword in path_keywords(path) {
                *counts.entry(keyword).or_default() += 1;
            }
        }

        let mut keywords: Vec<AssetKeyword> = counts
            .into_iter()
            .map(|(keyword, asset_count)| AssetKeyword {
                keyword,
                asset_count,
            })
            .collect();
        keywords.sort_by(|a, b| {
            b.asset_count
                .cmp(&a.asset_count)
                .then_with(|| a.keyword.cmp(&b.keyword))
        });
        if let Some(limit) = limit {
            keywords.truncate(limit);
        }
        Ok(keywords)
    }

    /// Forget a volume and its cached assets. Files on disk are untouched.
    /// Returns the number of asset rows removed.
    pub fn remove_volume(&self, root: &str) -> Result<u64, VolumeError> {
        let volume = self.require_volume(root)?;
        let removed = self.db.transaction(|tx| {
            let removed = tx.execute("DELETE FROM assets WHERE volume_id = ?1", params![volume.id])?;
            tx.execute("DELETE FROM volumes WHERE id = ?1", params![volume.id])?;
            Ok::<_, StorageError>(removed as u64)
        })?;
        info!(root = %volume.root_path, removed, "Volume removed from index");
        Ok(removed)
    }

    fn accepts(&self, file_name: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        extension_of(file_name)
            .map(|ext| self.extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// Canonicalize a scan root and make sure it is a directory.
    fn resolve_existing_dir(&self, root: &str) -> Result<PathBuf, VolumeError> {
        let not_found = || VolumeError::PathNotFound {
            path: root.to_string(),
        };
        if root.trim().is_empty() {
            return Err(not_found());
        }
        let canonical = std::fs::canonicalize(root).map_err(|_| not_found())?;
        match self.fs.stat_path(&canonical) {
            Ok(Some(stat)) if stat.is_directory => Ok(canonical),
            _ => Err(not_found()),
        }
    }

    /// Look up a registered volume by root path.
    ///
    /// The path is canonicalized when it still exists so that `/a/../b` and
    /// `/b` name the same volume. A root that was deleted after being scanned
    /// is matched verbatim, since its cache remains queryable.
    fn require_volume(&self, root: &str) -> Result<Volume, VolumeError> {
        let key = std::fs::canonicalize(root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| trim_trailing_separator(root).to_string());

        self.db
            .fetch_one(
                &format!(
                    "SELECT {} FROM volumes v LEFT JOIN assets a ON a.volume_id = v.id \
                     WHERE v.root_path = ?1 GROUP BY v.id",
                    VOLUME_COLUMNS
                ),
                params![key],
                map_volume,
            )?
            .ok_or_else(|| {
                debug!(root = %key, "Volume not registered");
                VolumeError::PathNotFound {
                    path: root.to_string(),
                }
            })
    }
}

fn upsert_volume(
    tx: &Transaction<'_>,
    root_key: &str,
    root_path: &Path,
    name: Option<&str>,
    description: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM volumes WHERE root_path = ?1",
            params![root_key],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            if let Some(name) = name {
                tx.execute("UPDATE volumes SET name = ?1 WHERE id = ?2", params![name, id])?;
            }
            if let Some(description) = description {
                tx.execute(
                    "UPDATE volumes SET description = ?1 WHERE id = ?2",
                    params![description, id],
                )?;
            }
            Ok(id)
        }
        None => {
            let default_name = root_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root_key.to_string());
            tx.execute(
                "INSERT INTO volumes (root_path, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![root_key, name.unwrap_or(&default_name), description, now.to_rfc3339()],
            )?;
            Ok(tx.last_insert_rowid())
        }
    }
}

fn load_cached(tx: &Transaction<'_>, volume_id: i64) -> Result<HashMap<String, CachedAsset>, StorageError> {
    let mut stmt =
        tx.prepare("SELECT relative_path, size_bytes, modified_at_ns FROM assets WHERE volume_id = ?1")?;
    let rows = stmt.query_map(params![volume_id], |row| {
        let size: i64 = row.get(1)?;
        Ok((
            row.get::<_, String>(0)?,
            CachedAsset {
                size_bytes: size.max(0) as u64,
                modified_at_ns: row.get(2)?,
            },
        ))
    })?;
    Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
}

fn insert_asset(
    tx: &Transaction<'_>,
    volume_id: i64,
    record: &FileRecord,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO assets (volume_id, relative_path, file_name, extension, size_bytes, modified_at_ns, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            volume_id,
            record.relative_path,
            record.file_name,
            extension_of(&record.file_name),
            to_sql_size(record.size_bytes),
            to_nanos(record.modified_at),
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn update_asset(
    tx: &Transaction<'_>,
    volume_id: i64,
    record: &FileRecord,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    tx.execute(
        "UPDATE assets SET size_bytes = ?1, modified_at_ns = ?2, indexed_at = ?3
         WHERE volume_id = ?4 AND relative_path = ?5",
        params![
            to_sql_size(record.size_bytes),
            to_nanos(record.modified_at),
            now.to_rfc3339(),
            volume_id,
            record.relative_path,
        ],
    )?;
    Ok(())
}

fn map_asset(row: &Row<'_>) -> rusqlite::Result<Asset> {
    let size: i64 = row.get(4)?;
    Ok(Asset {
        volume_id: row.get(0)?,
        relative_path: row.get(1)?,
        file_name: row.get(2)?,
        extension: row.get(3)?,
        size_bytes: size.max(0) as u64,
        modified_at: Utc.timestamp_nanos(row.get(5)?),
        indexed_at: parse_timestamp(row, 6)?,
    })
}

fn map_volume(row: &Row<'_>) -> rusqlite::Result<Volume> {
    let last_scanned: Option<String> = row.get(5)?;
    let count: i64 = row.get(6)?;
    let total: i64 = row.get(7)?;
    Ok(Volume {
        id: row.get(0)?,
        root_path: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        last_scanned_at: last_scanned
            .map(|s| parse_rfc3339(&s, 5))
            .transpose()?,
        asset_count: count.max(0) as u64,
        total_bytes: total.max(0) as u64,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_rfc3339(&raw, idx)
}

fn parse_rfc3339(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn to_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Whether `path` lies inside any of `dirs` (`""` is the root and covers all).
fn under_any(path: &str, dirs: &[String]) -> bool {
    dirs.iter().any(|dir| {
        dir.is_empty()
            || path
                .strip_prefix(dir.as_str())
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    })
}

/// Distinct lowercase tokens of a relative path with its extension removed.
/// Purely numeric and single-character tokens carry no meaning and are
/// dropped.
fn path_keywords(relative_path: &str) -> HashSet<String> {
    let name_start = relative_path.rfind('/').map_or(0, |i| i + 1);
    let stem = match relative_path.rfind('.') {
        Some(dot) if dot > name_start => &relative_path[..dot],
        _ => relative_path,
    };
    stem.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 1)
        .filter(|token| !token.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_lowercase)
        .collect()
}

fn normalize_relative(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

fn trim_trailing_separator(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        path
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volumes::fs::LocalFs;
    use std::time::{Duration, SystemTime};

    fn cached_paths(index: &VolumeIndex, root: &str) -> HashSet<String> {
        index
            .list_assets(root, &AssetFilter::default())
            .unwrap()
            .into_iter()
            .map(|a| a.relative_path)
            .collect()
    }

    fn index() -> VolumeIndex {
        VolumeIndex::new(Database::open_in_memory().unwrap(), Arc::new(LocalFs), &[])
    }

    fn root_str(dir: &tempfile::TempDir) -> String {
        dir.path().to_string_lossy().into_owned()
    }

    fn write(dir: &Path, rel: &str, bytes: usize) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, vec![0u8; bytes]).unwrap();
    }

    fn set_mtime(path: &Path, at: SystemTime) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(at).unwrap();
    }

    #[test]
    fn test_scan_empty_then_add_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let idx = index();
        let root = root_str(&dir);

        let summary = idx.scan_volume(&root, None, None).unwrap();
        assert_eq!((summary.added, summary.updated, summary.removed), (0, 0, 0));

        write(dir.path(), "hit.wav", 100);
        let summary = idx.scan_volume(&root, None, None).unwrap();
        assert_eq!((summary.added, summary.updated, summary.removed), (1, 0, 0));

        let asset = idx.get_asset(&root, "hit.wav").unwrap();
        assert_eq!(asset.size_bytes, 100);
        assert_eq!(asset.extension.as_deref(), Some("wav"));
    }

    #[test]
    fn test_list_matches_filesystem_after_scan() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.wav", 10);
        write(dir.path(), "drums/b.wav", 20);
        write(dir.path(), "drums/deep/c.txt", 30);
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, None, None).unwrap();

        let assets = idx.list_assets(&root, &AssetFilter::default()).unwrap();
        let paths: Vec<&str> = assets.iter().map(|a| a.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.wav", "drums/b.wav", "drums/deep/c.txt"]);

        for asset in &assets {
            let meta = std::fs::metadata(dir.path().join(&asset.relative_path)).unwrap();
            assert_eq!(asset.size_bytes, meta.len());
            assert_eq!(asset.modified_at, DateTime::<Utc>::from(meta.modified().unwrap()));
        }
    }

    #[test]
    fn test_rescan_unchanged_tree_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.wav", 10);
        write(dir.path(), "sub/b.wav", 10);
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, None, None).unwrap();

        let summary = idx.scan_volume(&root, None, None).unwrap();
        assert_eq!((summary.added, summary.updated, summary.removed), (0, 0, 0));
        assert_eq!(summary.unchanged, 2);
    }

    #[test]
    fn test_deleted_file_is_removed_on_rescan() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.wav", 1);
        write(dir.path(), "gone.wav", 1);
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, None, None).unwrap();

        std::fs::remove_file(dir.path().join("gone.wav")).unwrap();
        let summary = idx.scan_volume(&root, None, None).unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(cached_paths(&idx, &root), HashSet::from(["keep.wav".to_string()]));
        assert!(matches!(
            idx.get_asset(&root, "gone.wav"),
            Err(VolumeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_modified_file_is_updated() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "loop.wav", 5);
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, None, None).unwrap();

        // Same size, different mtime still counts as a change.
        let later = SystemTime::now() + Duration::from_secs(120);
        set_mtime(&dir.path().join("loop.wav"), later);
        let summary = idx.scan_volume(&root, None, None).unwrap();
        assert_eq!((summary.added, summary.updated, summary.removed), (0, 1, 0));
        let asset = idx.get_asset(&root, "loop.wav").unwrap();
        assert_eq!(asset.modified_at, DateTime::<Utc>::from(later));

        write(dir.path(), "loop.wav", 50);
        let summary = idx.scan_volume(&root, None, None).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(idx.get_asset(&root, "loop.wav").unwrap().size_bytes, 50);
    }

    #[test]
    fn test_scan_missing_root_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let idx = index();
        let missing = dir.path().join("nope");
        let err = idx
            .scan_volume(&missing.to_string_lossy(), None, None)
            .unwrap_err();
        assert!(matches!(err, VolumeError::PathNotFound { .. }));

        write(dir.path(), "file.wav", 1);
        let err = idx
            .scan_volume(&dir.path().join("file.wav").to_string_lossy(), None, None)
            .unwrap_err();
        assert!(matches!(err, VolumeError::PathNotFound { .. }));
    }

    #[test]
    fn test_list_unregistered_root_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let idx = index();
        let err = idx
            .list_assets(&root_str(&dir), &AssetFilter::default())
            .unwrap_err();
        assert!(matches!(err, VolumeError::PathNotFound { .. }));
    }

    #[test]
    fn test_list_serves_from_cache_without_rescan() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.wav", 1);
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, None, None).unwrap();

        // A new file is invisible until the next scan.
        write(dir.path(), "b.wav", 1);
        assert_eq!(cached_paths(&idx, &root).len(), 1);
    }

    #[test]
    fn test_list_filter_and_paging() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["kick1.wav", "kick2.wav", "kick3.aif", "snare.wav"] {
            write(dir.path(), name, 1);
        }
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, None, None).unwrap();

        let filter = AssetFilter::build(Some("kick".into()), Some("wav".into()), None, None, None).unwrap();
        let names: Vec<String> = idx
            .list_assets(&root, &filter)
            .unwrap()
            .into_iter()
            .map(|a| a.relative_path)
            .collect();
        assert_eq!(names, vec!["kick1.wav", "kick2.wav"]);

        let filter = AssetFilter::build(None, None, Some(r"^kick\d"), Some(1), Some(1)).unwrap();
        let page = idx.list_assets(&root, &filter).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].relative_path, "kick2.wav");
    }

    #[test]
    fn test_extension_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.WAV", 1);
        write(dir.path(), "notes.txt", 1);
        let idx = VolumeIndex::new(
            Database::open_in_memory().unwrap(),
            Arc::new(LocalFs),
            &[".wav".to_string(), "flac".to_string()],
        );
        let root = root_str(&dir);
        let summary = idx.scan_volume(&root, None, None).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(cached_paths(&idx, &root), HashSet::from(["a.WAV".to_string()]));
    }

    #[test]
    fn test_volume_registry_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.wav", 7);
        write(dir.path(), "b.wav", 3);
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, Some("Drums"), Some("808 kit")).unwrap();

        let volumes = idx.list_volumes().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "Drums");
        assert_eq!(volumes[0].description.as_deref(), Some("808 kit"));
        assert_eq!(volumes[0].asset_count, 2);
        assert_eq!(volumes[0].total_bytes, 10);
        assert!(volumes[0].last_scanned_at.is_some());

        // Re-scan without a name keeps the registered one.
        idx.scan_volume(&root, None, None).unwrap();
        assert_eq!(idx.get_volume(&root).unwrap().name, "Drums");

        assert_eq!(idx.remove_volume(&root).unwrap(), 2);
        assert!(idx.list_volumes().unwrap().is_empty());
        assert!(dir.path().join("a.wav").exists());
        assert!(matches!(
            idx.remove_volume(&root),
            Err(VolumeError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_deleted_root_cache_still_queryable() {
        let dir = tempfile::tempdir().unwrap();
        let root_path = dir.path().join("vol");
        write(&root_path, "a.wav", 1);
        let idx = index();
        let canonical = std::fs::canonicalize(&root_path).unwrap();
        let root = canonical.to_string_lossy().into_owned();
        idx.scan_volume(&root, None, None).unwrap();

        std::fs::remove_dir_all(&root_path).unwrap();
        assert_eq!(cached_paths(&idx, &root).len(), 1);
        assert!(matches!(
            idx.scan_volume(&root, None, None),
            Err(VolumeError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_get_asset_on_unregistered_root_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.wav", 1);
        let idx = index();
        let err = idx.get_asset(&root_str(&dir), "a.wav").unwrap_err();
        match err {
            VolumeError::NotFound { relative_path, .. } => assert_eq!(relative_path, "a.wav"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failed_scan_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "gone.wav", 1);
        write(dir.path(), "grows.wav", 1);
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, Some("Kit"), None).unwrap();
        let before = idx.get_volume(&root).unwrap();

        std::fs::remove_file(dir.path().join("gone.wav")).unwrap();
        write(dir.path(), "grows.wav", 64);
        write(dir.path(), "new.wav", 1);
        idx.db
            .execute(
                "CREATE TRIGGER reject_new BEFORE INSERT ON assets \
                 WHEN NEW.relative_path = 'new.wav' BEGIN SELECT RAISE(ABORT, 'disk full'); END",
                [],
            )
            .unwrap();

        let err = idx.scan_volume(&root, Some("Renamed"), None).unwrap_err();
        assert!(matches!(err, VolumeError::Storage(_)));

        let after = idx.get_volume(&root).unwrap();
        assert_eq!(after.name, "Kit");
        assert_eq!(after.last_scanned_at, before.last_scanned_at);
        assert_eq!(
            cached_paths(&idx, &root),
            HashSet::from(["gone.wav".to_string(), "grows.wav".to_string()])
        );
        assert_eq!(idx.get_asset(&root, "grows.wav").unwrap().size_bytes, 1);
    }

    #[test]
    fn test_update_volume_keeps_assets() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.wav", 1);
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, Some("Drums"), Some("808")).unwrap();
        let scanned_at = idx.get_volume(&root).unwrap().last_scanned_at;

        let volume = idx.update_volume(&root, Some("Percussion"), None).unwrap();
        assert_eq!(volume.name, "Percussion");
        assert_eq!(volume.description.as_deref(), Some("808"));
        assert_eq!(volume.asset_count, 1);
        assert_eq!(volume.last_scanned_at, scanned_at);

        let volume = idx.update_volume(&root, None, Some("909")).unwrap();
        assert_eq!(volume.name, "Percussion");
        assert_eq!(volume.description.as_deref(), Some("909"));

        assert!(matches!(
            idx.update_volume(&root, Some("  "), None),
            Err(VolumeError::InvalidArgument(_))
        ));
        let missing = dir.path().join("missing").to_string_lossy().into_owned();
        assert!(matches!(
            idx.update_volume(&missing, Some("x"), None),
            Err(VolumeError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_asset_keywords_count_assets_per_token() {
        let kit = tempfile::tempdir().unwrap();
        write(kit.path(), "Drums/Kick_01.wav", 1);
        write(kit.path(), "Drums/Kick_02.wav", 1);
        write(kit.path(), "Drums/snare-kick.wav", 1);
        let pads = tempfile::tempdir().unwrap();
        write(pads.path(), "warm pad.aif", 1);
        let idx = index();
        idx.scan_volume(&root_str(&kit), None, None).unwrap();
        idx.scan_volume(&root_str(&pads), None, None).unwrap();

        let keywords = idx.asset_keywords(Some(&root_str(&kit)), None).unwrap();
        let pairs: Vec<(&str, u64)> = keywords
            .iter()
            .map(|k| (k.keyword.as_str(), k.asset_count))
            .collect();
        assert_eq!(pairs, vec![("drums", 3), ("kick", 3), ("snare", 1)]);

        let all = idx.asset_keywords(None, Some(3)).unwrap();
        assert_eq!(all.len(), 3);
        assert!(idx
            .asset_keywords(None, None)
            .unwrap()
            .iter()
            .any(|k| k.keyword == "pad"));
    }

    #[test]
    fn test_path_keywords() {
        let keywords = path_keywords("Loops/120bpm/Funky_Loop 01.WAV");
        assert_eq!(
            keywords,
            ["loops", "120bpm", "funky", "loop"]
                .into_iter()
                .map(String::from)
                .collect::<HashSet<String>>()
        );
        assert!(path_keywords(".hidden").contains("hidden"));
    }

    #[test]
    fn test_under_any() {
        let dirs = vec!["drums".to_string()];
        assert!(under_any("drums/kick.wav", &dirs));
        assert!(!under_any("drumsolo.wav", &dirs));
        assert!(under_any("anything", &[String::new()]));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_keeps_cached_rows() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "locked/a.wav", 1);
        write(dir.path(), "open.wav", 1);
        let idx = index();
        let root = root_str(&dir);
        idx.scan_volume(&root, None, None).unwrap();

        let locked = dir.path().join("locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        // Running as root ignores directory permissions; nothing to check then.
        if std::fs::read_dir(&locked).is_ok() {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }
        let summary = idx.scan_volume(&root, None, None).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(summary.removed, 0);
        assert_eq!(summary.issues.len(), 1);
        assert_eq!(summary.issues[0].relative_path, "locked");
        assert!(cached_paths(&idx, &root).contains("locked/a.wav"));
    }
}
