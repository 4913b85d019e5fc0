//! Filesystem collaborator and the lazy directory walk used by scans.
//!
//! `FileSystem` is the narrow contract the volume index needs (`stat_path`,
//! `list_directory`). `AssetWalk` builds a depth-first, lazily evaluated
//! sequence of file records on top of it. A walk holds no state outside
//! itself, so restarting a scan means constructing a new walk.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Metadata for a single path. Symlinks are reported as themselves, never
/// followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub is_directory: bool,
    pub is_file: bool,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

/// One entry of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub stat: FileStat,
}

pub trait FileSystem: Send + Sync {
    /// Stat a path. `Ok(None)` when it does not exist.
    fn stat_path(&self, path: &Path) -> io::Result<Option<FileStat>>;

    /// List the immediate children of a directory.
    fn list_directory(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>>;
}

/// `FileSystem` backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

fn to_stat(meta: &std::fs::Metadata) -> FileStat {
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    FileStat {
        is_directory: meta.is_dir(),
        is_file: meta.is_file(),
        size_bytes: meta.len(),
        modified_at: DateTime::<Utc>::from(modified),
    }
}

impl FileSystem for LocalFs {
    fn stat_path(&self, path: &Path) -> io::Result<Option<FileStat>> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) => Ok(Some(to_stat(&meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_directory(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            // Entries can vanish between readdir and stat; skip them.
            let meta = match entry.path().symlink_metadata() {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                stat: to_stat(&meta),
            });
        }
        // Stable order keeps scan issues and logs reproducible.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// A regular file discovered by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the walk root, always `/`-separated.
    pub relative_path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum WalkItem {
    File(FileRecord),
    /// A directory that could not be listed. `relative_path` is `""` for the
    /// root itself.
    Unreadable { relative_path: String, error: io::Error },
}

/// Lazy depth-first walk of regular files under a root.
pub struct AssetWalk<'a> {
    fs: &'a dyn FileSystem,
    /// Directories still to be listed: (absolute path, relative path).
    pending_dirs: Vec<(PathBuf, String)>,
    /// Items produced by the last listing, consumed before listing again.
    ready: std::vec::IntoIter<WalkItem>,
}

impl<'a> AssetWalk<'a> {
    pub fn new(fs: &'a dyn FileSystem, root: &Path) -> Self {
        Self {
            fs,
            pending_dirs: vec![(root.to_path_buf(), String::new())],
            ready: Vec::new().into_iter(),
        }
    }

    fn expand(&mut self, dir: PathBuf, relative: String) -> Vec<WalkItem> {
        let entries = match self.fs.list_directory(&dir) {
            Ok(entries) => entries,
            Err(error) => {
                return vec![WalkItem::Unreadable {
                    relative_path: relative,
                    error,
                }]
            }
        };

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in entries {
            let rel = join_relative(&relative, &entry.name);
            if entry.stat.is_directory {
                subdirs.push((entry.path, rel));
            } else if entry.stat.is_file {
                files.push(WalkItem::File(FileRecord {
                    relative_path: rel,
                    file_name: entry.name,
                    size_bytes: entry.stat.size_bytes,
                    modified_at: entry.stat.modified_at,
                }));
            }
        }
        // Push in reverse so directories are visited in name order.
        self.pending_dirs.extend(subdirs.into_iter().rev());
        files
    }
}

impl Iterator for AssetWalk<'_> {
    type Item = WalkItem;

    fn next(&mut self) -> Option<WalkItem> {
        loop {
            if let Some(item) = self.ready.next() {
                return Some(item);
            }
            let (dir, relative) = self.pending_dirs.pop()?;
            self.ready = self.expand(dir, relative).into_iter();
        }
    }
}

fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_files(root: &Path) -> Vec<String> {
        AssetWalk::new(&LocalFs, root)
            .filter_map(|item| match item {
                WalkItem::File(f) => Some(f.relative_path),
                WalkItem::Unreadable { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_walk_lists_nested_files_with_forward_slashes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("drums/kicks")).unwrap();
        std::fs::write(dir.path().join("pad.wav"), b"pad").unwrap();
        std::fs::write(dir.path().join("drums/snare.wav"), b"snare").unwrap();
        std::fs::write(dir.path().join("drums/kicks/808.wav"), b"808").unwrap();

        let mut files = collect_files(dir.path());
        files.sort();
        assert_eq!(files, vec!["drums/kicks/808.wav", "drums/snare.wav", "pad.wav"]);
    }

    #[test]
    fn test_walk_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wav"), b"a").unwrap();
        let first = collect_files(dir.path());
        let second = collect_files(dir.path());
        assert_eq!(first, second);
    }

    #[test]
    fn test_walk_reports_missing_root_as_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let items: Vec<WalkItem> = AssetWalk::new(&LocalFs, &missing).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], WalkItem::Unreadable { relative_path, .. } if relative_path.is_empty()));
    }

    #[test]
    fn test_stat_path_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalFs.stat_path(&dir.path().join("nope")).unwrap().is_none());
        let stat = LocalFs.stat_path(dir.path()).unwrap().unwrap();
        assert!(stat.is_directory);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_does_not_follow_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.wav"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.wav"), dir.path().join("file-link.wav"))
            .unwrap();
        assert!(collect_files(dir.path()).is_empty());
    }
}
