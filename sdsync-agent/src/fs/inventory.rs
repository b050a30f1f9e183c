//! Directory inventories and the missing-file diff.
//!
//! An inventory maps each relative path under a root to its size and
//! modification time. Diffing the source inventory against the target one
//! yields the files that still need to be transferred.

use crate::utils::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Default recursion cap for scans.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Lower-cased file extensions (with leading dot) excluded from inventories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    extensions: HashSet<String>,
}

impl IgnoreSet {
    /// Build from extension strings such as `".LRF"`, `"xml"` or `".lrv"`.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().to_lowercase())
            .filter(|ext| !ext.is_empty() && ext != ".")
            .map(|ext| if ext.starts_with('.') { ext } else { format!(".{ext}") })
            .collect();
        Self { extensions }
    }

    /// Whether the file name's extension is in the set, ignoring case.
    pub fn is_ignored(&self, path: &Path) -> bool {
        match path.extension() {
            Some(ext) => {
                let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
                self.extensions.contains(&ext)
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

/// One non-ignored regular file found under a root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Path relative to the scanned root, `/`-separated
    pub relative_path: String,
    pub size: u64,
    pub modified_time: DateTime<Utc>,
}

/// Relative path -> record, iterated in walk order.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    records: Vec<FileRecord>,
    index: HashMap<String, usize>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; a later record for the same path replaces the earlier one in place.
    pub fn insert(&mut self, record: FileRecord) {
        match self.index.get(&record.relative_path) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.index.insert(record.relative_path.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.index.get(relative_path).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.index.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size).sum()
    }
}

/// Files present in the source inventory but absent from the target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissingSet {
    pub files: Vec<String>,
    pub total_bytes: u64,
}

/// Options for inventory scans
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Maximum directory depth below the root
    pub max_depth: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Recursively inventory `root`, skipping files whose extension is ignored.
///
/// Unreadable subdirectories are logged and treated as empty. A root that
/// does not exist (or is not a directory) is an error.
///
/// # Example
/// ```no_run
/// use sdsync_agent::fs::inventory::{scan, IgnoreSet, ScanOptions};
/// use std::path::Path;
///
/// let ignore = IgnoreSet::new([".LRF"]);
/// let inventory = scan(Path::new("/Volumes/SD_Card/DCIM"), &ignore, &ScanOptions::default()).unwrap();
/// println!("Found {} files", inventory.len());
/// ```
pub fn scan(root: &Path, ignore: &IgnoreSet, options: &ScanOptions) -> Result<Inventory> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        _ => {
            return Err(SyncError::SourceUnavailable {
                root: root.to_path_buf(),
            })
        }
    }

    let mut inventory = Inventory::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .max_depth(options.max_depth)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                warn!("Cannot access {}, skipped: {}", path, e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if ignore.is_ignored(entry.path()) {
            debug!("Ignoring {}", entry.path().display());
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Cannot stat {}, skipped: {}", entry.path().display(), e);
                continue;
            }
        };

        let Some(relative_path) = relative_key(entry.path(), root) else {
            warn!("Skipping {}: name is not valid UTF-8", entry.path().display());
            continue;
        };

        let modified_time = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();

        inventory.insert(FileRecord {
            relative_path,
            size: metadata.len(),
            modified_time,
        });
    }

    Ok(inventory)
}

/// Relative paths in `source` that `target` lacks, in source walk order.
pub fn diff(source: &Inventory, target: &Inventory) -> MissingSet {
    let mut missing = MissingSet::default();

    for record in source.iter() {
        if !target.contains(&record.relative_path) {
            missing.files.push(record.relative_path.clone());
            missing.total_bytes += record.size;
        }
    }

    missing
}

/// `/`-joined path of `path` below `root`, or `None` if any component is not UTF-8.
fn relative_key(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_str()?);
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, len: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![7u8; len]).unwrap();
    }

    #[test]
    fn test_scan_empty_directory() -> Result<()> {
        let dir = TempDir::new()?;
        let inventory = scan(dir.path(), &IgnoreSet::default(), &ScanOptions::default())?;
        assert!(inventory.is_empty());
        Ok(())
    }

    #[test]
    fn test_scan_nested_relative_paths() -> Result<()> {
        let dir = TempDir::new()?;
        write(dir.path(), "DCIM/100MSDCF/DSC0001.JPG", 10);
        write(dir.path(), "DCIM/100MSDCF/DSC0002.JPG", 20);
        write(dir.path(), "top.mp4", 5);

        let inventory = scan(dir.path(), &IgnoreSet::default(), &ScanOptions::default())?;
        let paths: Vec<&str> = inventory.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["DCIM/100MSDCF/DSC0001.JPG", "DCIM/100MSDCF/DSC0002.JPG", "top.mp4"]
        );
        assert_eq!(inventory.get("top.mp4").unwrap().size, 5);
        assert_eq!(inventory.total_bytes(), 35);
        Ok(())
    }

    #[test]
    fn test_ignore_is_case_insensitive() -> Result<()> {
        let dir = TempDir::new()?;
        write(dir.path(), "a.JPG", 1);
        write(dir.path(), "b.jpg", 1);
        write(dir.path(), "c.Jpg", 1);
        write(dir.path(), "d.raw", 1);

        let inventory = scan(dir.path(), &IgnoreSet::new([".jpg"]), &ScanOptions::default())?;
        assert_eq!(inventory.len(), 1);
        assert!(inventory.contains("d.raw"));

        let upper = scan(dir.path(), &IgnoreSet::new([".JPG"]), &ScanOptions::default())?;
        assert_eq!(upper.len(), 1);
        Ok(())
    }

    #[test]
    fn test_ignore_set_normalizes_entries() {
        let set = IgnoreSet::new(["LRF", " .Xml ", ""]);
        assert!(set.is_ignored(Path::new("DJI_0001.lrf")));
        assert!(set.is_ignored(Path::new("C0001M01.XML")));
        assert!(!set.is_ignored(Path::new("C0001.MP4")));
        assert!(!set.is_ignored(Path::new("Makefile")));
    }

    #[test]
    fn test_ignored_sidecar_excluded() -> Result<()> {
        let dir = TempDir::new()?;
        write(dir.path(), "clip.mp4", 3);
        write(dir.path(), "clip.xml", 3);

        let inventory = scan(dir.path(), &IgnoreSet::new([".xml"]), &ScanOptions::default())?;
        let paths: Vec<&str> = inventory.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["clip.mp4"]);
        Ok(())
    }

    #[test]
    fn test_missing_root_is_error() {
        let result = scan(
            Path::new("/nonexistent_sd_card_12345"),
            &IgnoreSet::default(),
            &ScanOptions::default(),
        );
        assert!(matches!(result, Err(SyncError::SourceUnavailable { .. })));
    }

    #[test]
    fn test_max_depth_caps_recursion() -> Result<()> {
        let dir = TempDir::new()?;
        write(dir.path(), "a/b/c/deep.jpg", 1);
        write(dir.path(), "a/shallow.jpg", 1);

        let inventory = scan(dir.path(), &IgnoreSet::default(), &ScanOptions { max_depth: 2 })?;
        assert!(inventory.contains("a/shallow.jpg"));
        assert!(!inventory.contains("a/b/c/deep.jpg"));
        Ok(())
    }

    #[test]
    fn test_diff_reports_missing_in_walk_order() -> Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        write(source.path(), "a.jpg", 1000);
        write(source.path(), "b.raw", 2000);
        write(target.path(), "a.jpg", 1000);

        let ignore = IgnoreSet::default();
        let opts = ScanOptions::default();
        let missing = diff(
            &scan(source.path(), &ignore, &opts)?,
            &scan(target.path(), &ignore, &opts)?,
        );

        assert_eq!(missing.files, vec!["b.raw".to_string()]);
        assert_eq!(missing.total_bytes, 2000);
        Ok(())
    }

    #[test]
    fn test_diff_compares_paths_not_content() -> Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        write(source.path(), "same.mp4", 10);
        write(target.path(), "same.mp4", 99);

        let ignore = IgnoreSet::default();
        let opts = ScanOptions::default();
        let missing = diff(
            &scan(source.path(), &ignore, &opts)?,
            &scan(target.path(), &ignore, &opts)?,
        );
        assert!(missing.files.is_empty());
        assert_eq!(missing.total_bytes, 0);
        Ok(())
    }

    #[test]
    fn test_ignored_files_never_reported_missing() -> Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        write(source.path(), "DJI_0001.MP4", 4);
        write(source.path(), "DJI_0001.LRF", 4);

        let ignore = IgnoreSet::new([".lrf"]);
        let opts = ScanOptions::default();
        let missing = diff(
            &scan(source.path(), &ignore, &opts)?,
            &scan(target.path(), &ignore, &opts)?,
        );
        assert_eq!(missing.files, vec!["DJI_0001.MP4".to_string()]);
        Ok(())
    }

    #[test]
    fn test_inventory_insert_replaces_in_place() {
        let mut inventory = Inventory::new();
        let record = |path: &str, size| FileRecord {
            relative_path: path.to_string(),
            size,
            modified_time: DateTime::<Utc>::default(),
        };
        inventory.insert(record("x", 1));
        inventory.insert(record("y", 2));
        inventory.insert(record("x", 3));

        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory.iter().next().unwrap().size, 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_skipped() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        // Permission bits do not apply to root
        if nix::unistd::geteuid().is_root() {
            return Ok(());
        }

        let dir = TempDir::new()?;
        write(dir.path(), "a/1.jpg", 10);
        write(dir.path(), "locked/secret.jpg", 10);
        write(dir.path(), "z/2.jpg", 10);

        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;
        let result = scan(dir.path(), &IgnoreSet::default(), &ScanOptions::default());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        let inventory = result?;
        let paths: Vec<&str> = inventory.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a/1.jpg", "z/2.jpg"]);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_skipped() -> Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new()?;
        write(dir.path(), "good.jpg", 10);
        fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.jpg")), b"x")?;
        fs::create_dir(dir.path().join(OsStr::from_bytes(b"dir\xfe")))?;
        fs::write(dir.path().join(OsStr::from_bytes(b"dir\xfe")).join("inner.jpg"), b"x")?;

        let inventory = scan(dir.path(), &IgnoreSet::default(), &ScanOptions::default())?;
        let paths: Vec<&str> = inventory.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["good.jpg"]);
        assert!(paths.iter().all(|p| !p.contains('\u{FFFD}')));
        Ok(())
    }
}
