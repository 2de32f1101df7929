//! Origin directory discovery
//!
//! Polling walk over the watched origin folders, producing tracked entries
//! for every regular file found. Polling (rather than notification APIs) is
//! deliberate: the tracked directories live on a distributed filesystem
//! where inotify-style watching is unavailable.

use crate::config::Layout;
use crate::entry::{TrackedDir, TrackedEntry};
use crate::error::Result;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Counters from one discovery pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanStats {
    pub files_discovered: u64,
    pub errors: u64,
}

/// Discover files under the origin roots of the given folders.
///
/// Entries come back FIFO-sorted. The discovery timestamp is the file's
/// mtime, so repeated scans of an unchanged tree produce identical entries.
pub fn discover(
    layout: &Layout,
    folders: &[String],
    block_size: u64,
) -> Result<(Vec<TrackedEntry>, ScanStats)> {
    let mut entries = Vec::new();
    let mut stats = ScanStats::default();

    for folder in folders {
        let root = layout.role_root(TrackedDir::Origin).join(folder);
        if !root.is_dir() {
            debug!(folder = %folder, root = %root.display(), "origin folder absent, skipping");
            continue;
        }
        for item in WalkDir::new(&root).follow_links(false) {
            let item = match item {
                Ok(item) => item,
                Err(err) => {
                    warn!(folder = %folder, error = %err, "walk error during discovery");
                    stats.errors += 1;
                    continue;
                }
            };
            if !item.file_type().is_file() {
                continue;
            }
            match build_entry(folder, &root, item.path(), block_size) {
                Ok(entry) => {
                    stats.files_discovered += 1;
                    entries.push(entry);
                }
                Err(err) => {
                    warn!(path = %item.path().display(), error = %err, "failed to stat discovered file");
                    stats.errors += 1;
                }
            }
        }
    }

    entries.sort();
    Ok((entries, stats))
}

fn build_entry(
    folder: &str,
    root: &Path,
    path: &Path,
    block_size: u64,
) -> Result<TrackedEntry> {
    let metadata = std::fs::metadata(path)?;
    let discovered_at = metadata
        .modified()
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0)
        });
    let file_name = relative_name(root, path);
    Ok(TrackedEntry::new(
        folder,
        file_name,
        metadata.len(),
        block_size,
        discovered_at,
    ))
}

/// Path below the folder root, normalized to forward slashes so nested
/// input files keep their relative structure across platforms.
fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn seed(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_discover_builds_sorted_entries() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path().to_path_buf());
        let origin = layout.role_root(TrackedDir::Origin);
        seed(&origin, "events/part-0001", b"0123456789");
        seed(&origin, "events/nested/part-0002", b"01234");

        let (entries, stats) =
            discover(&layout, &["events".to_string()], 4).unwrap();
        assert_eq!(stats.files_discovered, 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(entries.len(), 2);
        assert!(entries.windows(2).all(|w| w[0] <= w[1]));

        let nested = entries
            .iter()
            .find(|e| e.file_name() == "nested/part-0002")
            .unwrap();
        assert_eq!(nested.size(), 5);
        assert_eq!(nested.map_slots(), 2);
        assert_eq!(nested.current(), TrackedDir::Origin);
    }

    #[test]
    fn test_missing_folder_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path().to_path_buf());
        let (entries, stats) =
            discover(&layout, &["absent".to_string()], 4).unwrap();
        assert!(entries.is_empty());
        assert_eq!(stats.errors, 0);
    }
}
