use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::utils::format_size;

/// Size summary of a folder, with children down to the requested depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
    pub file_count: u64,
    pub folder_count: u64,
    /// Largest first.
    pub children: Vec<FolderInfo>,
}

impl FolderInfo {
    fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            name: display_name(path),
            size_bytes: 0,
            file_count: 0,
            folder_count: 0,
            children: Vec::new(),
        }
    }

    pub fn size_formatted(&self) -> String {
        format_size(self.size_bytes)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Measures how much a cleanup would free. Cancellable from another thread
/// through a clone.
#[derive(Debug, Clone, Default)]
pub struct FolderScanner {
    cancelled: Arc<AtomicBool>,
}

impl FolderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `path`, listing children down to `max_depth` levels (1 =
    /// immediate children). Deeper folders are summed without detail.
    /// Returns `None` if cancelled. Unreadable folders count as empty.
    pub fn scan(&self, path: &Path, max_depth: usize) -> Option<FolderInfo> {
        self.cancelled.store(false, Ordering::SeqCst);
        let result = self.scan_level(path, max_depth, 0);
        self.cancelled.store(false, Ordering::SeqCst);
        result
    }

    pub fn cancel(&self) {
        log::info!("Scan cancelled");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn scan_level(&self, path: &Path, max_depth: usize, depth: usize) -> Option<FolderInfo> {
        if self.is_cancelled() {
            return None;
        }

        let mut info = FolderInfo::empty(path);
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Cannot access {}: {e}", path.display());
                return Some(info);
            }
        };

        for entry in entries.flatten() {
            if self.is_cancelled() {
                return None;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let entry_path = entry.path();

            if file_type.is_dir() {
                info.folder_count += 1;
                let child = if depth < max_depth {
                    let child = self.scan_level(&entry_path, max_depth, depth + 1)?;
                    info.file_count += child.file_count;
                    info.folder_count += child.folder_count;
                    child
                } else {
                    let mut child = FolderInfo::empty(&entry_path);
                    child.size_bytes = self.folder_size(&entry_path)?;
                    child
                };
                info.size_bytes += child.size_bytes;
                info.children.push(child);
            } else if file_type.is_file() {
                match entry.metadata() {
                    Ok(meta) => {
                        info.size_bytes += meta.len();
                        info.file_count += 1;
                    }
                    Err(e) => log::debug!("Cannot access file {}: {e}", entry_path.display()),
                }
            }
        }

        info.children
            .sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
        Some(info)
    }

    /// Total size of regular files below `path`, links not followed.
    fn folder_size(&self, path: &Path) -> Option<u64> {
        let mut total = 0;
        for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
            if self.is_cancelled() {
                return None;
            }
            if entry.file_type().is_file() {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout() -> TempDir {
        let dir = TempDir::new().unwrap();
        let big = dir.path().join("big");
        let deep = big.join("deeper");
        fs::create_dir_all(&deep).unwrap();
        fs::create_dir(dir.path().join("small")).unwrap();
        fs::write(dir.path().join("top.txt"), vec![0u8; 10]).unwrap();
        fs::write(big.join("a.bin"), vec![0u8; 300]).unwrap();
        fs::write(deep.join("b.bin"), vec![0u8; 200]).unwrap();
        fs::write(dir.path().join("small").join("c.txt"), vec![0u8; 5]).unwrap();
        dir
    }

    #[test]
    fn test_scan_sums_sizes_and_sorts_children() {
        let dir = layout();
        let info = FolderScanner::new().scan(dir.path(), 1).unwrap();

        assert_eq!(info.size_bytes, 515);
        assert_eq!(info.children.len(), 2);
        assert_eq!(info.children[0].name, "big");
        assert_eq!(info.children[0].size_bytes, 500);
        assert_eq!(info.children[1].name, "small");
        // Depth 1 details "big" but only sums "deeper".
        assert_eq!(info.children[0].children[0].size_bytes, 200);
        assert!(info.children[0].children[0].children.is_empty());
    }

    #[test]
    fn test_depth_zero_counts_only_top_level_files() {
        let dir = layout();
        let info = FolderScanner::new().scan(dir.path(), 0).unwrap();

        assert_eq!(info.size_bytes, 515);
        assert_eq!(info.file_count, 1);
        assert_eq!(info.folder_count, 2);
    }

    #[test]
    fn test_missing_folder_reports_zero() {
        let dir = TempDir::new().unwrap();
        let info = FolderScanner::new()
            .scan(&dir.path().join("missing"), 1)
            .unwrap();
        assert_eq!(info.size_bytes, 0);
        assert!(info.children.is_empty());
    }

    #[test]
    fn test_cancel_flag_is_observed_and_reset() {
        let dir = layout();
        let scanner = FolderScanner::new();
        scanner.cancel();
        assert!(scanner.is_cancelled());
        assert!(scanner.scan_level(dir.path(), 1, 0).is_none());

        // A fresh scan clears a stale request.
        assert!(scanner.scan(dir.path(), 1).is_some());
        assert!(!scanner.is_cancelled());
    }
}
