use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::{CleanupTarget, TargetLocation};
use crate::utils::format_size;

/// Empties the platform trash as one opaque operation.
pub trait Trash: Send + Sync {
    fn empty_trash(&self) -> Result<(), TrashError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to empty trash: {0}")]
pub struct TrashError(pub String);

/// Why a single entry (or a whole target) could not be cleaned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NotFound,
    PermissionDenied,
    NotADirectory,
    InUse,
    Trash(String),
    Other(String),
}

impl FailureReason {
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => FailureReason::NotFound,
            io::ErrorKind::PermissionDenied => FailureReason::PermissionDenied,
            _ if is_in_use(error) => FailureReason::InUse,
            _ => FailureReason::Other(error.to_string()),
        }
    }
}

#[cfg(windows)]
fn is_in_use(error: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(error.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_in_use(error: &io::Error) -> bool {
    // EBUSY, ETXTBSY
    matches!(error.raw_os_error(), Some(16) | Some(26))
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotFound => f.write_str("not found"),
            FailureReason::PermissionDenied => f.write_str("permission denied"),
            FailureReason::NotADirectory => f.write_str("not a directory"),
            FailureReason::InUse => f.write_str("in use"),
            FailureReason::Trash(msg) => write!(f, "trash error: {msg}"),
            FailureReason::Other(msg) => f.write_str(msg),
        }
    }
}

/// One failed deletion, or a failed target as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError {
    /// Position of the target in the run, starting at 0.
    pub target_index: usize,
    /// The entry that failed; `None` for the trash.
    pub path: Option<PathBuf>,
    pub reason: FailureReason,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.reason),
            None => write!(f, "trash: {}", self.reason),
        }
    }
}

/// Outcome of cleaning a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResult {
    pub index: usize,
    pub location: TargetLocation,
    pub files_deleted: u64,
    pub dirs_deleted: u64,
    pub bytes_freed: u64,
    pub errors: Vec<EntryError>,
}

impl TargetResult {
    fn new(index: usize, location: TargetLocation) -> Self {
        Self {
            index,
            location,
            files_deleted: 0,
            dirs_deleted: 0,
            bytes_freed: 0,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, path: Option<&Path>, reason: FailureReason) {
        self.errors.push(EntryError {
            target_index: self.index,
            path: path.map(Path::to_path_buf),
            reason,
        });
    }
}

/// Aggregate of one cleanup run. Built once, then handed to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub targets: Vec<TargetResult>,
    pub files_deleted: u64,
    pub dirs_deleted: u64,
    pub bytes_freed: u64,
    pub errors: Vec<EntryError>,
    pub duration: Duration,
    /// The run stopped early because it was cancelled.
    pub cancelled: bool,
}

impl CleanupResult {
    fn absorb(&mut self, target: TargetResult) {
        self.files_deleted += target.files_deleted;
        self.dirs_deleted += target.dirs_deleted;
        self.bytes_freed += target.bytes_freed;
        self.errors.extend(target.errors.iter().cloned());
        self.targets.push(target);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Deletes the contents of cleanup targets, best effort.
pub struct CleanupEngine {
    trash: Arc<dyn Trash>,
}

impl CleanupEngine {
    pub fn new(trash: Arc<dyn Trash>) -> Self {
        Self { trash }
    }

    /// Clean a single target.
    pub fn clean_one(&self, target: &CleanupTarget) -> TargetResult {
        self.clean_target(0, target)
    }

    /// Clean every target in order. A failing target never stops the run.
    pub fn clean_all(&self, targets: &[CleanupTarget]) -> CleanupResult {
        self.run(targets, &mut |_, _| {}, None)
    }

    /// Shared driver for `clean_all` and the background worker. `on_target`
    /// fires with `(index, total)` before each target starts; `cancel` is
    /// checked only between targets.
    pub(crate) fn run(
        &self,
        targets: &[CleanupTarget],
        on_target: &mut dyn FnMut(usize, usize),
        cancel: Option<&AtomicBool>,
    ) -> CleanupResult {
        let started = Instant::now();
        let total = targets.len();
        let mut result = CleanupResult::default();

        for (index, target) in targets.iter().enumerate() {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                log::info!("Cleanup cancelled after {index} of {total} targets");
                result.cancelled = true;
                break;
            }
            on_target(index, total);
            result.absorb(self.clean_target(index, target));
        }

        result.duration = started.elapsed();
        log::info!(
            "Cleanup finished: {} files, {} folders, {} freed, {} errors",
            result.files_deleted,
            result.dirs_deleted,
            format_size(result.bytes_freed),
            result.errors.len()
        );
        result
    }

    fn clean_target(&self, index: usize, target: &CleanupTarget) -> TargetResult {
        match &target.location {
            TargetLocation::Trash => self.empty_trash(index),
            TargetLocation::Path(path) => clean_directory(index, path),
        }
    }

    fn empty_trash(&self, index: usize) -> TargetResult {
        let mut result = TargetResult::new(index, TargetLocation::Trash);
        match self.trash.empty_trash() {
            Ok(()) => log::info!("Trash emptied"),
            Err(e) => {
                log::error!("{e}");
                result.fail(None, FailureReason::Trash(e.0));
            }
        }
        result
    }
}

/// Delete everything below `root`, leaving `root` itself in place.
fn clean_directory(index: usize, root: &Path) -> TargetResult {
    let mut result = TargetResult::new(index, TargetLocation::Path(root.to_path_buf()));

    match fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            log::warn!("Path is not a directory: {}", root.display());
            result.fail(Some(root), FailureReason::NotADirectory);
            return result;
        }
        Err(e) => {
            log::warn!("Cannot clean {}: {e}", root.display());
            result.fail(Some(root), FailureReason::from_io(&e));
            return result;
        }
    }

    // Paths whose deletion failed; their ancestors will not be empty.
    let mut failed: Vec<PathBuf> = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .contents_first(true);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                let reason = e
                    .io_error()
                    .map(FailureReason::from_io)
                    .unwrap_or_else(|| FailureReason::Other(e.to_string()));
                log::warn!("Cannot read {}: {reason}", path.display());
                result.fail(Some(&path), reason);
                failed.push(path);
                continue;
            }
        };

        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            match fs::remove_dir(path) {
                Ok(()) => result.dirs_deleted += 1,
                Err(_) if failed.iter().any(|f| f.starts_with(path)) => {}
                Err(e) => {
                    log::warn!("Failed to remove {}: {e}", path.display());
                    result.fail(Some(path), FailureReason::from_io(&e));
                    failed.push(path.to_path_buf());
                }
            }
            continue;
        }

        // Symlinks and junctions land here: removed as leaves, never followed.
        let size = if file_type.is_file() {
            entry.metadata().map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        match remove_leaf(path, file_type) {
            Ok(()) => {
                result.files_deleted += 1;
                result.bytes_freed += size;
            }
            Err(e) => {
                log::warn!("Failed to remove {}: {e}", path.display());
                result.fail(Some(path), FailureReason::from_io(&e));
                failed.push(path.to_path_buf());
            }
        }
    }

    log::info!(
        "Cleaned {}: {} files, {} folders, {}",
        root.display(),
        result.files_deleted,
        result.dirs_deleted,
        format_size(result.bytes_freed)
    );
    result
}

fn remove_leaf(path: &Path, file_type: fs::FileType) -> io::Result<()> {
    match fs::remove_file(path) {
        // Directory symlinks and junctions need remove_dir on Windows.
        Err(e) if cfg!(windows) && file_type.is_symlink() => fs::remove_dir(path).map_err(|_| e),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Trash fake that records calls and optionally fails.
    #[derive(Default)]
    pub(crate) struct FakeTrash {
        pub calls: Mutex<usize>,
        pub fail_with: Option<String>,
    }

    impl Trash for FakeTrash {
        fn empty_trash(&self) -> Result<(), TrashError> {
            *self.calls.lock().unwrap() += 1;
            match &self.fail_with {
                Some(msg) => Err(TrashError(msg.clone())),
                None => Ok(()),
            }
        }
    }

    fn engine() -> CleanupEngine {
        CleanupEngine::new(Arc::new(FakeTrash::default()))
    }

    fn write_file(path: &Path, len: usize) {
        fs::write(path, vec![b'x'; len]).unwrap();
    }

    #[test]
    fn test_files_only_directory_is_left_empty() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("a.txt"), 100);
        write_file(&dir.path().join("b.bin"), 250);

        let result = engine().clean_one(&CleanupTarget::path(dir.path(), None));

        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(result.files_deleted, 2);
        assert_eq!(result.bytes_freed, 350);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_nested_directories_removed_root_kept() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("one").join("two");
        fs::create_dir_all(&nested).unwrap();
        write_file(&nested.join("deep.txt"), 10);
        write_file(&dir.path().join("one").join("mid.txt"), 20);
        fs::create_dir(dir.path().join("empty")).unwrap();

        let result = engine().clean_one(&CleanupTarget::path(dir.path(), None));

        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(result.files_deleted, 2);
        assert_eq!(result.dirs_deleted, 3);
        assert_eq!(result.bytes_freed, 30);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_removed_not_followed() {
        let outside = TempDir::new().unwrap();
        write_file(&outside.path().join("keep.txt"), 5);
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let result = engine().clean_one(&CleanupTarget::path(dir.path(), None));

        assert!(outside.path().join("keep.txt").exists());
        assert!(fs::symlink_metadata(dir.path().join("link")).is_err());
        assert_eq!(result.files_deleted, 1);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_missing_target_is_single_not_found() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("gone");

        let result = engine().clean_one(&CleanupTarget::path(&gone, None));

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].reason, FailureReason::NotFound);
        assert_eq!(result.errors[0].path.as_deref(), Some(gone.as_path()));
        assert_eq!(result.errors[0].reason.to_string(), "not found");
    }

    #[test]
    fn test_file_target_is_not_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        write_file(&file, 3);

        let result = engine().clean_one(&CleanupTarget::path(&file, None));

        assert_eq!(result.errors[0].reason, FailureReason::NotADirectory);
        assert!(file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_undeletable_entries_are_recorded_and_rest_continues() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        write_file(&locked.join("stuck.txt"), 7);
        write_file(&dir.path().join("free.txt"), 9);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        // Privileged users ignore directory permissions.
        if fs::write(locked.join("probe"), b"").is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = engine().clean_one(&CleanupTarget::path(dir.path(), None));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(!dir.path().join("free.txt").exists());
        assert!(locked.join("stuck.txt").exists());
        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].reason, FailureReason::PermissionDenied);
        assert_eq!(
            result.errors[0].path.as_deref(),
            Some(locked.join("stuck.txt").as_path())
        );
    }

    #[test]
    fn test_trash_target_uses_collaborator() {
        let trash = Arc::new(FakeTrash::default());
        let engine = CleanupEngine::new(trash.clone());

        let result = engine.clean_one(&CleanupTarget::trash());

        assert_eq!(*trash.calls.lock().unwrap(), 1);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_trash_failure_recorded_and_run_continues() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("a"), 4);
        let engine = CleanupEngine::new(Arc::new(FakeTrash {
            fail_with: Some("access denied".to_string()),
            ..FakeTrash::default()
        }));

        let result = engine.clean_all(&[
            CleanupTarget::trash(),
            CleanupTarget::path(dir.path(), None),
        ]);

        assert_eq!(result.targets.len(), 2);
        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].target_index, 0);
        assert_eq!(result.errors[0].path, None);
        assert_eq!(
            result.errors[0].reason,
            FailureReason::Trash("access denied".to_string())
        );
        assert!(!result.cancelled);
    }

    #[test]
    fn test_second_target_vanished() {
        let first = TempDir::new().unwrap();
        write_file(&first.path().join("1"), 400);
        write_file(&first.path().join("2"), 500);
        write_file(&first.path().join("3"), 300);
        let holder = TempDir::new().unwrap();
        let second = holder.path().join("second");
        fs::create_dir(&second).unwrap();
        let targets = [
            CleanupTarget::path(first.path(), None),
            CleanupTarget::path(&second, None),
        ];
        fs::remove_dir(&second).unwrap();

        let result = engine().clean_all(&targets);

        assert_eq!(result.files_deleted, 3);
        assert_eq!(result.bytes_freed, 1200);
        assert_eq!(result.targets.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].target_index, 1);
        assert_eq!(result.errors[0].reason.to_string(), "not found");
    }

    #[test]
    fn test_empty_target_list() {
        let result = engine().clean_all(&[]);
        assert!(result.targets.is_empty());
        assert!(result.is_clean());
        assert!(!result.cancelled);
    }
}
