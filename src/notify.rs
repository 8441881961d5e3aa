use crate::cleaner::CleanupResult;
use crate::utils::format_size;
use crate::APP_NAME;

/// Outbound user notifications. The monitor calls `notify_low_space` only on
/// a fresh low-space crossing.
pub trait Notifier: Send + Sync {
    fn notify_low_space(&self, volume: &str, free_bytes: u64);

    /// Summary after a cleanup run.
    fn notify_cleanup_result(&self, _result: &CleanupResult) {}
}

/// Writes notifications to the log. Used when no desktop notification
/// channel is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_low_space(&self, volume: &str, free_bytes: u64) {
        log::warn!(
            "{APP_NAME} - Low Disk Space: {volume} has only {} free",
            format_size(free_bytes)
        );
    }

    fn notify_cleanup_result(&self, result: &CleanupResult) {
        log::info!("{APP_NAME} - Cleanup Complete: {}", cleanup_summary(result));
    }
}

/// One-line human summary of a run, shared by notifiers and the CLI.
pub fn cleanup_summary(result: &CleanupResult) -> String {
    if result.files_deleted == 0 && result.dirs_deleted == 0 && result.errors.is_empty() {
        return "No files to clean up.".to_string();
    }

    let mut message = format!(
        "Freed {} ({} files, {} folders)",
        format_size(result.bytes_freed),
        result.files_deleted,
        result.dirs_deleted
    );
    if !result.errors.is_empty() {
        message.push_str(&format!(" - {} items skipped", result.errors.len()));
    }
    if result.cancelled {
        message.push_str(" - cancelled");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_for_empty_run() {
        assert_eq!(cleanup_summary(&CleanupResult::default()), "No files to clean up.");
    }

    #[test]
    fn test_summary_mentions_skips_and_cancel() {
        let result = CleanupResult {
            files_deleted: 3,
            dirs_deleted: 1,
            bytes_freed: 2048,
            errors: vec![crate::cleaner::EntryError {
                target_index: 0,
                path: None,
                reason: crate::cleaner::FailureReason::InUse,
            }],
            cancelled: true,
            ..CleanupResult::default()
        };
        assert_eq!(
            cleanup_summary(&result),
            "Freed 2.00 KB (3 files, 1 folders) - 1 items skipped - cancelled"
        );
    }
}
