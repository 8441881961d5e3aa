use std::path::PathBuf;

use crate::config::CleanupTarget;

/// Resolves per-user filesystem locations. Implemented once per platform;
/// tests substitute their own.
pub trait LocationProvider: Send + Sync {
    /// The current user's downloads folder, if the platform defines one.
    fn downloads_dir(&self) -> Option<PathBuf>;
}

/// Computes the targets a fresh configuration starts with.
pub struct DirectoryDetector<P: LocationProvider> {
    locations: P,
}

impl<P: LocationProvider> DirectoryDetector<P> {
    pub fn new(locations: P) -> Self {
        Self { locations }
    }

    /// Downloads folder (when it exists on disk) followed by the trash
    /// sentinel. Pure: calling it twice gives the same answer and touches
    /// nothing; persisting the result is the caller's job.
    pub fn detect_defaults(&self) -> Vec<CleanupTarget> {
        let mut targets = Vec::new();

        match self.locations.downloads_dir() {
            Some(downloads) if downloads.is_dir() => {
                log::info!("Detected Downloads folder: {}", downloads.display());
                targets.push(CleanupTarget::path(downloads, Some("Downloads")));
            }
            Some(downloads) => {
                log::warn!("Downloads folder not found at {}", downloads.display());
            }
            None => log::warn!("Could not resolve a Downloads folder for this user"),
        }

        targets.push(CleanupTarget::trash());

        log::info!(
            "Default targets detected: {}",
            targets
                .iter()
                .map(|t| t.location.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        targets
    }
}
