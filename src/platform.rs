//! Concrete adapters for the capabilities the core consumes.

use std::path::PathBuf;
use sysinfo::{DiskRefreshKind, Disks};

use crate::cleaner::{Trash, TrashError};
use crate::detector::LocationProvider;
use crate::monitor::{ProbeError, VolumeProbe, VolumeSample};

/// Per-user folders resolved through the `dirs` crate, so they follow the
/// current account and any platform redirection.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLocations;

impl LocationProvider for SystemLocations {
    fn downloads_dir(&self) -> Option<PathBuf> {
        dirs::download_dir().or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
    }
}

/// Fixed, local volumes as reported by `sysinfo`.
///
/// Listing reads only the mount table. Capacity is queried for one mount
/// point at a time, so an unresponsive network share stalls only its own
/// sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemVolumes;

impl SystemVolumes {
    fn mounted_disks() -> Disks {
        Disks::new_with_refreshed_list_specifics(DiskRefreshKind::nothing())
    }
}

impl VolumeProbe for SystemVolumes {
    fn volumes(&self) -> Result<Vec<String>, ProbeError> {
        let disks = Self::mounted_disks();
        let mut volumes: Vec<String> = disks
            .list()
            .iter()
            // Skip removable media
            .filter(|disk| !disk.is_removable())
            .map(|disk| disk.mount_point().display().to_string())
            .collect();
        volumes.sort();
        volumes.dedup();
        Ok(volumes)
    }

    fn sample(&self, volume: &str) -> Result<VolumeSample, ProbeError> {
        let mut disks = Self::mounted_disks();
        let disk = disks
            .list_mut()
            .iter_mut()
            .find(|disk| disk.mount_point().display().to_string() == volume)
            .ok_or_else(|| ProbeError::Unavailable(volume.to_string()))?;

        disk.refresh_specifics(DiskRefreshKind::nothing().with_storage());
        // Pseudo filesystems report no capacity
        if disk.total_space() == 0 {
            return Err(ProbeError::Unavailable(volume.to_string()));
        }
        Ok(VolumeSample {
            free_bytes: disk.available_space(),
            total_bytes: disk.total_space(),
        })
    }
}

/// Empties the OS trash / Recycle Bin.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTrash;

#[cfg(any(
    target_os = "windows",
    all(
        unix,
        not(target_os = "macos"),
        not(target_os = "ios"),
        not(target_os = "android")
    )
))]
impl Trash for SystemTrash {
    fn empty_trash(&self) -> Result<(), TrashError> {
        let items = trash::os_limited::list().map_err(|e| TrashError(e.to_string()))?;
        if items.is_empty() {
            log::debug!("Trash is already empty");
            return Ok(());
        }
        let count = items.len();
        trash::os_limited::purge_all(items).map_err(|e| TrashError(e.to_string()))?;
        log::info!("Purged {count} items from trash");
        Ok(())
    }
}

#[cfg(target_os = "macos")]
impl Trash for SystemTrash {
    fn empty_trash(&self) -> Result<(), TrashError> {
        let trash_dir = dirs::home_dir()
            .ok_or_else(|| TrashError("could not determine home directory".to_string()))?
            .join(".Trash");

        let entries = std::fs::read_dir(&trash_dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                TrashError(
                    "access denied; grant Full Disk Access to empty the Trash".to_string(),
                )
            } else {
                TrashError(format!("cannot read {}: {e}", trash_dir.display()))
            }
        })?;

        let mut failures = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            let removed = match entry.file_type() {
                Ok(ft) if ft.is_dir() => std::fs::remove_dir_all(&path),
                _ => std::fs::remove_file(&path),
            };
            if let Err(e) = removed {
                log::warn!("Failed to remove {}: {e}", path.display());
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(TrashError(format!("{failures} items could not be removed")));
        }
        Ok(())
    }
}

#[cfg(any(target_os = "ios", target_os = "android"))]
impl Trash for SystemTrash {
    fn empty_trash(&self) -> Result<(), TrashError> {
        Err(TrashError("emptying the trash is not supported on this platform".to_string()))
    }
}
