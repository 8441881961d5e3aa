//! CleanBox - background disk-space guardian
//!
//! Watches fixed volumes for low free space and empties a configurable set
//! of folders (plus the OS trash) on demand.

pub mod autostart;
pub mod cleaner;
pub mod cli;
pub mod config;
pub mod detector;
pub mod events;
pub mod monitor;
pub mod notify;
pub mod platform;
pub mod scanner;
pub mod service;
pub mod utils;
pub mod worker;

// Re-exports for easy access
pub use cleaner::{CleanupEngine, CleanupResult, EntryError, FailureReason, TargetResult, Trash};
pub use config::{AppConfig, CleanupTarget, ConfigError, ConfigStore, TargetLocation};
pub use detector::{DirectoryDetector, LocationProvider};
pub use monitor::{LowSpaceEvent, StorageMonitor, VolumeProbe, VolumeSample, VolumeState};
pub use notify::Notifier;
pub use scanner::{FolderInfo, FolderScanner};
pub use service::{CleanBox, Collaborators, ServiceError};
pub use worker::{CleanupWorker, ProgressEvent, WorkerHandle};

pub mod colors {
    use colored::Color;

    pub const SUCCESS: Color = Color::TrueColor { r: 77, g: 255, b: 157 };
    pub const HEADER: Color = Color::TrueColor { r: 157, g: 77, b: 255 };
    pub const PATH: Color = Color::TrueColor { r: 77, g: 195, b: 255 };
    pub const WARNING: Color = Color::TrueColor { r: 255, g: 217, b: 61 };
    pub const DANGER: Color = Color::TrueColor { r: 255, g: 107, b: 157 };
}

pub const APP_NAME: &str = "CleanBox";

/// Current version of CleanBox
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Warn when a volume has less free space than this
pub const DEFAULT_THRESHOLD_BYTES: u64 = 10 * GIB;

/// Delay between monitor passes
pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;

pub const SCHEMA_VERSION: u32 = 1;

/// Lives under the user's home directory
pub const CONFIG_DIR_NAME: &str = ".cleanbox";
pub const CONFIG_FILE_NAME: &str = "config.json";
