use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_INTERVAL_SECONDS, DEFAULT_THRESHOLD_BYTES,
    SCHEMA_VERSION,
};

/// Where a cleanup target lives: a directory on disk, or the platform trash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetLocation {
    Path(PathBuf),
    Trash,
}

impl TargetLocation {
    /// Parse a user-supplied identifier. The literal `trash` names the sentinel.
    pub fn parse(input: &str) -> Self {
        if input.eq_ignore_ascii_case("trash") {
            TargetLocation::Trash
        } else {
            TargetLocation::Path(PathBuf::from(input))
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            TargetLocation::Path(path) => Some(path),
            TargetLocation::Trash => None,
        }
    }

    pub fn is_trash(&self) -> bool {
        matches!(self, TargetLocation::Trash)
    }

    /// Identity used for duplicate detection: two locations with the same
    /// identity point at the same physical place.
    pub fn identity(&self) -> Option<PathBuf> {
        self.as_path().map(physical_path)
    }
}

impl fmt::Display for TargetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetLocation::Path(path) => write!(f, "{}", path.display()),
            TargetLocation::Trash => f.write_str("trash"),
        }
    }
}

/// A directory (or the trash) whose contents get emptied by a cleanup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupTarget {
    pub location: TargetLocation,
    #[serde(default)]
    pub label: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl CleanupTarget {
    /// Target for a directory, labelled with its final path component unless
    /// a label is given.
    pub fn path(path: impl Into<PathBuf>, label: Option<&str>) -> Self {
        let path = path.into();
        let label = match label {
            Some(label) => label.to_string(),
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        };
        Self {
            location: TargetLocation::Path(path),
            label,
            enabled: true,
        }
    }

    /// The platform trash sentinel.
    pub fn trash() -> Self {
        Self {
            location: TargetLocation::Trash,
            label: if cfg!(windows) { "Recycle Bin" } else { "Trash" }.to_string(),
            enabled: true,
        }
    }
}

/// Everything the application persists between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schema_version: u32,
    pub threshold_bytes: u64,
    pub interval_seconds: u64,
    pub targets: Vec<CleanupTarget>,

    // State tracking
    pub first_run_complete: bool,
    pub auto_start_enabled: bool,
    pub notified_volumes: Vec<String>,
    pub last_cleanup: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            targets: Vec::new(),
            first_run_complete: false,
            auto_start_enabled: true,
            notified_volumes: Vec::new(),
            last_cleanup: None,
        }
    }
}

impl AppConfig {
    /// Check the invariants every persisted config must hold.
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold_bytes == 0 {
            return Err("threshold_bytes must be greater than zero".to_string());
        }
        if self.interval_seconds == 0 {
            return Err("interval_seconds must be greater than zero".to_string());
        }

        let mut seen_trash = false;
        let mut seen_paths: Vec<PathBuf> = Vec::new();
        for target in &self.targets {
            match target.location.identity() {
                None => {
                    if seen_trash {
                        return Err("trash target listed more than once".to_string());
                    }
                    seen_trash = true;
                }
                Some(identity) => {
                    if seen_paths.contains(&identity) {
                        return Err(format!(
                            "duplicate target: {}",
                            target.location
                        ));
                    }
                    seen_paths.push(identity);
                }
            }
        }
        Ok(())
    }

    /// Whether a target with the same physical location is already configured.
    pub fn contains_target(&self, location: &TargetLocation) -> bool {
        let identity = location.identity();
        self.targets
            .iter()
            .any(|t| t.location.identity() == identity)
    }

    /// Targets a cleanup run should process, in configured order.
    pub fn enabled_targets(&self) -> Vec<CleanupTarget> {
        self.targets.iter().filter(|t| t.enabled).cloned().collect()
    }
}

/// Resolve a path to the physical location it names. Existing paths are
/// canonicalized; missing ones are normalized lexically.
fn physical_path(path: &Path) -> PathBuf {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path));
    if cfg!(windows) {
        PathBuf::from(resolved.to_string_lossy().to_lowercase())
    } else {
        resolved
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Persisted data is unreadable, unparsable, or violates the schema.
    #[error("config file {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// I/O failure while persisting. In-memory state is still authoritative.
    #[error("failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Rejected before anything was written.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which file `load_or_default` ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Primary,
    Backup,
    Defaults,
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub config: AppConfig,
    pub source: ConfigSource,
    /// Set when the primary file could not be used and the caller should
    /// surface a warning.
    pub warning: Option<ConfigError>,
}

/// Serialized access to the persisted [`AppConfig`].
///
/// One instance per process, passed explicitly to whoever needs it. A single
/// lock covers both the in-memory copy and file I/O, so a save can never
/// interleave with a load. Other processes (a second `cleanbox` run, the
/// background monitor) may write the same file, so every read-modify-write
/// starts from what is on disk.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    state: Mutex<Cached>,
}

#[derive(Debug, Default)]
struct Cached {
    config: AppConfig,
    /// Set when the last write failed; the file is then older than memory.
    unsaved: bool,
}

impl Cached {
    fn replace(&mut self, config: AppConfig) {
        self.config = config;
        self.unsaved = false;
    }
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(Cached::default()),
        }
    }

    /// Get the default config path (`~/.cleanbox/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the path to the config backup file
    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "backup")
    }

    fn lock(&self) -> MutexGuard<'_, Cached> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick up writes made by other processes. A missing or unreadable file
    /// leaves memory alone, as does a change this store has not managed to
    /// write yet.
    fn sync_from_disk(&self, state: &mut Cached) {
        if state.unsaved {
            return;
        }
        match read_config(&self.path) {
            Ok(Some(config)) => {
                if config != state.config {
                    log::debug!("Configuration changed on disk, reloading");
                    state.config = config;
                }
            }
            Ok(None) => {}
            Err(e) => log::debug!("Keeping in-memory configuration: {e}"),
        }
    }

    /// Load config from disk. A missing file yields defaults; anything that
    /// cannot be parsed or validated is `Corrupt`.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut state = self.lock();
        let config = read_config(&self.path)?.unwrap_or_else(|| {
            log::debug!("No config file at {}, using defaults", self.path.display());
            AppConfig::default()
        });
        state.replace(config.clone());
        Ok(config)
    }

    /// Load config, falling back to the backup file and then to defaults.
    /// Never fails; a fallback is reported through `warning`.
    pub fn load_or_default(&self) -> LoadOutcome {
        let mut state = self.lock();

        let primary_error = match read_config(&self.path) {
            Ok(Some(config)) => {
                log::info!("Configuration loaded from {}", self.path.display());
                state.replace(config.clone());
                return LoadOutcome {
                    config,
                    source: ConfigSource::Primary,
                    warning: None,
                };
            }
            Ok(None) => {
                log::info!("No config file found, using defaults");
                state.replace(AppConfig::default());
                return LoadOutcome {
                    config: state.config.clone(),
                    source: ConfigSource::Defaults,
                    warning: None,
                };
            }
            Err(e) => e,
        };

        log::warn!("{primary_error}, trying backup");
        let backup_path = self.backup_path();
        if let Ok(Some(config)) = read_config(&backup_path) {
            log::warn!("Restored configuration from {}", backup_path.display());
            state.replace(config.clone());
            return LoadOutcome {
                config,
                source: ConfigSource::Backup,
                warning: Some(primary_error),
            };
        }

        log::warn!("No usable backup, falling back to default configuration");
        state.replace(AppConfig::default());
        LoadOutcome {
            config: state.config.clone(),
            source: ConfigSource::Defaults,
            warning: Some(primary_error),
        }
    }

    /// Replace the configuration and persist it atomically.
    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::Invalid)?;
        let mut state = self.lock();
        state.config = config.clone();
        let saved = self.persist(&state.config);
        state.unsaved = saved.is_err();
        saved
    }

    /// Current in-memory configuration.
    pub fn snapshot(&self) -> AppConfig {
        self.lock().config.clone()
    }

    /// Re-read the file if another process changed it, then return the
    /// current configuration.
    pub fn refresh(&self) -> AppConfig {
        let mut state = self.lock();
        self.sync_from_disk(&mut state);
        state.config.clone()
    }

    /// Apply a mutation to the latest configuration, validate it, and
    /// persist. The mutation is kept in memory even if the write fails.
    pub fn update<F>(&self, mutate: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut state = self.lock();
        self.sync_from_disk(&mut state);
        let mut candidate = state.config.clone();
        mutate(&mut candidate);
        candidate.validate().map_err(ConfigError::Invalid)?;
        state.config = candidate.clone();
        let saved = self.persist(&state.config);
        state.unsaved = saved.is_err();
        saved.map(|()| candidate)
    }

    fn persist(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let data = serde_json::to_string_pretty(config)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        write_atomic(&self.path, &self.backup_path(), &data).map_err(|source| {
            log::error!("Failed to save config: {source}");
            ConfigError::Write {
                path: self.path.clone(),
                source,
            }
        })?;
        log::debug!("Configuration saved to {}", self.path.display());
        Ok(())
    }
}

/// `Ok(None)` when the file does not exist.
fn read_config(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
    let corrupt = |reason: String| ConfigError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(corrupt(e.to_string())),
    };

    let config: AppConfig = serde_json::from_str(&data).map_err(|e| corrupt(e.to_string()))?;
    config.validate().map_err(corrupt)?;
    Ok(Some(config))
}

/// Write through a temp file in the same directory and rename it into place,
/// keeping the last good file as a backup.
fn write_atomic(path: &Path, backup: &Path, data: &str) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    if matches!(read_config(path), Ok(Some(_))) {
        fs::copy(path, backup)?;
    }

    let temp = sibling(path, "tmp");
    let written = File::create(&temp).and_then(|mut file| {
        file.write_all(data.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&temp, path)) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}

/// `config.json` -> `config.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("config.json"))
    }

    fn sample_config(dir: &TempDir) -> AppConfig {
        let downloads = dir.path().join("Downloads");
        fs::create_dir_all(&downloads).unwrap();
        AppConfig {
            threshold_bytes: 5 * crate::GIB,
            interval_seconds: 30,
            targets: vec![
                CleanupTarget::path(&downloads, None),
                CleanupTarget::trash(),
            ],
            first_run_complete: true,
            notified_volumes: vec!["/".to_string()],
            last_cleanup: Some("2026-01-01T00:00:00+00:00".to_string()),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.threshold_bytes, 10 * crate::GIB);
        assert_eq!(config.interval_seconds, 60);
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert!(config.targets.is_empty());
        assert!(!config.first_run_complete);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_then_load_in_fresh_store() {
        let dir = TempDir::new().unwrap();
        let config = sample_config(&dir);

        store_in(&dir).save(&config).unwrap();
        let loaded = store_in(&dir).load().unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = store_in(&dir).load().unwrap();
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn test_missing_fields_filled_and_unknown_fields_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"{"threshold_bytes": 2048, "theme": "dark", "targets": [{"location": "trash"}]}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.threshold_bytes, 2048);
        assert_eq!(loaded.interval_seconds, DEFAULT_INTERVAL_SECONDS);
        assert_eq!(loaded.targets.len(), 1);
        assert!(loaded.targets[0].location.is_trash());
        assert!(loaded.targets[0].enabled);
    }

    #[test]
    fn test_unparsable_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(store.load(), Err(ConfigError::Corrupt { .. })));
    }

    #[test]
    fn test_schema_violation_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), r#"{"interval_seconds": 0}"#).unwrap();
        assert!(matches!(store.load(), Err(ConfigError::Corrupt { .. })));

        fs::write(store.path(), r#"{"targets": [{"label": "no location"}]}"#).unwrap();
        assert!(matches!(store.load(), Err(ConfigError::Corrupt { .. })));
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let dir = TempDir::new().unwrap();
        let target_dir = dir.path().join("stuff");
        fs::create_dir_all(&target_dir).unwrap();

        let mut config = AppConfig::default();
        config.targets = vec![
            CleanupTarget::path(&target_dir, None),
            CleanupTarget::path(target_dir.join("."), Some("again")),
        ];
        assert!(config.validate().is_err());

        let store = store_in(&dir);
        assert!(matches!(store.save(&config), Err(ConfigError::Invalid(_))));
        assert!(!store.path().exists());

        config.targets = vec![CleanupTarget::trash(), CleanupTarget::trash()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lexical_duplicates_of_missing_paths() {
        let mut config = AppConfig::default();
        config.targets = vec![
            CleanupTarget::path("/no/such/place/a", None),
            CleanupTarget::path("/no/such/place/b/../a", None),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_leaves_no_temp_file_and_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut config = sample_config(&dir);

        store.save(&config).unwrap();
        config.interval_seconds = 90;
        store.save(&config).unwrap();

        assert!(!sibling(store.path(), "tmp").exists());
        let backup: AppConfig =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup.interval_seconds, 30);
    }

    #[test]
    fn test_load_or_default_uses_backup_then_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let config = sample_config(&dir);
        store.save(&config).unwrap();
        store.save(&config).unwrap();

        fs::write(store.path(), "garbage").unwrap();
        let outcome = store_in(&dir).load_or_default();
        assert_eq!(outcome.source, ConfigSource::Backup);
        assert_eq!(outcome.config, config);
        assert!(matches!(outcome.warning, Some(ConfigError::Corrupt { .. })));

        fs::write(store.backup_path(), "garbage").unwrap();
        let outcome = store_in(&dir).load_or_default();
        assert_eq!(outcome.source, ConfigSource::Defaults);
        assert_eq!(outcome.config, AppConfig::default());
        assert!(outcome.warning.is_some());
    }

    #[test]
    fn test_update_keeps_memory_state_when_write_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let store = ConfigStore::new(blocker.join("config.json"));

        let result = store.update(|c| c.threshold_bytes = 42);
        assert!(matches!(result, Err(ConfigError::Write { .. })));
        assert_eq!(store.snapshot().threshold_bytes, 42);
    }

    #[test]
    fn test_update_starts_from_changes_made_by_another_store() {
        let dir = TempDir::new().unwrap();
        let config = sample_config(&dir);
        store_in(&dir).save(&config).unwrap();

        // Two processes on the same file, both loaded before either writes.
        let settings = store_in(&dir);
        let monitor = store_in(&dir);
        settings.load().unwrap();
        monitor.load().unwrap();

        settings
            .update(|c| c.threshold_bytes = 20 * crate::GIB)
            .unwrap();
        let updated = monitor
            .update(|c| c.notified_volumes.push("/data".to_string()))
            .unwrap();

        assert_eq!(updated.threshold_bytes, 20 * crate::GIB);
        let on_disk = store_in(&dir).load().unwrap();
        assert_eq!(on_disk.threshold_bytes, 20 * crate::GIB);
        assert_eq!(on_disk.notified_volumes, vec!["/", "/data"]);
    }

    #[test]
    fn test_refresh_picks_up_external_writes_but_not_corruption() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&sample_config(&dir)).unwrap();

        store_in(&dir)
            .update(|c| c.interval_seconds = 300)
            .unwrap();
        assert_eq!(store.snapshot().interval_seconds, 30);
        assert_eq!(store.refresh().interval_seconds, 300);

        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.refresh().interval_seconds, 300);
        fs::remove_file(store.path()).unwrap();
        assert_eq!(store.refresh().interval_seconds, 300);
    }

    #[test]
    fn test_update_rejects_invalid_without_changing_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let result = store.update(|c| c.threshold_bytes = 0);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert_eq!(store.snapshot().threshold_bytes, DEFAULT_THRESHOLD_BYTES);
    }

    #[test]
    fn test_target_location_parse_and_display() {
        assert_eq!(TargetLocation::parse("TRASH"), TargetLocation::Trash);
        let loc = TargetLocation::parse("/tmp/x");
        assert_eq!(loc.as_path(), Some(Path::new("/tmp/x")));
        assert_eq!(TargetLocation::Trash.to_string(), "trash");
    }

    #[test]
    fn test_enabled_targets_preserve_order() {
        let mut config = AppConfig::default();
        let mut disabled = CleanupTarget::path("/b", None);
        disabled.enabled = false;
        config.targets = vec![
            CleanupTarget::path("/a", None),
            disabled,
            CleanupTarget::trash(),
        ];
        let enabled = config.enabled_targets();
        assert_eq!(enabled.len(), 2);
        assert_eq!(enabled[0].label, "a");
        assert!(enabled[1].location.is_trash());
    }
}
