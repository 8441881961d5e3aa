use chrono::Utc;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::autostart::{system_autostart, AutoStart};
use crate::cleaner::{CleanupEngine, CleanupResult, Trash};
use crate::config::{
    AppConfig, CleanupTarget, ConfigError, ConfigStore, LoadOutcome, TargetLocation,
};
use crate::detector::{DirectoryDetector, LocationProvider};
use crate::events::Subscribers;
use crate::monitor::{
    LowSpaceEvent, MonitorHandle, StorageMonitor, VolumeProbe, VolumeState, DEFAULT_PROBE_TIMEOUT,
};
use crate::notify::{LogNotifier, Notifier};
use crate::platform::{SystemTrash, SystemVolumes};
use crate::scanner::{FolderInfo, FolderScanner};
use crate::worker::{CleanupWorker, ProgressEvent, WorkerError, WorkerHandle};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("target already configured: {0}")]
    DuplicateTarget(TargetLocation),

    #[error("target not configured: {0}")]
    UnknownTarget(TargetLocation),

    #[error("directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to start storage monitor: {0}")]
    Monitor(#[source] io::Error),

    #[error("failed to update auto-start registration: {0}")]
    AutoStart(#[source] io::Error),
}

/// The outside world the core talks to.
pub struct Collaborators {
    pub trash: Arc<dyn Trash>,
    pub volumes: Arc<dyn VolumeProbe>,
    pub notifier: Arc<dyn Notifier>,
    pub autostart: Arc<dyn AutoStart>,
}

impl Collaborators {
    /// Adapters for the running platform.
    pub fn system() -> Self {
        Self {
            trash: Arc::new(SystemTrash),
            volumes: Arc::new(SystemVolumes),
            notifier: Arc::new(LogNotifier),
            autostart: Arc::from(system_autostart()),
        }
    }
}

/// Process-facing API used by the shell (tray, window, CLI).
pub struct CleanBox {
    config: Arc<ConfigStore>,
    worker: CleanupWorker,
    volumes: Arc<dyn VolumeProbe>,
    notifier: Arc<dyn Notifier>,
    autostart: Arc<dyn AutoStart>,
    low_space: Subscribers<LowSpaceEvent>,
    progress: Subscribers<ProgressEvent>,
    finished: Subscribers<CleanupResult>,
    monitor: Mutex<Option<MonitorHandle>>,
    probe_timeout: Duration,
}

impl CleanBox {
    pub fn new(config: Arc<ConfigStore>, collaborators: Collaborators) -> Self {
        let engine = Arc::new(CleanupEngine::new(collaborators.trash));
        Self {
            config,
            worker: CleanupWorker::new(engine),
            volumes: collaborators.volumes,
            notifier: collaborators.notifier,
            autostart: collaborators.autostart,
            low_space: Subscribers::new(),
            progress: Subscribers::new(),
            finished: Subscribers::new(),
            monitor: Mutex::new(None),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Load config for a read-only session. Nothing is written and
    /// auto-start is left alone. Returns the load warning, if any.
    pub fn load(&self) -> Option<ConfigError> {
        self.load_outcome().warning
    }

    fn load_outcome(&self) -> LoadOutcome {
        let outcome = self.config.load_or_default();
        if let Some(warning) = &outcome.warning {
            log::warn!("Using {:?} configuration: {warning}", outcome.source);
        }
        outcome
    }

    /// Startup sequence: load config (falling back rather than failing),
    /// seed default targets on first run, and apply the auto-start
    /// preference. Returns the load warning, if any, for the shell to show.
    pub fn initialize<P: LocationProvider>(
        &self,
        detector: &DirectoryDetector<P>,
    ) -> Option<ConfigError> {
        let outcome = self.load_outcome();

        if !outcome.config.first_run_complete {
            log::info!("First run detected, setting up defaults");
            let defaults = detector.detect_defaults();
            let seeded = self.config.update(|config| {
                for target in defaults {
                    if !config.contains_target(&target.location) {
                        config.targets.push(target);
                    }
                }
                config.first_run_complete = true;
            });
            match seeded {
                Ok(_) => log::info!("First run setup complete"),
                Err(e) => log::error!("Failed to persist first-run defaults: {e}"),
            }
        }

        if self.config.refresh().auto_start_enabled && !self.autostart.is_enabled() {
            if let Err(e) = self.autostart.enable() {
                log::error!("Failed to enable auto-start: {e}");
            }
        }

        outcome.warning
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.refresh()
    }

    /// Replace the whole target list (new order included).
    pub fn update_targets(&self, targets: Vec<CleanupTarget>) -> Result<AppConfig, ServiceError> {
        Ok(self.config.update(|config| config.targets = targets)?)
    }

    pub fn add_target(
        &self,
        location: TargetLocation,
        label: Option<&str>,
    ) -> Result<AppConfig, ServiceError> {
        if let TargetLocation::Path(path) = &location {
            if !path.is_dir() {
                return Err(ServiceError::MissingDirectory(path.clone()));
            }
        }
        if self.config.refresh().contains_target(&location) {
            return Err(ServiceError::DuplicateTarget(location));
        }

        let target = match location {
            TargetLocation::Path(path) => CleanupTarget::path(path, label),
            TargetLocation::Trash => {
                let mut trash = CleanupTarget::trash();
                if let Some(label) = label {
                    trash.label = label.to_string();
                }
                trash
            }
        };
        log::info!("Adding cleanup target {}", target.location);
        Ok(self.config.update(|config| config.targets.push(target))?)
    }

    pub fn remove_target(&self, location: &TargetLocation) -> Result<AppConfig, ServiceError> {
        if !self.config.refresh().contains_target(location) {
            return Err(ServiceError::UnknownTarget(location.clone()));
        }
        let identity = location.identity();
        log::info!("Removing cleanup target {location}");
        Ok(self
            .config
            .update(|config| config.targets.retain(|t| t.location.identity() != identity))?)
    }

    pub fn set_target_enabled(
        &self,
        location: &TargetLocation,
        enabled: bool,
    ) -> Result<AppConfig, ServiceError> {
        if !self.config.refresh().contains_target(location) {
            return Err(ServiceError::UnknownTarget(location.clone()));
        }
        let identity = location.identity();
        Ok(self.config.update(|config| {
            for target in &mut config.targets {
                if target.location.identity() == identity {
                    target.enabled = enabled;
                }
            }
        })?)
    }

    /// Takes effect on the monitor's next pass, including a monitor running
    /// in another process on the same config file.
    pub fn set_threshold_bytes(&self, threshold_bytes: u64) -> Result<AppConfig, ServiceError> {
        Ok(self
            .config
            .update(|config| config.threshold_bytes = threshold_bytes)?)
    }

    /// Takes effect after the monitor's current wait.
    pub fn set_interval_seconds(&self, interval_seconds: u64) -> Result<AppConfig, ServiceError> {
        Ok(self
            .config
            .update(|config| config.interval_seconds = interval_seconds)?)
    }

    /// Persist the preference, then register or unregister.
    pub fn set_auto_start(&self, enabled: bool) -> Result<(), ServiceError> {
        self.config
            .update(|config| config.auto_start_enabled = enabled)?;
        let applied = if enabled {
            self.autostart.enable()
        } else {
            self.autostart.disable()
        };
        applied.map_err(ServiceError::AutoStart)
    }

    pub fn is_auto_start_registered(&self) -> bool {
        self.autostart.is_enabled()
    }

    /// Clean every enabled target in the background. Progress and the final
    /// result go to the subscribers; the handle allows cancellation.
    pub fn run_cleanup_now(&self) -> Result<WorkerHandle, ServiceError> {
        let targets = self.config.refresh().enabled_targets();
        if targets.is_empty() {
            log::info!("No directories to clean");
        }

        let progress = self.progress.clone();
        let finished = self.finished.clone();
        let notifier = self.notifier.clone();
        let config = self.config.clone();

        let handle = self.worker.start(
            targets,
            move |event| progress.emit(&event),
            move |result| {
                if let Err(e) =
                    config.update(|c| c.last_cleanup = Some(Utc::now().to_rfc3339()))
                {
                    log::error!("Failed to record last cleanup time: {e}");
                }
                notifier.notify_cleanup_result(&result);
                finished.emit(&result);
            },
        )?;
        Ok(handle)
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn subscribe_low_space<F>(&self, callback: F)
    where
        F: Fn(&LowSpaceEvent) + Send + Sync + 'static,
    {
        self.low_space.subscribe(callback);
    }

    pub fn subscribe_cleanup_progress<F>(&self, callback: F)
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.progress.subscribe(callback);
    }

    pub fn subscribe_cleanup_finished<F>(&self, callback: F)
    where
        F: Fn(&CleanupResult) + Send + Sync + 'static,
    {
        self.finished.subscribe(callback);
    }

    fn build_monitor(&self) -> StorageMonitor {
        StorageMonitor::new(
            self.volumes.clone(),
            self.config.clone(),
            self.notifier.clone(),
        )
        .with_probe_timeout(self.probe_timeout)
        .with_listeners(self.low_space.clone())
    }

    /// Start the storage monitor loop. Calling it again while running is a
    /// no-op.
    pub fn start_monitor(&self) -> Result<(), ServiceError> {
        let mut slot = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(MonitorHandle::is_running) {
            return Ok(());
        }
        *slot = Some(self.build_monitor().start().map_err(ServiceError::Monitor)?);
        Ok(())
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(MonitorHandle::is_running)
    }

    /// Current volume readings: the running monitor's view when it has one,
    /// otherwise a fresh probe.
    pub fn volumes(&self) -> Vec<VolumeState> {
        if let Some(handle) = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let states = handle.states();
            if !states.is_empty() {
                return states;
            }
        }

        let notified = self.config.refresh().notified_volumes;
        self.build_monitor()
            .sample_now()
            .into_iter()
            .filter_map(|(volume, sample)| match sample {
                Ok(sample) => Some(VolumeState {
                    suppressed: notified.contains(&volume),
                    volume,
                    free_bytes: sample.free_bytes,
                    total_bytes: sample.total_bytes,
                }),
                Err(e) => {
                    log::warn!("Cannot access volume {volume}: {e}");
                    None
                }
            })
            .collect()
    }

    /// Size preview of a directory target; `None` for the trash.
    pub fn preview(&self, location: &TargetLocation, max_depth: usize) -> Option<FolderInfo> {
        location
            .as_path()
            .and_then(|path| FolderScanner::new().scan(path, max_depth))
    }

    /// Stop the monitor with a bounded wait. A running cleanup is left to
    /// finish on its own. Returns false if the monitor had to be detached.
    pub fn shutdown(&self) -> bool {
        log::info!("Cleaning up resources...");
        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        handle.map_or(true, MonitorHandle::stop)
    }
}
