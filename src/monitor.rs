use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigStore;
use crate::events::Subscribers;
use crate::notify::Notifier;
use crate::utils::format_size;

/// How long a single volume probe may take before the sample is skipped.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Free space must exceed the threshold by this much before a warned volume
/// is re-armed: threshold / 10, i.e. re-arm above threshold x 1.1.
pub fn hysteresis_margin(threshold_bytes: u64) -> u64 {
    threshold_bytes / 10
}

/// Enumerates mounted volumes and samples their free space.
pub trait VolumeProbe: Send + Sync {
    fn volumes(&self) -> Result<Vec<String>, ProbeError>;
    fn sample(&self, volume: &str) -> Result<VolumeSample, ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSample {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe of {volume} timed out after {timeout:?}")]
    Timeout { volume: String, timeout: Duration },

    #[error("volume {0} is not available")]
    Unavailable(String),

    #[error("failed to probe {volume}: {reason}")]
    Failed { volume: String, reason: String },

    #[error("previous probe of {volume} is still running")]
    Pending { volume: String },
}

/// Last known reading for one volume. `suppressed` is set while the volume
/// is in the warned state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeState {
    pub volume: String,
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub suppressed: bool,
}

impl VolumeState {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    pub fn usage_percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes() as f32 / self.total_bytes as f32 * 100.0
    }
}

/// Raised once per crossing below the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowSpaceEvent {
    pub volume: String,
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub threshold_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Warn,
    Rearm,
    Stay,
}

/// Normal -> Warned when free < threshold; Warned -> Normal when free >
/// threshold + margin. Nothing else changes state.
fn step(state: &mut VolumeState, sample: VolumeSample, threshold: u64) -> Transition {
    state.free_bytes = sample.free_bytes;
    state.total_bytes = sample.total_bytes;

    if !state.suppressed && sample.free_bytes < threshold {
        state.suppressed = true;
        Transition::Warn
    } else if state.suppressed
        && sample.free_bytes > threshold.saturating_add(hysteresis_margin(threshold))
    {
        state.suppressed = false;
        Transition::Rearm
    } else {
        Transition::Stay
    }
}

type VolumeTable = Arc<Mutex<BTreeMap<String, VolumeState>>>;

/// Volumes (and the listing call) whose helper thread has not returned.
type InFlight = Arc<Mutex<HashSet<String>>>;

/// Held by a helper thread; clears its entry when the call returns.
struct InFlightGuard {
    in_flight: InFlight,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Periodic free-space watcher with per-volume warn/re-arm state.
pub struct StorageMonitor {
    probe: Arc<dyn VolumeProbe>,
    config: Arc<ConfigStore>,
    notifier: Arc<dyn Notifier>,
    listeners: Subscribers<LowSpaceEvent>,
    volumes: VolumeTable,
    in_flight: InFlight,
    probe_timeout: Duration,
}

impl StorageMonitor {
    pub fn new(
        probe: Arc<dyn VolumeProbe>,
        config: Arc<ConfigStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            probe,
            config,
            notifier,
            listeners: Subscribers::new(),
            volumes: Arc::new(Mutex::new(BTreeMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Share a listener registry with the caller instead of the private one.
    pub fn with_listeners(mut self, listeners: Subscribers<LowSpaceEvent>) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn listeners(&self) -> &Subscribers<LowSpaceEvent> {
        &self.listeners
    }

    /// Latest state of every volume seen so far.
    pub fn states(&self) -> Vec<VolumeState> {
        snapshot(&self.volumes)
    }

    /// Probe every volume once, outside the polling loop.
    pub fn sample_now(&self) -> Vec<(String, Result<VolumeSample, ProbeError>)> {
        let volumes = match self.list_volumes() {
            Ok(volumes) => volumes,
            Err(e) => {
                log::error!("Failed to enumerate volumes: {e}");
                return Vec::new();
            }
        };
        volumes
            .into_iter()
            .map(|volume| {
                let sample = self.sample_volume(&volume);
                (volume, sample)
            })
            .collect()
    }

    /// One polling pass. Returns the low-space events raised by this pass;
    /// they have already been delivered to the notifier and listeners.
    pub fn tick(&mut self) -> Vec<LowSpaceEvent> {
        let config = self.config.refresh();
        let threshold = config.threshold_bytes;

        let volumes = match self.list_volumes() {
            Ok(volumes) => volumes,
            Err(e) => {
                let known: Vec<String> = self
                    .volumes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .keys()
                    .cloned()
                    .collect();
                log::warn!(
                    "Failed to enumerate volumes, re-checking {} known: {e}",
                    known.len()
                );
                known
            }
        };

        let samples: Vec<(String, VolumeSample)> = volumes
            .iter()
            .filter_map(|volume| match self.sample_volume(volume) {
                Ok(sample) => Some((volume.clone(), sample)),
                Err(e) => {
                    log::warn!("Skipping {volume} this tick: {e}");
                    None
                }
            })
            .collect();

        let mut events = Vec::new();
        let mut rearmed = Vec::new();
        {
            let mut table = self.volumes.lock().unwrap_or_else(PoisonError::into_inner);
            table.retain(|volume, _| volumes.contains(volume));

            for (volume, sample) in samples {
                log::debug!(
                    "Volume {volume}: {} free / {} total",
                    format_size(sample.free_bytes),
                    format_size(sample.total_bytes)
                );

                let state = table.entry(volume.clone()).or_insert_with(|| VolumeState {
                    volume: volume.clone(),
                    free_bytes: sample.free_bytes,
                    total_bytes: sample.total_bytes,
                    suppressed: config.notified_volumes.contains(&volume),
                });

                match step(state, sample, threshold) {
                    Transition::Warn => {
                        log::warn!(
                            "Low space detected on {volume}: {} free",
                            format_size(sample.free_bytes)
                        );
                        events.push(LowSpaceEvent {
                            volume,
                            free_bytes: sample.free_bytes,
                            total_bytes: sample.total_bytes,
                            threshold_bytes: threshold,
                        });
                    }
                    Transition::Rearm => {
                        log::info!(
                            "Volume {volume} now has sufficient space: {}",
                            format_size(sample.free_bytes)
                        );
                        rearmed.push(volume);
                    }
                    Transition::Stay => {}
                }
            }
        }

        self.remember_warned(&events, &rearmed);

        for event in &events {
            self.notifier.notify_low_space(&event.volume, event.free_bytes);
            self.listeners.emit(event);
        }
        events
    }

    /// Persist the warned set so a restart does not repeat notifications.
    fn remember_warned(&self, warned: &[LowSpaceEvent], rearmed: &[String]) {
        if warned.is_empty() && rearmed.is_empty() {
            return;
        }
        let result = self.config.update(|config| {
            for event in warned {
                if !config.notified_volumes.contains(&event.volume) {
                    config.notified_volumes.push(event.volume.clone());
                }
            }
            config.notified_volumes.retain(|v| !rearmed.contains(v));
        });
        if let Err(e) = result {
            log::error!("Failed to record notified volumes: {e}");
        }
    }

    fn list_volumes(&self) -> Result<Vec<String>, ProbeError> {
        let probe = self.probe.clone();
        self.exclusive("volume list", move || probe.volumes())
    }

    fn sample_volume(&self, volume: &str) -> Result<VolumeSample, ProbeError> {
        let probe = self.probe.clone();
        let name = volume.to_string();
        self.exclusive(volume, move || probe.sample(&name))
    }

    /// At most one helper thread per key. While an abandoned call is still
    /// stuck, later passes get `Pending` instead of stacking up threads.
    fn exclusive<T, F>(&self, key: &str, job: F) -> Result<T, ProbeError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
    {
        let guard = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(key.to_string()) {
                return Err(ProbeError::Pending {
                    volume: key.to_string(),
                });
            }
            InFlightGuard {
                in_flight: self.in_flight.clone(),
                key: key.to_string(),
            }
        };
        with_timeout(self.probe_timeout, key, move || {
            let _guard = guard;
            job()
        })
    }

    /// Run the polling loop on its own thread: one pass immediately, then a
    /// fixed delay of `interval_seconds` (re-read every pass) between passes.
    pub fn start(mut self) -> io::Result<MonitorHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let volumes = self.volumes.clone();
        let grace = self.probe_timeout + Duration::from_secs(1);

        let config = self.config.refresh();
        log::info!(
            "Starting storage monitor (threshold: {}, interval: {}s)",
            format_size(config.threshold_bytes),
            config.interval_seconds
        );

        let thread = thread::Builder::new()
            .name("cleanbox-monitor".to_string())
            .spawn(move || {
                loop {
                    self.tick();
                    let interval = Duration::from_secs(self.config.snapshot().interval_seconds);
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("Storage monitor stopped");
                let _ = done_tx.send(());
            })?;

        Ok(MonitorHandle {
            stop_tx: Some(stop_tx),
            done_rx,
            thread: Some(thread),
            volumes,
            grace,
        })
    }
}

fn snapshot(volumes: &VolumeTable) -> Vec<VolumeState> {
    volumes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .cloned()
        .collect()
}

/// Run a probe on a helper thread so a hung filesystem cannot stall the
/// loop. On timeout the helper is abandoned and finishes on its own; if the
/// thread cannot be spawned, `job` is dropped unrun.
fn with_timeout<T, F>(timeout: Duration, volume: &str, job: F) -> Result<T, ProbeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("cleanbox-probe".to_string())
        .spawn(move || {
            let _ = tx.send(job());
        })
        .map_err(|e| ProbeError::Failed {
            volume: volume.to_string(),
            reason: e.to_string(),
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ProbeError::Timeout {
            volume: volume.to_string(),
            timeout,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(ProbeError::Failed {
            volume: volume.to_string(),
            reason: "probe thread panicked".to_string(),
        }),
    }
}

/// Owner of a running monitor loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct MonitorHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    done_rx: mpsc::Receiver<()>,
    thread: Option<JoinHandle<()>>,
    volumes: VolumeTable,
    grace: Duration,
}

impl MonitorHandle {
    pub fn states(&self) -> Vec<VolumeState> {
        snapshot(&self.volumes)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop, waiting at most one probe timeout plus a second.
    /// Returns false if the loop had to be detached.
    pub fn stop(mut self) -> bool {
        self.shutdown()
    }

    fn shutdown(&mut self) -> bool {
        let Some(stop_tx) = self.stop_tx.take() else {
            return true;
        };
        log::info!("Stopping storage monitor");
        let _ = stop_tx.send(());

        match self.done_rx.recv_timeout(self.grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Storage monitor did not stop within {:?}, detaching",
                    self.grace
                );
                self.thread.take();
                false
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
