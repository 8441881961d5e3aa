use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use thiserror::Error;

use crate::cleaner::{CleanupEngine, CleanupResult};
use crate::config::CleanupTarget;

/// `(completed, total)` snapshot, emitted before each target starts and once
/// more when the run finishes uncancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
}

impl ProgressEvent {
    pub fn is_final(&self) -> bool {
        self.completed == self.total
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("a cleanup run is already in progress")]
    Busy,

    #[error("failed to start cleanup thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Runs [`CleanupEngine`] on a background thread, one run at a time across
/// every worker built with [`CleanupWorker::new`] in this process.
#[derive(Clone)]
pub struct CleanupWorker {
    engine: Arc<CleanupEngine>,
    active: Arc<AtomicBool>,
}

/// Clears the busy flag however the run ends, unwinding included.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Busy flag shared by all default workers.
fn process_flag() -> Arc<AtomicBool> {
    static ACTIVE: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    ACTIVE
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone()
}

impl CleanupWorker {
    pub fn new(engine: Arc<CleanupEngine>) -> Self {
        Self::with_flag(engine, process_flag())
    }

    /// Worker that is exclusive only with others holding the same `active`
    /// flag.
    pub fn with_flag(engine: Arc<CleanupEngine>, active: Arc<AtomicBool>) -> Self {
        Self { engine, active }
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a run in the background. Fails with `Busy` while another run
    /// sharing this worker's flag is still going; the existing run is
    /// unaffected.
    pub fn start<P, C>(
        &self,
        targets: Vec<CleanupTarget>,
        mut on_progress: P,
        on_complete: C,
    ) -> Result<WorkerHandle, WorkerError>
    where
        P: FnMut(ProgressEvent) + Send + 'static,
        C: FnOnce(CleanupResult) + Send + 'static,
    {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("Cleanup already in progress");
            return Err(WorkerError::Busy);
        }

        log::info!("Starting cleanup with {} targets", targets.len());
        let guard = ActiveGuard(self.active.clone());
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let engine = self.engine.clone();

        let spawned = thread::Builder::new()
            .name("cleanbox-cleanup".to_string())
            .spawn(move || {
                let total = targets.len();
                let result = engine.run(
                    &targets,
                    &mut |completed, total| on_progress(ProgressEvent { completed, total }),
                    Some(&flag),
                );
                if !result.cancelled {
                    on_progress(ProgressEvent {
                        completed: total,
                        total,
                    });
                }
                drop(guard);
                on_complete(result);
            });

        match spawned {
            Ok(thread) => Ok(WorkerHandle {
                cancel,
                thread: Some(thread),
            }),
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(WorkerError::Spawn(e))
            }
        }
    }

    /// Request cancellation of a run started by this worker.
    pub fn cancel(&self, handle: &WorkerHandle) {
        handle.cancel();
    }
}

/// Handle to a background cleanup run. Dropping it detaches the run.
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Ask the run to stop. The target being cleaned finishes first; the
    /// partial result is still delivered with `cancelled` set.
    pub fn cancel(&self) {
        log::info!("Cleanup cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the run (and its completion callback) to finish.
    pub fn join(mut self) -> thread::Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        }
    }
}
