//! Background synchronization thread.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use tandem_common::TandemResult;

use crate::synchronizer::Synchronizer;

/// Runs [`Synchronizer::run_once`] every poll interval until shut down.
pub struct SyncWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Starts the worker thread.
    pub fn spawn(sync: Arc<Synchronizer>) -> TandemResult<Self> {
        let interval = sync.config().poll_interval();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("tandem-sync".to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "Sync worker started");
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => match sync.run_once() {
                            Ok(round) if round.published > 0 => debug!(
                                groups = round.published,
                                rows = round.rows,
                                watermark = %round.watermark,
                                "Sync round published"
                            ),
                            Ok(_) => {}
                            Err(err) if sync.is_halted() => {
                                error!(error = %err, "Sync worker stopping");
                                break;
                            }
                            Err(err) => warn!(error = %err, "Sync round failed"),
                        },
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Sync worker stopped");
            })?;
        Ok(Self {
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    /// Returns true while the thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stops the thread and waits for it to exit.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Sync worker panicked");
            }
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
