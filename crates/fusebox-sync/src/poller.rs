//! Background timer for one deployed controller.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use smol_str::SmolStr;
use tracing::debug;

use crate::coordinator::SnapshotCoordinator;
use crate::error::SyncError;

/// Owns the poll thread. Stopping (or dropping) the handle ends the loop at
/// its next wait; a refresh already running is left to finish.
#[derive(Debug)]
pub struct PollerHandle {
    stop: Sender<()>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the loop to exit without waiting for it.
    pub fn stop(self) {
        let _ = self.stop.try_send(());
    }

    /// Whether the poll thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Refresh `id` immediately, then once per `interval` until stopped or the
/// coordinator is gone.
pub fn spawn_poller(
    coordinator: Weak<SnapshotCoordinator>,
    id: SmolStr,
    interval: Duration,
) -> Result<PollerHandle, SyncError> {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let join = thread::Builder::new()
        .name(format!("fusebox-poll-{id}"))
        .spawn(move || {
            loop {
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                // Failures were already reported through the status sink. A
                // discarded result means the slot was replaced; keep polling it.
                if let Err(SyncError::UnknownController(_)) = coordinator.refresh_deployed(&id) {
                    break;
                }
                drop(coordinator);
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(controller = %id, "poller exited");
        })
        .map_err(|err| SyncError::ThreadSpawn(err.to_string().into()))?;
    Ok(PollerHandle {
        stop: stop_tx,
        join,
    })
}
