//! Diagnostic events reported to the host.

#![allow(missing_docs)]

use std::time::Duration;

use smol_str::SmolStr;
use tracing::{debug, error, info, warn};

use crate::error::{QueryError, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Retrying { error: QueryError, delay: Duration },
    Exhausted { error: QueryError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// One request attempt against the controller finished.
    QueryAttempt {
        target: SmolStr,
        path: SmolStr,
        attempt: u32,
        max_attempts: u32,
        outcome: AttemptOutcome,
    },
    /// Status poll saw no restart; nothing else was fetched.
    RefreshSkipped { controller: SmolStr, startup_ts: i64 },
    RefreshPublished {
        controller: SmolStr,
        draft: bool,
        version: u64,
    },
    RefreshFailed {
        controller: SmolStr,
        draft: bool,
        error: SyncError,
    },
}

/// Host status/diagnostic channel.
pub trait StatusSink: Send + Sync {
    fn report(&self, event: &StatusEvent);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn report(&self, event: &StatusEvent) {
        match event {
            StatusEvent::QueryAttempt {
                target,
                path,
                attempt,
                max_attempts,
                outcome,
            } => match outcome {
                AttemptOutcome::Succeeded => {
                    debug!(%target, %path, attempt, max_attempts, "controller query ok");
                }
                AttemptOutcome::Retrying { error, delay } => {
                    warn!(
                        %target,
                        %path,
                        attempt,
                        max_attempts,
                        kind = error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "controller query failed, retrying: {error}"
                    );
                }
                AttemptOutcome::Exhausted { error } => {
                    error!(
                        %target,
                        %path,
                        attempt,
                        max_attempts,
                        kind = error.kind(),
                        "controller query failed: {error}"
                    );
                }
            },
            StatusEvent::RefreshSkipped {
                controller,
                startup_ts,
            } => {
                debug!(%controller, startup_ts, "controller not restarted, refresh skipped");
            }
            StatusEvent::RefreshPublished {
                controller,
                draft,
                version,
            } => {
                info!(%controller, draft, version, "controller snapshot published");
            }
            StatusEvent::RefreshFailed {
                controller,
                draft,
                error,
            } => {
                error!(%controller, draft, "controller refresh failed: {error}");
            }
        }
    }
}
