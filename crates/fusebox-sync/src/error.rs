//! Synchronization errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Failure of a single controller request after classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Connection refused, timeout, or non-success HTTP status.
    #[error("transport error: {0}")]
    Transport(SmolStr),

    /// Response body is not valid JSON.
    #[error("parse error: {0}")]
    Parse(SmolStr),

    /// Controller answered with `{success:false}` or an unusable payload.
    #[error("application error: {0}")]
    Application(SmolStr),
}

impl QueryError {
    /// Stable label for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
            Self::Application(_) => "application",
        }
    }
}

/// Errors surfaced by the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A surfaced request failure (status endpoint).
    #[error("query '{endpoint}' failed: {source}")]
    Query {
        endpoint: SmolStr,
        #[source]
        source: QueryError,
    },

    /// One or more of the concurrent fetches failed; nothing was published.
    #[error("refresh of controller '{controller}' abandoned, failed endpoints: {}", .failed.join(", "))]
    PartialFailure {
        controller: SmolStr,
        failed: Vec<SmolStr>,
    },

    /// No deployed controller with this id.
    #[error("unknown controller '{0}'")]
    UnknownController(SmolStr),

    /// No draft with this id.
    #[error("unknown draft '{0}'")]
    UnknownDraft(SmolStr),

    /// A refresh for the same snapshot is already running.
    #[error("refresh already in progress for '{0}'")]
    RefreshInProgress(SmolStr),

    /// The owning node went away while the refresh was in flight.
    #[error("refresh result for '{0}' discarded")]
    Discarded(SmolStr),

    /// Configuration error.
    #[error("invalid config '{0}'")]
    InvalidConfig(SmolStr),

    /// Malformed admin or controller payload.
    #[error("invalid payload '{0}'")]
    InvalidPayload(SmolStr),

    /// Admin server error.
    #[error("web error '{0}'")]
    Web(SmolStr),

    /// Thread spawn error.
    #[error("thread spawn error '{0}'")]
    ThreadSpawn(SmolStr),
}

impl SyncError {
    pub(crate) fn query(endpoint: impl Into<SmolStr>, source: QueryError) -> Self {
        Self::Query {
            endpoint: endpoint.into(),
            source,
        }
    }
}
