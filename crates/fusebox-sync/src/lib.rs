//! `fusebox-sync` - controller state synchronization engine for Fusebox flow nodes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// HTTP query client with retry ladders.
pub mod client;
/// Configuration file loading.
pub mod config;
/// Process-wide keyed store shared with sibling nodes.
pub mod context;
/// Deployed/draft registries and the refresh sequence.
pub mod coordinator;
/// Filtered and writable service indices.
pub mod derive;
/// Engine errors.
pub mod error;
/// Input/output register merge.
pub mod merge;
/// Controller payload types.
pub mod model;
/// Concurrent fetch join and derive stages.
pub mod pipeline;
/// Per-controller poll threads.
pub mod poller;
/// Related stream nodes and topic labels.
pub mod related;
/// Published controller snapshots.
pub mod snapshot;
/// Diagnostic events.
pub mod status;
/// Raw endpoint fetchers.
pub mod tables;
/// Admin HTTP endpoint.
pub mod web;

pub use client::{ControllerTransport, HttpTransport, QueryClient, RetryPolicy};
pub use config::{FuseboxConfig, StartupCommit, SyncSettings};
pub use context::{MemoryContext, SharedContext};
pub use coordinator::{RefreshOutcome, SnapshotCoordinator};
pub use error::{QueryError, SyncError};
pub use related::{RelatedNodeRegistry, StreamNodeRegistration};
pub use snapshot::{ControllerIdentity, ControllerSnapshot};
pub use status::{StatusEvent, StatusSink, TracingStatusSink};
