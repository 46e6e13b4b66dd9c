//! Join of the concurrent table fetches followed by the ordered derive stages.

#![allow(missing_docs)]

use std::thread;

use smol_str::SmolStr;

use crate::client::{QueryClient, RetryPolicy};
use crate::derive::{filter_services, writable_services};
use crate::merge::merge_channels;
use crate::model::{LiveStates, RegisterDescriptor, RegisterTable, RegisterTables, ServiceCatalog};
use crate::related::{format_topics, resolve_related, StreamNodeRegistration};
use crate::snapshot::DerivedState;
use crate::tables::{
    fetch_live_states, fetch_register_table, fetch_services, table_path, FetchTarget,
    LiveStatePublish, ALLSTATES_PATH, SERVICES_PATH,
};

/// Results of the fan-out; `None` marks a fetch that resolved to its
/// failure sentinel.
#[derive(Debug, Default)]
pub struct RawFetch {
    pub services: Option<ServiceCatalog>,
    pub live_states: Option<LiveStates>,
    pub tables: [Option<Vec<RegisterDescriptor>>; 4],
}

/// Every endpoint of a refresh, all fetched successfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSnapshot {
    pub services: ServiceCatalog,
    pub live_states: LiveStates,
    pub tables: RegisterTables,
}

impl RawFetch {
    /// All-or-nothing: either every fetch succeeded, or the failed endpoint
    /// paths are returned.
    pub fn complete(self) -> Result<RawSnapshot, Vec<SmolStr>> {
        let mut failed = Vec::new();
        if self.services.is_none() {
            failed.push(SmolStr::new(SERVICES_PATH));
        }
        if self.live_states.is_none() {
            failed.push(SmolStr::new(ALLSTATES_PATH));
        }
        for (table, rows) in RegisterTable::ALL.iter().zip(&self.tables) {
            if rows.is_none() {
                failed.push(SmolStr::new(table_path(*table)));
            }
        }
        if !failed.is_empty() {
            return Err(failed);
        }

        let mut tables = RegisterTables::default();
        for (table, rows) in RegisterTable::ALL.into_iter().zip(self.tables) {
            tables.set(table, rows.unwrap_or_default());
        }
        Ok(RawSnapshot {
            services: self.services.unwrap_or_default(),
            live_states: self.live_states.unwrap_or_default(),
            tables,
        })
    }
}

/// Fetch services, live states and the four register tables concurrently
/// and wait for all of them.
pub fn fetch_all(
    client: &QueryClient,
    target: &FetchTarget,
    policy: &RetryPolicy,
    publish: Option<LiveStatePublish<'_>>,
) -> RawFetch {
    thread::scope(|scope| {
        let services = thread::Builder::new()
            .name("fusebox-fetch-services".into())
            .spawn_scoped(scope, || fetch_services(client, target, policy));
        let live_states = thread::Builder::new()
            .name("fusebox-fetch-allstates".into())
            .spawn_scoped(scope, || fetch_live_states(client, target, policy, publish));
        let tables = RegisterTable::ALL.map(|table| {
            thread::Builder::new()
                .name(format!("fusebox-fetch-{}", table.name()))
                .spawn_scoped(scope, move || {
                    fetch_register_table(client, target, table, policy)
                })
        });

        // A task that could not be spawned or panicked counts as failed.
        RawFetch {
            services: services.ok().and_then(|task| task.join().ok()).flatten(),
            live_states: live_states.ok().and_then(|task| task.join().ok()).flatten(),
            tables: tables.map(|task| task.ok().and_then(|task| task.join().ok()).flatten()),
        }
    })
}

/// Merge, then derive indices, then resolve related nodes. Each stage reads
/// the previous stage's output, so the order is fixed.
#[must_use]
pub fn derive_state(
    raw: &RawSnapshot,
    controller: &str,
    registrations: &[StreamNodeRegistration],
) -> DerivedState {
    let channels = merge_channels(&raw.tables);
    let filtered_services = filter_services(&raw.services, &raw.live_states);
    let writable_services = writable_services(&channels);
    let related_nodes = resolve_related(controller, registrations);
    let formatted_topics = format_topics(&related_nodes, &filtered_services, &channels);
    DerivedState {
        channels,
        filtered_services,
        writable_services,
        related_nodes,
        formatted_topics,
    }
}
