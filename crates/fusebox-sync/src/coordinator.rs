//! Per-controller snapshot registries and the refresh sequence.
//!
//! Deployed controllers and editor drafts live in two separate registries.
//! Each entry is a slot holding the currently published
//! `Arc<ControllerSnapshot>`; a refresh builds a complete replacement and
//! swaps it in, so readers never see a half-merged state.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::client::QueryClient;
use crate::config::{StartupCommit, SyncSettings};
use crate::context::{allstates_key, MemoryContext, SharedContext};
use crate::error::SyncError;
use crate::pipeline::{derive_state, fetch_all};
use crate::poller::{spawn_poller, PollerHandle};
use crate::related::RelatedNodeRegistry;
use crate::snapshot::{ControllerIdentity, ControllerSnapshot};
use crate::status::StatusEvent;
use crate::tables::{fetch_status, FetchTarget, LiveStatePublish};

/// Result of one refresh attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No restart since the last publish; only the status was stored.
    Unchanged { startup_ts: i64 },
    Published { version: u64, startup_ts: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registry {
    Deployed,
    Draft,
}

impl Registry {
    fn is_draft(self) -> bool {
        self == Self::Draft
    }

    fn unknown(self, id: &str) -> SyncError {
        match self {
            Self::Deployed => SyncError::UnknownController(id.into()),
            Self::Draft => SyncError::UnknownDraft(id.into()),
        }
    }
}

#[derive(Debug)]
struct SnapshotSlot {
    published: RwLock<Arc<ControllerSnapshot>>,
    /// Held for the whole refresh; a second refresh of the same slot is
    /// rejected instead of queued.
    refresh: Mutex<()>,
}

impl SnapshotSlot {
    fn new(identity: ControllerIdentity) -> Arc<Self> {
        Arc::new(Self {
            published: RwLock::new(Arc::new(ControllerSnapshot::new(identity))),
            refresh: Mutex::new(()),
        })
    }

    fn current(&self) -> Arc<ControllerSnapshot> {
        self.published.read().clone()
    }
}

type Slots = RwLock<IndexMap<SmolStr, Arc<SnapshotSlot>>>;

pub struct SnapshotCoordinator {
    client: QueryClient,
    settings: SyncSettings,
    context: Arc<dyn SharedContext>,
    related: Arc<RelatedNodeRegistry>,
    deployed: Slots,
    drafts: Slots,
    pollers: Mutex<IndexMap<SmolStr, PollerHandle>>,
}

impl fmt::Debug for SnapshotCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCoordinator")
            .field("settings", &self.settings)
            .field("deployed", &self.deployed.read().len())
            .field("drafts", &self.drafts.read().len())
            .field("pollers", &self.pollers.lock().len())
            .finish_non_exhaustive()
    }
}

impl SnapshotCoordinator {
    #[must_use]
    pub fn new(client: QueryClient, settings: SyncSettings) -> Self {
        Self {
            client,
            settings,
            context: Arc::new(MemoryContext::new()),
            related: Arc::new(RelatedNodeRegistry::new()),
            deployed: RwLock::new(IndexMap::new()),
            drafts: RwLock::new(IndexMap::new()),
            pollers: Mutex::new(IndexMap::new()),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Arc<dyn SharedContext>) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_related_registry(mut self, related: Arc<RelatedNodeRegistry>) -> Self {
        self.related = related;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    #[must_use]
    pub fn context(&self) -> &Arc<dyn SharedContext> {
        &self.context
    }

    #[must_use]
    pub fn related_registry(&self) -> &Arc<RelatedNodeRegistry> {
        &self.related
    }

    /// Register (or redeploy) a controller without starting its timer.
    ///
    /// Any earlier snapshot and any draft for the same id are dropped, so
    /// the next refresh fetches everything.
    pub fn register_controller(&self, identity: ControllerIdentity) -> Arc<ControllerSnapshot> {
        debug!(controller = %identity.id, host = %identity.host, "controller registered");
        let id = identity.id.clone();
        let slot = SnapshotSlot::new(identity);
        let current = slot.current();
        self.deployed.write().insert(id.clone(), slot);
        if self.discard_draft(&id) {
            debug!(controller = %id, "draft discarded on redeploy");
        }
        current
    }

    /// Register a controller and start polling it: one refresh right away,
    /// then one per poll interval.
    pub fn start_controller(self: &Arc<Self>, identity: ControllerIdentity) -> Result<(), SyncError> {
        let id = identity.id.clone();
        self.register_controller(identity);
        let mut pollers = self.pollers.lock();
        if let Some(previous) = pollers.shift_remove(&id) {
            previous.stop();
        }
        let handle = spawn_poller(Arc::downgrade(self), id.clone(), self.settings.poll_interval)?;
        info!(
            controller = %id,
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "controller polling started"
        );
        pollers.insert(id, handle);
        Ok(())
    }

    /// Cancel the timer, drop the deployed snapshot and any draft with the
    /// same id. Refreshes still in flight are discarded when they finish.
    pub fn stop_controller(&self, id: &str) -> bool {
        let poller = self.pollers.lock().shift_remove(id);
        let stopped = poller.is_some();
        if let Some(poller) = poller {
            poller.stop();
        }
        let deployed = self.deployed.write().shift_remove(id).is_some();
        let draft = self.discard_draft(id);
        if stopped || deployed || draft {
            info!(controller = %id, "controller stopped");
        }
        stopped || deployed || draft
    }

    pub fn stop_all(&self) {
        let ids: Vec<SmolStr> = self.deployed.read().keys().cloned().collect();
        for id in ids {
            self.stop_controller(&id);
        }
        self.clear_drafts();
    }

    pub fn refresh_deployed(&self, id: &str) -> Result<RefreshOutcome, SyncError> {
        self.refresh(Registry::Deployed, id)
    }

    /// Register (or replace) the draft for `id`. A replaced draft's refresh
    /// in flight is discarded.
    pub fn register_draft(&self, identity: ControllerIdentity) -> Arc<ControllerSnapshot> {
        debug!(controller = %identity.id, host = %identity.host, "draft registered");
        let id = identity.id.clone();
        let slot = SnapshotSlot::new(identity);
        let current = slot.current();
        self.drafts.write().insert(id, slot);
        current
    }

    /// Drafts always fetch everything, regardless of `startup_ts`.
    pub fn refresh_draft(&self, id: &str) -> Result<RefreshOutcome, SyncError> {
        self.refresh(Registry::Draft, id)
    }

    pub fn submit_draft(&self, identity: ControllerIdentity) -> Result<RefreshOutcome, SyncError> {
        let id = identity.id.clone();
        self.register_draft(identity);
        self.refresh_draft(&id)
    }

    pub fn discard_draft(&self, id: &str) -> bool {
        self.drafts.write().shift_remove(id).is_some()
    }

    pub fn clear_drafts(&self) {
        self.drafts.write().clear();
    }

    /// Draft if one exists, else the deployed snapshot.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<Arc<ControllerSnapshot>> {
        self.draft_snapshot(id).or_else(|| self.deployed_snapshot(id))
    }

    #[must_use]
    pub fn deployed_snapshot(&self, id: &str) -> Option<Arc<ControllerSnapshot>> {
        self.deployed.read().get(id).map(|slot| slot.current())
    }

    #[must_use]
    pub fn draft_snapshot(&self, id: &str) -> Option<Arc<ControllerSnapshot>> {
        self.drafts.read().get(id).map(|slot| slot.current())
    }

    #[must_use]
    pub fn deployed_snapshots(&self) -> Vec<Arc<ControllerSnapshot>> {
        self.deployed.read().values().map(|slot| slot.current()).collect()
    }

    #[must_use]
    pub fn is_polling(&self, id: &str) -> bool {
        self.pollers.lock().contains_key(id)
    }

    fn slots(&self, registry: Registry) -> &Slots {
        match registry {
            Registry::Deployed => &self.deployed,
            Registry::Draft => &self.drafts,
        }
    }

    fn refresh(&self, registry: Registry, id: &str) -> Result<RefreshOutcome, SyncError> {
        let slot = self
            .slots(registry)
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| registry.unknown(id))?;
        let Some(_running) = slot.refresh.try_lock() else {
            debug!(controller = %id, draft = registry.is_draft(), "refresh already running");
            return Err(SyncError::RefreshInProgress(id.into()));
        };

        let result = self.run_refresh(registry, &slot);
        let controller = SmolStr::new(id);
        let draft = registry.is_draft();
        let event = match &result {
            Ok(RefreshOutcome::Unchanged { startup_ts }) => StatusEvent::RefreshSkipped {
                controller,
                startup_ts: *startup_ts,
            },
            Ok(RefreshOutcome::Published { version, .. }) => StatusEvent::RefreshPublished {
                controller,
                draft,
                version: *version,
            },
            Err(error) => StatusEvent::RefreshFailed {
                controller,
                draft,
                error: error.clone(),
            },
        };
        self.client.status_sink().report(&event);
        result
    }

    fn run_refresh(
        &self,
        registry: Registry,
        slot: &Arc<SnapshotSlot>,
    ) -> Result<RefreshOutcome, SyncError> {
        let current = slot.current();
        let identity = &current.identity;
        let target = FetchTarget::from(identity);

        let status = fetch_status(&self.client, &target, &self.settings.status_retry)?;
        let startup_ts = status.startup_ts;
        let restarted = startup_ts > current.last_startup_ts;

        let mut next = ControllerSnapshot::clone(&current);
        next.status = Some(status.raw);
        if restarted && self.settings.startup_commit == StartupCommit::Status {
            next.last_startup_ts = startup_ts;
        }
        let current = self.publish(registry, slot, next)?;
        if !restarted && !registry.is_draft() {
            return Ok(RefreshOutcome::Unchanged { startup_ts });
        }

        let key = allstates_key(&current.identity.unique_id);
        let live = (!registry.is_draft()).then(|| LiveStatePublish {
            context: self.context.as_ref(),
            key: &key,
        });
        let controller = current.identity.id.clone();
        let raw = fetch_all(&self.client, &target, &self.settings.table_retry, live)
            .complete()
            .map_err(|failed| SyncError::PartialFailure {
                controller: controller.clone(),
                failed,
            })?;

        let registrations = self.related.for_controller(&controller);
        let derived = derive_state(&raw, &controller, &registrations);

        let mut next = ControllerSnapshot::clone(&current);
        next.version += 1;
        next.services = raw.services;
        next.live_states = raw.live_states;
        next.tables = raw.tables;
        next.derived = derived;
        next.last_startup_ts = startup_ts;
        let published = self.publish(registry, slot, next)?;
        Ok(RefreshOutcome::Published {
            version: published.version,
            startup_ts,
        })
    }

    /// Swap in `snapshot` unless the slot was removed or replaced meanwhile.
    fn publish(
        &self,
        registry: Registry,
        slot: &Arc<SnapshotSlot>,
        snapshot: ControllerSnapshot,
    ) -> Result<Arc<ControllerSnapshot>, SyncError> {
        let slots = self.slots(registry).read();
        let registered = slots
            .get(&snapshot.identity.id)
            .is_some_and(|entry| Arc::ptr_eq(entry, slot));
        if !registered {
            debug!(controller = %snapshot.identity.id, "slot gone, refresh result dropped");
            return Err(SyncError::Discarded(snapshot.identity.id.clone()));
        }
        let snapshot = Arc::new(snapshot);
        *slot.published.write() = Arc::clone(&snapshot);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{OnceLock, Weak};
    use std::time::{Duration, Instant};

    use serde_json::{json, Value};

    use super::*;
    use crate::client::{ControllerTransport, QueryRequest, RetryPolicy};
    use crate::error::QueryError;

    #[derive(Default)]
    struct Replies {
        queues: parking_lot::Mutex<HashMap<String, VecDeque<Value>>>,
    }

    impl Replies {
        fn push(&self, path: &str, value: Value) {
            self.queues
                .lock()
                .entry(path.to_string())
                .or_default()
                .push_back(value);
        }
    }

    impl ControllerTransport for Replies {
        fn send(&self, request: &QueryRequest) -> Result<String, QueryError> {
            let mut queues = self.queues.lock();
            let queue = queues.get_mut(&request.path);
            match queue.and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            }) {
                Some(value) => Ok(value.to_string()),
                None => Err(QueryError::Transport("no reply".into())),
            }
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_secs(3600),
            status_retry: RetryPolicy::none(),
            table_retry: RetryPolicy::none(),
            ..SyncSettings::default()
        }
    }

    fn identity(id: &str) -> ControllerIdentity {
        ControllerIdentity {
            id: id.into(),
            name: id.into(),
            unique_id: "FB-001".into(),
            host: "10.0.0.5".into(),
            udp_port: None,
            http_port: 8080,
        }
    }

    fn healthy(replies: &Replies, startup_ts: i64) {
        replies.push("/program-status?minimal=true", json!({"startup_ts": startup_ts}));
        replies.push("/services.json", json!([{"services": {"ABCW": {"servicename": "Power"}}}]));
        replies.push("/allstates", json!({"fb": {"ABCW": {"v": [1.0], "s": [0], "t": 5}}}));
        for table in ["aicochannels", "aochannels", "dichannels", "dochannels"] {
            replies.push(&format!("/sql2json?table={table}"), json!([]));
        }
    }

    #[test]
    fn refresh_of_unknown_ids_is_rejected() {
        let coordinator =
            SnapshotCoordinator::new(QueryClient::new(Arc::new(Replies::default())), settings());
        assert_eq!(
            coordinator.refresh_deployed("nope"),
            Err(SyncError::UnknownController("nope".into()))
        );
        assert_eq!(
            coordinator.refresh_draft("nope"),
            Err(SyncError::UnknownDraft("nope".into()))
        );
    }

    #[test]
    fn concurrent_refresh_of_one_slot_is_rejected() {
        let coordinator =
            SnapshotCoordinator::new(QueryClient::new(Arc::new(Replies::default())), settings());
        coordinator.register_controller(identity("c1"));
        let slot = coordinator.deployed.read().get("c1").cloned().unwrap();
        let _running = slot.refresh.lock();
        assert_eq!(
            coordinator.refresh_deployed("c1"),
            Err(SyncError::RefreshInProgress("c1".into()))
        );
    }

    #[test]
    fn redeploy_starts_from_empty_snapshot() {
        let replies = Arc::new(Replies::default());
        healthy(&replies, 100);
        let coordinator = SnapshotCoordinator::new(QueryClient::new(replies), settings());
        coordinator.register_controller(identity("c1"));
        coordinator.refresh_deployed("c1").unwrap();
        coordinator.register_draft(identity("c1"));

        let fresh = coordinator.register_controller(identity("c1"));
        assert_eq!(fresh.version, 0);
        assert_eq!(fresh.last_startup_ts, 0);
        assert!(coordinator.draft_snapshot("c1").is_none());
        assert_eq!(
            coordinator.refresh_deployed("c1"),
            Ok(RefreshOutcome::Published {
                version: 1,
                startup_ts: 100
            })
        );
    }

    /// Redeploys `c1` from inside its first status request.
    struct RedeployDuringRefresh {
        replies: Replies,
        coordinator: OnceLock<Weak<SnapshotCoordinator>>,
        redeployed: AtomicBool,
    }

    impl ControllerTransport for RedeployDuringRefresh {
        fn send(&self, request: &QueryRequest) -> Result<String, QueryError> {
            let status = request.path.starts_with("/program-status");
            if status && !self.redeployed.swap(true, Ordering::SeqCst) {
                if let Some(coordinator) = self.coordinator.get().and_then(Weak::upgrade) {
                    coordinator.register_controller(identity("c1"));
                }
            }
            self.replies.send(request)
        }
    }

    #[test]
    fn poller_survives_slot_replaced_mid_refresh() {
        let transport = Arc::new(RedeployDuringRefresh {
            replies: Replies::default(),
            coordinator: OnceLock::new(),
            redeployed: AtomicBool::new(false),
        });
        healthy(&transport.replies, 100);
        let coordinator = Arc::new(SnapshotCoordinator::new(
            QueryClient::new(transport.clone()),
            SyncSettings {
                poll_interval: Duration::from_millis(10),
                ..settings()
            },
        ));
        let _ = transport.coordinator.set(Arc::downgrade(&coordinator));
        coordinator.start_controller(identity("c1")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while coordinator.deployed_snapshot("c1").map_or(0, |snapshot| snapshot.version) == 0 {
            assert!(Instant::now() < deadline, "poller stopped after the slot was replaced");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(transport.redeployed.load(Ordering::SeqCst));
        assert!(coordinator.is_polling("c1"));
        coordinator.stop_all();
    }

    #[test]
    fn publish_into_removed_slot_is_discarded() {
        let coordinator =
            SnapshotCoordinator::new(QueryClient::new(Arc::new(Replies::default())), settings());
        coordinator.register_controller(identity("c1"));
        let slot = coordinator.deployed.read().get("c1").cloned().unwrap();
        coordinator.stop_controller("c1");
        let result = coordinator.publish(
            Registry::Deployed,
            &slot,
            ControllerSnapshot::new(identity("c1")),
        );
        assert_eq!(result, Err(SyncError::Discarded("c1".into())));
    }
}
