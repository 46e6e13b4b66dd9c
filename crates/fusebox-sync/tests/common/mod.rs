#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use fusebox_sync::client::{ControllerTransport, QueryRequest, RetryPolicy};
use fusebox_sync::{
    ControllerIdentity, QueryClient, QueryError, StatusEvent, StatusSink, SyncSettings,
};

pub const STATUS: &str = "/program-status?minimal=true";
pub const SERVICES: &str = "/services.json";
pub const ALLSTATES: &str = "/allstates";
pub const TABLES: [&str; 4] = [
    "/sql2json?table=aicochannels",
    "/sql2json?table=aochannels",
    "/sql2json?table=dichannels",
    "/sql2json?table=dochannels",
];

/// Per-path reply queues. The last reply of a queue repeats forever.
#[derive(Default)]
pub struct ScriptedController {
    replies: Mutex<HashMap<String, VecDeque<Result<String, QueryError>>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, path: &str, value: Value) {
        self.push(path, Ok(value.to_string()));
    }

    pub fn fail(&self, path: &str) {
        self.push(path, Err(QueryError::Transport("connection refused".into())));
    }

    fn push(&self, path: &str, reply: Result<String, QueryError>) {
        self.replies
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Replace every queued reply for `path`.
    pub fn set(&self, path: &str, value: Value) {
        self.replies.lock().remove(path);
        self.reply(path, value);
    }

    pub fn set_failing(&self, path: &str) {
        self.replies.lock().remove(path);
        self.fail(path);
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl ControllerTransport for ScriptedController {
    fn send(&self, request: &QueryRequest) -> Result<String, QueryError> {
        *self.calls.lock().entry(request.path.clone()).or_default() += 1;
        let mut replies = self.replies.lock();
        let Some(queue) = replies.get_mut(&request.path) else {
            return Err(QueryError::Transport(format!("no route {}", request.path).into()));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }
}

impl StatusSink for RecordingSink {
    fn report(&self, event: &StatusEvent) {
        self.events.lock().push(event.clone());
    }
}

pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        poll_interval: Duration::from_secs(3600),
        status_retry: RetryPolicy::new(vec![Duration::ZERO; 3]),
        table_retry: RetryPolicy::new(vec![Duration::ZERO; 2]),
        ..SyncSettings::default()
    }
}

pub fn client(controller: &Arc<ScriptedController>, sink: &Arc<RecordingSink>) -> QueryClient {
    QueryClient::new(controller.clone()).with_status_sink(sink.clone())
}

pub fn identity(id: &str) -> ControllerIdentity {
    ControllerIdentity {
        id: id.into(),
        name: "Main".into(),
        unique_id: "FB-001".into(),
        host: "10.0.0.5".into(),
        udp_port: Some(44444),
        http_port: 8080,
    }
}

/// A controller with one analogue input/output pair and one setpoint.
pub fn install_plant(controller: &ScriptedController, startup_ts: i64) {
    controller.set(STATUS, json!({"startup_ts": startup_ts, "state": "run"}));
    controller.set(
        SERVICES,
        json!([{"services": {
            "ABCW": {"servicename": "Power", "desc": "Active power", "conv_coef": 1000},
            "TSET": {"servicename": "Setpoint", "desc": "Temperature setpoint"},
            "IDLE": {"servicename": "Idle", "desc": "Not reported"}
        }}]),
    );
    controller.set(
        ALLSTATES,
        json!({"fb-001": {
            "ABCW": {"v": [1.5], "s": [0], "t": 1700000000},
            "TSET": {"values": [21.0], "status": [0], "timestamp": 1700000000}
        }}),
    );
    controller.set(
        TABLES[0],
        json!([
            {"val_reg": "ABCW", "member": 1, "mbi": 1, "mba": 3, "regadd": 100,
             "regtype": "h", "chantype": "mb", "desc": "Phase A"},
            {"val_reg": "TSET", "member": 1, "mbi": 0, "mba": 0, "regadd": 0,
             "regtype": "s", "chantype": "vc", "desc": "Room"}
        ]),
    );
    controller.set(
        TABLES[1],
        json!([{"val_reg": "ABCW_OUT", "member": 1, "mbi": "1", "mba": 3, "regadd": "100"}]),
    );
    controller.set(TABLES[2], json!([]));
    controller.set(TABLES[3], json!([]));
}
