//! Fetchers for the controller endpoints and their payload normalization.

#![allow(missing_docs)]

use serde_json::{Map, Value};
use smol_str::SmolStr;
use tracing::warn;

use crate::client::{QueryClient, QueryRequest, RetryPolicy};
use crate::context::SharedContext;
use crate::error::{QueryError, SyncError};
use crate::model::{LiveState, LiveStates, RegisterDescriptor, RegisterTable, ServiceCatalog};
use crate::snapshot::ControllerIdentity;

pub const STATUS_PATH: &str = "/program-status?minimal=true";
pub const SERVICES_PATH: &str = "/services.json";
pub const ALLSTATES_PATH: &str = "/allstates";

/// Field aliases accepted in `/allstates` entries, canonical name first.
/// The first alias holding a non-null value wins.
pub const LIVE_STATE_ALIASES: [(&str, &[&str]); 3] = [
    ("values", &["v", "values"]),
    ("status", &["s", "status"]),
    ("timestamp", &["t", "timestamp"]),
];

#[must_use]
pub fn table_path(table: RegisterTable) -> String {
    format!("/sql2json?table={}", table.name())
}

/// Where the requests of one refresh go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub host: SmolStr,
    pub http_port: u16,
}

impl FetchTarget {
    #[must_use]
    pub fn request(&self, path: impl Into<String>) -> QueryRequest {
        QueryRequest::get(self.host.clone(), self.http_port, path)
    }
}

impl From<&ControllerIdentity> for FetchTarget {
    fn from(identity: &ControllerIdentity) -> Self {
        Self {
            host: identity.host.clone(),
            http_port: identity.http_port,
        }
    }
}

/// `/program-status` payload, kept verbatim alongside its boot time.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub raw: Value,
    pub startup_ts: i64,
}

impl ControllerStatus {
    pub fn from_value(raw: Value) -> Result<Self, QueryError> {
        let startup_ts = match raw.get("startup_ts") {
            Some(Value::Number(number)) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|ts| ts as i64)),
            _ => None,
        }
        .ok_or_else(|| QueryError::Application("status payload has no numeric startup_ts".into()))?;
        Ok(Self { raw, startup_ts })
    }
}

/// Publishes the deployed live-state mapping for sibling nodes.
#[derive(Clone, Copy)]
pub struct LiveStatePublish<'a> {
    pub context: &'a dyn SharedContext,
    pub key: &'a str,
}

/// Status is the one fetch whose failure is surfaced as an error.
pub fn fetch_status(
    client: &QueryClient,
    target: &FetchTarget,
    policy: &RetryPolicy,
) -> Result<ControllerStatus, SyncError> {
    let value = client
        .query(&target.request(STATUS_PATH), policy)
        .map_err(|err| SyncError::query(STATUS_PATH, err))?;
    ControllerStatus::from_value(value).map_err(|err| SyncError::query(STATUS_PATH, err))
}

pub fn fetch_services(
    client: &QueryClient,
    target: &FetchTarget,
    policy: &RetryPolicy,
) -> Option<ServiceCatalog> {
    let value = client.query_or_sentinel(&target.request(SERVICES_PATH), policy)?;
    normalized(SERVICES_PATH, parse_services(value))
}

pub fn fetch_live_states(
    client: &QueryClient,
    target: &FetchTarget,
    policy: &RetryPolicy,
    publish: Option<LiveStatePublish<'_>>,
) -> Option<LiveStates> {
    let value = client.query_or_sentinel(&target.request(ALLSTATES_PATH), policy)?;
    let states = normalized(ALLSTATES_PATH, normalize_live_states(&value))?;
    if let Some(publish) = publish {
        match serde_json::to_value(&states) {
            Ok(value) => publish.context.set(publish.key, value),
            Err(err) => warn!(key = publish.key, "live states not published: {err}"),
        }
    }
    Some(states)
}

pub fn fetch_register_table(
    client: &QueryClient,
    target: &FetchTarget,
    table: RegisterTable,
    policy: &RetryPolicy,
) -> Option<Vec<RegisterDescriptor>> {
    let path = table_path(table);
    let value = client.query_or_sentinel(&target.request(path.as_str()), policy)?;
    normalized(&path, parse_register_table(value))
}

fn normalized<T>(path: &str, result: Result<T, QueryError>) -> Option<T> {
    result
        .map_err(|err| warn!(%path, "unusable controller payload: {err}"))
        .ok()
}

/// `[{services: {...}}, ...]` → the first element's `services` mapping.
pub fn parse_services(value: Value) -> Result<ServiceCatalog, QueryError> {
    let services = match value {
        Value::Array(mut items) if !items.is_empty() => match items.swap_remove(0) {
            Value::Object(mut first) => first.remove("services"),
            _ => None,
        },
        _ => None,
    }
    .ok_or_else(|| QueryError::Application("services.json has no services mapping".into()))?;
    serde_json::from_value(services)
        .map_err(|err| QueryError::Application(format!("services.json: {err}").into()))
}

/// `{<host>: {<key>: {v|values, s|status, t|timestamp}}}` → canonical entries.
pub fn normalize_live_states(value: &Value) -> Result<LiveStates, QueryError> {
    let Value::Object(hosts) = value else {
        return Err(QueryError::Application("allstates is not an object".into()));
    };
    let Some((_, entries)) = hosts.iter().next() else {
        return Ok(LiveStates::new());
    };
    let Value::Object(entries) = entries else {
        return Err(QueryError::Application("allstates host entry is not an object".into()));
    };
    Ok(entries
        .iter()
        .map(|(key, entry)| (key.clone(), normalize_live_state(entry)))
        .collect())
}

fn normalize_live_state(entry: &Value) -> LiveState {
    let empty = Map::new();
    let fields = entry.as_object().unwrap_or(&empty);
    let [values, status, timestamp] = LIVE_STATE_ALIASES.map(|(_, aliases)| {
        aliases
            .iter()
            .find_map(|alias| fields.get(*alias).filter(|value| !value.is_null()))
            .cloned()
            .unwrap_or(Value::Null)
    });
    LiveState {
        values,
        status,
        timestamp,
    }
}

pub fn parse_register_table(value: Value) -> Result<Vec<RegisterDescriptor>, QueryError> {
    if !value.is_array() {
        return Err(QueryError::Application("register table is not an array".into()));
    }
    serde_json::from_value(value)
        .map_err(|err| QueryError::Application(format!("register table: {err}").into()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn live_states_accept_short_and_long_field_names() {
        let payload = json!({
            "fusebox-01": {
                "ABCW": {"v": [1, 2], "s": 0, "t": 1700000000},
                "TEMP": {"values": [215], "status": 1, "timestamp": 1700000001},
                "MIX": {"v": null, "values": [3], "s": 2}
            }
        });
        let states = normalize_live_states(&payload).unwrap();
        assert_eq!(states.len(), 3);
        assert_eq!(states["ABCW"].values, json!([1, 2]));
        assert_eq!(states["ABCW"].timestamp, json!(1700000000));
        assert_eq!(states["TEMP"].status, json!(1));
        assert_eq!(states["MIX"].values, json!([3]));
        assert_eq!(states["MIX"].timestamp, Value::Null);
    }

    #[test]
    fn live_states_reject_non_object_payloads() {
        assert!(normalize_live_states(&json!([])).is_err());
        assert!(normalize_live_states(&json!({"host": 5})).is_err());
        assert!(normalize_live_states(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn services_come_from_first_array_element() {
        let catalog = parse_services(json!([
            {"services": {"ABCW": {"servicename": "Power", "desc": "Active power", "conv_coef": 1000}}},
            {"services": {"IGNORED": {}}}
        ]))
        .unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog["ABCW"].servicename.as_deref(), Some("Power"));
        assert!(parse_services(json!({"services": {}})).is_err());
        assert!(parse_services(json!([])).is_err());
    }

    #[test]
    fn status_requires_numeric_startup_ts() {
        let status = ControllerStatus::from_value(json!({"startup_ts": 100, "state": "run"})).unwrap();
        assert_eq!(status.startup_ts, 100);
        assert_eq!(status.raw["state"], "run");
        assert!(ControllerStatus::from_value(json!({"startup_ts": "100"})).is_err());
        assert!(ControllerStatus::from_value(json!(true)).is_err());
    }

    #[test]
    fn register_table_must_be_an_array() {
        let rows = parse_register_table(json!([{"val_reg": "A", "member": 1}])).unwrap();
        assert_eq!(rows[0].member_index(), Some(1));
        assert!(parse_register_table(json!({"rows": []})).is_err());
    }
}
