//! Controller identity and the published snapshot.

#![allow(missing_docs)]

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

use crate::derive;
use crate::model::{
    ChannelEntry, ChannelMap, LiveStates, RegisterTables, ServiceCatalog, WritableServices,
};
use crate::related::{FormattedTopic, RelatedNodes};

/// Network parameters of one controller configuration node.
///
/// Also the payload of a draft submission from the editor, which sends ports
/// as strings as often as numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerIdentity {
    pub id: SmolStr,
    #[serde(default)]
    pub name: SmolStr,
    #[serde(default)]
    pub unique_id: SmolStr,
    pub host: SmolStr,
    #[serde(default, deserialize_with = "lenient_optional_port")]
    pub udp_port: Option<u16>,
    #[serde(deserialize_with = "lenient_port")]
    pub http_port: u16,
}

fn port_from_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|port| u16::try_from(port).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    port_from_value(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid port {value}")))
}

fn lenient_optional_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        Value::String(ref text) if text.trim().is_empty() => Ok(None),
        other => port_from_value(&other)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid port {other}"))),
    }
}

/// Draft payload posted by the editor. Connection fields left empty fall back
/// to the deployed configuration with the same id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSubmission {
    pub id: SmolStr,
    #[serde(default)]
    pub name: SmolStr,
    #[serde(default)]
    pub unique_id: SmolStr,
    #[serde(default)]
    pub host: Option<SmolStr>,
    #[serde(default, deserialize_with = "lenient_optional_port")]
    pub udp_port: Option<u16>,
    #[serde(default, deserialize_with = "lenient_optional_port")]
    pub http_port: Option<u16>,
}

impl DraftSubmission {
    /// Resolve against the deployed identity; `None` when neither side names
    /// a host and an HTTP port.
    #[must_use]
    pub fn resolve(self, deployed: Option<&ControllerIdentity>) -> Option<ControllerIdentity> {
        let host = self
            .host
            .filter(|host| !host.trim().is_empty())
            .or_else(|| deployed.map(|identity| identity.host.clone()))
            .filter(|host| !host.trim().is_empty())?;
        let http_port = self
            .http_port
            .filter(|port| *port != 0)
            .or_else(|| deployed.map(|identity| identity.http_port))
            .filter(|port| *port != 0)?;
        let udp_port = self
            .udp_port
            .filter(|port| *port != 0)
            .or_else(|| deployed.and_then(|identity| identity.udp_port));
        Some(ControllerIdentity {
            id: self.id,
            name: self.name,
            unique_id: self.unique_id,
            host,
            udp_port,
            http_port,
        })
    }
}

/// Output of the merge pipeline, replaced as a whole on publish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedState {
    pub channels: ChannelMap,
    pub filtered_services: ServiceCatalog,
    pub writable_services: WritableServices,
    pub related_nodes: RelatedNodes,
    pub formatted_topics: Vec<FormattedTopic>,
}

/// Complete derived state of one controller at one point in time.
///
/// Published snapshots are immutable; the coordinator swaps in a new
/// `Arc<ControllerSnapshot>` on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    pub identity: ControllerIdentity,
    /// Bumped on every successful full refresh; 0 until the first one.
    pub version: u64,
    pub status: Option<Value>,
    pub services: ServiceCatalog,
    pub live_states: LiveStates,
    pub tables: RegisterTables,
    pub derived: DerivedState,
    pub last_startup_ts: i64,
}

impl ControllerSnapshot {
    #[must_use]
    pub fn new(identity: ControllerIdentity) -> Self {
        Self {
            identity,
            version: 0,
            status: None,
            services: ServiceCatalog::new(),
            live_states: LiveStates::new(),
            tables: RegisterTables::default(),
            derived: DerivedState::default(),
            last_startup_ts: 0,
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.version > 0
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelMap {
        &self.derived.channels
    }

    #[must_use]
    pub fn filtered_services(&self) -> &ServiceCatalog {
        &self.derived.filtered_services
    }

    #[must_use]
    pub fn writable_services(&self) -> &WritableServices {
        &self.derived.writable_services
    }

    #[must_use]
    pub fn channel(&self, key: &str, member: u32) -> Option<&ChannelEntry> {
        self.derived.channels.get(key)?.get(&member)
    }

    /// Whether live values of `key` are output states.
    #[must_use]
    pub fn is_writable(&self, key: &str) -> bool {
        self.derived.writable_services.contains_key(key)
    }

    #[must_use]
    pub fn is_writable_index(&self, key: &str, member: u32) -> bool {
        self.derived
            .writable_services
            .get(key)
            .is_some_and(|members| members.contains(&member))
    }

    /// Scaling coefficient for a stream row: the service's `conv_coef`
    /// overrides the row value; a missing or non-numeric result is `1`.
    #[must_use]
    pub fn coefficient(&self, key: &str, row_coefficient: Option<f64>) -> f64 {
        self.services
            .get(key)
            .and_then(|service| service.coefficient())
            .filter(|coef| *coef != 0.0)
            .or(row_coefficient)
            .filter(|coef| coef.is_finite())
            .unwrap_or(1.0)
    }

    /// Projection served by the admin endpoint.
    #[must_use]
    pub fn view(&self) -> SnapshotView<'_> {
        SnapshotView {
            id: &self.identity.id,
            name: &self.identity.name,
            unique_id: &self.identity.unique_id,
            host: &self.identity.host,
            udp_port: self.identity.udp_port,
            http_port: self.identity.http_port,
            version: self.version,
            services: &self.services,
            channels: &self.derived.channels,
            status: self.status.as_ref(),
            filtered_services: &self.derived.filtered_services,
            writable_services: &self.derived.writable_services,
            related_nodes: &self.derived.related_nodes,
            formatted_topics: &self.derived.formatted_topics,
        }
    }

    /// Check the cross-field rules that must hold after every publish.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let writable_sound = self.derived.writable_services.iter().all(|(key, members)| {
            members
                .iter()
                .all(|member| self.channel(key, *member).is_some_and(derive::is_writable))
        });
        let writable_complete = self.derived.channels.iter().all(|(key, members)| {
            members
                .iter()
                .all(|(member, entry)| !derive::is_writable(entry) || self.is_writable_index(key, *member))
        });
        let services_filtered = self.derived.filtered_services.keys().all(|key| {
            self.services.contains_key(key) && self.live_states.contains_key(key)
        });
        let topics = &self.derived.formatted_topics;
        let labels_unique = topics
            .iter()
            .enumerate()
            .all(|(i, topic)| topics[..i].iter().all(|other| other.label != topic.label));
        writable_sound && writable_complete && services_filtered && labels_unique
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView<'a> {
    pub id: &'a SmolStr,
    pub name: &'a SmolStr,
    pub unique_id: &'a SmolStr,
    pub host: &'a SmolStr,
    pub udp_port: Option<u16>,
    pub http_port: u16,
    pub version: u64,
    pub services: &'a ServiceCatalog,
    pub channels: &'a ChannelMap,
    pub status: Option<&'a Value>,
    pub filtered_services: &'a ServiceCatalog,
    pub writable_services: &'a WritableServices,
    pub related_nodes: &'a RelatedNodes,
    pub formatted_topics: &'a [FormattedTopic],
}
