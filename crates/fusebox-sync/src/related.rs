//! Sibling stream nodes that reference a controller, and their topic labels.

#![allow(missing_docs)]

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use tracing::debug;

use crate::model::{ChannelMap, ServiceCatalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamNodeKind {
    #[serde(
        rename = "fusebox-read-static-data-streams",
        alias = "read-static"
    )]
    ReadStatic,
    #[serde(
        rename = "fusebox-write-static-data-streams",
        alias = "write-static"
    )]
    WriteStatic,
}

/// One mapping row as configured on a stream node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name_select: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name_manual: Option<String>,
    #[serde(default)]
    pub index: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl StreamMapping {
    /// Selected key, falling back to the manually typed one.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        [&self.key_name_select, &self.key_name_manual]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|key| !key.is_empty())
    }

    #[must_use]
    pub fn member(&self) -> Option<u32> {
        match &self.index {
            Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A stream node's declaration of the controller it reads from or writes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamNodeRegistration {
    pub id: SmolStr,
    #[serde(rename = "type")]
    pub kind: StreamNodeKind,
    pub controller: SmolStr,
    #[serde(default)]
    pub mappings: Vec<StreamMapping>,
}

/// Stream nodes register here on startup and deregister on teardown.
#[derive(Debug, Default)]
pub struct RelatedNodeRegistry {
    nodes: RwLock<IndexMap<SmolStr, StreamNodeRegistration>>,
}

impl RelatedNodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registration: StreamNodeRegistration) -> Option<StreamNodeRegistration> {
        debug!(node = %registration.id, controller = %registration.controller, "stream node registered");
        self.nodes
            .write()
            .insert(registration.id.clone(), registration)
    }

    pub fn deregister(&self, id: &str) -> Option<StreamNodeRegistration> {
        self.nodes.write().shift_remove(id)
    }

    #[must_use]
    pub fn for_controller(&self, controller: &str) -> Vec<StreamNodeRegistration> {
        self.nodes
            .read()
            .values()
            .filter(|node| node.controller == controller)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedMapping {
    pub key: String,
    pub member: u32,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedNode {
    #[serde(rename = "type")]
    pub kind: StreamNodeKind,
    pub mappings: Vec<RelatedMapping>,
}

pub type RelatedNodes = IndexMap<String, RelatedNode>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedTopic {
    pub key: String,
    pub member: u32,
    pub topic: String,
    pub label: String,
}

/// Related nodes of `controller`, keyed by node id. Mapping rows without a
/// key, a numeric index or a topic are left out.
#[must_use]
pub fn resolve_related(controller: &str, registrations: &[StreamNodeRegistration]) -> RelatedNodes {
    registrations
        .iter()
        .filter(|node| node.controller == controller)
        .map(|node| {
            let mappings = node
                .mappings
                .iter()
                .filter_map(|row| {
                    let topic = row.topic.as_deref().filter(|topic| !topic.is_empty());
                    match (row.key(), row.member(), topic) {
                        (Some(key), Some(member), Some(topic)) => Some(RelatedMapping {
                            key: key.to_string(),
                            member,
                            topic: topic.to_string(),
                        }),
                        _ => {
                            debug!(node = %node.id, "incomplete stream mapping ignored");
                            None
                        }
                    }
                })
                .collect();
            (
                node.id.to_string(),
                RelatedNode {
                    kind: node.kind,
                    mappings,
                },
            )
        })
        .collect()
}

/// `topic`, or `topic: <servicename> (<register desc>)` when both resolve.
#[must_use]
pub fn topic_label(
    mapping: &RelatedMapping,
    services: &ServiceCatalog,
    channels: &ChannelMap,
) -> String {
    let service = services
        .get(&mapping.key)
        .and_then(|service| service.servicename.as_deref())
        .filter(|name| !name.is_empty());
    let description = channels
        .get(&mapping.key)
        .and_then(|members| members.get(&mapping.member))
        .and_then(|entry| entry.register.desc.as_deref())
        .filter(|desc| !desc.is_empty());
    match (service, description) {
        (Some(service), Some(description)) => {
            format!("{}: {service} ({description})", mapping.topic)
        }
        _ => mapping.topic.clone(),
    }
}

/// Topic list across all related nodes, first occurrence of a label wins.
#[must_use]
pub fn format_topics(
    related: &RelatedNodes,
    services: &ServiceCatalog,
    channels: &ChannelMap,
) -> Vec<FormattedTopic> {
    let mut topics: Vec<FormattedTopic> = Vec::new();
    for mapping in related.values().flat_map(|node| &node.mappings) {
        let label = topic_label(mapping, services, channels);
        if topics.iter().any(|topic| topic.label == label) {
            continue;
        }
        topics.push(FormattedTopic {
            key: mapping.key.clone(),
            member: mapping.member,
            topic: mapping.topic.clone(),
            label,
        });
    }
    topics
}
