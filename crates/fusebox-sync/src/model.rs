//! Controller payload types and the derived channel structures.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// `channels[key][member]`, keys in table order, members ascending.
pub type ChannelMap = IndexMap<String, BTreeMap<u32, ChannelEntry>>;
/// `services.json` catalog keyed by service key.
pub type ServiceCatalog = IndexMap<String, ServiceDescriptor>;
/// Normalized `/allstates` payload keyed by channel key.
pub type LiveStates = IndexMap<String, LiveState>;
/// Writable member indices per channel key.
pub type WritableServices = IndexMap<String, Vec<u32>>;

/// One row of a `sql2json` register table.
///
/// Output tables (`aochannels`, `dochannels`) may omit most fields, so
/// everything except the address tuple is optional. Address fields are kept
/// as raw JSON values because the controller mixes numbers and strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    #[serde(default, deserialize_with = "lenient_key")]
    pub val_reg: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub member: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbi: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mba: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regadd: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit: Option<Value>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub regtype: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub chantype: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub desc: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RegisterDescriptor {
    /// The 1-based member index, if `member` holds a positive integer.
    #[must_use]
    pub fn member_index(&self) -> Option<u32> {
        let index = match &self.member {
            Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(text) => parse_leading_int(text),
            _ => None,
        }?;
        (index > 0).then_some(index)
    }
}

/// Mirrors `parseInt`: leading digits after optional whitespace.
fn parse_leading_int(text: &str) -> Option<u32> {
    let trimmed = text.trim_start();
    let digits = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .map_or(trimmed, |end| &trimmed[..end]);
    digits.parse().ok()
}

/// Which input table a merged channel came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Analogue,
    Discrete,
}

/// A merged input register annotated with its kind and output flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEntry {
    #[serde(flatten)]
    pub register: RegisterDescriptor,
    #[serde(rename = "_type")]
    pub kind: ChannelKind,
    #[serde(rename = "_output")]
    pub output: bool,
}

impl ChannelEntry {
    #[must_use]
    pub fn regtype(&self) -> Option<&str> {
        self.register.regtype.as_deref()
    }

    #[must_use]
    pub fn chantype(&self) -> Option<&str> {
        self.register.chantype.as_deref()
    }
}

/// The four raw register tables, stored as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterTables {
    pub aicochannels: Vec<RegisterDescriptor>,
    pub aochannels: Vec<RegisterDescriptor>,
    pub dichannels: Vec<RegisterDescriptor>,
    pub dochannels: Vec<RegisterDescriptor>,
}

impl RegisterTables {
    pub fn set(&mut self, table: RegisterTable, rows: Vec<RegisterDescriptor>) {
        match table {
            RegisterTable::AnalogueInputs => self.aicochannels = rows,
            RegisterTable::AnalogueOutputs => self.aochannels = rows,
            RegisterTable::DiscreteInputs => self.dichannels = rows,
            RegisterTable::DiscreteOutputs => self.dochannels = rows,
        }
    }

    #[must_use]
    pub fn get(&self, table: RegisterTable) -> &[RegisterDescriptor] {
        match table {
            RegisterTable::AnalogueInputs => &self.aicochannels,
            RegisterTable::AnalogueOutputs => &self.aochannels,
            RegisterTable::DiscreteInputs => &self.dichannels,
            RegisterTable::DiscreteOutputs => &self.dochannels,
        }
    }
}

/// Register table names accepted by `/sql2json?table=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterTable {
    AnalogueInputs,
    AnalogueOutputs,
    DiscreteInputs,
    DiscreteOutputs,
}

impl RegisterTable {
    pub const ALL: [Self; 4] = [
        Self::AnalogueInputs,
        Self::AnalogueOutputs,
        Self::DiscreteInputs,
        Self::DiscreteOutputs,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AnalogueInputs => "aicochannels",
            Self::AnalogueOutputs => "aochannels",
            Self::DiscreteInputs => "dichannels",
            Self::DiscreteOutputs => "dochannels",
        }
    }
}

/// One entry of the controller service catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub servicename: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conv_coef: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServiceDescriptor {
    /// `conv_coef` as a number, if it is one (or a numeric string).
    #[must_use]
    pub fn coefficient(&self) -> Option<f64> {
        match self.conv_coef.as_ref()? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) if !text.trim().is_empty() => text.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Normalized live value of one channel key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub values: Value,
    pub status: Value,
    pub timestamp: Value,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    })
}

fn lenient_key<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_text(deserializer).map(Option::unwrap_or_default)
}
