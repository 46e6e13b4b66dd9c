//! Configuration file loading.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::client::RetryPolicy;
use crate::error::SyncError;
use crate::related::{StreamMapping, StreamNodeKind, StreamNodeRegistration};
use crate::snapshot::ControllerIdentity;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_WEB_LISTEN: &str = "127.0.0.1:1880";
const MAX_RETRIES: usize = 4;

/// When a newer `startup_ts` becomes the remembered one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupCommit {
    /// Only together with a successful publish; a failed refresh is retried
    /// on the next poll.
    Merge,
    /// As soon as the status call returns, even if the refresh then fails.
    Status,
}

impl StartupCommit {
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "status" => Ok(Self::Status),
            _ => Err(SyncError::InvalidConfig(
                format!("invalid sync.startup_commit '{text}' (expected merge/status)").into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub status_retry: RetryPolicy,
    pub table_retry: RetryPolicy,
    pub startup_commit: StartupCommit,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            status_retry: RetryPolicy::status_default(),
            table_retry: RetryPolicy::tables_default(),
            startup_commit: StartupCommit::Merge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConfig {
    pub enabled: bool,
    pub listen: SmolStr,
    pub auth_token: Option<SmolStr>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SmolStr::new(DEFAULT_WEB_LISTEN),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FuseboxConfig {
    pub sync: SyncSettings,
    pub log_level: SmolStr,
    pub web: WebConfig,
    pub controllers: Vec<ControllerIdentity>,
    pub streams: Vec<StreamNodeRegistration>,
}

impl FuseboxConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            SyncError::InvalidConfig(format!("{}: {err}", path.display()).into())
        })?;
        Self::from_toml_str(&text)
            .map_err(|err| SyncError::InvalidConfig(format!("{}: {err}", path.display()).into()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SyncError> {
        let raw: ConfigToml = toml::from_str(text)
            .map_err(|err| SyncError::InvalidConfig(format!("toml: {err}").into()))?;
        raw.into_config()
    }

    #[must_use]
    pub fn controller(&self, id: &str) -> Option<&ControllerIdentity> {
        self.controllers.iter().find(|controller| controller.id == id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    sync: Option<SyncSection>,
    log: Option<LogSection>,
    web: Option<WebSection>,
    #[serde(default, rename = "controller")]
    controllers: Vec<ControllerSection>,
    #[serde(default, rename = "stream")]
    streams: Vec<StreamSection>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncSection {
    poll_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    status_retry_ms: Option<Vec<u64>>,
    table_retry_ms: Option<Vec<u64>>,
    startup_commit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogSection {
    level: String,
}

#[derive(Debug, Deserialize)]
struct WebSection {
    enabled: Option<bool>,
    listen: Option<String>,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ControllerSection {
    id: String,
    name: Option<String>,
    unique_id: String,
    host: String,
    udp_port: Option<u16>,
    http_port: u16,
}

#[derive(Debug, Deserialize)]
struct StreamSection {
    id: String,
    #[serde(rename = "type")]
    kind: StreamNodeKind,
    controller: String,
    #[serde(default)]
    mappings: Vec<StreamMapping>,
}

impl ConfigToml {
    fn into_config(self) -> Result<FuseboxConfig, SyncError> {
        let sync = self.sync.unwrap_or_default();
        let poll_interval_ms = sync.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.poll_interval_ms must be greater than 0".into(),
            ));
        }
        let request_timeout_ms = sync.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if request_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.request_timeout_ms must be greater than 0".into(),
            ));
        }
        let status_retry = parse_ladder("sync.status_retry_ms", sync.status_retry_ms)?
            .unwrap_or_else(RetryPolicy::status_default);
        let table_retry = parse_ladder("sync.table_retry_ms", sync.table_retry_ms)?
            .unwrap_or_else(RetryPolicy::tables_default);
        let startup_commit = sync
            .startup_commit
            .as_deref()
            .map(StartupCommit::parse)
            .transpose()?
            .unwrap_or(StartupCommit::Merge);

        let web = self.web.map_or_else(WebConfig::default, |section| WebConfig {
            enabled: section.enabled.unwrap_or(true),
            listen: SmolStr::new(section.listen.unwrap_or_else(|| DEFAULT_WEB_LISTEN.into())),
            auth_token: section.auth_token.and_then(|token| {
                let trimmed = token.trim();
                (!trimmed.is_empty()).then(|| SmolStr::new(trimmed))
            }),
        });

        let mut seen = HashSet::new();
        let mut controllers = Vec::with_capacity(self.controllers.len());
        for section in self.controllers {
            if !seen.insert(section.id.clone()) {
                return Err(SyncError::InvalidConfig(
                    format!("duplicate controller id '{}'", section.id).into(),
                ));
            }
            if section.host.trim().is_empty() {
                return Err(SyncError::InvalidConfig(
                    format!("controller '{}' has an empty host", section.id).into(),
                ));
            }
            if section.http_port == 0 {
                return Err(SyncError::InvalidConfig(
                    format!("controller '{}' has http_port 0", section.id).into(),
                ));
            }
            controllers.push(ControllerIdentity {
                name: SmolStr::new(section.name.as_deref().unwrap_or(&section.id)),
                id: SmolStr::new(section.id),
                unique_id: SmolStr::new(section.unique_id),
                host: SmolStr::new(section.host.trim()),
                udp_port: section.udp_port,
                http_port: section.http_port,
            });
        }

        let streams = self
            .streams
            .into_iter()
            .map(|section| StreamNodeRegistration {
                id: SmolStr::new(section.id),
                kind: section.kind,
                controller: SmolStr::new(section.controller),
                mappings: section.mappings,
            })
            .collect();

        Ok(FuseboxConfig {
            sync: SyncSettings {
                poll_interval: Duration::from_millis(poll_interval_ms),
                request_timeout: Duration::from_millis(request_timeout_ms),
                status_retry,
                table_retry,
                startup_commit,
            },
            log_level: SmolStr::new(self.log.map_or_else(|| "info".to_string(), |log| log.level)),
            web,
            controllers,
            streams,
        })
    }
}

fn parse_ladder(field: &str, delays: Option<Vec<u64>>) -> Result<Option<RetryPolicy>, SyncError> {
    let Some(delays) = delays else {
        return Ok(None);
    };
    if delays.len() > MAX_RETRIES {
        return Err(SyncError::InvalidConfig(
            format!("{field} allows at most {MAX_RETRIES} retries").into(),
        ));
    }
    Ok(Some(RetryPolicy::from_millis(&delays)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[sync]
poll_interval_ms = 30000
status_retry_ms = [1000, 5000, 30000, 60000]
table_retry_ms = [0]
startup_commit = "status"

[log]
level = "debug"

[web]
listen = "0.0.0.0:1881"
auth_token = "  secret "

[[controller]]
id = "c1"
unique_id = "FB-001"
host = "10.0.0.5"
udp_port = 44444
http_port = 8080

[[stream]]
id = "n1"
type = "read-static"
controller = "c1"
mappings = [{ keyNameSelect = "ABCW", index = 1, topic = "power" }]
"#;

    #[test]
    fn parses_full_config() {
        let config = FuseboxConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.sync.poll_interval, Duration::from_secs(30));
        assert_eq!(config.sync.status_retry.max_attempts(), 5);
        assert_eq!(config.sync.table_retry.max_attempts(), 2);
        assert_eq!(config.sync.startup_commit, StartupCommit::Status);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.web.auth_token.as_deref(), Some("secret"));
        let controller = config.controller("c1").unwrap();
        assert_eq!(controller.name, "c1");
        assert_eq!(controller.udp_port, Some(44444));
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].kind, StreamNodeKind::ReadStatic);
        assert_eq!(config.streams[0].mappings[0].key(), Some("ABCW"));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = FuseboxConfig::from_toml_str("").unwrap();
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(config.web, WebConfig::default());
        assert_eq!(config.log_level, "info");
        assert!(config.controllers.is_empty());
    }

    #[test]
    fn rejects_invalid_values() {
        for (text, needle) in [
            ("[sync]\npoll_interval_ms = 0", "poll_interval_ms"),
            ("[sync]\nstartup_commit = \"later\"", "startup_commit"),
            ("[sync]\ntable_retry_ms = [1, 2, 3, 4, 5]", "table_retry_ms"),
            (
                "[[controller]]\nid = \"a\"\nunique_id = \"u\"\nhost = \"h\"\nhttp_port = 1\n\
                 [[controller]]\nid = \"a\"\nunique_id = \"v\"\nhost = \"h\"\nhttp_port = 2",
                "duplicate controller id",
            ),
            ("[[stream]]\nid = \"n\"\ntype = \"lamp\"\ncontroller = \"c\"", "toml"),
        ] {
            let err = FuseboxConfig::from_toml_str(text).unwrap_err().to_string();
            assert!(err.contains(needle), "expected '{needle}' in '{err}'");
        }
    }
}
