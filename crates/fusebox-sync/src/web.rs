//! Admin endpoint used by the flow editor to inspect controllers and submit
//! draft configurations.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use smol_str::SmolStr;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, warn};

use crate::config::WebConfig;
use crate::coordinator::SnapshotCoordinator;
use crate::error::SyncError;
use crate::snapshot::DraftSubmission;

pub const CONTROLLER_CONFIG_PATH: &str = "/fusebox/controllerNodeConfig";
pub const TOKEN_HEADER: &str = "X-Fusebox-Token";

/// Status code plus optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl AdminResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body: Some(body),
        }
    }

    fn empty() -> Self {
        Self {
            status: 200,
            body: None,
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(json!({ "error": message.into() })),
        }
    }
}

pub struct AdminServer {
    server: Arc<Server>,
    handle: Option<thread::JoinHandle<()>>,
    pub listen: String,
}

impl AdminServer {
    /// Block while the accept loop runs.
    pub fn wait(mut self) -> Result<(), SyncError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| SyncError::Web("admin thread panicked".into())),
            None => Ok(()),
        }
    }

    /// Stop accepting requests and wait for the accept loop to exit.
    pub fn shutdown(mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn start_admin_server(
    config: &WebConfig,
    coordinator: Arc<SnapshotCoordinator>,
) -> Result<AdminServer, SyncError> {
    if !config.enabled {
        return Err(SyncError::Web("web disabled".into()));
    }
    let listen = config.listen.to_string();
    let server = Server::http(&listen)
        .map(Arc::new)
        .map_err(|err| SyncError::Web(format!("web bind: {err}").into()))?;
    let token = config.auth_token.clone();
    let accept = Arc::clone(&server);
    let handle = thread::Builder::new()
        .name("fusebox-admin".into())
        .spawn(move || {
            for mut request in accept.incoming_requests() {
                let response = if check_auth(&request, token.as_ref()) {
                    let method = request.method().clone();
                    let url = request.url().to_string();
                    let mut body = String::new();
                    if method == Method::Post
                        && request.as_reader().read_to_string(&mut body).is_err()
                    {
                        AdminResponse::error(400, "invalid body")
                    } else {
                        handle_admin_request(&coordinator, &method, &url, &body)
                    }
                } else {
                    AdminResponse::error(401, "unauthorized")
                };
                let _ = request.respond(into_http(&response));
            }
        })
        .map_err(|err| SyncError::ThreadSpawn(err.to_string().into()))?;
    debug!(%listen, "admin server listening");
    Ok(AdminServer {
        server,
        handle: Some(handle),
        listen,
    })
}

/// Route one request. The caller has already checked authorization.
pub fn handle_admin_request(
    coordinator: &Arc<SnapshotCoordinator>,
    method: &Method,
    url: &str,
    body: &str,
) -> AdminResponse {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    if path != CONTROLLER_CONFIG_PATH {
        return AdminResponse::error(404, "not found");
    }
    match method {
        Method::Get => read_controller(coordinator, query_param(query, "id").as_deref()),
        Method::Post => submit_draft(coordinator, body),
        _ => AdminResponse::error(405, "method not allowed"),
    }
}

fn read_controller(coordinator: &SnapshotCoordinator, id: Option<&str>) -> AdminResponse {
    let Some(id) = id.filter(|id| !id.is_empty()) else {
        let snapshots = coordinator.deployed_snapshots();
        let controllers: Vec<Value> = snapshots
            .iter()
            .filter_map(|snapshot| serde_json::to_value(snapshot.view()).ok())
            .collect();
        return AdminResponse::ok(json!({ "controllers": controllers }));
    };
    let Some(snapshot) = coordinator.snapshot(id) else {
        return AdminResponse::error(404, "Controller not found");
    };
    match serde_json::to_value(snapshot.view()) {
        Ok(view) => AdminResponse::ok(view),
        Err(err) => AdminResponse::error(500, err.to_string()),
    }
}

/// Register the draft, reply at once, refresh in the background. Empty
/// connection fields are taken from the deployed controller.
fn submit_draft(coordinator: &Arc<SnapshotCoordinator>, body: &str) -> AdminResponse {
    let draft: DraftSubmission = match serde_json::from_str(body) {
        Ok(draft) => draft,
        Err(err) => return AdminResponse::error(400, format!("invalid draft: {err}")),
    };
    if draft.id.is_empty() {
        return AdminResponse::error(400, "invalid draft: id is required");
    }
    let deployed = coordinator.deployed_snapshot(&draft.id);
    let Some(identity) = draft.resolve(deployed.as_ref().map(|snapshot| &snapshot.identity))
    else {
        return AdminResponse::error(400, "invalid draft: host and httpPort are required");
    };
    let id: SmolStr = identity.id.clone();
    coordinator.register_draft(identity);
    let worker = Arc::clone(coordinator);
    let spawned = thread::Builder::new()
        .name(format!("fusebox-draft-{id}"))
        .spawn(move || {
            if let Err(err) = worker.refresh_draft(&id) {
                debug!(controller = %id, "draft refresh ended: {err}");
            }
        });
    match spawned {
        Ok(_) => AdminResponse::empty(),
        Err(err) => {
            warn!("draft refresh not started: {err}");
            AdminResponse::error(500, err.to_string())
        }
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key != name {
            return None;
        }
        let value = value.replace('+', " ");
        Some(
            urlencoding::decode(&value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or(value),
        )
    })
}

fn check_auth(request: &Request, token: Option<&SmolStr>) -> bool {
    let Some(expected) = token else {
        return true;
    };
    request
        .headers()
        .iter()
        .find(|header| header.field.equiv(TOKEN_HEADER))
        .is_some_and(|header| header.value.as_str() == expected.as_str())
}

fn into_http(response: &AdminResponse) -> Response<std::io::Cursor<Vec<u8>>> {
    let body = response
        .body
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_default();
    let mut reply = Response::from_string(body).with_status_code(StatusCode(response.status));
    if response.body.is_some() {
        if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
            reply.add_header(header);
        }
    }
    reply
}
