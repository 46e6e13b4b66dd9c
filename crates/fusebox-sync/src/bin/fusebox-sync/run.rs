//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context};
use fusebox_sync::config::FuseboxConfig;
use fusebox_sync::web::start_admin_server;
use fusebox_sync::{
    HttpTransport, QueryClient, RefreshOutcome, SnapshotCoordinator, TracingStatusSink,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { level };
    let directive = level
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> anyhow::Result<FuseboxConfig> {
    FuseboxConfig::load(path).with_context(|| format!("load {}", path.display()))
}

fn build_coordinator(config: &FuseboxConfig) -> Arc<SnapshotCoordinator> {
    let transport = Arc::new(HttpTransport::new(config.sync.request_timeout));
    let client = QueryClient::new(transport).with_status_sink(Arc::new(TracingStatusSink));
    let coordinator = SnapshotCoordinator::new(client, config.sync.clone());
    for stream in &config.streams {
        coordinator.related_registry().register(stream.clone());
    }
    Arc::new(coordinator)
}

/// Poll until the process is terminated.
pub fn run(path: &Path, verbose: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    init_tracing(&config.log_level, verbose);
    if config.controllers.is_empty() {
        bail!("no [[controller]] entries in {}", path.display());
    }
    let coordinator = build_coordinator(&config);
    for identity in &config.controllers {
        coordinator.start_controller(identity.clone())?;
    }
    if !config.web.enabled {
        info!("admin endpoint disabled");
        loop {
            thread::park();
        }
    }
    let server = start_admin_server(&config.web, Arc::clone(&coordinator))?;
    info!(listen = %server.listen, "admin endpoint ready");
    server.wait()?;

    info!("admin endpoint stopped, shutting down");
    coordinator.stop_all();
    Ok(())
}

pub fn snapshot(path: &Path, id: Option<&str>, verbose: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    init_tracing(&config.log_level, verbose);
    let coordinator = build_coordinator(&config);
    let selected: Vec<_> = config
        .controllers
        .iter()
        .filter(|controller| id.map_or(true, |id| controller.id == id))
        .collect();
    if selected.is_empty() {
        bail!("no controller matches {}", id.unwrap_or("<any>"));
    }

    let mut views = Vec::with_capacity(selected.len());
    for identity in selected {
        coordinator.register_controller(identity.clone());
        match coordinator.refresh_deployed(&identity.id) {
            Ok(RefreshOutcome::Published { version, .. }) => {
                info!(controller = %identity.id, version, "snapshot loaded");
            }
            Ok(RefreshOutcome::Unchanged { .. }) => {}
            Err(err) => warn!(controller = %identity.id, "snapshot incomplete: {err}"),
        }
        if let Some(snapshot) = coordinator.deployed_snapshot(&identity.id) {
            views.push(serde_json::to_value(snapshot.view())?);
        }
    }
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}

pub fn validate(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    println!(
        "{}: ok ({} controllers, {} stream nodes)",
        path.display(),
        config.controllers.len(),
        config.streams.len()
    );
    Ok(())
}
