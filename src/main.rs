use std::error::Error;
use std::sync::Arc;

use anyhow::Context;
use bollard::{Docker, API_DEFAULT_VERSION};
use crate::config::load_config;
use infra::{
    docker::DockerRuntime, notify::NtfyNotifier, registry::HttpRegistryClient,
    store::SqliteStore, web::router,
};
use log::info;
use tokio::net::TcpListener;

mod config;
mod domain;
mod infra;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    info!("Start tugboat - health-gated container tag updates");

    let config = load_config()?;
    info!(
        "Allow prerelease: {} | Auto-update: {} | Check interval: {}s",
        config.allow_prerelease, config.auto_update, config.check_interval
    );

    let docker = Docker::connect_with_socket(&config.docker_socket, 120, API_DEFAULT_VERSION)
        .context("Can't connect to docker socket")?;
    let store = SqliteStore::open(&config.db_path).await?;
    let registry = HttpRegistryClient::new(config.github_token.clone())?;
    let notifier = NtfyNotifier::new(
        &config.ntfy_endpoint,
        config.ntfy_topic.clone(),
        config.ntfy_token.clone(),
        config.ntfy_click_url.clone(),
    )?;

    let port = config.port;
    let service = Arc::new(domain::UpdateService::new(
        config,
        Box::new(DockerRuntime { docker }),
        Box::new(registry),
        Box::new(store),
        Box::new(notifier),
    ));

    tokio::spawn(domain::run_poller(service.clone()));

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, router(service)).await?;
    Ok(())
}
