use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use tokio::net::TcpListener;

pub mod answer;
pub mod assembler;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod naming;
pub mod normalizer;
pub mod refresh;
pub mod resolver;
pub mod server;
pub mod state;
pub mod store;
pub mod utils;

#[cfg(test)]
mod testing;

use crate::answer::LlmAnswerer;
use crate::client::KubeClusterClient;
use crate::config::AppConfig;
use crate::naming::NamingRules;
use crate::refresh::{spawn_periodic_refresh, Refresher};
use crate::state::AppState;
use crate::store::SnapshotStore;

/// Build every component from `config`, load the first snapshot and serve
/// until Ctrl-C.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let client = Arc::new(KubeClusterClient::new(config.kubeconfig.clone(), config.context.clone()));
    let refresher = Arc::new(Refresher::new(
        client,
        SnapshotStore::new(),
        NamingRules::new(config.base_name_overrides.clone()),
        config.resource_kinds.clone(),
        config.refresh_timeout(),
    ));
    if config.llm.api_key.is_none() {
        warn!("No API key configured for {:?}; queries needing the model will fail", config.llm.provider);
    }
    let answerer = Arc::new(LlmAnswerer::new(config.llm.clone())?);
    let state = AppState::new(refresher.clone(), answerer);

    info!("Starting application...");
    match refresher.refresh().await {
        Ok(report) => info!("Initial data load complete: {} pods in {} namespaces", report.pods, report.namespaces),
        Err(e) => warn!("Initial data load failed, serving without data: {}", e),
    }

    let periodic = config.refresh_interval().map(|period| {
        info!("Refreshing cluster data every {:?}", period);
        spawn_periodic_refresh(refresher.clone(), period)
    });

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    server::serve(listener, state, &config.cors_allowed_origins, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
        }
    })
    .await
    .context("Server error")?;

    if let Some(handle) = periodic {
        handle.abort();
    }
    Ok(())
}
