use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::ops::Deref;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::management::{Fleet, LocalTemplateProvider, LogEmitter};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
static START_TIME: LazyLock<DateTime<Utc>> = LazyLock::new(Utc::now);

pub fn get_start_time() -> &'static DateTime<Utc> {
    START_TIME.deref()
}

/// Prints every fleet and instance event through the logger.
fn forward_log_events(fleet: &Fleet) -> JoinHandle<()> {
    let mut rx = fleet.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!("[{}] {}", event.source, event.message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("log forwarder lagged, {} event(s) skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn prepare_template(fleet: &Fleet, config: &AppConfig) -> anyhow::Result<()> {
    if fleet.template_exists() {
        return Ok(());
    }
    let Some(source) = &config.template_source else {
        warn!(
            "template {} is missing and no template_source is configured",
            fleet.template_path().display()
        );
        return Ok(());
    };

    let mut provider = LocalTemplateProvider::new(source);
    if let Some(version) = &config.template_version {
        provider = provider.with_version(version);
    }
    fleet
        .acquire_template(&provider)
        .await
        .with_context(|| format!("could not acquire template from {}", source.display()))
}

fn init_fleet(config: &AppConfig) -> anyhow::Result<Arc<Fleet>> {
    debug!(
        "config loaded: {}",
        serde_json::to_string_pretty(config).context("could not serialize config")?
    );
    let fleet = Fleet::new(
        &config.servers_root,
        &config.template_name,
        config.launch.clone(),
        LogEmitter::new(),
    )
    .with_context(|| format!("could not open {}", config.servers_root.display()))?;
    Ok(Arc::new(fleet))
}

pub async fn run_app() -> anyhow::Result<()> {
    let _ = get_start_time();
    info!("bedrock daemon v{}", VERSION);

    let config = AppConfig::get();
    let fleet = init_fleet(config)?;
    let forwarder = forward_log_events(&fleet);

    prepare_template(&fleet, config).await?;
    let loaded = fleet.discover().await.context("could not discover instances")?;
    info!("{} instance(s) loaded", loaded.len());

    if config.auto_start {
        if let Err(err) = fleet.start_all().await {
            warn!("not every instance started: {}", err);
        }
    }
    debug!(
        "reports: {}",
        serde_json::to_string(&fleet.reports()).context("could not serialize reports")?
    );

    tokio::signal::ctrl_c()
        .await
        .context("could not install ctrl+c handler")?;
    info!("stopping all instances");

    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    match tokio::time::timeout(timeout, fleet.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("error during shutdown: {}", err),
        Err(_) => warn!(
            "instances did not stop within {}s, killing them",
            config.shutdown_timeout_secs
        ),
    }

    forwarder.abort();
    info!(
        "Bye. (up since {})",
        get_start_time().format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}
