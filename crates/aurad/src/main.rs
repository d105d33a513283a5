use anyhow::{Context, Result};
use aura_core::GalleryStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod envelope;

use config::{BusKind, Config};
use dbus_interface::{AuraService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "aurad starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        threshold = config.similarity_threshold,
        timeout_secs = config.request_timeout_secs,
        bus = ?config.bus,
        "configuration loaded"
    );

    let gallery = Arc::new(GalleryStore::default());
    let engine_config = config.clone();
    let engine = engine::spawn_engine(
        move |gallery| engine::build_service(&engine_config, gallery),
        gallery,
        config.request_timeout(),
    )?;

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AuraService::new(engine))?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "aurad ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("aurad shutting down");

    Ok(())
}
