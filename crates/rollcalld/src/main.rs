use anyhow::Result;
use rollcall_store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod feed;
mod writer;

use config::Config;
use dbus_interface::{MonitorService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::from_env());
    tracing::info!(
        db = %config.db_path.display(),
        tolerance = config.tolerance,
        stride = config.frame_stride,
        "rollcalld starting"
    );

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let people = store.list_people()?.len();
    tracing::info!(people, "registry store opened");

    let engine = engine::spawn_engine(
        store,
        config.retry_policy(),
        tokio::runtime::Handle::current(),
    )?;

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, MonitorService::new(engine.clone(), Arc::clone(&config)))?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    match engine.stop().await {
        Ok(report) => tracing::info!(
            recognized = report.summary.recognized_count,
            written = report.written,
            "session stopped on shutdown"
        ),
        Err(engine::EngineError::NoSession) => {}
        Err(e) => tracing::warn!(error = %e, "failed to stop session cleanly"),
    }

    Ok(())
}
