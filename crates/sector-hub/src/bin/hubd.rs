// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Minimal headless hub daemon: sqlite persistence + engine + tick driver.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sector_core::TickEngine;
use sector_hub::{spawn_driver, Settings, SpectatorHub};
use sector_persist::SqlitePersistence;
use tokio::sync::Mutex;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env();
    let persistence = Arc::new(SqlitePersistence::open(&settings.db_path)?);

    let mut engine = TickEngine::new(persistence, settings.engine_config());
    // Ensure at least one shard exists before the first join.
    engine.create_shard()?;
    let engine = Arc::new(Mutex::new(engine));

    let hub = Arc::new(SpectatorHub::new());
    let driver = spawn_driver(
        Arc::clone(&engine),
        Arc::clone(&hub),
        Duration::from_secs(settings.tick_seconds),
    );
    info!(db = %settings.db_path, tick_seconds = settings.tick_seconds, "sector hub running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    driver.stop().await;
    Ok(())
}
