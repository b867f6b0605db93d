// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cooperative tick driver.
//!
//! One task owns tick advancement: it sleeps for the tick interval (or until
//! stopped), then under the exclusive engine lock advances every shard and
//! publishes spectator snapshots for shards that have subscribers. The
//! engine lock is the only world-state lock; everything the driver does
//! inside it is synchronous.

use std::sync::Arc;
use std::time::Duration;

use sector_core::TickEngine;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::spectate::SpectatorHub;

/// Handle to a running [`spawn_driver`] task.
pub struct DriverHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Signals the driver to stop and waits for it to finish its tick.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Spawns the tick driver task.
pub fn spawn_driver(
    engine: Arc<Mutex<TickEngine>>,
    hub: Arc<SpectatorHub>,
    tick_interval: Duration,
) -> DriverHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(run(engine, hub, tick_interval, stop_rx));
    DriverHandle {
        stop: stop_tx,
        task,
    }
}

async fn run(
    engine: Arc<Mutex<TickEngine>>,
    hub: Arc<SpectatorHub>,
    tick_interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    info!(interval = ?tick_interval, "tick driver started");
    loop {
        tokio::select! {
            () = sleep(tick_interval) => {}
            _ = stop.changed() => break,
        }
        let mut engine = engine.lock().await;
        if let Err(err) = engine.tick_once() {
            error!(%err, "tick failed");
        }
        for shard_id in engine.shard_ids() {
            if !hub.has_subscribers(shard_id) {
                continue;
            }
            if let Some(view) = engine.render_spectator_view(shard_id) {
                hub.publish(shard_id, view);
            }
        }
    }
    info!("tick driver stopped");
}
