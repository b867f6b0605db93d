// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-shard spectator snapshot fan-out.
//!
//! Each shard with subscribers gets a single-slot mailbox: the driver
//! overwrites the slot every tick (dropping an unconsumed snapshot) and a
//! fan-out task forwards the latest snapshot to every subscriber outbox with
//! a bounded send timeout. Subscribers that time out or hang up are evicted;
//! the fan-out task retires when its subscriber set empties.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sector_core::{ShardId, SpectatorView};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::debug;

/// Outbox depth per subscriber; the slot in front of it is what's lossy.
const SUBSCRIBER_QUEUE: usize = 1;

type Slot = watch::Sender<Option<Arc<SpectatorView>>>;
type Subscribers = Arc<Mutex<Vec<mpsc::Sender<Arc<SpectatorView>>>>>;

struct ShardFeed {
    slot: Slot,
    subscribers: Subscribers,
}

/// Subscriber manager for spectator snapshots, one feed per shard.
pub struct SpectatorHub {
    feeds: Mutex<HashMap<ShardId, ShardFeed>>,
    send_timeout: Duration,
}

impl Default for SpectatorHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectatorHub {
    /// Hub with the default 1 s per-subscriber send timeout.
    pub fn new() -> Self {
        Self::with_send_timeout(Duration::from_secs(1))
    }

    /// Hub with a custom per-subscriber send timeout.
    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self {
            feeds: Mutex::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Whether any subscriber is currently attached to `shard_id`.
    pub fn has_subscribers(&self, shard_id: ShardId) -> bool {
        let feeds = match self.feeds.lock() {
            Ok(f) => f,
            Err(_) => return false,
        };
        feeds
            .get(&shard_id)
            .and_then(|feed| feed.subscribers.lock().ok().map(|s| !s.is_empty()))
            .unwrap_or(false)
    }

    /// Overwrites the shard's snapshot slot. No-op without a feed.
    pub fn publish(&self, shard_id: ShardId, view: SpectatorView) {
        let Ok(feeds) = self.feeds.lock() else { return };
        if let Some(feed) = feeds.get(&shard_id) {
            let _ = feed.slot.send(Some(Arc::new(view)));
        }
    }

    /// Attaches a subscriber to a shard, spawning the fan-out task on first
    /// use. The current slot contents, if any, are delivered immediately.
    pub fn subscribe(
        self: &Arc<Self>,
        shard_id: ShardId,
    ) -> mpsc::Receiver<Arc<SpectatorView>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let Ok(mut feeds) = self.feeds.lock() else {
            return rx;
        };
        if let Some(feed) = feeds.get(&shard_id) {
            if let Some(snapshot) = feed.slot.borrow().clone() {
                let _ = tx.try_send(snapshot);
            }
            if let Ok(mut subs) = feed.subscribers.lock() {
                subs.push(tx);
            }
            return rx;
        }
        let (slot, slot_rx) = watch::channel(None);
        let subscribers: Subscribers = Arc::new(Mutex::new(vec![tx]));
        feeds.insert(
            shard_id,
            ShardFeed {
                slot,
                subscribers: subscribers.clone(),
            },
        );
        let hub = Arc::clone(self);
        tokio::spawn(fan_out(hub, shard_id, slot_rx, subscribers));
        rx
    }

    fn retire_feed(&self, shard_id: ShardId) {
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.remove(&shard_id);
        }
        debug!(shard = %shard_id, "spectator feed retired");
    }
}

async fn fan_out(
    hub: Arc<SpectatorHub>,
    shard_id: ShardId,
    mut slot_rx: watch::Receiver<Option<Arc<SpectatorView>>>,
    subscribers: Subscribers,
) {
    loop {
        if slot_rx.changed().await.is_err() {
            break;
        }
        let Some(snapshot) = slot_rx.borrow_and_update().clone() else {
            continue;
        };
        let targets: Vec<mpsc::Sender<Arc<SpectatorView>>> = match subscribers.lock() {
            Ok(subs) => subs.clone(),
            Err(_) => break,
        };
        let mut alive = Vec::with_capacity(targets.len());
        for tx in targets {
            match timeout(hub.send_timeout, tx.send(snapshot.clone())).await {
                Ok(Ok(())) => alive.push(tx),
                // Timed out or hung up: evict.
                Ok(Err(_)) | Err(_) => {}
            }
        }
        let empty = {
            match subscribers.lock() {
                Ok(mut subs) => {
                    *subs = alive;
                    subs.is_empty()
                }
                Err(_) => break,
            }
        };
        if empty {
            break;
        }
    }
    hub.retire_feed(shard_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sector_core::{MemoryPersistence, EngineConfig, TickEngine};
    use tokio::time::{sleep, Duration};

    fn sample_view(engine: &TickEngine, shard_id: ShardId) -> SpectatorView {
        engine.render_spectator_view(shard_id).expect("shard view")
    }

    fn test_engine() -> (TickEngine, ShardId) {
        let mut engine = TickEngine::new(
            Arc::new(MemoryPersistence::default()),
            EngineConfig::default(),
        );
        let shard_id = engine.create_shard().expect("shard");
        (engine, shard_id)
    }

    #[tokio::test]
    async fn slot_is_lossy_and_latest_wins() {
        let (mut engine, shard_id) = test_engine();
        let hub = Arc::new(SpectatorHub::new());
        let mut rx = hub.subscribe(shard_id);

        engine.tick_once().expect("tick");
        hub.publish(shard_id, sample_view(&engine, shard_id));
        engine.tick_once().expect("tick");
        hub.publish(shard_id, sample_view(&engine, shard_id));

        // Whatever arrives, the last delivered snapshot is the newest one.
        let mut last = rx.recv().await.expect("first snapshot");
        while let Ok(Some(next)) = timeout(Duration::from_millis(100), rx.recv()).await {
            last = next;
        }
        assert_eq!(last.tick, 2);
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted() {
        let (mut engine, shard_id) = test_engine();
        let hub = Arc::new(SpectatorHub::with_send_timeout(Duration::from_millis(20)));
        let rx = hub.subscribe(shard_id);
        assert!(hub.has_subscribers(shard_id));

        engine.tick_once().expect("tick");
        // Never read: the outbox fills, then the next send times out.
        hub.publish(shard_id, sample_view(&engine, shard_id));
        sleep(Duration::from_millis(50)).await;
        hub.publish(shard_id, sample_view(&engine, shard_id));
        sleep(Duration::from_millis(200)).await;

        assert!(!hub.has_subscribers(shard_id));
        drop(rx);
    }

    #[tokio::test]
    async fn dropped_subscriber_retires_feed() {
        let (mut engine, shard_id) = test_engine();
        let hub = Arc::new(SpectatorHub::new());
        let rx = hub.subscribe(shard_id);
        drop(rx);

        engine.tick_once().expect("tick");
        hub.publish(shard_id, sample_view(&engine, shard_id));
        sleep(Duration::from_millis(100)).await;
        assert!(!hub.has_subscribers(shard_id));
    }
}
