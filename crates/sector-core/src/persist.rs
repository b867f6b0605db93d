// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persistence port.
//!
//! The engine writes survival/death/ghost counters and replay records through
//! this trait, fire-and-forget: implementations log their own failures and
//! the engine never observes or retries them. The only ordering contract is
//! that a shard is registered before any of its tick snapshots.

use std::sync::Mutex;

use crate::replay::ReplaySnapshot;
use crate::state::{ShardId, ShardTotals};

/// Abstract sink for leaderboard counters and replay records.
pub trait Persistence: Send + Sync {
    /// Credits a stable-gate exit to `call_sign`.
    fn record_survival(&self, call_sign: &str);
    /// Credits a defragmenter kill against `call_sign`.
    fn record_death(&self, call_sign: &str);
    /// Credits a ghost-gate transfer to `call_sign`.
    fn record_ghost(&self, call_sign: &str);
    /// Registers a shard at creation, ahead of any tick snapshot.
    fn register_replay_shard(&self, shard_id: ShardId);
    /// Records the snapshot closing `tick` for `shard_id`.
    fn record_replay_tick(&self, shard_id: ShardId, tick: u64, snapshot: &ReplaySnapshot);
    /// Closes a shard's replay stream when the shard retires.
    fn finalize_replay_shard(&self, shard_id: ShardId, total_ticks: u64, totals: &ShardTotals);
}

/// Persistence sink that drops everything. Useful in tests and benchmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn record_survival(&self, _call_sign: &str) {}
    fn record_death(&self, _call_sign: &str) {}
    fn record_ghost(&self, _call_sign: &str) {}
    fn register_replay_shard(&self, _shard_id: ShardId) {}
    fn record_replay_tick(&self, _shard_id: ShardId, _tick: u64, _snapshot: &ReplaySnapshot) {}
    fn finalize_replay_shard(&self, _shard_id: ShardId, _total_ticks: u64, _totals: &ShardTotals) {}
}

/// Everything a [`MemoryPersistence`] has recorded so far.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    /// Call signs credited with a survival, in order.
    pub survivals: Vec<String>,
    /// Call signs credited with a death, in order.
    pub deaths: Vec<String>,
    /// Call signs credited with a ghost transfer, in order.
    pub ghosts: Vec<String>,
    /// Shards registered, in order.
    pub registered: Vec<ShardId>,
    /// Tick snapshots, in order.
    pub ticks: Vec<(ShardId, u64, ReplaySnapshot)>,
    /// Finalized shards with their total tick count and counters.
    pub finalized: Vec<(ShardId, u64, ShardTotals)>,
}

/// In-memory persistence sink for tests and inspection.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    log: Mutex<MemoryLog>,
}

impl MemoryPersistence {
    /// A snapshot of everything recorded so far.
    pub fn log(&self) -> MemoryLog {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn with<F: FnOnce(&mut MemoryLog)>(&self, f: F) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
    }
}

impl Persistence for MemoryPersistence {
    fn record_survival(&self, call_sign: &str) {
        self.with(|l| l.survivals.push(call_sign.to_owned()));
    }

    fn record_death(&self, call_sign: &str) {
        self.with(|l| l.deaths.push(call_sign.to_owned()));
    }

    fn record_ghost(&self, call_sign: &str) {
        self.with(|l| l.ghosts.push(call_sign.to_owned()));
    }

    fn register_replay_shard(&self, shard_id: ShardId) {
        self.with(|l| l.registered.push(shard_id));
    }

    fn record_replay_tick(&self, shard_id: ShardId, tick: u64, snapshot: &ReplaySnapshot) {
        self.with(|l| l.ticks.push((shard_id, tick, snapshot.clone())));
    }

    fn finalize_replay_shard(&self, shard_id: ShardId, total_ticks: u64, totals: &ShardTotals) {
        self.with(|l| l.finalized.push((shard_id, total_ticks, *totals)));
    }
}
