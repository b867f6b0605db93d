// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use sector_core::{
    DefraggerState, EngineConfig, MemoryPersistence, NullPersistence, ProcessId, ProcessState,
    SessionToken, ShardId, ShardState, TickEngine, Tile,
};
use uuid::Uuid;

/// Engine over a null sink with the given seed.
pub fn engine(seed: u64) -> TickEngine {
    TickEngine::new(
        Arc::new(NullPersistence),
        EngineConfig {
            seed,
            ..EngineConfig::default()
        },
    )
}

/// Engine over a shared in-memory sink.
pub fn engine_with_memory(seed: u64) -> (TickEngine, Arc<MemoryPersistence>) {
    let persistence = Arc::new(MemoryPersistence::default());
    let engine = TickEngine::new(
        Arc::clone(&persistence) as Arc<dyn sector_core::Persistence>,
        EngineConfig {
            seed,
            ..EngineConfig::default()
        },
    );
    (engine, persistence)
}

/// Deterministic small process id; `pid(n)` sorts by `n`.
pub fn pid(n: u64) -> ProcessId {
    ProcessId(Uuid::from_u64_pair(0, n))
}

pub fn shard_id(n: u64) -> ShardId {
    ShardId(Uuid::from_u64_pair(0, n))
}

pub fn token(n: u64) -> SessionToken {
    SessionToken(Uuid::from_u64_pair(0, n))
}

/// Empty-topology shard: no walls, no gates, defragmenter parked at `defragger`.
pub fn bare_shard(n: u64, defragger: Tile) -> ShardState {
    ShardState::new(
        shard_id(n),
        BTreeMap::new(),
        Vec::new(),
        DefraggerState::new(defragger),
    )
}

/// Registers a process with a one-letter call sign at `pos`.
pub fn place(engine: &mut TickEngine, shard: ShardId, id: ProcessId, sign: &str, pos: Tile) {
    engine.register_process(shard, ProcessState::new(id, sign, pos));
}
