// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! sector-core: deterministic multi-shard grid simulation engine.
//!
//! Each shard is an isolated world of tiles, drifting wall edges, gates, and
//! player processes under pursuit by a defragmenter. [`TickEngine`] advances
//! every shard by discrete ticks; given a fixed seed and the same serialized
//! sequence of external operations, every world transition replays
//! identically. Transport, session handling, and storage live elsewhere —
//! the engine only talks to the outside through the [`Persistence`] port and
//! the view types it renders.

/// Tuning constants.
pub mod constants;
/// Per-tick wall and gate drift.
pub mod drift;
/// Tick engine and command resolution.
pub mod engine;
/// Tile/edge primitives, passability, LOS, and BFS helpers.
pub mod geometry;
/// Persistence port and in-memory implementations.
pub mod persist;
/// Deterministic PRNG.
pub mod prng;
/// Replay snapshots.
pub mod replay;
/// Shard state types.
pub mod state;
/// Process and spectator views.
pub mod view;

pub use engine::{
    Event, EventKind, EngineConfig, EngineError, ProcessView, ShardSummary, TickEngine,
};
pub use geometry::{Tile, WallEdge};
pub use persist::{MemoryPersistence, NullPersistence, Persistence};
pub use prng::Prng;
pub use replay::ReplaySnapshot;
pub use state::{
    Broadcast, Command, CommandKind, DefraggerState, EchoTile, Gate, GateKind, ProcessId,
    ProcessState, SayEvent, SayRecipient, SessionToken, ShardId, ShardState, ShardTotals,
    TargetReason, TickEvents, WatchdogState,
};
pub use view::SpectatorView;
