// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory world state for a single shard.
//!
//! A [`ShardState`] is one isolated deterministic world: walls keyed by a
//! stable id (the id survives drift; the edge it maps to changes), gates,
//! living processes, one defragmenter, the watchdog, and the rolling traces
//! (broadcast inbox, SAY events, echo tiles) the views render from.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Tile, WallEdge};

/// Stable identifier for a wall slot; survives drift while the edge moves.
pub type WallId = u32;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id! {
    /// Strongly typed identifier for a process.
    ///
    /// Ids are drawn from the engine PRNG stream, so ordering-sensitive
    /// tie-breaks (broadcast targeting, LOS round-robin) replay identically
    /// under a fixed seed.
    ProcessId
}

uuid_id! {
    /// Strongly typed identifier for a shard.
    ShardId
}

uuid_id! {
    /// Opaque session token handed to the request layer on join.
    SessionToken
}

/// Command verb submitted by a player.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    /// Single-step move by keypad digit.
    Move,
    /// Sprint: up to three steps, 1-tick cooldown, breaks LOS lock.
    Buffer,
    /// Shard-wide message; applied immediately at submit, never buffered.
    Broadcast,
    /// Do nothing.
    Idle,
    /// Local chat to adjacent processes; applied immediately at submit.
    Say,
}

/// A submitted command. `arg` is a keypad digit for `Move`/`Buffer` and the
/// message text for `Broadcast`/`Say`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Command {
    /// Command verb.
    pub kind: CommandKind,
    /// Verb-specific argument, if any.
    pub arg: Option<String>,
}

impl Command {
    /// Convenience constructor.
    pub fn new(kind: CommandKind, arg: Option<&str>) -> Self {
        Self {
            kind,
            arg: arg.map(str::to_owned),
        }
    }

    /// The idle command.
    pub fn idle() -> Self {
        Self {
            kind: CommandKind::Idle,
            arg: None,
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::idle()
    }
}

/// Gate flavor: what standing on the gate does to a process.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    /// Exit the simulation alive (survival).
    Stable,
    /// Transfer identity to another shard.
    Ghost,
}

/// A tile-occupying world exit.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Gate {
    /// Gate flavor.
    pub kind: GateKind,
    /// Current position; drifts by one tile per tick at most.
    pub pos: Tile,
}

/// A player-controlled process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessState {
    /// Stable id for this incarnation (ghost transfer mints a new one).
    pub id: ProcessId,
    /// Leaderboard identity; survives ghost transfer.
    pub call_sign: String,
    /// Current tile.
    pub pos: Tile,
    /// Most recent non-immediate command; persists until overwritten.
    pub buffered: Command,
    /// Cleared on kill just before removal.
    pub alive: bool,
    /// Set when the defragmenter acquires LOS; cleared only by a sprint.
    pub los_lock: bool,
    /// Tick of the last successful sprint, for the cooldown check.
    pub last_sprint_tick: Option<u64>,
    /// Arrival number within the shard, assigned at registration.
    ///
    /// Iterations without a specified comparator run in arrival order, the
    /// way an insertion-ordered process table would.
    pub spawn_seq: u64,
}

impl ProcessState {
    /// Fresh process at `pos`.
    pub fn new(id: ProcessId, call_sign: impl Into<String>, pos: Tile) -> Self {
        Self {
            id,
            call_sign: call_sign.into(),
            pos,
            buffered: Command::idle(),
            alive: true,
            los_lock: false,
            last_sprint_tick: None,
            spawn_seq: 0,
        }
    }
}

/// One entry in the shard's current-tick broadcast inbox.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Broadcast {
    /// Sender.
    pub process_id: ProcessId,
    /// Message text (already truncated at submit).
    pub message: String,
    /// Wall-clock submit time in milliseconds.
    pub timestamp_ms: i64,
}

/// A recipient of a SAY event, in keypad-spatial order.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SayRecipient {
    /// Recipient process.
    pub process_id: ProcessId,
    /// Recipient position at delivery time.
    pub pos: Tile,
}

/// Trace of one local-chat delivery, retained briefly for spectators.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SayEvent {
    /// Sender process.
    pub sender_id: ProcessId,
    /// Sender position at delivery time.
    pub sender_pos: Tile,
    /// Message text.
    pub message: String,
    /// Recipients in keypad-spatial order.
    pub recipients: Vec<SayRecipient>,
    /// Wall-clock submit time in milliseconds.
    pub timestamp_ms: i64,
    /// Shard tick at delivery.
    pub tick: u64,
}

/// Transient marker left where a process was killed.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EchoTile {
    /// Death tile.
    pub pos: Tile,
    /// Tick the kill happened.
    pub tick: u64,
}

/// Why the defragmenter is (or is not) chasing a target.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetReason {
    /// A broadcast painted the target this tick.
    Broadcast,
    /// Line-of-sight lock.
    Los,
    /// No target; watchdog bonus steps active.
    Watchdog,
    /// No target; random patrol.
    Patrol,
}

/// The pursuing adversary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefraggerState {
    /// Current tile.
    pub pos: Tile,
    /// Current chase target, if any.
    pub target_id: Option<ProcessId>,
    /// Why the current target (or lack of one) was selected.
    pub target_reason: TargetReason,
    /// Last LOS target, for round-robin rotation across locked processes.
    pub last_los_target_id: Option<ProcessId>,
    /// Tick the current LOS target was first acquired (warning-shot window).
    pub target_acquired_tick: Option<u64>,
}

impl DefraggerState {
    /// Idle defragmenter at `pos`.
    pub fn new(pos: Tile) -> Self {
        Self {
            pos,
            target_id: None,
            target_reason: TargetReason::Patrol,
            last_los_target_id: None,
            target_acquired_tick: None,
        }
    }
}

/// Anti-deadlock escalation tracker.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct WatchdogState {
    /// Consecutive ticks without engagement.
    pub quiet_ticks: u32,
    /// Ticks left until activation once degraded.
    pub countdown: u32,
    /// Whether escalation is live.
    pub active: bool,
    /// Index into the escalation table while active.
    pub bonus_step: usize,
    /// Set when a liveness reset happened this tick (skips advancement).
    pub restored_this_tick: bool,
}

impl WatchdogState {
    /// Whether the watchdog has left its quiescent state.
    pub fn degraded(&self) -> bool {
        self.quiet_ticks >= crate::constants::QUIET_TICKS_WARNING || self.countdown > 0 || self.active
    }
}

/// Per-tick lifecycle events, reset at the top of every tick.
#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TickEvents {
    /// Processes killed by the defragmenter this tick.
    pub kills: Vec<ProcessId>,
    /// Processes that exited through the stable gate this tick.
    pub survivals: Vec<ProcessId>,
    /// Processes transferred through a ghost gate this tick.
    pub ghosts: Vec<ProcessId>,
    /// Processes spawned since the previous tick.
    pub spawns: Vec<ProcessId>,
}

/// Cumulative per-shard counters, reported when the shard retires.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ShardTotals {
    /// Processes ever spawned into this shard.
    pub processes: u64,
    /// Defragmenter kills.
    pub kills: u64,
    /// Stable-gate exits.
    pub survivals: u64,
    /// Ghost-gate transfers out.
    pub ghosts: u64,
}

/// One isolated deterministic world.
#[derive(Clone, Debug)]
pub struct ShardState {
    /// Shard id.
    pub id: ShardId,
    /// Active walls keyed by stable id; ids persist across drift.
    pub walls: BTreeMap<WallId, WallEdge>,
    /// Gates (exactly one stable, 1–3 ghost).
    pub gates: Vec<Gate>,
    /// Living processes, iterated in id order.
    pub processes: BTreeMap<ProcessId, ProcessState>,
    /// The adversary.
    pub defragger: DefraggerState,
    /// Current-tick broadcast inbox; cleared at end of tick.
    pub broadcasts: Vec<Broadcast>,
    /// Rolling SAY trace for spectators.
    pub say_events: Vec<SayEvent>,
    /// Rolling kill markers for spectators.
    pub echo_tiles: Vec<EchoTile>,
    /// Lifecycle events of the current tick.
    pub tick_events: TickEvents,
    /// Joins/transfers since the previous tick, surfaced as next-tick spawns.
    pub pending_spawns: Vec<ProcessId>,
    /// Tick counter, starts at 0 and increments at the top of each tick.
    pub tick: u64,
    /// Consecutive ticks below the population floor.
    pub empty_ticks: u32,
    /// Cumulative counters.
    pub totals: ShardTotals,
    /// Remaining noise substitutions in the current chat-artifact burst.
    pub noise_burst_remaining: u32,
    /// Next arrival number handed out to a registering process.
    pub next_spawn_seq: u64,
    /// Escalation tracker.
    pub watchdog: WatchdogState,
}

impl ShardState {
    /// Fresh shard with the given topology and adversary start.
    pub fn new(
        id: ShardId,
        walls: BTreeMap<WallId, WallEdge>,
        gates: Vec<Gate>,
        defragger: DefraggerState,
    ) -> Self {
        Self {
            id,
            walls,
            gates,
            processes: BTreeMap::new(),
            defragger,
            broadcasts: Vec::new(),
            say_events: Vec::new(),
            echo_tiles: Vec::new(),
            tick_events: TickEvents::default(),
            pending_spawns: Vec::new(),
            tick: 0,
            empty_ticks: 0,
            totals: ShardTotals::default(),
            noise_burst_remaining: 0,
            next_spawn_seq: 0,
            watchdog: WatchdogState::default(),
        }
    }

    /// Living process ids in arrival order (spawn sequence, id as tie-break).
    pub fn roster(&self) -> Vec<ProcessId> {
        let mut ids: Vec<(u64, ProcessId)> = self
            .processes
            .values()
            .map(|p| (p.spawn_seq, p.id))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// The active wall set as a hash set for geometry queries.
    pub fn walls_set(&self) -> FxHashSet<WallEdge> {
        self.walls.values().copied().collect()
    }

    /// The stable gate, if present (always present in engine-built shards).
    pub fn stable_gate(&self) -> Option<&Gate> {
        self.gates.iter().find(|g| g.kind == GateKind::Stable)
    }

    /// Living process occupying `tile`, if any.
    pub fn process_at(&self, tile: Tile) -> Option<&ProcessState> {
        self.processes.values().find(|p| p.alive && p.pos == tile)
    }
}
