// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-tick replay snapshots.
//!
//! A [`ReplaySnapshot`] is the full serializable record of one shard at the
//! end of one tick, handed to the persistence port. Decoding and re-encoding
//! a snapshot is lossless (JSON-equivalent round-trip).

use serde::{Deserialize, Serialize};

use crate::constants::GRID_SIZE;
use crate::geometry::Tile;
use crate::state::{
    Broadcast, CommandKind, EchoTile, GateKind, ProcessId, SayEvent, ShardId, ShardState,
    TargetReason, TickEvents,
};

/// Gate entry in a replay snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ReplayGate {
    /// Gate position.
    pub pos: Tile,
    /// Gate flavor.
    #[serde(rename = "type")]
    pub kind: GateKind,
}

/// Process entry in a replay snapshot.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ReplayProcess {
    /// Process id.
    pub id: ProcessId,
    /// Leaderboard identity.
    pub call_sign: String,
    /// Position at end of tick.
    pub pos: Tile,
    /// Liveness flag.
    pub alive: bool,
    /// Buffered command verb.
    pub buffered_cmd: CommandKind,
    /// Buffered command argument.
    pub buffered_arg: Option<String>,
    /// Whether the defragmenter holds an LOS lock on this process.
    pub los_lock: bool,
    /// Tick of the last successful sprint.
    pub last_sprint_tick: Option<u64>,
}

/// Defragmenter entry in a replay snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ReplayDefragger {
    /// Position at end of tick.
    pub pos: Tile,
    /// Current chase target.
    pub target_id: Option<ProcessId>,
    /// Targeting rationale.
    pub target_reason: TargetReason,
}

/// Watchdog entry in a replay snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ReplayWatchdog {
    /// Consecutive quiet ticks.
    pub quiet_ticks: u32,
    /// Countdown to activation.
    pub countdown: u32,
    /// Whether escalation is live.
    pub active: bool,
    /// Escalation table index.
    pub bonus_step: usize,
}

/// Full per-tick record of one shard.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    /// Shard id.
    pub shard_id: ShardId,
    /// Tick this snapshot closes.
    pub tick: u64,
    /// Grid side length.
    pub grid_size: i32,
    /// Wall edges as `[ax, ay, bx, by]` tile pairs, in stable-id order.
    pub walls: Vec<[i32; 4]>,
    /// Gates.
    pub gates: Vec<ReplayGate>,
    /// Processes, in id order.
    pub processes: Vec<ReplayProcess>,
    /// Adversary.
    pub defragger: ReplayDefragger,
    /// Watchdog fields.
    pub watchdog: ReplayWatchdog,
    /// Broadcast inbox as of this tick (snapshotted before clearing).
    pub broadcasts: Vec<Broadcast>,
    /// Rolling SAY trace.
    pub say_events: Vec<SayEvent>,
    /// Active echo tiles.
    pub echo_tiles: Vec<EchoTile>,
    /// Lifecycle events of this tick.
    pub events: TickEvents,
}

impl ReplaySnapshot {
    /// Captures a shard at the end of a tick.
    pub fn capture(shard: &ShardState) -> Self {
        Self {
            shard_id: shard.id,
            tick: shard.tick,
            grid_size: GRID_SIZE,
            walls: shard
                .walls
                .values()
                .map(|w| [w.a.x, w.a.y, w.b.x, w.b.y])
                .collect(),
            gates: shard
                .gates
                .iter()
                .map(|g| ReplayGate {
                    pos: g.pos,
                    kind: g.kind,
                })
                .collect(),
            processes: shard
                .processes
                .values()
                .map(|p| ReplayProcess {
                    id: p.id,
                    call_sign: p.call_sign.clone(),
                    pos: p.pos,
                    alive: p.alive,
                    buffered_cmd: p.buffered.kind,
                    buffered_arg: p.buffered.arg.clone(),
                    los_lock: p.los_lock,
                    last_sprint_tick: p.last_sprint_tick,
                })
                .collect(),
            defragger: ReplayDefragger {
                pos: shard.defragger.pos,
                target_id: shard.defragger.target_id,
                target_reason: shard.defragger.target_reason,
            },
            watchdog: ReplayWatchdog {
                quiet_ticks: shard.watchdog.quiet_ticks,
                countdown: shard.watchdog.countdown,
                active: shard.watchdog.active,
                bonus_step: shard.watchdog.bonus_step,
            },
            broadcasts: shard.broadcasts.clone(),
            say_events: shard.say_events.clone(),
            echo_tiles: shard.echo_tiles.clone(),
            events: shard.tick_events.clone(),
        }
    }
}
