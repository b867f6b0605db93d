// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Derived per-shard views.
//!
//! Processes see a local ASCII grid limited to their adjacency cluster's
//! visibility; spectators get the whole shard. Neither view mutates state —
//! event-queue draining lives on the engine.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::constants::GRID_SIZE;
use crate::geometry::{adjacent_tiles, bfs_path, keypad_digit, passable_step, Tile};
use crate::state::{
    EchoTile, Gate, GateKind, ProcessId, ProcessState, SayEvent, ShardState,
};

/// Visibility radius cap: clusters larger than this see no farther.
const VISIBILITY_DEPTH_CAP: usize = 4;

/// Width of one rendered grid cell, blanks included.
const CELL_WIDTH: usize = 10;

/// One process entry in the spectator snapshot.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SpectatorProcess {
    /// Process id.
    pub id: ProcessId,
    /// Leaderboard identity.
    pub call_sign: String,
    /// Current tile.
    pub pos: Tile,
}

/// Watchdog fields exposed to spectators.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SpectatorWatchdog {
    /// Consecutive quiet ticks.
    pub quiet_ticks: u32,
    /// Countdown to activation.
    pub countdown: u32,
    /// Whether escalation is live.
    pub active: bool,
    /// Escalation table index.
    pub bonus_step: usize,
}

/// Whole-shard snapshot pushed to spectator subscribers each tick.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SpectatorView {
    /// Shard tick.
    pub tick: u64,
    /// Character grid: `.` floor, `S`/`G` gates, `P` process, `D` defragger,
    /// `E` echo tile.
    pub grid: Vec<Vec<char>>,
    /// Defragmenter position.
    pub defragger: Tile,
    /// Current chase target, if any.
    pub defragger_target: Option<ProcessId>,
    /// BFS path preview from the defragmenter to its target, start excluded.
    pub defragger_preview: Vec<Tile>,
    /// Active wall edges, sorted canonically.
    pub walls: Vec<crate::geometry::WallEdge>,
    /// Gates.
    pub gates: Vec<Gate>,
    /// Living processes.
    pub processes: Vec<SpectatorProcess>,
    /// Watchdog fields.
    pub watchdog: SpectatorWatchdog,
    /// Recent SAY traces.
    pub say_events: Vec<SayEvent>,
    /// Active echo tiles.
    pub echo_tiles: Vec<EchoTile>,
}

/// Reflexive-transitive closure of passable adjacency over processes.
///
/// The cluster a process belongs to widens its visibility: each member adds
/// one BFS ring, capped at four.
pub fn adjacent_cluster(shard: &ShardState, process_id: ProcessId) -> Vec<ProcessId> {
    let walls = shard.walls_set();
    let mut cluster: BTreeSet<ProcessId> = BTreeSet::new();
    cluster.insert(process_id);
    loop {
        let mut changed = false;
        for proc in shard.processes.values() {
            if cluster.contains(&proc.id) {
                continue;
            }
            let touches = cluster.iter().any(|member| {
                shard
                    .processes
                    .get(member)
                    .is_some_and(|m| passable_step(proc.pos, m.pos, &walls))
            });
            if touches {
                cluster.insert(proc.id);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    cluster.into_iter().collect()
}

/// Tiles visible to a cluster: multi-source BFS to depth `min(4, |cluster|)`.
pub fn visible_tiles_for_cluster(shard: &ShardState, cluster: &[ProcessId]) -> FxHashSet<Tile> {
    let walls = shard.walls_set();
    let depth_limit = cluster.len().min(VISIBILITY_DEPTH_CAP) as u32;
    let mut dist: FxHashMap<Tile, u32> = FxHashMap::default();
    let mut queue = std::collections::VecDeque::new();
    for pid in cluster {
        if let Some(p) = shard.processes.get(pid) {
            if !dist.contains_key(&p.pos) {
                dist.insert(p.pos, 0);
                queue.push_back(p.pos);
            }
        }
    }
    while let Some(cur) = queue.pop_front() {
        let d = dist.get(&cur).copied().unwrap_or(0);
        if d == depth_limit {
            continue;
        }
        for n in adjacent_tiles(cur, &walls) {
            if !dist.contains_key(&n) {
                dist.insert(n, d + 1);
                queue.push_back(n);
            }
        }
    }
    dist.into_keys().collect()
}

/// Renders the ASCII grid for the process UI.
///
/// Visible tiles render as `[d LABEL]` cells where `d` is the keypad digit
/// relative to the process (space beyond the immediate ring); tiles outside
/// the visibility set render as blank cells. Rows are right-trimmed.
pub fn render_process_grid(shard: &ShardState, proc: &ProcessState) -> String {
    let cluster = adjacent_cluster(shard, proc.id);
    let visible = visible_tiles_for_cluster(shard, &cluster);
    if visible.is_empty() {
        return String::new();
    }
    let min_x = visible.iter().map(|t| t.x).min().unwrap_or(proc.pos.x);
    let max_x = visible.iter().map(|t| t.x).max().unwrap_or(proc.pos.x);
    let min_y = visible.iter().map(|t| t.y).min().unwrap_or(proc.pos.y);
    let max_y = visible.iter().map(|t| t.y).max().unwrap_or(proc.pos.y);

    let mut rows: Vec<String> = Vec::new();
    for y in min_y..=max_y {
        let mut row = String::new();
        for x in min_x..=max_x {
            let tile = Tile::new(x, y);
            if !visible.contains(&tile) {
                row.push_str(&" ".repeat(CELL_WIDTH));
                continue;
            }
            let label = tile_label(shard, proc, tile);
            let digit = keypad_digit(tile.x - proc.pos.x, tile.y - proc.pos.y)
                .map_or(' ', |d| char::from(b'0' + d));
            row.push_str(&format!("[{digit} {label:<5}] "));
        }
        rows.push(row.trim_end().to_owned());
    }
    rows.join("\n")
}

fn tile_label(shard: &ShardState, proc: &ProcessState, tile: Tile) -> &'static str {
    if tile == proc.pos {
        return "SELF";
    }
    if shard.defragger.pos == tile {
        return "DEFRG";
    }
    if shard
        .processes
        .values()
        .any(|p| p.id != proc.id && p.pos == tile)
    {
        return "PROC";
    }
    if shard.gates.iter().any(|g| g.pos == tile) {
        return "GATE";
    }
    ""
}

/// Renders the spectator character grid.
pub fn render_spectator_grid(shard: &ShardState) -> Vec<Vec<char>> {
    let size = GRID_SIZE as usize;
    let mut grid = vec![vec!['.'; size]; size];
    let mut put = |tile: Tile, c: char, only_floor: bool| {
        if let Some(cell) = grid
            .get_mut(tile.y as usize)
            .and_then(|row| row.get_mut(tile.x as usize))
        {
            if !only_floor || *cell == '.' {
                *cell = c;
            }
        }
    };
    for gate in &shard.gates {
        let c = if gate.kind == GateKind::Stable { 'S' } else { 'G' };
        put(gate.pos, c, false);
    }
    for proc in shard.processes.values() {
        put(proc.pos, 'P', false);
    }
    put(shard.defragger.pos, 'D', false);
    for echo in &shard.echo_tiles {
        put(echo.pos, 'E', true);
    }
    grid
}

/// Builds the full spectator snapshot for a shard.
pub fn spectator_view(shard: &ShardState) -> SpectatorView {
    let walls_set = shard.walls_set();
    let mut walls: Vec<crate::geometry::WallEdge> = shard.walls.values().copied().collect();
    walls.sort_unstable();
    let defragger_preview = shard
        .defragger
        .target_id
        .and_then(|id| shard.processes.get(&id))
        .map(|target| {
            bfs_path(shard.defragger.pos, target.pos, &walls_set)
                .into_iter()
                .skip(1)
                .collect()
        })
        .unwrap_or_default();
    SpectatorView {
        tick: shard.tick,
        grid: render_spectator_grid(shard),
        defragger: shard.defragger.pos,
        defragger_target: shard.defragger.target_id,
        defragger_preview,
        walls,
        gates: shard.gates.clone(),
        processes: shard
            .processes
            .values()
            .map(|p| SpectatorProcess {
                id: p.id,
                call_sign: p.call_sign.clone(),
                pos: p.pos,
            })
            .collect(),
        watchdog: SpectatorWatchdog {
            quiet_ticks: shard.watchdog.quiet_ticks,
            countdown: shard.watchdog.countdown,
            active: shard.watchdog.active,
            bonus_step: shard.watchdog.bonus_step,
        },
        say_events: shard.say_events.clone(),
        echo_tiles: shard.echo_tiles.clone(),
    }
}
