// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-tick wall and gate drift.
//!
//! Drift mutates the topology without ever breaking the shard invariants:
//! the grid stays fully connected, every tile keeps an exit, the stable gate
//! keeps an exit, and the wall count is conserved.

use crate::constants::{GATE_MIN_CHEBYSHEV, GRID_SIZE};
use crate::geometry::{
    adjacent_edge_slots, exit_count, in_bounds, is_fully_connected, orthogonal_neighbors, Tile,
};
use crate::prng::Prng;
use crate::state::ShardState;

/// Moves a subset of walls by one edge slot while preserving constraints.
///
/// Between 10% and 25% of walls are selected each tick; selected ids are
/// applied in ascending order so lower ids win contested slots. A candidate
/// slot that would disconnect the grid, seal a tile, or seal the stable gate
/// is reverted; the wall then stays put for this tick.
pub fn drift_walls(shard: &mut ShardState, rng: &mut Prng) {
    let mut wall_ids: Vec<u32> = shard.walls.keys().copied().collect();
    if wall_ids.is_empty() {
        return;
    }
    let n = wall_ids.len() as i64;
    let min_count = 1.max(n / 10);
    let max_count = 1.max(n / 4);
    let move_count = rng.next_int(min_count, max_count) as usize;
    rng.shuffle(&mut wall_ids);
    let mut selected: Vec<u32> = wall_ids.into_iter().take(move_count).collect();
    selected.sort_unstable();

    for wall_id in selected {
        let Some(&current) = shard.walls.get(&wall_id) else {
            continue;
        };
        let mut candidates = adjacent_edge_slots(current);
        rng.shuffle(&mut candidates);
        let occupied = shard.walls_set();
        let Some(&target) = candidates.iter().find(|c| !occupied.contains(c)) else {
            continue;
        };
        // Tentatively move and validate; revert on any invariant violation.
        shard.walls.insert(wall_id, target);
        if !drift_constraints_ok(shard) {
            shard.walls.insert(wall_id, current);
        }
    }
}

/// Moves gates by one orthogonal tile, respecting occupancy and spacing.
pub fn drift_gates(shard: &mut ShardState, rng: &mut Prng) {
    let mut occupied: Vec<Tile> = shard
        .processes
        .values()
        .map(|p| p.pos)
        .collect();
    occupied.push(shard.defragger.pos);

    for idx in 0..shard.gates.len() {
        let other_gates: Vec<Tile> = shard
            .gates
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != idx)
            .map(|(_, g)| g.pos)
            .collect();
        let mut candidates: Vec<Tile> = orthogonal_neighbors(shard.gates[idx].pos)
            .into_iter()
            .filter(|&t| in_bounds(t))
            .collect();
        rng.shuffle(&mut candidates);
        for tile in candidates {
            if occupied.contains(&tile) || other_gates.contains(&tile) {
                continue;
            }
            if other_gates
                .iter()
                .any(|&g| tile.chebyshev(g) < GATE_MIN_CHEBYSHEV)
            {
                continue;
            }
            shard.gates[idx].pos = tile;
            break;
        }
    }
}

fn drift_constraints_ok(shard: &ShardState) -> bool {
    let walls = shard.walls_set();
    if !is_fully_connected(&walls) {
        return false;
    }
    for x in 0..GRID_SIZE {
        for y in 0..GRID_SIZE {
            if exit_count(Tile::new(x, y), &walls) == 0 {
                return false;
            }
        }
    }
    // The stable gate cannot be sealed off.
    if let Some(stable) = shard.stable_gate() {
        if exit_count(stable.pos, &walls) == 0 {
            return false;
        }
    }
    true
}
