// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use common::engine;
use proptest::prelude::*;
use sector_core::constants::{GATE_MIN_CHEBYSHEV, GRID_SIZE};
use sector_core::drift::{drift_gates, drift_walls};
use sector_core::geometry::{exit_count, is_fully_connected};
use sector_core::{GateKind, Prng, Tile};

#[test]
fn wall_drift_preserves_count_connectivity_and_exits() {
    let mut engine = engine(123);
    let shard_id = engine.create_shard().expect("shard");
    let mut shard = engine.shard(shard_id).expect("shard").clone();

    let before = shard.walls.len();
    let mut rng = Prng::from_seed(99);
    drift_walls(&mut shard, &mut rng);

    assert_eq!(shard.walls.len(), before);
    let walls = shard.walls_set();
    assert!(is_fully_connected(&walls));
    for x in 0..GRID_SIZE {
        for y in 0..GRID_SIZE {
            assert!(exit_count(Tile::new(x, y), &walls) > 0);
        }
    }
    // The stable gate kept an exit too.
    let stable = shard.stable_gate().expect("stable gate");
    assert!(exit_count(stable.pos, &walls) > 0);
}

#[test]
fn wall_ids_are_stable_across_drift() {
    let mut engine = engine(5);
    let shard_id = engine.create_shard().expect("shard");
    let mut shard = engine.shard(shard_id).expect("shard").clone();

    let ids_before: Vec<u32> = shard.walls.keys().copied().collect();
    let mut rng = Prng::from_seed(7);
    drift_walls(&mut shard, &mut rng);
    let ids_after: Vec<u32> = shard.walls.keys().copied().collect();
    assert_eq!(ids_before, ids_after);
}

#[test]
fn gate_drift_respects_occupancy_and_spacing() {
    let mut engine = engine(42);
    let shard_id = engine.create_shard().expect("shard");
    let mut shard = engine.shard(shard_id).expect("shard").clone();

    let mut rng = Prng::from_seed(11);
    for _ in 0..25 {
        drift_gates(&mut shard, &mut rng);
        for (i, a) in shard.gates.iter().enumerate() {
            assert!((0..GRID_SIZE).contains(&a.pos.x));
            assert!((0..GRID_SIZE).contains(&a.pos.y));
            for b in shard.gates.iter().skip(i + 1) {
                assert!(
                    a.pos.chebyshev(b.pos) >= GATE_MIN_CHEBYSHEV,
                    "gates too close: {:?} vs {:?}",
                    a.pos,
                    b.pos
                );
            }
        }
        assert_ne!(shard.defragger.pos, shard.gates[0].pos);
    }
}

#[test]
fn generated_shards_have_one_stable_gate_and_some_ghosts() {
    let mut engine = engine(9);
    for _ in 0..5 {
        let shard_id = engine.create_shard().expect("shard");
        let shard = engine.shard(shard_id).expect("shard");
        let stables = shard
            .gates
            .iter()
            .filter(|g| g.kind == GateKind::Stable)
            .count();
        let ghosts = shard
            .gates
            .iter()
            .filter(|g| g.kind == GateKind::Ghost)
            .count();
        assert_eq!(stables, 1);
        assert!((1..=3).contains(&ghosts));
        assert_eq!(shard.walls.len(), 80);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Drift never changes the wall count or breaks connectivity, whatever
    /// the seed.
    #[test]
    fn drift_invariants_hold_for_arbitrary_seeds(seed in 0u64..1_000) {
        let mut engine = engine(seed);
        let shard_id = engine.create_shard().expect("shard");
        let mut shard = engine.shard(shard_id).expect("shard").clone();
        let before = shard.walls.len();

        let mut rng = Prng::from_seed(seed.wrapping_mul(31).wrapping_add(7));
        for _ in 0..3 {
            drift_walls(&mut shard, &mut rng);
            drift_gates(&mut shard, &mut rng);
            prop_assert_eq!(shard.walls.len(), before);
            prop_assert!(is_fully_connected(&shard.walls_set()));
        }
    }
}
