// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use common::{bare_shard, engine_with_memory, pid, place, shard_id};
use sector_core::{EventKind, TargetReason, Tile};

/// Corner trap: the defragmenter starts with LOS on a cornered process and a
/// distant observer watches the fallout.
fn trap_setup() -> (sector_core::TickEngine, std::sync::Arc<sector_core::MemoryPersistence>) {
    let (mut engine, persistence) = engine_with_memory(1);
    engine.insert_shard(bare_shard(1, Tile::new(0, 1)));
    place(&mut engine, shard_id(1), pid(1), "Prey", Tile::new(0, 0));
    place(&mut engine, shard_id(1), pid(2), "Watcher", Tile::new(15, 4));
    (engine, persistence)
}

#[test]
fn warning_shot_spares_the_target_on_acquisition_tick() {
    let (mut engine, _persistence) = trap_setup();

    engine.tick_once().expect("tick");

    let shard = engine.shard(shard_id(1)).expect("shard");
    // LOS acquired this tick: the lock is set but the prey survives it.
    assert!(shard.processes.contains_key(&pid(1)));
    assert!(shard.processes[&pid(1)].los_lock);
    assert_eq!(shard.defragger.target_id, Some(pid(1)));
    assert_eq!(shard.defragger.target_reason, TargetReason::Los);
    assert_eq!(shard.defragger.target_acquired_tick, Some(1));
}

#[test]
fn locked_target_is_chased_down_and_killed() {
    let (mut engine, persistence) = trap_setup();

    let mut killed_at = None;
    for _ in 0..50 {
        engine.tick_once().expect("tick");
        let shard = engine.shard(shard_id(1)).expect("shard");
        if !shard.processes.contains_key(&pid(1)) {
            killed_at = Some(shard.tick);
            break;
        }
    }
    let killed_at = killed_at.expect("prey caught within 50 ticks");
    assert!(killed_at >= 2, "warning shot must delay the kill");

    assert_eq!(persistence.log().deaths, vec!["Prey".to_owned()]);
    let shard = engine.shard(shard_id(1)).expect("shard");
    assert_eq!(shard.totals.kills, 1);
    // The observer heard the burst and the corruption notice.
    let events = engine.pending_events(pid(2)).expect("queue");
    assert!(events.iter().any(|e| e.kind == EventKind::StaticBurst
        && e.message == "[GLOBAL_ALRT]: ######## STATIC BURST DETECTED ########"));
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::System && e.message == "[WARN]: SECTOR CORRUPTED."));
}

#[test]
fn kill_leaves_an_echo_tile_at_the_death_site() {
    let (mut engine, _persistence) = trap_setup();

    for _ in 0..50 {
        engine.tick_once().expect("tick");
        let shard = engine.shard(shard_id(1)).expect("shard");
        if !shard.processes.contains_key(&pid(1)) {
            let echo = shard.echo_tiles.last().expect("echo marker");
            assert_eq!(echo.pos, Tile::new(0, 0));
            assert_eq!(echo.tick, shard.tick);
            assert!(shard.tick_events.kills.contains(&pid(1)));
            return;
        }
    }
    unreachable!("prey caught within 50 ticks");
}

#[test]
fn locked_targets_rotate_unless_the_previous_one_is_in_close_quarters() {
    let (mut engine, _persistence) = engine_with_memory(3);
    engine.insert_shard(bare_shard(1, Tile::new(5, 5)));
    for (n, pos) in [(1, Tile::new(5, 6)), (2, Tile::new(1, 1))] {
        let mut proc = sector_core::ProcessState::new(pid(n), "X", pos);
        proc.los_lock = true;
        engine.register_process(shard_id(1), proc);
    }
    engine
        .shard_mut(shard_id(1))
        .expect("shard")
        .defragger
        .last_los_target_id = Some(pid(1));

    // Two locked targets and the previous one adjacent: it stays sticky.
    let (target, bonus) = engine.select_defragger_target(shard_id(1));
    assert_eq!(target, Some(pid(1)));
    assert_eq!(bonus, 0);

    // Previous target out of reach: rotation advances past it.
    engine
        .shard_mut(shard_id(1))
        .expect("shard")
        .processes
        .get_mut(&pid(1))
        .expect("proc")
        .pos = Tile::new(15, 18);
    let (target, _bonus) = engine.select_defragger_target(shard_id(1));
    assert_eq!(target, Some(pid(2)));

    // And wraps back around once the rotation is past the last id.
    let (target, _bonus) = engine.select_defragger_target(shard_id(1));
    assert_eq!(target, Some(pid(1)));
}

#[test]
fn patrol_step_stays_on_the_grid() {
    let (mut engine, _persistence) = engine_with_memory(7);
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));

    for _ in 0..20 {
        engine.tick_once().expect("tick");
        let pos = engine.shard(shard_id(1)).expect("shard").defragger.pos;
        assert!((0..20).contains(&pos.x) && (0..20).contains(&pos.y));
    }
}

#[test]
fn spectator_preview_traces_a_path_to_the_target() {
    let (mut engine, _persistence) = trap_setup();
    engine.tick_once().expect("tick");

    let view = engine.render_spectator_view(shard_id(1)).expect("view");
    assert_eq!(view.defragger_target, Some(pid(1)));
    // Path from the defragmenter to the prey, start excluded, goal last.
    let last = view.defragger_preview.last().expect("non-empty preview");
    assert_eq!(*last, Tile::new(0, 0));
    assert!(!view.defragger_preview.contains(&view.defragger));
}
