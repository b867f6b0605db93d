// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use common::{bare_shard, engine, pid, place, shard_id};
use sector_core::{Command, CommandKind, Tile};

fn buffer(engine: &mut sector_core::TickEngine, id: sector_core::ProcessId, kind: CommandKind, arg: &str) {
    engine.buffer_command(id, Command::new(kind, Some(arg)));
}

#[test]
fn same_destination_collision_cancels_both() {
    let mut engine = engine(1);
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(1, 1));
    place(&mut engine, shard_id(1), pid(2), "B", Tile::new(1, 3));
    // Both target (1,2).
    buffer(&mut engine, pid(1), CommandKind::Move, "8");
    buffer(&mut engine, pid(2), CommandKind::Move, "2");

    let moves = engine.resolve_moves(shard_id(1));
    assert_eq!(moves[&pid(1)], None);
    assert_eq!(moves[&pid(2)], None);
}

#[test]
fn swap_between_adjacent_processes_succeeds() {
    let mut engine = engine(1);
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(1, 1));
    place(&mut engine, shard_id(1), pid(2), "B", Tile::new(2, 1));
    buffer(&mut engine, pid(1), CommandKind::Move, "6");
    buffer(&mut engine, pid(2), CommandKind::Move, "4");

    let moves = engine.resolve_moves(shard_id(1));
    assert_eq!(moves[&pid(1)], Some(Tile::new(2, 1)));
    assert_eq!(moves[&pid(2)], Some(Tile::new(1, 1)));
}

#[test]
fn move_into_idling_occupant_cancels() {
    let mut engine = engine(1);
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(1, 1));
    place(&mut engine, shard_id(1), pid(2), "B", Tile::new(1, 2));
    buffer(&mut engine, pid(1), CommandKind::Move, "8");
    engine.buffer_command(pid(2), Command::idle());

    let moves = engine.resolve_moves(shard_id(1));
    assert_eq!(moves[&pid(1)], None);
}

#[test]
fn three_way_cycle_collapses_to_all_idle() {
    let mut engine = engine(1);
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(1, 1));
    place(&mut engine, shard_id(1), pid(2), "B", Tile::new(2, 1));
    place(&mut engine, shard_id(1), pid(3), "C", Tile::new(2, 2));
    // A -> B's tile, B -> C's tile, C -> A's tile.
    buffer(&mut engine, pid(1), CommandKind::Move, "6");
    buffer(&mut engine, pid(2), CommandKind::Move, "8");
    buffer(&mut engine, pid(3), CommandKind::Move, "1");

    let moves = engine.resolve_moves(shard_id(1));
    assert_eq!(moves[&pid(1)], None);
    assert_eq!(moves[&pid(2)], None);
    assert_eq!(moves[&pid(3)], None);
}

#[test]
fn destination_on_defragmenter_is_forbidden() {
    let mut engine = engine(1);
    engine.insert_shard(bare_shard(1, Tile::new(2, 1)));
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(1, 1));
    buffer(&mut engine, pid(1), CommandKind::Move, "6");

    let moves = engine.resolve_moves(shard_id(1));
    assert_eq!(moves[&pid(1)], None);
}

#[test]
fn applied_swap_moves_both_processes() {
    let mut engine = engine(1);
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(1, 1));
    place(&mut engine, shard_id(1), pid(2), "B", Tile::new(2, 1));
    buffer(&mut engine, pid(1), CommandKind::Move, "6");
    buffer(&mut engine, pid(2), CommandKind::Move, "4");

    engine.tick_once().expect("tick");
    let shard = engine.shard(shard_id(1)).expect("shard");
    assert_eq!(shard.processes[&pid(1)].pos, Tile::new(2, 1));
    assert_eq!(shard.processes[&pid(2)].pos, Tile::new(1, 1));
}

#[test]
fn invalid_digit_and_rest_digit_resolve_to_idle() {
    let mut engine = engine(1);
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(1, 1));

    buffer(&mut engine, pid(1), CommandKind::Move, "x");
    assert_eq!(engine.resolve_moves(shard_id(1))[&pid(1)], None);

    buffer(&mut engine, pid(1), CommandKind::Move, "5");
    assert_eq!(engine.resolve_moves(shard_id(1))[&pid(1)], None);

    buffer(&mut engine, pid(1), CommandKind::Move, "0");
    assert_eq!(engine.resolve_moves(shard_id(1))[&pid(1)], None);
}

#[test]
fn out_of_bounds_move_resolves_to_idle() {
    let mut engine = engine(1);
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(0, 0));
    // North-west from the corner leaves the grid.
    buffer(&mut engine, pid(1), CommandKind::Move, "1");
    assert_eq!(engine.resolve_moves(shard_id(1))[&pid(1)], None);
}
