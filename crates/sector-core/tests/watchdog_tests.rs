// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{bare_shard, pid, place, shard_id};
use sector_core::constants::{FIBONACCI_ESCALATION, QUIET_TICKS_WARNING, WATCHDOG_COUNTDOWN};
use sector_core::{
    Command, CommandKind, EngineConfig, EventKind, NullPersistence, TargetReason, TickEngine, Tile,
};

fn quiet_engine() -> TickEngine {
    // A long retirement window so the empty shard outlives the escalation.
    TickEngine::new(
        Arc::new(NullPersistence),
        EngineConfig {
            seed: 1,
            empty_shard_ticks: 1000,
            ..EngineConfig::default()
        },
    )
}

#[test]
fn quiet_ticks_escalate_to_watchdog_activation() {
    let mut engine = quiet_engine();
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));

    for _ in 0..QUIET_TICKS_WARNING {
        engine.tick_once().expect("tick");
    }
    {
        let wd = &engine.shard(shard_id(1)).expect("shard").watchdog;
        assert_eq!(wd.quiet_ticks, QUIET_TICKS_WARNING);
        assert_eq!(wd.countdown, WATCHDOG_COUNTDOWN);
        assert!(!wd.active);
    }

    for _ in 0..WATCHDOG_COUNTDOWN {
        engine.tick_once().expect("tick");
    }
    {
        let wd = &engine.shard(shard_id(1)).expect("shard").watchdog;
        assert!(wd.active);
        assert_eq!(wd.bonus_step, 0);
    }

    // Each further quiet tick raises the escalation step, clamped to the table.
    engine.tick_once().expect("tick");
    assert_eq!(engine.shard(shard_id(1)).expect("shard").watchdog.bonus_step, 1);
    for _ in 0..20 {
        engine.tick_once().expect("tick");
    }
    assert_eq!(
        engine.shard(shard_id(1)).expect("shard").watchdog.bonus_step,
        FIBONACCI_ESCALATION.len() - 1
    );
}

#[test]
fn active_watchdog_grants_untargeted_bonus_steps() {
    let mut engine = quiet_engine();
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));
    {
        let wd = &mut engine.shard_mut(shard_id(1)).expect("shard").watchdog;
        wd.active = true;
        wd.bonus_step = 3;
    }

    let (target, bonus) = engine.select_defragger_target(shard_id(1));
    assert_eq!(target, None);
    assert_eq!(bonus, FIBONACCI_ESCALATION[3]);
    assert_eq!(
        engine.shard(shard_id(1)).expect("shard").defragger.target_reason,
        TargetReason::Watchdog
    );
}

#[test]
fn broadcast_resets_a_degraded_watchdog_and_announces() {
    let mut engine = quiet_engine();
    engine.insert_shard(bare_shard(1, Tile::new(10, 10)));
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(1, 1));
    {
        let wd = &mut engine.shard_mut(shard_id(1)).expect("shard").watchdog;
        wd.quiet_ticks = QUIET_TICKS_WARNING;
        wd.countdown = 2;
    }

    engine.buffer_command(pid(1), Command::new(CommandKind::Broadcast, Some("here")));

    let shard = engine.shard(shard_id(1)).expect("shard");
    assert_eq!(shard.watchdog.quiet_ticks, 0);
    assert_eq!(shard.watchdog.countdown, 0);
    assert!(shard.watchdog.restored_this_tick);

    let events = engine.pending_events(pid(1)).expect("queue");
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::System && e.message == "[OK]: LIVENESS RESTORED."));
}

#[test]
fn adjacent_process_resets_the_watchdog_each_tick() {
    let mut engine = quiet_engine();
    engine.insert_shard(bare_shard(1, Tile::new(5, 6)));
    // Parked right next to the defragmenter: engagement never goes quiet.
    place(&mut engine, shard_id(1), pid(1), "A", Tile::new(5, 5));

    for _ in 0..3 {
        engine.tick_once().expect("tick");
        let shard = engine.shard(shard_id(1)).expect("shard");
        if shard.processes.is_empty() {
            // The defragmenter may catch the process; engagement counted anyway.
            return;
        }
        assert_eq!(shard.watchdog.quiet_ticks, 0);
    }
}
