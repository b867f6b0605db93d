// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Authoritative tick engine managing multiple shards.
//!
//! All world mutation funnels through [`TickEngine`]: the request layer calls
//! [`TickEngine::join_process`] / [`TickEngine::buffer_command`], the driver
//! calls [`TickEngine::tick_once`], and every call is expected to run under
//! one process-wide exclusive lock owned by the host. Per-tick resolution is
//! infallible by design; only construction-time failures (wall generation,
//! tile placement) surface as [`EngineError`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::constants::{
    CHAT_ARTIFACTS, CHAT_ARTIFACT_BURST_MAX, CHAT_ARTIFACT_PROB, DEFRAGGER_WANDER_PROB,
    EMPTY_TILE_MAX_ATTEMPTS, FIBONACCI_ESCALATION, GATE_MIN_CHEBYSHEV, GRID_SIZE,
    INITIAL_WALL_COUNT, MAX_PROCESSES_PER_SHARD, MESSAGE_MAX_LEN, QUIET_TICKS_WARNING,
    SAY_EVENT_TTL_TICKS, SPRINT_COOLDOWN_TICKS, SPRINT_MAX_STEPS, WALL_GEN_ATTEMPTS,
    WALL_GEN_FALLBACK_ATTEMPTS, WALL_GEN_FALLBACK_STEP, WATCHDOG_COUNTDOWN, ECHO_TTL_TICKS,
};
use crate::drift::{drift_gates, drift_walls};
use crate::geometry::{
    adjacent_tiles, distance_map, edge_slots, exit_count, in_bounds, is_fully_connected,
    keypad_offset, los_clear, neighbors_8, passable_step, Tile, WallEdge,
};
use crate::persist::Persistence;
use crate::prng::Prng;
use crate::replay::ReplaySnapshot;
use crate::state::{
    Broadcast, Command, CommandKind, DefraggerState, EchoTile, Gate, GateKind, ProcessId,
    ProcessState, SayEvent, SayRecipient, SessionToken, ShardId, ShardState, TargetReason,
    TickEvents, WallId, WatchdogState,
};
use crate::view::{render_process_grid, spectator_view, SpectatorView};

/// Call-sign word lists. Flavor beyond this lives in the persistence layer.
const CALL_SIGN_ADJECTIVES: [&str; 5] = ["Static", "Ghost", "Null", "Cache", "Wired"];
const CALL_SIGN_NOUNS: [&str; 5] = ["Runner", "Process", "Echo", "Trace", "Fork"];

/// Category of a player-visible event.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Shard-wide broadcast delivery.
    Broadcast,
    /// Local chat delivery.
    Local,
    /// Chat-artifact noise substitution.
    Noise,
    /// Kill announcement.
    StaticBurst,
    /// Engine/watchdog system message.
    System,
}

/// A queued player-visible event, drained by [`TickEngine::render_process_view`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Event category.
    pub kind: EventKind,
    /// Rendered message text.
    pub message: String,
    /// Wall-clock emit time in milliseconds.
    pub timestamp_ms: i64,
}

/// Why a liveness reset fired (watchdog bookkeeping).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LivenessReason {
    /// A process broadcast this tick.
    Broadcast,
    /// The defragmenter killed a process.
    Kill,
    /// A process started its tick adjacent to the defragmenter.
    Adjacent,
    /// The defragmenter acquired line of sight.
    Los,
}

/// Construction-time failures. Per-tick resolution never fails.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No valid wall layout found even after all fallback levels.
    #[error("no valid wall layout after fallback")]
    WallGeneration,
    /// Random tile placement exhausted its attempt budget.
    #[error("no empty tile found after {0} attempts")]
    NoEmptyTile(usize),
}

/// Engine construction parameters.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// PRNG seed; fixes every draw the engine makes.
    pub seed: u64,
    /// Population floor below which a shard starts counting empty ticks.
    pub min_active_processes: usize,
    /// Consecutive below-floor ticks before a shard retires.
    pub empty_shard_ticks: u32,
    /// Global process cap across all shards; `None` means unlimited.
    pub max_total_processes: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            min_active_processes: 1,
            empty_shard_ticks: 12,
            max_total_processes: None,
        }
    }
}

/// One row of the shard listing exposed to the request layer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ShardSummary {
    /// Shard id.
    pub shard_id: ShardId,
    /// Current population.
    pub process_count: usize,
    /// Current tick.
    pub tick: u64,
}

/// Snapshot returned to a process, with its event queue drained.
#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ProcessView {
    /// Shard tick at render time.
    pub tick: u64,
    /// ASCII grid centered on the process's visibility cluster.
    pub grid: String,
    /// Queued events, oldest first. Drained by the read.
    pub events: Vec<Event>,
}

/// Authoritative multi-shard tick engine.
pub struct TickEngine {
    persistence: Arc<dyn Persistence>,
    rng: Prng,
    min_active_processes: usize,
    empty_shard_ticks: u32,
    max_total_processes: Option<usize>,
    shards: BTreeMap<ShardId, ShardState>,
    /// Creation order; ticks and capacity scans walk shards in this order.
    shard_order: Vec<ShardId>,
    process_index: FxHashMap<ProcessId, ShardId>,
    session_tokens: FxHashMap<SessionToken, (ProcessId, i64)>,
    process_events: FxHashMap<ProcessId, Vec<Event>>,
}

impl TickEngine {
    /// Constructs an engine over the given persistence sink.
    pub fn new(persistence: Arc<dyn Persistence>, config: EngineConfig) -> Self {
        Self {
            persistence,
            rng: Prng::from_seed(config.seed),
            min_active_processes: config.min_active_processes,
            empty_shard_ticks: config.empty_shard_ticks,
            max_total_processes: config.max_total_processes,
            shards: BTreeMap::new(),
            shard_order: Vec::new(),
            process_index: FxHashMap::default(),
            session_tokens: FxHashMap::default(),
            process_events: FxHashMap::default(),
        }
    }

    // ── Shard lifecycle ─────────────────────────────────────────────

    /// Creates and registers a new shard with walls, gates, and a defragmenter.
    pub fn create_shard(&mut self) -> Result<ShardId, EngineError> {
        let id = ShardId(self.next_uuid());
        let walls = self.generate_walls()?;
        let gates = self.generate_gates()?;
        let gate_tiles: Vec<Tile> = gates.iter().map(|g| g.pos).collect();
        let defragger_pos = self.random_empty_tile(&[], &gate_tiles)?;
        let shard = ShardState::new(id, walls, gates, DefraggerState::new(defragger_pos));
        self.persistence.register_replay_shard(id);
        info!(shard = %id, "shard created");
        self.shards.insert(id, shard);
        self.shard_order.push(id);
        Ok(id)
    }

    /// Inserts a pre-built shard. Primarily for tests and tooling.
    pub fn insert_shard(&mut self, shard: ShardState) {
        self.persistence.register_replay_shard(shard.id);
        if !self.shard_order.contains(&shard.id) {
            self.shard_order.push(shard.id);
        }
        self.shards.insert(shard.id, shard);
    }

    /// Ids of all live shards, in creation order.
    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.shard_order.clone()
    }

    /// Borrows a shard.
    pub fn shard(&self, id: ShardId) -> Option<&ShardState> {
        self.shards.get(&id)
    }

    /// Mutably borrows a shard. The caller owns invariant preservation.
    pub fn shard_mut(&mut self, id: ShardId) -> Option<&mut ShardState> {
        self.shards.get_mut(&id)
    }

    /// Shard summaries for the request layer, in creation order.
    pub fn list_shards(&self) -> Vec<ShardSummary> {
        self.shard_order
            .iter()
            .filter_map(|id| self.shards.get(id))
            .map(|s| ShardSummary {
                shard_id: s.id,
                process_count: s.processes.len(),
                tick: s.tick,
            })
            .collect()
    }

    /// The shard currently hosting `process_id`.
    pub fn process_shard(&self, process_id: ProcessId) -> Option<ShardId> {
        self.process_index.get(&process_id).copied()
    }

    /// Total living processes across all shards.
    pub fn total_processes(&self) -> usize {
        self.shards.values().map(|s| s.processes.len()).sum()
    }

    // ── Join / session tokens ───────────────────────────────────────

    /// Spawns a new process into the least-populated shard with capacity.
    ///
    /// Returns `None` when the global process cap is reached.
    pub fn join_process(&mut self) -> Result<Option<(SessionToken, ProcessId)>, EngineError> {
        if let Some(cap) = self.max_total_processes {
            if self.total_processes() >= cap {
                return Ok(None);
            }
        }
        let shard_id = self.find_or_create_shard()?;
        let process_id = ProcessId(self.next_uuid());
        let call_sign = self.random_call_sign();
        let (occupied, forbidden) = self
            .shards
            .get(&shard_id)
            .map(placement_sets)
            .unwrap_or_default();
        let pos = self.random_empty_tile(&occupied, &forbidden)?;
        let proc = ProcessState::new(process_id, call_sign, pos);
        if let Some(shard) = self.shards.get_mut(&shard_id) {
            register_spawn(shard, proc);
        }
        self.process_index.insert(process_id, shard_id);
        self.process_events.insert(process_id, Vec::new());
        let token = SessionToken(self.next_uuid());
        self.session_tokens.insert(token, (process_id, now_secs()));
        Ok(Some((token, process_id)))
    }

    /// Registers an existing process into a shard. Primarily for tests.
    pub fn register_process(&mut self, shard_id: ShardId, proc: ProcessState) {
        let process_id = proc.id;
        if let Some(shard) = self.shards.get_mut(&shard_id) {
            register_spawn(shard, proc);
        }
        self.process_index.insert(process_id, shard_id);
        self.process_events.entry(process_id).or_default();
    }

    /// Resolves a session token to its process id, expiring stale tokens.
    pub fn resolve_token(
        &mut self,
        token: SessionToken,
        ttl_seconds: Option<u64>,
    ) -> Option<ProcessId> {
        let (process_id, issued_at) = *self.session_tokens.get(&token)?;
        if let Some(ttl) = ttl_seconds.filter(|t| *t > 0) {
            if now_secs() - issued_at > ttl as i64 {
                self.session_tokens.remove(&token);
                return None;
            }
        }
        Some(process_id)
    }

    /// Seeds a session token directly. Primarily for tests.
    pub fn insert_session_token(&mut self, token: SessionToken, pid: ProcessId, issued_at: i64) {
        self.session_tokens.insert(token, (pid, issued_at));
    }

    /// Current token entry, if the token is known.
    pub fn token_entry(&self, token: SessionToken) -> Option<(ProcessId, i64)> {
        self.session_tokens.get(&token).copied()
    }

    // ── Command intake ──────────────────────────────────────────────

    /// Buffers the last valid command for a process.
    ///
    /// BROADCAST and SAY apply immediately and are never buffered; everything
    /// else overwrites `buffered`. Unknown or dead processes are a no-op.
    pub fn buffer_command(&mut self, process_id: ProcessId, cmd: Command) {
        let Some(&shard_id) = self.process_index.get(&process_id) else {
            return;
        };
        let Some(mut shard) = self.shards.remove(&shard_id) else {
            return;
        };
        if shard.processes.get(&process_id).is_some_and(|p| p.alive) {
            match cmd.kind {
                CommandKind::Broadcast => {
                    if let Some(arg) = cmd.arg.as_deref() {
                        let message: String = arg.chars().take(MESSAGE_MAX_LEN).collect();
                        self.handle_broadcast(&mut shard, process_id, message);
                    }
                }
                CommandKind::Say => {
                    if let Some(arg) = cmd.arg.as_deref() {
                        let message: String = arg.chars().take(MESSAGE_MAX_LEN).collect();
                        self.handle_local_chat(&mut shard, process_id, message);
                    }
                }
                CommandKind::Move | CommandKind::Buffer | CommandKind::Idle => {
                    if let Some(proc) = shard.processes.get_mut(&process_id) {
                        proc.buffered = cmd;
                    }
                }
            }
        }
        self.shards.insert(shard_id, shard);
    }

    // ── Tick driver entry point ─────────────────────────────────────

    /// Advances all shards by a single tick, in shard creation order.
    ///
    /// Shards created mid-tick (ghost transfers) join from the next tick on.
    pub fn tick_once(&mut self) -> Result<(), EngineError> {
        let ids = self.shard_order.clone();
        for id in ids {
            let Some(mut shard) = self.shards.remove(&id) else {
                continue;
            };
            match self.tick_shard(&mut shard) {
                Ok(true) => {
                    self.persistence
                        .finalize_replay_shard(shard.id, shard.tick, &shard.totals);
                    self.shard_order.retain(|s| *s != id);
                    info!(shard = %shard.id, ticks = shard.tick, "shard retired");
                }
                Ok(false) => {
                    self.shards.insert(id, shard);
                }
                Err(err) => {
                    self.shards.insert(id, shard);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn tick_shard(&mut self, shard: &mut ShardState) -> Result<bool, EngineError> {
        shard.tick += 1;
        shard.tick_events = TickEvents {
            spawns: std::mem::take(&mut shard.pending_spawns),
            ..TickEvents::default()
        };

        // Engagement at the top of the tick counts as liveness.
        let walls = shard.walls_set();
        if shard
            .processes
            .values()
            .any(|p| p.alive && passable_step(p.pos, shard.defragger.pos, &walls))
        {
            self.reset_watchdog(shard, LivenessReason::Adjacent);
        }

        // Process intents resolve against pre-drift topology.
        let moves = self.resolve_process_actions_inner(shard);
        apply_process_moves(shard, &moves);

        self.resolve_gate_interactions_inner(shard)?;

        drift_walls(shard, &mut self.rng);
        drift_gates(shard, &mut self.rng);

        self.resolve_defragger(shard);
        self.advance_watchdog(shard);

        let tick = shard.tick;
        shard
            .say_events
            .retain(|ev| tick - ev.tick <= SAY_EVENT_TTL_TICKS - 1);
        shard
            .echo_tiles
            .retain(|echo| tick - echo.tick <= ECHO_TTL_TICKS - 1);

        let snapshot = ReplaySnapshot::capture(shard);
        self.persistence
            .record_replay_tick(shard.id, shard.tick, &snapshot);
        shard.broadcasts.clear();
        shard.watchdog.restored_this_tick = false;

        if shard.processes.len() < self.min_active_processes {
            shard.empty_ticks += 1;
        } else {
            shard.empty_ticks = 0;
        }
        if shard.empty_ticks >= self.empty_shard_ticks {
            for pid in shard.roster() {
                self.remove_process(shard, pid, false);
            }
            return Ok(true);
        }
        Ok(false)
    }

    // ── Views ───────────────────────────────────────────────────────

    /// Renders the process-visible snapshot, draining its event queue.
    ///
    /// Unknown or dead processes get an empty snapshot.
    pub fn render_process_view(&mut self, process_id: ProcessId) -> ProcessView {
        let Some(&shard_id) = self.process_index.get(&process_id) else {
            return ProcessView::default();
        };
        let Some(shard) = self.shards.get(&shard_id) else {
            return ProcessView::default();
        };
        let Some(proc) = shard.processes.get(&process_id) else {
            return ProcessView::default();
        };
        let events = self
            .process_events
            .get_mut(&process_id)
            .map(std::mem::take)
            .unwrap_or_default();
        ProcessView {
            tick: shard.tick,
            grid: render_process_grid(shard, proc),
            events,
        }
    }

    /// Renders the spectator snapshot for a shard.
    pub fn render_spectator_view(&self, shard_id: ShardId) -> Option<SpectatorView> {
        self.shards.get(&shard_id).map(spectator_view)
    }

    /// Queued events for a process, without draining. Primarily for tests.
    pub fn pending_events(&self, process_id: ProcessId) -> Option<&[Event]> {
        self.process_events.get(&process_id).map(Vec::as_slice)
    }

    // ── Test-visible resolution wrappers ────────────────────────────

    /// Resolves this tick's movement intents without applying them.
    pub fn resolve_moves(&mut self, shard_id: ShardId) -> BTreeMap<ProcessId, Option<Tile>> {
        let Some(shard) = self.shards.remove(&shard_id) else {
            return BTreeMap::new();
        };
        let moves = self.resolve_process_actions_inner(&shard);
        self.shards.insert(shard_id, shard);
        moves
    }

    /// Resolves gate interactions for a shard outside of a full tick.
    pub fn resolve_gates(&mut self, shard_id: ShardId) -> Result<(), EngineError> {
        let Some(mut shard) = self.shards.remove(&shard_id) else {
            return Ok(());
        };
        let result = self.resolve_gate_interactions_inner(&mut shard);
        self.shards.insert(shard_id, shard);
        result
    }

    /// Runs defragmenter target selection for a shard.
    pub fn select_defragger_target(&mut self, shard_id: ShardId) -> (Option<ProcessId>, u32) {
        let Some(mut shard) = self.shards.remove(&shard_id) else {
            return (None, 0);
        };
        let selected = self.select_defragger_target_inner(&mut shard);
        self.shards.insert(shard_id, shard);
        selected
    }

    /// Maps a process's buffered command to its candidate destination.
    pub fn intent_destination(&mut self, shard_id: ShardId, process_id: ProcessId) -> Option<Tile> {
        let shard = self.shards.remove(&shard_id)?;
        let walls = shard.walls_set();
        let dest = shard
            .processes
            .get(&process_id)
            .and_then(|proc| self.intent_to_destination(&shard, &walls, proc));
        self.shards.insert(shard_id, shard);
        dest
    }

    // ── Movement resolution ─────────────────────────────────────────

    fn resolve_process_actions_inner(
        &mut self,
        shard: &ShardState,
    ) -> BTreeMap<ProcessId, Option<Tile>> {
        let walls = shard.walls_set();
        let mut moves: BTreeMap<ProcessId, Option<Tile>> = BTreeMap::new();
        // Arrival order: sprint draws consume the stream the way an
        // insertion-ordered process table would.
        for pid in shard.roster() {
            let Some(proc) = shard.processes.get(&pid) else {
                continue;
            };
            let dest = if proc.alive {
                self.intent_to_destination(shard, &walls, proc)
            } else {
                None
            };
            moves.insert(pid, dest);
        }

        // The defragmenter's tile is never a legal destination.
        for dest in moves.values_mut() {
            if *dest == Some(shard.defragger.pos) {
                *dest = None;
            }
        }

        // Contested destinations cancel for every claimant.
        let mut claims: FxHashMap<Tile, u32> = FxHashMap::default();
        for dest in moves.values().flatten() {
            *claims.entry(*dest).or_insert(0) += 1;
        }
        for dest in moves.values_mut() {
            if dest.is_some_and(|d| claims.get(&d).copied().unwrap_or(0) > 1) {
                *dest = None;
            }
        }

        // Occupied destinations are traversable only as a mutual exchange;
        // everything else cancels at the iterated fixed point (a three-way
        // cycle collapses to all-idle).
        loop {
            let mut changed = false;
            let snapshot = moves.clone();
            for (pid, dest) in &mut moves {
                let Some(d) = *dest else { continue };
                let Some(occupant_id) = shard.process_at(d).map(|p| p.id) else {
                    continue;
                };
                if occupant_id == *pid {
                    *dest = None;
                    changed = true;
                    continue;
                }
                let claimant_pos = shard.processes.get(pid).map(|p| p.pos);
                let occupant_dest = snapshot.get(&occupant_id).copied().flatten();
                if occupant_dest != claimant_pos {
                    *dest = None;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        moves
    }

    fn intent_to_destination(
        &mut self,
        shard: &ShardState,
        walls: &FxHashSet<WallEdge>,
        proc: &ProcessState,
    ) -> Option<Tile> {
        let cmd = &proc.buffered;
        match cmd.kind {
            CommandKind::Idle | CommandKind::Broadcast | CommandKind::Say => return None,
            CommandKind::Move | CommandKind::Buffer => {}
        }
        let digit: u8 = cmd.arg.as_deref()?.parse().ok()?;
        let (dx, dy) = keypad_offset(digit)?;
        if dx == 0 && dy == 0 {
            return None;
        }
        let target = Tile::new(proc.pos.x + dx, proc.pos.y + dy);
        if !in_bounds(target) || !passable_step(proc.pos, target, walls) {
            return None;
        }
        if cmd.kind == CommandKind::Move {
            return Some(target);
        }
        // Sprint: cooldown, then up to three steps preferring the intended
        // direction with randomized fallback turns.
        if proc
            .last_sprint_tick
            .is_some_and(|t| shard.tick.saturating_sub(t) <= SPRINT_COOLDOWN_TICKS)
        {
            return None;
        }
        let mut current = proc.pos;
        for _ in 0..SPRINT_MAX_STEPS {
            let options: Vec<Tile> = neighbors_8(current)
                .into_iter()
                .filter(|&n| in_bounds(n) && passable_step(current, n, walls))
                .collect();
            let preferred = Tile::new(current.x + dx, current.y + dy);
            if options.contains(&preferred) {
                current = preferred;
            } else if let Some(&next) = self.rng.choose(&options) {
                current = next;
            } else {
                break;
            }
        }
        Some(current)
    }

    // ── Gates ───────────────────────────────────────────────────────

    fn resolve_gate_interactions_inner(
        &mut self,
        shard: &mut ShardState,
    ) -> Result<(), EngineError> {
        // Arrival order, so simultaneous transfers draw placement randomness
        // in the order the processes joined.
        for pid in shard.roster() {
            let Some(proc) = shard.processes.get(&pid) else {
                continue;
            };
            if !proc.alive {
                continue;
            }
            let pos = proc.pos;
            let Some(kind) = shard.gates.iter().find(|g| g.pos == pos).map(|g| g.kind) else {
                continue;
            };
            match kind {
                GateKind::Stable => {
                    let call_sign = proc.call_sign.clone();
                    self.persistence.record_survival(&call_sign);
                    shard.tick_events.survivals.push(pid);
                    shard.totals.survivals += 1;
                    debug!(process = %pid, "stable gate exit");
                    self.remove_process(shard, pid, false);
                }
                GateKind::Ghost => {
                    let call_sign = proc.call_sign.clone();
                    self.persistence.record_ghost(&call_sign);
                    shard.tick_events.ghosts.push(pid);
                    shard.totals.ghosts += 1;
                    self.transfer_process(shard, pid)?;
                }
            }
        }
        Ok(())
    }

    fn transfer_process(
        &mut self,
        shard: &mut ShardState,
        old_id: ProcessId,
    ) -> Result<(), EngineError> {
        let Some(old) = shard.processes.get(&old_id) else {
            return Ok(());
        };
        let call_sign = old.call_sign.clone();
        self.remove_process(shard, old_id, true);

        // The origin shard is detached while it resolves, so the transfer
        // always lands elsewhere (creating a shard when none has capacity).
        let target_id = self.find_or_create_shard()?;
        let new_id = ProcessId(self.next_uuid());
        let (occupied, forbidden) = self
            .shards
            .get(&target_id)
            .map(placement_sets)
            .unwrap_or_default();
        let pos = self.random_empty_tile(&occupied, &forbidden)?;
        if let Some(target) = self.shards.get_mut(&target_id) {
            register_spawn(target, ProcessState::new(new_id, call_sign, pos));
        }
        self.process_index.insert(new_id, target_id);
        self.process_events.insert(new_id, Vec::new());

        // Identity remap: every token pointing at the old process follows it,
        // keeping its original issue time.
        for entry in self.session_tokens.values_mut() {
            if entry.0 == old_id {
                entry.0 = new_id;
            }
        }
        debug!(old = %old_id, new = %new_id, shard = %target_id, "ghost transfer");
        Ok(())
    }

    fn remove_process(&mut self, shard: &mut ShardState, pid: ProcessId, preserve_tokens: bool) {
        shard.processes.remove(&pid);
        self.process_index.remove(&pid);
        self.process_events.remove(&pid);
        if !preserve_tokens {
            self.session_tokens.retain(|_, (p, _)| *p != pid);
        }
    }

    // ── Defragmenter ────────────────────────────────────────────────

    fn resolve_defragger(&mut self, shard: &mut ShardState) {
        let (target_id, bonus) = self.select_defragger_target_inner(shard);
        shard.defragger.target_id = target_id;
        let steps = 1 + bonus;
        for _ in 0..steps {
            let Some(next) = self.defragger_next_step(shard) else {
                break;
            };
            // Warning shot: on the acquisition tick the defragmenter halts
            // one tile short, giving the victim a tick to react.
            if shard.defragger.target_reason == TargetReason::Los
                && shard.defragger.target_acquired_tick == Some(shard.tick)
                && shard
                    .defragger
                    .target_id
                    .and_then(|id| shard.processes.get(&id))
                    .map(|p| p.pos)
                    == Some(next)
            {
                break;
            }
            shard.defragger.pos = next;
            if let Some(victim) = shard.process_at(next).map(|p| p.id) {
                self.kill_process(shard, victim);
                break;
            }
        }
    }

    fn select_defragger_target_inner(&mut self, shard: &mut ShardState) -> (Option<ProcessId>, u32) {
        let last_index = FIBONACCI_ESCALATION.len() - 1;

        // 1. Broadcasts paint their sender for the whole tick.
        if !shard.broadcasts.is_empty() {
            let latest = shard
                .broadcasts
                .iter()
                .map(|b| b.timestamp_ms)
                .max()
                .unwrap_or_default();
            let target = shard
                .broadcasts
                .iter()
                .filter(|b| b.timestamp_ms == latest)
                .map(|b| b.process_id)
                .min();
            if let Some(target) = target {
                let count = shard
                    .broadcasts
                    .iter()
                    .filter(|b| b.process_id == target)
                    .count();
                let bonus = FIBONACCI_ESCALATION[(count - 1).min(last_index)];
                shard.defragger.target_reason = TargetReason::Broadcast;
                return (Some(target), bonus);
            }
        }

        // 2. Existing LOS locks rotate round-robin, except in close quarters
        // where the previous target stays sticky.
        let locked: Vec<ProcessId> = shard
            .processes
            .values()
            .filter(|p| p.alive && p.los_lock)
            .map(|p| p.id)
            .collect();
        if !locked.is_empty() {
            let walls = shard.walls_set();
            let prev = shard.defragger.last_los_target_id;
            let sticky = prev
                .filter(|p| locked.contains(p) && locked.len() >= 2)
                .filter(|p| {
                    shard
                        .processes
                        .get(p)
                        .is_some_and(|t| passable_step(shard.defragger.pos, t.pos, &walls))
                });
            let chosen = sticky.or_else(|| round_robin_after(&locked, prev));
            if let Some(chosen) = chosen {
                shard.defragger.last_los_target_id = Some(chosen);
                shard.defragger.target_reason = TargetReason::Los;
                return (Some(chosen), 0);
            }
        }

        // 3. Fresh LOS acquisition locks the target and resets the watchdog.
        let walls = shard.walls_set();
        let candidates: Vec<ProcessId> = shard
            .processes
            .values()
            .filter(|p| p.alive && los_clear(shard.defragger.pos, p.pos, &walls))
            .map(|p| p.id)
            .collect();
        if let Some(chosen) = round_robin_after(&candidates, shard.defragger.last_los_target_id) {
            if let Some(p) = shard.processes.get_mut(&chosen) {
                p.los_lock = true;
            }
            self.reset_watchdog(shard, LivenessReason::Los);
            shard.defragger.last_los_target_id = Some(chosen);
            shard.defragger.target_acquired_tick = Some(shard.tick);
            shard.defragger.target_reason = TargetReason::Los;
            return (Some(chosen), 0);
        }

        // 4. Watchdog escalation grants untargeted bonus steps.
        if shard.watchdog.active {
            shard.defragger.target_reason = TargetReason::Watchdog;
            let bonus = FIBONACCI_ESCALATION[shard.watchdog.bonus_step.min(last_index)];
            return (None, bonus);
        }

        shard.defragger.target_reason = TargetReason::Patrol;
        (None, 0)
    }

    fn defragger_next_step(&mut self, shard: &ShardState) -> Option<Tile> {
        let walls = shard.walls_set();
        let target_pos = shard
            .defragger
            .target_id
            .and_then(|id| shard.processes.get(&id))
            .filter(|p| p.alive)
            .map(|p| p.pos);

        let Some(goal) = target_pos else {
            let neighbors = adjacent_tiles(shard.defragger.pos, &walls);
            return self.rng.choose(&neighbors).copied();
        };

        let distances = distance_map(goal, &walls);
        let current = shard.defragger.pos;
        if !distances.contains_key(&current) {
            return None;
        }
        let neighbors: Vec<Tile> = adjacent_tiles(current, &walls)
            .into_iter()
            .filter(|n| distances.contains_key(n))
            .collect();
        let dist = |t: &Tile| distances.get(t).copied().unwrap_or(u32::MAX);
        let min_dist = neighbors.iter().map(dist).min()?;

        if self.rng.next_f64() < DEFRAGGER_WANDER_PROB {
            let candidates: Vec<Tile> = neighbors
                .iter()
                .copied()
                .filter(|n| dist(n) <= min_dist + 1)
                .collect();
            let weights: Vec<f64> = candidates
                .iter()
                .map(|n| 1.0 / (1.0 + f64::from(dist(n))))
                .collect();
            return self.weighted_choice(&candidates, &weights);
        }
        neighbors.into_iter().filter(|n| dist(n) == min_dist).min()
    }

    fn weighted_choice(&mut self, candidates: &[Tile], weights: &[f64]) -> Option<Tile> {
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return self.rng.choose(candidates).copied();
        }
        let r = self.rng.next_f64() * total;
        let mut upto = 0.0;
        for (candidate, weight) in candidates.iter().zip(weights) {
            upto += weight;
            if upto >= r {
                return Some(*candidate);
            }
        }
        candidates.last().copied()
    }

    // ── Kill / chat / broadcast ─────────────────────────────────────

    fn kill_process(&mut self, shard: &mut ShardState, pid: ProcessId) {
        let Some(proc) = shard.processes.get_mut(&pid) else {
            return;
        };
        proc.alive = false;
        let call_sign = proc.call_sign.clone();
        let pos = proc.pos;
        self.persistence.record_death(&call_sign);
        shard.tick_events.kills.push(pid);
        shard.totals.kills += 1;
        self.emit_global_event(
            shard,
            EventKind::StaticBurst,
            "[GLOBAL_ALRT]: ######## STATIC BURST DETECTED ########",
        );
        self.reset_watchdog(shard, LivenessReason::Kill);
        shard.echo_tiles.push(EchoTile {
            pos,
            tick: shard.tick,
        });
        self.emit_global_event(shard, EventKind::System, "[WARN]: SECTOR CORRUPTED.");
        debug!(process = %pid, tile = ?pos, "process defragmented");
        self.remove_process(shard, pid, false);
    }

    fn handle_broadcast(&mut self, shard: &mut ShardState, process_id: ProcessId, message: String) {
        let timestamp_ms = now_ms();
        let event = Event {
            kind: EventKind::Broadcast,
            message: format!("[BCAST] {message}"),
            timestamp_ms,
        };
        shard.broadcasts.push(Broadcast {
            process_id,
            message,
            timestamp_ms,
        });
        for pid in shard.processes.keys() {
            self.process_events
                .entry(*pid)
                .or_default()
                .push(event.clone());
        }
        self.reset_watchdog(shard, LivenessReason::Broadcast);
    }

    fn handle_local_chat(&mut self, shard: &mut ShardState, process_id: ProcessId, message: String) {
        let Some(sender) = shard.processes.get(&process_id) else {
            return;
        };
        let sender_pos = sender.pos;
        let timestamp_ms = now_ms();
        let walls = shard.walls_set();
        // Collected in arrival order; delivery runs id-sorted and the trace
        // records keypad-spatial order.
        let recipients: Vec<(ProcessId, Tile)> = shard
            .roster()
            .into_iter()
            .filter_map(|id| shard.processes.get(&id))
            .filter(|p| p.id != process_id && p.alive && passable_step(sender_pos, p.pos, &walls))
            .map(|p| (p.id, p.pos))
            .collect();
        let mut by_spatial = recipients.clone();
        by_spatial.sort_by_key(|(_, pos)| spatial_rank(sender_pos, *pos));
        shard.say_events.push(SayEvent {
            sender_id: process_id,
            sender_pos,
            message: message.clone(),
            recipients: by_spatial
                .into_iter()
                .map(|(process_id, pos)| SayRecipient { process_id, pos })
                .collect(),
            timestamp_ms,
            tick: shard.tick,
        });
        let mut by_pid = recipients;
        by_pid.sort_by_key(|(id, _)| *id);
        for (pid, _) in by_pid {
            let noisy = if shard.noise_burst_remaining > 0 {
                shard.noise_burst_remaining -= 1;
                true
            } else if self.rng.next_f64() < CHAT_ARTIFACT_PROB {
                shard.noise_burst_remaining =
                    self.rng.next_int(0, i64::from(CHAT_ARTIFACT_BURST_MAX) - 1) as u32;
                true
            } else {
                false
            };
            let event = if noisy {
                let artifact = self
                    .rng
                    .choose(&CHAT_ARTIFACTS)
                    .copied()
                    .unwrap_or(CHAT_ARTIFACTS[0]);
                Event {
                    kind: EventKind::Noise,
                    message: artifact.to_owned(),
                    timestamp_ms,
                }
            } else {
                Event {
                    kind: EventKind::Local,
                    message: format!("[ADJACENT: {process_id}] {message}"),
                    timestamp_ms,
                }
            };
            self.process_events.entry(pid).or_default().push(event);
        }
    }

    // ── Watchdog ────────────────────────────────────────────────────

    fn advance_watchdog(&mut self, shard: &mut ShardState) {
        if shard.watchdog.restored_this_tick {
            return;
        }
        if shard.watchdog.active {
            shard.watchdog.bonus_step =
                (shard.watchdog.bonus_step + 1).min(FIBONACCI_ESCALATION.len() - 1);
            return;
        }
        shard.watchdog.quiet_ticks += 1;
        if shard.watchdog.quiet_ticks == QUIET_TICKS_WARNING {
            shard.watchdog.countdown = WATCHDOG_COUNTDOWN;
            self.emit_global_event(
                shard,
                EventKind::System,
                "[WARN]: SCHEDULER LIVENESS DEGRADED.",
            );
            let notice = format!(
                "[WARN]: DEADLOCK MITIGATION IN: {:02} TICKS",
                shard.watchdog.countdown
            );
            self.emit_global_event(shard, EventKind::System, &notice);
        } else if shard.watchdog.countdown > 0 {
            shard.watchdog.countdown -= 1;
            let notice = format!(
                "[WARN]: DEADLOCK MITIGATION IN: {:02} TICKS",
                shard.watchdog.countdown
            );
            self.emit_global_event(shard, EventKind::System, &notice);
            if shard.watchdog.countdown == 0 {
                shard.watchdog.active = true;
                shard.watchdog.bonus_step = 0;
                self.emit_global_event(shard, EventKind::System, "[CRITICAL]: WATCHDOG TRIGGERED.");
                self.emit_global_event(
                    shard,
                    EventKind::System,
                    "[CRITICAL]: EXECUTION REBALANCE APPLIED.",
                );
            }
        }
    }

    fn reset_watchdog(&mut self, shard: &mut ShardState, reason: LivenessReason) {
        trace!(?reason, shard = %shard.id, "watchdog reset");
        if shard.watchdog.degraded() {
            self.emit_global_event(shard, EventKind::System, "[OK]: LIVENESS RESTORED.");
        }
        shard.watchdog = WatchdogState {
            restored_this_tick: true,
            ..WatchdogState::default()
        };
    }

    fn emit_global_event(&mut self, shard: &ShardState, kind: EventKind, message: &str) {
        let event = Event {
            kind,
            message: message.to_owned(),
            timestamp_ms: now_ms(),
        };
        for pid in shard.processes.keys() {
            self.process_events
                .entry(*pid)
                .or_default()
                .push(event.clone());
        }
    }

    // ── Genesis helpers ─────────────────────────────────────────────

    fn find_or_create_shard(&mut self) -> Result<ShardId, EngineError> {
        // Least-populated shard with capacity; earliest created wins ties.
        let mut candidate: Option<(usize, ShardId)> = None;
        for id in &self.shard_order {
            let Some(shard) = self.shards.get(id) else {
                continue;
            };
            let count = shard.processes.len();
            if count < MAX_PROCESSES_PER_SHARD && candidate.is_none_or(|(best, _)| count < best) {
                candidate = Some((count, *id));
            }
        }
        match candidate {
            Some((_, id)) => Ok(id),
            None => self.create_shard(),
        }
    }

    fn generate_walls(&mut self) -> Result<BTreeMap<WallId, WallEdge>, EngineError> {
        let mut slots = edge_slots();
        let mut target = INITIAL_WALL_COUNT.min(slots.len());
        let mut attempts = WALL_GEN_ATTEMPTS;
        loop {
            for _ in 0..attempts {
                self.rng.shuffle(&mut slots);
                let selected = &slots[..target];
                let walls_set: FxHashSet<WallEdge> = selected.iter().copied().collect();
                if walls_valid(&walls_set) {
                    return Ok(selected
                        .iter()
                        .enumerate()
                        .map(|(i, e)| (i as WallId, *e))
                        .collect());
                }
            }
            if target == 0 {
                return Err(EngineError::WallGeneration);
            }
            target = target.saturating_sub(WALL_GEN_FALLBACK_STEP);
            attempts = WALL_GEN_FALLBACK_ATTEMPTS;
        }
    }

    fn generate_gates(&mut self) -> Result<Vec<Gate>, EngineError> {
        let mut gates = vec![Gate {
            kind: GateKind::Stable,
            pos: self.random_gate_tile(&[])?,
        }];
        let ghost_count = self.rng.next_int(1, 3);
        for _ in 0..ghost_count {
            let existing: Vec<Tile> = gates.iter().map(|g| g.pos).collect();
            gates.push(Gate {
                kind: GateKind::Ghost,
                pos: self.random_gate_tile(&existing)?,
            });
        }
        Ok(gates)
    }

    fn random_gate_tile(&mut self, existing: &[Tile]) -> Result<Tile, EngineError> {
        for _ in 0..EMPTY_TILE_MAX_ATTEMPTS {
            let tile = self.random_tile();
            if existing
                .iter()
                .all(|&g| tile.chebyshev(g) >= GATE_MIN_CHEBYSHEV)
            {
                return Ok(tile);
            }
        }
        Err(EngineError::NoEmptyTile(EMPTY_TILE_MAX_ATTEMPTS))
    }

    fn random_empty_tile(
        &mut self,
        occupied: &[Tile],
        forbidden: &[Tile],
    ) -> Result<Tile, EngineError> {
        for _ in 0..EMPTY_TILE_MAX_ATTEMPTS {
            let tile = self.random_tile();
            if !occupied.contains(&tile) && !forbidden.contains(&tile) {
                return Ok(tile);
            }
        }
        Err(EngineError::NoEmptyTile(EMPTY_TILE_MAX_ATTEMPTS))
    }

    fn random_tile(&mut self) -> Tile {
        Tile::new(
            self.rng.next_int(0, i64::from(GRID_SIZE) - 1) as i32,
            self.rng.next_int(0, i64::from(GRID_SIZE) - 1) as i32,
        )
    }

    fn random_call_sign(&mut self) -> String {
        let adjective = self
            .rng
            .choose(&CALL_SIGN_ADJECTIVES)
            .copied()
            .unwrap_or("Static");
        let noun = self.rng.choose(&CALL_SIGN_NOUNS).copied().unwrap_or("Runner");
        format!("{adjective}-{noun}")
    }

    fn next_uuid(&mut self) -> Uuid {
        Uuid::from_u64_pair(self.rng.next_u64(), self.rng.next_u64())
    }
}

fn register_spawn(shard: &mut ShardState, mut proc: ProcessState) {
    let pid = proc.id;
    proc.spawn_seq = shard.next_spawn_seq;
    shard.next_spawn_seq += 1;
    shard.processes.insert(pid, proc);
    shard.pending_spawns.push(pid);
    shard.totals.processes += 1;
}

fn placement_sets(shard: &ShardState) -> (Vec<Tile>, Vec<Tile>) {
    let occupied: Vec<Tile> = shard.processes.values().map(|p| p.pos).collect();
    let mut forbidden: Vec<Tile> = shard.gates.iter().map(|g| g.pos).collect();
    forbidden.push(shard.defragger.pos);
    (occupied, forbidden)
}

fn apply_process_moves(shard: &mut ShardState, moves: &BTreeMap<ProcessId, Option<Tile>>) {
    let tick = shard.tick;
    for (pid, dest) in moves {
        let Some(dest) = dest else { continue };
        let Some(proc) = shard.processes.get_mut(pid) else {
            continue;
        };
        if !proc.alive {
            continue;
        }
        proc.pos = *dest;
        // A landed sprint breaks the LOS lock and starts the cooldown.
        if proc.buffered.kind == CommandKind::Buffer {
            proc.los_lock = false;
            proc.last_sprint_tick = Some(tick);
        }
    }
}

fn walls_valid(walls: &FxHashSet<WallEdge>) -> bool {
    if !is_fully_connected(walls) {
        return false;
    }
    for x in 0..GRID_SIZE {
        for y in 0..GRID_SIZE {
            if exit_count(Tile::new(x, y), walls) == 0 {
                return false;
            }
        }
    }
    true
}

/// Next id in sorted order strictly after `last`, wrapping to the first.
fn round_robin_after(ids: &[ProcessId], last: Option<ProcessId>) -> Option<ProcessId> {
    last.and_then(|l| ids.iter().copied().find(|id| *id > l))
        .or_else(|| ids.first().copied())
}

/// Keypad rank of `b` relative to `a` for SAY recipient ordering.
fn spatial_rank(a: Tile, b: Tile) -> u8 {
    crate::geometry::keypad_digit(b.x - a.x, b.y - a.y).unwrap_or(99)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
