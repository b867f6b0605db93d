// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tuning constants shared across the engine.

/// Side length of every shard grid, in tiles.
pub const GRID_SIZE: i32 = 20;

/// Hard per-shard population cap used by shard placement.
pub const MAX_PROCESSES_PER_SHARD: usize = 50;

/// Wall count targeted by shard genesis before fallback levels kick in.
pub const INITIAL_WALL_COUNT: usize = 80;

/// Layout attempts per wall-count level during genesis.
pub const WALL_GEN_ATTEMPTS: usize = 500;

/// Layout attempts per reduced wall-count fallback level.
pub const WALL_GEN_FALLBACK_ATTEMPTS: usize = 200;

/// Wall-count reduction applied per fallback level.
pub const WALL_GEN_FALLBACK_STEP: usize = 10;

/// Quiet ticks before the watchdog emits its degradation warning.
pub const QUIET_TICKS_WARNING: u32 = 6;

/// Ticks from the degradation warning to watchdog activation.
pub const WATCHDOG_COUNTDOWN: u32 = 5;

/// Bonus-step escalation table for the defragmenter (index clamped to last).
pub const FIBONACCI_ESCALATION: [u32; 7] = [1, 3, 5, 8, 13, 21, 34];

/// Ticks a sprint stays on cooldown after use.
pub const SPRINT_COOLDOWN_TICKS: u64 = 1;

/// Maximum tiles covered by a single sprint.
pub const SPRINT_MAX_STEPS: usize = 3;

/// Rolling retention window for SAY traces, in ticks.
pub const SAY_EVENT_TTL_TICKS: u64 = 3;

/// Rolling retention window for echo tiles, in ticks.
pub const ECHO_TTL_TICKS: u64 = 4;

/// Per-recipient probability that local chat degrades into noise.
pub const CHAT_ARTIFACT_PROB: f64 = 0.012;

/// Upper bound on the length of a noise burst once one starts.
pub const CHAT_ARTIFACT_BURST_MAX: u32 = 3;

/// Noise substituted for local chat during an artifact burst.
pub const CHAT_ARTIFACTS: [&str; 2] = ["...", "[STATIC]"];

/// Probability per step that the defragmenter takes a weighted detour.
pub const DEFRAGGER_WANDER_PROB: f64 = 0.15;

/// Longest accepted BROADCAST/SAY payload, in characters.
pub const MESSAGE_MAX_LEN: usize = 256;

/// Minimum pairwise Chebyshev distance between gates.
pub const GATE_MIN_CHEBYSHEV: i32 = 3;

/// Placement attempts before random tile placement gives up.
pub const EMPTY_TILE_MAX_ATTEMPTS: usize = 100;
