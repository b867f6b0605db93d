// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Environment-driven hub settings.

use sector_core::EngineConfig;

/// Runtime settings, read once at startup from `SECTOR_*` variables.
///
/// Unset or unparsable variables fall back to the defaults, never error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// SQLite database path (`SECTOR_DB_PATH`).
    pub db_path: String,
    /// Seconds between ticks (`SECTOR_TICK_SECONDS`).
    pub tick_seconds: u64,
    /// Engine PRNG seed (`SECTOR_RANDOM_SEED`).
    pub random_seed: u64,
    /// Shard population floor (`SECTOR_MIN_ACTIVE_PROCESSES`).
    pub min_active_processes: usize,
    /// Below-floor ticks before a shard retires (`SECTOR_EMPTY_SHARD_TICKS`).
    pub empty_shard_ticks: u32,
    /// Global process cap (`SECTOR_MAX_TOTAL_PROCESSES`).
    pub max_total_processes: usize,
    /// Session token TTL in seconds (`SECTOR_TOKEN_TTL_SECONDS`).
    pub token_ttl_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: "sector.db".to_owned(),
            tick_seconds: 10,
            random_seed: 42,
            min_active_processes: 1,
            empty_shard_ticks: 12,
            max_total_processes: 1000,
            token_ttl_seconds: 3600,
        }
    }
}

impl Settings {
    /// Loads settings from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: std::env::var("SECTOR_DB_PATH").unwrap_or(defaults.db_path),
            tick_seconds: env_parse("SECTOR_TICK_SECONDS", defaults.tick_seconds),
            random_seed: env_parse("SECTOR_RANDOM_SEED", defaults.random_seed),
            min_active_processes: env_parse(
                "SECTOR_MIN_ACTIVE_PROCESSES",
                defaults.min_active_processes,
            ),
            empty_shard_ticks: env_parse("SECTOR_EMPTY_SHARD_TICKS", defaults.empty_shard_ticks),
            max_total_processes: env_parse(
                "SECTOR_MAX_TOTAL_PROCESSES",
                defaults.max_total_processes,
            ),
            token_ttl_seconds: env_parse("SECTOR_TOKEN_TTL_SECONDS", defaults.token_ttl_seconds),
        }
    }

    /// Engine construction parameters derived from these settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            seed: self.random_seed,
            min_active_processes: self.min_active_processes,
            empty_shard_ticks: self.empty_shard_ticks,
            max_total_processes: Some(self.max_total_processes),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
