// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! SQLite persistence for the sector engine.
//!
//! Implements the engine's fire-and-forget [`Persistence`] port on a single
//! WAL-journaled connection, and adds the query side the request layer needs:
//! leaderboard aggregation, replay browsing, and the flavor-text table.
//! Port writes never surface failures to the engine; they are logged here.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use sector_core::{Persistence, ReplaySnapshot, ShardId, ShardTotals};

/// Errors surfaced by the query-side methods.
///
/// Port writes (the [`Persistence`] impl) swallow and log these instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Snapshot (de)serialization failure.
    #[error("snapshot codec: {0}")]
    Codec(#[from] serde_json::Error),
    /// The connection mutex was poisoned by a panicking writer.
    #[error("store mutex poisoned")]
    Poisoned,
}

/// One leaderboard row, ordered by survivals descending then deaths ascending.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Call sign the counters accumulate under.
    pub call_sign: String,
    /// Stable-gate exits.
    pub survivals: u64,
    /// Defragmenter kills.
    pub deaths: u64,
    /// Ghost-gate transfers.
    pub ghosts: u64,
}

/// One registered replay shard.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ReplayShardRow {
    /// Shard id, as its canonical string form.
    pub shard_id: String,
    /// Registration time (unix seconds).
    pub started_at: i64,
    /// Finalization time (unix seconds), if the shard has retired.
    pub ended_at: Option<i64>,
    /// Tick count reported at finalization.
    pub total_ticks: Option<u64>,
}

/// One recorded replay tick.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ReplayTick {
    /// Tick number.
    pub tick: u64,
    /// Decoded snapshot.
    pub snapshot: ReplaySnapshot,
}

/// SQLite-backed persistence sink and query store.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
    replay_enabled: bool,
}

impl SqlitePersistence {
    /// Opens (and migrates) the store at `path`, with replay logging on.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             CREATE TABLE IF NOT EXISTS leaderboard (
                 call_sign TEXT PRIMARY KEY,
                 survivals INTEGER NOT NULL DEFAULT 0,
                 deaths INTEGER NOT NULL DEFAULT 0,
                 ghosts INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS flavor_text (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 channel TEXT NOT NULL,
                 text TEXT NOT NULL UNIQUE,
                 created_at INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS replay_shards (
                 shard_id TEXT PRIMARY KEY,
                 started_at INTEGER NOT NULL,
                 ended_at INTEGER,
                 total_ticks INTEGER,
                 stats TEXT
             );
             CREATE TABLE IF NOT EXISTS replay_ticks (
                 shard_id TEXT NOT NULL,
                 tick INTEGER NOT NULL,
                 snapshot TEXT NOT NULL,
                 PRIMARY KEY (shard_id, tick)
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            replay_enabled: true,
        })
    }

    /// Disables (or re-enables) replay recording; counters are unaffected.
    pub fn with_replay_logging(mut self, enabled: bool) -> Self {
        self.replay_enabled = enabled;
        self
    }

    fn bump(&self, call_sign: &str, column: &str) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO leaderboard(call_sign, survivals, deaths, ghosts) VALUES (?1, 0, 0, 0)",
            params![call_sign],
        )?;
        // `column` is one of three fixed names, never user input.
        conn.execute(
            &format!("UPDATE leaderboard SET {column} = {column} + 1 WHERE call_sign = ?1"),
            params![call_sign],
        )?;
        Ok(())
    }

    /// Full leaderboard, best survivors first.
    pub fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT call_sign, survivals, deaths, ghosts FROM leaderboard
             ORDER BY survivals DESC, deaths ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LeaderboardEntry {
                call_sign: row.get(0)?,
                survivals: row.get::<_, i64>(1)? as u64,
                deaths: row.get::<_, i64>(2)? as u64,
                ghosts: row.get::<_, i64>(3)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Most recently registered replay shards.
    pub fn list_replay_shards(&self, limit: usize) -> Result<Vec<ReplayShardRow>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT shard_id, started_at, ended_at, total_ticks FROM replay_shards
             ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ReplayShardRow {
                shard_id: row.get(0)?,
                started_at: row.get(1)?,
                ended_at: row.get(2)?,
                total_ticks: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Recorded ticks for a shard, from `start_tick`, at most `limit`.
    pub fn get_replay_ticks(
        &self,
        shard_id: ShardId,
        start_tick: u64,
        limit: usize,
    ) -> Result<Vec<ReplayTick>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT tick, snapshot FROM replay_ticks
             WHERE shard_id = ?1 AND tick >= ?2 ORDER BY tick ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![shard_id.to_string(), start_tick as i64, limit as i64],
            |row| {
                let tick: i64 = row.get(0)?;
                let snapshot: String = row.get(1)?;
                Ok((tick, snapshot))
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            let (tick, snapshot) = row?;
            out.push(ReplayTick {
                tick: tick as u64,
                snapshot: serde_json::from_str(&snapshot)?,
            });
        }
        Ok(out)
    }

    /// Number of flavor-text rows.
    pub fn flavor_count(&self) -> Result<u64, StoreError> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM flavor_text", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    /// Seeds flavor text from a markdown bullet list; returns rows added.
    ///
    /// Lines look like `- [PROC] some line`; the optional `[PROC]`/`[SPEC]`/
    /// `[SYS]` tag selects the channel (default `sys`). Duplicate texts are
    /// ignored.
    pub fn seed_flavor_from_markdown<P: AsRef<Path>>(&self, md_path: P) -> Result<u64, StoreError> {
        let entries = parse_flavor_markdown(md_path.as_ref());
        if entries.is_empty() {
            return Ok(0);
        }
        let now = now_secs();
        let conn = lock(&self.conn)?;
        let before: i64 = conn.query_row("SELECT COUNT(*) FROM flavor_text", [], |r| r.get(0))?;
        for (channel, text) in entries {
            conn.execute(
                "INSERT OR IGNORE INTO flavor_text(channel, text, created_at) VALUES (?1, ?2, ?3)",
                params![channel, text, now],
            )?;
        }
        let after: i64 = conn.query_row("SELECT COUNT(*) FROM flavor_text", [], |r| r.get(0))?;
        Ok((after - before).max(0) as u64)
    }

    /// Uniformly random flavor line, optionally limited to one channel.
    pub fn random_flavor(&self, channel: Option<&str>) -> Result<Option<String>, StoreError> {
        let conn = lock(&self.conn)?;
        let row = match channel {
            Some(channel) => conn
                .query_row(
                    "SELECT text FROM flavor_text WHERE channel = ?1 ORDER BY RANDOM() LIMIT 1",
                    params![channel],
                    |r| r.get(0),
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT text FROM flavor_text ORDER BY RANDOM() LIMIT 1",
                    [],
                    |r| r.get(0),
                )
                .optional()?,
        };
        Ok(row)
    }

    fn write_replay_shard(&self, shard_id: ShardId) -> Result<(), StoreError> {
        if !self.replay_enabled {
            return Ok(());
        }
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO replay_shards(shard_id, started_at) VALUES (?1, ?2)",
            params![shard_id.to_string(), now_secs()],
        )?;
        Ok(())
    }

    fn write_replay_tick(
        &self,
        shard_id: ShardId,
        tick: u64,
        snapshot: &ReplaySnapshot,
    ) -> Result<(), StoreError> {
        if !self.replay_enabled {
            return Ok(());
        }
        let encoded = serde_json::to_string(snapshot)?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO replay_ticks(shard_id, tick, snapshot) VALUES (?1, ?2, ?3)",
            params![shard_id.to_string(), tick as i64, encoded],
        )?;
        Ok(())
    }

    fn write_finalize(
        &self,
        shard_id: ShardId,
        total_ticks: u64,
        totals: &ShardTotals,
    ) -> Result<(), StoreError> {
        if !self.replay_enabled {
            return Ok(());
        }
        let stats = serde_json::to_string(totals)?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "UPDATE replay_shards SET ended_at = ?2, total_ticks = ?3, stats = ?4
             WHERE shard_id = ?1",
            params![shard_id.to_string(), now_secs(), total_ticks as i64, stats],
        )?;
        Ok(())
    }
}

impl Persistence for SqlitePersistence {
    fn record_survival(&self, call_sign: &str) {
        if let Err(err) = self.bump(call_sign, "survivals") {
            warn!(%err, call_sign, "survival write failed");
        }
    }

    fn record_death(&self, call_sign: &str) {
        if let Err(err) = self.bump(call_sign, "deaths") {
            warn!(%err, call_sign, "death write failed");
        }
    }

    fn record_ghost(&self, call_sign: &str) {
        if let Err(err) = self.bump(call_sign, "ghosts") {
            warn!(%err, call_sign, "ghost write failed");
        }
    }

    fn register_replay_shard(&self, shard_id: ShardId) {
        if let Err(err) = self.write_replay_shard(shard_id) {
            warn!(%err, shard = %shard_id, "replay shard register failed");
        }
    }

    fn record_replay_tick(&self, shard_id: ShardId, tick: u64, snapshot: &ReplaySnapshot) {
        if let Err(err) = self.write_replay_tick(shard_id, tick, snapshot) {
            warn!(%err, shard = %shard_id, tick, "replay tick write failed");
        }
    }

    fn finalize_replay_shard(&self, shard_id: ShardId, total_ticks: u64, totals: &ShardTotals) {
        if let Err(err) = self.write_finalize(shard_id, total_ticks, totals) {
            warn!(%err, shard = %shard_id, "replay finalize failed");
        }
    }
}

/// Parses a shard id back from its stored string form.
pub fn parse_shard_id(raw: &str) -> Option<ShardId> {
    Uuid::parse_str(raw).ok().map(ShardId)
}

fn parse_flavor_markdown(path: &Path) -> Vec<(String, String)> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    for raw_line in raw.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || !line.starts_with('-') {
            continue;
        }
        let line = line.trim_start_matches('-').trim();
        if line.is_empty() {
            continue;
        }
        let (channel, text) = split_channel_tag(line);
        if text.is_empty() {
            continue;
        }
        lines.push((channel.to_owned(), text.to_owned()));
    }
    lines
}

fn split_channel_tag(line: &str) -> (&'static str, &str) {
    if let Some(rest) = line.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let channel = match rest[..end].trim().to_uppercase().as_str() {
                "PROC" => Some("proc"),
                "SPEC" => Some("spec"),
                "SYS" => Some("sys"),
                _ => None,
            };
            if let Some(channel) = channel {
                return (channel, rest[end + 1..].trim());
            }
        }
    }
    ("sys", line)
}

fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::Poisoned)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
