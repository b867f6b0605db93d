// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! sector-hub: headless driver and spectator fan-out for the sector engine.
//!
//! The hub owns the engine behind one exclusive async lock, advances it at a
//! fixed cadence, and pushes per-shard spectator snapshots through lossy
//! single-slot mailboxes. Transport (WebSocket/HTTP) attaches from outside
//! via [`SpectatorHub::subscribe`] receivers and the engine lock.

/// Tick driver task.
pub mod driver;
/// Runtime settings.
pub mod settings;
/// Spectator snapshot fan-out.
pub mod spectate;

pub use driver::{spawn_driver, DriverHandle};
pub use settings::Settings;
pub use spectate::SpectatorHub;
