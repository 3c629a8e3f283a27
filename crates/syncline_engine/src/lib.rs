//! # Syncline Engine
//!
//! The offline-first sync engine: single write entry point, local
//! overlay reads, conflict resolution, and an outbox that delivers
//! atomically-applied bundles to an authoritative remote store.
//!
//! This crate provides:
//! - The command API (`apply_op`, `apply_bundle`, `read`,
//!   `sync_status`, `flush_and_confirm`)
//! - Bundle expansion with deterministic step IDs
//! - Conflict resolution (vector clocks, additive counters,
//!   critical-field protection)
//! - A priority-laned outbox with exponential backoff and a
//!   dead-letter lane
//! - A timer-driven background scheduler woken by connectivity events
//!
//! ## Architecture
//!
//! ```text
//! UI -> Command -> bundle expansion -> local store + overlay (sync)
//!                                   -> outbox -> scheduler -> remote
//! ```
//!
//! ## Key Invariants
//!
//! - Operations apply to the base state at most once (operation ledger)
//! - Bundles apply locally all-or-nothing and commit all-or-nothing
//! - Reads always fold base + pending overlay, never block on network
//! - Counter fields change only through summed deltas
//! - Local writes always succeed instantly; sync failures are
//!   background-reported, never blocking

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod auth;
mod clock;
mod command;
mod config;
mod engine;
mod error;
mod network;
mod outbox;
mod resolver;
mod scheduler;

pub use adapter::{MockRemoteAdapter, RemoteAdapter};
pub use auth::{AccessDecision, AllowAll, AuthorizationGate, CommandAction};
pub use clock::{Clock, SystemClock};
pub use command::{Command, CounterChange, NewRecord, OpRequest, RecountSpec};
pub use config::{EngineConfig, LaneConfig, RetryConfig};
pub use engine::{ApplyOutcome, BundleReceipt, SyncEngine, SyncStats, SyncStatus};
pub use error::{AdapterError, AdapterResult, EngineError, EngineResult};
pub use network::ConnectivityState;
pub use outbox::{
    DeadLetterItem, DeadLetterSnapshot, Outbox, Priority, QueueItem, QueueSnapshot, QueueStatus,
};
pub use resolver::merge_remote;
