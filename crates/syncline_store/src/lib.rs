//! # Syncline Store
//!
//! Durable local state for the Syncline sync engine.
//!
//! This crate provides:
//! - A storage backend trait over named durable record sets, with
//!   in-memory and file-based implementations
//! - The committed base state per collection
//! - The provisional overlay of unconfirmed local operations
//! - The fold that materializes reads from base + overlay
//! - The operation ledger guarding against duplicate application
//!
//! ## Key Invariants
//!
//! - Materialized reads always equal `fold(base, pending overlay ops)`
//! - Every operation reaches the base state at most once
//! - Reads never block on the network
//!
//! ## Persisted layout
//!
//! One record set per collection for base state (`base/<collection>`),
//! one per collection for the overlay (`overlay/<collection>`), and one
//! for the operation ledger (`ledger`). The outbox record sets live in
//! the engine crate but go through the same backend.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod base;
mod codec;
mod error;
mod file;
mod ledger;
mod local;
mod memory;
mod overlay;

pub use backend::StorageBackend;
pub use base::BaseStore;
pub use codec::{decode, encode};
pub use error::{StoreError, StoreResult};
pub use file::FileBackend;
pub use ledger::{OperationLedger, DEFAULT_LEDGER_CAPACITY};
pub use local::LocalStore;
pub use memory::MemoryBackend;
pub use overlay::{fold, Overlay};
