//! # Syncline Model
//!
//! Core data model for the Syncline offline-first sync engine.
//!
//! This crate provides:
//! - Identifiers: devices, entities, operations, bundles
//! - Vector clocks with dominance/concurrency ordering
//! - Operations (the single unit of change) and bundles (atomic groups)
//! - Materialized entities with per-field state
//! - Collection schemas and payload validation
//!
//! ## Key Invariants
//!
//! - Operations are immutable once created
//! - Operation IDs are deterministic for a logical action, so retries
//!   are recognized as duplicates rather than re-executed
//! - Counter fields only ever change through signed deltas
//! - Vector clocks are monotonically non-decreasing per device

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod clock;
mod entity;
mod error;
mod id;
mod operation;
mod schema;
mod value;

pub use bundle::Bundle;
pub use clock::{ClockOrdering, VectorClock};
pub use entity::Entity;
pub use error::{ModelError, ModelResult};
pub use id::{BundleId, CollectionName, DeviceId, EntityId, OpId};
pub use operation::{Delta, DeltaSource, Operation, OperationKind, Origin};
pub use schema::{FieldKind, FieldSpec, Schema, SchemaRegistry};
pub use value::{FieldState, FieldValue, ValueType};
