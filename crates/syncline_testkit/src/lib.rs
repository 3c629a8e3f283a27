//! # Syncline Testkit
//!
//! Shared test utilities for the Syncline workspace:
//! - A manual clock for deterministic scheduler tests
//! - Retail-shaped schema and operation fixtures
//! - proptest generators for deltas and clocks

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod fixtures;
mod generators;

pub use clock::ManualClock;
pub use fixtures::{
    remote_adjust, remote_patch, retail_schemas, sale_command, TempStore, ACCOUNTS, INVENTORY,
    ORDERS,
};
pub use generators::{arb_amounts, arb_device_id, arb_field_value};
