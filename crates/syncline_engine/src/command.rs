//! Business commands and their expansion into atomic bundles.
//!
//! A command is one logical business transaction. Expansion turns it
//! into an ordered list of steps, each independently idempotent via a
//! deterministic `op_id` derived from the bundle ID and step name, so
//! a retried command reproduces identical operations.

use crate::outbox::Priority;
use std::collections::BTreeMap;
use syncline_model::{
    Bundle, BundleId, CollectionName, DeltaSource, DeviceId, EntityId, FieldValue, OpId,
    Operation, OperationKind, Origin, VectorClock,
};

/// A record to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Target collection.
    pub collection: CollectionName,
    /// Identity of the new entity.
    pub entity_id: EntityId,
    /// Initial field values.
    pub fields: BTreeMap<String, FieldValue>,
}

impl NewRecord {
    /// Creates a record description.
    pub fn new(collection: impl Into<CollectionName>, entity_id: EntityId) -> Self {
        Self {
            collection: collection.into(),
            entity_id,
            fields: BTreeMap::new(),
        }
    }

    /// Adds an initial field value (builder style).
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// A signed change to one counter field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterChange {
    /// Target collection.
    pub collection: CollectionName,
    /// Target entity.
    pub entity_id: EntityId,
    /// The counter field.
    pub field: String,
    /// The signed amount.
    pub amount: i64,
}

impl CounterChange {
    /// A negative change of `quantity` (e.g. stock leaving inventory).
    pub fn debit(
        collection: impl Into<CollectionName>,
        entity_id: EntityId,
        field: impl Into<String>,
        quantity: i64,
    ) -> Self {
        Self {
            collection: collection.into(),
            entity_id,
            field: field.into(),
            amount: -quantity,
        }
    }

    /// A positive change of `quantity` (e.g. crediting an account).
    pub fn credit(
        collection: impl Into<CollectionName>,
        entity_id: EntityId,
        field: impl Into<String>,
        quantity: i64,
    ) -> Self {
        Self {
            collection: collection.into(),
            entity_id,
            field: field.into(),
            amount: quantity,
        }
    }
}

/// A physical recount to reconcile with concurrent deltas.
///
/// Capture `base_value` (and the entity's version) when the count
/// starts; deltas that land while counting stay intact. Because
/// counters move only through deltas, the sum of deltas since the
/// capture equals `current − base_value`, so the emitted synthetic
/// delta is simply `counted − base_value`: replicas converge on
/// `counted + Σ(concurrent deltas)` without re-running the count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecountSpec {
    /// Target collection.
    pub collection: CollectionName,
    /// Target entity.
    pub entity_id: EntityId,
    /// The counter field being recounted.
    pub field: String,
    /// The physically counted value.
    pub counted: i64,
    /// The materialized value captured when the count started.
    pub base_value: i64,
}

/// One logical business transaction, expanded into an atomic bundle.
///
/// This is a closed union: every kind is matched exhaustively, and an
/// unknown kind cannot silently do nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a single record.
    Record(NewRecord),
    /// Overwrite whole-record fields of one entity.
    Amend {
        /// Target collection.
        collection: CollectionName,
        /// Target entity.
        entity_id: EntityId,
        /// New field values.
        fields: BTreeMap<String, FieldValue>,
    },
    /// A sale: one order record, an inventory debit, and an account
    /// credit, applied and synced as one unit.
    Sale {
        /// The order to create.
        order: NewRecord,
        /// Stock leaving inventory.
        stock_debit: CounterChange,
        /// Payment credited to the account.
        account_credit: CounterChange,
    },
    /// Stock arriving into inventory.
    StockReceipt(CounterChange),
    /// A manual account balance adjustment.
    BalanceAdjustment(CounterChange),
    /// A physical recount, rebased over concurrent deltas.
    Recount(RecountSpec),
}

impl Command {
    /// Returns the lane this command syncs on.
    ///
    /// Lane assignment is fixed per kind, so one collection's
    /// operations never straddle lanes and per-lane FIFO preserves
    /// their creation order.
    #[must_use]
    pub fn priority(&self) -> Priority {
        match self {
            Command::Sale { .. } | Command::BalanceAdjustment(_) => Priority::High,
            Command::Record(_) | Command::Amend { .. } | Command::StockReceipt(_) => {
                Priority::Normal
            }
            Command::Recount(_) => Priority::Low,
        }
    }

    /// Expands this command into a bundle of operations.
    ///
    /// Ticks the device clock once per step, so no two operations from
    /// the same device share a clock value.
    #[must_use]
    pub fn expand(
        &self,
        bundle_id: BundleId,
        device: &DeviceId,
        clock: &mut VectorClock,
        now_ms: u64,
    ) -> Bundle {
        let mut steps = Vec::new();
        let mut push = |name: &str, collection: &CollectionName, entity_id: EntityId, kind| {
            clock.tick(device);
            steps.push(Operation {
                op_id: OpId::derive(bundle_id, name),
                collection: collection.clone(),
                entity_id,
                kind,
                vector_clock: clock.clone(),
                timestamp_ms: now_ms,
                origin: Origin::Local,
                device: device.clone(),
            });
        };

        match self {
            Command::Record(record) => {
                push(
                    "record",
                    &record.collection,
                    record.entity_id,
                    OperationKind::Create {
                        fields: record.fields.clone(),
                    },
                );
            }
            Command::Amend {
                collection,
                entity_id,
                fields,
            } => {
                push(
                    "amend",
                    collection,
                    *entity_id,
                    OperationKind::Patch {
                        fields: fields.clone(),
                    },
                );
            }
            Command::Sale {
                order,
                stock_debit,
                account_credit,
            } => {
                push(
                    "create-order",
                    &order.collection,
                    order.entity_id,
                    OperationKind::Create {
                        fields: order.fields.clone(),
                    },
                );
                push(
                    "debit-inventory",
                    &stock_debit.collection,
                    stock_debit.entity_id,
                    OperationKind::Adjust {
                        field: stock_debit.field.clone(),
                        amount: stock_debit.amount,
                        source: DeltaSource::Direct,
                    },
                );
                push(
                    "credit-account",
                    &account_credit.collection,
                    account_credit.entity_id,
                    OperationKind::Adjust {
                        field: account_credit.field.clone(),
                        amount: account_credit.amount,
                        source: DeltaSource::Direct,
                    },
                );
            }
            Command::StockReceipt(change) => {
                push(
                    "receive-stock",
                    &change.collection,
                    change.entity_id,
                    OperationKind::Adjust {
                        field: change.field.clone(),
                        amount: change.amount,
                        source: DeltaSource::Direct,
                    },
                );
            }
            Command::BalanceAdjustment(change) => {
                push(
                    "adjust-balance",
                    &change.collection,
                    change.entity_id,
                    OperationKind::Adjust {
                        field: change.field.clone(),
                        amount: change.amount,
                        source: DeltaSource::Direct,
                    },
                );
            }
            Command::Recount(spec) => {
                push(
                    "rebase-count",
                    &spec.collection,
                    spec.entity_id,
                    OperationKind::Adjust {
                        field: spec.field.clone(),
                        amount: spec.counted - spec.base_value,
                        source: DeltaSource::Recount,
                    },
                );
            }
        }

        Bundle::new(bundle_id, steps, clock.clone(), now_ms)
    }
}

/// A single externally-built operation handed to `apply_op`.
///
/// The caller supplies the `op_id`, deterministic for the logical
/// action (e.g. derived from a client transaction identifier).
#[derive(Debug, Clone, PartialEq)]
pub struct OpRequest {
    /// Caller-supplied, deterministic operation ID.
    pub op_id: OpId,
    /// Target collection.
    pub collection: CollectionName,
    /// Target entity.
    pub entity_id: EntityId,
    /// The payload.
    pub kind: OperationKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale() -> Command {
        let order_id = EntityId::from_bytes([1u8; 16]);
        let item_id = EntityId::from_bytes([2u8; 16]);
        let account_id = EntityId::from_bytes([3u8; 16]);
        Command::Sale {
            order: NewRecord::new("orders", order_id).field("status", "open"),
            stock_debit: CounterChange::debit("inventory", item_id, "stock", 2),
            account_credit: CounterChange::credit("accounts", account_id, "balance", 750),
        }
    }

    #[test]
    fn sale_expands_to_three_steps() {
        let bundle_id = BundleId::from_bytes([9u8; 16]);
        let device = DeviceId::new("pos-1");
        let mut clock = VectorClock::new();

        let bundle = sale().expand(bundle_id, &device, &mut clock, 1_000);

        assert_eq!(bundle.len(), 3);
        assert_eq!(bundle.steps[0].collection.as_str(), "orders");
        assert_eq!(bundle.steps[1].delta().unwrap().amount, -2);
        assert_eq!(bundle.steps[2].delta().unwrap().amount, 750);

        // Each step got its own clock value.
        assert_eq!(bundle.steps[0].vector_clock.get(&device), 1);
        assert_eq!(bundle.steps[1].vector_clock.get(&device), 2);
        assert_eq!(bundle.steps[2].vector_clock.get(&device), 3);
        assert_eq!(clock.get(&device), 3);
    }

    #[test]
    fn expansion_is_deterministic_for_retries() {
        let bundle_id = BundleId::from_bytes([9u8; 16]);
        let device = DeviceId::new("pos-1");

        let mut clock_a = VectorClock::new();
        let a = sale().expand(bundle_id, &device, &mut clock_a, 1_000);
        let mut clock_b = VectorClock::new();
        let b = sale().expand(bundle_id, &device, &mut clock_b, 1_000);

        let ids_a: Vec<_> = a.steps.iter().map(|s| s.op_id).collect();
        let ids_b: Vec<_> = b.steps.iter().map(|s| s.op_id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn recount_emits_synthetic_delta() {
        // Counted 7 against a captured base of 10: the shelf lost 3
        // units that no delta accounts for.
        let command = Command::Recount(RecountSpec {
            collection: CollectionName::new("inventory"),
            entity_id: EntityId::from_bytes([2u8; 16]),
            field: "stock".into(),
            counted: 7,
            base_value: 10,
        });

        let mut clock = VectorClock::new();
        let bundle = command.expand(
            BundleId::from_bytes([4u8; 16]),
            &DeviceId::new("pos-1"),
            &mut clock,
            1_000,
        );

        let delta = bundle.steps[0].delta().unwrap();
        assert_eq!(delta.amount, -3);
        assert_eq!(delta.source, DeltaSource::Recount);
    }

    #[test]
    fn priorities_by_kind() {
        assert_eq!(sale().priority(), Priority::High);
        assert_eq!(
            Command::StockReceipt(CounterChange::credit(
                "inventory",
                EntityId::new(),
                "stock",
                5
            ))
            .priority(),
            Priority::Normal
        );
        assert_eq!(
            Command::Recount(RecountSpec {
                collection: CollectionName::new("inventory"),
                entity_id: EntityId::new(),
                field: "stock".into(),
                counted: 0,
                base_value: 0,
            })
            .priority(),
            Priority::Low
        );
    }
}
