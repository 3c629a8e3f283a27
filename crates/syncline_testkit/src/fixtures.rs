//! Retail-shaped fixtures: schemas, commands, and remote operations.

use std::collections::BTreeMap;
use std::sync::Arc;
use syncline_engine::{Command, CounterChange, NewRecord};
use syncline_model::{
    CollectionName, DeltaSource, DeviceId, EntityId, FieldSpec, FieldValue, OpId, Operation,
    OperationKind, Origin, Schema, SchemaRegistry, ValueType, VectorClock,
};
use syncline_store::{FileBackend, StorageBackend};
use tempfile::TempDir;

/// The orders collection.
pub const ORDERS: &str = "orders";
/// The inventory collection.
pub const INVENTORY: &str = "inventory";
/// The accounts collection.
pub const ACCOUNTS: &str = "accounts";

/// The standard three-collection retail registry used across tests.
///
/// - `orders`: plain fields plus a critical `settled` flag
/// - `inventory`: a `stock` counter
/// - `accounts`: a `balance` counter (integer minor units)
#[must_use]
pub fn retail_schemas() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(
        Schema::new(ORDERS)
            .field("status", FieldSpec::required(ValueType::Text))
            .field("total", FieldSpec::plain(ValueType::Integer))
            .field("settled", FieldSpec::critical(ValueType::Bool)),
    );
    registry.register(
        Schema::new(INVENTORY)
            .field("name", FieldSpec::plain(ValueType::Text))
            .field("stock", FieldSpec::counter()),
    );
    registry.register(
        Schema::new(ACCOUNTS)
            .field("owner", FieldSpec::plain(ValueType::Text))
            .field("balance", FieldSpec::counter()),
    );
    registry
}

/// A sale bundle: create an order, debit stock, credit the account.
#[must_use]
pub fn sale_command(
    order_id: EntityId,
    item_id: EntityId,
    quantity: i64,
    account_id: EntityId,
    amount_minor: i64,
) -> Command {
    Command::Sale {
        order: NewRecord::new(ORDERS, order_id)
            .field("status", "open")
            .field("total", amount_minor),
        stock_debit: CounterChange::debit(INVENTORY, item_id, "stock", quantity),
        account_credit: CounterChange::credit(ACCOUNTS, account_id, "balance", amount_minor),
    }
}

/// A remote-origin counter delta, as another device's sync would
/// deliver it.
#[must_use]
pub fn remote_adjust(
    collection: &str,
    entity_id: EntityId,
    field: &str,
    amount: i64,
    device: &str,
    clock: VectorClock,
    timestamp_ms: u64,
) -> Operation {
    Operation {
        op_id: OpId::new(),
        collection: CollectionName::new(collection),
        entity_id,
        kind: OperationKind::Adjust {
            field: field.to_owned(),
            amount,
            source: DeltaSource::Direct,
        },
        vector_clock: clock,
        timestamp_ms,
        origin: Origin::Remote,
        device: DeviceId::new(device),
    }
}

/// A remote-origin whole-record patch.
#[must_use]
pub fn remote_patch(
    collection: &str,
    entity_id: EntityId,
    fields: &[(&str, FieldValue)],
    device: &str,
    clock: VectorClock,
    timestamp_ms: u64,
) -> Operation {
    let fields: BTreeMap<String, FieldValue> = fields
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect();
    Operation {
        op_id: OpId::new(),
        collection: CollectionName::new(collection),
        entity_id,
        kind: OperationKind::Patch { fields },
        vector_clock: clock,
        timestamp_ms,
        origin: Origin::Remote,
        device: DeviceId::new(device),
    }
}

/// A file backend in a temporary directory that lives as long as this
/// value.
pub struct TempStore {
    dir: TempDir,
    backend: Arc<FileBackend>,
}

impl TempStore {
    /// Creates a fresh temporary store.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created; this is a
    /// test helper.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let backend = Arc::new(FileBackend::open(dir.path()).expect("open file backend"));
        Self { dir, backend }
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend) as Arc<dyn StorageBackend>
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}
