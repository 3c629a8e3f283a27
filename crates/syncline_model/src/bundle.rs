//! Bundles: atomic groups of operations.

use crate::clock::VectorClock;
use crate::id::{BundleId, CollectionName};
use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// An ordered group of operations applied and synced as one unit.
///
/// A bundle's steps share an identity derived deterministically from
/// the bundle ID (see [`crate::OpId::derive`]), so a retried bundle
/// reproduces the same step IDs and replays are recognized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Unique bundle ID.
    pub bundle_id: BundleId,
    /// Ordered steps.
    pub steps: Vec<Operation>,
    /// Causal clock at creation time (shared by all steps).
    pub vector_clock: VectorClock,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl Bundle {
    /// Creates a bundle from its parts.
    #[must_use]
    pub fn new(
        bundle_id: BundleId,
        steps: Vec<Operation>,
        vector_clock: VectorClock,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            bundle_id,
            steps,
            vector_clock,
            timestamp_ms,
        }
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the bundle has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the distinct collections the bundle touches, in step order.
    #[must_use]
    pub fn collections(&self) -> Vec<&CollectionName> {
        let mut seen = Vec::new();
        for step in &self.steps {
            if !seen.contains(&&step.collection) {
                seen.push(&step.collection);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{DeviceId, EntityId, OpId};
    use crate::operation::{DeltaSource, OperationKind, Origin};

    fn step(collection: &str) -> Operation {
        Operation {
            op_id: OpId::new(),
            collection: CollectionName::new(collection),
            entity_id: EntityId::new(),
            kind: OperationKind::Adjust {
                field: "stock".into(),
                amount: -1,
                source: DeltaSource::Direct,
            },
            vector_clock: VectorClock::new(),
            timestamp_ms: 0,
            origin: Origin::Local,
            device: DeviceId::new("pos-1"),
        }
    }

    #[test]
    fn collections_are_deduplicated_in_order() {
        let bundle = Bundle::new(
            BundleId::new(),
            vec![step("orders"), step("inventory"), step("orders")],
            VectorClock::new(),
            0,
        );

        let collections = bundle.collections();
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].as_str(), "orders");
        assert_eq!(collections[1].as_str(), "inventory");
    }

    #[test]
    fn empty_bundle() {
        let bundle = Bundle::new(BundleId::new(), vec![], VectorClock::new(), 0);
        assert!(bundle.is_empty());
        assert_eq!(bundle.len(), 0);
    }
}
