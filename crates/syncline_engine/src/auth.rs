//! Authorization gate for the command API.
//!
//! Every command API entry point consults the gate exactly once,
//! before any mutation, and receives a typed decision. There are no
//! per-call-site permission checks anywhere else in the engine.

use syncline_model::CollectionName;

/// The action a caller is attempting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    /// Apply a single operation to a collection.
    ApplyOp {
        /// Target collection.
        collection: CollectionName,
    },
    /// Apply a bundle touching the given collections.
    ApplyBundle {
        /// Collections the bundle touches.
        collections: Vec<CollectionName>,
    },
    /// Read a collection.
    Read {
        /// Target collection.
        collection: CollectionName,
    },
    /// Drain the queue synchronously.
    Flush,
    /// Inspect or reconcile the dead-letter lane.
    ReconcileDeadLetters,
}

/// The gate's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The action may proceed.
    Granted,
    /// The action is refused.
    Denied {
        /// Reason surfaced to the caller.
        reason: String,
    },
}

impl AccessDecision {
    /// Creates a denial with a reason.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    /// Returns true if the action was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }
}

/// Authorization policy consulted once per command API entry.
pub trait AuthorizationGate: Send + Sync {
    /// Decides whether the action may proceed.
    fn authorize(&self, action: &CommandAction) -> AccessDecision;
}

/// A gate that grants everything. The default for single-user engines.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AuthorizationGate for AllowAll {
    fn authorize(&self, _action: &CommandAction) -> AccessDecision {
        AccessDecision::Granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReadOnly;

    impl AuthorizationGate for ReadOnly {
        fn authorize(&self, action: &CommandAction) -> AccessDecision {
            match action {
                CommandAction::Read { .. } => AccessDecision::Granted,
                _ => AccessDecision::denied("read-only session"),
            }
        }
    }

    #[test]
    fn allow_all_grants_everything() {
        let gate = AllowAll;
        assert!(gate
            .authorize(&CommandAction::Flush)
            .is_granted());
    }

    #[test]
    fn custom_gate_denies_with_reason() {
        let gate = ReadOnly;
        let decision = gate.authorize(&CommandAction::ApplyOp {
            collection: CollectionName::new("orders"),
        });
        assert_eq!(decision, AccessDecision::denied("read-only session"));
        assert!(gate
            .authorize(&CommandAction::Read {
                collection: CollectionName::new("orders")
            })
            .is_granted());
    }
}
