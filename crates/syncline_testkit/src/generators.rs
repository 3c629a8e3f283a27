//! proptest strategies for model types.

use proptest::prelude::*;
use syncline_model::{DeviceId, FieldValue};

/// A small pool of device identifiers.
pub fn arb_device_id() -> impl Strategy<Value = DeviceId> {
    (0u8..6).prop_map(|n| DeviceId::new(format!("device-{n}")))
}

/// An arbitrary field value of any type.
pub fn arb_field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        "[a-z]{0,12}".prop_map(FieldValue::Text),
        any::<i64>().prop_map(FieldValue::Integer),
        any::<bool>().prop_map(FieldValue::Bool),
        Just(FieldValue::Null),
    ]
}

/// A sequence of signed delta amounts, bounded to keep sums in range.
pub fn arb_amounts() -> impl Strategy<Value = Vec<i64>> {
    proptest::collection::vec(-1_000i64..1_000, 1..12)
}
