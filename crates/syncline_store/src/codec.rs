//! CBOR encoding helpers for persisted record sets.

use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StoreError::codec(format!("encode: {e}")))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::codec(format!("decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncline_model::{Entity, EntityId};

    #[test]
    fn entity_roundtrip() {
        let entity = Entity::new(EntityId::from_bytes([3u8; 16]));

        let bytes = encode(&entity).unwrap();
        let decoded: Entity = decode(&bytes).unwrap();

        assert_eq!(decoded, entity);
    }

    #[test]
    fn decode_garbage_fails() {
        let result: StoreResult<Entity> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(StoreError::Codec { .. })));
    }
}
