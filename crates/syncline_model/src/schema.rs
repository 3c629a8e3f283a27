//! Collection schemas and payload validation.

use crate::error::{ModelError, ModelResult};
use crate::id::CollectionName;
use crate::operation::OperationKind;
use crate::value::{FieldValue, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a field participates in conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Ordinary whole-record field; last-writer-wins under conflict.
    Plain,
    /// Additive counter (stock level, balance). Changes only through
    /// deltas; concurrent deltas are summed, never discarded.
    Counter,
    /// Critical flag (completion, settlement). Merged by per-field
    /// max-timestamp even when the rest of the record is replaced.
    Critical,
}

/// Declaration of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Conflict-resolution role.
    pub kind: FieldKind,
    /// Declared value type.
    pub value_type: ValueType,
    /// Whether the field must be present (non-null) at creation.
    pub required: bool,
}

impl FieldSpec {
    /// A plain field.
    #[must_use]
    pub const fn plain(value_type: ValueType) -> Self {
        Self {
            kind: FieldKind::Plain,
            value_type,
            required: false,
        }
    }

    /// A required plain field.
    #[must_use]
    pub const fn required(value_type: ValueType) -> Self {
        Self {
            kind: FieldKind::Plain,
            value_type,
            required: true,
        }
    }

    /// An additive counter field. Counters are always integers.
    #[must_use]
    pub const fn counter() -> Self {
        Self {
            kind: FieldKind::Counter,
            value_type: ValueType::Integer,
            required: false,
        }
    }

    /// A critical flag field.
    #[must_use]
    pub const fn critical(value_type: ValueType) -> Self {
        Self {
            kind: FieldKind::Critical,
            value_type,
            required: false,
        }
    }
}

/// Schema for one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    collection: CollectionName,
    fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    /// Creates an empty schema for a collection.
    #[must_use]
    pub fn new(collection: impl Into<CollectionName>) -> Self {
        Self {
            collection: collection.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field declaration (builder style).
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Returns the collection this schema describes.
    #[must_use]
    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    /// Returns the declaration for a field, if any.
    #[must_use]
    pub fn spec(&self, field: &str) -> Option<&FieldSpec> {
        self.fields.get(field)
    }

    /// Returns true if the field is an additive counter.
    #[must_use]
    pub fn is_counter(&self, field: &str) -> bool {
        self.spec(field).is_some_and(|s| s.kind == FieldKind::Counter)
    }

    /// Returns true if the field is a critical flag.
    #[must_use]
    pub fn is_critical(&self, field: &str) -> bool {
        self.spec(field).is_some_and(|s| s.kind == FieldKind::Critical)
    }

    /// Validates an operation payload against this schema.
    ///
    /// Runs before any mutation; a failure here leaves no trace.
    pub fn validate(&self, kind: &OperationKind) -> ModelResult<()> {
        match kind {
            OperationKind::Create { fields } => self.validate_create(fields),
            OperationKind::Patch { fields } => self.validate_patch(fields),
            OperationKind::Adjust { field, .. } => self.validate_adjust(field),
        }
    }

    fn validate_create(&self, fields: &BTreeMap<String, FieldValue>) -> ModelResult<()> {
        for (name, value) in fields {
            self.check_known_and_typed(name, value)?;
        }
        for (name, spec) in &self.fields {
            if spec.required && fields.get(name).is_none_or(FieldValue::is_null) {
                return Err(ModelError::MissingRequiredField {
                    collection: self.collection.clone(),
                    field: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_patch(&self, fields: &BTreeMap<String, FieldValue>) -> ModelResult<()> {
        for (name, value) in fields {
            self.check_known_and_typed(name, value)?;
            if self.is_counter(name) {
                return Err(ModelError::CounterOverwrite {
                    collection: self.collection.clone(),
                    field: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_adjust(&self, field: &str) -> ModelResult<()> {
        match self.spec(field) {
            None => Err(ModelError::UnknownField {
                collection: self.collection.clone(),
                field: field.to_owned(),
            }),
            Some(spec) if spec.kind != FieldKind::Counter => Err(ModelError::NotACounter {
                collection: self.collection.clone(),
                field: field.to_owned(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn check_known_and_typed(&self, name: &str, value: &FieldValue) -> ModelResult<()> {
        let spec = self.spec(name).ok_or_else(|| ModelError::UnknownField {
            collection: self.collection.clone(),
            field: name.to_owned(),
        })?;

        if let Some(actual) = value.value_type() {
            if actual != spec.value_type {
                return Err(ModelError::TypeMismatch {
                    collection: self.collection.clone(),
                    field: name.to_owned(),
                    expected: spec.value_type,
                    actual,
                });
            }
        } else if spec.kind == FieldKind::Counter {
            // Null is tolerated for plain/critical fields, never counters.
            return Err(ModelError::TypeMismatch {
                collection: self.collection.clone(),
                field: name.to_owned(),
                expected: spec.value_type,
                actual: ValueType::Integer,
            });
        }
        Ok(())
    }
}

/// The set of schemas known to an engine instance.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<CollectionName, Schema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, replacing any previous one for the collection.
    pub fn register(&mut self, schema: Schema) {
        self.schemas.insert(schema.collection().clone(), schema);
    }

    /// Returns the schema for a collection.
    pub fn get(&self, collection: &CollectionName) -> ModelResult<&Schema> {
        self.schemas
            .get(collection)
            .ok_or_else(|| ModelError::UnknownCollection {
                name: collection.clone(),
            })
    }

    /// Returns the registered collection names.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionName> {
        self.schemas.keys()
    }
}
