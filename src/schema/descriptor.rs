use std::fmt;

use crate::types::{EntityType, IndexId, LabelId, PropId, TypeId};

/// Entity tokens and ordered property keys an index covers.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SchemaDescriptor {
    entity_type: EntityType,
    entity_token_ids: Vec<u32>,
    property_ids: Vec<PropId>,
}

impl SchemaDescriptor {
    /// Schema over nodes carrying `label`.
    pub fn for_label(label: LabelId, props: &[PropId]) -> Self {
        Self {
            entity_type: EntityType::Node,
            entity_token_ids: vec![label.0],
            property_ids: props.to_vec(),
        }
    }

    /// Schema over relationships of type `ty`.
    pub fn for_rel_type(ty: TypeId, props: &[PropId]) -> Self {
        Self {
            entity_type: EntityType::Relationship,
            entity_token_ids: vec![ty.0],
            property_ids: props.to_vec(),
        }
    }

    /// Schema spanning several entity tokens, as used by full-text style indexes.
    pub fn multi_token(entity_type: EntityType, tokens: &[u32], props: &[PropId]) -> Self {
        Self {
            entity_type,
            entity_token_ids: tokens.to_vec(),
            property_ids: props.to_vec(),
        }
    }

    /// Entity type the schema ranges over.
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Label or relationship type tokens.
    pub fn entity_token_ids(&self) -> &[u32] {
        &self.entity_token_ids
    }

    /// Property keys in index key order.
    pub fn property_ids(&self) -> &[PropId] {
        &self.property_ids
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close, prefix) = match self.entity_type {
            EntityType::Node => ("(", ")", ":label"),
            EntityType::Relationship => ("()-[", "]-()", ":type"),
        };
        f.write_str(open)?;
        for (i, token) in self.entity_token_ids.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{prefix}{token}")?;
        }
        f.write_str(" {")?;
        for (i, prop) in self.property_ids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "prop{prop}")?;
        }
        f.write_str("}")?;
        f.write_str(close)
    }
}

/// What an index implementation can do beyond answering membership queries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct IndexCapability {
    /// Whether cursors can be handed the stored key values.
    pub supports_values: bool,
    /// Whether results can be returned in key order.
    pub supports_order: bool,
}

impl IndexCapability {
    /// Capability of an ordered range index.
    pub const RANGE: IndexCapability = IndexCapability {
        supports_values: true,
        supports_order: true,
    };

    /// Capability of an index that only answers membership.
    pub const NO_CAPABILITY: IndexCapability = IndexCapability {
        supports_values: false,
        supports_order: false,
    };
}

impl Default for IndexCapability {
    fn default() -> Self {
        Self::RANGE
    }
}

/// Index definition before the catalog assigns it an id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexPrototype {
    /// Unique user-facing name.
    pub name: String,
    /// Covered schema.
    pub schema: SchemaDescriptor,
    /// Whether the index enforces one entity per key.
    pub unique: bool,
    /// Capabilities of the backing implementation.
    pub capability: IndexCapability,
}

impl IndexPrototype {
    /// Prototype for a unique range index.
    pub fn unique(name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            name: name.into(),
            schema,
            unique: true,
            capability: IndexCapability::RANGE,
        }
    }

    /// Prototype for a non-unique range index.
    pub fn range(name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            name: name.into(),
            schema,
            unique: false,
            capability: IndexCapability::RANGE,
        }
    }

    /// Overrides the capability advertised by the index.
    pub fn with_capability(mut self, capability: IndexCapability) -> Self {
        self.capability = capability;
        self
    }

    pub(crate) fn materialize(self, id: IndexId) -> IndexDescriptor {
        IndexDescriptor {
            id,
            name: self.name,
            schema: self.schema,
            unique: self.unique,
            capability: self.capability,
        }
    }
}

/// Catalog-assigned description of an index.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct IndexDescriptor {
    id: IndexId,
    name: String,
    schema: SchemaDescriptor,
    unique: bool,
    capability: IndexCapability,
}

impl IndexDescriptor {
    /// Catalog id.
    pub fn id(&self) -> IndexId {
        self.id
    }

    /// User-facing name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Covered schema.
    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    /// Whether the index enforces uniqueness.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Capabilities of the backing implementation.
    pub fn capability(&self) -> IndexCapability {
        self.capability
    }

    /// Human-readable description used in error messages.
    pub fn user_description(&self) -> String {
        let kind = if self.unique { "UNIQUE RANGE" } else { "RANGE" };
        format!(
            "Index( id={}, name='{}', type='{}', schema={} )",
            self.id, self.name, kind, self.schema
        )
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_description())
    }
}
