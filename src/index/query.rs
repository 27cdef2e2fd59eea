use std::ops::Bound;

use crate::schema::IndexDescriptor;
use crate::types::{Error, PropId, Result, Value};

/// Equality constraint on a single property.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExactPredicate {
    prop: PropId,
    value: Value,
}

impl ExactPredicate {
    /// Creates a predicate requiring `prop` to equal `value`.
    pub fn new(prop: PropId, value: impl Into<Value>) -> Self {
        Self {
            prop,
            value: value.into(),
        }
    }

    /// Constrained property key.
    pub fn prop_id(&self) -> PropId {
        self.prop
    }

    /// Required value.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// One component of a value index query.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyIndexQuery {
    /// Property equals a value.
    Exact(ExactPredicate),
    /// Property lies within the bounds. Values of a different type never match.
    Range {
        /// Constrained property key.
        prop: PropId,
        /// Lower bound.
        lower: Bound<Value>,
        /// Upper bound.
        upper: Bound<Value>,
    },
    /// Property is present with any value.
    Exists {
        /// Constrained property key.
        prop: PropId,
    },
    /// Every entry of the index.
    AllEntries,
}

impl PropertyIndexQuery {
    /// Shorthand for [`PropertyIndexQuery::Exact`].
    pub fn exact(prop: PropId, value: impl Into<Value>) -> Self {
        PropertyIndexQuery::Exact(ExactPredicate::new(prop, value))
    }

    /// Shorthand for [`PropertyIndexQuery::Range`].
    pub fn range(prop: PropId, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        PropertyIndexQuery::Range { prop, lower, upper }
    }

    /// Shorthand for [`PropertyIndexQuery::Exists`].
    pub fn exists(prop: PropId) -> Self {
        PropertyIndexQuery::Exists { prop }
    }

    /// Property this component constrains, `None` for [`PropertyIndexQuery::AllEntries`].
    pub fn prop_id(&self) -> Option<PropId> {
        match self {
            PropertyIndexQuery::Exact(pred) => Some(pred.prop),
            PropertyIndexQuery::Range { prop, .. } | PropertyIndexQuery::Exists { prop } => {
                Some(*prop)
            }
            PropertyIndexQuery::AllEntries => None,
        }
    }

    /// Whether `value` satisfies this component.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyIndexQuery::Exact(pred) => pred.value == *value,
            PropertyIndexQuery::Range { lower, upper, .. } => {
                bound_accepts_lower(lower, value) && bound_accepts_upper(upper, value)
            }
            PropertyIndexQuery::Exists { .. } | PropertyIndexQuery::AllEntries => true,
        }
    }
}

impl From<ExactPredicate> for PropertyIndexQuery {
    fn from(value: ExactPredicate) -> Self {
        PropertyIndexQuery::Exact(value)
    }
}

fn same_type(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn bound_accepts_lower(bound: &Bound<Value>, value: &Value) -> bool {
    match bound {
        Bound::Unbounded => true,
        Bound::Included(lo) => same_type(lo, value) && value >= lo,
        Bound::Excluded(lo) => same_type(lo, value) && value > lo,
    }
}

fn bound_accepts_upper(bound: &Bound<Value>, value: &Value) -> bool {
    match bound {
        Bound::Unbounded => true,
        Bound::Included(hi) => same_type(hi, value) && value <= hi,
        Bound::Excluded(hi) => same_type(hi, value) && value < hi,
    }
}

/// Requested result ordering.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum IndexOrder {
    /// Any order.
    #[default]
    None,
    /// Ascending key order.
    Ascending,
    /// Descending key order.
    Descending,
}

/// Caller requirements for an index query.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct IndexQueryConstraints {
    /// Result ordering.
    pub order: IndexOrder,
    /// Whether the cursor must expose stored key values.
    pub needs_values: bool,
}

impl IndexQueryConstraints {
    /// No ordering, no values.
    pub const fn unconstrained() -> Self {
        Self {
            order: IndexOrder::None,
            needs_values: false,
        }
    }

    /// Results in the given order.
    pub const fn ordered(order: IndexOrder) -> Self {
        Self {
            order,
            needs_values: false,
        }
    }

    /// Also hand the stored values to the cursor.
    pub const fn with_values(mut self) -> Self {
        self.needs_values = true;
        self
    }
}

/// Checks that `query` is a legal shape for `index`.
///
/// Either a single [`PropertyIndexQuery::AllEntries`], or one component per
/// indexed property in schema order where only the last component may be a
/// range or existence predicate.
pub fn validate_query_shape(index: &IndexDescriptor, query: &[PropertyIndexQuery]) -> Result<()> {
    if matches!(query, [PropertyIndexQuery::AllEntries]) {
        return Ok(());
    }
    let props = index.schema().property_ids();
    if query.len() != props.len() {
        return Err(Error::IndexNotApplicable(format!(
            "index {} expects {} query components, got {}",
            index.name(),
            props.len(),
            query.len()
        )));
    }
    for (pos, (component, expected)) in query.iter().zip(props).enumerate() {
        match component.prop_id() {
            Some(prop) if prop == *expected => {}
            Some(prop) => {
                return Err(Error::IndexNotApplicable(format!(
                    "index {} has property {} in position {}, query names property {}",
                    index.name(),
                    expected,
                    pos,
                    prop
                )))
            }
            None => return Err(Error::Invalid("all-entries query cannot be combined")),
        }
        let last = pos + 1 == query.len();
        if !last && !matches!(component, PropertyIndexQuery::Exact(_)) {
            return Err(Error::Invalid(
                "only the last composite query component may be a range or existence predicate",
            ));
        }
    }
    Ok(())
}
