//! The type-erased argument type bound into SQL statements.
//!
//! Per the design notes, the source's int/text/blob/sequence dispatch is
//! re-expressed here as a single sum type matched exhaustively rather than
//! a dynamic type check at each call site.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// A normalized, bindable SQL argument.
///
/// Any client value is coerced into one of these variants before binding
/// (§4.B "Argument normalization"). `Sequence` and `Set` are only valid at
/// a `#?` (multi-bind) site; everything else is a single bind point.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Bool(bool),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
    /// An ordered sequence consumed by one `#?` site.
    Sequence(Vec<Value>),
    /// An unordered set consumed by one `#?` site; bind order is
    /// unspecified but arity matches the set's cardinality.
    Set(BTreeSet<OrderedValue>),
}

/// A `Value` wrapper usable as a `BTreeSet` element for [`Value::Set`].
///
/// Only the variants that make sense as set members (no floats, no nested
/// collections) are supported; constructing one from anything else panics,
/// since that indicates a bug in the caller rather than a reportable
/// runtime error.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderedValue(String, OrderedValueKind);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum OrderedValueKind {
    Integer(i64),
    Text(String),
}

impl OrderedValue {
    pub fn integer(v: i64) -> Self {
        OrderedValue(format!("i:{v}"), OrderedValueKind::Integer(v))
    }

    pub fn text(v: impl Into<String>) -> Self {
        let v = v.into();
        OrderedValue(format!("t:{v}"), OrderedValueKind::Text(v))
    }

    pub fn into_value(self) -> Value {
        match self.1 {
            OrderedValueKind::Integer(v) => Value::Integer(v),
            OrderedValueKind::Text(v) => Value::Text(v),
        }
    }
}

impl Value {
    /// Whether this value is a `#?`-site collection.
    pub fn is_multi_bind_collection(&self) -> bool {
        matches!(self, Value::Sequence(_) | Value::Set(_))
    }

    /// Cardinality of a `#?`-site collection, or `None` for `Null` /
    /// scalar values (the former binds zero positions at a multi-bind
    /// site, the latter is an [`crate::Error::InvalidMultiBind`]).
    pub fn multi_bind_len(&self) -> Option<usize> {
        match self {
            Value::Sequence(items) => Some(items.len()),
            Value::Set(items) => Some(items.len()),
            Value::Null => Some(0),
            _ => None,
        }
    }

    /// Expand a `#?`-site collection into its bind-order list of scalar
    /// values. `Null` expands to the empty list.
    pub fn multi_bind_items(self) -> Vec<Value> {
        match self {
            Value::Sequence(items) => items,
            Value::Set(items) => items.into_iter().map(OrderedValue::into_value).collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// A human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Bool(_) => "bool",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Timestamp(_) => "timestamp",
            Value::Sequence(_) => "sequence",
            Value::Set(_) => "set",
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}

/// Converts a [`rusqlite::types::Value`] (what you get back from a row)
/// into our `Value`. Used by `ResultSet`'s generic numeric accessor.
impl From<rusqlite::types::Value> for Value {
    fn from(v: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value as RV;
        match v {
            RV::Null => Value::Null,
            RV::Integer(i) => Value::Integer(i),
            RV::Real(f) => Value::Double(f),
            RV::Text(s) => Value::Text(s),
            RV::Blob(b) => Value::Blob(b),
        }
    }
}

impl rusqlite::types::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value as RV, ValueRef};
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(RV::Null),
            Value::Integer(i) => ToSqlOutput::Owned(RV::Integer(*i)),
            Value::Bool(b) => ToSqlOutput::Owned(RV::Integer(if *b { 1 } else { 0 })),
            Value::Double(d) => ToSqlOutput::Owned(RV::Real(*d)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Timestamp(ts) => ToSqlOutput::Owned(RV::Real(
                ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9,
            )),
            Value::Sequence(_) | Value::Set(_) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    "multi-bind collection cannot be bound directly; expand it first".into(),
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_preserves_order() {
        let v: Value = vec![1i64, 2, 3].into();
        assert_eq!(v.multi_bind_len(), Some(3));
        assert_eq!(
            v.multi_bind_items(),
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
    }

    #[test]
    fn null_expands_to_empty() {
        assert_eq!(Value::Null.multi_bind_len(), Some(0));
        assert_eq!(Value::Null.multi_bind_items(), Vec::new());
    }

    #[test]
    fn scalar_is_not_a_multi_bind_collection() {
        assert_eq!(Value::Integer(1).multi_bind_len(), None);
        assert!(!Value::Integer(1).is_multi_bind_collection());
    }

    #[test]
    fn set_deduplicates_and_orders_deterministically() {
        let mut set = BTreeSet::new();
        set.insert(OrderedValue::text("b"));
        set.insert(OrderedValue::text("a"));
        set.insert(OrderedValue::text("a"));
        let v = Value::Set(set);
        assert_eq!(v.multi_bind_len(), Some(2));
    }
}
