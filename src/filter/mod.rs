//! Metadata and document predicates
//!
//! `where` trees are parsed from MongoDB-like JSON into a tagged tree and
//! evaluated per record.
//!
//! # Operators
//!
//! - `$eq` (default when the value is a bare scalar), `$ne`
//! - `$gt`, `$gte`, `$lt`, `$lte` (numeric operands only)
//! - `$in`, `$nin` (non-empty list of scalars)
//! - `$and`, `$or` (at least two clauses)
//!
//! A record missing the field never matches a leaf, `$ne` and `$nin` included.
//! Integers and floats compare numerically.
//!
//! ```ignore
//! let filter = Where::parse(&json!({
//!     "$and": [{"user": "alice"}, {"age": {"$gte": 18}}]
//! }))?;
//! ```

pub mod document;

pub use document::WhereDocument;

use crate::error::{QuiverError, Result};
use crate::types::{Metadata, MetadataValue};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Comparison applied to one metadata field
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(MetadataValue),
    Ne(MetadataValue),
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    In(Vec<MetadataValue>),
    Nin(Vec<MetadataValue>),
}

/// Metadata predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Where {
    And(Vec<Where>),
    Or(Vec<Where>),
    Field { field: String, op: Comparison },
}

impl Where {
    /// Parse a JSON `where` object
    ///
    /// Returns `None` for an empty object, which places no constraint.
    pub fn parse(value: &Value) -> Result<Option<Self>> {
        let object = value.as_object().ok_or_else(|| {
            QuiverError::invalid_argument(format!("Expected where to be a dict, got {}", value))
        })?;
        if object.is_empty() {
            return Ok(None);
        }
        parse_object(object).map(Some)
    }

    pub fn field(field: impl Into<String>, op: Comparison) -> Self {
        Where::Field {
            field: field.into(),
            op,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::field(field, Comparison::Eq(value.into()))
    }

    pub fn ne(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::field(field, Comparison::Ne(value.into()))
    }

    pub fn gt(field: impl Into<String>, value: f64) -> Self {
        Self::field(field, Comparison::Gt(value))
    }

    pub fn lt(field: impl Into<String>, value: f64) -> Self {
        Self::field(field, Comparison::Lt(value))
    }

    /// Evaluate against a record's metadata
    pub fn matches(&self, metadata: Option<&Metadata>) -> bool {
        match self {
            Where::And(clauses) => clauses.iter().all(|c| c.matches(metadata)),
            Where::Or(clauses) => clauses.iter().any(|c| c.matches(metadata)),
            Where::Field { field, op } => match metadata.and_then(|m| m.get(field)) {
                Some(actual) => op.matches(actual),
                None => false,
            },
        }
    }
}

impl Comparison {
    pub fn matches(&self, actual: &MetadataValue) -> bool {
        match self {
            Comparison::Eq(expected) => values_equal(actual, expected),
            Comparison::Ne(expected) => !values_equal(actual, expected),
            Comparison::Gt(bound) => compare_numeric(actual, *bound) == Some(Ordering::Greater),
            Comparison::Gte(bound) => matches!(
                compare_numeric(actual, *bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::Lt(bound) => compare_numeric(actual, *bound) == Some(Ordering::Less),
            Comparison::Lte(bound) => matches!(
                compare_numeric(actual, *bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparison::In(values) => values.iter().any(|v| values_equal(actual, v)),
            Comparison::Nin(values) => !values.iter().any(|v| values_equal(actual, v)),
        }
    }
}

fn values_equal(a: &MetadataValue, b: &MetadataValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Numeric comparison; non-numeric values are incomparable
fn compare_numeric(actual: &MetadataValue, bound: f64) -> Option<Ordering> {
    actual.as_f64()?.partial_cmp(&bound)
}

fn parse_object(object: &Map<String, Value>) -> Result<Where> {
    let mut clauses = Vec::with_capacity(object.len());
    for (key, value) in object {
        clauses.push(parse_entry(key, value)?);
    }
    Ok(collapse(clauses))
}

/// Several keys in one object combine with AND
fn collapse(mut clauses: Vec<Where>) -> Where {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Where::And(clauses)
    }
}

fn parse_entry(key: &str, value: &Value) -> Result<Where> {
    match key {
        "$and" => Ok(Where::And(parse_clause_list(key, value)?)),
        "$or" => Ok(Where::Or(parse_clause_list(key, value)?)),
        other if other.starts_with('$') => Err(QuiverError::invalid_argument(format!(
            "Expected where operator to be one of $and, $or, got {}",
            other
        ))),
        field => parse_field(field, value),
    }
}

fn parse_clause_list(op: &str, value: &Value) -> Result<Vec<Where>> {
    let items = value.as_array().ok_or_else(|| {
        QuiverError::invalid_argument(format!("Expected where value for {} to be a list", op))
    })?;
    if items.len() < 2 {
        return Err(QuiverError::invalid_argument(format!(
            "Expected where value for {} to be a list with at least two where expressions, got {}",
            op,
            items.len()
        )));
    }
    items
        .iter()
        .map(|item| {
            let object = item.as_object().ok_or_else(|| {
                QuiverError::invalid_argument(format!(
                    "Expected each {} clause to be a dict, got {}",
                    op, item
                ))
            })?;
            if object.is_empty() {
                return Err(QuiverError::invalid_argument(format!(
                    "Expected each {} clause to be a non-empty dict",
                    op
                )));
            }
            parse_object(object)
        })
        .collect()
}

fn parse_field(field: &str, value: &Value) -> Result<Where> {
    let object = match value {
        Value::Object(object) => object,
        scalar => return Ok(Where::field(field, Comparison::Eq(parse_scalar(field, scalar)?))),
    };
    if object.is_empty() {
        return Err(QuiverError::invalid_argument(format!(
            "Expected operator expression for {} to have at least one operator",
            field
        )));
    }
    let mut clauses = Vec::with_capacity(object.len());
    for (op, operand) in object {
        let comparison = match op.as_str() {
            "$eq" => Comparison::Eq(parse_scalar(field, operand)?),
            "$ne" => Comparison::Ne(parse_scalar(field, operand)?),
            "$gt" => Comparison::Gt(parse_number(field, op, operand)?),
            "$gte" => Comparison::Gte(parse_number(field, op, operand)?),
            "$lt" => Comparison::Lt(parse_number(field, op, operand)?),
            "$lte" => Comparison::Lte(parse_number(field, op, operand)?),
            "$in" => Comparison::In(parse_list(field, op, operand)?),
            "$nin" => Comparison::Nin(parse_list(field, op, operand)?),
            other => {
                return Err(QuiverError::invalid_argument(format!(
                    "Expected where operator for {} to be one of $eq, $ne, $gt, $gte, $lt, $lte, $in, $nin, got {}",
                    field, other
                )))
            }
        };
        clauses.push(Where::field(field, comparison));
    }
    Ok(collapse(clauses))
}

fn parse_scalar(field: &str, value: &Value) -> Result<MetadataValue> {
    MetadataValue::from_json(value).map_err(|_| {
        QuiverError::invalid_argument(format!(
            "Expected where value for {} to be a str, int, float or bool, got {}",
            field, value
        ))
    })
}

fn parse_number(field: &str, op: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            QuiverError::invalid_argument(format!("Unsupported number {} for {}", n, field))
        }),
        other => Err(QuiverError::invalid_argument(format!(
            "Expected operand of {} on {} to be an int or float, got {}",
            op, field, other
        ))),
    }
}

fn parse_list(field: &str, op: &str, value: &Value) -> Result<Vec<MetadataValue>> {
    let items = value.as_array().ok_or_else(|| {
        QuiverError::invalid_argument(format!(
            "Expected operand of {} on {} to be a list, got {}",
            op, field, value
        ))
    })?;
    if items.is_empty() {
        return Err(QuiverError::invalid_argument(format!(
            "Expected operand of {} on {} to be a non-empty list",
            op, field
        )));
    }
    items.iter().map(|item| parse_scalar(field, item)).collect()
}
