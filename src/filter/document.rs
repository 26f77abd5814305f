//! Document predicates (`where_document`)
//!
//! Substring matching over a record's document text with `$contains`,
//! `$not_contains`, `$and` and `$or`. A record without a document matches no leaf.

use crate::error::{QuiverError, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum WhereDocument {
    Contains(String),
    NotContains(String),
    And(Vec<WhereDocument>),
    Or(Vec<WhereDocument>),
}

impl WhereDocument {
    /// Parse a JSON `where_document` object; an empty object places no constraint
    pub fn parse(value: &Value) -> Result<Option<Self>> {
        let object = value.as_object().ok_or_else(|| {
            QuiverError::invalid_argument(format!(
                "Expected where document to be a dict, got {}",
                value
            ))
        })?;
        if object.is_empty() {
            return Ok(None);
        }
        Self::parse_expr(value).map(Some)
    }

    fn parse_expr(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            QuiverError::invalid_argument(format!(
                "Expected where document clause to be a dict, got {}",
                value
            ))
        })?;
        if object.len() != 1 {
            return Err(QuiverError::invalid_argument(format!(
                "Expected where document to have exactly one operator, got {}",
                value
            )));
        }
        let Some((op, operand)) = object.iter().next() else {
            return Err(QuiverError::invalid_argument(
                "Expected where document to have exactly one operator",
            ));
        };
        match op.as_str() {
            "$contains" => Ok(WhereDocument::Contains(Self::parse_text(op, operand)?)),
            "$not_contains" => Ok(WhereDocument::NotContains(Self::parse_text(op, operand)?)),
            "$and" => Ok(WhereDocument::And(Self::parse_list(op, operand)?)),
            "$or" => Ok(WhereDocument::Or(Self::parse_list(op, operand)?)),
            other => Err(QuiverError::invalid_argument(format!(
                "Expected where document operator to be one of $contains, $not_contains, $and, $or, got {}",
                other
            ))),
        }
    }

    fn parse_text(op: &str, operand: &Value) -> Result<String> {
        operand.as_str().map(str::to_string).ok_or_else(|| {
            QuiverError::invalid_argument(format!(
                "Expected where document operand value for operator {} to be a str, got {}",
                op, operand
            ))
        })
    }

    fn parse_list(op: &str, operand: &Value) -> Result<Vec<WhereDocument>> {
        let items = operand.as_array().ok_or_else(|| {
            QuiverError::invalid_argument(format!(
                "Expected where document value for {} to be a list",
                op
            ))
        })?;
        if items.len() < 2 {
            return Err(QuiverError::invalid_argument(format!(
                "Expected where document value for {} to be a list with at least two where document expressions, got {}",
                op,
                items.len()
            )));
        }
        items.iter().map(Self::parse_expr).collect()
    }

    pub fn contains(text: impl Into<String>) -> Self {
        WhereDocument::Contains(text.into())
    }

    pub fn not_contains(text: impl Into<String>) -> Self {
        WhereDocument::NotContains(text.into())
    }

    pub fn matches(&self, document: Option<&str>) -> bool {
        match self {
            WhereDocument::Contains(text) => document.is_some_and(|d| d.contains(text.as_str())),
            WhereDocument::NotContains(text) => {
                document.is_some_and(|d| !d.contains(text.as_str()))
            }
            WhereDocument::And(clauses) => clauses.iter().all(|c| c.matches(document)),
            WhereDocument::Or(clauses) => clauses.iter().any(|c| c.matches(document)),
        }
    }
}
