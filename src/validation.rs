//! Request validation
//!
//! Every check here runs before a call touches the WAL or the record table, so a
//! rejected call has no side effects.

use crate::error::{QuiverError, Result};
use crate::types::Metadata;
use std::collections::{BTreeSet, HashSet};

/// Collection names: 3-63 chars, alphanumeric at both ends, `[A-Za-z0-9._-]`
/// inside, no `..`
pub fn validate_collection_name(name: &str) -> Result<()> {
    let invalid = || {
        QuiverError::invalid_argument(format!(
            "Expected collection name that (1) contains 3-63 characters, (2) starts and ends \
             with an alphanumeric character, (3) otherwise contains only alphanumeric \
             characters, underscores, hyphens or periods, (4) contains no two consecutive \
             periods, got {}",
            name
        ))
    };

    let len = name.chars().count();
    if !(3..=63).contains(&len) {
        return Err(invalid());
    }
    let first = name.chars().next().ok_or_else(invalid)?;
    let last = name.chars().last().ok_or_else(invalid)?;
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(invalid());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid());
    }
    if name.contains("..") {
        return Err(invalid());
    }
    Ok(())
}

/// Ids must be non-empty strings and unique within one call
pub fn validate_ids(ids: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    let mut duplicates = BTreeSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(QuiverError::invalid_argument(
                "Expected ids to be non-empty strings",
            ));
        }
        if !seen.insert(id.as_str()) {
            duplicates.insert(id.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(QuiverError::duplicate_ids(duplicates.into_iter().collect()));
    }
    Ok(())
}

/// Metadata maps must be non-empty with non-empty keys that do not start with `$`
pub fn validate_metadata(metadata: &Metadata) -> Result<()> {
    if metadata.is_empty() {
        return Err(QuiverError::invalid_argument(
            "Expected metadata to be a non-empty dict",
        ));
    }
    for key in metadata.keys() {
        if key.is_empty() {
            return Err(QuiverError::invalid_argument(
                "Expected metadata keys to be non-empty strings",
            ));
        }
        if key.starts_with('$') {
            return Err(QuiverError::invalid_argument(format!(
                "Expected metadata key to not start with $, got {}",
                key
            )));
        }
    }
    Ok(())
}

/// Optional parallel arrays must match the id count
pub fn validate_lengths(
    ids: usize,
    embeddings: Option<usize>,
    metadatas: Option<usize>,
    documents: Option<usize>,
) -> Result<()> {
    for (name, len) in [
        ("embeddings", embeddings),
        ("metadatas", metadatas),
        ("documents", documents),
    ] {
        if let Some(len) = len {
            if len != ids {
                return Err(QuiverError::invalid_argument(format!(
                    "Number of {} {} must match number of ids {}",
                    name, len, ids
                )));
            }
        }
    }
    Ok(())
}

/// All embeddings share one length, equal to the pinned dimensionality if any
///
/// Returns the batch's dimensionality (`None` for an empty batch).
pub fn validate_dimensions(embeddings: &[Vec<f32>], pinned: Option<usize>) -> Result<Option<usize>> {
    let mut expected = pinned;
    for embedding in embeddings {
        if embedding.is_empty() {
            return Err(QuiverError::invalid_argument(
                "Expected each embedding in the embeddings to be a non-empty list",
            ));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(QuiverError::invalid_argument(
                "Expected each value in the embedding to be a finite number",
            ));
        }
        match expected {
            Some(dims) if dims != embedding.len() => {
                return Err(QuiverError::dimension_mismatch(dims, embedding.len()));
            }
            Some(_) => {}
            None => expected = Some(embedding.len()),
        }
    }
    Ok(expected)
}

/// Batches above the engine's limit are rejected whole
pub fn validate_batch_size(len: usize, max_batch_size: usize) -> Result<()> {
    if len > max_batch_size {
        return Err(QuiverError::invalid_argument(format!(
            "Cannot submit more than {} records in one call, got {}",
            max_batch_size, len
        )));
    }
    Ok(())
}

pub fn validate_n_results(n_results: usize) -> Result<()> {
    if n_results == 0 {
        return Err(QuiverError::invalid_argument(
            "Expected requested number of results to be a positive integer",
        ));
    }
    Ok(())
}
