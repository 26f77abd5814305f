//! Query planner
//!
//! Combines predicate evaluation over the record table with ANN search:
//! 1. Candidate ids from `where` / `where_document` (none = unrestricted)
//! 2. Per query vector, k nearest among the candidates from the synchronizer
//!    (pending buffer + index)
//! 3. Hydration of the included fields from the same table snapshot
//!
//! Runs synchronously under one table read guard; callers put it on a
//! blocking thread.

use crate::error::{QuiverError, Result};
use crate::filter::{Where, WhereDocument};
use crate::index::{sort_neighbors, CandidateSet, Neighbor, Space};
use crate::record::{RecordTable, Selector};
use crate::sync::BatchSynchronizer;
use crate::types::{Include, QueryResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared with a running query
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QuiverError::Cancelled("query cancelled".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Parsed query, ready to run
pub(crate) struct QueryPlan<'a> {
    pub queries: &'a [Vec<f32>],
    pub n_results: usize,
    pub where_: Option<&'a Where>,
    pub where_document: Option<&'a WhereDocument>,
    pub include: &'a [Include],
}

pub(crate) fn execute(
    collection: &str,
    table: &RecordTable,
    sync: &BatchSynchronizer,
    plan: &QueryPlan<'_>,
    cancel: &CancelToken,
) -> Result<QueryResult> {
    let mut result = QueryResult::empty(plan.queries.len(), plan.include);
    if table.count() == 0 {
        return Ok(result);
    }

    if let Some(dims) = table.dimensions() {
        if let Some(query) = plan.queries.iter().find(|q| q.len() != dims) {
            return Err(QuiverError::dimension_mismatch(dims, query.len()));
        }
    }

    let candidates: Option<CandidateSet> = if plan.where_.is_some() || plan.where_document.is_some() {
        let selector = Selector {
            ids: None,
            where_: plan.where_.cloned(),
            where_document: plan.where_document.cloned(),
        };
        Some(table.select(&selector).into_iter().map(|r| r.id.clone()).collect())
    } else {
        None
    };

    let eligible = candidates.as_ref().map_or(table.count(), |c| c.len());
    if eligible == 0 {
        return Ok(result);
    }
    let k = if plan.n_results > eligible {
        tracing::warn!(
            collection = %collection,
            requested = plan.n_results,
            count = eligible,
            "Number of requested results is greater than number of eligible records, clamping"
        );
        eligible
    } else {
        plan.n_results
    };

    cancel.check()?;

    let space = sync.index_config().space;
    for (i, query) in plan.queries.iter().enumerate() {
        cancel.check()?;

        let mut neighbors = if sync.needs_rebuild() {
            exact_search(table, space, query, k, candidates.as_ref())
        } else {
            sync.search(query, k, candidates.as_ref())
        };

        let missing = neighbors.iter().any(|n| !table.contains(&n.id));
        if missing {
            tracing::warn!(
                collection = %collection,
                version = table.version(),
                "Index returned ids missing from the record store; marking for rebuild"
            );
            sync.mark_for_rebuild();
        }
        if missing || neighbors.len() < k {
            neighbors = exact_search(table, space, query, k, candidates.as_ref());
        }

        for neighbor in &neighbors {
            if let Some(record) = table.get(&neighbor.id) {
                result.push(i, record, neighbor.distance);
            }
        }
    }

    Ok(result)
}

/// Exact k nearest over the table
pub(crate) fn exact_search(
    table: &RecordTable,
    space: Space,
    query: &[f32],
    k: usize,
    candidates: Option<&CandidateSet>,
) -> Vec<Neighbor> {
    let mut scored: Vec<Neighbor> = table
        .iter()
        .filter(|r| candidates.map_or(true, |c| c.contains(&r.id)))
        .map(|r| Neighbor {
            id: r.id.clone(),
            distance: space.distance(query, &r.embedding),
        })
        .collect();
    sort_neighbors(&mut scored);
    scored.truncate(k);
    scored
}
