//! HNSW search algorithms

use super::node::HnswNode;
use super::HnswIndex;
use crate::index::Space;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Candidate for search (min-heap by distance)
#[derive(Clone, Copy, Debug)]
pub struct Candidate {
    pub node_id: u32,
    pub distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap (smaller distance = higher priority)
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Max-heap candidate (larger distance = higher priority, used for result pruning)
#[derive(Clone, Copy, Debug)]
pub struct MaxCandidate {
    pub node_id: u32,
    pub distance: f32,
}

impl PartialEq for MaxCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for MaxCandidate {}

impl PartialOrd for MaxCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MaxCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Search for k nearest live neighbors accepted by `allow`
///
/// Upper layers are descended greedily over every node; the base layer keeps
/// traversing through rejected and tombstoned nodes but only admits accepted
/// ones into the result set.
pub fn search_knn(
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    ef: usize,
    allow: &dyn Fn(u32) -> bool,
) -> Vec<(u32, f32)> {
    let Some(entry) = index.entry_point() else {
        return Vec::new();
    };
    let nodes = index.nodes();
    let space = index.space();

    let mut current = entry;

    // Phase 1: Greedy search from top level to level 1
    for level in (1..=index.max_level()).rev() {
        current = greedy_search_layer(nodes, space, query, current, level);
    }

    // Phase 2: Search layer 0 with ef candidates
    let admit = |id: u32| !nodes[id as usize].deleted && allow(id);
    let candidates = search_layer(nodes, space, query, current, ef.max(k), 0, &admit);

    candidates
        .into_iter()
        .take(k)
        .map(|c| (c.node_id, c.distance))
        .collect()
}

/// Greedy search to find single nearest node at a level
pub fn greedy_search_layer(
    nodes: &[HnswNode],
    space: Space,
    query: &[f32],
    entry: u32,
    level: usize,
) -> u32 {
    let mut current = entry;
    let mut current_dist = space.distance(query, &nodes[current as usize].vector);

    loop {
        let mut changed = false;
        for &neighbor_id in nodes[current as usize].neighbors_at(level) {
            let Some(neighbor) = nodes.get(neighbor_id as usize) else {
                continue;
            };
            let dist = space.distance(query, &neighbor.vector);
            if dist < current_dist {
                current = neighbor_id;
                current_dist = dist;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    current
}

/// Search layer with ef candidates
///
/// Only nodes passing `admit` enter the result set; every node is explored.
pub fn search_layer(
    nodes: &[HnswNode],
    space: Space,
    query: &[f32],
    entry: u32,
    ef: usize,
    level: usize,
    admit: &dyn Fn(u32) -> bool,
) -> Vec<Candidate> {
    let entry_dist = space.distance(query, &nodes[entry as usize].vector);

    let mut visited = HashSet::new();
    visited.insert(entry);

    // Min-heap for candidates to explore
    let mut candidates = BinaryHeap::new();
    candidates.push(Candidate {
        node_id: entry,
        distance: entry_dist,
    });

    // Max-heap for results (worst at top for easy pruning)
    let mut results = BinaryHeap::new();
    let mut lower_bound = f32::INFINITY;
    if admit(entry) {
        results.push(MaxCandidate {
            node_id: entry,
            distance: entry_dist,
        });
        lower_bound = entry_dist;
    }

    while let Some(current) = candidates.pop() {
        // Stop once the closest unexplored candidate cannot improve a full result set
        if current.distance > lower_bound && results.len() >= ef {
            break;
        }

        for &neighbor_id in nodes[current.node_id as usize].neighbors_at(level) {
            if (neighbor_id as usize) >= nodes.len() || !visited.insert(neighbor_id) {
                continue;
            }

            let dist = space.distance(query, &nodes[neighbor_id as usize].vector);

            if results.len() < ef || dist < lower_bound {
                candidates.push(Candidate {
                    node_id: neighbor_id,
                    distance: dist,
                });

                if admit(neighbor_id) {
                    results.push(MaxCandidate {
                        node_id: neighbor_id,
                        distance: dist,
                    });
                    while results.len() > ef {
                        results.pop();
                    }
                }
                if let Some(worst) = results.peek() {
                    lower_bound = worst.distance;
                }
            }
        }
    }

    let mut result_vec: Vec<Candidate> = results
        .into_iter()
        .map(|mc| Candidate {
            node_id: mc.node_id,
            distance: mc.distance,
        })
        .collect();

    result_vec.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
    result_vec
}
