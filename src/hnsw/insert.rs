//! HNSW insert algorithms

use super::node::HnswNode;
use super::search::{greedy_search_layer, search_layer, Candidate};
use super::HnswIndex;
use rand::Rng;
use std::cmp::Ordering;

/// Insert a node into the HNSW index, returning its slot
pub fn insert_node(index: &mut HnswIndex, vector: Vec<f32>) -> u32 {
    let config = index.config().clone();
    let space = index.space();

    // Generate random level for this node
    let level = random_level(config.ml);
    let new_node_id = index.nodes().len() as u32;

    // Handle first node
    let Some(entry_point) = index.entry_point() else {
        index.nodes_mut().push(HnswNode::new(vector, level));
        index.set_entry_point(new_node_id);
        index.set_max_level(level);
        return new_node_id;
    };

    let current_max_level = index.max_level();
    let mut current = entry_point;

    // Traverse from top to the node's level + 1 (greedy search)
    for l in (level + 1..=current_max_level).rev() {
        current = greedy_search_layer(index.nodes(), space, &vector, current, l);
    }

    // Add the node before we start connecting it
    index.nodes_mut().push(HnswNode::new(vector.clone(), level));

    // Insert at each level from level down to 0
    for l in (0..=level.min(current_max_level)).rev() {
        let nodes = index.nodes_mut();

        // Tombstoned nodes are traversed but never chosen as new neighbors
        let admit = |id: u32| id != new_node_id && !nodes[id as usize].deleted;
        let candidates = search_layer(nodes, space, &vector, current, config.ef_construction, l, &admit);

        let max_neighbors = if l == 0 { config.m_max0 } else { config.m };
        let selected = select_neighbors(&candidates, max_neighbors);

        nodes[new_node_id as usize].set_neighbors(l, selected.clone());

        // Create bidirectional edges
        for &neighbor_id in &selected {
            let neighbor = neighbor_id as usize;
            nodes[neighbor].add_neighbor(l, new_node_id);

            if nodes[neighbor].neighbors_at(l).len() > max_neighbors {
                let neighbor_vec = &nodes[neighbor].vector;
                let mut neighbor_candidates: Vec<(u32, f32)> = nodes[neighbor]
                    .neighbors_at(l)
                    .iter()
                    .filter(|&&n_id| (n_id as usize) < nodes.len())
                    .map(|&n_id| (n_id, space.distance(neighbor_vec, &nodes[n_id as usize].vector)))
                    .collect();

                neighbor_candidates
                    .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

                let pruned: Vec<u32> = neighbor_candidates
                    .into_iter()
                    .take(max_neighbors)
                    .map(|(id, _)| id)
                    .collect();

                nodes[neighbor].set_neighbors(l, pruned);
            }
        }

        // Use closest neighbor as entry point for next level
        if let Some(closest) = candidates.first() {
            current = closest.node_id;
        }
    }

    // Update entry point if new node has higher level
    if level > current_max_level {
        index.set_entry_point(new_node_id);
        index.set_max_level(level);
    }

    new_node_id
}

/// Generate random level using exponential distribution
fn random_level(ml: f64) -> usize {
    let mut rng = rand::thread_rng();
    let r: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    (-r.ln() * ml).floor() as usize
}

/// Select neighbors - closest M, which holds up well for high-dimensional vectors
/// Candidates must be sorted by distance to the new vector
fn select_neighbors(candidates: &[Candidate], max_count: usize) -> Vec<u32> {
    let mut result = Vec::with_capacity(max_count);
    for candidate in candidates {
        if result.len() >= max_count {
            break;
        }
        if !result.contains(&candidate.node_id) {
            result.push(candidate.node_id);
        }
    }
    result
}
