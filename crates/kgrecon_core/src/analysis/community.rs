//! Deterministic Louvain modularity clustering.
//!
//! Nodes are visited in id order. A node leaves its current community only
//! for a strictly better modularity gain; among equally good alternatives
//! the smallest community index wins. A given graph therefore always yields
//! the same partition.

use super::graph::LiveGraph;
use crate::model::EntityId;
use serde::Serialize;
use std::collections::BTreeMap;

const MIN_GAIN: f64 = 1e-12;

/// Community assignment for every node of a [`LiveGraph`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Partition {
    pub membership: BTreeMap<EntityId, usize>,
    pub communities: usize,
    pub modularity: f64,
    pub levels: u32,
}

/// Weighted undirected graph over dense indices. A self-loop entry holds
/// both directions of every internal edge.
#[derive(Debug, Clone)]
struct WeightedGraph {
    adjacency: Vec<BTreeMap<usize, f64>>,
}

impl WeightedGraph {
    fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    fn strength(&self, node: usize) -> f64 {
        self.adjacency[node].values().sum()
    }

    fn total_strength(&self) -> f64 {
        (0..self.node_count()).map(|node| self.strength(node)).sum()
    }

    /// Collapses each community into one node.
    fn aggregate(&self, community: &[usize], count: usize) -> Self {
        let mut adjacency = vec![BTreeMap::new(); count];
        for (node, edges) in self.adjacency.iter().enumerate() {
            for (&other, &weight) in edges {
                *adjacency[community[node]].entry(community[other]).or_insert(0.0) += weight;
            }
        }
        Self { adjacency }
    }
}

/// Runs Louvain until a level moves no node, with at most `max_sweeps`
/// local-moving sweeps per level.
pub fn louvain(graph: &LiveGraph, max_sweeps: u32) -> Partition {
    let ids: Vec<&EntityId> = graph.node_ids().collect();
    let index: BTreeMap<&EntityId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut adjacency = vec![BTreeMap::new(); ids.len()];
    for (a, b, weight) in graph.weighted_edges() {
        let (Some(&ia), Some(&ib)) = (index.get(a), index.get(b)) else {
            continue;
        };
        *adjacency[ia].entry(ib).or_insert(0.0) += f64::from(weight);
        *adjacency[ib].entry(ia).or_insert(0.0) += f64::from(weight);
    }
    let original = WeightedGraph { adjacency };

    // Original node -> node of the current level.
    let mut assignment: Vec<usize> = (0..ids.len()).collect();
    let mut current = original.clone();
    let mut levels = 0;
    loop {
        let Some((community, count)) = local_moving(&current, max_sweeps) else {
            break;
        };
        levels += 1;
        for slot in assignment.iter_mut() {
            *slot = community[*slot];
        }
        if count == current.node_count() {
            break;
        }
        current = current.aggregate(&community, count);
    }

    let communities = assignment.iter().copied().max().map_or(0, |max| max + 1);
    Partition {
        modularity: modularity(&original, &assignment),
        membership: ids
            .iter()
            .zip(assignment.iter())
            .map(|(id, community)| ((*id).clone(), *community))
            .collect(),
        communities,
        levels,
    }
}

/// One Louvain level. Returns dense community labels and their count, or
/// `None` when no node moved.
fn local_moving(graph: &WeightedGraph, max_sweeps: u32) -> Option<(Vec<usize>, usize)> {
    let n = graph.node_count();
    let m2 = graph.total_strength();
    if n == 0 || m2 <= 0.0 {
        return None;
    }
    let strength: Vec<f64> = (0..n).map(|node| graph.strength(node)).collect();
    let mut community: Vec<usize> = (0..n).collect();
    let mut total: Vec<f64> = strength.clone();

    let mut moved_ever = false;
    for _ in 0..max_sweeps {
        let mut moved = false;
        for node in 0..n {
            let current = community[node];
            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for (&other, &weight) in &graph.adjacency[node] {
                if other != node {
                    *links.entry(community[other]).or_insert(0.0) += weight;
                }
            }

            total[current] -= strength[node];
            let gain = |target: usize, weight: f64| weight - total[target] * strength[node] / m2;
            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            for (&target, &weight) in &links {
                let candidate = gain(target, weight);
                if candidate > best_gain + MIN_GAIN {
                    best = target;
                    best_gain = candidate;
                }
            }
            total[best] += strength[node];
            if best != current {
                community[node] = best;
                moved = true;
            }
        }
        if !moved {
            break;
        }
        moved_ever = true;
    }
    if !moved_ever {
        return None;
    }

    // Dense labels in order of first appearance.
    let mut labels: BTreeMap<usize, usize> = BTreeMap::new();
    let mut dense = Vec::with_capacity(n);
    for &raw in &community {
        let next = labels.len();
        dense.push(*labels.entry(raw).or_insert(next));
    }
    let count = labels.len();
    Some((dense, count))
}

fn modularity(graph: &WeightedGraph, community: &[usize]) -> f64 {
    let m2 = graph.total_strength();
    if m2 <= 0.0 {
        return 0.0;
    }
    let count = community.iter().copied().max().map_or(0, |max| max + 1);
    let mut internal = vec![0.0; count];
    let mut total = vec![0.0; count];
    for (node, edges) in graph.adjacency.iter().enumerate() {
        total[community[node]] += graph.strength(node);
        for (&other, &weight) in edges {
            if community[other] == community[node] {
                internal[community[node]] += weight;
            }
        }
    }
    internal
        .iter()
        .zip(total.iter())
        .map(|(inside, tot)| inside / m2 - (tot / m2).powi(2))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::louvain;
    use crate::analysis::graph::LiveGraph;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> LiveGraph {
        LiveGraph::from_edges(
            nodes.iter().map(|node| node.to_string()),
            edges.iter().map(|(a, b)| (a.to_string(), b.to_string())),
        )
    }

    fn two_triangles() -> LiveGraph {
        graph(
            &["A", "B", "C", "X", "Y", "Z"],
            &[
                ("A", "B"),
                ("B", "C"),
                ("A", "C"),
                ("X", "Y"),
                ("Y", "Z"),
                ("X", "Z"),
                ("C", "X"),
            ],
        )
    }

    #[test]
    fn two_triangles_split_into_two_communities() {
        let partition = louvain(&two_triangles(), 100);
        assert_eq!(partition.communities, 2);
        let m = &partition.membership;
        assert_eq!(m["A"], m["B"]);
        assert_eq!(m["B"], m["C"]);
        assert_eq!(m["X"], m["Y"]);
        assert_eq!(m["Y"], m["Z"]);
        assert_ne!(m["A"], m["X"]);
        assert!(partition.modularity > 0.3);
    }

    #[test]
    fn partition_is_deterministic() {
        assert_eq!(louvain(&two_triangles(), 100), louvain(&two_triangles(), 100));
    }

    #[test]
    fn edgeless_graph_keeps_singletons() {
        let partition = louvain(&graph(&["A", "B"], &[]), 100);
        assert_eq!(partition.communities, 2);
        assert_eq!(partition.modularity, 0.0);
        assert_ne!(partition.membership["A"], partition.membership["B"]);
    }
}
