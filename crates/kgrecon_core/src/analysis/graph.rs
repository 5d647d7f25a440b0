//! Live-graph analyses: structural gaps and community bridges.
//!
//! # Responsibility
//! - Build the undirected subgraph of non-excluded entities.
//! - Find unconnected pairs of well-connected entities with many shared
//!   neighbors.
//! - Find entities whose neighbors span several communities.
//!
//! # Invariants
//! - Excluded entities appear neither as endpoints nor as neighbors.
//! - Output order is fully determined by the store contents.

use crate::config::AnalysisConfig;
use crate::model::EntityId;
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::relationship_repo::{RelationshipRepository, SqliteRelationshipRepository};
use crate::repo::RepoResult;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Undirected view of the non-excluded graph.
///
/// `degree` counts relationship rows, so two typed edges between the same
/// pair count twice; `neighbors` holds each adjacent entity once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveGraph {
    neighbors: BTreeMap<EntityId, BTreeSet<EntityId>>,
    degree: BTreeMap<EntityId, u32>,
    /// Relationship rows per unordered pair.
    multiplicity: BTreeMap<(EntityId, EntityId), u32>,
}

impl LiveGraph {
    pub fn load(conn: &rusqlite::Connection) -> RepoResult<Self> {
        let nodes: Vec<EntityId> = SqliteEntityRepository::new(conn)
            .list_entities(None)?
            .into_iter()
            .filter(|entity| !entity.exclude_from_analysis)
            .map(|entity| entity.id)
            .collect();
        let edges: Vec<(EntityId, EntityId)> = SqliteRelationshipRepository::new(conn)
            .list_relationships()?
            .into_iter()
            .map(|relationship| (relationship.source_entity_id, relationship.target_entity_id))
            .collect();
        Ok(Self::from_edges(nodes, edges))
    }

    /// Builds the graph over `nodes`; edges touching anything else are
    /// ignored, as are self-loops.
    pub fn from_edges(
        nodes: impl IntoIterator<Item = EntityId>,
        edges: impl IntoIterator<Item = (EntityId, EntityId)>,
    ) -> Self {
        let mut graph = Self::default();
        for node in nodes {
            graph.neighbors.entry(node.clone()).or_default();
            graph.degree.entry(node).or_default();
        }
        for (a, b) in edges {
            if a == b || !graph.neighbors.contains_key(&a) || !graph.neighbors.contains_key(&b) {
                continue;
            }
            let key = if a < b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
            *graph.multiplicity.entry(key).or_default() += 1;
            *graph.degree.entry(a.clone()).or_default() += 1;
            *graph.degree.entry(b.clone()).or_default() += 1;
            graph.neighbors.entry(a.clone()).or_default().insert(b.clone());
            graph.neighbors.entry(b).or_default().insert(a);
        }
        graph
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.neighbors.keys()
    }

    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn degree(&self, id: &str) -> u32 {
        self.degree.get(id).copied().unwrap_or(0)
    }

    pub fn neighbors(&self, id: &str) -> Option<&BTreeSet<EntityId>> {
        self.neighbors.get(id)
    }

    pub fn connected(&self, a: &str, b: &str) -> bool {
        self.neighbors.get(a).is_some_and(|set| set.contains(b))
    }

    /// Unordered pairs with the number of relationship rows joining them.
    pub fn weighted_edges(&self) -> impl Iterator<Item = (&EntityId, &EntityId, u32)> {
        self.multiplicity.iter().map(|((a, b), count)| (a, b, *count))
    }
}

/// An unconnected pair of well-connected entities with shared neighbors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuralGap {
    pub entity_a: EntityId,
    pub entity_b: EntityId,
    pub shared_neighbors: u32,
    pub combined_degree: u32,
}

/// Common-neighbor gap detection over entities with degree at least
/// `gap_min_degree`.
pub fn find_gaps(graph: &LiveGraph, config: &AnalysisConfig) -> Vec<StructuralGap> {
    let eligible = |id: &str| graph.degree(id) >= config.gap_min_degree;

    // Every eligible pair sharing a neighbor shows up in that neighbor's
    // adjacency list.
    let mut shared: HashMap<(&EntityId, &EntityId), u32> = HashMap::new();
    for neighbors in graph.neighbors.values() {
        let candidates: Vec<&EntityId> = neighbors.iter().filter(|id| eligible(id)).collect();
        for (index, a) in candidates.iter().enumerate() {
            for b in &candidates[index + 1..] {
                *shared.entry((*a, *b)).or_default() += 1;
            }
        }
    }

    let mut gaps: Vec<StructuralGap> = shared
        .into_iter()
        .filter(|((a, b), count)| *count >= config.gap_min_shared && !graph.connected(a, b))
        .map(|((a, b), count)| StructuralGap {
            entity_a: a.clone(),
            entity_b: b.clone(),
            shared_neighbors: count,
            combined_degree: graph.degree(a) + graph.degree(b),
        })
        .collect();
    gaps.sort_by(compare_gaps);
    if let Some(cap) = config.gap_candidate_cap {
        gaps.truncate(cap);
    }
    gaps
}

fn compare_gaps(a: &StructuralGap, b: &StructuralGap) -> Ordering {
    b.shared_neighbors
        .cmp(&a.shared_neighbors)
        .then_with(|| b.combined_degree.cmp(&a.combined_degree))
        .then_with(|| a.entity_a.cmp(&b.entity_a))
        .then_with(|| a.entity_b.cmp(&b.entity_b))
}

/// An entity whose neighbors fall into two or more communities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommunityBridge {
    pub entity_id: EntityId,
    pub community: usize,
    pub communities_spanned: u32,
}

pub fn find_bridges(graph: &LiveGraph, membership: &BTreeMap<EntityId, usize>) -> Vec<CommunityBridge> {
    let mut bridges: Vec<CommunityBridge> = graph
        .neighbors
        .iter()
        .filter_map(|(id, neighbors)| {
            let spanned: BTreeSet<usize> = neighbors
                .iter()
                .filter_map(|neighbor| membership.get(neighbor).copied())
                .collect();
            let community = membership.get(id).copied()?;
            (spanned.len() >= 2).then(|| CommunityBridge {
                entity_id: id.clone(),
                community,
                communities_spanned: spanned.len() as u32,
            })
        })
        .collect();
    bridges.sort_by(|a, b| {
        b.communities_spanned
            .cmp(&a.communities_spanned)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    bridges
}

#[cfg(test)]
mod tests {
    use super::{find_bridges, find_gaps, LiveGraph};
    use crate::config::AnalysisConfig;
    use std::collections::BTreeMap;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> LiveGraph {
        LiveGraph::from_edges(
            nodes.iter().map(|node| node.to_string()),
            edges.iter().map(|(a, b)| (a.to_string(), b.to_string())),
        )
    }

    #[test]
    fn edges_to_unknown_nodes_and_self_loops_are_ignored() {
        let graph = graph(&["A", "B"], &[("A", "B"), ("A", "A"), ("A", "Z")]);
        assert_eq!(graph.degree("A"), 1);
        assert_eq!(graph.degree("Z"), 0);
        assert!(graph.connected("B", "A"));
    }

    #[test]
    fn gaps_need_shared_neighbors_and_no_direct_edge() {
        let config = AnalysisConfig {
            gap_min_degree: 3,
            gap_min_shared: 3,
            ..AnalysisConfig::default()
        };
        let edges = [
            ("A", "N1"),
            ("A", "N2"),
            ("A", "N3"),
            ("B", "N1"),
            ("B", "N2"),
            ("B", "N3"),
            ("C", "N1"),
            ("C", "N2"),
            ("C", "N3"),
            ("C", "A"),
        ];
        let graph = graph(&["A", "B", "C", "N1", "N2", "N3"], &edges);
        let gaps = find_gaps(&graph, &config);
        let pairs: Vec<(&str, &str)> = gaps
            .iter()
            .map(|gap| (gap.entity_a.as_str(), gap.entity_b.as_str()))
            .collect();
        // N1..N3 also pair up through A, B and C.
        assert!(pairs.contains(&("B", "C")));
        assert!(pairs.contains(&("A", "B")));
        assert!(!pairs.contains(&("A", "C")));
        assert!(gaps.iter().all(|gap| gap.shared_neighbors >= 3));
        assert_eq!(gaps.len(), 5);
        assert_eq!(pairs[0], ("A", "B"));
        assert_eq!(pairs[1], ("B", "C"));
        assert_eq!(gaps[2].combined_degree, 6);
    }

    #[test]
    fn bridges_span_at_least_two_communities() {
        let graph = graph(&["A", "B", "C", "H"], &[("H", "A"), ("H", "B"), ("H", "C")]);
        let membership: BTreeMap<String, usize> = [("A", 0), ("B", 1), ("C", 1), ("H", 0)]
            .into_iter()
            .map(|(id, community)| (id.to_string(), community))
            .collect();
        let bridges = find_bridges(&graph, &membership);
        assert_eq!(bridges.len(), 1);
        assert_eq!(bridges[0].entity_id, "H");
        assert_eq!(bridges[0].communities_spanned, 2);
    }
}
