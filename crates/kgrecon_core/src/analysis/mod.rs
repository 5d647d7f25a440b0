//! Read-mostly analytical passes over the reconciled store.
//!
//! # Responsibility
//! - Score relationship corroboration.
//! - Detect structural gaps and community bridges on the live graph.
//! - Rank entities by composite priority.
//!
//! # Invariants
//! - Entities flagged `exclude_from_analysis` never reach any output.

pub mod community;
pub mod corroboration;
pub mod graph;
pub mod priority;

use crate::config::AnalysisConfig;
use crate::repo::RepoResult;
use community::{louvain, Partition};
use graph::{find_bridges, find_gaps, CommunityBridge, LiveGraph, StructuralGap};
use log::info;
use rusqlite::Connection;

/// Results of the graph analyses for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphAnalysis {
    pub graph: LiveGraph,
    pub partition: Partition,
    pub gaps: Vec<StructuralGap>,
    pub bridges: Vec<CommunityBridge>,
}

/// Loads the live graph and runs gap and bridge detection.
pub fn analyze_graph(conn: &Connection, config: &AnalysisConfig) -> RepoResult<GraphAnalysis> {
    let graph = LiveGraph::load(conn)?;
    let partition = louvain(&graph, config.louvain_max_sweeps);
    let gaps = find_gaps(&graph, config);
    let bridges = find_bridges(&graph, &partition.membership);
    info!(
        "event=graph_analyzed module=analysis status=ok nodes={} communities={} modularity={:.4} gaps={} bridges={}",
        graph.node_count(),
        partition.communities,
        partition.modularity,
        gaps.len(),
        bridges.len()
    );
    Ok(GraphAnalysis {
        graph,
        partition,
        gaps,
        bridges,
    })
}
