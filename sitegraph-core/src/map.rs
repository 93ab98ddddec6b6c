//! Turns raw crawl output into persistable rows, and stored rows into the
//! graph shapes served to callers.

use crate::model::{StoredEdge, StoredNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitegraph_scanner::CrawledNode;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A node row waiting to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub record_id: i64,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub crawl_time: DateTime<Utc>,
    pub boundary: bool,
}

/// An edge candidate, still keyed by URL. Resolved to node ids at persist time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewEdge {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphMode {
    Website,
    Domain,
}

impl GraphMode {
    /// `"domain"` selects domain mode; any other name means website mode.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("domain") {
            GraphMode::Domain
        } else {
            GraphMode::Website
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: i64,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub crawl_time: Option<DateTime<Utc>>,
    pub boundary: bool,
    pub owner: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: i64,
    pub target: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// One node row per crawled node, one edge candidate per execution target.
pub fn transform(raw_nodes: &[CrawledNode], record_id: i64) -> (Vec<NewNode>, Vec<NewEdge>) {
    let mut nodes = Vec::with_capacity(raw_nodes.len());
    let mut edges = Vec::new();

    for raw in raw_nodes {
        nodes.push(NewNode {
            record_id,
            url: raw.url.clone(),
            domain: raw.domain.clone(),
            title: raw.title.clone(),
            crawl_time: raw.crawl_time,
            boundary: raw.boundary,
        });

        edges.extend(raw.execution_targets.iter().map(|target| NewEdge {
            source: raw.url.clone(),
            target: target.clone(),
        }));
    }

    debug!(
        "Transformed {} raw nodes into {} nodes and {} edges for record {}",
        raw_nodes.len(),
        nodes.len(),
        edges.len(),
        record_id
    );
    (nodes, edges)
}

/// The stored per-page graph, ids being the persisted primary keys.
pub fn website_graph(nodes: &[StoredNode], edges: &[StoredEdge]) -> Graph {
    Graph {
        nodes: nodes
            .iter()
            .map(|n| GraphNode {
                id: n.id,
                url: n.url.clone(),
                domain: n.domain.clone(),
                title: n.title.clone(),
                crawl_time: Some(n.crawl_time),
                boundary: n.boundary,
                owner: n.record_id,
            })
            .collect(),
        edges: edges
            .iter()
            .map(|e| GraphEdge {
                source: e.source_id,
                target: e.target_id,
            })
            .collect(),
    }
}

/// Collapses every node onto its domain and deduplicates the edges between domains.
///
/// Ids are scratch values for this one response: 1, 2, ... in the order domains
/// are first met while walking the deduplicated edges. Domains that only appear
/// on isolated nodes come last, in node order.
pub fn domain_graph(nodes: &[StoredNode], edges: &[StoredEdge]) -> Graph {
    let by_id: HashMap<i64, &StoredNode> = nodes.iter().map(|n| (n.id, n)).collect();

    let mut seen_pairs: HashSet<(&str, &str)> = HashSet::new();
    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for edge in edges {
        let (Some(source), Some(target)) = (by_id.get(&edge.source_id), by_id.get(&edge.target_id))
        else {
            continue;
        };
        let pair = (source.domain.as_str(), target.domain.as_str());
        if seen_pairs.insert(pair) {
            pairs.push(pair);
        }
    }

    let mut builder = DomainNodes::default();
    let mut graph_edges = Vec::with_capacity(pairs.len());
    for (source, target) in pairs {
        let source_id = builder.id_for(source, nodes);
        let target_id = builder.id_for(target, nodes);
        graph_edges.push(GraphEdge {
            source: source_id,
            target: target_id,
        });
    }
    for node in nodes {
        builder.id_for(&node.domain, nodes);
    }

    Graph {
        nodes: builder.nodes,
        edges: graph_edges,
    }
}

#[derive(Default)]
struct DomainNodes {
    ids: HashMap<String, i64>,
    nodes: Vec<GraphNode>,
}

impl DomainNodes {
    fn id_for(&mut self, domain: &str, all: &[StoredNode]) -> i64 {
        if let Some(id) = self.ids.get(domain) {
            return *id;
        }

        let id = self.nodes.len() as i64 + 1;
        let members: Vec<&StoredNode> = all.iter().filter(|n| n.domain == domain).collect();
        self.nodes.push(GraphNode {
            id,
            url: domain.to_string(),
            domain: domain.to_string(),
            title: Some(domain.to_string()),
            crawl_time: members.iter().map(|n| n.crawl_time).max(),
            boundary: !members.is_empty() && members.iter().all(|n| n.boundary),
            owner: members.first().map(|n| n.record_id).unwrap_or_default(),
        });
        self.ids.insert(domain.to_string(), id);
        id
    }
}
