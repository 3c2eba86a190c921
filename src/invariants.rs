use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::algorithms::{adjacency_map, out_degree, reachable_from};
use crate::models::{NodeKey, NodeType, QuestEdge, QuestNode, ValidationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphViolation {
    InvalidStartCount { start_count: usize },
    DuplicateNodeKey { key: NodeKey },
    EndNodeHasOutgoing { key: NodeKey },
    Unreachable { key: NodeKey },
    UnknownNodeReference { from_key: NodeKey, to_key: NodeKey, missing_key: NodeKey },
    SelfLoop { key: NodeKey },
    DuplicateEdge { from_key: NodeKey, to_key: NodeKey },
    EmptyTitle { key: NodeKey },
}

impl GraphViolation {
    pub const fn severity(&self) -> Severity {
        match self {
            GraphViolation::Unreachable { .. } | GraphViolation::EmptyTitle { .. } => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            GraphViolation::InvalidStartCount { .. } => "graph_start_count",
            GraphViolation::DuplicateNodeKey { .. } => "graph_duplicate_node_key",
            GraphViolation::EndNodeHasOutgoing { .. } => "graph_end_node_outgoing",
            GraphViolation::Unreachable { .. } => "graph_unreachable_node",
            GraphViolation::UnknownNodeReference { .. } => "graph_unknown_node_reference",
            GraphViolation::SelfLoop { .. } => "graph_self_loop",
            GraphViolation::DuplicateEdge { .. } => "graph_duplicate_edge",
            GraphViolation::EmptyTitle { .. } => "graph_empty_title",
        }
    }

    pub fn message(&self) -> String {
        match self {
            GraphViolation::InvalidStartCount { .. } => {
                "Graph must contain exactly one start node".to_string()
            }
            GraphViolation::DuplicateNodeKey { key } => format!("Duplicate node key \"{key}\""),
            GraphViolation::EndNodeHasOutgoing { key } => {
                format!("End node \"{key}\" has outgoing edges")
            }
            GraphViolation::Unreachable { key } => {
                format!("Node \"{key}\" is unreachable from start")
            }
            GraphViolation::UnknownNodeReference {
                from_key,
                to_key,
                missing_key,
            } => format!("Edge \"{from_key}\" -> \"{to_key}\" references missing node \"{missing_key}\""),
            GraphViolation::SelfLoop { key } => format!("Edge on \"{key}\" loops to itself"),
            GraphViolation::DuplicateEdge { from_key, to_key } => {
                format!("Edge \"{from_key}\" -> \"{to_key}\" is duplicated")
            }
            GraphViolation::EmptyTitle { key } => format!("Node \"{key}\" has no title"),
        }
    }
}

/// Structural checks run after every edit.
pub fn live_violations(nodes: &[QuestNode], edges: &[QuestEdge]) -> Vec<GraphViolation> {
    let mut violations = Vec::new();

    let starts: Vec<&QuestNode> = nodes
        .iter()
        .filter(|node| node.node_type == NodeType::Start)
        .collect();
    if starts.len() != 1 {
        violations.push(GraphViolation::InvalidStartCount {
            start_count: starts.len(),
        });
    }

    let mut seen_keys = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !seen_keys.insert(&node.key) {
            violations.push(GraphViolation::DuplicateNodeKey {
                key: node.key.clone(),
            });
        }
    }

    let mut reported_end = HashSet::new();
    for node in nodes {
        if node.node_type == NodeType::End
            && out_degree(&node.key, edges) > 0
            && reported_end.insert(&node.key)
        {
            violations.push(GraphViolation::EndNodeHasOutgoing {
                key: node.key.clone(),
            });
        }
    }

    if let Some(start) = starts.first() {
        let adjacency = adjacency_map(nodes, edges);
        let reachable = reachable_from(&start.key, &adjacency);
        let mut reported = HashSet::new();
        for node in nodes {
            if !reachable.contains(&node.key) && reported.insert(&node.key) {
                violations.push(GraphViolation::Unreachable {
                    key: node.key.clone(),
                });
            }
        }
    }

    violations
}

/// The stricter check set the backend applies before publishing.
pub fn authoritative_violations(nodes: &[QuestNode], edges: &[QuestEdge]) -> Vec<GraphViolation> {
    let mut violations = live_violations(nodes, edges);
    let keys: HashSet<&NodeKey> = nodes.iter().map(|node| &node.key).collect();

    let mut seen_edges = HashSet::with_capacity(edges.len());
    for edge in edges {
        for endpoint in [&edge.from_key, &edge.to_key] {
            if !keys.contains(endpoint) {
                violations.push(GraphViolation::UnknownNodeReference {
                    from_key: edge.from_key.clone(),
                    to_key: edge.to_key.clone(),
                    missing_key: endpoint.clone(),
                });
            }
        }
        if edge.from_key == edge.to_key {
            violations.push(GraphViolation::SelfLoop {
                key: edge.from_key.clone(),
            });
        }
        if !seen_edges.insert((&edge.from_key, &edge.to_key)) {
            violations.push(GraphViolation::DuplicateEdge {
                from_key: edge.from_key.clone(),
                to_key: edge.to_key.clone(),
            });
        }
    }

    for node in nodes {
        if node.title.trim().is_empty() {
            violations.push(GraphViolation::EmptyTitle {
                key: node.key.clone(),
            });
        }
    }

    violations
}

pub fn report(violations: &[GraphViolation]) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for violation in violations {
        match violation.severity() {
            Severity::Error => errors.push(violation.message()),
            Severity::Warning => warnings.push(violation.message()),
        }
    }
    ValidationReport::from_findings(errors, warnings)
}

/// Live checks as a report for the "Live checks" panel.
pub fn validate(nodes: &[QuestNode], edges: &[QuestEdge]) -> ValidationReport {
    report(&live_violations(nodes, edges))
}

pub fn authoritative_report(nodes: &[QuestNode], edges: &[QuestEdge]) -> ValidationReport {
    report(&authoritative_violations(nodes, edges))
}

/// Best-effort structural repair. Returns one line per change made.
pub fn repair_graph(nodes: &mut [QuestNode], edges: &mut Vec<QuestEdge>) -> Vec<String> {
    let mut changes = Vec::new();

    let mut start_seen = false;
    for node in nodes.iter_mut() {
        if node.node_type == NodeType::Start {
            if start_seen {
                node.node_type = NodeType::Normal;
                changes.push(format!("Demoted extra start node \"{}\"", node.key));
            }
            start_seen = true;
        }
    }
    if !start_seen {
        if let Some(first) = nodes.first_mut() {
            first.node_type = NodeType::Start;
            changes.push(format!("Promoted \"{}\" to start node", first.key));
        }
    }

    let keys: HashSet<NodeKey> = nodes.iter().map(|node| node.key.clone()).collect();
    let end_keys: HashSet<NodeKey> = nodes
        .iter()
        .filter(|node| node.node_type == NodeType::End)
        .map(|node| node.key.clone())
        .collect();
    let mut seen_edges = HashSet::with_capacity(edges.len());
    edges.retain(|edge| {
        let reason = if !keys.contains(&edge.from_key) || !keys.contains(&edge.to_key) {
            Some("dangling")
        } else if edge.from_key == edge.to_key {
            Some("self-loop")
        } else if end_keys.contains(&edge.from_key) {
            Some("end-node")
        } else if !seen_edges.insert((edge.from_key.clone(), edge.to_key.clone())) {
            Some("duplicate")
        } else {
            None
        };
        match reason {
            Some(reason) => {
                changes.push(format!(
                    "Removed {} edge \"{}\" -> \"{}\"",
                    reason, edge.from_key, edge.to_key
                ));
                false
            }
            None => true,
        }
    });

    changes
}
