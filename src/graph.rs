use anyhow::anyhow;
use serde_json::{Value, json};

use crate::error::{LibError, Result};
use crate::invariants;
use crate::models::{
    NodeKey, NodeType, QuestEdge, QuestNode, ValidationReport, VersionGraph, VersionMeta,
};

#[derive(Debug, Clone, PartialEq)]
pub struct GraphModel {
    version: VersionMeta,
    nodes: Vec<QuestNode>,
    edges: Vec<QuestEdge>,
    revision: u64,
}

impl GraphModel {
    pub fn new(version: VersionMeta) -> Self {
        Self {
            version,
            nodes: Vec::new(),
            edges: Vec::new(),
            revision: 0,
        }
    }

    /// Loads server data verbatim; nothing is normalized or rejected.
    pub fn from_version_graph(graph: VersionGraph) -> Self {
        Self {
            version: graph.version,
            nodes: graph.nodes,
            edges: graph.edges,
            revision: 0,
        }
    }

    /// Replaces the whole graph with server data. Counts as a mutation so the
    /// revision keeps increasing across reloads.
    pub fn reload(&mut self, graph: VersionGraph) {
        self.version = graph.version;
        self.nodes = graph.nodes;
        self.edges = graph.edges;
        self.touch();
    }

    pub fn to_version_graph(&self) -> VersionGraph {
        VersionGraph {
            version: self.version.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn version(&self) -> &VersionMeta {
        &self.version
    }

    pub fn nodes(&self) -> &[QuestNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[QuestEdge] {
        &self.edges
    }

    pub fn node(&self, key: &NodeKey) -> Option<&QuestNode> {
        self.nodes.iter().find(|node| &node.key == key)
    }

    /// Bumped by every successful mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn validate(&self) -> ValidationReport {
        invariants::validate(&self.nodes, &self.edges)
    }

    pub fn add_node(&mut self, raw_key: &str, title: &str, node_type: NodeType) -> Result<NodeKey> {
        let key = NodeKey::normalize(raw_key)?;
        if self.node(&key).is_some() {
            return Err(LibError::duplicate_key(
                "A node with this key already exists",
                anyhow!("duplicate node key {}", key),
            ));
        }

        let node_type = if self.nodes.is_empty() {
            NodeType::Start
        } else {
            node_type
        };
        self.nodes.push(QuestNode {
            key: key.clone(),
            title: title.to_string(),
            node_type,
            content: json!({}),
            rewards: None,
        });
        self.touch();
        Ok(key)
    }

    pub fn add_edge(&mut self, from: &NodeKey, to: &NodeKey) -> Result<()> {
        if from == to {
            return Err(LibError::self_loop(
                "A node cannot link to itself",
                anyhow!("self loop on {}", from),
            ));
        }
        for endpoint in [from, to] {
            if self.node(endpoint).is_none() {
                return Err(LibError::not_found(
                    "Edge endpoint not found",
                    anyhow!("missing node {}", endpoint),
                ));
            }
        }
        if self.edge_index(from, to).is_some() {
            return Err(LibError::duplicate_edge(
                "These nodes are already linked",
                anyhow!("duplicate edge {} -> {}", from, to),
            ));
        }

        self.edges.push(QuestEdge::new(from.clone(), to.clone()));
        self.touch();
        Ok(())
    }

    /// Removes the node and every edge touching it.
    pub fn delete_node(&mut self, key: &NodeKey) -> Result<QuestNode> {
        let index = self.node_index(key)?;
        let removed = self.nodes.remove(index);
        self.edges
            .retain(|edge| &edge.from_key != key && &edge.to_key != key);
        self.touch();
        Ok(removed)
    }

    pub fn update_node_type(&mut self, key: &NodeKey, node_type: NodeType) -> Result<()> {
        self.node_mut(key)?.node_type = node_type;
        self.touch();
        Ok(())
    }

    pub fn update_node_title(&mut self, key: &NodeKey, title: &str) -> Result<()> {
        self.node_mut(key)?.title = title.to_string();
        self.touch();
        Ok(())
    }

    pub fn update_node_content(&mut self, key: &NodeKey, content: Value) -> Result<()> {
        self.node_mut(key)?.content = content;
        self.touch();
        Ok(())
    }

    pub fn update_node_rewards(&mut self, key: &NodeKey, rewards: Option<Value>) -> Result<()> {
        self.node_mut(key)?.rewards = rewards;
        self.touch();
        Ok(())
    }

    /// Re-points an edge. Endpoints are not checked; live validation reports problems.
    pub fn update_edge_endpoint(
        &mut self,
        from: &NodeKey,
        to: &NodeKey,
        new_from: NodeKey,
        new_to: NodeKey,
    ) -> Result<()> {
        let index = self.existing_edge_index(from, to)?;
        let edge = &mut self.edges[index];
        edge.from_key = new_from;
        edge.to_key = new_to;
        self.touch();
        Ok(())
    }

    pub fn update_edge_label(
        &mut self,
        from: &NodeKey,
        to: &NodeKey,
        label: Option<String>,
    ) -> Result<()> {
        let index = self.existing_edge_index(from, to)?;
        self.edges[index].label = label;
        self.touch();
        Ok(())
    }

    pub fn update_edge_condition(
        &mut self,
        from: &NodeKey,
        to: &NodeKey,
        condition: Option<Value>,
    ) -> Result<()> {
        let index = self.existing_edge_index(from, to)?;
        self.edges[index].condition = condition;
        self.touch();
        Ok(())
    }

    pub fn delete_edge(&mut self, from: &NodeKey, to: &NodeKey) -> Result<QuestEdge> {
        let index = self.existing_edge_index(from, to)?;
        let removed = self.edges.remove(index);
        self.touch();
        Ok(removed)
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn node_index(&self, key: &NodeKey) -> Result<usize> {
        self.nodes
            .iter()
            .position(|node| &node.key == key)
            .ok_or_else(|| LibError::not_found("Node not found", anyhow!("missing node {}", key)))
    }

    fn node_mut(&mut self, key: &NodeKey) -> Result<&mut QuestNode> {
        let index = self.node_index(key)?;
        Ok(&mut self.nodes[index])
    }

    fn edge_index(&self, from: &NodeKey, to: &NodeKey) -> Option<usize> {
        self.edges
            .iter()
            .position(|edge| &edge.from_key == from && &edge.to_key == to)
    }

    fn existing_edge_index(&self, from: &NodeKey, to: &NodeKey) -> Result<usize> {
        self.edge_index(from, to).ok_or_else(|| {
            LibError::not_found(
                "Edge not found",
                anyhow!("missing edge {} -> {}", from, to),
            )
        })
    }
}
