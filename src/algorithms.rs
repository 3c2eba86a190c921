use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{NodeKey, QuestEdge, QuestNode};

pub fn adjacency_map<'a>(
    nodes: &'a [QuestNode],
    edges: &'a [QuestEdge],
) -> HashMap<&'a NodeKey, Vec<&'a NodeKey>> {
    let mut adjacency: HashMap<&NodeKey, Vec<&NodeKey>> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        adjacency.entry(&node.key).or_default();
    }
    for edge in edges {
        if !adjacency.contains_key(&edge.from_key) || !adjacency.contains_key(&edge.to_key) {
            // Best-effort behavior: skip dangling edges instead of failing the whole computation.
            continue;
        }
        adjacency
            .entry(&edge.from_key)
            .or_default()
            .push(&edge.to_key);
    }
    adjacency
}

pub fn reachable_from<'a>(
    root: &'a NodeKey,
    adjacency: &HashMap<&'a NodeKey, Vec<&'a NodeKey>>,
) -> HashSet<&'a NodeKey> {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root);
    reachable.insert(root);

    while let Some(key) = queue.pop_front() {
        if let Some(children) = adjacency.get(key) {
            for child in children {
                if reachable.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
    }

    reachable
}

pub fn out_degree(key: &NodeKey, edges: &[QuestEdge]) -> usize {
    edges.iter().filter(|edge| &edge.from_key == key).count()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::NodeType;

    fn node(key: &str) -> QuestNode {
        QuestNode {
            key: key.into(),
            title: key.to_uppercase(),
            node_type: NodeType::Normal,
            content: json!({}),
            rewards: None,
        }
    }

    #[test]
    fn reachability_follows_edges_forward_only() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![
            QuestEdge::new("a".into(), "b".into()),
            QuestEdge::new("c".into(), "a".into()),
        ];
        let adjacency = adjacency_map(&nodes, &edges);
        let root = NodeKey::from("a");
        let reachable = reachable_from(&root, &adjacency);
        assert!(reachable.contains(&NodeKey::from("b")));
        assert!(!reachable.contains(&NodeKey::from("c")));
    }

    #[test]
    fn dangling_edges_are_skipped() {
        let nodes = vec![node("a")];
        let edges = vec![QuestEdge::new("a".into(), "ghost".into())];
        let adjacency = adjacency_map(&nodes, &edges);
        assert_eq!(adjacency[&NodeKey::from("a")].len(), 0);
        assert_eq!(out_degree(&NodeKey::from("a"), &edges), 1);
    }
}
