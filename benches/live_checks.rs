use std::collections::HashSet;
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;

use quest_graph::invariants;
use quest_graph::models::{NodeKey, NodeType, QuestEdge, QuestNode};

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn node(idx: usize, node_count: usize) -> QuestNode {
    let node_type = match idx {
        0 => NodeType::Start,
        idx if idx + 1 == node_count => NodeType::End,
        _ => NodeType::Normal,
    };
    QuestNode {
        key: NodeKey::from(format!("n{idx}")),
        title: format!("Step {idx}"),
        node_type,
        content: json!({}),
        rewards: None,
    }
}

/// Forward-only random quest graph with one start node and one end node.
fn synthetic_quest(node_count: usize, edge_count: usize) -> (Vec<QuestNode>, Vec<QuestEdge>) {
    let nodes = (0..node_count)
        .map(|idx| node(idx, node_count))
        .collect::<Vec<_>>();

    let mut state = 0x1234_5678_9abc_def0u64;
    let mut seen = HashSet::with_capacity(edge_count);
    let mut edges = Vec::with_capacity(edge_count);
    while edges.len() < edge_count {
        let a = (lcg_next(&mut state) as usize) % (node_count - 1);
        let b = (lcg_next(&mut state) as usize) % node_count;
        if a == b {
            continue;
        }
        let (from, to) = if a < b { (a, b) } else { (b, a) };
        if seen.insert((from, to)) {
            edges.push(QuestEdge::new(
                nodes[from].key.clone(),
                nodes[to].key.clone(),
            ));
        }
    }

    (nodes, edges)
}

fn bench_live_checks(c: &mut Criterion) {
    let mut group = c.benchmark_group("live_checks");
    for (nodes, edges) in [(200usize, 600usize), (1_000usize, 3_000usize)] {
        let (node_data, edge_data) = synthetic_quest(nodes, edges);

        group.throughput(Throughput::Elements(nodes as u64));
        group.bench_with_input(
            BenchmarkId::new("validate", format!("{nodes}n_{edges}e")),
            &(node_data, edge_data),
            |b, (nodes, edges)| {
                b.iter(|| black_box(invariants::validate(nodes, edges)));
            },
        );
    }
    group.finish();
}

fn bench_authoritative_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("authoritative_report");
    for (nodes, edges) in [(200usize, 600usize), (1_000usize, 3_000usize)] {
        let (node_data, mut edge_data) = synthetic_quest(nodes, edges);
        // One end-node edge so the report carries an error.
        edge_data.push(QuestEdge::new(
            node_data[nodes - 1].key.clone(),
            node_data[1].key.clone(),
        ));

        group.throughput(Throughput::Elements(nodes as u64));
        group.bench_with_input(
            BenchmarkId::new("authoritative", format!("{nodes}n_{}e", edges + 1)),
            &(node_data, edge_data),
            |b, (nodes, edges)| {
                b.iter(|| black_box(invariants::authoritative_report(nodes, edges)));
            },
        );
    }
    group.finish();
}

criterion_group!(live_checks, bench_live_checks, bench_authoritative_report);
criterion_main!(live_checks);
