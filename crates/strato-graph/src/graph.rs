use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strato_domain::{Component, Kind};

use crate::error::GraphError;

/// One topological level of the execution schedule. All components in a stage
/// are mutually independent; stages execute sequentially.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub number: usize,
    pub components: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub roots: usize,
    pub leaves: usize,
    pub max_depth: usize,
    pub avg_degree: f64,
    pub has_cycle: bool,
}

/// The component dependency DAG.
///
/// Edges run from a prerequisite to its dependent, so a topological walk
/// visits providers before consumers. Edges come from three sources:
/// explicit `depends_on`, structural references (a subnet names its vpc),
/// and `${component:...}` output references in spec string leaves.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build the DAG. Rejects unknown references and cycles.
    pub fn build(components: &[Component]) -> Result<Self, GraphError> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();

        for comp in components {
            let name = comp.metadata.name.clone();
            let idx = graph.add_node(name.clone());
            index.insert(name, idx);
        }

        for comp in components {
            let to = index[&comp.metadata.name];
            let mut prereqs: BTreeSet<String> = BTreeSet::new();
            prereqs.extend(comp.depends_on().iter().cloned());
            prereqs.extend(comp.referenced_components().iter().map(|s| s.to_string()));
            prereqs.extend(find_output_refs(&comp.spec.to_value()));
            // A structural self-reference would be a modeling bug upstream;
            // a self-edge here would read as a cycle, so reject it as one.
            for prereq in prereqs {
                let from = *index.get(&prereq).ok_or_else(|| GraphError::UnknownReference {
                    component: comp.metadata.name.clone(),
                    reference: prereq.clone(),
                })?;
                if from == to {
                    return Err(GraphError::CircularDependency {
                        component: comp.metadata.name.clone(),
                    });
                }
                graph.update_edge(from, to, ());
            }
        }

        let built = Self { graph, index };
        if let Some(component) = built.find_cycle_member() {
            return Err(GraphError::CircularDependency { component });
        }
        Ok(built)
    }

    /// DFS with an explicit recursion stack; returns one node on a cycle.
    fn find_cycle_member(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let mut marks = vec![Mark::White; self.graph.node_count()];

        fn visit(
            graph: &DiGraph<String, ()>,
            marks: &mut [Mark],
            node: NodeIndex,
        ) -> Option<NodeIndex> {
            marks[node.index()] = Mark::Grey;
            for next in graph.neighbors_directed(node, Direction::Outgoing) {
                match marks[next.index()] {
                    Mark::Grey => return Some(next),
                    Mark::White => {
                        if let Some(found) = visit(graph, marks, next) {
                            return Some(found);
                        }
                    }
                    Mark::Black => {}
                }
            }
            marks[node.index()] = Mark::Black;
            None
        }

        for node in self.graph.node_indices() {
            if marks[node.index()] == Mark::White {
                if let Some(found) = visit(&self.graph, &mut marks, node) {
                    return Some(self.graph[found].clone());
                }
            }
        }
        None
    }

    /// Kahn's algorithm grouped by level: a node enters stage `k` when all of
    /// its prerequisites sit in stages `< k`. Stage numbers start at 1.
    pub fn topological_stages(&self) -> Vec<Stage> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                (
                    n,
                    self.graph.neighbors_directed(n, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut stages = Vec::new();
        let mut ready: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();

        while !ready.is_empty() {
            let mut names: Vec<String> =
                ready.iter().map(|n| self.graph[*n].clone()).collect();
            names.sort();
            stages.push(Stage { number: stages.len() + 1, components: names });

            let mut next = Vec::new();
            for node in ready {
                for dep in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    let d = in_degree.get_mut(&dep).unwrap();
                    *d -= 1;
                    if *d == 0 {
                        next.push(dep);
                    }
                }
            }
            next.sort();
            next.dedup();
            ready = next;
        }

        stages
    }

    /// Stages in destruction order: the reverse of [`topological_stages`],
    /// renumbered from 1.
    pub fn reverse_stages(&self) -> Vec<Stage> {
        let mut stages = self.topological_stages();
        stages.reverse();
        for (i, stage) in stages.iter_mut().enumerate() {
            stage.number = i + 1;
        }
        stages
    }

    /// The flattened topological order, stage by stage.
    pub fn flattened_order(&self) -> Vec<String> {
        self.topological_stages()
            .into_iter()
            .flat_map(|s| s.components)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn stats(&self) -> GraphStats {
        let nodes = self.graph.node_count();
        let edges = self.graph.edge_count();
        let roots = self
            .graph
            .node_indices()
            .filter(|n| {
                self.graph
                    .neighbors_directed(*n, Direction::Incoming)
                    .count()
                    == 0
            })
            .count();
        let leaves = self
            .graph
            .node_indices()
            .filter(|n| {
                self.graph
                    .neighbors_directed(*n, Direction::Outgoing)
                    .count()
                    == 0
            })
            .count();
        GraphStats {
            nodes,
            edges,
            roots,
            leaves,
            max_depth: self.topological_stages().len(),
            avg_degree: if nodes == 0 { 0.0 } else { edges as f64 / nodes as f64 },
            has_cycle: false,
        }
    }
}

/// Component names referenced by `${component:<name>.<output>}` tokens in the
/// string leaves of a spec value.
pub fn find_output_refs(value: &Value) -> Vec<String> {
    let mut refs = Vec::new();
    collect_refs(value, &mut refs);
    refs.sort();
    refs.dedup();
    refs
}

fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let mut rest = s.as_str();
            while let Some(start) = rest.find("${component:") {
                let after = &rest[start + "${component:".len()..];
                let Some(end) = after.find('}') else { break };
                let token = &after[..end];
                if let Some((name, _output)) = token.split_once('.') {
                    out.push(name.to_string());
                }
                rest = &after[end + 1..];
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

/// Destruction priority used when no recorded apply order exists: lower goes
/// first. Workloads, then data and messaging, then network from the leaves
/// inward.
pub fn destroy_priority(kind: Kind) -> usize {
    match kind {
        Kind::Service => 0,
        Kind::Function => 1,
        Kind::Queue => 2,
        Kind::Topic => 3,
        Kind::Table => 4,
        Kind::Bucket => 5,
        Kind::Database => 6,
        Kind::SecurityGroup => 7,
        Kind::RouteTable => 8,
        Kind::NatGateway => 9,
        Kind::Subnet => 10,
        Kind::InternetGateway => 11,
        Kind::Vpc => 12,
    }
}
