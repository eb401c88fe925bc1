//! Dependency graph construction and topological batching.
//!
//! Two levels of graph: a `requires` graph over pipeline tasks fixes the
//! order of segments, and a local `depends` closure per pipeline task fixes
//! the node order inside each segment.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use flowforge_core::{Collect, Error, Result, ROOT_SCOPE};

use crate::registry::TaskRegistry;

/// One task occurrence inside a segment. The scope is [`ROOT_SCOPE`] for the
/// pipeline task itself and the owning pipeline task's name for its
/// dependencies.
#[derive(Debug, Clone)]
pub struct SegmentNode {
    pub scope: String,
    pub name: String,
    /// The collect_by map of the dependency spec that pulled this node in;
    /// `None` inherits the record's full input.
    pub collect_by: Option<Vec<Collect>>,
}

impl SegmentNode {
    pub fn is_pipeline(&self) -> bool {
        self.scope == ROOT_SCOPE
    }

    /// Dot-joined working-directory component, with the root scope elided:
    /// `Annotate` for pipeline nodes, `Annotate.Sed` for dependencies.
    pub fn wdir_component(&self) -> String {
        if self.is_pipeline() {
            self.name.clone()
        } else {
            format!("{}.{}", self.scope, self.name)
        }
    }
}

/// A topologically sorted list of task nodes ending in a pipeline task and
/// preceded by its transitive `depends` closure.
#[derive(Debug, Clone)]
pub struct Segment {
    nodes: Vec<SegmentNode>,
}

impl Segment {
    pub fn nodes(&self) -> &[SegmentNode] {
        &self.nodes
    }

    pub fn pipeline_node(&self) -> &SegmentNode {
        // Construction guarantees a non-empty list ending in the pipeline
        // task.
        &self.nodes[self.nodes.len() - 1]
    }
}

/// The full pipeline plan: segments in `requires` order.
pub struct DependencyGraph {
    segments: Vec<Segment>,
}

impl DependencyGraph {
    /// Build the plan for every pipeline task registered in `registry`.
    pub fn build(registry: &TaskRegistry) -> Result<Self> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut indices: HashMap<String, NodeIndex> = HashMap::new();
        let root = graph.add_node(ROOT_SCOPE.to_string());

        for task in registry.pipeline_tasks() {
            let task_idx = ensure_node(&mut graph, &mut indices, task);
            graph.add_edge(root, task_idx, ());
            for requirement in &registry.get(task)?.requires {
                registry.get(requirement)?;
                let req_idx = ensure_node(&mut graph, &mut indices, requirement);
                graph.add_edge(req_idx, task_idx, ());
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| Error::CycleDetected(graph[cycle.node_id()].clone()))?;

        let mut segments = Vec::new();
        for idx in order {
            if idx == root {
                continue;
            }
            segments.push(segment_for(&graph[idx], registry)?);
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

fn ensure_node(
    graph: &mut DiGraph<String, ()>,
    indices: &mut HashMap<String, NodeIndex>,
    name: &str,
) -> NodeIndex {
    *indices
        .entry(name.to_string())
        .or_insert_with(|| graph.add_node(name.to_string()))
}

/// Build one pipeline task's segment: the task plus the topologically sorted
/// closure of its `depends` references. Dependencies must match the owning
/// task's kind.
fn segment_for(task: &str, registry: &TaskRegistry) -> Result<Segment> {
    let owner = registry.get(task)?;
    let owner_kind = owner.kind();

    let mut graph: DiGraph<SegmentNode, ()> = DiGraph::new();
    let mut indices: HashMap<String, NodeIndex> = HashMap::new();
    indices.insert(
        task.to_string(),
        graph.add_node(SegmentNode {
            scope: ROOT_SCOPE.to_string(),
            name: task.to_string(),
            collect_by: None,
        }),
    );

    let mut stack = vec![task.to_string()];
    while let Some(current) = stack.pop() {
        let current_idx = indices[&current];
        for spec in registry.get(&current)?.depends.clone() {
            if spec.task == current {
                return Err(Error::MalformedDependsList {
                    task: current,
                    message: format!("{} depends on itself", spec.task),
                });
            }
            let dep = registry.get(&spec.task)?;
            if dep.kind() != owner_kind {
                return Err(Error::KindMismatch {
                    task: task.to_string(),
                    task_kind: owner_kind.label(),
                    dependency: spec.task.clone(),
                    dependency_kind: dep.kind().label(),
                });
            }
            let dep_idx = match indices.get(&spec.task) {
                Some(idx) => *idx,
                None => {
                    let idx = graph.add_node(SegmentNode {
                        scope: task.to_string(),
                        name: spec.task.clone(),
                        collect_by: spec.collect_by.clone(),
                    });
                    indices.insert(spec.task.clone(), idx);
                    stack.push(spec.task.clone());
                    idx
                }
            };
            graph.add_edge(dep_idx, current_idx, ());
        }
    }

    let order = toposort(&graph, None)
        .map_err(|cycle| Error::CycleDetected(graph[cycle.node_id()].name.clone()))?;
    let nodes = order.into_iter().map(|idx| graph[idx].clone()).collect();
    Ok(Segment { nodes })
}
