use leycore::{Edge, NodeId, NodeSpec, PlanError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Dependency-respecting schedule for one run.
///
/// Planning is a pure function of the node and edge lists: the same inputs
/// always produce the same plan, and a plan is never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Every node exactly once, each after all of its dependencies
    pub execution_order: Vec<NodeId>,
    /// Node id to the ids its incoming edges come from
    pub dependencies: HashMap<NodeId, Vec<NodeId>>,
    /// Dependency-depth levels; advisory only, the scheduler recomputes
    /// eligibility every round
    pub parallel_groups: Vec<Vec<NodeId>>,
    pub entry_points: Vec<NodeId>,
    pub exit_points: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

struct Frame {
    node: NodeIndex,
    dependencies: Vec<NodeIndex>,
    cursor: usize,
}

/// Edges whose endpoints are not both declared nodes are ignored. When two
/// nodes share an id, the first one wins.
struct DependencyGraph {
    graph: DiGraph<NodeId, ()>,
    declared: Vec<NodeIndex>,
}

impl DependencyGraph {
    fn new(nodes: &[NodeSpec], edges: &[Edge]) -> Self {
        let mut graph = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();
        let mut declared = Vec::with_capacity(nodes.len());

        for node in nodes {
            if index.contains_key(node.id.as_str()) {
                tracing::warn!("Duplicate node id {} ignored by planner", node.id);
                continue;
            }
            let idx = graph.add_node(node.id.clone());
            index.insert(node.id.as_str(), idx);
            declared.push(idx);
        }

        for edge in edges {
            match (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
                (Some(&source), Some(&target)) => {
                    graph.add_edge(source, target, ());
                }
                _ => tracing::debug!(
                    edge = %edge.id,
                    "Edge references an undeclared node; ignoring"
                ),
            }
        }

        Self { graph, declared }
    }

    /// Sources of incoming edges, in edge declaration order, deduplicated.
    fn dependencies_of(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut incoming: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| (e.id().index(), e.source()))
            .collect();
        incoming.sort_by_key(|(edge, _)| *edge);

        let mut seen = HashSet::new();
        incoming
            .into_iter()
            .map(|(_, source)| source)
            .filter(|source| seen.insert(*source))
            .collect()
    }

    fn has_dependents(&self, node: NodeIndex) -> bool {
        self.graph
            .neighbors_directed(node, Direction::Outgoing)
            .next()
            .is_some()
    }

    /// Depth-first post-order over dependencies, roots taken in declaration
    /// order. Re-entering a node still on the stack is a cycle.
    fn topological_order(&self) -> Result<Vec<NodeIndex>, PlanError> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut order = Vec::with_capacity(self.declared.len());

        for &root in &self.declared {
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }

            marks[root.index()] = Mark::Visiting;
            let mut stack = vec![Frame {
                node: root,
                dependencies: self.dependencies_of(root),
                cursor: 0,
            }];

            while let Some(frame) = stack.last_mut() {
                match frame.dependencies.get(frame.cursor).copied() {
                    Some(dep) => {
                        frame.cursor += 1;
                        match marks[dep.index()] {
                            Mark::Done => {}
                            Mark::Visiting => {
                                return Err(PlanError::CyclicDependency(self.graph[dep].clone()));
                            }
                            Mark::Unvisited => {
                                marks[dep.index()] = Mark::Visiting;
                                stack.push(Frame {
                                    node: dep,
                                    dependencies: self.dependencies_of(dep),
                                    cursor: 0,
                                });
                            }
                        }
                    }
                    None => {
                        let node = frame.node;
                        stack.pop();
                        marks[node.index()] = Mark::Done;
                        order.push(node);
                    }
                }
            }
        }

        Ok(order)
    }
}

impl ExecutionPlan {
    /// Build the plan, or fail with [`PlanError::CyclicDependency`] naming a
    /// node on the cycle.
    pub fn build(nodes: &[NodeSpec], edges: &[Edge]) -> Result<Self, PlanError> {
        let graph = DependencyGraph::new(nodes, edges);
        let order = graph.topological_order()?;

        let mut dependencies = HashMap::with_capacity(order.len());
        let mut entry_points = Vec::new();
        let mut exit_points = Vec::new();

        for &idx in &graph.declared {
            let id = graph.graph[idx].clone();
            let deps: Vec<NodeId> = graph
                .dependencies_of(idx)
                .into_iter()
                .map(|d| graph.graph[d].clone())
                .collect();

            if deps.is_empty() {
                entry_points.push(id.clone());
            }
            if !graph.has_dependents(idx) {
                exit_points.push(id.clone());
            }
            dependencies.insert(id, deps);
        }

        let execution_order: Vec<NodeId> = order.iter().map(|&i| graph.graph[i].clone()).collect();
        let parallel_groups = dependency_levels(&execution_order, &dependencies);

        tracing::debug!(
            nodes = execution_order.len(),
            levels = parallel_groups.len(),
            "Execution plan built"
        );

        Ok(Self {
            execution_order,
            dependencies,
            parallel_groups,
            entry_points,
            exit_points,
        })
    }

    /// Check the plan against the nodes it was built for: the order holds
    /// every node id exactly once and each dependency sits strictly earlier.
    pub fn validate(&self, nodes: &[NodeSpec]) -> bool {
        let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let position: HashMap<&str, usize> = self
            .execution_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        if position.len() != self.execution_order.len() || position.len() != node_ids.len() {
            tracing::warn!("Execution order does not cover every node exactly once");
            return false;
        }
        if node_ids.iter().any(|id| !position.contains_key(id)) {
            tracing::warn!("Execution order references unknown nodes");
            return false;
        }

        for (node_id, deps) in &self.dependencies {
            let Some(&node_pos) = position.get(node_id.as_str()) else {
                continue;
            };
            for dep in deps {
                match position.get(dep.as_str()) {
                    Some(&dep_pos) if dep_pos < node_pos => {}
                    _ => {
                        tracing::warn!("Dependency violation: {} must run before {}", dep, node_id);
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Nodes not yet in `completed` whose dependencies all are, in
    /// execution order.
    pub fn executable_nodes(&self, completed: &HashSet<NodeId>) -> Vec<NodeId> {
        self.execution_order
            .iter()
            .filter(|id| !completed.contains(*id))
            .filter(|id| {
                self.dependencies
                    .get(*id)
                    .map_or(true, |deps| deps.iter().all(|d| completed.contains(d)))
            })
            .cloned()
            .collect()
    }

    pub fn dependencies_of(&self, node_id: &str) -> &[NodeId] {
        self.dependencies
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Level 0 holds nodes without dependencies; every other node sits one level
/// above its deepest dependency.
fn dependency_levels(
    order: &[NodeId],
    dependencies: &HashMap<NodeId, Vec<NodeId>>,
) -> Vec<Vec<NodeId>> {
    let mut level_of: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    let mut groups: Vec<Vec<NodeId>> = Vec::new();

    for id in order {
        let level = dependencies
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|d| level_of.get(d.as_str()))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id.as_str(), level);
        if groups.len() <= level {
            groups.resize_with(level + 1, Vec::new);
        }
        groups[level].push(id.clone());
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn nodes(ids: &[&str]) -> Vec<NodeSpec> {
        ids.iter().map(|id| NodeSpec::new(*id, "test")).collect()
    }

    fn edges(pairs: &[(&str, &str)]) -> Vec<Edge> {
        pairs.iter().map(|(s, t)| Edge::new(*s, *t)).collect()
    }

    fn position(plan: &ExecutionPlan, id: &str) -> usize {
        plan.execution_order.iter().position(|n| n == id).unwrap()
    }

    #[test]
    fn diamond() {
        let nodes = nodes(&["A", "B", "C", "D"]);
        let edges = edges(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]);
        let plan = ExecutionPlan::build(&nodes, &edges).unwrap();

        assert_eq!(plan.execution_order, vec!["A", "B", "C", "D"]);
        assert_eq!(plan.entry_points, vec!["A"]);
        assert_eq!(plan.exit_points, vec!["D"]);
        assert_eq!(plan.dependencies_of("D"), ["B".to_string(), "C".to_string()]);
        assert_eq!(
            plan.parallel_groups,
            vec![vec!["A".to_string()], vec!["B".into(), "C".into()], vec!["D".into()]]
        );
        assert!(plan.validate(&nodes));
    }

    #[test]
    fn order_follows_dependencies_not_declaration() {
        let nodes = nodes(&["sink", "mid", "src"]);
        let edges = edges(&[("src", "mid"), ("mid", "sink")]);
        let plan = ExecutionPlan::build(&nodes, &edges).unwrap();
        assert_eq!(plan.execution_order, vec!["src", "mid", "sink"]);
    }

    #[test]
    fn detects_cycle() {
        let nodes = nodes(&["A", "B", "C"]);
        let edges = edges(&[("A", "B"), ("B", "C"), ("C", "A")]);
        let err = ExecutionPlan::build(&nodes, &edges).unwrap_err();
        let PlanError::CyclicDependency(node) = &err else {
            panic!("unexpected error: {err}");
        };
        assert!(["A", "B", "C"].contains(&node.as_str()));
        assert!(err.to_string().starts_with("Circular dependency detected involving node:"));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let err = ExecutionPlan::build(&nodes(&["A"]), &edges(&[("A", "A")])).unwrap_err();
        assert!(matches!(err, PlanError::CyclicDependency(ref n) if n == "A"));
    }

    #[test]
    fn dangling_edges_are_ignored() {
        let nodes = nodes(&["A", "B"]);
        let edges = edges(&[("A", "B"), ("ghost", "B"), ("B", "nowhere")]);
        let plan = ExecutionPlan::build(&nodes, &edges).unwrap();
        assert_eq!(plan.dependencies_of("B"), ["A".to_string()]);
        assert_eq!(plan.exit_points, vec!["B"]);
    }

    #[test]
    fn empty_graph_plans_to_nothing() {
        let plan = ExecutionPlan::build(&[], &[]).unwrap();
        assert!(plan.execution_order.is_empty());
        assert!(plan.parallel_groups.is_empty());
        assert!(plan.validate(&[]));
    }

    #[test]
    fn duplicate_node_ids_collapse() {
        let nodes = nodes(&["A", "A", "B"]);
        let plan = ExecutionPlan::build(&nodes, &edges(&[("A", "B")])).unwrap();
        assert_eq!(plan.execution_order, vec!["A", "B"]);
        assert!(plan.validate(&nodes));
    }

    #[test]
    fn validate_rejects_tampered_order() {
        let nodes = nodes(&["A", "B"]);
        let mut plan = ExecutionPlan::build(&nodes, &edges(&[("A", "B")])).unwrap();
        plan.execution_order.reverse();
        assert!(!plan.validate(&nodes));

        plan.execution_order = vec!["A".into()];
        assert!(!plan.validate(&nodes));
    }

    #[test]
    fn executable_nodes_respect_completion() {
        let nodes = nodes(&["A", "B", "C", "D"]);
        let edges = edges(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]);
        let plan = ExecutionPlan::build(&nodes, &edges).unwrap();

        let mut done = HashSet::new();
        assert_eq!(plan.executable_nodes(&done), vec!["A"]);
        done.insert("A".to_string());
        assert_eq!(plan.executable_nodes(&done), vec!["B", "C"]);
        done.insert("B".to_string());
        assert_eq!(plan.executable_nodes(&done), vec!["C"]);
        done.insert("C".to_string());
        assert_eq!(plan.executable_nodes(&done), vec!["D"]);
    }

    #[test]
    fn planning_is_pure() {
        let nodes = nodes(&["A", "B", "C"]);
        let edges = edges(&[("A", "C"), ("B", "C")]);
        let first = ExecutionPlan::build(&nodes, &edges).unwrap();
        let second = ExecutionPlan::build(&nodes, &edges).unwrap();
        assert_eq!(first, second);
        assert_eq!(nodes.len(), 3);
        assert_eq!(edges.len(), 2);
    }

    /// Node count plus index pairs ordered low to high.
    fn acyclic_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (1usize..=12).prop_flat_map(|count| {
            let edge = (0..count, 0..count).prop_map(|(a, b)| (a.min(b), a.max(b)));
            (Just(count), prop::collection::vec(edge, 0..=count * 2))
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 200, ..ProptestConfig::default() })]

        #[test]
        fn random_acyclic_graphs_always_plan_validly(
            (count, pairs) in acyclic_graph(),
            rotate in 0usize..12,
        ) {
            let ids: Vec<String> = (0..count).map(|i| format!("n{i}")).collect();
            let edge_list: Vec<Edge> = pairs
                .iter()
                .filter(|(a, b)| a < b)
                .map(|&(a, b)| Edge::new(ids[a].clone(), ids[b].clone()))
                .collect();

            // declaration order must not matter
            let mut declared: Vec<NodeSpec> = ids.iter().rev().map(|id| NodeSpec::new(id.clone(), "test")).collect();
            declared.rotate_left(rotate % count);

            let plan = ExecutionPlan::build(&declared, &edge_list)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(plan.validate(&declared));
            prop_assert_eq!(plan.execution_order.len(), count);
            for edge in &edge_list {
                prop_assert!(position(&plan, &edge.source) < position(&plan, &edge.target));
            }

            let grouped: usize = plan.parallel_groups.iter().map(Vec::len).sum();
            prop_assert_eq!(grouped, count);
        }
    }
}
