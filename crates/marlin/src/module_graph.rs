use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::stable_graph::{DefaultIx, NodeIndex, StableDiGraph};
use petgraph::visit::IntoEdgeReferences;
use petgraph::prelude::EdgeRef;
use petgraph::Direction;
use tracing::debug;

use crate::module::{Dependencies, Dependency, Module, ModuleId, ModuleNode};

pub struct ModuleGraph {
    pub id_index_map: HashMap<ModuleId, NodeIndex<DefaultIx>>,
    pub graph: StableDiGraph<ModuleNode, Dependencies>,
    /// Entry ids in declaration order; DFS tie-breaks follow this.
    entries: Vec<ModuleId>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self {
            id_index_map: HashMap::new(),
            graph: StableDiGraph::new(),
            entries: vec![],
        }
    }

    pub fn get_entry_modules(&self) -> Vec<ModuleId> {
        self.entries.clone()
    }

    pub fn add_entry(&mut self, id: ModuleId) {
        if !self.entries.contains(&id) {
            self.entries.push(id);
        }
    }

    pub fn add_module(&mut self, node: ModuleNode) {
        let id = node.id().clone();
        let index = self.graph.add_node(node);
        self.id_index_map.insert(id, index);
    }

    pub fn has_module(&self, module_id: &ModuleId) -> bool {
        self.id_index_map.contains_key(module_id)
    }

    pub fn get_node(&self, module_id: &ModuleId) -> Option<&ModuleNode> {
        self.id_index_map
            .get(module_id)
            .and_then(|i| self.graph.node_weight(*i))
    }

    pub fn get_node_mut(&mut self, module_id: &ModuleId) -> Option<&mut ModuleNode> {
        self.id_index_map
            .get(module_id)
            .and_then(|i| self.graph.node_weight_mut(*i))
    }

    pub fn get_module(&self, module_id: &ModuleId) -> Option<&Module> {
        self.get_node(module_id).and_then(|n| n.as_normal())
    }

    pub fn get_module_mut(&mut self, module_id: &ModuleId) -> Option<&mut Module> {
        self.get_node_mut(module_id).and_then(|n| n.as_normal_mut())
    }

    pub fn modules(&self) -> Vec<&Module> {
        self.graph
            .node_weights()
            .filter_map(|n| n.as_normal())
            .collect()
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.graph.node_weights().map(|n| n.id().clone()).collect()
    }

    pub fn external_ids(&self) -> Vec<ModuleId> {
        self.graph
            .node_weights()
            .filter(|n| n.is_external())
            .map(|n| n.id().clone())
            .collect()
    }

    pub fn remove_module(&mut self, module_id: &ModuleId) -> ModuleNode {
        let index = self
            .id_index_map
            .remove(module_id)
            .unwrap_or_else(|| panic!("module {:?} not found in the module graph", module_id));
        self.graph.remove_node(index).unwrap()
    }

    pub fn add_dependency(&mut self, from: &ModuleId, to: &ModuleId, edge: Dependency) {
        let from = self
            .id_index_map
            .get(from)
            .unwrap_or_else(|| panic!("module {:?} not found in the module graph", from));
        let to = self
            .id_index_map
            .get(to)
            .unwrap_or_else(|| panic!("module {:?} not found in the module graph", to));
        if let Some(existing) = self.graph.find_edge(*from, *to) {
            self.graph.edge_weight_mut(existing).unwrap().insert(edge);
        } else {
            let mut edges = Dependencies::new();
            edges.insert(edge);
            self.graph.update_edge(*from, *to, edges);
        }
    }

    /// Outgoing dependencies sorted by first-import order.
    pub fn get_dependencies(&self, module_id: &ModuleId) -> Vec<(&ModuleId, &Dependency)> {
        let Some(index) = self.id_index_map.get(module_id) else {
            return vec![];
        };
        let mut deps: Vec<(&ModuleId, &Dependency)> = vec![];
        let mut edges = self
            .graph
            .neighbors_directed(*index, Direction::Outgoing)
            .detach();
        while let Some((edge_index, node_index)) = edges.next(&self.graph) {
            let dependencies = self.graph.edge_weight(edge_index).unwrap();
            let node = self.graph.node_weight(node_index).unwrap();
            for dep in dependencies {
                deps.push((node.id(), dep));
            }
        }
        deps.sort_by_key(|(_, dep)| dep.order);
        deps
    }

    pub fn get_dependents(&self, module_id: &ModuleId) -> Vec<(&ModuleId, &Dependency)> {
        let Some(index) = self.id_index_map.get(module_id) else {
            return vec![];
        };
        let mut deps: Vec<(&ModuleId, &Dependency)> = vec![];
        let mut edges = self
            .graph
            .neighbors_directed(*index, Direction::Incoming)
            .detach();
        while let Some((edge_index, node_index)) = edges.next(&self.graph) {
            let dependencies = self.graph.edge_weight(edge_index).unwrap();
            let node = self.graph.node_weight(node_index).unwrap();
            for dep in dependencies {
                deps.push((node.id(), dep));
            }
        }
        deps.sort_by_key(|(_, dep)| dep.order);
        deps
    }

    pub fn static_dependence_module_ids(&self, module_id: &ModuleId) -> Vec<ModuleId> {
        let mut seen = HashSet::new();
        self.get_dependencies(module_id)
            .into_iter()
            .filter(|(_, dep)| dep.resolve_type.is_static())
            .filter(|(id, _)| seen.insert((*id).clone()))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn dynamic_dependence_module_ids(&self, module_id: &ModuleId) -> Vec<ModuleId> {
        let mut seen = HashSet::new();
        self.get_dependencies(module_id)
            .into_iter()
            .filter(|(_, dep)| !dep.resolve_type.is_static())
            .filter(|(id, _)| seen.insert((*id).clone()))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn get_dependency_module_by_source(
        &self,
        module_id: &ModuleId,
        source: &str,
    ) -> Option<&ModuleId> {
        for (id, dep) in self.get_dependencies(module_id) {
            if dep.source == source {
                return Some(id);
            }
        }
        debug!(
            "can not find module by source: {} in module {}",
            source, module_id.id
        );
        None
    }

    /// DFS post-order reversed into an execution order, starting from
    /// the entries in declaration order and following static edges only.
    /// Every grey revisit is reported as one cycle path `[a, .., a]`.
    pub fn toposort(&self) -> (Vec<ModuleId>, Vec<Vec<ModuleId>>) {
        fn dfs(
            current: &ModuleId,
            graph: &ModuleGraph,
            stack: &mut Vec<ModuleId>,
            visited: &mut HashSet<ModuleId>,
            result: &mut Vec<ModuleId>,
            cyclic: &mut Vec<Vec<ModuleId>>,
        ) {
            if let Some(pos) = stack.iter().position(|m| m == current) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(current.clone());
                cyclic.push(cycle);
                return;
            } else if visited.contains(current) {
                return;
            }

            visited.insert(current.clone());
            stack.push(current.clone());

            for dep in graph.static_dependence_module_ids(current) {
                dfs(&dep, graph, stack, visited, result, cyclic);
            }

            result.push(stack.pop().unwrap());
        }

        let mut result = vec![];
        let mut cyclic = vec![];
        let mut stack = vec![];
        let mut visited = HashSet::new();

        for entry in &self.entries {
            dfs(entry, self, &mut stack, &mut visited, &mut result, &mut cyclic);
        }
        // Dynamic import roots execute too, after the static graph;
        // chains of dynamic imports are picked up as `result` grows.
        let mut i = 0;
        while i < result.len() {
            let id = result[i].clone();
            for dynamic_dep in self.dynamic_dependence_module_ids(&id) {
                if !visited.contains(&dynamic_dep) {
                    dfs(
                        &dynamic_dep,
                        self,
                        &mut stack,
                        &mut visited,
                        &mut result,
                        &mut cyclic,
                    );
                }
            }
            i += 1;
        }
        // Anything left was loaded as a detached root (manual chunk
        // seeds); order among those is by id.
        let mut rest: Vec<ModuleId> = self
            .module_ids()
            .into_iter()
            .filter(|id| !visited.contains(id))
            .collect();
        rest.sort();
        for id in rest {
            dfs(&id, self, &mut stack, &mut visited, &mut result, &mut cyclic);
        }

        (result, cyclic)
    }

    pub fn get_reference(&self) -> Vec<String> {
        let mut references = self
            .graph
            .edge_references()
            .map(|edge| {
                let source = &self.graph[edge.source()].id().id;
                let target = &self.graph[edge.target()].id().id;
                format!("{} -> {}", source, target)
            })
            .collect::<Vec<_>>();
        references.sort();
        references
    }
}

impl fmt::Display for ModuleGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut nodes = self
            .graph
            .node_weights()
            .map(|node| &node.id().id)
            .collect::<Vec<_>>();
        nodes.sort();
        write!(
            f,
            "graph\n nodes:{:?} \n references:{:?}",
            &nodes,
            &self.get_reference()
        )
    }
}

impl Default for ModuleGraph {
    fn default() -> Self {
        Self::new()
    }
}
