use core::fmt;
use std::collections::HashMap;
use std::hash::Hasher;

use petgraph::stable_graph::{DefaultIx, NodeIndex, StableDiGraph};
use petgraph::Direction;
use twox_hash::XxHash64;

use crate::chunk::{Chunk, ChunkId};
use crate::module::ModuleId;
use crate::module_graph::ModuleGraph;

pub struct ChunkGraph {
    pub(crate) graph: StableDiGraph<Chunk, ()>,
    id_index_map: HashMap<ChunkId, NodeIndex<DefaultIx>>,
}

impl ChunkGraph {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            id_index_map: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.id_index_map.clear();
    }

    pub fn add_chunk(&mut self, chunk: Chunk) {
        let chunk_id = chunk.id.clone();
        let node_index = self.graph.add_node(chunk);
        self.id_index_map.insert(chunk_id, node_index);
    }

    pub fn has_chunk(&self, chunk_id: &ChunkId) -> bool {
        self.id_index_map.contains_key(chunk_id)
    }

    /// Chunks in insertion order.
    pub fn get_chunks(&self) -> Vec<&Chunk> {
        self.graph.node_weights().collect()
    }

    pub fn mut_chunks(&mut self) -> Vec<&mut Chunk> {
        self.graph.node_weights_mut().collect()
    }

    pub fn chunk(&self, chunk_id: &ChunkId) -> Option<&Chunk> {
        self.id_index_map
            .get(chunk_id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    pub fn mut_chunk(&mut self, chunk_id: &ChunkId) -> Option<&mut Chunk> {
        self.id_index_map
            .get(chunk_id)
            .and_then(|idx| self.graph.node_weight_mut(*idx))
    }

    pub fn get_chunk_for_module(&self, module_id: &ModuleId) -> Option<&Chunk> {
        self.graph.node_weights().find(|c| c.has_module(module_id))
    }

    pub fn add_edge(&mut self, from: &ChunkId, to: &ChunkId) {
        let from = self.id_index_map.get(from).unwrap();
        let to = self.id_index_map.get(to).unwrap();
        self.graph.update_edge(*from, *to, ());
    }

    pub fn dependents_chunk(&self, chunk_id: &ChunkId) -> Vec<ChunkId> {
        let Some(idx) = self.id_index_map.get(chunk_id) else {
            return vec![];
        };
        self.graph
            .neighbors_directed(*idx, Direction::Incoming)
            .map(|idx| self.graph[idx].id.clone())
            .collect()
    }

    pub fn remove_chunk(&mut self, chunk_id: &ChunkId) {
        let idx = self.id_index_map.remove(chunk_id).unwrap();
        self.graph.remove_node(idx);
    }

    pub fn full_hash(&self, module_graph: &ModuleGraph) -> u64 {
        let mut chunks = self.get_chunks();
        chunks.sort_by_key(|c| c.id.id.clone());

        let mut hasher: XxHash64 = Default::default();
        for chunk in chunks {
            hasher.write_u64(chunk.hash(module_graph));
        }
        hasher.finish()
    }
}

impl Default for ChunkGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChunkGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes = self
            .graph
            .node_weights()
            .map(|node| &node.id.id)
            .collect::<Vec<_>>();
        nodes.sort();
        write!(f, "graph\n nodes:{:?}", &nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkKind;

    #[test]
    fn test_chunk_lookup_by_module() {
        let mut graph = ChunkGraph::new();
        let mut chunk = Chunk::new(
            ModuleId::new("/a.js"),
            ChunkKind::Entry {
                name: "main".to_string(),
                module: ModuleId::new("/a.js"),
            },
        );
        chunk.add_module(ModuleId::new("/a.js"));
        chunk.add_module(ModuleId::new("/b.js"));
        graph.add_chunk(chunk);

        assert!(graph.has_chunk(&ModuleId::new("/a.js")));
        assert_eq!(
            graph
                .get_chunk_for_module(&ModuleId::new("/b.js"))
                .map(|c| c.id.clone()),
            Some(ModuleId::new("/a.js"))
        );
        assert!(graph.get_chunk_for_module(&ModuleId::new("/c.js")).is_none());
    }
}
