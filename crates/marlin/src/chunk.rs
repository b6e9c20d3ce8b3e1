use std::fmt::{Debug, Formatter};
use std::hash::Hasher;

use hashlink::LinkedHashSet;
use indexmap::IndexMap;
use twox_hash::XxHash64;

use crate::module::ModuleId;
use crate::module_graph::ModuleGraph;

pub type ChunkId = ModuleId;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ChunkKind {
    /// Hosts a user entry and surfaces its public exports.
    Entry { name: String, module: ModuleId },
    /// Modules reachable from more than one entry.
    Shared { name: String },
    /// Rooted at a dynamic import target.
    Async { root: ModuleId },
    /// Re-export-only stand-in preserving one entry's signature.
    Facade { entry: ModuleId, target: ChunkId },
}

/// An externally visible export of a chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkExport {
    /// Name chosen for the emitted surface, unique within the chunk.
    pub exported: String,
    pub module: ModuleId,
    pub local_name: String,
}

/// A re-export line of a facade chunk, aimed at its target chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacadeReExport {
    pub imported: String,
    pub exported: String,
}

#[derive(Clone)]
pub struct Chunk {
    pub id: ChunkId,
    pub kind: ChunkKind,
    pub modules: LinkedHashSet<ModuleId>,
    /// Members sorted by execution order, filled by `link`.
    pub ordered_modules: Vec<ModuleId>,
    pub entry_modules: Vec<ModuleId>,
    /// External module ids this chunk's members import from.
    pub external_deps: Vec<ModuleId>,
    /// `other chunk -> exported names needed from it`.
    pub imports: IndexMap<ChunkId, Vec<String>>,
    pub exports: Vec<ChunkExport>,
    pub reexports: Vec<FacadeReExport>,
}

impl Debug for Chunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}({:?})", self.id.id, self.modules.len(), self.kind)
    }
}

impl Chunk {
    pub fn new(id: ChunkId, kind: ChunkKind) -> Self {
        Self {
            id,
            kind,
            modules: LinkedHashSet::new(),
            ordered_modules: vec![],
            entry_modules: vec![],
            external_deps: vec![],
            imports: IndexMap::new(),
            exports: vec![],
            reexports: vec![],
        }
    }

    pub fn filename(&self) -> String {
        match &self.kind {
            ChunkKind::Entry { name, .. } => format!("{}.js", name),
            ChunkKind::Shared { name } => format!("{}.js", name),
            ChunkKind::Async { root } => {
                format!("{}-async.js", sanitize_for_filename(&root.id))
            }
            ChunkKind::Facade { entry, .. } => {
                format!("{}-facade.js", sanitize_for_filename(&entry.id))
            }
        }
    }

    pub fn is_facade(&self) -> bool {
        matches!(self.kind, ChunkKind::Facade { .. })
    }

    pub fn add_module(&mut self, module_id: ModuleId) {
        self.modules.insert(module_id);
    }

    pub fn has_module(&self, module_id: &ModuleId) -> bool {
        self.modules.contains(module_id)
    }

    pub fn exported_name_for(&self, module: &ModuleId, local_name: &str) -> Option<&str> {
        self.exports
            .iter()
            .find(|e| &e.module == module && e.local_name == local_name)
            .map(|e| e.exported.as_str())
    }

    pub fn hash(&self, module_graph: &ModuleGraph) -> u64 {
        let mut sorted: Vec<ModuleId> = self.modules.iter().cloned().collect();
        sorted.sort();

        let mut hash: XxHash64 = Default::default();
        for id in sorted {
            match module_graph.get_module(&id) {
                Some(module) => hash.write_u64(module.raw_hash),
                None => hash.write(id.id.as_bytes()),
            }
        }
        hash.finish()
    }
}

fn sanitize_for_filename(id: &str) -> String {
    id.trim_start_matches('/')
        .replace(['/', '.', '?', '@'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename() {
        let chunk = Chunk::new(
            ModuleId::new("/src/main.js"),
            ChunkKind::Entry {
                name: "main".to_string(),
                module: ModuleId::new("/src/main.js"),
            },
        );
        assert_eq!(chunk.filename(), "main.js");

        let chunk = Chunk::new(
            ModuleId::new("/src/lazy.js"),
            ChunkKind::Async {
                root: ModuleId::new("/src/lazy.js"),
            },
        );
        assert_eq!(chunk.filename(), "src_lazy_js-async.js");
    }

    #[test]
    fn test_exported_name_lookup() {
        let mut chunk = Chunk::new(
            ModuleId::new("/a.js"),
            ChunkKind::Shared {
                name: "shared".to_string(),
            },
        );
        chunk.exports.push(ChunkExport {
            exported: "x$1".to_string(),
            module: ModuleId::new("/b.js"),
            local_name: "x".to_string(),
        });
        assert_eq!(
            chunk.exported_name_for(&ModuleId::new("/b.js"), "x"),
            Some("x$1")
        );
        assert_eq!(chunk.exported_name_for(&ModuleId::new("/c.js"), "x"), None);
    }
}
