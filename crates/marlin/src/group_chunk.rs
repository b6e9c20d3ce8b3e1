use std::collections::{HashMap, HashSet};

use anyhow::Result;
use fixedbitset::FixedBitSet;
use indexmap::IndexMap;
use tracing::debug;

use crate::chunk::{Chunk, ChunkExport, ChunkKind, FacadeReExport};
use crate::compiler::Compiler;
use crate::config::{ManualChunks, PreserveEntrySignatures};
use crate::diagnostics::{Warning, WarningCode};
use crate::link::{resolve_export, ExportTarget};
use crate::module::{ImportBinding, ModuleId};
use crate::module_graph::ModuleGraph;

fn stem(id: &ModuleId) -> String {
    let base = id.id.rsplit(['/', '\\']).next().unwrap_or(&id.id);
    base.split('.').next().unwrap_or(base).to_string()
}

/// A chunk root: a user entry or a dynamic import target.
#[derive(Debug, Clone)]
struct Root {
    module: ModuleId,
    name: String,
    is_entry: bool,
}

impl Compiler {
    /// Partitions included modules into chunks, links cross-chunk
    /// imports and export names, and synthesises facades. Non-facade
    /// chunks come first in the returned order.
    pub(crate) fn generate_chunks(
        &self,
        entry_ids: &[ModuleId],
        manual_groups: Vec<(String, Vec<ModuleId>)>,
        manual_chunks: Option<ManualChunks>,
        inline_dynamic: bool,
    ) -> Result<Vec<Chunk>> {
        debug!("generate chunks");
        let context = &self.context;
        let module_graph = context.module_graph.read().unwrap();
        let mut chunk_graph = context.chunk_graph.write().unwrap();
        chunk_graph.clear();

        // Included modules in execution order.
        let mut included: Vec<ModuleId> = module_graph
            .modules()
            .into_iter()
            .filter(|m| m.is_included)
            .map(|m| m.id.clone())
            .collect();
        included.sort_by_key(|id| module_graph.get_module(id).map(|m| m.exec_order));
        let included_set: HashSet<ModuleId> = included.iter().cloned().collect();

        let mut chunks: Vec<Chunk> = if context.config.preserve_modules {
            self.chunks_per_module(&included, &module_graph)
        } else if inline_dynamic {
            // Inline-dynamic overrides manual grouping when both are
            // requested.
            let mut chunk = Chunk::new(
                entry_ids[0].clone(),
                match module_graph.get_module(&entry_ids[0]) {
                    Some(entry) => ChunkKind::Entry {
                        name: entry.entry_name.clone().unwrap_or_else(|| stem(&entry.id)),
                        module: entry.id.clone(),
                    },
                    None => ChunkKind::Shared {
                        name: "index".to_string(),
                    },
                },
            );
            for id in &included {
                chunk.add_module(id.clone());
            }
            vec![chunk]
        } else {
            self.colour_chunks(
                entry_ids,
                &included,
                &included_set,
                manual_groups,
                manual_chunks.as_ref(),
                &module_graph,
            )
        };

        link_chunks(&mut chunks, &module_graph);
        let facades = build_facades(&chunks, entry_ids, &module_graph);

        for chunk in chunks.iter().chain(facades.iter()) {
            chunk_graph.add_chunk(chunk.clone());
        }
        for chunk in chunks.iter().chain(facades.iter()) {
            for target in chunk.imports.keys() {
                if chunk_graph.has_chunk(target) {
                    chunk_graph.add_edge(&chunk.id, target);
                }
            }
            if let ChunkKind::Facade { target, .. } = &chunk.kind {
                chunk_graph.add_edge(&chunk.id, target);
            }
        }

        Ok(chunks.into_iter().chain(facades).collect())
    }

    /// preserve-modules mode: one chunk per included module.
    fn chunks_per_module(&self, included: &[ModuleId], module_graph: &ModuleGraph) -> Vec<Chunk> {
        included
            .iter()
            .map(|id| {
                let module = module_graph.get_module(id);
                let kind = match module {
                    Some(m) if m.is_entry => ChunkKind::Entry {
                        name: m.entry_name.clone().unwrap_or_else(|| stem(id)),
                        module: id.clone(),
                    },
                    Some(m) if !m.dynamic_importers.is_empty() => {
                        ChunkKind::Async { root: id.clone() }
                    }
                    _ => ChunkKind::Shared { name: stem(id) },
                };
                let mut chunk = Chunk::new(id.clone(), kind);
                chunk.add_module(id.clone());
                chunk
            })
            .collect()
    }

    /// Default mode: colour every module with the set of roots that
    /// reach it, after manual chunks have claimed their subgraphs.
    fn colour_chunks(
        &self,
        entry_ids: &[ModuleId],
        included: &[ModuleId],
        included_set: &HashSet<ModuleId>,
        manual_groups: Vec<(String, Vec<ModuleId>)>,
        manual_chunks: Option<&ManualChunks>,
        module_graph: &ModuleGraph,
    ) -> Vec<Chunk> {
        let context = &self.context;
        let entry_set: HashSet<ModuleId> = entry_ids.iter().cloned().collect();

        // Manual claims first. Map seeds claim their reachable static
        // subgraph up to (not including) entries; the classification
        // function claims single modules. First declaration wins.
        let mut claimed: IndexMap<ModuleId, String> = IndexMap::new();
        let mut manual_names: Vec<String> = vec![];
        for (name, seeds) in &manual_groups {
            if !manual_names.contains(name) {
                manual_names.push(name.clone());
            }
            let mut stack: Vec<ModuleId> = seeds.clone();
            while let Some(id) = stack.pop() {
                if entry_set.contains(&id) || !included_set.contains(&id) {
                    continue;
                }
                match claimed.get(&id) {
                    Some(owner) if owner != name => {
                        context.diagnostics.warn(
                            Warning::new(
                                WarningCode::ConflictingManualChunk,
                                format!(
                                    "module {} was claimed by manual chunk '{}' and is requested by '{}'; keeping '{}'",
                                    id.id, owner, name, owner
                                ),
                            )
                            .with_id(id.id.clone()),
                        );
                        continue;
                    }
                    Some(_) => continue,
                    None => {}
                }
                claimed.insert(id.clone(), name.clone());
                stack.extend(module_graph.static_dependence_module_ids(&id));
            }
        }
        if let Some(ManualChunks::Func(classify)) = manual_chunks {
            for id in included {
                if claimed.contains_key(id) || entry_set.contains(id) {
                    continue;
                }
                if let Some(name) = classify(&id.id) {
                    if !manual_names.contains(&name) {
                        manual_names.push(name.clone());
                    }
                    claimed.insert(id.clone(), name);
                }
            }
        }

        // Roots: entries in declaration order, then dynamic-import
        // targets in execution order.
        let mut roots: Vec<Root> = vec![];
        for id in entry_ids {
            let name = module_graph
                .get_module(id)
                .and_then(|m| m.entry_name.clone())
                .unwrap_or_else(|| stem(id));
            roots.push(Root {
                module: id.clone(),
                name,
                is_entry: true,
            });
        }
        for id in included {
            let is_dynamic_root = module_graph
                .get_module(id)
                .map(|m| !m.dynamic_importers.is_empty())
                .unwrap_or(false);
            if is_dynamic_root && !roots.iter().any(|r| &r.module == id) {
                roots.push(Root {
                    module: id.clone(),
                    name: stem(id),
                    is_entry: false,
                });
            }
        }

        // Forward DFS per root over static edges; dynamic edges only
        // start new roots.
        let mut colours: HashMap<ModuleId, FixedBitSet> = HashMap::new();
        for (index, root) in roots.iter().enumerate() {
            let mut stack = vec![root.module.clone()];
            let mut seen = HashSet::new();
            while let Some(id) = stack.pop() {
                if !seen.insert(id.clone()) || !included_set.contains(&id) {
                    continue;
                }
                if !claimed.contains_key(&id) {
                    colours
                        .entry(id.clone())
                        .or_insert_with(|| FixedBitSet::with_capacity(roots.len()))
                        .insert(index);
                }
                stack.extend(module_graph.static_dependence_module_ids(&id));
            }
        }

        // Identical colours merge into one chunk, in module execution
        // order of first appearance.
        let mut groups: IndexMap<Vec<usize>, Vec<ModuleId>> = IndexMap::new();
        let mut uncoloured: Vec<ModuleId> = vec![];
        for id in included {
            if claimed.contains_key(id) {
                continue;
            }
            match colours.get(id) {
                Some(colour) => {
                    let key: Vec<usize> = colour.ones().collect();
                    groups.entry(key).or_default().push(id.clone());
                }
                None => uncoloured.push(id.clone()),
            }
        }

        let mut chunks: Vec<Chunk> = vec![];
        // Single-root groups keep their root's identity; mixed groups
        // become shared chunks named after the roots that reach them.
        for (key, members) in &groups {
            let kind = if key.len() == 1 {
                let root = &roots[key[0]];
                if root.is_entry {
                    ChunkKind::Entry {
                        name: root.name.clone(),
                        module: root.module.clone(),
                    }
                } else {
                    ChunkKind::Async {
                        root: root.module.clone(),
                    }
                }
            } else {
                let name = key
                    .iter()
                    .map(|i| roots[*i].name.clone())
                    .collect::<Vec<_>>()
                    .join("~");
                ChunkKind::Shared { name }
            };
            let id = match &kind {
                ChunkKind::Entry { module, .. } => module.clone(),
                ChunkKind::Async { root } => root.clone(),
                ChunkKind::Shared { name } => ModuleId::new(name.clone()),
                ChunkKind::Facade { .. } => unreachable!(),
            };
            let mut chunk = Chunk::new(id, kind);
            for member in members {
                chunk.add_module(member.clone());
            }
            chunks.push(chunk);
        }
        // Entry chunks first, in entry declaration order.
        chunks.sort_by_key(|c| match &c.kind {
            ChunkKind::Entry { module, .. } => (
                0,
                entry_ids.iter().position(|e| e == module).unwrap_or(usize::MAX),
            ),
            ChunkKind::Async { .. } => (1, 0),
            ChunkKind::Shared { .. } => (2, 0),
            ChunkKind::Facade { .. } => (3, 0),
        });

        for name in manual_names {
            let members: Vec<ModuleId> = claimed
                .iter()
                .filter(|(_, owner)| **owner == name)
                .map(|(id, _)| id.clone())
                .collect();
            if members.is_empty() {
                continue;
            }
            let mut chunk = Chunk::new(
                ModuleId::new(name.clone()),
                ChunkKind::Shared { name },
            );
            for member in members {
                chunk.add_module(member);
            }
            chunks.push(chunk);
        }

        if !uncoloured.is_empty() {
            let mut chunk = Chunk::new(
                ModuleId::new("common"),
                ChunkKind::Shared {
                    name: "common".to_string(),
                },
            );
            for id in uncoloured {
                chunk.add_module(id);
            }
            chunks.push(chunk);
        }

        chunks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Demand {
    module: ModuleId,
    var_name: String,
}

/// Computes per-chunk ordered members, external dependencies,
/// cross-chunk imports, and externally visible export names, resolving
/// collisions by `$N` suffix.
fn link_chunks(chunks: &mut [Chunk], module_graph: &ModuleGraph) {
    let mut module_to_chunk: HashMap<ModuleId, usize> = HashMap::new();
    for (index, chunk) in chunks.iter().enumerate() {
        for id in chunk.modules.iter() {
            module_to_chunk.insert(id.clone(), index);
        }
    }

    for chunk in chunks.iter_mut() {
        let mut members: Vec<ModuleId> = chunk.modules.iter().cloned().collect();
        members.sort_by_key(|id| module_graph.get_module(id).map(|m| m.exec_order));
        chunk.ordered_modules = members.clone();
        chunk.entry_modules = members
            .iter()
            .filter(|id| {
                module_graph
                    .get_module(id)
                    .map(|m| m.is_entry)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for id in &members {
            let Some(module) = module_graph.get_module(id) else {
                continue;
            };
            for resolved in module.resolved_ids.values() {
                if resolved.external && !chunk.external_deps.contains(&resolved.id) {
                    chunk.external_deps.push(resolved.id.clone());
                }
            }
        }
    }

    // Pass 1: gather export demands per producing chunk, plus import
    // records and entry re-export requests.
    let mut demands: Vec<Vec<(Demand, Option<String>)>> = vec![vec![]; chunks.len()];
    let mut import_records: Vec<(usize, usize, Demand)> = vec![];
    let mut entry_reexports: Vec<(usize, String, Demand, usize)> = vec![];

    for (index, chunk) in chunks.iter().enumerate() {
        for id in &chunk.ordered_modules {
            let Some(module) = module_graph.get_module(id) else {
                continue;
            };
            for binding in module.bindings.values() {
                match binding {
                    ImportBinding::Var(reference) => {
                        let Some(&target) = module_to_chunk.get(&reference.module) else {
                            continue;
                        };
                        if target == index {
                            continue;
                        }
                        let var_name = module_graph
                            .get_module(&reference.module)
                            .map(|m| m.scope.var(reference.var).name.clone())
                            .unwrap_or_default();
                        let demand = Demand {
                            module: reference.module.clone(),
                            var_name,
                        };
                        demands[target].push((demand.clone(), None));
                        import_records.push((index, target, demand));
                    }
                    ImportBinding::Namespace(m) => {
                        let Some(&target) = module_to_chunk.get(m) else {
                            continue;
                        };
                        if target == index {
                            continue;
                        }
                        let demand = Demand {
                            module: m.clone(),
                            var_name: "*namespace*".to_string(),
                        };
                        demands[target].push((demand.clone(), Some(stem(m))));
                        import_records.push((index, target, demand));
                    }
                    ImportBinding::ExternalName { .. } => {}
                }
            }
        }

        // The public surface of a chunk: its entries, plus the root of
        // an async chunk (a dynamic import resolves to that surface).
        let mut surface_modules = chunk.entry_modules.clone();
        if let ChunkKind::Async { root } = &chunk.kind {
            if !surface_modules.contains(root) {
                surface_modules.push(root.clone());
            }
        }
        for entry_id in surface_modules {
            let Some(entry) = module_graph.get_module(&entry_id) else {
                continue;
            };
            if entry.is_entry && entry.preserve_signature == PreserveEntrySignatures::None {
                continue;
            }
            for exported in entry.export_descriptions.keys() {
                let mut visited = HashSet::new();
                match resolve_export(module_graph, &entry_id, exported, &mut visited) {
                    ExportTarget::Var(m, v) => {
                        let Some(&target) = module_to_chunk.get(&m) else {
                            continue;
                        };
                        let var_name = module_graph
                            .get_module(&m)
                            .map(|module| module.scope.var(v).name.clone())
                            .unwrap_or_default();
                        let demand = Demand {
                            module: m.clone(),
                            var_name,
                        };
                        if target == index {
                            demands[target].push((demand, Some(exported.clone())));
                        } else {
                            demands[target].push((demand.clone(), None));
                            import_records.push((index, target, demand.clone()));
                            entry_reexports.push((index, exported.clone(), demand, target));
                        }
                    }
                    ExportTarget::Namespace(m) => {
                        let Some(&target) = module_to_chunk.get(&m) else {
                            continue;
                        };
                        let demand = Demand {
                            module: m.clone(),
                            var_name: "*namespace*".to_string(),
                        };
                        if target == index {
                            demands[target].push((demand, Some(exported.clone())));
                        } else {
                            demands[target].push((demand.clone(), None));
                            import_records.push((index, target, demand.clone()));
                            entry_reexports.push((index, exported.clone(), demand, target));
                        }
                    }
                    ExportTarget::External(..) | ExportTarget::Missing => {}
                }
            }
        }
    }

    // Pass 2: assign export names per chunk; preferred names first,
    // collisions get a suffix.
    for (index, chunk_demands) in demands.iter().enumerate() {
        let mut assigned: IndexMap<Demand, (String, Option<String>)> = IndexMap::new();
        for (demand, preferred) in chunk_demands {
            match assigned.get_mut(demand) {
                Some((_, existing_preferred)) => {
                    if existing_preferred.is_none() {
                        *existing_preferred = preferred.clone();
                    }
                }
                None => {
                    assigned.insert(demand.clone(), (demand.var_name.clone(), preferred.clone()));
                }
            }
        }
        let mut used: HashSet<String> = HashSet::new();
        for (demand, (fallback, preferred)) in assigned {
            let base = preferred.unwrap_or(fallback);
            let base = if base.is_empty() || base == "*namespace*" {
                stem(&demand.module)
            } else {
                base
            };
            let name = dedupe_name(&base, &mut used);
            chunks[index].exports.push(ChunkExport {
                exported: name,
                module: demand.module,
                local_name: demand.var_name,
            });
        }
    }

    // Pass 3: record imports using the names the producer chose.
    for (index, target, demand) in import_records {
        let Some(name) = chunks[target]
            .exported_name_for(&demand.module, &demand.var_name)
            .map(str::to_string)
        else {
            continue;
        };
        let target_id = chunks[target].id.clone();
        let names = chunks[index].imports.entry(target_id).or_default();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    // Pass 4: entry surfaces re-exported by the entry's host chunk.
    for (index, exported, demand, target) in entry_reexports {
        if chunks[target]
            .exported_name_for(&demand.module, &demand.var_name)
            .is_none()
        {
            continue;
        }
        let mut used: HashSet<String> =
            chunks[index].exports.iter().map(|e| e.exported.clone()).collect();
        let name = dedupe_name(&exported, &mut used);
        chunks[index].exports.push(ChunkExport {
            exported: name,
            module: demand.module,
            local_name: demand.var_name,
        });
    }
}

fn dedupe_name(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut counter = 1;
    loop {
        let candidate = format!("{}${}", base, counter);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// A facade is synthesised for every entry whose public signature the
/// host chunk cannot express with its chosen names.
fn build_facades(
    chunks: &[Chunk],
    entry_ids: &[ModuleId],
    module_graph: &ModuleGraph,
) -> Vec<Chunk> {
    let mut facades = vec![];
    for entry_id in entry_ids {
        let Some(entry) = module_graph.get_module(entry_id) else {
            continue;
        };
        if entry.preserve_signature == PreserveEntrySignatures::None {
            continue;
        }
        let Some(host) = chunks.iter().find(|c| c.has_module(entry_id)) else {
            continue;
        };

        let public: Vec<String> = entry.export_descriptions.keys().cloned().collect();
        let mut reexports = vec![];
        let mut expressible = true;
        for exported in &public {
            let mut visited = HashSet::new();
            let chosen = match resolve_export(module_graph, entry_id, exported, &mut visited) {
                ExportTarget::Var(m, v) => {
                    let var_name = module_graph
                        .get_module(&m)
                        .map(|module| module.scope.var(v).name.clone())
                        .unwrap_or_default();
                    host.exported_name_for(&m, &var_name).map(str::to_string)
                }
                ExportTarget::Namespace(m) => host
                    .exported_name_for(&m, "*namespace*")
                    .map(str::to_string),
                ExportTarget::External(..) | ExportTarget::Missing => continue,
            };
            let Some(chosen) = chosen else {
                expressible = false;
                continue;
            };
            if &chosen != exported {
                expressible = false;
            }
            reexports.push(FacadeReExport {
                imported: chosen,
                exported: exported.clone(),
            });
        }

        let multi_entry = host.entry_modules.len() > 1;
        let extension = entry.preserve_signature == PreserveEntrySignatures::Strict
            && host
                .exports
                .iter()
                .any(|e| !public.contains(&e.exported));
        let hosted_as_entry = matches!(&host.kind, ChunkKind::Entry { module, .. } if module == entry_id);

        if expressible && !multi_entry && !extension && hosted_as_entry {
            continue;
        }

        let name = entry.entry_name.clone().unwrap_or_else(|| stem(entry_id));
        let mut facade = Chunk::new(
            ModuleId::new(format!("{}:{}", name, entry_id.id)),
            ChunkKind::Facade {
                entry: entry_id.clone(),
                target: host.id.clone(),
            },
        );
        facade.entry_modules = vec![entry_id.clone()];
        facade.reexports = reexports;
        facade
            .imports
            .insert(host.id.clone(), facade.reexports.iter().map(|r| r.imported.clone()).collect());
        facades.push(facade);
    }
    facades
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::{Config, ParseOptions, Treeshake};
    use crate::module::{
        Dependency, ImportType, Module, ModuleNode, ResolveType, ResolvedId,
    };
    use crate::parse::parse;
    use crate::scope::GlobalScope;

    fn make_module(
        id: &str,
        source: &str,
        resolved: &[(&str, &str, bool)],
        entry_name: Option<&str>,
    ) -> Module {
        let mut module = Module::placeholder(ModuleId::new(id), entry_name.is_some());
        module.entry_name = entry_name.map(str::to_string);
        let program = parse(source, &ParseOptions::default()).unwrap();
        module.set_program(
            source.to_string(),
            program,
            &Treeshake::default(),
            &GlobalScope::default(),
        );
        for (specifier, target, external) in resolved {
            module.resolved_ids.insert(
                specifier.to_string(),
                ResolvedId {
                    id: ModuleId::new(*target),
                    external: *external,
                },
            );
        }
        module
    }

    fn compiler(config: Config) -> (Compiler, Arc<Mutex<Vec<Warning>>>) {
        let warnings: Arc<Mutex<Vec<Warning>>> = Default::default();
        let sink = warnings.clone();
        let compiler = Compiler::new(
            config,
            vec![],
            None,
            Some(Arc::new(move |w: &Warning| {
                sink.lock().unwrap().push(w.clone())
            })),
        )
        .unwrap();
        (compiler, warnings)
    }

    fn insert(compiler: &Compiler, module: Module) {
        let mut graph = compiler.context.module_graph.write().unwrap();
        let entry = module.is_entry;
        let id = module.id.clone();
        graph.add_module(ModuleNode::Normal(Box::new(module)));
        if entry {
            graph.add_entry(id);
        }
    }

    fn connect(compiler: &Compiler, from: &str, to: &str, source: &str, order: usize) {
        let mut graph = compiler.context.module_graph.write().unwrap();
        graph.add_dependency(
            &ModuleId::new(from),
            &ModuleId::new(to),
            Dependency {
                source: source.to_string(),
                resolve_type: ResolveType::Import(ImportType::Named),
                order,
                span: None,
            },
        );
    }

    fn shared_leaf_setup(compiler: &Compiler) -> Vec<ModuleId> {
        insert(
            compiler,
            make_module(
                "/x.js",
                "import { s } from './shared';\nexport const a = s;",
                &[("./shared", "/shared.js", false)],
                Some("e1"),
            ),
        );
        insert(
            compiler,
            make_module(
                "/y.js",
                "import { s } from './shared';\nexport const b = s;",
                &[("./shared", "/shared.js", false)],
                Some("e2"),
            ),
        );
        insert(
            compiler,
            make_module("/shared.js", "export const s = 1;", &[], None),
        );
        connect(compiler, "/x.js", "/shared.js", "./shared", 0);
        connect(compiler, "/y.js", "/shared.js", "./shared", 0);
        vec![ModuleId::new("/x.js"), ModuleId::new("/y.js")]
    }

    #[test]
    fn test_two_entries_sharing_a_leaf() {
        let (compiler, _) = compiler(Config::default());
        let entries = shared_leaf_setup(&compiler);
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();
        let chunks = compiler
            .generate_chunks(&entries, vec![], None, false)
            .unwrap();

        let non_facades: Vec<&Chunk> = chunks.iter().filter(|c| !c.is_facade()).collect();
        assert_eq!(non_facades.len(), 3);
        assert!(matches!(&non_facades[0].kind, ChunkKind::Entry { name, .. } if name == "e1"));
        assert!(matches!(&non_facades[1].kind, ChunkKind::Entry { name, .. } if name == "e2"));
        assert!(matches!(&non_facades[2].kind, ChunkKind::Shared { name } if name == "e1~e2"));
        assert!(non_facades[2].has_module(&ModuleId::new("/shared.js")));

        // Both entry chunks import the shared variable by its chosen
        // name.
        let shared_id = non_facades[2].id.clone();
        for entry_chunk in &non_facades[0..2] {
            assert_eq!(entry_chunk.imports[&shared_id], vec!["s".to_string()]);
        }
        // Entry signatures are expressible, so no facades appear.
        assert!(chunks.iter().all(|c| !c.is_facade()));
    }

    #[test]
    fn test_preserve_modules_mode() {
        let config = Config::from_json(r#"{"preserveModules": true}"#).unwrap();
        let (compiler, _) = compiler(config);
        let entries = shared_leaf_setup(&compiler);
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();
        let chunks = compiler
            .generate_chunks(&entries, vec![], None, false)
            .unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.modules.len() == 1));
        let entry_chunks = chunks
            .iter()
            .filter(|c| matches!(c.kind, ChunkKind::Entry { .. }))
            .count();
        assert_eq!(entry_chunks, 2);
    }

    #[test]
    fn test_inline_dynamic_single_chunk() {
        let (compiler, _) = compiler(Config::default());
        let entries = shared_leaf_setup(&compiler);
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();
        let chunks = compiler
            .generate_chunks(&entries, vec![], None, true)
            .unwrap();

        let non_facades: Vec<&Chunk> = chunks.iter().filter(|c| !c.is_facade()).collect();
        assert_eq!(non_facades.len(), 1);
        assert_eq!(non_facades[0].modules.len(), 3);
    }

    #[test]
    fn test_manual_chunk_claims_subgraph_first_wins() {
        let (compiler, warnings) = compiler(Config::default());
        let entries = shared_leaf_setup(&compiler);
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();
        let manual = vec![
            ("vendor".to_string(), vec![ModuleId::new("/shared.js")]),
            ("dupe".to_string(), vec![ModuleId::new("/shared.js")]),
        ];
        let chunks = compiler
            .generate_chunks(&entries, manual, None, false)
            .unwrap();

        let vendor = chunks
            .iter()
            .find(|c| matches!(&c.kind, ChunkKind::Shared { name } if name == "vendor"))
            .expect("vendor chunk");
        assert!(vendor.has_module(&ModuleId::new("/shared.js")));
        assert!(!chunks
            .iter()
            .any(|c| matches!(&c.kind, ChunkKind::Shared { name } if name == "dupe")));
        let seen = warnings.lock().unwrap();
        assert!(seen
            .iter()
            .any(|w| w.code == WarningCode::ConflictingManualChunk));
    }

    #[test]
    fn test_cyclic_entries_merge_and_get_facades() {
        let (compiler, _) = compiler(Config::default());
        insert(
            &compiler,
            make_module(
                "/e1.js",
                "import { b } from './e2';\nexport const a = 1;",
                &[("./e2", "/e2.js", false)],
                Some("one"),
            ),
        );
        insert(
            &compiler,
            make_module(
                "/e2.js",
                "import { a } from './e1';\nexport const b = 2;",
                &[("./e1", "/e1.js", false)],
                Some("two"),
            ),
        );
        connect(&compiler, "/e1.js", "/e2.js", "./e2", 0);
        connect(&compiler, "/e2.js", "/e1.js", "./e1", 0);
        let entries = vec![ModuleId::new("/e1.js"), ModuleId::new("/e2.js")];
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();
        let chunks = compiler
            .generate_chunks(&entries, vec![], None, false)
            .unwrap();

        let non_facades: Vec<&Chunk> = chunks.iter().filter(|c| !c.is_facade()).collect();
        assert_eq!(non_facades.len(), 1);
        assert_eq!(non_facades[0].entry_modules.len(), 2);

        let facades: Vec<&Chunk> = chunks.iter().filter(|c| c.is_facade()).collect();
        assert_eq!(facades.len(), 2);
        // Facades come after all body chunks and only re-export.
        assert!(!chunks[0].modules.is_empty());
        assert!(facades.iter().all(|f| f.modules.is_empty()));
        let one = facades
            .iter()
            .find(|f| matches!(&f.kind, ChunkKind::Facade { entry, .. } if entry == &ModuleId::new("/e1.js")))
            .unwrap();
        assert_eq!(
            one.reexports,
            vec![FacadeReExport {
                imported: "a".to_string(),
                exported: "a".to_string()
            }]
        );
    }

    #[test]
    fn test_every_included_module_in_exactly_one_body_chunk() {
        let (compiler, _) = compiler(Config::default());
        let entries = shared_leaf_setup(&compiler);
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();
        let chunks = compiler
            .generate_chunks(&entries, vec![], None, false)
            .unwrap();

        for id in ["/x.js", "/y.js", "/shared.js"] {
            let owners = chunks
                .iter()
                .filter(|c| !c.is_facade() && c.has_module(&ModuleId::new(id)))
                .count();
            assert_eq!(owners, 1, "{} should live in exactly one chunk", id);
        }
    }
}
