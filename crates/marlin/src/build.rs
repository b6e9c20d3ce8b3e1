use std::fs;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;

use anyhow::Result;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::compiler::{Compiler, Context};
use crate::config::ManualChunks;
use crate::error::CompileError;
use crate::module::{ExternalModule, Module, ModuleId, ModuleInfoView, ModuleNode};
use crate::parse::{line_col, parse};
use crate::resolve::resolve;

/// One unit of loader work: fetch, transform, parse, and link up the
/// dependencies of a single module.
#[derive(Debug)]
pub(crate) struct Task {
    pub id: ModuleId,
    pub importer: Option<ModuleId>,
    pub is_entry: bool,
}

impl Compiler {
    /// Loads the transitive closure of the entries (and manual chunk
    /// seeds), in parallel, with at most one load per id. Returns entry
    /// ids in declaration order plus resolved manual groups.
    pub(crate) fn build_module_graph(
        &self,
        manual_chunks: Option<&ManualChunks>,
    ) -> Result<(Vec<ModuleId>, Vec<(String, Vec<ModuleId>)>)> {
        debug!("build module graph");
        let context = self.context.clone();
        let pool = Arc::new(ThreadPoolBuilder::new().build()?);
        let (rs, rr) = channel::<Result<ModuleId>>();

        // Entries resolve on the driving thread so declaration order is
        // kept regardless of load completion order.
        let mut entry_ids: Vec<ModuleId> = vec![];
        for (name, specifier) in context.config.input.entries() {
            let resolved = resolve(&specifier, None, true, &context)?;
            if resolved.external {
                return Err(CompileError::ExternalEntry(specifier).into());
            }
            if entry_ids.contains(&resolved.id) {
                continue;
            }
            entry_ids.push(resolved.id.clone());
            let mut module_graph = context.module_graph.write().unwrap();
            if !module_graph.has_module(&resolved.id) {
                let mut module = Module::placeholder(resolved.id.clone(), true);
                module.entry_name = Some(name.clone());
                module.context = context.config.context_for(&resolved.id.id);
                module_graph.add_module(ModuleNode::Normal(Box::new(module)));
                module_graph.add_entry(resolved.id.clone());
                drop(module_graph);
                Self::spawn_build_task(
                    pool.clone(),
                    context.clone(),
                    Task {
                        id: resolved.id.clone(),
                        importer: None,
                        is_entry: true,
                    },
                    rs.clone(),
                );
            } else {
                module_graph.add_entry(resolved.id.clone());
            }
        }

        let mut manual_groups: Vec<(String, Vec<ModuleId>)> = vec![];
        if let Some(ManualChunks::Map(map)) = manual_chunks {
            for (name, seeds) in map {
                let mut group = vec![];
                for seed in seeds {
                    let resolved = resolve(seed, None, false, &context)?;
                    if resolved.external {
                        continue;
                    }
                    group.push(resolved.id.clone());
                    let mut module_graph = context.module_graph.write().unwrap();
                    if !module_graph.has_module(&resolved.id) {
                        let mut module = Module::placeholder(resolved.id.clone(), false);
                        module.context = context.config.context_for(&resolved.id.id);
                        module_graph.add_module(ModuleNode::Normal(Box::new(module)));
                        drop(module_graph);
                        Self::spawn_build_task(
                            pool.clone(),
                            context.clone(),
                            Task {
                                id: resolved.id.clone(),
                                importer: None,
                                is_entry: false,
                            },
                            rs.clone(),
                        );
                    }
                }
                manual_groups.push((name.clone(), group));
            }
        }

        drop(rs);

        let mut errors = vec![];
        let mut built = 0usize;
        for result in rr {
            match result {
                Ok(_) => built += 1,
                Err(e) => errors.push(e),
            }
        }
        debug!("{} modules loaded", built);

        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }
        Ok((entry_ids, manual_groups))
    }

    fn spawn_build_task(
        pool: Arc<ThreadPool>,
        context: Arc<Context>,
        task: Task,
        rs: Sender<Result<ModuleId>>,
    ) {
        let pool_clone = pool.clone();
        pool.spawn(move || {
            if context.is_cancelled() {
                return;
            }
            let built = match Self::build_module(&context, &task) {
                Ok(module) => module,
                Err(e) => {
                    rs.send(Err(e)).unwrap();
                    return;
                }
            };

            // Resolution of this module's dependencies also runs on the
            // worker; only graph mutation takes the write lock.
            let mut resolved_deps = vec![];
            for dep in &built.dependencies {
                match resolve(&dep.source, Some(&built.id), false, &context) {
                    Ok(resolved) => resolved_deps.push((dep.clone(), resolved)),
                    Err(e) => {
                        rs.send(Err(e)).unwrap();
                        return;
                    }
                }
            }

            let module_id = built.id.clone();
            let info_view;
            {
                let mut module_graph = context.module_graph.write().unwrap();
                let existing = module_graph
                    .get_module_mut(&module_id)
                    .expect("placeholder was registered before the task spawned");
                existing.adopt(built);
                for (dep, resolved) in &resolved_deps {
                    existing
                        .resolved_ids
                        .insert(dep.source.clone(), resolved.clone());
                    for site in existing.dynamic_imports.iter_mut() {
                        if site.specifier.as_deref() == Some(dep.source.as_str()) {
                            site.resolved = Some(resolved.clone());
                        }
                    }
                }
                info_view = Self::info_view_of(module_graph.get_module(&module_id).unwrap());

                for (dep, resolved) in resolved_deps {
                    let is_static = dep.resolve_type.is_static();
                    let dep_id = resolved.id.clone();
                    if !module_graph.has_module(&dep_id) {
                        if resolved.external {
                            let side_effects = context
                                .treeshake
                                .module_side_effects
                                .for_module(&dep_id.id, true);
                            module_graph.add_module(ModuleNode::External(ExternalModule::new(
                                dep_id.clone(),
                                side_effects,
                                !is_static,
                            )));
                        } else {
                            let mut module = Module::placeholder(dep_id.clone(), false);
                            module.context = context.config.context_for(&dep_id.id);
                            module_graph.add_module(ModuleNode::Normal(Box::new(module)));
                            Self::spawn_build_task(
                                pool_clone.clone(),
                                context.clone(),
                                Task {
                                    id: dep_id.clone(),
                                    importer: Some(module_id.clone()),
                                    is_entry: false,
                                },
                                rs.clone(),
                            );
                        }
                    }

                    let dep_node = module_graph.get_node_mut(&dep_id).unwrap();
                    match dep_node {
                        ModuleNode::Normal(module) => {
                            if is_static {
                                if !module.importers.contains(&module_id) {
                                    module.importers.push(module_id.clone());
                                }
                            } else if !module.dynamic_importers.contains(&module_id) {
                                module.dynamic_importers.push(module_id.clone());
                            }
                        }
                        ModuleNode::External(external) => {
                            if is_static {
                                external.reached_dynamically_only = false;
                                if !external.importers.contains(&module_id) {
                                    external.importers.push(module_id.clone());
                                }
                            } else if !external.dynamic_importers.contains(&module_id) {
                                external.dynamic_importers.push(module_id.clone());
                            }
                        }
                    }
                    module_graph.add_dependency(&module_id, &dep_id, dep);
                }

                // External name bookkeeping needs the importer's own
                // import descriptions, re-borrowed after edge updates.
                let descriptions: Vec<(String, String)> = module_graph
                    .get_module(&module_id)
                    .unwrap()
                    .import_descriptions
                    .values()
                    .map(|d| (d.source.clone(), d.name.clone()))
                    .collect();
                let resolved_ids = module_graph
                    .get_module(&module_id)
                    .unwrap()
                    .resolved_ids
                    .clone();
                for (source, name) in descriptions {
                    let Some(resolved) = resolved_ids.get(&source) else {
                        continue;
                    };
                    if !resolved.external {
                        continue;
                    }
                    if let Some(external) = module_graph
                        .get_node_mut(&resolved.id)
                        .and_then(|n| n.as_external_mut())
                    {
                        external
                            .imported_names
                            .entry(name)
                            .or_default()
                            .push(module_id.clone());
                    }
                }
            }

            if let Err(e) = context
                .plugin_driver
                .module_parsed(&info_view, &context)
            {
                rs.send(Err(e)).unwrap();
                return;
            }
            rs.send(Ok(module_id)).unwrap();
        });
    }

    /// Load, transform, and parse one module off the graph lock.
    pub(crate) fn build_module(context: &Arc<Context>, task: &Task) -> Result<Module> {
        let id = &task.id;
        context.add_watch_file(&id.id);

        // load
        let raw = match context.plugin_driver.load(&id.id, context)? {
            Some(content) => content,
            None => fs::read_to_string(&id.id).map_err(|e| CompileError::LoadFailure {
                id: id.id.clone(),
                importer: task.importer.as_ref().map(|i| i.id.clone()),
                reason: e.to_string(),
            })?,
        };

        // transform, unless an unchanged cached module short-circuits it
        let source_hash = crate::module::hash_text(&raw);
        let code = match context.module_cache.get(&id.id) {
            Some(cached) if cached.source_hash == source_hash => cached.transformed_code.clone(),
            _ => context.plugin_driver.transform(raw, &id.id, context)?,
        };

        // parse
        let program = match context.plugin_driver.parse(&code, &id.id, context)? {
            Some(program) => program,
            None => parse(&code, &context.config.parse).map_err(|e| {
                let (line, column) = line_col(&code, e.span.lo);
                CompileError::ParseFailure {
                    id: id.id.clone(),
                    line,
                    column,
                    message: e.message,
                }
            })?,
        };

        let mut module = Module::placeholder(id.clone(), task.is_entry);
        module.side_effects = context
            .treeshake
            .module_side_effects
            .for_module(&id.id, false);
        module.preserve_signature = context.config.preserve_entry_signatures;
        module.context = context.config.context_for(&id.id);
        module.source_hash = source_hash;
        module.set_program(code, program, &context.treeshake, &context.globals);
        Ok(module)
    }

    pub(crate) fn info_view_of(module: &Module) -> ModuleInfoView {
        ModuleInfoView {
            id: module.id.id.clone(),
            is_entry: module.is_entry,
            is_external: false,
            is_included: module.is_included,
            importers: module.importers.iter().map(|i| i.id.clone()).collect(),
            dynamic_importers: module
                .dynamic_importers
                .iter()
                .map(|i| i.id.clone())
                .collect(),
            imported_ids: module
                .resolved_ids
                .values()
                .map(|r| r.id.id.clone())
                .collect(),
            exported_names: module.exported_names(),
            has_module_side_effects: module.side_effects,
        }
    }
}

impl Module {
    /// Replaces a placeholder's analysis state with a completed build,
    /// keeping graph bookkeeping accumulated while the load ran.
    pub(crate) fn adopt(&mut self, built: Module) {
        let importers = std::mem::take(&mut self.importers);
        let dynamic_importers = std::mem::take(&mut self.dynamic_importers);
        let is_entry = self.is_entry;
        let entry_name = self.entry_name.take();
        let resolved_ids = std::mem::take(&mut self.resolved_ids);
        *self = built;
        self.importers = importers;
        self.dynamic_importers = dynamic_importers;
        self.is_entry = self.is_entry || is_entry;
        if self.entry_name.is_none() {
            self.entry_name = entry_name;
        }
        for (source, resolved) in resolved_ids {
            self.resolved_ids.entry(source).or_insert(resolved);
        }
    }
}
