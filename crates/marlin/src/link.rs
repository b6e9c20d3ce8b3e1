use std::collections::HashSet;

use anyhow::Result;
use tracing::debug;

use crate::compiler::Compiler;
use crate::diagnostics::{Warning, WarningCode};
use crate::module::{ImportBinding, ModuleId, ModuleNode};
use crate::module_graph::ModuleGraph;
use crate::parse::line_col;
use crate::variable::{Variable, VariableKind, VariableRef};

/// Terminal target of an export lookup, after walking re-export
/// chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExportTarget {
    Var(ModuleId, crate::variable::VarId),
    External(ModuleId, String),
    Namespace(ModuleId),
    Missing,
}

/// Follows `name` through `module_id`'s export table, transitively
/// across re-exports, stopping at external modules. Cycles resolve to
/// `Missing`.
pub(crate) fn resolve_export(
    graph: &ModuleGraph,
    module_id: &ModuleId,
    name: &str,
    visited: &mut HashSet<(ModuleId, String)>,
) -> ExportTarget {
    if !visited.insert((module_id.clone(), name.to_string())) {
        return ExportTarget::Missing;
    }
    let Some(node) = graph.get_node(module_id) else {
        return ExportTarget::Missing;
    };
    let module = match node {
        ModuleNode::External(_) => {
            return ExportTarget::External(module_id.clone(), name.to_string())
        }
        ModuleNode::Normal(module) => module,
    };
    if name == "*" {
        return ExportTarget::Namespace(module_id.clone());
    }

    if let Some(description) = module.export_descriptions.get(name) {
        return match &description.source {
            Some(source) => {
                let Some(resolved) = module.resolved_ids.get(source) else {
                    return ExportTarget::Missing;
                };
                let name_in_source = description.name_in_source.as_deref().unwrap_or(name);
                resolve_export(graph, &resolved.id, name_in_source, visited)
            }
            None => match description.var {
                Some(var) => ExportTarget::Var(module_id.clone(), var),
                None => ExportTarget::Missing,
            },
        };
    }

    // `export *` chains; `default` never travels through them.
    if name != "default" {
        let mut external_fallback = None;
        for source in &module.reexport_all_sources {
            let Some(resolved) = module.resolved_ids.get(source) else {
                continue;
            };
            match resolve_export(graph, &resolved.id, name, visited) {
                ExportTarget::Missing => continue,
                ExportTarget::External(m, n) if external_fallback.is_none() => {
                    external_fallback = Some(ExportTarget::External(m, n));
                }
                found => return found,
            }
        }
        if let Some(fallback) = external_fallback {
            return fallback;
        }
    }
    ExportTarget::Missing
}

impl Compiler {
    /// Three passes: local dependency linking, execution ordering with
    /// cycle reporting, and binding of every import reference to the
    /// producing variable.
    pub(crate) fn link(&self, _entry_ids: &[ModuleId]) -> Result<()> {
        debug!("link");
        let context = &self.context;
        let mut module_graph = context.module_graph.write().unwrap();

        // Pass 1: attach producing module ids to import/export
        // descriptions, and surface broken re-exports.
        let mut module_ids = module_graph.module_ids();
        module_ids.sort();
        let mut reexport_warnings = vec![];
        for module_id in &module_ids {
            let Some(module) = module_graph.get_module(module_id) else {
                continue;
            };
            let mut import_targets = vec![];
            for (local, description) in &module.import_descriptions {
                let target = module.resolved_ids.get(&description.source).cloned();
                import_targets.push((local.clone(), target));
            }
            let mut export_targets = vec![];
            for (exported, description) in &module.export_descriptions {
                if let Some(source) = &description.source {
                    let target = module.resolved_ids.get(source).cloned();
                    if let Some(target) = &target {
                        let name = description.name_in_source.as_deref().unwrap_or(exported);
                        let mut visited = HashSet::new();
                        if name != "*"
                            && resolve_export(&module_graph, &target.id, name, &mut visited)
                                == ExportTarget::Missing
                        {
                            reexport_warnings.push(
                                Warning::new(
                                    WarningCode::NonExistentExport,
                                    format!(
                                        "re-exported name '{}' is not exported by {}",
                                        name, target.id.id
                                    ),
                                )
                                .with_id(module_id.id.clone()),
                            );
                        }
                    }
                    export_targets.push((exported.clone(), target));
                }
            }
            let module = module_graph.get_module_mut(module_id).unwrap();
            for (local, target) in import_targets {
                if let Some(target) = target {
                    module.import_descriptions[&local].module = Some(target.id);
                }
            }
            for (exported, target) in export_targets {
                if let Some(target) = target {
                    module.export_descriptions[&exported].module = Some(target.id);
                }
            }
        }
        for warning in reexport_warnings {
            context.diagnostics.warn(warning);
        }

        // Pass 2: execution order. Grey revisits surface as cycle
        // warnings carrying the full path.
        let (order, cycles) = module_graph.toposort();
        for cycle in cycles {
            let path: Vec<String> = cycle.iter().map(|m| m.id.clone()).collect();
            context.diagnostics.warn(
                Warning::new(
                    WarningCode::CircularDependency,
                    format!("Circular dependency: {}", path.join(" -> ")),
                )
                .with_cycle(path),
            );
        }
        let mut exec = 0usize;
        for module_id in &order {
            if let Some(module) = module_graph.get_module_mut(module_id) {
                module.exec_order = exec;
                exec += 1;
            }
        }

        // Pass 3: bind import references, in execution order.
        let ordered: Vec<ModuleId> = order
            .iter()
            .filter(|id| module_graph.get_module(id).is_some())
            .cloned()
            .collect();
        for module_id in &ordered {
            let module = module_graph.get_module(module_id).unwrap();
            let mut resolutions = vec![];
            for (local, description) in &module.import_descriptions {
                let Some(target) = &description.module else {
                    continue;
                };
                let mut visited = HashSet::new();
                let resolved = resolve_export(&module_graph, target, &description.name, &mut visited);
                resolutions.push((
                    local.clone(),
                    description.name.clone(),
                    description.span,
                    target.clone(),
                    resolved,
                ));
            }

            for (local, name, span, target, resolved) in resolutions {
                let binding = match resolved {
                    ExportTarget::Var(m, v) => ImportBinding::Var(VariableRef { module: m, var: v }),
                    ExportTarget::Namespace(m) => ImportBinding::Namespace(m),
                    ExportTarget::External(m, n) => {
                        if let Some(external) = module_graph
                            .get_node_mut(&m)
                            .and_then(|node| node.as_external_mut())
                        {
                            external
                                .imported_names
                                .entry(n.clone())
                                .or_default()
                                .push(module_id.clone());
                        }
                        ImportBinding::ExternalName { module: m, name: n }
                    }
                    ExportTarget::Missing => {
                        let importer = module_graph.get_module(module_id).unwrap();
                        let loc = span.map(|s| line_col(&importer.raw, s.lo));
                        let mut warning = Warning::new(
                            WarningCode::MissingExport,
                            format!("'{}' is not exported by {}", name, target.id),
                        )
                        .with_id(module_id.id.clone());
                        if let Some((line, column)) = loc {
                            warning = warning.with_loc(line, column);
                        }
                        context.diagnostics.warn(warning);

                        let kind = if context.config.shim_missing_exports {
                            VariableKind::Shim
                        } else {
                            VariableKind::Undefined
                        };
                        let producer = module_graph.get_module_mut(&target).unwrap();
                        let var = producer.scope.add_variable(Variable::new(name.as_str(), kind));
                        ImportBinding::Var(VariableRef {
                            module: target.clone(),
                            var,
                        })
                    }
                };
                let module = module_graph.get_module_mut(module_id).unwrap();
                module.bindings.insert(local, binding);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::compiler::Compiler;
    use crate::config::{Config, ParseOptions, Treeshake};
    use crate::module::{
        Dependency, ImportType, Module, ResolveType, ResolvedId,
    };
    use crate::parse::parse;
    use crate::scope::GlobalScope;

    fn make_module(id: &str, source: &str, resolved: &[(&str, &str, bool)]) -> Module {
        let mut module = Module::placeholder(ModuleId::new(id), false);
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

    fn compiler_with_warnings() -> (Compiler, Arc<Mutex<Vec<Warning>>>) {
        let warnings: Arc<Mutex<Vec<Warning>>> = Default::default();
        let sink = warnings.clone();
        let compiler = Compiler::new(
            Config::default(),
            vec![],
            None,
            Some(Arc::new(move |w: &Warning| {
                sink.lock().unwrap().push(w.clone())
            })),
        )
        .unwrap();
        (compiler, warnings)
    }

    fn insert(compiler: &Compiler, module: Module, entry: bool) {
        let mut graph = compiler.context.module_graph.write().unwrap();
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

    #[test]
    fn test_binding_through_reexport_chain() {
        let (compiler, warnings) = compiler_with_warnings();
        insert(
            &compiler,
            make_module("/a.js", "import { x } from './proxy';", &[("./proxy", "/proxy.js", false)]),
            true,
        );
        insert(
            &compiler,
            make_module(
                "/proxy.js",
                "export { inner as x } from './impl';",
                &[("./impl", "/impl.js", false)],
            ),
            false,
        );
        insert(
            &compiler,
            make_module("/impl.js", "export const inner = 1;", &[]),
            false,
        );
        connect(&compiler, "/a.js", "/proxy.js", "./proxy", 0);
        connect(&compiler, "/proxy.js", "/impl.js", "./impl", 0);

        compiler.link(&[ModuleId::new("/a.js")]).unwrap();

        let graph = compiler.context.module_graph.read().unwrap();
        let a = graph.get_module(&ModuleId::new("/a.js")).unwrap();
        match &a.bindings["x"] {
            ImportBinding::Var(reference) => {
                assert_eq!(reference.module, ModuleId::new("/impl.js"));
                let impl_module = graph.get_module(&ModuleId::new("/impl.js")).unwrap();
                assert_eq!(impl_module.scope.var(reference.var).name, "inner");
            }
            other => panic!("expected variable binding, got {:?}", other),
        }
        assert!(warnings.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_export_warns_and_binds_undefined() {
        let (compiler, warnings) = compiler_with_warnings();
        insert(
            &compiler,
            make_module("/a.js", "import { nope } from './b';", &[("./b", "/b.js", false)]),
            true,
        );
        insert(
            &compiler,
            make_module("/b.js", "export const y = 1;", &[]),
            false,
        );
        connect(&compiler, "/a.js", "/b.js", "./b", 0);

        compiler.link(&[ModuleId::new("/a.js")]).unwrap();

        let seen = warnings.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, WarningCode::MissingExport);
        drop(seen);

        let graph = compiler.context.module_graph.read().unwrap();
        let a = graph.get_module(&ModuleId::new("/a.js")).unwrap();
        match &a.bindings["nope"] {
            ImportBinding::Var(reference) => {
                let b = graph.get_module(&ModuleId::new("/b.js")).unwrap();
                assert_eq!(b.scope.var(reference.var).kind, VariableKind::Undefined);
            }
            other => panic!("expected variable binding, got {:?}", other),
        }
    }

    #[test]
    fn test_shim_missing_exports() {
        let warnings: Arc<Mutex<Vec<Warning>>> = Default::default();
        let sink = warnings.clone();
        let config = Config::from_json(r#"{"shimMissingExports": true}"#).unwrap();
        let compiler = Compiler::new(
            config,
            vec![],
            None,
            Some(Arc::new(move |w: &Warning| {
                sink.lock().unwrap().push(w.clone())
            })),
        )
        .unwrap();
        insert(
            &compiler,
            make_module("/a.js", "import { nope } from './b';", &[("./b", "/b.js", false)]),
            true,
        );
        insert(&compiler, make_module("/b.js", "export const y = 1;", &[]), false);
        connect(&compiler, "/a.js", "/b.js", "./b", 0);

        compiler.link(&[ModuleId::new("/a.js")]).unwrap();

        let graph = compiler.context.module_graph.read().unwrap();
        let a = graph.get_module(&ModuleId::new("/a.js")).unwrap();
        let ImportBinding::Var(reference) = &a.bindings["nope"] else {
            panic!("expected variable binding")
        };
        let b = graph.get_module(&ModuleId::new("/b.js")).unwrap();
        assert_eq!(b.scope.var(reference.var).kind, VariableKind::Shim);
    }

    #[test]
    fn test_namespace_import_binds_to_namespace() {
        let (compiler, _warnings) = compiler_with_warnings();
        insert(
            &compiler,
            make_module("/a.js", "import * as ns from './b';", &[("./b", "/b.js", false)]),
            true,
        );
        insert(&compiler, make_module("/b.js", "export const y = 1;", &[]), false);
        connect(&compiler, "/a.js", "/b.js", "./b", 0);

        compiler.link(&[ModuleId::new("/a.js")]).unwrap();

        let graph = compiler.context.module_graph.read().unwrap();
        let a = graph.get_module(&ModuleId::new("/a.js")).unwrap();
        assert_eq!(
            a.bindings["ns"],
            ImportBinding::Namespace(ModuleId::new("/b.js"))
        );
    }

    #[test]
    fn test_star_reexport_stops_at_external() {
        let (compiler, warnings) = compiler_with_warnings();
        insert(
            &compiler,
            make_module("/a.js", "import { anything } from './proxy';", &[("./proxy", "/proxy.js", false)]),
            true,
        );
        insert(
            &compiler,
            make_module(
                "/proxy.js",
                "export * from 'lib';",
                &[("lib", "lib", true)],
            ),
            false,
        );
        connect(&compiler, "/a.js", "/proxy.js", "./proxy", 0);
        {
            let mut graph = compiler.context.module_graph.write().unwrap();
            graph.add_module(ModuleNode::External(crate::module::ExternalModule::new(
                ModuleId::new("lib"),
                true,
                false,
            )));
            graph.add_dependency(
                &ModuleId::new("/proxy.js"),
                &ModuleId::new("lib"),
                Dependency {
                    source: "lib".to_string(),
                    resolve_type: ResolveType::ExportAll,
                    order: 0,
                    span: None,
                },
            );
        }

        compiler.link(&[ModuleId::new("/a.js")]).unwrap();

        let graph = compiler.context.module_graph.read().unwrap();
        let a = graph.get_module(&ModuleId::new("/a.js")).unwrap();
        assert_eq!(
            a.bindings["anything"],
            ImportBinding::ExternalName {
                module: ModuleId::new("lib"),
                name: "anything".to_string()
            }
        );
        assert!(warnings.lock().unwrap().is_empty());
    }

    #[test]
    fn test_execution_order_assigned() {
        let (compiler, _warnings) = compiler_with_warnings();
        insert(
            &compiler,
            make_module("/a.js", "import { y } from './b';", &[("./b", "/b.js", false)]),
            true,
        );
        insert(&compiler, make_module("/b.js", "export const y = 1;", &[]), false);
        connect(&compiler, "/a.js", "/b.js", "./b", 0);

        compiler.link(&[ModuleId::new("/a.js")]).unwrap();

        let graph = compiler.context.module_graph.read().unwrap();
        let a = graph.get_module(&ModuleId::new("/a.js")).unwrap();
        let b = graph.get_module(&ModuleId::new("/b.js")).unwrap();
        assert!(b.exec_order < a.exec_order);
    }
}
