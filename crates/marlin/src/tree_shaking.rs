use std::collections::HashSet;

use anyhow::Result;
use tracing::debug;

use crate::ast::{Expr, ModuleItem, Stmt};
use crate::compiler::{Compiler, PathTracker};
use crate::config::PreserveEntrySignatures;
use crate::diagnostics::{Warning, WarningCode};
use crate::link::{resolve_export, ExportTarget};
use crate::module::{ImportBinding, ModuleId, ModuleNode};
use crate::module_graph::ModuleGraph;
use crate::statement_graph::StatementId;
use crate::variable::VariableKind;

impl Compiler {
    /// Marks live statements and variables, iterating to a fixed point.
    /// Inclusion is monotone: nothing is ever un-included in a build.
    pub(crate) fn include(&self, entry_ids: &[ModuleId]) -> Result<()> {
        debug!("include");
        let context = &self.context;
        let mut module_graph = context.module_graph.write().unwrap();
        let module_graph = &mut *module_graph;

        // Executed propagation: everything reachable from an entry runs
        // at runtime; dynamic import targets run when requested.
        let mut queue: Vec<ModuleId> = entry_ids.to_vec();
        let mut executed: HashSet<ModuleId> = HashSet::new();
        while let Some(id) = queue.pop() {
            if !executed.insert(id.clone()) {
                continue;
            }
            if let Some(module) = module_graph.get_module_mut(&id) {
                module.is_executed = true;
            } else {
                continue;
            }
            for dep in module_graph.static_dependence_module_ids(&id) {
                queue.push(dep);
            }
            for dep in module_graph.dynamic_dependence_module_ids(&id) {
                queue.push(dep);
            }
        }

        // Register write paths before any value-based pruning runs.
        {
            let mut tracker = context.deopt_tracker.write().unwrap();
            for id in &executed {
                let Some(module) = module_graph.get_module(id) else {
                    continue;
                };
                let paths: Vec<Vec<String>> = module
                    .stmt_graph
                    .stmts()
                    .iter()
                    .flat_map(|s| s.deopt_paths.iter().cloned())
                    .collect();
                for path in paths {
                    tracker.deoptimize(id.clone(), path);
                }
            }
        }

        let mut ordered: Vec<ModuleId> = executed.iter().cloned().collect();
        ordered.sort_by_key(|id| {
            module_graph
                .get_module(id)
                .map(|m| m.exec_order)
                .unwrap_or(usize::MAX)
        });

        if !context.treeshake.enabled {
            for id in &ordered {
                if let Some(module) = module_graph.get_module_mut(id) {
                    for stmt_id in 0..module.included_stmts.len() {
                        module.include_stmt(stmt_id);
                    }
                    let vars: Vec<_> = module.scope.variables().map(|(id, _)| id).collect();
                    for var in vars {
                        module.scope.var_mut(var).include();
                    }
                    module.is_included = true;
                }
            }
            for id in module_graph.external_ids() {
                if let Some(external) = module_graph
                    .get_node_mut(&id)
                    .and_then(|n| n.as_external_mut())
                {
                    let names: Vec<String> = external.imported_names.keys().cloned().collect();
                    external.referenced_names.extend(names);
                }
            }
            return Ok(());
        }

        // Seed: entry signatures, then dynamic-import roots, which keep
        // their full export surface across the async boundary. The main
        // loop below always runs at least once, so seed inclusions do
        // not need to request a pass themselves.
        let mut seed_changes = false;
        for entry_id in entry_ids {
            let preserve = module_graph
                .get_module(entry_id)
                .map(|m| m.preserve_signature)
                .unwrap_or(PreserveEntrySignatures::Strict);
            if preserve != PreserveEntrySignatures::None {
                let mut visited = HashSet::new();
                include_all_exports(module_graph, entry_id, &mut visited, &mut seed_changes);
            }
            if let Some(module) = module_graph.get_module_mut(entry_id) {
                module.is_included = true;
            }
        }
        let dynamic_roots: Vec<ModuleId> = ordered
            .iter()
            .filter(|id| {
                module_graph
                    .get_module(id)
                    .map(|m| !m.dynamic_importers.is_empty())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for root in &dynamic_roots {
            let mut visited = HashSet::new();
            include_all_exports(module_graph, root, &mut visited, &mut seed_changes);
            if let Some(module) = module_graph.get_module_mut(root) {
                module.is_included = true;
            }
        }

        // Fixed point over executed modules: every pass includes the
        // side-effectful statements discovered so far; anything newly
        // included requests another pass.
        let mut needs_another_pass = true;
        while needs_another_pass {
            needs_another_pass = false;
            for module_id in &ordered {
                let Some(module) = module_graph.get_module(module_id) else {
                    continue;
                };
                if !module.is_executed || !module.side_effects {
                    continue;
                }
                let candidates: Vec<StatementId> = module
                    .stmt_graph
                    .stmts()
                    .iter()
                    .filter(|s| s.is_self_executed && !module.is_stmt_included(s.id))
                    .map(|s| s.id)
                    .collect();
                for stmt_id in candidates {
                    if prunable_branch(context, module_graph, module_id, stmt_id) {
                        continue;
                    }
                    include_stmt(module_graph, module_id, stmt_id, &mut needs_another_pass);
                }
            }
        }

        // Side-effect imports survive when the imported module did.
        for module_id in &ordered {
            let Some(module) = module_graph.get_module(module_id) else {
                continue;
            };
            let mut keep: Vec<StatementId> = vec![];
            for stmt in module.stmt_graph.stmts() {
                let Some(import) = &stmt.import_info else {
                    continue;
                };
                let Some(resolved) = module.resolved_ids.get(&import.source) else {
                    continue;
                };
                let keep_stmt = match module_graph.get_node(&resolved.id) {
                    Some(ModuleNode::Normal(target)) => target.is_included,
                    Some(ModuleNode::External(external)) => external.side_effects,
                    None => false,
                };
                if keep_stmt && !module.is_stmt_included(stmt.id) {
                    keep.push(stmt.id);
                }
            }
            let mut flag = false;
            for stmt_id in keep {
                include_stmt(module_graph, module_id, stmt_id, &mut flag);
            }
        }

        // Imported-but-never-referenced external names.
        let mut external_ids = module_graph.external_ids();
        external_ids.sort();
        for id in external_ids {
            let Some(external) = module_graph.get_node(&id).and_then(|n| n.as_external()) else {
                continue;
            };
            let unused = external.unused_imported_names();
            if !unused.is_empty() {
                context.diagnostics.warn(
                    Warning::new(
                        WarningCode::UnusedExternalImport,
                        format!(
                            "{} imported from external module '{}' but never used",
                            unused
                                .iter()
                                .map(|n| format!("'{}'", n))
                                .collect::<Vec<_>>()
                                .join(", "),
                            id.id
                        ),
                    )
                    .with_id(id.id.clone()),
                );
            }
        }

        Ok(())
    }
}

/// Includes one statement and, transitively, everything it reads:
/// defining statements in the same module through the statement graph,
/// and producing variables across module boundaries through bindings.
fn include_stmt(
    module_graph: &mut ModuleGraph,
    module_id: &ModuleId,
    stmt_id: StatementId,
    needs_another_pass: &mut bool,
) {
    let (dep_stmts, used_bindings) = {
        let Some(module) = module_graph.get_module_mut(module_id) else {
            return;
        };
        if !module.include_stmt(stmt_id) {
            return;
        }
        let dep_stmts = module.stmt_graph.dependencies_of(stmt_id);
        let used = module.stmt_graph.stmt(&stmt_id).used_idents.clone();
        // Module-level variables this statement reads are live with it.
        let module_scope = module.scope.module_scope();
        for name in &used {
            if let Some(var) = module.scope.lookup(module_scope, name) {
                module.scope.var_mut(var).include();
            }
        }
        let used_bindings: Vec<ImportBinding> = used
            .iter()
            .filter_map(|name| module.bindings.get(name).cloned())
            .collect();
        (dep_stmts, used_bindings)
    };
    *needs_another_pass = true;

    for dep in dep_stmts {
        include_stmt(module_graph, module_id, dep, needs_another_pass);
    }
    for binding in used_bindings {
        include_binding(module_graph, &binding, needs_another_pass);
    }
}

fn include_binding(
    module_graph: &mut ModuleGraph,
    binding: &ImportBinding,
    needs_another_pass: &mut bool,
) {
    match binding {
        ImportBinding::Var(reference) => {
            include_variable(module_graph, &reference.module, reference.var, needs_another_pass);
        }
        ImportBinding::Namespace(module_id) => {
            let mut visited = HashSet::new();
            if let Some(module) = module_graph.get_module_mut(module_id) {
                let namespace_var = module.namespace_var;
                if module.scope.var_mut(namespace_var).include() {
                    *needs_another_pass = true;
                }
            }
            include_all_exports(module_graph, module_id, &mut visited, needs_another_pass);
        }
        ImportBinding::ExternalName { module, name } => {
            if let Some(external) = module_graph
                .get_node_mut(module)
                .and_then(|n| n.as_external_mut())
            {
                external.referenced_names.insert(name.clone());
            }
        }
    }
}

fn include_variable(
    module_graph: &mut ModuleGraph,
    module_id: &ModuleId,
    var: crate::variable::VarId,
    needs_another_pass: &mut bool,
) {
    let (newly, declarations, is_namespace) = {
        let Some(module) = module_graph.get_module_mut(module_id) else {
            return;
        };
        let variable = module.scope.var_mut(var);
        let newly = variable.include();
        let declarations = variable.declarations.clone();
        let is_namespace = variable.kind == VariableKind::Namespace;
        if newly {
            module.is_included = true;
        }
        (newly, declarations, is_namespace)
    };
    if !newly {
        return;
    }
    *needs_another_pass = true;
    for stmt_id in declarations {
        include_stmt(module_graph, module_id, stmt_id, needs_another_pass);
    }
    if is_namespace {
        let mut visited = HashSet::new();
        include_all_exports(module_graph, module_id, &mut visited, needs_another_pass);
    }
}

/// Includes a module's whole public surface: every export, following
/// re-export chains, and every `export *` source transitively.
fn include_all_exports(
    module_graph: &mut ModuleGraph,
    module_id: &ModuleId,
    visited: &mut HashSet<ModuleId>,
    needs_another_pass: &mut bool,
) {
    if !visited.insert(module_id.clone()) {
        return;
    }
    let Some(module) = module_graph.get_module(module_id) else {
        return;
    };
    let exported: Vec<String> = module.export_descriptions.keys().cloned().collect();
    let star_sources: Vec<String> = module.reexport_all_sources.clone();
    let resolved_ids = module.resolved_ids.clone();

    for name in exported {
        let mut seen = HashSet::new();
        let target = resolve_export(module_graph, module_id, &name, &mut seen);
        match target {
            ExportTarget::Var(m, v) => include_variable(module_graph, &m, v, needs_another_pass),
            ExportTarget::Namespace(m) => {
                if let Some(module) = module_graph.get_module_mut(&m) {
                    let namespace_var = module.namespace_var;
                    if module.scope.var_mut(namespace_var).include() {
                        *needs_another_pass = true;
                    }
                }
                include_all_exports(module_graph, &m, visited, needs_another_pass);
            }
            ExportTarget::External(m, n) => {
                if let Some(external) = module_graph
                    .get_node_mut(&m)
                    .and_then(|node| node.as_external_mut())
                {
                    external.referenced_names.insert(n);
                }
            }
            ExportTarget::Missing => {}
        }
    }
    for source in star_sources {
        let Some(resolved) = resolved_ids.get(&source) else {
            continue;
        };
        if !resolved.external {
            include_all_exports(module_graph, &resolved.id.clone(), visited, needs_another_pass);
        }
    }
}

/// Value-analysis branch pruning: a top-level `if` whose test folds to
/// a literal `false` (and has no effects and no else branch) is dead
/// even when its body would have effects.
fn prunable_branch(
    context: &crate::compiler::Context,
    module_graph: &ModuleGraph,
    module_id: &ModuleId,
    stmt_id: StatementId,
) -> bool {
    let Some(module) = module_graph.get_module(module_id) else {
        return false;
    };
    let Some(program) = &module.ast else {
        return false;
    };
    let Some(ModuleItem::Stmt(Stmt::If(if_stmt))) = program.body.get(stmt_id) else {
        return false;
    };
    if if_stmt.alt.is_some() {
        return false;
    }
    let tracker = context.deopt_tracker.read().unwrap();
    matches!(
        refined_truthiness(module, &tracker, &if_stmt.test),
        Some(false)
    )
}

/// Folds an expression using literals plus module-level `const` object
/// initializers, refusing any path touched by a tracked write.
fn refined_truthiness(
    module: &crate::module::Module,
    tracker: &PathTracker,
    test: &Expr,
) -> Option<bool> {
    if let Some(value) = test.literal_value().truthiness() {
        return Some(value);
    }
    let path = test.member_path()?;
    if tracker.is_deoptimized(&module.id, &path) {
        return None;
    }
    let root = module
        .scope
        .lookup(module.scope.module_scope(), &path[0])?;
    let variable = module.scope.var(root);
    if variable.reassigned || variable.kind != VariableKind::Local {
        return None;
    }
    let program = module.ast.as_ref()?;
    for &stmt_id in &variable.declarations {
        let decl = match program.body.get(stmt_id)? {
            ModuleItem::Stmt(Stmt::Decl(crate::ast::Decl::Var(var))) => var,
            ModuleItem::ExportDecl(export) => match &export.decl {
                crate::ast::Decl::Var(var) => var,
                _ => return None,
            },
            _ => return None,
        };
        for declarator in &decl.decls {
            if declarator.name == path[0] {
                let init = declarator.init.as_ref()?;
                let rest: Vec<&str> = path[1..].iter().map(String::as_str).collect();
                return init.literal_value_at_path(&rest).truthiness();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::compiler::Compiler;
    use crate::config::{Config, ParseOptions, Treeshake};
    use crate::diagnostics::Warning;
    use crate::module::{Dependency, ImportType, Module, ResolveType, ResolvedId};
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

    fn included_names(compiler: &Compiler, id: &str) -> Vec<String> {
        let graph = compiler.context.module_graph.read().unwrap();
        let module = graph.get_module(&ModuleId::new(id)).unwrap();
        module
            .scope
            .variables()
            .filter(|(_, v)| v.included)
            .map(|(_, v)| v.name.clone())
            .collect()
    }

    #[test]
    fn test_dead_export_is_not_included() {
        let (compiler, _) = compiler(Config::default());
        insert(
            &compiler,
            make_module(
                "/a.js",
                "import { y } from './b';\nconsole.log(y);",
                &[("./b", "/b.js", false)],
            ),
            true,
        );
        insert(
            &compiler,
            make_module("/b.js", "export const y = 1;\nexport const z = 2;", &[]),
            false,
        );
        connect(&compiler, "/a.js", "/b.js", "./b", 0);

        let entries = vec![ModuleId::new("/a.js")];
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();

        let included = included_names(&compiler, "/b.js");
        assert!(included.contains(&"y".to_string()));
        assert!(!included.contains(&"z".to_string()));

        let graph = compiler.context.module_graph.read().unwrap();
        let b = graph.get_module(&ModuleId::new("/b.js")).unwrap();
        assert!(b.is_stmt_included(0));
        assert!(!b.is_stmt_included(1));
    }

    #[test]
    fn test_entry_signature_seeds_exports() {
        let (compiler, _) = compiler(Config::default());
        insert(
            &compiler,
            make_module("/entry.js", "export const kept = 1;\nconst internal = 2;", &[]),
            true,
        );

        let entries = vec![ModuleId::new("/entry.js")];
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();

        let included = included_names(&compiler, "/entry.js");
        assert!(included.contains(&"kept".to_string()));
        assert!(!included.contains(&"internal".to_string()));
    }

    #[test]
    fn test_include_is_idempotent() {
        let (compiler, _) = compiler(Config::default());
        insert(
            &compiler,
            make_module(
                "/a.js",
                "import { y } from './b';\nexport const x = y + 1;",
                &[("./b", "/b.js", false)],
            ),
            true,
        );
        insert(
            &compiler,
            make_module("/b.js", "export const y = 1;\nexport const z = 2;", &[]),
            false,
        );
        connect(&compiler, "/a.js", "/b.js", "./b", 0);

        let entries = vec![ModuleId::new("/a.js")];
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();
        let first = included_names(&compiler, "/b.js");
        compiler.include(&entries).unwrap();
        let second = included_names(&compiler, "/b.js");
        assert_eq!(first, second);
    }

    #[test]
    fn test_treeshake_disabled_includes_everything() {
        let config = Config::from_json(r#"{"treeshake": false}"#).unwrap();
        let (compiler, _) = compiler(config);
        insert(
            &compiler,
            make_module(
                "/a.js",
                "import { y } from './b';",
                &[("./b", "/b.js", false)],
            ),
            true,
        );
        insert(
            &compiler,
            make_module("/b.js", "export const y = 1;\nexport const z = 2;", &[]),
            false,
        );
        connect(&compiler, "/a.js", "/b.js", "./b", 0);

        let entries = vec![ModuleId::new("/a.js")];
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();

        let included = included_names(&compiler, "/b.js");
        assert!(included.contains(&"z".to_string()));
    }

    #[test]
    fn test_unused_external_import_warns() {
        let (compiler, warnings) = compiler(Config::default());
        insert(
            &compiler,
            make_module(
                "/a.js",
                "import { used, unused } from 'lib';\nconsole.log(used);",
                &[("lib", "lib", true)],
            ),
            true,
        );
        {
            let mut graph = compiler.context.module_graph.write().unwrap();
            let mut external =
                crate::module::ExternalModule::new(ModuleId::new("lib"), true, false);
            external
                .imported_names
                .insert("used".to_string(), vec![ModuleId::new("/a.js")]);
            external
                .imported_names
                .insert("unused".to_string(), vec![ModuleId::new("/a.js")]);
            graph.add_module(ModuleNode::External(external));
            graph.add_dependency(
                &ModuleId::new("/a.js"),
                &ModuleId::new("lib"),
                Dependency {
                    source: "lib".to_string(),
                    resolve_type: ResolveType::Import(ImportType::Named),
                    order: 0,
                    span: None,
                },
            );
        }

        let entries = vec![ModuleId::new("/a.js")];
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();

        let seen = warnings.lock().unwrap();
        let unused: Vec<_> = seen
            .iter()
            .filter(|w| w.code == WarningCode::UnusedExternalImport)
            .collect();
        assert_eq!(unused.len(), 1);
        assert!(unused[0].message.contains("'unused'"));
        assert!(!unused[0].message.contains("'used',"));
    }

    #[test]
    fn test_dead_branch_is_pruned() {
        let (compiler, _) = compiler(Config::default());
        insert(
            &compiler,
            make_module(
                "/a.js",
                "const config = { debug: false };\nif (config.debug) { sideEffect(); }\nconsole.log('live');",
                &[],
            ),
            true,
        );

        let entries = vec![ModuleId::new("/a.js")];
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();

        let graph = compiler.context.module_graph.read().unwrap();
        let a = graph.get_module(&ModuleId::new("/a.js")).unwrap();
        assert!(!a.is_stmt_included(1), "literal-false branch stays out");
        assert!(a.is_stmt_included(2));
    }

    #[test]
    fn test_reassigned_config_defeats_pruning() {
        let (compiler, _) = compiler(Config::default());
        insert(
            &compiler,
            make_module(
                "/a.js",
                "let config = { debug: false };\nconfig = load();\nif (config.debug) { sideEffect(); }",
                &[],
            ),
            true,
        );

        let entries = vec![ModuleId::new("/a.js")];
        compiler.link(&entries).unwrap();
        compiler.include(&entries).unwrap();

        let graph = compiler.context.module_graph.read().unwrap();
        let a = graph.get_module(&ModuleId::new("/a.js")).unwrap();
        assert!(a.is_stmt_included(2), "reassignment blocks folding");
    }
}
