use std::collections::{HashMap, HashSet};

use petgraph::graph::NodeIndex;
use petgraph::Direction;

use crate::ast::{
    ArrowBody, Decl, EffectsContext, EffectsScope, Expr, ImportSpecifier, ModuleItem, Program,
    Span, Stmt,
};
use crate::config::Treeshake;
use crate::scope::GlobalScope;

pub type StatementId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSpecifierInfo {
    Namespace(String),
    Named {
        local: String,
        imported: Option<String>,
    },
    Default(String),
}

impl ImportSpecifierInfo {
    pub fn local(&self) -> &str {
        match self {
            ImportSpecifierInfo::Namespace(local) => local,
            ImportSpecifierInfo::Named { local, .. } => local,
            ImportSpecifierInfo::Default(local) => local,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportInfo {
    pub source: String,
    pub specifiers: Vec<ImportSpecifierInfo>,
    pub stmt_id: StatementId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSpecifierInfo {
    /// `export * from "source"`.
    All,
    Named {
        local: String,
        exported: Option<String>,
    },
    /// Default export; carries the local name for named fn/class forms.
    Default(Option<String>),
    /// `export * as name from "source"`.
    Namespace(String),
}

impl ExportSpecifierInfo {
    pub fn exported_names(&self) -> Vec<String> {
        match self {
            ExportSpecifierInfo::All => vec![],
            ExportSpecifierInfo::Named { local, exported } => {
                vec![exported.clone().unwrap_or_else(|| local.clone())]
            }
            ExportSpecifierInfo::Default(_) => vec!["default".to_string()],
            ExportSpecifierInfo::Namespace(name) => vec![name.clone()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportInfo {
    pub source: Option<String>,
    pub specifiers: Vec<ExportSpecifierInfo>,
    pub stmt_id: StatementId,
}

/// A dynamic import site found inside a statement. The specifier is
/// present only when the argument is a string literal.
#[derive(Debug, Clone)]
pub struct DynamicImportRecord {
    pub stmt_id: StatementId,
    pub specifier: Option<String>,
    pub span: Span,
}

#[derive(Debug)]
pub struct Statement {
    pub id: StatementId,
    pub import_info: Option<ImportInfo>,
    pub export_info: Option<ExportInfo>,
    pub defined_idents: HashSet<String>,
    pub used_idents: HashSet<String>,
    /// Root identifiers written by top-level assignments.
    pub assigned_idents: HashSet<String>,
    /// Member paths written by top-level assignments, for value-analysis
    /// deoptimization.
    pub deopt_paths: Vec<Vec<String>>,
    /// Whether evaluating this statement at module load has effects.
    pub is_self_executed: bool,
    pub span: Span,
}

pub struct StatementGraphEdge {
    pub idents: HashSet<String>,
}

/// Per-module statement dependency graph: an edge from statement A to
/// statement B means A reads identifiers that B defines.
pub struct StatementGraph {
    g: petgraph::graph::Graph<Statement, StatementGraphEdge>,
    id_index_map: HashMap<StatementId, NodeIndex>,
    pub dynamic_imports: Vec<DynamicImportRecord>,
}

impl StatementGraph {
    pub fn empty() -> Self {
        Self {
            g: petgraph::graph::Graph::new(),
            id_index_map: HashMap::new(),
            dynamic_imports: vec![],
        }
    }

    pub fn build(program: &Program, options: &Treeshake, globals: &GlobalScope) -> Self {
        let mut graph = Self::empty();

        // Module-level names are collected up front so the effects walk
        // can distinguish locals from unknown globals.
        let mut module_locals = HashSet::new();
        for (id, item) in program.body.iter().enumerate() {
            module_locals.extend(defined_idents(id, item));
        }

        let ctx = EffectsContext {
            options,
            scope: EffectsScope {
                module_locals: &module_locals,
                known_globals: globals.knowns(),
            },
        };

        for (id, item) in program.body.iter().enumerate() {
            let statement = Statement::analyze(id, item, &ctx);
            let node = graph.g.add_node(statement);
            graph.id_index_map.insert(id, node);
            for (specifier, span) in collect_dynamic_imports(item) {
                graph.dynamic_imports.push(DynamicImportRecord {
                    stmt_id: id,
                    specifier,
                    span,
                });
            }
        }

        let mut edges_to_add = vec![];
        for stmt in graph.stmts() {
            for def_stmt in graph.stmts() {
                if stmt.id == def_stmt.id {
                    continue;
                }
                let deps_idents: HashSet<String> = def_stmt
                    .defined_idents
                    .iter()
                    .filter(|di| stmt.used_idents.contains(*di))
                    .cloned()
                    .collect();
                if !deps_idents.is_empty() {
                    edges_to_add.push((stmt.id, def_stmt.id, deps_idents));
                }
            }
        }
        for (from, to, idents) in edges_to_add {
            let from = graph.id_index_map[&from];
            let to = graph.id_index_map[&to];
            graph.g.add_edge(from, to, StatementGraphEdge { idents });
        }

        graph
    }

    pub fn stmts(&self) -> Vec<&Statement> {
        self.g.node_weights().collect()
    }

    pub fn stmt(&self, id: &StatementId) -> &Statement {
        &self.g[self.id_index_map[id]]
    }

    pub fn stmt_count(&self) -> usize {
        self.g.node_count()
    }

    /// Statements that define identifiers this statement reads.
    pub fn dependencies_of(&self, id: StatementId) -> Vec<StatementId> {
        let Some(&index) = self.id_index_map.get(&id) else {
            return vec![];
        };
        self.g
            .neighbors_directed(index, Direction::Outgoing)
            .map(|n| self.g[n].id)
            .collect()
    }
}

impl Statement {
    fn analyze(id: StatementId, item: &ModuleItem, ctx: &EffectsContext) -> Self {
        let defined = defined_idents(id, item);
        let mut collector = IdentCollector::default();
        collect_item_idents(item, &mut collector);
        let used: HashSet<String> = collector
            .used
            .difference(&defined)
            .cloned()
            .collect();

        let (import_info, export_info) = item_import_export(id, item);
        let is_self_executed = item_has_effects(item, ctx);

        Self {
            id,
            import_info,
            export_info,
            defined_idents: defined,
            used_idents: used,
            assigned_idents: collector.assigned,
            deopt_paths: collector.deopt_paths,
            is_self_executed,
            span: item.span(),
        }
    }
}

pub fn defined_idents(_id: StatementId, item: &ModuleItem) -> HashSet<String> {
    match item {
        ModuleItem::Import(import) => import
            .specifiers
            .iter()
            .map(|s| s.local().to_string())
            .collect(),
        ModuleItem::ExportDecl(export) => export.decl.names().into_iter().collect(),
        ModuleItem::ExportDefault(export) => {
            export.name.iter().cloned().collect()
        }
        ModuleItem::Stmt(Stmt::Decl(decl)) => decl.names().into_iter().collect(),
        _ => HashSet::new(),
    }
}

fn item_import_export(
    id: StatementId,
    item: &ModuleItem,
) -> (Option<ImportInfo>, Option<ExportInfo>) {
    match item {
        ModuleItem::Import(import) => {
            let specifiers = import
                .specifiers
                .iter()
                .map(|s| match s {
                    ImportSpecifier::Named { local, imported } => ImportSpecifierInfo::Named {
                        local: local.clone(),
                        imported: imported.clone(),
                    },
                    ImportSpecifier::Default(local) => ImportSpecifierInfo::Default(local.clone()),
                    ImportSpecifier::Namespace(local) => {
                        ImportSpecifierInfo::Namespace(local.clone())
                    }
                })
                .collect();
            (
                Some(ImportInfo {
                    source: import.source.clone(),
                    specifiers,
                    stmt_id: id,
                }),
                None,
            )
        }
        ModuleItem::ExportNamed(export) => {
            let specifiers = export
                .specifiers
                .iter()
                .map(|s| ExportSpecifierInfo::Named {
                    local: s.local.clone(),
                    exported: s.exported.clone(),
                })
                .collect();
            (
                None,
                Some(ExportInfo {
                    source: export.source.clone(),
                    specifiers,
                    stmt_id: id,
                }),
            )
        }
        ModuleItem::ExportDecl(export) => {
            let specifiers = export
                .decl
                .names()
                .into_iter()
                .map(|name| ExportSpecifierInfo::Named {
                    local: name,
                    exported: None,
                })
                .collect();
            (
                None,
                Some(ExportInfo {
                    source: None,
                    specifiers,
                    stmt_id: id,
                }),
            )
        }
        ModuleItem::ExportDefault(export) => (
            None,
            Some(ExportInfo {
                source: None,
                specifiers: vec![ExportSpecifierInfo::Default(export.name.clone())],
                stmt_id: id,
            }),
        ),
        ModuleItem::ExportAll(export) => {
            let specifier = match &export.alias {
                Some(alias) => ExportSpecifierInfo::Namespace(alias.clone()),
                None => ExportSpecifierInfo::All,
            };
            (
                None,
                Some(ExportInfo {
                    source: Some(export.source.clone()),
                    specifiers: vec![specifier],
                    stmt_id: id,
                }),
            )
        }
        ModuleItem::Stmt(_) => (None, None),
    }
}

fn item_has_effects(item: &ModuleItem, ctx: &EffectsContext) -> bool {
    match item {
        ModuleItem::Import(_) | ModuleItem::ExportNamed(_) | ModuleItem::ExportAll(_) => false,
        ModuleItem::ExportDecl(export) => {
            Stmt::Decl(export.decl.clone()).has_effects(ctx)
        }
        ModuleItem::ExportDefault(export) => export.expr.has_effects(ctx),
        ModuleItem::Stmt(stmt) => stmt.has_effects(ctx),
    }
}

/// Free-identifier collector: walks a statement tracking locally bound
/// frames (function params, body declarations) so that only references
/// escaping to module scope are recorded.
#[derive(Default)]
struct IdentCollector {
    used: HashSet<String>,
    assigned: HashSet<String>,
    deopt_paths: Vec<Vec<String>>,
    frames: Vec<HashSet<String>>,
}

impl IdentCollector {
    fn is_bound(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.contains(name))
    }

    fn use_ident(&mut self, name: &str) {
        if !self.is_bound(name) {
            self.used.insert(name.to_string());
        }
    }

    fn with_frame(&mut self, names: HashSet<String>, walk: impl FnOnce(&mut Self)) {
        self.frames.push(names);
        walk(self);
        self.frames.pop();
    }
}

fn hoisted_names(body: &[Stmt]) -> HashSet<String> {
    let mut names = HashSet::new();
    for stmt in body {
        if let Stmt::Decl(decl) = stmt {
            names.extend(decl.names());
        }
    }
    names
}

fn collect_item_idents(item: &ModuleItem, collector: &mut IdentCollector) {
    match item {
        ModuleItem::Import(_) | ModuleItem::ExportAll(_) => {}
        ModuleItem::ExportNamed(export) => {
            // Re-exports reference nothing locally.
            if export.source.is_none() {
                for specifier in &export.specifiers {
                    collector.use_ident(&specifier.local);
                }
            }
        }
        ModuleItem::ExportDecl(export) => collect_decl_idents(&export.decl, collector),
        ModuleItem::ExportDefault(export) => collect_expr_idents(&export.expr, collector),
        ModuleItem::Stmt(stmt) => collect_stmt_idents(stmt, collector),
    }
}

fn collect_stmt_idents(stmt: &Stmt, collector: &mut IdentCollector) {
    match stmt {
        Stmt::Expr(expr, _) => collect_expr_idents(expr, collector),
        Stmt::Decl(decl) => collect_decl_idents(decl, collector),
        Stmt::Return(arg, _) => {
            if let Some(arg) = arg {
                collect_expr_idents(arg, collector);
            }
        }
        Stmt::If(i) => {
            collect_expr_idents(&i.test, collector);
            collect_stmt_idents(&i.cons, collector);
            if let Some(alt) = &i.alt {
                collect_stmt_idents(alt, collector);
            }
        }
        Stmt::Block(stmts, _) => {
            let names = hoisted_names(stmts);
            collector.with_frame(names, |c| {
                for stmt in stmts {
                    collect_stmt_idents(stmt, c);
                }
            });
        }
        Stmt::Try(t) => {
            let block_names = hoisted_names(&t.block);
            collector.with_frame(block_names, |c| {
                for stmt in &t.block {
                    collect_stmt_idents(stmt, c);
                }
            });
            if let Some((param, body)) = &t.handler {
                let mut names = hoisted_names(body);
                if let Some(param) = param {
                    names.insert(param.clone());
                }
                collector.with_frame(names, |c| {
                    for stmt in body {
                        collect_stmt_idents(stmt, c);
                    }
                });
            }
            if let Some(body) = &t.finalizer {
                let names = hoisted_names(body);
                collector.with_frame(names, |c| {
                    for stmt in body {
                        collect_stmt_idents(stmt, c);
                    }
                });
            }
        }
        Stmt::Throw(expr, _) => collect_expr_idents(expr, collector),
        Stmt::Empty(_) => {}
    }
}

fn collect_decl_idents(decl: &Decl, collector: &mut IdentCollector) {
    match decl {
        Decl::Var(var) => {
            for declarator in &var.decls {
                if let Some(init) = &declarator.init {
                    collect_expr_idents(init, collector);
                }
            }
        }
        Decl::Fn(func) => {
            let mut names: HashSet<String> = func.params.iter().cloned().collect();
            names.extend(hoisted_names(&func.body));
            names.insert(func.name.clone());
            collector.with_frame(names, |c| {
                for stmt in &func.body {
                    collect_stmt_idents(stmt, c);
                }
            });
        }
        Decl::Class(class) => {
            if let Some(super_class) = &class.super_class {
                collect_expr_idents(super_class, collector);
            }
            for method in &class.methods {
                let mut names: HashSet<String> = method.params.iter().cloned().collect();
                names.extend(hoisted_names(&method.body));
                names.insert("this".to_string());
                collector.with_frame(names, |c| {
                    for stmt in &method.body {
                        collect_stmt_idents(stmt, c);
                    }
                });
            }
        }
    }
}

fn collect_expr_idents(expr: &Expr, collector: &mut IdentCollector) {
    match expr {
        Expr::Ident(name, _) => collector.use_ident(name),
        Expr::Lit(..) => {}
        Expr::Call(call) | Expr::New(call) => {
            collect_expr_idents(&call.callee, collector);
            for arg in &call.args {
                collect_expr_idents(arg, collector);
            }
        }
        Expr::Member(member) => {
            collect_expr_idents(&member.obj, collector);
            if let Some(computed) = &member.computed {
                collect_expr_idents(computed, collector);
            }
        }
        Expr::Bin(bin) => {
            collect_expr_idents(&bin.left, collector);
            collect_expr_idents(&bin.right, collector);
        }
        Expr::Unary(_, arg, _) => collect_expr_idents(arg, collector),
        Expr::Assign(assign) => {
            match assign.target.member_path() {
                Some(path) if path.len() > 1 => {
                    if !collector.is_bound(&path[0]) {
                        collector.deopt_paths.push(path);
                    }
                }
                Some(path) => {
                    if !collector.is_bound(&path[0]) {
                        collector.assigned.insert(path[0].clone());
                    }
                }
                None => {}
            }
            collect_expr_idents(&assign.target, collector);
            collect_expr_idents(&assign.value, collector);
        }
        Expr::Cond(cond) => {
            collect_expr_idents(&cond.test, collector);
            collect_expr_idents(&cond.cons, collector);
            collect_expr_idents(&cond.alt, collector);
        }
        Expr::Arrow(arrow) => {
            let mut names: HashSet<String> = arrow.params.iter().cloned().collect();
            match &arrow.body {
                ArrowBody::Expr(body) => {
                    collector.with_frame(names, |c| collect_expr_idents(body, c));
                }
                ArrowBody::Block(body) => {
                    names.extend(hoisted_names(body));
                    collector.with_frame(names, |c| {
                        for stmt in body {
                            collect_stmt_idents(stmt, c);
                        }
                    });
                }
            }
        }
        Expr::Fn(func) => {
            let mut names: HashSet<String> = func.params.iter().cloned().collect();
            names.extend(hoisted_names(&func.body));
            if let Some(name) = &func.name {
                names.insert(name.clone());
            }
            collector.with_frame(names, |c| {
                for stmt in &func.body {
                    collect_stmt_idents(stmt, c);
                }
            });
        }
        Expr::Class(class) => {
            collect_decl_idents(&Decl::Class((**class).clone()), collector)
        }
        Expr::Object(props, _) => {
            for prop in props {
                collect_expr_idents(&prop.value, collector);
            }
        }
        Expr::Array(items, _) => {
            for item in items {
                collect_expr_idents(item, collector);
            }
        }
        Expr::Paren(inner, _) => collect_expr_idents(inner, collector),
        Expr::DynamicImport(arg, _) => collect_expr_idents(arg, collector),
    }
}

fn collect_dynamic_imports(item: &ModuleItem) -> Vec<(Option<String>, Span)> {
    struct Finder {
        found: Vec<(Option<String>, Span)>,
    }
    fn walk_expr(expr: &Expr, finder: &mut Finder) {
        if let Expr::DynamicImport(arg, span) = expr {
            let specifier = match arg.as_ref() {
                Expr::Lit(crate::ast::Lit::Str(s), _) => Some(s.clone()),
                _ => None,
            };
            finder.found.push((specifier, *span));
        }
        for_each_child_expr(expr, &mut |child| walk_expr(child, finder));
    }
    fn walk_stmt(stmt: &Stmt, finder: &mut Finder) {
        match stmt {
            Stmt::Expr(e, _) | Stmt::Throw(e, _) => walk_expr(e, finder),
            Stmt::Return(Some(e), _) => walk_expr(e, finder),
            Stmt::Return(None, _) | Stmt::Empty(_) => {}
            Stmt::Decl(decl) => walk_decl(decl, finder),
            Stmt::If(i) => {
                walk_expr(&i.test, finder);
                walk_stmt(&i.cons, finder);
                if let Some(alt) = &i.alt {
                    walk_stmt(alt, finder);
                }
            }
            Stmt::Block(stmts, _) => stmts.iter().for_each(|s| walk_stmt(s, finder)),
            Stmt::Try(t) => {
                t.block.iter().for_each(|s| walk_stmt(s, finder));
                if let Some((_, body)) = &t.handler {
                    body.iter().for_each(|s| walk_stmt(s, finder));
                }
                if let Some(body) = &t.finalizer {
                    body.iter().for_each(|s| walk_stmt(s, finder));
                }
            }
        }
    }
    fn walk_decl(decl: &Decl, finder: &mut Finder) {
        match decl {
            Decl::Var(var) => {
                for declarator in &var.decls {
                    if let Some(init) = &declarator.init {
                        walk_expr(init, finder);
                    }
                }
            }
            Decl::Fn(func) => func.body.iter().for_each(|s| walk_stmt(s, finder)),
            Decl::Class(class) => {
                if let Some(super_class) = &class.super_class {
                    walk_expr(super_class, finder);
                }
                for method in &class.methods {
                    method.body.iter().for_each(|s| walk_stmt(s, finder));
                }
            }
        }
    }

    let mut finder = Finder { found: vec![] };
    match item {
        ModuleItem::Stmt(stmt) => walk_stmt(stmt, &mut finder),
        ModuleItem::ExportDecl(export) => walk_decl(&export.decl, &mut finder),
        ModuleItem::ExportDefault(export) => walk_expr(&export.expr, &mut finder),
        _ => {}
    }
    finder.found
}

fn for_each_child_expr(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    match expr {
        Expr::Ident(..) | Expr::Lit(..) => {}
        Expr::Call(call) | Expr::New(call) => {
            f(&call.callee);
            call.args.iter().for_each(&mut *f);
        }
        Expr::Member(member) => {
            f(&member.obj);
            if let Some(computed) = &member.computed {
                f(computed);
            }
        }
        Expr::Bin(bin) => {
            f(&bin.left);
            f(&bin.right);
        }
        Expr::Unary(_, arg, _) => f(arg),
        Expr::Assign(assign) => {
            f(&assign.target);
            f(&assign.value);
        }
        Expr::Cond(cond) => {
            f(&cond.test);
            f(&cond.cons);
            f(&cond.alt);
        }
        Expr::Arrow(arrow) => {
            if let ArrowBody::Expr(body) = &arrow.body {
                f(body);
            }
        }
        Expr::Fn(_) | Expr::Class(_) => {}
        Expr::Object(props, _) => props.iter().for_each(|p| f(&p.value)),
        Expr::Array(items, _) => items.iter().for_each(&mut *f),
        Expr::Paren(inner, _) => f(inner),
        Expr::DynamicImport(arg, _) => f(arg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseOptions;
    use crate::parse::parse;

    fn build(source: &str) -> StatementGraph {
        let program = parse(source, &ParseOptions::default()).unwrap();
        StatementGraph::build(&program, &Treeshake::default(), &GlobalScope::default())
    }

    #[test]
    fn test_defined_and_used_idents() {
        let graph = build("import { y } from './b';\nexport const x = y + 1;");
        let import_stmt = graph.stmt(&0);
        assert!(import_stmt.defined_idents.contains("y"));
        let export_stmt = graph.stmt(&1);
        assert!(export_stmt.defined_idents.contains("x"));
        assert!(export_stmt.used_idents.contains("y"));
        assert_eq!(graph.dependencies_of(1), vec![0]);
    }

    #[test]
    fn test_function_locals_are_not_free() {
        let graph = build("const helper = 1;\nfunction f(a) { const b = a; return helper + b; }");
        let fn_stmt = graph.stmt(&1);
        assert!(fn_stmt.used_idents.contains("helper"));
        assert!(!fn_stmt.used_idents.contains("a"));
        assert!(!fn_stmt.used_idents.contains("b"));
        // Recursion does not create a self-edge.
        assert!(!fn_stmt.used_idents.contains("f"));
    }

    #[test]
    fn test_self_executed_statements() {
        let graph = build("const a = 1;\nconsole.log(a);\nconst b = /*#__PURE__*/ create();");
        assert!(!graph.stmt(&0).is_self_executed);
        assert!(graph.stmt(&1).is_self_executed);
        assert!(!graph.stmt(&2).is_self_executed);
    }

    #[test]
    fn test_dynamic_import_records() {
        let graph = build("function lazy() { return import('./later'); }\nimport('./now');");
        assert_eq!(graph.dynamic_imports.len(), 2);
        assert_eq!(graph.dynamic_imports[0].specifier.as_deref(), Some("./later"));
        assert_eq!(graph.dynamic_imports[0].stmt_id, 0);
        assert_eq!(graph.dynamic_imports[1].stmt_id, 1);
    }

    #[test]
    fn test_assignment_tracking() {
        let graph = build("let state = 0;\nstate = 1;\nconfig.flags.verbose = true;");
        assert!(graph.stmt(&1).assigned_idents.contains("state"));
        assert_eq!(
            graph.stmt(&2).deopt_paths,
            vec![vec![
                "config".to_string(),
                "flags".to_string(),
                "verbose".to_string()
            ]]
        );
    }
}
