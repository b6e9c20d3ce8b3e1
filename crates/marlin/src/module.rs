use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use bitflags::bitflags;
use indexmap::IndexMap;
use pathdiff::diff_paths;
use serde::Serialize;
use twox_hash::XxHash64;

use crate::ast::{ImportSpecifier, Program, Span};
use crate::config::{PreserveEntrySignatures, Treeshake};
use crate::scope::{GlobalScope, ScopeTree};
use crate::statement_graph::{
    ExportSpecifierInfo, ImportSpecifierInfo, StatementGraph, StatementId,
};
use crate::variable::{VarId, Variable, VariableKind, VariableRef};

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ModuleId {
    pub id: String,
}

impl Ord for ModuleId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for ModuleId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Root-relative readable form used in diagnostics and chunk names.
    pub fn relative_to(&self, root: &PathBuf) -> String {
        let absolute = PathBuf::from(&self.id);
        let relative = diff_paths(&absolute, root).unwrap_or(absolute);
        relative.to_string_lossy().to_string()
    }
}

impl Debug for ModuleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl From<String> for ModuleId {
    fn from(id: String) -> Self {
        Self { id }
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
    pub struct ImportType: u16 {
        const Default = 1;
        const Named = 1 << 2;
        const Namespace = 1 << 3;
        const SideEffect = 1 << 4;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
    pub struct NamedExportType: u16 {
        const Named = 1;
        const Default = 1 << 2;
        const Namespace = 1 << 3;
    }
}

impl From<&crate::ast::ImportDecl> for ImportType {
    fn from(decl: &crate::ast::ImportDecl) -> Self {
        if decl.specifiers.is_empty() {
            ImportType::SideEffect
        } else {
            let mut import_type = ImportType::empty();
            for specifier in &decl.specifiers {
                match specifier {
                    ImportSpecifier::Named { .. } => import_type |= ImportType::Named,
                    ImportSpecifier::Default(_) => import_type |= ImportType::Default,
                    ImportSpecifier::Namespace(_) => import_type |= ImportType::Namespace,
                }
            }
            import_type
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResolveType {
    Import(ImportType),
    ExportNamed(NamedExportType),
    ExportAll,
    DynamicImport,
}

impl ResolveType {
    pub fn is_static(&self) -> bool {
        !matches!(self, ResolveType::DynamicImport)
    }
}

/// One import/export edge from an importer to a source, in AST order.
#[derive(Debug, Clone, Eq)]
pub struct Dependency {
    pub source: String,
    pub resolve_type: ResolveType,
    pub order: usize,
    pub span: Option<Span>,
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.resolve_type == other.resolve_type
    }
}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.resolve_type.hash(state);
    }
}

pub type Dependencies = HashSet<Dependency>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
    pub id: ModuleId,
    pub external: bool,
}

/// `local name -> where it comes from`, before and after linking.
#[derive(Debug, Clone)]
pub struct ImportDescription {
    pub source: String,
    /// Name in the producing module: `*`, `default`, or a named export.
    pub name: String,
    pub module: Option<ModuleId>,
    pub span: Option<Span>,
}

/// `exported name -> what produces it`.
#[derive(Debug, Clone)]
pub struct ExportDescription {
    pub local_name: String,
    /// For re-exports: the name looked up in `source` (`*` re-exports a
    /// whole namespace object).
    pub name_in_source: Option<String>,
    pub source: Option<String>,
    pub module: Option<ModuleId>,
    pub var: Option<VarId>,
    pub stmt_id: StatementId,
}

#[derive(Debug, Clone)]
pub struct DynamicImportSite {
    pub specifier: Option<String>,
    pub resolved: Option<ResolvedId>,
    pub span: Span,
}

/// Post-link target of an import reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportBinding {
    Var(VariableRef),
    ExternalName { module: ModuleId, name: String },
    Namespace(ModuleId),
}

pub struct Module {
    pub id: ModuleId,
    pub is_entry: bool,
    pub entry_name: Option<String>,
    pub ast: Option<Program>,
    pub raw: String,
    pub raw_hash: u64,
    /// Hash of the source before the transform chain ran, the cache
    /// key for skipping transforms on unchanged files.
    pub source_hash: u64,
    /// Import specifiers in first-appearance AST order.
    pub sources: Vec<String>,
    /// Outgoing edges in AST order, used to enqueue loader work.
    pub dependencies: Vec<Dependency>,
    pub resolved_ids: IndexMap<String, ResolvedId>,
    pub dynamic_imports: Vec<DynamicImportSite>,
    pub import_descriptions: IndexMap<String, ImportDescription>,
    pub export_descriptions: IndexMap<String, ExportDescription>,
    pub reexport_all_sources: Vec<String>,
    pub scope: ScopeTree,
    pub stmt_graph: StatementGraph,
    /// Per top-level statement inclusion bits, parallel to the AST body.
    pub included_stmts: Vec<bool>,
    pub namespace_var: VarId,
    pub side_effects: bool,
    pub preserve_signature: PreserveEntrySignatures,
    pub is_executed: bool,
    pub is_included: bool,
    pub importers: Vec<ModuleId>,
    pub dynamic_importers: Vec<ModuleId>,
    pub exec_order: usize,
    /// `local import name -> producer binding`, filled by the linker.
    pub bindings: IndexMap<String, ImportBinding>,
    /// Top-level `this` identifier for this module.
    pub context: String,
}

impl Module {
    /// Placeholder registered by the loader before the source has been
    /// fetched; at most one exists per id and it is always completed
    /// before the analysis phase starts.
    pub fn placeholder(id: ModuleId, is_entry: bool) -> Self {
        let mut scope = ScopeTree::new();
        let namespace_var = scope.add_variable(Variable::new("*namespace*", VariableKind::Namespace));
        Self {
            id,
            is_entry,
            entry_name: None,
            ast: None,
            raw: String::new(),
            raw_hash: 0,
            source_hash: 0,
            sources: vec![],
            dependencies: vec![],
            resolved_ids: IndexMap::new(),
            dynamic_imports: vec![],
            import_descriptions: IndexMap::new(),
            export_descriptions: IndexMap::new(),
            reexport_all_sources: vec![],
            scope,
            stmt_graph: StatementGraph::empty(),
            included_stmts: vec![],
            namespace_var,
            side_effects: true,
            preserve_signature: PreserveEntrySignatures::Strict,
            is_executed: false,
            is_included: false,
            importers: vec![],
            dynamic_importers: vec![],
            exec_order: usize::MAX,
            bindings: IndexMap::new(),
            context: "undefined".to_string(),
        }
    }

    /// Fills a placeholder from the parsed program: builds the scope
    /// tree, statement graph, dependency list, and import/export
    /// descriptions.
    pub fn set_program(
        &mut self,
        raw: String,
        program: Program,
        treeshake: &Treeshake,
        globals: &GlobalScope,
    ) {
        self.raw_hash = hash_text(&raw);
        self.raw = raw;
        self.stmt_graph = StatementGraph::build(&program, treeshake, globals);
        self.included_stmts = vec![false; program.body.len()];

        // Declarations first: exports and assignments may reference
        // hoisted names.
        for stmt in self.stmt_graph.stmts() {
            for name in &stmt.defined_idents {
                let var = self.scope.declare(self.scope.module_scope(), name, VariableKind::Local);
                self.scope.var_mut(var).declarations.push(stmt.id);
            }
        }
        for stmt in self.stmt_graph.stmts() {
            for name in &stmt.assigned_idents {
                if let Some(var) = self.scope.lookup(self.scope.module_scope(), name) {
                    self.scope.var_mut(var).reassigned = true;
                }
            }
        }

        let mut order = 0;
        let mut dependencies: Vec<Dependency> = vec![];
        let mut push_source = |sources: &mut Vec<String>, source: &str| {
            if !sources.iter().any(|s| s == source) {
                sources.push(source.to_string());
            }
        };

        let stmt_ids: Vec<StatementId> = self.stmt_graph.stmts().iter().map(|s| s.id).collect();
        for stmt_id in stmt_ids {
            let (import_info, export_info, span) = {
                let stmt = self.stmt_graph.stmt(&stmt_id);
                (
                    stmt.import_info.clone(),
                    stmt.export_info.clone(),
                    stmt.span,
                )
            };
            if let Some(import) = import_info {
                push_source(&mut self.sources, &import.source);
                let import_type = match program.body.get(stmt_id) {
                    Some(crate::ast::ModuleItem::Import(decl)) => ImportType::from(decl),
                    _ => ImportType::SideEffect,
                };
                dependencies.push(Dependency {
                    source: import.source.clone(),
                    resolve_type: ResolveType::Import(import_type),
                    order,
                    span: Some(span),
                });
                order += 1;
                for specifier in &import.specifiers {
                    let (local, name) = match specifier {
                        ImportSpecifierInfo::Named { local, imported } => (
                            local.clone(),
                            imported.clone().unwrap_or_else(|| local.clone()),
                        ),
                        ImportSpecifierInfo::Default(local) => {
                            (local.clone(), "default".to_string())
                        }
                        ImportSpecifierInfo::Namespace(local) => (local.clone(), "*".to_string()),
                    };
                    self.import_descriptions.insert(
                        local,
                        ImportDescription {
                            source: import.source.clone(),
                            name,
                            module: None,
                            span: Some(span),
                        },
                    );
                }
            }
            if let Some(export) = export_info {
                if let Some(source) = &export.source {
                    push_source(&mut self.sources, source);
                    let resolve_type = if export
                        .specifiers
                        .iter()
                        .any(|s| matches!(s, ExportSpecifierInfo::All))
                    {
                        ResolveType::ExportAll
                    } else {
                        ResolveType::ExportNamed(NamedExportType::Named)
                    };
                    dependencies.push(Dependency {
                        source: source.clone(),
                        resolve_type,
                        order,
                        span: Some(span),
                    });
                    order += 1;
                }
                for specifier in &export.specifiers {
                    match specifier {
                        ExportSpecifierInfo::All => {
                            let source = export.source.clone().expect("export * has a source");
                            if !self.reexport_all_sources.contains(&source) {
                                self.reexport_all_sources.push(source);
                            }
                        }
                        ExportSpecifierInfo::Named { local, exported } => {
                            let exported_name =
                                exported.clone().unwrap_or_else(|| local.clone());
                            let (var, name_in_source) = if export.source.is_some() {
                                (None, Some(local.clone()))
                            } else {
                                (
                                    self.scope.lookup(self.scope.module_scope(), local),
                                    None,
                                )
                            };
                            self.export_descriptions.insert(
                                exported_name,
                                ExportDescription {
                                    local_name: local.clone(),
                                    name_in_source,
                                    source: export.source.clone(),
                                    module: None,
                                    var,
                                    stmt_id,
                                },
                            );
                        }
                        ExportSpecifierInfo::Default(local) => {
                            let var = match local {
                                Some(local) => {
                                    self.scope.lookup(self.scope.module_scope(), local)
                                }
                                None => {
                                    let var = self.scope.add_variable(Variable::new(
                                        "*default*",
                                        VariableKind::ExportDefault,
                                    ));
                                    self.scope.var_mut(var).declarations.push(stmt_id);
                                    Some(var)
                                }
                            };
                            self.export_descriptions.insert(
                                "default".to_string(),
                                ExportDescription {
                                    local_name: local
                                        .clone()
                                        .unwrap_or_else(|| "*default*".to_string()),
                                    name_in_source: None,
                                    source: None,
                                    module: None,
                                    var,
                                    stmt_id,
                                },
                            );
                        }
                        ExportSpecifierInfo::Namespace(name) => {
                            let source = export.source.clone().expect("export * as has a source");
                            self.export_descriptions.insert(
                                name.clone(),
                                ExportDescription {
                                    local_name: name.clone(),
                                    name_in_source: Some("*".to_string()),
                                    source: Some(source),
                                    module: None,
                                    var: None,
                                    stmt_id,
                                },
                            );
                        }
                    }
                }
            }
        }

        for record in &self.stmt_graph.dynamic_imports {
            if let Some(specifier) = &record.specifier {
                dependencies.push(Dependency {
                    source: specifier.clone(),
                    resolve_type: ResolveType::DynamicImport,
                    order,
                    span: Some(record.span),
                });
                order += 1;
            }
            self.dynamic_imports.push(DynamicImportSite {
                specifier: record.specifier.clone(),
                resolved: None,
                span: record.span,
            });
        }

        self.dependencies = dependencies;
        self.ast = Some(program);
    }

    pub fn exported_names(&self) -> Vec<String> {
        self.export_descriptions.keys().cloned().collect()
    }

    pub fn include_stmt(&mut self, stmt_id: StatementId) -> bool {
        if self.included_stmts.get(stmt_id).copied().unwrap_or(true) {
            return false;
        }
        self.included_stmts[stmt_id] = true;
        self.is_included = true;
        true
    }

    pub fn is_stmt_included(&self, stmt_id: StatementId) -> bool {
        self.included_stmts.get(stmt_id).copied().unwrap_or(false)
    }

    pub fn get_module_size(&self) -> usize {
        self.raw.as_bytes().len()
    }
}

impl Debug for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Module id={}", self.id.id)
    }
}

/// A declared-external leaf: never loaded, never parsed.
#[derive(Debug)]
pub struct ExternalModule {
    pub id: ModuleId,
    pub side_effects: bool,
    /// Names imported from this module anywhere in the graph.
    pub imported_names: IndexMap<String, Vec<ModuleId>>,
    /// Names actually referenced by included code.
    pub referenced_names: HashSet<String>,
    pub reached_dynamically_only: bool,
    pub importers: Vec<ModuleId>,
    pub dynamic_importers: Vec<ModuleId>,
}

impl ExternalModule {
    pub fn new(id: ModuleId, side_effects: bool, dynamic: bool) -> Self {
        Self {
            id,
            side_effects,
            imported_names: IndexMap::new(),
            referenced_names: HashSet::new(),
            reached_dynamically_only: dynamic,
            importers: vec![],
            dynamic_importers: vec![],
        }
    }

    pub fn unused_imported_names(&self) -> Vec<String> {
        self.imported_names
            .keys()
            .filter(|name| !self.referenced_names.contains(*name) && *name != "*")
            .cloned()
            .collect()
    }
}

/// Graph node: an internal module or a declared-external leaf.
pub enum ModuleNode {
    Normal(Box<Module>),
    External(ExternalModule),
}

impl ModuleNode {
    pub fn id(&self) -> &ModuleId {
        match self {
            ModuleNode::Normal(module) => &module.id,
            ModuleNode::External(external) => &external.id,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ModuleNode::External(_))
    }

    pub fn as_normal(&self) -> Option<&Module> {
        match self {
            ModuleNode::Normal(module) => Some(module),
            ModuleNode::External(_) => None,
        }
    }

    pub fn as_normal_mut(&mut self) -> Option<&mut Module> {
        match self {
            ModuleNode::Normal(module) => Some(module),
            ModuleNode::External(_) => None,
        }
    }

    pub fn as_external(&self) -> Option<&ExternalModule> {
        match self {
            ModuleNode::External(external) => Some(external),
            ModuleNode::Normal(_) => None,
        }
    }

    pub fn as_external_mut(&mut self) -> Option<&mut ExternalModule> {
        match self {
            ModuleNode::External(external) => Some(external),
            ModuleNode::Normal(_) => None,
        }
    }
}

impl Debug for ModuleNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleNode::Normal(module) => write!(f, "{:?}", module),
            ModuleNode::External(external) => write!(f, "External id={}", external.id.id),
        }
    }
}

/// Read-only projection of a module handed to plugins.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfoView {
    pub id: String,
    pub is_entry: bool,
    pub is_external: bool,
    pub is_included: bool,
    pub importers: Vec<String>,
    pub dynamic_importers: Vec<String>,
    pub imported_ids: Vec<String>,
    pub exported_names: Vec<String>,
    pub has_module_side_effects: bool,
}

pub fn hash_text(text: &str) -> u64 {
    let mut hasher: XxHash64 = Default::default();
    hasher.write(text.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseOptions;
    use crate::parse::parse;

    fn module_from(source: &str) -> Module {
        let mut module = Module::placeholder(ModuleId::new("/src/a.js"), false);
        let program = parse(source, &ParseOptions::default()).unwrap();
        module.set_program(
            source.to_string(),
            program,
            &Treeshake::default(),
            &GlobalScope::default(),
        );
        module
    }

    #[test]
    fn test_import_descriptions() {
        let module = module_from(
            "import def, { a, b as c } from './dep';\nimport * as ns from './other';",
        );
        assert_eq!(module.sources, vec!["./dep", "./other"]);
        assert_eq!(module.import_descriptions["def"].name, "default");
        assert_eq!(module.import_descriptions["a"].name, "a");
        assert_eq!(module.import_descriptions["c"].name, "b");
        assert_eq!(module.import_descriptions["ns"].name, "*");
    }

    #[test]
    fn test_export_descriptions() {
        let module = module_from(
            "const hidden = 1;\nexport const x = 2;\nexport { hidden as shown };\nexport { inner } from './dep';\nexport * from './star';\nexport default function main() {}",
        );
        assert_eq!(
            module.exported_names(),
            vec!["x", "shown", "inner", "default"]
        );
        let shown = &module.export_descriptions["shown"];
        assert_eq!(shown.local_name, "hidden");
        assert!(shown.var.is_some());
        let inner = &module.export_descriptions["inner"];
        assert_eq!(inner.source.as_deref(), Some("./dep"));
        assert_eq!(inner.name_in_source.as_deref(), Some("inner"));
        assert_eq!(module.reexport_all_sources, vec!["./star"]);
        let default = &module.export_descriptions["default"];
        assert_eq!(default.local_name, "main");
        assert!(default.var.is_some());
    }

    #[test]
    fn test_anonymous_default_gets_synthetic_variable() {
        let module = module_from("export default 42;");
        let default = &module.export_descriptions["default"];
        let var = default.var.expect("synthetic default variable");
        assert_eq!(module.scope.var(var).kind, VariableKind::ExportDefault);
    }

    #[test]
    fn test_dependency_order_follows_ast() {
        let module = module_from(
            "import './first';\nexport { x } from './second';\nimport './third';\nconst p = import('./fourth');",
        );
        let mut deps = module.dependencies.clone();
        deps.sort_by_key(|d| d.order);
        let sources: Vec<&str> = deps.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["./first", "./second", "./third", "./fourth"]);
        assert!(matches!(
            deps[3].resolve_type,
            ResolveType::DynamicImport
        ));
    }

    #[test]
    fn test_unused_external_names() {
        let mut external = ExternalModule::new(ModuleId::new("lodash"), true, false);
        external
            .imported_names
            .insert("map".to_string(), vec![ModuleId::new("/a.js")]);
        external
            .imported_names
            .insert("chunk".to_string(), vec![ModuleId::new("/a.js")]);
        external.referenced_names.insert("map".to_string());
        assert_eq!(external.unused_imported_names(), vec!["chunk"]);
    }
}
