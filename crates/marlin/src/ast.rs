use std::collections::HashSet;

use serde::Serialize;

use crate::config::Treeshake;

/// Byte range into the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub lo: u32,
    pub hi: u32,
}

impl Span {
    pub fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<ModuleItem>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleItem {
    Import(ImportDecl),
    ExportNamed(ExportNamedDecl),
    ExportDecl(ExportDecl),
    ExportDefault(ExportDefaultDecl),
    ExportAll(ExportAllDecl),
    Stmt(Stmt),
}

impl ModuleItem {
    pub fn span(&self) -> Span {
        match self {
            ModuleItem::Import(i) => i.span,
            ModuleItem::ExportNamed(e) => e.span,
            ModuleItem::ExportDecl(e) => e.span,
            ModuleItem::ExportDefault(e) => e.span,
            ModuleItem::ExportAll(e) => e.span,
            ModuleItem::Stmt(s) => s.span(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub specifiers: Vec<ImportSpecifier>,
    pub source: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportSpecifier {
    /// `import { a as b } from "s"`; `imported` is absent when no alias.
    Named {
        local: String,
        imported: Option<String>,
    },
    Default(String),
    Namespace(String),
}

impl ImportSpecifier {
    pub fn local(&self) -> &str {
        match self {
            ImportSpecifier::Named { local, .. } => local,
            ImportSpecifier::Default(local) => local,
            ImportSpecifier::Namespace(local) => local,
        }
    }

    /// The name looked up in the producing module: `*` for namespace,
    /// `default` for default imports.
    pub fn imported_name(&self) -> &str {
        match self {
            ImportSpecifier::Named { local, imported } => imported.as_deref().unwrap_or(local),
            ImportSpecifier::Default(_) => "default",
            ImportSpecifier::Namespace(_) => "*",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportNamedDecl {
    pub specifiers: Vec<ExportSpecifier>,
    pub source: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSpecifier {
    pub local: String,
    pub exported: Option<String>,
}

impl ExportSpecifier {
    pub fn exported_name(&self) -> &str {
        self.exported.as_deref().unwrap_or(&self.local)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportDecl {
    pub decl: Decl,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportDefaultDecl {
    pub expr: Expr,
    /// Present for `export default function f() {}` forms.
    pub name: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportAllDecl {
    pub source: String,
    /// `export * as ns from "s"`.
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Var(VarDecl),
    Fn(FnDecl),
    Class(ClassDecl),
}

impl Decl {
    pub fn names(&self) -> Vec<String> {
        match self {
            Decl::Var(v) => v.decls.iter().map(|d| d.name.clone()).collect(),
            Decl::Fn(f) => vec![f.name.clone()],
            Decl::Class(c) => vec![c.name.clone()],
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Var(v) => v.span,
            Decl::Fn(f) => f.span,
            Decl::Class(c) => c.span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarDeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub kind: VarDeclKind,
    pub decls: Vec<VarDeclarator>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDeclarator {
    pub name: String,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub super_class: Option<Box<Expr>>,
    pub methods: Vec<MethodDef>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr, Span),
    Decl(Decl),
    Return(Option<Expr>, Span),
    If(IfStmt),
    Block(Vec<Stmt>, Span),
    Try(TryStmt),
    Throw(Expr, Span),
    Empty(Span),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr(_, span) => *span,
            Stmt::Decl(decl) => decl.span(),
            Stmt::Return(_, span) => *span,
            Stmt::If(i) => i.span,
            Stmt::Block(_, span) => *span,
            Stmt::Try(t) => t.span,
            Stmt::Throw(_, span) => *span,
            Stmt::Empty(span) => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub test: Expr,
    pub cons: Box<Stmt>,
    pub alt: Option<Box<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryStmt {
    pub block: Vec<Stmt>,
    /// `(param, body)`.
    pub handler: Option<(Option<String>, Vec<Stmt>)>,
    pub finalizer: Option<Vec<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
    TypeOf,
    Void,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String, Span),
    Lit(Lit, Span),
    Call(CallExpr),
    New(CallExpr),
    Member(MemberExpr),
    Bin(BinExpr),
    Unary(UnaryOp, Box<Expr>, Span),
    Assign(AssignExpr),
    Cond(CondExpr),
    Arrow(ArrowExpr),
    Fn(FnExpr),
    Object(Vec<Prop>, Span),
    Array(Vec<Expr>, Span),
    Paren(Box<Expr>, Span),
    Class(Box<ClassDecl>),
    /// `import("specifier-expression")`.
    DynamicImport(Box<Expr>, Span),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    /// Set from a leading `/*#__PURE__*/` annotation.
    pub pure: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberExpr {
    pub obj: Box<Expr>,
    /// Static property name, or empty when computed.
    pub prop: String,
    pub computed: Option<Box<Expr>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinExpr {
    pub op: BinOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignExpr {
    pub target: Box<Expr>,
    pub value: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CondExpr {
    pub test: Box<Expr>,
    pub cons: Box<Expr>,
    pub alt: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrowExpr {
    pub params: Vec<String>,
    pub body: ArrowBody,
    pub is_async: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrowBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnExpr {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prop {
    pub key: String,
    pub value: Expr,
    pub shorthand: bool,
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Ident(_, span)
            | Expr::Lit(_, span)
            | Expr::Unary(_, _, span)
            | Expr::Object(_, span)
            | Expr::Array(_, span)
            | Expr::Paren(_, span)
            | Expr::DynamicImport(_, span) => *span,
            Expr::Call(c) | Expr::New(c) => c.span,
            Expr::Member(m) => m.span,
            Expr::Bin(b) => b.span,
            Expr::Assign(a) => a.span,
            Expr::Cond(c) => c.span,
            Expr::Arrow(a) => a.span,
            Expr::Fn(f) => f.span,
            Expr::Class(c) => c.span,
        }
    }

    /// `a.b.c` as `["a", "b", "c"]`; anything else is `None`.
    pub fn member_path(&self) -> Option<Vec<String>> {
        match self {
            Expr::Ident(name, _) => Some(vec![name.clone()]),
            Expr::Member(m) if m.computed.is_none() => {
                let mut path = m.obj.member_path()?;
                path.push(m.prop.clone());
                Some(path)
            }
            Expr::Paren(inner, _) => inner.member_path(),
            _ => None,
        }
    }
}

/// Constant-folded value of an expression, used by branch pruning.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Known(Lit),
    Unknown,
}

impl LiteralValue {
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            LiteralValue::Known(Lit::Bool(b)) => Some(*b),
            LiteralValue::Known(Lit::Num(n)) => Some(*n != 0.0 && !n.is_nan()),
            LiteralValue::Known(Lit::Str(s)) => Some(!s.is_empty()),
            LiteralValue::Known(Lit::Null) | LiteralValue::Known(Lit::Undefined) => Some(false),
            LiteralValue::Unknown => None,
        }
    }
}

impl Expr {
    pub fn literal_value(&self) -> LiteralValue {
        self.literal_value_at_path(&[])
    }

    /// Fold the expression to a literal, optionally reading `path`
    /// through object literals (`{a: {b: 1}}` at `["a", "b"]` is `1`).
    pub fn literal_value_at_path(&self, path: &[&str]) -> LiteralValue {
        match self {
            Expr::Lit(lit, _) if path.is_empty() => LiteralValue::Known(lit.clone()),
            Expr::Paren(inner, _) => inner.literal_value_at_path(path),
            Expr::Object(props, _) => match path.split_first() {
                Some((head, rest)) => props
                    .iter()
                    .find(|p| p.key == *head)
                    .map(|p| p.value.literal_value_at_path(rest))
                    .unwrap_or(LiteralValue::Unknown),
                None => LiteralValue::Unknown,
            },
            Expr::Member(m) if m.computed.is_none() => {
                let mut nested = vec![m.prop.as_str()];
                nested.extend_from_slice(path);
                m.obj.literal_value_at_path(&nested)
            }
            Expr::Unary(op, arg, _) if path.is_empty() => match (op, arg.literal_value()) {
                (UnaryOp::Not, value) => match value.truthiness() {
                    Some(b) => LiteralValue::Known(Lit::Bool(!b)),
                    None => LiteralValue::Unknown,
                },
                (UnaryOp::Minus, LiteralValue::Known(Lit::Num(n))) => {
                    LiteralValue::Known(Lit::Num(-n))
                }
                (UnaryOp::Void, LiteralValue::Known(_)) => LiteralValue::Known(Lit::Undefined),
                _ => LiteralValue::Unknown,
            },
            Expr::Bin(b) if path.is_empty() => b.fold(),
            Expr::Cond(c) if path.is_empty() => match c.test.literal_value().truthiness() {
                Some(true) => c.cons.literal_value(),
                Some(false) => c.alt.literal_value(),
                None => LiteralValue::Unknown,
            },
            _ => LiteralValue::Unknown,
        }
    }
}

impl BinExpr {
    fn fold(&self) -> LiteralValue {
        use Lit::*;
        let (left, right) = (self.left.literal_value(), self.right.literal_value());
        let (left, right) = match (left, right) {
            (LiteralValue::Known(l), LiteralValue::Known(r)) => (l, r),
            _ => return LiteralValue::Unknown,
        };
        let value = match (self.op, &left, &right) {
            (BinOp::Add, Num(a), Num(b)) => Num(a + b),
            (BinOp::Add, Str(a), Str(b)) => Str(format!("{}{}", a, b)),
            (BinOp::Sub, Num(a), Num(b)) => Num(a - b),
            (BinOp::Mul, Num(a), Num(b)) => Num(a * b),
            (BinOp::Div, Num(a), Num(b)) => Num(a / b),
            (BinOp::StrictEq, a, b) | (BinOp::Eq, a, b) => Bool(a == b),
            (BinOp::StrictNotEq, a, b) | (BinOp::NotEq, a, b) => Bool(a != b),
            (BinOp::Lt, Num(a), Num(b)) => Bool(a < b),
            (BinOp::Gt, Num(a), Num(b)) => Bool(a > b),
            (BinOp::Le, Num(a), Num(b)) => Bool(a <= b),
            (BinOp::Ge, Num(a), Num(b)) => Bool(a >= b),
            _ => return LiteralValue::Unknown,
        };
        LiteralValue::Known(value)
    }
}

/// Name environment for the effects walk: module-level bindings
/// (declarations and import locals) plus the build-wide global scope.
pub struct EffectsScope<'a> {
    pub module_locals: &'a HashSet<String>,
    pub known_globals: &'a HashSet<String>,
}

pub struct EffectsContext<'a> {
    pub options: &'a Treeshake,
    pub scope: EffectsScope<'a>,
}

impl EffectsContext<'_> {
    fn is_known(&self, name: &str) -> bool {
        self.scope.module_locals.contains(name) || self.scope.known_globals.contains(name)
    }
}

impl Expr {
    /// Whether evaluating this expression may have observable effects.
    /// Function bodies are opaque until called.
    pub fn has_effects(&self, ctx: &EffectsContext) -> bool {
        match self {
            Expr::Lit(..) | Expr::Arrow(..) | Expr::Fn(..) => false,
            Expr::Class(c) => c.super_class.as_ref().is_some_and(|s| s.has_effects(ctx)),
            Expr::Ident(name, _) => {
                ctx.options.unknown_global_side_effects && !ctx.is_known(name)
            }
            Expr::Call(call) | Expr::New(call) => {
                if call.pure && ctx.options.annotations {
                    call.args.iter().any(|a| a.has_effects(ctx))
                } else {
                    true
                }
            }
            Expr::Member(m) => {
                if m.obj.has_effects(ctx) {
                    return true;
                }
                if let Some(computed) = &m.computed {
                    if computed.has_effects(ctx) {
                        return true;
                    }
                }
                ctx.options.property_read_side_effects && !member_root_is_known(m, ctx)
            }
            Expr::Bin(b) => b.left.has_effects(ctx) || b.right.has_effects(ctx),
            Expr::Unary(op, arg, _) => *op == UnaryOp::Delete || arg.has_effects(ctx),
            Expr::Assign(_) => true,
            Expr::Cond(c) => match c.test.literal_value().truthiness() {
                Some(true) => c.test.has_effects(ctx) || c.cons.has_effects(ctx),
                Some(false) => c.test.has_effects(ctx) || c.alt.has_effects(ctx),
                None => {
                    c.test.has_effects(ctx) || c.cons.has_effects(ctx) || c.alt.has_effects(ctx)
                }
            },
            Expr::Object(props, _) => props.iter().any(|p| p.value.has_effects(ctx)),
            Expr::Array(items, _) => items.iter().any(|i| i.has_effects(ctx)),
            Expr::Paren(inner, _) => inner.has_effects(ctx),
            Expr::DynamicImport(..) => true,
        }
    }
}

fn member_root_is_known(member: &MemberExpr, ctx: &EffectsContext) -> bool {
    match member.obj.as_ref() {
        Expr::Ident(name, _) => ctx.is_known(name),
        Expr::Member(inner) if inner.computed.is_none() => member_root_is_known(inner, ctx),
        Expr::Object(..) | Expr::Array(..) | Expr::Lit(..) => true,
        Expr::Paren(inner, _) => match inner.as_ref() {
            Expr::Member(inner) => member_root_is_known(inner, ctx),
            Expr::Ident(name, _) => ctx.is_known(name),
            _ => false,
        },
        _ => false,
    }
}

impl Stmt {
    pub fn has_effects(&self, ctx: &EffectsContext) -> bool {
        match self {
            Stmt::Expr(expr, _) => expr.has_effects(ctx),
            Stmt::Decl(Decl::Var(var)) => var
                .decls
                .iter()
                .any(|d| d.init.as_ref().is_some_and(|i| i.has_effects(ctx))),
            Stmt::Decl(Decl::Fn(_)) => false,
            Stmt::Decl(Decl::Class(class)) => class
                .super_class
                .as_ref()
                .is_some_and(|s| s.has_effects(ctx)),
            Stmt::Return(..) | Stmt::Throw(..) => true,
            Stmt::If(i) => match i.test.literal_value().truthiness() {
                Some(true) => i.test.has_effects(ctx) || i.cons.has_effects(ctx),
                Some(false) => {
                    i.test.has_effects(ctx)
                        || i.alt.as_ref().is_some_and(|a| a.has_effects(ctx))
                }
                None => {
                    i.test.has_effects(ctx)
                        || i.cons.has_effects(ctx)
                        || i.alt.as_ref().is_some_and(|a| a.has_effects(ctx))
                }
            },
            Stmt::Block(stmts, _) => stmts.iter().any(|s| s.has_effects(ctx)),
            Stmt::Try(t) => {
                // A protected region disables value analysis inside it.
                if ctx.options.try_catch_deoptimization {
                    return true;
                }
                t.block.iter().any(|s| s.has_effects(ctx))
                    || t.handler
                        .as_ref()
                        .is_some_and(|(_, body)| body.iter().any(|s| s.has_effects(ctx)))
                    || t.finalizer
                        .as_ref()
                        .is_some_and(|body| body.iter().any(|s| s.has_effects(ctx)))
            }
            Stmt::Empty(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Expr {
        Expr::Lit(Lit::Num(n), Span::default())
    }

    fn treeshake() -> Treeshake {
        Treeshake::default()
    }

    #[test]
    fn test_literal_folding() {
        let sum = Expr::Bin(BinExpr {
            op: BinOp::Add,
            left: Box::new(num(1.0)),
            right: Box::new(num(2.0)),
            span: Span::default(),
        });
        assert_eq!(sum.literal_value(), LiteralValue::Known(Lit::Num(3.0)));

        let negated = Expr::Unary(UnaryOp::Not, Box::new(num(0.0)), Span::default());
        assert_eq!(
            negated.literal_value(),
            LiteralValue::Known(Lit::Bool(true))
        );
    }

    #[test]
    fn test_literal_value_at_path() {
        let object = Expr::Object(
            vec![Prop {
                key: "a".to_string(),
                value: Expr::Object(
                    vec![Prop {
                        key: "b".to_string(),
                        value: num(7.0),
                        shorthand: false,
                    }],
                    Span::default(),
                ),
                shorthand: false,
            }],
            Span::default(),
        );
        assert_eq!(
            object.literal_value_at_path(&["a", "b"]),
            LiteralValue::Known(Lit::Num(7.0))
        );
        assert_eq!(
            object.literal_value_at_path(&["a", "missing"]),
            LiteralValue::Unknown
        );
    }

    #[test]
    fn test_pure_annotation_suppresses_call_effect() {
        let options = treeshake();
        let locals = HashSet::new();
        let globals = HashSet::new();
        let ctx = EffectsContext {
            options: &options,
            scope: EffectsScope {
                module_locals: &locals,
                known_globals: &globals,
            },
        };
        let call = |pure| {
            Expr::Call(CallExpr {
                callee: Box::new(Expr::Ident("f".to_string(), Span::default())),
                args: vec![num(1.0)],
                pure,
                span: Span::default(),
            })
        };
        assert!(call(false).has_effects(&ctx));
        assert!(!call(true).has_effects(&ctx));
    }

    #[test]
    fn test_unknown_global_read_is_effectful() {
        let options = treeshake();
        let locals: HashSet<String> = ["x".to_string()].into_iter().collect();
        let globals: HashSet<String> = ["console".to_string()].into_iter().collect();
        let ctx = EffectsContext {
            options: &options,
            scope: EffectsScope {
                module_locals: &locals,
                known_globals: &globals,
            },
        };
        assert!(!Expr::Ident("x".to_string(), Span::default()).has_effects(&ctx));
        assert!(!Expr::Ident("console".to_string(), Span::default()).has_effects(&ctx));
        assert!(Expr::Ident("mystery".to_string(), Span::default()).has_effects(&ctx));
    }

    #[test]
    fn test_branch_pruning_via_literal_test() {
        let options = treeshake();
        let locals = HashSet::new();
        let globals = HashSet::new();
        let ctx = EffectsContext {
            options: &options,
            scope: EffectsScope {
                module_locals: &locals,
                known_globals: &globals,
            },
        };
        // if (false) { sideEffect(); } has no effects: the branch is dead.
        let dead = Stmt::If(IfStmt {
            test: Expr::Lit(Lit::Bool(false), Span::default()),
            cons: Box::new(Stmt::Expr(
                Expr::Call(CallExpr {
                    callee: Box::new(Expr::Ident("sideEffect".to_string(), Span::default())),
                    args: vec![],
                    pure: false,
                    span: Span::default(),
                }),
                Span::default(),
            )),
            alt: None,
            span: Span::default(),
        });
        assert!(!dead.has_effects(&ctx));
    }

    #[test]
    fn test_member_path() {
        let member = Expr::Member(MemberExpr {
            obj: Box::new(Expr::Member(MemberExpr {
                obj: Box::new(Expr::Ident("a".to_string(), Span::default())),
                prop: "b".to_string(),
                computed: None,
                span: Span::default(),
            })),
            prop: "c".to_string(),
            computed: None,
            span: Span::default(),
        });
        assert_eq!(
            member.member_path(),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }
}
