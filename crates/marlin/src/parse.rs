//! Default parser for the ES-module grammar subset the engine
//! analyses. The graph core only consumes it through the parser hook,
//! so embedders can substitute a full-fidelity parser.

use thiserror::Error;

use crate::ast::*;
use crate::config::ParseOptions;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// 1-based line and 0-based column for a byte offset.
pub fn line_col(source: &str, offset: u32) -> (usize, usize) {
    let offset = (offset as usize).min(source.len());
    let mut line = 1;
    let mut col = 0;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Ident,
    Num,
    Str,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    FatArrow,
    Assign,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    Question,
    AndAnd,
    OrOr,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokKind,
    text: String,
    num: f64,
    span: Span,
    /// A `/*#__PURE__*/` annotation immediately precedes this token.
    pure: bool,
}

struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    pos: usize,
}

impl<'src> Lexer<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = vec![];
        loop {
            let pure = self.skip_trivia();
            let token = self.next_token(pure)?;
            let done = token.kind == TokKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    /// Skips whitespace and comments; reports whether a pure-call
    /// annotation directly precedes the next token.
    fn skip_trivia(&mut self) -> bool {
        let mut pure = false;
        loop {
            match self.bytes.get(self.pos) {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.bytes.get(self.pos + 1) == Some(&b'*') => {
                    let start = self.pos + 2;
                    let mut end = start;
                    while end + 1 < self.bytes.len()
                        && !(self.bytes[end] == b'*' && self.bytes[end + 1] == b'/')
                    {
                        end += 1;
                    }
                    let body = &self.source[start..end.min(self.source.len())];
                    let trimmed = body.trim();
                    if trimmed == "#__PURE__" || trimmed == "@__PURE__" {
                        pure = true;
                    }
                    self.pos = (end + 2).min(self.bytes.len());
                }
                _ => return pure,
            }
        }
    }

    fn next_token(&mut self, pure: bool) -> Result<Token, ParseError> {
        let start = self.pos as u32;
        let make = |kind, text: &str, num, hi| Token {
            kind,
            text: text.to_string(),
            num,
            span: Span::new(start, hi),
            pure,
        };
        let Some(&b) = self.bytes.get(self.pos) else {
            return Ok(make(TokKind::Eof, "", 0.0, start));
        };
        if b.is_ascii_alphabetic() || b == b'_' || b == b'$' {
            let begin = self.pos;
            while self
                .bytes
                .get(self.pos)
                .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_' || *c == b'$')
            {
                self.pos += 1;
            }
            let text = &self.source[begin..self.pos];
            return Ok(make(TokKind::Ident, text, 0.0, self.pos as u32));
        }
        if b.is_ascii_digit() {
            let begin = self.pos;
            while self
                .bytes
                .get(self.pos)
                .is_some_and(|c| c.is_ascii_digit() || *c == b'.' || *c == b'e' || *c == b'E')
            {
                self.pos += 1;
            }
            let text = &self.source[begin..self.pos];
            let num = text.parse::<f64>().map_err(|_| {
                ParseError::new(
                    format!("invalid number literal '{}'", text),
                    Span::new(start, self.pos as u32),
                )
            })?;
            return Ok(make(TokKind::Num, text, num, self.pos as u32));
        }
        if b == b'"' || b == b'\'' {
            let quote = b;
            self.pos += 1;
            let mut value = String::new();
            loop {
                match self.bytes.get(self.pos) {
                    None | Some(b'\n') => {
                        return Err(ParseError::new(
                            "unterminated string literal",
                            Span::new(start, self.pos as u32),
                        ))
                    }
                    Some(&c) if c == quote => {
                        self.pos += 1;
                        break;
                    }
                    Some(b'\\') => {
                        self.pos += 1;
                        let escaped = self.bytes.get(self.pos).copied().ok_or_else(|| {
                            ParseError::new(
                                "unterminated string literal",
                                Span::new(start, self.pos as u32),
                            )
                        })?;
                        value.push(match escaped {
                            b'n' => '\n',
                            b't' => '\t',
                            b'r' => '\r',
                            other => other as char,
                        });
                        self.pos += 1;
                    }
                    Some(&c) => {
                        value.push(c as char);
                        self.pos += 1;
                    }
                }
            }
            return Ok(make(TokKind::Str, &value, 0.0, self.pos as u32));
        }
        let two = |l: &Lexer| {
            l.bytes
                .get(l.pos + 1)
                .map(|&c| [b, c])
                .unwrap_or([b, 0])
        };
        let three = |l: &Lexer| l.bytes.get(l.pos + 2).copied().unwrap_or(0);
        let (kind, len) = match b {
            b'(' => (TokKind::LParen, 1),
            b')' => (TokKind::RParen, 1),
            b'{' => (TokKind::LBrace, 1),
            b'}' => (TokKind::RBrace, 1),
            b'[' => (TokKind::LBracket, 1),
            b']' => (TokKind::RBracket, 1),
            b',' => (TokKind::Comma, 1),
            b';' => (TokKind::Semi, 1),
            b':' => (TokKind::Colon, 1),
            b'.' => (TokKind::Dot, 1),
            b'?' => (TokKind::Question, 1),
            b'+' => (TokKind::Plus, 1),
            b'-' => (TokKind::Minus, 1),
            b'*' => (TokKind::Star, 1),
            b'/' => (TokKind::Slash, 1),
            b'=' => match (two(self), three(self)) {
                ([b'=', b'='], b'=') => (TokKind::EqEqEq, 3),
                ([b'=', b'='], _) => (TokKind::EqEq, 2),
                ([b'=', b'>'], _) => (TokKind::FatArrow, 2),
                _ => (TokKind::Assign, 1),
            },
            b'!' => match (two(self), three(self)) {
                ([b'!', b'='], b'=') => (TokKind::NotEqEq, 3),
                ([b'!', b'='], _) => (TokKind::NotEq, 2),
                _ => (TokKind::Bang, 1),
            },
            b'<' => match two(self) {
                [b'<', b'='] => (TokKind::Le, 2),
                _ => (TokKind::Lt, 1),
            },
            b'>' => match two(self) {
                [b'>', b'='] => (TokKind::Ge, 2),
                _ => (TokKind::Gt, 1),
            },
            b'&' if two(self) == [b'&', b'&'] => (TokKind::AndAnd, 2),
            b'|' if two(self) == [b'|', b'|'] => (TokKind::OrOr, 2),
            other => {
                return Err(ParseError::new(
                    format!("unexpected character '{}'", other as char),
                    Span::new(start, start + 1),
                ))
            }
        };
        self.pos += len;
        Ok(make(kind, &self.source[start as usize..self.pos], 0.0, self.pos as u32))
    }
}

pub fn parse(source: &str, options: &ParseOptions) -> Result<Program, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        options: options.clone(),
        fn_depth: 0,
    };
    parser.parse_program(source.len() as u32)
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    options: ParseOptions,
    fn_depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn peek_ahead(&self, n: usize) -> &Token {
        &self.tokens[(self.cursor + n).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.cursor.min(self.tokens.len() - 1)].clone();
        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }
        token
    }

    fn at(&self, kind: TokKind) -> bool {
        self.peek().kind == kind
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.peek().kind == TokKind::Ident && self.peek().text == kw
    }

    fn eat(&mut self, kind: TokKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokKind, what: &str) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::new(
                format!("expected {}, found '{}'", what, self.peek_text()),
                self.peek().span,
            ))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<Token, ParseError> {
        if self.at_keyword(kw) {
            Ok(self.advance())
        } else {
            Err(ParseError::new(
                format!("expected '{}', found '{}'", kw, self.peek_text()),
                self.peek().span,
            ))
        }
    }

    fn peek_text(&self) -> String {
        let token = self.peek();
        if token.kind == TokKind::Eof {
            "<eof>".to_string()
        } else {
            token.text.clone()
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<Token, ParseError> {
        self.expect(TokKind::Ident, what)
    }

    fn semi(&mut self) {
        // Statement terminators are optional before `}` and eof.
        self.eat(TokKind::Semi);
    }

    fn parse_program(&mut self, len: u32) -> Result<Program, ParseError> {
        let mut body = vec![];
        while !self.at(TokKind::Eof) {
            body.push(self.parse_module_item()?);
        }
        Ok(Program {
            body,
            span: Span::new(0, len),
        })
    }

    fn parse_module_item(&mut self) -> Result<ModuleItem, ParseError> {
        if self.at_keyword("import") && self.peek_ahead(1).kind != TokKind::LParen {
            return self.parse_import().map(ModuleItem::Import);
        }
        if self.at_keyword("export") {
            return self.parse_export();
        }
        Ok(ModuleItem::Stmt(self.parse_stmt()?))
    }

    fn parse_import(&mut self) -> Result<ImportDecl, ParseError> {
        let start = self.expect_keyword("import")?.span.lo;
        let mut specifiers = vec![];
        if self.at(TokKind::Str) {
            let source = self.advance();
            self.semi();
            return Ok(ImportDecl {
                specifiers,
                source: source.text,
                span: Span::new(start, source.span.hi),
            });
        }
        if self.at(TokKind::Ident) && !self.at_keyword("from") {
            let local = self.expect_ident("import binding")?;
            specifiers.push(ImportSpecifier::Default(local.text));
            if self.at(TokKind::Comma) {
                self.advance();
            }
        }
        if self.at(TokKind::Star) {
            self.advance();
            self.expect_keyword("as")?;
            let local = self.expect_ident("namespace binding")?;
            specifiers.push(ImportSpecifier::Namespace(local.text));
        } else if self.at(TokKind::LBrace) {
            self.advance();
            while !self.at(TokKind::RBrace) {
                let imported = self.expect_ident("import name")?;
                let local = if self.at_keyword("as") {
                    self.advance();
                    Some(self.expect_ident("import alias")?.text)
                } else {
                    None
                };
                specifiers.push(match local {
                    Some(local) => ImportSpecifier::Named {
                        local,
                        imported: Some(imported.text),
                    },
                    None => ImportSpecifier::Named {
                        local: imported.text,
                        imported: None,
                    },
                });
                if !self.eat(TokKind::Comma) {
                    break;
                }
            }
            self.expect(TokKind::RBrace, "'}'")?;
        }
        self.expect_keyword("from")?;
        let source = self.expect(TokKind::Str, "module specifier")?;
        self.semi();
        Ok(ImportDecl {
            specifiers,
            source: source.text,
            span: Span::new(start, source.span.hi),
        })
    }

    fn parse_export(&mut self) -> Result<ModuleItem, ParseError> {
        let start = self.expect_keyword("export")?.span.lo;
        if self.at(TokKind::Star) {
            self.advance();
            let alias = if self.at_keyword("as") {
                self.advance();
                Some(self.expect_ident("namespace export alias")?.text)
            } else {
                None
            };
            self.expect_keyword("from")?;
            let source = self.expect(TokKind::Str, "module specifier")?;
            self.semi();
            return Ok(ModuleItem::ExportAll(ExportAllDecl {
                source: source.text,
                alias,
                span: Span::new(start, source.span.hi),
            }));
        }
        if self.at(TokKind::LBrace) {
            self.advance();
            let mut specifiers = vec![];
            while !self.at(TokKind::RBrace) {
                let local = self.expect_ident("export name")?;
                let exported = if self.at_keyword("as") {
                    self.advance();
                    Some(self.expect_ident("export alias")?.text)
                } else {
                    None
                };
                specifiers.push(ExportSpecifier {
                    local: local.text,
                    exported,
                });
                if !self.eat(TokKind::Comma) {
                    break;
                }
            }
            let end = self.expect(TokKind::RBrace, "'}'")?.span.hi;
            let source = if self.at_keyword("from") {
                self.advance();
                Some(self.expect(TokKind::Str, "module specifier")?)
            } else {
                None
            };
            let hi = source.as_ref().map(|s| s.span.hi).unwrap_or(end);
            self.semi();
            return Ok(ModuleItem::ExportNamed(ExportNamedDecl {
                specifiers,
                source: source.map(|s| s.text),
                span: Span::new(start, hi),
            }));
        }
        if self.at_keyword("default") {
            self.advance();
            let (expr, name) = if self.at_keyword("function") || self.at_keyword("async") {
                let func = self.parse_function_expr()?;
                let name = match &func {
                    Expr::Fn(f) => f.name.clone(),
                    _ => None,
                };
                (func, name)
            } else if self.at_keyword("class") {
                let class = self.parse_class_decl()?;
                let name = Some(class.name.clone());
                (Expr::Class(Box::new(class)), name)
            } else {
                let expr = self.parse_assignment()?;
                (expr, None)
            };
            let hi = expr.span().hi;
            self.semi();
            return Ok(ModuleItem::ExportDefault(ExportDefaultDecl {
                expr,
                name,
                span: Span::new(start, hi),
            }));
        }
        let decl = self.parse_decl()?;
        let hi = decl.span().hi;
        Ok(ModuleItem::ExportDecl(ExportDecl {
            decl,
            span: Span::new(start, hi),
        }))
    }

    fn at_decl(&self) -> bool {
        self.at_keyword("const")
            || self.at_keyword("let")
            || self.at_keyword("var")
            || self.at_keyword("function")
            || self.at_keyword("class")
            || (self.at_keyword("async") && self.peek_ahead(1).text == "function")
    }

    fn parse_decl(&mut self) -> Result<Decl, ParseError> {
        if self.at_keyword("function") || self.at_keyword("async") {
            return self.parse_fn_decl().map(Decl::Fn);
        }
        if self.at_keyword("class") {
            return self.parse_class_decl().map(Decl::Class);
        }
        self.parse_var_decl().map(Decl::Var)
    }

    fn parse_var_decl(&mut self) -> Result<VarDecl, ParseError> {
        let keyword = self.expect_ident("declaration keyword")?;
        let kind = match keyword.text.as_str() {
            "const" => VarDeclKind::Const,
            "let" => VarDeclKind::Let,
            "var" => VarDeclKind::Var,
            other => {
                return Err(ParseError::new(
                    format!("expected declaration, found '{}'", other),
                    keyword.span,
                ))
            }
        };
        let mut decls = vec![];
        loop {
            let name = self.expect_ident("binding name")?;
            let init = if self.eat(TokKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            let hi = init.as_ref().map(|i| i.span().hi).unwrap_or(name.span.hi);
            decls.push(VarDeclarator {
                name: name.text,
                init,
                span: Span::new(name.span.lo, hi),
            });
            if !self.eat(TokKind::Comma) {
                break;
            }
        }
        let hi = decls.last().map(|d| d.span.hi).unwrap_or(keyword.span.hi);
        self.semi();
        Ok(VarDecl {
            kind,
            decls,
            span: Span::new(keyword.span.lo, hi),
        })
    }

    fn parse_fn_decl(&mut self) -> Result<FnDecl, ParseError> {
        let start = self.peek().span.lo;
        let is_async = if self.at_keyword("async") {
            self.advance();
            true
        } else {
            false
        };
        self.expect_keyword("function")?;
        let name = self.expect_ident("function name")?;
        let params = self.parse_params()?;
        let body = self.parse_fn_body()?;
        let hi = self.tokens[self.cursor.saturating_sub(1)].span.hi;
        Ok(FnDecl {
            name: name.text,
            params,
            body,
            is_async,
            span: Span::new(start, hi),
        })
    }

    fn parse_class_decl(&mut self) -> Result<ClassDecl, ParseError> {
        let start = self.expect_keyword("class")?.span.lo;
        let name = self.expect_ident("class name")?;
        let super_class = if self.at_keyword("extends") {
            self.advance();
            Some(Box::new(self.parse_unary()?))
        } else {
            None
        };
        self.expect(TokKind::LBrace, "'{'")?;
        let mut methods = vec![];
        while !self.at(TokKind::RBrace) {
            if self.eat(TokKind::Semi) {
                continue;
            }
            let is_static = if self.at_keyword("static") && self.peek_ahead(1).kind == TokKind::Ident
            {
                self.advance();
                true
            } else {
                false
            };
            let method_name = self.expect_ident("method name")?;
            let params = self.parse_params()?;
            let body = self.parse_fn_body()?;
            methods.push(MethodDef {
                name: method_name.text,
                params,
                body,
                is_static,
            });
        }
        let hi = self.expect(TokKind::RBrace, "'}'")?.span.hi;
        Ok(ClassDecl {
            name: name.text,
            super_class,
            methods,
            span: Span::new(start, hi),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokKind::LParen, "'('")?;
        let mut params = vec![];
        while !self.at(TokKind::RParen) {
            let name = self.expect_ident("parameter name")?;
            // Default values are parsed and dropped from the name list.
            if self.eat(TokKind::Assign) {
                self.parse_assignment()?;
            }
            params.push(name.text);
            if !self.eat(TokKind::Comma) {
                break;
            }
        }
        self.expect(TokKind::RParen, "')'")?;
        Ok(params)
    }

    fn parse_fn_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.fn_depth += 1;
        let body = self.parse_block_body();
        self.fn_depth -= 1;
        body
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokKind::LBrace, "'{'")?;
        let mut body = vec![];
        while !self.at(TokKind::RBrace) {
            body.push(self.parse_stmt()?);
        }
        self.expect(TokKind::RBrace, "'}'")?;
        Ok(body)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.at(TokKind::Semi) {
            let span = self.advance().span;
            return Ok(Stmt::Empty(span));
        }
        if self.at_decl() {
            return self.parse_decl().map(Stmt::Decl);
        }
        if self.at_keyword("return") {
            let token = self.advance();
            if self.fn_depth == 0 && !self.options.allow_return_outside_function {
                return Err(ParseError::new("'return' outside of function", token.span));
            }
            let arg = if self.at(TokKind::Semi) || self.at(TokKind::RBrace) || self.at(TokKind::Eof)
            {
                None
            } else {
                Some(self.parse_expr()?)
            };
            let hi = arg.as_ref().map(|a| a.span().hi).unwrap_or(token.span.hi);
            self.semi();
            return Ok(Stmt::Return(arg, Span::new(token.span.lo, hi)));
        }
        if self.at_keyword("if") {
            return self.parse_if();
        }
        if self.at_keyword("throw") {
            let token = self.advance();
            let arg = self.parse_expr()?;
            let hi = arg.span().hi;
            self.semi();
            return Ok(Stmt::Throw(arg, Span::new(token.span.lo, hi)));
        }
        if self.at_keyword("try") {
            return self.parse_try();
        }
        if self.at(TokKind::LBrace) {
            let start = self.peek().span.lo;
            let body = self.parse_block_body()?;
            let hi = self.tokens[self.cursor.saturating_sub(1)].span.hi;
            return Ok(Stmt::Block(body, Span::new(start, hi)));
        }
        let expr = self.parse_expr()?;
        let span = expr.span();
        self.semi();
        Ok(Stmt::Expr(expr, span))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect_keyword("if")?.span.lo;
        self.expect(TokKind::LParen, "'('")?;
        let test = self.parse_expr()?;
        self.expect(TokKind::RParen, "')'")?;
        let cons = Box::new(self.parse_stmt()?);
        let alt = if self.at_keyword("else") {
            self.advance();
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };
        let hi = alt
            .as_ref()
            .map(|a| a.span().hi)
            .unwrap_or_else(|| cons.span().hi);
        Ok(Stmt::If(IfStmt {
            test,
            cons,
            alt,
            span: Span::new(start, hi),
        }))
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect_keyword("try")?.span.lo;
        let block = self.parse_block_body()?;
        let handler = if self.at_keyword("catch") {
            self.advance();
            let param = if self.eat(TokKind::LParen) {
                let name = self.expect_ident("catch binding")?;
                self.expect(TokKind::RParen, "')'")?;
                Some(name.text)
            } else {
                None
            };
            Some((param, self.parse_block_body()?))
        } else {
            None
        };
        let finalizer = if self.at_keyword("finally") {
            self.advance();
            Some(self.parse_block_body()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(ParseError::new(
                "missing catch or finally clause",
                Span::new(start, start + 3),
            ));
        }
        let hi = self.tokens[self.cursor.saturating_sub(1)].span.hi;
        Ok(Stmt::Try(TryStmt {
            block,
            handler,
            finalizer,
            span: Span::new(start, hi),
        }))
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_conditional()?;
        if self.at(TokKind::Assign) {
            match &left {
                Expr::Ident(..) | Expr::Member(..) => {}
                other => {
                    return Err(ParseError::new(
                        "invalid assignment target",
                        other.span(),
                    ))
                }
            }
            self.advance();
            let value = self.parse_assignment()?;
            let span = Span::new(left.span().lo, value.span().hi);
            return Ok(Expr::Assign(AssignExpr {
                target: Box::new(left),
                value: Box::new(value),
                span,
            }));
        }
        Ok(left)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_binary(0)?;
        if self.eat(TokKind::Question) {
            let cons = self.parse_assignment()?;
            self.expect(TokKind::Colon, "':'")?;
            let alt = self.parse_assignment()?;
            let span = Span::new(test.span().lo, alt.span().hi);
            return Ok(Expr::Cond(CondExpr {
                test: Box::new(test),
                cons: Box::new(cons),
                alt: Box::new(alt),
                span,
            }));
        }
        Ok(test)
    }

    fn binop_at(&self) -> Option<(BinOp, u8)> {
        let op = match self.peek().kind {
            TokKind::OrOr => (BinOp::Or, 1),
            TokKind::AndAnd => (BinOp::And, 2),
            TokKind::EqEq => (BinOp::Eq, 3),
            TokKind::EqEqEq => (BinOp::StrictEq, 3),
            TokKind::NotEq => (BinOp::NotEq, 3),
            TokKind::NotEqEq => (BinOp::StrictNotEq, 3),
            TokKind::Lt => (BinOp::Lt, 4),
            TokKind::Gt => (BinOp::Gt, 4),
            TokKind::Le => (BinOp::Le, 4),
            TokKind::Ge => (BinOp::Ge, 4),
            TokKind::Plus => (BinOp::Add, 5),
            TokKind::Minus => (BinOp::Sub, 5),
            TokKind::Star => (BinOp::Mul, 6),
            TokKind::Slash => (BinOp::Div, 6),
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while let Some((op, prec)) = self.binop_at() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_binary(prec + 1)?;
            let span = Span::new(left.span().lo, right.span().hi);
            left = Expr::Bin(BinExpr {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let op = match token.kind {
            TokKind::Bang => Some(UnaryOp::Not),
            TokKind::Minus => Some(UnaryOp::Minus),
            TokKind::Plus => Some(UnaryOp::Plus),
            TokKind::Ident if token.text == "typeof" => Some(UnaryOp::TypeOf),
            TokKind::Ident if token.text == "void" => Some(UnaryOp::Void),
            TokKind::Ident if token.text == "delete" => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let arg = self.parse_unary()?;
            let span = Span::new(token.span.lo, arg.span().hi);
            return Ok(Expr::Unary(op, Box::new(arg), span));
        }
        self.parse_call_chain()
    }

    fn parse_call_chain(&mut self) -> Result<Expr, ParseError> {
        let pure = self.peek().pure;
        let start = self.peek().span.lo;
        let mut expr = if self.at_keyword("new") {
            self.advance();
            let callee = self.parse_member_only()?;
            let args = if self.at(TokKind::LParen) {
                self.parse_args()?
            } else {
                vec![]
            };
            let hi = self.tokens[self.cursor.saturating_sub(1)].span.hi;
            Expr::New(CallExpr {
                callee: Box::new(callee),
                args,
                pure,
                span: Span::new(start, hi),
            })
        } else {
            self.parse_primary()?
        };
        let mut first_call = true;
        loop {
            if self.at(TokKind::Dot) {
                self.advance();
                let prop = self.expect_ident("property name")?;
                let span = Span::new(expr.span().lo, prop.span.hi);
                expr = Expr::Member(MemberExpr {
                    obj: Box::new(expr),
                    prop: prop.text,
                    computed: None,
                    span,
                });
            } else if self.at(TokKind::LBracket) {
                self.advance();
                let index = self.parse_expr()?;
                let hi = self.expect(TokKind::RBracket, "']'")?.span.hi;
                let span = Span::new(expr.span().lo, hi);
                expr = Expr::Member(MemberExpr {
                    obj: Box::new(expr),
                    prop: String::new(),
                    computed: Some(Box::new(index)),
                    span,
                });
            } else if self.at(TokKind::LParen) {
                let args = self.parse_args()?;
                let hi = self.tokens[self.cursor.saturating_sub(1)].span.hi;
                let span = Span::new(expr.span().lo, hi);
                expr = Expr::Call(CallExpr {
                    callee: Box::new(expr),
                    args,
                    pure: pure && first_call,
                    span,
                });
                first_call = false;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Member chain without call arguments, for `new` callees.
    fn parse_member_only(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.at(TokKind::Dot) {
            self.advance();
            let prop = self.expect_ident("property name")?;
            let span = Span::new(expr.span().lo, prop.span.hi);
            expr = Expr::Member(MemberExpr {
                obj: Box::new(expr),
                prop: prop.text,
                computed: None,
                span,
            });
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(TokKind::LParen, "'('")?;
        let mut args = vec![];
        while !self.at(TokKind::RParen) {
            args.push(self.parse_assignment()?);
            if !self.eat(TokKind::Comma) {
                break;
            }
        }
        self.expect(TokKind::RParen, "')'")?;
        Ok(args)
    }

    fn parse_function_expr(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span.lo;
        let is_async = if self.at_keyword("async") {
            self.advance();
            true
        } else {
            false
        };
        self.expect_keyword("function")?;
        let name = if self.at(TokKind::Ident) {
            Some(self.advance().text)
        } else {
            None
        };
        let params = self.parse_params()?;
        let body = self.parse_fn_body()?;
        let hi = self.tokens[self.cursor.saturating_sub(1)].span.hi;
        Ok(Expr::Fn(FnExpr {
            name,
            params,
            body,
            is_async,
            span: Span::new(start, hi),
        }))
    }

    /// Attempts `( params ) =>`; rewinds and returns None when the
    /// parenthesis opens an ordinary grouped expression.
    fn try_parse_arrow(&mut self, is_async: bool, start: u32) -> Result<Option<Expr>, ParseError> {
        let checkpoint = self.cursor;
        if !self.eat(TokKind::LParen) {
            return Ok(None);
        }
        let mut params = vec![];
        let mut ok = true;
        while !self.at(TokKind::RParen) {
            if !self.at(TokKind::Ident) {
                ok = false;
                break;
            }
            params.push(self.advance().text);
            if !self.eat(TokKind::Comma) {
                break;
            }
        }
        if ok && self.eat(TokKind::RParen) && self.at(TokKind::FatArrow) {
            self.advance();
            let body = self.parse_arrow_body()?;
            let hi = self.tokens[self.cursor.saturating_sub(1)].span.hi;
            return Ok(Some(Expr::Arrow(ArrowExpr {
                params,
                body,
                is_async,
                span: Span::new(start, hi),
            })));
        }
        self.cursor = checkpoint;
        Ok(None)
    }

    fn parse_arrow_body(&mut self) -> Result<ArrowBody, ParseError> {
        if self.at(TokKind::LBrace) {
            Ok(ArrowBody::Block(self.parse_fn_body()?))
        } else {
            Ok(ArrowBody::Expr(Box::new(self.parse_assignment()?)))
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokKind::Num => {
                self.advance();
                Ok(Expr::Lit(Lit::Num(token.num), token.span))
            }
            TokKind::Str => {
                self.advance();
                Ok(Expr::Lit(Lit::Str(token.text), token.span))
            }
            TokKind::LParen => {
                if let Some(arrow) = self.try_parse_arrow(false, token.span.lo)? {
                    return Ok(arrow);
                }
                self.advance();
                let inner = self.parse_expr()?;
                let hi = self.expect(TokKind::RParen, "')'")?.span.hi;
                Ok(Expr::Paren(Box::new(inner), Span::new(token.span.lo, hi)))
            }
            TokKind::LBracket => {
                self.advance();
                let mut items = vec![];
                while !self.at(TokKind::RBracket) {
                    items.push(self.parse_assignment()?);
                    if !self.eat(TokKind::Comma) {
                        break;
                    }
                }
                let hi = self.expect(TokKind::RBracket, "']'")?.span.hi;
                Ok(Expr::Array(items, Span::new(token.span.lo, hi)))
            }
            TokKind::LBrace => {
                self.advance();
                let mut props = vec![];
                while !self.at(TokKind::RBrace) {
                    let key = if self.at(TokKind::Str) || self.at(TokKind::Num) {
                        self.advance().text
                    } else {
                        self.expect_ident("property key")?.text
                    };
                    if self.eat(TokKind::Colon) {
                        let value = self.parse_assignment()?;
                        props.push(Prop {
                            key,
                            value,
                            shorthand: false,
                        });
                    } else {
                        let span = self.tokens[self.cursor.saturating_sub(1)].span;
                        props.push(Prop {
                            key: key.clone(),
                            value: Expr::Ident(key, span),
                            shorthand: true,
                        });
                    }
                    if !self.eat(TokKind::Comma) {
                        break;
                    }
                }
                let hi = self.expect(TokKind::RBrace, "'}'")?.span.hi;
                Ok(Expr::Object(props, Span::new(token.span.lo, hi)))
            }
            TokKind::Ident => match token.text.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Lit(Lit::Bool(true), token.span))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Lit(Lit::Bool(false), token.span))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Lit(Lit::Null, token.span))
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Lit(Lit::Undefined, token.span))
                }
                "function" => self.parse_function_expr(),
                "async" => {
                    if self.peek_ahead(1).text == "function" {
                        return self.parse_function_expr();
                    }
                    if self.peek_ahead(1).kind == TokKind::LParen {
                        let start = self.advance().span.lo;
                        if let Some(arrow) = self.try_parse_arrow(true, start)? {
                            return Ok(arrow);
                        }
                        return Err(ParseError::new("expected async arrow", token.span));
                    }
                    if self.peek_ahead(1).kind == TokKind::Ident
                        && self.peek_ahead(2).kind == TokKind::FatArrow
                    {
                        let start = self.advance().span.lo;
                        let param = self.advance().text;
                        self.advance();
                        let body = self.parse_arrow_body()?;
                        let hi = self.tokens[self.cursor.saturating_sub(1)].span.hi;
                        return Ok(Expr::Arrow(ArrowExpr {
                            params: vec![param],
                            body,
                            is_async: true,
                            span: Span::new(start, hi),
                        }));
                    }
                    self.advance();
                    Ok(Expr::Ident(token.text, token.span))
                }
                "import" => {
                    self.advance();
                    self.expect(TokKind::LParen, "'('")?;
                    let arg = self.parse_assignment()?;
                    let hi = self.expect(TokKind::RParen, "')'")?.span.hi;
                    Ok(Expr::DynamicImport(
                        Box::new(arg),
                        Span::new(token.span.lo, hi),
                    ))
                }
                _ => {
                    if self.peek_ahead(1).kind == TokKind::FatArrow {
                        let param = self.advance().text;
                        self.advance();
                        let body = self.parse_arrow_body()?;
                        let hi = self.tokens[self.cursor.saturating_sub(1)].span.hi;
                        return Ok(Expr::Arrow(ArrowExpr {
                            params: vec![param],
                            body,
                            is_async: false,
                            span: Span::new(token.span.lo, hi),
                        }));
                    }
                    self.advance();
                    Ok(Expr::Ident(token.text, token.span))
                }
            },
            _ => Err(ParseError::new(
                format!("unexpected token '{}'", self.peek_text()),
                token.span,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse(source, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_parse_imports() {
        let program = parse_ok(
            "import './effects';\nimport d from './a';\nimport d2, { x, y as z } from './b';\nimport * as ns from './c';",
        );
        assert_eq!(program.body.len(), 4);
        let ModuleItem::Import(bare) = &program.body[0] else {
            panic!("expected import")
        };
        assert!(bare.specifiers.is_empty());
        assert_eq!(bare.source, "./effects");
        let ModuleItem::Import(named) = &program.body[2] else {
            panic!("expected import")
        };
        assert_eq!(named.specifiers.len(), 3);
        assert_eq!(named.specifiers[2].local(), "z");
        assert_eq!(named.specifiers[2].imported_name(), "y");
        let ModuleItem::Import(ns) = &program.body[3] else {
            panic!("expected import")
        };
        assert_eq!(ns.specifiers[0].imported_name(), "*");
    }

    #[test]
    fn test_parse_exports() {
        let program = parse_ok(
            "export const x = 1, y = 2;\nexport { a, b as c };\nexport { d } from './d';\nexport * from './e';\nexport * as all from './f';\nexport default function main() {}",
        );
        assert_eq!(program.body.len(), 6);
        let ModuleItem::ExportDecl(decl) = &program.body[0] else {
            panic!("expected export decl")
        };
        assert_eq!(decl.decl.names(), vec!["x", "y"]);
        let ModuleItem::ExportNamed(reexport) = &program.body[2] else {
            panic!("expected named export")
        };
        assert_eq!(reexport.source.as_deref(), Some("./d"));
        let ModuleItem::ExportAll(star) = &program.body[4] else {
            panic!("expected export all")
        };
        assert_eq!(star.alias.as_deref(), Some("all"));
        let ModuleItem::ExportDefault(default) = &program.body[5] else {
            panic!("expected default export")
        };
        assert_eq!(default.name.as_deref(), Some("main"));
    }

    #[test]
    fn test_parse_expressions() {
        let program = parse_ok("const x = (1 + 2) * f(a.b, () => 3, async (u, v) => { return u; });");
        let ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) = &program.body[0] else {
            panic!("expected var decl")
        };
        assert!(var.decls[0].init.is_some());
    }

    #[test]
    fn test_pure_annotation() {
        let program = parse_ok("const x = /*#__PURE__*/ create();");
        let ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) = &program.body[0] else {
            panic!("expected var decl")
        };
        let Some(Expr::Call(call)) = &var.decls[0].init else {
            panic!("expected call")
        };
        assert!(call.pure);

        let program = parse_ok("const x = create();");
        let ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) = &program.body[0] else {
            panic!("expected var decl")
        };
        let Some(Expr::Call(call)) = &var.decls[0].init else {
            panic!("expected call")
        };
        assert!(!call.pure);
    }

    #[test]
    fn test_dynamic_import() {
        let program = parse_ok("const p = import('./lazy');");
        let ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) = &program.body[0] else {
            panic!("expected var decl")
        };
        assert!(matches!(
            var.decls[0].init,
            Some(Expr::DynamicImport(..))
        ));
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = parse("const = 1;", &ParseOptions::default()).unwrap_err();
        let (line, col) = line_col("const = 1;", err.span.lo);
        assert_eq!((line, col), (1, 6));
    }

    #[test]
    fn test_statements() {
        let program = parse_ok(
            "if (DEBUG) { log('x'); } else log('y');\ntry { risky(); } catch (e) { handle(e); } finally { done(); }\nthrow new Error('boom');",
        );
        assert_eq!(program.body.len(), 3);
        assert!(matches!(program.body[0], ModuleItem::Stmt(Stmt::If(_))));
        assert!(matches!(program.body[1], ModuleItem::Stmt(Stmt::Try(_))));
        assert!(matches!(program.body[2], ModuleItem::Stmt(Stmt::Throw(..))));
    }

    #[test]
    fn test_class_and_new() {
        let program = parse_ok(
            "class Point extends Base { constructor(x) { this; } static origin() { return new Point(0); } }\nconst p = new Point(1);",
        );
        let ModuleItem::Stmt(Stmt::Decl(Decl::Class(class))) = &program.body[0] else {
            panic!("expected class decl")
        };
        assert_eq!(class.name, "Point");
        assert_eq!(class.methods.len(), 2);
        assert!(class.methods[1].is_static);
    }
}
