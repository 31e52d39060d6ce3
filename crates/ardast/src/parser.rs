//! Recursive-descent parser with Pratt-style expression precedence
//! (spec §4.3).
//!
//! Syntax errors never abort parsing: [`Parser::error_node`] records an
//! [`NodeKind::Error`] in place of the offending construct and the caller
//! skips forward to a statement terminator, a closing brace, or a
//! plausible top-level declaration start (spec §4.3 "Error recovery").

use crate::{
    ast::{Ast, AstBuilder, Literal, NodeId, NodeKind},
    error::{ParseError, ParseErrorKind},
    span::Span,
    token::{IntBase, Keyword, Punct, Token, TokenKind},
};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    builder: AstBuilder,
    pub diagnostics: Vec<ParseError>,
}

type PResult<T> = Result<T, ()>;

impl Parser {
    #[must_use]
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            builder: AstBuilder::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Parses a full translation unit and returns the finished [`Ast`]
    /// (merging in preprocessor side-channel metadata) plus any syntax
    /// diagnostics collected along the way.
    #[must_use]
    pub fn parse_program(mut self, active_libraries: Vec<String>, macros: indexmap::IndexMap<String, String>) -> (Ast, Vec<ParseError>) {
        let start = self.span();
        let mut decls = Vec::new();
        while !self.at_eof() {
            let before = self.pos;
            match self.parse_top_level() {
                Ok(id) => decls.push(id),
                Err(()) => {
                    decls.push(self.error_node(start));
                    self.recover_to_statement_boundary();
                }
            }
            if self.pos == before {
                // Guarantee forward progress even on a token the recovery
                // logic doesn't recognize.
                self.bump();
            }
        }
        let root = self.builder.push(NodeKind::Program, None, decls, start);
        let diagnostics = self.diagnostics;
        (self.builder.finish(root, active_libraries, macros), diagnostics)
    }

    // ---- token helpers ----------------------------------------------

    fn cur(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn at_eof(&self) -> bool {
        matches!(self.cur(), TokenKind::Eof)
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_punct(&self, p: Punct) -> bool {
        matches!(self.cur(), TokenKind::Punct(x) if *x == p)
    }

    fn at_kw(&self, k: Keyword) -> bool {
        matches!(self.cur(), TokenKind::Keyword(x) if *x == k)
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if self.at_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            self.diagnostics.push(ParseError::new(
                ParseErrorKind::Syntax,
                format!("expected '{}', found {:?}", p.as_str(), self.cur()),
                self.span(),
            ));
            Err(())
        }
    }

    fn error_node(&mut self, span: Span) -> NodeId {
        self.builder.push(NodeKind::Error, None, Vec::new(), span)
    }

    /// Skips tokens until a statement terminator, a closing brace, or EOF
    /// (spec §4.3).
    fn recover_to_statement_boundary(&mut self) {
        loop {
            match self.cur() {
                TokenKind::Eof => break,
                TokenKind::Punct(Punct::Semi) => {
                    self.bump();
                    break;
                }
                TokenKind::Punct(Punct::RBrace) => break,
                _ => {
                    self.bump();
                }
            }
        }
    }

    // ---- top level -----------------------------------------------------

    fn parse_top_level(&mut self) -> PResult<NodeId> {
        self.parse_declaration_or_statement(true)
    }

    fn is_type_start(&self) -> bool {
        match self.cur() {
            TokenKind::Keyword(k) => k.is_builtin_type() || matches!(k, Keyword::Const | Keyword::Static | Keyword::Volatile | Keyword::Extern | Keyword::Struct | Keyword::Class | Keyword::Enum),
            TokenKind::Identifier(_) => self.looks_like_type_then_declarator(),
            _ => false,
        }
    }

    /// Heuristic for "`Identifier Identifier (`" / "`Identifier Identifier`"
    /// at declaration position (spec §4.3: parser treats this as a
    /// declarator even when the return/variable type is a user-defined
    /// identifier, e.g. a struct typedef'd name).
    fn looks_like_type_then_declarator(&self) -> bool {
        let mut i = self.pos;
        if !matches!(self.tokens[i].kind, TokenKind::Identifier(_)) {
            return false;
        }
        i += 1;
        while matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Punct(Punct::Star | Punct::Amp))) {
            i += 1;
        }
        matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Identifier(_)))
    }

    fn parse_declaration_or_statement(&mut self, top_level: bool) -> PResult<NodeId> {
        let start = self.span();
        if self.at_kw(Keyword::Struct) || self.at_kw(Keyword::Class) {
            return self.parse_struct_or_class();
        }
        if self.at_kw(Keyword::Enum) {
            return self.parse_enum();
        }
        if self.at_kw(Keyword::Typedef) {
            return self.parse_typedef();
        }
        if self.at_kw(Keyword::Template) {
            return self.parse_template();
        }
        if self.is_type_start() {
            return self.parse_decl_starting_with_type(start);
        }
        if top_level {
            // Not a recognizable top-level declaration; treat as an error
            // construct consumed by the caller's recovery loop.
            self.diagnostics.push(ParseError::new(
                ParseErrorKind::Syntax,
                format!("expected a top-level declaration, found {:?}", self.cur()),
                start,
            ));
            return Err(());
        }
        self.parse_statement()
    }

    // ---- declarations ---------------------------------------------------

    fn parse_decl_starting_with_type(&mut self, start: Span) -> PResult<NodeId> {
        let ty = self.parse_type()?;
        let (decl, is_function_like) = self.parse_declarator()?;
        if is_function_like && self.at_punct(Punct::LParen) {
            return self.parse_func_rest(start, ty, decl);
        }
        self.parse_var_decl_rest(start, ty, decl)
    }

    fn parse_type(&mut self) -> PResult<NodeId> {
        let start = self.span();
        let mut text = String::new();
        loop {
            match self.cur().clone() {
                TokenKind::Keyword(k) if k.is_builtin_type() => {
                    text.push_str(keyword_text(k));
                    text.push(' ');
                    self.bump();
                }
                TokenKind::Keyword(k @ (Keyword::Const | Keyword::Static | Keyword::Volatile | Keyword::Extern | Keyword::UnsignedInt)) => {
                    text.push_str(keyword_text(k));
                    text.push(' ');
                    self.bump();
                }
                TokenKind::Keyword(k @ (Keyword::Struct | Keyword::Class | Keyword::Enum)) => {
                    text.push_str(keyword_text_tag(k));
                    text.push(' ');
                    self.bump();
                    if let TokenKind::Identifier(name) = self.cur().clone() {
                        text.push_str(&name);
                        self.bump();
                    }
                    break;
                }
                TokenKind::Identifier(name) if text.is_empty() => {
                    text.push_str(&name);
                    self.bump();
                    break;
                }
                _ => break,
            }
        }
        let text = text.trim().to_owned();
        // Optional template arguments in type position only (spec §4.3:
        // "`Identifier<Type,...>` is parsed as template instantiation only
        // inside types / new-expressions; elsewhere `<` is relational").
        let mut children = Vec::new();
        if self.at_punct(Punct::Lt) {
            if let Some(args) = self.try_parse_template_args()? {
                children = args;
            }
        }
        while self.eat_punct(Punct::Star) {
            // pointer-to-type, folded into the type text for simplicity.
        }
        Ok(self.builder.push(NodeKind::Type, Some(Literal::Str(text)), children, start))
    }

    fn try_parse_template_args(&mut self) -> PResult<Option<Vec<NodeId>>> {
        let save = self.pos;
        self.bump(); // '<'
        let mut args = Vec::new();
        loop {
            if self.at_punct(Punct::Gt) {
                self.bump();
                return Ok(Some(args));
            }
            match self.parse_type() {
                Ok(t) => args.push(t),
                Err(()) => {
                    self.pos = save;
                    return Ok(None);
                }
            }
            if !self.eat_punct(Punct::Comma) {
                if self.eat_punct(Punct::Gt) {
                    return Ok(Some(args));
                }
                self.pos = save;
                return Ok(None);
            }
        }
    }

    /// Returns `(declarator_node, looks_function_like)`.
    fn parse_declarator(&mut self) -> PResult<(NodeId, bool)> {
        let start = self.span();
        let mut pointer_levels = 0;
        while self.eat_punct(Punct::Star) {
            pointer_levels += 1;
        }

        // Function-pointer declarator: `(*name)(params)`.
        if self.at_punct(Punct::LParen) {
            let save = self.pos;
            self.bump();
            let mut fp_levels = 0;
            while self.eat_punct(Punct::Star) {
                fp_levels += 1;
            }
            if fp_levels > 0 {
                if let TokenKind::Identifier(name) = self.cur().clone() {
                    self.bump();
                    if self.eat_punct(Punct::RParen) && self.at_punct(Punct::LParen) {
                        let id = self.builder.push(NodeKind::Identifier, Some(Literal::Str(name)), Vec::new(), start);
                        let node = self.builder.push(NodeKind::FunctionPointerDeclarator, None, vec![id], start);
                        return Ok((node, false));
                    }
                }
            }
            self.pos = save;
        }

        let name = match self.cur().clone() {
            TokenKind::Identifier(n) => {
                self.bump();
                n
            }
            _ => String::new(),
        };
        let mut decl = self.builder.push(NodeKind::Declarator, Some(Literal::Str(name)), Vec::new(), start);
        for _ in 0..pointer_levels {
            decl = self.builder.push(NodeKind::PointerDeclarator, None, vec![decl], start);
        }
        let mut is_function_like = true;
        while self.at_punct(Punct::LBracket) {
            self.bump();
            let size = if self.at_punct(Punct::RBracket) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect_punct(Punct::RBracket)?;
            let children = size.into_iter().collect();
            decl = self.builder.push(NodeKind::ArrayDeclarator, None, children, start);
            is_function_like = false;
        }
        Ok((decl, is_function_like))
    }

    fn parse_func_rest(&mut self, start: Span, ty: NodeId, decl: NodeId) -> PResult<NodeId> {
        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        if !self.at_punct(Punct::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen)?;

        if self.eat_punct(Punct::Semi) {
            let mut children = vec![ty, decl];
            children.extend(params);
            return Ok(self.builder.push(NodeKind::FuncDecl, None, children, start));
        }

        let body = self.parse_compound_stmt()?;
        let mut children = vec![ty, decl];
        children.extend(params);
        children.push(body);
        Ok(self.builder.push(NodeKind::FuncDef, None, children, start))
    }

    fn parse_param(&mut self) -> PResult<NodeId> {
        let start = self.span();
        if self.at_punct(Punct::Ellipsis) {
            self.bump();
            let decl = self.builder.push(NodeKind::Declarator, Some(Literal::Str("...".to_owned())), Vec::new(), start);
            let ty = self.builder.push(NodeKind::Type, Some(Literal::Str("...".to_owned())), Vec::new(), start);
            return Ok(self.builder.push(NodeKind::Param, None, vec![ty, decl], start));
        }
        let ty = self.parse_type()?;
        let (decl, _) = self.parse_declarator()?;
        let mut children = vec![ty, decl];
        if self.eat_punct(Punct::Assign) {
            children.push(self.parse_assignment_expr()?);
        }
        Ok(self.builder.push(NodeKind::Param, None, children, start))
    }

    fn parse_var_decl_rest(&mut self, start: Span, ty: NodeId, first_decl: NodeId) -> PResult<NodeId> {
        let mut children = vec![ty];
        let mut decl = first_decl;
        loop {
            let init = if self.eat_punct(Punct::Assign) {
                self.parse_initializer()?
            } else if self.at_punct(Punct::LBrace) {
                self.parse_initializer()?
            } else if self.at_punct(Punct::LParen) {
                // Constructor-style initializer: `Servo s(9);`.
                self.bump();
                let mut args = Vec::new();
                if !self.at_punct(Punct::RParen) {
                    loop {
                        args.push(self.parse_assignment_expr()?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                }
                self.expect_punct(Punct::RParen)?;
                self.builder.push(NodeKind::ConstructorCall, None, args, start)
            } else {
                self.empty_node(start)
            };
            children.push(decl);
            children.push(init);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
            let (next_decl, _) = self.parse_declarator()?;
            decl = next_decl;
        }
        self.expect_punct(Punct::Semi)?;
        Ok(self.builder.push(NodeKind::VarDecl, None, children, start))
    }

    fn empty_node(&mut self, span: Span) -> NodeId {
        self.builder.push(NodeKind::Empty, None, Vec::new(), span)
    }

    fn parse_initializer(&mut self) -> PResult<NodeId> {
        if self.at_punct(Punct::LBrace) {
            let start = self.span();
            self.bump();
            let mut items = Vec::new();
            if !self.at_punct(Punct::RBrace) {
                loop {
                    if self.at_punct(Punct::Dot) {
                        let dstart = self.span();
                        self.bump();
                        let field = match self.cur().clone() {
                            TokenKind::Identifier(n) => {
                                self.bump();
                                n
                            }
                            _ => String::new(),
                        };
                        self.expect_punct(Punct::Assign)?;
                        let value = self.parse_assignment_expr()?;
                        let target = self.builder.push(NodeKind::Identifier, Some(Literal::Str(field)), Vec::new(), dstart);
                        items.push(self.builder.push(
                            NodeKind::Assignment,
                            Some(Literal::Str("=".to_owned())),
                            vec![target, value],
                            dstart,
                        ));
                    } else {
                        items.push(self.parse_initializer()?);
                    }
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                    if self.at_punct(Punct::RBrace) {
                        break;
                    }
                }
            }
            self.expect_punct(Punct::RBrace)?;
            return Ok(self.builder.push(NodeKind::ArrayInitializer, None, items, start));
        }
        self.parse_assignment_expr()
    }

    fn parse_struct_or_class(&mut self) -> PResult<NodeId> {
        let start = self.span();
        let is_class = self.at_kw(Keyword::Class);
        self.bump();
        let name = match self.cur().clone() {
            TokenKind::Identifier(n) => {
                self.bump();
                n
            }
            _ => String::new(),
        };
        let mut members = Vec::new();
        if self.eat_punct(Punct::LBrace) {
            while !self.at_punct(Punct::RBrace) && !self.at_eof() {
                if self.at_kw(Keyword::Public) || self.at_kw(Keyword::Private) || self.at_kw(Keyword::Protected) {
                    self.bump();
                    self.eat_punct(Punct::Colon);
                    continue;
                }
                match self.parse_declaration_or_statement(false) {
                    Ok(id) => members.push(id),
                    Err(()) => {
                        members.push(self.error_node(start));
                        self.recover_to_statement_boundary();
                    }
                }
            }
            self.expect_punct(Punct::RBrace)?;
        }
        self.eat_punct(Punct::Semi);
        let kind = if is_class { NodeKind::Class } else { NodeKind::Struct };
        Ok(self.builder.push(kind, Some(Literal::Str(name)), members, start))
    }

    fn parse_enum(&mut self) -> PResult<NodeId> {
        let start = self.span();
        self.bump();
        let name = match self.cur().clone() {
            TokenKind::Identifier(n) => {
                self.bump();
                n
            }
            _ => String::new(),
        };
        let mut values = Vec::new();
        self.expect_punct(Punct::LBrace)?;
        while !self.at_punct(Punct::RBrace) && !self.at_eof() {
            let vstart = self.span();
            let vname = match self.cur().clone() {
                TokenKind::Identifier(n) => {
                    self.bump();
                    n
                }
                _ => String::new(),
            };
            let id = self.builder.push(NodeKind::Identifier, Some(Literal::Str(vname)), Vec::new(), vstart);
            let entry = if self.eat_punct(Punct::Assign) {
                let value = self.parse_assignment_expr()?;
                self.builder.push(NodeKind::Assignment, Some(Literal::Str("=".to_owned())), vec![id, value], vstart)
            } else {
                id
            };
            values.push(entry);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBrace)?;
        self.eat_punct(Punct::Semi);
        Ok(self.builder.push(NodeKind::Enum, Some(Literal::Str(name)), values, start))
    }

    fn parse_typedef(&mut self) -> PResult<NodeId> {
        let start = self.span();
        self.bump();
        let ty = self.parse_type()?;
        let (decl, _) = self.parse_declarator()?;
        self.expect_punct(Punct::Semi)?;
        Ok(self.builder.push(NodeKind::Typedef, None, vec![ty, decl], start))
    }

    fn parse_template(&mut self) -> PResult<NodeId> {
        let start = self.span();
        self.bump();
        self.expect_punct(Punct::Lt)?;
        let mut depth = 1;
        while depth > 0 && !self.at_eof() {
            if self.at_punct(Punct::Lt) {
                depth += 1;
            } else if self.at_punct(Punct::Gt) {
                depth -= 1;
            }
            self.bump();
        }
        let inner = self.parse_declaration_or_statement(true)?;
        Ok(self.builder.push(NodeKind::Template, None, vec![inner], start))
    }

    // ---- statements ------------------------------------------------------

    fn parse_statement(&mut self) -> PResult<NodeId> {
        let start = self.span();
        if self.at_punct(Punct::LBrace) {
            return self.parse_compound_stmt();
        }
        if self.at_punct(Punct::Semi) {
            self.bump();
            return Ok(self.empty_node(start));
        }
        if self.at_kw(Keyword::If) {
            return self.parse_if();
        }
        if self.at_kw(Keyword::While) {
            return self.parse_while();
        }
        if self.at_kw(Keyword::Do) {
            return self.parse_do_while();
        }
        if self.at_kw(Keyword::For) {
            return self.parse_for();
        }
        if self.at_kw(Keyword::Switch) {
            return self.parse_switch();
        }
        if self.at_kw(Keyword::Return) {
            self.bump();
            let value = if self.at_punct(Punct::Semi) { None } else { Some(self.parse_expr()?) };
            self.expect_punct(Punct::Semi)?;
            let children = value.into_iter().collect();
            return Ok(self.builder.push(NodeKind::Return, None, children, start));
        }
        if self.at_kw(Keyword::Break) {
            self.bump();
            self.expect_punct(Punct::Semi)?;
            return Ok(self.builder.push(NodeKind::Break, None, Vec::new(), start));
        }
        if self.at_kw(Keyword::Continue) {
            self.bump();
            self.expect_punct(Punct::Semi)?;
            return Ok(self.builder.push(NodeKind::Continue, None, Vec::new(), start));
        }
        if self.at_kw(Keyword::Struct) || self.at_kw(Keyword::Class) || self.at_kw(Keyword::Enum) || self.at_kw(Keyword::Typedef) {
            return self.parse_declaration_or_statement(false);
        }
        if self.is_type_start() {
            return self.parse_decl_starting_with_type(start);
        }
        let expr = self.parse_expr()?;
        self.expect_punct(Punct::Semi)?;
        Ok(self.builder.push(NodeKind::ExpressionStmt, None, vec![expr], start))
    }

    fn parse_compound_stmt(&mut self) -> PResult<NodeId> {
        let start = self.span();
        self.expect_punct(Punct::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at_punct(Punct::RBrace) && !self.at_eof() {
            match self.parse_declaration_or_statement(false) {
                Ok(id) => stmts.push(id),
                Err(()) => {
                    stmts.push(self.error_node(start));
                    self.recover_to_statement_boundary();
                }
            }
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(self.builder.push(NodeKind::CompoundStmt, None, stmts, start))
    }

    fn parse_if(&mut self) -> PResult<NodeId> {
        let start = self.span();
        self.bump();
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;
        let then_branch = self.parse_statement()?;
        let mut children = vec![cond, then_branch];
        // Dangling-else binds to the nearest unmatched `if` simply because
        // this check happens immediately after parsing *this* `if`'s own
        // consequent, before control returns to any enclosing `if`.
        if self.at_kw(Keyword::Else) {
            self.bump();
            children.push(self.parse_statement()?);
        }
        Ok(self.builder.push(NodeKind::If, None, children, start))
    }

    fn parse_while(&mut self) -> PResult<NodeId> {
        let start = self.span();
        self.bump();
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;
        let body = self.parse_statement()?;
        Ok(self.builder.push(NodeKind::While, None, vec![cond, body], start))
    }

    fn parse_do_while(&mut self) -> PResult<NodeId> {
        let start = self.span();
        self.bump();
        let body = self.parse_statement()?;
        if !self.at_kw(Keyword::While) {
            self.diagnostics.push(ParseError::new(ParseErrorKind::Syntax, "expected 'while' after 'do' body", self.span()));
            return Err(());
        }
        self.bump();
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;
        self.expect_punct(Punct::Semi)?;
        // Wire order is swapped for DoWhile (body, condition) per §4.6.4.
        Ok(self.builder.push(NodeKind::DoWhile, None, vec![body, cond], start))
    }

    fn parse_for(&mut self) -> PResult<NodeId> {
        let start = self.span();
        self.bump();
        self.expect_punct(Punct::LParen)?;

        // Range-based for: `for (Type x : iterable) body`.
        let save = self.pos;
        if self.is_type_start() {
            if let Ok(ty) = self.parse_type() {
                if let Ok((decl, _)) = self.parse_declarator() {
                    if self.at_punct(Punct::Colon) {
                        self.bump();
                        let iterable = self.parse_expr()?;
                        self.expect_punct(Punct::RParen)?;
                        let body = self.parse_statement()?;
                        let var = self.builder.push(NodeKind::VarDecl, None, vec![ty, decl, self.empty_node(start)], start);
                        return Ok(self.builder.push(NodeKind::RangeFor, None, vec![var, iterable, body], start));
                    }
                }
            }
        }
        self.pos = save;

        let init = if self.at_punct(Punct::Semi) {
            self.bump();
            self.empty_node(start)
        } else if self.is_type_start() {
            let ty = self.parse_type()?;
            let (decl, _) = self.parse_declarator()?;
            self.parse_var_decl_rest(start, ty, decl)?
        } else {
            let e = self.parse_expr()?;
            self.expect_punct(Punct::Semi)?;
            self.builder.push(NodeKind::ExpressionStmt, None, vec![e], start)
        };
        let cond = if self.at_punct(Punct::Semi) {
            self.empty_node(start)
        } else {
            self.parse_expr()?
        };
        self.expect_punct(Punct::Semi)?;
        let incr = if self.at_punct(Punct::RParen) {
            self.empty_node(start)
        } else {
            self.parse_expr()?
        };
        self.expect_punct(Punct::RParen)?;
        let body = self.parse_statement()?;
        Ok(self.builder.push(NodeKind::For, None, vec![init, cond, incr, body], start))
    }

    fn parse_switch(&mut self) -> PResult<NodeId> {
        let start = self.span();
        self.bump();
        self.expect_punct(Punct::LParen)?;
        let discriminant = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;
        self.expect_punct(Punct::LBrace)?;
        let mut cases = Vec::new();
        while !self.at_punct(Punct::RBrace) && !self.at_eof() {
            let cstart = self.span();
            if self.at_kw(Keyword::Case) {
                self.bump();
                let test = self.parse_expr()?;
                self.expect_punct(Punct::Colon)?;
                let body = self.parse_case_body()?;
                let mut children = vec![test];
                children.extend(body);
                cases.push(self.builder.push(NodeKind::Case, None, children, cstart));
            } else if self.at_kw(Keyword::Default) {
                self.bump();
                self.expect_punct(Punct::Colon)?;
                let body = self.parse_case_body()?;
                cases.push(self.builder.push(NodeKind::Case, Some(Literal::Null), body, cstart));
            } else {
                self.diagnostics.push(ParseError::new(ParseErrorKind::Syntax, "expected 'case' or 'default'", cstart));
                cases.push(self.error_node(cstart));
                self.recover_to_statement_boundary();
            }
        }
        self.expect_punct(Punct::RBrace)?;
        let mut children = vec![discriminant];
        children.extend(cases);
        Ok(self.builder.push(NodeKind::Switch, None, children, start))
    }

    fn parse_case_body(&mut self) -> PResult<Vec<NodeId>> {
        let mut stmts = Vec::new();
        while !self.at_kw(Keyword::Case) && !self.at_kw(Keyword::Default) && !self.at_punct(Punct::RBrace) && !self.at_eof() {
            match self.parse_declaration_or_statement(false) {
                Ok(id) => stmts.push(id),
                Err(()) => {
                    stmts.push(self.error_node(self.span()));
                    self.recover_to_statement_boundary();
                }
            }
        }
        Ok(stmts)
    }

    // ---- expressions (Pratt precedence climbing) --------------------------

    fn parse_expr(&mut self) -> PResult<NodeId> {
        let start = self.span();
        let first = self.parse_assignment_expr()?;
        if self.at_punct(Punct::Comma) {
            let mut items = vec![first];
            while self.eat_punct(Punct::Comma) {
                items.push(self.parse_assignment_expr()?);
            }
            let mut node = items[0];
            for rhs in &items[1..] {
                node = self.builder.push(NodeKind::Comma, Some(Literal::Str(",".to_owned())), vec![node, *rhs], start);
            }
            return Ok(node);
        }
        Ok(first)
    }

    fn parse_assignment_expr(&mut self) -> PResult<NodeId> {
        let start = self.span();
        let lhs = self.parse_ternary()?;
        let op = match self.cur() {
            TokenKind::Punct(
                p @ (Punct::Assign
                | Punct::PlusEq
                | Punct::MinusEq
                | Punct::StarEq
                | Punct::SlashEq
                | Punct::PercentEq
                | Punct::AmpEq
                | Punct::PipeEq
                | Punct::CaretEq
                | Punct::ShlEq
                | Punct::ShrEq),
            ) => *p,
            _ => return Ok(lhs),
        };
        self.bump();
        let rhs = self.parse_assignment_expr()?; // right-associative
        Ok(self.builder.push(NodeKind::Assignment, Some(Literal::Str(op.as_str().to_owned())), vec![lhs, rhs], start))
    }

    fn parse_ternary(&mut self) -> PResult<NodeId> {
        let start = self.span();
        let cond = self.parse_logical_or()?;
        if self.eat_punct(Punct::Question) {
            let then_expr = self.parse_assignment_expr()?;
            self.expect_punct(Punct::Colon)?;
            let else_expr = self.parse_assignment_expr()?;
            return Ok(self.builder.push(NodeKind::Ternary, None, vec![cond, then_expr, else_expr], start));
        }
        Ok(cond)
    }

    fn parse_logical_or(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::PipePipe], Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::AmpAmp], Self::parse_bitor)
    }

    fn parse_bitor(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::Pipe], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::Caret], Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::Amp], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::EqEq, Punct::Ne], Self::parse_relational)
    }

    fn parse_relational(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::Lt, Punct::Gt, Punct::Le, Punct::Ge], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::Shl, Punct::Shr], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::Plus, Punct::Minus], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> PResult<NodeId> {
        self.parse_left_assoc_binary(&[Punct::Star, Punct::Slash, Punct::Percent], Self::parse_unary)
    }

    fn parse_left_assoc_binary(&mut self, ops: &[Punct], mut next: impl FnMut(&mut Self) -> PResult<NodeId>) -> PResult<NodeId> {
        let start = self.span();
        let mut lhs = next(self)?;
        loop {
            let op = match self.cur() {
                TokenKind::Punct(p) if ops.contains(p) => *p,
                _ => break,
            };
            self.bump();
            let rhs = next(self)?;
            lhs = self.builder.push(NodeKind::BinaryOp, Some(Literal::Str(op.as_str().to_owned())), vec![lhs, rhs], start);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<NodeId> {
        let start = self.span();
        // `*` is dereference, `&` is address-of, when parsed from a
        // position expecting a unary operand (this function) rather than
        // from the binary-operator loop above (spec §4.3 ambiguity rule).
        let op = match self.cur() {
            TokenKind::Punct(p @ (Punct::Star | Punct::Amp | Punct::Plus | Punct::Minus | Punct::Bang | Punct::Tilde)) => Some(*p),
            TokenKind::Punct(p @ (Punct::PlusPlus | Punct::MinusMinus)) => Some(*p),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary()?;
            return Ok(self.builder.push(NodeKind::UnaryOp, Some(Literal::Str(op.as_str().to_owned())), vec![operand], start));
        }
        if self.at_kw(Keyword::Sizeof) {
            self.bump();
            let paren = self.eat_punct(Punct::LParen);
            let operand = if paren && self.is_type_start() {
                self.parse_type()?
            } else {
                self.parse_unary()?
            };
            if paren {
                self.expect_punct(Punct::RParen)?;
            }
            return Ok(self.builder.push(NodeKind::Sizeof, None, vec![operand], start));
        }
        if self.at_kw(Keyword::New) {
            self.bump();
            let ty = self.parse_type()?;
            let mut args = Vec::new();
            if self.eat_punct(Punct::LParen) {
                if !self.at_punct(Punct::RParen) {
                    loop {
                        args.push(self.parse_assignment_expr()?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                }
                self.expect_punct(Punct::RParen)?;
            }
            let mut children = vec![ty];
            children.extend(args);
            return Ok(self.builder.push(NodeKind::ConstructorCall, None, children, start));
        }
        // C-style cast: `(Type) expr`, disambiguated from a parenthesized
        // expression by checking whether the parenthesized content is a
        // type start.
        if self.at_punct(Punct::LParen) {
            let save = self.pos;
            self.bump();
            if self.is_type_start() {
                if let Ok(ty) = self.parse_type() {
                    if self.eat_punct(Punct::RParen) {
                        let operand = self.parse_unary()?;
                        return Ok(self.builder.push(NodeKind::Cast, None, vec![ty, operand], start));
                    }
                }
            }
            self.pos = save;
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<NodeId> {
        let start = self.span();
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(Punct::LBracket) {
                let index = self.parse_expr()?;
                self.expect_punct(Punct::RBracket)?;
                expr = self.builder.push(NodeKind::ArrayAccess, None, vec![expr, index], start);
            } else if self.at_punct(Punct::LParen) {
                self.bump();
                let mut args = Vec::new();
                if !self.at_punct(Punct::RParen) {
                    loop {
                        args.push(self.parse_assignment_expr()?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                }
                self.expect_punct(Punct::RParen)?;
                let mut children = vec![expr];
                children.extend(args);
                expr = self.builder.push(NodeKind::FuncCall, None, children, start);
            } else if self.eat_punct(Punct::Dot) || self.eat_punct(Punct::Arrow) {
                let field_start = self.span();
                let name = match self.cur().clone() {
                    TokenKind::Identifier(n) => {
                        self.bump();
                        n
                    }
                    _ => String::new(),
                };
                let field = self.builder.push(NodeKind::Identifier, Some(Literal::Str(name)), Vec::new(), field_start);
                expr = self.builder.push(NodeKind::MemberAccess, None, vec![expr, field], start);
            } else if matches!(self.cur(), TokenKind::Punct(Punct::PlusPlus | Punct::MinusMinus)) {
                let TokenKind::Punct(p) = self.cur() else { unreachable!() };
                let p = *p;
                self.bump();
                expr = self.builder.push(NodeKind::Postfix, Some(Literal::Str(p.as_str().to_owned())), vec![expr], start);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<NodeId> {
        let start = self.span();
        match self.cur().clone() {
            TokenKind::IntLiteral { text, base } => {
                self.bump();
                Ok(self.builder.push(NodeKind::NumberLiteral, Some(int_literal_value(&text, base)), Vec::new(), start))
            }
            TokenKind::FloatLiteral(text) => {
                self.bump();
                let v: f64 = text.trim_end_matches(['f', 'F']).parse().unwrap_or(0.0);
                Ok(self.builder.push(NodeKind::NumberLiteral, Some(Literal::Float64(v)), Vec::new(), start))
            }
            TokenKind::StringLiteral(s) => {
                self.bump();
                Ok(self.builder.push(NodeKind::StringLiteral, Some(Literal::Str(s)), Vec::new(), start))
            }
            TokenKind::CharLiteral(c) => {
                self.bump();
                Ok(self.builder.push(NodeKind::CharLiteral, Some(Literal::Char(c)), Vec::new(), start))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump();
                Ok(self.builder.push(NodeKind::Constant, Some(Literal::Bool(true)), Vec::new(), start))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump();
                Ok(self.builder.push(NodeKind::Constant, Some(Literal::Bool(false)), Vec::new(), start))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.bump();
                Ok(self.builder.push(NodeKind::Constant, Some(Literal::Null), Vec::new(), start))
            }
            TokenKind::Identifier(name) => {
                self.bump();
                Ok(self.builder.push(NodeKind::Identifier, Some(Literal::Str(name)), Vec::new(), start))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBrace) => self.parse_initializer(),
            _ => {
                self.diagnostics.push(ParseError::new(ParseErrorKind::Syntax, format!("unexpected token {:?}", self.cur()), start));
                Err(())
            }
        }
    }
}

fn keyword_text_tag(k: Keyword) -> &'static str {
    match k {
        Keyword::Struct => "struct",
        Keyword::Class => "class",
        Keyword::Enum => "enum",
        _ => "",
    }
}

fn keyword_text(k: Keyword) -> &'static str {
    match k {
        Keyword::Void => "void",
        Keyword::Bool => "bool",
        Keyword::Char => "char",
        Keyword::Byte => "byte",
        Keyword::Int => "int",
        Keyword::UnsignedInt => "unsigned",
        Keyword::Short => "short",
        Keyword::Long => "long",
        Keyword::UnsignedLong => "unsigned long",
        Keyword::Float => "float",
        Keyword::Double => "double",
        Keyword::String_ => "String",
        Keyword::Const => "const",
        Keyword::Static => "static",
        Keyword::Volatile => "volatile",
        Keyword::Extern => "extern",
        _ => "",
    }
}

fn int_literal_value(text: &str, base: IntBase) -> Literal {
    let digits: String = text.chars().take_while(|c| c.is_ascii_alphanumeric()).collect();
    let trimmed = digits.trim_end_matches(['l', 'L', 'u', 'U']);
    let parsed: Option<i128> = match base {
        IntBase::Hex => i128::from_str_radix(trimmed.trim_start_matches("0x").trim_start_matches("0X"), 16).ok(),
        IntBase::Binary => i128::from_str_radix(trimmed.trim_start_matches("0b").trim_start_matches("0B"), 2).ok(),
        IntBase::Octal => i128::from_str_radix(trimmed, 8).ok(),
        IntBase::Decimal => trimmed.parse().ok(),
    };
    match parsed {
        Some(v) if i32::try_from(v).is_ok() => Literal::Int32(i32::try_from(v).unwrap()),
        Some(v) if u32::try_from(v).is_ok() => Literal::UInt32(u32::try_from(v).unwrap()),
        Some(v) => Literal::Float64(v as f64),
        None => Literal::Int32(0),
    }
}

/// Parses an already macro-expanded token stream into an AST, returning
/// any syntax diagnostics collected along the way (spec §4.3: the tree is
/// still returned even when diagnostics are non-empty).
#[must_use]
pub fn parse_tokens(tokens: Vec<Token>, active_libraries: Vec<String>, macros: indexmap::IndexMap<String, String>) -> (Ast, Vec<ParseError>) {
    Parser::new(tokens).parse_program(active_libraries, macros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> Ast {
        let tokens = tokenize(src);
        let (ast, _) = parse_tokens(tokens, Vec::new(), indexmap::IndexMap::new());
        ast
    }

    #[test]
    fn parses_blink_sketch() {
        let ast = parse("void setup(){ pinMode(13,OUTPUT); } void loop(){ digitalWrite(13,HIGH); delay(1000); }");
        assert!(!ast.has_errors());
        assert_eq!(ast.get(ast.root).children.len(), 2);
    }

    #[test]
    fn expression_statement_always_has_expression_child() {
        let ast = parse("void loop(){ foo(1,2); }");
        for node in &ast.nodes {
            if node.kind == NodeKind::ExpressionStmt {
                assert_eq!(node.children.len(), 1);
            }
        }
    }

    #[test]
    fn dangling_else_binds_to_nearest_if() {
        let ast = parse("void loop(){ if (a) if (b) x(); else y(); }");
        // Find the inner `if`: it should be the one carrying the `else`.
        let ifs: Vec<_> = ast.nodes.iter().filter(|n| n.kind == NodeKind::If).collect();
        assert_eq!(ifs.len(), 2);
        assert_eq!(ifs[0].children.len(), 3, "inner if should have the else branch");
        assert_eq!(ifs[1].children.len(), 2, "outer if should not have an else branch");
    }

    #[test]
    fn star_is_multiplication_in_binary_context() {
        let ast = parse("void loop(){ int x = a * b; }");
        assert!(ast.nodes.iter().any(|n| n.kind == NodeKind::BinaryOp && n.value == Some(Literal::Str("*".to_owned()))));
    }

    #[test]
    fn star_is_dereference_in_unary_context() {
        let ast = parse("void loop(){ int x = *p; }");
        assert!(ast.nodes.iter().any(|n| n.kind == NodeKind::UnaryOp && n.value == Some(Literal::Str("*".to_owned()))));
    }

    #[test]
    fn switch_with_fallthrough_cases() {
        let ast = parse("void loop(){ switch(2){ case 1: a(); case 2: b(); case 3: c(); break; default: d(); } }");
        let switch = ast.nodes.iter().find(|n| n.kind == NodeKind::Switch).unwrap();
        assert_eq!(switch.children.len(), 5); // discriminant + 4 cases
    }

    #[test]
    fn error_recovery_still_returns_a_tree() {
        let ast = parse("void loop(){ int x = ; foo(); }");
        assert!(ast.has_errors());
        assert!(ast.nodes.iter().any(|n| n.kind == NodeKind::FuncCall));
    }

    #[test]
    fn function_with_identifier_return_type_parses_as_declarator() {
        let ast = parse("MyStruct makeThing() { return x; }");
        assert!(ast.nodes.iter().any(|n| n.kind == NodeKind::FuncDef));
    }

    #[test]
    fn range_based_for_parses() {
        let ast = parse("void loop(){ int arr[3]; for (int x : arr) { y(x); } }");
        assert!(ast.nodes.iter().any(|n| n.kind == NodeKind::RangeFor));
    }
}
