use std::rc::Rc;

use crate::syntax::ast::*;
use crate::error::{Error, ErrorCode};
use crate::stack::ensure_sufficient_stack;
use crate::syntax::lexer::Lexer;
use crate::syntax::token::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Enclosing `for`/`while` bodies of the current function.
    loop_depth: usize,
    fn_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, loop_depth: 0, fn_depth: 0 }
    }

    pub fn parse(mut self) -> Result<Program, Vec<Error>> {
        let mut errors = Vec::new();
        let mut stmts = Vec::new();

        while !self.is_at_end() {
            let pos_before = self.pos;

            match self.peek_kind() {
                TokenKind::Newline => { self.advance(); }
                // Stray dedents only appear after recovering from an error
                // inside a block; that error has already been reported.
                TokenKind::Dedent if !errors.is_empty() => { self.advance(); }
                TokenKind::Indent | TokenKind::Dedent => {
                    errors.push(self.unexpected("statement"));
                    self.advance();
                }
                _ => match self.parse_stmt() {
                    Ok(s) => stmts.push(s),
                    Err(e) => { errors.push(e); self.recover(); }
                },
            }

            // guarantee progress: if nothing was consumed, force-advance
            // to prevent an infinite loop on unrecognised tokens
            if self.pos == pos_before {
                self.advance();
            }
        }

        if errors.is_empty() {
            Ok(Program { stmts })
        } else {
            Err(errors)
        }
    }

    // ─── Statements ──────────────────────────────────────────────────────────

    fn parse_stmt(&mut self) -> Result<Stmt, Error> {
        ensure_sufficient_stack(|| self.parse_stmt_inner())
    }

    fn parse_stmt_inner(&mut self) -> Result<Stmt, Error> {
        match self.peek_kind() {
            TokenKind::If    => self.parse_if(),
            TokenKind::For   => self.parse_for(),
            TokenKind::While => self.parse_while(),
            TokenKind::Def   => self.parse_def(),
            TokenKind::Try   => self.parse_try(),
            _ => {
                let stmt = self.parse_simple_stmt()?;
                self.expect_line_end()?;
                Ok(stmt)
            }
        }
    }

    /// Statements that fit on one line and may follow a `:` directly.
    fn parse_simple_stmt(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        match self.peek_kind() {
            TokenKind::Return   => self.parse_return(),
            TokenKind::Import   => self.parse_import(),
            TokenKind::Raise    => self.parse_raise(),
            TokenKind::Pass     => { self.advance(); Ok(Stmt::Pass(span)) }
            TokenKind::Break | TokenKind::Continue if self.loop_depth == 0 => {
                Err(self.unexpected_here("`break` and `continue` are only valid inside a loop"))
            }
            TokenKind::Break    => { self.advance(); Ok(Stmt::Break(span)) }
            TokenKind::Continue => { self.advance(); Ok(Stmt::Continue(span)) }
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_expr_or_assign(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        let expr = self.parse_expr_list()?;

        if self.check(TokenKind::Eq) {
            let target = self.to_target(expr)?;
            self.advance();
            let value = self.parse_expr_list()?;
            return Ok(Stmt::Assign(Assign { target, value, span }));
        }

        let aug = match self.peek_kind() {
            TokenKind::PlusEq    => Some(BinOp::Add),
            TokenKind::MinusEq   => Some(BinOp::Sub),
            TokenKind::StarEq    => Some(BinOp::Mul),
            TokenKind::SlashEq   => Some(BinOp::Div),
            TokenKind::PercentEq => Some(BinOp::Mod),
            _ => None,
        };
        if let Some(op) = aug {
            let target = self.to_target(expr)?;
            if matches!(target, Target::Unpack(_)) {
                return Err(Error::new(ErrorCode::P003, span.line, span.column,
                    "augmented assignment needs a single target"));
            }
            self.advance();
            let value = self.parse_expr()?;
            return Ok(Stmt::AugAssign(AugAssign { target, op, value, span }));
        }

        Ok(Stmt::Expr(expr))
    }

    /// `a` or `a, b, …`. A bare comma list is a list value, the way a tuple
    /// would be elsewhere.
    fn parse_expr_list(&mut self) -> Result<Expr, Error> {
        let first = self.parse_expr()?;
        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }
        let span = first.span();
        let mut items = vec![first];
        while self.matches(TokenKind::Comma) {
            if self.at_line_end() || self.check(TokenKind::Eq) { break; } // trailing comma
            items.push(self.parse_expr()?);
        }
        Ok(Expr::List(items, span))
    }

    fn to_target(&self, expr: Expr) -> Result<Target, Error> {
        match expr {
            Expr::Ident(name, _) => Ok(Target::Name(name)),
            Expr::Index { expr, index, .. } => Ok(Target::Index { expr, index }),
            Expr::List(items, _) if !items.is_empty() => Ok(Target::Unpack(
                items.into_iter().map(|e| self.to_target(e)).collect::<Result<_, _>>()?,
            )),
            other => {
                let span = other.span();
                Err(Error::new(ErrorCode::P003, span.line, span.column,
                    "invalid assignment target (only names and subscripts can be assigned)"))
            }
        }
    }

    fn parse_return(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        if self.fn_depth == 0 {
            return Err(self.unexpected_here("`return` outside function"));
        }
        self.expect(TokenKind::Return)?;
        let value = if self.at_line_end() { None } else { Some(self.parse_expr_list()?) };
        Ok(Stmt::Return(value, span))
    }

    fn parse_raise(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        self.expect(TokenKind::Raise)?;
        let value = if self.at_line_end() { None } else { Some(self.parse_expr()?) };
        Ok(Stmt::Raise(value, span))
    }

    fn parse_import(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        self.expect(TokenKind::Import)?;
        let mut name = self.expect_ident()?;
        while self.matches(TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(Stmt::Import(ImportDecl { name, span }))
    }

    fn parse_if(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        self.expect(TokenKind::If)?;
        let mut branches = Vec::new();
        let condition = self.parse_expr()?;
        branches.push((condition, self.parse_block()?));

        while self.matches(TokenKind::Elif) {
            let condition = self.parse_expr()?;
            branches.push((condition, self.parse_block()?));
        }

        let else_block = if self.matches(TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Stmt::If(IfStmt { branches, else_block, span }))
    }

    fn parse_for(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        self.expect(TokenKind::For)?;
        let target = self.parse_loop_target()?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expr()?;
        let body = self.parse_loop_body()?;
        Ok(Stmt::For(ForStmt { target, iterable, body, span }))
    }

    /// `x`, `k, v` or `(k, v)`. Loop variables are plain names.
    fn parse_loop_target(&mut self) -> Result<Target, Error> {
        let first = self.parse_target_atom()?;
        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.matches(TokenKind::Comma) {
            if self.check(TokenKind::In) { break; }
            items.push(self.parse_target_atom()?);
        }
        Ok(Target::Unpack(items))
    }

    fn parse_target_atom(&mut self) -> Result<Target, Error> {
        if self.matches(TokenKind::LParen) {
            let inner = self.parse_loop_target()?;
            self.expect(TokenKind::RParen)?;
            return Ok(inner);
        }
        Ok(Target::Name(self.expect_ident()?))
    }

    fn parse_while(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        self.expect(TokenKind::While)?;
        let condition = self.parse_expr()?;
        let body = self.parse_loop_body()?;
        Ok(Stmt::While(WhileStmt { condition, body, span }))
    }

    fn parse_def(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        self.expect(TokenKind::Def)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let params = self.parse_param_list(TokenKind::RParen)?;
        self.expect(TokenKind::RParen)?;
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.fn_depth += 1;
        let body = self.parse_block();
        self.fn_depth -= 1;
        self.loop_depth = saved_loops;
        let body: Rc<[Stmt]> = body?.into();
        Ok(Stmt::FnDef(FnDef { name, params, body, span }))
    }

    /// Parameters up to `close`: `)` for `def`, `:` for `lambda`.
    fn parse_param_list(&mut self, close: TokenKind) -> Result<Vec<Param>, Error> {
        let mut params: Vec<Param> = Vec::new();
        while !self.check(close.clone()) && !self.is_at_end() {
            let span = self.span();
            let name = self.expect_ident()?;
            if params.iter().any(|p| p.name == name) {
                return Err(Error::new(ErrorCode::P003, span.line, span.column,
                    format!("duplicate parameter `{name}`")));
            }
            let default = if self.matches(TokenKind::Eq) { Some(self.parse_expr()?) } else { None };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(Error::new(ErrorCode::P003, span.line, span.column,
                    format!("parameter `{name}` without a default follows a parameter with one")));
            }
            params.push(Param { name, default, span });
            if !self.matches(TokenKind::Comma) { break; }
        }
        Ok(params)
    }

    fn parse_try(&mut self) -> Result<Stmt, Error> {
        let span = self.span();
        self.expect(TokenKind::Try)?;
        let body = self.parse_block()?;

        let mut handlers: Vec<ExceptClause> = Vec::new();
        while self.check(TokenKind::Except) {
            if handlers.last().is_some_and(|h| h.kind.is_none()) {
                return Err(self.unexpected_here("a bare `except:` must be the last handler"));
            }
            let clause_span = self.span();
            self.advance();
            let kind = if self.check(TokenKind::Colon) {
                None
            } else {
                let mut name = self.expect_ident()?;
                while self.matches(TokenKind::Dot) {
                    name.push('.');
                    name.push_str(&self.expect_ident()?);
                }
                Some(name)
            };
            let binding = if self.matches(TokenKind::As) { Some(self.expect_ident()?) } else { None };
            let body = self.parse_block()?;
            handlers.push(ExceptClause { kind, binding, body, span: clause_span });
        }

        let else_block = if !handlers.is_empty() && self.matches(TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        let finally = if self.matches(TokenKind::Finally) { Some(self.parse_block()?) } else { None };

        if handlers.is_empty() && finally.is_none() {
            let tok = self.peek();
            return Err(Error::new(ErrorCode::P002, tok.line, tok.column,
                format!("expected `except` or `finally`, found {}", tok.kind.describe())));
        }
        Ok(Stmt::Try(TryStmt { body, handlers, else_block, finally, span }))
    }

    fn parse_loop_body(&mut self) -> Result<Vec<Stmt>, Error> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        body
    }

    /// `: NEWLINE INDENT stmt+ DEDENT` or `: simple_stmt NEWLINE`.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, Error> {
        self.expect(TokenKind::Colon)?;

        if !self.matches(TokenKind::Newline) {
            let stmt = self.parse_simple_stmt()?;
            self.expect_line_end()?;
            return Ok(vec![stmt]);
        }

        self.expect(TokenKind::Indent)?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::Dedent) && !self.is_at_end() {
            if self.matches(TokenKind::Newline) { continue; }
            stmts.push(self.parse_stmt()?);
        }
        if !self.is_at_end() {
            self.expect(TokenKind::Dedent)?;
        }
        Ok(stmts)
    }

    // ─── Expressions (precedence climbing) ───────────────────────────────────

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, Error> {
        ensure_sufficient_stack(|| {
            if self.check(TokenKind::Lambda) { self.parse_lambda() } else { self.parse_conditional() }
        })
    }

    fn parse_lambda(&mut self) -> Result<Expr, Error> {
        let span = self.span();
        self.expect(TokenKind::Lambda)?;
        let params = self.parse_param_list(TokenKind::Colon)?;
        self.expect(TokenKind::Colon)?;
        let value = self.parse_expr()?;
        let body: Rc<[Stmt]> = vec![Stmt::Return(Some(value), span)].into();
        Ok(Expr::Lambda { params, body, span })
    }

    fn parse_conditional(&mut self) -> Result<Expr, Error> {
        let expr = self.parse_or()?;
        if self.check(TokenKind::If) {
            let span = expr.span();
            self.advance();
            let condition = self.parse_or()?;
            self.expect(TokenKind::Else)?;
            let else_expr = self.parse_expr()?;
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then_expr: Box::new(expr),
                else_expr: Box::new(else_expr),
                span,
            });
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_and()?;
        while self.check(TokenKind::Or) {
            let span = left.span();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical { left: Box::new(left), op: LogicalOp::Or, right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_not()?;
        while self.check(TokenKind::And) {
            let span = left.span();
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Logical { left: Box::new(left), op: LogicalOp::And, right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, Error> {
        let span = self.span();
        if self.matches(TokenKind::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::UnOp { op: UnOp::Not, operand: Box::new(operand), span });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq   => BinOp::Eq,
                TokenKind::BangEq => BinOp::NotEq,
                TokenKind::Lt     => BinOp::Lt,
                TokenKind::LtEq   => BinOp::LtEq,
                TokenKind::Gt     => BinOp::Gt,
                TokenKind::GtEq   => BinOp::GtEq,
                TokenKind::In     => BinOp::In,
                TokenKind::Not if self.peek_next_is(TokenKind::In) => {
                    self.advance();
                    BinOp::NotIn
                }
                _ => break,
            };
            let span = left.span();
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::BinOp { left: Box::new(left), op, right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus  => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let span = left.span();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinOp { left: Box::new(left), op, right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star       => BinOp::Mul,
                TokenKind::Slash      => BinOp::Div,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::Percent    => BinOp::Mod,
                _ => break,
            };
            let span = left.span();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinOp { left: Box::new(left), op, right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        let span = self.span();
        if self.matches(TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::UnOp { op: UnOp::Neg, operand: Box::new(operand), span });
        }
        if self.matches(TokenKind::Plus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::UnOp { op: UnOp::Pos, operand: Box::new(operand), span });
        }
        self.parse_power()
    }

    /// `**` binds tighter than unary minus on its left and is right-associative.
    fn parse_power(&mut self) -> Result<Expr, Error> {
        let base = self.parse_postfix()?;
        if self.check(TokenKind::StarStar) {
            let span = base.span();
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Expr::BinOp { left: Box::new(base), op: BinOp::Pow, right: Box::new(exponent), span });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    let span = expr.span();
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    self.expect(TokenKind::RParen)?;
                    expr = Expr::Call { callee: Box::new(expr), args, kwargs, span };
                }

                TokenKind::LBracket => {
                    let span = expr.span();
                    self.advance();
                    expr = self.parse_subscript(expr, span)?;
                }

                // attribute or method call: expr.name or expr.name(args)
                TokenKind::Dot => {
                    let span = expr.span();
                    self.advance();
                    let name = self.expect_ident()?;
                    if self.matches(TokenKind::LParen) {
                        let (args, kwargs) = self.parse_call_args()?;
                        self.expect(TokenKind::RParen)?;
                        expr = Expr::MethodCall { expr: Box::new(expr), method: name, args, kwargs, span };
                    } else {
                        expr = Expr::Attribute { expr: Box::new(expr), name, span };
                    }
                }

                _ => break,
            }
        }

        Ok(expr)
    }

    /// After `[`: an index, or a `start:stop:step` slice with any part left out.
    fn parse_subscript(&mut self, target: Expr, span: Span) -> Result<Expr, Error> {
        let start = if self.check(TokenKind::Colon) {
            None
        } else {
            let index = self.parse_expr()?;
            if !self.check(TokenKind::Colon) {
                self.expect(TokenKind::RBracket)?;
                return Ok(Expr::Index { expr: Box::new(target), index: Box::new(index), span });
            }
            Some(Box::new(index))
        };
        self.expect(TokenKind::Colon)?;
        let stop = self.parse_slice_part()?;
        let step = if self.matches(TokenKind::Colon) { self.parse_slice_part()? } else { None };
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::Slice { expr: Box::new(target), start, stop, step, span })
    }

    fn parse_slice_part(&mut self) -> Result<Option<Box<Expr>>, Error> {
        if self.check(TokenKind::Colon) || self.check(TokenKind::RBracket) {
            return Ok(None);
        }
        Ok(Some(Box::new(self.parse_expr()?)))
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        let tok = self.peek().clone();
        let span = Span::new(tok.line, tok.column);

        match tok.kind {
            TokenKind::Int(v)   => { self.advance(); Ok(Expr::Int(v, span)) }
            TokenKind::Float(v) => { self.advance(); Ok(Expr::Float(v, span)) }
            TokenKind::Str(s)   => {
                self.advance();
                // adjacent string literals concatenate
                let mut s = s;
                while let TokenKind::Str(next) = self.peek_kind() {
                    self.advance();
                    s.push_str(&next);
                }
                Ok(Expr::Str(s, span))
            }
            TokenKind::FStr(raw) => {
                self.advance();
                self.parse_fstring(&raw, span)
            }
            TokenKind::True     => { self.advance(); Ok(Expr::Bool(true, span)) }
            TokenKind::False    => { self.advance(); Ok(Expr::Bool(false, span)) }
            TokenKind::None     => { self.advance(); Ok(Expr::None(span)) }
            TokenKind::Ident(name) => { self.advance(); Ok(Expr::Ident(name, span)) }

            // `(x)` groups; `()`, `(x,)` and `(x, y)` are list values
            TokenKind::LParen => {
                self.advance();
                if self.matches(TokenKind::RParen) {
                    return Ok(Expr::List(Vec::new(), span));
                }
                let first = self.parse_expr()?;
                if !self.check(TokenKind::Comma) {
                    self.expect(TokenKind::RParen)?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.matches(TokenKind::Comma) {
                    if self.check(TokenKind::RParen) { break; }
                    items.push(self.parse_expr()?);
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::List(items, span))
            }

            TokenKind::LBracket => self.parse_list(span),
            TokenKind::LBrace   => self.parse_dict(span),

            _ => Err(self.unexpected("expression")),
        }
    }

    // ─── f-strings ───────────────────────────────────────────────────────────

    /// Split an f-string body into literal text and `{expr!r:spec}` fields.
    /// Field expressions are lexed and parsed on their own; their positions
    /// are reported relative to the literal.
    fn parse_fstring(&self, raw: &str, span: Span) -> Result<Expr, Error> {
        let error = |message: &str| Error::new(ErrorCode::P001, span.line, span.column, message);
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut rest = raw;

        while let Some(c) = rest.chars().next() {
            if rest.starts_with("{{") || rest.starts_with("}}") {
                text.push(c);
                rest = &rest[2..];
            } else if c == '}' {
                return Err(error("single `}` is not allowed in an f-string"));
            } else if c == '{' {
                let len = field_len(&rest[1..])
                    .ok_or_else(|| error("f-string field is missing its closing `}`"))?;
                if !text.is_empty() {
                    parts.push(FStringPart::Text(std::mem::take(&mut text)));
                }
                parts.push(self.parse_fstring_field(&rest[1..1 + len], span)?);
                rest = &rest[len + 2..];
            } else {
                text.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
        if !text.is_empty() {
            parts.push(FStringPart::Text(text));
        }
        Ok(Expr::FString(parts, span))
    }

    fn parse_fstring_field(&self, field: &str, span: Span) -> Result<FStringPart, Error> {
        let (source, conversion, spec) = split_field(field);
        let repr = match conversion {
            None | Some("s") => false,
            Some("r") => true,
            Some(other) => {
                return Err(Error::new(ErrorCode::P001, span.line, span.column,
                    format!("unknown f-string conversion `!{other}`")));
            }
        };
        let source = source.trim();
        if source.is_empty() {
            return Err(Error::new(ErrorCode::P001, span.line, span.column, "empty expression in f-string"));
        }

        let first = |errors: Vec<Error>| {
            errors.into_iter().next().unwrap_or_else(|| {
                Error::new(ErrorCode::P001, span.line, span.column, "invalid f-string field")
            })
        };
        let tokens = Lexer::at(source, span.line, span.column).tokenize().map_err(first)?;
        let mut inner = Parser::new(tokens);
        let expr = inner.parse_expr()?;
        inner.expect_line_end()?;
        if !inner.is_at_end() {
            return Err(inner.unexpected("`}`"));
        }
        Ok(FStringPart::Field { expr, repr, spec: spec.map(str::to_string) })
    }

    fn parse_list(&mut self, span: Span) -> Result<Expr, Error> {
        self.expect(TokenKind::LBracket)?;
        if self.matches(TokenKind::RBracket) {
            return Ok(Expr::List(Vec::new(), span));
        }

        let first = self.parse_expr()?;
        if self.check(TokenKind::For) {
            let clause = self.parse_comp_clause()?;
            self.expect(TokenKind::RBracket)?;
            return Ok(Expr::ListComp { element: Box::new(first), clause: Box::new(clause), span });
        }

        let mut items = vec![first];
        while self.matches(TokenKind::Comma) {
            if self.check(TokenKind::RBracket) { break; } // trailing comma
            items.push(self.parse_expr()?);
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::List(items, span))
    }

    fn parse_dict(&mut self, span: Span) -> Result<Expr, Error> {
        self.expect(TokenKind::LBrace)?;
        if self.matches(TokenKind::RBrace) {
            return Ok(Expr::Dict(Vec::new(), span));
        }

        let key = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let value = self.parse_expr()?;
        if self.check(TokenKind::For) {
            let clause = self.parse_comp_clause()?;
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::DictComp {
                key: Box::new(key),
                value: Box::new(value),
                clause: Box::new(clause),
                span,
            });
        }

        let mut entries = vec![(key, value)];
        while self.matches(TokenKind::Comma) {
            if self.check(TokenKind::RBrace) { break; }
            let key = self.parse_expr()?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            entries.push((key, value));
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Dict(entries, span))
    }

    /// `for NAME in or_expr [if or_expr]`
    fn parse_comp_clause(&mut self) -> Result<CompClause, Error> {
        self.expect(TokenKind::For)?;
        let target = self.parse_loop_target()?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_or()?;
        let condition = if self.matches(TokenKind::If) { Some(self.parse_or()?) } else { None };
        Ok(CompClause { target, iterable, condition })
    }

    // ─── Argument lists ──────────────────────────────────────────────────────

    /// Positional args followed by `name=value` keyword args.
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), Error> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !self.check(TokenKind::RParen) && !self.is_at_end() {
            let span = self.span();
            if let TokenKind::Ident(name) = self.peek_kind() {
                if self.peek_next_is(TokenKind::Eq) {
                    self.advance();
                    self.advance();
                    if kwargs.iter().any(|(k, _)| *k == name) {
                        return Err(Error::new(ErrorCode::P003, span.line, span.column,
                            format!("keyword argument `{name}` repeated")));
                    }
                    let val = self.parse_expr()?;
                    kwargs.push((name, val));
                    if !self.matches(TokenKind::Comma) { break; }
                    continue;
                }
            }
            if !kwargs.is_empty() {
                return Err(Error::new(ErrorCode::P001, span.line, span.column,
                    "positional argument follows keyword argument"));
            }
            args.push(self.parse_expr()?);
            if !self.matches(TokenKind::Comma) { break; }
        }
        Ok((args, kwargs))
    }

    // ─── Token primitives ────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens[self.pos].kind.clone()
    }

    fn peek_next_is(&self, kind: TokenKind) -> bool {
        if self.pos + 1 < self.tokens.len() {
            self.tokens[self.pos + 1].kind == kind
        } else {
            false
        }
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() { self.pos += 1; }
        tok
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.tokens[self.pos].kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) { self.advance(); true } else { false }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Error> {
        if self.check(kind.clone()) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(Error::new(
                ErrorCode::P002,
                tok.line,
                tok.column,
                format!("expected {}, found {}", kind.describe(), tok.kind.describe()),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<String, Error> {
        match self.peek_kind() {
            TokenKind::Ident(s) => { self.advance(); Ok(s) }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof)
    }

    fn expect_line_end(&mut self) -> Result<(), Error> {
        match self.peek_kind() {
            TokenKind::Newline => { self.advance(); Ok(()) }
            TokenKind::Dedent | TokenKind::Eof => Ok(()),
            _ => Err(self.unexpected("end of line")),
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn span(&self) -> Span {
        let tok = self.peek();
        Span::new(tok.line, tok.column)
    }

    fn unexpected(&self, expected: &str) -> Error {
        let tok = self.peek();
        Error::new(
            ErrorCode::P001,
            tok.line,
            tok.column,
            format!("expected {}, found {}", expected, tok.kind.describe()),
        )
    }

    fn unexpected_here(&self, message: &str) -> Error {
        let tok = self.peek();
        Error::new(ErrorCode::P001, tok.line, tok.column, message)
    }

    /// Skip the rest of the offending line. Used after a parse error to
    /// attempt recovery.
    fn recover(&mut self) {
        loop {
            match self.peek_kind() {
                TokenKind::Eof => break,
                TokenKind::Newline => { self.advance(); break; }
                _ => { self.advance(); }
            }
        }
    }
}

// ─── f-string scanning ───────────────────────────────────────────────────────

/// Tracks bracket depth and string quotes while scanning a field, so a `}`
/// or `:` inside `d['a:b']` or `{k: v}` does not end it.
#[derive(Default)]
struct FieldScan {
    depth: usize,
    quote: Option<char>,
}

impl FieldScan {
    /// Feed one character. True when it sits at depth 0 outside quotes.
    fn top_level(&mut self, c: char) -> bool {
        match (self.quote, c) {
            (Some(q), c) if c == q => { self.quote = None; false }
            (Some(_), _) => false,
            (None, '\'' | '"') => { self.quote = Some(c); false }
            (None, '(' | '[' | '{') => { self.depth += 1; false }
            (None, ')' | ']' | '}') if self.depth > 0 => { self.depth -= 1; false }
            (None, _) => self.depth == 0,
        }
    }
}

/// Byte length of a field body up to its closing `}`.
fn field_len(s: &str) -> Option<usize> {
    let mut scan = FieldScan::default();
    s.char_indices().find(|&(_, c)| scan.top_level(c) && c == '}').map(|(i, _)| i)
}

/// `expr!conv:spec` into its three parts.
fn split_field(field: &str) -> (&str, Option<&str>, Option<&str>) {
    let mut scan = FieldScan::default();
    for (i, c) in field.char_indices() {
        if !scan.top_level(c) {
            continue;
        }
        match c {
            '!' if !field[i + 1..].starts_with('=') => {
                let tail = &field[i + 1..];
                return match tail.split_once(':') {
                    Some((conv, spec)) => (&field[..i], Some(conv), Some(spec)),
                    None => (&field[..i], Some(tail), None),
                };
            }
            ':' => return (&field[..i], None, Some(&field[i + 1..])),
            _ => {}
        }
    }
    (field, None, None)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
