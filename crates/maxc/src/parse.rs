//! The recursive-descent parser: tokens to the untyped AST.
//!
//! Precedence, lowest to highest: assignment (right-assoc), logical-or,
//! logical-and, equality, comparison, bitshift, additive, multiplicative,
//! unary prefix, postfix (`.`, `[]`, `()`), primary. Malformed input produces
//! a diagnostic and a sentinel node; parsing continues so one pass reports as
//! much as possible.
//!
//! `import name;` is resolved here: the module file is read, lexed and parsed
//! recursively, and its statements are spliced in as a non-scope block so its
//! declarations land in the importing scope.

use std::path::{Path, PathBuf};

use crate::{
    ast::{Decl, Expr, ExprKind, FieldInit, FnBody, FnDef, MemberKind, Param, Stmt},
    errors::Diagnostics,
    lex,
    operators::{BinOp, UnaryOp},
    token::{Span, Token, TokenKind},
    types::Type,
};

/// Parses a token vector into a list of top-level statements.
///
/// `base_dir` is the directory imports are resolved against (the directory of
/// the source file, or the working directory for REPL input).
pub fn parse(tokens: &[Token], base_dir: &Path, diags: &mut Diagnostics) -> Vec<Stmt> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        base_dir: base_dir.to_path_buf(),
        import_chain: Vec::new(),
        diags,
    };
    parser.program()
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    base_dir: PathBuf,
    /// Module names currently being imported, for cycle detection.
    import_chain: Vec<String>,
    diags: &'a mut Diagnostics,
}

impl Parser<'_> {
    fn cur(&self) -> &Token {
        // the lexer guarantees a trailing End token
        self.tokens.get(self.pos).unwrap_or_else(|| {
            self.tokens.last().expect("token stream always holds an End token")
        })
    }

    fn cur_kind(&self) -> &TokenKind {
        &self.cur().kind
    }

    fn cur_span(&self) -> Span {
        self.cur().span
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            self.cur_span()
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn step(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.cur_kind() == kind
    }

    fn skip(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.step();
            true
        } else {
            false
        }
    }

    /// Cursor snapshot for speculative parses.
    fn save(&self) -> usize {
        self.pos
    }

    fn restore(&mut self, saved: usize) {
        self.pos = saved;
    }

    /// Consumes two tokens when both match, restoring the cursor otherwise.
    fn skip2(&mut self, first: &TokenKind, second: &TokenKind) -> bool {
        let saved = self.save();
        if self.skip(first) && self.skip(second) {
            return true;
        }
        self.restore(saved);
        false
    }

    fn expect(&mut self, kind: &TokenKind) -> bool {
        if self.skip(kind) {
            true
        } else {
            self.diags.report(
                format!(
                    "expected `{}`, found `{}`",
                    kind.describe(),
                    self.cur_kind().describe()
                ),
                self.prev_span(),
            );
            false
        }
    }

    fn expect_ident(&mut self) -> Option<(String, Span)> {
        let span = self.cur_span();
        if let TokenKind::Ident(name) = self.cur_kind() {
            let name = name.clone();
            self.step();
            Some((name, span))
        } else {
            self.diags.report(
                format!("expected identifier, found `{}`", self.cur_kind().describe()),
                span,
            );
            None
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn program(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::End) {
            stmts.push(self.statement(false));
        }
        stmts
    }

    /// Parses one statement. `in_block` relaxes the trailing-semicolon rule
    /// for an expression directly before the closing `}` (the block tail).
    fn statement(&mut self, in_block: bool) -> Stmt {
        match self.cur_kind() {
            TokenKind::Lbrace => self.block(),
            TokenKind::For => {
                self.step();
                self.for_stmt()
            }
            TokenKind::While => {
                self.step();
                self.while_stmt()
            }
            TokenKind::If => {
                self.step();
                self.if_stmt()
            }
            TokenKind::Return => {
                let span = self.cur_span();
                self.step();
                self.return_stmt(span)
            }
            TokenKind::Break => {
                let span = self.cur_span();
                self.step();
                self.expect(&TokenKind::Semicolon);
                Stmt::Break { span }
            }
            TokenKind::Let => {
                self.step();
                self.var_decl(false)
            }
            TokenKind::Const => {
                self.step();
                self.var_decl(true)
            }
            TokenKind::Fn => {
                self.step();
                self.fn_def()
            }
            TokenKind::Object => {
                self.step();
                self.object_def()
            }
            TokenKind::Import => {
                self.step();
                self.import_stmt()
            }
            TokenKind::Typedef => {
                let span = self.cur_span();
                self.step();
                self.diags.report("typedef is not implemented", span);
                while !self.at(&TokenKind::Semicolon) && !self.at(&TokenKind::End) {
                    self.step();
                }
                self.skip(&TokenKind::Semicolon);
                Stmt::None
            }
            _ => {
                let expr = self.expr();
                let was_empty = matches!(expr.kind, ExprKind::None);
                if !was_empty && !(in_block && self.at(&TokenKind::Rbrace)) {
                    self.expect(&TokenKind::Semicolon);
                }
                Stmt::Expr(expr)
            }
        }
    }

    fn block(&mut self) -> Stmt {
        Stmt::Block(self.block_contents())
    }

    fn block_contents(&mut self) -> Vec<Stmt> {
        self.expect(&TokenKind::Lbrace);
        let mut stmts = Vec::new();
        loop {
            if self.skip(&TokenKind::Rbrace) {
                return stmts;
            }
            if self.at(&TokenKind::End) {
                self.diags.report("expected `}`", self.prev_span());
                return stmts;
            }
            stmts.push(self.statement(true));
        }
    }

    fn if_stmt(&mut self) -> Stmt {
        let cond = self.expr();
        let then_s = Box::new(self.block());
        let else_s = if self.skip(&TokenKind::Else) {
            Some(Box::new(if self.skip(&TokenKind::If) {
                self.if_stmt()
            } else {
                self.block()
            }))
        } else {
            None
        };
        Stmt::If { cond, then_s, else_s }
    }

    fn for_stmt(&mut self) -> Stmt {
        let (var_name, var_span) = match self.expect_ident() {
            Some(pair) => pair,
            None => {
                self.step();
                (String::new(), self.prev_span())
            }
        };
        if self.at(&TokenKind::Comma) {
            self.diags
                .report("multiple loop variables are not supported", self.cur_span());
            while !self.skip(&TokenKind::In) && !self.at(&TokenKind::End) {
                self.step();
            }
        } else {
            self.expect(&TokenKind::In);
        }
        let iter = self.expr();
        let body = Box::new(self.statement(false));
        Stmt::For {
            var_name,
            var_span,
            var: None,
            iter,
            body,
        }
    }

    fn while_stmt(&mut self) -> Stmt {
        let cond = self.expr();
        let body = Box::new(self.block());
        Stmt::While { cond, body }
    }

    fn return_stmt(&mut self, span: Span) -> Stmt {
        let value = self.expr();
        if !matches!(value.kind, ExprKind::None) {
            self.expect(&TokenKind::Semicolon);
        }
        Stmt::Return { value, span }
    }

    fn var_decl(&mut self, is_const: bool) -> Stmt {
        if self.skip(&TokenKind::Lbrace) {
            return self.var_decl_block(is_const);
        }
        let decl = self.one_decl(is_const);
        self.expect(&TokenKind::Semicolon);
        Stmt::VarDecl(vec![decl])
    }

    /// `let { a = 1; b: int = 2; }` declaration blocks.
    fn var_decl_block(&mut self, is_const: bool) -> Stmt {
        let mut decls = Vec::new();
        loop {
            if self.skip(&TokenKind::Rbrace) {
                break;
            }
            if self.at(&TokenKind::End) {
                self.diags.report("expected `}`", self.prev_span());
                break;
            }
            decls.push(self.one_decl(is_const));
            self.expect(&TokenKind::Semicolon);
        }
        Stmt::VarDecl(decls)
    }

    fn one_decl(&mut self, is_const: bool) -> Decl {
        let (name, span) = self.expect_ident().unwrap_or_else(|| {
            self.step();
            (String::new(), self.prev_span())
        });
        let declared_ty = if self.skip(&TokenKind::Colon) {
            self.eval_type()
        } else {
            Type::Uninferred
        };
        let init = if self.skip(&TokenKind::Assign) {
            Some(self.expr())
        } else {
            if is_const {
                self.diags.report("const must initialize", self.cur_span());
            }
            None
        };
        Decl {
            name,
            span,
            declared_ty,
            init,
            is_const,
            var: None,
        }
    }

    fn fn_def(&mut self) -> Stmt {
        // fn <T, U> name(...)
        let mut typevars = Vec::new();
        if self.skip(&TokenKind::Lt) {
            let mut first = true;
            while !self.skip(&TokenKind::Gt) {
                if self.at(&TokenKind::End) {
                    self.diags.report("expected `>`", self.prev_span());
                    break;
                }
                if !first {
                    self.expect(&TokenKind::Comma);
                }
                first = false;
                if let Some((name, _)) = self.expect_ident() {
                    typevars.push(name);
                } else {
                    self.step();
                }
            }
        }

        let span = self.cur_span();
        let (name, op) = if let TokenKind::BackquoteOp(op) = self.cur_kind() {
            let op = *op;
            self.step();
            (op.to_string(), Some(op))
        } else {
            match self.expect_ident() {
                Some((name, _)) => (name, None),
                None => (String::new(), None),
            }
        };

        let params = self.param_list();

        let ret = if self.skip(&TokenKind::Colon) {
            Some(self.eval_type())
        } else {
            None
        };

        let body = if self.at(&TokenKind::Lbrace) {
            FnBody::Block(self.block_contents())
        } else if self.skip(&TokenKind::Assign) {
            let e = self.expr();
            self.expect(&TokenKind::Semicolon);
            FnBody::Expr(Box::new(e))
        } else {
            self.diags.report(
                format!("expected `{{` or `=`, found `{}`", self.cur_kind().describe()),
                self.cur_span(),
            );
            FnBody::Block(Vec::new())
        };

        Stmt::FnDef(FnDef {
            name,
            span,
            op,
            typevars,
            params,
            ret,
            body,
            var: None,
            nlvars: 0,
            tail_value: false,
        })
    }

    /// Parses `(a, b: int, c: float)`, flattening grouped names so each
    /// parameter carries its own type.
    fn param_list(&mut self) -> Vec<Param> {
        let mut params = Vec::new();
        if !self.expect(&TokenKind::Lparen) {
            return params;
        }
        if self.skip(&TokenKind::Rparen) {
            return params;
        }
        loop {
            let mut group = Vec::new();
            match self.expect_ident() {
                Some(pair) => group.push(pair),
                None => {
                    self.step();
                }
            }
            if self.skip(&TokenKind::Comma) {
                loop {
                    match self.expect_ident() {
                        Some(pair) => group.push(pair),
                        None => self.step(),
                    }
                    if self.at(&TokenKind::Colon) || self.at(&TokenKind::End) {
                        break;
                    }
                    self.expect(&TokenKind::Comma);
                }
            }
            self.expect(&TokenKind::Colon);
            let ty = self.eval_type();
            for (name, span) in group {
                params.push(Param {
                    name,
                    span,
                    ty: ty.clone(),
                });
            }
            if self.skip(&TokenKind::Rparen) {
                return params;
            }
            if !self.expect(&TokenKind::Comma) {
                return params;
            }
        }
    }

    fn object_def(&mut self) -> Stmt {
        let (name, span) = self.expect_ident().unwrap_or_else(|| {
            self.step();
            (String::new(), self.prev_span())
        });
        self.expect(&TokenKind::Lbrace);
        let mut fields = Vec::new();
        if self.skip(&TokenKind::Rbrace) {
            return Stmt::ObjectDef {
                name,
                span,
                fields,
                struct_id: None,
            };
        }
        loop {
            if let Some((fname, fspan)) = self.expect_ident() {
                self.expect(&TokenKind::Colon);
                let ty = self.eval_type();
                fields.push((fname, fspan, ty));
            } else {
                self.step();
            }
            if self.skip(&TokenKind::Rbrace) {
                break;
            }
            if !self.expect(&TokenKind::Comma) {
                break;
            }
        }
        Stmt::ObjectDef {
            name,
            span,
            fields,
            struct_id: None,
        }
    }

    fn import_stmt(&mut self) -> Stmt {
        let Some((name, span)) = self.expect_ident() else {
            self.skip(&TokenKind::Semicolon);
            return Stmt::None;
        };
        self.expect(&TokenKind::Semicolon);

        if self.import_chain.iter().any(|m| *m == name) {
            self.diags.report(format!("import cycle through `{name}`"), span);
            return Stmt::None;
        }

        let lib_path = self.base_dir.join("lib").join(format!("{name}.mxc"));
        let local_path = self.base_dir.join(format!("{name}.mxc"));
        let source = std::fs::read_to_string(&lib_path)
            .or_else(|_| std::fs::read_to_string(&local_path));
        let Ok(source) = source else {
            self.diags.report(format!("lib {name}: not found"), span);
            return Stmt::None;
        };

        // Lex and parse the module with its own diagnostics sink, then fold
        // the reports back attributed to the module file.
        let module_file = lib_path.display().to_string();
        let mut module_diags = Diagnostics::new(&module_file);
        let tokens = lex::lex(&source, &mut module_diags);
        let mut sub = Parser {
            tokens: &tokens,
            pos: 0,
            base_dir: self.base_dir.clone(),
            import_chain: {
                let mut chain = self.import_chain.clone();
                chain.push(name);
                chain
            },
            diags: &mut module_diags,
        };
        let stmts = sub.program();
        for e in module_diags.errors() {
            self.diags.report_in(e.message.clone(), e.span, &module_file);
        }
        Stmt::NonScopeBlock(stmts)
    }

    // ========================================================================
    // Types
    // ========================================================================

    fn eval_type(&mut self) -> Type {
        let mut ty = if self.skip(&TokenKind::Lparen) {
            // tuple type (T, U, ...)
            let mut elems = Vec::new();
            loop {
                elems.push(self.eval_type());
                if self.skip(&TokenKind::Rparen) {
                    break;
                }
                if !self.expect(&TokenKind::Comma) {
                    break;
                }
            }
            Type::Tuple(elems)
        } else if self.skip(&TokenKind::TInt) {
            Type::Int
        } else if self.skip(&TokenKind::TUint) {
            Type::Uint
        } else if self.skip(&TokenKind::TBool) {
            Type::Bool
        } else if self.skip(&TokenKind::TString) {
            Type::Str
        } else if self.skip(&TokenKind::TChar) {
            Type::Char
        } else if self.skip(&TokenKind::TFloat) {
            Type::Float
        } else if self.skip(&TokenKind::TNone) {
            Type::None
        } else if self.skip(&TokenKind::Fn) {
            // fn(T, U): R
            self.expect(&TokenKind::Lparen);
            let mut params = Vec::new();
            if !self.skip(&TokenKind::Rparen) {
                loop {
                    params.push(self.eval_type());
                    if self.skip(&TokenKind::Rparen) {
                        break;
                    }
                    if !self.expect(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::Colon);
            let ret = self.eval_type();
            Type::function(params, ret)
        } else if let TokenKind::Ident(name) = self.cur_kind() {
            let name = name.clone();
            self.step();
            Type::Undefined(name)
        } else {
            self.diags.report(
                format!("expected type, found `{}`", self.cur_kind().describe()),
                self.cur_span(),
            );
            self.step();
            Type::Uninferred
        };

        // [T] suffix(es) build list types inside-out
        while self.skip2(&TokenKind::Lbracket, &TokenKind::Rbracket) {
            ty = Type::List(Box::new(ty));
        }

        if self.skip(&TokenKind::Question) {
            ty = Type::Optional(Box::new(ty));
        }
        ty
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expr(&mut self) -> Expr {
        self.expr_assign()
    }

    fn expr_assign(&mut self) -> Expr {
        let left = self.expr_logic_or();
        if self.at(&TokenKind::Assign) {
            self.step();
            let right = self.expr_assign();
            let span = left.span.merge(right.span);
            return Expr::new(
                ExprKind::Assign {
                    target: Box::new(left),
                    value: Box::new(right),
                },
                span,
            );
        }
        left
    }

    fn binary_level(
        &mut self,
        ops: &[(TokenKind, BinOp)],
        next: fn(&mut Self) -> Expr,
    ) -> Expr {
        let mut left = next(self);
        'outer: loop {
            for (kind, op) in ops {
                if self.at(kind) {
                    self.step();
                    let right = next(self);
                    let span = left.span.merge(right.span);
                    left = Expr::new(
                        ExprKind::Binary {
                            op: *op,
                            lhs: Box::new(left),
                            rhs: Box::new(right),
                            impl_var: None,
                        },
                        span,
                    );
                    continue 'outer;
                }
            }
            return left;
        }
    }

    fn expr_logic_or(&mut self) -> Expr {
        self.binary_level(
            &[(TokenKind::LogOr, BinOp::LogOr), (TokenKind::KOr, BinOp::LogOr)],
            Self::expr_logic_and,
        )
    }

    fn expr_logic_and(&mut self) -> Expr {
        self.binary_level(
            &[(TokenKind::LogAnd, BinOp::LogAnd), (TokenKind::KAnd, BinOp::LogAnd)],
            Self::expr_equality,
        )
    }

    fn expr_equality(&mut self) -> Expr {
        self.binary_level(
            &[(TokenKind::Eq, BinOp::Eq), (TokenKind::NotEq, BinOp::NotEq)],
            Self::expr_comp,
        )
    }

    fn expr_comp(&mut self) -> Expr {
        self.binary_level(
            &[
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::Lte, BinOp::Lte),
                (TokenKind::Gt, BinOp::Gt),
                (TokenKind::Gte, BinOp::Gte),
            ],
            Self::expr_bitshift,
        )
    }

    fn expr_bitshift(&mut self) -> Expr {
        self.binary_level(
            &[(TokenKind::Shl, BinOp::Shl), (TokenKind::Shr, BinOp::Shr)],
            Self::expr_add,
        )
    }

    fn expr_add(&mut self) -> Expr {
        self.binary_level(
            &[(TokenKind::Plus, BinOp::Add), (TokenKind::Minus, BinOp::Sub)],
            Self::expr_mul,
        )
    }

    fn expr_mul(&mut self) -> Expr {
        self.binary_level(
            &[
                (TokenKind::Asterisk, BinOp::Mul),
                (TokenKind::Slash, BinOp::Div),
                (TokenKind::Percent, BinOp::Mod),
            ],
            Self::expr_unary,
        )
    }

    fn expr_unary(&mut self) -> Expr {
        let op = match self.cur_kind() {
            TokenKind::Inc => UnaryOp::Inc,
            TokenKind::Dec => UnaryOp::Dec,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.expr_postfix(),
        };
        let start = self.cur_span();
        self.step();
        let operand = self.expr_unary();
        let span = start.merge(operand.span);
        Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        )
    }

    fn expr_postfix(&mut self) -> Expr {
        let mut left = self.expr_primary();
        loop {
            if self.at(&TokenKind::Dot) {
                self.step();
                if self.at(&TokenKind::Failure) {
                    let span = self.cur_span();
                    self.step();
                    self.diags
                        .report("FAILURE block is only allowed on a call expression", span);
                    let _ = self.typed_block();
                    continue;
                }
                let Some((name, name_span)) = self.expect_ident() else {
                    self.step();
                    continue;
                };
                if self.skip(&TokenKind::Lparen) {
                    // method-call sugar: the receiver becomes the first argument
                    let mut args = vec![left];
                    let mut first = true;
                    while !self.skip(&TokenKind::Rparen) {
                        if self.at(&TokenKind::End) {
                            self.diags.report("expected `)`", self.prev_span());
                            break;
                        }
                        if !first {
                            self.expect(&TokenKind::Comma);
                        }
                        first = false;
                        args.push(self.expr());
                    }
                    let span = args[0].span.merge(self.prev_span());
                    left = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(Expr::new(ExprKind::Ident(name), name_span)),
                            args,
                            failure: None,
                            target: crate::ast::CallTarget::Unresolved,
                        },
                        span,
                    );
                } else {
                    let span = left.span.merge(name_span);
                    left = Expr::new(
                        ExprKind::Member {
                            target: Box::new(left),
                            field: name,
                            field_span: name_span,
                            resolved: MemberKind::Unresolved,
                        },
                        span,
                    );
                }
            } else if self.at(&TokenKind::Lbracket) {
                self.step();
                let index = self.expr();
                self.expect(&TokenKind::Rbracket);
                let span = left.span.merge(self.prev_span());
                left = Expr::new(
                    ExprKind::Subscript {
                        target: Box::new(left),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.skip(&TokenKind::Lparen) {
                let mut args = Vec::new();
                if !self.skip(&TokenKind::Rparen) {
                    loop {
                        args.push(self.expr());
                        if self.skip(&TokenKind::Rparen) {
                            break;
                        }
                        if !self.expect(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let mut failure = None;
                if self.skip2(&TokenKind::Dot, &TokenKind::Failure) {
                    failure = Some(Box::new(self.typed_block()));
                }
                let span = left.span.merge(self.prev_span());
                left = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(left),
                        args,
                        failure,
                        target: crate::ast::CallTarget::Unresolved,
                    },
                    span,
                );
            } else {
                return left;
            }
        }
    }

    fn typed_block(&mut self) -> Expr {
        let start = self.cur_span();
        let stmts = self.block_contents();
        let span = start.merge(self.prev_span());
        Expr::new(ExprKind::TypedBlock(stmts), span)
    }

    /// Expression-form `if`: branches are typed blocks or bare expressions,
    /// and `else` is required for the expression to have a type.
    fn if_expr(&mut self, start: Span) -> Expr {
        let cond = self.expr();
        let then_branch = if self.at(&TokenKind::Lbrace) {
            self.typed_block()
        } else {
            self.expr()
        };
        let else_branch = if self.skip(&TokenKind::Else) {
            if self.at(&TokenKind::If) {
                let else_start = self.cur_span();
                self.step();
                self.if_expr(else_start)
            } else if self.at(&TokenKind::Lbrace) {
                self.typed_block()
            } else {
                self.expr()
            }
        } else {
            self.diags.report("if expression requires an else branch", start);
            Expr::none(start)
        };
        let span = start.merge(self.prev_span());
        Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            span,
        )
    }

    /// `new Name { field: expr, ... }`
    fn struct_lit(&mut self, start: Span) -> Expr {
        let Some((type_name, _)) = self.expect_ident() else {
            return Expr::none(start);
        };
        self.expect(&TokenKind::Lbrace);
        let mut inits = Vec::new();
        if !self.skip(&TokenKind::Rbrace) {
            loop {
                let Some((name, name_span)) = self.expect_ident() else {
                    self.step();
                    if self.at(&TokenKind::End) {
                        break;
                    }
                    continue;
                };
                self.expect(&TokenKind::Colon);
                let value = self.expr();
                inits.push(FieldInit {
                    name,
                    name_span,
                    value,
                });
                if self.skip(&TokenKind::Rbrace) {
                    break;
                }
                if !self.expect(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let span = start.merge(self.prev_span());
        Expr::new(
            ExprKind::StructLit {
                type_name,
                inits,
                struct_id: None,
                field_map: Vec::new(),
            },
            span,
        )
    }

    fn expr_primary(&mut self) -> Expr {
        let span = self.cur_span();
        match self.cur_kind().clone() {
            TokenKind::True => {
                self.step();
                Expr::new(ExprKind::Bool(true), span)
            }
            TokenKind::False => {
                self.step();
                Expr::new(ExprKind::Bool(false), span)
            }
            TokenKind::New => {
                self.step();
                self.struct_lit(span)
            }
            TokenKind::If => {
                self.step();
                self.if_expr(span)
            }
            TokenKind::Ident(name) => {
                self.step();
                Expr::new(ExprKind::Ident(name), span)
            }
            TokenKind::Int(n) => {
                self.step();
                Expr::new(ExprKind::Int(n), span)
            }
            TokenKind::Float(f) => {
                self.step();
                Expr::new(ExprKind::Float(f), span)
            }
            TokenKind::Str(s) => {
                self.step();
                Expr::new(ExprKind::Str(s), span)
            }
            TokenKind::Char(c) => {
                self.step();
                Expr::new(ExprKind::Char(c), span)
            }
            TokenKind::Lparen => {
                self.step();
                if self.skip(&TokenKind::Rparen) {
                    return Expr::none(span);
                }
                let first = self.expr();
                if self.skip(&TokenKind::Comma) {
                    // tuple literal
                    let mut elems = vec![first];
                    loop {
                        elems.push(self.expr());
                        if self.skip(&TokenKind::Rparen) {
                            break;
                        }
                        if !self.expect(&TokenKind::Comma) {
                            break;
                        }
                    }
                    let full = span.merge(self.prev_span());
                    return Expr::new(ExprKind::Tuple(elems), full);
                }
                self.expect(&TokenKind::Rparen);
                first
            }
            TokenKind::Lbracket => {
                self.step();
                let mut elems = Vec::new();
                if !self.skip(&TokenKind::Rbracket) {
                    loop {
                        elems.push(self.expr());
                        if self.skip(&TokenKind::Rbracket) {
                            break;
                        }
                        if !self.expect(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let full = span.merge(self.prev_span());
                Expr::new(ExprKind::List(elems), full)
            }
            TokenKind::Semicolon => {
                self.step();
                Expr::none(span)
            }
            other => {
                self.diags
                    .report(format!("syntax error at `{}`", other.describe()), span);
                self.step();
                Expr::none(span)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn parse_ok(source: &str) -> Vec<Stmt> {
        let mut diags = Diagnostics::new("test.mxc");
        let tokens = lex::lex(source, &mut diags);
        let stmts = parse(&tokens, Path::new("."), &mut diags);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags}");
        stmts
    }

    fn parse_err(source: &str) -> Diagnostics {
        let mut diags = Diagnostics::new("test.mxc");
        let tokens = lex::lex(source, &mut diags);
        let _ = parse(&tokens, Path::new("."), &mut diags);
        assert!(!diags.is_empty(), "expected diagnostics");
        diags
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let stmts = parse_ok("let a = 1 + 2 * 3;");
        let Stmt::VarDecl(decls) = &stmts[0] else {
            panic!("expected decl")
        };
        let init = decls[0].init.as_ref().unwrap();
        let ExprKind::Binary { op: BinOp::Add, rhs, .. } = &init.kind else {
            panic!("expected + at the top")
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn assignment_is_right_associative() {
        let stmts = parse_ok("a = b = 1;");
        let Stmt::Expr(e) = &stmts[0] else { panic!("expected expr") };
        let ExprKind::Assign { value, .. } = &e.kind else {
            panic!("expected assign")
        };
        assert!(matches!(value.kind, ExprKind::Assign { .. }));
    }

    #[test]
    fn method_call_sugar_inserts_receiver() {
        let stmts = parse_ok("a.push(1);");
        let Stmt::Expr(e) = &stmts[0] else { panic!("expected expr") };
        let ExprKind::Call { args, callee, .. } = &e.kind else {
            panic!("expected call")
        };
        assert_eq!(args.len(), 2);
        assert!(matches!(&callee.kind, ExprKind::Ident(n) if n == "push"));
        assert!(matches!(&args[0].kind, ExprKind::Ident(n) if n == "a"));
    }

    #[test]
    fn failure_block_attaches_to_call() {
        let stmts = parse_ok("let r = div(10, 0).FAILURE { -1 };");
        let Stmt::VarDecl(decls) = &stmts[0] else { panic!("expected decl") };
        let ExprKind::Call { failure, .. } = &decls[0].init.as_ref().unwrap().kind else {
            panic!("expected call")
        };
        assert!(failure.is_some());
    }

    #[test]
    fn grouped_params_share_a_type() {
        let stmts = parse_ok("fn f(a, b: int, c: float): int = 0;");
        let Stmt::FnDef(def) = &stmts[0] else { panic!("expected fn") };
        assert_eq!(def.params.len(), 3);
        assert_eq!(def.params[0].ty, Type::Int);
        assert_eq!(def.params[1].ty, Type::Int);
        assert_eq!(def.params[2].ty, Type::Float);
    }

    #[test]
    fn list_type_suffix_nests() {
        let stmts = parse_ok("let x: int[][] = [[1]];");
        let Stmt::VarDecl(decls) = &stmts[0] else { panic!("expected decl") };
        assert_eq!(
            decls[0].declared_ty,
            Type::List(Box::new(Type::List(Box::new(Type::Int))))
        );
    }

    #[test]
    fn optional_type_suffix() {
        let stmts = parse_ok("fn d(a: int): int? = a;");
        let Stmt::FnDef(def) = &stmts[0] else { panic!("expected fn") };
        assert_eq!(def.ret, Some(Type::Optional(Box::new(Type::Int))));
    }

    #[test]
    fn if_expression_with_block_branches() {
        let stmts = parse_ok("fn f(n: int): int = if n < 2 { n } else { n + 1 };");
        let Stmt::FnDef(def) = &stmts[0] else { panic!("expected fn") };
        let FnBody::Expr(body) = &def.body else { panic!("expected expr body") };
        assert!(matches!(body.kind, ExprKind::If { .. }));
    }

    #[test]
    fn operator_definition_carries_the_op() {
        let stmts = parse_ok("fn `+`(a: bool, b: bool): bool = a || b;");
        let Stmt::FnDef(def) = &stmts[0] else { panic!("expected fn") };
        assert_eq!(def.op, Some(BinOp::Add));
    }

    #[test]
    fn missing_semicolon_is_reported() {
        let diags = parse_err("let a = 1");
        assert!(diags.has_message("expected `;`"));
    }

    #[test]
    fn break_statement_parses() {
        let stmts = parse_ok("while true { break; }");
        let Stmt::While { body, .. } = &stmts[0] else { panic!("expected while") };
        let Stmt::Block(inner) = body.as_ref() else { panic!("expected block") };
        assert!(matches!(inner[0], Stmt::Break { .. }));
    }
}
