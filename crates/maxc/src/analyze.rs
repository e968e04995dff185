//! The semantic analyzer.
//!
//! One recursive walk over the parsed tree, mutating it in place: every
//! expression gets its type, identifier uses resolve to variable-arena ids,
//! calls select an overload, overloaded binaries record their implementing
//! function, and locals receive frame slots. Diagnostics accumulate and the
//! walk continues past them; the emitter only runs on a clean pass.
//!
//! The analyzer keeps two parallel structures, pushed and popped in lockstep
//! with block and function boundaries: the lexical scope stack (name
//! resolution, user-type tables) and the function-env stack (slot
//! numbering). The root of both persists across REPL submissions so globals,
//! functions and types defined on earlier lines stay visible.

use indexmap::IndexMap;

use crate::{
    ast::{
        Callable, CallTarget, Decl, Expr, ExprKind, FnBody, FnDef, FuncInfo, MemberKind, Stmt, VarId,
        VarInfo, VARATTR_CONST, VARATTR_UNINIT, VARATTR_USED,
    },
    builtins::Builtin,
    errors::Diagnostics,
    operators::{OpDef, OperatorTable, UnaryOp},
    token::Span,
    types::{self, StructDef, StructId, Type},
    vm::NativeId,
};

/// Result of one analysis pass.
#[derive(Debug, Clone, Copy)]
pub struct Analysis {
    /// Total global slot count, monotonic across REPL submissions.
    pub nglobals: u16,
    /// Whether the final top-level statement is an expression whose value the
    /// REPL should echo.
    pub last_is_expr: bool,
}

/// One lexical scope: declared variables in order, plus the user types
/// registered in it.
#[derive(Debug, Default)]
struct Scope {
    names: Vec<VarId>,
    types: Vec<StructId>,
    /// Function-env depth this scope belongs to, for capture detection.
    fn_depth: usize,
}

/// One function environment: the variables that receive slots in its frame.
#[derive(Debug, Default)]
struct FnEnv {
    vars: Vec<VarId>,
}

/// The analyzer. Keep one alive across submissions for REPL sessions.
#[derive(Debug)]
pub struct Analyzer {
    pub vars: Vec<VarInfo>,
    pub structs: Vec<StructDef>,
    pub ops: OperatorTable,
    scopes: Vec<Scope>,
    fnenvs: Vec<FnEnv>,
    /// Return types of the enclosing function definitions, innermost last.
    /// `Uninferred` entries are back-filled by the first `return`.
    fn_stack: Vec<Type>,
    /// Generic parameter names of the enclosing definitions.
    typevar_stack: Vec<Vec<String>>,
    loop_nest: u32,
    nglobals: u16,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    /// Creates an analyzer with the builtin table seeded into the root scope.
    #[must_use]
    pub fn new() -> Self {
        let mut analyzer = Self {
            vars: Vec::new(),
            structs: Vec::new(),
            ops: OperatorTable::with_builtins(),
            scopes: vec![Scope::default()],
            fnenvs: vec![FnEnv::default()],
            fn_stack: Vec::new(),
            typevar_stack: Vec::new(),
            loop_nest: 0,
            nglobals: 0,
        };
        for b in Builtin::ALL {
            let (params, ret) = b.signature();
            let id = analyzer.push_var(VarInfo {
                name: b.name().to_owned(),
                ty: Type::function(params, ret),
                slot: u16::MAX,
                is_global: true,
                attrs: 0,
                func: Some(FuncInfo {
                    param_vars: Vec::new(),
                    callable: Callable::Builtin(b),
                    typevars: Vec::new(),
                }),
            });
            analyzer.scopes[0].names.push(id);
        }
        analyzer
    }

    /// Registers a host native function in the root scope.
    pub fn register_native(&mut self, name: &str, params: Vec<Type>, ret: Type, id: NativeId) {
        let var = self.push_var(VarInfo {
            name: name.to_owned(),
            ty: Type::function(params, ret),
            slot: u16::MAX,
            is_global: true,
            attrs: 0,
            func: Some(FuncInfo {
                param_vars: Vec::new(),
                callable: Callable::Native(id),
                typevars: Vec::new(),
            }),
        });
        self.scopes[0].names.push(var);
    }

    /// Analyzes a program (or one REPL submission), returning the global
    /// slot count and whether the last statement is an echoable expression.
    pub fn analyze(&mut self, stmts: &mut [Stmt], diags: &mut Diagnostics) -> Analysis {
        for stmt in stmts.iter_mut() {
            self.visit_stmt(stmt, diags);
        }
        let last_is_expr = matches!(
            stmts.last(),
            Some(Stmt::Expr(e)) if !matches!(e.ty, Type::None) && !matches!(e.kind, ExprKind::None)
        );
        Analysis {
            nglobals: self.nglobals,
            last_is_expr,
        }
    }

    fn push_var(&mut self, info: VarInfo) -> VarId {
        let id = VarId(u32::try_from(self.vars.len()).expect("variable arena exceeds u32 range"));
        self.vars.push(info);
        id
    }

    fn var(&self, id: VarId) -> &VarInfo {
        &self.vars[id.index()]
    }

    fn var_mut(&mut self, id: VarId) -> &mut VarInfo {
        &mut self.vars[id.index()]
    }

    fn at_global_env(&self) -> bool {
        self.fnenvs.len() == 1
    }

    fn push_scope(&mut self) {
        self.scopes.push(Scope {
            fn_depth: self.fnenvs.len(),
            ..Scope::default()
        });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Declares a variable in the current scope and function env, assigning
    /// its slot.
    fn declare(&mut self, mut info: VarInfo) -> VarId {
        let is_global = self.at_global_env();
        info.is_global = is_global;
        info.slot = if is_global {
            let slot = self.nglobals;
            self.nglobals += 1;
            slot
        } else {
            u16::try_from(self.fnenvs.last().expect("fnenv stack is never empty").vars.len())
                .expect("too many locals in one function")
        };
        let id = self.push_var(info);
        self.fnenvs.last_mut().expect("fnenv stack is never empty").vars.push(id);
        self.scopes.last_mut().expect("scope stack is never empty").names.push(id);
        id
    }

    /// Resolves a name by walking the lexical scopes innermost-out. Returns
    /// the most recent binding.
    fn resolve_name(&self, name: &str) -> Option<VarId> {
        for scope in self.scopes.iter().rev() {
            for &id in scope.names.iter().rev() {
                if self.var(id).name == name {
                    return Some(id);
                }
            }
        }
        None
    }

    /// True when the variable is a local of an enclosing function rather
    /// than of the current one; those cannot be emitted (no closures).
    fn is_foreign_local(&self, id: VarId) -> bool {
        let var = self.var(id);
        if var.is_global {
            return false;
        }
        !self
            .fnenvs
            .last()
            .expect("fnenv stack is never empty")
            .vars
            .contains(&id)
    }

    fn find_struct(&self, name: &str) -> Option<StructId> {
        for scope in self.scopes.iter().rev() {
            for &id in scope.types.iter().rev() {
                if self.structs[id.index()].name == name {
                    return Some(id);
                }
            }
        }
        None
    }

    fn describe(&self, ty: &Type) -> String {
        ty.describe(&self.structs)
    }

    /// Rewrites `Undefined(name)` placeholders into struct or typevar types,
    /// recursing through containers. Unresolved names are a diagnostic and
    /// come back `Uninferred` to suppress cascading errors.
    fn resolved_type(&self, ty: &Type, span: Span, diags: &mut Diagnostics) -> Type {
        match ty {
            Type::Undefined(name) => {
                if self.typevar_stack.iter().any(|tvs| tvs.iter().any(|t| t == name)) {
                    return Type::TypeVar(name.clone());
                }
                match self.find_struct(name) {
                    Some(id) => Type::Struct(id),
                    None => {
                        diags.report(format!("undefined type: {name}"), span);
                        Type::Uninferred
                    }
                }
            }
            Type::List(elem) => Type::List(Box::new(self.resolved_type(elem, span, diags))),
            Type::Tuple(elems) => Type::Tuple(
                elems
                    .iter()
                    .map(|t| self.resolved_type(t, span, diags))
                    .collect(),
            ),
            Type::Optional(base) => Type::Optional(Box::new(self.resolved_type(base, span, diags))),
            Type::Function(f) => Type::function(
                f.params
                    .iter()
                    .map(|t| self.resolved_type(t, span, diags))
                    .collect(),
                self.resolved_type(&f.ret, span, diags),
            ),
            other => other.clone(),
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn visit_stmt(&mut self, stmt: &mut Stmt, diags: &mut Diagnostics) {
        match stmt {
            Stmt::Expr(e) => self.visit_expr(e, diags),
            Stmt::Block(stmts) => {
                self.push_scope();
                for s in stmts {
                    self.visit_stmt(s, diags);
                }
                self.pop_scope();
            }
            Stmt::NonScopeBlock(stmts) => {
                for s in stmts {
                    self.visit_stmt(s, diags);
                }
            }
            Stmt::If { cond, then_s, else_s } => {
                self.visit_expr(cond, diags);
                self.check_cond(cond, diags);
                self.visit_stmt(then_s, diags);
                if let Some(else_s) = else_s {
                    self.visit_stmt(else_s, diags);
                }
            }
            Stmt::While { cond, body } => {
                self.visit_expr(cond, diags);
                self.check_cond(cond, diags);
                self.loop_nest += 1;
                self.visit_stmt(body, diags);
                self.loop_nest -= 1;
            }
            Stmt::For {
                var_name, var, iter, body, ..
            } => self.visit_for(var_name, var, iter, body, diags),
            Stmt::Return { value, span } => self.visit_return(value, *span, diags),
            Stmt::Break { span } => {
                if self.loop_nest == 0 {
                    diags.report("break statement must be inside loop statement", *span);
                }
            }
            Stmt::VarDecl(decls) => {
                for decl in decls {
                    self.visit_decl(decl, diags);
                }
            }
            Stmt::FnDef(def) => self.visit_fndef(def, diags),
            Stmt::ObjectDef {
                name,
                fields,
                struct_id,
                ..
            } => self.visit_objectdef(name, fields, struct_id, diags),
            Stmt::None => {}
        }
    }

    fn check_cond(&self, cond: &Expr, diags: &mut Diagnostics) {
        if !types::checktype(&cond.ty, &Type::Bool) {
            diags.report(
                format!("condition must be bool, found {}", self.describe(&cond.ty)),
                cond.span,
            );
        }
    }

    fn visit_for(
        &mut self,
        var_name: &str,
        var: &mut Option<VarId>,
        iter: &mut Expr,
        body: &mut Stmt,
        diags: &mut Diagnostics,
    ) {
        self.visit_expr(iter, diags);
        let elem_ty = match &iter.ty {
            Type::List(elem) => (**elem).clone(),
            Type::Str => Type::Char,
            Type::Uninferred => Type::Uninferred,
            other => {
                diags.report(
                    format!("cannot iterate over {}", self.describe(other)),
                    iter.span,
                );
                Type::Uninferred
            }
        };

        self.push_scope();
        let id = self.declare(VarInfo {
            name: var_name.to_owned(),
            ty: elem_ty,
            slot: 0,
            is_global: false,
            attrs: 0,
            func: None,
        });
        *var = Some(id);

        self.loop_nest += 1;
        self.visit_stmt(body, diags);
        self.loop_nest -= 1;
        self.pop_scope();
    }

    fn visit_return(&mut self, value: &mut Expr, span: Span, diags: &mut Diagnostics) {
        self.visit_expr(value, diags);
        let actual = value.ty.clone();
        let Some(expected) = self.fn_stack.last_mut() else {
            diags.report("use of return statement outside function or block", span);
            return;
        };
        if matches!(expected, Type::Uninferred) {
            *expected = actual;
            return;
        }
        if !types::checktype_return(expected, &actual) {
            let expected = expected.clone();
            let msg = if matches!(expected, Type::Optional(_)) {
                format!("return type error: expected error, found {}", self.describe(&actual))
            } else {
                format!(
                    "type error: expected {}, found {}",
                    self.describe(&expected),
                    self.describe(&actual)
                )
            };
            diags.report(msg, span);
        }
    }

    fn visit_decl(&mut self, decl: &mut Decl, diags: &mut Diagnostics) {
        let mut ty = self.resolved_type(&decl.declared_ty, decl.span, diags);
        let mut attrs = 0;
        if decl.is_const {
            attrs |= VARATTR_CONST;
        }

        if let Some(init) = &mut decl.init {
            self.visit_expr(init, diags);
            if matches!(ty, Type::Uninferred) {
                ty = init.ty.clone();
            } else if !types::checktype(&ty, &init.ty) {
                diags.report(
                    format!("`{}` type is {}", decl.name, self.describe(&ty)),
                    init.span,
                );
            }
        } else {
            if matches!(ty, Type::Uninferred) {
                diags.report(
                    "must always be initialized when doing type inference",
                    decl.span,
                );
            }
            attrs |= VARATTR_UNINIT;
        }

        let id = self.declare(VarInfo {
            name: decl.name.clone(),
            ty,
            slot: 0,
            is_global: false,
            attrs,
            func: None,
        });
        decl.var = Some(id);
    }

    fn visit_fndef(&mut self, def: &mut FnDef, diags: &mut Diagnostics) {
        self.typevar_stack.push(def.typevars.clone());

        let param_tys: Vec<Type> = def
            .params
            .iter()
            .map(|p| self.resolved_type(&p.ty, p.span, diags))
            .collect();
        let ret_initial = match &def.ret {
            Some(t) => self.resolved_type(t, def.span, diags),
            None => match def.body {
                FnBody::Expr(_) => Type::Uninferred,
                FnBody::Block(_) => Type::None,
            },
        };

        // the function variable lands in the enclosing env so recursion and
        // later calls resolve to it
        let fn_var = self.declare(VarInfo {
            name: def.name.clone(),
            ty: Type::function(param_tys.clone(), ret_initial.clone()),
            slot: 0,
            is_global: false,
            attrs: 0,
            func: Some(FuncInfo {
                param_vars: Vec::new(),
                callable: Callable::User,
                typevars: def.typevars.clone(),
            }),
        });
        def.var = Some(fn_var);

        self.fnenvs.push(FnEnv::default());
        self.push_scope();

        let mut param_vars = Vec::with_capacity(def.params.len());
        for (param, ty) in def.params.iter().zip(&param_tys) {
            let id = self.declare(VarInfo {
                name: param.name.clone(),
                ty: ty.clone(),
                slot: 0,
                is_global: false,
                attrs: 0,
                func: None,
            });
            param_vars.push(id);
        }

        self.fn_stack.push(ret_initial);

        match &mut def.body {
            FnBody::Expr(body) => {
                self.visit_expr(body, diags);
                let expected = self.fn_stack.last_mut().expect("fn_stack pushed above");
                if matches!(expected, Type::Uninferred) {
                    *expected = body.ty.clone();
                } else if !types::checktype_return(expected, &body.ty) {
                    let expected = expected.clone();
                    diags.report(
                        format!(
                            "return type error: expected {}, found {}",
                            self.describe(&expected),
                            self.describe(&body.ty)
                        ),
                        body.span,
                    );
                }
            }
            FnBody::Block(stmts) => {
                for s in stmts.iter_mut() {
                    self.visit_stmt(s, diags);
                }
                // expression orientation: a block body whose final statement
                // is an expression of the declared return type yields it
                let expected = self.fn_stack.last().expect("fn_stack pushed above").clone();
                if !matches!(expected, Type::None | Type::Uninferred) {
                    if let Some(Stmt::Expr(tail)) = stmts.last() {
                        if types::checktype_return(&expected, &tail.ty) {
                            def.tail_value = true;
                        } else if !matches!(tail.ty, Type::None) {
                            diags.report(
                                format!(
                                    "type error: expected {}, found {}",
                                    self.describe(&expected),
                                    self.describe(&tail.ty)
                                ),
                                tail.span,
                            );
                        }
                    }
                }
            }
        }

        let ret_final = self.fn_stack.pop().expect("fn_stack pushed above");
        def.nlvars = u16::try_from(
            self.fnenvs.last().expect("fn env pushed above").vars.len(),
        )
        .expect("too many locals in one function");

        self.fnenvs.pop();
        self.pop_scope();
        self.typevar_stack.pop();

        {
            let var = self.var_mut(fn_var);
            var.ty = Type::function(param_tys.clone(), ret_final.clone());
            if let Some(func) = &mut var.func {
                func.param_vars = param_vars;
            }
        }

        if let Some(op) = def.op {
            if def.params.len() == 2 {
                let def_entry = OpDef {
                    op,
                    lhs: param_tys[0].clone(),
                    rhs: param_tys[1].clone(),
                    ret: ret_final,
                    impl_var: Some(fn_var),
                };
                if self.ops.register(def_entry).is_err() {
                    diags.report(format!("duplicate operator definition: `{op}`"), def.span);
                }
            } else {
                diags.report(
                    format!("operator `{op}` definition takes exactly 2 parameters"),
                    def.span,
                );
            }
        }
    }

    fn visit_objectdef(
        &mut self,
        name: &str,
        fields: &[(String, Span, Type)],
        struct_id: &mut Option<StructId>,
        diags: &mut Diagnostics,
    ) {
        // register the name first so fields may reference the type
        let id = StructId(u32::try_from(self.structs.len()).expect("struct arena exceeds u32 range"));
        self.structs.push(StructDef {
            name: name.to_owned(),
            fields: IndexMap::new(),
        });
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .types
            .push(id);

        let mut resolved = IndexMap::with_capacity(fields.len());
        for (fname, fspan, fty) in fields {
            let ty = self.resolved_type(fty, *fspan, diags);
            if resolved.insert(fname.clone(), ty).is_some() {
                diags.report(format!("duplicate field: {fname}"), *fspan);
            }
        }
        self.structs[id.index()].fields = resolved;
        *struct_id = Some(id);
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn visit_expr(&mut self, e: &mut Expr, diags: &mut Diagnostics) {
        match &mut e.kind {
            ExprKind::Int(_) => e.ty = Type::Int,
            ExprKind::Float(_) => e.ty = Type::Float,
            ExprKind::Bool(_) => e.ty = Type::Bool,
            ExprKind::Char(_) => e.ty = Type::Char,
            ExprKind::Str(_) => e.ty = Type::Str,
            ExprKind::None => e.ty = Type::None,
            ExprKind::List(elems) => {
                for elem in elems.iter_mut() {
                    self.visit_expr(elem, diags);
                }
                let base = match elems.first() {
                    Some(first) => {
                        let base = first.ty.clone();
                        for elem in elems.iter().skip(1) {
                            if !types::checktype(&base, &elem.ty) {
                                diags.report(
                                    format!(
                                        "list element type mismatch: expected {}, found {}",
                                        self.describe(&base),
                                        self.describe(&elem.ty)
                                    ),
                                    elem.span,
                                );
                            }
                        }
                        base
                    }
                    None => Type::Uninferred,
                };
                e.ty = Type::List(Box::new(base));
            }
            ExprKind::Tuple(elems) => {
                let mut tys = Vec::with_capacity(elems.len());
                for elem in elems.iter_mut() {
                    self.visit_expr(elem, diags);
                    tys.push(elem.ty.clone());
                }
                e.ty = Type::Tuple(tys);
            }
            ExprKind::Subscript { target, index } => {
                self.visit_expr(target, diags);
                self.visit_expr(index, diags);
                if !types::checktype(&index.ty, &Type::Int) {
                    diags.report(
                        format!("subscript index must be int, found {}", self.describe(&index.ty)),
                        index.span,
                    );
                }
                e.ty = match &target.ty {
                    Type::List(elem) => (**elem).clone(),
                    Type::Str => Type::Char,
                    Type::Uninferred => Type::Uninferred,
                    other => {
                        diags.report(
                            format!("cannot subscript {}", self.describe(other)),
                            target.span,
                        );
                        Type::Uninferred
                    }
                };
            }
            ExprKind::StructLit { .. } => self.visit_struct_lit(e, diags),
            ExprKind::Binary { .. } => self.visit_binary(e, diags),
            ExprKind::Member { .. } => self.visit_member(e, diags),
            ExprKind::Unary { op, operand } => {
                let op = *op;
                self.visit_expr(operand, diags);
                let ok = match op {
                    UnaryOp::Neg => matches!(operand.ty, Type::Int | Type::Float | Type::Uninferred),
                    UnaryOp::Not => matches!(operand.ty, Type::Bool | Type::Uninferred),
                    UnaryOp::Inc | UnaryOp::Dec => matches!(operand.ty, Type::Int | Type::Uninferred),
                };
                if !ok {
                    diags.report(
                        format!(
                            "undefined operation `{op}` on {}",
                            self.describe(&operand.ty)
                        ),
                        e.span,
                    );
                }
                e.ty = operand.ty.clone();
            }
            ExprKind::Assign { .. } => self.visit_assign(e, diags),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.visit_expr(cond, diags);
                self.visit_expr(then_branch, diags);
                self.visit_expr(else_branch, diags);
                if !types::checktype(&cond.ty, &Type::Bool) {
                    diags.report(
                        format!("condition must be bool, found {}", self.describe(&cond.ty)),
                        cond.span,
                    );
                }
                if !types::checktype(&then_branch.ty, &else_branch.ty) {
                    diags.report(
                        format!(
                            "if branches have mismatched types: {} and {}",
                            self.describe(&then_branch.ty),
                            self.describe(&else_branch.ty)
                        ),
                        e.span,
                    );
                }
                // the expression form takes the else branch's type
                e.ty = else_branch.ty.clone();
            }
            ExprKind::TypedBlock(stmts) => {
                self.push_scope();
                for s in stmts.iter_mut() {
                    self.visit_stmt(s, diags);
                }
                self.pop_scope();
                e.ty = match stmts.last() {
                    Some(Stmt::Expr(tail)) => tail.ty.clone(),
                    _ => Type::None,
                };
            }
            ExprKind::Ident(_) => self.visit_load(e, diags),
            ExprKind::Load(id) => {
                // already resolved (idempotent re-analysis)
                e.ty = self.var(*id).ty.clone();
            }
            ExprKind::Call { .. } => self.visit_call(e, diags),
        }
    }

    fn visit_load(&mut self, e: &mut Expr, diags: &mut Diagnostics) {
        let ExprKind::Ident(name) = &e.kind else { return };
        let name = name.clone();
        let Some(id) = self.resolve_name(&name) else {
            diags.report(format!("undeclared variable: {name}"), e.span);
            return;
        };
        let var = self.var(id);
        if let Some(func) = &var.func {
            if !matches!(func.callable, Callable::User) {
                diags.report(format!("builtin function `{name}` must be called"), e.span);
                return;
            }
        }
        if self.is_foreign_local(id) {
            diags.report(
                format!("cannot capture `{name}` from an enclosing function"),
                e.span,
            );
            return;
        }
        if var.has_attr(VARATTR_UNINIT) && !matches!(var.ty, Type::Struct(_)) {
            diags.report(format!("use of uninit variable: {name}"), e.span);
        }
        let ty = var.ty.clone();
        self.var_mut(id).set_attr(VARATTR_USED);
        e.kind = ExprKind::Load(id);
        e.ty = ty;
    }

    fn visit_assign(&mut self, e: &mut Expr, diags: &mut Diagnostics) {
        let ExprKind::Assign { target, value } = &mut e.kind else {
            return;
        };
        match &target.kind {
            ExprKind::Ident(name) => {
                let name = name.clone();
                match self.resolve_name(&name) {
                    Some(id) => {
                        if self.var(id).has_attr(VARATTR_CONST) {
                            diags.report(
                                format!("assignment of read-only variable: {name}"),
                                target.span,
                            );
                        }
                        if self.is_foreign_local(id) {
                            diags.report(
                                format!("cannot capture `{name}` from an enclosing function"),
                                target.span,
                            );
                        }
                        self.var_mut(id).clear_attr(VARATTR_UNINIT);
                        target.ty = self.var(id).ty.clone();
                        target.kind = ExprKind::Load(id);
                    }
                    None => {
                        diags.report(format!("undeclared variable: {name}"), target.span);
                    }
                }
            }
            ExprKind::Subscript { .. } | ExprKind::Member { .. } => {
                self.visit_expr(target, diags);
            }
            _ => {
                diags.report("left side of the expression is not valid", target.span);
            }
        }
        self.visit_expr(value, diags);
        if !types::checktype(&target.ty, &value.ty) {
            diags.report(
                format!(
                    "type mismatch in assignment: expected {}, found {}",
                    self.describe(&target.ty),
                    self.describe(&value.ty)
                ),
                value.span,
            );
        }
        e.ty = Type::None;
    }

    fn visit_binary(&mut self, e: &mut Expr, diags: &mut Diagnostics) {
        let ExprKind::Binary {
            op,
            lhs,
            rhs,
            impl_var,
        } = &mut e.kind
        else {
            return;
        };
        let op = *op;
        self.visit_expr(lhs, diags);
        self.visit_expr(rhs, diags);
        match self.ops.lookup(op, &lhs.ty, &rhs.ty) {
            Some(def) => {
                e.ty = def.ret.clone();
                *impl_var = def.impl_var;
            }
            None => {
                diags.report(
                    format!(
                        "undefined operation `{op}` between {} and {}",
                        self.describe(&lhs.ty),
                        self.describe(&rhs.ty)
                    ),
                    e.span,
                );
            }
        }
    }

    fn visit_member(&mut self, e: &mut Expr, diags: &mut Diagnostics) {
        let ExprKind::Member {
            target,
            field,
            field_span,
            resolved,
        } = &mut e.kind
        else {
            return;
        };
        self.visit_expr(target, diags);
        if matches!(target.ty, Type::List(_)) && field.as_str() == "len" {
            *resolved = MemberKind::ListLen;
            e.ty = Type::Int;
            return;
        }
        match &target.ty {
            Type::Struct(id) => {
                let def = &self.structs[id.index()];
                match def.field_index(field) {
                    Some(i) => {
                        e.ty = def.fields[i].clone();
                        *resolved = MemberKind::Field(
                            u16::try_from(i).expect("struct field count exceeds u16"),
                        );
                    }
                    None => {
                        diags.report(format!("no field: {field}"), *field_span);
                    }
                }
            }
            Type::Uninferred => {}
            other => {
                diags.report(
                    format!("{} has no field `{field}`", self.describe(other)),
                    *field_span,
                );
            }
        }
    }

    fn visit_struct_lit(&mut self, e: &mut Expr, diags: &mut Diagnostics) {
        let ExprKind::StructLit {
            type_name,
            inits,
            struct_id,
            field_map,
        } = &mut e.kind
        else {
            return;
        };
        let Some(id) = self.find_struct(type_name) else {
            diags.report(format!("undefined type: {type_name}"), e.span);
            for init in inits {
                self.visit_expr(&mut init.value, diags);
            }
            return;
        };
        *struct_id = Some(id);
        e.ty = Type::Struct(id);

        for init in inits.iter_mut() {
            self.visit_expr(&mut init.value, diags);
        }

        let def = self.structs[id.index()].clone();
        for init in inits.iter() {
            match def.fields.get(&init.name) {
                Some(field_ty) => {
                    if !types::checktype(field_ty, &init.value.ty) {
                        diags.report(
                            format!(
                                "field `{}` type is {}, found {}",
                                init.name,
                                self.describe(field_ty),
                                self.describe(&init.value.ty)
                            ),
                            init.value.span,
                        );
                    }
                }
                None => diags.report(format!("no field: {}", init.name), init.name_span),
            }
        }
        field_map.clear();
        for field_name in def.fields.keys() {
            match inits.iter().position(|init| init.name == *field_name) {
                Some(pos) => {
                    field_map.push(u16::try_from(pos).expect("struct field count exceeds u16"));
                }
                None => {
                    diags.report(format!("missing field: {field_name}"), e.span);
                    field_map.push(0);
                }
            }
        }
    }

    /// Overload selection per the scope chain, innermost match first:
    /// zero-arg callee matches a zero-arg call, a leading `AnyVararg`
    /// parameter matches anything, a leading `Any` requires exactly one
    /// argument, and otherwise arity plus pairwise structural equality.
    fn resolve_overload(
        &self,
        name: &str,
        argtys: &[Type],
        span: Span,
        diags: &mut Diagnostics,
    ) -> Option<VarId> {
        let mut saw_name = false;
        for scope in self.scopes.iter().rev() {
            for &id in &scope.names {
                let var = self.var(id);
                if var.name != name {
                    continue;
                }
                let Type::Function(fnty) = &var.ty else {
                    saw_name = true;
                    continue;
                };
                saw_name = true;
                let params = &fnty.params;
                if params.is_empty() {
                    if argtys.is_empty() {
                        return Some(id);
                    }
                    continue;
                }
                match params[0] {
                    Type::AnyVararg => return Some(id),
                    Type::Any => {
                        if argtys.len() == 1 {
                            return Some(id);
                        }
                        diags.report(
                            format!("the number of {name}() argument must be 1"),
                            span,
                        );
                        return None;
                    }
                    _ => {}
                }
                if params.len() == argtys.len()
                    && params.iter().zip(argtys).all(|(p, a)| types::checktype(p, a))
                {
                    return Some(id);
                }
            }
        }

        if saw_name {
            let rendered: Vec<String> = argtys.iter().map(|t| self.describe(t)).collect();
            diags.report(
                format!("no matching function: {name}({})", rendered.join(", ")),
                span,
            );
        } else {
            diags.report(format!("undeclared variable: {name}"), span);
        }
        None
    }

    fn visit_call(&mut self, e: &mut Expr, diags: &mut Diagnostics) {
        let span = e.span;
        let ExprKind::Call {
            callee,
            args,
            failure,
            target,
        } = &mut e.kind
        else {
            return;
        };

        let mut argtys = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            self.visit_expr(arg, diags);
            argtys.push(arg.ty.clone());
        }

        let mut ret_ty = Type::Uninferred;
        if let ExprKind::Ident(name) = &callee.kind {
            let name = name.clone();
            if let Some(id) = self.resolve_overload(&name, &argtys, span, diags) {
                let var = self.var(id);
                let Type::Function(fnty) = var.ty.clone() else {
                    unreachable!("overload resolution only returns function variables")
                };
                ret_ty = fnty.ret.clone();
                match var.func.as_ref().map(|f| f.callable) {
                    Some(Callable::Builtin(b)) => {
                        *target = CallTarget::Builtin(b);
                        if matches!(b, Builtin::Print | Builtin::Println) {
                            for arg in args.iter() {
                                if !arg.ty.is_show() {
                                    diags.report(
                                        format!(
                                            "type {} does not implement `Show`",
                                            self.describe(&arg.ty)
                                        ),
                                        arg.span,
                                    );
                                }
                            }
                        }
                    }
                    Some(Callable::Native(nid)) => *target = CallTarget::Native(nid),
                    _ => {
                        if self.is_foreign_local(id) {
                            diags.report(
                                format!("cannot capture `{name}` from an enclosing function"),
                                callee.span,
                            );
                        }
                        self.var_mut(id).set_attr(VARATTR_USED);
                        *target = CallTarget::Func(id);
                        callee.kind = ExprKind::Load(id);
                        callee.ty = self.var(id).ty.clone();
                    }
                }
            }
        } else {
            self.visit_expr(callee, diags);
            *target = CallTarget::Indirect;
            match callee.ty.clone() {
                Type::Function(fnty) => {
                    ret_ty = fnty.ret.clone();
                    if fnty.params.len() != argtys.len() {
                        diags.report(
                            format!(
                                "expected {} argument(s), found {}",
                                fnty.params.len(),
                                argtys.len()
                            ),
                            span,
                        );
                    } else {
                        for (i, (p, a)) in fnty.params.iter().zip(&argtys).enumerate() {
                            if !types::checktype(p, a) {
                                diags.report(
                                    format!(
                                        "argument {} type error: expected {}, found {}",
                                        i + 1,
                                        self.describe(p),
                                        self.describe(a)
                                    ),
                                    args[i].span,
                                );
                            }
                        }
                    }
                }
                Type::Uninferred => {}
                other => {
                    diags.report(
                        format!("{} is not callable", self.describe(&other)),
                        callee.span,
                    );
                }
            }
        }

        e.ty = ret_ty;

        if let Some(fb) = failure {
            if let Type::Optional(base) = e.ty.clone() {
                self.visit_expr(fb, diags);
                if !types::checktype(&base, &fb.ty) {
                    diags.report(
                        format!(
                            "failure block type error: expected {}, found {}",
                            self.describe(&base),
                            self.describe(&fb.ty)
                        ),
                        fb.span,
                    );
                }
                e.ty = (*base).clone();
            } else {
                diags.report(
                    "failure blocks are only allowed on optional-typed calls",
                    span,
                );
                self.visit_expr(fb, diags);
            }
        }
    }
}
