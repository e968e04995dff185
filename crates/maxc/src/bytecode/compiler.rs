//! The AST-to-bytecode compiler.
//!
//! Walks the analyzed tree and emits through [`CodeBuilder`]. Every
//! expression leaves exactly one value on the operand stack; the `use_ret`
//! flag appends a balancing `Pop` when a statement discards it. Function
//! definitions compile into the shared literal pool, nested via a stack of
//! builders; `break` labels collect per loop and patch at the loop end.
//!
//! `print`/`println` arguments get a `Show` opcode per compile-time type so
//! the VM renders primitives without runtime type questions, and a call's
//! `.FAILURE { ... }` block lowers to `Call` + `JmpNoErr` over the inlined
//! handler.

use super::{
    builder::{CodeBuilder, JumpLabel},
    code::{Code, ConstPool, Function},
    op::Opcode,
};
use crate::{
    ast::{CallTarget, Expr, ExprKind, FnBody, FnDef, MemberKind, Stmt, VarId, VarInfo},
    builtins::Builtin,
    intern::Interns,
    operators::{BinOp, UnaryOp},
    types::Type,
};

/// Shared emission state: the analyzed variable arena, the interner, and the
/// unit-wide literal pool.
#[derive(Debug)]
pub struct EmitCtx<'a> {
    pub vars: &'a [VarInfo],
    pub interns: &'a mut Interns,
    pub pool: &'a mut ConstPool,
}

/// Compiles a program for one-shot execution.
pub fn compile_program(stmts: &[Stmt], ctx: &mut EmitCtx<'_>) -> Code {
    compile(stmts, ctx, false)
}

/// Compiles a REPL submission. With `echo_last`, the final expression
/// statement keeps its value on the stack for the session to display.
pub fn compile_repl(stmts: &[Stmt], ctx: &mut EmitCtx<'_>, echo_last: bool) -> Code {
    compile(stmts, ctx, echo_last)
}

fn compile(stmts: &[Stmt], ctx: &mut EmitCtx<'_>, echo_last: bool) -> Code {
    let mut compiler = Compiler {
        ctx,
        fns: vec![FnFrame::default()],
    };
    let last = stmts.len().checked_sub(1);
    for (i, stmt) in stmts.iter().enumerate() {
        if echo_last && Some(i) == last {
            if let Stmt::Expr(e) = stmt {
                compiler.gen_expr(e, true);
                continue;
            }
        }
        compiler.gen_stmt(stmt);
    }
    compiler.builder().emit(Opcode::End);
    let frame = compiler.fns.pop().expect("compiler function stack is never empty");
    frame.builder.build(0)
}

/// Per-loop break bookkeeping.
#[derive(Debug)]
struct LoopInfo {
    /// `for` loops keep their iterator on the stack; `break` must drop it.
    is_for: bool,
    breaks: Vec<JumpLabel>,
}

/// Builder state for one function nesting level.
#[derive(Debug, Default)]
struct FnFrame {
    builder: CodeBuilder,
    loops: Vec<LoopInfo>,
}

struct Compiler<'a, 'b> {
    ctx: &'a mut EmitCtx<'b>,
    fns: Vec<FnFrame>,
}

impl Compiler<'_, '_> {
    fn builder(&mut self) -> &mut CodeBuilder {
        &mut self.fns.last_mut().expect("compiler function stack is never empty").builder
    }

    fn emit_store(&mut self, var: VarId) {
        let info = &self.ctx.vars[var.index()];
        let (op, slot) = if info.is_global {
            (Opcode::StoreGlobal, info.slot)
        } else {
            (Opcode::StoreLocal, info.slot)
        };
        self.builder().emit_u16(op, slot);
    }

    fn emit_load(&mut self, var: VarId) {
        let info = &self.ctx.vars[var.index()];
        let (op, slot) = if info.is_global {
            (Opcode::LoadGlobal, info.slot)
        } else {
            (Opcode::LoadLocal, info.slot)
        };
        self.builder().emit_u16(op, slot);
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn gen_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => self.gen_expr(e, false),
            Stmt::Block(stmts) | Stmt::NonScopeBlock(stmts) => {
                for s in stmts {
                    self.gen_stmt(s);
                }
            }
            Stmt::If { cond, then_s, else_s } => {
                self.gen_expr(cond, true);
                let jf = self.builder().emit_jump(Opcode::JmpIfFalse);
                self.gen_stmt(then_s);
                match else_s {
                    Some(else_s) => {
                        let jend = self.builder().emit_jump(Opcode::Jmp);
                        self.builder().patch_jump(jf);
                        self.gen_stmt(else_s);
                        self.builder().patch_jump(jend);
                    }
                    None => self.builder().patch_jump(jf),
                }
            }
            Stmt::While { cond, body } => {
                let begin = self.builder().current_offset();
                self.gen_expr(cond, true);
                let jf = self.builder().emit_jump(Opcode::JmpIfFalse);
                self.push_loop(false);
                self.gen_stmt(body);
                self.builder().emit_jump_to(Opcode::Jmp, begin);
                self.builder().patch_jump(jf);
                self.patch_loop_breaks();
            }
            Stmt::For { var, iter, body, .. } => {
                let var = var.expect("for loop variable resolved by analysis");
                self.gen_expr(iter, true);
                let begin = self.builder().current_offset();
                let exit = self.builder().emit_jump(Opcode::IterNext);
                self.emit_store(var);
                self.push_loop(true);
                self.gen_stmt(body);
                self.builder().emit_jump_to(Opcode::Jmp, begin);
                self.builder().patch_jump(exit);
                self.patch_loop_breaks();
                // the exhausted IterNext popped the iterator
                self.builder().adjust_stack_depth(-1);
            }
            Stmt::Return { value, .. } => {
                self.gen_expr(value, true);
                self.builder().emit(Opcode::Ret);
            }
            Stmt::Break { .. } => {
                let frame = self.fns.last_mut().expect("compiler function stack is never empty");
                let is_for = frame
                    .loops
                    .last()
                    .expect("break outside a loop survived analysis")
                    .is_for;
                if is_for {
                    self.builder().emit(Opcode::Pop);
                }
                let label = self.builder().emit_jump(Opcode::Jmp);
                self.fns
                    .last_mut()
                    .expect("compiler function stack is never empty")
                    .loops
                    .last_mut()
                    .expect("break outside a loop survived analysis")
                    .breaks
                    .push(label);
            }
            Stmt::VarDecl(decls) => {
                for decl in decls {
                    if let Some(init) = &decl.init {
                        self.gen_expr(init, true);
                        self.emit_store(decl.var.expect("declaration resolved by analysis"));
                    }
                }
            }
            Stmt::FnDef(def) => {
                let idx = self.compile_function(def);
                self.builder().emit_u32(Opcode::FunctionSet, idx);
                self.emit_store(def.var.expect("function resolved by analysis"));
            }
            Stmt::ObjectDef { .. } | Stmt::None => {}
        }
    }

    fn push_loop(&mut self, is_for: bool) {
        self.fns
            .last_mut()
            .expect("compiler function stack is never empty")
            .loops
            .push(LoopInfo {
                is_for,
                breaks: Vec::new(),
            });
    }

    fn patch_loop_breaks(&mut self) {
        let info = self
            .fns
            .last_mut()
            .expect("compiler function stack is never empty")
            .loops
            .pop()
            .expect("loop stack underflow");
        for label in info.breaks {
            self.builder().patch_jump(label);
        }
    }

    /// Compiles a function body into the pool, returning its pool index.
    ///
    /// The prologue stores the arguments into slots in reverse index order so
    /// the first argument lands in slot 0. A block body falls off its end
    /// returning null unless its tail expression is the result; an
    /// expression body returns its value.
    fn compile_function(&mut self, def: &FnDef) -> u32 {
        self.fns.push(FnFrame::default());
        let nparams = u16::try_from(def.params.len()).expect("too many parameters");

        // the caller left the arguments on this frame's stack region
        self.builder().set_stack_depth(nparams);
        for slot in (0..nparams).rev() {
            self.builder().emit_u16(Opcode::StoreLocal, slot);
        }

        match &def.body {
            FnBody::Expr(body) => {
                self.gen_expr(body, true);
                self.builder().emit(Opcode::Ret);
            }
            FnBody::Block(stmts) => {
                let last = stmts.len().checked_sub(1);
                for (i, stmt) in stmts.iter().enumerate() {
                    if def.tail_value && Some(i) == last {
                        if let Stmt::Expr(e) = stmt {
                            self.gen_expr(e, true);
                            continue;
                        }
                    }
                    self.gen_stmt(stmt);
                }
                if !def.tail_value {
                    self.builder().emit(Opcode::PushNull);
                }
                self.builder().emit(Opcode::Ret);
            }
        }

        let frame = self.fns.pop().expect("compiler function stack is never empty");
        let code = frame.builder.build(def.nlvars);
        let name = self.ctx.interns.intern(&def.name);
        self.ctx.pool.add_function(Function {
            name,
            nparams,
            code,
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn gen_expr(&mut self, e: &Expr, use_ret: bool) {
        match &e.kind {
            ExprKind::Int(n) => {
                self.emit_int(*n);
                self.discard_unless(use_ret);
            }
            ExprKind::Float(f) => {
                let idx = self.ctx.pool.add_float(*f);
                self.builder().emit_u32(Opcode::FPush, idx);
                self.discard_unless(use_ret);
            }
            ExprKind::Bool(b) => {
                self.builder()
                    .emit(if *b { Opcode::PushTrue } else { Opcode::PushFalse });
                self.discard_unless(use_ret);
            }
            ExprKind::Char(c) => {
                self.builder().emit_u32(Opcode::CPush, *c as u32);
                self.discard_unless(use_ret);
            }
            ExprKind::Str(s) => {
                let sid = self.ctx.interns.intern(s);
                let idx = self.ctx.pool.add_str(sid);
                self.builder().emit_u32(Opcode::StrPush, idx);
                self.discard_unless(use_ret);
            }
            ExprKind::List(elems) => {
                for elem in elems.iter().rev() {
                    self.gen_expr(elem, true);
                }
                let n = u16::try_from(elems.len()).expect("list literal too long");
                self.builder().emit_u16(Opcode::ListSet, n);
                self.discard_unless(use_ret);
            }
            ExprKind::Tuple(elems) => {
                for elem in elems.iter().rev() {
                    self.gen_expr(elem, true);
                }
                let n = u16::try_from(elems.len()).expect("tuple literal too long");
                self.builder().emit_u16(Opcode::TupleSet, n);
                self.discard_unless(use_ret);
            }
            ExprKind::Subscript { target, index } => {
                self.gen_expr(index, true);
                self.gen_expr(target, true);
                self.builder().emit(Opcode::Subscr);
                self.discard_unless(use_ret);
            }
            ExprKind::StructLit {
                inits, field_map, ..
            } => {
                for &init_idx in field_map.iter().rev() {
                    self.gen_expr(&inits[usize::from(init_idx)].value, true);
                }
                let n = u16::try_from(field_map.len()).expect("too many struct fields");
                self.builder().emit_u16(Opcode::StructSet, n);
                self.discard_unless(use_ret);
            }
            ExprKind::Binary {
                op,
                lhs,
                rhs,
                impl_var,
            } => {
                if let Some(impl_var) = impl_var {
                    // overloaded operator: call the implementing function
                    self.gen_expr(lhs, true);
                    self.gen_expr(rhs, true);
                    self.emit_load(*impl_var);
                    self.builder().emit(Opcode::Call);
                    self.builder().adjust_stack_depth(-2);
                } else {
                    self.gen_expr(lhs, true);
                    self.gen_expr(rhs, true);
                    let opcode = binary_opcode(*op, &lhs.ty);
                    self.builder().emit(opcode);
                }
                self.discard_unless(use_ret);
            }
            ExprKind::Member { target, resolved, .. } => {
                self.gen_expr(target, true);
                match resolved {
                    MemberKind::ListLen => self.builder().emit(Opcode::ListLength),
                    MemberKind::Field(i) => self.builder().emit_u16(Opcode::MemberLoad, *i),
                    MemberKind::Unresolved => {
                        unreachable!("unresolved member access survived analysis")
                    }
                }
                self.discard_unless(use_ret);
            }
            ExprKind::Unary { op, operand } => {
                self.gen_expr(operand, true);
                let opcode = match op {
                    UnaryOp::Neg if matches!(operand.ty, Type::Float) => Opcode::FNeg,
                    UnaryOp::Neg => Opcode::INeg,
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::Inc => Opcode::Inc,
                    UnaryOp::Dec => Opcode::Dec,
                };
                self.builder().emit(opcode);
                self.discard_unless(use_ret);
            }
            ExprKind::Assign { target, value } => {
                self.gen_expr(value, true);
                match &target.kind {
                    ExprKind::Load(var) => self.emit_store(*var),
                    ExprKind::Subscript { target, index } => {
                        self.gen_expr(index, true);
                        self.gen_expr(target, true);
                        self.builder().emit(Opcode::SubscrStore);
                    }
                    ExprKind::Member { target, resolved, .. } => {
                        let MemberKind::Field(i) = resolved else {
                            unreachable!("unresolved member store survived analysis")
                        };
                        let i = *i;
                        self.gen_expr(target, true);
                        self.builder().emit_u16(Opcode::MemberStore, i);
                    }
                    _ => unreachable!("invalid assignment target survived analysis"),
                }
                if use_ret {
                    self.builder().emit(Opcode::PushNull);
                }
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.gen_expr(cond, true);
                let jf = self.builder().emit_jump(Opcode::JmpIfFalse);
                let depth = self.builder().stack_depth();
                self.gen_expr(then_branch, use_ret);
                let jend = self.builder().emit_jump(Opcode::Jmp);
                self.builder().patch_jump(jf);
                self.builder().set_stack_depth(depth);
                self.gen_expr(else_branch, use_ret);
                self.builder().patch_jump(jend);
            }
            ExprKind::TypedBlock(stmts) => {
                let last = stmts.len().checked_sub(1);
                let mut produced = false;
                for (i, stmt) in stmts.iter().enumerate() {
                    if Some(i) == last {
                        if let Stmt::Expr(e) = stmt {
                            self.gen_expr(e, use_ret);
                            produced = true;
                            continue;
                        }
                    }
                    self.gen_stmt(stmt);
                }
                if use_ret && !produced {
                    self.builder().emit(Opcode::PushNull);
                }
            }
            ExprKind::Load(var) => {
                self.emit_load(*var);
                self.discard_unless(use_ret);
            }
            ExprKind::Ident(name) => unreachable!("unresolved identifier `{name}` survived analysis"),
            ExprKind::Call { .. } => self.gen_call(e, use_ret),
            ExprKind::None => {
                if use_ret {
                    self.builder().emit(Opcode::PushNull);
                }
            }
        }
    }

    fn gen_call(&mut self, e: &Expr, use_ret: bool) {
        let ExprKind::Call {
            callee,
            args,
            failure,
            target,
        } = &e.kind
        else {
            return;
        };
        let nargs = args.len();
        match target {
            CallTarget::Builtin(b) => {
                if matches!(b, Builtin::Print | Builtin::Println) {
                    // reversed so the first argument pops first; each gets a
                    // format hint from its compile-time type
                    for arg in args.iter().rev() {
                        self.gen_expr(arg, true);
                        if let Some(show) = show_opcode(&arg.ty) {
                            self.builder().emit(show);
                        }
                    }
                } else {
                    for arg in args {
                        self.gen_expr(arg, true);
                    }
                }
                self.builder().emit_u8(Opcode::BltinFnSet, *b as u8);
                self.builder()
                    .emit_u8(Opcode::CallBltin, u8::try_from(nargs).expect("too many arguments"));
            }
            CallTarget::Native(id) => {
                for arg in args {
                    self.gen_expr(arg, true);
                }
                self.builder().emit_u32(Opcode::CFuncSet, id.0);
                self.builder().emit(Opcode::Call);
                self.builder()
                    .adjust_stack_depth(-i16::try_from(nargs).expect("too many arguments"));
            }
            CallTarget::Func(_) | CallTarget::Indirect => {
                for arg in args {
                    self.gen_expr(arg, true);
                }
                self.gen_expr(callee, true);
                self.builder().emit(Opcode::Call);
                self.builder()
                    .adjust_stack_depth(-i16::try_from(nargs).expect("too many arguments"));
            }
            CallTarget::Unresolved => unreachable!("unresolved call survived analysis"),
        }

        if let Some(fb) = failure {
            let over = self.builder().emit_jump(Opcode::JmpNoErr);
            // the handler receives the error value; it is consumed here and
            // the block produces the unwrapped result instead
            self.builder().emit(Opcode::Pop);
            self.gen_expr(fb, true);
            self.builder().patch_jump(over);
        }

        self.discard_unless(use_ret);
    }

    fn emit_int(&mut self, n: i64) {
        match n {
            0 => self.builder().emit(Opcode::PushConst0),
            1 => self.builder().emit(Opcode::PushConst1),
            2 => self.builder().emit(Opcode::PushConst2),
            3 => self.builder().emit(Opcode::PushConst3),
            _ => {
                if let Ok(small) = i32::try_from(n) {
                    self.builder().emit_i32(Opcode::IPush, small);
                } else {
                    let idx = self.ctx.pool.add_int(n);
                    self.builder().emit_u32(Opcode::LPush, idx);
                }
            }
        }
    }

    fn discard_unless(&mut self, use_ret: bool) {
        if !use_ret {
            self.builder().emit(Opcode::Pop);
        }
    }
}

/// Selects the opcode for a built-in binary operation from the operator and
/// the left operand's compile-time type.
fn binary_opcode(op: BinOp, lhs: &Type) -> Opcode {
    match lhs {
        Type::Float => match op {
            BinOp::Add => Opcode::FAdd,
            BinOp::Sub => Opcode::FSub,
            BinOp::Mul => Opcode::FMul,
            BinOp::Div => Opcode::FDiv,
            BinOp::Mod => Opcode::FMod,
            BinOp::Eq => Opcode::FEq,
            BinOp::NotEq => Opcode::FNotEq,
            BinOp::Lt => Opcode::FLt,
            BinOp::Lte => Opcode::FLte,
            BinOp::Gt => Opcode::FGt,
            BinOp::Gte => Opcode::FGte,
            BinOp::Shl | BinOp::Shr | BinOp::LogAnd | BinOp::LogOr => {
                unreachable!("no builtin float lowering for `{op}`")
            }
        },
        Type::Str => match op {
            BinOp::Add => Opcode::StrCat,
            _ => unreachable!("no builtin string lowering for `{op}`"),
        },
        Type::Bool => match op {
            BinOp::Eq => Opcode::Eq,
            BinOp::NotEq => Opcode::NotEq,
            BinOp::LogAnd => Opcode::LogAnd,
            BinOp::LogOr => Opcode::LogOr,
            _ => unreachable!("no builtin bool lowering for `{op}`"),
        },
        // int, uint and char share the immediate comparison family
        _ => match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Mod => Opcode::Mod,
            BinOp::Eq => Opcode::Eq,
            BinOp::NotEq => Opcode::NotEq,
            BinOp::Lt => Opcode::Lt,
            BinOp::Lte => Opcode::Lte,
            BinOp::Gt => Opcode::Gt,
            BinOp::Gte => Opcode::Gte,
            BinOp::Shl | BinOp::Shr | BinOp::LogAnd | BinOp::LogOr => {
                unreachable!("no builtin int lowering for `{op}`")
            }
        },
    }
}

/// The format-hint opcode for a primitive compile-time type, or `None` for
/// values the print builtin renders from their runtime representation.
fn show_opcode(ty: &Type) -> Option<Opcode> {
    match ty {
        Type::Int | Type::Uint => Some(Opcode::ShowInt),
        Type::Float => Some(Opcode::ShowFloat),
        Type::Bool => Some(Opcode::ShowBool),
        Type::Char => Some(Opcode::ShowChar),
        _ => None,
    }
}
