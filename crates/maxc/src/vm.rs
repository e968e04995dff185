//! The stack virtual machine.
//!
//! Execution walks a byte array with a cached (code, pc) pair that is synced
//! to the frame stack on calls, returns and unwinding. Arithmetic runs on
//! unboxed ints and floats; heap operations dispatch on the [`HeapData`]
//! variant. Frames share one operand stack, each owning the region above its
//! `stack_base`.
//!
//! Runtime errors unwind the frame chain: a frame whose resume point is a
//! `JmpNoErr` (the compiled shape of a `.FAILURE { ... }` block) receives
//! the error value on its stack and handles it; anything that reaches the
//! bottom of the chain aborts the run. The `error()` builtin instead sets
//! the pending-error flag and returns normally, which `Ret` propagates to
//! the caller — the two paths meet at the same `JmpNoErr`.
//!
//! Stack underflow, an invalid opcode byte, or a jump past the end of code
//! are internal bugs and panic; they cannot be produced by the compiler.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    builtins::Builtin,
    bytecode::{Code, Const, ConstPool, Function, Opcode},
    errors::{RunError, RunResult},
    heap::{Heap, HeapData},
    intern::Interns,
    io::PrintWriter,
    types::Type,
    value::{self, Value},
};

/// Index of a host-registered native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

impl NativeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A host native function. Arguments are borrowed; anything the native wants
/// to keep must be cloned through the heap. Errors propagate exactly like
/// `error("...")` raised at the call site.
pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, String>;

/// Registration record of one native function.
pub struct NativeDef {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish_non_exhaustive()
    }
}

/// Host native functions, dispatched by `CFuncSet` + `Call`.
#[derive(Debug, Default)]
pub struct NativeRegistry {
    defs: Vec<NativeDef>,
}

impl NativeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: NativeDef) -> NativeId {
        let id = NativeId(u32::try_from(self.defs.len()).expect("native registry exceeds u32 range"));
        self.defs.push(def);
        id
    }

    #[must_use]
    pub fn get(&self, id: NativeId) -> &NativeDef {
        &self.defs[id.index()]
    }
}

/// The persistent execution state: heap and global slots. The REPL keeps one
/// alive across submissions; one-shot runs tear it down at exit.
#[derive(Debug, Default)]
pub struct VmState {
    pub heap: Heap,
    pub globals: Vec<Value>,
}

impl VmState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grows the global array to `nglobals` slots, filling new ones with the
    /// uninitialized marker.
    pub fn grow_globals(&mut self, nglobals: u16) {
        while self.globals.len() < usize::from(nglobals) {
            self.globals.push(Value::Invalid);
        }
    }

    /// Releases every global, dropping heap references. The deterministic
    /// end-of-program cleanup point.
    pub fn teardown(&mut self) {
        for v in self.globals.drain(..) {
            v.drop_with_heap(&mut self.heap);
        }
    }
}

/// Code executed by a frame: the top-level program or a pooled function.
#[derive(Debug, Clone)]
enum FrameCode {
    Top(Arc<Code>),
    Func(Arc<Function>),
}

impl FrameCode {
    fn code(&self) -> &Code {
        match self {
            Self::Top(code) => code,
            Self::Func(f) => &f.code,
        }
    }
}

/// A per-call activation record.
#[derive(Debug)]
struct Frame {
    fc: FrameCode,
    /// Resume point; synced from the cached pc when a call is made.
    pc: usize,
    locals: Vec<Value>,
    /// The frame's region of the shared operand stack starts here.
    stack_base: usize,
    /// Message of a pending runtime error raised by `error()` or propagated
    /// by `Ret`; consumed by `JmpNoErr`.
    error_pending: Option<String>,
}

/// The virtual machine, borrowing the compilation artifacts and the
/// persistent state for one run.
#[derive(Debug)]
pub struct Vm<'a, W: PrintWriter> {
    pub pool: &'a ConstPool,
    pub interns: &'a Interns,
    pub natives: &'a NativeRegistry,
    pub state: &'a mut VmState,
    pub writer: &'a mut W,
}

fn fetch_u8(code: &Code, pc: &mut usize) -> u8 {
    let b = code.bytecode()[*pc];
    *pc += 1;
    b
}

fn fetch_u16(code: &Code, pc: &mut usize) -> u16 {
    let bytes = [code.bytecode()[*pc], code.bytecode()[*pc + 1]];
    *pc += 2;
    u16::from_le_bytes(bytes)
}

fn fetch_u32(code: &Code, pc: &mut usize) -> u32 {
    let b = code.bytecode();
    let bytes = [b[*pc], b[*pc + 1], b[*pc + 2], b[*pc + 3]];
    *pc += 4;
    u32::from_le_bytes(bytes)
}

fn fetch_i32(code: &Code, pc: &mut usize) -> i32 {
    fetch_u32(code, pc).cast_signed()
}

fn expect_int(v: &Value) -> i64 {
    match v {
        Value::Int(n) => *n,
        other => panic!("expected int operand, found {other:?}"),
    }
}

fn expect_float(v: &Value) -> f64 {
    match v {
        Value::Float(f) => *f,
        other => panic!("expected float operand, found {other:?}"),
    }
}

fn expect_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        other => panic!("expected bool operand, found {other:?}"),
    }
}

/// Immediate equality for the `Eq`/`NotEq` opcodes; the emitter only
/// produces them for int, bool and char operands.
fn immediates_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Char(a), Value::Char(b)) => a == b,
        (Value::Null, Value::Null) => true,
        other => panic!("Eq on incomparable operands: {other:?}"),
    }
}

/// Unwinds after a runtime error.
///
/// When `check_current` is set the current frame's own resume point is
/// examined first (errors raised at a call boundary, e.g. a failing native).
/// Otherwise frames pop until a caller parked on `JmpNoErr` is found; that
/// caller receives the error value on its stack and execution resumes there.
/// Reaching the bottom of the chain yields the final `RunError`.
fn unwind(
    frames: &mut Vec<Frame>,
    stack: &mut Vec<Value>,
    heap: &mut Heap,
    msg: String,
    check_current: bool,
    cur: &mut FrameCode,
    pc: &mut usize,
) -> RunResult<()> {
    if check_current && cur.code().bytecode().get(*pc).copied() == Some(Opcode::JmpNoErr as u8) {
        let id = heap.allocate(HeapData::Err(msg.clone()));
        stack.push(Value::Ref(id));
        frames
            .last_mut()
            .expect("frame stack is never empty")
            .error_pending = Some(msg);
        return Ok(());
    }
    loop {
        let frame = frames.pop().expect("frame stack is never empty");
        for v in frame.locals {
            v.drop_with_heap(heap);
        }
        while stack.len() > frame.stack_base {
            stack
                .pop()
                .expect("stack shorter than its base")
                .drop_with_heap(heap);
        }
        let Some(caller) = frames.last_mut() else {
            return Err(RunError::new(msg));
        };
        if caller.fc.code().bytecode().get(caller.pc).copied() == Some(Opcode::JmpNoErr as u8) {
            let id = heap.allocate(HeapData::Err(msg.clone()));
            stack.push(Value::Ref(id));
            caller.error_pending = Some(msg);
            *cur = caller.fc.clone();
            *pc = caller.pc;
            return Ok(());
        }
    }
}

impl<W: PrintWriter> Vm<'_, W> {
    /// Executes `code` to completion.
    ///
    /// With `leave_value` set, the value of the final expression is returned
    /// instead of discarded (the REPL echo path). The caller owns the
    /// returned value and must release it through the heap.
    pub fn run(&mut self, code: Arc<Code>, leave_value: bool) -> RunResult<Option<Value>> {
        let pool = self.pool;
        let interns = self.interns;
        let natives = self.natives;
        let heap = &mut self.state.heap;
        let globals = &mut self.state.globals;
        let writer = &mut *self.writer;

        let mut stack: Vec<Value> = Vec::with_capacity(usize::from(code.stack_size()) + 8);
        let mut frames: Vec<Frame> = Vec::new();

        let mut cur = FrameCode::Top(code);
        let mut pc = 0usize;
        frames.push(Frame {
            fc: cur.clone(),
            pc: 0,
            locals: Vec::new(),
            stack_base: 0,
            error_pending: None,
        });

        macro_rules! raise {
            ($msg:expr, $check_current:expr) => {{
                unwind(
                    &mut frames,
                    &mut stack,
                    heap,
                    $msg,
                    $check_current,
                    &mut cur,
                    &mut pc,
                )?;
                continue;
            }};
        }

        loop {
            let byte = cur.code().bytecode()[pc];
            let op = Opcode::from_repr(byte).expect("invalid opcode byte");
            pc += 1;

            match op {
                Opcode::End => {
                    let frame = frames.last_mut().expect("frame stack is never empty");
                    if let Some(msg) = frame.error_pending.take() {
                        while let Some(v) = stack.pop() {
                            v.drop_with_heap(heap);
                        }
                        return Err(RunError::new(msg));
                    }
                    let result = if leave_value {
                        Some(stack.pop().expect("operand stack underflow"))
                    } else {
                        None
                    };
                    while let Some(v) = stack.pop() {
                        v.drop_with_heap(heap);
                    }
                    return Ok(result);
                }

                Opcode::PushConst0 => stack.push(Value::Int(0)),
                Opcode::PushConst1 => stack.push(Value::Int(1)),
                Opcode::PushConst2 => stack.push(Value::Int(2)),
                Opcode::PushConst3 => stack.push(Value::Int(3)),
                Opcode::IPush => {
                    let n = fetch_i32(cur.code(), &mut pc);
                    stack.push(Value::Int(i64::from(n)));
                }
                Opcode::LPush => {
                    let idx = fetch_u32(cur.code(), &mut pc);
                    let Const::Int(n) = pool.get(idx) else {
                        panic!("LPush operand is not an int constant")
                    };
                    stack.push(Value::Int(*n));
                }
                Opcode::FPush => {
                    let idx = fetch_u32(cur.code(), &mut pc);
                    let Const::Float(f) = pool.get(idx) else {
                        panic!("FPush operand is not a float constant")
                    };
                    stack.push(Value::Float(*f));
                }
                Opcode::StrPush => {
                    let idx = fetch_u32(cur.code(), &mut pc);
                    let Const::Str(sid) = pool.get(idx) else {
                        panic!("StrPush operand is not a string constant")
                    };
                    let id = heap.allocate(HeapData::Str(interns.get(*sid).to_owned()));
                    stack.push(Value::Ref(id));
                }
                Opcode::CPush => {
                    let code_point = fetch_u32(cur.code(), &mut pc);
                    let c = char::from_u32(code_point).expect("CPush operand is not a char");
                    stack.push(Value::Char(c));
                }
                Opcode::PushTrue => stack.push(Value::Bool(true)),
                Opcode::PushFalse => stack.push(Value::Bool(false)),
                Opcode::PushNull => stack.push(Value::Null),

                Opcode::Pop => {
                    let v = stack.pop().expect("operand stack underflow");
                    v.drop_with_heap(heap);
                }

                Opcode::Add | Opcode::Sub | Opcode::Mul => {
                    let r = expect_int(&stack.pop().expect("operand stack underflow"));
                    let l = expect_int(&stack.pop().expect("operand stack underflow"));
                    let n = match op {
                        Opcode::Add => l.wrapping_add(r),
                        Opcode::Sub => l.wrapping_sub(r),
                        _ => l.wrapping_mul(r),
                    };
                    stack.push(Value::Int(n));
                }
                Opcode::Div => {
                    let r = expect_int(&stack.pop().expect("operand stack underflow"));
                    let l = expect_int(&stack.pop().expect("operand stack underflow"));
                    if r == 0 {
                        raise!("division by zero".to_owned(), false);
                    }
                    stack.push(Value::Int(l.wrapping_div(r)));
                }
                Opcode::Mod => {
                    let r = expect_int(&stack.pop().expect("operand stack underflow"));
                    let l = expect_int(&stack.pop().expect("operand stack underflow"));
                    if r == 0 {
                        raise!("modulo by zero".to_owned(), false);
                    }
                    stack.push(Value::Int(l.wrapping_rem(r)));
                }
                Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv | Opcode::FMod => {
                    let r = expect_float(&stack.pop().expect("operand stack underflow"));
                    let l = expect_float(&stack.pop().expect("operand stack underflow"));
                    let f = match op {
                        Opcode::FAdd => l + r,
                        Opcode::FSub => l - r,
                        Opcode::FMul => l * r,
                        Opcode::FDiv => l / r,
                        _ => l % r,
                    };
                    stack.push(Value::Float(f));
                }
                Opcode::StrCat => {
                    let r = stack.pop().expect("operand stack underflow");
                    let l = stack.pop().expect("operand stack underflow");
                    let (Value::Ref(rid), Value::Ref(lid)) = (&r, &l) else {
                        panic!("StrCat on non-string operands")
                    };
                    let combined = {
                        let (HeapData::Str(ls), HeapData::Str(rs)) = (heap.get(*lid), heap.get(*rid))
                        else {
                            panic!("StrCat on non-string operands")
                        };
                        let mut s = String::with_capacity(ls.len() + rs.len());
                        s.push_str(ls);
                        s.push_str(rs);
                        s
                    };
                    let id = heap.allocate(HeapData::Str(combined));
                    l.drop_with_heap(heap);
                    r.drop_with_heap(heap);
                    stack.push(Value::Ref(id));
                }

                Opcode::INeg => {
                    let n = expect_int(&stack.pop().expect("operand stack underflow"));
                    stack.push(Value::Int(n.wrapping_neg()));
                }
                Opcode::FNeg => {
                    let f = expect_float(&stack.pop().expect("operand stack underflow"));
                    stack.push(Value::Float(-f));
                }
                Opcode::Not => {
                    let b = expect_bool(&stack.pop().expect("operand stack underflow"));
                    stack.push(Value::Bool(!b));
                }
                Opcode::Inc => {
                    let n = expect_int(&stack.pop().expect("operand stack underflow"));
                    stack.push(Value::Int(n.wrapping_add(1)));
                }
                Opcode::Dec => {
                    let n = expect_int(&stack.pop().expect("operand stack underflow"));
                    stack.push(Value::Int(n.wrapping_sub(1)));
                }

                Opcode::Eq | Opcode::NotEq => {
                    let r = stack.pop().expect("operand stack underflow");
                    let l = stack.pop().expect("operand stack underflow");
                    let eq = immediates_equal(&l, &r);
                    stack.push(Value::Bool(if op == Opcode::Eq { eq } else { !eq }));
                }
                Opcode::Lt | Opcode::Lte | Opcode::Gt | Opcode::Gte => {
                    let r = expect_int(&stack.pop().expect("operand stack underflow"));
                    let l = expect_int(&stack.pop().expect("operand stack underflow"));
                    let b = match op {
                        Opcode::Lt => l < r,
                        Opcode::Lte => l <= r,
                        Opcode::Gt => l > r,
                        _ => l >= r,
                    };
                    stack.push(Value::Bool(b));
                }
                Opcode::FEq | Opcode::FNotEq | Opcode::FLt | Opcode::FLte | Opcode::FGt
                | Opcode::FGte => {
                    let r = expect_float(&stack.pop().expect("operand stack underflow"));
                    let l = expect_float(&stack.pop().expect("operand stack underflow"));
                    let b = match op {
                        Opcode::FEq => l == r,
                        Opcode::FNotEq => l != r,
                        Opcode::FLt => l < r,
                        Opcode::FLte => l <= r,
                        Opcode::FGt => l > r,
                        _ => l >= r,
                    };
                    stack.push(Value::Bool(b));
                }

                Opcode::LogOr | Opcode::LogAnd => {
                    let r = expect_bool(&stack.pop().expect("operand stack underflow"));
                    let l = expect_bool(&stack.pop().expect("operand stack underflow"));
                    stack.push(Value::Bool(if op == Opcode::LogOr { l || r } else { l && r }));
                }

                Opcode::Jmp => {
                    let target = fetch_u32(cur.code(), &mut pc);
                    pc = target as usize;
                }
                Opcode::JmpIfTrue => {
                    let target = fetch_u32(cur.code(), &mut pc);
                    if expect_bool(&stack.pop().expect("operand stack underflow")) {
                        pc = target as usize;
                    }
                }
                Opcode::JmpIfFalse => {
                    let target = fetch_u32(cur.code(), &mut pc);
                    if !expect_bool(&stack.pop().expect("operand stack underflow")) {
                        pc = target as usize;
                    }
                }
                Opcode::JmpNoErr => {
                    let target = fetch_u32(cur.code(), &mut pc);
                    let frame = frames.last_mut().expect("frame stack is never empty");
                    if frame.error_pending.take().is_none() {
                        pc = target as usize;
                    }
                    // pending error: fall through into the failure handler,
                    // which consumes the error value from the stack
                }

                Opcode::StoreLocal => {
                    let slot = usize::from(fetch_u16(cur.code(), &mut pc));
                    let v = stack.pop().expect("operand stack underflow");
                    let frame = frames.last_mut().expect("frame stack is never empty");
                    let old = std::mem::replace(&mut frame.locals[slot], v);
                    old.drop_with_heap(heap);
                }
                Opcode::LoadLocal => {
                    let slot = usize::from(fetch_u16(cur.code(), &mut pc));
                    let frame = frames.last().expect("frame stack is never empty");
                    let v = frame.locals[slot].clone_immediate();
                    if matches!(v, Value::Invalid) {
                        raise!("use of uninitialized variable".to_owned(), false);
                    }
                    if let Value::Ref(id) = v {
                        heap.inc_ref(id);
                    }
                    stack.push(v);
                }
                Opcode::StoreGlobal => {
                    let slot = usize::from(fetch_u16(cur.code(), &mut pc));
                    let v = stack.pop().expect("operand stack underflow");
                    let old = std::mem::replace(&mut globals[slot], v);
                    old.drop_with_heap(heap);
                }
                Opcode::LoadGlobal => {
                    let slot = usize::from(fetch_u16(cur.code(), &mut pc));
                    let v = globals[slot].clone_immediate();
                    if matches!(v, Value::Invalid) {
                        raise!("use of uninitialized variable".to_owned(), false);
                    }
                    if let Value::Ref(id) = v {
                        heap.inc_ref(id);
                    }
                    stack.push(v);
                }

                Opcode::ListSet | Opcode::TupleSet | Opcode::StructSet => {
                    let n = usize::from(fetch_u16(cur.code(), &mut pc));
                    // elements were pushed in reverse, so popping yields
                    // source order
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        items.push(stack.pop().expect("operand stack underflow"));
                    }
                    let data = match op {
                        Opcode::ListSet => HeapData::List(items),
                        Opcode::TupleSet => HeapData::Tuple(items),
                        _ => HeapData::Struct(items),
                    };
                    let id = heap.allocate(data);
                    stack.push(Value::Ref(id));
                }

                Opcode::Subscr => {
                    let target = stack.pop().expect("operand stack underflow");
                    let index = stack.pop().expect("operand stack underflow");
                    let idx = expect_int(&index);
                    let Value::Ref(id) = &target else {
                        let msg = format!("{} is not subscriptable", target.type_name(heap));
                        target.drop_with_heap(heap);
                        raise!(msg, false);
                    };
                    let elem = match heap.get(*id) {
                        HeapData::List(items) => Ok(usize::try_from(idx)
                            .ok()
                            .and_then(|i| items.get(i))
                            .map(Value::clone_immediate)),
                        HeapData::Str(s) => Ok(usize::try_from(idx)
                            .ok()
                            .and_then(|i| s.chars().nth(i))
                            .map(Value::Char)),
                        other => Err(format!("{} is not subscriptable", type_name_of(other))),
                    };
                    let elem = match elem {
                        Ok(elem) => elem,
                        Err(msg) => {
                            target.drop_with_heap(heap);
                            raise!(msg, false);
                        }
                    };
                    let Some(elem) = elem else {
                        target.drop_with_heap(heap);
                        raise!("index out of range".to_owned(), false);
                    };
                    if let Value::Ref(eid) = elem {
                        heap.inc_ref(eid);
                    }
                    target.drop_with_heap(heap);
                    stack.push(elem);
                }
                Opcode::SubscrStore => {
                    let target = stack.pop().expect("operand stack underflow");
                    let index = stack.pop().expect("operand stack underflow");
                    let value = stack.pop().expect("operand stack underflow");
                    let idx = expect_int(&index);
                    let Value::Ref(id) = &target else {
                        panic!("SubscrStore on non-heap target")
                    };
                    let id = *id;
                    let len = match heap.get(id) {
                        HeapData::List(items) => items.len(),
                        HeapData::Str(s) => s.chars().count(),
                        other => panic!("SubscrStore on {}", type_name_of(other)),
                    };
                    let Some(i) = usize::try_from(idx).ok().filter(|i| *i < len) else {
                        value.drop_with_heap(heap);
                        target.drop_with_heap(heap);
                        raise!("index out of range".to_owned(), false);
                    };
                    let old = match heap.get_mut(id) {
                        HeapData::List(items) => Some(std::mem::replace(&mut items[i], value)),
                        HeapData::Str(s) => {
                            let Value::Char(c) = value else {
                                panic!("string element store requires a char")
                            };
                            let mut chars: Vec<char> = s.chars().collect();
                            chars[i] = c;
                            *s = chars.into_iter().collect();
                            None
                        }
                        other => panic!("SubscrStore on {}", type_name_of(other)),
                    };
                    if let Some(old) = old {
                        old.drop_with_heap(heap);
                    }
                    target.drop_with_heap(heap);
                }

                Opcode::MemberLoad => {
                    let i = usize::from(fetch_u16(cur.code(), &mut pc));
                    let target = stack.pop().expect("operand stack underflow");
                    let Value::Ref(id) = &target else {
                        raise!("use of uninitialized variable".to_owned(), false);
                    };
                    let HeapData::Struct(fields) = heap.get(*id) else {
                        panic!("MemberLoad on non-struct object")
                    };
                    let v = fields[i].clone_immediate();
                    if matches!(v, Value::Invalid) {
                        target.drop_with_heap(heap);
                        raise!("use of uninitialized field".to_owned(), false);
                    }
                    if let Value::Ref(vid) = v {
                        heap.inc_ref(vid);
                    }
                    target.drop_with_heap(heap);
                    stack.push(v);
                }
                Opcode::MemberStore => {
                    let i = usize::from(fetch_u16(cur.code(), &mut pc));
                    let target = stack.pop().expect("operand stack underflow");
                    let value = stack.pop().expect("operand stack underflow");
                    let Value::Ref(id) = &target else {
                        value.drop_with_heap(heap);
                        raise!("use of uninitialized variable".to_owned(), false);
                    };
                    let id = *id;
                    let old = {
                        let HeapData::Struct(fields) = heap.get_mut(id) else {
                            panic!("MemberStore on non-struct object")
                        };
                        std::mem::replace(&mut fields[i], value)
                    };
                    old.drop_with_heap(heap);
                    target.drop_with_heap(heap);
                }
                Opcode::ListLength => {
                    let target = stack.pop().expect("operand stack underflow");
                    let Value::Ref(id) = &target else {
                        panic!("ListLength on non-heap value")
                    };
                    let HeapData::List(items) = heap.get(*id) else {
                        panic!("ListLength on non-list object")
                    };
                    let len = i64::try_from(items.len()).expect("list length exceeds i64");
                    target.drop_with_heap(heap);
                    stack.push(Value::Int(len));
                }

                Opcode::IterNext => {
                    let target = fetch_u32(cur.code(), &mut pc);
                    // first entry converts the iterable on top of the stack
                    // into an iterator that owns it
                    let top_is_iter = matches!(
                        stack.last(),
                        Some(Value::Ref(id)) if matches!(heap.get(*id), HeapData::ListIter { .. })
                    );
                    if !top_is_iter {
                        let v = stack.pop().expect("operand stack underflow");
                        match &v {
                            Value::Ref(id)
                                if matches!(heap.get(*id), HeapData::List(_) | HeapData::Str(_)) =>
                            {
                                let iter = heap.allocate(HeapData::ListIter {
                                    list: *id,
                                    index: 0,
                                });
                                stack.push(Value::Ref(iter));
                            }
                            other => {
                                let msg = format!("cannot iterate over {}", other.type_name(heap));
                                v.drop_with_heap(heap);
                                raise!(msg, false);
                            }
                        }
                    }
                    let Some(Value::Ref(iter_id)) = stack.last().map(Value::clone_immediate)
                    else {
                        panic!("IterNext lost its iterator")
                    };
                    let HeapData::ListIter { list, index } = heap.get(iter_id) else {
                        panic!("IterNext on non-iterator object")
                    };
                    let (list_id, idx) = (*list, *index);
                    let next = match heap.get(list_id) {
                        HeapData::List(items) => items.get(idx).map(Value::clone_immediate),
                        HeapData::Str(s) => s.chars().nth(idx).map(Value::Char),
                        other => panic!("IterNext over {}", type_name_of(other)),
                    };
                    match next {
                        Some(elem) => {
                            if let HeapData::ListIter { index, .. } = heap.get_mut(iter_id) {
                                *index += 1;
                            }
                            if let Value::Ref(eid) = elem {
                                heap.inc_ref(eid);
                            }
                            stack.push(elem);
                        }
                        None => {
                            let iter = stack.pop().expect("operand stack underflow");
                            iter.drop_with_heap(heap);
                            pc = target as usize;
                        }
                    }
                }

                Opcode::FunctionSet => {
                    let idx = fetch_u32(cur.code(), &mut pc);
                    stack.push(Value::Function(idx));
                }
                Opcode::BltinFnSet => {
                    let kind = fetch_u8(cur.code(), &mut pc);
                    let b = Builtin::from_repr(kind).expect("invalid builtin discriminant");
                    stack.push(Value::Builtin(b));
                }
                Opcode::CFuncSet => {
                    let idx = fetch_u32(cur.code(), &mut pc);
                    stack.push(Value::CFunction(NativeId(idx)));
                }

                Opcode::Call => {
                    let callee = stack.pop().expect("operand stack underflow");
                    match callee {
                        Value::Function(idx) => {
                            let f = Arc::clone(pool.function(idx));
                            let nparams = usize::from(f.nparams);
                            let locals = (0..f.code.nlvars()).map(|_| Value::Invalid).collect();
                            frames.last_mut().expect("frame stack is never empty").pc = pc;
                            let stack_base = stack.len() - nparams;
                            frames.push(Frame {
                                fc: FrameCode::Func(Arc::clone(&f)),
                                pc: 0,
                                locals,
                                stack_base,
                                error_pending: None,
                            });
                            cur = FrameCode::Func(f);
                            pc = 0;
                        }
                        Value::CFunction(id) => {
                            let def = natives.get(id);
                            let n = def.params.len();
                            let func = def.func;
                            let mut args: SmallVec<[Value; 4]> = SmallVec::with_capacity(n);
                            for _ in 0..n {
                                args.push(stack.pop().expect("operand stack underflow"));
                            }
                            args.reverse();
                            let result = func(heap, &args);
                            for arg in args {
                                arg.drop_with_heap(heap);
                            }
                            match result {
                                Ok(v) => stack.push(v),
                                Err(msg) => {
                                    frames.last_mut().expect("frame stack is never empty").pc = pc;
                                    raise!(msg, true);
                                }
                            }
                        }
                        other => {
                            let msg = format!("{} is not callable", other.type_name(heap));
                            other.drop_with_heap(heap);
                            raise!(msg, true);
                        }
                    }
                }

                Opcode::CallBltin => {
                    let nargs = usize::from(fetch_u8(cur.code(), &mut pc));
                    let tag = stack.pop().expect("operand stack underflow");
                    let Value::Builtin(b) = tag else {
                        panic!("CallBltin on non-builtin tag")
                    };
                    match b {
                        Builtin::Print | Builtin::Println => {
                            // arguments were pushed in reverse, so popping
                            // writes them in source order
                            for _ in 0..nargs {
                                let v = stack.pop().expect("operand stack underflow");
                                writer.write_str(&v.display(heap, interns, pool));
                                v.drop_with_heap(heap);
                            }
                            if b == Builtin::Println {
                                writer.write_char('\n');
                            }
                            stack.push(Value::Null);
                        }
                        Builtin::ObjectId => {
                            let v = stack.pop().expect("operand stack underflow");
                            let id = match &v {
                                Value::Ref(id) => {
                                    i64::try_from(id.index()).expect("heap id exceeds i64")
                                }
                                _ => 0,
                            };
                            v.drop_with_heap(heap);
                            stack.push(Value::Int(id));
                        }
                        Builtin::Len => {
                            let v = stack.pop().expect("operand stack underflow");
                            let Value::Ref(id) = &v else {
                                panic!("len() on non-string value")
                            };
                            let HeapData::Str(s) = heap.get(*id) else {
                                panic!("len() on non-string object")
                            };
                            let len = i64::try_from(s.chars().count()).expect("length exceeds i64");
                            v.drop_with_heap(heap);
                            stack.push(Value::Int(len));
                        }
                        Builtin::ToFloat => {
                            let n = expect_int(&stack.pop().expect("operand stack underflow"));
                            stack.push(Value::Float(n as f64));
                        }
                        Builtin::Error => {
                            let v = stack.pop().expect("operand stack underflow");
                            let Value::Ref(id) = &v else {
                                panic!("error() on non-string value")
                            };
                            let HeapData::Str(msg) = heap.get(*id) else {
                                panic!("error() on non-string object")
                            };
                            let msg = msg.clone();
                            v.drop_with_heap(heap);
                            let err = heap.allocate(HeapData::Err(msg.clone()));
                            stack.push(Value::Ref(err));
                            frames
                                .last_mut()
                                .expect("frame stack is never empty")
                                .error_pending = Some(msg);
                        }
                    }
                }

                Opcode::Ret => {
                    let ret = stack.pop().expect("operand stack underflow");
                    let frame = frames.pop().expect("frame stack is never empty");
                    for v in frame.locals {
                        v.drop_with_heap(heap);
                    }
                    while stack.len() > frame.stack_base {
                        stack
                            .pop()
                            .expect("stack shorter than its base")
                            .drop_with_heap(heap);
                    }
                    let caller = frames.last_mut().expect("Ret executed in the top frame");
                    stack.push(ret);
                    if let Some(msg) = frame.error_pending {
                        caller.error_pending = Some(msg);
                    }
                    cur = caller.fc.clone();
                    pc = caller.pc;
                }

                Opcode::ShowInt => {
                    let n = expect_int(&stack.pop().expect("operand stack underflow"));
                    let id = heap.allocate(HeapData::Str(n.to_string()));
                    stack.push(Value::Ref(id));
                }
                Opcode::ShowFloat => {
                    let f = expect_float(&stack.pop().expect("operand stack underflow"));
                    let id = heap.allocate(HeapData::Str(value::format_float(f)));
                    stack.push(Value::Ref(id));
                }
                Opcode::ShowBool => {
                    let b = expect_bool(&stack.pop().expect("operand stack underflow"));
                    let id = heap.allocate(HeapData::Str(if b { "true" } else { "false" }.to_owned()));
                    stack.push(Value::Ref(id));
                }
                Opcode::ShowChar => {
                    let v = stack.pop().expect("operand stack underflow");
                    let Value::Char(c) = v else {
                        panic!("ShowChar on non-char value")
                    };
                    let id = heap.allocate(HeapData::Str(c.to_string()));
                    stack.push(Value::Ref(id));
                }
            }
        }
    }
}

fn type_name_of(data: &HeapData) -> &'static str {
    match data {
        HeapData::Str(_) => "string",
        HeapData::List(_) => "list",
        HeapData::Tuple(_) => "tuple",
        HeapData::Struct(_) => "struct",
        HeapData::Err(_) => "error",
        HeapData::ListIter { .. } => "iterator",
    }
}
