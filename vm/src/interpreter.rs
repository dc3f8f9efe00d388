use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use bytecode::{Constant, Instruction, decode_at};
use log::{error, trace};
use object::{Callable, ClassId, NativeId, RoutineId, Value};

use crate::fault::{Fault, FaultKind, RuntimeError, TraceEntry};
use crate::primitives::int::{self, IntOp};
use crate::primitives::{self, range, string};
use crate::program::Program;
use crate::special::Specials;

pub const MAX_FRAMES: usize = 1024;
pub const MAX_STACK: usize = 1 << 16;
pub const CHECKPOINT_INTERVAL: u32 = 1024;
pub const MAX_HOOK_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterSettings {
    pub max_frames: usize,
    pub max_stack: usize,
    /// Instructions between two calls of the checkpoint hook.
    pub checkpoint_interval: u32,
    /// Remember the last receiver class and callee at each `Invoke` site.
    pub inline_cache: bool,
    /// Hooks running inside hooks. Each level recurses on the host stack,
    /// so this is kept well below `max_frames`.
    pub max_hook_depth: usize,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            max_frames: MAX_FRAMES,
            max_stack: MAX_STACK,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            inline_cache: true,
            max_hook_depth: MAX_HOOK_DEPTH,
        }
    }
}

/// Returns `false` to interrupt execution.
type Checkpoint = Box<dyn FnMut() -> bool>;

#[derive(Debug)]
struct Frame {
    routine: RoutineId,
    pc: usize,
    /// Start of the instruction being executed, reported in traces.
    current: usize,
    locals: Vec<Value>,
    stack_base: usize,
    returns: u8,
}

/// Per-thread execution state over a shared [`Program`].
pub struct Interpreter {
    program: Arc<Program>,
    settings: InterpreterSettings,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    inline_cache: HashMap<(RoutineId, usize), (ClassId, Callable)>,
    checkpoint: Option<Checkpoint>,
    until_checkpoint: u32,
    hook_depth: usize,
}

impl Interpreter {
    pub fn new(program: Arc<Program>, settings: InterpreterSettings) -> Self {
        Self {
            program,
            settings,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            inline_cache: HashMap::new(),
            checkpoint: None,
            until_checkpoint: settings.checkpoint_interval.max(1),
            hook_depth: 0,
        }
    }

    pub fn with_checkpoint(
        mut self,
        checkpoint: impl FnMut() -> bool + 'static,
    ) -> Self {
        self.set_checkpoint(checkpoint);
        self
    }

    pub fn set_checkpoint(&mut self, checkpoint: impl FnMut() -> bool + 'static) {
        self.checkpoint = Some(Box::new(checkpoint));
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn specials(&self) -> Specials {
        *self.program.specials()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn inline_cache_len(&self) -> usize {
        self.inline_cache.len()
    }

    /// Run the program's entry routine.
    pub fn run(&mut self) -> Result<Value, Fault> {
        let entry = self.program.entry();
        self.call(entry, Vec::new())
    }

    /// Call a routine with `args` (receiver first for methods) and return
    /// its result.
    pub fn call(
        &mut self,
        routine: RoutineId,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        self.stack.clear();
        self.frames.clear();
        self.hook_depth = 0;
        self.until_checkpoint = self.settings.checkpoint_interval.max(1);
        let result = self.call_sync(Callable::Routine(routine), args);
        result.map_err(|err| self.fault(err))
    }

    /// Send `name` to `receiver` the way `Invoke` does.
    pub fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        self.stack.clear();
        self.frames.clear();
        self.hook_depth = 0;
        let class = self.class_of(&receiver);
        let result = self
            .lookup_method(None, class, name, args.len())
            .and_then(|callable| {
                let mut all = Vec::with_capacity(args.len() + 1);
                all.push(receiver);
                all.extend(args);
                self.call_sync(callable, all)
            });
        result.map_err(|err| self.fault(err))
    }

    /// Render a value the way `ToStr` does, running `__str__` hooks.
    pub fn stringify(&mut self, value: &Value) -> Result<String, Fault> {
        let result = self.to_str(value);
        result.map_err(|err| self.fault(err))
    }

    /// Attach the frame trace to `err` and reset the stacks so the
    /// interpreter can be reused.
    fn fault(&mut self, err: RuntimeError) -> Fault {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let routine = self.program.routine(frame.routine);
                TraceEntry {
                    routine: routine
                        .map_or_else(|| format!("#{}", frame.routine.0), |r| r.name.clone()),
                    pc: frame.current,
                    span: routine.and_then(|r| r.span_at(frame.current)),
                }
            })
            .collect();
        self.stack.clear();
        self.frames.clear();
        self.hook_depth = 0;
        Fault {
            kind: err.kind,
            message: err.message,
            trace,
        }
    }

    /// Run `callable` to completion on top of the current frames.
    ///
    /// Used for the entry call and for hooks (`__eq__`, `__str__` and the
    /// rest) that the dispatch loop needs a result from before continuing.
    pub(crate) fn call_sync(
        &mut self,
        callable: Callable,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match callable {
            Callable::Native(id) => {
                let desc = self.native_desc(id, args.len())?;
                (desc.func)(self, &args)
            }
            Callable::Routine(id) => {
                if self.hook_depth >= self.settings.max_hook_depth {
                    return Err(RuntimeError::new(
                        FaultKind::StackOverflow,
                        format!(
                            "hooks nested deeper than {}",
                            self.settings.max_hook_depth
                        ),
                    ));
                }
                self.hook_depth += 1;
                let result = self.run_routine(id, args);
                self.hook_depth -= 1;
                result
            }
        }
    }

    fn run_routine(
        &mut self,
        id: RoutineId,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let depth = self.frames.len();
        let argc = args.len();
        for arg in args {
            self.push(arg)?;
        }
        self.push_frame(id, argc, 1)?;
        self.run_until(depth)?;
        self.pop()
    }

    fn run_until(&mut self, depth: usize) -> Result<(), RuntimeError> {
        while self.frames.len() > depth {
            self.step()?;
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<(), RuntimeError> {
        let Some(check) = self.checkpoint.as_mut() else {
            return Ok(());
        };
        self.until_checkpoint -= 1;
        if self.until_checkpoint > 0 {
            return Ok(());
        }
        self.until_checkpoint = self.settings.checkpoint_interval.max(1);
        if check() {
            Ok(())
        } else {
            Err(RuntimeError::new(
                FaultKind::Interrupted,
                "interrupted by checkpoint",
            ))
        }
    }

    fn step(&mut self) -> Result<(), RuntimeError> {
        self.checkpoint()?;

        let (instr, routine_id, current) = {
            let frame = self
                .frames
                .last_mut()
                .ok_or_else(|| RuntimeError::invalid("no active frame"))?;
            let routine = self
                .program
                .routine(frame.routine)
                .ok_or_else(|| RuntimeError::invalid("unknown routine"))?;
            if frame.pc >= routine.code.len() {
                return Err(RuntimeError::invalid(format!(
                    "fell off the end of `{}`",
                    routine.name
                )));
            }
            let (instr, next_pc) = decode_at(&routine.code, frame.pc)
                .map_err(|e| RuntimeError::invalid(e.to_string()))?;
            frame.current = frame.pc;
            frame.pc = next_pc;
            (instr, frame.routine, frame.current)
        };

        match instr {
            Instruction::Nop => {}
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Dup => {
                let value = self.peek(0)?.clone();
                self.push(value)?;
            }
            Instruction::LoadConst { idx } => {
                let value = {
                    let constant = self
                        .program
                        .routine(routine_id)
                        .and_then(|r| r.constants.get(idx as usize))
                        .ok_or_else(|| {
                            RuntimeError::invalid(format!("no constant {idx}"))
                        })?;
                    constant_value(constant)
                };
                self.push(value)?;
            }
            Instruction::LoadSmi { value } => self.push(Value::Int(value as i64))?,
            Instruction::LoadNone => self.push(Value::NONE)?,
            Instruction::LoadTrue => self.push(Value::Bool(true))?,
            Instruction::LoadFalse => self.push(Value::Bool(false))?,
            Instruction::LoadLocal { reg } => {
                let value = self.local(reg)?.clone();
                self.push(value)?;
            }
            Instruction::StoreLocal { reg } => {
                let value = self.pop()?;
                *self.local_mut(reg)? = value;
            }
            Instruction::LoadField { slot } => {
                let target = self.pop()?;
                let Value::Object(obj) = &target else {
                    return Err(RuntimeError::type_mismatch(
                        "Object",
                        target.kind_name(),
                    ));
                };
                let value = obj.get(slot as usize).ok_or_else(|| {
                    RuntimeError::invalid(format!("no field slot {slot}"))
                })?;
                self.push(value)?;
            }
            Instruction::StoreField { slot } => {
                let value = self.pop()?;
                let target = self.pop()?;
                let Value::Object(obj) = &target else {
                    return Err(RuntimeError::type_mismatch(
                        "Object",
                        target.kind_name(),
                    ));
                };
                if !obj.set(slot as usize, value) {
                    return Err(RuntimeError::invalid(format!(
                        "no field slot {slot}"
                    )));
                }
            }
            Instruction::IntAdd => self.int_binary(IntOp::Add)?,
            Instruction::IntSub => self.int_binary(IntOp::Sub)?,
            Instruction::IntMul => self.int_binary(IntOp::Mul)?,
            Instruction::IntDiv => self.int_binary(IntOp::Div)?,
            Instruction::IntMod => self.int_binary(IntOp::Mod)?,
            Instruction::IntAnd => self.int_binary(IntOp::And)?,
            Instruction::IntOr => self.int_binary(IntOp::Or)?,
            Instruction::IntXor => self.int_binary(IntOp::Xor)?,
            Instruction::IntShl => self.int_binary(IntOp::Shl)?,
            Instruction::IntShr => self.int_binary(IntOp::Shr)?,
            Instruction::IntNeg => {
                let value = self.pop_int()?;
                self.push(Value::Int(int::negate(value)?))?;
            }
            Instruction::IntAddImm { value } => self.int_immediate(IntOp::Add, value)?,
            Instruction::IntSubImm { value } => self.int_immediate(IntOp::Sub, value)?,
            Instruction::IntMulImm { value } => self.int_immediate(IntOp::Mul, value)?,
            Instruction::IntDivImm { value } => self.int_immediate(IntOp::Div, value)?,
            Instruction::IntModImm { value } => self.int_immediate(IntOp::Mod, value)?,
            Instruction::Add => self.generic_binary(IntOp::Add)?,
            Instruction::Sub => self.generic_binary(IntOp::Sub)?,
            Instruction::Mul => self.generic_binary(IntOp::Mul)?,
            Instruction::Div => self.generic_binary(IntOp::Div)?,
            Instruction::Mod => self.generic_binary(IntOp::Mod)?,
            Instruction::Neg => match self.pop()? {
                Value::Int(v) => self.push(Value::Int(int::negate(v)?))?,
                other => {
                    return Err(RuntimeError::type_mismatch("Int", other.kind_name()));
                }
            },
            Instruction::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.is_truthy()))?;
            }
            Instruction::Eq | Instruction::Ne => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let equal = self.values_equal(&lhs, &rhs)?;
                let result = if matches!(instr, Instruction::Eq) {
                    equal
                } else {
                    !equal
                };
                self.push(Value::Bool(result))?;
            }
            Instruction::Lt | Instruction::Le | Instruction::Gt | Instruction::Ge => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let ord = compare(&lhs, &rhs)?;
                let result = match instr {
                    Instruction::Lt => ord == Ordering::Less,
                    Instruction::Le => ord != Ordering::Greater,
                    Instruction::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                };
                self.push(Value::Bool(result))?;
            }
            Instruction::ToStr => {
                let value = self.pop()?;
                let text = self.to_str(&value)?;
                self.push(Value::str(&text))?;
            }
            Instruction::Hash => {
                let value = self.pop()?;
                let hash = self.hash_value(&value)?;
                self.push(Value::Int(hash))?;
            }
            Instruction::NewSequence { count } => {
                let count = count as usize;
                if self.operand_count() < count {
                    return Err(RuntimeError::invalid("stack underflow"));
                }
                let items = self.stack.split_off(self.stack.len() - count);
                self.push(Value::sequence(items))?;
            }
            Instruction::NewRange { closed } => {
                let end = self.pop_int()?;
                let start = self.pop_int()?;
                let end = if closed {
                    end.checked_add(1)
                        .ok_or_else(|| RuntimeError::overflow("range bound"))?
                } else {
                    end
                };
                let range = range::make_range(self.specials().range, start, end);
                self.push(range)?;
            }
            Instruction::WrapSome => {
                let value = self.pop()?;
                self.push(Value::some(value))?;
            }
            Instruction::GetItem => {
                let index = self.pop()?;
                let target = self.pop()?;
                let value = self.get_item(&target, &index)?;
                self.push(value)?;
            }
            Instruction::SetItem => {
                let value = self.pop()?;
                let index = self.pop()?;
                let target = self.pop()?;
                set_item(&target, &index, value)?;
            }
            Instruction::Slice { closed } => {
                let end = self.pop()?;
                let start = self.pop()?;
                let target = self.pop()?;
                let (start, end) = match (&start, &end) {
                    (Value::Int(s), Value::Int(e)) => (*s, *e),
                    (Value::Int(_), other) | (other, _) => {
                        return Err(RuntimeError::type_mismatch(
                            "Int",
                            other.kind_name(),
                        ));
                    }
                };
                self.push(slice(&target, start, end, closed)?)?;
            }
            Instruction::Contains => {
                let haystack = self.pop()?;
                let needle = self.pop()?;
                let found = self.contains(&haystack, &needle)?;
                self.push(Value::Bool(found))?;
            }
            Instruction::Len => {
                let value = self.pop()?;
                let len = self.length(&value)?;
                self.push(Value::Int(len))?;
            }
            Instruction::Jump { offset } => self.jump(offset)?,
            Instruction::JumpIfTrue { offset } => {
                if self.pop()?.is_truthy() {
                    self.jump(offset)?;
                }
            }
            Instruction::JumpIfFalse { offset } => {
                if !self.pop()?.is_truthy() {
                    self.jump(offset)?;
                }
            }
            Instruction::JumpIfNone { offset } => match self.pop()? {
                Value::Optional(None) => self.jump(offset)?,
                Value::Optional(Some(value)) => self.push(*value)?,
                other => {
                    return Err(RuntimeError::type_mismatch(
                        "Optional",
                        other.kind_name(),
                    ));
                }
            },
            Instruction::Call {
                routine,
                argc,
                returns,
            } => self.push_frame(RoutineId(routine), argc as usize, returns)?,
            Instruction::CallNative {
                native,
                argc,
                returns,
            } => self.call_native(NativeId(native), argc as usize, returns)?,
            Instruction::Invoke {
                name,
                argc,
                returns,
            } => {
                let program = Arc::clone(&self.program);
                let name = match program
                    .routine(routine_id)
                    .and_then(|r| r.constants.get(name as usize))
                {
                    Some(Constant::Str(name)) => name.as_str(),
                    _ => {
                        return Err(RuntimeError::invalid(format!(
                            "invoke name {name} is not a string constant"
                        )));
                    }
                };
                self.invoke(Some((routine_id, current)), name, argc as usize, returns)?;
            }
            Instruction::New { class } => {
                let id = ClassId(class);
                let fields = self
                    .program
                    .registry()
                    .class(id)
                    .map(|c| c.field_count())
                    .ok_or_else(|| {
                        RuntimeError::invalid(format!("unknown class {class}"))
                    })?;
                self.push(Value::Object(object::ObjectRef::new(id, fields)))?;
            }
            Instruction::Return => self.do_return()?,
            Instruction::GetIter => {
                self.invoke(Some((routine_id, current)), "iter", 0, 1)?;
            }
            Instruction::IterNext => {
                let iterator = self.peek(0)?.clone();
                self.push(iterator)?;
                self.invoke(Some((routine_id, current)), "next", 0, 1)?;
            }
        }
        Ok(())
    }

    // Stack and frame plumbing.

    fn frame_base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.stack_base)
    }

    /// Operands pushed by the current frame.
    fn operand_count(&self) -> usize {
        self.stack.len() - self.frame_base().min(self.stack.len())
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.settings.max_stack {
            return Err(RuntimeError::new(
                FaultKind::StackOverflow,
                format!("operand stack exceeds {} values", self.settings.max_stack),
            ));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        if self.operand_count() == 0 {
            return Err(RuntimeError::invalid("stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::invalid("stack underflow"))
    }

    fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(RuntimeError::type_mismatch("Int", other.kind_name())),
        }
    }

    fn peek(&self, depth: usize) -> Result<&Value, RuntimeError> {
        if self.operand_count() <= depth {
            return Err(RuntimeError::invalid("stack underflow"));
        }
        Ok(&self.stack[self.stack.len() - 1 - depth])
    }

    fn local(&self, reg: u16) -> Result<&Value, RuntimeError> {
        self.frames
            .last()
            .and_then(|f| f.locals.get(reg as usize))
            .ok_or_else(|| RuntimeError::invalid(format!("no local {reg}")))
    }

    fn local_mut(&mut self, reg: u16) -> Result<&mut Value, RuntimeError> {
        self.frames
            .last_mut()
            .and_then(|f| f.locals.get_mut(reg as usize))
            .ok_or_else(|| RuntimeError::invalid(format!("no local {reg}")))
    }

    fn jump(&mut self, offset: i16) -> Result<(), RuntimeError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| RuntimeError::invalid("no active frame"))?;
        let target = (frame.pc as isize)
            .checked_add(offset as isize)
            .filter(|t| *t >= 0)
            .ok_or_else(|| RuntimeError::invalid(format!("bad jump offset {offset}")))?;
        frame.pc = target as usize;
        Ok(())
    }

    /// Move the top `argc` operands into a new frame's locals.
    fn push_frame(
        &mut self,
        id: RoutineId,
        argc: usize,
        returns: u8,
    ) -> Result<(), RuntimeError> {
        let routine = self
            .program
            .routine(id)
            .ok_or_else(|| RuntimeError::invalid(format!("unknown routine {}", id.0)))?;
        if routine.params as usize != argc {
            return Err(RuntimeError::invalid(format!(
                "`{}` takes {} argument(s), got {argc}",
                routine.name, routine.params
            )));
        }
        if self.frames.len() >= self.settings.max_frames {
            return Err(RuntimeError::new(
                FaultKind::StackOverflow,
                format!("call depth exceeds {} frames", self.settings.max_frames),
            ));
        }
        if self.operand_count() < argc {
            return Err(RuntimeError::invalid("stack underflow"));
        }
        let base = self.stack.len() - argc;
        let mut locals: Vec<Value> = self.stack.drain(base..).collect();
        locals.resize((routine.locals as usize).max(argc), Value::NONE);
        trace!("enter {} (depth {})", routine.name, self.frames.len() + 1);
        self.frames.push(Frame {
            routine: id,
            pc: 0,
            current: 0,
            locals,
            stack_base: base,
            returns,
        });
        Ok(())
    }

    fn do_return(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::invalid("return without a frame"))?;
        self.stack.truncate(frame.stack_base);
        if frame.returns > 0 {
            self.push(value)?;
        }
        Ok(())
    }

    fn native_desc(
        &self,
        id: NativeId,
        argc: usize,
    ) -> Result<primitives::NativeDesc, RuntimeError> {
        let desc = *self
            .program
            .natives()
            .get(id.0 as usize)
            .ok_or_else(|| RuntimeError::invalid(format!("unknown native {}", id.0)))?;
        if desc.params as usize != argc {
            return Err(RuntimeError::invalid(format!(
                "native `{}` takes {} argument(s), got {argc}",
                desc.name, desc.params
            )));
        }
        Ok(desc)
    }

    fn call_native(
        &mut self,
        id: NativeId,
        argc: usize,
        returns: u8,
    ) -> Result<(), RuntimeError> {
        let desc = self.native_desc(id, argc)?;
        if self.operand_count() < argc {
            return Err(RuntimeError::invalid("stack underflow"));
        }
        let args = self.stack.split_off(self.stack.len() - argc);
        trace!("native {}", desc.name);
        let result = (desc.func)(self, &args)?;
        if returns > 0 {
            self.push(result)?;
        }
        Ok(())
    }

    // Dynamic dispatch.

    fn class_of(&self, value: &Value) -> ClassId {
        let specials = self.program.specials();
        match value {
            Value::Int(_) => specials.int,
            Value::Bool(_) => specials.bool,
            Value::Str(_) => specials.str,
            Value::Sequence(_) => specials.sequence,
            Value::Optional(_) => specials.optional,
            Value::Object(obj) => obj.class(),
        }
    }

    fn lookup_method(
        &mut self,
        site: Option<(RoutineId, usize)>,
        class: ClassId,
        name: &str,
        argc: usize,
    ) -> Result<Callable, RuntimeError> {
        let site = site.filter(|_| self.settings.inline_cache);
        if let Some(&(cached, callable)) =
            site.and_then(|key| self.inline_cache.get(&key))
        {
            if cached == class {
                return Ok(callable);
            }
        }
        let registry = self.program.registry();
        let callable = registry.resolve_name(class, name, argc).ok_or_else(|| {
            let class_name = registry.class_name(class);
            error!("{class_name} does not understand {name}/{argc}");
            RuntimeError::new(
                FaultKind::MethodNotFound,
                format!("{class_name} has no method `{name}` taking {argc} argument(s)"),
            )
        })?;
        if let Some(key) = site {
            self.inline_cache.insert(key, (class, callable));
        }
        Ok(callable)
    }

    /// Dispatch `name` on the receiver sitting below the top `argc`
    /// operands.
    fn invoke(
        &mut self,
        site: Option<(RoutineId, usize)>,
        name: &str,
        argc: usize,
        returns: u8,
    ) -> Result<(), RuntimeError> {
        if self.operand_count() < argc + 1 {
            return Err(RuntimeError::invalid("stack underflow"));
        }
        let receiver = &self.stack[self.stack.len() - argc - 1];
        let class = self.class_of(receiver);
        let callable = self.lookup_method(site, class, name, argc)?;
        match callable {
            Callable::Routine(id) => self.push_frame(id, argc + 1, returns),
            Callable::Native(id) => self.call_native(id, argc + 1, returns),
        }
    }

    /// The hook `name/arity` on an object's class, if it defines one.
    fn find_hook(&self, value: &Value, name: &str, arity: usize) -> Option<Callable> {
        match value {
            Value::Object(obj) => {
                self.program.registry().resolve_name(obj.class(), name, arity)
            }
            _ => None,
        }
    }

    fn class_name_of(&self, value: &Value) -> String {
        self.program
            .registry()
            .class_name(self.class_of(value))
            .to_string()
    }

    // Value semantics.

    fn int_binary(&mut self, op: IntOp) -> Result<(), RuntimeError> {
        let rhs = self.pop_int()?;
        let lhs = self.pop_int()?;
        self.push(Value::Int(int::apply(op, lhs, rhs)?))
    }

    fn int_immediate(&mut self, op: IntOp, imm: i32) -> Result<(), RuntimeError> {
        let lhs = self.pop_int()?;
        self.push(Value::Int(int::apply(op, lhs, imm as i64)?))
    }

    fn generic_binary(&mut self, op: IntOp) -> Result<(), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match (op, &lhs, &rhs) {
            (_, Value::Int(a), Value::Int(b)) => Value::Int(int::apply(op, *a, *b)?),
            (IntOp::Add, Value::Str(a), Value::Str(b)) => {
                let mut joined = String::with_capacity(a.len() + b.len());
                joined.push_str(a);
                joined.push_str(b);
                Value::str(&joined)
            }
            (IntOp::Add, Value::Sequence(a), Value::Sequence(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Value::sequence(items)
            }
            _ => {
                return Err(RuntimeError::type_mismatch(
                    &format!("operands for `{}`", op.symbol()),
                    &format!("{} and {}", lhs.kind_name(), rhs.kind_name()),
                ));
            }
        };
        self.push(result)
    }

    fn values_equal(&mut self, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
        self.equal_within(lhs, rhs, &mut Vec::new())
    }

    /// `path` holds the sequence pairs being compared further up; meeting
    /// one again counts as equal.
    fn equal_within(
        &mut self,
        lhs: &Value,
        rhs: &Value,
        path: &mut Vec<(SeqPtr, SeqPtr)>,
    ) -> Result<bool, RuntimeError> {
        match (lhs, rhs) {
            (Value::Object(_), _) | (_, Value::Object(_)) => {
                // either side's hook decides, left first
                if let Some(hook) = self.find_hook(lhs, "__eq__", 1) {
                    return self.eq_hook(hook, lhs, rhs);
                }
                if let Some(hook) = self.find_hook(rhs, "__eq__", 1) {
                    return self.eq_hook(hook, rhs, lhs);
                }
                Ok(match (lhs, rhs) {
                    (Value::Object(a), Value::Object(b)) => a.same_identity(b),
                    _ => false,
                })
            }
            (Value::Sequence(a), Value::Sequence(b)) => {
                let pair = (Rc::as_ptr(a), Rc::as_ptr(b));
                if Rc::ptr_eq(a, b) || path.contains(&pair) {
                    return Ok(true);
                }
                // snapshot so hooks may touch the sequences
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                if a.len() != b.len() {
                    return Ok(false);
                }
                path.push(pair);
                let mut equal = true;
                for (x, y) in a.iter().zip(b.iter()) {
                    match self.equal_within(x, y, path) {
                        Ok(true) => {}
                        Ok(false) => {
                            equal = false;
                            break;
                        }
                        Err(err) => {
                            path.pop();
                            return Err(err);
                        }
                    }
                }
                path.pop();
                Ok(equal)
            }
            (Value::Optional(Some(a)), Value::Optional(Some(b))) => {
                self.equal_within(a, b, path)
            }
            _ => Ok(lhs.structural_eq(rhs)),
        }
    }

    fn eq_hook(
        &mut self,
        hook: Callable,
        receiver: &Value,
        other: &Value,
    ) -> Result<bool, RuntimeError> {
        match self.call_sync(hook, vec![receiver.clone(), other.clone()])? {
            Value::Bool(b) => Ok(b),
            other => Err(RuntimeError::type_mismatch(
                "Bool from __eq__",
                other.kind_name(),
            )),
        }
    }

    fn to_str(&mut self, value: &Value) -> Result<String, RuntimeError> {
        self.str_within(value, &mut Vec::new())
    }

    /// A sequence already on `path` renders as `[...]`.
    fn str_within(
        &mut self,
        value: &Value,
        path: &mut Vec<SeqPtr>,
    ) -> Result<String, RuntimeError> {
        Ok(match value {
            Value::Str(s) => s.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Optional(None) => "None".to_string(),
            Value::Optional(Some(inner)) => {
                format!("Some({})", self.str_within(inner, path)?)
            }
            Value::Sequence(items) => {
                let ptr = Rc::as_ptr(items);
                if path.contains(&ptr) {
                    return Ok("[...]".to_string());
                }
                let items = items.borrow().clone();
                path.push(ptr);
                let parts = items
                    .iter()
                    .map(|item| self.str_within(item, path))
                    .collect::<Result<Vec<_>, _>>();
                path.pop();
                format!("[{}]", parts?.join(", "))
            }
            Value::Object(_) => match self.find_hook(value, "__str__", 0) {
                Some(hook) => match self.call_sync(hook, vec![value.clone()])? {
                    Value::Str(s) => s.to_string(),
                    other => {
                        return Err(RuntimeError::type_mismatch(
                            "Str from __str__",
                            other.kind_name(),
                        ));
                    }
                },
                None => format!("<{}>", self.class_name_of(value)),
            },
        })
    }

    fn hash_value(&mut self, value: &Value) -> Result<i64, RuntimeError> {
        self.hash_within(value, &mut Vec::new())
    }

    fn hash_within(
        &mut self,
        value: &Value,
        path: &mut Vec<SeqPtr>,
    ) -> Result<i64, RuntimeError> {
        Ok(match value {
            Value::Int(v) => hash_of(v),
            Value::Bool(v) => hash_of(v),
            Value::Str(s) => hash_of(&**s),
            Value::Optional(None) => hash_of(&()),
            Value::Optional(Some(inner)) => {
                self.hash_within(inner, path)?.wrapping_mul(31).wrapping_add(1)
            }
            Value::Sequence(items) => {
                let ptr = Rc::as_ptr(items);
                if path.contains(&ptr) {
                    return Err(RuntimeError::new(
                        FaultKind::TypeMismatch,
                        "cannot hash a sequence that contains itself",
                    ));
                }
                let items = items.borrow().clone();
                path.push(ptr);
                let hash = items.iter().try_fold(hash_of(&items.len()), |h, item| {
                    let item = self.hash_within(item, path)?;
                    Ok::<_, RuntimeError>(h.wrapping_mul(31).wrapping_add(item))
                });
                path.pop();
                hash?
            }
            Value::Object(obj) => match self.find_hook(value, "__hash__", 0) {
                Some(hook) => match self.call_sync(hook, vec![value.clone()])? {
                    Value::Int(h) => h,
                    other => {
                        return Err(RuntimeError::type_mismatch(
                            "Int from __hash__",
                            other.kind_name(),
                        ));
                    }
                },
                None => hash_of(&obj.address()),
            },
        })
    }

    fn get_item(&mut self, target: &Value, index: &Value) -> Result<Value, RuntimeError> {
        let range_class = self.specials().range;
        match (target, index) {
            (Value::Sequence(items), Value::Int(i)) => {
                let items = items.borrow();
                checked_index(*i, items.len()).map(|i| items[i].clone())
            }
            (Value::Str(s), Value::Int(i)) => {
                let len = string::char_count(s);
                let i = checked_index(*i, len)?;
                string::char_at(s, i)
                    .ok_or_else(|| RuntimeError::index_out_of_range(i as i64, len))
            }
            (Value::Sequence(_) | Value::Str(_), Value::Object(r))
                if r.class() == range_class =>
            {
                let (start, end) = range::bounds(r)?;
                slice(target, start, end, false)
            }
            (Value::Object(_), _) => match self.find_hook(target, "__getitem__", 1) {
                Some(hook) => self.call_sync(hook, vec![target.clone(), index.clone()]),
                None => Err(RuntimeError::type_mismatch(
                    "indexable value",
                    &self.class_name_of(target),
                )),
            },
            (Value::Sequence(_) | Value::Str(_), other) => {
                Err(RuntimeError::type_mismatch("Int index", other.kind_name()))
            }
            (other, _) => Err(RuntimeError::type_mismatch(
                "indexable value",
                other.kind_name(),
            )),
        }
    }

    fn contains(&mut self, haystack: &Value, needle: &Value) -> Result<bool, RuntimeError> {
        let range_class = self.specials().range;
        match haystack {
            Value::Sequence(items) => {
                let items = items.borrow().clone();
                for item in &items {
                    if self.values_equal(item, needle)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Str(s) => match needle {
                Value::Str(n) => Ok(s.contains(&**n)),
                other => Err(RuntimeError::type_mismatch("Str", other.kind_name())),
            },
            Value::Object(r) if r.class() == range_class => match needle {
                Value::Int(v) => range::contains(r, *v),
                other => Err(RuntimeError::type_mismatch("Int", other.kind_name())),
            },
            Value::Object(_) => match self.find_hook(haystack, "contains", 1) {
                Some(hook) => {
                    match self.call_sync(hook, vec![haystack.clone(), needle.clone()])? {
                        Value::Bool(b) => Ok(b),
                        other => Err(RuntimeError::type_mismatch(
                            "Bool from contains",
                            other.kind_name(),
                        )),
                    }
                }
                None => Err(RuntimeError::type_mismatch(
                    "container",
                    &self.class_name_of(haystack),
                )),
            },
            other => Err(RuntimeError::type_mismatch("container", other.kind_name())),
        }
    }

    fn length(&mut self, value: &Value) -> Result<i64, RuntimeError> {
        let range_class = self.specials().range;
        match value {
            Value::Sequence(items) => Ok(items.borrow().len() as i64),
            Value::Str(s) => Ok(string::char_count(s) as i64),
            Value::Object(r) if r.class() == range_class => range::len(r),
            Value::Object(_) => match self.find_hook(value, "len", 0) {
                Some(hook) => match self.call_sync(hook, vec![value.clone()])? {
                    Value::Int(n) => Ok(n),
                    other => Err(RuntimeError::type_mismatch(
                        "Int from len",
                        other.kind_name(),
                    )),
                },
                None => Err(RuntimeError::type_mismatch(
                    "value with a length",
                    &self.class_name_of(value),
                )),
            },
            other => Err(RuntimeError::type_mismatch(
                "value with a length",
                other.kind_name(),
            )),
        }
    }
}

fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::None => Value::NONE,
        Constant::Int(v) => Value::Int(*v),
        Constant::Bool(v) => Value::Bool(*v),
        Constant::Str(s) => Value::str(s),
        // fresh per load so mutation never leaks into the pool
        Constant::Sequence(items) => {
            Value::sequence(items.iter().map(constant_value).collect())
        }
    }
}

type SeqPtr = *const RefCell<Vec<Value>>;

fn hash_of<T: Hash + ?Sized>(value: &T) -> i64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish() as i64
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, RuntimeError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => Err(RuntimeError::type_mismatch(
            "two Ints or two Strs",
            &format!("{} and {}", lhs.kind_name(), rhs.kind_name()),
        )),
    }
}

fn checked_index(index: i64, len: usize) -> Result<usize, RuntimeError> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| RuntimeError::index_out_of_range(index, len))
}

/// Slice with clamping: negative bounds fault, the end clamps to the length,
/// and an empty span yields an empty result. Bounds are checked before a
/// closed end is made exclusive.
fn slice(
    target: &Value,
    start: i64,
    end: i64,
    closed: bool,
) -> Result<Value, RuntimeError> {
    let len = match target {
        Value::Sequence(items) => items.borrow().len(),
        Value::Str(s) => string::char_count(s),
        other => {
            return Err(RuntimeError::type_mismatch(
                "Sequence or Str",
                other.kind_name(),
            ));
        }
    };
    if start < 0 {
        return Err(RuntimeError::index_out_of_range(start, len));
    }
    if end < 0 {
        return Err(RuntimeError::index_out_of_range(end, len));
    }
    let end = if closed { end.saturating_add(1) } else { end };
    let end = usize::try_from(end).unwrap_or(usize::MAX).min(len);
    let start = usize::try_from(start).unwrap_or(usize::MAX).min(end);
    Ok(match target {
        Value::Str(s) => string::substring(s, start, end),
        Value::Sequence(items) => Value::sequence(items.borrow()[start..end].to_vec()),
        _ => Value::NONE,
    })
}

fn set_item(target: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
    match (target, index) {
        (Value::Sequence(items), Value::Int(i)) => {
            let mut items = items.borrow_mut();
            let i = checked_index(*i, items.len())?;
            items[i] = value;
            Ok(())
        }
        (Value::Sequence(_), other) => {
            Err(RuntimeError::type_mismatch("Int index", other.kind_name()))
        }
        (other, _) => Err(RuntimeError::type_mismatch("Sequence", other.kind_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_clamp() {
        let seq = Value::sequence((1..=5).map(Value::Int).collect());
        let out = slice(&seq, 1, 3, false).unwrap();
        assert!(out.structural_eq(&Value::sequence(vec![Value::Int(2), Value::Int(3)])));

        let past_end = slice(&seq, 3, 100, false).unwrap();
        assert!(past_end.structural_eq(&Value::sequence(vec![Value::Int(4), Value::Int(5)])));

        let empty = slice(&seq, 4, 2, false).unwrap();
        assert!(empty.structural_eq(&Value::sequence(vec![])));

        let err = slice(&seq, -1, 2, false).unwrap_err();
        assert_eq!(err.kind, FaultKind::IndexOutOfRange);
    }

    #[test]
    fn closed_slices_check_the_end_before_including_it() {
        let seq = Value::sequence((1..=5).map(Value::Int).collect());
        let out = slice(&seq, 1, 2, true).unwrap();
        assert!(out.structural_eq(&Value::sequence(vec![Value::Int(2), Value::Int(3)])));

        let all = slice(&seq, 0, i64::MAX, true).unwrap();
        assert!(all.structural_eq(&seq));

        let err = slice(&seq, 0, -1, true).unwrap_err();
        assert_eq!(err.kind, FaultKind::IndexOutOfRange);
    }

    #[test]
    fn string_slices_count_characters() {
        let s = Value::str("añb");
        assert!(slice(&s, 1, 3, false).unwrap().structural_eq(&Value::str("ñb")));
    }

    #[test]
    fn index_bounds() {
        assert_eq!(checked_index(2, 3), Ok(2));
        assert_eq!(checked_index(3, 3).unwrap_err().kind, FaultKind::IndexOutOfRange);
        assert_eq!(checked_index(-1, 3).unwrap_err().kind, FaultKind::IndexOutOfRange);
    }

    #[test]
    fn sequence_constants_load_fresh() {
        let constant = Constant::Sequence(vec![Constant::Int(1), Constant::Str("a".into())]);
        let (a, b) = (constant_value(&constant), constant_value(&constant));
        let (Value::Sequence(a), Value::Sequence(b)) = (&a, &b) else {
            panic!("sequence constants load as sequences");
        };
        assert!(!std::rc::Rc::ptr_eq(a, b));
        a.borrow_mut().push(Value::Int(2));
        assert_eq!(b.borrow().len(), 2);
    }

    #[test]
    fn ordering() {
        assert_eq!(compare(&Value::Int(1), &Value::Int(2)), Ok(Ordering::Less));
        assert_eq!(compare(&Value::str("b"), &Value::str("a")), Ok(Ordering::Greater));
        assert_eq!(
            compare(&Value::Int(1), &Value::str("a")).unwrap_err().kind,
            FaultKind::TypeMismatch
        );
    }
}
