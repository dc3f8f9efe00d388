//! Lowers a resolved [`Module`] to bytecode routines and loads its traits
//! and classes into a fresh registry.

use std::collections::{HashMap, HashSet};

use bytecode::{
    BytecodeBuilder, Constant, ConstantPool, Label, Op, Routine,
    SourceMapBuilder,
};
use log::debug;
use object::{
    Callable, MethodImpl, Registry, RegistryError, RoutineId, SELF_PARAM,
    TraitMethod, TypeRef,
};
use thiserror::Error;

use crate::ast::{
    BinaryOp, CallTarget, Expr, Literal, MethodDecl, Module, Stmt, StmtKind,
    TraitDecl, TraitMethodDecl, UnaryOp,
};
use crate::primitives;
use crate::program::Program;
use crate::special;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("unknown local `{name}` in `{routine}`")]
    UnknownLocal { routine: String, name: String },
    #[error("unknown function `{name}` taking {arity} argument(s)")]
    UnknownFunction { name: String, arity: usize },
    #[error("function `{0}` is defined twice")]
    DuplicateFunction(String),
    #[error("unknown class `{0}`")]
    UnknownClass(String),
    #[error("class `{class}` has no field `{field}`")]
    UnknownField { class: String, field: String },
    #[error("constant pool of `{0}` is full")]
    TooManyConstants(String),
    #[error("jump in `{routine}` spans {distance} bytes")]
    JumpOutOfRange { routine: String, distance: isize },
    #[error("`{0}` must return a value")]
    ReturnArity(String),
    #[error("`{0}` uses too many local slots")]
    TooManyLocals(String),
    #[error("`{callee}` is passed {count} values, more than an operand allows")]
    TooManyArguments { callee: String, count: usize },
    #[error("program has more routines than fit a routine id")]
    TooManyRoutines,
    #[error("`{class}` has {expected} field(s) but was constructed with {found}")]
    ConstructorArity {
        class: String,
        expected: usize,
        found: usize,
    },
    #[error("`{routine}` names {names} parameter(s) but its signature has {params}")]
    ParameterNames {
        routine: String,
        names: usize,
        params: usize,
    },
}

pub type Result<T> = std::result::Result<T, CompileError>;

pub const ENTRY_NAME: &str = "main";

struct FunctionInfo {
    id: RoutineId,
    arity: usize,
    ret: TypeRef,
}

/// One routine to compile: its receiver (if any), explicit parameters and
/// body.
struct Unit<'m> {
    name: String,
    receiver: Option<TypeRef>,
    params: Vec<(String, TypeRef)>,
    ret: TypeRef,
    body: &'m [Stmt],
}

enum Job<'m> {
    Function(&'m MethodDecl),
    Method {
        class: &'m str,
        method: &'m MethodDecl,
    },
    Default {
        owner: &'m TraitDecl,
        method: &'m TraitMethodDecl,
        body: &'m [Stmt],
    },
}

impl<'m> Job<'m> {
    fn unit(&self) -> Result<Unit<'m>> {
        Ok(match *self {
            Job::Function(decl) => Unit {
                name: decl.name.clone(),
                receiver: None,
                params: decl.params.clone(),
                ret: decl.ret.clone(),
                body: &decl.body,
            },
            Job::Method { class, method } => Unit {
                name: format!("{class}.{}", method.name),
                receiver: Some(TypeRef::named(class)),
                params: method.params.clone(),
                ret: method.ret.clone(),
                body: &method.body,
            },
            Job::Default {
                owner,
                method,
                body,
            } => {
                let name = format!("{}.{}", owner.name, method.sig.name);
                if method.param_names.len() != method.sig.params.len() {
                    return Err(CompileError::ParameterNames {
                        routine: name,
                        names: method.param_names.len(),
                        params: method.sig.params.len(),
                    });
                }
                Unit {
                    name,
                    receiver: Some(TypeRef::param(SELF_PARAM)),
                    params: method
                        .param_names
                        .iter()
                        .cloned()
                        .zip(method.sig.params.iter().cloned())
                        .collect(),
                    ret: method.sig.ret.clone(),
                    body,
                }
            }
        })
    }
}

fn routine_id(index: usize) -> Result<RoutineId> {
    u16::try_from(index)
        .map(RoutineId)
        .map_err(|_| CompileError::TooManyRoutines)
}

/// Load `module`: register its traits and classes after the builtins and
/// compile every function, method, trait default and the entry block.
///
/// Routine ids are assigned functions first, then trait defaults, then
/// class methods; the entry block comes last.
pub fn compile_module(module: &Module) -> Result<Program> {
    let mut registry = Registry::new();
    let specials = special::bootstrap(&mut registry)?;

    let mut jobs: Vec<Job<'_>> = Vec::new();
    let mut functions = HashMap::new();
    for decl in &module.functions {
        let info = FunctionInfo {
            id: routine_id(jobs.len())?,
            arity: decl.params.len(),
            ret: decl.ret.clone(),
        };
        if functions.insert(decl.name.clone(), info).is_some() {
            return Err(CompileError::DuplicateFunction(decl.name.clone()));
        }
        jobs.push(Job::Function(decl));
    }

    for decl in &module.traits {
        let mut methods = Vec::with_capacity(decl.methods.len());
        for method in &decl.methods {
            match &method.default {
                Some(body) => {
                    let id = routine_id(jobs.len())?;
                    jobs.push(Job::Default {
                        owner: decl,
                        method,
                        body,
                    });
                    methods.push(TraitMethod::with_default(
                        method.sig.clone(),
                        Callable::Routine(id),
                    ));
                }
                None => methods.push(TraitMethod::required(method.sig.clone())),
            }
        }
        registry.register_trait(object::TraitDecl {
            name: decl.name.clone(),
            type_params: decl.type_params.clone(),
            requires: decl.requires.clone(),
            methods,
        })?;
    }

    for decl in &module.classes {
        let mut methods = Vec::with_capacity(decl.methods.len());
        for method in &decl.methods {
            let id = routine_id(jobs.len())?;
            jobs.push(Job::Method {
                class: &decl.name,
                method,
            });
            methods.push(MethodImpl {
                sig: method.sig(),
                body: Callable::Routine(id),
            });
        }
        registry.register_class(object::ClassDecl {
            name: decl.name.clone(),
            fields: decl.fields.clone(),
            conformances: decl.conformances.clone(),
            methods,
        })?;
    }

    let mut routines = Vec::with_capacity(jobs.len() + 1);
    for job in &jobs {
        let unit = job.unit()?;
        routines.push(compile_unit(&registry, &functions, &unit)?);
    }
    let entry = routine_id(routines.len())?;
    routines.push(compile_unit(
        &registry,
        &functions,
        &Unit {
            name: ENTRY_NAME.to_string(),
            receiver: None,
            params: Vec::new(),
            ret: TypeRef::Any,
            body: &module.entry,
        },
    )?);

    debug!(
        "loaded {} class(es), compiled {} routine(s)",
        registry.classes().count(),
        routines.len()
    );
    Ok(Program::new(
        registry,
        specials,
        routines,
        primitives::natives(),
        entry,
    ))
}

/// Compile one routine. Inferred locals later assigned a value of another
/// static type are demoted to `Any` and the routine is compiled again, so
/// no specialized opcode is emitted for a local that can change type.
fn compile_unit(
    registry: &Registry,
    functions: &HashMap<String, FunctionInfo>,
    unit: &Unit<'_>,
) -> Result<Routine> {
    let mut demoted = HashSet::new();
    loop {
        let (routine, fresh) =
            RoutineCompiler::new(registry, functions, unit, &demoted)?
                .compile(unit.body)?;
        if fresh.is_empty() {
            return Ok(routine);
        }
        debug!("{}: recompiling with {} demoted local(s)", unit.name, fresh.len());
        demoted.extend(fresh);
    }
}

#[derive(Debug, Clone)]
struct Local {
    reg: u16,
    ty: TypeRef,
    /// Declaration id for inferred locals; annotated ones are trusted.
    decl: Option<usize>,
}

struct Block {
    locals: HashMap<String, Local>,
    first_reg: u16,
}

/// Lexical scopes of one routine. Registers of a closed block are reused.
struct Scope {
    blocks: Vec<Block>,
    next_reg: u16,
    max_reg: u16,
}

impl Scope {
    fn new() -> Self {
        Self {
            blocks: vec![Block {
                locals: HashMap::new(),
                first_reg: 0,
            }],
            next_reg: 0,
            max_reg: 0,
        }
    }

    fn push_block(&mut self) {
        self.blocks.push(Block {
            locals: HashMap::new(),
            first_reg: self.next_reg,
        });
    }

    fn pop_block(&mut self) {
        if self.blocks.len() > 1 {
            if let Some(block) = self.blocks.pop() {
                self.next_reg = block.first_reg;
            }
        }
    }

    fn declare(&mut self, name: &str, ty: TypeRef, decl: Option<usize>) -> Option<u16> {
        let reg = self.next_reg;
        self.next_reg = reg.checked_add(1)?;
        self.max_reg = self.max_reg.max(self.next_reg);
        self.blocks
            .last_mut()?
            .locals
            .insert(name.to_string(), Local { reg, ty, decl });
        Some(reg)
    }

    fn lookup(&self, name: &str) -> Option<&Local> {
        self.blocks.iter().rev().find_map(|b| b.locals.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Local> {
        self.blocks
            .iter_mut()
            .rev()
            .find_map(|b| b.locals.get_mut(name))
    }
}

struct RoutineCompiler<'a> {
    registry: &'a Registry,
    functions: &'a HashMap<String, FunctionInfo>,
    demoted: &'a HashSet<usize>,
    fresh: HashSet<usize>,
    next_decl: usize,
    name: String,
    ret: TypeRef,
    params: u16,
    builder: BytecodeBuilder,
    constants: ConstantPool,
    source_map: SourceMapBuilder,
    scope: Scope,
}

impl<'a> RoutineCompiler<'a> {
    fn new(
        registry: &'a Registry,
        functions: &'a HashMap<String, FunctionInfo>,
        unit: &Unit<'_>,
        demoted: &'a HashSet<usize>,
    ) -> Result<Self> {
        let mut compiler = Self {
            registry,
            functions,
            demoted,
            fresh: HashSet::new(),
            next_decl: 0,
            name: unit.name.clone(),
            ret: unit.ret.clone(),
            params: 0,
            builder: BytecodeBuilder::new(),
            constants: ConstantPool::new(),
            source_map: SourceMapBuilder::new(),
            scope: Scope::new(),
        };
        if let Some(ty) = &unit.receiver {
            compiler.declare("self", ty.clone(), None)?;
        }
        for (name, ty) in &unit.params {
            compiler.declare(name, ty.clone(), None)?;
        }
        compiler.params = compiler.scope.next_reg;
        Ok(compiler)
    }

    fn compile(mut self, body: &[Stmt]) -> Result<(Routine, HashSet<usize>)> {
        self.statements(body)?;
        if !matches!(body.last().map(|s| &s.kind), Some(StmtKind::Return(_))) {
            self.builder.simple(Op::LoadNone);
            self.builder.simple(Op::Return);
        }
        let routine = Routine {
            name: self.name,
            params: self.params,
            locals: self.scope.max_reg,
            code: self.builder.into_bytes(),
            constants: self.constants.into_vec(),
            source_map: self.source_map.finish(),
        };
        Ok((routine, self.fresh))
    }

    // Helpers.

    fn declare(&mut self, name: &str, ty: TypeRef, decl: Option<usize>) -> Result<u16> {
        self.scope
            .declare(name, ty, decl)
            .ok_or_else(|| CompileError::TooManyLocals(self.name.clone()))
    }

    /// A fresh declaration id for an inferred local, and its type after
    /// demotion.
    fn inferred(&mut self, ty: TypeRef) -> (Option<usize>, TypeRef) {
        let id = self.next_decl;
        self.next_decl += 1;
        if self.demoted.contains(&id) {
            (Some(id), TypeRef::Any)
        } else {
            (Some(id), ty)
        }
    }

    fn local(&self, name: &str) -> Result<&Local> {
        self.scope
            .lookup(name)
            .ok_or_else(|| CompileError::UnknownLocal {
                routine: self.name.clone(),
                name: name.to_string(),
            })
    }

    fn constant(&mut self, constant: Constant) -> Result<u16> {
        self.constants
            .add(constant)
            .map_err(|_| CompileError::TooManyConstants(self.name.clone()))
    }

    fn bind(&mut self, label: Label) -> Result<()> {
        self.builder
            .bind(label)
            .map_err(|e| CompileError::JumpOutOfRange {
                routine: self.name.clone(),
                distance: e.distance,
            })
    }

    fn jump_back(&mut self, target: usize) -> Result<()> {
        self.builder
            .jump_back(target)
            .map_err(|e| CompileError::JumpOutOfRange {
                routine: self.name.clone(),
                distance: e.distance,
            })
    }

    fn count<T: TryFrom<usize>>(&self, callee: &str, count: usize) -> Result<T> {
        T::try_from(count).map_err(|_| CompileError::TooManyArguments {
            callee: callee.to_string(),
            count,
        })
    }

    fn class_id(&self, class: &str) -> Result<object::ClassId> {
        self.registry
            .class_id(class)
            .ok_or_else(|| CompileError::UnknownClass(class.to_string()))
    }

    fn field_slot(&self, class: &str, field: &str) -> Result<u16> {
        let id = self.class_id(class)?;
        self.registry
            .class(id)
            .and_then(|c| c.field_slot(field))
            .ok_or_else(|| CompileError::UnknownField {
                class: class.to_string(),
                field: field.to_string(),
            })
    }

    // Static types.

    /// The static type of `expr`, or `Any` when it is not known.
    fn static_type(&self, expr: &Expr) -> TypeRef {
        match expr {
            Expr::Literal(Literal::Int(_)) => TypeRef::Int,
            Expr::Literal(Literal::Bool(_)) => TypeRef::Bool,
            Expr::Literal(Literal::Str(_)) => TypeRef::Str,
            Expr::Literal(Literal::None) => TypeRef::optional(TypeRef::Any),
            Expr::Local(name) => self
                .scope
                .lookup(name)
                .map_or(TypeRef::Any, |l| l.ty.clone()),
            Expr::SelfRef => self
                .scope
                .lookup("self")
                .map_or(TypeRef::Any, |l| l.ty.clone()),
            Expr::Sequence(_) => TypeRef::sequence(TypeRef::Any),
            Expr::Range { .. } => TypeRef::named("Range"),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg if self.is_int(operand) => TypeRef::Int,
                UnaryOp::Neg => TypeRef::Any,
                UnaryOp::Not => TypeRef::Bool,
                UnaryOp::ToStr => TypeRef::Str,
                UnaryOp::Hash => TypeRef::Int,
            },
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge => TypeRef::Bool,
                BinaryOp::And | BinaryOp::Or => TypeRef::Any,
                _ if self.is_int(lhs) && self.is_int(rhs) => TypeRef::Int,
                BinaryOp::Add
                    if self.static_type(lhs) == TypeRef::Str
                        && self.static_type(rhs) == TypeRef::Str =>
                {
                    TypeRef::Str
                }
                _ => TypeRef::Any,
            },
            Expr::Index { target, index } => {
                match (self.static_type(target), index.as_ref()) {
                    (ty @ (TypeRef::Sequence(_) | TypeRef::Str), Expr::Range { .. }) => ty,
                    (TypeRef::Sequence(item), _) => *item,
                    (TypeRef::Str, _) => TypeRef::Str,
                    _ => TypeRef::Any,
                }
            }
            Expr::Slice { target, .. } => match self.static_type(target) {
                ty @ (TypeRef::Sequence(_) | TypeRef::Str) => ty,
                _ => TypeRef::Any,
            },
            Expr::Contains { .. } => TypeRef::Bool,
            Expr::Call {
                method,
                args,
                target,
                ..
            } => match target {
                CallTarget::Function => self
                    .functions
                    .get(method)
                    .map_or(TypeRef::Any, |f| f.ret.clone()),
                CallTarget::Static(class) => self
                    .registry
                    .class_id(class)
                    .and_then(|id| self.registry.method_sig(id, method, args.len()))
                    .map_or(TypeRef::Any, |sig| sig.ret.clone()),
                CallTarget::Dynamic => TypeRef::Any,
            },
            Expr::Construct { class, .. } => TypeRef::named(class.clone()),
            Expr::Field { .. } => TypeRef::Any,
            Expr::Some(inner) => TypeRef::optional(self.static_type(inner)),
            Expr::Len(_) => TypeRef::Int,
        }
    }

    fn is_int(&self, expr: &Expr) -> bool {
        self.static_type(expr) == TypeRef::Int
    }

    fn element_type(&self, iterable: &Expr) -> TypeRef {
        match self.static_type(iterable) {
            TypeRef::Sequence(item) => *item,
            TypeRef::Str => TypeRef::Str,
            TypeRef::Named { name, .. } if name == "Range" => TypeRef::Int,
            _ => TypeRef::Any,
        }
    }

    // Statements.

    fn statements(&mut self, body: &[Stmt]) -> Result<()> {
        for stmt in body {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn block(&mut self, body: &[Stmt]) -> Result<()> {
        self.scope.push_block();
        let result = self.statements(body);
        self.scope.pop_block();
        result
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<()> {
        self.source_map
            .add(self.builder.current_offset() as u32, stmt.span);
        match &stmt.kind {
            StmtKind::Let { name, ty, value } => {
                let (decl, ty) = match ty {
                    Some(ty) => (None, ty.clone()),
                    None => self.inferred(self.static_type(value)),
                };
                self.expr(value)?;
                let reg = self.declare(name, ty, decl)?;
                self.builder.store_local(reg);
            }
            StmtKind::Assign { name, value } => {
                let value_ty = self.static_type(value);
                let routine = &self.name;
                let local = self.scope.lookup_mut(name).ok_or_else(|| {
                    CompileError::UnknownLocal {
                        routine: routine.clone(),
                        name: name.clone(),
                    }
                })?;
                if local.ty != TypeRef::Any && local.ty != value_ty {
                    if let Some(id) = local.decl {
                        local.ty = TypeRef::Any;
                        self.fresh.insert(id);
                    }
                }
                let reg = local.reg;
                self.expr(value)?;
                self.builder.store_local(reg);
            }
            StmtKind::SetField {
                target,
                class,
                name,
                value,
            } => {
                let slot = self.field_slot(class, name)?;
                self.expr(target)?;
                self.expr(value)?;
                self.builder.store_field(slot);
            }
            StmtKind::SetIndex {
                target,
                index,
                value,
            } => {
                self.expr(target)?;
                self.expr(index)?;
                self.expr(value)?;
                self.builder.simple(Op::SetItem);
            }
            StmtKind::Expr(Expr::Call {
                receiver,
                method,
                args,
                target,
            }) => {
                self.call(receiver.as_deref(), method, args, target, 0)?;
            }
            StmtKind::Expr(expr) => {
                self.expr(expr)?;
                self.builder.simple(Op::Pop);
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond)?;
                let else_label = self.builder.jump_if_false();
                self.block(then)?;
                if otherwise.is_empty() {
                    self.bind(else_label)?;
                } else {
                    let end = self.builder.jump();
                    self.bind(else_label)?;
                    self.block(otherwise)?;
                    self.bind(end)?;
                }
            }
            StmtKind::While { cond, body } => {
                let top = self.builder.current_offset();
                self.expr(cond)?;
                let exit = self.builder.jump_if_false();
                self.block(body)?;
                self.jump_back(top)?;
                self.bind(exit)?;
            }
            StmtKind::For {
                var,
                iterable,
                body,
            } => {
                let item_ty = self.element_type(iterable);
                self.expr(iterable)?;
                self.builder.simple(Op::GetIter);
                let top = self.builder.current_offset();
                self.builder.simple(Op::IterNext);
                let exit = self.builder.jump_if_none();
                self.scope.push_block();
                let (decl, ty) = self.inferred(item_ty);
                let result = self.declare(var, ty, decl).and_then(|reg| {
                    self.builder.store_local(reg);
                    self.statements(body)
                });
                self.scope.pop_block();
                result?;
                self.jump_back(top)?;
                self.bind(exit)?;
                // the iterator left under the exhausted optional
                self.builder.simple(Op::Pop);
            }
            StmtKind::Return(Some(value)) => {
                self.expr(value)?;
                self.builder.simple(Op::Return);
            }
            StmtKind::Return(None) => {
                if !matches!(self.ret, TypeRef::Any | TypeRef::Optional(_)) {
                    return Err(CompileError::ReturnArity(self.name.clone()));
                }
                self.builder.simple(Op::LoadNone);
                self.builder.simple(Op::Return);
            }
        }
        Ok(())
    }

    // Expressions.

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal(lit) => self.literal(lit)?,
            Expr::Local(name) => {
                let reg = self.local(name)?.reg;
                self.builder.load_local(reg);
            }
            Expr::SelfRef => {
                let reg = self.local("self")?.reg;
                self.builder.load_local(reg);
            }
            Expr::Sequence(items) => match constant_of(expr) {
                Some(constant) => {
                    let idx = self.constant(constant)?;
                    self.builder.load_const(idx);
                }
                None => {
                    for item in items {
                        self.expr(item)?;
                    }
                    let count = self.count("sequence literal", items.len())?;
                    self.builder.new_sequence(count);
                }
            },
            Expr::Range { start, end, closed } => {
                self.expr(start)?;
                self.expr(end)?;
                self.builder.new_range(*closed);
            }
            Expr::Unary { op, operand } => {
                let int = self.is_int(operand);
                self.expr(operand)?;
                self.builder.simple(match op {
                    UnaryOp::Neg if int => Op::IntNeg,
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                    UnaryOp::ToStr => Op::ToStr,
                    UnaryOp::Hash => Op::Hash,
                });
            }
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs)?,
            Expr::Index { target, index } => match index.as_ref() {
                Expr::Range { start, end, closed } => {
                    self.expr(target)?;
                    self.expr(start)?;
                    self.expr(end)?;
                    self.builder.slice(*closed);
                }
                index => {
                    self.expr(target)?;
                    self.expr(index)?;
                    self.builder.simple(Op::GetItem);
                }
            },
            Expr::Slice {
                target,
                start,
                end,
                closed,
            } => {
                self.expr(target)?;
                self.expr(start)?;
                self.expr(end)?;
                self.builder.slice(*closed);
            }
            Expr::Contains { needle, haystack } => {
                self.expr(needle)?;
                self.expr(haystack)?;
                self.builder.simple(Op::Contains);
            }
            Expr::Call {
                receiver,
                method,
                args,
                target,
            } => self.call(receiver.as_deref(), method, args, target, 1)?,
            Expr::Construct { class, args } => self.construct(class, args)?,
            Expr::Field {
                target,
                class,
                name,
            } => {
                let slot = self.field_slot(class, name)?;
                self.expr(target)?;
                self.builder.load_field(slot);
            }
            Expr::Some(inner) => {
                self.expr(inner)?;
                self.builder.simple(Op::WrapSome);
            }
            Expr::Len(inner) => {
                self.expr(inner)?;
                self.builder.simple(Op::Len);
            }
        }
        Ok(())
    }

    fn literal(&mut self, lit: &Literal) -> Result<()> {
        match lit {
            Literal::Int(v) => match i32::try_from(*v) {
                Ok(small) => self.builder.load_smi(small),
                Err(_) => {
                    let idx = self.constant(Constant::Int(*v))?;
                    self.builder.load_const(idx);
                }
            },
            Literal::Bool(true) => self.builder.simple(Op::LoadTrue),
            Literal::Bool(false) => self.builder.simple(Op::LoadFalse),
            Literal::Str(s) => {
                let idx = self.constant(Constant::Str(s.clone()))?;
                self.builder.load_const(idx);
            }
            Literal::None => self.builder.simple(Op::LoadNone),
        }
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<()> {
        let compare = match op {
            BinaryOp::Eq => Some(Op::Eq),
            BinaryOp::Ne => Some(Op::Ne),
            BinaryOp::Lt => Some(Op::Lt),
            BinaryOp::Le => Some(Op::Le),
            BinaryOp::Gt => Some(Op::Gt),
            BinaryOp::Ge => Some(Op::Ge),
            _ => None,
        };
        if let Some(compare) = compare {
            self.expr(lhs)?;
            self.expr(rhs)?;
            self.builder.simple(compare);
            return Ok(());
        }

        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            self.expr(lhs)?;
            self.builder.simple(Op::Dup);
            let end = if op == BinaryOp::And {
                self.builder.jump_if_false()
            } else {
                self.builder.jump_if_true()
            };
            self.builder.simple(Op::Pop);
            self.expr(rhs)?;
            return self.bind(end);
        }

        let Some(ops) = ArithOps::of(op) else {
            return Ok(());
        };
        let ints = self.is_int(lhs) && self.is_int(rhs);
        if !ints && !ops.always_int {
            self.expr(lhs)?;
            self.expr(rhs)?;
            self.builder.simple(ops.generic);
            return Ok(());
        }
        match (ops.imm, small_int(lhs), small_int(rhs)) {
            (Some(imm), _, Some(value)) if ints => {
                self.expr(lhs)?;
                self.builder.int_imm(imm, value);
            }
            (Some(imm), Some(value), _) if ints && ops.commutative => {
                self.expr(rhs)?;
                self.builder.int_imm(imm, value);
            }
            _ => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.builder.simple(ops.int);
            }
        }
        Ok(())
    }

    fn receiver(&mut self, receiver: Option<&Expr>) -> Result<()> {
        match receiver {
            Some(expr) => self.expr(expr),
            None => self.expr(&Expr::SelfRef),
        }
    }

    fn call(
        &mut self,
        receiver: Option<&Expr>,
        method: &str,
        args: &[Expr],
        target: &CallTarget,
        returns: u8,
    ) -> Result<()> {
        match target {
            CallTarget::Function => {
                let id = self
                    .functions
                    .get(method)
                    .filter(|f| f.arity == args.len())
                    .map(|f| f.id)
                    .ok_or_else(|| CompileError::UnknownFunction {
                        name: method.to_string(),
                        arity: args.len(),
                    })?;
                let argc = self.count(method, args.len())?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.builder.call(id.0, argc, returns);
            }
            CallTarget::Static(class) => {
                let class_id = self.class_id(class)?;
                let callable = self.registry.resolve_method(class_id, method, args.len())?;
                let argc = self.count(method, args.len() + 1)?;
                self.receiver(receiver)?;
                for arg in args {
                    self.expr(arg)?;
                }
                match callable {
                    Callable::Routine(id) => self.builder.call(id.0, argc, returns),
                    Callable::Native(id) => self.builder.call_native(id.0, argc, returns),
                }
            }
            CallTarget::Dynamic => {
                let argc = self.count(method, args.len())?;
                let name = self.constant(Constant::Str(method.to_string()))?;
                self.receiver(receiver)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.builder.invoke(name, argc, returns);
            }
        }
        Ok(())
    }

    /// `New`, then either `__init__` with the arguments or positional
    /// field stores.
    fn construct(&mut self, class: &str, args: &[Expr]) -> Result<()> {
        let id = self.class_id(class)?;
        self.builder.new_object(id.0);
        match self.registry.resolve_name(id, "__init__", args.len()) {
            Some(init) => {
                let argc = self.count(class, args.len() + 1)?;
                self.builder.simple(Op::Dup);
                for arg in args {
                    self.expr(arg)?;
                }
                match init {
                    Callable::Routine(r) => self.builder.call(r.0, argc, 0),
                    Callable::Native(n) => self.builder.call_native(n.0, argc, 0),
                }
            }
            None => {
                let fields = self.registry.class(id).map_or(0, |c| c.field_count());
                if args.len() > fields {
                    return Err(CompileError::ConstructorArity {
                        class: class.to_string(),
                        expected: fields,
                        found: args.len(),
                    });
                }
                for (slot, arg) in args.iter().enumerate() {
                    self.builder.simple(Op::Dup);
                    self.expr(arg)?;
                    self.builder.store_field(slot as u16);
                }
            }
        }
        Ok(())
    }
}

struct ArithOps {
    int: Op,
    generic: Op,
    imm: Option<Op>,
    commutative: bool,
    /// Bitwise operators have no generic form.
    always_int: bool,
}

impl ArithOps {
    fn of(op: BinaryOp) -> Option<Self> {
        let arith = |int, generic, imm, commutative| ArithOps {
            int,
            generic,
            imm: Some(imm),
            commutative,
            always_int: false,
        };
        let bitwise = |int| ArithOps {
            int,
            generic: int,
            imm: None,
            commutative: true,
            always_int: true,
        };
        Some(match op {
            BinaryOp::Add => arith(Op::IntAdd, Op::Add, Op::IntAddImm, true),
            BinaryOp::Sub => arith(Op::IntSub, Op::Sub, Op::IntSubImm, false),
            BinaryOp::Mul => arith(Op::IntMul, Op::Mul, Op::IntMulImm, true),
            BinaryOp::Div => arith(Op::IntDiv, Op::Div, Op::IntDivImm, false),
            BinaryOp::Mod => arith(Op::IntMod, Op::Mod, Op::IntModImm, false),
            BinaryOp::BitAnd => bitwise(Op::IntAnd),
            BinaryOp::BitOr => bitwise(Op::IntOr),
            BinaryOp::BitXor => bitwise(Op::IntXor),
            BinaryOp::Shl => bitwise(Op::IntShl),
            BinaryOp::Shr => bitwise(Op::IntShr),
            _ => return None,
        })
    }
}

fn small_int(expr: &Expr) -> Option<i32> {
    match expr {
        Expr::Literal(Literal::Int(v)) => i32::try_from(*v).ok(),
        _ => None,
    }
}

/// The pool constant for a literal built only from other literals.
fn constant_of(expr: &Expr) -> Option<Constant> {
    match expr {
        Expr::Literal(Literal::Int(v)) => Some(Constant::Int(*v)),
        Expr::Literal(Literal::Bool(v)) => Some(Constant::Bool(*v)),
        Expr::Literal(Literal::Str(s)) => Some(Constant::Str(s.clone())),
        Expr::Literal(Literal::None) => Some(Constant::None),
        Expr::Sequence(items) => items
            .iter()
            .map(constant_of)
            .collect::<Option<Vec<_>>>()
            .map(Constant::Sequence),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use bytecode::{Instruction, Span};
    use object::TraitRef;

    use super::*;
    use crate::ast::ClassDecl;

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt::new(kind, Span::new(0, 1))
    }

    fn let_(name: &str, value: Expr) -> Stmt {
        stmt(StmtKind::Let {
            name: name.into(),
            ty: None,
            value,
        })
    }

    fn ret(value: Expr) -> Stmt {
        stmt(StmtKind::Return(Some(value)))
    }

    fn entry_of(module: &Module) -> Vec<Instruction> {
        let program = compile_module(module).unwrap();
        let routine = program.routine(program.entry()).unwrap();
        routine
            .instructions()
            .unwrap()
            .into_iter()
            .map(|(_, insn)| insn)
            .collect()
    }

    #[test]
    fn int_locals_use_immediate_add() {
        let module = Module {
            entry: vec![
                let_("a", Expr::int(1)),
                ret(Expr::binary(BinaryOp::Add, Expr::local("a"), Expr::int(2))),
            ],
            ..Module::default()
        };
        let code = entry_of(&module);
        assert!(code.contains(&Instruction::IntAddImm { value: 2 }));
        assert!(!code.contains(&Instruction::Add));
    }

    #[test]
    fn commutative_literal_on_the_left() {
        let module = Module {
            entry: vec![
                let_("a", Expr::int(4)),
                ret(Expr::binary(BinaryOp::Mul, Expr::int(3), Expr::local("a"))),
            ],
            ..Module::default()
        };
        assert!(entry_of(&module).contains(&Instruction::IntMulImm { value: 3 }));
    }

    #[test]
    fn untyped_operands_use_generic_ops() {
        let module = Module {
            functions: vec![MethodDecl {
                name: "add".into(),
                params: vec![("x".into(), TypeRef::Any)],
                ret: TypeRef::Any,
                body: vec![ret(Expr::binary(BinaryOp::Add, Expr::local("x"), Expr::int(1)))],
            }],
            ..Module::default()
        };
        let program = compile_module(&module).unwrap();
        let add = program.routine(program.routine_id("add").unwrap()).unwrap();
        let code: Vec<_> = add.instructions().unwrap().into_iter().map(|(_, i)| i).collect();
        assert!(code.contains(&Instruction::Add));
    }

    #[test]
    fn reassigned_local_is_demoted() {
        let module = Module {
            entry: vec![
                let_("x", Expr::int(1)),
                stmt(StmtKind::Assign {
                    name: "x".into(),
                    value: Expr::str("s"),
                }),
                ret(Expr::binary(BinaryOp::Add, Expr::local("x"), Expr::int(1))),
            ],
            ..Module::default()
        };
        let code = entry_of(&module);
        assert!(code.contains(&Instruction::Add));
        assert!(!code.contains(&Instruction::IntAddImm { value: 1 }));
    }

    #[test]
    fn constant_sequences_come_from_the_pool() {
        let module = Module {
            entry: vec![ret(Expr::Sequence(vec![Expr::int(1), Expr::str("a")]))],
            ..Module::default()
        };
        let program = compile_module(&module).unwrap();
        let main = program.routine(program.entry()).unwrap();
        assert_eq!(
            main.constants,
            vec![Constant::Sequence(vec![Constant::Int(1), Constant::Str("a".into())])]
        );
        let code: Vec<_> = main.instructions().unwrap().into_iter().map(|(_, i)| i).collect();
        assert_eq!(code[0], Instruction::LoadConst { idx: 0 });
    }

    #[test]
    fn for_loop_shape() {
        let module = Module {
            entry: vec![stmt(StmtKind::For {
                var: "i".into(),
                iterable: Expr::range(Expr::int(0), Expr::int(3), false),
                body: Vec::new(),
            })],
            ..Module::default()
        };
        let code = entry_of(&module);
        let shape: Vec<Op> = code.iter().map(|i| i.op()).collect();
        assert_eq!(
            shape,
            vec![
                Op::LoadSmi,
                Op::LoadSmi,
                Op::NewRange,
                Op::GetIter,
                Op::IterNext,
                Op::JumpIfNone,
                Op::StoreLocal,
                Op::Jump,
                Op::Pop,
                Op::LoadNone,
                Op::Return,
            ]
        );
    }

    #[test]
    fn statement_calls_discard_results() {
        let module = Module {
            functions: vec![MethodDecl {
                name: "f".into(),
                params: vec![("x".into(), TypeRef::Int)],
                ret: TypeRef::Int,
                body: vec![ret(Expr::local("x"))],
            }],
            entry: vec![stmt(StmtKind::Expr(Expr::call("f", vec![Expr::int(1)])))],
            ..Module::default()
        };
        let code = entry_of(&module);
        assert!(code.contains(&Instruction::Call {
            routine: 0,
            argc: 1,
            returns: 0,
        }));
        assert!(!code.contains(&Instruction::Pop));
    }

    #[test]
    fn static_calls_bind_natives() {
        let module = Module {
            entry: vec![ret(Expr::call_static(
                Expr::Sequence(vec![Expr::int(1)]),
                "Sequence",
                "len",
                Vec::new(),
            ))],
            ..Module::default()
        };
        assert!(entry_of(&module).contains(&Instruction::CallNative {
            native: primitives::SEQUENCE_LEN.0,
            argc: 1,
            returns: 1,
        }));
    }

    #[test]
    fn errors() {
        let unknown = Module {
            entry: vec![ret(Expr::local("nope"))],
            ..Module::default()
        };
        assert!(matches!(
            compile_module(&unknown),
            Err(CompileError::UnknownLocal { name, .. }) if name == "nope"
        ));

        let bare_return = Module {
            functions: vec![MethodDecl {
                name: "f".into(),
                params: Vec::new(),
                ret: TypeRef::Int,
                body: vec![stmt(StmtKind::Return(None))],
            }],
            ..Module::default()
        };
        assert_eq!(
            compile_module(&bare_return).err(),
            Some(CompileError::ReturnArity("f".into()))
        );

        let too_many_fields = Module {
            classes: vec![ClassDecl {
                name: "P".into(),
                fields: vec!["x".into()],
                conformances: Vec::new(),
                methods: Vec::new(),
            }],
            entry: vec![ret(Expr::construct("P", vec![Expr::int(1), Expr::int(2)]))],
            ..Module::default()
        };
        assert!(matches!(
            compile_module(&too_many_fields),
            Err(CompileError::ConstructorArity { expected: 1, found: 2, .. })
        ));
    }

    #[test]
    fn cyclic_traits_fail_to_load() {
        let cyclic = |name: &str, other: &str| TraitDecl {
            name: name.into(),
            type_params: Vec::new(),
            requires: vec![TraitRef::new(other, Vec::new())],
            methods: Vec::new(),
        };
        let module = Module {
            traits: vec![cyclic("A", "B"), cyclic("B", "A")],
            ..Module::default()
        };
        assert!(matches!(
            compile_module(&module),
            Err(CompileError::Registry(RegistryError::CyclicConformance { .. }))
        ));
    }
}
