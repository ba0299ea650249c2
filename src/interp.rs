//! A concrete interpreter for the IR.
//!
//! Executes a function with given argument values, dispatching calls whose
//! callee is not defined in the module to a caller-supplied handler. Hooking
//! the observation-sink symbol through [`observation_sink`] makes an
//! instrumented module write a real log while it runs.

use std::rc::Rc;

use slotmap::SecondaryMap;
use thiserror::Error;

use crate::ir::{
    BinOp, BlockId, CmpOp, Const, FCmpOp, Func, FuncId, InstrId, InstrKind, Module, Operand,
    Terminator,
};
use crate::value_log::{Record, ValueLog, SINK_SYMBOL};

const MAX_STEPS: u64 = 1 << 20;
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A signed integer of the given bit width; `value` always holds the
    /// sign-extended representation.
    Int { value: i64, width: u32 },
    Float(f64),
    Cell(usize),
    Str(Rc<str>),
}

impl Value {
    pub fn int(value: i64, width: u32) -> Self {
        Self::Int {
            value: norm(value, width),
            width,
        }
    }

    pub fn i32(value: i32) -> Self {
        Self::int(value as i64, 32)
    }

    fn as_int(&self) -> Result<(i64, u32), InterpError> {
        match *self {
            Self::Int { value, width } => Ok((value, width)),
            _ => Err(InterpError::TypeMismatch),
        }
    }
}

/// Sign-extends the low `width` bits of `value`.
fn norm(value: i64, width: u32) -> i64 {
    if width >= 64 {
        value
    } else {
        let shift = 64 - width;
        (value << shift) >> shift
    }
}

fn unsigned(value: i64, width: u32) -> u64 {
    if width >= 64 {
        value as u64
    } else {
        (value as u64) & ((1u64 << width) - 1)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("call to unknown external function `{0}`")]
    UnknownExtern(String),

    #[error("bad arguments in a call to `{0}`")]
    BadExternArgs(String),

    #[error("function `{0}` called with {1} arguments, expected {2}")]
    ArityMismatch(String, usize, usize),

    #[error("operand type does not match the operation")]
    TypeMismatch,

    #[error("load from an uninitialized stack slot")]
    UninitializedLoad,

    #[error("reached an unreachable terminator")]
    Unreachable,

    #[error("phi has no incoming value for the edge taken")]
    MissingPhiIncoming,

    #[error("step limit exceeded")]
    StepLimit,

    #[error("call depth limit exceeded")]
    DepthLimit,
}

pub type ExternHandler<'a> =
    dyn FnMut(&str, &[Value]) -> Result<Option<Value>, InterpError> + 'a;

/// Handler that forwards sink calls to `log` and rejects any other external.
pub fn observation_sink(log: &ValueLog) -> impl FnMut(&str, &[Value]) -> Result<Option<Value>, InterpError> + '_ {
    move |callee, args| {
        if callee != SINK_SYMBOL {
            return Err(InterpError::UnknownExtern(callee.to_owned()));
        }

        match args {
            [Value::Int { value: loc, .. }, Value::Int { value: branch, .. }, Value::Str(name), Value::Int { value, .. }] =>
            {
                log.append(&Record {
                    loc: *loc as u32,
                    branch: *branch as i32,
                    var: name.to_string(),
                    value: *value as i32,
                });

                Ok(None)
            }

            _ => Err(InterpError::BadExternArgs(callee.to_owned())),
        }
    }
}

/// Handler for running uninstrumented modules: rejects every external call.
pub fn no_externs() -> impl FnMut(&str, &[Value]) -> Result<Option<Value>, InterpError> {
    |callee, _| Err(InterpError::UnknownExtern(callee.to_owned()))
}

pub struct Interp<'a> {
    module: &'a Module,
    handler: &'a mut ExternHandler<'a>,
    cells: Vec<Option<Value>>,
    steps: u64,
}

impl<'a> Interp<'a> {
    pub fn new(module: &'a Module, handler: &'a mut ExternHandler<'a>) -> Self {
        Self {
            module,
            handler,
            cells: vec![],
            steps: 0,
        }
    }

    pub fn run(&mut self, func_id: FuncId, args: &[Value]) -> Result<Option<Value>, InterpError> {
        self.run_frame(func_id, args, 0)
    }

    fn run_frame(
        &mut self,
        func_id: FuncId,
        args: &[Value],
        depth: usize,
    ) -> Result<Option<Value>, InterpError> {
        if depth >= MAX_DEPTH {
            return Err(InterpError::DepthLimit);
        }

        let func = &self.module.funcs[func_id];

        if args.len() != func.params.len() {
            return Err(InterpError::ArityMismatch(
                func.name.clone(),
                args.len(),
                func.params.len(),
            ));
        }

        let mut regs = SecondaryMap::<InstrId, Value>::new();

        for (&param, value) in func.params.iter().zip(args) {
            regs.insert(param, value.clone());
        }

        let mut block_id = func.entry;
        let mut pred: Option<BlockId> = None;

        loop {
            self.steps += 1;

            if self.steps > MAX_STEPS {
                return Err(InterpError::StepLimit);
            }

            let block = &func.blocks[block_id];

            // Phis read their inputs simultaneously on entry to the block.
            let mut phi_values = vec![];

            for &instr_id in &block.body {
                let InstrKind::Phi { incoming } = &func.instrs[instr_id].kind else {
                    break;
                };

                let from = pred.ok_or(InterpError::MissingPhiIncoming)?;
                let (_, operand) = incoming
                    .iter()
                    .find(|&&(source, _)| source == from)
                    .ok_or(InterpError::MissingPhiIncoming)?;
                phi_values.push((instr_id, self.operand(func, &regs, operand)?));
            }

            for (instr_id, value) in phi_values {
                regs.insert(instr_id, value);
            }

            let first_non_phi = func.first_non_phi(block_id);

            for &instr_id in &block.body[first_non_phi..] {
                self.steps += 1;

                if self.steps > MAX_STEPS {
                    return Err(InterpError::StepLimit);
                }

                if let Some(value) = self.step(func, &regs, instr_id, depth)? {
                    regs.insert(instr_id, value);
                }
            }

            match &block.term {
                Terminator::Unreachable => return Err(InterpError::Unreachable),

                Terminator::Br(succ) => {
                    pred = Some(block_id);
                    block_id = *succ;
                }

                Terminator::CondBr(cond, succs) => {
                    let (value, _) = self.operand(func, &regs, cond)?.as_int()?;
                    pred = Some(block_id);
                    block_id = if value != 0 { succs[0] } else { succs[1] };
                }

                Terminator::Switch(scrutinee, succs) => {
                    if succs.is_empty() {
                        return Err(InterpError::Unreachable);
                    }

                    let (value, width) = self.operand(func, &regs, scrutinee)?.as_int()?;
                    let idx = (unsigned(value, width) as usize).min(succs.len() - 1);
                    pred = Some(block_id);
                    block_id = succs[idx];
                }

                Terminator::Ret(value) => {
                    return value
                        .as_ref()
                        .map(|operand| self.operand(func, &regs, operand))
                        .transpose();
                }
            }
        }
    }

    fn operand(
        &self,
        func: &Func,
        regs: &SecondaryMap<InstrId, Value>,
        operand: &Operand,
    ) -> Result<Value, InterpError> {
        match operand {
            Operand::Instr(id) => regs
                .get(*id)
                .cloned()
                .ok_or(InterpError::UninitializedLoad),

            Operand::Const(c) => Ok(match c {
                Const::Int { value, width } => Value::int(*value, *width),
                Const::Float(f) => Value::Float(*f),
                Const::Str(s) => Value::Str(Rc::from(s.as_str())),
            }),
        }
    }

    fn step(
        &mut self,
        func: &Func,
        regs: &SecondaryMap<InstrId, Value>,
        instr_id: InstrId,
        depth: usize,
    ) -> Result<Option<Value>, InterpError> {
        let instr = &func.instrs[instr_id];

        Ok(match &instr.kind {
            InstrKind::Param { .. } | InstrKind::Phi { .. } => None,

            InstrKind::Alloca => {
                self.cells.push(None);
                Some(Value::Cell(self.cells.len() - 1))
            }

            InstrKind::Load { ptr } => match self.operand(func, regs, ptr)? {
                Value::Cell(cell) => Some(
                    self.cells[cell]
                        .clone()
                        .ok_or(InterpError::UninitializedLoad)?,
                ),
                _ => return Err(InterpError::TypeMismatch),
            },

            InstrKind::Store { ptr, value } => {
                let value = self.operand(func, regs, value)?;

                match self.operand(func, regs, ptr)? {
                    Value::Cell(cell) => self.cells[cell] = Some(value),
                    _ => return Err(InterpError::TypeMismatch),
                }

                None
            }

            InstrKind::Binary { op, args } => {
                let (lhs, width) = self.operand(func, regs, &args[0])?.as_int()?;
                let (rhs, _) = self.operand(func, regs, &args[1])?.as_int()?;
                let ulhs = unsigned(lhs, width);
                let urhs = unsigned(rhs, width);

                let raw = match op {
                    BinOp::Add => lhs.wrapping_add(rhs),
                    BinOp::Sub => lhs.wrapping_sub(rhs),
                    BinOp::Mul => lhs.wrapping_mul(rhs),
                    BinOp::And => lhs & rhs,
                    BinOp::Or => lhs | rhs,
                    BinOp::Xor => lhs ^ rhs,

                    BinOp::Shl => {
                        if urhs >= width as u64 {
                            0
                        } else {
                            ((ulhs << urhs) & mask(width)) as i64
                        }
                    }

                    BinOp::LShr => {
                        if urhs >= width as u64 {
                            0
                        } else {
                            (ulhs >> urhs) as i64
                        }
                    }

                    BinOp::AShr => {
                        let shift = (urhs).min(width as u64 - 1);
                        lhs >> shift
                    }
                };

                Some(Value::int(raw, width))
            }

            InstrKind::Cmp { op, args } => {
                let (lhs, width) = self.operand(func, regs, &args[0])?.as_int()?;
                let (rhs, _) = self.operand(func, regs, &args[1])?.as_int()?;
                let (ulhs, urhs) = (unsigned(lhs, width), unsigned(rhs, width));

                let result = match op {
                    CmpOp::Eq => lhs == rhs,
                    CmpOp::Ne => lhs != rhs,
                    CmpOp::SLt => lhs < rhs,
                    CmpOp::SLe => lhs <= rhs,
                    CmpOp::SGt => lhs > rhs,
                    CmpOp::SGe => lhs >= rhs,
                    CmpOp::ULt => ulhs < urhs,
                    CmpOp::ULe => ulhs <= urhs,
                    CmpOp::UGt => ulhs > urhs,
                    CmpOp::UGe => ulhs >= urhs,
                };

                Some(Value::int(result as i64, 1))
            }

            InstrKind::FCmp { op, args } => {
                let lhs = match self.operand(func, regs, &args[0])? {
                    Value::Float(f) => f,
                    _ => return Err(InterpError::TypeMismatch),
                };
                let rhs = match self.operand(func, regs, &args[1])? {
                    Value::Float(f) => f,
                    _ => return Err(InterpError::TypeMismatch),
                };

                let result = match op {
                    FCmpOp::Eq => lhs == rhs,
                    FCmpOp::Ne => lhs != rhs,
                    FCmpOp::Lt => lhs < rhs,
                    FCmpOp::Le => lhs <= rhs,
                    FCmpOp::Gt => lhs > rhs,
                    FCmpOp::Ge => lhs >= rhs,
                };

                Some(Value::int(result as i64, 1))
            }

            InstrKind::ZExt { arg } => {
                let (value, width) = self.operand(func, regs, arg)?.as_int()?;
                let to = instr.ty.int_width().ok_or(InterpError::TypeMismatch)?;
                Some(Value::int(unsigned(value, width) as i64, to))
            }

            InstrKind::Trunc { arg } => {
                let (value, _) = self.operand(func, regs, arg)?.as_int()?;
                let to = instr.ty.int_width().ok_or(InterpError::TypeMismatch)?;
                Some(Value::int(value, to))
            }

            InstrKind::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.operand(func, regs, arg))
                    .collect::<Result<Vec<_>, _>>()?;

                match self.module.func_by_name(callee) {
                    Some((callee_id, _)) => self.run_frame(callee_id, &args, depth + 1)?,
                    None => (self.handler)(callee, &args)?,
                }
            }
        })
    }
}

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}
