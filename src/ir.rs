//! A CFG-based IR: functions of basic blocks holding three-address
//! instructions over SSA values, with source lines attached from debug info.

mod dom_tree;
mod predecessors;
mod rpo;
mod verify;

use std::slice;

use slotmap::{new_key_type, SecondaryMap, SlotMap};

pub use self::dom_tree::DomTree;
pub use self::rpo::Rpo;
pub use self::verify::VerifyError;

new_key_type! {
    pub struct FuncId;
    pub struct BlockId;
    pub struct InstrId;
}

pub type Predecessors = SecondaryMap<BlockId, Vec<BlockId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    /// An integer of the given bit width (1 for booleans).
    Int(u32),
    Float,
    Ptr,
    Void,
}

impl Ty {
    pub const BOOL: Self = Self::Int(1);
    pub const I8: Self = Self::Int(8);
    pub const I32: Self = Self::Int(32);
    pub const I64: Self = Self::Int(64);

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn int_width(&self) -> Option<u32> {
        match *self {
            Self::Int(width) => Some(width),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int { value: i64, width: u32 },
    Float(f64),

    /// String immediate, used only as a direct call argument.
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Instr(InstrId),
    Const(Const),
}

impl Operand {
    pub fn int(value: i64, width: u32) -> Self {
        Self::Const(Const::Int { value, width })
    }

    pub fn str(s: impl Into<String>) -> Self {
        Self::Const(Const::Str(s.into()))
    }

    pub fn as_instr(&self) -> Option<InstrId> {
        match *self {
            Self::Instr(id) => Some(id),
            Self::Const(_) => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const(_))
    }
}

impl From<InstrId> for Operand {
    fn from(id: InstrId) -> Self {
        Self::Instr(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FCmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    /// The `index`th function parameter. Parameter instructions live in
    /// `Func::params`, not in any block, and dominate the whole body.
    Param { index: usize },

    /// A stack slot holding a single value.
    Alloca,

    Load { ptr: Operand },
    Store { ptr: Operand, value: Operand },
    Binary { op: BinOp, args: [Operand; 2] },
    Cmp { op: CmpOp, args: [Operand; 2] },
    FCmp { op: FCmpOp, args: [Operand; 2] },
    Phi { incoming: Vec<(BlockId, Operand)> },

    /// Zero-extends `arg` to the instruction type.
    ZExt { arg: Operand },

    /// Truncates `arg` to the instruction type.
    Trunc { arg: Operand },

    Call { callee: String, args: Vec<Operand> },
}

impl InstrKind {
    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi { .. })
    }

    /// Non-phi operands of this instruction. Phi incoming values are used at
    /// the end of the corresponding predecessor, so they are reported
    /// separately.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Self::Param { .. } | Self::Alloca | Self::Phi { .. } => vec![],
            Self::Load { ptr } => vec![ptr],
            Self::Store { ptr, value } => vec![ptr, value],

            Self::Binary { args, .. } | Self::Cmp { args, .. } | Self::FCmp { args, .. } => {
                args.iter().collect()
            }

            Self::ZExt { arg } | Self::Trunc { arg } => vec![arg],
            Self::Call { args, .. } => args.iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instr {
    pub kind: InstrKind,
    pub ty: Ty,

    /// SSA name assigned by the front end, if any.
    pub name: Option<String>,

    /// Source line from debug info, if any.
    pub line: Option<u32>,
}

impl Instr {
    pub fn new(kind: InstrKind, ty: Ty) -> Self {
        Self {
            kind,
            ty,
            name: None,
            line: None,
        }
    }

    pub fn named(kind: InstrKind, ty: Ty, name: impl Into<String>) -> Self {
        Self {
            kind,
            ty,
            name: Some(name.into()),
            line: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub enum Terminator {
    #[default]
    Unreachable,
    Br(BlockId),

    /// Two-way conditional branch: successor 0 is the true side, successor 1
    /// the false side.
    CondBr(Operand, [BlockId; 2]),

    Switch(Operand, Vec<BlockId>),
    Ret(Option<Operand>),
}

impl Terminator {
    pub fn successors(&self) -> &[BlockId] {
        match self {
            Self::Unreachable | Self::Ret(_) => &[],
            Self::Br(block_id) => slice::from_ref(block_id),
            Self::CondBr(_, successors) => successors,
            Self::Switch(_, successors) => successors,
        }
    }

    pub fn operand(&self) -> Option<&Operand> {
        match self {
            Self::Unreachable | Self::Br(_) => None,
            Self::CondBr(cond, _) => Some(cond),
            Self::Switch(scrutinee, _) => Some(scrutinee),
            Self::Ret(value) => value.as_ref(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Block {
    pub body: Vec<InstrId>,
    pub term: Terminator,

    /// Source line of the terminator, if any.
    pub term_line: Option<u32>,
}

impl Block {
    pub fn successors(&self) -> &[BlockId] {
        self.term.successors()
    }
}

#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,

    /// Declaration line from debug info.
    pub line: u32,

    pub instrs: SlotMap<InstrId, Instr>,
    pub blocks: SlotMap<BlockId, Block>,
    pub entry: BlockId,
    pub params: Vec<InstrId>,

    /// Names recovered from debug declarations, keyed by the value they
    /// describe. Secondary to the SSA name on the instruction itself.
    pub debug_names: SecondaryMap<InstrId, String>,
}

impl Func {
    pub fn new(name: impl Into<String>, line: u32) -> Self {
        let mut blocks = SlotMap::<BlockId, Block>::with_key();
        let entry = blocks.insert(Default::default());

        Self {
            name: name.into(),
            line,
            instrs: Default::default(),
            blocks,
            entry,
            params: vec![],
            debug_names: Default::default(),
        }
    }

    pub fn add_param(&mut self, ty: Ty, name: Option<&str>) -> InstrId {
        let index = self.params.len();
        let mut instr = Instr::new(InstrKind::Param { index }, ty);
        instr.name = name.map(str::to_owned);
        let id = self.instrs.insert(instr);
        self.params.push(id);

        id
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.insert(Default::default())
    }

    /// Appends `instr` to the end of `block`.
    pub fn push_instr(&mut self, block: BlockId, instr: Instr) -> InstrId {
        let id = self.instrs.insert(instr);
        self.blocks[block].body.push(id);

        id
    }

    /// Inserts `instr` into `block` at position `idx`.
    pub fn insert_instr(&mut self, block: BlockId, idx: usize, instr: Instr) -> InstrId {
        let id = self.instrs.insert(instr);
        self.blocks[block].body.insert(idx, id);

        id
    }

    pub fn operand_ty(&self, operand: &Operand) -> Ty {
        match operand {
            Operand::Instr(id) => self.instrs[*id].ty,

            Operand::Const(c) => match c {
                Const::Int { width, .. } => Ty::Int(*width),
                Const::Float(_) => Ty::Float,
                Const::Str(_) => Ty::Ptr,
            },
        }
    }

    /// Index of the first non-phi instruction in `block`'s body.
    pub fn first_non_phi(&self, block: BlockId) -> usize {
        self.blocks[block]
            .body
            .iter()
            .position(|&id| !self.instrs[id].kind.is_phi())
            .unwrap_or(self.blocks[block].body.len())
    }

    /// Positions of every block-resident instruction. Parameters have no
    /// position: they dominate the entire body.
    pub fn instr_positions(&self) -> SecondaryMap<InstrId, (BlockId, usize)> {
        let mut positions = SecondaryMap::new();

        for (block_id, block) in &self.blocks {
            for (idx, &instr_id) in block.body.iter().enumerate() {
                positions.insert(instr_id, (block_id, idx));
            }
        }

        positions
    }
}

#[derive(Debug, Default, Clone)]
pub struct Module {
    pub funcs: SlotMap<FuncId, Func>,
}

impl Module {
    pub fn func_by_name(&self, name: &str) -> Option<(FuncId, &Func)> {
        self.funcs.iter().find(|(_, func)| func.name == name)
    }

    /// Whether any call in the module targets `symbol`.
    pub fn references_symbol(&self, symbol: &str) -> bool {
        self.funcs.values().any(|func| {
            func.instrs.values().any(|instr| {
                matches!(&instr.kind, InstrKind::Call { callee, .. } if callee == symbol)
            })
        })
    }
}
