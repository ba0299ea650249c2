//! The branch-observation pass.
//!
//! For every two-way conditional branch, inserts calls to the observation
//! sink on both successor edges, recording the non-constant integer operands
//! of the governing condition. Integer arguments are additionally recorded at
//! function entry with the entry sentinel as the branch code.
//!
//! Insertions respect SSA dominance: a logged value must reach the insertion
//! point. When it does not, the call is hoisted after the definition (same
//! block) or dropped (different blocks). The pass must run on pristine IR;
//! a module that already references the sink symbol is refused.

use hashbrown::HashMap;
use log::debug;
use slotmap::SecondaryMap;
use thiserror::Error;

use crate::ir::{
    BlockId, Func, Instr, InstrId, InstrKind, Module, Operand, Terminator, Ty,
};
use crate::value_log::{ENTRY_BRANCH, SINK_SYMBOL};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("module already instrumented: found a call to `{0}`")]
    AlreadyInstrumented(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentStats {
    /// Two-way conditional branches visited.
    pub branches: usize,

    /// Sink calls inserted for condition operand values.
    pub values_logged: usize,

    /// Placeholder sink calls inserted for float comparisons.
    pub markers: usize,

    /// Integer arguments logged at function entries.
    pub entry_args: usize,

    /// Logging sites dropped because the value does not reach the insertion
    /// point.
    pub skipped_nondominating: usize,
}

/// Instruments every function in `module`. Fails without touching the module
/// if it already references the sink symbol.
pub fn instrument_module(module: &mut Module) -> Result<InstrumentStats, InstrumentError> {
    if module.references_symbol(SINK_SYMBOL) {
        return Err(InstrumentError::AlreadyInstrumented(SINK_SYMBOL.to_owned()));
    }

    let mut stats = InstrumentStats::default();

    for func in module.funcs.values_mut() {
        Instrumenter::new(func).run(&mut stats);
    }

    Ok(stats)
}

/// Where a planned call goes: at the first non-phi position of the block, or
/// directly after an anchor instruction (the hoisted case).
type Anchor = (BlockId, Option<InstrId>);

struct PlannedCall {
    block: BlockId,
    anchor: Option<InstrId>,
    loc: u32,
    side: i32,
    name: String,
    value: Operand,
}

struct Instrumenter<'a> {
    func: &'a mut Func,
    positions: SecondaryMap<InstrId, (BlockId, usize)>,
    dom: crate::ir::DomTree,
    tmp_counter: usize,
    plan: Vec<PlannedCall>,
}

impl<'a> Instrumenter<'a> {
    fn new(func: &'a mut Func) -> Self {
        let preds = func.predecessors();
        let rpo = func.rpo();
        let dom = func.dom_tree(&preds, &rpo);
        let positions = func.instr_positions();

        Self {
            func,
            positions,
            dom,
            tmp_counter: 0,
            plan: vec![],
        }
    }

    fn run(mut self, stats: &mut InstrumentStats) {
        self.plan_entry_args(stats);

        let branches = self
            .func
            .blocks
            .iter()
            .filter_map(|(block_id, block)| match block.term {
                Terminator::CondBr(ref cond, succs) => {
                    Some((block_id, cond.clone(), succs, block.term_line))
                }
                _ => None,
            })
            .collect::<Vec<_>>();

        for (block_id, cond, succs, term_line) in branches {
            stats.branches += 1;
            let loc = term_line.unwrap_or(self.func.line);
            self.plan_branch(block_id, &cond, succs, loc, stats);
        }

        self.apply();
    }

    fn plan_entry_args(&mut self, stats: &mut InstrumentStats) {
        let entry = self.func.entry;
        let loc = self.func.line;

        for &param in &self.func.params.clone() {
            if !self.func.instrs[param].ty.is_int() {
                continue;
            }

            // Arguments are only logged under a real name; there is no
            // synthetic fallback at entry.
            let Some(name) = self.resolve_name(&Operand::Instr(param)) else {
                continue;
            };

            self.plan.push(PlannedCall {
                block: entry,
                anchor: None,
                loc,
                side: ENTRY_BRANCH,
                name,
                value: Operand::Instr(param),
            });
            stats.entry_args += 1;
        }
    }

    fn plan_branch(
        &mut self,
        branch_block: BlockId,
        cond: &Operand,
        succs: [BlockId; 2],
        loc: u32,
        stats: &mut InstrumentStats,
    ) {
        let Some(cond_instr) = cond.as_instr() else {
            // A constant condition has nothing worth observing.
            return;
        };

        let sides = [(succs[0], 1), (succs[1], 0)];

        match self.func.instrs[cond_instr].kind.clone() {
            InstrKind::Cmp { args, .. } | InstrKind::Binary { args, .. } => {
                for operand in args {
                    self.plan_value(branch_block, &operand, sides, loc, stats);
                }
            }

            InstrKind::FCmp { args, .. } => {
                // Float operands cannot be logged by value; emit side markers
                // so the site still appears in the profile.
                for (succ, side) in sides {
                    self.plan_marker(succ, loc, side, "fcmp_result".to_owned());
                    stats.markers += 1;
                }

                for operand in args {
                    let Some(name) = self.resolve_name(&operand) else {
                        continue;
                    };

                    for (succ, side) in sides {
                        self.plan_marker(succ, loc, side, format!("{name}_fcmp"));
                        stats.markers += 1;
                    }
                }
            }

            // A boolean produced elsewhere (a phi, a load, a call result): the
            // condition itself is the observed value.
            _ if self.func.instrs[cond_instr].ty.is_int() => {
                self.plan_value(branch_block, cond, sides, loc, stats);
            }

            _ => {}
        }
    }

    fn plan_value(
        &mut self,
        branch_block: BlockId,
        operand: &Operand,
        sides: [(BlockId, i32); 2],
        loc: u32,
        stats: &mut InstrumentStats,
    ) {
        if operand.is_const() || !self.func.operand_ty(operand).is_int() {
            return;
        }

        let name = self.resolve_name_or_tmp(operand);

        for (succ, side) in sides {
            let anchor = match self.find_anchor(operand, succ) {
                Some(anchor) => anchor,

                None => {
                    debug!(
                        "skipping observation of `{name}` at loc {loc}: \
                         definition does not reach {succ:?} (branch in {branch_block:?})"
                    );
                    stats.skipped_nondominating += 1;
                    continue;
                }
            };

            self.plan.push(PlannedCall {
                block: succ,
                anchor,
                loc,
                side,
                name: name.clone(),
                value: operand.clone(),
            });
            stats.values_logged += 1;
        }
    }

    fn plan_marker(&mut self, block: BlockId, loc: u32, side: i32, name: String) {
        self.plan.push(PlannedCall {
            block,
            anchor: None,
            loc,
            side,
            name,
            value: Operand::int(side as i64, 32),
        });
    }

    /// Decides where in `block` the observation of `operand` may go.
    ///
    /// `Some(None)` is the first non-phi position, `Some(Some(def))` hoists
    /// the call directly after the definition, `None` drops the site.
    fn find_anchor(&self, operand: &Operand, block: BlockId) -> Option<Option<InstrId>> {
        let Some(def) = operand.as_instr() else {
            return Some(None);
        };

        // Parameters have no position and dominate everything.
        let Some(&(def_block, def_idx)) = self.positions.get(def) else {
            return Some(None);
        };

        if def_block == block {
            if def_idx < self.func.first_non_phi(block) {
                Some(None)
            } else {
                Some(Some(def))
            }
        } else if self.dom.dominates(def_block, block) {
            Some(None)
        } else {
            None
        }
    }

    fn resolve_name(&self, operand: &Operand) -> Option<String> {
        let id = operand.as_instr()?;
        let direct = |id: InstrId| {
            self.func.instrs[id]
                .name
                .clone()
                .or_else(|| self.func.debug_names.get(id).cloned())
        };

        direct(id).or_else(|| match &self.func.instrs[id].kind {
            InstrKind::Load { ptr } => ptr.as_instr().and_then(direct),
            _ => None,
        })
    }

    fn resolve_name_or_tmp(&mut self, operand: &Operand) -> String {
        self.resolve_name(operand).unwrap_or_else(|| {
            let name = format!("tmp_{}", self.tmp_counter);
            self.tmp_counter += 1;
            name
        })
    }

    fn apply(mut self) {
        let mut cursors = HashMap::<Anchor, usize>::new();
        let plan = std::mem::take(&mut self.plan);

        for call in plan {
            let key = (call.block, call.anchor);
            let base = match cursors.get(&key) {
                Some(&idx) => idx,

                None => match call.anchor {
                    None => self.func.first_non_phi(call.block),

                    Some(def) => {
                        let body = &self.func.blocks[call.block].body;
                        body.iter().position(|&id| id == def).expect("anchor in block") + 1
                    }
                },
            };

            let mut idx = base;
            let width = self
                .func
                .operand_ty(&call.value)
                .int_width()
                .expect("planned value is an integer");

            let value = if width == 32 {
                call.value
            } else {
                let kind = if width < 32 {
                    InstrKind::ZExt { arg: call.value }
                } else {
                    InstrKind::Trunc { arg: call.value }
                };

                let cast = self
                    .func
                    .insert_instr(call.block, idx, Instr::new(kind, Ty::I32));
                idx += 1;

                Operand::Instr(cast)
            };

            let sink = Instr::new(
                InstrKind::Call {
                    callee: SINK_SYMBOL.to_owned(),
                    args: vec![
                        Operand::int(call.loc as i64, 32),
                        Operand::int(call.side as i64, 32),
                        Operand::str(call.name),
                        value,
                    ],
                },
                Ty::Void,
            );
            self.func.insert_instr(call.block, idx, sink);
            idx += 1;

            // Later insertions through other anchors in this block must not
            // land before what was just inserted.
            let inserted = idx - base;

            for (&(block, _), cursor) in cursors.iter_mut() {
                if block == call.block && *cursor >= base {
                    *cursor += inserted;
                }
            }

            cursors.insert(key, idx);
        }
    }
}
