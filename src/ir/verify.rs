use thiserror::Error;

use super::{BlockId, Func, InstrId, Operand};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("operand of {user:?} refers to a removed instruction")]
    DanglingOperand { user: InstrId },

    #[error("terminator of {block:?} targets a removed block")]
    DanglingSuccessor { block: BlockId },

    #[error("{user:?} uses {def:?} before its definition")]
    UseBeforeDef { user: InstrId, def: InstrId },

    #[error("phi {phi:?} does not cover exactly the predecessors of {block:?}")]
    PhiPredMismatch { phi: InstrId, block: BlockId },

    #[error("phi {phi:?} appears after a non-phi instruction")]
    PhiNotLeading { phi: InstrId },

    #[error("terminator of {block:?} uses {def:?}, which does not reach it")]
    BadTerminatorOperand { block: BlockId, def: InstrId },
}

impl Func {
    /// Checks structural sanity: no dangling references, phis leading their
    /// block and covering exactly its predecessors, and every use dominated
    /// by its definition.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let preds = self.predecessors();
        let rpo = self.rpo();
        let dom = self.dom_tree(&preds, &rpo);
        let positions = self.instr_positions();

        let check_operand = |user: InstrId, operand: &Operand| match operand.as_instr() {
            Some(def) if !self.instrs.contains_key(def) => {
                Err(VerifyError::DanglingOperand { user })
            }
            _ => Ok(()),
        };

        // A definition reaches a use at (block, idx) if it is a parameter, or
        // it is defined earlier in the same block, or its block strictly
        // dominates the use's block.
        let dominates_use = |def: InstrId, block: BlockId, idx: usize| {
            let Some(&(def_block, def_idx)) = positions.get(def) else {
                return true;
            };

            if def_block == block {
                def_idx < idx
            } else {
                dom.dominates(def_block, block)
            }
        };

        for (block_id, block) in &self.blocks {
            let reachable = rpo.idx.contains_key(block_id);
            let first_non_phi = self.first_non_phi(block_id);

            for (idx, &instr_id) in block.body.iter().enumerate() {
                let instr = &self.instrs[instr_id];

                if let super::InstrKind::Phi { incoming } = &instr.kind {
                    if idx >= first_non_phi {
                        return Err(VerifyError::PhiNotLeading { phi: instr_id });
                    }

                    let mut sources: Vec<BlockId> =
                        incoming.iter().map(|&(pred, _)| pred).collect();
                    sources.sort_unstable();
                    sources.dedup();

                    let expected = preds.get(block_id).map(Vec::as_slice).unwrap_or(&[]);

                    if sources != expected {
                        return Err(VerifyError::PhiPredMismatch {
                            phi: instr_id,
                            block: block_id,
                        });
                    }

                    // An incoming value is used at the end of its predecessor.
                    for (pred, operand) in incoming {
                        check_operand(instr_id, operand)?;

                        if let Some(def) = operand.as_instr() {
                            if reachable && !dominates_use(def, *pred, usize::MAX) {
                                return Err(VerifyError::UseBeforeDef {
                                    user: instr_id,
                                    def,
                                });
                            }
                        }
                    }

                    continue;
                }

                for operand in instr.kind.operands() {
                    check_operand(instr_id, operand)?;

                    if let Some(def) = operand.as_instr() {
                        if reachable && !dominates_use(def, block_id, idx) {
                            return Err(VerifyError::UseBeforeDef {
                                user: instr_id,
                                def,
                            });
                        }
                    }
                }
            }

            if let Some(operand) = block.term.operand() {
                if let Some(def) = operand.as_instr() {
                    if !self.instrs.contains_key(def)
                        || (reachable && !dominates_use(def, block_id, usize::MAX))
                    {
                        return Err(VerifyError::BadTerminatorOperand {
                            block: block_id,
                            def,
                        });
                    }
                }
            }

            for &succ in block.successors() {
                if !self.blocks.contains_key(succ) {
                    return Err(VerifyError::DanglingSuccessor { block: block_id });
                }
            }
        }

        Ok(())
    }
}
