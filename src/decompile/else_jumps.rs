//! Prepass that classifies conditional jumps.
//!
//! A conditional jump is an *else-jump* when it skips over a branch body that
//! ends in an unconditional exit, which makes it the head of an `if` statement
//! or loop test rather than an operand of a short-circuit expression.

use std::collections::{BTreeSet, HashMap};

use crate::error::Result;
use crate::instruction::Opcode;

use super::code::Code;

/// Scan the unit once and return the instruction indices of its else-jumps.
///
/// Each branch-skipping jump is recorded under its target. Later statements
/// inherit the most recent such jump, and an unconditional jump to a recorded
/// target inherits that target's jump, so a later entry for the same key
/// replaces an earlier one. The result is the set of jumps still recorded at
/// the end of the scan.
pub fn find_else_jumps(code: &Code<'_>) -> Result<BTreeSet<usize>> {
    let mut jumps: HashMap<usize, usize> = HashMap::new();
    let mut last_jump: Option<usize> = None;

    for addr in code.addresses() {
        let Some(opcode) = addr.opcode() else {
            continue;
        };
        if opcode.is_pop_jump_if() {
            let target = addr.jump()?;
            let skips_block = target
                .prev()
                .and_then(|p| p.opcode())
                .is_some_and(Opcode::ends_branch);
            if skips_block || target.is(Opcode::ForIter) {
                last_jump = Some(addr.index());
                jumps.insert(target.index(), addr.index());
            }
        } else if opcode == Opcode::JumpAbsolute {
            let target = addr.jump()?;
            if let Some(&jump) = jumps.get(&target.index()) {
                jumps.insert(addr.index(), jump);
            }
        } else if opcode.completes_statement() {
            if let Some(jump) = last_jump {
                jumps.insert(addr.index(), jump);
            }
        }
    }

    Ok(jumps.into_values().collect())
}
