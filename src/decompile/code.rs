use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::{DecompileError, Result};
use crate::instruction::{decode_instructions, Instruction, Opcode};
use crate::types::CodeUnit;

use super::else_jumps::find_else_jumps;
use super::expr::Expr;
use super::stack::NodeId;

/// `global` and `nonlocal` names discovered while reconstructing a unit, in
/// first-declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Declarations {
    pub globals: Vec<String>,
    pub nonlocals: Vec<String>,
}

impl Declarations {
    fn add(names: &mut Vec<String>, name: &str) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
}

/// A code unit prepared for reconstruction: decoded instructions, the
/// else-jump set, the local-slot expressions and the enclosing unit.
pub struct Code<'a> {
    unit: &'a CodeUnit,
    parent: Option<&'a Code<'a>>,
    instructions: Vec<Instruction>,
    index_of_offset: HashMap<u32, usize>,
    else_jumps: BTreeSet<usize>,
    locals: Vec<Expr>,
    declarations: RefCell<Declarations>,
    next_id: Cell<u64>,
    depth: usize,
    max_depth: usize,
}

impl<'a> Code<'a> {
    pub fn new(unit: &'a CodeUnit, parent: Option<&'a Code<'a>>, max_depth: usize) -> Result<Self> {
        let depth = parent.map_or(0, |p| p.depth + 1);
        if depth > max_depth {
            return Err(DecompileError::DepthExceeded {
                unit: unit.name.clone(),
                limit: max_depth,
            });
        }

        let instructions = decode_instructions(&unit.name, &unit.code)?;
        let index_of_offset = instructions
            .iter()
            .enumerate()
            .map(|(i, instr)| (instr.offset, i))
            .collect();
        let locals = unit.varnames.iter().map(Expr::name).collect();

        let mut code = Code {
            unit,
            parent,
            instructions,
            index_of_offset,
            else_jumps: BTreeSet::new(),
            locals,
            declarations: RefCell::new(Declarations::default()),
            next_id: Cell::new(0),
            depth,
            max_depth,
        };
        code.else_jumps = find_else_jumps(&code)?;
        tracing::debug!(
            unit = %unit.name,
            instructions = code.instructions.len(),
            else_jumps = code.else_jumps.len(),
            depth,
            "prepared code unit"
        );
        Ok(code)
    }

    pub fn unit(&self) -> &'a CodeUnit {
        self.unit
    }

    pub fn name(&self) -> &'a str {
        &self.unit.name
    }

    pub fn parent(&self) -> Option<&'a Code<'a>> {
        self.parent
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Address of the first instruction, or the end sentinel for empty code.
    pub fn start(&self) -> Address<'_> {
        Address {
            code: self,
            index: 0,
        }
    }

    pub fn end(&self) -> Address<'_> {
        Address {
            code: self,
            index: self.instructions.len(),
        }
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address<'_>> {
        (0..self.instructions.len()).map(move |index| Address { code: self, index })
    }

    /// Address of the instruction starting at `offset`. The byte length of the
    /// code maps to the end sentinel.
    pub fn address_of_offset(&self, offset: u32) -> Option<Address<'_>> {
        if offset as usize == self.unit.code.len() {
            return Some(self.end());
        }
        self.index_of_offset
            .get(&offset)
            .map(|&index| Address { code: self, index })
    }

    pub fn is_else_jump_index(&self, index: usize) -> bool {
        self.else_jumps.contains(&index)
    }

    pub fn else_jumps(&self) -> &BTreeSet<usize> {
        &self.else_jumps
    }

    /// Expression that `LOAD_FAST index` produces.
    pub fn local(&self, index: usize) -> Option<&Expr> {
        self.locals.get(index)
    }

    /// Substitute the expression a local slot stands for. Comprehension bodies
    /// read their iterable from slot 0.
    pub fn set_local(&mut self, index: usize, expr: Expr) {
        if let Some(slot) = self.locals.get_mut(index) {
            *slot = expr;
        }
    }

    /// Overwrite the instruction at `index` with a no-op, keeping its offset.
    pub fn neutralize(&mut self, index: usize) {
        if let Some(instr) = self.instructions.get_mut(index) {
            instr.opcode = Opcode::Nop;
            instr.arg = None;
        }
    }

    pub fn fresh_id(&self) -> NodeId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        NodeId(id)
    }

    pub fn declarations(&self) -> Declarations {
        self.declarations.borrow().clone()
    }

    pub fn declare_global(&self, name: &str) {
        Declarations::add(&mut self.declarations.borrow_mut().globals, name);
    }

    pub fn declare_nonlocal(&self, name: &str) {
        Declarations::add(&mut self.declarations.borrow_mut().nonlocals, name);
    }

    /// Declare `name` global when any enclosing unit has a local of that name,
    /// since only an explicit declaration makes a load reach the module scope.
    pub fn ensure_global(&self, name: &str) {
        let mut ancestor = self.parent;
        while let Some(code) = ancestor {
            if code.unit.varnames.iter().any(|v| v == name) {
                self.declare_global(name);
                return;
            }
            ancestor = code.parent;
        }
    }
}

impl fmt::Debug for Code<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Code")
            .field("name", &self.unit.name)
            .field("instructions", &self.instructions.len())
            .field("depth", &self.depth)
            .finish()
    }
}

/// A position in a unit's instruction sequence.
///
/// Index `len()` is the end sentinel: it has no instruction and is the target
/// of jumps to the byte length of the code.
#[derive(Clone, Copy)]
pub struct Address<'a> {
    code: &'a Code<'a>,
    index: usize,
}

impl<'a> Address<'a> {
    pub fn code(&self) -> &'a Code<'a> {
        self.code
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_end(&self) -> bool {
        self.index >= self.code.len()
    }

    pub fn instruction(&self) -> Option<&'a Instruction> {
        self.code.instructions.get(self.index)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        self.instruction().map(|i| i.opcode)
    }

    pub fn arg(&self) -> Option<u32> {
        self.instruction().and_then(|i| i.arg)
    }

    /// Byte offset of the instruction, or the code length for the end sentinel.
    pub fn offset(&self) -> u32 {
        self.instruction()
            .map_or(self.code.unit.code.len() as u32, |i| i.offset)
    }

    pub fn is(&self, opcode: Opcode) -> bool {
        self.opcode() == Some(opcode)
    }

    /// The address `delta` instructions away. Positions before the first
    /// instruction or past the end sentinel do not exist.
    pub fn get(&self, delta: isize) -> Option<Address<'a>> {
        let index = self.index.checked_add_signed(delta)?;
        (index <= self.code.len()).then_some(Address {
            code: self.code,
            index,
        })
    }

    pub fn next(&self) -> Option<Address<'a>> {
        self.get(1)
    }

    pub fn prev(&self) -> Option<Address<'a>> {
        self.get(-1)
    }

    /// Resolve the jump target of this instruction.
    pub fn jump(&self) -> Result<Address<'a>> {
        let target = self
            .instruction()
            .and_then(Instruction::jump_target)
            .ok_or_else(|| self.malformed("instruction is not a jump"))?;
        self.code
            .address_of_offset(target)
            .ok_or_else(|| self.malformed(format!("jump target {} is not an instruction", target)))
    }

    pub fn is_else_jump(&self) -> bool {
        self.code.is_else_jump_index(self.index)
    }

    fn error_parts(&self, message: impl Into<String>) -> (String, u32, String) {
        (self.code.unit.name.clone(), self.offset(), message.into())
    }

    pub fn malformed(&self, message: impl Into<String>) -> DecompileError {
        let (unit, offset, message) = self.error_parts(message);
        DecompileError::Malformed {
            unit,
            offset,
            message,
        }
    }

    pub fn unsupported(&self, message: impl Into<String>) -> DecompileError {
        let (unit, offset, message) = self.error_parts(message);
        DecompileError::Unsupported {
            unit,
            offset,
            message,
        }
    }

    pub fn invariant(&self, message: impl Into<String>) -> DecompileError {
        let (unit, offset, message) = self.error_parts(message);
        DecompileError::Invariant {
            unit,
            offset,
            message,
        }
    }
}

impl PartialEq for Address<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Address<'_> {}

impl PartialOrd for Address<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl fmt::Debug for Address<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instruction() {
            Some(instr) => write!(f, "{}@{} {}", self.code.unit.name, instr.offset, instr.opcode),
            None => write!(f, "{}@end", self.code.unit.name),
        }
    }
}

/// Order on optional jump targets where `None` lies past every address.
pub fn target_le(a: Option<Address<'_>>, b: Option<Address<'_>>) -> bool {
    match (a, b) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => a <= b,
    }
}
