//! Reconstructs the statements of an instruction range by simulating the
//! operand stack and recognising compiler patterns.
//!
//! Block constructs (loops, branches, exception handlers, `with`) are handled
//! by running nested decompilers over sub-ranges and assembling their suites.

use std::mem;

use crate::constant_info::Constant;
use crate::error::{DecompileError, Result};
use crate::instruction::Opcode;

use super::code::{target_le, Address, Code};
use super::definitions;
use super::expr::{BinOp, BoolOp, CompareOp, ComprehensionKind, Expr, Keyword, UnaryOp};
use super::stack::{
    Binding, EvaluationStack, PendingClass, PendingFunction, PendingImport, StackItem, StackValue,
    UnpackAccumulator,
};
use super::structured_types::{
    AugAssign, ExceptHandler, Import, ImportKind, Stmt, Suite, Try, With,
};

/// `COMPARE_OP` argument of an exception-match test.
const EXCEPTION_MATCH: u32 = 10;

/// What the run loop does after an instruction handler returns.
enum Flow<'c> {
    Next,
    Goto(Address<'c>),
    Stop,
}

impl<'c> Flow<'c> {
    fn to(addr: Option<Address<'c>>) -> Self {
        addr.map_or(Flow::Stop, Flow::Goto)
    }
}

/// A conditional jump folded into the condition of a later jump.
struct PendingJump<'c> {
    origin: Address<'c>,
    truthiness: bool,
    target: Option<Address<'c>>,
    cond: Expr,
}

/// A typed except clause, recorded when the exception-match test is reached.
struct HandlerClause<'c> {
    exc_type: Expr,
    name: Option<Expr>,
    body: Suite,
    next: Address<'c>,
}

pub(crate) struct SuiteDecompiler<'c> {
    code: &'c Code<'c>,
    start: Option<Address<'c>>,
    end: Option<Address<'c>>,
    depth: usize,
    stack: EvaluationStack,
    suite: Suite,
    assignment_chain: Vec<Expr>,
    popjumps: Vec<PendingJump<'c>>,
    /// Target stored into a binding marker of this range.
    binding: Option<Expr>,
    handler: Option<HandlerClause<'c>>,
}

fn underflow(addr: Address<'_>) -> DecompileError {
    addr.malformed("operand stack underflow")
}

fn expect_expr(addr: Address<'_>, value: StackValue) -> Result<Expr> {
    match value.item {
        StackItem::Expr(expr) => Ok(expr),
        other => Err(addr.invariant(format!("expected an expression, found a {}", other.kind()))),
    }
}

fn target_name(addr: Address<'_>, target: &Expr) -> Result<String> {
    target
        .as_name()
        .map(str::to_string)
        .ok_or_else(|| addr.unsupported("import bound to a non-name target"))
}

/// Pair up `[name, value, name, value, ...]` operands.
fn keyword_pairs(addr: Address<'_>, values: Vec<Expr>) -> Result<Vec<Keyword>> {
    let mut keywords = Vec::with_capacity(values.len() / 2);
    let mut values = values.into_iter();
    while let (Some(name), Some(value)) = (values.next(), values.next()) {
        let name = match name {
            Expr::Constant(Constant::Str(name)) => name,
            _ => return Err(addr.malformed("keyword name is not a string constant")),
        };
        keywords.push(Keyword { name, value });
    }
    Ok(keywords)
}

fn finish_import(import: PendingImport, alias: Option<String>) -> Import {
    let kind = match import.fromlist {
        None => {
            let top_level = import.module.split('.').next().unwrap_or_default();
            let alias = alias.filter(|a| import.attribute_loads > 0 || a != top_level);
            ImportKind::Module { alias }
        }
        Some(list) if list.len() == 1 && list[0] == "*" => ImportKind::Star,
        Some(_) => ImportKind::From(import.names),
    };
    Import {
        module: import.module,
        level: import.level,
        kind,
    }
}

impl<'c> SuiteDecompiler<'c> {
    pub(crate) fn new(
        code: &'c Code<'c>,
        start: Option<Address<'c>>,
        end: Option<Address<'c>>,
        depth: usize,
    ) -> Self {
        SuiteDecompiler {
            code,
            start,
            end,
            depth,
            stack: EvaluationStack::new(),
            suite: Suite::new(),
            assignment_chain: Vec::new(),
            popjumps: Vec::new(),
            binding: None,
            handler: None,
        }
    }

    /// Run until the end of the range or until a handler ends the suite.
    /// Returns the address where reconstruction stopped.
    pub(crate) fn run(&mut self) -> Result<Option<Address<'c>>> {
        let mut addr = self.start;
        while let Some(current) = addr {
            if self.end.is_some_and(|end| current >= end) {
                break;
            }
            let Some(instr) = current.instruction() else {
                break;
            };
            tracing::trace!(
                unit = self.code.name(),
                offset = instr.offset,
                opcode = %instr.opcode,
                arg = ?instr.arg,
                stack = self.stack.len(),
                "step"
            );
            match self.step(current, instr.opcode, instr.arg)? {
                Flow::Next => addr = current.next(),
                Flow::Goto(next) => {
                    if next <= current {
                        return Err(current.invariant(format!(
                            "control does not advance (resumes at offset {})",
                            next.offset()
                        )));
                    }
                    addr = Some(next);
                }
                Flow::Stop => return Ok(Some(current)),
            }
        }
        Ok(addr)
    }

    pub(crate) fn into_suite(self) -> Result<Suite> {
        if self.stack.pending_unpacks() > 0 {
            let at = self.start.unwrap_or_else(|| self.code.end());
            return Err(at.invariant("sequence unpack left with unassigned targets"));
        }
        if let Some(jump) = self.popjumps.first() {
            return Err(jump.origin.invariant(format!(
                "{} conditional jump(s) left without a branch",
                self.popjumps.len()
            )));
        }
        Ok(self.suite)
    }

    // --- Sub-ranges ---

    fn sub(&self, start: Option<Address<'c>>, end: Option<Address<'c>>) -> Result<SuiteDecompiler<'c>> {
        let depth = self.depth + 1;
        if depth > self.code.max_depth() {
            return Err(DecompileError::DepthExceeded {
                unit: self.code.name().to_string(),
                limit: self.code.max_depth(),
            });
        }
        Ok(SuiteDecompiler::new(self.code, start, end, depth))
    }

    fn run_range(&self, start: Option<Address<'c>>, end: Option<Address<'c>>) -> Result<SuiteDecompiler<'c>> {
        let mut decompiler = self.sub(start, end)?;
        decompiler.run()?;
        Ok(decompiler)
    }

    /// Drop the `None` pushed ahead of a `with` or `finally` cleanup. Any
    /// other value left on the stack at `at` is an error.
    fn discard_residue(&mut self, at: Address<'c>) -> Result<()> {
        while let Some(value) = self.stack.pop() {
            match value.item {
                StackItem::Expr(expr) if expr.is_none_constant() => {
                    tracing::debug!(unit = self.code.name(), "dropped cleanup padding");
                }
                other => {
                    tracing::warn!(
                        unit = self.code.name(),
                        offset = at.offset(),
                        kind = %other.kind(),
                        "residual stack value"
                    );
                    return Err(at.invariant(format!("block leaves a {} on the stack", other.kind())));
                }
            }
        }
        Ok(())
    }

    // --- Stack helpers ---

    fn push_item(&mut self, item: StackItem) {
        let id = self.code.fresh_id();
        self.stack.push(StackValue::new(id, item));
    }

    fn push_expr(&mut self, expr: Expr) {
        self.push_item(StackItem::Expr(expr));
    }

    fn pop_value(&mut self, addr: Address<'c>) -> Result<StackValue> {
        self.stack.pop().ok_or_else(|| underflow(addr))
    }

    fn pop_expr(&mut self, addr: Address<'c>) -> Result<Expr> {
        let value = self.pop_value(addr)?;
        expect_expr(addr, value)
    }

    /// Pop `n` expressions, returned in push order.
    fn pop_exprs(&mut self, addr: Address<'c>, n: usize) -> Result<Vec<Expr>> {
        let values = self.stack.pop_n(n).ok_or_else(|| underflow(addr))?;
        values.into_iter().map(|v| expect_expr(addr, v)).collect()
    }

    /// Pop the top two expressions as `(second, top)`.
    fn pop_pair(&mut self, addr: Address<'c>) -> Result<(Expr, Expr)> {
        let top = self.pop_expr(addr)?;
        let second = self.pop_expr(addr)?;
        Ok((second, top))
    }

    fn begin_unpack(&mut self, source: StackValue, count: usize, star_index: Option<usize>) {
        let id = self.code.fresh_id();
        self.stack
            .start_unpack(id, UnpackAccumulator::new(source, count, star_index));
        for _ in 0..count {
            self.stack.push(StackValue::new(id, StackItem::Unpack));
        }
    }

    // --- Table lookups ---

    fn name(&self, addr: Address<'c>, index: u32) -> Result<String> {
        self.code
            .unit()
            .names
            .get(index as usize)
            .cloned()
            .ok_or_else(|| addr.malformed(format!("name index {} out of range", index)))
    }

    fn local(&self, addr: Address<'c>, index: u32) -> Result<Expr> {
        self.code
            .local(index as usize)
            .cloned()
            .ok_or_else(|| addr.malformed(format!("local index {} out of range", index)))
    }

    fn derefname(&self, addr: Address<'c>, index: u32) -> Result<String> {
        self.code
            .unit()
            .derefname(index as usize)
            .map(str::to_string)
            .ok_or_else(|| addr.malformed(format!("cell index {} out of range", index)))
    }

    fn constant(&self, addr: Address<'c>, index: u32) -> Result<Constant> {
        self.code
            .unit()
            .consts
            .get(index as usize)
            .cloned()
            .ok_or_else(|| addr.malformed(format!("constant index {} out of range", index)))
    }

    // --- Dispatch ---

    fn step(&mut self, addr: Address<'c>, opcode: Opcode, arg: Option<u32>) -> Result<Flow<'c>> {
        let oparg = || arg.ok_or_else(|| addr.malformed(format!("{} without an argument", opcode)));

        match opcode {
            Opcode::Nop | Opcode::GetIter | Opcode::SetupLoop | Opcode::PopBlock | Opcode::JumpAbsolute => {}
            Opcode::PopExcept | Opcode::EndFinally => return Ok(Flow::Stop),
            Opcode::JumpForward => return Ok(Flow::Goto(addr.jump()?)),
            Opcode::StopCode | Opcode::PrintExpr | Opcode::WithCleanup | Opcode::ExtendedArg => {
                return Err(addr.unsupported(format!("{} outside a recognised construct", opcode)));
            }

            // Stack manipulation
            Opcode::PopTop => self.pop_top(addr)?,
            Opcode::RotTwo => self.rot_two(addr)?,
            Opcode::RotThree => return self.rot_three(addr),
            Opcode::DupTop => {
                let top = self.stack.peek().cloned().ok_or_else(|| underflow(addr))?;
                self.stack.push(top);
            }
            Opcode::DupTopTwo => {
                let top = self.stack.peek_n(2).ok_or_else(|| underflow(addr))?.to_vec();
                for value in top {
                    self.stack.push(value);
                }
            }

            // Operators
            Opcode::UnaryPositive => self.unary(addr, UnaryOp::Positive)?,
            Opcode::UnaryNegative => self.unary(addr, UnaryOp::Negative)?,
            Opcode::UnaryNot => self.unary(addr, UnaryOp::Not)?,
            Opcode::UnaryInvert => self.unary(addr, UnaryOp::Invert)?,
            Opcode::BinaryPower => self.binary(addr, BinOp::Power)?,
            Opcode::BinaryMultiply => self.binary(addr, BinOp::Multiply)?,
            Opcode::BinaryModulo => self.binary(addr, BinOp::Modulo)?,
            Opcode::BinaryAdd => self.binary(addr, BinOp::Add)?,
            Opcode::BinarySubtract => self.binary(addr, BinOp::Subtract)?,
            Opcode::BinaryFloorDivide => self.binary(addr, BinOp::FloorDivide)?,
            Opcode::BinaryTrueDivide => self.binary(addr, BinOp::TrueDivide)?,
            Opcode::BinaryLshift => self.binary(addr, BinOp::LeftShift)?,
            Opcode::BinaryRshift => self.binary(addr, BinOp::RightShift)?,
            Opcode::BinaryAnd => self.binary(addr, BinOp::And)?,
            Opcode::BinaryXor => self.binary(addr, BinOp::Xor)?,
            Opcode::BinaryOr => self.binary(addr, BinOp::Or)?,
            Opcode::InplacePower => self.inplace(addr, BinOp::Power)?,
            Opcode::InplaceMultiply => self.inplace(addr, BinOp::Multiply)?,
            Opcode::InplaceModulo => self.inplace(addr, BinOp::Modulo)?,
            Opcode::InplaceAdd => self.inplace(addr, BinOp::Add)?,
            Opcode::InplaceSubtract => self.inplace(addr, BinOp::Subtract)?,
            Opcode::InplaceFloorDivide => self.inplace(addr, BinOp::FloorDivide)?,
            Opcode::InplaceTrueDivide => self.inplace(addr, BinOp::TrueDivide)?,
            Opcode::InplaceLshift => self.inplace(addr, BinOp::LeftShift)?,
            Opcode::InplaceRshift => self.inplace(addr, BinOp::RightShift)?,
            Opcode::InplaceAnd => self.inplace(addr, BinOp::And)?,
            Opcode::InplaceXor => self.inplace(addr, BinOp::Xor)?,
            Opcode::InplaceOr => self.inplace(addr, BinOp::Or)?,
            Opcode::CompareOp => return self.compare_op(addr, oparg()?),

            // Subscripts and attributes
            Opcode::BinarySubscr => {
                let (value, index) = self.pop_pair(addr)?;
                self.push_expr(Expr::subscript(value, index));
            }
            Opcode::StoreSubscr => {
                let (value, index) = self.pop_pair(addr)?;
                self.store(addr, Expr::subscript(value, index))?;
            }
            Opcode::DeleteSubscr => {
                let (value, index) = self.pop_pair(addr)?;
                self.suite.push(Stmt::Delete(Expr::subscript(value, index)));
            }
            Opcode::LoadAttr => self.load_attr(addr, oparg()?)?,
            Opcode::StoreAttr => {
                let owner = self.pop_expr(addr)?;
                let attr = self.name(addr, oparg()?)?;
                self.store(addr, Expr::attribute(owner, attr))?;
            }
            Opcode::DeleteAttr => {
                let owner = self.pop_expr(addr)?;
                let attr = self.name(addr, oparg()?)?;
                self.suite.push(Stmt::Delete(Expr::attribute(owner, attr)));
            }

            // Names
            Opcode::LoadConst => {
                let constant = self.constant(addr, oparg()?)?;
                self.push_expr(Expr::Constant(constant));
            }
            Opcode::LoadName => {
                let name = self.name(addr, oparg()?)?;
                self.push_expr(Expr::Name(name));
            }
            Opcode::StoreName => {
                let name = self.name(addr, oparg()?)?;
                self.store(addr, Expr::Name(name))?;
            }
            Opcode::DeleteName => {
                let name = self.name(addr, oparg()?)?;
                self.suite.push(Stmt::Delete(Expr::Name(name)));
            }
            Opcode::LoadFast => {
                let local = self.local(addr, oparg()?)?;
                self.push_expr(local);
            }
            Opcode::StoreFast => {
                let local = self.local(addr, oparg()?)?;
                self.store(addr, local)?;
            }
            Opcode::DeleteFast => {
                let local = self.local(addr, oparg()?)?;
                self.suite.push(Stmt::Delete(local));
            }
            Opcode::LoadGlobal => {
                let name = self.name(addr, oparg()?)?;
                self.code.ensure_global(&name);
                self.push_expr(Expr::Name(name));
            }
            Opcode::StoreGlobal => {
                let name = self.name(addr, oparg()?)?;
                self.code.declare_global(&name);
                self.store(addr, Expr::Name(name))?;
            }
            Opcode::DeleteGlobal => {
                let name = self.name(addr, oparg()?)?;
                self.code.declare_global(&name);
                self.suite.push(Stmt::Delete(Expr::Name(name)));
            }
            Opcode::LoadClosure | Opcode::LoadDeref => {
                let name = self.derefname(addr, oparg()?)?;
                self.push_expr(Expr::Name(name));
            }
            Opcode::StoreDeref => {
                let index = oparg()?;
                let name = self.derefname(addr, index)?;
                if !self.code.unit().is_cellvar(index as usize) {
                    self.code.declare_nonlocal(&name);
                }
                self.store(addr, Expr::Name(name))?;
            }
            Opcode::DeleteDeref => {
                let index = oparg()?;
                let name = self.derefname(addr, index)?;
                if !self.code.unit().is_cellvar(index as usize) {
                    self.code.declare_nonlocal(&name);
                }
                self.suite.push(Stmt::Delete(Expr::Name(name)));
            }

            // Displays
            Opcode::BuildTuple => {
                let items = self.pop_exprs(addr, oparg()? as usize)?;
                self.push_expr(Expr::Tuple(items));
            }
            Opcode::BuildList => {
                let items = self.pop_exprs(addr, oparg()? as usize)?;
                self.push_expr(Expr::List(items));
            }
            Opcode::BuildSet => {
                let items = self.pop_exprs(addr, oparg()? as usize)?;
                self.push_expr(Expr::Set(items));
            }
            Opcode::BuildMap => self.push_expr(Expr::Dict(Vec::new())),
            Opcode::StoreMap => self.store_map(addr)?,
            Opcode::BuildSlice => self.build_slice(addr, oparg()?)?,
            Opcode::ListAppend | Opcode::SetAdd => self.pop_top(addr)?,
            Opcode::MapAdd => {
                let (value, key) = self.pop_pair(addr)?;
                self.push_expr(Expr::KeyValue {
                    key: Box::new(key),
                    value: Box::new(value),
                });
                self.pop_top(addr)?;
            }

            // Unpacking
            Opcode::UnpackSequence => {
                let source = self.pop_value(addr)?;
                self.begin_unpack(source, oparg()? as usize, None);
            }
            Opcode::UnpackEx => {
                let counts = oparg()?;
                let before = (counts & 0xff) as usize;
                let after = ((counts >> 8) & 0xff) as usize;
                let source = self.pop_value(addr)?;
                self.begin_unpack(source, before + after + 1, Some(before));
            }

            // Imports
            Opcode::ImportName => self.import_name(addr, oparg()?)?,
            Opcode::ImportFrom => {
                let name = self.name(addr, oparg()?)?;
                self.push_item(StackItem::ImportFrom(name));
            }
            Opcode::ImportStar => self.pop_top(addr)?,

            // Calls and definitions
            Opcode::CallFunction => self.call_function(addr, oparg()?, false, false)?,
            Opcode::CallFunctionVar => self.call_function(addr, oparg()?, true, false)?,
            Opcode::CallFunctionKw => self.call_function(addr, oparg()?, false, true)?,
            Opcode::CallFunctionVarKw => self.call_function(addr, oparg()?, true, true)?,
            Opcode::MakeFunction => self.make_function(addr, oparg()?, false)?,
            Opcode::MakeClosure => self.make_function(addr, oparg()?, true)?,
            Opcode::LoadBuildClass => self.push_item(StackItem::BuildClass),
            Opcode::StoreLocals => {
                // Also skips the `__module__ = __name__` prologue of class bodies.
                self.pop_value(addr)?;
                return Ok(Flow::to(addr.get(3)));
            }

            // Simple statements
            Opcode::ReturnValue => self.return_value(addr)?,
            Opcode::YieldValue => {
                if self.code.name() != "<genexpr>" {
                    let value = self.pop_expr(addr)?;
                    self.push_expr(Expr::Yield(Box::new(value)));
                }
            }
            Opcode::RaiseVarargs => self.raise(addr, oparg()?)?,
            Opcode::BreakLoop => self.suite.push(Stmt::Break),
            Opcode::ContinueLoop => self.suite.push(Stmt::Continue),

            // Control flow
            Opcode::JumpIfFalseOrPop => return self.jump_if_or_pop(addr, BoolOp::And),
            Opcode::JumpIfTrueOrPop => return self.jump_if_or_pop(addr, BoolOp::Or),
            Opcode::PopJumpIfFalse => return self.pop_jump_if(addr, false),
            Opcode::PopJumpIfTrue => return self.pop_jump_if(addr, true),
            Opcode::ForIter => return self.for_iter(addr),
            Opcode::SetupExcept => return self.setup_except(addr),
            Opcode::SetupFinally => return self.setup_finally(addr),
            Opcode::SetupWith => return self.setup_with(addr),
        }
        Ok(Flow::Next)
    }

    // --- Storing and discarding ---

    fn store(&mut self, addr: Address<'c>, target: Expr) -> Result<()> {
        let value = self.pop_value(addr)?;
        self.store_value(addr, value, target)
    }

    fn store_value(&mut self, addr: Address<'c>, value: StackValue, target: Expr) -> Result<()> {
        let StackValue { id, item } = value;
        match item {
            StackItem::Expr(expr) => {
                self.assignment_chain.push(target);
                if !self.stack.contains(id) {
                    let targets = mem::take(&mut self.assignment_chain);
                    self.suite.push(Stmt::Assign { targets, value: expr });
                }
            }
            StackItem::Unpack => {
                let complete = {
                    let accumulator = self
                        .stack
                        .unpack_mut(id)
                        .ok_or_else(|| addr.invariant("unpack slot without an accumulator"))?;
                    accumulator.add_target(target);
                    accumulator.is_complete()
                };
                if complete {
                    if let Some(accumulator) = self.stack.finish_unpack(id) {
                        self.stack.push(accumulator.source);
                        self.store(addr, Expr::Tuple(accumulator.targets))?;
                    }
                }
            }
            StackItem::AugAssign(aug) => self.suite.push(Stmt::AugAssign(aug)),
            StackItem::Import(import) => {
                let alias = target_name(addr, &target)?;
                self.suite.push(Stmt::Import(finish_import(import, Some(alias))));
            }
            StackItem::ImportFrom(name) => {
                let alias = target_name(addr, &target)?;
                match self.stack.peek_mut() {
                    Some(StackValue {
                        item: StackItem::Import(import),
                        ..
                    }) => import.names.push((name, alias)),
                    _ => return Err(addr.invariant("from-import name without a pending import")),
                }
            }
            StackItem::Function(function) => {
                let def = definitions::build_function_def(Some(self.code), self.code.max_depth(), function)?;
                self.suite.push(Stmt::FunctionDef(def));
            }
            StackItem::Class(class) => {
                let name = target
                    .as_name()
                    .map(str::to_string)
                    .ok_or_else(|| addr.unsupported("class bound to a non-name target"))?;
                let def = definitions::build_class_def(self.code, class, name)?;
                self.suite.push(Stmt::ClassDef(def));
            }
            StackItem::Binding(_) => self.binding = Some(target),
            other @ (StackItem::BuildClass | StackItem::Comprehension(..)) => {
                return Err(addr.invariant(format!("cannot assign a {}", other.kind())));
            }
        }
        Ok(())
    }

    fn pop_top(&mut self, addr: Address<'c>) -> Result<()> {
        let value = self.pop_value(addr)?;
        match value.item {
            StackItem::Expr(expr) => self.suite.push(Stmt::Expr(expr)),
            StackItem::Import(import) => self.suite.push(Stmt::Import(finish_import(import, None))),
            // `with cm:` without a target
            StackItem::Binding(_) => {}
            other => return Err(addr.invariant(format!("cannot discard a {}", other.kind()))),
        }
        Ok(())
    }

    /// `a, b = x, y` swaps through `ROT_TWO`; an in-place attribute update
    /// rotates its pending result below the owner instead.
    fn rot_two(&mut self, addr: Address<'c>) -> Result<()> {
        let values = self.stack.pop_n(2).ok_or_else(|| underflow(addr))?;
        let [below, top]: [StackValue; 2] = values.try_into().map_err(|_| underflow(addr))?;
        match (below.item, top.item) {
            (StackItem::Expr(first), StackItem::Expr(second)) => {
                let id = self.code.fresh_id();
                let source = StackValue::new(id, StackItem::Expr(Expr::Tuple(vec![first, second])));
                self.begin_unpack(source, 2, None);
            }
            (below_item, top_item) => {
                self.stack.push(StackValue::new(top.id, top_item));
                self.stack.push(StackValue::new(below.id, below_item));
            }
        }
        Ok(())
    }

    /// `ROT_THREE; ROT_TWO` is the three-value swap `a, b, c = x, y, z`;
    /// otherwise a plain rotation.
    fn rot_three(&mut self, addr: Address<'c>) -> Result<Flow<'c>> {
        let values = self.stack.pop_n(3).ok_or_else(|| underflow(addr))?;
        let swap = addr.next().is_some_and(|next| next.is(Opcode::RotTwo))
            && values.iter().all(|v| matches!(v.item, StackItem::Expr(_)));
        if swap {
            let items = values
                .into_iter()
                .map(|v| expect_expr(addr, v))
                .collect::<Result<Vec<_>>>()?;
            let id = self.code.fresh_id();
            self.begin_unpack(StackValue::new(id, StackItem::Expr(Expr::Tuple(items))), 3, None);
            return Ok(Flow::to(addr.get(2)));
        }
        let [tos2, tos1, tos]: [StackValue; 3] = values.try_into().map_err(|_| underflow(addr))?;
        self.stack.push(tos);
        self.stack.push(tos2);
        self.stack.push(tos1);
        Ok(Flow::Next)
    }

    // --- Expressions ---

    fn unary(&mut self, addr: Address<'c>, op: UnaryOp) -> Result<()> {
        let operand = self.pop_expr(addr)?;
        self.push_expr(Expr::unary(op, operand));
        Ok(())
    }

    fn binary(&mut self, addr: Address<'c>, op: BinOp) -> Result<()> {
        let (left, right) = self.pop_pair(addr)?;
        self.push_expr(Expr::binary(op, left, right));
        Ok(())
    }

    fn inplace(&mut self, addr: Address<'c>, op: BinOp) -> Result<()> {
        let (target, value) = self.pop_pair(addr)?;
        self.push_item(StackItem::AugAssign(AugAssign { op, target, value }));
        Ok(())
    }

    fn compare_op(&mut self, addr: Address<'c>, arg: u32) -> Result<Flow<'c>> {
        let right = self.pop_value(addr)?;
        let left = self.pop_value(addr)?;
        if arg == EXCEPTION_MATCH {
            let exc_type = expect_expr(addr, right)?;
            return self.exception_match(addr, left, exc_type);
        }
        let op = CompareOp::from_arg(arg)
            .ok_or_else(|| addr.malformed(format!("unknown comparison {}", arg)))?;
        let left = expect_expr(addr, left)?;
        let right = expect_expr(addr, right)?;
        self.push_expr(Expr::compare(op, left, right));
        Ok(Flow::Next)
    }

    fn load_attr(&mut self, addr: Address<'c>, index: u32) -> Result<()> {
        let attr = self.name(addr, index)?;
        if let Some(StackValue {
            item: StackItem::Import(import),
            ..
        }) = self.stack.peek_mut()
        {
            // import a.b.c as d
            import.attribute_loads += 1;
            return Ok(());
        }
        let owner = self.pop_expr(addr)?;
        self.push_expr(Expr::attribute(owner, attr));
        Ok(())
    }

    fn store_map(&mut self, addr: Address<'c>) -> Result<()> {
        let (value, key) = self.pop_pair(addr)?;
        match self.stack.peek_mut() {
            Some(StackValue {
                item: StackItem::Expr(Expr::Dict(items)),
                ..
            }) => {
                items.push((key, value));
                Ok(())
            }
            _ => Err(addr.invariant("STORE_MAP without a dict display")),
        }
    }

    fn build_slice(&mut self, addr: Address<'c>, argc: u32) -> Result<()> {
        let slice = match argc {
            2 => {
                let (start, stop) = self.pop_pair(addr)?;
                Expr::Slice {
                    start: Box::new(start),
                    stop: Box::new(stop),
                    step: None,
                }
            }
            3 => {
                let step = self.pop_expr(addr)?;
                let (start, stop) = self.pop_pair(addr)?;
                Expr::Slice {
                    start: Box::new(start),
                    stop: Box::new(stop),
                    step: Some(Box::new(step)),
                }
            }
            _ => return Err(addr.malformed(format!("BUILD_SLICE with {} operands", argc))),
        };
        self.push_expr(slice);
        Ok(())
    }

    fn import_name(&mut self, addr: Address<'c>, index: u32) -> Result<()> {
        let module = self.name(addr, index)?;
        let (level, fromlist) = self.pop_pair(addr)?;
        let level = match level {
            Expr::Constant(Constant::Int(level)) if level >= 0 => level as u32,
            _ => return Err(addr.malformed("import level is not a non-negative integer")),
        };
        let fromlist = match fromlist {
            Expr::Constant(Constant::None) => None,
            Expr::Constant(Constant::Tuple(items)) => Some(
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| addr.malformed("import name list holds a non-string"))?,
            ),
            _ => return Err(addr.malformed("import name list is not a constant tuple")),
        };
        self.push_item(StackItem::Import(PendingImport {
            module,
            level,
            fromlist,
            attribute_loads: 0,
            names: Vec::new(),
        }));
        Ok(())
    }

    fn call_function(&mut self, addr: Address<'c>, argc: u32, has_var: bool, has_kw: bool) -> Result<()> {
        let keyword_count = ((argc >> 8) & 0xff) as usize;
        let positional_count = (argc & 0xff) as usize;
        let kwargs = if has_kw { Some(self.pop_expr(addr)?) } else { None };
        let starargs = if has_var { Some(self.pop_expr(addr)?) } else { None };
        let keyword_values = self.pop_exprs(addr, 2 * keyword_count)?;
        let keywords = keyword_pairs(addr, keyword_values)?;
        let mut args = self.stack.pop_n(positional_count).ok_or_else(|| underflow(addr))?;
        let func = self.pop_value(addr)?;

        match func.item {
            StackItem::BuildClass => {
                if starargs.is_some() || kwargs.is_some() {
                    return Err(addr.unsupported("class statement with starred arguments"));
                }
                let mut args = args.into_iter();
                let body = match args.next().map(|v| v.item) {
                    Some(StackItem::Function(body)) => body,
                    _ => return Err(addr.invariant("class builder called without a body")),
                };
                // The class name argument repeats the body's unit name.
                args.next().ok_or_else(|| addr.invariant("class builder called without a name"))?;
                let bases = args
                    .map(|v| expect_expr(addr, v))
                    .collect::<Result<Vec<_>>>()?;
                self.push_item(StackItem::Class(PendingClass {
                    body,
                    bases,
                    keywords,
                    decorators: Vec::new(),
                }));
            }
            StackItem::Comprehension(kind, function) => {
                if args.len() != 1 || !keywords.is_empty() || starargs.is_some() || kwargs.is_some() {
                    return Err(addr.invariant("comprehension called with unexpected arguments"));
                }
                let iterable = args
                    .pop()
                    .map(|v| expect_expr(addr, v))
                    .ok_or_else(|| underflow(addr))??;
                let expr = definitions::build_comprehension(self.code, kind, function, iterable)?;
                self.push_expr(expr);
            }
            StackItem::Expr(func) => {
                let decorates = args.len() == 1
                    && keywords.is_empty()
                    && starargs.is_none()
                    && kwargs.is_none()
                    && matches!(args[0].item, StackItem::Function(_) | StackItem::Class(_));
                match args.pop() {
                    Some(definition) if decorates => self.decorate(addr, func, definition)?,
                    last => {
                        args.extend(last);
                        let args = args
                            .into_iter()
                            .map(|v| expect_expr(addr, v))
                            .collect::<Result<Vec<_>>>()?;
                        self.push_expr(Expr::Call {
                            func: Box::new(func),
                            args,
                            keywords,
                            starargs: starargs.map(Box::new),
                            kwargs: kwargs.map(Box::new),
                        });
                    }
                }
            }
            other => return Err(addr.invariant(format!("cannot call a {}", other.kind()))),
        }
        Ok(())
    }

    fn decorate(&mut self, addr: Address<'c>, decorator: Expr, definition: StackValue) -> Result<()> {
        let item = match definition.item {
            StackItem::Function(mut function) => {
                function.decorators.push(decorator);
                StackItem::Function(function)
            }
            StackItem::Class(mut class) => {
                class.decorators.push(decorator);
                StackItem::Class(class)
            }
            other => return Err(addr.invariant(format!("cannot decorate a {}", other.kind()))),
        };
        self.stack.push(StackValue::new(definition.id, item));
        Ok(())
    }

    fn make_function(&mut self, addr: Address<'c>, argc: u32, closure: bool) -> Result<()> {
        let unit = match self.pop_expr(addr)? {
            Expr::Constant(Constant::Code(unit)) => unit,
            _ => return Err(addr.malformed("function built from a non-code constant")),
        };
        if closure {
            self.pop_value(addr)?;
        }

        let mut function = PendingFunction::new(unit);
        let annotation_count = ((argc >> 16) & 0x7fff) as usize;
        if annotation_count > 0 {
            let names = match self.pop_expr(addr)? {
                Expr::Constant(Constant::Tuple(names)) => names,
                _ => return Err(addr.malformed("annotation names are not a constant tuple")),
            };
            let values = self.pop_exprs(addr, names.len())?;
            for (name, value) in names.iter().zip(values) {
                let name = name
                    .as_str()
                    .ok_or_else(|| addr.malformed("annotation name is not a string"))?;
                function.annotations.push((name.to_string(), value));
            }
        }
        function.defaults = self.pop_exprs(addr, (argc & 0xff) as usize)?;
        let kw_values = self.pop_exprs(addr, 2 * ((argc >> 8) & 0xff) as usize)?;
        function.kwdefaults = keyword_pairs(addr, kw_values)?
            .into_iter()
            .map(|k| (k.name, k.value))
            .collect();

        if function.unit.name == "<lambda>" {
            let lambda = definitions::build_lambda(self.code, &function)?;
            self.push_expr(lambda);
        } else if let Some(kind) = ComprehensionKind::from_unit_name(&function.unit.name) {
            self.push_item(StackItem::Comprehension(kind, function));
        } else {
            self.push_item(StackItem::Function(function));
        }
        Ok(())
    }

    fn return_value(&mut self, addr: Address<'c>) -> Result<()> {
        let value = self.pop_expr(addr)?;
        if !value.is_none_constant() {
            self.suite.push(Stmt::Return(Some(value)));
        } else if addr.next().is_some_and(|next| !next.is_end()) {
            // The implicit return at the end of a unit is not written.
            self.suite.push(Stmt::Return(None));
        }
        Ok(())
    }

    fn raise(&mut self, addr: Address<'c>, argc: u32) -> Result<()> {
        let stmt = match argc {
            0 => Stmt::Raise {
                exc: None,
                cause: None,
            },
            1 => Stmt::Raise {
                exc: Some(self.pop_expr(addr)?),
                cause: None,
            },
            2 => {
                let (exc, cause) = self.pop_pair(addr)?;
                Stmt::Raise {
                    exc: Some(exc),
                    cause: Some(cause),
                }
            }
            _ => return Err(addr.unsupported(format!("RAISE_VARARGS with {} operands", argc))),
        };
        self.suite.push(stmt);
        Ok(())
    }

    // --- Conditions ---

    /// Record a conditional jump, folding earlier jumps whose targets lie
    /// before this one into its condition.
    fn push_popjump(
        &mut self,
        origin: Address<'c>,
        truthiness: bool,
        target: Option<Address<'c>>,
        cond: Expr,
    ) -> Result<()> {
        let mut target = target;
        if let Some(prev) = target.and_then(|t| t.prev()) {
            if prev.is_else_jump() {
                target = Some(prev.jump()?);
            }
        }
        let mut cond = cond;
        while let Some(top) = self.popjumps.last() {
            if target_le(target, top.target) {
                break;
            }
            let Some(top) = self.popjumps.pop() else {
                break;
            };
            let op = if top.truthiness { BoolOp::Or } else { BoolOp::And };
            cond = match cond {
                Expr::BoolOp {
                    op: inner,
                    left,
                    right,
                } if inner == op => Expr::bool_op(op, Expr::bool_op(op, top.cond, *left), *right),
                other => Expr::bool_op(op, top.cond, other),
            };
        }
        self.popjumps.push(PendingJump {
            origin,
            truthiness,
            target,
            cond,
        });
        Ok(())
    }

    fn pop_popjump(&mut self, addr: Address<'c>) -> Result<Expr> {
        self.popjumps
            .pop()
            .map(|jump| jump.cond)
            .ok_or_else(|| addr.invariant("no pending condition"))
    }

    fn jump_if_or_pop(&mut self, addr: Address<'c>, op: BoolOp) -> Result<Flow<'c>> {
        let mut end = addr.jump()?;
        let operand = self.pop_expr(addr)?;
        self.push_popjump(addr, true, Some(end), operand)?;
        let left = self.pop_popjump(addr)?;

        if op == BoolOp::And && end.is(Opcode::RotTwo) {
            // Chained comparison: skip the `ROT_TWO; POP_TOP` cleanup.
            let cleanup_jump = end
                .prev()
                .is_some_and(|p| p.is(Opcode::JumpForward) && p.arg() == Some(2));
            if cleanup_jump {
                if let Some(after) = end.get(2) {
                    end = after;
                }
            }
        }

        let mut right_side = self.sub(addr.next(), Some(end))?;
        right_side.stack = mem::take(&mut self.stack);
        right_side.run()?;
        self.stack = mem::take(&mut right_side.stack);
        if !right_side.suite.is_empty() {
            return Err(addr.invariant("statement inside a boolean operand"));
        }
        let right = self.pop_expr(addr)?;

        let combined = match op {
            BoolOp::And => match Expr::chain_compare(left, right) {
                Ok(chain) => chain,
                Err((left, right)) => Expr::bool_op(BoolOp::And, left, right),
            },
            BoolOp::Or => Expr::bool_op(BoolOp::Or, left, right),
        };
        self.push_expr(combined);
        Ok(Flow::Goto(end))
    }

    fn pop_jump_if(&mut self, addr: Address<'c>, truthiness: bool) -> Result<Flow<'c>> {
        let mut jump_addr = addr.jump()?;
        if jump_addr.is(Opcode::ForIter) {
            // A loop body with nothing after the branch.
            jump_addr = jump_addr.jump()?;
            if jump_addr.is(Opcode::PopBlock) {
                jump_addr = jump_addr.prev().ok_or_else(|| addr.malformed("loop exit at start of code"))?;
            }
        } else if let Some(setup) = jump_addr.prev().filter(|p| p.is(Opcode::SetupLoop)) {
            // A while body with nothing after the branch.
            jump_addr = setup
                .jump()?
                .get(-2)
                .ok_or_else(|| addr.malformed("loop block too short"))?;
        }

        let cond = self.pop_expr(addr)?;
        if !addr.is_else_jump() {
            self.push_popjump(addr, truthiness, Some(jump_addr), cond)?;
            return Ok(Flow::Next);
        }

        self.push_popjump(addr, truthiness, jump_addr.next(), cond)?;
        let mut cond = self.pop_popjump(addr)?;
        if truthiness {
            cond = Expr::not(cond);
        }
        let end_true = jump_addr
            .prev()
            .ok_or_else(|| addr.malformed("branch target at start of code"))?;

        if end_true.is(Opcode::ReturnValue) || end_true.is(Opcode::RaiseVarargs) {
            let body = self.run_range(addr.next(), end_true.next())?.into_suite()?;
            self.suite.push(Stmt::If {
                cond,
                body,
                orelse: Suite::new(),
            });
            return Ok(Flow::Goto(jump_addr));
        }

        let d_true = self.run_range(addr.next(), Some(end_true))?;
        if jump_addr.is(Opcode::PopBlock) {
            let body = d_true.into_suite()?;
            self.suite.push(Stmt::While { cond, body });
            return Ok(Flow::to(jump_addr.next()));
        }

        let end_false = match end_true.opcode() {
            Some(Opcode::JumpForward) => Some(end_true.jump()?),
            Some(Opcode::JumpAbsolute) => {
                let target = end_true.jump()?;
                if target.is(Opcode::ForIter) {
                    target.jump()?.prev()
                } else if let Some(setup) = target.prev().filter(|p| p.is(Opcode::SetupLoop)) {
                    setup.jump()?.get(-2)
                } else {
                    Some(target)
                }
            }
            other => {
                return Err(end_true.unsupported(format!(
                    "branch ends in {}",
                    other.map_or_else(|| "end of code".to_string(), |op| op.to_string())
                )));
            }
        };

        let d_false = self.run_range(Some(jump_addr), end_false)?;
        if d_true.stack.is_empty() && d_false.stack.is_empty() {
            let body = d_true.into_suite()?;
            let orelse = d_false.into_suite()?;
            self.suite.push(Stmt::If { cond, body, orelse });
        } else if d_true.stack.len() == 1
            && d_false.stack.len() == 1
            && d_true.suite.is_empty()
            && d_false.suite.is_empty()
        {
            let mut d_true = d_true;
            let mut d_false = d_false;
            let body = d_true.pop_expr(addr)?;
            let orelse = d_false.pop_expr(addr)?;
            self.push_expr(Expr::IfElse {
                cond: Box::new(cond),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        } else {
            return Err(addr.invariant(format!(
                "conditional branches leave {} and {} values",
                d_true.stack.len(),
                d_false.stack.len()
            )));
        }
        Ok(Flow::to(end_false))
    }

    // --- Blocks ---

    fn for_iter(&mut self, addr: Address<'c>) -> Result<Flow<'c>> {
        let iter = self.pop_expr(addr)?;
        let exit = addr.jump()?;
        let mut body = self.sub(addr.next(), exit.prev())?;
        body.push_item(StackItem::Binding(Binding::LoopTarget));
        body.run()?;
        let target = body
            .binding
            .take()
            .ok_or_else(|| addr.invariant("loop without a target"))?;
        let body = body.into_suite()?;
        self.suite.push(Stmt::For { target, iter, body });
        Ok(Flow::Goto(exit))
    }

    fn setup_with(&mut self, addr: Address<'c>) -> Result<Flow<'c>> {
        let end_with = addr.jump()?;
        let context = self.pop_expr(addr)?;
        let mut body = self.sub(addr.next(), Some(end_with))?;
        body.push_item(StackItem::Binding(Binding::WithTarget));
        body.run()?;
        let target = body.binding.take();
        body.discard_residue(end_with)?;
        let body = body.into_suite()?;

        let well_formed = end_with.is(Opcode::WithCleanup)
            && end_with.next().is_some_and(|next| next.is(Opcode::EndFinally));
        if !well_formed {
            return Err(end_with.unsupported("with block not closed by WITH_CLEANUP; END_FINALLY"));
        }
        self.suite.push(Stmt::With(With {
            context,
            target,
            body,
        }));
        Ok(Flow::to(end_with.get(2)))
    }

    fn setup_finally(&mut self, addr: Address<'c>) -> Result<Flow<'c>> {
        let start_finally = addr.jump()?;
        let mut body = self.run_range(addr.next(), Some(start_finally))?;
        body.discard_residue(start_finally)?;
        let body = body.into_suite()?;
        let mut finally = self.sub(Some(start_finally), None)?;
        let end_finally = finally.run()?;
        finally.discard_residue(end_finally.unwrap_or(start_finally))?;
        let finalbody = finally.into_suite()?;
        self.suite.push(Stmt::TryFinally { body, finalbody });
        Ok(Flow::to(end_finally.and_then(|end| end.next())))
    }

    fn setup_except(&mut self, addr: Address<'c>) -> Result<Flow<'c>> {
        let mut clause_start = addr.jump()?;
        let end_try = clause_start
            .prev()
            .ok_or_else(|| addr.malformed("handler at start of code"))?;
        if !(end_try.is(Opcode::JumpForward) || end_try.is(Opcode::JumpAbsolute)) {
            return Err(end_try.unsupported("try body does not end in a jump"));
        }
        let body = self.run_range(addr.next(), Some(end_try))?.into_suite()?;

        let mut handlers = Vec::new();
        // Where the first handler resumes; past the end of the statement when
        // there is an else block.
        let mut handler_exit: Option<Address<'c>> = None;
        loop {
            match clause_start.opcode() {
                Some(Opcode::EndFinally) => break,
                Some(Opcode::DupTop) => {
                    let mut clause = self.sub(clause_start.next(), None)?;
                    clause.push_item(StackItem::Binding(Binding::HandlerTarget));
                    clause.run()?;
                    let matched = clause
                        .handler
                        .take()
                        .ok_or_else(|| clause_start.unsupported("except clause without an exception match"))?;
                    if handlers.is_empty() {
                        handler_exit = matched.next.prev().filter(|p| p.is(Opcode::JumpForward));
                    }
                    handlers.push(ExceptHandler {
                        exc_type: Some(matched.exc_type),
                        name: matched.name,
                        body: matched.body,
                    });
                    clause_start = matched.next;
                }
                Some(Opcode::PopTop) => {
                    let mut clause = self.sub(clause_start.get(3), None)?;
                    let end = clause
                        .run()?
                        .ok_or_else(|| clause_start.malformed("bare except clause runs past the end"))?;
                    if handlers.is_empty() {
                        handler_exit = end.next().filter(|n| n.is(Opcode::JumpForward));
                    }
                    handlers.push(ExceptHandler {
                        exc_type: None,
                        name: None,
                        body: clause.into_suite()?,
                    });
                    clause_start = end
                        .get(2)
                        .filter(|a| a.is(Opcode::EndFinally))
                        .ok_or_else(|| end.unsupported("bare except clause not followed by END_FINALLY"))?;
                }
                _ => return Err(clause_start.unsupported("unrecognised except clause")),
            }
        }

        let after = clause_start.next();
        let statement_end = match handler_exit {
            Some(jump) => Some(jump.jump()?),
            None => None,
        };
        let (orelse, resume) = match (after, statement_end) {
            (Some(after), Some(end)) if end > after => {
                let orelse = self.run_range(Some(after), Some(end))?.into_suite()?;
                (orelse, Some(end))
            }
            _ => (Suite::new(), after),
        };
        self.suite.push(Stmt::Try(Try {
            body,
            handlers,
            orelse,
        }));
        Ok(Flow::to(resume))
    }

    /// The `COMPARE_OP 10` test at the head of a typed except clause:
    ///
    /// ```text
    /// COMPARE_OP 10; POP_JUMP_IF_FALSE next; POP_TOP; POP_TOP | STORE name;
    /// POP_TOP; [SETUP_FINALLY cleanup]; body...
    /// ```
    fn exception_match(&mut self, addr: Address<'c>, guard: StackValue, exc_type: Expr) -> Result<Flow<'c>> {
        if guard.item != StackItem::Binding(Binding::HandlerTarget) {
            return Err(addr.invariant("exception match outside an except clause"));
        }
        let expect = |delta: isize, opcode: Opcode| -> Result<Address<'c>> {
            addr.get(delta)
                .filter(|a| a.is(opcode))
                .ok_or_else(|| addr.unsupported(format!("except clause without {} at +{}", opcode, delta)))
        };
        let next = expect(1, Opcode::PopJumpIfFalse)?.jump()?;
        expect(2, Opcode::PopTop)?;
        let name_slot = addr
            .get(3)
            .ok_or_else(|| addr.malformed("except clause truncated"))?;
        let name_end = expect(4, Opcode::PopTop)?;

        let (body_start, body_end) = match addr.get(5) {
            Some(setup) if setup.is(Opcode::SetupFinally) => (setup.next(), Some(setup.jump()?)),
            start => (start, next.prev()),
        };
        let body = self.run_range(body_start, body_end)?.into_suite()?;

        let name = if name_slot.is(Opcode::PopTop) {
            None
        } else {
            let mut binder = self.sub(Some(name_slot), Some(name_end))?;
            binder.push_item(StackItem::Binding(Binding::HandlerTarget));
            binder.run()?;
            binder.binding.take()
        };

        self.handler = Some(HandlerClause {
            exc_type,
            name,
            body,
            next,
        });
        Ok(Flow::Stop)
    }
}
