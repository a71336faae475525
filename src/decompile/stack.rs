//! The simulated operand stack.
//!
//! Values carry an identity so the reconstructor can tell whether the value
//! it just popped is still reachable through a duplicate further down, which
//! is how chained assignments (`a = b = v`) are detected.

use std::collections::HashMap;
use std::rc::Rc;

use crate::types::CodeUnit;

use super::expr::{ComprehensionKind, Expr, Keyword};
use super::structured_types::AugAssign;

/// Identity of a value pushed on the operand stack. Duplicates share an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// `MAKE_FUNCTION`/`MAKE_CLOSURE` result not yet bound or called.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingFunction {
    pub unit: Rc<CodeUnit>,
    pub defaults: Vec<Expr>,
    pub kwdefaults: Vec<(String, Expr)>,
    /// `(parameter, annotation)` pairs; `return` names the return annotation.
    pub annotations: Vec<(String, Expr)>,
    pub decorators: Vec<Expr>,
}

impl PendingFunction {
    pub fn new(unit: Rc<CodeUnit>) -> Self {
        PendingFunction {
            unit,
            defaults: Vec::new(),
            kwdefaults: Vec::new(),
            annotations: Vec::new(),
            decorators: Vec::new(),
        }
    }
}

/// Result of calling the class builder, waiting to be stored under its name.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingClass {
    pub body: PendingFunction,
    pub bases: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub decorators: Vec<Expr>,
}

/// `IMPORT_NAME` result. `import a.b as c` also absorbs the attribute loads
/// that walk down to the bound submodule.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingImport {
    pub module: String,
    pub level: u32,
    pub fromlist: Option<Vec<String>>,
    /// Attribute loads absorbed while walking to a bound submodule.
    pub attribute_loads: usize,
    /// `(name, alias)` pairs bound by `IMPORT_FROM` stores.
    pub names: Vec<(String, String)>,
}

/// Placeholder for the value a block construct binds: the next store names
/// its target, a `POP_TOP` discards it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    LoopTarget,
    WithTarget,
    HandlerTarget,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StackItem {
    Expr(Expr),
    /// One slot of a sequence unpack; the accumulator lives in the stack.
    Unpack,
    /// An in-place operation whose result is about to be stored back.
    AugAssign(AugAssign),
    Import(PendingImport),
    ImportFrom(String),
    /// The class-builder marker pushed by `LOAD_BUILD_CLASS`.
    BuildClass,
    Function(PendingFunction),
    Comprehension(ComprehensionKind, PendingFunction),
    Class(PendingClass),
    Binding(Binding),
}

impl StackItem {
    pub fn kind(&self) -> &'static str {
        match self {
            StackItem::Expr(_) => "expression",
            StackItem::Unpack => "unpack slot",
            StackItem::AugAssign(_) => "in-place operation",
            StackItem::Import(_) => "import",
            StackItem::ImportFrom(_) => "from-import name",
            StackItem::BuildClass => "class builder",
            StackItem::Function(_) => "function definition",
            StackItem::Comprehension(..) => "comprehension",
            StackItem::Class(_) => "class definition",
            StackItem::Binding(_) => "binding marker",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StackValue {
    pub id: NodeId,
    pub item: StackItem,
}

impl StackValue {
    pub fn new(id: NodeId, item: StackItem) -> Self {
        StackValue { id, item }
    }
}

/// Collects the targets of `UNPACK_SEQUENCE`/`UNPACK_EX` as they are stored.
#[derive(Clone, Debug, PartialEq)]
pub struct UnpackAccumulator {
    /// The value being unpacked, restored once every target is known.
    pub source: StackValue,
    pub count: usize,
    /// Position of the starred target of an extended unpack.
    pub star_index: Option<usize>,
    pub targets: Vec<Expr>,
}

impl UnpackAccumulator {
    pub fn new(source: StackValue, count: usize, star_index: Option<usize>) -> Self {
        UnpackAccumulator {
            source,
            count,
            star_index,
            targets: Vec::with_capacity(count),
        }
    }

    /// Record the next target, starring it when it is the extended slot.
    pub fn add_target(&mut self, target: Expr) {
        if self.star_index == Some(self.targets.len()) {
            self.targets.push(Expr::Starred(Box::new(target)));
        } else {
            self.targets.push(target);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.targets.len() >= self.count
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationStack {
    items: Vec<StackValue>,
    counts: HashMap<NodeId, usize>,
    unpacks: HashMap<NodeId, UnpackAccumulator>,
}

impl EvaluationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, value: StackValue) {
        *self.counts.entry(value.id).or_insert(0) += 1;
        self.items.push(value);
    }

    pub fn pop(&mut self) -> Option<StackValue> {
        let value = self.items.pop()?;
        if let Some(count) = self.counts.get_mut(&value.id) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&value.id);
            }
        }
        Some(value)
    }

    /// Pop `n` values, returned in push order.
    pub fn pop_n(&mut self, n: usize) -> Option<Vec<StackValue>> {
        if n > self.items.len() {
            return None;
        }
        let mut values: Vec<StackValue> = (0..n).filter_map(|_| self.pop()).collect();
        values.reverse();
        Some(values)
    }

    pub fn peek(&self) -> Option<&StackValue> {
        self.items.last()
    }

    pub fn peek_mut(&mut self) -> Option<&mut StackValue> {
        self.items.last_mut()
    }

    /// The top `n` values in push order.
    pub fn peek_n(&self, n: usize) -> Option<&[StackValue]> {
        let len = self.items.len();
        (n <= len).then(|| &self.items[len - n..])
    }

    /// Whether a value with this identity is still on the stack.
    pub fn contains(&self, id: NodeId) -> bool {
        self.counts.contains_key(&id)
    }

    pub fn values(&self) -> &[StackValue] {
        &self.items
    }

    pub fn start_unpack(&mut self, id: NodeId, accumulator: UnpackAccumulator) {
        self.unpacks.insert(id, accumulator);
    }

    pub fn unpack_mut(&mut self, id: NodeId) -> Option<&mut UnpackAccumulator> {
        self.unpacks.get_mut(&id)
    }

    pub fn finish_unpack(&mut self, id: NodeId) -> Option<UnpackAccumulator> {
        self.unpacks.remove(&id)
    }

    pub fn pending_unpacks(&self) -> usize {
        self.unpacks.len()
    }
}
