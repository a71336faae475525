use crate::constant_info::Constant;

use binrw::binrw;

/// A compiled unit: module body, function, class body, lambda or comprehension.
///
/// Field order follows the marshal layout of a 3.2 code object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodeUnit {
    pub argcount: u32,
    pub kwonlyargcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: CodeFlags,
    pub code: Vec<u8>,
    pub consts: Vec<Constant>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub filename: String,
    pub name: String,
    pub firstlineno: u32,
    pub lnotab: Vec<u8>,
}

impl CodeUnit {
    /// Cell variables followed by free variables, the index space of the
    /// `*_DEREF` and `LOAD_CLOSURE` instructions.
    pub fn derefnames(&self) -> impl Iterator<Item = &str> {
        self.cellvars
            .iter()
            .chain(self.freevars.iter())
            .map(String::as_str)
    }

    pub fn derefname(&self, index: usize) -> Option<&str> {
        self.derefnames().nth(index)
    }

    pub fn is_cellvar(&self, index: usize) -> bool {
        index < self.cellvars.len()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[binrw]
#[brw(little)]
pub struct CodeFlags(u32);

bitflags! {
    impl CodeFlags: u32 {
        const OPTIMIZED = 0x0001;    // Locals live in fast slots.
        const NEWLOCALS = 0x0002;    // A fresh locals dict is created per call.
        const VARARGS = 0x0004;      // Accepts *args.
        const VARKEYWORDS = 0x0008;  // Accepts **kwargs.
        const NESTED = 0x0010;       // Defined inside another function.
        const GENERATOR = 0x0020;    // Body contains yield.
        const NOFREE = 0x0040;       // No free or cell variables.
    }
}

/// A function value: a code unit with its bound defaults and closure cells.
///
/// Closure cells are accepted for completeness and never rendered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FunctionObject {
    pub code: CodeUnit,
    pub defaults: Vec<Constant>,
    pub kwdefaults: Vec<(String, Constant)>,
    pub closure: Vec<String>,
}

impl FunctionObject {
    pub fn new(code: CodeUnit) -> Self {
        FunctionObject {
            code,
            ..Default::default()
        }
    }
}
