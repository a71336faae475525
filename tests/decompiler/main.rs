use std::collections::HashMap;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use pycode_decompiler::constant_info::Constant;
use pycode_decompiler::decompile::{DecompileOptions, Decompiler};
use pycode_decompiler::instruction::Opcode;
use pycode_decompiler::{CodeFlags, CodeUnit, DecompileError};

mod comprehensions;
mod control_flow;
mod definitions;
mod imports;

// --- Test helpers ---

/// Bytecode assembler with forward and backward labels.
#[derive(Default)]
struct Asm {
    code: Vec<u8>,
    labels: HashMap<&'static str, u32>,
    fixups: Vec<(usize, Opcode, &'static str)>,
}

impl Asm {
    fn new() -> Self {
        Self::default()
    }

    fn op(mut self, opcode: Opcode) -> Self {
        assert!(!opcode.has_argument(), "{} takes an argument", opcode);
        self.code.push(opcode as u8);
        self
    }

    fn arg(mut self, opcode: Opcode, arg: u16) -> Self {
        assert!(opcode.has_argument(), "{} takes no argument", opcode);
        self.code.push(opcode as u8);
        self.code.extend_from_slice(&arg.to_le_bytes());
        self
    }

    fn jump(mut self, opcode: Opcode, label: &'static str) -> Self {
        assert!(opcode.is_jump(), "{} is not a jump", opcode);
        self.fixups.push((self.code.len(), opcode, label));
        self.arg(opcode, 0)
    }

    fn label(mut self, name: &'static str) -> Self {
        let previous = self.labels.insert(name, self.code.len() as u32);
        assert!(previous.is_none(), "label {} defined twice", name);
        self
    }

    fn finish(mut self) -> Vec<u8> {
        for (position, opcode, label) in std::mem::take(&mut self.fixups) {
            let target = *self
                .labels
                .get(label)
                .unwrap_or_else(|| panic!("undefined label {}", label));
            let arg = if opcode.is_relative_jump() {
                target - (position as u32 + 3)
            } else {
                target
            };
            let bytes = (arg as u16).to_le_bytes();
            self.code[position + 1] = bytes[0];
            self.code[position + 2] = bytes[1];
        }
        self.code
    }
}

/// `return None` at the end of a unit.
fn implicit_return(asm: Asm, none_index: u16) -> Vec<u8> {
    asm.arg(Opcode::LoadConst, none_index)
        .op(Opcode::ReturnValue)
        .finish()
}

struct Unit(CodeUnit);

impl Unit {
    fn module(code: Vec<u8>) -> Self {
        Unit(CodeUnit {
            name: "<module>".to_string(),
            filename: "test.py".to_string(),
            flags: CodeFlags::NOFREE,
            code,
            ..Default::default()
        })
    }

    fn function(name: &str, code: Vec<u8>) -> Self {
        Unit(CodeUnit {
            name: name.to_string(),
            filename: "test.py".to_string(),
            flags: CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS,
            code,
            ..Default::default()
        })
    }

    fn consts(mut self, consts: Vec<Constant>) -> Self {
        self.0.consts = consts;
        self
    }

    fn names(mut self, names: &[&str]) -> Self {
        self.0.names = strings(names);
        self
    }

    fn varnames(mut self, varnames: &[&str]) -> Self {
        self.0.nlocals = varnames.len() as u32;
        self.0.varnames = strings(varnames);
        self
    }

    fn cellvars(mut self, cellvars: &[&str]) -> Self {
        self.0.cellvars = strings(cellvars);
        self
    }

    fn freevars(mut self, freevars: &[&str]) -> Self {
        self.0.freevars = strings(freevars);
        self
    }

    fn argcount(mut self, argcount: u32) -> Self {
        self.0.argcount = argcount;
        self
    }

    fn kwonly(mut self, kwonlyargcount: u32) -> Self {
        self.0.kwonlyargcount = kwonlyargcount;
        self
    }

    fn flag(mut self, flag: CodeFlags) -> Self {
        self.0.flags.insert(flag);
        self
    }

    fn build(self) -> CodeUnit {
        self.0
    }

    fn constant(self) -> Constant {
        Constant::Code(Rc::new(self.0))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn s(text: &str) -> Constant {
    Constant::Str(text.to_string())
}

fn int(value: i64) -> Constant {
    Constant::Int(value)
}

fn names_tuple(items: &[&str]) -> Constant {
    Constant::Tuple(items.iter().map(|item| s(item)).collect())
}

fn decompile_module(unit: &CodeUnit) -> String {
    Decompiler::new(DecompileOptions::default())
        .decompile_module(unit)
        .unwrap_or_else(|e| panic!("decompiling {} failed: {}", unit.name, e))
}

fn try_decompile_module(unit: &CodeUnit) -> Result<String, DecompileError> {
    Decompiler::new(DecompileOptions::default()).decompile_module(unit)
}

// --- Assembler sanity ---

#[test]
fn test_assembler_resolves_labels() {
    let code = Asm::new()
        .jump(Opcode::SetupLoop, "end")
        .label("top")
        .jump(Opcode::JumpAbsolute, "top")
        .label("end")
        .op(Opcode::PopBlock)
        .finish();
    assert_eq!(code, vec![120, 3, 0, 113, 3, 0, 87]);
}

#[test]
fn test_empty_module_renders_nothing() {
    let unit = Unit::module(implicit_return(Asm::new(), 0))
        .consts(vec![Constant::None])
        .build();
    assert_eq!(decompile_module(&unit), "");
}
