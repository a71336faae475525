use binrw::binrw;
use strum::Display;

/// Opcodes ≥ this value carry a 16-bit little-endian argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// The CPython 3.2 instruction set.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[binrw]
#[brw(little, repr = u8)]
pub enum Opcode {
    StopCode = 0,
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    StoreMap = 54,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    StoreLocals = 69,
    PrintExpr = 70,
    LoadBuildClass = 71,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    BreakLoop = 80,
    WithCleanup = 81,
    ReturnValue = 83,
    ImportStar = 84,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    PopExcept = 89,
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    UnpackEx = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    DeleteDeref = 138,
    CallFunctionVar = 140,
    CallFunctionKw = 141,
    CallFunctionVarKw = 142,
    SetupWith = 143,
    ExtendedArg = 144,
    ListAppend = 145,
    SetAdd = 146,
    MapAdd = 147,
}

impl Opcode {
    pub fn has_argument(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// Jumps whose argument is a delta from the next instruction.
    pub fn is_relative_jump(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            ForIter | JumpForward | SetupLoop | SetupExcept | SetupFinally | SetupWith
        )
    }

    /// Jumps whose argument is an absolute byte offset.
    pub fn is_absolute_jump(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            JumpIfFalseOrPop
                | JumpIfTrueOrPop
                | JumpAbsolute
                | PopJumpIfFalse
                | PopJumpIfTrue
                | ContinueLoop
        )
    }

    pub fn is_jump(self) -> bool {
        self.is_relative_jump() || self.is_absolute_jump()
    }

    pub fn is_pop_jump_if(self) -> bool {
        matches!(self, Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue)
    }

    /// Instructions that close a branch body; a conditional jump landing just
    /// after one of these skips over a block.
    pub fn ends_branch(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            JumpForward | ReturnValue | JumpAbsolute | SetupLoop | RaiseVarargs
        )
    }

    /// Instructions that complete a statement.
    pub fn completes_statement(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            SetupLoop
                | BreakLoop
                | ContinueLoop
                | SetupFinally
                | EndFinally
                | SetupExcept
                | PopExcept
                | SetupWith
                | PopBlock
                | StoreFast
                | DeleteFast
                | StoreDeref
                | DeleteDeref
                | StoreGlobal
                | DeleteGlobal
                | StoreName
                | DeleteName
                | StoreAttr
                | DeleteAttr
                | ImportName
                | ImportFrom
                | ReturnValue
                | YieldValue
                | RaiseVarargs
                | PopTop
        )
    }
}

/// One decoded instruction. `offset` is the byte offset of the first byte,
/// including a folded `EXTENDED_ARG` prefix; `next_offset` is the offset of the
/// following instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: Opcode,
    pub arg: Option<u32>,
    pub next_offset: u32,
}

impl Instruction {
    /// Byte offset of the jump target, if this is a jump.
    pub fn jump_target(&self) -> Option<u32> {
        let arg = self.arg?;
        if self.opcode.is_relative_jump() {
            self.next_offset.checked_add(arg)
        } else if self.opcode.is_absolute_jump() {
            Some(arg)
        } else {
            None
        }
    }
}
