use super::*;

use pretty_assertions::assert_eq;

// --- Branches ---

#[test]
fn test_if_else() {
    let code = Asm::new()
        .arg(Opcode::LoadName, 0)
        .jump(Opcode::PopJumpIfFalse, "else")
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreName, 1)
        .jump(Opcode::JumpForward, "end")
        .label("else")
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::StoreName, 1)
        .label("end");
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, int(1), int(2)])
        .names(&["a", "x"])
        .build();
    assert_eq!(
        decompile_module(&unit),
        "if a:\n    x = 1\nelse:\n    x = 2\n"
    );
}

#[test]
fn test_short_circuit_condition() {
    // if a and b: x = 1
    let code = Asm::new()
        .arg(Opcode::LoadName, 0)
        .jump(Opcode::PopJumpIfFalse, "end")
        .arg(Opcode::LoadName, 1)
        .jump(Opcode::PopJumpIfFalse, "end")
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreName, 2)
        .jump(Opcode::JumpForward, "end")
        .label("end");
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, int(1)])
        .names(&["a", "b", "x"])
        .build();
    assert_eq!(decompile_module(&unit), "if a and b:\n    x = 1\n");
}

#[test]
fn test_elif_chain() {
    let code = Asm::new()
        .arg(Opcode::LoadName, 0)
        .jump(Opcode::PopJumpIfFalse, "elif")
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreName, 2)
        .jump(Opcode::JumpForward, "end")
        .label("elif")
        .arg(Opcode::LoadName, 1)
        .jump(Opcode::PopJumpIfFalse, "else")
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::StoreName, 2)
        .jump(Opcode::JumpForward, "end")
        .label("else")
        .arg(Opcode::LoadConst, 3)
        .arg(Opcode::StoreName, 2)
        .label("end");
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, int(1), int(2), int(3)])
        .names(&["a", "b", "x"])
        .build();
    assert_eq!(
        decompile_module(&unit),
        "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n"
    );
}

#[test]
fn test_conditional_expression() {
    // x = a if c else b
    let code = Asm::new()
        .arg(Opcode::LoadName, 0)
        .jump(Opcode::PopJumpIfFalse, "else")
        .arg(Opcode::LoadName, 1)
        .jump(Opcode::JumpForward, "end")
        .label("else")
        .arg(Opcode::LoadName, 2)
        .label("end")
        .arg(Opcode::StoreName, 3);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None])
        .names(&["c", "a", "b", "x"])
        .build();
    assert_eq!(decompile_module(&unit), "x = a if c else b\n");
}

#[test]
fn test_early_return_in_function() {
    // def f(a):
    //     if a:
    //         return 1
    //     return 2
    let body = Asm::new()
        .arg(Opcode::LoadFast, 0)
        .jump(Opcode::PopJumpIfFalse, "after")
        .arg(Opcode::LoadConst, 1)
        .op(Opcode::ReturnValue)
        .label("after")
        .arg(Opcode::LoadConst, 2)
        .op(Opcode::ReturnValue)
        .finish();
    let f = Unit::function("f", body)
        .argcount(1)
        .varnames(&["a"])
        .consts(vec![Constant::None, int(1), int(2)]);
    let code = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::MakeFunction, 0)
        .arg(Opcode::StoreName, 0);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, f.constant()])
        .names(&["f"])
        .build();
    assert_eq!(
        decompile_module(&unit),
        "def f(a):\n    if a:\n        return 1\n    return 2\n"
    );
}

// --- Loops ---

#[test]
fn test_while_loop() {
    // while a: f()
    let code = Asm::new()
        .jump(Opcode::SetupLoop, "end")
        .label("top")
        .arg(Opcode::LoadName, 0)
        .jump(Opcode::PopJumpIfFalse, "exit")
        .arg(Opcode::LoadName, 1)
        .arg(Opcode::CallFunction, 0)
        .op(Opcode::PopTop)
        .jump(Opcode::JumpAbsolute, "top")
        .label("exit")
        .op(Opcode::PopBlock)
        .label("end");
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None])
        .names(&["a", "f"])
        .build();
    assert_eq!(decompile_module(&unit), "while a:\n    f()\n");
}

#[test]
fn test_for_loop() {
    // for x in items: f(x)
    let code = Asm::new()
        .jump(Opcode::SetupLoop, "end")
        .arg(Opcode::LoadName, 0)
        .op(Opcode::GetIter)
        .label("top")
        .jump(Opcode::ForIter, "exit")
        .arg(Opcode::StoreName, 1)
        .arg(Opcode::LoadName, 2)
        .arg(Opcode::LoadName, 1)
        .arg(Opcode::CallFunction, 1)
        .op(Opcode::PopTop)
        .jump(Opcode::JumpAbsolute, "top")
        .label("exit")
        .op(Opcode::PopBlock)
        .label("end");
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None])
        .names(&["items", "x", "f"])
        .build();
    assert_eq!(decompile_module(&unit), "for x in items:\n    f(x)\n");
}

#[test]
fn test_for_loop_with_unpacking_and_break() {
    // for k, v in items:
    //     if k:
    //         break
    //     f(v)
    let code = Asm::new()
        .jump(Opcode::SetupLoop, "end")
        .arg(Opcode::LoadName, 0)
        .op(Opcode::GetIter)
        .label("top")
        .jump(Opcode::ForIter, "exit")
        .arg(Opcode::UnpackSequence, 2)
        .arg(Opcode::StoreName, 1)
        .arg(Opcode::StoreName, 2)
        .arg(Opcode::LoadName, 1)
        .jump(Opcode::PopJumpIfFalse, "after_if")
        .op(Opcode::BreakLoop)
        .jump(Opcode::JumpForward, "after_if")
        .label("after_if")
        .arg(Opcode::LoadName, 3)
        .arg(Opcode::LoadName, 2)
        .arg(Opcode::CallFunction, 1)
        .op(Opcode::PopTop)
        .jump(Opcode::JumpAbsolute, "top")
        .label("exit")
        .op(Opcode::PopBlock)
        .label("end");
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None])
        .names(&["items", "k", "v", "f"])
        .build();
    assert_eq!(
        decompile_module(&unit),
        "for k, v in items:\n    if k:\n        break\n    f(v)\n"
    );
}

#[test]
fn test_if_as_last_statement_of_loop() {
    // for x in xs:
    //     if x:
    //         f(x)
    let code = Asm::new()
        .jump(Opcode::SetupLoop, "end")
        .arg(Opcode::LoadName, 0)
        .op(Opcode::GetIter)
        .label("top")
        .jump(Opcode::ForIter, "exit")
        .arg(Opcode::StoreName, 1)
        .arg(Opcode::LoadName, 1)
        .jump(Opcode::PopJumpIfFalse, "top")
        .arg(Opcode::LoadName, 2)
        .arg(Opcode::LoadName, 1)
        .arg(Opcode::CallFunction, 1)
        .op(Opcode::PopTop)
        .jump(Opcode::JumpAbsolute, "top")
        .jump(Opcode::JumpAbsolute, "top")
        .label("exit")
        .op(Opcode::PopBlock)
        .label("end");
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None])
        .names(&["xs", "x", "f"])
        .build();
    assert_eq!(decompile_module(&unit), "for x in xs:\n    if x:\n        f(x)\n");
}

#[test]
fn test_unresolved_condition_is_invariant() {
    // A conditional jump over a body that never closes its branch.
    let code = Asm::new()
        .arg(Opcode::LoadName, 0)
        .jump(Opcode::PopJumpIfFalse, "end")
        .arg(Opcode::LoadName, 1)
        .op(Opcode::PopTop)
        .label("end");
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None])
        .names(&["a", "b"])
        .build();
    match try_decompile_module(&unit) {
        Err(DecompileError::Invariant { unit, offset, .. }) => {
            assert_eq!(unit, "<module>");
            assert_eq!(offset, 3);
        }
        other => panic!("expected an invariant error, got {:?}", other),
    }
}
