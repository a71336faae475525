use super::*;

use pretty_assertions::assert_eq;

/// Module that calls the comprehension unit on `iterable` and binds the result.
fn comprehension_module(comprehension: Unit, iterable: &str, target: &str) -> CodeUnit {
    let code = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::MakeFunction, 0)
        .arg(Opcode::LoadName, 0)
        .op(Opcode::GetIter)
        .arg(Opcode::CallFunction, 1)
        .arg(Opcode::StoreName, 1);
    Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, comprehension.constant()])
        .names(&[iterable, target])
        .build()
}

#[test]
fn test_list_comprehension_with_condition() {
    // y = [a for a in xs if a]
    let body = Asm::new()
        .arg(Opcode::BuildList, 0)
        .arg(Opcode::LoadFast, 0)
        .label("top")
        .jump(Opcode::ForIter, "done")
        .arg(Opcode::StoreFast, 1)
        .arg(Opcode::LoadFast, 1)
        .jump(Opcode::PopJumpIfFalse, "top")
        .arg(Opcode::LoadFast, 1)
        .arg(Opcode::ListAppend, 2)
        .jump(Opcode::JumpAbsolute, "top")
        .label("done")
        .op(Opcode::ReturnValue)
        .finish();
    let listcomp = Unit::function("<listcomp>", body)
        .argcount(1)
        .varnames(&[".0", "a"])
        .flag(CodeFlags::NESTED);
    assert_eq!(
        decompile_module(&comprehension_module(listcomp, "xs", "y")),
        "y = [a for a in xs if a]\n"
    );
}

#[test]
fn test_dict_comprehension() {
    // d = {k: v for k, v in items}
    let body = Asm::new()
        .arg(Opcode::BuildMap, 0)
        .arg(Opcode::LoadFast, 0)
        .label("top")
        .jump(Opcode::ForIter, "done")
        .arg(Opcode::UnpackSequence, 2)
        .arg(Opcode::StoreFast, 1)
        .arg(Opcode::StoreFast, 2)
        .arg(Opcode::LoadFast, 2)
        .arg(Opcode::LoadFast, 1)
        .arg(Opcode::MapAdd, 2)
        .jump(Opcode::JumpAbsolute, "top")
        .label("done")
        .op(Opcode::ReturnValue)
        .finish();
    let dictcomp = Unit::function("<dictcomp>", body)
        .argcount(1)
        .varnames(&[".0", "k", "v"])
        .flag(CodeFlags::NESTED);
    assert_eq!(
        decompile_module(&comprehension_module(dictcomp, "items", "d")),
        "d = {k: v for k, v in items}\n"
    );
}

#[test]
fn test_generator_expression_argument() {
    // f(x for x in xs)
    let body = Asm::new()
        .arg(Opcode::LoadFast, 0)
        .label("top")
        .jump(Opcode::ForIter, "done")
        .arg(Opcode::StoreFast, 1)
        .arg(Opcode::LoadFast, 1)
        .op(Opcode::YieldValue)
        .op(Opcode::PopTop)
        .jump(Opcode::JumpAbsolute, "top")
        .label("done");
    let genexpr = Unit::function("<genexpr>", implicit_return(body, 0))
        .argcount(1)
        .varnames(&[".0", "x"])
        .flag(CodeFlags::GENERATOR)
        .consts(vec![Constant::None]);
    let code = Asm::new()
        .arg(Opcode::LoadName, 0)
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::MakeFunction, 0)
        .arg(Opcode::LoadName, 1)
        .op(Opcode::GetIter)
        .arg(Opcode::CallFunction, 1)
        .arg(Opcode::CallFunction, 1)
        .op(Opcode::PopTop);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, genexpr.constant()])
        .names(&["f", "xs"])
        .build();
    assert_eq!(decompile_module(&unit), "f(x for x in xs)\n");
}

#[test]
fn test_set_comprehension() {
    // s = {a for a in xs}
    let body = Asm::new()
        .arg(Opcode::BuildSet, 0)
        .arg(Opcode::LoadFast, 0)
        .label("top")
        .jump(Opcode::ForIter, "done")
        .arg(Opcode::StoreFast, 1)
        .arg(Opcode::LoadFast, 1)
        .arg(Opcode::SetAdd, 2)
        .jump(Opcode::JumpAbsolute, "top")
        .label("done")
        .op(Opcode::ReturnValue)
        .finish();
    let setcomp = Unit::function("<setcomp>", body)
        .argcount(1)
        .varnames(&[".0", "a"])
        .flag(CodeFlags::NESTED);
    assert_eq!(
        decompile_module(&comprehension_module(setcomp, "xs", "s")),
        "s = {a for a in xs}\n"
    );
}
