use super::*;

use pretty_assertions::assert_eq;
use pycode_decompiler::FunctionObject;

/// Module that binds one code constant under `name` with `MAKE_FUNCTION 0`.
fn define(name: &str, function: Unit) -> CodeUnit {
    let code = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::MakeFunction, 0)
        .arg(Opcode::StoreName, 0);
    Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, function.constant()])
        .names(&[name])
        .build()
}

// --- Functions ---

#[test]
fn test_function_with_defaults() {
    // def f(a, b=1):
    //     return a + b
    let body = Asm::new()
        .arg(Opcode::LoadFast, 0)
        .arg(Opcode::LoadFast, 1)
        .op(Opcode::BinaryAdd)
        .op(Opcode::ReturnValue)
        .finish();
    let f = Unit::function("f", body)
        .argcount(2)
        .varnames(&["a", "b"])
        .consts(vec![Constant::None]);
    let code = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::MakeFunction, 1)
        .arg(Opcode::StoreName, 0);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, int(1), f.constant()])
        .names(&["f"])
        .build();
    assert_eq!(decompile_module(&unit), "def f(a, b=1):\n    return a + b\n");
}

#[test]
fn test_keyword_only_parameters_and_annotations() {
    // def f(a: int, *, k=1) -> str:
    //     pass
    let body = implicit_return(Asm::new(), 0);
    let f = Unit::function("f", body)
        .argcount(1)
        .kwonly(1)
        .varnames(&["a", "k"])
        .consts(vec![Constant::None]);
    let code = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::LoadName, 1)
        .arg(Opcode::LoadName, 2)
        .arg(Opcode::LoadConst, 3)
        .arg(Opcode::LoadConst, 4)
        .arg(Opcode::ExtendedArg, 3)
        .arg(Opcode::MakeFunction, 0x0100)
        .arg(Opcode::StoreName, 0);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![
            Constant::None,
            s("k"),
            int(1),
            names_tuple(&["a", "return"]),
            f.constant(),
        ])
        .names(&["f", "int", "str"])
        .build();
    assert_eq!(
        decompile_module(&unit),
        "def f(a: int, *, k=1) -> str:\n    pass\n"
    );
}

#[test]
fn test_star_parameters() {
    // def f(a, *args, **kwargs):
    //     pass
    let f = Unit::function("f", implicit_return(Asm::new(), 0))
        .argcount(1)
        .varnames(&["a", "args", "kwargs"])
        .flag(CodeFlags::VARARGS)
        .flag(CodeFlags::VARKEYWORDS)
        .consts(vec![Constant::None]);
    assert_eq!(
        decompile_module(&define("f", f)),
        "def f(a, *args, **kwargs):\n    pass\n"
    );
}

#[test]
fn test_function_docstring() {
    let body = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .op(Opcode::ReturnValue)
        .finish();
    let f = Unit::function("f", body).consts(vec![s("Doc."), int(1)]);
    assert_eq!(
        decompile_module(&define("f", f)),
        "def f():\n    'Doc.'\n    return 1\n"
    );
}

#[test]
fn test_module_docstring() {
    let code = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreName, 0)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::StoreName, 1);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, s("Module."), int(1)])
        .names(&["__doc__", "x"])
        .build();
    assert_eq!(decompile_module(&unit), "'Module.'\nx = 1\n");
}

#[test]
fn test_global_declaration() {
    // def f():
    //     global g
    //     g = 1
    let body = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreGlobal, 0);
    let f = Unit::function("f", implicit_return(body, 0))
        .consts(vec![Constant::None, int(1)])
        .names(&["g"]);
    assert_eq!(
        decompile_module(&define("f", f)),
        "def f():\n    global g\n    g = 1\n"
    );
}

#[test]
fn test_closure_with_nonlocal() {
    // def outer():
    //     x = 0
    //     def inner():
    //         nonlocal x
    //         x = 1
    //     return inner
    let inner_body = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreDeref, 0);
    let inner = Unit::function("inner", implicit_return(inner_body, 0))
        .freevars(&["x"])
        .flag(CodeFlags::NESTED)
        .consts(vec![Constant::None, int(1)]);
    let outer_body = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreDeref, 0)
        .arg(Opcode::LoadClosure, 0)
        .arg(Opcode::BuildTuple, 1)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::MakeClosure, 0)
        .arg(Opcode::StoreFast, 0)
        .arg(Opcode::LoadFast, 0)
        .op(Opcode::ReturnValue)
        .finish();
    let outer = Unit::function("outer", outer_body)
        .varnames(&["inner"])
        .cellvars(&["x"])
        .consts(vec![Constant::None, int(0), inner.constant()]);
    assert_eq!(
        decompile_module(&define("outer", outer)),
        "def outer():\n    x = 0\n\n    def inner():\n        nonlocal x\n        x = 1\n\n    return inner\n"
    );
}

#[test]
fn test_delete_free_variable_declares_nonlocal() {
    // def outer():
    //     x = 0
    //     def inner():
    //         nonlocal x
    //         del x
    //     return inner
    let inner_body = Asm::new().arg(Opcode::DeleteDeref, 0);
    let inner = Unit::function("inner", implicit_return(inner_body, 0))
        .freevars(&["x"])
        .flag(CodeFlags::NESTED)
        .consts(vec![Constant::None]);
    let outer_body = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreDeref, 0)
        .arg(Opcode::LoadClosure, 0)
        .arg(Opcode::BuildTuple, 1)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::MakeClosure, 0)
        .arg(Opcode::StoreFast, 0)
        .arg(Opcode::LoadFast, 0)
        .op(Opcode::ReturnValue)
        .finish();
    let outer = Unit::function("outer", outer_body)
        .varnames(&["inner"])
        .cellvars(&["x"])
        .consts(vec![Constant::None, int(0), inner.constant()]);
    assert_eq!(
        decompile_module(&define("outer", outer)),
        "def outer():\n    x = 0\n\n    def inner():\n        nonlocal x\n        del x\n\n    return inner\n"
    );
}

#[test]
fn test_yield_expressions() {
    // def g():
    //     a = yield 5
    //     b = 1 + (yield 12)
    //     yield
    let body = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .op(Opcode::YieldValue)
        .arg(Opcode::StoreFast, 0)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::LoadConst, 3)
        .op(Opcode::YieldValue)
        .op(Opcode::BinaryAdd)
        .arg(Opcode::StoreFast, 1)
        .arg(Opcode::LoadConst, 0)
        .op(Opcode::YieldValue)
        .op(Opcode::PopTop);
    let g = Unit::function("g", implicit_return(body, 0))
        .varnames(&["a", "b"])
        .flag(CodeFlags::GENERATOR)
        .consts(vec![Constant::None, int(5), int(1), int(12)]);
    assert_eq!(
        decompile_module(&define("g", g)),
        "def g():\n    a = yield 5\n    b = 1 + (yield 12)\n    yield\n"
    );
}

#[test]
fn test_decorated_function() {
    // @dec
    // def f():
    //     pass
    let f = Unit::function("f", implicit_return(Asm::new(), 0)).consts(vec![Constant::None]);
    let code = Asm::new()
        .arg(Opcode::LoadName, 0)
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::MakeFunction, 0)
        .arg(Opcode::CallFunction, 1)
        .arg(Opcode::StoreName, 1);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, f.constant()])
        .names(&["dec", "f"])
        .build();
    assert_eq!(decompile_module(&unit), "@dec\ndef f():\n    pass\n");
}

#[test]
fn test_lambda() {
    // f = lambda x: x + 1
    let body = Asm::new()
        .arg(Opcode::LoadFast, 0)
        .arg(Opcode::LoadConst, 0)
        .op(Opcode::BinaryAdd)
        .op(Opcode::ReturnValue)
        .finish();
    let lambda = Unit::function("<lambda>", body)
        .argcount(1)
        .varnames(&["x"])
        .consts(vec![int(1)]);
    assert_eq!(decompile_module(&define("f", lambda)), "f = lambda x: x + 1\n");
}

// --- Classes ---

#[test]
fn test_class_definition() {
    // class A(B):
    //     x = 1
    //     def m(self):
    //         return self.x
    let method_body = Asm::new()
        .arg(Opcode::LoadFast, 0)
        .arg(Opcode::LoadAttr, 0)
        .op(Opcode::ReturnValue)
        .finish();
    let method = Unit::function("m", method_body)
        .argcount(1)
        .varnames(&["self"])
        .names(&["x"])
        .consts(vec![Constant::None]);
    let class_body = Asm::new()
        .arg(Opcode::LoadFast, 0)
        .op(Opcode::StoreLocals)
        .arg(Opcode::LoadName, 0)
        .arg(Opcode::StoreName, 1)
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreName, 2)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::MakeFunction, 0)
        .arg(Opcode::StoreName, 3);
    let class = Unit::function("A", implicit_return(class_body, 0))
        .argcount(1)
        .varnames(&["__locals__"])
        .names(&["__name__", "__module__", "x", "m"])
        .consts(vec![Constant::None, int(1), method.constant()]);
    let code = Asm::new()
        .op(Opcode::LoadBuildClass)
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::MakeFunction, 0)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::LoadName, 0)
        .arg(Opcode::CallFunction, 3)
        .arg(Opcode::StoreName, 1);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, class.constant(), s("A")])
        .names(&["B", "A"])
        .build();
    assert_eq!(
        decompile_module(&unit),
        "class A(B):\n    x = 1\n\n    def m(self):\n        return self.x\n"
    );
}

// --- Callables and options ---

#[test]
fn test_function_object_defaults() {
    let body = Asm::new()
        .arg(Opcode::LoadFast, 0)
        .op(Opcode::ReturnValue)
        .finish();
    let code = Unit::function("f", body)
        .argcount(2)
        .varnames(&["a", "b"])
        .consts(vec![Constant::None])
        .build();
    let function = FunctionObject {
        defaults: vec![int(2)],
        ..FunctionObject::new(code)
    };
    let text = Decompiler::new(DecompileOptions::default())
        .decompile_function(&function)
        .unwrap();
    assert_eq!(text, "def f(a, b=2):\n    return a\n");
}

#[test]
fn test_nesting_limit() {
    let f = Unit::function("f", implicit_return(Asm::new(), 0)).consts(vec![Constant::None]);
    let unit = define("f", f);
    let options = DecompileOptions {
        max_depth: 0,
        ..DecompileOptions::default()
    };
    match Decompiler::new(options).decompile_module(&unit) {
        Err(DecompileError::DepthExceeded { unit, limit }) => {
            assert_eq!(unit, "f");
            assert_eq!(limit, 0);
        }
        other => panic!("expected the nesting limit to trip, got {:?}", other),
    }
}

#[test]
fn test_definitions_without_separation() {
    let f = Unit::function("f", implicit_return(Asm::new(), 0)).consts(vec![Constant::None]);
    let code = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::StoreName, 0)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::MakeFunction, 0)
        .arg(Opcode::StoreName, 1);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, int(1), f.constant()])
        .names(&["x", "f"])
        .build();

    assert_eq!(decompile_module(&unit), "x = 1\n\ndef f():\n    pass\n");

    let mut options = DecompileOptions::default();
    options.render_config.separate_definitions = false;
    let text = Decompiler::new(options).decompile_module(&unit).unwrap();
    assert_eq!(text, "x = 1\ndef f():\n    pass\n");
}
