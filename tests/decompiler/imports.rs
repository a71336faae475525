use super::*;

use pretty_assertions::assert_eq;

#[test]
fn test_plain_imports() {
    // import os
    // import os.path
    // import a.b as c
    // import json as j
    let code = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::LoadConst, 0)
        .arg(Opcode::ImportName, 0)
        .arg(Opcode::StoreName, 0)
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::LoadConst, 0)
        .arg(Opcode::ImportName, 1)
        .arg(Opcode::StoreName, 0)
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::LoadConst, 0)
        .arg(Opcode::ImportName, 2)
        .arg(Opcode::LoadAttr, 3)
        .arg(Opcode::StoreName, 4)
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::LoadConst, 0)
        .arg(Opcode::ImportName, 5)
        .arg(Opcode::StoreName, 6);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None, int(0)])
        .names(&["os", "os.path", "a.b", "b", "c", "json", "j"])
        .build();
    assert_eq!(
        decompile_module(&unit),
        "import os\nimport os.path\nimport a.b as c\nimport json as j\n"
    );
}

#[test]
fn test_from_imports() {
    // from a import x, y as z
    // from . import m
    // from b import *
    let code = Asm::new()
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::LoadConst, 2)
        .arg(Opcode::ImportName, 0)
        .arg(Opcode::ImportFrom, 1)
        .arg(Opcode::StoreName, 1)
        .arg(Opcode::ImportFrom, 2)
        .arg(Opcode::StoreName, 3)
        .op(Opcode::PopTop)
        .arg(Opcode::LoadConst, 3)
        .arg(Opcode::LoadConst, 4)
        .arg(Opcode::ImportName, 4)
        .arg(Opcode::ImportFrom, 5)
        .arg(Opcode::StoreName, 5)
        .op(Opcode::PopTop)
        .arg(Opcode::LoadConst, 1)
        .arg(Opcode::LoadConst, 5)
        .arg(Opcode::ImportName, 6)
        .op(Opcode::ImportStar);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![
            Constant::None,
            int(0),
            names_tuple(&["x", "y"]),
            int(1),
            names_tuple(&["m"]),
            names_tuple(&["*"]),
        ])
        .names(&["a", "x", "y", "z", "", "m", "b"])
        .build();
    assert_eq!(
        decompile_module(&unit),
        "from a import x, y as z\nfrom . import m\nfrom b import *\n"
    );
}

#[test]
fn test_import_level_must_be_constant() {
    let code = Asm::new()
        .arg(Opcode::LoadName, 0)
        .arg(Opcode::LoadConst, 0)
        .arg(Opcode::ImportName, 1)
        .arg(Opcode::StoreName, 1);
    let unit = Unit::module(implicit_return(code, 0))
        .consts(vec![Constant::None])
        .names(&["level", "os"])
        .build();
    assert!(matches!(
        try_decompile_module(&unit),
        Err(DecompileError::Malformed { .. })
    ));
}
