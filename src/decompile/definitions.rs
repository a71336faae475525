//! Builders for the constructs backed by a nested code unit: `def`, `class`,
//! `lambda` and the comprehensions.

use crate::constant_info::Constant;
use crate::error::Result;
use crate::types::CodeFlags;

use super::code::Code;
use super::expr::{CompClause, ComprehensionKind, Expr, Param};
use super::stack::{PendingClass, PendingFunction};
use super::structured_types::{ClassDef, FunctionDef, Stmt, Suite};
use super::suite_decompiler::SuiteDecompiler;

/// Reconstruct the statements of a whole unit.
///
/// With `look_for_docstring`, a leading `__doc__ = "..."` becomes a docstring.
/// With `include_declarations`, the `global`/`nonlocal` names discovered while
/// reconstructing are declared at the top of the suite.
pub fn decompile_body(code: &Code<'_>, include_declarations: bool, look_for_docstring: bool) -> Result<Suite> {
    let mut decompiler = SuiteDecompiler::new(code, Some(code.start()), None, 0);
    decompiler.run()?;
    let mut suite = decompiler.into_suite()?;

    if look_for_docstring {
        promote_docstring(&mut suite);
    }
    if !include_declarations {
        return Ok(suite);
    }
    let declarations = code.declarations();
    if declarations.globals.is_empty() && declarations.nonlocals.is_empty() {
        return Ok(suite);
    }
    let mut declared = Suite::new();
    if !declarations.globals.is_empty() {
        declared.push(Stmt::Global(declarations.globals));
    }
    if !declarations.nonlocals.is_empty() {
        declared.push(Stmt::Nonlocal(declarations.nonlocals));
    }
    declared.statements.extend(suite.statements);
    Ok(declared)
}

fn promote_docstring(suite: &mut Suite) {
    let Some(first) = suite.statements.first_mut() else {
        return;
    };
    let doc = match first {
        Stmt::Assign {
            targets,
            value: Expr::Constant(Constant::Str(doc)),
        } if targets.len() == 1 && targets[0].as_name() == Some("__doc__") => doc.clone(),
        _ => return,
    };
    *first = Stmt::DocString(doc);
}

fn annotation(function: &PendingFunction, name: &str) -> Option<Expr> {
    function
        .annotations
        .iter()
        .find(|(param, _)| param == name)
        .map(|(_, value)| value.clone())
}

/// Parameter list of a function or lambda, in header order.
pub fn build_params(function: &PendingFunction) -> Vec<Param> {
    let unit = &function.unit;
    let varname = |i: usize| unit.varnames.get(i).cloned().unwrap_or_else(|| format!("_{}", i));
    let argcount = unit.argcount as usize;
    let kwonlycount = unit.kwonlyargcount as usize;
    let first_default = argcount.saturating_sub(function.defaults.len());

    let mut params = Vec::with_capacity(argcount + kwonlycount + 2);
    for i in 0..argcount {
        let name = varname(i);
        let default = i
            .checked_sub(first_default)
            .and_then(|d| function.defaults.get(d))
            .cloned();
        params.push(Param::Plain {
            annotation: annotation(function, &name),
            name,
            default,
        });
    }

    let mut next = argcount + kwonlycount;
    if unit.flags.contains(CodeFlags::VARARGS) {
        let name = varname(next);
        next += 1;
        params.push(Param::VarArgs {
            annotation: annotation(function, &name),
            name,
        });
    } else if kwonlycount > 0 {
        params.push(Param::KwOnlyMarker);
    }

    for i in argcount..argcount + kwonlycount {
        let name = varname(i);
        let default = function
            .kwdefaults
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.clone());
        params.push(Param::Plain {
            annotation: annotation(function, &name),
            name,
            default,
        });
    }

    if unit.flags.contains(CodeFlags::VARKEYWORDS) {
        let name = varname(next);
        params.push(Param::VarKeywords {
            annotation: annotation(function, &name),
            name,
        });
    }
    params
}

pub fn build_function_def(
    parent: Option<&Code<'_>>,
    max_depth: usize,
    function: PendingFunction,
) -> Result<FunctionDef> {
    let unit = function.unit.clone();
    let code = Code::new(&unit, parent, max_depth)?;
    let body = decompile_body(&code, true, false)?;
    let docstring = unit.consts.first().and_then(Constant::as_str).map(str::to_string);
    tracing::debug!(name = %unit.name, statements = body.len(), "rebuilt function");

    Ok(FunctionDef {
        name: unit.name.clone(),
        params: build_params(&function),
        returns: annotation(&function, "return"),
        docstring,
        body,
        decorators: function.decorators,
    })
}

pub fn build_lambda(parent: &Code<'_>, function: &PendingFunction) -> Result<Expr> {
    let code = Code::new(&function.unit, Some(parent), parent.max_depth())?;
    let suite = decompile_body(&code, false, false)?;
    let body = match suite.statements.into_iter().next() {
        None => Expr::none(),
        Some(Stmt::Return(Some(value))) | Some(Stmt::Expr(value)) => value,
        Some(Stmt::Return(None)) => Expr::none(),
        Some(other) => {
            return Err(code
                .start()
                .unsupported(format!("lambda body is not an expression: {:?}", other)));
        }
    };
    Ok(Expr::Lambda {
        params: build_params(function),
        body: Box::new(body),
    })
}

pub fn build_class_def(parent: &Code<'_>, class: PendingClass, name: String) -> Result<ClassDef> {
    let unit = class.body.unit.clone();
    let code = Code::new(&unit, Some(parent), parent.max_depth())?;
    let mut body = decompile_body(&code, true, true)?;
    // The class body returns its namespace cell.
    if matches!(body.last(), Some(Stmt::Return(Some(_)))) {
        body.pop();
    }
    tracing::debug!(name = %name, statements = body.len(), "rebuilt class");

    Ok(ClassDef {
        name,
        bases: class.bases,
        keywords: class.keywords,
        body,
        decorators: class.decorators,
    })
}

pub fn build_comprehension(
    parent: &Code<'_>,
    kind: ComprehensionKind,
    function: PendingFunction,
    iterable: Expr,
) -> Result<Expr> {
    let unit = function.unit.clone();
    let mut code = Code::new(&unit, Some(parent), parent.max_depth())?;
    if kind != ComprehensionKind::Generator {
        // Drop the display construction and the final return.
        let last = code.len().saturating_sub(1);
        code.neutralize(0);
        code.neutralize(last);
    }
    code.set_local(0, iterable);

    let suite = decompile_body(&code, false, false)?;
    let mut clauses = Vec::new();
    let element = flatten_comprehension(&code, suite, &mut clauses)?;
    Ok(Expr::Comprehension {
        kind,
        element: Box::new(element),
        clauses,
    })
}

/// Walk the nested `for`/`if` statements of a comprehension body down to the
/// element expression, collecting the clauses on the way.
fn flatten_comprehension(code: &Code<'_>, suite: Suite, clauses: &mut Vec<CompClause>) -> Result<Expr> {
    let mut statements = suite.statements.into_iter();
    let stmt = match (statements.next(), statements.next()) {
        (Some(stmt), None) => stmt,
        (first, _) => {
            return Err(code.start().unsupported(format!(
                "comprehension body is not a single clause: {:?}",
                first
            )));
        }
    };
    match stmt {
        Stmt::For { target, iter, body } => {
            clauses.push(CompClause::For { target, iter });
            flatten_comprehension(code, body, clauses)
        }
        Stmt::If { cond, body, orelse } if orelse.is_empty() => {
            clauses.push(CompClause::If(cond));
            flatten_comprehension(code, body, clauses)
        }
        Stmt::Expr(element) => Ok(element),
        other => Err(code
            .start()
            .unsupported(format!("unexpected statement in comprehension: {:?}", other))),
    }
}
