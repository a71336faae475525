use super::expr::{BinOp, Expr, Keyword, Param};

/// A statement reconstructed from an instruction range.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// An expression evaluated for its side effects.
    Expr(Expr),
    /// `t1 = t2 = ... = value`
    Assign { targets: Vec<Expr>, value: Expr },
    AugAssign(AugAssign),
    Delete(Expr),
    If {
        cond: Expr,
        body: Suite,
        orelse: Suite,
    },
    While {
        cond: Expr,
        body: Suite,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Suite,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    /// `raise`, `raise exc` or `raise exc from cause`
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Import(Import),
    Try(Try),
    /// try/finally; the body is wrapped in a `try:` header when rendered.
    TryFinally { body: Suite, finalbody: Suite },
    With(With),
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    DocString(String),
}

/// `target op= value`
#[derive(Clone, Debug, PartialEq)]
pub struct AugAssign {
    pub op: BinOp,
    pub target: Expr,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Import {
    pub module: String,
    /// Number of leading dots of a relative import.
    pub level: u32,
    pub kind: ImportKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ImportKind {
    /// `import module [as alias]`
    Module { alias: Option<String> },
    /// `from module import name [as alias], ...`
    From(Vec<(String, String)>),
    /// `from module import *`
    Star,
}

impl Import {
    /// The module path with the leading dots of a relative import.
    pub fn qualified_module(&self) -> String {
        let mut module = ".".repeat(self.level as usize);
        module.push_str(&self.module);
        module
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExceptHandler {
    /// `None` for a bare `except:`.
    pub exc_type: Option<Expr>,
    pub name: Option<Expr>,
    pub body: Suite,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Try {
    pub body: Suite,
    pub handlers: Vec<ExceptHandler>,
    pub orelse: Suite,
}

#[derive(Clone, Debug, PartialEq)]
pub struct With {
    pub context: Expr,
    pub target: Option<Expr>,
    pub body: Suite,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    /// Return annotation.
    pub returns: Option<Expr>,
    pub docstring: Option<String>,
    pub body: Suite,
    /// Innermost decorator first, the order in which they were applied.
    pub decorators: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub body: Suite,
    /// Innermost decorator first, the order in which they were applied.
    pub decorators: Vec<Expr>,
}

/// An ordered statement list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Suite {
    pub statements: Vec<Stmt>,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.statements.push(stmt);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stmt> {
        self.statements.iter()
    }

    pub fn first(&self) -> Option<&Stmt> {
        self.statements.first()
    }

    pub fn last(&self) -> Option<&Stmt> {
        self.statements.last()
    }

    pub fn pop(&mut self) -> Option<Stmt> {
        self.statements.pop()
    }

    /// The single statement of a one-statement suite.
    pub fn single(&self) -> Option<&Stmt> {
        match self.statements.as_slice() {
            [stmt] => Some(stmt),
            _ => None,
        }
    }
}

impl From<Vec<Stmt>> for Suite {
    fn from(statements: Vec<Stmt>) -> Self {
        Suite { statements }
    }
}

impl IntoIterator for Suite {
    type Item = Stmt;
    type IntoIter = std::vec::IntoIter<Stmt>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

impl<'a> IntoIterator for &'a Suite {
    type Item = &'a Stmt;
    type IntoIter = std::slice::Iter<'a, Stmt>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}
