use crate::constant_info::Constant;
use num_traits::Signed;

/// Binding strength of each expression form. Higher binds tighter.
pub mod precedence {
    pub const ATOM: u8 = 100;
    pub const DISPLAY: u8 = 16;
    pub const TRAILER: u8 = 15;
    pub const POWER: u8 = 14;
    pub const UNARY: u8 = 13;
    pub const MULTIPLICATIVE: u8 = 12;
    pub const ADDITIVE: u8 = 11;
    pub const SHIFT: u8 = 10;
    pub const BIT_AND: u8 = 9;
    pub const BIT_XOR: u8 = 8;
    pub const BIT_OR: u8 = 7;
    pub const COMPARE: u8 = 6;
    pub const NOT: u8 = 5;
    pub const AND: u8 = 4;
    pub const OR: u8 = 3;
    pub const CONDITIONAL: u8 = 2;
    pub const LAMBDA: u8 = 1;
    pub const TUPLE: u8 = 0;
}

/// Binary arithmetic and bitwise operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Power,
    Multiply,
    FloorDivide,
    TrueDivide,
    Modulo,
    Add,
    Subtract,
    LeftShift,
    RightShift,
    And,
    Xor,
    Or,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Power => "**",
            BinOp::Multiply => "*",
            BinOp::FloorDivide => "//",
            BinOp::TrueDivide => "/",
            BinOp::Modulo => "%",
            BinOp::Add => "+",
            BinOp::Subtract => "-",
            BinOp::LeftShift => "<<",
            BinOp::RightShift => ">>",
            BinOp::And => "&",
            BinOp::Xor => "^",
            BinOp::Or => "|",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Power => precedence::POWER,
            BinOp::Multiply | BinOp::FloorDivide | BinOp::TrueDivide | BinOp::Modulo => {
                precedence::MULTIPLICATIVE
            }
            BinOp::Add | BinOp::Subtract => precedence::ADDITIVE,
            BinOp::LeftShift | BinOp::RightShift => precedence::SHIFT,
            BinOp::And => precedence::BIT_AND,
            BinOp::Xor => precedence::BIT_XOR,
            BinOp::Or => precedence::BIT_OR,
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Positive,
    Negative,
    Invert,
    Not,
}

impl UnaryOp {
    /// Source token, including the trailing space for `not`.
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Positive => "+",
            UnaryOp::Negative => "-",
            UnaryOp::Invert => "~",
            UnaryOp::Not => "not ",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            UnaryOp::Not => precedence::NOT,
            _ => precedence::UNARY,
        }
    }
}

/// Comparison operators, indexed like the `COMPARE_OP` argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CompareOp {
    /// `COMPARE_OP` argument 10 (exception match) is not a comparison and
    /// yields `None` here.
    pub fn from_arg(arg: u32) -> Option<Self> {
        Some(match arg {
            0 => CompareOp::Lt,
            1 => CompareOp::Le,
            2 => CompareOp::Eq,
            3 => CompareOp::Ne,
            4 => CompareOp::Gt,
            5 => CompareOp::Ge,
            6 => CompareOp::In,
            7 => CompareOp::NotIn,
            8 => CompareOp::Is,
            9 => CompareOp::IsNot,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BoolOp::And => precedence::AND,
            BoolOp::Or => precedence::OR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

impl ComprehensionKind {
    /// Recognise the synthetic unit names the compiler gives comprehension bodies.
    pub fn from_unit_name(name: &str) -> Option<Self> {
        match name {
            "<listcomp>" => Some(ComprehensionKind::List),
            "<setcomp>" => Some(ComprehensionKind::Set),
            "<dictcomp>" => Some(ComprehensionKind::Dict),
            "<genexpr>" => Some(ComprehensionKind::Generator),
            _ => None,
        }
    }

    pub fn delimiters(self) -> (&'static str, &'static str) {
        match self {
            ComprehensionKind::List => ("[", "]"),
            ComprehensionKind::Set | ComprehensionKind::Dict => ("{", "}"),
            ComprehensionKind::Generator => ("(", ")"),
        }
    }
}

/// One `for` or `if` clause of a comprehension, in source order.
#[derive(Clone, Debug, PartialEq)]
pub enum CompClause {
    For { target: Expr, iter: Expr },
    If(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
}

/// A formal parameter as it appears in a `def` or `lambda` header.
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    /// Positional or keyword-only parameter.
    Plain {
        name: String,
        annotation: Option<Expr>,
        default: Option<Expr>,
    },
    VarArgs {
        name: String,
        annotation: Option<Expr>,
    },
    /// Bare `*` introducing keyword-only parameters when there is no `*args`.
    KwOnlyMarker,
    VarKeywords {
        name: String,
        annotation: Option<Expr>,
    },
}

/// Expression tree node.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    // --- Atoms ---
    Constant(Constant),
    Name(String),

    // --- Trailers ---
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
        starargs: Option<Box<Expr>>,
        kwargs: Option<Box<Expr>>,
    },

    // --- Operators ---
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `first op1 x1 op2 x2 ...`
    Compare {
        first: Box<Expr>,
        rest: Vec<(CompareOp, Expr)>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IfElse {
        cond: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },

    // --- Displays ---
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Comprehension {
        kind: ComprehensionKind,
        element: Box<Expr>,
        clauses: Vec<CompClause>,
    },

    // --- Low precedence ---
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    Yield(Box<Expr>),
    Starred(Box<Expr>),
    /// `key: value`, the element of a dict comprehension.
    KeyValue {
        key: Box<Expr>,
        value: Box<Expr>,
    },
    Slice {
        start: Box<Expr>,
        stop: Box<Expr>,
        step: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn none() -> Self {
        Expr::Constant(Constant::None)
    }

    pub fn is_none_constant(&self) -> bool {
        matches!(self, Expr::Constant(Constant::None))
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn attribute(value: Expr, attr: impl Into<String>) -> Self {
        Expr::Attribute {
            value: Box::new(value),
            attr: attr.into(),
        }
    }

    pub fn subscript(value: Expr, index: Expr) -> Self {
        Expr::Subscript {
            value: Box::new(value),
            index: Box::new(index),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn not(operand: Expr) -> Self {
        Expr::unary(UnaryOp::Not, operand)
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn bool_op(op: BoolOp, left: Expr, right: Expr) -> Self {
        Expr::BoolOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Expr::Compare {
            first: Box::new(left),
            rest: vec![(op, right)],
        }
    }

    /// Append `right`, a comparison whose first operand repeats the last
    /// operand of `left`, to the chain `left`. Returns `Err` with both
    /// operands untouched when they do not chain.
    pub fn chain_compare(left: Expr, right: Expr) -> Result<Expr, (Expr, Expr)> {
        match (left, right) {
            (
                Expr::Compare {
                    first,
                    rest: mut left_rest,
                },
                Expr::Compare {
                    first: right_first,
                    rest: right_rest,
                },
            ) if left_rest.last().map(|(_, last)| last) == Some(&*right_first) => {
                left_rest.extend(right_rest);
                Ok(Expr::Compare {
                    first,
                    rest: left_rest,
                })
            }
            pair => Err(pair),
        }
    }

    pub fn precedence(&self) -> u8 {
        match self {
            // A negative literal prints with its sign and binds like unary minus.
            Expr::Constant(Constant::Int(v)) if *v < 0 => precedence::UNARY,
            Expr::Constant(Constant::Long(v)) if v.is_negative() => precedence::UNARY,
            Expr::Constant(Constant::Float(v)) if v.is_sign_negative() => precedence::UNARY,
            Expr::Constant(_) | Expr::Name(_) => precedence::ATOM,
            Expr::List(_)
            | Expr::Set(_)
            | Expr::Dict(_)
            | Expr::Comprehension { .. } => precedence::DISPLAY,
            Expr::Attribute { .. }
            | Expr::Subscript { .. }
            | Expr::Call { .. }
            | Expr::Starred(_) => precedence::TRAILER,
            Expr::Unary { op, .. } => op.precedence(),
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Compare { .. } => precedence::COMPARE,
            Expr::BoolOp { op, .. } => op.precedence(),
            Expr::IfElse { .. } => precedence::CONDITIONAL,
            Expr::Lambda { .. }
            | Expr::Yield(_)
            | Expr::KeyValue { .. }
            | Expr::Slice { .. } => precedence::LAMBDA,
            Expr::Tuple(_) => precedence::TUPLE,
        }
    }
}
