use std::fmt::Write;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::types::CodeUnit;

/// A literal stored in a code unit's constant table.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    /// Integers outside the `i64` range.
    Long(BigInt),
    Float(f64),
    Complex { real: f64, imag: f64 },
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
    Tuple(Vec<Constant>),
    FrozenSet(Vec<Constant>),
    Code(Rc<CodeUnit>),
}

impl Constant {
    pub fn is_none(&self) -> bool {
        matches!(self, Constant::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<&Rc<CodeUnit>> {
        match self {
            Constant::Code(code) => Some(code),
            _ => None,
        }
    }

    /// Source text that evaluates back to this constant.
    pub fn repr(&self) -> String {
        match self {
            Constant::None => "None".to_string(),
            Constant::Bool(true) => "True".to_string(),
            Constant::Bool(false) => "False".to_string(),
            Constant::Int(v) => v.to_string(),
            Constant::Long(v) => v.to_string(),
            Constant::Float(v) => float_repr(*v),
            Constant::Complex { real, imag } => complex_repr(*real, *imag),
            Constant::Str(s) => str_repr(s),
            Constant::Bytes(b) => bytes_repr(b),
            Constant::Ellipsis => "...".to_string(),
            Constant::Tuple(items) => match items.as_slice() {
                [] => "()".to_string(),
                [single] => format!("({},)", single.repr()),
                _ => format!("({})", join_reprs(items)),
            },
            Constant::FrozenSet(items) if items.is_empty() => "frozenset()".to_string(),
            Constant::FrozenSet(items) => format!("frozenset({{{}}})", join_reprs(items)),
            Constant::Code(code) => format!("<code object {}>", code.name),
        }
    }
}

fn join_reprs(items: &[Constant]) -> String {
    items
        .iter()
        .map(Constant::repr)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shortest round-tripping float text with exponent formatting as `1e+16`
/// and `1e-05`. Values without a literal form become `float('...')` calls.
pub fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "float('nan')".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "float('inf')" } else { "float('-inf')" }.to_string();
    }
    let text = format!("{:?}", v);
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => text,
    }
}

fn complex_component(v: f64) -> String {
    let text = float_repr(v);
    match text.strip_suffix(".0") {
        Some(integral) => integral.to_string(),
        None => text,
    }
}

fn complex_repr(real: f64, imag: f64) -> String {
    if !real.is_finite() || !imag.is_finite() {
        return format!("complex({}, {})", float_repr(real), float_repr(imag));
    }
    if real == 0.0 && real.is_sign_positive() {
        return format!("{}j", complex_component(imag));
    }
    let imag_text = complex_component(imag);
    let sign = if imag_text.starts_with('-') { "" } else { "+" };
    format!("({}{}{}j)", complex_component(real), sign, imag_text)
}

fn push_escaped_char(out: &mut String, c: char) {
    match c {
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if (c as u32) < 0x20 || c as u32 == 0x7f => {
            let _ = write!(out, "\\x{:02x}", c as u32);
        }
        c if c.is_control() => {
            let code = c as u32;
            let _ = match code {
                0..=0xff => write!(out, "\\x{:02x}", code),
                0x100..=0xffff => write!(out, "\\u{:04x}", code),
                _ => write!(out, "\\U{:08x}", code),
            };
        }
        c => out.push(c),
    }
}

fn pick_quote(has_single: bool, has_double: bool) -> char {
    if has_single && !has_double {
        '"'
    } else {
        '\''
    }
}

/// Quoted string literal, preferring single quotes.
pub fn str_repr(s: &str) -> String {
    let quote = pick_quote(s.contains('\''), s.contains('"'));
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        if c == quote {
            out.push('\\');
            out.push(c);
        } else {
            push_escaped_char(&mut out, c);
        }
    }
    out.push(quote);
    out
}

pub fn bytes_repr(bytes: &[u8]) -> String {
    let quote = pick_quote(bytes.contains(&b'\''), bytes.contains(&b'"'));
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b as char == quote => {
                out.push('\\');
                out.push(quote);
            }
            0x20..=0x7e => out.push(b as char),
            b => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out.push(quote);
    out
}
