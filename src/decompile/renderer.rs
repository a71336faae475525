use std::fmt::Write;

use crate::constant_info::{str_repr, Constant};

use super::expr::*;
use super::structured_types::*;

/// Configuration for rendering Python source text.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub indent: String,
    /// Surround `def` and `class` statements with blank lines.
    pub separate_definitions: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            indent: "    ".into(),
            separate_definitions: true,
        }
    }
}

/// Python source renderer.
pub struct SourceRenderer {
    config: RenderConfig,
    output: String,
    indent_level: usize,
}

impl SourceRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            output: String::new(),
            indent_level: 0,
        }
    }

    /// Render a module or unit body. An empty suite renders as empty text.
    pub fn render_suite(mut self, suite: &Suite) -> String {
        for stmt in suite {
            self.render_stmt(stmt);
        }
        self.finish()
    }

    pub fn render_function(mut self, def: &FunctionDef) -> String {
        self.render_function_def(def);
        self.finish()
    }

    fn finish(self) -> String {
        let text = self.output.trim_matches('\n');
        if text.is_empty() {
            String::new()
        } else {
            format!("{}\n", text)
        }
    }

    fn render_body(&mut self, suite: &Suite) {
        self.indent_level += 1;
        if suite.is_empty() {
            self.writeln("pass");
        }
        for stmt in suite {
            self.render_stmt(stmt);
        }
        self.indent_level -= 1;
    }

    fn render_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                let text = self.render_expr(e);
                self.writeln(&text);
            }
            Stmt::Assign { targets, value } => {
                let mut line = String::new();
                for target in targets {
                    line.push_str(&self.render_expr(target));
                    line.push_str(" = ");
                }
                line.push_str(&self.render_expr(value));
                self.writeln(&line);
            }
            Stmt::AugAssign(aug) => {
                let line = format!(
                    "{} {}= {}",
                    self.render_expr(&aug.target),
                    aug.op.as_str(),
                    self.render_expr(&aug.value)
                );
                self.writeln(&line);
            }
            Stmt::Delete(target) => {
                let line = format!("del {}", self.render_expr(target));
                self.writeln(&line);
            }
            Stmt::If { cond, body, orelse } => self.render_if(cond, body, orelse, false),
            Stmt::While { cond, body } => {
                let line = format!("while {}:", self.render_expr(cond));
                self.writeln(&line);
                self.render_body(body);
            }
            Stmt::For { target, iter, body } => {
                let line = format!("for {} in {}:", self.render_expr(target), self.render_expr(iter));
                self.writeln(&line);
                self.render_body(body);
            }
            Stmt::Break => self.writeln("break"),
            Stmt::Continue => self.writeln("continue"),
            Stmt::Return(None) => self.writeln("return"),
            Stmt::Return(Some(value)) => {
                let line = format!("return {}", self.render_expr(value));
                self.writeln(&line);
            }
            Stmt::Raise { exc, cause } => {
                let mut line = String::from("raise");
                if let Some(exc) = exc {
                    line.push(' ');
                    line.push_str(&self.render_expr(exc));
                }
                if let Some(cause) = cause {
                    line.push_str(" from ");
                    line.push_str(&self.render_expr(cause));
                }
                self.writeln(&line);
            }
            Stmt::Import(import) => {
                let line = render_import(import);
                self.writeln(&line);
            }
            Stmt::Try(t) => self.render_try(t),
            Stmt::TryFinally { body, finalbody } => {
                match body.single() {
                    Some(Stmt::Try(t)) => self.render_try(t),
                    _ => {
                        self.writeln("try:");
                        self.render_body(body);
                    }
                }
                self.writeln("finally:");
                self.render_body(finalbody);
            }
            Stmt::With(with) => self.render_with(with),
            Stmt::FunctionDef(def) => self.render_function_def(def),
            Stmt::ClassDef(class) => self.render_class_def(class),
            Stmt::Global(names) => self.writeln(&format!("global {}", names.join(", "))),
            Stmt::Nonlocal(names) => self.writeln(&format!("nonlocal {}", names.join(", "))),
            Stmt::DocString(doc) => self.render_docstring(doc),
        }
    }

    fn render_if(&mut self, cond: &Expr, body: &Suite, orelse: &Suite, is_elif: bool) {
        let keyword = if is_elif { "elif" } else { "if" };
        let line = format!("{} {}:", keyword, self.render_expr(cond));
        self.writeln(&line);
        self.render_body(body);
        if orelse.is_empty() {
            return;
        }
        if let Some(Stmt::If { cond, body, orelse }) = orelse.single() {
            self.render_if(cond, body, orelse, true);
            return;
        }
        self.writeln("else:");
        self.render_body(orelse);
    }

    fn render_try(&mut self, t: &Try) {
        self.writeln("try:");
        self.render_body(&t.body);
        for handler in &t.handlers {
            let line = match (&handler.exc_type, &handler.name) {
                (None, _) => "except:".to_string(),
                (Some(ty), None) => format!("except {}:", self.render_expr(ty)),
                (Some(ty), Some(name)) => {
                    format!("except {} as {}:", self.render_expr(ty), self.render_expr(name))
                }
            };
            self.writeln(&line);
            self.render_body(&handler.body);
        }
        if !t.orelse.is_empty() {
            self.writeln("else:");
            self.render_body(&t.orelse);
        }
    }

    /// Nested single-statement `with` blocks collapse into one header.
    fn render_with(&mut self, with: &With) {
        let mut items = Vec::new();
        let mut current = with;
        loop {
            items.push(match &current.target {
                Some(target) => format!(
                    "{} as {}",
                    self.render_expr(&current.context),
                    self.render_expr(target)
                ),
                None => self.render_expr(&current.context),
            });
            match current.body.single() {
                Some(Stmt::With(inner)) => current = inner,
                _ => break,
            }
        }
        self.writeln(&format!("with {}:", items.join(", ")));
        self.render_body(&current.body);
    }

    fn render_decorators(&mut self, decorators: &[Expr]) {
        for decorator in decorators.iter().rev() {
            let line = format!("@{}", self.render_expr(decorator));
            self.writeln(&line);
        }
    }

    fn render_function_def(&mut self, def: &FunctionDef) {
        self.separate();
        self.render_decorators(&def.decorators);
        let mut header = format!("def {}({})", def.name, self.render_params(&def.params));
        if let Some(returns) = &def.returns {
            header.push_str(" -> ");
            header.push_str(&self.render_expr(returns));
        }
        header.push(':');
        self.writeln(&header);

        match &def.docstring {
            Some(doc) => {
                self.indent_level += 1;
                self.render_docstring(doc);
                self.indent_level -= 1;
                if !def.body.is_empty() {
                    self.render_body(&def.body);
                }
            }
            None => self.render_body(&def.body),
        }
        self.separate();
    }

    fn render_class_def(&mut self, class: &ClassDef) {
        self.separate();
        self.render_decorators(&class.decorators);
        let mut args: Vec<String> = class.bases.iter().map(|b| self.render_arg(b)).collect();
        args.extend(
            class
                .keywords
                .iter()
                .map(|k| format!("{}={}", k.name, self.render_arg(&k.value))),
        );
        let header = if args.is_empty() {
            format!("class {}:", class.name)
        } else {
            format!("class {}({}):", class.name, args.join(", "))
        };
        self.writeln(&header);
        self.render_body(&class.body);
        self.separate();
    }

    fn render_docstring(&mut self, doc: &str) {
        if !doc.contains('\n') {
            self.writeln(&str_repr(doc));
            return;
        }
        // A quote character collides when the text holds three in a row or
        // ends with one, either of which would close the literal early.
        let collides = |quote: char| doc.contains(&quote.to_string().repeat(3)) || doc.ends_with(quote);
        let (quote, escape_quote) = match (collides('\''), collides('"')) {
            (false, _) => ('\'', false),
            (true, false) => ('"', false),
            (true, true) => ('\'', true),
        };
        let fence = quote.to_string().repeat(3);
        let text = doc
            .split('\n')
            .map(|line| escape_docstring_line(line, escape_quote.then_some(quote)))
            .collect::<Vec<_>>()
            .join("\n");
        // Continuation lines keep their own indentation.
        self.write_indent();
        self.raw(&fence);
        self.raw(&text);
        self.raw(&fence);
        self.raw_newline();
    }

    fn render_params(&self, params: &[Param]) -> String {
        params
            .iter()
            .map(|p| match p {
                Param::Plain {
                    name,
                    annotation: Some(ann),
                    default,
                } => {
                    let mut text = format!("{}: {}", name, self.render_arg(ann));
                    if let Some(default) = default {
                        text.push_str(" = ");
                        text.push_str(&self.render_arg(default));
                    }
                    text
                }
                Param::Plain {
                    name,
                    annotation: None,
                    default: Some(default),
                } => format!("{}={}", name, self.render_arg(default)),
                Param::Plain { name, .. } => name.clone(),
                Param::VarArgs { name, annotation } => match annotation {
                    Some(ann) => format!("*{}: {}", name, self.render_arg(ann)),
                    None => format!("*{}", name),
                },
                Param::KwOnlyMarker => "*".to_string(),
                Param::VarKeywords { name, annotation } => match annotation {
                    Some(ann) => format!("**{}: {}", name, self.render_arg(ann)),
                    None => format!("**{}", name),
                },
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render an element of a comma-separated list. A `yield` there always
    /// needs its own parentheses.
    fn render_arg(&self, expr: &Expr) -> String {
        let parens = matches!(expr, Expr::Yield(_)) || expr.precedence() <= precedence::TUPLE;
        self.wrap(expr, parens)
    }

    fn wrap(&self, expr: &Expr, parens: bool) -> String {
        if parens {
            format!("({})", self.render_expr(expr))
        } else {
            self.render_expr(expr)
        }
    }

    pub fn render_expr(&self, expr: &Expr) -> String {
        let p = expr.precedence();
        match expr {
            Expr::Constant(c) => c.repr(),
            Expr::Name(name) => name.clone(),
            Expr::Attribute { value, attr } => {
                format!("{}.{}", self.wrap(value, value.precedence() < p), attr)
            }
            Expr::Subscript { value, index } => {
                format!("{}[{}]", self.wrap(value, value.precedence() < p), self.render_expr(index))
            }
            Expr::Call {
                func,
                args,
                keywords,
                starargs,
                kwargs,
            } => {
                let func_str = self.wrap(func, func.precedence() < p);
                let lone_genexpr = keywords.is_empty()
                    && starargs.is_none()
                    && kwargs.is_none()
                    && matches!(
                        args.as_slice(),
                        [Expr::Comprehension {
                            kind: ComprehensionKind::Generator,
                            ..
                        }]
                    );
                if lone_genexpr {
                    return format!("{}{}", func_str, self.render_expr(&args[0]));
                }
                let mut parts: Vec<String> = args.iter().map(|a| self.render_arg(a)).collect();
                parts.extend(keywords.iter().map(|k| format!("{}={}", k.name, self.render_arg(&k.value))));
                if let Some(starargs) = starargs {
                    parts.push(format!("*{}", self.render_arg(starargs)));
                }
                if let Some(kwargs) = kwargs {
                    parts.push(format!("**{}", self.render_arg(kwargs)));
                }
                format!("{}({})", func_str, parts.join(", "))
            }
            Expr::Unary { op, operand } => {
                format!("{}{}", op.as_str(), self.wrap(operand, operand.precedence() < p))
            }
            Expr::Binary { op, left, right } => {
                // `**` groups to the right.
                let (wrap_left, wrap_right) = if *op == BinOp::Power {
                    (left.precedence() <= p, right.precedence() < p)
                } else {
                    (left.precedence() < p, right.precedence() <= p)
                };
                let left = self.wrap(left, wrap_left);
                let right = self.wrap(right, wrap_right);
                match op {
                    BinOp::Power | BinOp::Multiply | BinOp::FloorDivide | BinOp::TrueDivide => {
                        format!("{}{}{}", left, op.as_str(), right)
                    }
                    _ => format!("{} {} {}", left, op.as_str(), right),
                }
            }
            Expr::Compare { first, rest } => {
                let mut text = self.wrap(first, first.precedence() <= p);
                for (op, operand) in rest {
                    let _ = write!(
                        text,
                        " {} {}",
                        op.as_str(),
                        self.wrap(operand, operand.precedence() <= p)
                    );
                }
                text
            }
            Expr::BoolOp { op, left, right } => format!(
                "{} {} {}",
                self.wrap(left, left.precedence() < p),
                op.as_str(),
                self.wrap(right, right.precedence() <= p)
            ),
            Expr::IfElse { cond, body, orelse } => format!(
                "{} if {} else {}",
                self.wrap(body, body.precedence() <= p),
                self.wrap(cond, cond.precedence() <= p),
                self.wrap(orelse, orelse.precedence() < p)
            ),
            Expr::Tuple(items) => match items.as_slice() {
                [] => "()".to_string(),
                [single] => format!("{},", self.render_arg(single)),
                _ => self.render_list(items),
            },
            Expr::List(items) => format!("[{}]", self.render_list(items)),
            Expr::Set(items) => format!("{{{}}}", self.render_list(items)),
            Expr::Dict(items) => {
                let items: Vec<String> = items
                    .iter()
                    .map(|(k, v)| format!("{}: {}", self.render_arg(k), self.render_arg(v)))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Expr::Comprehension {
                kind,
                element,
                clauses,
            } => {
                let (open, close) = kind.delimiters();
                let mut text = String::from(open);
                text.push_str(&self.render_arg(element));
                for clause in clauses {
                    match clause {
                        CompClause::For { target, iter } => {
                            let _ = write!(
                                text,
                                " for {} in {}",
                                self.render_expr(target),
                                self.wrap(iter, iter.precedence() <= precedence::CONDITIONAL)
                            );
                        }
                        CompClause::If(cond) => {
                            let _ = write!(
                                text,
                                " if {}",
                                self.wrap(cond, cond.precedence() <= precedence::CONDITIONAL)
                            );
                        }
                    }
                }
                text.push_str(close);
                text
            }
            Expr::Lambda { params, body } => {
                let params = self.render_params(params);
                let body = self.render_arg(body);
                if params.is_empty() {
                    format!("lambda: {}", body)
                } else {
                    format!("lambda {}: {}", params, body)
                }
            }
            Expr::Yield(value) if value.is_none_constant() => "yield".to_string(),
            Expr::Yield(value) => format!("yield {}", self.render_expr(value)),
            Expr::Starred(value) => format!("*{}", self.wrap(value, value.precedence() < p)),
            Expr::KeyValue { key, value } => {
                format!("{}: {}", self.render_arg(key), self.render_arg(value))
            }
            Expr::Slice { start, stop, step } => {
                let mut text = format!("{}:{}", self.render_slice_part(start), self.render_slice_part(stop));
                if let Some(step) = step {
                    text.push(':');
                    text.push_str(&self.render_slice_part(step));
                }
                text
            }
        }
    }

    fn render_list(&self, items: &[Expr]) -> String {
        items
            .iter()
            .map(|item| self.render_arg(item))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_slice_part(&self, part: &Expr) -> String {
        match part {
            Expr::Constant(Constant::None) => String::new(),
            other => self.render_arg(other),
        }
    }

    /// Blank line before and after definitions.
    fn separate(&mut self) {
        if !self.config.separate_definitions || self.output.is_empty() || self.output.ends_with("\n\n") {
            return;
        }
        self.raw_newline();
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent_level {
            self.output.push_str(&self.config.indent);
        }
    }

    fn writeln(&mut self, text: &str) {
        self.write_indent();
        self.output.push_str(text);
        self.output.push('\n');
    }

    fn raw(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn raw_newline(&mut self) {
        self.output.push('\n');
    }
}

fn render_import(import: &Import) -> String {
    let module = import.qualified_module();
    match &import.kind {
        ImportKind::Module { alias: None } => format!("import {}", module),
        ImportKind::Module { alias: Some(alias) } => format!("import {} as {}", module, alias),
        ImportKind::Star => format!("from {} import *", module),
        ImportKind::From(names) => {
            let names: Vec<String> = names
                .iter()
                .map(|(name, alias)| {
                    if name == alias {
                        name.clone()
                    } else {
                        format!("{} as {}", name, alias)
                    }
                })
                .collect();
            format!("from {} import {}", module, names.join(", "))
        }
    }
}

/// Escape one docstring line for a triple-quoted literal: backslashes, tabs,
/// carriage returns and every non-ASCII or non-printable character. `quote`,
/// when given, is escaped as well.
fn escape_docstring_line(line: &str, quote: Option<char>) -> String {
    let mut out = String::with_capacity(line.len());
    for ch in line.chars() {
        let code = ch as u32;
        match ch {
            '\\' => out.push_str("\\\\"),
            _ if Some(ch) == quote => {
                out.push('\\');
                out.push(ch);
            }
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            ' '..='~' => out.push(ch),
            _ => {
                let _ = match code {
                    0..=0xff => write!(out, "\\x{:02x}", code),
                    0x100..=0xffff => write!(out, "\\u{:04x}", code),
                    _ => write!(out, "\\U{:08x}", code),
                };
            }
        }
    }
    out
}
