use std::rc::Rc;

use crate::error::Result;
use crate::parser::pyc_parser;
use crate::types::{CodeUnit, FunctionObject};

use super::code::Code;
use super::definitions::{build_function_def, decompile_body};
use super::expr::Expr;
use super::renderer::{RenderConfig, SourceRenderer};
use super::stack::PendingFunction;
use super::structured_types::{FunctionDef, Suite};

/// Options controlling the decompilation process.
#[derive(Clone, Debug)]
pub struct DecompileOptions {
    pub render_config: RenderConfig,
    /// Prefix `global`/`nonlocal` declarations to unit bodies. Modules never
    /// carry them.
    pub include_declarations: bool,
    /// Turn a leading `__doc__ = '...'` into a docstring in unit bodies.
    /// Modules always do.
    pub look_for_docstring: bool,
    /// Deepest nesting of blocks and definitions accepted before giving up.
    pub max_depth: usize,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            render_config: RenderConfig::default(),
            include_declarations: true,
            look_for_docstring: false,
            max_depth: 200,
        }
    }
}

/// The main decompiler entry point.
pub struct Decompiler {
    options: DecompileOptions,
}

impl Decompiler {
    pub fn new(options: DecompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DecompileOptions {
        &self.options
    }

    fn body(&self, unit: &CodeUnit, include_declarations: bool, look_for_docstring: bool) -> Result<Suite> {
        tracing::debug!(unit = %unit.name, filename = %unit.filename, "decompiling");
        let code = Code::new(unit, None, self.options.max_depth)?;
        let suite = decompile_body(&code, include_declarations, look_for_docstring)?;
        tracing::debug!(unit = %unit.name, statements = suite.len(), "decompiled");
        Ok(suite)
    }

    /// Statement tree of a unit body.
    pub fn build_suite(&self, unit: &CodeUnit) -> Result<Suite> {
        self.body(
            unit,
            self.options.include_declarations,
            self.options.look_for_docstring,
        )
    }

    /// Statement tree of a module body.
    pub fn build_module(&self, unit: &CodeUnit) -> Result<Suite> {
        self.body(unit, false, true)
    }

    /// Definition statement of a callable. Parameter defaults come from the
    /// callable's bound values.
    pub fn build_function(&self, function: &FunctionObject) -> Result<FunctionDef> {
        let mut pending = PendingFunction::new(Rc::new(function.code.clone()));
        pending.defaults = function.defaults.iter().cloned().map(Expr::Constant).collect();
        pending.kwdefaults = function
            .kwdefaults
            .iter()
            .map(|(name, value)| (name.clone(), Expr::Constant(value.clone())))
            .collect();
        build_function_def(None, self.options.max_depth, pending)
    }

    fn renderer(&self) -> SourceRenderer {
        SourceRenderer::new(self.options.render_config.clone())
    }

    /// Decompile a unit body to source text.
    pub fn decompile_unit(&self, unit: &CodeUnit) -> Result<String> {
        let suite = self.build_suite(unit)?;
        Ok(self.renderer().render_suite(&suite))
    }

    /// Decompile a module body to source text.
    pub fn decompile_module(&self, unit: &CodeUnit) -> Result<String> {
        let suite = self.build_module(unit)?;
        Ok(self.renderer().render_suite(&suite))
    }

    /// Decompile a callable to a `def` statement.
    pub fn decompile_function(&self, function: &FunctionObject) -> Result<String> {
        let def = self.build_function(function)?;
        Ok(self.renderer().render_function(&def))
    }

    /// Decompile the module stored in a `.pyc` byte stream.
    pub fn decompile_pyc(&self, bytes: &[u8]) -> Result<String> {
        let unit = pyc_parser(bytes)?;
        self.decompile_module(&unit)
    }
}

/// Convenience function: decompile a unit body with default options.
pub fn decompile(unit: &CodeUnit) -> Result<String> {
    Decompiler::new(DecompileOptions::default()).decompile_unit(unit)
}

/// Convenience function: decompile a `.pyc` byte stream with default options.
pub fn decompile_pyc(bytes: &[u8]) -> Result<String> {
    Decompiler::new(DecompileOptions::default()).decompile_pyc(bytes)
}
