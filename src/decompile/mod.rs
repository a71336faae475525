//! Reconstruction of Python source from code units.
//!
//! A [`Decompiler`] walks the instructions of a unit with an evaluation
//! stack, rebuilds statements and expressions from the jump structure, and
//! hands the resulting [`Suite`] to a [`SourceRenderer`].

pub mod code;
pub mod definitions;
pub mod decompiler;
pub mod else_jumps;
pub mod expr;
pub mod renderer;
pub mod stack;
pub mod structured_types;
mod suite_decompiler;

pub use self::decompiler::{decompile, decompile_pyc, DecompileOptions, Decompiler};
pub use self::expr::{BinOp, BoolOp, CompClause, CompareOp, ComprehensionKind, Expr, Keyword, Param, UnaryOp};
pub use self::renderer::{RenderConfig, SourceRenderer};
pub use self::structured_types::{
    AugAssign, ClassDef, ExceptHandler, FunctionDef, Import, ImportKind, Stmt, Suite, Try, With,
};
