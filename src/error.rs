//! Error type shared by the container reader, the instruction decoder and the
//! reconstructor.

use thiserror::Error;

/// Errors raised while reading or reconstructing a code unit.
///
/// Every variant that refers to an instruction carries the unit name and the
/// byte offset of the offending instruction. Reconstruction never produces
/// partial output: the first error aborts the unit.
#[derive(Debug, Error)]
pub enum DecompileError {
    /// Jump targets off the instruction stream, unknown opcode bytes, operand
    /// stack underflow, missing constant or name indices.
    #[error("{unit}: malformed code at offset {offset}: {message}")]
    Malformed {
        unit: String,
        offset: u32,
        message: String,
    },

    /// An opcode or opcode sequence outside the modelled control-flow patterns.
    #[error("{unit}: unsupported construct at offset {offset}: {message}")]
    Unsupported {
        unit: String,
        offset: u32,
        message: String,
    },

    /// Reconstruction reached an impossible state: an incomplete unpack, a
    /// conditional expression with the wrong stack shape, a marker used as a value.
    #[error("{unit}: invariant violated at offset {offset}: {message}")]
    Invariant {
        unit: String,
        offset: u32,
        message: String,
    },

    #[error("{unit}: nesting exceeds the limit of {limit}")]
    DepthExceeded { unit: String, limit: usize },

    #[error("invalid container: {0}")]
    Container(String),

    #[error(transparent)]
    Binary(#[from] binrw::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = DecompileError> = std::result::Result<T, E>;
