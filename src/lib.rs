//! A decompiler for [CPython 3.2](https://docs.python.org/3.2/library/dis.html)
//! code objects and `.pyc` files.

use std::fs::File;
use std::io::{prelude::*, BufReader};
use std::path::Path;

#[macro_use]
extern crate bitflags;

pub mod constant_info;
pub mod decompile;
pub mod error;
pub mod instruction;

pub mod parser;
pub mod types;

pub use decompile::{decompile, decompile_pyc, DecompileOptions, Decompiler};
pub use error::{DecompileError, Result};
pub use parser::{marshal_parser, pyc_parser};
pub use types::*;

/// Attempt to read a compiled module given a path to a `.pyc` file.
///
/// ```rust
/// let result = pycode_decompiler::parse_pyc("./does-not-exist.pyc");
/// assert!(result.is_err());
/// ```
pub fn parse_pyc<P: AsRef<Path>>(path: P) -> Result<CodeUnit> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);
    parse_pyc_from_reader(&mut reader)
}

/// Attempt to read a compiled module from anything implementing
/// `std::io::Read`.
///
/// ```rust
/// let mut reader = "this_will_be_parsed_as_pyc".as_bytes();
/// let result = pycode_decompiler::parse_pyc_from_reader(&mut reader);
/// assert!(result.is_err());
/// ```
pub fn parse_pyc_from_reader<T: Read>(reader: &mut T) -> Result<CodeUnit> {
    let mut pyc_bytes = Vec::new();
    reader.read_to_end(&mut pyc_bytes)?;
    pyc_parser(&pyc_bytes)
}
