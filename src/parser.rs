//! Reader for CPython 3.2 `.pyc` files: an 8-byte header followed by the
//! marshalled module code object.

use std::io::{Cursor, Read};
use std::rc::Rc;

use binrw::{binrw, BinReaderExt};
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::constant_info::Constant;
use crate::error::{DecompileError, Result};
use crate::types::{CodeFlags, CodeUnit};

/// Magic number of CPython 3.2 bytecode files.
pub const PYC_MAGIC: [u8; 4] = [0x6c, 0x0c, 0x0d, 0x0a];

/// Marshalled values may nest at most this deep. Each level costs several
/// recursive frames, so the cap has to fit a 2 MiB thread stack in debug builds.
pub const MAX_NESTING: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
#[binrw]
#[brw(little)]
pub struct PycHeader {
    pub magic: [u8; 4],
    /// Modification time of the source file, seconds since the epoch.
    pub mtime: u32,
}

/// Parse a `.pyc` byte stream into the module code unit.
pub fn pyc_parser(bytes: &[u8]) -> Result<CodeUnit> {
    let mut cursor = Cursor::new(bytes);
    let header: PycHeader = cursor.read_le()?;
    if header.magic != PYC_MAGIC {
        return Err(DecompileError::Container(format!(
            "bad magic number {:02x?}, expected {:02x?}",
            header.magic, PYC_MAGIC
        )));
    }
    tracing::debug!(mtime = header.mtime, "read pyc header");

    let mut reader = MarshalReader::new(cursor);
    match reader.read_object()? {
        Constant::Code(unit) => Ok(Rc::try_unwrap(unit).unwrap_or_else(|shared| (*shared).clone())),
        other => Err(DecompileError::Container(format!(
            "expected a code object, found {}",
            other.repr()
        ))),
    }
}

/// Parse a single marshalled value.
pub fn marshal_parser(bytes: &[u8]) -> Result<Constant> {
    MarshalReader::new(Cursor::new(bytes)).read_object()
}

fn container(message: impl Into<String>) -> DecompileError {
    DecompileError::Container(message.into())
}

struct MarshalReader<'a> {
    cursor: Cursor<&'a [u8]>,
    /// Strings recorded by the interned-string tag, referenced by index.
    interned: Vec<String>,
    depth: usize,
}

impl<'a> MarshalReader<'a> {
    fn new(cursor: Cursor<&'a [u8]>) -> Self {
        MarshalReader {
            cursor,
            interned: Vec::new(),
            depth: 0,
        }
    }

    fn position(&self) -> u64 {
        self.cursor.position()
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.position()) as usize
    }

    fn u8(&mut self) -> Result<u8> {
        let at = self.position();
        self.cursor
            .read_le::<u8>()
            .map_err(|_| container(format!("unexpected end of data at {}", at)))
    }

    fn i32(&mut self) -> Result<i32> {
        let at = self.position();
        self.cursor
            .read_le::<i32>()
            .map_err(|_| container(format!("truncated int32 at {}", at)))
    }

    fn u32(&mut self) -> Result<u32> {
        let at = self.position();
        let value = self.i32()?;
        u32::try_from(value).map_err(|_| container(format!("negative count {} at {}", value, at)))
    }

    fn length(&mut self) -> Result<usize> {
        let at = self.position();
        let n = self.u32()? as usize;
        if n > self.remaining() {
            return Err(container(format!("length {} at {} runs past the end of data", n, at)));
        }
        Ok(n)
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let at = self.position();
        let mut buf = vec![0; n];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| container(format!("truncated data at {}", at)))?;
        Ok(buf)
    }

    fn text(&mut self, n: usize) -> Result<String> {
        let at = self.position();
        String::from_utf8(self.bytes(n)?).map_err(|_| container(format!("invalid UTF-8 string at {}", at)))
    }

    fn float_text(&mut self) -> Result<f64> {
        let n = self.u8()? as usize;
        let text = self.text(n)?;
        text.trim()
            .parse()
            .map_err(|_| container(format!("invalid float literal {:?}", text)))
    }

    fn float_binary(&mut self) -> Result<f64> {
        let at = self.position();
        self.cursor
            .read_le::<f64>()
            .map_err(|_| container(format!("truncated float at {}", at)))
    }

    /// Arbitrary-precision integer stored as base 2**15 digits, least
    /// significant first; the sign of the digit count is the sign of the value.
    fn long(&mut self) -> Result<Constant> {
        let size = self.i32()?;
        let mut value = BigInt::zero();
        let mut digits = Vec::with_capacity(size.unsigned_abs() as usize);
        for _ in 0..size.unsigned_abs() {
            let at = self.position();
            let digit = self
                .cursor
                .read_le::<u16>()
                .map_err(|_| container(format!("truncated long digit at {}", at)))?;
            if digit >= 1 << 15 {
                return Err(container(format!("long digit {} out of range at {}", digit, at)));
            }
            digits.push(digit);
        }
        for digit in digits.iter().rev() {
            value = (value << 15usize) + BigInt::from(*digit);
        }
        if size < 0 {
            value = -value;
        }
        Ok(match value.to_i64() {
            Some(small) => Constant::Int(small),
            None => Constant::Long(value),
        })
    }

    fn sequence(&mut self) -> Result<Vec<Constant>> {
        let n = self.u32()? as usize;
        if n > self.remaining() {
            return Err(container(format!("{} items cannot fit in the remaining data", n)));
        }
        (0..n).map(|_| self.read_object()).collect()
    }

    fn string_object(&mut self, field: &str) -> Result<String> {
        match self.read_object()? {
            Constant::Str(s) => Ok(s),
            other => Err(container(format!("{} is not a string: {}", field, other.repr()))),
        }
    }

    fn string_tuple(&mut self, field: &str) -> Result<Vec<String>> {
        match self.read_object()? {
            Constant::Tuple(items) => items
                .into_iter()
                .map(|item| match item {
                    Constant::Str(s) => Ok(s),
                    other => Err(container(format!("{} holds a non-string: {}", field, other.repr()))),
                })
                .collect(),
            other => Err(container(format!("{} is not a tuple: {}", field, other.repr()))),
        }
    }

    fn bytes_object(&mut self, field: &str) -> Result<Vec<u8>> {
        match self.read_object()? {
            Constant::Bytes(b) => Ok(b),
            other => Err(container(format!("{} is not a bytes object: {}", field, other.repr()))),
        }
    }

    fn code(&mut self) -> Result<CodeUnit> {
        let argcount = self.u32()?;
        let kwonlyargcount = self.u32()?;
        let nlocals = self.u32()?;
        let stacksize = self.u32()?;
        let flags = CodeFlags::from_bits_retain(self.u32()?);
        let code = self.bytes_object("co_code")?;
        let consts = match self.read_object()? {
            Constant::Tuple(items) => items,
            other => return Err(container(format!("co_consts is not a tuple: {}", other.repr()))),
        };
        let names = self.string_tuple("co_names")?;
        let varnames = self.string_tuple("co_varnames")?;
        let freevars = self.string_tuple("co_freevars")?;
        let cellvars = self.string_tuple("co_cellvars")?;
        let filename = self.string_object("co_filename")?;
        let name = self.string_object("co_name")?;
        let firstlineno = self.u32()?;
        let lnotab = self.bytes_object("co_lnotab")?;
        tracing::trace!(name = %name, size = code.len(), consts = consts.len(), "read code object");

        Ok(CodeUnit {
            argcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            code,
            consts,
            names,
            varnames,
            freevars,
            cellvars,
            filename,
            name,
            firstlineno,
            lnotab,
        })
    }

    fn read_object(&mut self) -> Result<Constant> {
        if self.depth >= MAX_NESTING {
            return Err(container(format!("values nested deeper than {}", MAX_NESTING)));
        }
        self.depth += 1;
        let result = self.read_tagged();
        self.depth -= 1;
        result
    }

    fn read_tagged(&mut self) -> Result<Constant> {
        let at = self.position();
        let tag = self.u8()?;
        let value = match tag {
            b'N' => Constant::None,
            b'F' => Constant::Bool(false),
            b'T' => Constant::Bool(true),
            b'.' => Constant::Ellipsis,
            b'i' => Constant::Int(i64::from(self.i32()?)),
            b'I' => {
                let value = self
                    .cursor
                    .read_le::<i64>()
                    .map_err(|_| container(format!("truncated int64 at {}", at)))?;
                Constant::Int(value)
            }
            b'l' => self.long()?,
            b'f' => Constant::Float(self.float_text()?),
            b'g' => Constant::Float(self.float_binary()?),
            b'x' => {
                let real = self.float_text()?;
                let imag = self.float_text()?;
                Constant::Complex { real, imag }
            }
            b'y' => {
                let real = self.float_binary()?;
                let imag = self.float_binary()?;
                Constant::Complex { real, imag }
            }
            b's' => {
                let n = self.length()?;
                Constant::Bytes(self.bytes(n)?)
            }
            b't' => {
                let n = self.length()?;
                let s = self.text(n)?;
                self.interned.push(s.clone());
                Constant::Str(s)
            }
            b'u' => {
                let n = self.length()?;
                Constant::Str(self.text(n)?)
            }
            b'R' => {
                let index = self.u32()? as usize;
                let s = self
                    .interned
                    .get(index)
                    .cloned()
                    .ok_or_else(|| container(format!("string reference {} out of range at {}", index, at)))?;
                Constant::Str(s)
            }
            b'(' | b'[' => Constant::Tuple(self.sequence()?),
            b'<' | b'>' => Constant::FrozenSet(self.sequence()?),
            b'c' => Constant::Code(Rc::new(self.code()?)),
            b'0' => return Err(container(format!("unexpected null at {}", at))),
            b'S' => return Err(container(format!("StopIteration constant at {} is not supported", at))),
            b'{' => return Err(container(format!("dict constant at {} is not supported", at))),
            other => {
                return Err(container(format!(
                    "unknown marshal type {:?} (0x{:02x}) at {}",
                    other as char, other, at
                )));
            }
        };
        Ok(value)
    }
}
