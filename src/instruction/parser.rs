use std::io::Cursor;

use binrw::{binrw, BinReaderExt};

use crate::error::{DecompileError, Result};
use crate::instruction::{Instruction, Opcode};

/// One opcode byte followed by its argument when the opcode takes one.
#[binrw]
#[brw(little)]
#[derive(Clone, Debug)]
struct RawInstruction {
    opcode: Opcode,
    #[br(if(opcode.has_argument()))]
    arg: Option<u16>,
}

/// Decode a raw instruction stream.
///
/// `EXTENDED_ARG` prefixes are folded into the following instruction, whose
/// argument becomes `(prefix << 16) | arg` and whose offset becomes that of the
/// prefix.
pub fn decode_instructions(unit: &str, code: &[u8]) -> Result<Vec<Instruction>> {
    let mut cursor = Cursor::new(code);
    let mut instructions = Vec::with_capacity(code.len() / 2);
    let mut extended: Option<(u32, u32)> = None;

    while (cursor.position() as usize) < code.len() {
        let offset = cursor.position() as u32;
        let raw: RawInstruction = cursor.read_le().map_err(|e| DecompileError::Malformed {
            unit: unit.to_string(),
            offset,
            message: describe_decode_error(code[offset as usize], &e),
        })?;
        let next_offset = cursor.position() as u32;
        let arg = raw.arg.map(u32::from);

        if raw.opcode == Opcode::ExtendedArg {
            if extended.is_some() {
                return Err(DecompileError::Malformed {
                    unit: unit.to_string(),
                    offset,
                    message: "consecutive EXTENDED_ARG prefixes".to_string(),
                });
            }
            extended = Some((offset, arg.unwrap_or(0) << 16));
            continue;
        }

        let (start, high) = extended.take().unwrap_or((offset, 0));
        instructions.push(Instruction {
            offset: start,
            opcode: raw.opcode,
            arg: arg.map(|low| high | low),
            next_offset,
        });
    }

    if let Some((offset, _)) = extended {
        return Err(DecompileError::Malformed {
            unit: unit.to_string(),
            offset,
            message: "EXTENDED_ARG at end of code".to_string(),
        });
    }

    tracing::trace!(unit, count = instructions.len(), "decoded instructions");
    Ok(instructions)
}

fn describe_decode_error(byte: u8, error: &binrw::Error) -> String {
    match error {
        binrw::Error::Io(_) => "truncated instruction argument".to_string(),
        _ => format!("unknown opcode byte {}", byte),
    }
}
