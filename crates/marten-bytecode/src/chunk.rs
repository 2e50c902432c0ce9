//! Binary chunk serialization
//!
//! Encodes a [`Prototype`] tree into the exact byte layout the target VM
//! loads, and parses it back. The layout is the Lua 5.3 chunk format:
//! a fixed header asserting the writer's numeric widths and endianness,
//! then a depth-first encoding of the prototype tree.

use crate::constant::Constant;
use crate::error::{BytecodeError, Result};
use crate::instruction::Instruction;
use crate::proto::{LocalVarInfo, Prototype, UpvalueDesc};

/// Chunk signature, the first four bytes of every binary chunk.
pub const SIGNATURE: &[u8; 4] = b"\x1bLua";
/// Version byte (5.3).
pub const VERSION: u8 = 0x53;
/// Format byte (official format).
pub const FORMAT: u8 = 0;
/// Corruption-sentinel bytes following the format byte.
pub const SENTINEL_DATA: &[u8; 6] = b"\x19\x93\r\n\x1a\n";

const CINT_SIZE: u8 = 4;
const CSIZET_SIZE: u8 = 8;
const INSTRUCTION_SIZE: u8 = 4;
const INTEGER_SIZE: u8 = 8;
const NUMBER_SIZE: u8 = 8;
const CHECK_INT: i64 = 0x5678;
const CHECK_NUM: f64 = 370.5;

const TAG_NIL: u8 = 0x00;
const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x03;
const TAG_FLOAT: u8 = 0x13;
const TAG_SHORT_STR: u8 = 0x04;
const TAG_LONG_STR: u8 = 0x14;

/// Longest string encoded with the single-byte length prefix.
const SHORT_STR_MAX: usize = 253;

/// Serialize a prototype tree into a binary chunk.
pub fn dump(proto: &Prototype) -> Vec<u8> {
    let mut w = Writer::default();
    w.header();
    w.proto(proto);
    w.data
}

/// Parse a binary chunk back into a prototype tree.
pub fn undump(bytes: &[u8]) -> Result<Prototype> {
    let mut r = Reader::new(bytes);
    r.header()?;
    r.proto()
}

#[derive(Default)]
struct Writer {
    data: Vec<u8>,
}

impl Writer {
    fn byte(&mut self, b: u8) {
        self.data.push(b);
    }

    fn u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    fn integer(&mut self, v: i64) {
        self.u64(v as u64);
    }

    fn number(&mut self, v: f64) {
        self.u64(v.to_bits());
    }

    fn string(&mut self, s: &str) {
        let size = s.len();
        if size == 0 {
            self.byte(0x00);
            return;
        }
        if size <= SHORT_STR_MAX {
            self.byte((size + 1) as u8);
        } else {
            self.byte(0xFF);
            self.u64((size + 1) as u64);
        }
        self.data.extend_from_slice(s.as_bytes());
    }

    fn header(&mut self) {
        self.data.extend_from_slice(SIGNATURE);
        self.byte(VERSION);
        self.byte(FORMAT);
        self.data.extend_from_slice(SENTINEL_DATA);
        self.byte(CINT_SIZE);
        self.byte(CSIZET_SIZE);
        self.byte(INSTRUCTION_SIZE);
        self.byte(INTEGER_SIZE);
        self.byte(NUMBER_SIZE);
        self.integer(CHECK_INT);
        self.number(CHECK_NUM);
    }

    fn proto(&mut self, proto: &Prototype) {
        self.string(proto.source.as_deref().unwrap_or(""));
        self.u32(proto.line_defined);
        self.u32(proto.last_line_defined);
        self.byte(proto.num_params);
        self.byte(proto.is_vararg as u8);
        self.byte(proto.max_stack_size);

        self.u32(proto.code.len() as u32);
        for inst in &proto.code {
            self.u32(inst.raw());
        }

        self.u32(proto.constants.len() as u32);
        for k in &proto.constants {
            self.constant(k);
        }

        self.u32(proto.upvalues.len() as u32);
        for uv in &proto.upvalues {
            self.byte(uv.in_stack as u8);
            self.byte(uv.index);
        }

        self.u32(proto.protos.len() as u32);
        for sub in &proto.protos {
            self.proto(sub);
        }

        self.u32(proto.line_info.len() as u32);
        for line in &proto.line_info {
            self.u32(*line);
        }

        self.u32(proto.local_vars.len() as u32);
        for var in &proto.local_vars {
            self.string(&var.name);
            self.u32(var.start_pc);
            self.u32(var.end_pc);
        }

        self.u32(proto.upvalue_names.len() as u32);
        for name in &proto.upvalue_names {
            self.string(name);
        }
    }

    fn constant(&mut self, k: &Constant) {
        match k {
            Constant::Nil => self.byte(TAG_NIL),
            Constant::Boolean(b) => {
                self.byte(TAG_BOOLEAN);
                self.byte(*b as u8);
            }
            Constant::Integer(i) => {
                self.byte(TAG_INTEGER);
                self.integer(*i);
            }
            Constant::Float(f) => {
                self.byte(TAG_FLOAT);
                self.number(*f);
            }
            Constant::Str(s) => {
                if s.len() <= SHORT_STR_MAX {
                    self.byte(TAG_SHORT_STR);
                } else {
                    self.byte(TAG_LONG_STR);
                }
                self.string(s);
            }
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(BytecodeError::UnexpectedEnd)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn integer(&mut self) -> Result<i64> {
        Ok(self.u64()? as i64)
    }

    fn number(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64()?))
    }

    /// Reads an array count and bounds it against the bytes left, so a
    /// forged count cannot drive an oversized allocation. `min_elem` is
    /// the smallest encoding of one element.
    fn count(&mut self, min_elem: usize) -> Result<usize> {
        let n = self.u32()? as usize;
        if n.saturating_mul(min_elem) > self.data.len() - self.pos {
            return Err(BytecodeError::UnexpectedEnd);
        }
        Ok(n)
    }

    fn string(&mut self) -> Result<String> {
        let prefix = self.byte()?;
        let size = match prefix {
            0x00 => return Ok(String::new()),
            0xFF => (self.u64()? as usize)
                .checked_sub(1)
                .ok_or(BytecodeError::UnexpectedEnd)?,
            b => b as usize - 1,
        };
        let bytes = self.bytes(size)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BytecodeError::InvalidString)
    }

    fn header(&mut self) -> Result<()> {
        if self.bytes(4)? != SIGNATURE {
            return Err(BytecodeError::InvalidSignature);
        }
        let version = self.byte()?;
        if version != VERSION {
            return Err(BytecodeError::VersionMismatch(version));
        }
        let format = self.byte()?;
        if format != FORMAT {
            return Err(BytecodeError::FormatMismatch(format));
        }
        if self.bytes(6)? != SENTINEL_DATA {
            return Err(BytecodeError::CorruptSentinel);
        }
        for (name, expected) in [
            ("int", CINT_SIZE),
            ("size_t", CSIZET_SIZE),
            ("instruction", INSTRUCTION_SIZE),
            ("integer", INTEGER_SIZE),
            ("number", NUMBER_SIZE),
        ] {
            if self.byte()? != expected {
                return Err(BytecodeError::SizeMismatch(name));
            }
        }
        if self.integer()? != CHECK_INT {
            return Err(BytecodeError::EndiannessMismatch);
        }
        if self.number()?.to_bits() != CHECK_NUM.to_bits() {
            return Err(BytecodeError::EndiannessMismatch);
        }
        Ok(())
    }

    fn proto(&mut self) -> Result<Prototype> {
        let source = self.string()?;
        let line_defined = self.u32()?;
        let last_line_defined = self.u32()?;
        let num_params = self.byte()?;
        let is_vararg = self.byte()? != 0;
        let max_stack_size = self.byte()?;

        let n = self.count(4)?;
        let mut code = Vec::with_capacity(n);
        for _ in 0..n {
            code.push(Instruction(self.u32()?));
        }

        let n = self.count(1)?;
        let mut constants = Vec::with_capacity(n);
        for _ in 0..n {
            constants.push(self.constant()?);
        }

        let n = self.count(2)?;
        let mut upvalues = Vec::with_capacity(n);
        for _ in 0..n {
            let in_stack = self.byte()? != 0;
            let index = self.byte()?;
            upvalues.push(UpvalueDesc { in_stack, index });
        }

        // The smallest nested prototype still carries its fixed fields
        // and seven array counts.
        let n = self.count(40)?;
        let mut protos = Vec::with_capacity(n);
        for _ in 0..n {
            protos.push(self.proto()?);
        }

        let n = self.count(4)?;
        let mut line_info = Vec::with_capacity(n);
        for _ in 0..n {
            line_info.push(self.u32()?);
        }

        let n = self.count(9)?;
        let mut local_vars = Vec::with_capacity(n);
        for _ in 0..n {
            let name = self.string()?;
            let start_pc = self.u32()?;
            let end_pc = self.u32()?;
            local_vars.push(LocalVarInfo {
                name,
                start_pc,
                end_pc,
            });
        }

        let n = self.count(1)?;
        let mut upvalue_names = Vec::with_capacity(n);
        for _ in 0..n {
            upvalue_names.push(self.string()?);
        }

        Ok(Prototype {
            source: if source.is_empty() {
                None
            } else {
                Some(source)
            },
            line_defined,
            last_line_defined,
            num_params,
            is_vararg,
            max_stack_size,
            code,
            constants,
            upvalues,
            protos,
            line_info,
            local_vars,
            upvalue_names,
        })
    }

    fn constant(&mut self) -> Result<Constant> {
        let tag = self.byte()?;
        Ok(match tag {
            TAG_NIL => Constant::Nil,
            TAG_BOOLEAN => Constant::Boolean(self.byte()? != 0),
            TAG_INTEGER => Constant::Integer(self.integer()?),
            TAG_FLOAT => Constant::Float(self.number()?),
            TAG_SHORT_STR | TAG_LONG_STR => Constant::Str(self.string()?),
            other => return Err(BytecodeError::BadConstantTag(other)),
        })
    }
}
