//
// Copyright (C) 2023 SpinorML.
//
// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at

//   http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The disassembler collaborator from spec.md §6: given a byte source and
//! an offset, produce decoded opcodes. Disassembly itself is a Non-goal of
//! this crate (a real host plugs in its own pickle-architecture
//! disassembler), but [`SliceDisassembler`] is shipped so the VM and
//! renderer can be exercised end-to-end without one.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{ErrorCode, PickleError, Result};
use crate::opcode::{raw, Blob, Opcode};

/// Random-access byte source, per spec.md §6.
pub trait ByteSource {
    fn read_at(&self, offset: usize, len: usize) -> Option<&[u8]>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteSource for [u8] {
    fn read_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.get(offset..offset.checked_add(len)?)
    }

    fn len(&self) -> usize {
        <[u8]>::len(self)
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.as_slice().read_at(offset, len)
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// A decoded opcode plus the byte range it occupied, the interpreter's
/// unit of work.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedOp {
    pub op: Opcode,
    pub offset: usize,
    pub size: usize,
}

/// The disassembler collaborator interface from spec.md §6: given a byte
/// source and the current offset, decode the next opcode.
pub trait Disassembler {
    fn decode_next(&mut self, src: &dyn ByteSource, offset: usize) -> Result<DecodedOp>;
}

/// Payloads longer than this many bytes are treated as out-of-line blobs
/// the renderer fetches lazily, per spec.md §4.1.
pub const INLINE_BLOB_THRESHOLD: usize = 80;

fn make_blob(src: &(impl ByteSource + ?Sized), offset: usize, len: usize) -> Result<Blob> {
    if len <= INLINE_BLOB_THRESHOLD {
        let bytes = src
            .read_at(offset, len)
            .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
        Ok(Blob::Inline(bytes.to_vec()))
    } else {
        if src.read_at(offset, len).is_none() {
            return Err(PickleError::Io(ErrorCode::EOFWhileParsing));
        }
        Ok(Blob::Ref { offset, len })
    }
}

/// Default disassembler over an in-memory byte slice, used by the demo
/// driver and by tests. Mirrors the byte-level parsing the teacher's
/// `Unpickler::load_*` methods did inline before this crate split
/// disassembly out as an external collaborator.
#[derive(Default)]
pub struct SliceDisassembler;

impl Disassembler for SliceDisassembler {
    fn decode_next(&mut self, src: &dyn ByteSource, offset: usize) -> Result<DecodedOp> {
        let op_byte = *src
            .read_at(offset, 1)
            .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?
            .first()
            .unwrap();
        let body = offset + 1;

        macro_rules! fixed {
            ($len:expr, $make:expr) => {{
                let buf = src
                    .read_at(body, $len)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let op = $make(buf);
                (op, 1 + $len)
            }};
        }

        fn read_line<'a>(src: &'a (impl ByteSource + ?Sized), start: usize) -> Option<(&'a [u8], usize)> {
            let mut i = start;
            loop {
                let b = src.read_at(i, 1)?;
                if b[0] == b'\n' {
                    return Some((src.read_at(start, i - start)?, i - start + 1));
                }
                i += 1;
                if i - start > 1 << 20 {
                    return None;
                }
            }
        }

        let (op, consumed): (Opcode, usize) = match op_byte {
            raw::MARK => (Opcode::Mark, 1),
            raw::STOP => (Opcode::Stop, 1),
            raw::POP => (Opcode::Pop, 1),
            raw::POP_MARK => (Opcode::PopMark, 1),
            raw::DUP => (Opcode::Dup, 1),
            raw::NONE => (Opcode::None, 1),
            raw::BINPERSID => (Opcode::BinPersId, 1),
            raw::REDUCE => (Opcode::Reduce, 1),
            raw::APPEND => (Opcode::Append, 1),
            raw::BUILD => (Opcode::Build, 1),
            raw::DICT => (Opcode::Dict, 1),
            raw::EMPTY_DICT => (Opcode::EmptyDict, 1),
            raw::APPENDS => (Opcode::Appends, 1),
            raw::LIST => (Opcode::List, 1),
            raw::EMPTY_LIST => (Opcode::EmptyList, 1),
            raw::OBJ => (Opcode::Obj, 1),
            raw::SETITEM => (Opcode::SetItem, 1),
            raw::TUPLE => (Opcode::Tuple, 1),
            raw::EMPTY_TUPLE => (Opcode::EmptyTuple, 1),
            raw::SETITEMS => (Opcode::SetItems, 1),
            raw::NEWOBJ => (Opcode::NewObj, 1),
            raw::TUPLE1 => (Opcode::Tuple1, 1),
            raw::TUPLE2 => (Opcode::Tuple2, 1),
            raw::TUPLE3 => (Opcode::Tuple3, 1),
            raw::NEWTRUE => (Opcode::NewTrue, 1),
            raw::NEWFALSE => (Opcode::NewFalse, 1),
            raw::EMPTY_SET => (Opcode::EmptySet, 1),
            raw::ADDITEMS => (Opcode::AddItems, 1),
            raw::FROZENSET => (Opcode::FrozenSet, 1),
            raw::NEWOBJ_EX => (Opcode::NewObjEx, 1),
            raw::STACK_GLOBAL => (Opcode::StackGlobal, 1),
            raw::MEMOIZE => (Opcode::Memoize, 1),
            raw::NEXT_BUFFER => (Opcode::NextBuffer, 1),
            raw::READONLY_BUFFER => (Opcode::ReadonlyBuffer, 1),

            raw::BININT1 => fixed!(1, |b: &[u8]| Opcode::BinInt1(b[0])),
            raw::BININT2 => fixed!(2, |b: &[u8]| Opcode::BinInt2(LittleEndian::read_u16(b))),
            raw::BININT => fixed!(4, |b: &[u8]| Opcode::BinInt(LittleEndian::read_i32(b))),
            raw::BINFLOAT => fixed!(8, |b: &[u8]| Opcode::BinFloat(BigEndian::read_f64(b))),
            raw::PROTO => fixed!(1, |b: &[u8]| Opcode::Proto(b[0])),
            raw::EXT1 => fixed!(1, |b: &[u8]| Opcode::Ext1(b[0])),
            raw::EXT2 => fixed!(2, |b: &[u8]| Opcode::Ext2(LittleEndian::read_u16(b))),
            raw::EXT4 => fixed!(4, |b: &[u8]| Opcode::Ext4(LittleEndian::read_i32(b))),
            raw::BINGET => fixed!(1, |b: &[u8]| Opcode::BinGet(b[0])),
            raw::LONG_BINGET => fixed!(4, |b: &[u8]| Opcode::LongBinGet(LittleEndian::read_u32(b))),
            raw::BINPUT => fixed!(1, |b: &[u8]| Opcode::BinPut(b[0])),
            raw::LONG_BINPUT => fixed!(4, |b: &[u8]| Opcode::LongBinPut(LittleEndian::read_u32(b))),
            raw::FRAME => fixed!(8, |b: &[u8]| Opcode::Frame(LittleEndian::read_u64(b))),

            raw::LONG1 => {
                let n = *src
                    .read_at(body, 1)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?
                    .first()
                    .unwrap() as usize;
                let buf = src
                    .read_at(body + 1, n)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                (Opcode::Long1(buf.to_vec()), 1 + 1 + n)
            }
            raw::LONG4 => {
                let nbuf = src
                    .read_at(body, 4)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let n = LittleEndian::read_i32(nbuf);
                if n < 0 {
                    return Err(PickleError::Eval(ErrorCode::NegativeLength, offset));
                }
                let n = n as usize;
                let buf = src
                    .read_at(body + 4, n)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                (Opcode::Long4(buf.to_vec()), 1 + 4 + n)
            }

            raw::BINSTRING => {
                let nbuf = src
                    .read_at(body, 4)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let n = LittleEndian::read_i32(nbuf);
                if n < 0 {
                    return Err(PickleError::Eval(ErrorCode::NegativeLength, offset));
                }
                let n = n as usize;
                let blob = make_blob(src, body + 4, n)?;
                (Opcode::BinString(blob), 1 + 4 + n)
            }
            raw::SHORT_BINSTRING => {
                let n = *src
                    .read_at(body, 1)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?
                    .first()
                    .unwrap() as usize;
                let blob = make_blob(src, body + 1, n)?;
                (Opcode::ShortBinString(blob), 1 + 1 + n)
            }
            raw::BINUNICODE => {
                let nbuf = src
                    .read_at(body, 4)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let n = LittleEndian::read_u32(nbuf) as usize;
                let blob = make_blob(src, body + 4, n)?;
                (Opcode::BinUnicode(blob), 1 + 4 + n)
            }
            raw::SHORT_BINUNICODE => {
                let n = *src
                    .read_at(body, 1)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?
                    .first()
                    .unwrap() as usize;
                let blob = make_blob(src, body + 1, n)?;
                (Opcode::ShortBinUnicode(blob), 1 + 1 + n)
            }
            raw::BINUNICODE8 | raw::BINBYTES8 | raw::BYTEARRAY8 => {
                let nbuf = src
                    .read_at(body, 8)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let n = LittleEndian::read_u64(nbuf) as usize;
                let blob = make_blob(src, body + 8, n)?;
                let op = match op_byte {
                    raw::BINUNICODE8 => Opcode::BinUnicode8(blob),
                    raw::BINBYTES8 => Opcode::BinBytes8(blob),
                    _ => Opcode::ByteArray8(blob),
                };
                (op, 1 + 8 + n)
            }
            raw::BINBYTES => {
                let nbuf = src
                    .read_at(body, 4)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let n = LittleEndian::read_u32(nbuf) as usize;
                let blob = make_blob(src, body + 4, n)?;
                (Opcode::BinBytes(blob), 1 + 4 + n)
            }
            raw::SHORT_BINBYTES => {
                let n = *src
                    .read_at(body, 1)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?
                    .first()
                    .unwrap() as usize;
                let blob = make_blob(src, body + 1, n)?;
                (Opcode::ShortBinBytes(blob), 1 + 1 + n)
            }

            raw::FLOAT => {
                let (line, used) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let text = std::str::from_utf8(line)
                    .map_err(|_| PickleError::Eval(ErrorCode::StringNotUTF8, offset))?;
                let f = text
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| PickleError::Eval(ErrorCode::InvalidLiteral(line.to_vec()), offset))?;
                (Opcode::Float(f), 1 + used)
            }
            raw::INT => {
                let (line, used) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let text = std::str::from_utf8(line)
                    .map_err(|_| PickleError::Eval(ErrorCode::StringNotUTF8, offset))?;
                let v = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| PickleError::Eval(ErrorCode::InvalidLiteral(line.to_vec()), offset))?;
                (Opcode::Int(v), 1 + used)
            }
            raw::LONG => {
                let (line, used) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                (Opcode::Long(line.to_vec()), 1 + used)
            }
            raw::STRING => {
                let (line, used) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                (Opcode::String(Blob::Inline(line.to_vec())), 1 + used)
            }
            raw::UNICODE => {
                let (line, used) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                (Opcode::Unicode(Blob::Inline(line.to_vec())), 1 + used)
            }
            raw::PERSID => {
                let (line, used) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                (Opcode::PersId(Blob::Inline(line.to_vec())), 1 + used)
            }
            raw::GET => {
                let (line, used) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let text = std::str::from_utf8(line)
                    .map_err(|_| PickleError::Eval(ErrorCode::StringNotUTF8, offset))?;
                let v = text
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| PickleError::Eval(ErrorCode::InvalidLiteral(line.to_vec()), offset))?;
                (Opcode::Get(v), 1 + used)
            }
            raw::PUT => {
                let (line, used) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let text = std::str::from_utf8(line)
                    .map_err(|_| PickleError::Eval(ErrorCode::StringNotUTF8, offset))?;
                let v = text
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| PickleError::Eval(ErrorCode::InvalidLiteral(line.to_vec()), offset))?;
                (Opcode::Put(v), 1 + used)
            }
            raw::GLOBAL => {
                let (modname, used1) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let (name, used2) = read_line(src, body + used1)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                (
                    Opcode::Global(Blob::Inline(modname.to_vec()), Blob::Inline(name.to_vec())),
                    1 + used1 + used2,
                )
            }
            raw::INST => {
                let (modname, used1) =
                    read_line(src, body).ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                let (name, used2) = read_line(src, body + used1)
                    .ok_or(PickleError::Io(ErrorCode::EOFWhileParsing))?;
                (
                    Opcode::Inst(Blob::Inline(modname.to_vec()), Blob::Inline(name.to_vec())),
                    1 + used1 + used2,
                )
            }

            other => {
                return Err(PickleError::Eval(
                    ErrorCode::Unsupported(other as char),
                    offset,
                ))
            }
        };

        Ok(DecodedOp {
            op,
            offset,
            size: consumed,
        })
    }
}
