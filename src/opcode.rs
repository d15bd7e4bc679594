//
// Copyright (C) 2023 SpinorML.
// Copyright (c) 2015-2021 Georg Brandl.
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

//! Opcode byte constants and the decoded-opcode representation the
//! interpreter consumes. The byte table mirrors CPython's `pickle.py`
//! naming; decoding raw bytes into [`Opcode`] values is the disassembler's
//! job (see [`crate::disasm`]), not the interpreter's.

#![allow(non_camel_case_types)]

/// Raw opcode byte values, named the way `pickle.py` names them.
pub mod raw {
    pub const MARK: u8 = b'('; // push special markobject on stack
    pub const STOP: u8 = b'.'; // every pickle ends with STOP
    pub const POP: u8 = b'0'; // discard topmost stack item
    pub const POP_MARK: u8 = b'1'; // discard stack top through topmost markobject
    pub const DUP: u8 = b'2'; // duplicate top stack item
    pub const FLOAT: u8 = b'F'; // push float object; decimal string argument
    pub const INT: u8 = b'I'; // push integer or bool; decimal string argument
    pub const BININT: u8 = b'J'; // push four-byte signed int
    pub const BININT1: u8 = b'K'; // push 1-byte unsigned int
    pub const LONG: u8 = b'L'; // push long; decimal string argument
    pub const BININT2: u8 = b'M'; // push 2-byte unsigned int
    pub const NONE: u8 = b'N'; // push None
    pub const PERSID: u8 = b'P'; // push persistent object; id is string arg
    pub const BINPERSID: u8 = b'Q'; // push persistent object; id is on stack
    pub const REDUCE: u8 = b'R'; // apply callable to argtuple, both on stack
    pub const STRING: u8 = b'S'; // push string; NL-terminated string argument
    pub const BINSTRING: u8 = b'T'; // push string; counted binary string argument
    pub const SHORT_BINSTRING: u8 = b'U'; // ditto, < 256 bytes
    pub const UNICODE: u8 = b'V'; // push Unicode string; raw-unicode-escaped argument
    pub const BINUNICODE: u8 = b'X'; // push Unicode string; counted UTF-8 argument
    pub const APPEND: u8 = b'a'; // append stack top to list below it
    pub const BUILD: u8 = b'b'; // call __setstate__ or __dict__.update()
    pub const GLOBAL: u8 = b'c'; // push self.find_class(modname, name); 2 string args
    pub const DICT: u8 = b'd'; // build a dict from stack items
    pub const EMPTY_DICT: u8 = b'}'; // push empty dict
    pub const APPENDS: u8 = b'e'; // extend list on stack by topmost stack slice
    pub const GET: u8 = b'g'; // push item from memo on stack; index is string arg
    pub const BINGET: u8 = b'h'; // ditto, 1-byte arg
    pub const INST: u8 = b'i'; // build & push class instance
    pub const LONG_BINGET: u8 = b'j'; // push item from memo; index is 4-byte arg
    pub const LIST: u8 = b'l'; // build list from topmost stack items
    pub const EMPTY_LIST: u8 = b']'; // push empty list
    pub const OBJ: u8 = b'o'; // build & push class instance
    pub const PUT: u8 = b'p'; // store stack top in memo; index is string arg
    pub const BINPUT: u8 = b'q'; // ditto, 1-byte arg
    pub const LONG_BINPUT: u8 = b'r'; // ditto, 4-byte arg
    pub const SETITEM: u8 = b's'; // add key+value pair to dict
    pub const TUPLE: u8 = b't'; // build tuple from topmost stack items
    pub const EMPTY_TUPLE: u8 = b')'; // push empty tuple
    pub const SETITEMS: u8 = b'u'; // modify dict by adding topmost key+value pairs
    pub const BINFLOAT: u8 = b'G'; // push float; arg is 8-byte float encoding

    // Protocol 2
    pub const PROTO: u8 = b'\x80'; // identify pickle protocol
    pub const NEWOBJ: u8 = b'\x81'; // build object by applying cls.__new__ to argtuple
    pub const EXT1: u8 = b'\x82'; // push object from extension registry; 1-byte index
    pub const EXT2: u8 = b'\x83'; // ditto, 2-byte index
    pub const EXT4: u8 = b'\x84'; // ditto, 4-byte index
    pub const TUPLE1: u8 = b'\x85'; // build 1-tuple from stack top
    pub const TUPLE2: u8 = b'\x86'; // build 2-tuple from two topmost stack items
    pub const TUPLE3: u8 = b'\x87'; // build 3-tuple from three topmost stack items
    pub const NEWTRUE: u8 = b'\x88'; // push True
    pub const NEWFALSE: u8 = b'\x89'; // push False
    pub const LONG1: u8 = b'\x8a'; // push long from < 256 bytes
    pub const LONG4: u8 = b'\x8b'; // push really big long

    // Protocol 3
    pub const BINBYTES: u8 = b'B'; // push bytes; counted binary string argument
    pub const SHORT_BINBYTES: u8 = b'C'; // ditto, < 256 bytes

    // Protocol 4
    pub const SHORT_BINUNICODE: u8 = b'\x8c'; // push short string; UTF-8 length < 256 bytes
    pub const BINUNICODE8: u8 = b'\x8d'; // push very long string
    pub const BINBYTES8: u8 = b'\x8e'; // push very long bytes string
    pub const EMPTY_SET: u8 = b'\x8f'; // push empty set on the stack
    pub const ADDITEMS: u8 = b'\x90'; // modify set by adding topmost stack items
    pub const FROZENSET: u8 = b'\x91'; // build frozenset from topmost stack items
    pub const NEWOBJ_EX: u8 = b'\x92'; // like NEWOBJ but with keyword-only arguments
    pub const STACK_GLOBAL: u8 = b'\x93'; // same as GLOBAL but using names on the stack
    pub const MEMOIZE: u8 = b'\x94'; // store top of the stack in memo
    pub const FRAME: u8 = b'\x95'; // indicate the beginning of a new frame

    // Protocol 5
    pub const BYTEARRAY8: u8 = b'\x96'; // push bytearray
    pub const NEXT_BUFFER: u8 = b'\x97'; // push next out-of-band buffer
    pub const READONLY_BUFFER: u8 = b'\x98'; // make top of stack readonly
}

/// A large string/byte payload, carried either inline (decoded already) or
/// as a pointer+length into the host's byte source, per spec.md's ~80 byte
/// opaque-inline threshold.
#[derive(Clone, Debug, PartialEq)]
pub enum Blob {
    Inline(Vec<u8>),
    Ref { offset: usize, len: usize },
}

impl Blob {
    pub fn len(&self) -> usize {
        match self {
            Blob::Inline(b) => b.len(),
            Blob::Ref { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fully decoded pickle opcode, with its immediate operand already parsed
/// out of the byte stream by the disassembler collaborator. This is the
/// unit the interpreter (`crate::vm::Vm`) actually consumes.
#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    Mark,
    Stop,
    Pop,
    PopMark,
    Dup,
    Float(f64),
    Int(i64),
    BinInt(i32),
    BinInt1(u8),
    Long(Vec<u8>),
    BinInt2(u16),
    None,
    PersId(Blob),
    BinPersId,
    Reduce,
    String(Blob),
    BinString(Blob),
    ShortBinString(Blob),
    Unicode(Blob),
    BinUnicode(Blob),
    Append,
    Build,
    Global(Blob, Blob),
    Dict,
    EmptyDict,
    Appends,
    Get(u32),
    BinGet(u8),
    Inst(Blob, Blob),
    LongBinGet(u32),
    List,
    EmptyList,
    Obj,
    Put(u32),
    BinPut(u8),
    LongBinPut(u32),
    SetItem,
    Tuple,
    EmptyTuple,
    SetItems,
    BinFloat(f64),
    Proto(u8),
    NewObj,
    Ext1(u8),
    Ext2(u16),
    Ext4(i32),
    Tuple1,
    Tuple2,
    Tuple3,
    NewTrue,
    NewFalse,
    Long1(Vec<u8>),
    Long4(Vec<u8>),
    BinBytes(Blob),
    ShortBinBytes(Blob),
    ShortBinUnicode(Blob),
    BinUnicode8(Blob),
    BinBytes8(Blob),
    EmptySet,
    AddItems,
    FrozenSet,
    NewObjEx,
    StackGlobal,
    Memoize,
    Frame(u64),
    ByteArray8(Blob),
    NextBuffer,
    ReadonlyBuffer,
}

impl Opcode {
    /// Short mnemonic, used for diagnostics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Mark => "MARK",
            Opcode::Stop => "STOP",
            Opcode::Pop => "POP",
            Opcode::PopMark => "POP_MARK",
            Opcode::Dup => "DUP",
            Opcode::Float(_) => "FLOAT",
            Opcode::Int(_) => "INT",
            Opcode::BinInt(_) => "BININT",
            Opcode::BinInt1(_) => "BININT1",
            Opcode::Long(_) => "LONG",
            Opcode::BinInt2(_) => "BININT2",
            Opcode::None => "NONE",
            Opcode::PersId(_) => "PERSID",
            Opcode::BinPersId => "BINPERSID",
            Opcode::Reduce => "REDUCE",
            Opcode::String(_) => "STRING",
            Opcode::BinString(_) => "BINSTRING",
            Opcode::ShortBinString(_) => "SHORT_BINSTRING",
            Opcode::Unicode(_) => "UNICODE",
            Opcode::BinUnicode(_) => "BINUNICODE",
            Opcode::Append => "APPEND",
            Opcode::Build => "BUILD",
            Opcode::Global(_, _) => "GLOBAL",
            Opcode::Dict => "DICT",
            Opcode::EmptyDict => "EMPTY_DICT",
            Opcode::Appends => "APPENDS",
            Opcode::Get(_) => "GET",
            Opcode::BinGet(_) => "BINGET",
            Opcode::Inst(_, _) => "INST",
            Opcode::LongBinGet(_) => "LONG_BINGET",
            Opcode::List => "LIST",
            Opcode::EmptyList => "EMPTY_LIST",
            Opcode::Obj => "OBJ",
            Opcode::Put(_) => "PUT",
            Opcode::BinPut(_) => "BINPUT",
            Opcode::LongBinPut(_) => "LONG_BINPUT",
            Opcode::SetItem => "SETITEM",
            Opcode::Tuple => "TUPLE",
            Opcode::EmptyTuple => "EMPTY_TUPLE",
            Opcode::SetItems => "SETITEMS",
            Opcode::BinFloat(_) => "BINFLOAT",
            Opcode::Proto(_) => "PROTO",
            Opcode::NewObj => "NEWOBJ",
            Opcode::Ext1(_) => "EXT1",
            Opcode::Ext2(_) => "EXT2",
            Opcode::Ext4(_) => "EXT4",
            Opcode::Tuple1 => "TUPLE1",
            Opcode::Tuple2 => "TUPLE2",
            Opcode::Tuple3 => "TUPLE3",
            Opcode::NewTrue => "NEWTRUE",
            Opcode::NewFalse => "NEWFALSE",
            Opcode::Long1(_) => "LONG1",
            Opcode::Long4(_) => "LONG4",
            Opcode::BinBytes(_) => "BINBYTES",
            Opcode::ShortBinBytes(_) => "SHORT_BINBYTES",
            Opcode::ShortBinUnicode(_) => "SHORT_BINUNICODE",
            Opcode::BinUnicode8(_) => "BINUNICODE8",
            Opcode::BinBytes8(_) => "BINBYTES8",
            Opcode::EmptySet => "EMPTY_SET",
            Opcode::AddItems => "ADDITEMS",
            Opcode::FrozenSet => "FROZENSET",
            Opcode::NewObjEx => "NEWOBJ_EX",
            Opcode::StackGlobal => "STACK_GLOBAL",
            Opcode::Memoize => "MEMOIZE",
            Opcode::Frame(_) => "FRAME",
            Opcode::ByteArray8(_) => "BYTEARRAY8",
            Opcode::NextBuffer => "NEXT_BUFFER",
            Opcode::ReadonlyBuffer => "READONLY_BUFFER",
        }
    }

    /// Opcodes spec.md §4.1 calls out as unsupported: encountering one is a
    /// recoverable failure, not a panic.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Opcode::Int(_)
                | Opcode::Long(_)
                | Opcode::PersId(_)
                | Opcode::BinPersId
                | Opcode::Get(_)
                | Opcode::Put(_)
                | Opcode::Ext1(_)
                | Opcode::Ext2(_)
                | Opcode::Ext4(_)
                | Opcode::NewObjEx
                | Opcode::NextBuffer
                | Opcode::ReadonlyBuffer
        )
    }
}
