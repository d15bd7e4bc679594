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

use std::result;

/// The taxonomy of conditions spec.md §7 asks for, nested under the
/// top-level [`PickleError`].
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum ErrorCode {
    /// Unsupported opcode
    #[error("unsupported opcode {0:?}")]
    Unsupported(char),
    /// EOF while parsing op argument
    #[error("EOF while parsing")]
    EOFWhileParsing,
    /// Stack underflowed
    #[error("pickle stack underflow")]
    StackUnderflow,
    /// POP_MARK/container-close with no matching MARK
    #[error("metastack underflow, no matching MARK")]
    MetastackUnderflow,
    /// Length prefix found negative
    #[error("negative length prefix")]
    NegativeLength,
    /// String decoding as UTF-8 failed
    #[error("string is not UTF-8 encoded")]
    StringNotUTF8,
    /// Wrong stack top type for opcode
    #[error("invalid stack top, expected {0}, got {1}")]
    InvalidStackTop(&'static str, String),
    /// Dict built from an odd number of stack items
    #[error("dict built from an odd number of stack items")]
    OddDictItems,
    /// A "module global" reference wasn't resolved by REDUCE/NEWOBJ
    #[error("unresolved global reference")]
    UnresolvedGlobal,
    /// A value was missing from the memo
    #[error("missing memo with id {0}")]
    MissingMemo(u32),
    /// Invalid literal found
    #[error("literal is invalid: {0:?}")]
    InvalidLiteral(Vec<u8>),
    /// Found trailing bytes after STOP opcode
    #[error("trailing bytes found")]
    TrailingBytes,
    /// Invalid value in pickle stream
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// Host environment not set up for the pickle architecture
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// All possible errors the interpreter and driver can produce. Mirrors the
/// three-way taxonomy from spec.md §7 (I/O, interpreter, configuration),
/// folding "disassembly error" into `Io` since it always originates from a
/// failed byte read or a malformed length.
#[derive(Debug, thiserror::Error)]
pub enum PickleError {
    /// Cannot read input bytes, or a disassembly failure (fatal for the run).
    #[error("I/O error: {0}")]
    Io(ErrorCode),
    /// The pickle had some error while interpreting, at a given byte offset.
    #[error("pickle error at offset {1}: {0}")]
    Eval(ErrorCode, usize),
    /// Host environment not set for the pickle architecture (recoverable:
    /// abort entry before the VM runs at all).
    #[error("configuration error: {0}")]
    Configuration(ErrorCode),
    /// Allocation failure, treated as fatal per spec.md §7.
    #[error("allocation failed")]
    Allocation,
}

pub type Result<T> = result::Result<T, PickleError>;
