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

//! The symbolic object graph: [`PyObj`] (tagged, reference-counted,
//! §3 of spec.md) and [`PyOper`], the operator records `What` chains are
//! built from. Modeled on `landaire-pickled`'s `Shared<T>` (an
//! `Rc<RefCell<T>>` wrapper), generalized from a serde data model to a
//! self-referential one: pickle's DUP/MEMOIZE/BINGET opcodes can build
//! cycles a plain owned tree cannot represent.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;

/// Sentinel memo id: "not bound to any memo slot".
pub const UNSET_MEMO: Option<u32> = None;

/// A UTF-8-or-opaque byte string. Pickle's `STRING`/`UNICODE`/`BINUNICODE*`
/// opcodes produce text; `BINBYTES*`/`BYTEARRAY8` produce raw bytes. Both
/// share the `Str` variant (spec.md §3) but remember which they were so
/// the renderer can choose between `"..."` and `b"..."` literal syntax.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrPayload {
    pub bytes: Vec<u8>,
    pub is_bytes: bool,
}

impl StrPayload {
    pub fn text(s: impl Into<Vec<u8>>) -> Self {
        StrPayload {
            bytes: s.into(),
            is_bytes: false,
        }
    }

    pub fn raw_bytes(b: impl Into<Vec<u8>>) -> Self {
        StrPayload {
            bytes: b.into(),
            is_bytes: true,
        }
    }

    pub fn as_utf8_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Which opcode produced a [`PyOper`] entry in a `What` chain (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperKind {
    FakeInit,
    Reduce,
    NewObj,
    Build,
    Append,
    Appends,
    SetItem,
    SetItems,
    AddItems,
    Inst,
    Obj,
}

/// One link in a `What` operator chain: which operation, and the argument
/// stack it consumed. `stack` has exactly one element for `FakeInit`
/// (the wrapped initial object).
#[derive(Debug)]
pub struct PyOperData {
    pub op: OperKind,
    pub stack: Vec<PyObj>,
}

pub type PyOper = Rc<RefCell<PyOperData>>;

pub fn new_oper(op: OperKind, stack: Vec<PyObj>) -> PyOper {
    Rc::new(RefCell::new(PyOperData { op, stack }))
}

/// The tagged variants from spec.md §3's payload table.
#[derive(Debug)]
pub enum PyObjKind {
    None,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(StrPayload),
    Tuple(Vec<PyObj>),
    List(Vec<PyObj>),
    Dict(Vec<PyObj>),
    Set(Vec<PyObj>),
    FrozenSet(Vec<PyObj>),
    /// `(module, name)`, both of which are `Str` PyObjs.
    Func(PyObj, PyObj),
    /// Non-empty chain, first entry always `OperKind::FakeInit`.
    What(Vec<PyOper>),
    /// Owning reference to a REDUCE's `PyOper`, marking a self-reference cut
    /// point (spec.md §4.3).
    Split(PyOper),
}

/// A node in the symbolic object graph. Shared via `Rc`, mutated via
/// `RefCell` the way `landaire-pickled::value::Shared<T>` does for the
/// same reason: pickle payloads can be graphs, not trees.
pub struct PyObjData {
    pub kind: PyObjKind,
    pub offset: usize,
    pub memo_id: Option<u32>,
    pub varname: RefCell<Option<Rc<str>>>,
    pub recurse: Cell<u64>,
}

pub type PyObj = Rc<RefCell<PyObjData>>;

pub fn new_obj(kind: PyObjKind, offset: usize) -> PyObj {
    Rc::new(RefCell::new(PyObjData {
        kind,
        offset,
        memo_id: None,
        varname: RefCell::new(None),
        recurse: Cell::new(0),
    }))
}

/// Tags used for diagnostics and the renderer's container dispatch;
/// doesn't carry payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PyObjTag {
    None,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    List,
    Dict,
    Set,
    FrozenSet,
    Func,
    What,
    Split,
}

impl PyObjKind {
    pub fn tag(&self) -> PyObjTag {
        match self {
            PyObjKind::None => PyObjTag::None,
            PyObjKind::Bool(_) => PyObjTag::Bool,
            PyObjKind::Int(_) => PyObjTag::Int,
            PyObjKind::Float(_) => PyObjTag::Float,
            PyObjKind::Str(_) => PyObjTag::Str,
            PyObjKind::Tuple(_) => PyObjTag::Tuple,
            PyObjKind::List(_) => PyObjTag::List,
            PyObjKind::Dict(_) => PyObjTag::Dict,
            PyObjKind::Set(_) => PyObjTag::Set,
            PyObjKind::FrozenSet(_) => PyObjTag::FrozenSet,
            PyObjKind::Func(_, _) => PyObjTag::Func,
            PyObjKind::What(_) => PyObjTag::What,
            PyObjKind::Split(_) => PyObjTag::Split,
        }
    }
}

impl fmt::Debug for PyObjData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PyObjData")
            .field("tag", &self.kind.tag())
            .field("offset", &self.offset)
            .field("memo_id", &self.memo_id)
            .finish()
    }
}
