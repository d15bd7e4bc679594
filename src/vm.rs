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

//! The pickle stack machine: spec.md §3's `PMState` plus §4.1-§4.3's
//! opcode dispatch, `What` construction and `Split` propagation. Grounded
//! on the teacher's `Unpickler` (`stack`/`metastack`/`memo` fields, the
//! `load_*` dispatch shape) and generalized the way
//! `KerfuffleV2-repugnant-pickle::eval` generalizes "construct a value"
//! into "construct a value, or record an operator chain if we can't".

use std::collections::BTreeMap;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::disasm::{Blob, ByteSource, DecodedOp};
use crate::error::{ErrorCode, PickleError, Result};
use crate::object::{
    new_obj, new_oper, OperKind, PyObj, PyObjKind, PyOper, StrPayload,
};
use crate::opcode::Opcode;

/// Configuration toggles from spec.md §6.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Whether STOP terminates the run (default true).
    pub break_on_stop: bool,
    /// Enables debug commentary in the renderer output.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            break_on_stop: true,
            verbose: false,
        }
    }
}

/// What happened after interpreting one opcode.
pub enum StepOutcome {
    Continue,
    Stopped(PyObj),
}

/// The VM's mutable state, spec.md §3 "VM state (PMState)".
pub struct PMState {
    pub stack: Vec<PyObj>,
    pub metastack: Vec<Vec<PyObj>>,
    pub popstack: Vec<PyObj>,
    pub memo: BTreeMap<u32, PyObj>,
    pub start: usize,
    pub offset: usize,
    pub end: usize,
    pub recurse: u64,
    pub ver: u8,
    pub break_on_stop: bool,
    /// Set once an unrecoverable interpreter failure truncates the run.
    pub truncated: bool,
}

impl PMState {
    pub fn new(start: usize, break_on_stop: bool) -> Self {
        PMState {
            stack: Vec::new(),
            metastack: Vec::new(),
            popstack: Vec::new(),
            memo: BTreeMap::new(),
            start,
            offset: start,
            end: start,
            recurse: 0,
            ver: 0,
            break_on_stop,
            truncated: false,
        }
    }

    /// Bumps and returns the global traversal epoch (spec.md §3's
    /// `recurse`), used by every cycle-sensitive walk: Split propagation,
    /// deep release, rendering.
    pub fn next_epoch(&mut self) -> u64 {
        self.recurse += 1;
        self.recurse
    }
}

pub struct Vm {
    pub state: PMState,
}

impl Vm {
    pub fn new(config: &Config, start: usize) -> Self {
        Vm {
            state: PMState::new(start, config.break_on_stop),
        }
    }

    // -- stack primitives ---------------------------------------------

    fn push(&mut self, obj: PyObj) {
        self.state.stack.push(obj);
    }

    fn pop(&mut self) -> Result<PyObj> {
        self.state
            .stack
            .pop()
            .ok_or_else(|| self.err(ErrorCode::StackUnderflow))
    }

    fn top(&self) -> Result<&PyObj> {
        self.state
            .stack
            .last()
            .ok_or_else(|| PickleError::Eval(ErrorCode::StackUnderflow, self.state.offset))
    }

    fn err(&self, code: ErrorCode) -> PickleError {
        PickleError::Eval(code, self.state.offset)
    }

    fn mark(&mut self) {
        let saved = std::mem::take(&mut self.state.stack);
        self.state.metastack.push(saved);
    }

    /// Drains the current (since-MARK) stack and restores the parent one,
    /// per spec.md's metastack-as-stack-of-stacks design (§9).
    fn pop_mark(&mut self) -> Result<Vec<PyObj>> {
        let items = std::mem::take(&mut self.state.stack);
        self.state.stack = self
            .state
            .metastack
            .pop()
            .ok_or_else(|| self.err(ErrorCode::MetastackUnderflow))?;
        Ok(items)
    }

    fn resolve_blob(&self, src: &dyn ByteSource, blob: &Blob) -> Result<Vec<u8>> {
        match blob {
            Blob::Inline(b) => Ok(b.clone()),
            Blob::Ref { offset, len } => src
                .read_at(*offset, *len)
                .map(|b| b.to_vec())
                .ok_or_else(|| self.err(ErrorCode::EOFWhileParsing)),
        }
    }

    // -- memo -----------------------------------------------------------

    fn memo_bind(&mut self, slot: u32, obj: &PyObj) {
        obj.borrow_mut().memo_id = Some(slot);
        self.state.memo.insert(slot, Rc::clone(obj));
    }

    fn memo_get(&mut self, slot: u32) -> Result<PyObj> {
        self.state
            .memo
            .get(&slot)
            .cloned()
            .ok_or_else(|| self.err(ErrorCode::MissingMemo(slot)))
    }

    // -- the `What` abstraction, spec.md §4.2 ----------------------------

    /// Promotes the current stack top into a `What`, boxing the existing
    /// object as the chain's `FakeInit`. A no-op if the top is already
    /// `What`.
    fn stack_top_to_what(&mut self) -> Result<()> {
        let already_what = matches!(self.top()?.borrow().kind, PyObjKind::What(_));
        if already_what {
            return Ok(());
        }
        let obj = self.pop()?;
        let offset = obj.borrow().offset;
        let init = new_oper(OperKind::FakeInit, vec![obj]);
        self.push(new_obj(PyObjKind::What(vec![init]), offset));
        Ok(())
    }

    /// `py_what_addop`: pop `argc` items into an argument list, promote the
    /// new top to `What`, append a `PyOper(op, args)` to its chain.
    fn py_what_addop(&mut self, argc: usize, op: OperKind) -> Result<()> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        args.reverse();
        self.stack_top_to_what()?;
        let top = self.top()?.clone();
        let mut top_mut = top.borrow_mut();
        match &mut top_mut.kind {
            PyObjKind::What(chain) => chain.push(new_oper(op, args)),
            _ => unreachable!("stack_top_to_what guarantees What on top"),
        }
        Ok(())
    }

    /// `py_what_addop_stack`: used by APPENDS/SETITEMS/ADDITEMS once the
    /// caller has already popped the current (since-MARK) stack back to
    /// its parent via `pop_mark`. Promotes the (now current) top to
    /// `What`, attaching a `PyOper` whose arg-stack is the since-MARK
    /// items the caller collected.
    fn py_what_addop_stack(&mut self, args: Vec<PyObj>, op: OperKind) -> Result<()> {
        self.stack_top_to_what()?;
        let top = self.top()?.clone();
        let mut top_mut = top.borrow_mut();
        match &mut top_mut.kind {
            PyObjKind::What(chain) => chain.push(new_oper(op, args)),
            _ => unreachable!("stack_top_to_what guarantees What on top"),
        }
        Ok(())
    }

    // -- `Split` and reduce propagation, spec.md §4.3 --------------------

    /// After REDUCE records its `PyOper`, walk the argument tuple and
    /// insert a `Split` owning that same `PyOper` as a trailing element of
    /// every mutable container reachable from it. Tuples are recursed into
    /// but never mutated. Cycle-safe via the epoch counter; duplicate
    /// Splits at a container's tail are coalesced.
    ///
    /// Only fires when `target` (the object REDUCE just attached its
    /// `PyOper` to) is itself reachable from `arg_tuple` — most REDUCE
    /// calls have perfectly ordinary, acyclic arguments (spec.md §8
    /// scenario 5: a plain list argument renders as a plain list, no
    /// trailing statement), and only the subset that genuinely
    /// memo-references their own not-yet-finished result need the cut
    /// point at all.
    fn propagate_split(&mut self, arg_tuple: &PyObj, target: &PyObj, oper: &PyOper) {
        let probe_epoch = self.state.next_epoch();
        if !Self::contains_ref(arg_tuple, target, probe_epoch) {
            return;
        }
        let epoch = self.state.next_epoch();
        Self::walk_insert_split(arg_tuple, oper, epoch);
    }

    /// Cycle-safe search for `target` (by `Rc` identity) anywhere in the
    /// graph reachable from `obj`.
    fn contains_ref(obj: &PyObj, target: &PyObj, epoch: u64) -> bool {
        if Rc::ptr_eq(obj, target) {
            return true;
        }
        if obj.borrow().recurse.get() == epoch {
            return false;
        }
        obj.borrow().recurse.set(epoch);
        let children: Vec<PyObj> = {
            let b = obj.borrow();
            match &b.kind {
                PyObjKind::Tuple(items)
                | PyObjKind::List(items)
                | PyObjKind::Set(items)
                | PyObjKind::FrozenSet(items)
                | PyObjKind::Dict(items) => items.clone(),
                PyObjKind::Func(module, name) => vec![Rc::clone(module), Rc::clone(name)],
                PyObjKind::What(chain) => {
                    chain.iter().flat_map(|o| o.borrow().stack.clone()).collect()
                }
                _ => Vec::new(),
            }
        };
        children.iter().any(|c| Self::contains_ref(c, target, epoch))
    }

    fn walk_insert_split(obj: &PyObj, oper: &PyOper, epoch: u64) {
        if obj.borrow().recurse.get() == epoch {
            return;
        }
        obj.borrow().recurse.set(epoch);

        let mut obj_mut = obj.borrow_mut();
        match &mut obj_mut.kind {
            PyObjKind::Tuple(items) => {
                let items = items.clone();
                drop(obj_mut);
                for item in &items {
                    Self::walk_insert_split(item, oper, epoch);
                }
            }
            PyObjKind::List(items) | PyObjKind::Set(items) | PyObjKind::FrozenSet(items) | PyObjKind::Dict(items) => {
                let already_split = matches!(
                    items.last().map(|o| { let b = o.borrow(); matches!(b.kind, PyObjKind::Split(ref o2) if Rc::ptr_eq(o2, oper)) }),
                    Some(true)
                );
                if !already_split {
                    let split_offset = obj_mut.offset;
                    items.push(new_obj(PyObjKind::Split(Rc::clone(oper)), split_offset));
                }
                let items = items.clone();
                drop(obj_mut);
                for item in &items {
                    Self::walk_insert_split(item, oper, epoch);
                }
            }
            _ => {}
        }
    }

    // -- scalar producers, spec.md §4.1 ----------------------------------

    fn push_scalar(&mut self, kind: PyObjKind) {
        let offset = self.state.offset;
        self.push(new_obj(kind, offset));
    }

    fn op_none(&mut self) {
        self.push_scalar(PyObjKind::None);
    }

    fn op_bool(&mut self, b: bool) {
        self.push_scalar(PyObjKind::Bool(b));
    }

    fn op_int(&mut self, v: i64) {
        self.push_scalar(PyObjKind::Int(BigInt::from(v)));
    }

    fn op_long_binary(&mut self, bytes: &[u8]) {
        // Little-endian two's complement, per pickle's LONG1/LONG4 encoding.
        let v = if bytes.is_empty() {
            BigInt::from(0)
        } else {
            BigInt::from_signed_bytes_le(bytes)
        };
        self.push_scalar(PyObjKind::Int(v));
    }

    fn op_float(&mut self, f: f64) {
        self.push_scalar(PyObjKind::Float(f));
    }

    fn op_string(&mut self, src: &dyn ByteSource, blob: &Blob, is_bytes: bool) -> Result<()> {
        let bytes = self.resolve_blob(src, blob)?;
        let payload = if is_bytes {
            StrPayload::raw_bytes(bytes)
        } else {
            StrPayload::text(bytes)
        };
        self.push_scalar(PyObjKind::Str(payload));
        Ok(())
    }

    /// `STRING`'s ASCII-quoted form: `'...'` or `"..."`, quotes stripped.
    fn op_quoted_string(&mut self, blob: &Blob) -> Result<()> {
        let Blob::Inline(raw) = blob else {
            return Err(self.err(ErrorCode::InvalidValue(
                "STRING payload unexpectedly out-of-line".into(),
            )));
        };
        if raw.len() < 2 || raw[0] != raw[raw.len() - 1] || !matches!(raw[0], b'\'' | b'"') {
            return Err(self.err(ErrorCode::InvalidValue("malformed STRING literal".into())));
        }
        self.push_scalar(PyObjKind::Str(StrPayload::text(raw[1..raw.len() - 1].to_vec())));
        Ok(())
    }

    // -- container builders, spec.md §4.1 --------------------------------

    fn op_empty(&mut self, kind: fn(Vec<PyObj>) -> PyObjKind) {
        self.push_scalar(kind(Vec::new()));
    }

    fn op_tuple_n(&mut self, n: usize) -> Result<()> {
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            items.push(self.pop()?);
        }
        items.reverse();
        self.push_scalar(PyObjKind::Tuple(items));
        Ok(())
    }

    fn op_drain_stack(&mut self, make: fn(Vec<PyObj>) -> PyObjKind) -> Result<()> {
        let items = self.pop_mark()?;
        self.push_scalar(make(items));
        Ok(())
    }

    fn op_dict_drain(&mut self) -> Result<()> {
        let items = self.pop_mark()?;
        if items.len() % 2 != 0 {
            return Err(self.err(ErrorCode::OddDictItems));
        }
        self.push_scalar(PyObjKind::Dict(items));
        Ok(())
    }

    fn op_append(&mut self) -> Result<()> {
        let value = self.pop()?;
        let receiver = self.top()?.clone();
        let mut recv_mut = receiver.borrow_mut();
        match &mut recv_mut.kind {
            PyObjKind::List(items) => {
                items.push(value);
                Ok(())
            }
            _ => {
                drop(recv_mut);
                self.push(value);
                self.py_what_addop(1, OperKind::Append)
            }
        }
    }

    fn op_appends_like(&mut self, set_kind: bool) -> Result<()> {
        let items = self.pop_mark()?;
        let receiver = self.top()?.clone();
        let mut recv_mut = receiver.borrow_mut();
        let fast = match &mut recv_mut.kind {
            PyObjKind::List(existing) if !set_kind => {
                existing.extend(items.clone());
                true
            }
            PyObjKind::Set(existing) if set_kind => {
                existing.extend(items.clone());
                true
            }
            _ => false,
        };
        if fast {
            return Ok(());
        }
        drop(recv_mut);
        let op = if set_kind { OperKind::AddItems } else { OperKind::Appends };
        self.py_what_addop_stack(items, op)
    }

    fn op_setitem(&mut self) -> Result<()> {
        let value = self.pop()?;
        let key = self.pop()?;
        let receiver = self.top()?.clone();
        let mut recv_mut = receiver.borrow_mut();
        match &mut recv_mut.kind {
            PyObjKind::Dict(items) => {
                items.push(key);
                items.push(value);
                Ok(())
            }
            _ => {
                drop(recv_mut);
                self.push(key);
                self.push(value);
                self.py_what_addop(2, OperKind::SetItem)
            }
        }
    }

    fn op_setitems(&mut self) -> Result<()> {
        let items = self.pop_mark()?;
        if items.len() % 2 != 0 {
            return Err(self.err(ErrorCode::OddDictItems));
        }
        let receiver = self.top()?.clone();
        let mut recv_mut = receiver.borrow_mut();
        let fast = matches!(recv_mut.kind, PyObjKind::Dict(_));
        if fast {
            if let PyObjKind::Dict(existing) = &mut recv_mut.kind {
                existing.extend(items.clone());
            }
            return Ok(());
        }
        drop(recv_mut);
        self.py_what_addop_stack(items, OperKind::SetItems)
    }

    // -- memoization, spec.md §4.1 ---------------------------------------

    fn op_memoize(&mut self) -> Result<()> {
        let slot = self.state.memo.len() as u32;
        let top = self.top()?.clone();
        self.memo_bind(slot, &top);
        Ok(())
    }

    fn op_binput(&mut self, slot: u32) -> Result<()> {
        let top = self.top()?.clone();
        self.memo_bind(slot, &top);
        Ok(())
    }

    fn op_binget(&mut self, slot: u32) -> Result<()> {
        let obj = self.memo_get(slot)?;
        self.push(obj);
        Ok(())
    }

    // -- class/call opcodes, spec.md §4.1 --------------------------------

    fn make_func(&mut self, modname: Vec<u8>, name: Vec<u8>) -> PyObj {
        let offset = self.state.offset;
        let module = new_obj(PyObjKind::Str(StrPayload::text(modname)), offset);
        let fname = new_obj(PyObjKind::Str(StrPayload::text(name)), offset);
        new_obj(PyObjKind::Func(module, fname), offset)
    }

    fn op_global(&mut self, src: &dyn ByteSource, modname: &Blob, name: &Blob) -> Result<()> {
        let modname = self.resolve_blob(src, modname)?;
        let name = self.resolve_blob(src, name)?;
        let func = self.make_func(modname, name);
        self.push(func);
        Ok(())
    }

    /// `Func`'s module/name are always `Str` PyObjs (spec.md §3's invariant);
    /// unlike GLOBAL/INST (which build both from disassembler-supplied
    /// bytes), STACK_GLOBAL takes them off the value stack, so a malformed
    /// stream can hand it anything.
    fn op_stack_global(&mut self) -> Result<()> {
        let name = self.pop()?;
        let module = self.pop()?;
        if !matches!(name.borrow().kind, PyObjKind::Str(_))
            || !matches!(module.borrow().kind, PyObjKind::Str(_))
        {
            return Err(self.err(ErrorCode::InvalidStackTop(
                "Str",
                format!(
                    "module={:?}, name={:?}",
                    module.borrow().kind.tag(),
                    name.borrow().kind.tag()
                ),
            )));
        }
        let offset = self.state.offset;
        self.push(new_obj(PyObjKind::Func(module, name), offset));
        Ok(())
    }

    fn op_reduce(&mut self) -> Result<()> {
        let args = self.pop()?;
        self.stack_top_to_what()?;
        let top = self.top()?.clone();
        let oper = new_oper(OperKind::Reduce, vec![args.clone()]);
        {
            let mut top_mut = top.borrow_mut();
            match &mut top_mut.kind {
                PyObjKind::What(chain) => chain.push(Rc::clone(&oper)),
                _ => unreachable!(),
            }
        }
        self.propagate_split(&args, &top, &oper);
        Ok(())
    }

    fn op_newobj(&mut self) -> Result<()> {
        self.py_what_addop(1, OperKind::NewObj)
    }

    fn op_build(&mut self) -> Result<()> {
        self.py_what_addop(1, OperKind::Build)
    }

    fn op_inst(&mut self, src: &dyn ByteSource, modname: &Blob, name: &Blob) -> Result<()> {
        let args = self.pop_mark()?;
        let func = self.op_global_func(src, modname, name)?;
        let offset = self.state.offset;
        let arglist = new_obj(PyObjKind::List(args), offset);
        self.push(func);
        self.push(arglist);
        self.py_what_addop(1, OperKind::Inst)
    }

    fn op_global_func(&mut self, src: &dyn ByteSource, modname: &Blob, name: &Blob) -> Result<PyObj> {
        let modname = self.resolve_blob(src, modname)?;
        let name = self.resolve_blob(src, name)?;
        Ok(self.make_func(modname, name))
    }

    fn op_obj(&mut self) -> Result<()> {
        let mut items = self.pop_mark()?;
        if items.is_empty() {
            return Err(self.err(ErrorCode::StackUnderflow));
        }
        let cls = items.remove(0);
        let offset = self.state.offset;
        let arglist = new_obj(PyObjKind::List(items), offset);
        self.push(cls);
        self.push(arglist);
        self.py_what_addop(1, OperKind::Obj)
    }

    // -- protocol/meta, spec.md §4.1 --------------------------------------

    fn op_proto(&mut self, proto: u8) -> Result<()> {
        if self.state.offset == self.state.start {
            self.state.ver = proto;
            log::debug!("pickle protocol {proto}");
        } else {
            log::warn!(
                "PROTO opcode seen at offset {} after stream start {}",
                self.state.offset,
                self.state.start
            );
        }
        Ok(())
    }

    // -- dispatch ---------------------------------------------------------

    /// Interpret one decoded opcode, per spec.md §4.1's top-level contract.
    pub fn step(&mut self, src: &dyn ByteSource, decoded: &DecodedOp) -> Result<StepOutcome> {
        self.state.offset = decoded.offset;
        self.state.end = decoded.offset + decoded.size;

        if decoded.op.is_unsupported() {
            return Err(self.err(ErrorCode::Unsupported(
                decoded.op.mnemonic().chars().next().unwrap_or('?'),
            )));
        }

        match &decoded.op {
            Opcode::Mark => self.mark(),
            Opcode::Stop => {
                let result = self.pop()?;
                if self.state.break_on_stop {
                    return Ok(StepOutcome::Stopped(result));
                }
                self.push(result);
            }
            Opcode::Pop => {
                let v = self.pop()?;
                self.state.popstack.push(v);
            }
            Opcode::PopMark => {
                let mut items = self.pop_mark()?;
                self.state.popstack.append(&mut items);
            }
            Opcode::Dup => {
                let top = self.top()?.clone();
                self.push(top);
            }
            Opcode::None => self.op_none(),
            Opcode::NewTrue => self.op_bool(true),
            Opcode::NewFalse => self.op_bool(false),
            Opcode::BinInt(v) => self.op_int(*v as i64),
            Opcode::BinInt1(v) => self.op_int(*v as i64),
            Opcode::BinInt2(v) => self.op_int(*v as i64),
            Opcode::Long1(bytes) => self.op_long_binary(bytes),
            Opcode::Long4(bytes) => self.op_long_binary(bytes),
            Opcode::Float(f) => self.op_float(*f),
            Opcode::BinFloat(f) => self.op_float(*f),
            Opcode::String(blob) => self.op_quoted_string(blob)?,
            Opcode::Unicode(blob) | Opcode::BinUnicode(blob) | Opcode::ShortBinUnicode(blob)
            | Opcode::BinUnicode8(blob) => self.op_string(src, blob, false)?,
            Opcode::BinString(blob) | Opcode::ShortBinString(blob) => {
                self.op_string(src, blob, false)?
            }
            Opcode::BinBytes(blob) | Opcode::ShortBinBytes(blob) | Opcode::BinBytes8(blob)
            | Opcode::ByteArray8(blob) => self.op_string(src, blob, true)?,
            Opcode::EmptyTuple => self.op_empty(PyObjKind::Tuple),
            Opcode::EmptyList => self.op_empty(PyObjKind::List),
            Opcode::EmptyDict => self.op_empty(PyObjKind::Dict),
            Opcode::EmptySet => self.op_empty(PyObjKind::Set),
            Opcode::Tuple1 => self.op_tuple_n(1)?,
            Opcode::Tuple2 => self.op_tuple_n(2)?,
            Opcode::Tuple3 => self.op_tuple_n(3)?,
            Opcode::Tuple => self.op_drain_stack(PyObjKind::Tuple)?,
            Opcode::List => self.op_drain_stack(PyObjKind::List)?,
            Opcode::FrozenSet => self.op_drain_stack(PyObjKind::FrozenSet)?,
            Opcode::Dict => self.op_dict_drain()?,
            Opcode::Append => self.op_append()?,
            Opcode::Appends => self.op_appends_like(false)?,
            Opcode::AddItems => self.op_appends_like(true)?,
            Opcode::SetItem => self.op_setitem()?,
            Opcode::SetItems => self.op_setitems()?,
            Opcode::Memoize => self.op_memoize()?,
            Opcode::BinPut(slot) => self.op_binput(*slot as u32)?,
            Opcode::LongBinPut(slot) => self.op_binput(*slot)?,
            Opcode::BinGet(slot) => self.op_binget(*slot as u32)?,
            Opcode::LongBinGet(slot) => self.op_binget(*slot)?,
            Opcode::Global(modname, name) => self.op_global(src, modname, name)?,
            Opcode::StackGlobal => self.op_stack_global()?,
            Opcode::Reduce => self.op_reduce()?,
            Opcode::NewObj => self.op_newobj()?,
            Opcode::Build => self.op_build()?,
            Opcode::Inst(modname, name) => self.op_inst(src, modname, name)?,
            Opcode::Obj => self.op_obj()?,
            Opcode::Proto(p) => self.op_proto(*p)?,
            Opcode::Frame(_) => {}
            Opcode::BinPersId | Opcode::Int(_) | Opcode::Long(_) | Opcode::PersId(_)
            | Opcode::Get(_) | Opcode::Put(_) | Opcode::Ext1(_) | Opcode::Ext2(_)
            | Opcode::Ext4(_) | Opcode::NewObjEx | Opcode::NextBuffer | Opcode::ReadonlyBuffer => {
                unreachable!("handled by the is_unsupported() guard above")
            }
        }
        Ok(StepOutcome::Continue)
    }

    // -- disposal, spec.md §3 "Lifecycle & ownership" --------------------

    /// Deep release: recursively null out container payloads before the
    /// wrapper itself is dropped, so a self-referential graph's last
    /// `Rc` doesn't form an uncollectable cycle. Cycle-safe via the epoch
    /// counter. Memo disposal needs no such treatment ("shallow
    /// release"): a memo-bound object is always also reachable from a
    /// stack, so simply dropping the memo map's `Rc` clones is sufficient
    /// and leak-free.
    pub fn deep_release(&mut self, roots: Vec<PyObj>) {
        let epoch = self.state.next_epoch();
        for root in roots {
            Self::deep_release_one(&root, epoch);
        }
    }

    fn deep_release_one(obj: &PyObj, epoch: u64) {
        if obj.borrow().recurse.get() == epoch {
            return;
        }
        obj.borrow().recurse.set(epoch);

        let taken_children: Vec<PyObj> = {
            let mut obj_mut = obj.borrow_mut();
            match &mut obj_mut.kind {
                PyObjKind::Tuple(items)
                | PyObjKind::List(items)
                | PyObjKind::Set(items)
                | PyObjKind::FrozenSet(items)
                | PyObjKind::Dict(items) => std::mem::take(items),
                PyObjKind::Func(module, name) => {
                    let children = vec![Rc::clone(module), Rc::clone(name)];
                    obj_mut.kind = PyObjKind::None;
                    children
                }
                PyObjKind::What(chain) => {
                    let chain = std::mem::take(chain);
                    let mut children = Vec::new();
                    for oper in chain {
                        children.append(&mut oper.borrow_mut().stack);
                    }
                    children
                }
                PyObjKind::Split(oper) => {
                    let children = std::mem::take(&mut oper.borrow_mut().stack);
                    obj_mut.kind = PyObjKind::None;
                    children
                }
                _ => Vec::new(),
            }
        };
        for child in &taken_children {
            Self::deep_release_one(child, epoch);
        }
    }
}
