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

//! Renders the symbolic object graph (spec.md §4.4) as Python-like
//! pseudocode: one statement per hoisted object, `What` chains expanded
//! into their constituent calls/mutations, and `Split` markers turned into
//! a trailing append/update statement instead of an inline back-reference.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::object::{OperKind, PyObj, PyObjKind, PyObjTag, PyOper};

use super::walk::{collect_memo_ids, count_references, index_split_owners, needs_hoist, ptr_key, VarNamer};

pub struct PseudocodeRenderer {
    namer: VarNamer,
    split_owners: HashMap<usize, PyObj>,
    refcounts: HashMap<usize, usize>,
    in_progress: HashSet<usize>,
    statements: Vec<String>,
}

impl PseudocodeRenderer {
    pub fn new(roots: &[PyObj]) -> Self {
        PseudocodeRenderer {
            namer: VarNamer::new(&collect_memo_ids(roots)),
            split_owners: index_split_owners(roots),
            refcounts: count_references(roots),
            in_progress: HashSet::new(),
            statements: Vec::new(),
        }
    }

    /// Renders every root as its own top-level statement. `ret` marks the
    /// final root as the function's return value (spec.md §4.4's `ret`
    /// flag), used when the VM's final stack top is what the host wants.
    pub fn render(mut self, roots: &[PyObj], ret: bool, truncated: bool) -> String {
        for (i, root) in roots.iter().enumerate() {
            let expr = self.render_hoisted(root);
            if ret && i + 1 == roots.len() {
                self.statements.push(format!("return {expr}"));
            }
        }
        if truncated {
            self.statements
                .push("# truncated: interpreter halted before STOP".to_string());
        }
        self.statements.join("\n")
    }

    /// Renders `obj` as an inline expression, assigning it first if it is
    /// not already named. Safe to call on an object currently mid-render
    /// (a cycle back-edge): it will already have a `varname` and returns
    /// immediately rather than recursing.
    fn render_value(&mut self, obj: &PyObj) -> String {
        if let Some(name) = obj.borrow().varname.borrow().clone() {
            return name.to_string();
        }
        if needs_hoist(obj, &self.refcounts) {
            self.render_hoisted(obj)
        } else {
            self.render_inline(obj)
        }
    }

    /// Assigns `obj` a name, pushes its declaration statement(s), and
    /// returns the name. The varname is recorded *before* recursing into
    /// payload/chain so that a self-reference encountered along the way
    /// resolves to the name instead of looping.
    fn render_hoisted(&mut self, obj: &PyObj) -> String {
        if let Some(name) = obj.borrow().varname.borrow().clone() {
            return name.to_string();
        }
        let name = self.namer.name_for(obj);
        *obj.borrow().varname.borrow_mut() = Some(Rc::clone(&name));
        let key = ptr_key(obj);
        self.in_progress.insert(key);

        if matches!(obj.borrow().kind, PyObjKind::What(_)) {
            self.render_what(obj, &name);
        } else {
            let (literal, deferred) = self.render_literal(obj, &name);
            self.statements.push(format!("{name} = {literal}"));
            self.statements.extend(deferred);
        }

        self.in_progress.remove(&key);
        name.to_string()
    }

    /// Builds the literal text for a hoisted non-`What` object plus any
    /// post-fix statements (self-references and `Split` markers) that must
    /// be emitted after the declaration, never inline within it.
    fn render_literal(&mut self, obj: &PyObj, name: &Rc<str>) -> (String, Vec<String>) {
        let tag = obj.borrow().kind.tag();
        match tag {
            PyObjTag::Tuple | PyObjTag::Func => (self.render_inline(obj), Vec::new()),
            PyObjTag::List | PyObjTag::Set | PyObjTag::FrozenSet => {
                let items = container_items(obj);
                let mut parts = Vec::new();
                let mut deferred = Vec::new();
                for item in &items {
                    if let Some(expr) = self.deferred_member(item) {
                        let stmt = self.mutate_stmt(tag, name, &expr);
                        // A raw back-reference and its own trailing `Split`
                        // can resolve to the same owner; keep the edge once.
                        if !deferred.contains(&stmt) {
                            deferred.push(stmt);
                        }
                        continue;
                    }
                    parts.push(self.render_value(item));
                }
                (container_literal(tag, &parts), deferred)
            }
            PyObjTag::Dict => {
                let items = container_items(obj);
                let mut parts = Vec::new();
                let mut deferred = Vec::new();
                let mut i = 0;
                while i < items.len() {
                    if let PyObjKind::Split(oper) = &items[i].borrow().kind {
                        let target = self.split_target(oper);
                        deferred.push(format!("{name}[{target}] = {target}"));
                        i += 1;
                        continue;
                    }
                    let (k, v) = (&items[i], &items[i + 1]);
                    let k_back = self.deferred_member(k);
                    let v_back = self.deferred_member(v);
                    if k_back.is_some() || v_back.is_some() {
                        let k_expr = k_back.unwrap_or_else(|| self.render_value(k));
                        let v_expr = v_back.unwrap_or_else(|| self.render_value(v));
                        deferred.push(format!("{name}[{k_expr}] = {v_expr}"));
                    } else {
                        let k_expr = self.render_value(k);
                        let v_expr = self.render_value(v);
                        parts.push(format!("{k_expr}: {v_expr}"));
                    }
                    i += 2;
                }
                (format!("{{{}}}", parts.join(", ")), deferred)
            }
            PyObjTag::What => unreachable!("What is rendered via render_what"),
            _ => (self.render_inline(obj), Vec::new()),
        }
    }

    /// `Some(name)` if `item` is a back-edge that must be deferred (a
    /// `Split` or a direct cycle through an object currently being
    /// declared); `None` if it can be rendered inline normally.
    fn deferred_member(&mut self, item: &PyObj) -> Option<String> {
        if let PyObjKind::Split(oper) = &item.borrow().kind {
            return Some(self.split_target(oper));
        }
        if self.in_progress.contains(&ptr_key(item)) {
            return Some(self.render_value(item));
        }
        None
    }

    fn split_target(&mut self, oper: &PyOper) -> String {
        match self.split_owners.get(&(Rc::as_ptr(oper) as usize)).cloned() {
            Some(owner) => self.render_value(&owner),
            None => {
                log::warn!("Split with no reachable owning What; rendering as None");
                "None".to_string()
            }
        }
    }

    fn mutate_stmt(&self, tag: PyObjTag, name: &str, value_expr: &str) -> String {
        match tag {
            PyObjTag::List => format!("{name}.append({value_expr})"),
            PyObjTag::Set | PyObjTag::FrozenSet => format!("{name}.add({value_expr})"),
            _ => unreachable!("mutate_stmt only called for list/set/frozenset"),
        }
    }

    /// Renders a non-hoisted object (scalar leaves, `Tuple`, `Func`) or the
    /// payload half of a hoisted one.
    fn render_inline(&mut self, obj: &PyObj) -> String {
        let kind_ref = obj.borrow();
        match &kind_ref.kind {
            PyObjKind::None => "None".to_string(),
            PyObjKind::Bool(true) => "True".to_string(),
            PyObjKind::Bool(false) => "False".to_string(),
            PyObjKind::Int(v) => v.to_string(),
            PyObjKind::Float(f) => render_float(*f),
            PyObjKind::Str(s) => render_str(s),
            PyObjKind::Func(module, name) => {
                let module = Rc::clone(module);
                let name = Rc::clone(name);
                drop(kind_ref);
                format!(
                    "__import__({}).{}",
                    self.render_inline(&module),
                    str_body(&name)
                )
            }
            PyObjKind::Tuple(items) => {
                let items = items.clone();
                drop(kind_ref);
                let parts: Vec<String> = items.iter().map(|it| self.render_value(it)).collect();
                match parts.len() {
                    0 => "()".to_string(),
                    1 => format!("({},)", parts[0]),
                    _ => format!("({})", parts.join(", ")),
                }
            }
            PyObjKind::List(_) | PyObjKind::Set(_) | PyObjKind::FrozenSet(_) | PyObjKind::Dict(_) => {
                drop(kind_ref);
                self.render_hoisted(obj)
            }
            PyObjKind::What(_) => {
                drop(kind_ref);
                self.render_hoisted(obj)
            }
            PyObjKind::Split(oper) => {
                let oper = Rc::clone(oper);
                drop(kind_ref);
                self.split_target(&oper)
            }
        }
    }

    fn render_what(&mut self, obj: &PyObj, name: &Rc<str>) {
        let chain = match &obj.borrow().kind {
            PyObjKind::What(c) => c.clone(),
            _ => unreachable!(),
        };
        for oper in &chain {
            let (op, args) = {
                let o = oper.borrow();
                (o.op, o.stack.clone())
            };
            let stmt = match op {
                OperKind::FakeInit => {
                    let init = self.render_value(&args[0]);
                    format!("{name} = {init}")
                }
                OperKind::Reduce => {
                    let args_expr = self.render_value(&args[0]);
                    format!("{name} = {name}({args_expr})")
                }
                OperKind::NewObj => {
                    let args_expr = self.render_value(&args[0]);
                    format!("{name} = {name}.__new__({name}, *{args_expr})")
                }
                OperKind::Build => {
                    let state_expr = self.render_value(&args[0]);
                    format!("{name}.__setstate__({state_expr})")
                }
                OperKind::Append => {
                    let v = self.render_value(&args[0]);
                    format!("{name}.append({v})")
                }
                OperKind::Appends => {
                    let parts: Vec<String> = args.iter().map(|a| self.render_value(a)).collect();
                    format!("{name}.extend([{}])", parts.join(", "))
                }
                OperKind::AddItems => {
                    let parts: Vec<String> = args.iter().map(|a| self.render_value(a)).collect();
                    format!("{name}.update([{}])", parts.join(", "))
                }
                OperKind::SetItem => {
                    let k = self.render_value(&args[0]);
                    let v = self.render_value(&args[1]);
                    format!("{name}[{k}] = {v}")
                }
                OperKind::SetItems => {
                    let mut pairs = Vec::new();
                    let mut it = args.iter();
                    while let (Some(k), Some(v)) = (it.next(), it.next()) {
                        let k = self.render_value(k);
                        let v = self.render_value(v);
                        pairs.push(format!("{k}: {v}"));
                    }
                    format!("{name}.update({{{}}})", pairs.join(", "))
                }
                OperKind::Inst | OperKind::Obj => {
                    let arglist = self.render_value(&args[0]);
                    format!("{name} = {name}(*{arglist})")
                }
            };
            self.statements.push(stmt);
        }
    }
}

fn container_items(obj: &PyObj) -> Vec<PyObj> {
    match &obj.borrow().kind {
        PyObjKind::List(items)
        | PyObjKind::Set(items)
        | PyObjKind::FrozenSet(items)
        | PyObjKind::Dict(items) => items.clone(),
        _ => Vec::new(),
    }
}

fn container_literal(tag: PyObjTag, parts: &[String]) -> String {
    match tag {
        PyObjTag::List => format!("[{}]", parts.join(", ")),
        PyObjTag::Set if parts.is_empty() => "set()".to_string(),
        PyObjTag::Set => format!("{{{}}}", parts.join(", ")),
        PyObjTag::FrozenSet if parts.is_empty() => "frozenset()".to_string(),
        PyObjTag::FrozenSet => format!("frozenset({{{}}})", parts.join(", ")),
        _ => unreachable!("container_literal only called for list/set/frozenset"),
    }
}

fn render_float(f: f64) -> String {
    if f.is_infinite() {
        return if f > 0.0 { "float(\"inf\")" } else { "float(\"-inf\")" }.to_string();
    }
    if f.is_nan() {
        return "float(\"nan\")".to_string();
    }
    let s = format!("{f:?}");
    if s.contains('.') || s.contains('e') {
        s
    } else {
        format!("{s}.0")
    }
}

fn str_body(s: &PyObj) -> String {
    match &s.borrow().kind {
        PyObjKind::Str(p) => p.as_utf8_lossy().into_owned(),
        _ => unreachable!("Func module/name are always Str"),
    }
}

fn render_str(s: &crate::object::StrPayload) -> String {
    let mut out = String::with_capacity(s.bytes.len() + 2);
    if s.is_bytes {
        out.push('b');
    }
    out.push('"');
    for &b in &s.bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ if !s.is_bytes => {
                // Best-effort: lossily decode the whole payload as UTF-8 for
                // display rather than escaping byte-by-byte.
                return format!(
                    "\"{}\"",
                    s.as_utf8_lossy().replace('\\', "\\\\").replace('"', "\\\"")
                );
            }
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('"');
    out
}
