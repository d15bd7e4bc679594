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

//! Structurally similar to [`crate::render::pseudocode`] (spec.md §2's
//! "JSON dumper ... structurally similar"), driving the same hoist/`Split`
//! rules over the graph but emitting balanced JSON text instead of Python
//! syntax. A `var`-keyed object takes the place of Python variable
//! declarations; cycles and shared nodes become `{"$ref": "var_N"}`. We
//! only need to emit well-formed JSON here, not parse or validate
//! somebody else's, so no JSON crate is pulled in for this.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::object::{OperKind, PyObj, PyObjKind, PyOper, StrPayload};

use super::walk::{collect_memo_ids, count_references, index_split_owners, needs_hoist, ptr_key, VarNamer};

pub struct JsonRenderer {
    namer: VarNamer,
    split_owners: HashMap<usize, PyObj>,
    refcounts: HashMap<usize, usize>,
    in_progress: HashSet<usize>,
    vars: Vec<(String, String)>,
}

impl JsonRenderer {
    pub fn new(roots: &[PyObj]) -> Self {
        JsonRenderer {
            namer: VarNamer::new(&collect_memo_ids(roots)),
            split_owners: index_split_owners(roots),
            refcounts: count_references(roots),
            in_progress: HashSet::new(),
            vars: Vec::new(),
        }
    }

    pub fn render(mut self, roots: &[PyObj], truncated: bool) -> String {
        let results: Vec<String> = roots.iter().map(|r| self.value(r)).collect();
        let mut out = String::from("{\n");
        out.push_str("  \"vars\": {\n");
        for (i, (name, text)) in self.vars.iter().enumerate() {
            out.push_str(&format!("    {}: {}", json_string(name), text));
            if i + 1 != self.vars.len() {
                out.push(',');
            }
            out.push('\n');
        }
        out.push_str("  },\n");
        out.push_str(&format!("  \"result\": [{}],\n", results.join(", ")));
        out.push_str(&format!("  \"truncated\": {truncated}\n"));
        out.push('}');
        out
    }

    fn value(&mut self, obj: &PyObj) -> String {
        if let Some(name) = obj.borrow().varname.borrow().clone() {
            return json_ref(&name);
        }
        if needs_hoist(obj, &self.refcounts) {
            self.hoisted(obj)
        } else {
            self.inline(obj)
        }
    }

    fn hoisted(&mut self, obj: &PyObj) -> String {
        if let Some(name) = obj.borrow().varname.borrow().clone() {
            return json_ref(&name);
        }
        let name = self.namer.name_for(obj);
        *obj.borrow().varname.borrow_mut() = Some(Rc::clone(&name));
        let key = ptr_key(obj);
        self.in_progress.insert(key);

        let body = if matches!(obj.borrow().kind, PyObjKind::What(_)) {
            self.what_body(obj)
        } else {
            self.container_body(obj, &name)
        };
        self.vars.push((name.to_string(), body));

        self.in_progress.remove(&key);
        json_ref(&name)
    }

    fn container_body(&mut self, obj: &PyObj, name: &Rc<str>) -> String {
        let tag_kind = obj.borrow().kind.tag();
        use crate::object::PyObjTag::*;
        match tag_kind {
            Tuple | List | Set | FrozenSet => {
                let items = match &obj.borrow().kind {
                    PyObjKind::Tuple(i) | PyObjKind::List(i) | PyObjKind::Set(i)
                    | PyObjKind::FrozenSet(i) => i.clone(),
                    _ => unreachable!(),
                };
                let kind = match tag_kind {
                    Tuple => "tuple",
                    List => "list",
                    Set => "set",
                    _ => "frozenset",
                };
                let mut parts = Vec::new();
                let mut cycle_targets: Vec<String> = Vec::new();
                for item in &items {
                    if let Some(back) = self.deferred_member(item) {
                        // A raw back-reference and its own trailing `Split`
                        // can resolve to the same owner; keep the edge once.
                        if cycle_targets.contains(&back) {
                            continue;
                        }
                        cycle_targets.push(back.clone());
                        parts.push(format!("{{\"$cycle\": {back}}}"));
                        continue;
                    }
                    parts.push(self.value(item));
                }
                format!(
                    "{{\"$type\": \"{}\", \"items\": [{}]}}",
                    kind,
                    parts.join(", ")
                )
            }
            Dict => {
                let items = match &obj.borrow().kind {
                    PyObjKind::Dict(i) => i.clone(),
                    _ => unreachable!(),
                };
                let mut entries = Vec::new();
                let mut i = 0;
                while i < items.len() {
                    if let PyObjKind::Split(oper) = &items[i].borrow().kind {
                        let target = self.split_target(oper);
                        entries.push(format!(
                            "{{\"key\": {{\"$cycle\": {target}}}, \"value\": {{\"$cycle\": {target}}}}}"
                        ));
                        i += 1;
                        continue;
                    }
                    let k = self.value(&items[i]);
                    let v = self.value(&items[i + 1]);
                    entries.push(format!("{{\"key\": {k}, \"value\": {v}}}"));
                    i += 2;
                }
                format!(
                    "{{\"$type\": \"dict\", \"entries\": [{}]}}",
                    entries.join(", ")
                )
            }
            _ => self.inline(obj),
        }
    }

    fn deferred_member(&mut self, item: &PyObj) -> Option<String> {
        if let PyObjKind::Split(oper) = &item.borrow().kind {
            return Some(self.split_target(oper));
        }
        if self.in_progress.contains(&ptr_key(item)) {
            return Some(self.value(item));
        }
        None
    }

    fn split_target(&mut self, oper: &PyOper) -> String {
        match self.split_owners.get(&(Rc::as_ptr(oper) as usize)).cloned() {
            Some(owner) => self.value(&owner),
            None => "null".to_string(),
        }
    }

    fn inline(&mut self, obj: &PyObj) -> String {
        let borrow = obj.borrow();
        match &borrow.kind {
            PyObjKind::None => "null".to_string(),
            PyObjKind::Bool(b) => b.to_string(),
            PyObjKind::Int(v) => format!("{{\"$type\": \"int\", \"value\": \"{v}\"}}"),
            PyObjKind::Float(f) => {
                if f.is_finite() {
                    format!("{f}")
                } else {
                    format!("\"{f}\"")
                }
            }
            PyObjKind::Str(s) => json_string_payload(s),
            PyObjKind::Func(module, name) => {
                let module = Rc::clone(module);
                let name = Rc::clone(name);
                drop(borrow);
                format!(
                    "{{\"$type\": \"func\", \"module\": {}, \"name\": {}}}",
                    self.inline(&module),
                    self.inline(&name)
                )
            }
            PyObjKind::Tuple(_) | PyObjKind::List(_) | PyObjKind::Set(_) | PyObjKind::FrozenSet(_) => {
                drop(borrow);
                let name = self.hoisted(obj);
                name
            }
            PyObjKind::What(_) => {
                drop(borrow);
                self.hoisted(obj)
            }
            PyObjKind::Split(oper) => {
                let oper = Rc::clone(oper);
                drop(borrow);
                format!("{{\"$cycle\": {}}}", self.split_target(&oper))
            }
        }
    }

    fn what_body(&mut self, obj: &PyObj) -> String {
        let chain = match &obj.borrow().kind {
            PyObjKind::What(c) => c.clone(),
            _ => unreachable!(),
        };
        let mut ops = Vec::new();
        for oper in &chain {
            let (op, args) = {
                let o = oper.borrow();
                (o.op, o.stack.clone())
            };
            let arg_texts: Vec<String> = args.iter().map(|a| self.value(a)).collect();
            ops.push(format!(
                "{{\"op\": \"{}\", \"args\": [{}]}}",
                oper_name(op),
                arg_texts.join(", ")
            ));
        }
        format!("{{\"$type\": \"what\", \"chain\": [{}]}}", ops.join(", "))
    }
}

fn oper_name(op: OperKind) -> &'static str {
    match op {
        OperKind::FakeInit => "FAKE_INIT",
        OperKind::Reduce => "REDUCE",
        OperKind::NewObj => "NEWOBJ",
        OperKind::Build => "BUILD",
        OperKind::Append => "APPEND",
        OperKind::Appends => "APPENDS",
        OperKind::SetItem => "SETITEM",
        OperKind::SetItems => "SETITEMS",
        OperKind::AddItems => "ADDITEMS",
        OperKind::Inst => "INST",
        OperKind::Obj => "OBJ",
    }
}

fn json_ref(name: &str) -> String {
    format!("{{\"$ref\": {}}}", json_string(name))
}

fn json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn json_string_payload(s: &StrPayload) -> String {
    if s.is_bytes {
        format!(
            "{{\"$type\": \"bytes\", \"hex\": \"{}\"}}",
            s.bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
        )
    } else {
        json_string(&s.as_utf8_lossy())
    }
}
