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

//! Bookkeeping shared by [`crate::render::pseudocode`] and
//! [`crate::render::json`]: which nodes must be hoisted into their own
//! declaration (spec.md §4.4), sequential variable naming, and the
//! `Split`-owner index used to resolve a reduce's self-reference (§4.3).

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::object::{PyObj, PyObjKind, PyObjTag};

pub fn ptr_key(obj: &PyObj) -> usize {
    Rc::as_ptr(obj) as usize
}

/// A node gets its own `var = ...` statement whenever it is a mutable
/// container or a `What` (both may later be referenced by name from a
/// `Split` post-fix or another container), or is independently shared
/// (memo-bound, or reachable from more than one place in the graph).
///
/// Sharing is decided from `refcounts`, a structural occurrence count
/// computed once up front by [`count_references`] — *not* from
/// `Rc::strong_count`. The renderers themselves clone child `PyObj`s into
/// local `Vec`s while iterating (to release a `RefCell` borrow before
/// recursing), which would otherwise inflate every single element's
/// strong count by one and make `needs_hoist` true almost everywhere.
pub fn needs_hoist(obj: &PyObj, refcounts: &HashMap<usize, usize>) -> bool {
    let b = obj.borrow();
    matches!(
        b.kind.tag(),
        PyObjTag::List | PyObjTag::Dict | PyObjTag::Set | PyObjTag::FrozenSet | PyObjTag::What
    ) || b.memo_id.is_some()
        || refcounts.get(&ptr_key(obj)).copied().unwrap_or(0) > 1
}

/// Counts, for every object reachable from `roots`, how many parent-slots
/// (including being a root itself) point at it. Each node's children are
/// walked exactly once (on first visit) so a node's own count reflects
/// only genuine incoming edges, never the traversal's bookkeeping.
pub fn count_references(roots: &[PyObj]) -> HashMap<usize, usize> {
    let mut counts = HashMap::new();
    let mut visited = HashSet::new();
    for root in roots {
        *counts.entry(ptr_key(root)).or_insert(0) += 1;
    }
    for root in roots {
        walk_count(root, &mut counts, &mut visited);
    }
    counts
}

fn walk_count(obj: &PyObj, counts: &mut HashMap<usize, usize>, visited: &mut HashSet<usize>) {
    if !visited.insert(ptr_key(obj)) {
        return;
    }
    let children = children_of(obj);
    for child in &children {
        *counts.entry(ptr_key(child)).or_insert(0) += 1;
        walk_count(child, counts, visited);
    }
}

/// A `Split`'s own `PyOper` is always also reachable through the `What`
/// chain that owns it (that's what makes it resolvable at all — see
/// [`index_split_owners`]), so it contributes no children here: counting
/// its stack again would double an already-counted edge and misreport a
/// non-shared object as shared.
fn children_of(obj: &PyObj) -> Vec<PyObj> {
    let b = obj.borrow();
    match &b.kind {
        PyObjKind::Tuple(items)
        | PyObjKind::List(items)
        | PyObjKind::Set(items)
        | PyObjKind::FrozenSet(items)
        | PyObjKind::Dict(items) => items.clone(),
        PyObjKind::Func(module, name) => vec![Rc::clone(module), Rc::clone(name)],
        PyObjKind::What(chain) => chain.iter().flat_map(|o| o.borrow().stack.clone()).collect(),
        _ => Vec::new(),
    }
}

/// Every `memo_id` reachable from `roots`, gathered in a single upfront
/// walk so [`VarNamer`] can reserve those indices before it ever hands out
/// a sequential one. Render order (which object gets hoisted first) does
/// not follow memo-slot order, so without this a sequential name handed
/// out early can still collide with a memo id visited later.
pub fn collect_memo_ids(roots: &[PyObj]) -> HashSet<u32> {
    let mut ids = HashSet::new();
    let mut seen = HashSet::new();
    for root in roots {
        walk_memo_ids(root, &mut ids, &mut seen);
    }
    ids
}

fn walk_memo_ids(obj: &PyObj, ids: &mut HashSet<u32>, seen: &mut HashSet<usize>) {
    if !seen.insert(ptr_key(obj)) {
        return;
    }
    if let Some(id) = obj.borrow().memo_id {
        ids.insert(id);
    }
    for child in &children_of(obj) {
        walk_memo_ids(child, ids, seen);
    }
}

/// Sequential variable-name source: "derived from `memo_id` when present,
/// else a sequential id" (spec.md §4.4). `used` is seeded up front with
/// every memo id reachable from the render roots ([`collect_memo_ids`]),
/// so the sequential counter never hands out an index some later-visited
/// memoized object is going to claim for itself.
pub struct VarNamer {
    next: u32,
    used: HashSet<u32>,
}

impl VarNamer {
    pub fn new(reserved_memo_ids: &HashSet<u32>) -> Self {
        VarNamer {
            next: 0,
            used: reserved_memo_ids.clone(),
        }
    }

    pub fn name_for(&mut self, obj: &PyObj) -> Rc<str> {
        let idx = match obj.borrow().memo_id {
            Some(id) => {
                self.used.insert(id);
                id
            }
            None => {
                while self.used.contains(&self.next) {
                    self.next += 1;
                }
                let idx = self.next;
                self.used.insert(idx);
                self.next += 1;
                idx
            }
        };
        format!("var_{idx}").into()
    }
}

/// Maps a `Split`'s embedded `PyOper` pointer back to the `What` object
/// whose chain owns it (spec.md §4.3: "the same shared `PyOper` reachable
/// via some `What` chain on the stack").
pub fn index_split_owners(roots: &[PyObj]) -> HashMap<usize, PyObj> {
    let mut owners = HashMap::new();
    let mut seen = HashSet::new();
    for root in roots {
        collect(root, &mut owners, &mut seen);
    }
    owners
}

fn collect(obj: &PyObj, owners: &mut HashMap<usize, PyObj>, seen: &mut HashSet<usize>) {
    if !seen.insert(ptr_key(obj)) {
        return;
    }
    if let PyObjKind::What(chain) = &obj.borrow().kind {
        for oper in chain {
            owners.insert(Rc::as_ptr(oper) as usize, Rc::clone(obj));
        }
    }
    for child in &children_of(obj) {
        collect(child, owners, seen);
    }
}
