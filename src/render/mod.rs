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

//! Turns the symbolic object graph the VM leaves behind into text (spec.md
//! §4.4's Renderer). [`pseudocode`] emits Python-like source; [`json`] emits
//! a structurally equivalent JSON document. Both share [`walk`]'s hoisting,
//! naming and `Split`-owner bookkeeping so the two stay in lockstep.

pub mod json;
pub mod pseudocode;
mod walk;

use crate::object::PyObj;

/// Selects which renderer [`render`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pseudocode,
    Json,
}

/// Minimal stand-in for spec.md §6's "Output sink": something a rendered
/// decompilation can be written to besides a `String` returned in memory.
pub trait TextSink {
    fn write_text(&mut self, text: &str);
}

impl TextSink for String {
    fn write_text(&mut self, text: &str) {
        self.push_str(text);
    }
}

/// Renders the roots left on the VM's value stack at STOP (or truncation)
/// time. `ret` marks the final root as the decompiled program's return
/// value, matching the pickle convention that the last stack item is the
/// unpickled object; it is ignored by the JSON renderer, which always
/// reports every root under `"result"`.
pub fn render(roots: &[PyObj], format: OutputFormat, ret: bool, truncated: bool) -> String {
    match format {
        OutputFormat::Pseudocode => pseudocode::PseudocodeRenderer::new(roots).render(roots, ret, truncated),
        OutputFormat::Json => json::JsonRenderer::new(roots).render(roots, truncated),
    }
}
