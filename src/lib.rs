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

//! A symbolic decompiler for Python's pickle format. Rather than
//! unpickling into live Rust values, [`vm::Vm`] interprets an opcode
//! stream into a graph of [`object::PyObj`] nodes — constructing directly
//! where a value can be built safely, and recording a [`object::OperKind`]
//! chain ("what would have been called, with what") where it can't.
//! [`render`] turns that graph into Python-like pseudocode or JSON;
//! [`driver::decompile`] wires disassembly, interpretation and rendering
//! together into a single entry point.

pub mod disasm;
pub mod driver;
pub mod error;
pub mod object;
pub mod opcode;
pub mod render;
pub mod vm;

pub use driver::{decompile, Config, DecompileResult};
pub use error::{ErrorCode, PickleError, Result};
pub use render::OutputFormat;
