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

//! The top-level entry point, spec.md §2's driver: disassemble-then-step
//! in a loop until `STOP`, end of input, or a fatal error, then render
//! whatever the VM built regardless of how the run ended. A host embeds
//! its own [`crate::disasm::Disassembler`]/[`crate::disasm::ByteSource`]
//! when it has one; this entry point always drives [`SliceDisassembler`]
//! over an in-memory slice, which is enough for a standalone consumer and
//! for the demo binary.

use std::rc::Rc;

use crate::disasm::{ByteSource, Disassembler, SliceDisassembler};
use crate::error::ErrorCode;
use crate::object::PyObj;
use crate::render::{self, OutputFormat};
use crate::vm::{self, StepOutcome, Vm};

/// Driver-level configuration, extending [`vm::Config`] with the output
/// format choice from spec.md §6.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Whether `STOP` terminates the run (default true).
    pub break_on_stop: bool,
    /// Enables debug commentary in the renderer output.
    pub verbose: bool,
    pub format: OutputFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            break_on_stop: true,
            verbose: false,
            format: OutputFormat::Pseudocode,
        }
    }
}

/// The decompiled text plus how the run ended, per spec.md §6.
#[derive(Debug)]
pub struct DecompileResult {
    pub output: String,
    /// False if disassembly or interpretation hit a fatal error.
    pub success: bool,
    /// True if the graph was rendered from a partial run.
    pub truncated: bool,
}

/// Drives a pickle opcode stream starting at `start` to completion (or
/// failure), then renders the resulting object graph. Never panics on
/// malformed input: every failure path still returns a best-effort
/// [`DecompileResult`] built from whatever the VM had constructed so far.
pub fn decompile(input: &[u8], start: usize, opts: &Config) -> DecompileResult {
    let vm_config = vm::Config {
        break_on_stop: opts.break_on_stop,
        verbose: opts.verbose,
    };
    let mut vm = Vm::new(&vm_config, start);
    let mut disasm = SliceDisassembler::default();
    let src: &dyn ByteSource = &input;

    let mut offset = start;
    let mut stopped: Option<PyObj> = None;
    let mut success = true;

    while offset < input.len() {
        let decoded = match disasm.decode_next(src, offset) {
            Ok(d) => d,
            Err(e) => {
                log::error!("disassembly failed at offset {offset}: {e}");
                success = false;
                vm.state.truncated = true;
                break;
            }
        };

        match vm.step(src, &decoded) {
            Ok(StepOutcome::Continue) => {
                offset = decoded.offset + decoded.size;
            }
            Ok(StepOutcome::Stopped(obj)) => {
                offset = decoded.offset + decoded.size;
                stopped = Some(obj);
                break;
            }
            Err(e) => {
                log::error!(
                    "interpreter error at offset {offset} (opcode {}): {e}",
                    decoded.op.mnemonic()
                );
                success = false;
                vm.state.truncated = true;
                break;
            }
        }
    }

    if success && stopped.is_none() {
        log::warn!("reached end of input at offset {offset} without a STOP opcode");
        vm.state.truncated = true;
    }
    if stopped.is_some() && offset < input.len() {
        log::warn!(
            "{}: {} trailing byte(s) after STOP",
            ErrorCode::TrailingBytes,
            input.len() - offset
        );
    }

    let render_roots: Vec<PyObj> = match &stopped {
        Some(obj) => vec![Rc::clone(obj)],
        None => vm.state.stack.clone(),
    };
    let truncated = vm.state.truncated;
    let output = render::render(&render_roots, opts.format, stopped.is_some(), truncated);

    // Deep release every object the VM still owns, not just what got
    // rendered: a discarded (POP'd) or still-marked self-referential object
    // reachable only from `popstack`/`metastack` would otherwise keep its
    // cycle alive forever (spec.md §3's P4, "every PyObj reachable from the
    // memo is also reachable from stack ∪ metastack ∪ popstack").
    let mut release_roots = render_roots;
    if let Some(obj) = stopped {
        release_roots.push(obj);
    } else {
        release_roots.extend(vm.state.stack.drain(..));
    }
    release_roots.extend(vm.state.metastack.drain(..).flatten());
    release_roots.extend(vm.state.popstack.drain(..));
    release_roots.extend(vm.state.memo.values().cloned());
    vm.deep_release(release_roots);

    DecompileResult {
        output,
        success,
        truncated,
    }
}
