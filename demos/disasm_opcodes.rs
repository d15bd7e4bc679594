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

//! A host wiring exercise, not part of the decompiler core: reads a
//! pickle file (or a built-in sample if no path is given) and prints its
//! pseudocode or JSON decompilation. Shows how little glue
//! [`pickle_decompiler::decompile`] needs around it.

use std::env;
use std::fs;
use std::process::ExitCode;

use pickle_decompiler::{decompile, Config, OutputFormat};

/// `(ascii '\x80\x04' PROTO 4) -> EMPTY_LIST -> MEMOIZE -> BININT1 1 ->
/// APPEND -> STOP`: pickles `[1]`, used when no file argument is given.
const SAMPLE: &[u8] = &[
    0x80, 0x04, // PROTO 4
    0x5d, // EMPTY_LIST
    0x94, // MEMOIZE
    0x4b, 0x01, // BININT1 1
    0x61, // APPEND
    0x2e, // STOP
];

fn main() -> ExitCode {
    env_logger::init();

    let mut args = env::args().skip(1);
    let mut format = OutputFormat::Pseudocode;
    let mut path: Option<String> = None;

    for arg in &mut args {
        match arg.as_str() {
            "--json" => format = OutputFormat::Json,
            "--pseudocode" => format = OutputFormat::Pseudocode,
            other => path = Some(other.to_string()),
        }
    }

    let input = match path {
        Some(path) => match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("failed to read {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => SAMPLE.to_vec(),
    };

    let config = Config {
        format,
        ..Config::default()
    };
    let result = decompile(&input, 0, &config);

    println!("{}", result.output);
    if result.truncated {
        eprintln!("warning: decompilation truncated");
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
