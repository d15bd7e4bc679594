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

//! End-to-end tests driving [`pickle_decompiler::decompile`] over
//! hand-assembled pickle opcode streams, replaying spec.md §8's six
//! scenarios plus the invariants (P1-P7) they exist to exercise.

use rand::distributions::Alphanumeric;
use rand::Rng;

use pickle_decompiler::{decompile, Config, OutputFormat};

/// Hand-assembled opcode byte builders, the same style as
/// `benches/benchmark.rs`'s `list_of_ints`/`self_referential_reduce`: no
/// Python dependency, just the raw mnemonic bytes from `pickle.py`.
mod pickle_bytes {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const DUP: u8 = b'2';
    pub const POP: u8 = b'0';
    pub const BININT1: u8 = b'K';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const BINGET: u8 = b'h';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const SETITEM: u8 = b's';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';

    pub const NEWOBJ: u8 = b'\x81';
    pub const TUPLE1: u8 = b'\x85';
    pub const TUPLE2: u8 = b'\x86';
    pub const NEWTRUE: u8 = b'\x88';
    pub const NEWFALSE: u8 = b'\x89';

    pub const SHORT_BINUNICODE: u8 = b'\x8c';
    pub const STACK_GLOBAL: u8 = b'\x93';
    pub const MEMOIZE: u8 = b'\x94';

    pub const PERSID: u8 = b'P';

    pub fn global(modname: &str, name: &str) -> Vec<u8> {
        let mut out = vec![GLOBAL];
        out.extend_from_slice(modname.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
        out
    }

    pub fn binint1(v: u8) -> Vec<u8> {
        vec![BININT1, v]
    }

    pub fn short_unicode(s: &str) -> Vec<u8> {
        let mut out = vec![SHORT_BINUNICODE, s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    pub fn binget(slot: u8) -> Vec<u8> {
        vec![BINGET, slot]
    }
}

use pickle_bytes as pb;

fn run(input: &[u8]) -> pickle_decompiler::driver::DecompileResult {
    decompile(input, 0, &Config::default())
}

fn run_format(input: &[u8], format: OutputFormat) -> pickle_decompiler::driver::DecompileResult {
    let config = Config {
        format,
        ..Config::default()
    };
    decompile(input, 0, &config)
}

// -- spec.md §8 scenario 1: `]94.` ------------------------------------------

#[test]
fn scenario_empty_memoized_list() {
    let input = [pb::EMPTY_LIST, pb::MEMOIZE, pb::STOP];
    let result = run(&input);
    assert!(result.success);
    assert!(!result.truncated);
    assert_eq!(result.output, "var_0 = []\nreturn var_0");
}

// -- spec.md §8 scenario 2: `](K\x01K\x02K\x03e.` ---------------------------

#[test]
fn scenario_list_built_via_mark_and_appends() {
    let mut input = vec![pb::EMPTY_LIST, pb::MARK];
    input.extend(pb::binint1(1));
    input.extend(pb::binint1(2));
    input.extend(pb::binint1(3));
    input.push(pb::APPENDS);
    input.push(pb::STOP);

    let result = run(&input);
    assert!(result.success);
    assert_eq!(result.output, "var_0 = [1, 2, 3]\nreturn var_0");
}

// -- spec.md §8 scenario 3: the self-referential list via DUP+APPEND --------

#[test]
fn scenario_self_referential_list() {
    let input = [pb::EMPTY_LIST, pb::DUP, pb::APPEND, pb::STOP];
    let result = run(&input);
    assert!(result.success);
    assert!(!result.truncated);
    // Must terminate (it does, or this test would hang/stack-overflow), must
    // not double-free (nothing to observe directly here, see
    // `deep_release_self_referential_list_terminates` below), and must
    // render the cycle as a post-fix statement rather than an infinite
    // literal (P7).
    assert_eq!(
        result.output,
        "var_0 = []\nvar_0.append(var_0)\nreturn var_0"
    );
}

// -- spec.md §8 scenario 4: `cbuiltins\nlist\n)R.` --------------------------

#[test]
fn scenario_reduce_with_no_args() {
    let mut input = pb::global("builtins", "list");
    input.push(pb::EMPTY_TUPLE);
    input.push(pb::REDUCE);
    input.push(pb::STOP);

    let result = run(&input);
    assert!(result.success);
    assert_eq!(
        result.output,
        "var_0 = __import__(\"builtins\").list\nvar_0 = var_0(())\nreturn var_0"
    );
}

// -- spec.md §8 scenario 5: reduce called with a plain (non-cyclic) list ----

#[test]
fn scenario_reduce_with_list_argument() {
    let mut input = pb::global("builtins", "list");
    input.push(pb::EMPTY_LIST);
    input.push(pb::MARK);
    input.extend(pb::binint1(1));
    input.extend(pb::binint1(2));
    input.push(pb::APPENDS);
    input.push(pb::TUPLE1);
    input.push(pb::REDUCE);
    input.push(pb::STOP);

    let result = run(&input);
    assert!(result.success);
    // Declare-before-use: var_1 ([1, 2]) must appear before its use inside
    // var_0's reduce call (spec.md §5's topological-order guarantee), and no
    // Split back-reference should appear since this argument list is
    // perfectly ordinary (spec.md §4.3's "contains_ref" fast exit).
    let decl = result.output.find("var_1 = [1, 2]").expect("list declared");
    let use_site = result
        .output
        .find("var_0 = var_0((var_1,))")
        .expect("reduce call present");
    assert!(decl < use_site);
    assert!(result.output.contains("var_0 = __import__(\"builtins\").list"));
    assert!(result.output.ends_with("return var_0"));
}

// -- spec.md §8 scenario 6: REDUCE whose own result appears in its own -----
// -- argument subtree, via a prior memo bind of the same What chain. -------

#[test]
fn scenario_reduce_with_cyclic_argument_via_split() {
    let mut input = pb::global("mypkg", "MyClass");
    input.push(pb::EMPTY_TUPLE);
    input.push(pb::NEWOBJ);
    input.push(pb::MEMOIZE);
    input.push(pb::EMPTY_LIST);
    input.push(pb::MARK);
    input.extend(pb::binget(0));
    input.push(pb::APPENDS);
    input.push(pb::TUPLE1);
    input.push(pb::REDUCE);
    input.push(pb::STOP);

    let result = run(&input);
    assert!(result.success);
    assert_eq!(
        result.output,
        "var_0 = __import__(\"mypkg\").MyClass\n\
         var_0 = var_0.__new__(var_0, *())\n\
         var_1 = []\n\
         var_1.append(var_0)\n\
         var_0 = var_0((var_1,))\n\
         return var_0"
    );
}

// -- P5/P6: a value shared (not cyclic) through two tuple slots is ----------
// -- declared once and referenced by name on its second occurrence. --------

#[test]
fn shared_non_cyclic_value_declared_once() {
    let input = [
        pb::EMPTY_LIST,
        pb::MEMOIZE,
        pb::BINGET,
        0,
        pb::TUPLE2,
        pb::STOP,
    ];
    let result = run(&input);
    assert!(result.success);
    assert_eq!(
        result.output,
        "var_0 = []\nvar_1 = (var_0, var_0)\nreturn var_1"
    );
}

// -- Renderer/JSON: same hoist/naming rules, different syntax. --------------

#[test]
fn json_output_for_empty_memoized_list() {
    let input = [pb::EMPTY_LIST, pb::MEMOIZE, pb::STOP];
    let result = run_format(&input, OutputFormat::Json);
    assert!(result.success);
    assert_eq!(
        result.output,
        "{\n\
         \u{20}\u{20}\"vars\": {\n\
         \u{20}\u{20}\u{20}\u{20}\"var_0\": {\"$type\": \"list\", \"items\": []}\n\
         \u{20}\u{20}},\n\
         \u{20}\u{20}\"result\": [{\"$ref\": \"var_0\"}],\n\
         \u{20}\u{20}\"truncated\": false\n\
         }"
    );
}

// -- spec.md §4.1: unsupported opcodes are a recoverable failure, not a ----
// -- panic, and still produce best-effort output (spec.md §6). -------------

#[test]
fn unsupported_opcode_truncates_instead_of_panicking() {
    let mut input = vec![pb::PERSID];
    input.extend_from_slice(b"some-id\n");
    let result = run(&input);
    assert!(!result.success);
    assert!(result.truncated);
    assert!(result.output.contains("truncated"));
}

// -- spec.md §3 invariant: Func's module/name are always Str. STACK_GLOBAL --
// -- takes both off the value stack, so a malformed stream can violate this;
// -- the interpreter must report it rather than panic during rendering. ----

#[test]
fn stack_global_with_non_str_operands_is_reported_not_panicked() {
    let input = [
        pb::BININT1,
        1,
        pb::BININT1,
        2,
        pb::STACK_GLOBAL,
        pb::STOP,
    ];
    let result = run(&input);
    assert!(!result.success);
    assert!(result.truncated);
}

// -- spec.md §4.1: BUILD applied to a Func via a symbolic chain, and -------
// -- dict literal rendering (no cycles). ------------------------------------

#[test]
fn build_and_dict_rendering() {
    let mut input = pb::global("copyreg", "_reconstructor");
    input.push(pb::EMPTY_TUPLE);
    input.push(pb::REDUCE);
    input.push(pb::EMPTY_DICT);
    input.push(pb::MARK);
    input.extend(pb::short_unicode("x"));
    input.extend(pb::binint1(1));
    input.push(pb::SETITEMS);
    input.push(pb::BUILD);
    input.push(pb::STOP);

    let result = run(&input);
    assert!(result.success);
    assert!(result.output.contains("var_1 = {\"x\": 1}"));
    assert!(result.output.contains("var_0.__setstate__(var_1)"));
}

// -- Scalar family smoke test: None/True/False/string render as Python -----
// -- literals, not as their pickle mnemonics. -------------------------------

#[test]
fn scalar_literals_render_as_python_syntax() {
    let mut input = vec![pb::EMPTY_LIST, pb::MARK];
    input.push(pb::NONE);
    input.push(pb::NEWTRUE);
    input.push(pb::NEWFALSE);
    input.extend(pb::short_unicode("hi"));
    input.push(pb::APPENDS);
    input.push(pb::STOP);

    let result = run(&input);
    assert!(result.success);
    assert_eq!(
        result.output,
        "var_0 = [None, True, False, \"hi\"]\nreturn var_0"
    );
}

// -- Randomized: flat lists of small ints built via MARK/APPENDS, a -------
// -- property the fixed scenarios above don't vary (length, values). ------

#[test]
fn random_flat_int_lists_roundtrip_through_pseudocode() {
    let mut rng = rand::thread_rng();
    for _ in 0..25 {
        let n: u8 = rng.gen_range(0..12);
        let values: Vec<u8> = (0..n).map(|_| rng.gen()).collect();

        let mut input = vec![pb::EMPTY_LIST, pb::MARK];
        for &v in &values {
            input.extend(pb::binint1(v));
        }
        input.push(pb::APPENDS);
        input.push(pb::STOP);

        let result = run(&input);
        assert!(result.success, "input {values:?} failed to decompile");

        let expected_items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let expected = format!("var_0 = [{}]\nreturn var_0", expected_items.join(", "));
        assert_eq!(result.output, expected, "input was {values:?}");
    }
}

// -- Randomized: flat dicts of short ASCII string keys mapped to small ----
// -- ints, built via EMPTY_DICT/MARK/SETITEMS. ------------------------------

#[test]
fn random_flat_dicts_roundtrip_through_pseudocode() {
    let mut rng = rand::thread_rng();
    for _ in 0..25 {
        let n: u8 = rng.gen_range(0..8);
        let mut pairs = Vec::new();
        for i in 0..n {
            let key: String = (&mut rng)
                .sample_iter(Alphanumeric)
                .take(3)
                .map(char::from)
                .map(|c| c.to_ascii_lowercase())
                .collect();
            // Disambiguate to avoid accidental key collisions across draws.
            let key = format!("{key}{i}");
            let value: u8 = rng.gen();
            pairs.push((key, value));
        }

        let mut input = vec![pb::EMPTY_DICT, pb::MARK];
        for (k, v) in &pairs {
            input.extend(pb::short_unicode(k));
            input.extend(pb::binint1(*v));
        }
        input.push(pb::SETITEMS);
        input.push(pb::STOP);

        let result = run(&input);
        assert!(result.success, "pairs {pairs:?} failed to decompile");

        let expected_entries: Vec<String> = pairs
            .iter()
            .map(|(k, v)| format!("\"{k}\": {v}"))
            .collect();
        let expected = format!("var_0 = {{{}}}\nreturn var_0", expected_entries.join(", "));
        assert_eq!(result.output, expected, "pairs were {pairs:?}");
    }
}

// -- Fuzz: arbitrary byte streams must never panic the interpreter, the ----
// -- renderer, or `deep_release` (spec.md §7's "never throws across an ----
// -- operation boundary" / P4's "zero leaks, zero double frees"). Either ---
// -- outcome (clean decompile or a reported, truncated failure) is fine; ---
// -- a panic is the only unacceptable result. -------------------------------

quickcheck::quickcheck! {
    fn fuzz_never_panics(data: Vec<u8>) -> bool {
        let result = decompile(&data, 0, &Config::default());
        let _ = result.output.len();
        true
    }
}

#[test]
fn empty_input_is_handled_gracefully() {
    // No bytes means no error was ever raised, just nothing to stop on, so
    // this is a truncated-but-"successful" run producing an empty program.
    let result = run(&[]);
    assert!(result.success);
    assert!(result.truncated);
    assert!(result.output.contains("truncated"));
}

// -- spec.md §3 P4: a self-referential object that never reaches a root ----
// -- (discarded via POP, so only `popstack` still owns it) must still be ---
// -- torn down without hanging or panicking when the run finishes. ---------

#[test]
fn discarded_self_referential_object_does_not_hang_teardown() {
    let input = [
        pb::EMPTY_LIST,
        pb::DUP,
        pb::APPEND,
        pb::POP,
        pb::BININT1,
        7,
        pb::STOP,
    ];
    let result = run(&input);
    assert!(result.success);
    // The popped cycle never reaches a render root, so only the later
    // pushed scalar shows up in the output.
    assert_eq!(result.output, "var_0 = 7\nreturn var_0");
}

#[test]
fn truncated_stream_without_stop_still_renders_best_effort() {
    // A well-formed list with no STOP: the driver runs out of input and
    // marks the run truncated, but the renderer still emits what exists.
    let mut input = vec![pb::EMPTY_LIST, pb::MARK];
    input.extend(pb::binint1(7));
    input.push(pb::APPENDS);
    // no STOP
    let result = run(&input);
    assert!(result.success);
    assert!(result.truncated);
    assert!(result.output.contains("[7]"));
}

// -- Direct graph construction, bypassing opcode bytes entirely. Builds on --
// -- the teacher's `pyobj!` idea (a macro shorthand for `Value` literals), --
// -- generalized here into `PyObj`/`PyOper` graph builders so renderer ----
// -- behavior (hoisting, sharing, `Split` resolution) can be exercised ----
// -- directly against `render::render`, without a VM run in between. ------

use pickle_decompiler::object::{self, OperKind, PyObjKind};
use pickle_decompiler::render;

macro_rules! pyobj {
    (n=None) => {
        object::new_obj(PyObjKind::None, 0)
    };
    (b=$b:expr) => {
        object::new_obj(PyObjKind::Bool($b), 0)
    };
    (i=$i:expr) => {
        object::new_obj(PyObjKind::Int(num_bigint::BigInt::from($i)), 0)
    };
    (s=$s:expr) => {
        object::new_obj(PyObjKind::Str(object::StrPayload::text($s)), 0)
    };
    (t=[$($v:expr),* $(,)?]) => {
        object::new_obj(PyObjKind::Tuple(vec![$($v),*]), 0)
    };
    (l=[$($v:expr),* $(,)?]) => {
        object::new_obj(PyObjKind::List(vec![$($v),*]), 0)
    };
}

macro_rules! pyop {
    ($op:ident, [$($v:expr),* $(,)?]) => {
        object::new_oper(OperKind::$op, vec![$($v),*])
    };
}

#[test]
fn hand_built_shared_scalar_is_hoisted_once() {
    let forty_two = pyobj!(i = 42);
    let list = pyobj!(l = [forty_two.clone(), forty_two]);

    let output = render::render(
        &[list],
        OutputFormat::Pseudocode,
        true,
        false,
    );

    let decl = output.find("var_1 = 42").expect("shared scalar hoisted");
    let use_site = output
        .find("var_0 = [var_1, var_1]")
        .expect("list references the hoisted name twice");
    assert!(decl < use_site);
    // The literal itself appears exactly once: the second occurrence is a
    // bare name reference, not a re-declaration.
    assert_eq!(output.matches("42").count(), 1);
}

#[test]
fn hand_built_reduce_with_self_referential_split() {
    // The same shape as `scenario_reduce_with_cyclic_argument_via_split`,
    // but assembled directly instead of replayed from opcode bytes: a
    // `What` whose `Reduce` operator's own argument list contains a list
    // that in turn holds a `Split` back to that same operator.
    let cls = pyobj!(s = "MyClass");
    let new_args = pyobj!(t = []);
    let newobj_oper = pyop!(NewObj, [new_args]);
    let what = object::new_obj(PyObjKind::What(vec![pyop!(FakeInit, [cls])]), 0);
    if let PyObjKind::What(chain) = &mut what.borrow_mut().kind {
        chain.push(newobj_oper);
    }

    let inner_list = object::new_obj(PyObjKind::List(vec![]), 0);
    let reduce_args = pyobj!(t = [inner_list.clone()]);
    let reduce_oper = pyop!(Reduce, [reduce_args]);
    if let PyObjKind::List(items) = &mut inner_list.borrow_mut().kind {
        items.push(object::new_obj(PyObjKind::Split(reduce_oper.clone()), 0));
    }
    if let PyObjKind::What(chain) = &mut what.borrow_mut().kind {
        chain.push(reduce_oper);
    }

    let output = render::render(
        &[what],
        OutputFormat::Pseudocode,
        true,
        false,
    );

    assert_eq!(
        output,
        "var_0 = \"MyClass\"\n\
         var_0 = var_0.__new__(var_0, *())\n\
         var_1 = []\n\
         var_1.append(var_0)\n\
         var_0 = var_0((var_1,))\n\
         return var_0"
    );
}
