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

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pickle_decompiler::{decompile, Config, OutputFormat};

/// Pickles `[0, 1, .., n-1]` under protocol 4: `PROTO 4 EMPTY_LIST MEMOIZE
/// MARK (BININT <i> APPEND1)* APPENDS STOP`. Built by hand rather than via
/// `pickle` so the benchmark has no Python dependency.
fn list_of_ints(n: u32) -> Vec<u8> {
    let mut out = vec![0x80, 0x04, 0x5d, 0x94, 0x28];
    for i in 0..n {
        out.push(0x4a); // BININT
        out.extend_from_slice(&i.to_le_bytes());
    }
    out.push(0x65); // APPENDS
    out.push(0x2e); // STOP
    out
}

/// A reduce chain with a self-referential argument tuple: `obj =
/// object(); obj.__setstate__((obj,))`, exercising `Split` propagation
/// end to end.
fn self_referential_reduce() -> Vec<u8> {
    let mut out = vec![0x80, 0x04];
    out.push(0x63); // GLOBAL
    out.extend_from_slice(b"builtins\n");
    out.extend_from_slice(b"object\n");
    out.push(0x29); // EMPTY_TUPLE
    out.push(0x52); // REDUCE
    out.push(0x94); // MEMOIZE
    out.push(0x68); // BINGET
    out.push(0x00);
    out.push(0x85); // TUPLE1
    out.push(0x62); // BUILD
    out.push(0x2e); // STOP
    out
}

fn bench_decompile_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompile_list_of_ints");
    for size in [10u32, 100, 1000] {
        let input = list_of_ints(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| {
                let result = decompile(black_box(input), 0, &Config::default());
                black_box(result.output)
            });
        });
    }
    group.finish();
}

fn bench_decompile_formats(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompile_output_format");
    let input = list_of_ints(200);

    group.bench_function("pseudocode", |b| {
        let config = Config {
            format: OutputFormat::Pseudocode,
            ..Config::default()
        };
        b.iter(|| black_box(decompile(black_box(&input), 0, &config).output));
    });

    group.bench_function("json", |b| {
        let config = Config {
            format: OutputFormat::Json,
            ..Config::default()
        };
        b.iter(|| black_box(decompile(black_box(&input), 0, &config).output));
    });

    group.finish();
}

fn bench_decompile_self_referential(c: &mut Criterion) {
    let input = self_referential_reduce();
    c.bench_function("decompile_self_referential_reduce", |b| {
        b.iter(|| {
            let result = decompile(black_box(&input), 0, &Config::default());
            black_box(result.output)
        });
    });
}

criterion_group!(
    benches,
    bench_decompile_list,
    bench_decompile_formats,
    bench_decompile_self_referential
);
criterion_main!(benches);
