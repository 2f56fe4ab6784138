//! Benchmarks for the metered interpreter.

#![allow(missing_docs)] // Benchmark macros generate undocumented functions

use std::collections::BTreeMap;
use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use bytecage::control::DetachedGame;
use bytecage::output::TeamOutput;
use bytecage::{EngineConfig, Program, RobotDescriptor, RobotId, SandboxedPlayer, Team};

const SPINNER: &str = "\
.routine run 0
.locals 1
    push 0
    store 0
spin:
    load 0
    push 7
    mul
    push 3
    add
    store 0
    jump spin
.end
";

const CALLER: &str = "\
.routine run 0
.locals 1
    push 0
    store 0
loop:
    load 0
    call step 1
    store 0
    jump loop
.end

.routine step 1
    load 0
    push 1
    add
    ret
.end
";

const ALLOCATOR: &str = "\
.routine run 0
loop:
    push 16
    newarray
    pop
    jump loop
.end
";

fn player(source: &str, ceiling: i32) -> SandboxedPlayer {
    let units: BTreeMap<String, String> = [("b/RobotPlayer".to_string(), source.to_string())].into();
    let program = Arc::new(Program::from_units("bench", units, false));
    let descriptor = RobotDescriptor {
        id: RobotId::new(1),
        team: Team::A,
        kind: "SOLDIER".into(),
        ceiling,
    };
    match SandboxedPlayer::spawn(program, descriptor, &EngineConfig::default(), None) {
        Ok(p) => p,
        Err(e) => panic!("bench program failed to load: {e}"),
    }
}

fn bench_turn(c: &mut Criterion, name: &str, source: &str) {
    let mut robot = player(source, 10_000);
    let mut output = TeamOutput::sink(Team::A);
    let mut round = 0;
    c.bench_function(name, |b| {
        b.iter(|| {
            round += 1;
            let _ = black_box(robot.step(round, &mut DetachedGame, &mut output));
        });
    });
}

fn bench_arithmetic(c: &mut Criterion) {
    bench_turn(c, "turn_10k_arithmetic", SPINNER);
}

fn bench_calls(c: &mut Criterion) {
    bench_turn(c, "turn_10k_calls", CALLER);
}

fn bench_allocation(c: &mut Criterion) {
    bench_turn(c, "turn_10k_arrays", ALLOCATOR);
}

fn bench_spawn(c: &mut Criterion) {
    c.bench_function("spawn_robot", |b| {
        b.iter(|| black_box(player(CALLER, 10_000)));
    });
}

criterion_group!(benches, bench_arithmetic, bench_calls, bench_allocation, bench_spawn);
criterion_main!(benches);
