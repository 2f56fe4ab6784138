//! Whole-match behaviour: determinism, isolation, dynamic allocation cost
//! and debug routines.
//!
//! Run with: cargo test --release --test matches

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;

use bytecage::control::{GameActionError, GameApi, HostCall, HostValue};
use bytecage::output::TeamOutput;
use bytecage::program::DirectorySource;
use bytecage::vm::Value;
use bytecage::{
    Arena, ArenaConfig, EngineConfig, MatchReport, PlayerControlProvider, Program,
    RobotControlProvider, RobotDescriptor, RobotId, Team, TeamControlProvider,
};

fn load_bot(name: &str) -> Arc<Program> {
    let root = format!("{}/bots/{name}", env!("CARGO_MANIFEST_DIR"));
    Arc::new(Program::open(&DirectorySource::new(root), false).unwrap())
}

fn inline_program(source: &str, debug_methods: bool) -> Arc<Program> {
    let units: BTreeMap<String, String> =
        [("t/RobotPlayer".to_string(), source.to_string())].into();
    Arc::new(Program::from_units("inline", units, debug_methods))
}

fn robot(id: u32, ceiling: i32) -> RobotDescriptor {
    RobotDescriptor {
        id: RobotId::new(id),
        team: Team::A,
        kind: "SOLDIER".into(),
        ceiling,
    }
}

fn play(a: &Arc<Program>, b: &Arc<Program>, seed: u64) -> MatchReport {
    let config = EngineConfig {
        seed,
        ..EngineConfig::default()
    };
    let mut provider = TeamControlProvider::new()
        .with_team(
            Team::A,
            Box::new(PlayerControlProvider::new(
                Arc::clone(a),
                config.clone(),
                TeamOutput::sink(Team::A),
            )),
        )
        .with_team(
            Team::B,
            Box::new(PlayerControlProvider::new(
                Arc::clone(b),
                config,
                TeamOutput::sink(Team::B),
            )),
        );
    Arena::new(ArenaConfig {
        rounds: 100,
        robots_per_team: 4,
        seed,
        ..ArenaConfig::default()
    })
    .run(&mut provider)
    .unwrap()
}

/// Answers `getRoundNum` with a fixed value and everything else with null.
struct FixedGame(i32);

impl GameApi for FixedGame {
    fn invoke(&mut self, call: &mut HostCall) -> Result<HostValue, GameActionError> {
        match call.method() {
            "getRoundNum" => Ok(HostValue::Int(self.0)),
            _ => Ok(HostValue::Null),
        }
    }
}

/// Runs one turn per size and returns the bytecodes each turn used.
fn turn_costs(source: &str, sizes: &[i32]) -> Vec<i32> {
    let (output, _) = TeamOutput::capture(Team::A);
    let mut p = PlayerControlProvider::new(
        inline_program(source, false),
        EngineConfig::default(),
        output,
    );
    let id = RobotId::new(1);
    p.robot_spawned(&robot(1, 10_000)).unwrap();
    sizes
        .iter()
        .enumerate()
        .map(|(round, &size)| {
            p.round_started(u32::try_from(round).unwrap() + 1);
            p.run_robot(id, &mut FixedGame(size)).unwrap();
            assert!(!p.has_terminated(id));
            p.bytecodes_used(id)
        })
        .collect()
}

#[test]
fn test_same_seed_replays_identically() {
    let fighter = load_bot("fighter");
    let counter = load_bot("counter");
    let first = play(&fighter, &counter, 42);
    let second = play(&fighter, &counter, 42);
    assert_eq!(first.digest, second.digest);
    assert_eq!(first.events, second.events);
    assert_eq!(first.robots, second.robots);
    assert!(
        first
            .events
            .iter()
            .any(|e| matches!(e, bytecage::arena::ArenaEvent::Broadcast { .. }))
    );
}

#[test]
fn test_fighters_damage_each_other() {
    let fighter = load_bot("fighter");
    let report = play(&fighter, &fighter, 7);
    let attacks = report
        .events
        .iter()
        .filter(|e| matches!(e, bytecage::arena::ArenaEvent::Attack { .. }))
        .count();
    let damage: i32 = report.robots.iter().map(|r| 100 - r.hp).sum();
    assert_eq!(damage, i32::try_from(attacks).unwrap() * 10);
}

#[test]
fn test_array_allocation_cost_scales_with_length() {
    let source = "\
.routine run 0
    call bc/RobotController.getRoundNum 0
    newarray
    pop
    return
.end
";
    let used = turn_costs(source, &[2, 4, 8, 16]);
    let base = 2 * used[0] - used[1];
    for (used, expected) in used.iter().zip([2, 4, 8, 16]) {
        assert_eq!(*used, base + expected);
    }
}

#[test]
fn test_multi_array_cost_is_product_of_dimensions() {
    let source = "\
.routine run 0
    push 2
    push 3
    push 4
    call bc/RobotController.getRoundNum 0
    newmulti 4
    pop
    return
.end
";
    let used = turn_costs(source, &[1, 6, 36, 216]);
    let base = (6 * used[0] - used[1]) / 5;
    for (used, expected) in used.iter().zip([24, 144, 864, 5184]) {
        assert_eq!(*used, base + expected);
    }
}

const DEBUGGED: &str = "\
.unit t/RobotPlayer
.static traced

.routine run 0
    call debug_trace 0
    pop
    return
.end

.routine debug_trace 0
.locals 1
    push 0
    store 0
loop:
    load 0
    push 1
    add
    dup
    store 0
    push 1000
    lt
    jumpif loop
    push 1
    putstatic traced
    return
.end
";

fn run_debugged(debug_methods: bool) -> (i32, Value) {
    let (output, _) = TeamOutput::capture(Team::A);
    let mut p = PlayerControlProvider::new(
        inline_program(DEBUGGED, debug_methods),
        EngineConfig::default(),
        output,
    );
    let id = RobotId::new(1);
    p.robot_spawned(&robot(1, 500)).unwrap();
    p.run_robot(id, &mut FixedGame(1)).unwrap();
    assert!(!p.has_terminated(id));
    let traced = p
        .player(id)
        .unwrap()
        .context()
        .static_value("t/RobotPlayer", "traced")
        .unwrap()
        .clone();
    (p.bytecodes_used(id), traced)
}

#[test]
fn test_debug_routines_elided_when_disabled() {
    let (used, traced) = run_debugged(false);
    assert!(traced.same(&Value::Null));
    assert!(used < 500);
}

#[test]
fn test_debug_routines_run_free_when_enabled() {
    let (used, traced) = run_debugged(true);
    assert!(traced.same(&Value::Int(1)));
    assert!(used < 500, "debug work must not be charged, used {used}");
}

const SEEDED: &str = "\
.unit t/RobotPlayer
.static roll
.static stamp

.routine run 0
    call std/Random.new 0
    push 1000000
    call std/Random.nextInt 2
    putstatic roll
    call std/Random.new 0
    call std/System.identityHashCode 1
    putstatic stamp
    return
.end
";

fn seeded_statics(seed: u64, id: u32) -> (Value, Value) {
    let config = EngineConfig {
        seed,
        ..EngineConfig::default()
    };
    let mut p = PlayerControlProvider::new(
        inline_program(SEEDED, false),
        config,
        TeamOutput::sink(Team::A),
    );
    p.robot_spawned(&robot(id, 10_000)).unwrap();
    p.run_robot(RobotId::new(id), &mut FixedGame(1)).unwrap();
    let ctx = p.player(RobotId::new(id)).unwrap().context();
    (
        ctx.static_value("t/RobotPlayer", "roll").unwrap().clone(),
        ctx.static_value("t/RobotPlayer", "stamp").unwrap().clone(),
    )
}

#[test]
fn test_randomness_and_identity_hashes_are_seeded() {
    let (roll_a, stamp_a) = seeded_statics(9, 3);
    let (roll_b, stamp_b) = seeded_statics(9, 3);
    assert!(roll_a.same(&roll_b));
    assert!(stamp_a.same(&stamp_b));
    assert!(matches!(roll_a, Value::Int(v) if (0..1_000_000).contains(&v)));
}

const DOUBLING: &str = "\
.unit t/RobotPlayer
.routine run 0
.locals 2
    pushs \"ab\"
    store 0
    push 0
    store 1
grow:
    load 0
    load 0
    call std/String.concat 2
    store 0
    load 1
    push 1
    add
    dup
    store 1
    push 13
    lt
    jumpif grow
grow_end:
    return
swallow:
    pop
    return
.try grow grow_end swallow
.end
";

fn run_doubling(max_heap_cells: usize) -> (bool, String) {
    let (output, captured) = TeamOutput::capture(Team::A);
    let config = EngineConfig {
        max_heap_cells,
        ..EngineConfig::default()
    };
    let mut p = PlayerControlProvider::new(inline_program(DOUBLING, false), config, output);
    let id = RobotId::new(1);
    p.robot_spawned(&robot(1, 10_000)).unwrap();
    p.run_robot(id, &mut FixedGame(1)).unwrap();
    (p.has_terminated(id), captured.contents())
}

#[test]
fn test_built_strings_count_against_the_heap() {
    let (terminated, _) = run_doubling(EngineConfig::default().max_heap_cells);
    assert!(!terminated);

    let (terminated, text) = run_doubling(4_096);
    assert!(terminated);
    assert!(text.contains("sys/OutOfMemory"), "{text}");
}
