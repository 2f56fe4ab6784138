//! End-to-end robot lifecycle scenarios.
//!
//! Each test drives sandboxed robots through a control provider the way a
//! game layer would, using the sample programs under `bots/`.
//!
//! Run with: cargo test --test scenarios

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;

use bytecage::control::{GameActionError, GameApi, HostCall, HostValue};
use bytecage::monitor::MonitorState;
use bytecage::output::{CapturedOutput, TeamOutput};
use bytecage::program::DirectorySource;
use bytecage::vm::Value;
use bytecage::{
    Arena, ArenaConfig, EngineConfig, InstrumentationKind, PlayerControlProvider, Program,
    RobotControlProvider, RobotDescriptor, RobotId, SpawnOutcome, Team, TeamControlProvider,
};

fn load_bot(name: &str) -> Arc<Program> {
    let root = format!("{}/bots/{name}", env!("CARGO_MANIFEST_DIR"));
    Arc::new(Program::open(&DirectorySource::new(root), false).unwrap())
}

fn inline_program(unit: &str, source: &str) -> Arc<Program> {
    let units: BTreeMap<String, String> = [(unit.to_string(), source.to_string())].into();
    Arc::new(Program::from_units("inline", units, false))
}

fn provider(program: Arc<Program>) -> (PlayerControlProvider, CapturedOutput) {
    let (output, captured) = TeamOutput::capture(Team::A);
    (
        PlayerControlProvider::new(program, EngineConfig::default(), output),
        captured,
    )
}

fn robot(id: u32, ceiling: i32) -> RobotDescriptor {
    RobotDescriptor {
        id: RobotId::new(id),
        team: Team::A,
        kind: "SOLDIER".into(),
        ceiling,
    }
}

/// Answers every host call with null; `disintegrate` kills the caller.
struct SelfDestructGame;

impl GameApi for SelfDestructGame {
    fn invoke(&mut self, call: &mut HostCall) -> Result<HostValue, GameActionError> {
        if call.method() == "disintegrate" {
            call.kill_caller();
        }
        Ok(HostValue::Null)
    }
}

#[test]
fn test_empty_entry_point_yields_every_turn() {
    let (mut p, _) = provider(load_bot("idle"));
    let id = RobotId::new(1);
    assert_eq!(p.robot_spawned(&robot(1, 10_000)).unwrap(), SpawnOutcome::Ready);
    p.round_started(1);
    p.run_robot(id, &mut SelfDestructGame).unwrap();
    assert!(!p.has_terminated(id));
    let used = p.bytecodes_used(id);
    assert!(used > 0 && used < 10_000, "used {used}");
}

#[test]
fn test_infinite_loop_is_preempted() {
    let (mut p, _) = provider(load_bot("spinner"));
    let id = RobotId::new(1);
    p.robot_spawned(&robot(1, 100)).unwrap();
    p.round_started(1);
    p.run_robot(id, &mut SelfDestructGame).unwrap();
    assert!(!p.has_terminated(id));
    assert!(p.bytecodes_used(id) >= 100);
    for round in 2..=1001 {
        p.round_started(round);
        p.run_robot(id, &mut SelfDestructGame).unwrap();
        assert!(!p.has_terminated(id));
    }
}

#[test]
fn test_forbidden_capability_fails_to_load() {
    let (mut p, captured) = provider(load_bot("hacker"));
    let id = RobotId::new(1);
    let SpawnOutcome::FailedToLoad(err) = p.robot_spawned(&robot(1, 10_000)).unwrap() else {
        panic!("a program touching std/Net must not load");
    };
    assert_eq!(err.kind, InstrumentationKind::Illegal);
    assert_eq!(err.unit, "hacker/RobotPlayer");
    assert!(p.has_terminated(id));
    assert!(p.player(id).is_none());
    assert!(captured.contents().contains("failed to load"));
}

#[test]
fn test_failed_load_does_not_affect_other_team() {
    let config = EngineConfig::default();
    let mut provider = TeamControlProvider::new()
        .with_team(
            Team::A,
            Box::new(PlayerControlProvider::new(
                load_bot("hacker"),
                config.clone(),
                TeamOutput::sink(Team::A),
            )),
        )
        .with_team(
            Team::B,
            Box::new(PlayerControlProvider::new(
                load_bot("idle"),
                config,
                TeamOutput::sink(Team::B),
            )),
        );
    let arena = Arena::new(ArenaConfig {
        rounds: 5,
        robots_per_team: 2,
        ..ArenaConfig::default()
    });
    let report = arena.run(&mut provider).unwrap();
    for r in &report.robots {
        match r.team {
            Team::A => assert!(!r.alive, "robot {} should be destroyed at spawn", r.id),
            _ => assert!(r.alive, "robot {} should survive", r.id),
        }
    }
    assert_eq!(report.rounds_played, 5);
}

#[test]
fn test_counters_are_private_per_robot() {
    let (mut p, _) = provider(load_bot("counter"));
    let (a, b) = (RobotId::new(1), RobotId::new(2));
    p.robot_spawned(&robot(1, 10_000)).unwrap();
    p.robot_spawned(&robot(2, 10_000)).unwrap();
    for round in 1..=5 {
        p.round_started(round);
        p.run_robot(a, &mut SelfDestructGame).unwrap();
        p.run_robot(b, &mut SelfDestructGame).unwrap();
    }
    for id in [a, b] {
        let count = p
            .player(id)
            .unwrap()
            .context()
            .static_value("counter/Tally", "count")
            .unwrap();
        assert!(count.same(&Value::Int(5)), "robot {id} counted {count:?}");
    }
}

#[test]
fn test_self_kill_skips_player_handlers() {
    let (mut p, captured) = provider(load_bot("quitter"));
    let id = RobotId::new(1);
    p.robot_spawned(&robot(1, 10_000)).unwrap();
    p.round_started(1);
    p.run_robot(id, &mut SelfDestructGame).unwrap();
    assert!(p.has_terminated(id));
    let recovered = p
        .player(id)
        .unwrap()
        .context()
        .static_value("quitter/RobotPlayer", "recovered")
        .unwrap();
    assert!(!recovered.same(&Value::Int(1)));
    assert!(captured.contents().is_empty());
}

const DEEP_AND_STUBBORN: &str = "\
.unit deep/RobotPlayer
.routine run 0
top:
    push 200
    call dive 1
    pop
    jump top
top_end:
catch:
    pop
    pushs \"caught\"
    call std/System.println 1
    pop
    jump top
.try top top_end catch
.end

.routine dive 1
    load 0
    jumpifnot spin
    load 0
    push 1
    sub
    call dive 1
    ret
spin:
    push 1
    pop
    jump spin
spin_end:
rescue:
    pop
    jump spin
.try spin spin_end rescue
.end
";

#[test]
fn test_kill_unwinds_deep_stack_through_catch_alls() {
    let (mut p, captured) = provider(inline_program("deep/RobotPlayer", DEEP_AND_STUBBORN));
    let id = RobotId::new(7);
    p.robot_spawned(&robot(7, 5_000)).unwrap();
    p.round_started(1);
    p.run_robot(id, &mut SelfDestructGame).unwrap();
    assert!(!p.has_terminated(id));

    p.robot_killed(id).unwrap();
    assert!(p.has_terminated(id));
    p.round_started(2);
    p.run_robot(id, &mut SelfDestructGame).unwrap();

    let player = p.player(id).unwrap();
    assert_eq!(player.monitor().state(), MonitorState::Terminated);
    assert!(captured.contents().is_empty());
}

#[test]
fn test_stepping_after_termination_is_an_engine_error() {
    let (mut p, _) = provider(load_bot("quitter"));
    let id = RobotId::new(1);
    p.robot_spawned(&robot(1, 10_000)).unwrap();
    p.run_robot(id, &mut SelfDestructGame).unwrap();
    assert!(p.has_terminated(id));
    assert!(p.run_robot(id, &mut SelfDestructGame).is_err());
}

const FOLD_PLAYER: &str = "\
.unit fold/RobotPlayer
.static result

.routine run 0
    getstatic result
    jumpif done
    push 12
    call fold/Folder.fold 1
    putstatic result
done:
    return
.end
";

const FOLDER: &str = "\
.unit fold/Folder
.static base

.routine <clinit> 0
    push 1000
    putstatic base
    return
.end

.routine fold 1
.locals 2
    load 0
    jumpifnot leaf
    load 0
    push 1
    sub
    call fold 1
    load 0
    add
    store 1
attempt:
    load 1
    push 100
    load 0
    push 4
    rem
    div
    add
    ret
attempt_end:
leaf:
    getstatic base
    ret
caught:
    pop
    load 1
    push 7
    sub
    ret
.try attempt attempt_end caught std/ArithmeticError
.end
";

/// Runs the fold program until it records a result; returns the result
/// and the turns it took.
fn fold_under_ceiling(ceiling: i32) -> (Value, u32) {
    let units: BTreeMap<String, String> = [
        ("fold/RobotPlayer".to_string(), FOLD_PLAYER.to_string()),
        ("fold/Folder".to_string(), FOLDER.to_string()),
    ]
    .into();
    let (mut p, captured) = provider(Arc::new(Program::from_units("fold", units, false)));
    let id = RobotId::new(1);
    p.robot_spawned(&robot(1, ceiling)).unwrap();
    for round in 1..=100_000 {
        p.round_started(round);
        p.run_robot(id, &mut SelfDestructGame).unwrap();
        assert!(!p.has_terminated(id), "{}", captured.contents());
        let result = p
            .player(id)
            .unwrap()
            .context()
            .static_value("fold/RobotPlayer", "result")
            .unwrap()
            .clone();
        if let Value::Int(_) = result {
            return (result, round);
        }
    }
    panic!("no result under ceiling {ceiling}");
}

#[test]
fn test_pausing_does_not_change_results() {
    let (whole, whole_turns) = fold_under_ceiling(1_000_000);
    let (sliced, sliced_turns) = fold_under_ceiling(7);
    assert_eq!(whole_turns, 1);
    assert!(sliced_turns > 1);
    assert!(whole.same(&Value::Int(1606)), "got {whole:?}");
    assert!(sliced.same(&whole), "{sliced:?} != {whole:?}");
}
