#![no_main]

use std::collections::BTreeMap;
use std::sync::Arc;

use arbitrary::Arbitrary;
use bytecage::control::DetachedGame;
use bytecage::output::TeamOutput;
use bytecage::{EngineConfig, Program, RobotDescriptor, RobotId, SandboxedPlayer, Team};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    source: String,
    ceiling: u16,
    turns: u8,
    kill_at: Option<u8>,
}

fuzz_target!(|input: Input| {
    let units: BTreeMap<String, String> = [("f/RobotPlayer".to_string(), input.source)].into();
    let program = Arc::new(Program::from_units("fuzz", units, false));
    let descriptor = RobotDescriptor {
        id: RobotId::new(1),
        team: Team::A,
        kind: "SOLDIER".into(),
        ceiling: i32::from(input.ceiling.max(1)),
    };
    let config = EngineConfig {
        max_heap_cells: 100_000,
        max_call_depth: 64,
        ..EngineConfig::default()
    };
    let Ok(mut player) = SandboxedPlayer::spawn(program, descriptor, &config, None) else {
        return;
    };
    let mut output = TeamOutput::sink(Team::A);
    // Whatever the program does, every step returns and a kill always
    // terminates it within one more step.
    for round in 1..=u32::from(input.turns % 32) {
        if input.kill_at.is_some_and(|k| u32::from(k) == round) {
            player.kill();
        }
        if player.monitor().state() == bytecage::monitor::MonitorState::Terminated {
            break;
        }
        assert!(player.step(round, &mut DetachedGame, &mut output).is_ok());
        if input.kill_at.is_some_and(|k| u32::from(k) == round) {
            assert!(player.has_terminated());
        }
    }
});
