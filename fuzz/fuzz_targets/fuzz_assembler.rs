#![no_main]

use bytecage::isa::assemble;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|text: &str| {
    // Anything that assembles must survive a disassembly round trip.
    if let Ok(unit) = assemble("f/RobotPlayer", text) {
        let again = assemble("f/RobotPlayer", &unit.to_string());
        assert_eq!(again.ok().as_ref(), Some(&unit));
    }
});
