#![no_main]

use arbitrary::Arbitrary;
use bytecage::isa::{CodeUnit, assemble, FieldRef, Handler, MethodRef, Op, Routine};
use bytecage::rewriter::{RewriteOptions, rewrite};
use libfuzzer_sys::fuzz_target;

/// Ops the fuzzer can pick, with raw operands.
#[derive(Arbitrary, Debug)]
enum RawOp {
    Push(i32),
    Pop,
    Dup,
    Load(u8),
    Store(u8),
    Add,
    Div,
    GetStatic,
    PutStatic,
    NewArray,
    NewMulti(u8),
    Jump(u8),
    JumpIf(u8),
    CallOwn,
    CallNative(u8),
    MonitorEnter,
    MonitorExit,
    Throw,
    Return,
}

#[derive(Arbitrary, Debug)]
struct Input {
    ops: Vec<RawOp>,
    handlers: Vec<(u8, u8, u8, bool)>,
    debug_methods: bool,
    check: bool,
}

const NATIVES: [(&str, &str, u8); 6] = [
    ("std/Math", "abs", 1),
    ("std/System", "println", 1),
    ("std/Random", "new", 0),
    ("std/Thread", "start", 1),
    ("bc/Clock", "yield", 0),
    ("std/Net", "connect", 1),
];

fn field() -> FieldRef {
    FieldRef {
        unit: "f/RobotPlayer".into(),
        name: "s".into(),
    }
}

fuzz_target!(|input: Input| {
    if input.ops.len() > 512 {
        return;
    }
    let len = input.ops.len() + 1;
    let target = |t: u8| usize::from(t) % len;
    let mut code: Vec<Op> = input
        .ops
        .iter()
        .map(|op| match op {
            RawOp::Push(v) => Op::Push(*v),
            RawOp::Pop => Op::Pop,
            RawOp::Dup => Op::Dup,
            RawOp::Load(s) => Op::Load(u16::from(*s % 4)),
            RawOp::Store(s) => Op::Store(u16::from(*s % 4)),
            RawOp::Add => Op::Add,
            RawOp::Div => Op::Div,
            RawOp::GetStatic => Op::GetStatic(field()),
            RawOp::PutStatic => Op::PutStatic(field()),
            RawOp::NewArray => Op::NewArray,
            RawOp::NewMulti(d) => Op::NewMultiArray(*d),
            RawOp::Jump(t) => Op::Jump(target(*t)),
            RawOp::JumpIf(t) => Op::JumpIf(target(*t)),
            RawOp::CallOwn => Op::Call(MethodRef::new("f/RobotPlayer", "debug_helper", 0)),
            RawOp::CallNative(i) => {
                let (unit, name, argc) = NATIVES[usize::from(*i) % NATIVES.len()];
                Op::Call(MethodRef::new(unit, name, argc))
            }
            RawOp::MonitorEnter => Op::MonitorEnter,
            RawOp::MonitorExit => Op::MonitorExit,
            RawOp::Throw => Op::Throw,
            RawOp::Return => Op::Return,
        })
        .collect();
    code.push(Op::Return);
    let handlers = input
        .handlers
        .iter()
        .take(4)
        .map(|&(s, e, h, any)| {
            let (s, e) = (target(s), target(e));
            Handler {
                start: s.min(e),
                end: s.max(e),
                target: target(h),
                class: (!any).then(|| "std/ArithmeticError".to_string()),
            }
        })
        .collect();
    let unit = CodeUnit {
        name: "f/RobotPlayer".into(),
        statics: vec!["s".into()],
        routines: vec![
            Routine {
                name: "run".into(),
                params: 0,
                locals: 4,
                code,
                handlers,
            },
            Routine {
                name: "debug_helper".into(),
                params: 0,
                locals: 0,
                code: vec![Op::Return],
                handlers: Vec::new(),
            },
        ],
    };
    let options = RewriteOptions {
        check: input.check,
        debug_methods: input.debug_methods,
    };
    // Rewriting either rejects the unit or yields one that still verifies
    // and reassembles.
    if let Ok(image) = rewrite(&unit, options, &|name| name == "f/RobotPlayer") {
        let text = image.unit().to_string();
        let again = assemble("f/RobotPlayer", &text);
        assert_eq!(again.ok().as_ref(), Some(image.unit()));
    }
});
