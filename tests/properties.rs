//! Property-based tests for budget accounting, allocation cost and the
//! assembler.
//!
//! Run with: cargo test --release --test properties

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use proptest::prelude::*;

use bytecage::cost::{array_cost, multi_array_cost};
use bytecage::isa::{CodeUnit, Op, Routine, assemble};
use bytecage::monitor::{ChargeOutcome, Monitor, Resume};
use bytecage::rewriter::{RewriteOptions, rewrite};

/// A straight-line or branching op without its jump target resolved.
#[derive(Debug, Clone)]
enum Proto {
    Plain(Op),
    Jump(u8),
    JumpIf(u8),
}

fn plain_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i32>().prop_map(Op::Push),
        "[a-z ]{0,8}".prop_map(Op::PushStr),
        Just(Op::PushNull),
        Just(Op::Pop),
        Just(Op::Dup),
        Just(Op::Swap),
        (0u16..2).prop_map(Op::Load),
        (0u16..2).prop_map(Op::Store),
        Just(Op::Add),
        Just(Op::Sub),
        Just(Op::Mul),
        Just(Op::Rem),
        Just(Op::Xor),
        Just(Op::Shl),
        Just(Op::Lt),
        Just(Op::Eq),
        Just(Op::NewArray),
        Just(Op::ArrayLen),
        (1u8..4).prop_map(Op::NewMultiArray),
    ]
}

fn proto() -> impl Strategy<Value = Proto> {
    prop_oneof![
        6 => plain_op().prop_map(Proto::Plain),
        1 => any::<u8>().prop_map(Proto::Jump),
        1 => any::<u8>().prop_map(Proto::JumpIf),
    ]
}

fn generated_unit() -> impl Strategy<Value = CodeUnit> {
    prop::collection::vec(proto(), 0..40).prop_map(|protos| {
        let len = protos.len() + 1;
        let mut code: Vec<Op> = protos
            .into_iter()
            .map(|p| match p {
                Proto::Plain(op) => op,
                Proto::Jump(t) => Op::Jump(usize::from(t) % len),
                Proto::JumpIf(t) => Op::JumpIf(usize::from(t) % len),
            })
            .collect();
        code.push(Op::Return);
        CodeUnit {
            name: "p/RobotPlayer".into(),
            statics: Vec::new(),
            routines: vec![Routine {
                name: "run".into(),
                params: 0,
                locals: 2,
                code,
                handlers: Vec::new(),
            }],
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// remaining = ceiling - consumed + min(prior remainder, 0), never
    /// above the ceiling.
    #[test]
    fn prop_budget_conservation(
        ceiling in 1i32..20_000,
        turns in prop::collection::vec(prop::collection::vec(0u32..5_000, 0..20), 1..30),
    ) {
        let mut monitor = Monitor::new(ceiling, 0);
        monitor.initialize();
        let mut prior = ceiling;
        for charges in turns {
            let start = ceiling + prior.min(0);
            let resume = monitor.begin_turn();
            prop_assert_eq!(monitor.bytecodes_left(), start);
            prop_assert!(monitor.bytecodes_left() <= ceiling);
            if resume == Resume::StayPaused {
                prop_assert!(start <= 0);
                prior = start;
                continue;
            }
            let mut expected = i64::from(start);
            let mut paused = false;
            for amount in charges {
                let outcome = monitor.charge(amount);
                expected -= i64::from(amount);
                prop_assert_eq!(i64::from(monitor.bytecodes_left()), expected);
                if outcome == ChargeOutcome::Pause {
                    prop_assert!(expected <= 0);
                    paused = true;
                    break;
                }
            }
            if !paused {
                monitor.end_turn();
            }
            prop_assert_eq!(
                i64::from(monitor.bytecode_num()),
                i64::from(ceiling) - expected
            );
            prior = monitor.bytecodes_left();
        }
    }

    /// Deferred cost never underflows the budget counter.
    #[test]
    fn prop_budget_saturates(ceiling in 1i32..100, deferred in prop::collection::vec(any::<i32>(), 1..8)) {
        let mut monitor = Monitor::new(ceiling, 0);
        monitor.initialize();
        monitor.begin_turn();
        for d in deferred {
            monitor.defer(d);
        }
        monitor.charge(u32::MAX);
        prop_assert!(monitor.bytecodes_left() <= 0);
        prop_assert!(monitor.bytecode_num() >= ceiling);
    }

    #[test]
    fn prop_array_costs(len in any::<i32>(), dims in prop::collection::vec(-4i32..60, 1..5)) {
        prop_assert_eq!(array_cost(len), len.max(1));
        let product: i64 = dims.iter().map(|&d| i64::from(d.max(1))).product();
        prop_assert_eq!(i64::from(multi_array_cost(&dims)), product.min(i64::from(i32::MAX)));
    }

    /// Disassembly reassembles to the same unit, before and after rewriting.
    #[test]
    fn prop_disassembly_reassembles(unit in generated_unit()) {
        let text = unit.to_string();
        let again = assemble(&unit.name, &text).unwrap();
        prop_assert_eq!(&again, &unit);

        let image = rewrite(&unit, RewriteOptions::player(false), &|_| false).unwrap();
        let rewritten = image.unit();
        let text = rewritten.to_string();
        prop_assert_eq!(&assemble(&rewritten.name, &text).unwrap(), rewritten);
    }

    /// Every rewritten routine is metered: it ends each block with a charge.
    #[test]
    fn prop_rewritten_code_charges(unit in generated_unit()) {
        let image = rewrite(&unit, RewriteOptions::player(false), &|_| false).unwrap();
        let run = image.unit().routine("run").unwrap();
        prop_assert!(run.code.iter().any(|op| matches!(op, Op::Charge(n) if *n > 0)));
        let array_ops = unit.routines[0].code.iter().filter(|op| **op == Op::NewArray).count();
        let charges = run.code.iter().filter(|op| **op == Op::ChargeArray).count();
        prop_assert_eq!(array_ops, charges);
    }
}
