//! Disassembly back to the assembler's text form.
//!
//! The output reassembles to an identical unit. Names are always printed
//! fully qualified and jump targets become `L<index>` labels.

use std::collections::BTreeSet;
use std::fmt;

use super::op::{CodeUnit, Op, Routine};

impl fmt::Display for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ".unit {}", self.name)?;
        for field in &self.statics {
            writeln!(f, ".static {field}")?;
        }
        for routine in &self.routines {
            writeln!(f)?;
            write_routine(f, routine)?;
        }
        Ok(())
    }
}

fn write_routine(f: &mut fmt::Formatter<'_>, routine: &Routine) -> fmt::Result {
    writeln!(f, ".routine {} {}", routine.name, routine.params)?;
    writeln!(f, ".locals {}", routine.locals)?;

    let mut labels = BTreeSet::new();
    labels.extend(routine.code.iter().filter_map(Op::target));
    for h in &routine.handlers {
        labels.extend([h.start, h.end, h.target]);
    }

    for (index, op) in routine.code.iter().enumerate() {
        if labels.contains(&index) {
            writeln!(f, "L{index}:")?;
        }
        writeln!(f, "    {}", mnemonic(op))?;
    }
    if labels.contains(&routine.code.len()) {
        writeln!(f, "L{}:", routine.code.len())?;
    }
    for h in &routine.handlers {
        write!(f, ".try L{} L{} L{}", h.start, h.end, h.target)?;
        if let Some(class) = &h.class {
            write!(f, " {class}")?;
        }
        writeln!(f)?;
    }
    writeln!(f, ".end")
}

/// Render one op as assembler text.
#[must_use]
pub fn mnemonic(op: &Op) -> String {
    match op {
        Op::Nop => "nop".into(),
        Op::Push(v) => format!("push {v}"),
        Op::PushStr(s) => format!("pushs {}", quote(s)),
        Op::PushNull => "pushnull".into(),
        Op::Pop => "pop".into(),
        Op::Dup => "dup".into(),
        Op::Swap => "swap".into(),
        Op::Load(slot) => format!("load {slot}"),
        Op::Store(slot) => format!("store {slot}"),
        Op::Add => "add".into(),
        Op::Sub => "sub".into(),
        Op::Mul => "mul".into(),
        Op::Div => "div".into(),
        Op::Rem => "rem".into(),
        Op::Neg => "neg".into(),
        Op::And => "and".into(),
        Op::Or => "or".into(),
        Op::Xor => "xor".into(),
        Op::Shl => "shl".into(),
        Op::Shr => "shr".into(),
        Op::Eq => "eq".into(),
        Op::Ne => "ne".into(),
        Op::Lt => "lt".into(),
        Op::Le => "le".into(),
        Op::Gt => "gt".into(),
        Op::Ge => "ge".into(),
        Op::GetStatic(field) => format!("getstatic {field}"),
        Op::PutStatic(field) => format!("putstatic {field}"),
        Op::NewArray => "newarray".into(),
        Op::NewMultiArray(d) => format!("newmulti {d}"),
        Op::ArrayLoad => "aload".into(),
        Op::ArrayStore => "astore".into(),
        Op::ArrayLen => "alen".into(),
        Op::Jump(t) => format!("jump L{t}"),
        Op::JumpIf(t) => format!("jumpif L{t}"),
        Op::JumpIfNot(t) => format!("jumpifnot L{t}"),
        Op::Call(m) => format!("call {m} {}", m.argc),
        Op::Return => "return".into(),
        Op::ReturnValue => "ret".into(),
        Op::Throw => "throw".into(),
        Op::MonitorEnter => "monitorenter".into(),
        Op::MonitorExit => "monitorexit".into(),
        Op::Charge(n) => format!("charge {n}"),
        Op::ChargeArray => "chargearray".into(),
        Op::ChargeMultiArray(d) => format!("chargemulti {d}"),
        Op::EnterDebug => "enterdebug".into(),
        Op::ExitDebug => "exitdebug".into(),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use crate::isa::assemble;

    #[test]
    fn test_disassembly_reassembles_identically() {
        let src = "
            .static best
            .routine run 0
            .locals 2
            top:
                push 3
                store 1
            loop:
                load 1
                jumpifnot done
                load 1
                push 1
                sub
                store 1
                jump loop
            done:
                pushs \"tab\\there\"
                call std/System.println 1
                pop
                return
            fail:
                pop
                return
            .try top done fail
            .end
        ";
        let unit = assemble("team/R", src).unwrap();
        let text = unit.to_string();
        let again = assemble("team/R", &text).unwrap();
        assert_eq!(unit, again);
        assert!(text.contains("call std/System.println 1"));
    }
}
