//! Text assembler for code units.
//!
//! ```text
//! .unit team/RobotPlayer
//! .static counter
//!
//! .routine run 0
//! .locals 1
//! top:
//!     getstatic counter
//!     push 1
//!     add
//!     putstatic counter
//!     return
//! .end
//! ```
//!
//! Unqualified static and call names resolve to the unit being assembled.
//! `.try <start> <end> <handler> [class]` adds a handler entry; entries keep
//! declaration order.

use std::collections::HashMap;

use thiserror::Error;

use super::op::{CodeUnit, FieldRef, Handler, MethodRef, Op, Routine};

/// An assembly error with its 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct AsmError {
    /// 1-based line number.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

impl AsmError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Assemble one code unit from source text.
///
/// # Errors
///
/// Returns an [`AsmError`] for unknown mnemonics, bad operands, undefined
/// labels, or a `.unit` directive that disagrees with `name`.
pub fn assemble(name: &str, source: &str) -> Result<CodeUnit, AsmError> {
    let mut unit = CodeUnit {
        name: name.to_string(),
        statics: Vec::new(),
        routines: Vec::new(),
    };
    let mut current: Option<PendingRoutine> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(directive) = line.strip_prefix('.') {
            let mut parts = directive.split_whitespace();
            let keyword = parts.next().unwrap_or_default();
            let args: Vec<&str> = parts.collect();
            match keyword {
                "unit" => {
                    let declared = single_arg(&args, line_no)?;
                    if declared != name {
                        return Err(AsmError::new(
                            line_no,
                            format!("unit declares name {declared} but was loaded as {name}"),
                        ));
                    }
                }
                "static" => {
                    if current.is_some() {
                        return Err(AsmError::new(line_no, ".static inside a routine"));
                    }
                    unit.statics.push(single_arg(&args, line_no)?.to_string());
                }
                "routine" => {
                    if current.is_some() {
                        return Err(AsmError::new(line_no, "nested .routine (missing .end?)"));
                    }
                    let [routine_name, params] = args.as_slice() else {
                        return Err(AsmError::new(line_no, "expected .routine <name> <params>"));
                    };
                    let params = parse_u16(params, line_no)?;
                    current = Some(PendingRoutine::new(routine_name, params, line_no));
                }
                "locals" => {
                    let routine = current
                        .as_mut()
                        .ok_or_else(|| AsmError::new(line_no, ".locals outside a routine"))?;
                    routine.locals = Some(parse_u16(single_arg(&args, line_no)?, line_no)?);
                }
                "try" => {
                    let routine = current
                        .as_mut()
                        .ok_or_else(|| AsmError::new(line_no, ".try outside a routine"))?;
                    let (labels, class) = match args.as_slice() {
                        [s, e, h] => ([*s, *e, *h], None),
                        [s, e, h, c] => ([*s, *e, *h], Some((*c).to_string())),
                        _ => {
                            return Err(AsmError::new(
                                line_no,
                                "expected .try <start> <end> <handler> [class]",
                            ));
                        }
                    };
                    routine.tries.push(PendingTry {
                        labels: labels.map(str::to_string),
                        class,
                        line: line_no,
                    });
                }
                "end" => {
                    let routine = current
                        .take()
                        .ok_or_else(|| AsmError::new(line_no, ".end without .routine"))?;
                    unit.routines.push(routine.finish()?);
                }
                other => return Err(AsmError::new(line_no, format!("unknown directive .{other}"))),
            }
            continue;
        }

        let routine = current
            .as_mut()
            .ok_or_else(|| AsmError::new(line_no, "instruction outside a routine"))?;

        let mut rest = line;
        if let Some((label, after)) = split_label(line) {
            routine.define_label(label, line_no)?;
            rest = after.trim();
            if rest.is_empty() {
                continue;
            }
        }
        let op = parse_op(rest, name, line_no, routine)?;
        routine.code.push(op);
    }

    if let Some(routine) = current {
        return Err(AsmError::new(
            routine.line,
            format!("routine {} is missing .end", routine.name),
        ));
    }
    Ok(unit)
}

/// A routine whose labels are not resolved yet.
struct PendingRoutine {
    name: String,
    params: u16,
    locals: Option<u16>,
    code: Vec<Op>,
    labels: HashMap<String, usize>,
    fixups: Vec<(usize, String, usize)>,
    tries: Vec<PendingTry>,
    line: usize,
}

struct PendingTry {
    labels: [String; 3],
    class: Option<String>,
    line: usize,
}

impl PendingRoutine {
    fn new(name: &str, params: u16, line: usize) -> Self {
        Self {
            name: name.to_string(),
            params,
            locals: None,
            code: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            tries: Vec::new(),
            line,
        }
    }

    fn define_label(&mut self, label: &str, line: usize) -> Result<(), AsmError> {
        if self.labels.insert(label.to_string(), self.code.len()).is_some() {
            return Err(AsmError::new(line, format!("label {label} defined twice")));
        }
        Ok(())
    }

    fn resolve(&self, label: &str, line: usize) -> Result<usize, AsmError> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| AsmError::new(line, format!("undefined label {label}")))
    }

    fn finish(mut self) -> Result<Routine, AsmError> {
        for (index, label, line) in std::mem::take(&mut self.fixups) {
            let resolved = self.resolve(&label, line)?;
            if let Some(target) = self.code[index].target_mut() {
                *target = resolved;
            }
        }
        let mut handlers = Vec::with_capacity(self.tries.len());
        for t in &self.tries {
            let [start, end, target] = &t.labels;
            handlers.push(Handler {
                start: self.resolve(start, t.line)?,
                end: self.resolve(end, t.line)?,
                target: self.resolve(target, t.line)?,
                class: t.class.clone(),
            });
        }
        Ok(Routine {
            locals: self.locals.unwrap_or(self.params).max(self.params),
            name: self.name,
            params: self.params,
            code: self.code,
            handlers,
        })
    }
}

fn parse_op(text: &str, unit: &str, line: usize, routine: &mut PendingRoutine) -> Result<Op, AsmError> {
    let (mnemonic, operands) = match text.split_once(char::is_whitespace) {
        Some((m, rest)) => (m, rest.trim()),
        None => (text, ""),
    };
    let args: Vec<&str> = operands.split_whitespace().collect();
    let none = |op: Op| {
        if args.is_empty() {
            Ok(op)
        } else {
            Err(AsmError::new(line, format!("{mnemonic} takes no operands")))
        }
    };

    let lower = mnemonic.to_ascii_lowercase();
    let op = match lower.as_str() {
        "nop" => none(Op::Nop)?,
        "push" => Op::Push(parse_i32(single_arg(&args, line)?, line)?),
        "pushs" => Op::PushStr(parse_string(operands, line)?),
        "pushnull" => none(Op::PushNull)?,
        "pop" => none(Op::Pop)?,
        "dup" => none(Op::Dup)?,
        "swap" => none(Op::Swap)?,
        "load" => Op::Load(parse_u16(single_arg(&args, line)?, line)?),
        "store" => Op::Store(parse_u16(single_arg(&args, line)?, line)?),
        "add" => none(Op::Add)?,
        "sub" => none(Op::Sub)?,
        "mul" => none(Op::Mul)?,
        "div" => none(Op::Div)?,
        "rem" => none(Op::Rem)?,
        "neg" => none(Op::Neg)?,
        "and" => none(Op::And)?,
        "or" => none(Op::Or)?,
        "xor" => none(Op::Xor)?,
        "shl" => none(Op::Shl)?,
        "shr" => none(Op::Shr)?,
        "eq" => none(Op::Eq)?,
        "ne" => none(Op::Ne)?,
        "lt" => none(Op::Lt)?,
        "le" => none(Op::Le)?,
        "gt" => none(Op::Gt)?,
        "ge" => none(Op::Ge)?,
        "getstatic" => Op::GetStatic(parse_field(single_arg(&args, line)?, unit)),
        "putstatic" => Op::PutStatic(parse_field(single_arg(&args, line)?, unit)),
        "newarray" => none(Op::NewArray)?,
        "newmulti" => Op::NewMultiArray(parse_dims(single_arg(&args, line)?, line)?),
        "aload" => none(Op::ArrayLoad)?,
        "astore" => none(Op::ArrayStore)?,
        "alen" => none(Op::ArrayLen)?,
        "jump" | "jumpif" | "jumpifnot" => {
            let label = single_arg(&args, line)?;
            routine
                .fixups
                .push((routine.code.len(), label.to_string(), line));
            match lower.as_str() {
                "jump" => Op::Jump(0),
                "jumpif" => Op::JumpIf(0),
                _ => Op::JumpIfNot(0),
            }
        }
        "call" => {
            let [target, argc] = args.as_slice() else {
                return Err(AsmError::new(line, "expected call <unit.routine> <argc>"));
            };
            let argc = argc
                .parse::<u8>()
                .map_err(|_| AsmError::new(line, format!("bad argument count {argc}")))?;
            let (owner, name) = split_member(target, unit);
            Op::Call(MethodRef::new(owner, name, argc))
        }
        "return" => none(Op::Return)?,
        "ret" => none(Op::ReturnValue)?,
        "throw" => none(Op::Throw)?,
        "monitorenter" => none(Op::MonitorEnter)?,
        "monitorexit" => none(Op::MonitorExit)?,
        "charge" => Op::Charge(
            single_arg(&args, line)?
                .parse::<u32>()
                .map_err(|_| AsmError::new(line, "bad charge amount"))?,
        ),
        "chargearray" => none(Op::ChargeArray)?,
        "chargemulti" => Op::ChargeMultiArray(parse_dims(single_arg(&args, line)?, line)?),
        "enterdebug" => none(Op::EnterDebug)?,
        "exitdebug" => none(Op::ExitDebug)?,
        other => return Err(AsmError::new(line, format!("unknown mnemonic {other}"))),
    };
    Ok(op)
}

/// Split `unit.member`; a bare member belongs to `own_unit`.
fn split_member<'a>(text: &'a str, own_unit: &'a str) -> (&'a str, &'a str) {
    match text.rsplit_once('.') {
        Some((owner, member)) if !owner.is_empty() => (owner, member),
        _ => (own_unit, text),
    }
}

fn parse_field(text: &str, unit: &str) -> FieldRef {
    let (owner, name) = split_member(text, unit);
    FieldRef {
        unit: owner.to_string(),
        name: name.to_string(),
    }
}

fn single_arg<'a>(args: &[&'a str], line: usize) -> Result<&'a str, AsmError> {
    match args {
        [one] => Ok(one),
        _ => Err(AsmError::new(line, "expected exactly one operand")),
    }
}

fn parse_i32(text: &str, line: usize) -> Result<i32, AsmError> {
    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).map(|v| i32::from_ne_bytes(v.to_ne_bytes()))
    } else {
        text.parse::<i32>()
    };
    parsed.map_err(|_| AsmError::new(line, format!("bad integer {text}")))
}

fn parse_u16(text: &str, line: usize) -> Result<u16, AsmError> {
    text.parse::<u16>()
        .map_err(|_| AsmError::new(line, format!("bad slot count {text}")))
}

fn parse_dims(text: &str, line: usize) -> Result<u8, AsmError> {
    match text.parse::<u8>() {
        Ok(d) if d >= 1 => Ok(d),
        _ => Err(AsmError::new(line, format!("bad dimension count {text}"))),
    }
}

fn parse_string(text: &str, line: usize) -> Result<String, AsmError> {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| AsmError::new(line, "expected a quoted string"))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            other => {
                return Err(AsmError::new(line, format!("bad escape \\{}", other.unwrap_or(' '))));
            }
        }
    }
    Ok(out)
}

/// Cut a trailing `;` comment, ignoring semicolons inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if in_string && !escaped => {
                escaped = true;
                continue;
            }
            '"' if !escaped => in_string = !in_string,
            ';' | '#' if !in_string => return &line[..i],
            _ => {}
        }
        escaped = false;
    }
    line
}

/// Split a leading `label:` off a line.
fn split_label(line: &str) -> Option<(&str, &str)> {
    let (head, rest) = line.split_once(':')?;
    let head = head.trim();
    let is_ident = !head.is_empty()
        && head
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    is_ident.then_some((head, rest))
}
