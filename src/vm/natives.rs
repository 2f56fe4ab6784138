//! Routines implemented by the engine rather than in IR.
//!
//! Shared natives are stateless and bound by name in every context. Support
//! natives back the `sys/*` and `bc/Clock` units and work on state private
//! to one robot. The rewriter is the only way player code reaches `sys/*`.

// Natives share one signature; some never fail.
#![allow(clippy::unnecessary_wraps)]

use std::cell::RefCell;
use std::collections::HashMap;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regex_automata::meta::Regex;

use crate::config::splitmix64;
use crate::control::{HostCall, HostValue};
use crate::error::EngineError;
use crate::monitor::Monitor;

use super::fault::{Fault, FaultClass};
use super::machine::TurnEnv;
use super::value::{HeapMeter, ObjectKind, Value};

/// Longest string a native will build, in bytes.
pub(crate) const MAX_STRING_BYTES: usize = 1 << 16;

/// Compiled patterns a robot keeps before its cache is flushed.
const MAX_CACHED_PATTERNS: usize = 64;

/// Largest compiled automaton a pattern may produce, in bytes.
const MAX_PATTERN_BYTES: usize = 256 * 1024;

/// Automaton bytes charged as one unit when a pattern is compiled.
const COMPILE_BYTES_PER_UNIT: usize = 16;

/// Automaton bytes charged as one unit per byte of text searched.
const SEARCH_BYTES_PER_UNIT: usize = 512;

/// Failure inside a native routine.
#[derive(Debug)]
pub(crate) enum NativeError {
    /// Raised in the calling robot.
    Fault(Fault),
    /// Aborts the match.
    Engine(EngineError),
}

impl From<Fault> for NativeError {
    fn from(f: Fault) -> Self {
        NativeError::Fault(f)
    }
}

impl From<EngineError> for NativeError {
    fn from(e: EngineError) -> Self {
        NativeError::Engine(e)
    }
}

/// A request from a native to the interpreter, acted on after it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// End the turn here.
    Yield,
    /// The caller must die now.
    Die,
}

type NativeResult = Result<Value, NativeError>;

pub(crate) type NativeFn = fn(&mut NativeCx<'_, '_>, &[Value]) -> NativeResult;

/// One native routine.
#[derive(Debug)]
pub(crate) struct Native {
    pub(crate) name: &'static str,
    pub(crate) arity: u8,
    pub(crate) call: NativeFn,
}

const fn native(name: &'static str, arity: u8, call: NativeFn) -> Native {
    Native { name, arity, call }
}

/// What a native can reach while it runs.
pub(crate) struct NativeCx<'a, 'e> {
    pub(crate) routine: &'static str,
    pub(crate) monitor: &'a mut Monitor,
    pub(crate) heap: &'a HeapMeter,
    pub(crate) support: &'a mut SupportState,
    pub(crate) env: &'a mut TurnEnv<'e>,
    pub(crate) signal: Option<Signal>,
}

/// Private state behind the support units of one robot.
#[derive(Debug)]
pub(crate) struct SupportState {
    rng: ChaCha8Rng,
    identity_seed: u64,
    identities: u64,
    patterns: HashMap<String, Regex>,
}

impl SupportState {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            identity_seed: splitmix64(seed),
            identities: 0,
            patterns: HashMap::new(),
        }
    }

    /// The anchored automaton for `pattern` and the units compiling it
    /// cost. A cached pattern costs nothing to compile again.
    pub(crate) fn pattern(&mut self, pattern: &str) -> Result<(Regex, i32), Fault> {
        if let Some(re) = self.patterns.get(pattern) {
            return Ok((re.clone(), 0));
        }
        let re = Regex::builder()
            .configure(Regex::config().nfa_size_limit(Some(MAX_PATTERN_BYTES)))
            .build(&format!("^(?:{pattern})$"))
            .map_err(|e| Fault::new(FaultClass::Regex, e.to_string()))?;
        let cost = len_i32(re.memory_usage() / COMPILE_BYTES_PER_UNIT);
        if self.patterns.len() >= MAX_CACHED_PATTERNS {
            self.patterns.clear();
        }
        self.patterns.insert(pattern.to_owned(), re.clone());
        Ok((re, cost))
    }

    /// Next identity hash code. Depends only on the seed and how many
    /// objects have been asked for one.
    pub(crate) fn next_identity(&mut self) -> i32 {
        self.identities += 1;
        let mixed = splitmix64(self.identity_seed.wrapping_add(self.identities));
        i32::try_from(mixed >> 33).unwrap_or(0)
    }
}

const MATH: &[Native] = &[
    native("abs", 1, math_abs),
    native("min", 2, math_min),
    native("max", 2, math_max),
    native("sqrt", 1, math_sqrt),
    native("pow", 2, math_pow),
    native("floorMod", 2, math_floor_mod),
];

const STRING: &[Native] = &[
    native("length", 1, string_length),
    native("charAt", 2, string_char_at),
    native("concat", 2, string_concat),
    native("equals", 2, string_equals),
    native("fromInt", 1, string_from_int),
    native("substring", 3, string_substring),
];

const RANDOM: &[Native] = &[
    native("withSeed", 1, random_with_seed),
    native("nextInt", 2, random_next_int),
];

const ERROR: &[Native] = &[
    native("new", 1, error_new),
    native("message", 1, error_message),
    native("className", 1, error_class_name),
];

const ROBOT_CONTROLLER: &[Native] = &[
    native("getID", 0, host_call),
    native("getTeam", 0, host_call),
    native("getType", 0, host_call),
    native("getRoundNum", 0, host_call),
    native("getRobotCount", 0, host_call),
    native("senseNearbyRobots", 0, host_call),
    native("attack", 1, host_call),
    native("broadcast", 2, host_call),
    native("readBroadcast", 1, host_call),
    native("setIndicatorString", 1, host_call),
    native("disintegrate", 0, host_call),
    native("resign", 0, host_call),
];

const SYS_MONITOR: &[Native] = &[native("randomSeed", 0, monitor_random_seed)];

const SYS_RANDOM: &[Native] = &[native("next", 0, random_next)];

const SYS_OBJECT_METHODS: &[Native] = &[
    native("hashCode", 1, object_hash_code),
    native("identityHashCode", 1, object_identity_hash_code),
    native("toString", 1, object_to_string),
];

const SYS_SYSTEM: &[Native] = &[
    native("print", 1, system_print),
    native("println", 1, system_println),
    native("arraycopy", 5, system_arraycopy),
];

const SYS_REGEX: &[Native] = &[native("matches", 2, regex_matches)];

const SYS_CLOCK: &[Native] = &[native("logicalTime", 0, clock_logical_time)];

const BC_CLOCK: &[Native] = &[
    native("yield", 0, clock_yield),
    native("getBytecodesLeft", 0, clock_bytecodes_left),
    native("getBytecodeNum", 0, clock_bytecode_num),
];

/// Stateless units bound by name in every context.
pub(crate) fn shared_unit(name: &str) -> Option<&'static [Native]> {
    match name {
        "std/Math" => Some(MATH),
        "std/String" => Some(STRING),
        "std/Random" => Some(RANDOM),
        "std/Error" => Some(ERROR),
        "bc/RobotController" => Some(ROBOT_CONTROLLER),
        _ => None,
    }
}

/// Units with private per-robot state. Never rewritten.
pub(crate) fn support_unit(name: &str) -> Option<&'static [Native]> {
    match name {
        "sys/Monitor" => Some(SYS_MONITOR),
        "sys/Random" => Some(SYS_RANDOM),
        "sys/ObjectMethods" => Some(SYS_OBJECT_METHODS),
        "sys/System" => Some(SYS_SYSTEM),
        "sys/Regex" => Some(SYS_REGEX),
        "sys/Clock" => Some(SYS_CLOCK),
        "bc/Clock" => Some(BC_CLOCK),
        _ => None,
    }
}

/// Look a routine up in a native table.
pub(crate) fn find(table: &'static [Native], name: &str) -> Option<&'static Native> {
    table.iter().find(|n| n.name == name)
}

fn arith(message: &str) -> Fault {
    Fault::new(FaultClass::Arithmetic, message)
}

fn index_fault(index: i32, len: usize) -> Fault {
    Fault::new(
        FaultClass::Index,
        format!("index {index} out of bounds for length {len}"),
    )
}

fn checked_string(heap: &HeapMeter, text: String) -> NativeResult {
    if text.len() > MAX_STRING_BYTES {
        return Err(Fault::new(
            FaultClass::OutOfMemory,
            format!("string of {} bytes exceeds the limit", text.len()),
        )
        .into());
    }
    Ok(heap.string(text)?)
}

/// Units a search of `text_len` bytes costs: the text times the size of
/// the automaton, which bounds the work of a match.
fn search_cost(re: &Regex, text_len: usize) -> i32 {
    let per_byte = (re.memory_usage() / SEARCH_BYTES_PER_UNIT).max(1);
    len_i32(text_len.saturating_mul(per_byte))
}

fn len_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

/// Text form of a value, as printing and concatenation see it.
fn display(cx: &mut NativeCx<'_, '_>, value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Int(v) => v.to_string(),
        Value::Str(s) => s.as_str().to_owned(),
        Value::Obj(obj) => match &obj.kind {
            ObjectKind::Fault(fault) => fault.to_string(),
            _ => {
                let code = obj.identity(|| cx.support.next_identity());
                format!("{}@{code:x}", obj.kind_name())
            }
        },
    }
}

/// Content hash of a string: `s[0]*31^(n-1) + ... + s[n-1]`, wrapping.
fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

fn math_abs(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    Ok(Value::Int(args[0].as_int()?.wrapping_abs()))
}

fn math_min(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    Ok(Value::Int(args[0].as_int()?.min(args[1].as_int()?)))
}

fn math_max(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    Ok(Value::Int(args[0].as_int()?.max(args[1].as_int()?)))
}

fn math_sqrt(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let n = args[0].as_int()?;
    if n < 0 {
        return Err(arith("square root of a negative number").into());
    }
    Ok(Value::Int(n.isqrt()))
}

fn math_pow(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let base = args[0].as_int()?;
    let exp = u32::try_from(args[1].as_int()?).map_err(|_| arith("negative exponent"))?;
    Ok(Value::Int(base.wrapping_pow(exp)))
}

fn math_floor_mod(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let a = args[0].as_int()?;
    let b = args[1].as_int()?;
    if b == 0 {
        return Err(arith("/ by zero").into());
    }
    let r = a.wrapping_rem(b);
    Ok(Value::Int(if r != 0 && (r ^ b) < 0 { r + b } else { r }))
}

fn string_length(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    Ok(Value::Int(len_i32(args[0].as_str()?.chars().count())))
}

fn string_char_at(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let s = args[0].as_str()?;
    let i = args[1].as_int()?;
    let c = usize::try_from(i)
        .ok()
        .and_then(|idx| s.chars().nth(idx))
        .ok_or_else(|| index_fault(i, s.chars().count()))?;
    Ok(Value::Int(i32::try_from(u32::from(c)).unwrap_or(0)))
}

fn string_concat(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let mut out = display(cx, &args[0]);
    out.push_str(&display(cx, &args[1]));
    checked_string(cx.heap, out)
}

fn string_equals(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    Ok(Value::from(args[0].same(&args[1])))
}

fn string_from_int(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    Ok(Value::str(&args[0].as_int()?.to_string()))
}

fn string_substring(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let s = args[0].as_str()?;
    let begin = args[1].as_int()?;
    let end = args[2].as_int()?;
    let len = s.chars().count();
    let (Ok(b), Ok(e)) = (usize::try_from(begin), usize::try_from(end)) else {
        return Err(index_fault(begin.min(end), len).into());
    };
    if b > e || e > len {
        return Err(Fault::new(
            FaultClass::Index,
            format!("range {begin}..{end} out of bounds for length {len}"),
        )
        .into());
    }
    checked_string(cx.heap, s.chars().skip(b).take(e - b).collect())
}

fn random_with_seed(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let seed = u64::from(u32::from_ne_bytes(args[0].as_int()?.to_ne_bytes()));
    let rng = ChaCha8Rng::seed_from_u64(seed);
    Ok(cx.heap.object(ObjectKind::Random(RefCell::new(rng)))?)
}

fn random_next_int(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let obj = args[0].as_obj()?;
    let bound = args[1].as_int()?;
    let ObjectKind::Random(rng) = &obj.kind else {
        return Err(Fault::type_error(format!("expected a random, found {}", obj.kind_name())).into());
    };
    if bound <= 0 {
        return Err(Fault::new(FaultClass::Error, "bound must be positive").into());
    }
    Ok(Value::Int(rng.borrow_mut().gen_range(0..bound)))
}

fn error_new(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let message = match &args[0] {
        Value::Null => String::new(),
        other => display(cx, other),
    };
    let fault = Fault::new(FaultClass::Error, message);
    Ok(cx.heap.object(ObjectKind::Fault(fault))?)
}

fn as_fault(value: &Value) -> Result<&Fault, Fault> {
    let obj = value.as_obj()?;
    match &obj.kind {
        ObjectKind::Fault(fault) => Ok(fault),
        _ => Err(Fault::type_error(format!("expected an error, found {}", obj.kind_name()))),
    }
}

fn error_message(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    Ok(Value::str(&as_fault(&args[0])?.message))
}

fn error_class_name(_: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    Ok(Value::str(as_fault(&args[0])?.class.name()))
}

fn to_host(value: &Value) -> Result<HostValue, Fault> {
    match value {
        Value::Null => Ok(HostValue::Null),
        Value::Int(v) => Ok(HostValue::Int(*v)),
        Value::Str(s) => Ok(HostValue::Str(s.as_str().to_owned())),
        Value::Obj(obj) => {
            let items = obj.as_array()?.borrow();
            let ints = items.iter().map(Value::as_int).collect::<Result<Vec<_>, _>>()?;
            Ok(HostValue::Ints(ints))
        }
    }
}

fn from_host(heap: &HeapMeter, value: HostValue) -> Result<Value, Fault> {
    match value {
        HostValue::Null => Ok(Value::Null),
        HostValue::Int(v) => Ok(Value::Int(v)),
        HostValue::Str(s) => Ok(Value::str(&s)),
        HostValue::Ints(items) => heap.array(items.into_iter().map(Value::Int).collect()),
    }
}

fn host_call(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let args = args.iter().map(to_host).collect::<Result<Vec<_>, _>>()?;
    let mut call = HostCall::new(cx.env.robot.id, cx.routine, args);
    let result = cx.env.game.invoke(&mut call);
    if call.kills_caller() {
        cx.signal = Some(Signal::Die);
        return Ok(Value::Null);
    }
    match result {
        Ok(value) => Ok(from_host(cx.heap, value)?),
        Err(e) => Err(Fault::new(FaultClass::GameAction, e.message).into()),
    }
}

fn monitor_random_seed(cx: &mut NativeCx<'_, '_>, _: &[Value]) -> NativeResult {
    Ok(Value::Int(cx.monitor.random_seed()))
}

fn random_next(cx: &mut NativeCx<'_, '_>, _: &[Value]) -> NativeResult {
    Ok(Value::Int(i32::try_from(cx.support.rng.next_u32() >> 1).unwrap_or(0)))
}

fn object_hash_code(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Null => Err(Fault::new(FaultClass::Null, "hashCode of null").into()),
        Value::Int(v) => Ok(Value::Int(*v)),
        Value::Str(s) => Ok(Value::Int(string_hash(s.as_str()))),
        Value::Obj(obj) => Ok(Value::Int(obj.identity(|| cx.support.next_identity()))),
    }
}

fn object_identity_hash_code(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Null => Ok(Value::Int(0)),
        _ => object_hash_code(cx, args),
    }
}

fn object_to_string(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    if let Value::Null = args[0] {
        return Err(Fault::new(FaultClass::Null, "toString of null").into());
    }
    let text = display(cx, &args[0]);
    checked_string(cx.heap, text)
}

fn system_print(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let text = display(cx, &args[0]);
    cx.env.output.print(cx.env.robot, cx.env.round, &text)?;
    Ok(Value::Null)
}

fn system_println(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let text = display(cx, &args[0]);
    cx.env.output.println(cx.env.robot, cx.env.round, &text)?;
    Ok(Value::Null)
}

fn system_arraycopy(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let src = args[0].as_obj()?.as_array()?;
    let src_pos = args[1].as_int()?;
    let dst = args[2].as_obj()?.as_array()?;
    let dst_pos = args[3].as_int()?;
    let len = args[4].as_int()?;
    cx.monitor.defer(len);

    let copied: Vec<Value> = {
        let items = src.borrow();
        let range = slice_range(src_pos, len, items.len())?;
        items[range].to_vec()
    };
    let mut items = dst.borrow_mut();
    let range = slice_range(dst_pos, len, items.len())?;
    items[range].clone_from_slice(&copied);
    Ok(Value::Null)
}

fn slice_range(pos: i32, len: i32, total: usize) -> Result<std::ops::Range<usize>, Fault> {
    let out_of_range = || {
        Fault::new(
            FaultClass::Index,
            format!("copy of {len} at {pos} out of bounds for length {total}"),
        )
    };
    let start = usize::try_from(pos).map_err(|_| out_of_range())?;
    let count = usize::try_from(len).map_err(|_| out_of_range())?;
    let end = start.checked_add(count).filter(|&e| e <= total).ok_or_else(out_of_range)?;
    Ok(start..end)
}

fn regex_matches(cx: &mut NativeCx<'_, '_>, args: &[Value]) -> NativeResult {
    let text = args[0].as_str()?;
    let pattern = args[1].as_str()?;
    cx.monitor.defer(len_i32(pattern.len()));
    let (re, compile) = cx.support.pattern(pattern)?;
    cx.monitor.defer(compile.saturating_add(search_cost(&re, text.len())));
    Ok(Value::from(re.is_match(text)))
}

fn clock_logical_time(cx: &mut NativeCx<'_, '_>, _: &[Value]) -> NativeResult {
    Ok(Value::Int(i32::try_from(cx.monitor.logical_time()).unwrap_or(i32::MAX)))
}

fn clock_yield(cx: &mut NativeCx<'_, '_>, _: &[Value]) -> NativeResult {
    cx.signal = Some(Signal::Yield);
    Ok(Value::Null)
}

fn clock_bytecodes_left(cx: &mut NativeCx<'_, '_>, _: &[Value]) -> NativeResult {
    Ok(Value::Int(cx.monitor.bytecodes_left()))
}

fn clock_bytecode_num(cx: &mut NativeCx<'_, '_>, _: &[Value]) -> NativeResult {
    Ok(Value::Int(cx.monitor.bytecode_num()))
}
