//! Reference policy: which names player code may touch, and which library
//! calls are swapped for deterministic equivalents.

use crate::cost::CostTable;
use crate::isa::MethodRef;
use crate::library;

/// Namespace prefixes player units may not occupy.
pub(crate) const RESERVED_PREFIXES: [&str; 3] = ["std/", "sys/", "bc/"];

/// Engine-internal namespace.
pub(crate) const SYS_PREFIX: &str = "sys/";

/// Units whose every routine is a forbidden capability.
const FORBIDDEN_UNITS: [(&str, &str); 5] = [
    ("std/Thread", "spawning threads"),
    ("std/Reflect", "reflective introspection"),
    ("std/Net", "network access"),
    ("std/File", "file access"),
    ("std/Process", "process control"),
];

/// Individually forbidden routines.
const FORBIDDEN_ROUTINES: [(&str, &str, &str); 8] = [
    ("std/Object", "wait", "thread synchronization"),
    ("std/Object", "notify", "thread synchronization"),
    ("std/Object", "notifyAll", "thread synchronization"),
    ("std/System", "exit", "process control"),
    ("std/System", "gc", "collector control"),
    ("std/System", "getenv", "environment access"),
    ("std/System", "getProperty", "environment access"),
    ("std/System", "loadLibrary", "native code loading"),
];

/// How a call target is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    /// A routine in the player's own program.
    Program,
    /// A trusted library unit written in IR and rewritten with checks off.
    Library,
    /// A native surface routine listed in the cost table.
    Native,
    /// Not known here; the execution context reports it as missing.
    Unresolved,
}

/// Reason a reference was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rejection(pub(crate) String);

/// Whether a name lies in a reserved namespace.
pub(crate) fn is_reserved(name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Why `m` is forbidden outright, if it is.
pub(crate) fn forbidden(unit: &str, name: &str) -> Option<&'static str> {
    if let Some((_, why)) = FORBIDDEN_UNITS.iter().find(|(u, _)| *u == unit) {
        return Some(why);
    }
    FORBIDDEN_ROUTINES
        .iter()
        .find(|(u, r, _)| *u == unit && *r == name)
        .map(|(_, _, why)| *why)
}

/// Classify a call target. `is_program` answers whether a unit belongs to
/// the program being rewritten.
///
/// With `check` on, forbidden capabilities, engine-internal names and
/// library routines off the allow-list are rejected.
pub(crate) fn classify_call(
    target: &MethodRef,
    check: bool,
    costs: &CostTable,
    is_program: &dyn Fn(&str) -> bool,
) -> Result<CallKind, Rejection> {
    let unit = target.unit.as_str();
    if !is_reserved(unit) && is_program(unit) {
        return Ok(CallKind::Program);
    }
    if check {
        if let Some(why) = forbidden(unit, &target.name) {
            return Err(Rejection(format!("{target} is forbidden ({why})")));
        }
        if unit.starts_with(SYS_PREFIX) {
            return Err(Rejection(format!("{target} is engine-internal")));
        }
    }
    if library::has_unit(unit) {
        return Ok(CallKind::Library);
    }
    if costs.allows(unit, &target.name) {
        return Ok(CallKind::Native);
    }
    if unit.starts_with(SYS_PREFIX) && !check {
        return Ok(CallKind::Native);
    }
    if check && is_reserved(unit) {
        return Err(Rejection(format!(
            "{target} is not part of the allowed library surface"
        )));
    }
    Ok(CallKind::Unresolved)
}

/// A determinism substitution for a library call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Redirect {
    /// Call this routine instead; same arguments.
    To(MethodRef),
    /// Replace an unseeded generator with one seeded from the monitor.
    SeededRandom,
}

/// The substitution applied to `target`, if any.
pub(crate) fn redirect(target: &MethodRef) -> Option<Redirect> {
    let to = |unit: &str, name: &str| Some(Redirect::To(MethodRef::new(unit, name, target.argc)));
    match (target.unit.as_str(), target.name.as_str()) {
        ("std/Object", "hashCode") => to("sys/ObjectMethods", "hashCode"),
        ("std/Object", "toString") => to("sys/ObjectMethods", "toString"),
        ("std/System", "identityHashCode") => to("sys/ObjectMethods", "identityHashCode"),
        ("std/Random", "new") => Some(Redirect::SeededRandom),
        ("std/Math", "random") => to("sys/Random", "next"),
        ("std/System", "currentTimeMillis" | "nanoTime") => to("sys/Clock", "logicalTime"),
        ("std/System", "print") => to("sys/System", "print"),
        ("std/System", "println") => to("sys/System", "println"),
        ("std/System", "arraycopy") => to("sys/System", "arraycopy"),
        ("std/String", "matches") => to("sys/Regex", "matches"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_program(_: &str) -> bool {
        false
    }

    #[test]
    fn test_thread_spawn_rejected_when_checking() {
        let call = MethodRef::new("std/Thread", "start", 1);
        let err = classify_call(&call, true, CostTable::builtin(), &no_program).unwrap_err();
        assert!(err.0.contains("spawning threads"));
    }

    #[test]
    fn test_sys_rejected_only_when_checking() {
        let call = MethodRef::new("sys/Monitor", "randomSeed", 0);
        assert!(classify_call(&call, true, CostTable::builtin(), &no_program).is_err());
        assert_eq!(
            classify_call(&call, false, CostTable::builtin(), &no_program),
            Ok(CallKind::Native)
        );
    }

    #[test]
    fn test_unlisted_library_routine_rejected() {
        let call = MethodRef::new("std/Math", "fma", 3);
        let err = classify_call(&call, true, CostTable::builtin(), &no_program).unwrap_err();
        assert!(err.0.contains("allowed library surface"));
    }

    #[test]
    fn test_unknown_namespace_left_unresolved() {
        let call = MethodRef::new("team/Helper", "go", 0);
        assert_eq!(
            classify_call(&call, true, CostTable::builtin(), &no_program),
            Ok(CallKind::Unresolved)
        );
        let is_team = |u: &str| u.starts_with("team/");
        assert_eq!(
            classify_call(&call, true, CostTable::builtin(), &is_team),
            Ok(CallKind::Program)
        );
    }

    #[test]
    fn test_redirects() {
        assert_eq!(
            redirect(&MethodRef::new("std/Object", "hashCode", 1)),
            Some(Redirect::To(MethodRef::new("sys/ObjectMethods", "hashCode", 1)))
        );
        assert_eq!(
            redirect(&MethodRef::new("std/Random", "new", 0)),
            Some(Redirect::SeededRandom)
        );
        assert_eq!(redirect(&MethodRef::new("std/Math", "abs", 1)), None);
    }
}
