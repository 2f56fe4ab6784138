//! Trusted library units shipped with the engine.
//!
//! These are written in the same IR as player code and go through the
//! rewriter with checks off, so they are metered like anything else. Each
//! robot loads its own copy; statics here are never shared.

const UNITS: [(&str, &str); 2] = [
    ("std/util/IntList", include_str!("library/IntList.bca")),
    ("std/util/IntMap", include_str!("library/IntMap.bca")),
];

/// Whether `name` is a library unit.
#[must_use]
pub fn has_unit(name: &str) -> bool {
    UNITS.iter().any(|(n, _)| *n == name)
}

/// Assembly source of a library unit.
#[must_use]
pub fn source(name: &str) -> Option<&'static str> {
    UNITS.iter().find(|(n, _)| *n == name).map(|(_, s)| *s)
}

/// Names of every library unit.
pub fn unit_names() -> impl Iterator<Item = &'static str> {
    UNITS.iter().map(|(n, _)| *n)
}
