//! Programs: a snapshot of unit sources plus the shared cache of their
//! rewritten images.
//!
//! A [`Program`] is the scope of the image cache. Two programs never share
//! images, even when they contain units with the same name. Once any unit of
//! a program fails to load, the error is latched and every later load fails
//! the same way without retrying.

mod source;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::InstrumentationError;
use crate::isa::assemble;
use crate::library;
use crate::rewriter::{RewriteOptions, RewrittenImage, rewrite};

pub use source::{
    ArchiveSource, DirectorySource, MemorySource, ProgramSource, SourceError, UNIT_EXTENSION,
};

/// Last path segment of a program's entry unit.
pub const ENTRY_UNIT: &str = "RobotPlayer";

/// Name of the per-turn entry routine.
pub const ENTRY_ROUTINE: &str = "run";

/// SHA-256 over a program's sorted `(name, source)` pairs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId([u8; 32]);

impl ProgramId {
    fn of(units: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        for (name, text) in units {
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update((text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramId({self})")
    }
}

/// An immutable snapshot of one team's program and its image cache.
#[derive(Debug)]
pub struct Program {
    id: ProgramId,
    name: String,
    units: BTreeMap<String, String>,
    debug_methods: bool,
    images: RwLock<HashMap<String, Arc<RewrittenImage>>>,
    latch: OnceLock<InstrumentationError>,
}

impl Program {
    /// Snapshot every unit of `source`.
    ///
    /// # Errors
    ///
    /// Returns the source's error if it cannot be read.
    pub fn open(source: &dyn ProgramSource, debug_methods: bool) -> Result<Self, SourceError> {
        let units = source.units()?;
        let program = Self::from_units(source.name(), units, debug_methods);
        debug!(program = %program.name, id = %program.id, units = program.units.len(), "opened program");
        Ok(program)
    }

    /// Build a program from units already in memory.
    #[must_use]
    pub fn from_units(
        name: impl Into<String>,
        units: BTreeMap<String, String>,
        debug_methods: bool,
    ) -> Self {
        Self {
            id: ProgramId::of(&units),
            name: name.into(),
            units,
            debug_methods,
            images: RwLock::new(HashMap::new()),
            latch: OnceLock::new(),
        }
    }

    /// Content identity.
    #[must_use]
    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether debug routines are live for this program.
    #[must_use]
    pub fn debug_methods(&self) -> bool {
        self.debug_methods
    }

    /// Whether `name` is one of the program's own units.
    #[must_use]
    pub fn has_unit(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    /// Names of the program's own units, sorted.
    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    /// Raw source of one of the program's units.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<&str> {
        self.units.get(name).map(String::as_str)
    }

    /// The entry unit: the first unit, in name order, whose last path
    /// segment is `RobotPlayer`.
    #[must_use]
    pub fn entry_unit(&self) -> Option<&str> {
        self.unit_names()
            .find(|name| name.rsplit('/').next() == Some(ENTRY_UNIT))
    }

    /// The latched load error, if any unit has failed.
    #[must_use]
    pub fn latched(&self) -> Option<&InstrumentationError> {
        self.latch.get()
    }

    /// Latch `err` unless an earlier error is already latched; returns the
    /// latched error.
    pub fn latch(&self, err: InstrumentationError) -> InstrumentationError {
        if self.latch.set(err.clone()).is_ok() {
            warn!(program = %self.name, error = %err, "program failed to load");
            return err;
        }
        self.latch.get().cloned().unwrap_or(err)
    }

    /// Number of cached images.
    #[must_use]
    pub fn cached_images(&self) -> usize {
        self.images.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// The rewritten image of a program or library unit, building and
    /// caching it on first use. `Ok(None)` means the name is neither.
    ///
    /// # Errors
    ///
    /// Returns the latched error, or the error from assembling or rewriting
    /// the unit (which is then latched).
    pub fn image(&self, name: &str) -> Result<Option<Arc<RewrittenImage>>, InstrumentationError> {
        if let Some(err) = self.latched() {
            return Err(err.clone());
        }
        if let Some(image) = self.cached(name) {
            return Ok(Some(image));
        }
        let (text, options) = if let Some(text) = self.source(name) {
            (text, RewriteOptions::player(self.debug_methods))
        } else if let Some(text) = library::source(name) {
            (text, RewriteOptions::trusted())
        } else {
            return Ok(None);
        };
        let built = self.build(name, text, options).map_err(|e| self.latch(e))?;
        let mut images = self.images.write().unwrap_or_else(PoisonError::into_inner);
        let image = images.entry(name.to_string()).or_insert_with(|| Arc::new(built));
        Ok(Some(Arc::clone(image)))
    }

    /// Assemble and rewrite one program unit without caching or latching.
    ///
    /// # Errors
    ///
    /// Returns the unit's MISSING or ILLEGAL error, or MISSING if the
    /// program has no such unit.
    pub fn check(&self, name: &str) -> Result<(), InstrumentationError> {
        let text = self
            .source(name)
            .ok_or_else(|| InstrumentationError::missing(name, "no such unit in the program"))?;
        self.build(name, text, RewriteOptions::player(self.debug_methods))
            .map(|_| ())
    }

    fn cached(&self, name: &str) -> Option<Arc<RewrittenImage>> {
        self.images
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn build(
        &self,
        name: &str,
        text: &str,
        options: RewriteOptions,
    ) -> Result<RewrittenImage, InstrumentationError> {
        let unit = assemble(name, text).map_err(|e| {
            InstrumentationError::illegal(name, format!("malformed unit: {e}"))
        })?;
        let image = rewrite(&unit, options, &|n| self.has_unit(n))?;
        debug!(program = %self.name, unit = name, "rewrote unit");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstrumentationKind;

    fn program(units: &[(&str, &str)]) -> Program {
        let units = units
            .iter()
            .map(|(n, s)| ((*n).to_string(), (*s).to_string()))
            .collect();
        Program::from_units("test", units, false)
    }

    const EMPTY: &str = ".routine run 0\n return\n.end";

    #[test]
    fn test_identity_depends_on_content() {
        let a = program(&[("t/RobotPlayer", EMPTY)]);
        let b = program(&[("t/RobotPlayer", EMPTY)]);
        let c = program(&[("t/RobotPlayer", ".routine run 0\n nop\n return\n.end")]);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().to_string().len(), 64);
    }

    #[test]
    fn test_entry_unit() {
        let p = program(&[("t/Helper", EMPTY), ("t/RobotPlayer", EMPTY)]);
        assert_eq!(p.entry_unit(), Some("t/RobotPlayer"));
        assert_eq!(program(&[("t/Helper", EMPTY)]).entry_unit(), None);
    }

    #[test]
    fn test_images_are_cached() {
        let p = program(&[("t/RobotPlayer", EMPTY)]);
        let first = p.image("t/RobotPlayer").unwrap().unwrap();
        let second = p.image("t/RobotPlayer").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(p.cached_images(), 1);
    }

    #[test]
    fn test_library_units_resolve_through_program() {
        let p = program(&[("t/RobotPlayer", EMPTY)]);
        assert!(p.image("std/util/IntList").unwrap().is_some());
        assert!(p.image("t/Nope").unwrap().is_none());
    }

    #[test]
    fn test_failure_is_latched() {
        let bad = ".routine run 0\n call std/Thread.start 0\n return\n.end";
        let p = program(&[("t/Bad", bad), ("t/RobotPlayer", EMPTY)]);
        let err = p.image("t/Bad").unwrap_err();
        assert_eq!(err.kind, InstrumentationKind::Illegal);
        let again = p.image("t/RobotPlayer").unwrap_err();
        assert_eq!(again, err);
        assert_eq!(p.cached_images(), 0);
    }

    #[test]
    fn test_assembly_errors_are_illegal() {
        let p = program(&[("t/RobotPlayer", ".routine run 0\n frobnicate\n.end")]);
        let err = p.image("t/RobotPlayer").unwrap_err();
        assert!(err.is_illegal());
        assert!(err.message.contains("malformed"));
    }

    #[test]
    fn test_check_does_not_latch() {
        let bad = ".routine run 0\n call std/Thread.start 0\n return\n.end";
        let p = program(&[("t/Bad", bad), ("t/RobotPlayer", EMPTY)]);
        assert!(p.check("t/Bad").unwrap_err().is_illegal());
        assert!(p.check("t/RobotPlayer").is_ok());
        assert_eq!(p.check("t/Gone").unwrap_err().kind, InstrumentationKind::Missing);
        assert!(p.latched().is_none());
    }
}
