//! Runtime values and the per-robot heap meter.
//!
//! Objects are reference counted and never shared between robots: every
//! value a robot can reach was created inside its own execution context.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rand_chacha::ChaCha8Rng;

use super::fault::{Fault, FaultClass};

/// A stack, local or static value.
#[derive(Clone, Default)]
pub enum Value {
    /// The null reference.
    #[default]
    Null,
    /// A 32-bit signed integer.
    Int(i32),
    /// An immutable string.
    Str(Rc<Text>),
    /// A heap object.
    Obj(Rc<Object>),
}

impl Value {
    /// Build a string value.
    #[must_use]
    pub fn str(text: &str) -> Self {
        Value::Str(Rc::new(Text {
            text: text.into(),
            _charge: None,
        }))
    }

    /// Read an integer operand.
    ///
    /// # Errors
    ///
    /// Returns a `std/NullError` for null and a `std/TypeError` for any
    /// other non-integer.
    pub fn as_int(&self) -> Result<i32, Fault> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Null => Err(Fault::new(FaultClass::Null, "expected an integer, found null")),
            other => Err(Fault::type_error(format!("expected an integer, found {}", other.kind()))),
        }
    }

    /// Read a string operand.
    ///
    /// # Errors
    ///
    /// Returns a `std/NullError` for null and a `std/TypeError` otherwise.
    pub fn as_str(&self) -> Result<&str, Fault> {
        match self {
            Value::Str(s) => Ok(s.as_str()),
            Value::Null => Err(Fault::new(FaultClass::Null, "expected a string, found null")),
            other => Err(Fault::type_error(format!("expected a string, found {}", other.kind()))),
        }
    }

    /// Read an object operand.
    ///
    /// # Errors
    ///
    /// Returns a `std/NullError` for null and a `std/TypeError` otherwise.
    pub fn as_obj(&self) -> Result<&Rc<Object>, Fault> {
        match self {
            Value::Obj(o) => Ok(o),
            Value::Null => Err(Fault::new(FaultClass::Null, "null dereference")),
            other => Err(Fault::type_error(format!("expected an object, found {}", other.kind()))),
        }
    }

    /// Truthiness used by conditional jumps: non-zero integers and any
    /// non-null reference.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(v) => *v != 0,
            Value::Str(_) | Value::Obj(_) => true,
        }
    }

    /// Equality used by `eq`/`ne`: integers by value, strings by content,
    /// objects by identity.
    #[must_use]
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Short kind name for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Obj(o) => o.kind_name(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{:?}", s.as_str()),
            Value::Obj(o) => write!(f, "<{}>", o.kind_name()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i32::from(v))
    }
}

/// String contents. Strings built at run time hold one heap cell per byte.
pub struct Text {
    text: Box<str>,
    _charge: Option<HeapCharge>,
}

impl Text {
    /// The contents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.text)
    }
}

/// A heap object with a lazily assigned identity code.
pub struct Object {
    identity: Cell<Option<i32>>,
    /// Object payload.
    pub kind: ObjectKind,
    _charge: Option<HeapCharge>,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("identity", &self.identity.get())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Object payloads.
#[derive(Debug)]
pub enum ObjectKind {
    /// A mutable array.
    Array(RefCell<Vec<Value>>),
    /// A raised or constructed fault.
    Fault(Fault),
    /// A seeded random generator.
    Random(RefCell<ChaCha8Rng>),
}

impl Object {
    /// Wrap a payload that is not heap-metered.
    #[must_use]
    pub fn unmetered(kind: ObjectKind) -> Rc<Self> {
        Rc::new(Self {
            identity: Cell::new(None),
            kind,
            _charge: None,
        })
    }

    /// Wrap a payload, holding its heap reservation until dropped.
    #[must_use]
    pub fn metered(kind: ObjectKind, charge: HeapCharge) -> Rc<Self> {
        Rc::new(Self {
            identity: Cell::new(None),
            kind,
            _charge: Some(charge),
        })
    }

    /// The identity code, assigning one from `next` on first request.
    pub fn identity(&self, next: impl FnOnce() -> i32) -> i32 {
        if let Some(code) = self.identity.get() {
            return code;
        }
        let code = next();
        self.identity.set(Some(code));
        code
    }

    /// Array elements, if this is an array.
    ///
    /// # Errors
    ///
    /// Returns a `std/TypeError` for non-arrays.
    pub fn as_array(&self) -> Result<&RefCell<Vec<Value>>, Fault> {
        match &self.kind {
            ObjectKind::Array(items) => Ok(items),
            _ => Err(Fault::type_error(format!("expected an array, found {}", self.kind_name()))),
        }
    }

    /// Short kind name for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ObjectKind::Array(_) => "array",
            ObjectKind::Fault(_) => "error",
            ObjectKind::Random(_) => "random",
        }
    }
}

/// Tracks live heap cells for one robot.
#[derive(Debug, Clone)]
pub struct HeapMeter {
    used: Rc<Cell<usize>>,
    limit: usize,
}

impl HeapMeter {
    /// A meter allowing `limit` live cells.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            used: Rc::new(Cell::new(0)),
            limit,
        }
    }

    /// Reserve `cells` cells, released when the returned charge drops.
    ///
    /// # Errors
    ///
    /// Returns a `sys/OutOfMemory` fault when the limit would be exceeded.
    pub fn reserve(&self, cells: usize) -> Result<HeapCharge, Fault> {
        let cells = cells.max(1);
        let next = self.used.get().saturating_add(cells);
        if next > self.limit {
            return Err(Fault::new(
                FaultClass::OutOfMemory,
                format!("heap limit of {} cells exceeded", self.limit),
            ));
        }
        self.used.set(next);
        Ok(HeapCharge {
            used: Rc::clone(&self.used),
            cells,
        })
    }

    /// Cells currently live.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.get()
    }

    /// Allocate an array holding `items`, one cell per element.
    ///
    /// # Errors
    ///
    /// Returns an out-of-memory fault when the limit would be exceeded.
    pub fn array(&self, items: Vec<Value>) -> Result<Value, Fault> {
        let charge = self.reserve(items.len())?;
        Ok(Value::Obj(Object::metered(
            ObjectKind::Array(RefCell::new(items)),
            charge,
        )))
    }

    /// Allocate a string, one cell per byte.
    ///
    /// # Errors
    ///
    /// Returns an out-of-memory fault when the limit would be exceeded.
    pub fn string(&self, text: String) -> Result<Value, Fault> {
        let charge = self.reserve(text.len())?;
        Ok(Value::Str(Rc::new(Text {
            text: text.into_boxed_str(),
            _charge: Some(charge),
        })))
    }

    /// Allocate a single-cell object.
    ///
    /// # Errors
    ///
    /// Returns an out-of-memory fault when the limit would be exceeded.
    pub fn object(&self, kind: ObjectKind) -> Result<Value, Fault> {
        let charge = self.reserve(1)?;
        Ok(Value::Obj(Object::metered(kind, charge)))
    }
}

/// A heap reservation, returned to its meter on drop.
#[derive(Debug)]
pub struct HeapCharge {
    used: Rc<Cell<usize>>,
    cells: usize,
}

impl Drop for HeapCharge {
    fn drop(&mut self) {
        self.used.set(self.used.get().saturating_sub(self.cells));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_meter_releases_on_drop() {
        let meter = HeapMeter::new(10);
        let a = meter.reserve(6).unwrap();
        assert_eq!(meter.used(), 6);
        assert!(meter.reserve(5).is_err());
        drop(a);
        assert_eq!(meter.used(), 0);
        assert!(meter.reserve(10).is_ok());
    }

    #[test]
    fn test_built_strings_hold_heap_until_dropped() {
        let meter = HeapMeter::new(8);
        let s = meter.string("abcdef".into()).unwrap();
        assert_eq!(meter.used(), 6);
        assert_eq!(s.as_str().unwrap(), "abcdef");
        assert_eq!(
            meter.string("xyz".into()).unwrap_err().class,
            FaultClass::OutOfMemory
        );
        drop(s);
        assert_eq!(meter.used(), 0);
    }

    #[test]
    fn test_zero_sized_reservation_costs_one_cell() {
        let meter = HeapMeter::new(1);
        let _one = meter.reserve(0).unwrap();
        assert_eq!(meter.reserve(0).unwrap_err().class, FaultClass::OutOfMemory);
    }

    #[test]
    fn test_identity_assigned_once() {
        let obj = Object::unmetered(ObjectKind::Array(RefCell::new(Vec::new())));
        let mut counter = 0;
        let first = obj.identity(|| {
            counter += 1;
            counter
        });
        let second = obj.identity(|| 99);
        assert_eq!(first, 1);
        assert_eq!(second, 1);
    }

    #[test]
    fn test_equality_semantics() {
        let a = Value::Obj(Object::unmetered(ObjectKind::Array(RefCell::new(vec![]))));
        let b = Value::Obj(Object::unmetered(ObjectKind::Array(RefCell::new(vec![]))));
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert!(Value::str("x").same(&Value::str("x")));
        assert!(!Value::Int(0).same(&Value::Null));
    }

    #[test]
    fn test_as_int_reports_null_separately() {
        assert_eq!(Value::Null.as_int().unwrap_err().class, FaultClass::Null);
        assert_eq!(Value::str("1").as_int().unwrap_err().class, FaultClass::Type);
    }
}
