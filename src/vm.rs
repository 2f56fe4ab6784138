//! The sandboxed interpreter: values, faults, natives and the resumable
//! machine that runs rewritten units.

mod fault;
mod machine;
pub(crate) mod natives;
mod value;

pub use fault::{ANY_ERROR, Fault, FaultClass, VM_ERROR};
pub use machine::{Exit, Machine, Termination, TurnEnv};
pub use value::{HeapCharge, HeapMeter, Object, ObjectKind, Text, Value};
