//! The sandboxed instruction set: a small stack machine.
//!
//! Programs are sets of [`CodeUnit`]s written in a text assembly and
//! assembled here. The rewriter and interpreter both work on this IR.

mod asm;
mod disasm;
mod op;

pub use asm::{AsmError, assemble};
pub use disasm::mnemonic;
pub use op::{CodeUnit, DEBUG_PREFIX, FieldRef, Handler, MethodRef, Op, Routine, STATIC_INIT};
