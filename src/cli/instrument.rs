//! Instrument command implementation.

use super::{CliError, load_program};
use std::path::Path;

/// Print the rewritten disassembly of one unit.
///
/// # Errors
///
/// Returns an error if the program cannot be read or the unit fails to
/// rewrite.
pub(crate) fn execute(path: &Path, unit: &str, debug_methods: bool) -> Result<(), CliError> {
    let program = load_program(path, debug_methods)?;
    let image = program
        .image(unit)
        .map_err(|e| CliError::new(e.to_string()))?
        .ok_or_else(|| CliError::new(format!("no unit named {unit}")))?;
    print!("{}", image.unit());
    Ok(())
}
