//! Program validation command implementation.

use super::{CliError, load_program};
use bytecage::ExecutionContext;
use std::path::Path;
use std::sync::Arc;

/// Execute the validate command.
///
/// # Errors
///
/// Returns an error if the program cannot be read, or any unit is MISSING
/// or ILLEGAL.
pub(crate) fn execute(path: &Path, debug_methods: bool) -> Result<(), CliError> {
    let program = load_program(path, debug_methods)?;

    println!("Validating: {} ({})", path.display(), program.id());
    println!();

    let mut failures = 0;
    for unit in program.unit_names() {
        match program.check(unit) {
            Ok(()) => print_check(unit, None),
            Err(e) => {
                failures += 1;
                print_check(unit, Some(&e.to_string()));
            }
        }
    }

    println!();
    match program.entry_unit() {
        Some(entry) => match ExecutionContext::new(Arc::clone(&program), 0) {
            Ok(ctx) => {
                println!("Entry {entry}: links {} units", ctx.loaded_units().count());
            }
            Err(e) => {
                failures += 1;
                println!("Entry {entry}: {e}");
            }
        },
        None => {
            failures += 1;
            println!("No RobotPlayer unit");
        }
    }

    if failures > 0 {
        return Err(CliError::new(format!("{failures} problem(s) found")));
    }
    println!();
    println!("Validation successful!");
    Ok(())
}

fn print_check(name: &str, error: Option<&str>) {
    match error {
        None => println!("  ✓ {name}: OK"),
        Some(e) => println!("  ✗ {name}: {e}"),
    }
}
