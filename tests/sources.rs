//! Loading programs from directories and zip archives on disk.
//!
//! Run with: cargo test --test sources

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::fs;
use std::io::Write;
use std::path::Path;

use bytecage::program::{ArchiveSource, DirectorySource, ProgramSource, SourceError};
use bytecage::{ExecutionContext, Program};
use std::sync::Arc;

const PLAYER: &str = "\
.unit team/RobotPlayer
.routine run 0
    call team/nav/Pathing.step 0
    pop
    return
.end
";

const PATHING: &str = "\
.unit team/nav/Pathing
.routine step 0
    push 1
    ret
.end
";

fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("team/nav")).unwrap();
    fs::write(root.join("team/RobotPlayer.bca"), PLAYER).unwrap();
    fs::write(root.join("team/nav/Pathing.bca"), PATHING).unwrap();
    fs::write(root.join("team/README.txt"), "not a unit").unwrap();
}

fn write_zip(path: &Path) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, text) in [
        ("team/RobotPlayer.bca", PLAYER),
        ("team/nav/Pathing.bca", PATHING),
        ("team/README.txt", "not a unit"),
    ] {
        zip.start_file(name, options).unwrap();
        zip.write_all(text.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn test_directory_source_names_units_by_path() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path());
    let units = DirectorySource::new(dir.path()).units().unwrap();
    let names: Vec<&str> = units.keys().map(String::as_str).collect();
    assert_eq!(names, ["team/RobotPlayer", "team/nav/Pathing"]);
}

#[test]
fn test_archive_and_directory_agree() {
    let dir = tempfile::tempdir().unwrap();
    let tree = dir.path().join("tree");
    write_tree(&tree);
    let archive = dir.path().join("team.zip");
    write_zip(&archive);

    let from_dir = Program::open(&DirectorySource::new(&tree), false).unwrap();
    let from_zip = Program::open(&ArchiveSource::new(&archive), false).unwrap();
    assert_eq!(from_dir.id(), from_zip.id());
    assert_eq!(from_zip.entry_unit(), Some("team/RobotPlayer"));
}

#[test]
fn test_archive_program_links() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("team.zip");
    write_zip(&archive);
    let program = Arc::new(Program::open(&ArchiveSource::new(&archive), false).unwrap());
    let ctx = ExecutionContext::new(Arc::clone(&program), 1).unwrap();
    assert!(ctx.loaded_units().any(|u| u == "team/RobotPlayer"));
    assert!(program.check("team/nav/Pathing").is_ok());
}

#[test]
fn test_snapshot_ignores_later_edits() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path());
    let program = Program::open(&DirectorySource::new(dir.path()), false).unwrap();
    fs::write(dir.path().join("team/nav/Pathing.bca"), "garbage").unwrap();
    assert_eq!(program.source("team/nav/Pathing"), Some(PATHING));
    assert!(program.check("team/nav/Pathing").is_ok());
}

#[test]
fn test_empty_and_missing_sources() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        DirectorySource::new(dir.path()).units(),
        Err(SourceError::Empty(_))
    ));
    assert!(matches!(
        ArchiveSource::new(dir.path().join("nope.zip")).units(),
        Err(SourceError::Io { .. })
    ));

    let junk = dir.path().join("junk.zip");
    fs::write(&junk, b"definitely not a zip").unwrap();
    assert!(matches!(
        ArchiveSource::new(&junk).units(),
        Err(SourceError::Archive { .. })
    ));
}
