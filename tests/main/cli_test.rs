//! CLI contract tests.

use std::fs;
use std::path::PathBuf;

fn main_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/main.rs");
    match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => panic!("main source should load from {}: {err}", path.display()),
    }
}

#[test]
fn main_defines_every_mode() {
    let source = main_source();
    assert!(source.contains("Operator"));
    assert!(source.contains("Adapter"));
    assert!(source.contains("Run"));
    assert!(source.contains("DryRun"));
}

#[test]
fn dry_run_forces_memory_backend() {
    let source = main_source();
    assert!(source.contains("Backend::Memory"));
}

#[test]
fn service_mode_handles_sigterm() {
    let source = main_source();
    assert!(source.contains("SignalKind::terminate"));
}
