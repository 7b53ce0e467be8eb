//! Shared helpers for the integration tests: write programs to disk, run
//! them through a fresh engine, and hand the engine back for inspection.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use meow_vm::{ExecutionEngine, GcRef, ObjModule, Value, VmArgs, VmResult};

/// Runs a single-file program; the tempdir lives until the engine is done.
pub fn run_source(source: &str) -> (ExecutionEngine, VmResult<()>) {
    let dir = tempfile::tempdir().unwrap();
    run_in_dir(dir.path(), &[("main.meow", source)], "main.meow")
}

/// Writes `files` into `dir` and runs `entry`.
pub fn run_in_dir(
    dir: &Path,
    files: &[(&str, &str)],
    entry: &str,
) -> (ExecutionEngine, VmResult<()>) {
    for (name, source) in files {
        std::fs::write(dir.join(name), source).unwrap();
    }
    let args = VmArgs::new(dir.join(entry), Vec::new());
    let mut engine = ExecutionEngine::new(args);
    let result = engine.interpret();
    (engine, result)
}

/// Register `index` of the bottom (entry) frame after a HALT.
pub fn entry_register(engine: &ExecutionEngine, index: usize) -> Value {
    let base = engine.context().frames()[0].base();
    engine.context().register(base + index)
}

/// The entry module, looked up through the cache by its requested path.
pub fn entry_module(engine: &ExecutionEngine) -> GcRef<ObjModule> {
    let requested = engine.args().entry_path.to_string_lossy().into_owned();
    engine
        .modules()
        .lookup(&requested)
        .expect("entry module cached")
}

/// An export of a module, by name.
pub fn module_export(
    engine: &mut ExecutionEngine,
    module: GcRef<ObjModule>,
    name: &str,
) -> Option<Value> {
    let name = engine.heap_mut().new_string(name);
    engine.heap().module(module).export(name)
}

/// Convenience: an export of the entry module.
pub fn entry_export(engine: &mut ExecutionEngine, name: &str) -> Option<Value> {
    let module = entry_module(engine);
    module_export(engine, module, name)
}

pub fn entry_path(engine: &ExecutionEngine) -> PathBuf {
    engine.args().entry_path.clone()
}
