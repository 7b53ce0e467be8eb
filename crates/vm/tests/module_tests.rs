//! Module loading, exports, and import cycles.

mod common;

use common::{entry_export, entry_module, module_export, run_in_dir};
use meow_vm::{ModuleState, Value, VmError, VmState};

#[test]
fn test_import_and_read_export() {
    let dir = tempfile::tempdir().unwrap();
    let (mut engine, result) = run_in_dir(
        dir.path(),
        &[
            (
                "lib.meow",
                ".func main\n\
                 .registers 1\n.upvalues 0\n\
                 LOAD_INT 0 99\n\
                 EXPORT \"answer\" 0\n\
                 RETURN -1\n\
                 .endfunc",
            ),
            (
                "main.meow",
                ".func main\n\
                 .registers 2\n.upvalues 0\n\
                 IMPORT_MODULE 0 \"lib.meow\"\n\
                 GET_EXPORT 1 0 \"answer\"\n\
                 EXPORT \"copied\" 1\n\
                 RETURN -1\n\
                 .endfunc",
            ),
        ],
        "main.meow",
    );
    result.unwrap();
    assert_eq!(engine.state(), VmState::HALT);
    assert_eq!(entry_export(&mut engine, "copied"), Some(Value::Int(99)));

    let lib = engine.modules().lookup("lib.meow").expect("lib cached");
    assert_eq!(engine.heap().module(lib).state(), ModuleState::Executed);
}

#[test]
fn test_import_cycle_sees_partial_exports() {
    let dir = tempfile::tempdir().unwrap();
    let (mut engine, result) = run_in_dir(
        dir.path(),
        &[
            (
                "a.meow",
                ".func main\n\
                 .registers 2\n.upvalues 0\n\
                 LOAD_INT 0 1\n\
                 EXPORT \"aval\" 0\n\
                 IMPORT_MODULE 1 \"b.meow\"\n\
                 GET_EXPORT 0 1 \"bval\"\n\
                 EXPORT \"fromB\" 0\n\
                 RETURN -1\n\
                 .endfunc",
            ),
            (
                "b.meow",
                ".func main\n\
                 .registers 2\n.upvalues 0\n\
                 LOAD_INT 0 2\n\
                 EXPORT \"bval\" 0\n\
                 IMPORT_MODULE 1 \"a.meow\"\n\
                 GET_EXPORT 0 1 \"aval\"\n\
                 EXPORT \"fromA\" 0\n\
                 RETURN -1\n\
                 .endfunc",
            ),
        ],
        "a.meow",
    );
    result.unwrap();

    // Both modules completed and each saw the other's pre-import export.
    let a = entry_module(&engine);
    let b = engine.modules().lookup("b.meow").expect("b cached");
    assert_eq!(engine.heap().module(a).state(), ModuleState::Executed);
    assert_eq!(engine.heap().module(b).state(), ModuleState::Executed);

    assert_eq!(module_export(&mut engine, a, "aval"), Some(Value::Int(1)));
    assert_eq!(module_export(&mut engine, a, "fromB"), Some(Value::Int(2)));
    assert_eq!(module_export(&mut engine, b, "bval"), Some(Value::Int(2)));
    assert_eq!(module_export(&mut engine, b, "fromA"), Some(Value::Int(1)));
}

#[test]
fn test_repeated_import_reuses_the_instance() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, result) = run_in_dir(
        dir.path(),
        &[
            (
                "counter.meow",
                ".func main\n\
                 .registers 1\n.upvalues 0\n\
                 LOAD_INT 0 1\n\
                 EXPORT \"one\" 0\n\
                 RETURN -1\n\
                 .endfunc",
            ),
            (
                "main.meow",
                ".func main\n\
                 .registers 3\n.upvalues 0\n\
                 IMPORT_MODULE 0 \"counter.meow\"\n\
                 IMPORT_MODULE 1 \"counter.meow\"\n\
                 EQ 2 0 1\n\
                 HALT\n\
                 .endfunc",
            ),
        ],
        "main.meow",
    );
    result.unwrap();
    let base = engine.context().frames()[0].base();
    assert_eq!(engine.context().register(base + 2), Value::Bool(true));
}

#[test]
fn test_import_all_copies_exports_into_globals() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, result) = run_in_dir(
        dir.path(),
        &[
            (
                "lib.meow",
                ".func main\n\
                 .registers 1\n.upvalues 0\n\
                 LOAD_INT 0 5\n\
                 EXPORT \"five\" 0\n\
                 RETURN -1\n\
                 .endfunc",
            ),
            (
                "main.meow",
                ".func main\n\
                 .registers 2\n.upvalues 0\n\
                 IMPORT_MODULE 0 \"lib.meow\"\n\
                 IMPORT_ALL 0\n\
                 GET_GLOBAL 1 \"five\"\n\
                 HALT\n\
                 .endfunc",
            ),
        ],
        "main.meow",
    );
    result.unwrap();
    let base = engine.context().frames()[0].base();
    assert_eq!(engine.context().register(base + 1), Value::Int(5));
}

#[test]
fn test_missing_module_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, result) = run_in_dir(
        dir.path(),
        &[(
            "main.meow",
            ".func main\n\
             .registers 1\n.upvalues 0\n\
             IMPORT_MODULE 0 \"ghost.meow\"\n\
             HALT\n\
             .endfunc",
        )],
        "main.meow",
    );
    assert!(matches!(result, Err(VmError::ModuleLoad { .. })));
}

#[test]
fn test_broken_module_reports_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, result) = run_in_dir(
        dir.path(),
        &[
            ("broken.meow", ".func main\n.registers"),
            (
                "main.meow",
                ".func main\n\
                 .registers 1\n.upvalues 0\n\
                 IMPORT_MODULE 0 \"broken.meow\"\n\
                 HALT\n\
                 .endfunc",
            ),
        ],
        "main.meow",
    );
    assert!(matches!(result, Err(VmError::Parse { .. })));
    // The failed module never entered the cache.
    assert!(engine.modules().lookup("broken.meow").is_none());
}

#[test]
fn test_module_prop_reads_exports() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, result) = run_in_dir(
        dir.path(),
        &[
            (
                "lib.meow",
                ".func main\n\
                 .registers 1\n.upvalues 0\n\
                 LOAD_INT 0 3\n\
                 EXPORT \"three\" 0\n\
                 RETURN -1\n\
                 .endfunc",
            ),
            (
                "main.meow",
                ".func main\n\
                 .registers 2\n.upvalues 0\n\
                 IMPORT_MODULE 0 \"lib.meow\"\n\
                 GET_PROP 1 0 \"three\"\n\
                 HALT\n\
                 .endfunc",
            ),
        ],
        "main.meow",
    );
    result.unwrap();
    let base = engine.context().frames()[0].base();
    assert_eq!(engine.context().register(base + 1), Value::Int(3));
}
