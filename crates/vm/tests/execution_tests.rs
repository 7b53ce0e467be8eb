//! End-to-end execution scenarios: arithmetic, closures, try/throw,
//! classes, collections, and boundary behaviour.

mod common;

use common::{entry_export, entry_register, run_source};
use meow_vm::{Value, VmError, VmState};

#[test]
fn test_arithmetic_program() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 2\n.upvalues 0\n\
         LOAD_INT 0 20\n\
         LOAD_INT 1 22\n\
         ADD 0 0 1\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(engine.state(), VmState::HALT);
    assert_eq!(entry_register(&engine, 0), Value::Int(42));
}

#[test]
fn test_closure_captures_local() {
    let (engine, result) = run_source(
        ".func makeAdder\n\
         .registers 3\n.upvalues 1\n\
         .upvalue 0 local 0\n\
         GET_UPVALUE 1 0\n\
         ADD 2 1 0\n\
         RETURN 2\n\
         .endfunc\n\
         .func main\n\
         .registers 3\n.upvalues 0\n\
         LOAD_INT 0 10\n\
         CLOSURE 1 @makeAdder 1 0\n\
         LOAD_INT 2 5\n\
         CALL 0 1 2 1\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(entry_register(&engine, 0), Value::Int(15));
    // The callee returned, so its window is gone and no upvalue points at
    // a dead slot. Main's captured register is still live, so its upvalue
    // stays open.
    assert_eq!(engine.context().register_count(), 3);
    assert_eq!(engine.context().open_upvalues().len(), 1);
}

#[test]
fn test_upvalue_closes_when_main_returns() {
    let (mut engine, result) = run_source(
        ".func makeAdder\n\
         .registers 3\n.upvalues 1\n\
         .upvalue 0 local 0\n\
         GET_UPVALUE 1 0\n\
         ADD 2 1 0\n\
         RETURN 2\n\
         .endfunc\n\
         .func main\n\
         .registers 3\n.upvalues 0\n\
         LOAD_INT 0 10\n\
         CLOSURE 1 @makeAdder 1 0\n\
         EXPORT \"adder\" 1\n\
         RETURN -1\n\
         .endfunc",
    );
    result.unwrap();
    assert!(engine.context().open_upvalues().is_empty());

    let adder = entry_export(&mut engine, "adder")
        .and_then(Value::as_closure)
        .expect("adder exported");
    let upvalue = engine.heap().closure(adder).upvalue(0).unwrap();
    assert!(engine.heap().upvalue(upvalue).is_closed());
    assert_eq!(
        engine.heap().upvalue(upvalue).closed_value(),
        Some(Value::Int(10))
    );
}

#[test]
fn test_division_by_zero_is_caught_by_try() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 2\n.upvalues 0\n\
         SETUP_TRY handler\n\
         LOAD_INT 0 1\n\
         LOAD_INT 1 0\n\
         DIV 0 0 1\n\
         JUMP end\n\
         handler:\n\
         LOAD_INT 0 -1\n\
         end:\n\
         POP_TRY\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(engine.state(), VmState::HALT);
    assert_eq!(entry_register(&engine, 0), Value::Int(-1));
    assert_eq!(engine.context().handler_count(), 0);
}

#[test]
fn test_thrown_value_lands_in_handler_register() {
    let (mut engine, result) = run_source(
        ".func main\n\
         .registers 2\n.upvalues 0\n\
         SETUP_TRY handler\n\
         LOAD_CONST 1 \"payload\"\n\
         THROW 1\n\
         handler:\n\
         EXPORT \"caught\" 0\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    let caught = entry_export(&mut engine, "caught").unwrap();
    let payload = engine.heap_mut().new_string("payload");
    assert_eq!(caught, Value::String(payload));
}

#[test]
fn test_uncaught_throw_faults_with_diagnostic() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 1\n.upvalues 0\n\
         LOAD_CONST 0 \"boom\"\n\
         THROW 0\n\
         .endfunc",
    );
    let err = result.unwrap_err();
    assert_eq!(engine.state(), VmState::FAULT);
    match err {
        VmError::UncaughtThrow { value, backtrace } => {
            assert_eq!(value, "boom");
            assert!(!backtrace.is_empty());
            assert!(backtrace[0].contains("main"));
        }
        other => panic!("expected uncaught throw, got {other:?}"),
    }
}

#[test]
fn test_method_dispatch_with_inheritance_and_super() {
    let (engine, result) = run_source(
        ".func animalSpeak\n\
         .registers 1\n.upvalues 0\n\
         LOAD_CONST 0 \"?\"\n\
         RETURN 0\n\
         .endfunc\n\
         .func dogSpeak\n\
         .registers 3\n.upvalues 0\n\
         GET_SUPER 1 \"speak\"\n\
         CALL 2 1 0 0\n\
         LOAD_CONST 0 \"woof\"\n\
         ADD 0 2 0\n\
         RETURN 0\n\
         .endfunc\n\
         .func main\n\
         .registers 6\n.upvalues 0\n\
         NEW_CLASS 0 \"Animal\"\n\
         CLOSURE 1 @animalSpeak\n\
         SET_METHOD 0 \"speak\" 1\n\
         NEW_CLASS 2 \"Dog\"\n\
         INHERIT 2 0\n\
         CLOSURE 3 @dogSpeak\n\
         SET_METHOD 2 \"speak\" 3\n\
         NEW_INSTANCE 4 2\n\
         GET_PROP 5 4 \"speak\"\n\
         CALL 5 5 0 0\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    // Dog's override ran, and its GET_SUPER reached Animal's version.
    let rendered = engine.render_value(entry_register(&engine, 5));
    assert_eq!(rendered, "?woof");
}

#[test]
fn test_instance_fields_and_init() {
    let (engine, result) = run_source(
        ".func init\n\
         .registers 2\n.upvalues 0\n\
         SET_PROP 0 \"x\" 1\n\
         RETURN -1\n\
         .endfunc\n\
         .func main\n\
         .registers 4\n.upvalues 0\n\
         NEW_CLASS 0 \"Point\"\n\
         CLOSURE 1 @init\n\
         SET_METHOD 0 \"init\" 1\n\
         LOAD_INT 2 7\n\
         CALL 3 0 2 1\n\
         GET_PROP 3 3 \"x\"\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(entry_register(&engine, 3), Value::Int(7));
}

#[test]
fn test_collections_and_builtins() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 8\n.upvalues 0\n\
         LOAD_INT 0 1\n\
         LOAD_INT 1 2\n\
         NEW_ARRAY 2 0 2\n\
         GET_PROP 3 2 \"push\"\n\
         LOAD_INT 4 3\n\
         CALL -1 3 4 1\n\
         GET_PROP 5 2 \"length\"\n\
         LOAD_INT 6 1\n\
         GET_INDEX 7 2 6\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(entry_register(&engine, 5), Value::Int(3));
    assert_eq!(entry_register(&engine, 7), Value::Int(2));
}

#[test]
fn test_hash_operations() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 6\n.upvalues 0\n\
         LOAD_CONST 0 \"name\"\n\
         LOAD_CONST 1 \"meow\"\n\
         NEW_HASH 2 0 1\n\
         GET_INDEX 3 2 0\n\
         GET_KEYS 4 2\n\
         GET_PROP 5 4 \"length\"\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    let rendered = engine.render_value(entry_register(&engine, 3));
    assert_eq!(rendered, "meow");
    assert_eq!(entry_register(&engine, 5), Value::Int(1));
}

#[test]
fn test_missing_hash_key_is_catchable() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 3\n.upvalues 0\n\
         SETUP_TRY handler\n\
         NEW_HASH 0 0 0\n\
         LOAD_CONST 1 \"absent\"\n\
         GET_INDEX 2 0 1\n\
         HALT\n\
         handler:\n\
         LOAD_INT 2 -1\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(entry_register(&engine, 2), Value::Int(-1));
}

#[test]
fn test_calling_a_proto_is_a_type_error() {
    let (_engine, result) = run_source(
        ".func tiny\n\
         .registers 1\n.upvalues 0\n\
         RETURN -1\n\
         .endfunc\n\
         .func main\n\
         .registers 4\n.upvalues 0\n\
         LOAD_CONST 0 @tiny\n\
         LOAD_INT 1 1\n\
         CALL 3 0 1 1\n\
         HALT\n\
         .endfunc",
    );
    assert!(result.is_err());
}

#[test]
fn test_closure_call_with_too_many_args() {
    let (_engine, result) = run_source(
        ".func tiny\n\
         .registers 1\n.upvalues 0\n\
         RETURN -1\n\
         .endfunc\n\
         .func main\n\
         .registers 4\n.upvalues 0\n\
         CLOSURE 0 @tiny\n\
         LOAD_INT 1 1\n\
         LOAD_INT 2 2\n\
         CALL 3 0 1 2\n\
         HALT\n\
         .endfunc",
    );
    let err = result.unwrap_err();
    match err {
        VmError::UncaughtThrow { value, .. } => {
            assert!(value.starts_with("TypeError"), "got {value}");
        }
        other => panic!("expected uncaught type error, got {other:?}"),
    }
}

#[test]
fn test_load_int_extremes_round_trip() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 2\n.upvalues 0\n\
         LOAD_INT 0 -9223372036854775808\n\
         LOAD_INT 1 9223372036854775807\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(entry_register(&engine, 0), Value::Int(i64::MIN));
    assert_eq!(entry_register(&engine, 1), Value::Int(i64::MAX));
}

#[test]
fn test_close_upvalues_past_frame_is_a_noop() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 4\n.upvalues 0\n\
         LOAD_INT 0 9\n\
         CLOSE_UPVALUES 3\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(engine.state(), VmState::HALT);
    assert_eq!(entry_register(&engine, 0), Value::Int(9));
}

#[test]
fn test_truthiness_in_conditionals() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 2\n.upvalues 0\n\
         LOAD_CONST 0 \"\"\n\
         LOAD_INT 1 1\n\
         JUMP_IF_FALSE 0 empty_is_false\n\
         LOAD_INT 1 0\n\
         empty_is_false:\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(entry_register(&engine, 1), Value::Int(1));
}

#[test]
fn test_bitwise_and_unary_ops() {
    let (engine, result) = run_source(
        ".func main\n\
         .registers 4\n.upvalues 0\n\
         LOAD_INT 0 12\n\
         LOAD_INT 1 10\n\
         BIT_AND 2 0 1\n\
         NEG 3 0\n\
         NOT 0 1\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(entry_register(&engine, 2), Value::Int(8));
    assert_eq!(entry_register(&engine, 3), Value::Int(-12));
    assert_eq!(entry_register(&engine, 0), Value::Bool(false));
}

#[test]
fn test_recursion_via_globals() {
    // fib(10) through SET_GLOBAL/GET_GLOBAL recursion.
    let (engine, result) = run_source(
        ".func fib\n\
         .registers 8\n.upvalues 0\n\
         LOAD_INT 1 2\n\
         LT 2 0 1\n\
         JUMP_IF_FALSE 2 recurse\n\
         RETURN 0\n\
         recurse:\n\
         GET_GLOBAL 3 \"fib\"\n\
         LOAD_INT 1 1\n\
         SUB 4 0 1\n\
         CALL 5 3 4 1\n\
         LOAD_INT 1 2\n\
         SUB 4 0 1\n\
         CALL 6 3 4 1\n\
         ADD 7 5 6\n\
         RETURN 7\n\
         .endfunc\n\
         .func main\n\
         .registers 3\n.upvalues 0\n\
         CLOSURE 0 @fib\n\
         SET_GLOBAL 0 \"fib\"\n\
         LOAD_INT 1 10\n\
         CALL 2 0 1 1\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(entry_register(&engine, 2), Value::Int(55));
}
