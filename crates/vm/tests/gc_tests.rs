//! End-to-end garbage collection behaviour.

mod common;

use common::{entry_register, run_source};
use meow_vm::{Value, VmState};

#[test]
fn test_collection_reclaims_loop_garbage() {
    // 10,000 arrays, each dropped the moment the next iteration starts.
    // The loop allocates far past the collection threshold, so the
    // collector must run and reclaim the churn while the program is live.
    let (mut engine, result) = run_source(
        ".func main\n\
         .registers 4\n.upvalues 0\n\
         LOAD_INT 1 0\n\
         LOAD_INT 2 10000\n\
         LOAD_CONST 3 \"keepsake\"\n\
         loop:\n\
         LT 0 1 2\n\
         JUMP_IF_FALSE 0 done\n\
         NEW_ARRAY 0 1 1\n\
         LOAD_INT 0 1\n\
         ADD 1 1 0\n\
         JUMP loop\n\
         done:\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();
    assert_eq!(engine.state(), VmState::HALT);

    engine.force_collect();
    // Only the rooted graph survives: the module, its protos and strings,
    // and the registers. Ten thousand dead arrays do not.
    assert!(
        engine.heap().live_object_count() < 64,
        "live objects: {}",
        engine.heap().live_object_count()
    );

    // Interned strings referenced from the constant pool are untouched.
    let keepsake = engine
        .heap()
        .find_interned("keepsake")
        .expect("constant still interned");
    assert!(engine.heap().string_is_live(keepsake));
    assert_eq!(
        entry_register(&engine, 3),
        Value::String(keepsake)
    );
}

#[test]
fn test_chain_reachable_from_tail_survives() {
    // Build a linked chain: each array holds the previous as its only
    // element, with only the newest kept in a register.
    let (mut engine, result) = run_source(
        ".func main\n\
         .registers 4\n.upvalues 0\n\
         NEW_ARRAY 0 0 0\n\
         LOAD_INT 1 0\n\
         LOAD_INT 2 100\n\
         loop:\n\
         LT 3 1 2\n\
         JUMP_IF_FALSE 3 done\n\
         NEW_ARRAY 3 0 1\n\
         MOVE 0 3\n\
         LOAD_INT 3 1\n\
         ADD 1 1 3\n\
         JUMP loop\n\
         done:\n\
         HALT\n\
         .endfunc",
    );
    result.unwrap();

    engine.force_collect();

    // Walk the chain from the tail; every link must still be live.
    let mut cursor = entry_register(&engine, 0).as_array().expect("tail array");
    let mut links = 0;
    loop {
        assert!(engine.heap().array_is_live(cursor));
        match engine.heap().array(cursor).get(0) {
            Some(Value::Array(previous)) => {
                cursor = previous;
                links += 1;
            }
            Some(other) => panic!("unexpected chain element {other:?}"),
            None => break,
        }
    }
    assert_eq!(links, 100);
}

#[test]
fn test_upvalue_keeps_captured_value_alive() {
    // A closed upvalue is the only path to the captured array after main's
    // locals are gone; collection must keep both.
    let (mut engine, result) = run_source(
        ".func getter\n\
         .registers 1\n.upvalues 1\n\
         .upvalue 0 local 0\n\
         GET_UPVALUE 0 0\n\
         RETURN 0\n\
         .endfunc\n\
         .func main\n\
         .registers 2\n.upvalues 0\n\
         LOAD_INT 1 7\n\
         NEW_ARRAY 0 1 1\n\
         CLOSURE 1 @getter 1 0\n\
         EXPORT \"getter\" 1\n\
         RETURN -1\n\
         .endfunc",
    );
    result.unwrap();

    engine.force_collect();

    let module = common::entry_module(&engine);
    let getter = {
        let name = engine.heap_mut().new_string("getter");
        engine.heap().module(module).export(name).unwrap()
    };
    let closure = getter.as_closure().unwrap();
    let upvalue = engine.heap().closure(closure).upvalue(0).unwrap();
    let captured = engine
        .heap()
        .upvalue(upvalue)
        .closed_value()
        .and_then(Value::as_array)
        .expect("captured array");
    assert!(engine.heap().array_is_live(captured));
    assert_eq!(engine.heap().array(captured).get(0), Some(Value::Int(7)));
}
