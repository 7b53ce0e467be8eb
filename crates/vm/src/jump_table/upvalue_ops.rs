//! Closure creation and upvalue access.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::memory::GcRef;
use crate::object::{ObjUpvalue, UpvalueState};
use crate::op_code::OpCode;
use crate::value::Value;

pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::GET_UPVALUE, get_upvalue);
    jump_table.register(OpCode::SET_UPVALUE, set_upvalue);
    jump_table.register(OpCode::CLOSURE, closure);
    jump_table.register(OpCode::CLOSE_UPVALUES, close_upvalues);
}

fn upvalue_at(engine: &ExecutionEngine, index: u16) -> VmResult<GcRef<ObjUpvalue>> {
    let closure = engine.current_closure();
    engine
        .heap()
        .closure(closure)
        .upvalue(index as usize)
        .ok_or_else(|| VmError::type_error(format!("upvalue index {index} out of range")))
}

fn get_upvalue(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let upvalue = upvalue_at(engine, instruction.b())?;
    let value = match engine.heap().upvalue(upvalue).state() {
        UpvalueState::Open(slot) => engine.context().register(slot),
        UpvalueState::Closed(value) => value,
    };
    engine.set_reg(instruction.a(), value);
    Ok(())
}

fn set_upvalue(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = engine.reg(instruction.a());
    let upvalue = upvalue_at(engine, instruction.b())?;
    match engine.heap().upvalue(upvalue).state() {
        UpvalueState::Open(slot) => engine.context_mut().set_register(slot, value),
        UpvalueState::Closed(_) => engine.heap_mut().upvalue_mut(upvalue).set_closed_value(value),
    }
    Ok(())
}

/// `CLOSURE dst, proto_cidx` followed by one `(is_local, index)` pair per
/// proto upvalue. `is_local` captures caller register `index` (reusing an
/// already-open cell); otherwise the enclosing closure's upvalue `index` is
/// inherited.
fn closure(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let proto = engine
        .constant(instruction.b())?
        .as_proto()
        .ok_or_else(|| VmError::type_error("CLOSURE expects a proto constant"))?;
    let upvalue_count = engine.heap().proto(proto).num_upvalues();

    // Pull the capture list out of the stream and resolve the fallible
    // parts before any allocation happens.
    enum Capture {
        Local(usize),
        Parent(GcRef<ObjUpvalue>),
    }
    let mut captures = Vec::with_capacity(upvalue_count);
    let mut cursor = instruction.next();
    for _ in 0..upvalue_count {
        let (is_local, next) = engine.read_code_u16(cursor)?;
        let (index, next) = engine.read_code_u16(next)?;
        cursor = next;
        if is_local != 0 {
            captures.push(Capture::Local(engine.frame_base() + index as usize));
        } else {
            captures.push(Capture::Parent(upvalue_at(engine, index)?));
        }
    }

    // No collection can run mid-construction, but pause the collector
    // anyway while the closure graph is only partially published.
    engine.heap_mut().disable_gc();
    let module = engine.current_module();
    let mut upvalues = Vec::with_capacity(upvalue_count);
    for capture in captures {
        match capture {
            Capture::Local(slot) => upvalues.push(engine.capture_upvalue(slot)),
            Capture::Parent(upvalue) => upvalues.push(upvalue),
        }
    }
    let closure = engine.heap_mut().new_closure(proto, upvalues, module);
    engine.heap_mut().enable_gc();

    engine.set_reg(instruction.a(), Value::Closure(closure));
    engine.jump_to(cursor);
    Ok(())
}

fn close_upvalues(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let threshold = engine.frame_base() + instruction.a() as usize;
    engine.close_upvalues_from(threshold);
    Ok(())
}
