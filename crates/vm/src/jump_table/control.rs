//! Jumps, calls, returns, and HALT.

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::value::Value;

pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::JUMP, jump);
    jump_table.register(OpCode::JUMP_IF_FALSE, jump_if_false);
    jump_table.register(OpCode::JUMP_IF_TRUE, jump_if_true);
    jump_table.register(OpCode::CALL, call);
    jump_table.register(OpCode::RETURN, ret);
    jump_table.register(OpCode::HALT, halt);
}

fn jump(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.jump_to(instruction.a() as usize);
    Ok(())
}

fn jump_if_false(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let condition = engine.reg(instruction.a());
    if !engine.truthy(condition) {
        engine.jump_to(instruction.b() as usize);
    }
    Ok(())
}

fn jump_if_true(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let condition = engine.reg(instruction.a());
    if engine.truthy(condition) {
        engine.jump_to(instruction.b() as usize);
    }
    Ok(())
}

/// `CALL dst, fn, arg_start, argc`. The caller's ip is advanced past the
/// instruction before the callee takes over, so returning resumes in the
/// right place.
fn call(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let callee = engine.reg(instruction.b());
    let arg_start = instruction.c() as usize;
    let argc = instruction.d() as usize;
    let base = engine.frame_base();
    let args: Vec<Value> = (0..argc)
        .map(|offset| engine.context().register(base + arg_start + offset))
        .collect();

    engine.jump_to(instruction.next());
    engine.call_value(instruction.a(), callee, args)
}

fn ret(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.return_from_frame(instruction.a())
}

fn halt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.halt();
    Ok(())
}
