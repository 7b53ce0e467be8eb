//! Try/throw instructions.

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;

pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::SETUP_TRY, setup_try);
    jump_table.register(OpCode::POP_TRY, pop_try);
    jump_table.register(OpCode::THROW, throw);
}

fn setup_try(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.push_try_handler(instruction.a() as usize);
    Ok(())
}

fn pop_try(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.pop_try_handler();
    Ok(())
}

fn throw(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = engine.reg(instruction.a());
    engine.throw_value(value)
}
