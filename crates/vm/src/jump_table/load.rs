//! Load and move instructions.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::value::Value;

pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::LOAD_CONST, load_const);
    jump_table.register(OpCode::LOAD_NULL, load_null);
    jump_table.register(OpCode::LOAD_TRUE, load_true);
    jump_table.register(OpCode::LOAD_FALSE, load_false);
    jump_table.register(OpCode::LOAD_INT, load_int);
    jump_table.register(OpCode::LOAD_FLOAT, load_float);
    jump_table.register(OpCode::MOVE, mov);
}

fn load_const(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = engine.constant(instruction.b())?;
    engine.set_reg(instruction.a(), value);
    Ok(())
}

fn load_null(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.set_reg(instruction.a(), Value::Null);
    Ok(())
}

fn load_true(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.set_reg(instruction.a(), Value::Bool(true));
    Ok(())
}

fn load_false(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.set_reg(instruction.a(), Value::Bool(false));
    Ok(())
}

fn load_int(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = instruction
        .imm_int()
        .ok_or_else(|| VmError::type_error("LOAD_INT without integer immediate"))?;
    engine.set_reg(instruction.a(), Value::Int(value));
    Ok(())
}

fn load_float(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = instruction
        .imm_float()
        .ok_or_else(|| VmError::type_error("LOAD_FLOAT without float immediate"))?;
    engine.set_reg(instruction.a(), Value::Float(value));
    Ok(())
}

fn mov(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = engine.reg(instruction.b());
    engine.set_reg(instruction.a(), value);
    Ok(())
}
