//! Arithmetic, comparison, bitwise, and unary instructions, routed through
//! the operator dispatcher.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::value::Value;

pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::ADD, add);
    jump_table.register(OpCode::SUB, sub);
    jump_table.register(OpCode::MUL, mul);
    jump_table.register(OpCode::DIV, div);
    jump_table.register(OpCode::MOD, modulo);
    jump_table.register(OpCode::POW, pow);
    jump_table.register(OpCode::EQ, eq);
    jump_table.register(OpCode::NEQ, neq);
    jump_table.register(OpCode::GT, gt);
    jump_table.register(OpCode::GE, ge);
    jump_table.register(OpCode::LT, lt);
    jump_table.register(OpCode::LE, le);
    jump_table.register(OpCode::BIT_AND, bit_and);
    jump_table.register(OpCode::BIT_OR, bit_or);
    jump_table.register(OpCode::BIT_XOR, bit_xor);
    jump_table.register(OpCode::LSHIFT, lshift);
    jump_table.register(OpCode::RSHIFT, rshift);
    jump_table.register(OpCode::NEG, neg);
    jump_table.register(OpCode::NOT, not);
    jump_table.register(OpCode::BIT_NOT, bit_not);
}

fn binary_op(
    engine: &mut ExecutionEngine,
    instruction: &Instruction,
    opcode: OpCode,
) -> VmResult<()> {
    let left = engine.reg(instruction.b());
    let right = engine.reg(instruction.c());
    match engine.dispatcher().find_binary(opcode, left, right) {
        Some(op) => {
            let result = op(engine.heap_mut(), left, right)?;
            engine.set_reg(instruction.a(), result);
            Ok(())
        }
        // Equality across unrelated types is defined (always unequal);
        // everything else is a dispatcher miss.
        None if opcode == OpCode::EQ => {
            engine.set_reg(instruction.a(), Value::Bool(false));
            Ok(())
        }
        None if opcode == OpCode::NEQ => {
            engine.set_reg(instruction.a(), Value::Bool(true));
            Ok(())
        }
        None => Err(VmError::type_error(format!(
            "unsupported operand types for {}: {} and {}",
            opcode.name(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn unary_op(
    engine: &mut ExecutionEngine,
    instruction: &Instruction,
    opcode: OpCode,
) -> VmResult<()> {
    let operand = engine.reg(instruction.b());
    match engine.dispatcher().find_unary(opcode, operand) {
        Some(op) => {
            let result = op(engine.heap_mut(), operand)?;
            engine.set_reg(instruction.a(), result);
            Ok(())
        }
        None => Err(VmError::type_error(format!(
            "unsupported operand type for {}: {}",
            opcode.name(),
            operand.type_name()
        ))),
    }
}

fn add(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::ADD)
}

fn sub(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::SUB)
}

fn mul(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::MUL)
}

fn div(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::DIV)
}

fn modulo(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::MOD)
}

fn pow(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::POW)
}

fn eq(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::EQ)
}

fn neq(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::NEQ)
}

fn gt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::GT)
}

fn ge(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::GE)
}

fn lt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::LT)
}

fn le(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::LE)
}

fn bit_and(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::BIT_AND)
}

fn bit_or(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::BIT_OR)
}

fn bit_xor(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::BIT_XOR)
}

fn lshift(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::LSHIFT)
}

fn rshift(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    binary_op(engine, instruction, OpCode::RSHIFT)
}

fn neg(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    unary_op(engine, instruction, OpCode::NEG)
}

fn not(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    unary_op(engine, instruction, OpCode::NOT)
}

fn bit_not(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    unary_op(engine, instruction, OpCode::BIT_NOT)
}
