//! Array and hash table instructions.

use hashbrown::HashMap;

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::value::Value;

pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::NEW_ARRAY, new_array);
    jump_table.register(OpCode::NEW_HASH, new_hash);
    jump_table.register(OpCode::GET_INDEX, get_index);
    jump_table.register(OpCode::SET_INDEX, set_index);
    jump_table.register(OpCode::GET_KEYS, get_keys);
    jump_table.register(OpCode::GET_VALUES, get_values);
}

fn new_array(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let start = instruction.b();
    let count = instruction.c() as usize;
    let elements: Vec<Value> = (0..count)
        .map(|offset| engine.reg(start + offset as u16))
        .collect();
    let array = engine.heap_mut().new_array(elements);
    engine.set_reg(instruction.a(), Value::Array(array));
    Ok(())
}

/// `NEW_HASH dst, start, count` reads `2 * count` registers holding
/// alternating keys and values; keys must be strings.
fn new_hash(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let start = instruction.b();
    let count = instruction.c() as usize;
    let mut entries = HashMap::with_capacity(count);
    for pair in 0..count {
        let key = engine.reg(start + (2 * pair) as u16);
        let value = engine.reg(start + (2 * pair + 1) as u16);
        let key = key.as_string().ok_or_else(|| {
            VmError::type_error(format!("hash key must be a string, got {}", key.type_name()))
        })?;
        entries.insert(key, value);
    }
    let hash = engine.heap_mut().new_hash_table(entries);
    engine.set_reg(instruction.a(), Value::HashTable(hash));
    Ok(())
}

fn get_index(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let container = engine.reg(instruction.b());
    let index = engine.reg(instruction.c());
    let value = match (container, index) {
        (Value::Array(array), Value::Int(i)) => {
            let len = engine.heap().array(array).len();
            if i < 0 {
                return Err(VmError::index_out_of_range(i, len));
            }
            engine
                .heap()
                .array(array)
                .get(i as usize)
                .ok_or_else(|| VmError::index_out_of_range(i, len))?
        }
        (Value::Array(_), other) => {
            return Err(VmError::type_error(format!(
                "array index must be an int, got {}",
                other.type_name()
            )))
        }
        (Value::HashTable(hash), Value::String(key)) => {
            engine.heap().hash_table(hash).get(key).ok_or_else(|| {
                VmError::key_not_found(engine.heap().string(key).as_str().to_string())
            })?
        }
        (Value::HashTable(_), other) => {
            return Err(VmError::type_error(format!(
                "hash key must be a string, got {}",
                other.type_name()
            )))
        }
        (other, _) => {
            return Err(VmError::type_error(format!(
                "value of type {} is not indexable",
                other.type_name()
            )))
        }
    };
    engine.set_reg(instruction.a(), value);
    Ok(())
}

fn set_index(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let container = engine.reg(instruction.a());
    let index = engine.reg(instruction.b());
    let value = engine.reg(instruction.c());
    match (container, index) {
        (Value::Array(array), Value::Int(i)) => {
            let len = engine.heap().array(array).len();
            if i < 0 || !engine.heap_mut().array_mut(array).set(i as usize, value) {
                return Err(VmError::index_out_of_range(i, len));
            }
            Ok(())
        }
        (Value::Array(_), other) => Err(VmError::type_error(format!(
            "array index must be an int, got {}",
            other.type_name()
        ))),
        (Value::HashTable(hash), Value::String(key)) => {
            engine.heap_mut().hash_table_mut(hash).set(key, value);
            Ok(())
        }
        (Value::HashTable(_), other) => Err(VmError::type_error(format!(
            "hash key must be a string, got {}",
            other.type_name()
        ))),
        (other, _) => Err(VmError::type_error(format!(
            "value of type {} is not indexable",
            other.type_name()
        ))),
    }
}

fn get_keys(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let hash = engine
        .reg(instruction.b())
        .as_hash_table()
        .ok_or_else(|| VmError::type_error("GET_KEYS expects a hash table"))?;
    let keys: Vec<Value> = engine
        .heap()
        .hash_table(hash)
        .keys()
        .map(Value::String)
        .collect();
    let array = engine.heap_mut().new_array(keys);
    engine.set_reg(instruction.a(), Value::Array(array));
    Ok(())
}

fn get_values(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let hash = engine
        .reg(instruction.b())
        .as_hash_table()
        .ok_or_else(|| VmError::type_error("GET_VALUES expects a hash table"))?;
    let values: Vec<Value> = engine.heap().hash_table(hash).values().collect();
    let array = engine.heap_mut().new_array(values);
    engine.set_reg(instruction.a(), Value::Array(array));
    Ok(())
}
