//! Module globals, imports, and exports.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::chunk::NO_REGISTER;
use crate::op_code::OpCode;

pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::GET_GLOBAL, get_global);
    jump_table.register(OpCode::SET_GLOBAL, set_global);
    jump_table.register(OpCode::IMPORT_MODULE, import_module);
    jump_table.register(OpCode::EXPORT, export);
    jump_table.register(OpCode::GET_EXPORT, get_export);
    jump_table.register(OpCode::GET_MODULE_EXPORT, get_export);
    jump_table.register(OpCode::IMPORT_ALL, import_all);
}

fn get_global(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let name = engine.constant_string(instruction.b())?;
    let module = engine.current_module();
    let value = engine
        .heap()
        .module(module)
        .global(name)
        .ok_or_else(|| {
            VmError::key_not_found(engine.heap().string(name).as_str().to_string())
        })?;
    engine.set_reg(instruction.a(), value);
    Ok(())
}

fn set_global(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = engine.reg(instruction.a());
    let name = engine.constant_string(instruction.b())?;
    let module = engine.current_module();
    engine.heap_mut().module_mut(module).set_global(name, value);
    Ok(())
}

/// `IMPORT_MODULE dst, path`: resolves through the module manager; a
/// freshly loaded module's main proto runs to completion before the
/// importer resumes.
fn import_module(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let path = engine
        .heap()
        .string(engine.constant_string(instruction.b())?)
        .as_str()
        .to_string();

    // Resume past this instruction before control leaves the frame.
    engine.jump_to(instruction.next());
    let module = engine.import_module(&path)?;
    if instruction.a() != NO_REGISTER {
        engine.set_reg(instruction.a(), module);
    }
    Ok(())
}

fn export(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let name = engine.constant_string(instruction.a())?;
    let value = engine.reg(instruction.b());
    let module = engine.current_module();
    engine.heap_mut().module_mut(module).set_export(name, value);
    Ok(())
}

fn get_export(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let module = engine
        .reg(instruction.b())
        .as_module()
        .ok_or_else(|| VmError::type_error("GET_EXPORT expects a module"))?;
    let name = engine.constant_string(instruction.c())?;
    let value = engine.heap().module(module).export(name).ok_or_else(|| {
        VmError::key_not_found(engine.heap().string(name).as_str().to_string())
    })?;
    engine.set_reg(instruction.a(), value);
    Ok(())
}

/// `IMPORT_ALL module`: copies every export of the module into the current
/// module's globals.
fn import_all(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let source = engine
        .reg(instruction.a())
        .as_module()
        .ok_or_else(|| VmError::type_error("IMPORT_ALL expects a module"))?;
    let current = engine.current_module();
    let exports: Vec<_> = engine.heap().module(source).exports().collect();
    for (name, value) in exports {
        engine.heap_mut().module_mut(current).set_global(name, value);
    }
    Ok(())
}
