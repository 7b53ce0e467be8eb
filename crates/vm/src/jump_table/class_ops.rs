//! Classes, instances, property access, and method dispatch.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::object::NativeHandler;
use crate::op_code::OpCode;
use crate::value::Value;

pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::NEW_CLASS, new_class);
    jump_table.register(OpCode::NEW_INSTANCE, new_instance);
    jump_table.register(OpCode::GET_PROP, get_prop);
    jump_table.register(OpCode::SET_PROP, set_prop);
    jump_table.register(OpCode::SET_METHOD, set_method);
    jump_table.register(OpCode::INHERIT, inherit);
    jump_table.register(OpCode::GET_SUPER, get_super);
}

fn new_class(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let name = engine.constant_string(instruction.b())?;
    let class = engine.heap_mut().new_class(name);
    engine.set_reg(instruction.a(), Value::Class(class));
    Ok(())
}

fn new_instance(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let class = engine
        .reg(instruction.b())
        .as_class()
        .ok_or_else(|| VmError::type_error("NEW_INSTANCE expects a class"))?;
    let instance = engine.heap_mut().new_instance(class);
    engine.set_reg(instruction.a(), Value::Instance(instance));
    Ok(())
}

/// `GET_PROP dst, obj, name`: instance fields first, then the class chain
/// (closures come back bound to the instance), then builtin getters and
/// methods for primitive receivers.
fn get_prop(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let object = engine.reg(instruction.b());
    let name = engine.constant_string(instruction.c())?;

    let value = match object {
        Value::Instance(instance) => {
            if let Some(field) = engine.heap().instance(instance).field(name) {
                field
            } else {
                let class = engine.heap().instance(instance).class();
                match engine.lookup_method(class, name) {
                    Some(Value::Closure(method)) => {
                        let bound = engine.heap_mut().new_bound_method(instance, method);
                        Value::BoundMethod(bound)
                    }
                    Some(other) => other,
                    None => return Err(attribute_error(engine, object, name)),
                }
            }
        }
        Value::Class(class) => engine
            .lookup_method(class, name)
            .ok_or_else(|| attribute_error(engine, object, name))?,
        Value::Module(module) => engine
            .heap()
            .module(module)
            .export(name)
            .ok_or_else(|| attribute_error(engine, object, name))?,
        other => {
            let ty = other.type_of();
            if let Some(getter) = {
                let name_str = engine.heap().string(name).as_str();
                engine.builtins().find_getter(ty, name_str)
            } {
                match getter {
                    NativeHandler::Simple(f) => f(&[other])?,
                    NativeHandler::WithEngine(f) => f(engine, &[other])?,
                }
            } else if let Some((canonical, handler)) = {
                let name_str = engine.heap().string(name).as_str();
                engine.builtins().find_method(ty, name_str)
            } {
                let native = engine.heap_mut().new_bound_native(canonical, handler, other);
                Value::NativeFn(native)
            } else {
                return Err(attribute_error(engine, other, name));
            }
        }
    };

    engine.set_reg(instruction.a(), value);
    Ok(())
}

/// `SET_PROP obj, name, src`: only instances carry assignable fields.
fn set_prop(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let object = engine.reg(instruction.a());
    let name = engine.constant_string(instruction.b())?;
    let value = engine.reg(instruction.c());
    match object {
        Value::Instance(instance) => {
            engine.heap_mut().instance_mut(instance).set_field(name, value);
            Ok(())
        }
        other => Err(VmError::type_error(format!(
            "cannot set property on {}",
            other.type_name()
        ))),
    }
}

fn set_method(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let class = engine
        .reg(instruction.a())
        .as_class()
        .ok_or_else(|| VmError::type_error("SET_METHOD expects a class"))?;
    let name = engine.constant_string(instruction.b())?;
    let method = engine.reg(instruction.c());
    engine.heap_mut().class_mut(class).set_method(name, method);
    Ok(())
}

/// `INHERIT sub, super`: links the chain and copies the superclass methods
/// into the subclass; methods the subclass already defines win.
fn inherit(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let sub = engine
        .reg(instruction.a())
        .as_class()
        .ok_or_else(|| VmError::type_error("INHERIT expects a class"))?;
    let superclass = engine
        .reg(instruction.b())
        .as_class()
        .ok_or_else(|| VmError::type_error("INHERIT expects a superclass"))?;

    let inherited: Vec<_> = engine.heap().class(superclass).methods().collect();
    let sub_class = engine.heap_mut().class_mut(sub);
    sub_class.set_superclass(superclass);
    for (name, method) in inherited {
        if sub_class.method(name).is_none() {
            sub_class.set_method(name, method);
        }
    }
    Ok(())
}

/// `GET_SUPER dst, name`: method lookup starting at the superclass of the
/// current receiver's class. The receiver of a method call occupies the
/// frame's first register.
fn get_super(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let receiver = engine.reg(0);
    let name = engine.constant_string(instruction.b())?;
    let instance = receiver
        .as_instance()
        .ok_or_else(|| VmError::type_error("GET_SUPER outside a method call"))?;
    let class = engine.heap().instance(instance).class();
    let superclass = engine
        .heap()
        .class(class)
        .superclass()
        .ok_or_else(|| VmError::type_error("GET_SUPER on a class without a superclass"))?;

    match engine.lookup_method(superclass, name) {
        Some(Value::Closure(method)) => {
            let bound = engine.heap_mut().new_bound_method(instance, method);
            engine.set_reg(instruction.a(), Value::BoundMethod(bound));
            Ok(())
        }
        Some(other) => {
            engine.set_reg(instruction.a(), other);
            Ok(())
        }
        None => Err(attribute_error(engine, receiver, name)),
    }
}

fn attribute_error(
    engine: &ExecutionEngine,
    object: Value,
    name: crate::memory::GcRef<crate::object::ObjString>,
) -> VmError {
    VmError::attribute_not_found(
        engine.heap().string(name).as_str().to_string(),
        object.type_name().to_string(),
    )
}
