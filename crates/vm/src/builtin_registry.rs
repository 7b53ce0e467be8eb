//! Builtin method and getter tables for primitive-typed receivers.
//!
//! `GET_PROP` consults these when the receiver is not an instance, class,
//! or module. A getter computes its value on the spot (`"abc".length`); a
//! method materialises as a native function bound to the receiver, callable
//! like any other value. The registry holds only function pointers and
//! static names, so it contributes no GC roots.

use hashbrown::HashMap;

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::object::NativeHandler;
use crate::value::{Value, ValueType};

/// Per-type method and getter tables.
pub struct BuiltinRegistry {
    methods: HashMap<ValueType, HashMap<&'static str, NativeHandler>>,
    getters: HashMap<ValueType, HashMap<&'static str, NativeHandler>>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            methods: HashMap::new(),
            getters: HashMap::new(),
        };
        registry.register_string_builtins();
        registry.register_array_builtins();
        registry.register_hash_builtins();
        registry
    }

    pub fn register_method(&mut self, ty: ValueType, name: &'static str, handler: NativeHandler) {
        self.methods.entry(ty).or_default().insert(name, handler);
    }

    pub fn register_getter(&mut self, ty: ValueType, name: &'static str, handler: NativeHandler) {
        self.getters.entry(ty).or_default().insert(name, handler);
    }

    /// A method for `ty`, returned with its canonical name for binding.
    pub fn find_method(&self, ty: ValueType, name: &str) -> Option<(&'static str, NativeHandler)> {
        self.methods
            .get(&ty)?
            .get_key_value(name)
            .map(|(canonical, handler)| (*canonical, *handler))
    }

    /// A getter for `ty`.
    pub fn find_getter(&self, ty: ValueType, name: &str) -> Option<NativeHandler> {
        self.getters.get(&ty)?.get(name).copied()
    }

    fn register_string_builtins(&mut self) {
        self.register_getter(
            ValueType::String,
            "length",
            NativeHandler::WithEngine(string_length),
        );
        self.register_method(
            ValueType::String,
            "upper",
            NativeHandler::WithEngine(string_upper),
        );
        self.register_method(
            ValueType::String,
            "lower",
            NativeHandler::WithEngine(string_lower),
        );
        self.register_method(
            ValueType::String,
            "contains",
            NativeHandler::WithEngine(string_contains),
        );
    }

    fn register_array_builtins(&mut self) {
        self.register_getter(
            ValueType::Array,
            "length",
            NativeHandler::WithEngine(array_length),
        );
        self.register_method(
            ValueType::Array,
            "push",
            NativeHandler::WithEngine(array_push),
        );
        self.register_method(ValueType::Array, "pop", NativeHandler::WithEngine(array_pop));
        self.register_method(
            ValueType::Array,
            "contains",
            NativeHandler::WithEngine(array_contains),
        );
    }

    fn register_hash_builtins(&mut self) {
        self.register_getter(
            ValueType::HashTable,
            "length",
            NativeHandler::WithEngine(hash_length),
        );
        self.register_method(
            ValueType::HashTable,
            "has",
            NativeHandler::WithEngine(hash_has),
        );
        self.register_method(
            ValueType::HashTable,
            "remove",
            NativeHandler::WithEngine(hash_remove),
        );
    }
}

fn receiver(args: &[Value]) -> VmResult<Value> {
    args.first()
        .copied()
        .ok_or_else(|| VmError::type_error("builtin called without receiver"))
}

fn string_length(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?
        .as_string()
        .ok_or_else(|| VmError::type_error("length expects a string receiver"))?;
    Ok(Value::Int(engine.heap().string(string).len() as i64))
}

fn string_upper(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?
        .as_string()
        .ok_or_else(|| VmError::type_error("upper expects a string receiver"))?;
    let upper = engine.heap().string(string).as_str().to_uppercase();
    Ok(Value::String(engine.heap_mut().new_string(&upper)))
}

fn string_lower(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?
        .as_string()
        .ok_or_else(|| VmError::type_error("lower expects a string receiver"))?;
    let lower = engine.heap().string(string).as_str().to_lowercase();
    Ok(Value::String(engine.heap_mut().new_string(&lower)))
}

fn string_contains(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?
        .as_string()
        .ok_or_else(|| VmError::type_error("contains expects a string receiver"))?;
    let needle = args
        .get(1)
        .and_then(|value| value.as_string())
        .ok_or_else(|| VmError::type_error("contains expects a string argument"))?;
    let haystack = engine.heap().string(string).as_str();
    let needle = engine.heap().string(needle).as_str();
    Ok(Value::Bool(haystack.contains(needle)))
}

fn array_length(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let array = receiver(args)?
        .as_array()
        .ok_or_else(|| VmError::type_error("length expects an array receiver"))?;
    Ok(Value::Int(engine.heap().array(array).len() as i64))
}

fn array_push(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let array = receiver(args)?
        .as_array()
        .ok_or_else(|| VmError::type_error("push expects an array receiver"))?;
    let value = args
        .get(1)
        .copied()
        .ok_or_else(|| VmError::type_error("push expects a value"))?;
    engine.heap_mut().array_mut(array).push(value);
    Ok(Value::Null)
}

fn array_pop(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let array = receiver(args)?
        .as_array()
        .ok_or_else(|| VmError::type_error("pop expects an array receiver"))?;
    engine
        .heap_mut()
        .array_mut(array)
        .pop()
        .ok_or_else(|| VmError::index_out_of_range(-1, 0))
}

fn array_contains(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let array = receiver(args)?
        .as_array()
        .ok_or_else(|| VmError::type_error("contains expects an array receiver"))?;
    let needle = args
        .get(1)
        .copied()
        .ok_or_else(|| VmError::type_error("contains expects a value"))?;
    let found = engine.heap().array(array).iter().any(|value| value == needle);
    Ok(Value::Bool(found))
}

fn hash_length(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let hash = receiver(args)?
        .as_hash_table()
        .ok_or_else(|| VmError::type_error("length expects a hash receiver"))?;
    Ok(Value::Int(engine.heap().hash_table(hash).len() as i64))
}

fn hash_has(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let hash = receiver(args)?
        .as_hash_table()
        .ok_or_else(|| VmError::type_error("has expects a hash receiver"))?;
    let key = args
        .get(1)
        .and_then(|value| value.as_string())
        .ok_or_else(|| VmError::type_error("has expects a string key"))?;
    Ok(Value::Bool(engine.heap().hash_table(hash).has(key)))
}

fn hash_remove(engine: &mut ExecutionEngine, args: &[Value]) -> VmResult<Value> {
    let hash = receiver(args)?
        .as_hash_table()
        .ok_or_else(|| VmError::type_error("remove expects a hash receiver"))?;
    let key = args
        .get(1)
        .and_then(|value| value.as_string())
        .ok_or_else(|| VmError::type_error("remove expects a string key"))?;
    Ok(engine
        .heap_mut()
        .hash_table_mut(hash)
        .remove(key)
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_type_and_name() {
        let registry = BuiltinRegistry::new();
        assert!(registry.find_getter(ValueType::String, "length").is_some());
        assert!(registry.find_method(ValueType::Array, "push").is_some());
        assert!(registry.find_method(ValueType::String, "push").is_none());
        assert!(registry.find_getter(ValueType::Int, "length").is_none());

        let (name, _) = registry.find_method(ValueType::HashTable, "has").unwrap();
        assert_eq!(name, "has");
    }
}
