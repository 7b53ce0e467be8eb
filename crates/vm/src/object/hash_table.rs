//! String-keyed hash tables.

use hashbrown::HashMap;

use crate::memory::{GcRef, Trace, Tracer};
use crate::object::ObjString;
use crate::value::Value;

/// A mapping from interned strings to values. Iteration order is not
/// guaranteed; key identity relies on the intern pool.
#[derive(Debug, Default)]
pub struct ObjHashTable {
    entries: HashMap<GcRef<ObjString>, Value>,
}

impl ObjHashTable {
    pub fn new(entries: HashMap<GcRef<ObjString>, Value>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: GcRef<ObjString>) -> Option<Value> {
        self.entries.get(&key).copied()
    }

    pub fn set(&mut self, key: GcRef<ObjString>, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn has(&self, key: GcRef<ObjString>) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn remove(&mut self, key: GcRef<ObjString>) -> Option<Value> {
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = GcRef<ObjString>> + '_ {
        self.entries.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.values().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcRef<ObjString>, Value)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }
}

impl Trace for ObjHashTable {
    fn trace(&self, tracer: &mut Tracer) {
        for (key, value) in &self.entries {
            tracer.visit_string(*key);
            tracer.visit_value(*value);
        }
    }
}
